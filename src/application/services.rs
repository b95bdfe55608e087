//! # Services
//!
//! Everything a handler needs, built once at startup and shared behind an `Arc`.

use anyhow::Result;
use std::sync::Arc;

use crate::application::audit::AuditLog;
use crate::application::fanout::FanoutEngine;
use crate::application::session::SessionRegistry;
use crate::domain::config::AppConfig;
use crate::domain::traits::{ChannelClient, Store};
use crate::domain::types::{ChannelRef, MessageRef, SendOptions, UserId};

pub struct Services {
    pub config: AppConfig,
    pub channel: Arc<dyn ChannelClient>,
    pub store: Arc<dyn Store>,
    pub sessions: Arc<SessionRegistry>,
    pub fanout: FanoutEngine,
    pub audit: AuditLog,
}

impl Services {
    pub fn new(config: AppConfig, channel: Arc<dyn ChannelClient>, store: Arc<dyn Store>, audit: AuditLog) -> Self {
        let fanout = FanoutEngine::new(channel.clone(), store.clone(), config.fanout.policy(), audit.clone());
        Self {
            config,
            channel,
            store,
            sessions: Arc::new(SessionRegistry::new()),
            fanout,
            audit,
        }
    }

    pub fn is_admin(&self, user: &UserId) -> bool {
        self.config.is_admin(user.as_str())
    }

    /// Sends a direct message to `user`.
    pub async fn reply(&self, user: &UserId, content: &str) -> Result<MessageRef> {
        self.reply_with(user, content, &SendOptions::default()).await
    }

    pub async fn reply_with(&self, user: &UserId, content: &str, options: &SendOptions) -> Result<MessageRef> {
        Ok(self.channel.send(user.as_str(), content, options).await?)
    }

    pub fn staff_room(&self) -> &str {
        &self.config.channels.staff
    }

    pub fn broadcast_room(&self) -> &str {
        &self.config.channels.broadcast
    }

    /// Membership gate for suggesting and subscribing. Open when no membership room is configured.
    pub async fn is_member(&self, user: &UserId) -> Result<bool> {
        match &self.config.channels.membership_room {
            Some(room) => Ok(self.channel.is_member(&ChannelRef::new(room.clone()), user).await?),
            None => Ok(true),
        }
    }
}
