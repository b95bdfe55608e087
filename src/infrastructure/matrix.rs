//! # Matrix Channel Adapter
//!
//! Implements the `ChannelClient` trait for the Matrix protocol using the `matrix_sdk`,
//! and turns inbound room messages into the bot's `Event` type.
//!
//! Targets starting with `@` are users: they are reached through their direct-message
//! room, which is created on first contact. A user who left that room is unreachable.

use async_trait::async_trait;
use matrix_sdk::Client;
use matrix_sdk::room::Room;
use matrix_sdk::ruma::api::client::receipt::create_receipt::v3::ReceiptType;
use matrix_sdk::ruma::events::receipt::ReceiptThread;
use matrix_sdk::ruma::events::relation::Replacement;
use matrix_sdk::ruma::events::room::member::MembershipState;
use matrix_sdk::ruma::events::room::message::{
    Relation, RoomMessageEventContent, RoomMessageEventContentWithoutRelation,
};
use matrix_sdk::ruma::{EventId, RoomId, UserId as MatrixUserId};

use crate::application::entities;
use crate::domain::config::ChannelsConfig;
use crate::domain::error::DeliveryError;
use crate::domain::traits::ChannelClient;
use crate::domain::types::{ActionEvent, ChannelRef, Event, MessageRef, SendOptions, TextEvent, UserId};
use crate::strings::menu;

#[derive(Clone)]
pub struct MatrixChannel {
    client: Client,
}

impl MatrixChannel {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn resolve(&self, target: &str) -> Result<Room, DeliveryError> {
        if target.starts_with('@') {
            return self.direct_room(target).await;
        }
        let room_id = RoomId::parse(target).map_err(|_| DeliveryError::InvalidTarget(target.to_string()))?;
        self.client
            .get_room(&room_id)
            .ok_or_else(|| DeliveryError::InvalidTarget(target.to_string()))
    }

    async fn direct_room(&self, target: &str) -> Result<Room, DeliveryError> {
        let user_id = MatrixUserId::parse(target).map_err(|_| DeliveryError::InvalidTarget(target.to_string()))?;
        let unreachable = |reason: String| DeliveryError::Unreachable {
            target: target.to_string(),
            reason,
        };

        if let Some(room) = self.client.get_dm_room(&user_id) {
            let member = room
                .get_member_no_sync(&user_id)
                .await
                .map_err(|e| DeliveryError::Transport(e.to_string()))?;
            return match member.map(|m| m.membership().clone()) {
                Some(MembershipState::Leave) | Some(MembershipState::Ban) => Err(unreachable("left the conversation".into())),
                _ => Ok(room),
            };
        }

        tracing::info!("Opening direct room with {}", target);
        self.client
            .create_dm(&user_id)
            .await
            .map_err(|e| unreachable(e.to_string()))
    }

    /// Helper to send markdown edits
    async fn internal_edit(&self, room: &Room, event_id: &str, new_content: RoomMessageEventContent) -> anyhow::Result<()> {
        let event_id = <&EventId>::try_from(event_id)?;
        let mut content = new_content;
        let replacement_content = RoomMessageEventContentWithoutRelation::from(content.clone());

        content.relates_to = Some(Relation::Replacement(Replacement::new(
            event_id.to_owned(),
            replacement_content,
        )));

        room.send(content).await?;
        Ok(())
    }

    fn content(content: &str, options: &SendOptions) -> RoomMessageEventContent {
        let body = match &options.menu {
            Some(m) if !m.rows.is_empty() => format!("{}\n\n{}", content, menu::render(m)),
            _ => content.to_string(),
        };
        if options.markdown {
            RoomMessageEventContent::text_markdown(body)
        } else {
            RoomMessageEventContent::text_plain(body)
        }
    }

    fn delivery_error(target: &str, e: impl std::fmt::Display) -> DeliveryError {
        if target.starts_with('@') {
            DeliveryError::Unreachable {
                target: target.to_string(),
                reason: e.to_string(),
            }
        } else {
            DeliveryError::Transport(e.to_string())
        }
    }
}

#[async_trait]
impl ChannelClient for MatrixChannel {
    async fn send(&self, target: &str, content: &str, options: &SendOptions) -> Result<MessageRef, DeliveryError> {
        let room = self.resolve(target).await?;
        tracing::debug!("Bot sending message to {}: {}", target, content);
        room.send(Self::content(content, options))
            .await
            .map(|resp| {
                MessageRef::new(ChannelRef::new(room.room_id().as_str()), resp.event_id.to_string()).with_body(content)
            })
            .map_err(|e| Self::delivery_error(target, e))
    }

    async fn edit(&self, message: &MessageRef, content: &str, options: &SendOptions) -> Result<(), DeliveryError> {
        let room = self.resolve(message.channel.as_str()).await?;
        self.internal_edit(&room, &message.message_id, Self::content(content, options))
            .await
            .map_err(|e| DeliveryError::Transport(e.to_string()))
    }

    async fn forward(&self, target: &str, source: &MessageRef) -> Result<MessageRef, DeliveryError> {
        let link = permalink(source);
        let content = match &source.body {
            Some(body) => format!("{}\n\n[Original post]({})", body, link),
            None => link,
        };
        self.send(target, &content, &SendOptions::default()).await
    }

    async fn acknowledge(&self, action: &MessageRef) -> Result<(), DeliveryError> {
        let room = self.resolve(action.channel.as_str()).await?;
        let event_id = EventId::parse(&action.message_id)
            .map_err(|_| DeliveryError::InvalidTarget(action.message_id.clone()))?;
        room.send_single_receipt(ReceiptType::Read, ReceiptThread::Unthreaded, event_id)
            .await
            .map_err(|e| DeliveryError::Transport(e.to_string()))
    }

    async fn is_member(&self, channel: &ChannelRef, user: &UserId) -> Result<bool, DeliveryError> {
        let room = self.resolve(channel.as_str()).await?;
        let user_id =
            MatrixUserId::parse(user.as_str()).map_err(|_| DeliveryError::InvalidTarget(user.to_string()))?;
        let member = room
            .get_member(&user_id)
            .await
            .map_err(|e| DeliveryError::Transport(e.to_string()))?;
        Ok(member.is_some_and(|m| *m.membership() == MembershipState::Join))
    }
}

pub fn permalink(message: &MessageRef) -> String {
    format!("https://matrix.to/#/{}/{}", message.channel, message.message_id)
}

/// What an inbound room message means to the bot.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Event(Event),
    /// A post in the broadcast room, to be fanned out to the subscribers of `tags`.
    ChannelPost { message: MessageRef, tags: Vec<String> },
    Ignored(String),
}

/// Classifies a text message received in `room` from `sender`.
pub fn normalize(channels: &ChannelsConfig, room: &str, sender: &str, event_id: &str, body: &str) -> Inbound {
    let origin = MessageRef::new(ChannelRef::new(room), event_id).with_body(body);
    let user = UserId::new(sender);

    if room == channels.broadcast {
        if let Some(source) = channels
            .affiliated
            .iter()
            .find(|a| body.contains(&format!("matrix.to/#/{}", a)))
        {
            return Inbound::Ignored(format!("post forwarded from affiliated room {}", source));
        }
        let tags = entities::extract_tags(body, &entities::scan(body));
        if !tags.has_hashtags {
            return Inbound::Ignored("broadcast post without hashtags".into());
        }
        return Inbound::ChannelPost {
            message: origin,
            tags: tags.tags,
        };
    }

    let trimmed = body.trim_start();
    if let Some(rest) = trimmed.strip_prefix(menu::ACTION_PREFIX) {
        let parsed = if rest.starts_with('{') {
            ActionEvent::from_callback(event_id, user, rest)
        } else {
            ActionEvent::parse_command(event_id, user, trimmed)
        };
        return match parsed {
            Ok(action) => Inbound::Event(Event::Action(action.with_origin(origin))),
            Err(e) => Inbound::Ignored(e.to_string()),
        };
    }

    let mut text = TextEvent::new(user, body, entities::scan(body));
    text.origin = Some(origin);
    Inbound::Event(Event::Text(text))
}
