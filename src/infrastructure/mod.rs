//! # Infrastructure Layer
//!
//! Handles interactions with external systems and services.
//! Implements the traits defined in the Domain layer (`ChannelClient`, `Store`).

pub mod matrix;
pub mod seed;
pub mod store;
