//! # Strings Module
//!
//! Centralizes user-facing strings and the text rendering of menus.
//! Keeps the wording of every dialog in one place.

pub mod menu;
pub mod messages;
