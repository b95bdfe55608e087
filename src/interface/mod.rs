//! # Interface Layer
//!
//! Feature commands registered into the dispatcher's command table.

pub mod commands;
