//! # Application Layer
//!
//! Contains the core engines of the bot: per-user lanes, the session registry, the
//! per-user inbox, the dispatcher, the flow builder and the fan-out engine, plus the shared services.

pub mod audit;
pub mod dispatcher;
pub mod entities;
pub mod fanout;
pub mod flow;
pub mod inbox;
pub mod lanes;
pub mod services;
pub mod session;

#[cfg(test)]
pub mod testing;
