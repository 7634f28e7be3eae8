//! crabirc: an asynchronous IRC client core.
//!
//! One [`irc::manager::IrcManager`] owns every configured connection and runs
//! a single event loop. Each connection registers, negotiates capabilities,
//! authenticates with SASL PLAIN when configured, reconnects with backoff and
//! tracks the channels and users it can see.

pub mod app;
pub mod config;
pub mod error;
pub mod irc;
pub mod logging;
