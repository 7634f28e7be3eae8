//! Core application logic: events, the publish/subscribe bus, and channel state tracking.

pub mod action;
pub mod bus;
pub mod event;
pub mod handler;
pub mod state;
