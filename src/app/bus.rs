//! Named-event publish/subscribe.
//!
//! Delivery is synchronous and in-process: `publish` invokes every handler
//! subscribed to the event's name, in subscription order, before returning.
//! Nothing is persisted or replayed for late subscribers.

use std::collections::HashMap;

use crate::app::event::Event;
use crate::irc::network::Network;

pub type Handler = Box<dyn FnMut(&mut Network, &Event) + Send>;

#[derive(Default)]
pub struct Bus {
    handlers: HashMap<String, Vec<Handler>>,
}

impl Bus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for events published under `name`
    /// (see [`Event::name`]).
    pub fn subscribe<F>(&mut self, name: &str, handler: F)
    where
        F: FnMut(&mut Network, &Event) + Send + 'static,
    {
        self.handlers
            .entry(name.to_string())
            .or_default()
            .push(Box::new(handler));
    }

    pub fn publish(&mut self, network: &mut Network, event: &Event) {
        if let Some(handlers) = self.handlers.get_mut(event.name().as_ref()) {
            for handler in handlers.iter_mut() {
                handler(network, event);
            }
        }
    }

    pub fn subscriber_count(&self, name: &str) -> usize {
        self.handlers.get(name).map_or(0, Vec::len)
    }
}

impl std::fmt::Debug for Bus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.handlers.keys().collect();
        names.sort();
        f.debug_struct("Bus").field("events", &names).finish()
    }
}
