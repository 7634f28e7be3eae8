use crate::app::event::Event;
use crate::irc::message::Message;

/// Output of a protocol handler, applied by the network dispatcher in order.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Queue a line on the session's outbound queue.
    Send(Message),
    /// Publish an event to the remaining handlers and to bus subscribers.
    Publish(Event),
    /// A capability dependent finished its exchange.
    CapDone(String),
}

impl Action {
    pub fn send<S: Into<String>>(verb: &str, params: impl IntoIterator<Item = S>) -> Self {
        Action::Send(Message::new(verb, params))
    }
}
