//! In-process event bus and user-facing notification text.

use tokio::sync::broadcast;

use crate::protocol::{Contact, MessageKind, Sender};

const BUS_CAPACITY: usize = 64;

/// Something changed in a peer's history. Open conversation views subscribe to these.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    MessageReceived { peer: String },
    MessageSent { peer: String },
    HistoryCleared { peer: String },
}

impl ChatEvent {
    pub fn appended(peer: &str, sender: Sender) -> Self {
        let peer = peer.to_string();
        match sender {
            Sender::Me => ChatEvent::MessageSent { peer },
            Sender::Other => ChatEvent::MessageReceived { peer },
        }
    }

    pub fn peer(&self) -> &str {
        match self {
            ChatEvent::MessageReceived { peer }
            | ChatEvent::MessageSent { peer }
            | ChatEvent::HistoryCleared { peer } => peer,
        }
    }
}

/// Fan-out of [`ChatEvent`]s. Publishing with no subscribers is fine.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ChatEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BUS_CAPACITY);
        Self { tx }
    }

    pub fn publish(&self, event: ChatEvent) {
        // Err only means nobody is listening right now.
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChatEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// OS notification surface.
pub trait Notifier: Send + Sync {
    fn notify(&self, title: &str, body: &str);
}

/// Title for an incoming-message notification: the contact's name when known, else the raw ip.
pub fn notification_title(contact: Option<&Contact>, peer: &str) -> String {
    match contact {
        Some(c) => format!("💬 {}", c.name),
        None => format!("📩 {peer}"),
    }
}

/// Body for an incoming-message notification.
pub fn notification_body(kind: MessageKind, content: &str) -> String {
    match kind {
        MessageKind::Text => content.to_string(),
        MessageKind::Image => "📷 New photo".to_string(),
        MessageKind::Video => "🎥 New video".to_string(),
        MessageKind::Audio => "🎵 Voice message".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_see_published_events() {
        let bus = EventBus::new();
        let mut view = bus.subscribe();
        bus.publish(ChatEvent::appended("10.0.0.3", Sender::Other));
        bus.publish(ChatEvent::appended("10.0.0.3", Sender::Me));
        assert_eq!(
            view.recv().await.unwrap(),
            ChatEvent::MessageReceived {
                peer: "10.0.0.3".into()
            }
        );
        let sent = view.recv().await.unwrap();
        assert_eq!(sent.peer(), "10.0.0.3");
        assert!(matches!(sent, ChatEvent::MessageSent { .. }));
    }

    #[test]
    fn publish_without_subscribers_is_silent() {
        EventBus::new().publish(ChatEvent::HistoryCleared { peer: "x".into() });
    }

    #[test]
    fn titles_and_bodies() {
        let contact = Contact {
            id: "1".into(),
            name: "Lan".into(),
            ip: "192.168.1.8".into(),
        };
        assert_eq!(notification_title(Some(&contact), "192.168.1.8"), "💬 Lan");
        assert_eq!(notification_title(None, "192.168.1.8"), "📩 192.168.1.8");
        assert_eq!(notification_body(MessageKind::Text, "hello"), "hello");
        assert_eq!(notification_body(MessageKind::Image, "…"), "📷 New photo");
        assert_eq!(notification_body(MessageKind::Video, "…"), "🎥 New video");
        assert_eq!(notification_body(MessageKind::Audio, "…"), "🎵 Voice message");
    }
}
