use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 256;

pub fn coach_channel(id: Ulid) -> String {
    format!("coach_{id}")
}

pub fn client_channel(id: Ulid) -> String {
    format!("client_{id}")
}

/// Broadcast hub for LISTEN/NOTIFY.
///
/// Every event lands on its coach's channel; booking events land on the
/// owning client's channel as well, which is how a client observes its
/// bookings progressing without polling.
pub struct NotifyHub {
    channels: DashMap<String, broadcast::Sender<Event>>,
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to a channel by name. Creates the channel if needed.
    pub fn subscribe(&self, channel: &str) -> broadcast::Receiver<Event> {
        let sender = self
            .channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Send to one channel. No-op if nobody is listening.
    pub fn send(&self, channel: &str, event: &Event) {
        if let Some(sender) = self.channels.get(channel) {
            let _ = sender.send(event.clone());
        }
    }

    /// Route an event to every feed it belongs to.
    pub fn publish(&self, event: &Event) {
        self.send(&coach_channel(event.coach_id()), event);
        if let Some(client) = event.client_id() {
            self.send(&client_channel(client), event);
        }
    }

    /// Remove a channel (e.g. when a coach is removed).
    #[allow(dead_code)]
    pub fn remove(&self, channel: &str) {
        self.channels.remove(channel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Actor, BookingStatus, CoachCategory};

    #[tokio::test]
    async fn subscribe_and_receive() {
        let hub = NotifyHub::new();
        let coach = Ulid::new();
        let mut rx = hub.subscribe(&coach_channel(coach));

        let event = Event::CoachRegistered {
            id: coach,
            category: CoachCategory::General,
            price_per_session: 350,
            session_minutes: 120,
        };
        hub.publish(&event);

        let received = rx.recv().await.unwrap();
        assert_eq!(received, event);
    }

    #[tokio::test]
    async fn booking_event_reaches_both_feeds() {
        let hub = NotifyHub::new();
        let coach = Ulid::new();
        let client = Ulid::new();
        let mut coach_rx = hub.subscribe(&coach_channel(coach));
        let mut client_rx = hub.subscribe(&client_channel(client));

        let event = Event::BookingTransitioned {
            id: Ulid::new(),
            coach_id: coach,
            client_id: client,
            to: BookingStatus::Confirmed,
            actor: Actor::Coach,
            at: 0,
        };
        hub.publish(&event);

        assert_eq!(coach_rx.recv().await.unwrap(), event);
        assert_eq!(client_rx.recv().await.unwrap(), event);
    }

    #[tokio::test]
    async fn coach_event_skips_client_feeds() {
        let hub = NotifyHub::new();
        let coach = Ulid::new();
        let mut client_rx = hub.subscribe(&client_channel(coach));

        hub.publish(&Event::CoachRemoved { id: coach });

        // Channel shares the coach's ulid but the event carries no client
        assert!(client_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn send_without_subscribers_is_noop() {
        let hub = NotifyHub::new();
        let coach = Ulid::new();
        // No subscriber — should not panic
        hub.publish(&Event::CoachRemoved { id: coach });
    }
}
