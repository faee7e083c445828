use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 256;

/// A schedule/reservation change fanned out to collaborator services
/// (payment confirmation, student messaging). Delivery transport beyond this
/// broadcast is the consumers' concern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub instructor_id: Ulid,
    /// JSON rendering of the underlying event.
    pub payload: String,
}

/// Broadcast hub, one channel per instructor.
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<Notification>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to notifications for an instructor. Creates the channel if needed.
    pub fn subscribe(&self, instructor_id: Ulid) -> broadcast::Receiver<Notification> {
        let sender = self
            .channels
            .entry(instructor_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Send a notification. No-op if nobody is listening — the payload is
    /// only rendered when a subscriber exists.
    pub fn send(&self, instructor_id: Ulid, event: &Event) {
        if let Some(sender) = self.channels.get(&instructor_id) {
            let _ = sender.send(Notification {
                instructor_id,
                payload: event_payload(event),
            });
        }
    }

    /// Remove a channel (e.g. when an instructor is removed).
    pub fn remove(&self, instructor_id: &Ulid) {
        self.channels.remove(instructor_id);
    }
}

/// The payload format consumers parse: the event serialized as JSON.
pub fn event_payload(event: &Event) -> String {
    serde_json::to_string(event).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Window;

    #[tokio::test]
    async fn subscribe_and_receive() {
        let hub = NotifyHub::new();
        let instructor_id = Ulid::new();
        let mut rx = hub.subscribe(instructor_id);

        let event = Event::ReservationConfirmed {
            id: Ulid::new(),
            instructor_id,
        };
        hub.send(instructor_id, &event);

        let received = rx.recv().await.unwrap();
        assert_eq!(received.instructor_id, instructor_id);
        assert_eq!(received.payload, event_payload(&event));
    }

    #[tokio::test]
    async fn send_without_subscribers_is_noop() {
        let hub = NotifyHub::new();
        let instructor_id = Ulid::new();
        // No subscriber — should not panic
        hub.send(instructor_id, &Event::InstructorRemoved { id: instructor_id });
    }

    #[test]
    fn payload_is_parseable_json() {
        let event = Event::ReservationBooked {
            id: Ulid::new(),
            instructor_id: Ulid::new(),
            student_id: Ulid::new(),
            window: Window::new(480, 540),
            booked_at: 100,
        };
        let parsed: serde_json::Value = serde_json::from_str(&event_payload(&event)).unwrap();
        assert_eq!(parsed["ReservationBooked"]["window"]["start"], 480);
    }
}
