//! Push notifications for open dashboards.
//!
//! Services publish [`TrackerEvent`]s on a broadcast channel; browsers follow them through
//! the Server-Sent Events stream at `GET /events` and reload the affected product rows.

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
};
use futures::stream::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, warn};

use crate::AppState;

/// Dashboard update pushed to subscribers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TrackerEvent {
    PartCreated {
        part_id: String,
        product_designation: String,
        safe_key: String,
    },
    StageConfirmed {
        part_id: String,
        product_designation: String,
        safe_key: String,
        stage: String,
        quantity: i32,
        quantity_completed: i32,
        quantity_total: i32,
    },
}

impl TrackerEvent {
    /// SSE event name
    pub fn event_type(&self) -> &'static str {
        match self {
            TrackerEvent::PartCreated { .. } => "part_created",
            TrackerEvent::StageConfirmed { .. } => "stage_confirmed",
        }
    }

    pub fn part_id(&self) -> &str {
        match self {
            TrackerEvent::PartCreated { part_id, .. }
            | TrackerEvent::StageConfirmed { part_id, .. } => part_id,
        }
    }
}

/// Fan-out of tracker events to every connected dashboard
#[derive(Debug, Clone)]
pub struct EventBroadcaster {
    sender: broadcast::Sender<TrackerEvent>,
}

impl EventBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publishes an event; returns how many subscribers received it.
    pub fn publish(&self, event: TrackerEvent) -> usize {
        match self.sender.send(event) {
            Ok(receivers) => {
                debug!(receivers, "tracker event published");
                receivers
            }
            // No subscribers is the normal state when no dashboard is open.
            Err(_) => 0,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TrackerEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// GET /events - SSE stream of dashboard updates
pub async fn event_stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    debug!("SSE client connected");

    let stream = BroadcastStream::new(state.events.subscribe()).filter_map(|result| async move {
        match result {
            Ok(event) => match serde_json::to_string(&event) {
                Ok(json) => Some(Ok(Event::default().event(event.event_type()).data(json))),
                Err(e) => {
                    warn!("Failed to serialize tracker event: {}", e);
                    None
                }
            },
            Err(e) => {
                warn!("SSE stream error: {:?}", e);
                None
            }
        }
    });

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn created(part_id: &str) -> TrackerEvent {
        TrackerEvent::PartCreated {
            part_id: part_id.into(),
            product_designation: "Изделие".into(),
            safe_key: "izdelie".into(),
        }
    }

    #[test]
    fn publishing_without_subscribers_is_fine() {
        let events = EventBroadcaster::new(4);
        assert_eq!(events.publish(created("P-1")), 0);
    }

    #[tokio::test]
    async fn subscribers_receive_events_in_order() {
        let events = EventBroadcaster::new(4);
        let mut rx = events.subscribe();
        assert_eq!(events.subscriber_count(), 1);

        events.publish(created("P-1"));
        events.publish(created("P-2"));

        assert_eq!(rx.recv().await.unwrap().part_id(), "P-1");
        assert_eq!(rx.recv().await.unwrap().part_id(), "P-2");
    }

    #[test]
    fn events_serialize_with_type_tag() {
        let json = serde_json::to_value(created("P-1")).unwrap();
        assert_eq!(json["type"], "part_created");
        assert_eq!(json["safe_key"], "izdelie");
        assert_eq!(created("P-1").event_type(), "part_created");
    }
}
