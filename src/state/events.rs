//! Event records, the bounded recent-event cache, and per-camera event
//! attribution.
//!
//! Events are the only objects in the mirror with a bounded lifetime: the
//! device emits far more of them than any client should retain, so the
//! store keeps a fixed-capacity cache evicting in insertion order. Once an
//! event has aged out, further updates for it are expected and ignored.

use std::collections::{HashMap, VecDeque};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::trace;

use super::objects::Camera;

/// Event classification as reported by the device.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EventKind {
    Motion,
    Ring,
    SmartDetect,
    /// Any kind this client does not attribute (e.g. recording lifecycle
    /// events). Carried verbatim.
    Other(String),
}

impl From<String> for EventKind {
    fn from(s: String) -> Self {
        match s.as_str() {
            "motion" => EventKind::Motion,
            "ring" => EventKind::Ring,
            "smartDetect" => EventKind::SmartDetect,
            _ => EventKind::Other(s),
        }
    }
}

impl From<EventKind> for String {
    fn from(kind: EventKind) -> Self {
        match kind {
            EventKind::Motion => "motion".to_string(),
            EventKind::Ring => "ring".to_string(),
            EventKind::SmartDetect => "smartDetect".to_string(),
            EventKind::Other(s) => s,
        }
    }
}

/// One event on the device timeline. Timestamps are epoch milliseconds as
/// carried on the wire; `end` stays `None` while the event is open.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub start: i64,
    #[serde(default)]
    pub end: Option<i64>,
    #[serde(default)]
    pub score: i64,
    #[serde(default)]
    pub camera_id: Option<String>,
    #[serde(default)]
    pub thumbnail_id: Option<String>,
    #[serde(default)]
    pub heatmap_id: Option<String>,
    #[serde(default)]
    pub smart_detect_types: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Event {
    /// The timestamp attribution compares against: `end` when the event
    /// has closed, else `start`.
    pub fn effective_timestamp(&self) -> i64 {
        self.end.unwrap_or(self.start)
    }
}

/// Fixed-capacity event cache evicting the oldest-*inserted* entry.
///
/// Deliberately not an LRU: updating an event in place must not extend its
/// life, so eviction order is set once at insertion.
#[derive(Debug)]
pub struct RecentEvents {
    capacity: usize,
    events: HashMap<String, Event>,
    insertion_order: VecDeque<String>,
}

impl RecentEvents {
    pub fn new(capacity: usize) -> Self {
        RecentEvents {
            capacity,
            events: HashMap::with_capacity(capacity),
            insertion_order: VecDeque::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Event> {
        self.events.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.events.contains_key(id)
    }

    /// Insert a new event, evicting the oldest-inserted entry at capacity.
    /// Re-inserting an existing id replaces the event without changing its
    /// position in the eviction queue.
    pub fn insert(&mut self, event: Event) {
        let id = event.id.clone();
        if self.events.insert(id.clone(), event).is_some() {
            return;
        }
        self.insertion_order.push_back(id);

        while self.insertion_order.len() > self.capacity {
            if let Some(evicted) = self.insertion_order.pop_front() {
                trace!(event_id = %evicted, "evicting aged-out event");
                self.events.remove(&evicted);
            }
        }
    }

    /// Replace an event in place. Returns the previous value, or `None`
    /// (without inserting) when the id has already aged out.
    pub fn replace(&mut self, event: Event) -> Option<Event> {
        if !self.events.contains_key(&event.id) {
            return None;
        }
        self.events.insert(event.id.clone(), event)
    }

    pub fn remove(&mut self, id: &str) -> Option<Event> {
        let removed = self.events.remove(id);
        if removed.is_some() {
            self.insertion_order.retain(|queued| queued != id);
        }
        removed
    }
}

/// Updates per-camera "most recent event" fields as events arrive.
///
/// Each attributable kind owns a (timestamp, event id) slot pair on the
/// camera. The update rule is permissive on purpose: a re-delivery of the
/// *same* event (say, an open motion event gaining its `end` timestamp)
/// compares equal against the slot it wrote earlier and must still win, so
/// the comparison is `>=` and ties resolve to last-applied-wins.
#[derive(Debug, Default)]
pub struct EventAttributor;

impl EventAttributor {
    /// Apply `event` to the camera it references. Returns whether a camera
    /// field changed. No-op for events without a camera or of a kind this
    /// client does not attribute.
    pub fn attribute(&self, event: &Event, cameras: &mut HashMap<String, Camera>) -> bool {
        let Some(camera_id) = event.camera_id.as_deref() else {
            return false;
        };
        let Some(camera) = cameras.get_mut(camera_id) else {
            trace!(camera_id, event_id = %event.id, "event references unknown camera");
            return false;
        };

        let slot = match event.kind {
            EventKind::Motion => (&mut camera.last_motion, &mut camera.last_motion_event_id),
            EventKind::Ring => (&mut camera.last_ring, &mut camera.last_ring_event_id),
            EventKind::SmartDetect => {
                (&mut camera.last_smart_detect, &mut camera.last_smart_detect_event_id)
            }
            EventKind::Other(_) => return false,
        };

        let (last_timestamp, last_event_id) = slot;
        let supersedes = match *last_timestamp {
            None => true,
            Some(dt) => event.start >= dt || event.end.is_some_and(|end| end >= dt),
        };
        if !supersedes {
            return false;
        }

        *last_timestamp = Some(event.effective_timestamp());
        *last_event_id = Some(event.id.clone());

        match event.kind {
            EventKind::Motion => camera.is_motion_detected = event.end.is_none(),
            EventKind::SmartDetect => camera.is_smart_detected = event.end.is_none(),
            _ => {}
        }
        true
    }
}
