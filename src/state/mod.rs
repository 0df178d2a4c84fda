//! In-memory mirror of the device's object graph.
//!
//! The [`StateStore`] holds the last full bootstrap of the remote object
//! graph and keeps it current by applying decoded push packets one at a
//! time. Application is a small state machine over the packet's action
//! envelope: `add` constructs a typed object via the model-key factory,
//! `update` deep-merges a partial camelCase field set onto an immutable
//! copy of the current object, and `remove` erases it. Every successful
//! application emits a [`SubscriptionMessage`] describing the transition.
//!
//! The store is single-writer: only the connection read loop applies
//! packets. Concurrent readers get snapshot accessors and must tolerate
//! slight staleness.

mod events;
mod objects;

use std::collections::HashMap;

use serde_json::{Map, Value};
use tracing::debug;

pub use events::{Event, EventAttributor, EventKind, RecentEvents};
pub use objects::{Camera, ModelKey, Snapshot, TypedObject, deep_merge};

use crate::wire::{Action, ActionKind, Packet};
use crate::{NvrError, Result};

/// Maximum number of devices a single NVR is supported to carry.
pub const MAX_SUPPORTED_DEVICES: usize = 256;

/// Recent-event cache capacity: two generations of a fully-populated NVR.
pub const DEFAULT_EVENT_CAPACITY: usize = 2 * MAX_SUPPORTED_DEVICES;

/// Decoded, application-facing notification of one applied state change.
///
/// Created per successfully-applied packet and handed to subscribers; the
/// store does not retain it.
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionMessage {
    pub action: ActionKind,
    pub new_update_id: Option<String>,
    /// The camelCase field set the packet carried: the full object for an
    /// add, the partial patch for an update, empty for a remove.
    pub changed_data: Map<String, Value>,
    pub old_object: Option<TypedObject>,
    pub new_object: Option<TypedObject>,
}

/// Canonical mirror of the remote object graph (the "bootstrap").
#[derive(Debug)]
pub struct StateStore {
    last_update_id: Option<String>,
    nvr: Option<Snapshot>,
    cameras: HashMap<String, Camera>,
    sensors: HashMap<String, Snapshot>,
    lights: HashMap<String, Snapshot>,
    viewers: HashMap<String, Snapshot>,
    bridges: HashMap<String, Snapshot>,
    liveviews: HashMap<String, Snapshot>,
    users: HashMap<String, Snapshot>,
    groups: HashMap<String, Snapshot>,
    recent_events: RecentEvents,
    attributor: EventAttributor,
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StateStore {
    pub fn new() -> Self {
        Self::with_event_capacity(DEFAULT_EVENT_CAPACITY)
    }

    /// Store with a custom recent-event capacity. Production uses
    /// [`DEFAULT_EVENT_CAPACITY`]; tests shrink it to exercise eviction.
    pub fn with_event_capacity(capacity: usize) -> Self {
        StateStore {
            last_update_id: None,
            nvr: None,
            cameras: HashMap::new(),
            sensors: HashMap::new(),
            lights: HashMap::new(),
            viewers: HashMap::new(),
            bridges: HashMap::new(),
            liveviews: HashMap::new(),
            users: HashMap::new(),
            groups: HashMap::new(),
            recent_events: RecentEvents::new(capacity),
            attributor: EventAttributor,
        }
    }

    /// The most recent `newUpdateId` observed, used as the resume cursor
    /// when (re)opening the push channel.
    pub fn last_update_id(&self) -> Option<&str> {
        self.last_update_id.as_deref()
    }

    pub fn nvr(&self) -> Option<&Snapshot> {
        self.nvr.as_ref()
    }

    pub fn camera(&self, id: &str) -> Option<&Camera> {
        self.cameras.get(id)
    }

    pub fn cameras(&self) -> &HashMap<String, Camera> {
        &self.cameras
    }

    /// Structural lookup for device kinds without a dedicated type.
    pub fn device(&self, model: ModelKey, id: &str) -> Option<&Snapshot> {
        self.snapshot_map(model)?.get(id)
    }

    pub fn recent_event(&self, id: &str) -> Option<&Event> {
        self.recent_events.get(id)
    }

    pub fn recent_event_count(&self) -> usize {
        self.recent_events.len()
    }

    /// Apply one decoded packet to the mirror.
    ///
    /// Returns the emitted subscription message, or `None` when the packet
    /// was dropped (unknown model key, aged-out event update, and the
    /// other silent paths described on each branch).
    ///
    /// # Errors
    ///
    /// [`NvrError::ContentDecode`] when the action envelope or data frame
    /// payload is structurally unusable. The caller drops the packet; the
    /// connection stays open.
    pub fn apply_packet(&mut self, packet: &Packet) -> Result<Option<SubscriptionMessage>> {
        // The resume cursor advances even when the rest of the envelope is
        // unrecognized, so read it before strict parsing.
        if let Some(update_id) = packet.new_update_id() {
            self.last_update_id = Some(update_id.to_string());
        }

        let action = packet.action()?;

        let Some(model) = ModelKey::parse(&action.model_key) else {
            debug!(model_key = %action.model_key, "dropping packet for unknown model key");
            return Ok(None);
        };

        let data = packet
            .data()
            .ok_or_else(|| NvrError::content_decode("data frame", "payload is not JSON"))?;

        let changed_data = data.as_object().cloned().unwrap_or_default();

        let result = match action.kind {
            ActionKind::Add => self.apply_add(model, data)?,
            ActionKind::Update => self.apply_update(model, &action, data)?,
            ActionKind::Remove => self.apply_remove(model, &action),
        };

        Ok(result.map(|(old_object, new_object)| SubscriptionMessage {
            action: action.kind,
            new_update_id: action.new_update_id,
            changed_data,
            old_object,
            new_object,
        }))
    }

    fn apply_add(
        &mut self,
        model: ModelKey,
        data: &Value,
    ) -> Result<Option<(Option<TypedObject>, Option<TypedObject>)>> {
        let object = TypedObject::from_payload(model, data)?;

        match &object {
            TypedObject::Event(event) => {
                self.attributor.attribute(event, &mut self.cameras);
                self.recent_events.insert(event.clone());
            }
            TypedObject::Nvr(snapshot) => {
                self.nvr = Some(snapshot.clone());
            }
            TypedObject::Camera(camera) => {
                self.cameras.insert(camera.id.clone(), camera.clone());
            }
            _ => {
                let Some(id) = object.id().map(str::to_string) else {
                    debug!(model_key = model.as_str(), "dropping add without an id");
                    return Ok(None);
                };
                match (self.snapshot_map_mut(model), data.as_object()) {
                    (Some(map), Some(fields)) => {
                        map.insert(id, Snapshot { fields: fields.clone() });
                    }
                    _ => {
                        debug!(model_key = model.as_str(), "dropping add of unexpected type");
                        return Ok(None);
                    }
                }
            }
        }

        Ok(Some((None, Some(object))))
    }

    fn apply_update(
        &mut self,
        model: ModelKey,
        action: &Action,
        patch: &Value,
    ) -> Result<Option<(Option<TypedObject>, Option<TypedObject>)>> {
        match model {
            ModelKey::Nvr => {
                let Some(current) = &self.nvr else {
                    debug!("dropping NVR update before any bootstrap");
                    return Ok(None);
                };
                let old = current.clone();
                let merged: Snapshot = objects::merged_copy(current, patch, "nvr update")?;
                self.nvr = Some(merged.clone());
                Ok(Some((Some(TypedObject::Nvr(old)), Some(TypedObject::Nvr(merged)))))
            }
            ModelKey::Event => {
                let Some(id) = action.id.as_deref() else {
                    debug!("dropping event update without an id");
                    return Ok(None);
                };
                let Some(current) = self.recent_events.get(id) else {
                    // Expected once the event has aged out of the cache.
                    return Ok(None);
                };
                let old = current.clone();
                let merged: Event = objects::merged_copy(current, patch, "event update")?;
                self.attributor.attribute(&merged, &mut self.cameras);
                self.recent_events.replace(merged.clone());
                Ok(Some((Some(TypedObject::Event(old)), Some(TypedObject::Event(merged)))))
            }
            ModelKey::Camera => {
                let Some(id) = action.id.as_deref() else {
                    debug!("dropping camera update without an id");
                    return Ok(None);
                };
                let Some(current) = self.cameras.get(id) else {
                    debug!(id, model_key = model.as_str(), "unexpected id for model key");
                    return Ok(None);
                };
                let old = current.clone();
                let merged: Camera = objects::merged_copy(current, patch, "camera update")?;
                self.cameras.insert(id.to_string(), merged.clone());
                Ok(Some((Some(TypedObject::Camera(old)), Some(TypedObject::Camera(merged)))))
            }
            _ => {
                let Some(id) = action.id.as_deref() else {
                    debug!(model_key = model.as_str(), "dropping update without an id");
                    return Ok(None);
                };
                let Some(current) = self.snapshot_map(model).and_then(|map| map.get(id)) else {
                    debug!(id, model_key = model.as_str(), "unexpected id for model key");
                    return Ok(None);
                };
                let old = current.clone();
                let merged: Snapshot = objects::merged_copy(current, patch, "device update")?;
                if let Some(map) = self.snapshot_map_mut(model) {
                    map.insert(id.to_string(), merged.clone());
                }
                Ok(Some((
                    Some(Self::wrap_snapshot(model, old)),
                    Some(Self::wrap_snapshot(model, merged)),
                )))
            }
        }
    }

    fn apply_remove(
        &mut self,
        model: ModelKey,
        action: &Action,
    ) -> Option<(Option<TypedObject>, Option<TypedObject>)> {
        let Some(id) = action.id.as_deref() else {
            debug!(model_key = model.as_str(), "dropping remove without an id");
            return None;
        };

        let removed = match model {
            ModelKey::Nvr => {
                debug!("dropping remove for the NVR singleton");
                None
            }
            ModelKey::Camera => self.cameras.remove(id).map(TypedObject::Camera),
            ModelKey::Event => self.recent_events.remove(id).map(TypedObject::Event),
            _ => self
                .snapshot_map_mut(model)
                .and_then(|map| map.remove(id))
                .map(|snapshot| Self::wrap_snapshot(model, snapshot)),
        };

        match removed {
            Some(old) => Some((Some(old), None)),
            None => {
                debug!(id, model_key = model.as_str(), "remove for unknown id");
                None
            }
        }
    }

    fn wrap_snapshot(model: ModelKey, snapshot: Snapshot) -> TypedObject {
        match model {
            ModelKey::Sensor => TypedObject::Sensor(snapshot),
            ModelKey::Light => TypedObject::Light(snapshot),
            ModelKey::Viewer => TypedObject::Viewer(snapshot),
            ModelKey::Bridge => TypedObject::Bridge(snapshot),
            ModelKey::Liveview => TypedObject::Liveview(snapshot),
            ModelKey::User => TypedObject::User(snapshot),
            ModelKey::Group => TypedObject::Group(snapshot),
            // Nvr/Camera/Event never reach the snapshot maps.
            _ => TypedObject::Nvr(snapshot),
        }
    }

    fn snapshot_map(&self, model: ModelKey) -> Option<&HashMap<String, Snapshot>> {
        match model {
            ModelKey::Sensor => Some(&self.sensors),
            ModelKey::Light => Some(&self.lights),
            ModelKey::Viewer => Some(&self.viewers),
            ModelKey::Bridge => Some(&self.bridges),
            ModelKey::Liveview => Some(&self.liveviews),
            ModelKey::User => Some(&self.users),
            ModelKey::Group => Some(&self.groups),
            ModelKey::Nvr | ModelKey::Camera | ModelKey::Event => None,
        }
    }

    fn snapshot_map_mut(&mut self, model: ModelKey) -> Option<&mut HashMap<String, Snapshot>> {
        match model {
            ModelKey::Sensor => Some(&mut self.sensors),
            ModelKey::Light => Some(&mut self.lights),
            ModelKey::Viewer => Some(&mut self.viewers),
            ModelKey::Bridge => Some(&mut self.bridges),
            ModelKey::Liveview => Some(&mut self.liveviews),
            ModelKey::User => Some(&mut self.users),
            ModelKey::Group => Some(&mut self.groups),
            ModelKey::Nvr | ModelKey::Camera | ModelKey::Event => None,
        }
    }
}
