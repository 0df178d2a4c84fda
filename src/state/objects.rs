//! Typed object model for the mirrored device graph.
//!
//! Only the shapes state synchronization actually needs are fully typed:
//! cameras (because event attribution writes their "last event" fields) and
//! events. Every other device kind is carried structurally as a
//! [`Snapshot`] of its camelCase field map, which keeps the mirror complete
//! without committing to a schema for each device kind.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::events::Event;
use crate::{NvrError, Result};

/// Known model kinds on the device's object graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelKey {
    Nvr,
    Camera,
    Sensor,
    Light,
    Viewer,
    Bridge,
    Liveview,
    User,
    Group,
    Event,
}

impl ModelKey {
    /// Parse a wire model key. Unknown keys are `None`; the caller decides
    /// whether that is a drop (state sync) or an error (object factory).
    pub fn parse(key: &str) -> Option<Self> {
        match key {
            "nvr" => Some(ModelKey::Nvr),
            "camera" => Some(ModelKey::Camera),
            "sensor" => Some(ModelKey::Sensor),
            "light" => Some(ModelKey::Light),
            "viewer" => Some(ModelKey::Viewer),
            "bridge" => Some(ModelKey::Bridge),
            "liveview" => Some(ModelKey::Liveview),
            "user" => Some(ModelKey::User),
            "group" => Some(ModelKey::Group),
            "event" => Some(ModelKey::Event),
            _ => None,
        }
    }

    /// Wire spelling of this model key.
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelKey::Nvr => "nvr",
            ModelKey::Camera => "camera",
            ModelKey::Sensor => "sensor",
            ModelKey::Light => "light",
            ModelKey::Viewer => "viewer",
            ModelKey::Bridge => "bridge",
            ModelKey::Liveview => "liveview",
            ModelKey::User => "user",
            ModelKey::Group => "group",
            ModelKey::Event => "event",
        }
    }
}

/// Structural record for device kinds without a dedicated type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Snapshot {
    pub fields: Map<String, Value>,
}

impl Snapshot {
    /// The record's `id` field, when present.
    pub fn id(&self) -> Option<&str> {
        self.fields.get("id").and_then(Value::as_str)
    }
}

/// Camera record, typed as far as event attribution needs.
///
/// Fields outside the attribution surface are preserved in `extra` so that
/// partial updates merge without loss.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Camera {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub last_motion: Option<i64>,
    #[serde(default)]
    pub last_motion_event_id: Option<String>,
    #[serde(default)]
    pub last_ring: Option<i64>,
    #[serde(default)]
    pub last_ring_event_id: Option<String>,
    #[serde(default)]
    pub last_smart_detect: Option<i64>,
    #[serde(default)]
    pub last_smart_detect_event_id: Option<String>,
    #[serde(default)]
    pub is_motion_detected: bool,
    #[serde(default)]
    pub is_smart_detected: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Polymorphic record on the mirrored object graph, keyed by
/// `(modelKey, id)`.
#[derive(Debug, Clone, PartialEq)]
pub enum TypedObject {
    Nvr(Snapshot),
    Camera(Camera),
    Sensor(Snapshot),
    Light(Snapshot),
    Viewer(Snapshot),
    Bridge(Snapshot),
    Liveview(Snapshot),
    User(Snapshot),
    Group(Snapshot),
    Event(Event),
}

impl TypedObject {
    /// Construct the concrete variant for `model` from a data-frame JSON
    /// payload.
    ///
    /// # Errors
    ///
    /// [`NvrError::ContentDecode`] when the payload does not fit the
    /// variant (not an object, event missing required fields, camera
    /// missing `id`).
    pub fn from_payload(model: ModelKey, data: &Value) -> Result<Self> {
        fn snapshot(data: &Value) -> Result<Snapshot> {
            let fields = data.as_object().cloned().ok_or_else(|| {
                NvrError::content_decode("object payload", "payload is not a JSON object")
            })?;
            Ok(Snapshot { fields })
        }

        let object = match model {
            ModelKey::Camera => {
                let camera: Camera = serde_json::from_value(data.clone())
                    .map_err(|e| NvrError::content_decode("camera payload", e.to_string()))?;
                TypedObject::Camera(camera)
            }
            ModelKey::Event => {
                let event: Event = serde_json::from_value(data.clone())
                    .map_err(|e| NvrError::content_decode("event payload", e.to_string()))?;
                TypedObject::Event(event)
            }
            ModelKey::Nvr => TypedObject::Nvr(snapshot(data)?),
            ModelKey::Sensor => TypedObject::Sensor(snapshot(data)?),
            ModelKey::Light => TypedObject::Light(snapshot(data)?),
            ModelKey::Viewer => TypedObject::Viewer(snapshot(data)?),
            ModelKey::Bridge => TypedObject::Bridge(snapshot(data)?),
            ModelKey::Liveview => TypedObject::Liveview(snapshot(data)?),
            ModelKey::User => TypedObject::User(snapshot(data)?),
            ModelKey::Group => TypedObject::Group(snapshot(data)?),
        };
        Ok(object)
    }

    /// Which model kind this object is.
    pub fn model_key(&self) -> ModelKey {
        match self {
            TypedObject::Nvr(_) => ModelKey::Nvr,
            TypedObject::Camera(_) => ModelKey::Camera,
            TypedObject::Sensor(_) => ModelKey::Sensor,
            TypedObject::Light(_) => ModelKey::Light,
            TypedObject::Viewer(_) => ModelKey::Viewer,
            TypedObject::Bridge(_) => ModelKey::Bridge,
            TypedObject::Liveview(_) => ModelKey::Liveview,
            TypedObject::User(_) => ModelKey::User,
            TypedObject::Group(_) => ModelKey::Group,
            TypedObject::Event(_) => ModelKey::Event,
        }
    }

    /// The object's id, when it has one.
    pub fn id(&self) -> Option<&str> {
        match self {
            TypedObject::Camera(c) => Some(&c.id),
            TypedObject::Event(e) => Some(&e.id),
            TypedObject::Nvr(s)
            | TypedObject::Sensor(s)
            | TypedObject::Light(s)
            | TypedObject::Viewer(s)
            | TypedObject::Bridge(s)
            | TypedObject::Liveview(s)
            | TypedObject::User(s)
            | TypedObject::Group(s) => s.id(),
        }
    }
}

/// Structurally merge a partial update into `base`.
///
/// Objects merge key by key, recursing into nested objects; scalars,
/// arrays, and nulls replace the existing value outright.
pub fn deep_merge(base: &mut Value, patch: &Value) {
    match (base, patch) {
        (Value::Object(base_map), Value::Object(patch_map)) => {
            for (key, patch_value) in patch_map {
                match base_map.get_mut(key) {
                    Some(base_value) if base_value.is_object() && patch_value.is_object() => {
                        deep_merge(base_value, patch_value);
                    }
                    _ => {
                        base_map.insert(key.clone(), patch_value.clone());
                    }
                }
            }
        }
        (base, patch) => *base = patch.clone(),
    }
}

/// Produce the merged copy of a serializable record, leaving the original
/// untouched. Update application uses this so the old and new objects in a
/// subscription message are genuinely distinct values.
pub(crate) fn merged_copy<T>(current: &T, patch: &Value, context: &'static str) -> Result<T>
where
    T: Serialize + serde::de::DeserializeOwned,
{
    let mut value = serde_json::to_value(current)
        .map_err(|e| NvrError::content_decode(context, e.to_string()))?;
    deep_merge(&mut value, patch);
    serde_json::from_value(value).map_err(|e| NvrError::content_decode(context, e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn model_key_round_trips() {
        for key in ["nvr", "camera", "sensor", "light", "viewer", "bridge", "liveview", "user",
            "group", "event"]
        {
            let parsed = ModelKey::parse(key).expect("known key");
            assert_eq!(parsed.as_str(), key);
        }
        assert_eq!(ModelKey::parse("doorlock"), None);
    }

    #[test]
    fn camera_preserves_unknown_fields() {
        let data = json!({
            "id": "c1",
            "name": "Driveway",
            "micVolume": 80,
            "ispSettings": {"brightness": 50}
        });
        let camera: Camera = serde_json::from_value(data.clone()).expect("parse");
        assert_eq!(camera.extra.get("micVolume"), Some(&json!(80)));

        let back = serde_json::to_value(&camera).expect("serialize");
        assert_eq!(back.get("ispSettings"), Some(&json!({"brightness": 50})));
    }

    #[test]
    fn factory_builds_variant_by_model_key() {
        let camera = TypedObject::from_payload(ModelKey::Camera, &json!({"id": "c1"}))
            .expect("camera");
        assert_eq!(camera.model_key(), ModelKey::Camera);
        assert_eq!(camera.id(), Some("c1"));

        let sensor = TypedObject::from_payload(ModelKey::Sensor, &json!({"id": "s1", "open": true}))
            .expect("sensor");
        assert_eq!(sensor.model_key(), ModelKey::Sensor);
        assert_eq!(sensor.id(), Some("s1"));
    }

    #[test]
    fn factory_rejects_non_object_payload() {
        let err = TypedObject::from_payload(ModelKey::Light, &json!("nope")).unwrap_err();
        assert!(matches!(err, NvrError::ContentDecode { .. }));
    }

    #[test]
    fn deep_merge_recurses_into_objects_and_replaces_scalars() {
        let mut base = json!({
            "name": "old",
            "stats": {"rx": 1, "tx": 2},
            "zones": [1, 2, 3]
        });
        deep_merge(&mut base, &json!({
            "name": "new",
            "stats": {"tx": 9},
            "zones": [4]
        }));

        assert_eq!(base, json!({
            "name": "new",
            "stats": {"rx": 1, "tx": 9},
            "zones": [4]
        }));
    }

    #[test]
    fn deep_merge_null_replaces() {
        let mut base = json!({"end": 100});
        deep_merge(&mut base, &json!({"end": null}));
        assert_eq!(base, json!({"end": null}));
    }

    #[test]
    fn merged_copy_leaves_original_untouched() {
        let camera = Camera { id: "c1".into(), name: Some("Front".into()), ..Default::default() };
        let merged: Camera =
            merged_copy(&camera, &json!({"name": "Back"}), "camera update").expect("merge");

        assert_eq!(camera.name.as_deref(), Some("Front"));
        assert_eq!(merged.name.as_deref(), Some("Back"));
        assert_eq!(merged.id, "c1");
    }
}
