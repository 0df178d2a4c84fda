//! End-to-end state synchronization scenarios: encoded packets in, mirror
//! and attribution effects out. Exercises the store standalone, the way a
//! captured payload would be replayed offline.

use nvrsync::{ActionKind, Frame, ModelKey, Packet, StateStore, TypedObject};
use proptest::prelude::*;
use serde_json::{Value, json};

fn packet(action: Value, data: Value) -> Packet {
    Packet { action_frame: Frame::json(1, action), data_frame: Frame::json(2, data) }
}

/// Encode then decode, so every scenario crosses the real wire format.
fn wire_packet(action: Value, data: Value) -> Packet {
    let bytes = packet(action, data).encode().expect("encode");
    Packet::decode(&bytes).expect("decode")
}

#[test]
fn open_motion_event_attributes_then_closes() {
    let mut store = StateStore::new();
    store
        .apply_packet(&wire_packet(
            json!({"action": "add", "modelKey": "camera", "id": "cam1", "newUpdateId": "u1"}),
            json!({"id": "cam1", "name": "Driveway"}),
        ))
        .expect("apply");

    // Open-ended motion: attributed immediately, motion in progress.
    store
        .apply_packet(&wire_packet(
            json!({"action": "add", "modelKey": "event", "id": "e1", "newUpdateId": "u2"}),
            json!({"id": "e1", "type": "motion", "start": 1000, "end": null, "cameraId": "cam1"}),
        ))
        .expect("apply");

    {
        let cam = store.camera("cam1").expect("camera");
        assert_eq!(cam.last_motion_event_id.as_deref(), Some("e1"));
        assert!(cam.is_motion_detected);
    }

    // The event closes five seconds later.
    let message = store
        .apply_packet(&wire_packet(
            json!({"action": "update", "modelKey": "event", "id": "e1", "newUpdateId": "u3"}),
            json!({"end": 1005}),
        ))
        .expect("apply")
        .expect("message");

    assert_eq!(message.action, ActionKind::Update);
    match (&message.old_object, &message.new_object) {
        (Some(TypedObject::Event(old)), Some(TypedObject::Event(new))) => {
            assert_eq!(old.end, None);
            assert_eq!(new.end, Some(1005));
        }
        other => panic!("unexpected objects: {other:?}"),
    }

    let cam = store.camera("cam1").expect("camera");
    assert_eq!(cam.last_motion, Some(1005));
    assert!(!cam.is_motion_detected);
    assert_eq!(store.last_update_id(), Some("u3"));
}

#[test]
fn update_id_moves_even_for_dropped_packets() {
    let mut store = StateStore::new();
    let result = store
        .apply_packet(&wire_packet(
            json!({"action": "add", "modelKey": "chime", "id": "x", "newUpdateId": "u7"}),
            json!({"id": "x"}),
        ))
        .expect("apply");

    assert!(result.is_none());
    assert_eq!(store.last_update_id(), Some("u7"));
}

#[test]
fn device_lifecycle_add_update_remove() {
    let mut store = StateStore::new();
    store
        .apply_packet(&wire_packet(
            json!({"action": "add", "modelKey": "light", "id": "l1"}),
            json!({"id": "l1", "isOn": false, "modes": {"night": true}}),
        ))
        .expect("apply");

    store
        .apply_packet(&wire_packet(
            json!({"action": "update", "modelKey": "light", "id": "l1"}),
            json!({"isOn": true}),
        ))
        .expect("apply")
        .expect("update emitted");

    let light = store.device(ModelKey::Light, "l1").expect("light");
    assert_eq!(light.fields.get("isOn"), Some(&json!(true)));
    assert_eq!(light.fields.get("modes"), Some(&json!({"night": true})));

    let message = store
        .apply_packet(&wire_packet(
            json!({"action": "remove", "modelKey": "light", "id": "l1"}),
            json!({}),
        ))
        .expect("apply")
        .expect("remove emitted");
    assert!(message.new_object.is_none());
    assert!(store.device(ModelKey::Light, "l1").is_none());
}

proptest! {
    /// After inserting more distinct events than the cache holds, exactly
    /// `capacity` remain and they are the most recently inserted.
    #[test]
    fn event_cache_keeps_newest(capacity in 1usize..16, extra in 1usize..16) {
        let mut store = StateStore::with_event_capacity(capacity);
        let total = capacity + extra;

        for i in 0..total {
            store
                .apply_packet(&packet(
                    json!({"action": "add", "modelKey": "event", "id": format!("e{i}")}),
                    json!({"id": format!("e{i}"), "type": "motion", "start": i as i64}),
                ))
                .expect("apply");
        }

        prop_assert_eq!(store.recent_event_count(), capacity);
        for i in 0..total {
            let id = format!("e{i}");
            prop_assert_eq!(store.recent_event(&id).is_some(), i >= total - capacity);
        }
    }

    /// For non-decreasing event timestamps the camera always tracks the
    /// last event applied; a strictly earlier straggler changes nothing.
    #[test]
    fn attribution_is_monotonic(
        mut starts in prop::collection::vec(0i64..1_000_000, 1..20),
        straggler_offset in 1i64..1_000
    ) {
        starts.sort_unstable();

        let mut store = StateStore::new();
        store
            .apply_packet(&packet(
                json!({"action": "add", "modelKey": "camera", "id": "cam1"}),
                json!({"id": "cam1"}),
            ))
            .expect("apply");

        for (i, start) in starts.iter().enumerate() {
            store
                .apply_packet(&packet(
                    json!({"action": "add", "modelKey": "event", "id": format!("e{i}")}),
                    json!({
                        "id": format!("e{i}"),
                        "type": "ring",
                        "start": start,
                        "end": start + 1,
                        "cameraId": "cam1",
                    }),
                ))
                .expect("apply");
        }

        let last = starts.len() - 1;
        let expected_id = format!("e{last}");
        prop_assert_eq!(
            store.camera("cam1").and_then(|c| c.last_ring_event_id.clone()),
            Some(expected_id.clone())
        );

        // A strictly earlier event arriving late must not win.
        let earliest = starts[0] - straggler_offset;
        store
            .apply_packet(&packet(
                json!({"action": "add", "modelKey": "event", "id": "straggler"}),
                json!({
                    "id": "straggler",
                    "type": "ring",
                    "start": earliest - 1,
                    "end": earliest,
                    "cameraId": "cam1",
                }),
            ))
            .expect("apply");

        prop_assert_eq!(
            store.camera("cam1").and_then(|c| c.last_ring_event_id.clone()),
            Some(expected_id)
        );
    }
}
