use super::context::Context;
use super::store::StateSink;
use super::timers::TimerRegistry;
use super::DecodedState;
use log::debug;
use std::sync::Arc;

/// Apply one decoded message to a device.
///
/// Builds the context from stored values overlaid with the decoded ones,
/// makes sure every state exists on the host, then runs each setter in
/// order.
pub fn apply(
    device_id: &str,
    decoded: &[DecodedState],
    sink: &Arc<dyn StateSink>,
    timers: &mut TimerRegistry,
) {
    if decoded.is_empty() {
        return;
    }

    let mut context = Context::from_current(sink.current_values(device_id));
    for entry in decoded {
        context.set_new(entry.state.name(), entry.value.clone());
    }

    for entry in decoded {
        sink.ensure_state(device_id, entry.state.name(), &entry.state.state_object());
    }

    debug!(
        "[State] Applying {} state(s) to {}",
        decoded.len(),
        device_id
    );
    for entry in decoded {
        entry.state.setter(device_id, sink, &context, timers);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::catalogue::StateKind;
    use crate::state::store::MemoryStore;
    use crate::state::timers::TimerKey;
    use serde_json::{Value, json};
    use std::time::Duration;

    fn entry(kind: StateKind, value: Option<Value>) -> DecodedState {
        DecodedState {
            state: Arc::new(kind.descriptor()),
            value,
        }
    }

    fn motion_message(occupied: bool) -> Vec<DecodedState> {
        vec![
            entry(StateKind::Occupancy, Some(json!(occupied))),
            entry(StateKind::NoMotion, None),
            entry(StateKind::OccupancyTimeout, None),
        ]
    }

    #[test]
    fn test_plain_states_emit_new_values_only() {
        let store = Arc::new(MemoryStore::recording());
        let sink: Arc<dyn StateSink> = store.clone();
        let mut timers = TimerRegistry::new();

        let decoded = vec![
            entry(StateKind::Temperature, Some(json!(23))),
            entry(StateKind::Timeout, None),
        ];
        apply("abc", &decoded, &sink, &mut timers);

        assert_eq!(store.values_of("abc", "temperature"), vec![json!(23)]);
        assert!(store.values_of("abc", "timeout").is_empty());
        assert!(store.object("abc", "timeout").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_occupancy_resets_after_stored_timeout() {
        let store = Arc::new(MemoryStore::recording());
        let sink: Arc<dyn StateSink> = store.clone();
        let mut timers = TimerRegistry::new();
        store.emit("abc", "occupancy_timeout", json!(90));

        apply("abc", &motion_message(true), &sink, &mut timers);
        assert_eq!(store.value("abc", "occupancy"), Some(json!(true)));
        assert_eq!(store.value("abc", "no_motion"), Some(json!(0)));
        assert!(timers.is_pending(&TimerKey::new("abc", "occupancy")));

        tokio::time::sleep(Duration::from_secs(89)).await;
        assert_eq!(store.value("abc", "occupancy"), Some(json!(true)));

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(store.value("abc", "occupancy"), Some(json!(false)));
        assert_eq!(store.value("abc", "no_motion"), Some(json!(90)));

        timers.cancel_all();
    }

    #[tokio::test(start_paused = true)]
    async fn test_occupancy_defaults_to_sixty_seconds() {
        let store = Arc::new(MemoryStore::recording());
        let sink: Arc<dyn StateSink> = store.clone();
        let mut timers = TimerRegistry::new();

        apply("abc", &motion_message(true), &sink, &mut timers);
        tokio::time::sleep(Duration::from_secs(61)).await;

        assert_eq!(
            store.values_of("abc", "occupancy"),
            vec![json!(true), json!(false)]
        );
        timers.cancel_all();
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_motion_rearms_timer() {
        let store = Arc::new(MemoryStore::recording());
        let sink: Arc<dyn StateSink> = store.clone();
        let mut timers = TimerRegistry::new();

        apply("abc", &motion_message(true), &sink, &mut timers);
        tokio::time::sleep(Duration::from_secs(40)).await;
        apply("abc", &motion_message(true), &sink, &mut timers);
        tokio::time::sleep(Duration::from_secs(40)).await;

        // first timer would have fired at 60s
        assert_eq!(store.value("abc", "occupancy"), Some(json!(true)));

        tokio::time::sleep(Duration::from_secs(21)).await;
        assert_eq!(store.value("abc", "occupancy"), Some(json!(false)));
        timers.cancel_all();
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_motion_counts_until_cap() {
        let store = Arc::new(MemoryStore::recording());
        let sink: Arc<dyn StateSink> = store.clone();
        let mut timers = TimerRegistry::new();
        store.emit("abc", "occupancy_timeout", json!(600));

        apply("abc", &motion_message(true), &sink, &mut timers);
        tokio::time::sleep(Duration::from_secs(3600)).await;

        assert_eq!(
            store.values_of("abc", "no_motion"),
            vec![json!(0), json!(600), json!(1200), json!(1800), json!(2400)]
        );
        assert!(!timers.is_pending(&TimerKey::new("abc", "no_motion")));
    }

    #[test]
    fn test_no_motion_ignores_cleared_occupancy() {
        let store = Arc::new(MemoryStore::recording());
        let sink: Arc<dyn StateSink> = store.clone();
        let mut timers = TimerRegistry::new();

        apply("abc", &motion_message(false), &sink, &mut timers);
        assert_eq!(store.value("abc", "occupancy"), Some(json!(false)));
        assert!(store.values_of("abc", "no_motion").is_empty());
        assert!(timers.is_empty());
    }

    #[test]
    fn test_debug_output_accumulates_keys() {
        let store = Arc::new(MemoryStore::recording());
        let sink: Arc<dyn StateSink> = store.clone();
        let mut timers = TimerRegistry::new();

        let first = json!(r#"{"model":"lumi.plug","lumi":["4.1.85"]}"#);
        apply(
            "abc",
            &[entry(StateKind::DebugOutput, Some(first))],
            &sink,
            &mut timers,
        );
        let second = json!(r#"{"model":"lumi.plug","lumi":["0.12.85","4.1.85"]}"#);
        apply(
            "abc",
            &[entry(StateKind::DebugOutput, Some(second))],
            &sink,
            &mut timers,
        );

        let stored = store.value("abc", "debug_output").unwrap();
        let parsed: Value = serde_json::from_str(stored.as_str().unwrap()).unwrap();
        assert_eq!(parsed["lumi"], json!(["0.12.85", "4.1.85"]));
    }
}
