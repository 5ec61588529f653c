//! Per-device timers armed by state setters.
//!
//! At most one timer exists per `(device, state)` key; arming a key again
//! aborts whatever was there. Timers run as tokio tasks and the registry owns
//! their handles, so shutting down is a matter of [`TimerRegistry::cancel_all`].

use log::{debug, warn};
use std::collections::HashMap;
use std::ops::ControlFlow;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{Instant, interval_at};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TimerKey {
    pub device_id: String,
    pub state: String,
}

impl TimerKey {
    pub fn new(device_id: &str, state: &str) -> Self {
        Self {
            device_id: device_id.to_string(),
            state: state.to_string(),
        }
    }
}

#[derive(Debug, Default)]
pub struct TimerRegistry {
    timers: HashMap<TimerKey, JoinHandle<()>>,
}

impl TimerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `fire` once after `delay`, replacing any timer under `key`.
    pub fn schedule_once<F>(&mut self, key: TimerKey, delay: Duration, fire: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let Some(handle) = runtime(&key) else {
            return;
        };
        debug!(
            "[Timers] {}.{} fires in {:?}",
            key.device_id, key.state, delay
        );
        let task = handle.spawn(async move {
            tokio::time::sleep(delay).await;
            fire();
        });
        self.replace(key, task);
    }

    /// Run `tick` every `period`, starting one period from now, until it
    /// breaks or the timer is replaced.
    pub fn schedule_repeating<F>(&mut self, key: TimerKey, period: Duration, mut tick: F)
    where
        F: FnMut() -> ControlFlow<()> + Send + 'static,
    {
        let Some(handle) = runtime(&key) else {
            return;
        };
        debug!(
            "[Timers] {}.{} ticks every {:?}",
            key.device_id, key.state, period
        );
        let task = handle.spawn(async move {
            let mut interval = interval_at(Instant::now() + period, period);
            loop {
                interval.tick().await;
                if tick().is_break() {
                    break;
                }
            }
        });
        self.replace(key, task);
    }

    pub fn cancel(&mut self, key: &TimerKey) -> bool {
        match self.timers.remove(key) {
            Some(task) => {
                task.abort();
                true
            }
            None => false,
        }
    }

    /// Abort every timer. Returns how many were still running.
    pub fn cancel_all(&mut self) -> usize {
        let mut running = 0;
        for (_, task) in self.timers.drain() {
            if !task.is_finished() {
                running += 1;
            }
            task.abort();
        }
        running
    }

    pub fn is_pending(&self, key: &TimerKey) -> bool {
        self.timers.get(key).is_some_and(|task| !task.is_finished())
    }

    /// Number of timers that have not completed.
    pub fn len(&self) -> usize {
        self.timers.values().filter(|t| !t.is_finished()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn replace(&mut self, key: TimerKey, task: JoinHandle<()>) {
        self.timers.retain(|_, t| !t.is_finished());
        if let Some(previous) = self.timers.insert(key, task) {
            previous.abort();
        }
    }
}

impl Drop for TimerRegistry {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

fn runtime(key: &TimerKey) -> Option<Handle> {
    match Handle::try_current() {
        Ok(handle) => Some(handle),
        Err(_) => {
            warn!(
                "[Timers] No runtime available, timer for {}.{} not armed",
                key.device_id, key.state
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_once_fires_after_delay() {
        let mut timers = TimerRegistry::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        let key = TimerKey::new("abc", "occupancy");

        timers.schedule_once(key.clone(), Duration::from_secs(60), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert!(timers.is_pending(&key));

        tokio::time::sleep(Duration::from_secs(59)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!timers.is_pending(&key));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearming_replaces_previous_timer() {
        let mut timers = TimerRegistry::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let key = TimerKey::new("abc", "occupancy");

        let counter = Arc::clone(&fired);
        timers.schedule_once(key.clone(), Duration::from_secs(10), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        tokio::time::sleep(Duration::from_secs(5)).await;

        let counter = Arc::clone(&fired);
        timers.schedule_once(key.clone(), Duration::from_secs(10), move || {
            counter.fetch_add(10, Ordering::SeqCst);
        });
        assert_eq!(timers.len(), 1);

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeating_stops_on_break() {
        let mut timers = TimerRegistry::new();
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ticks);
        let key = TimerKey::new("abc", "no_motion");

        timers.schedule_repeating(key.clone(), Duration::from_secs(30), move || {
            if counter.fetch_add(1, Ordering::SeqCst) + 1 == 3 {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        });

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(300)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 3);
        assert!(!timers.is_pending(&key));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_all_stops_everything() {
        let mut timers = TimerRegistry::new();
        let fired = Arc::new(AtomicUsize::new(0));

        for device in ["a", "b", "c"] {
            let counter = Arc::clone(&fired);
            timers.schedule_once(
                TimerKey::new(device, "occupancy"),
                Duration::from_secs(5),
                move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                },
            );
        }
        assert_eq!(timers.cancel_all(), 3);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert!(timers.is_empty());
    }

    #[test]
    fn test_no_runtime_does_not_arm() {
        let mut timers = TimerRegistry::new();
        timers.schedule_once(
            TimerKey::new("abc", "occupancy"),
            Duration::from_secs(1),
            || {},
        );
        assert!(timers.is_empty());
    }
}
