//! Heartbeat monitor: one timer task per session.
//!
//! Every `interval` the task sends `{"cmd":"ping"}` to its session.  The
//! agent's `pong` replies are recorded by the response dispatcher; this task
//! only reads the timestamp back.
//!
//! # Eviction
//!
//! With `max_missed = 0` (the default) a silent agent is never evicted; the
//! session ends only when the transport does.  With `max_missed = n`, a
//! session whose last `pong` is older than `interval × n` is torn down.

use std::sync::Arc;
use std::time::Duration;

use tether_core::{Command, DEFAULT_HEARTBEAT_INTERVAL_SECS};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, info};

use crate::application::session_registry::PeerLink;

/// Timing of the per-session heartbeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatSettings {
    pub interval: Duration,
    /// Missed intervals tolerated before eviction; `0` disables eviction.
    pub max_missed: u32,
}

impl Default for HeartbeatSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(DEFAULT_HEARTBEAT_INTERVAL_SECS),
            max_missed: 0,
        }
    }
}

impl HeartbeatSettings {
    /// How long a session may stay silent, or `None` when eviction is off.
    ///
    /// An age too large to represent also disables eviction.
    pub fn eviction_age(&self) -> Option<Duration> {
        if self.max_missed == 0 {
            return None;
        }
        self.interval.checked_mul(self.max_missed)
    }
}

/// Spawns the heartbeat task for `link`.
///
/// The task ends when `shutdown` flips to `true`, when the link is no longer
/// alive, when a probe cannot be sent, or after evicting the link.
pub fn spawn_heartbeat(
    link: Arc<dyn PeerLink>,
    mut shutdown: watch::Receiver<bool>,
    settings: HeartbeatSettings,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let id = link.id().to_string();
        let mut ticker = interval(settings.interval);
        ticker.tick().await; // Skip the immediate first tick.

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = ticker.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
            }

            if !link.is_alive() {
                debug!("session {id}: no longer active; heartbeat stopping");
                break;
            }

            if let Some(max_age) = settings.eviction_age() {
                let silent_for = link.last_heartbeat().elapsed();
                if silent_for > max_age {
                    info!(
                        "session {id}: no pong for {:.1}s; evicting",
                        silent_for.as_secs_f64()
                    );
                    link.close().await;
                    break;
                }
            }

            if let Err(e) = link.send_command(&Command::Ping).await {
                debug!("session {id}: heartbeat ping failed: {e}");
                break;
            }
            debug!("session {id}: sent heartbeat ping");
        }
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::session_registry::tests::RecordingLink;
    use std::sync::atomic::Ordering;

    fn settings(interval_ms: u64, max_missed: u32) -> HeartbeatSettings {
        HeartbeatSettings {
            interval: Duration::from_millis(interval_ms),
            max_missed,
        }
    }

    #[test]
    fn test_overflowing_eviction_age_disables_eviction() {
        // Arrange
        let s = HeartbeatSettings {
            interval: Duration::from_secs(u64::MAX),
            max_missed: 3,
        };

        // Act / Assert
        assert_eq!(s.eviction_age(), None);
        assert_eq!(settings(1_000, 3).eviction_age(), Some(Duration::from_secs(3)));
    }

    #[test]
    fn test_default_settings_never_evict() {
        let s = HeartbeatSettings::default();
        assert_eq!(s.interval, Duration::from_secs(30));
        assert_eq!(s.eviction_age(), None);
    }

    #[test]
    fn test_eviction_age_is_interval_times_missed() {
        assert_eq!(
            settings(100, 3).eviction_age(),
            Some(Duration::from_millis(300))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_pings_are_sent_each_interval_after_the_first() {
        // Arrange
        let link = RecordingLink::new("a:1");
        let (_tx, rx) = watch::channel(false);

        // Act
        let handle = spawn_heartbeat(link.clone(), rx, settings(1_000, 0));
        tokio::time::sleep(Duration::from_millis(3_500)).await;
        handle.abort();

        // Assert
        assert_eq!(link.sent_tags(), vec!["ping", "ping", "ping"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_signal_stops_the_task() {
        // Arrange
        let link = RecordingLink::new("a:1");
        let (tx, rx) = watch::channel(false);
        let handle = spawn_heartbeat(link.clone(), rx, settings(1_000, 0));

        // Act
        tx.send_replace(true);
        handle.await.unwrap();

        // Assert
        assert!(link.sent_tags().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dead_link_stops_the_task() {
        let link = RecordingLink::new("a:1");
        link.alive.store(false, Ordering::SeqCst);
        let (_tx, rx) = watch::channel(false);

        let handle = spawn_heartbeat(link.clone(), rx, settings(1_000, 0));
        handle.await.unwrap();

        assert!(link.sent_tags().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_link_is_evicted_when_enabled() {
        // Arrange: the link never records a pong
        let link = RecordingLink::new("a:1");
        let (_tx, rx) = watch::channel(false);

        // Act
        let handle = spawn_heartbeat(link.clone(), rx, settings(1_000, 2));
        handle.await.unwrap();

        // Assert
        assert_eq!(*link.closes.lock().unwrap(), 1);
        assert!(!link.is_alive());
    }

    #[tokio::test(start_paused = true)]
    async fn test_answering_link_is_not_evicted() {
        // Arrange
        let link = RecordingLink::new("a:1");
        let (_tx, rx) = watch::channel(false);
        let handle = spawn_heartbeat(link.clone(), rx, settings(1_000, 2));

        // Act: answer every probe
        for _ in 0..5 {
            tokio::time::sleep(Duration::from_millis(1_000)).await;
            link.record_heartbeat();
        }
        handle.abort();

        // Assert
        assert_eq!(*link.closes.lock().unwrap(), 0);
        assert!(link.sent_tags().len() >= 4);
    }
}
