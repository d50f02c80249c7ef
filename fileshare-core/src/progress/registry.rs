use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::channel::{ChannelError, ChannelHandle};
use crate::config::ProgressConfig;
use crate::models::CorrelationId;

/// Liveness settings for the registry
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Maximum idle time before an entry is reaped
    pub keep_alive: Duration,

    /// Sweep cadence
    pub termination_interval: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            keep_alive: Duration::from_secs(10),
            termination_interval: Duration::from_secs(5),
        }
    }
}

impl From<&ProgressConfig> for RegistryConfig {
    fn from(config: &ProgressConfig) -> Self {
        Self {
            keep_alive: config.keep_alive(),
            termination_interval: config.termination_interval(),
        }
    }
}

/// Registry record of a live notification channel
#[derive(Debug)]
pub struct ChannelEntry {
    handle: ChannelHandle,
    last_activity: Instant,
}

impl ChannelEntry {
    fn new(handle: ChannelHandle) -> Self {
        Self {
            handle,
            last_activity: Instant::now(),
        }
    }

    fn idle_duration(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_activity)
    }

    fn is_stale(&self, now: Instant, keep_alive: Duration) -> bool {
        self.idle_duration(now) > keep_alive
    }
}

/// Live notification channels keyed by correlation id.
///
/// Cheap to clone; all clones share the same map. Every operation tolerates
/// a missing entry, because the upload and the notification channel race to
/// arrive and either may lose.
#[derive(Clone)]
pub struct ConnectionRegistry {
    entries: Arc<DashMap<CorrelationId, ChannelEntry>>,
    config: Arc<RegistryConfig>,
    sweeper: Arc<Mutex<Option<CancellationToken>>>,
}

impl ConnectionRegistry {
    #[must_use]
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            config: Arc::new(config),
            sweeper: Arc::new(Mutex::new(None)),
        }
    }

    #[must_use]
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Register a channel under `id`.
    ///
    /// An entry already holding `id` is replaced and its channel closed, so a
    /// retried upload never leaks the socket of the previous attempt.
    pub fn register(&self, id: impl Into<CorrelationId>, handle: ChannelHandle) {
        let id = id.into();
        let channel_id = handle.channel_id();

        if let Some(previous) = self.entries.insert(id.clone(), ChannelEntry::new(handle)) {
            previous.handle.close();
            warn!(
                correlation_id = %id,
                replaced_channel = previous.handle.channel_id(),
                channel_id,
                "Correlation id re-registered, closed previous channel"
            );
        } else {
            info!(
                correlation_id = %id,
                channel_id,
                active_channels = self.entries.len(),
                "Notification channel registered"
            );
        }
    }

    /// Push `message` to the channel registered under `id`.
    ///
    /// Returns whether the message was queued. Does not update liveness; see
    /// [`Self::touch`]. A channel whose client has gone away is terminated.
    pub fn notify(&self, id: &str, message: String) -> bool {
        let (outcome, channel_id) = match self.entries.get(id) {
            Some(entry) => (entry.handle.try_send(message), entry.handle.channel_id()),
            None => {
                debug!(correlation_id = %id, "No channel registered, notification dropped");
                return false;
            }
        };

        match outcome {
            Ok(()) => true,
            Err(ChannelError::Full) => {
                warn!(correlation_id = %id, channel_id, "Notification queue full, message dropped");
                false
            }
            Err(ChannelError::Closed) => {
                warn!(correlation_id = %id, channel_id, "Notification channel closed by transport, terminating");
                self.release(id, channel_id);
                false
            }
        }
    }

    /// Mark the entry under `id` as active now
    pub fn touch(&self, id: &str) {
        if let Some(mut entry) = self.entries.get_mut(id) {
            entry.last_activity = Instant::now();
        }
    }

    /// Close and remove the entry under `id`.
    ///
    /// Idempotent: removal claims the entry atomically, so concurrent callers
    /// (progress path, sweep, transport) close the handle exactly once.
    pub fn terminate(&self, id: &str) -> bool {
        let Some((id, entry)) = self.entries.remove(id) else {
            return false;
        };
        entry.handle.close();
        info!(
            correlation_id = %id,
            channel_id = entry.handle.channel_id(),
            active_channels = self.entries.len(),
            "Notification channel terminated"
        );
        true
    }

    /// Terminate the entry under `id` only if it still holds channel `channel_id`.
    ///
    /// Used by a transport whose socket closed, so that it cannot tear down a
    /// newer channel registered under the same id.
    pub fn release(&self, id: &str, channel_id: u64) -> bool {
        let Some((id, entry)) = self
            .entries
            .remove_if(id, |_, entry| entry.handle.channel_id() == channel_id)
        else {
            return false;
        };
        entry.handle.close();
        debug!(
            correlation_id = %id,
            channel_id,
            active_channels = self.entries.len(),
            "Notification channel released"
        );
        true
    }

    /// Reap every entry idle longer than the keep-alive. Returns how many were reaped.
    pub fn sweep_once(&self) -> usize {
        let now = Instant::now();
        let keep_alive = self.config.keep_alive;

        let stale: Vec<CorrelationId> = self
            .entries
            .iter()
            .filter(|entry| entry.value().is_stale(now, keep_alive))
            .map(|entry| entry.key().clone())
            .collect();

        let mut reaped = 0;
        for id in stale {
            // re-checked under the shard lock: a touch may have landed since the scan
            let Some((id, entry)) = self
                .entries
                .remove_if(id.as_str(), |_, entry| entry.is_stale(now, keep_alive))
            else {
                continue;
            };
            entry.handle.close();
            reaped += 1;
            warn!(
                correlation_id = %id,
                idle = ?entry.idle_duration(now),
                "Notification channel idle timeout"
            );
        }

        if reaped > 0 {
            debug!(reaped, active_channels = self.entries.len(), "Sweep completed");
        }
        reaped
    }

    /// Start the periodic sweep. A sweep already running is stopped first.
    pub fn start(&self) -> JoinHandle<()> {
        let cancel_token = CancellationToken::new();
        if let Some(previous) = self.sweeper.lock().replace(cancel_token.clone()) {
            previous.cancel();
        }

        let registry = self.clone();
        let period = self.config.termination_interval;
        info!(
            keep_alive = ?self.config.keep_alive,
            termination_interval = ?period,
            "Starting notification channel sweep"
        );

        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = cancel_token.cancelled() => {
                        info!("Notification channel sweep stopped");
                        return;
                    }
                    _ = ticker.tick() => {
                        registry.sweep_once();
                    }
                }
            }
        })
    }

    /// Stop the periodic sweep. Returns false if it was not running.
    pub fn stop(&self) -> bool {
        self.sweeper.lock().take().is_some_and(|token| {
            token.cancel();
            true
        })
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.sweeper.lock().is_some()
    }

    /// Terminate every entry, e.g. on server shutdown
    pub fn terminate_all(&self) -> usize {
        let ids: Vec<CorrelationId> = self.entries.iter().map(|e| e.key().clone()).collect();
        ids.iter().filter(|id| self.terminate(id.as_str())).count()
    }

    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    /// Channel id currently registered under `id`
    #[must_use]
    pub fn channel_id(&self, id: &str) -> Option<u64> {
        self.entries.get(id).map(|entry| entry.handle.channel_id())
    }

    /// Time since the last registration or touch of `id`
    #[must_use]
    pub fn idle_duration(&self, id: &str) -> Option<Duration> {
        self.entries
            .get(id)
            .map(|entry| entry.idle_duration(Instant::now()))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new(RegistryConfig::default())
    }
}
