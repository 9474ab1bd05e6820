//! In-process "something changed" signal keyed by aggregate.
//!
//! Every key owns a `watch` channel holding the highest version seen so far.
//! Writers call [`VersionWaiter::notify`] after a flush; long-poll handlers
//! park in [`VersionWaiter::wait_for_update`] until the version moves past
//! what their client already has.

use std::time::Duration;

use dashmap::DashMap;
use tokio::{sync::watch, time::timeout};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Highest known version per key, with wakeups for waiters.
#[derive(Default)]
pub struct VersionWaiter {
    trackers: DashMap<String, watch::Sender<u64>>,
}

impl VersionWaiter {
    /// Waiter with no keys tracked yet.
    pub fn new() -> Self {
        Self::default()
    }

    fn tracker(&self, key: &str) -> watch::Receiver<u64> {
        if let Some(sender) = self.trackers.get(key) {
            return sender.subscribe();
        }
        self.trackers
            .entry(key.to_owned())
            .or_insert_with(|| watch::channel(0).0)
            .subscribe()
    }

    /// Record `version` for `key` and wake every waiter when it is newer.
    ///
    /// Older or repeated versions are ignored, so the tracked value never
    /// goes backwards.
    pub fn notify(&self, key: &str, version: u64) {
        let sender = self
            .trackers
            .entry(key.to_owned())
            .or_insert_with(|| watch::channel(0).0);
        let advanced = sender.send_if_modified(|current| {
            if version > *current {
                *current = version;
                true
            } else {
                false
            }
        });
        if advanced {
            debug!(key, version, "version advanced");
        }
    }

    /// Highest version notified for `key`, 0 when it was never touched.
    pub fn current_version(&self, key: &str) -> u64 {
        self.trackers
            .get(key)
            .map(|sender| *sender.borrow())
            .unwrap_or(0)
    }

    /// Wait until `key` moves past `known`, `limit` elapses or `cancel` fires.
    ///
    /// Returns the latest version in every case, never less than `known`;
    /// callers compare it with `known` to learn whether anything changed.
    pub async fn wait_for_update(
        &self,
        key: &str,
        known: u64,
        limit: Duration,
        cancel: &CancellationToken,
    ) -> u64 {
        let mut receiver = self.tracker(key);
        let newer = async {
            // The sender lives in the map for the process lifetime.
            let _ = receiver.wait_for(|current| *current > known).await;
        };

        tokio::select! {
            _ = timeout(limit, newer) => {}
            _ = cancel.cancelled() => {}
        }

        let latest = *receiver.borrow();
        latest.max(known)
    }
}
