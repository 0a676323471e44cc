// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Cooperative stop signal handed to every loop.

use std::time::Duration;
use tokio::sync::watch;

/// Create a connected trigger/signal pair.
#[must_use]
pub fn shutdown_channel() -> (ShutdownTrigger, ShutdownSignal) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger(tx), ShutdownSignal { rx })
}

#[derive(Debug)]
pub struct ShutdownTrigger(watch::Sender<bool>);

impl ShutdownTrigger {
    pub fn trigger(&self) {
        // send_replace never fails, even with no receivers left
        self.0.send_replace(true);
    }
}

/// Receiving side. Cheap to clone; each loop owns one.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    #[must_use]
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Sleep for `duration` unless shutdown arrives first.
    /// Returns `true` if woken by shutdown.
    pub async fn sleep(&mut self, duration: Duration) -> bool {
        if self.is_triggered() {
            return true;
        }
        let changed = tokio::select! {
            _ = tokio::time::sleep(duration) => return false,
            changed = self.rx.changed() => changed,
        };
        // a dropped trigger counts as shutdown
        changed.is_err() || self.is_triggered()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_trigger_wakes_sleeper() {
        let (trigger, mut signal) = shutdown_channel();
        assert!(!signal.is_triggered());

        let sleeper = tokio::spawn(async move { signal.sleep(Duration::from_secs(60)).await });
        trigger.trigger();

        let woke_for_shutdown = tokio::time::timeout(Duration::from_secs(1), sleeper)
            .await
            .expect("sleeper should wake")
            .unwrap();
        assert!(woke_for_shutdown);
    }

    #[tokio::test]
    async fn test_sleep_elapses_without_trigger() {
        let (_trigger, mut signal) = shutdown_channel();
        assert!(!signal.sleep(Duration::from_millis(5)).await);
    }

    #[tokio::test]
    async fn test_dropped_trigger_counts_as_shutdown() {
        let (trigger, mut signal) = shutdown_channel();
        drop(trigger);
        assert!(signal.sleep(Duration::from_secs(60)).await);
    }
}
