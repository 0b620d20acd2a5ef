use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::manager::RawState;

#[derive(Clone, Copy, Debug)]
pub struct StabilizerConfig {
    /// A raw state must hold this long before it becomes stable.
    pub debounce: Duration,
    /// Minimum spacing between visible event-count updates.
    pub throttle: Duration,
}

impl Default for StabilizerConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(300),
            throttle: Duration::from_millis(500),
        }
    }
}

/// Presentation-grade connection state. Unlike [`RawState`] this never
/// flickers: a transition shorter than the debounce window is invisible.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StableState {
    Connecting,
    Connected,
    Disconnected { reason: String },
}

impl StableState {
    fn from_raw(raw: &RawState) -> Self {
        match raw {
            RawState::Connecting => Self::Connecting,
            RawState::Connected => Self::Connected,
            RawState::Disconnected { reason } => Self::Disconnected {
                reason: if reason.trim().is_empty() {
                    "Disconnected".into()
                } else {
                    reason.clone()
                },
            },
        }
    }
}

/// Smooths the raw connection signal for display: debounces state
/// transitions and throttles event-count updates so a busy feed cannot
/// flood the UI.
pub struct StateStabilizer {
    state_rx: watch::Receiver<StableState>,
    count_rx: watch::Receiver<u64>,
    cancel: CancellationToken,
}

impl StateStabilizer {
    pub fn new(
        raw_state: watch::Receiver<RawState>,
        raw_count: watch::Receiver<u64>,
        config: StabilizerConfig,
    ) -> Self {
        let initial = StableState::from_raw(&raw_state.borrow());
        let (state_tx, state_rx) = watch::channel(initial);
        let (count_tx, count_rx) = watch::channel(*raw_count.borrow());

        let cancel = CancellationToken::new();
        tokio::spawn(debounce_states(
            raw_state,
            state_tx,
            config.debounce,
            cancel.clone(),
        ));
        tokio::spawn(throttle_counts(
            raw_count,
            count_tx,
            config.throttle,
            cancel.clone(),
        ));

        Self {
            state_rx,
            count_rx,
            cancel,
        }
    }

    pub fn state(&self) -> watch::Receiver<StableState> {
        self.state_rx.clone()
    }

    pub fn event_count(&self) -> watch::Receiver<u64> {
        self.count_rx.clone()
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

impl Drop for StateStabilizer {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Last-write-wins debounce: each raw change restarts the window, and only
/// the value standing when the window expires is committed. Equal commits
/// are skipped, so a dip that returns to the current stable value produces
/// no transition at all.
async fn debounce_states(
    mut raw: watch::Receiver<RawState>,
    stable: watch::Sender<StableState>,
    window: Duration,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            changed = raw.changed() => {
                if changed.is_err() {
                    return;
                }
            }
        }
        let mut candidate = StableState::from_raw(&raw.borrow_and_update());
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(window) => {
                    if *stable.borrow() != candidate {
                        stable.send_replace(candidate);
                    }
                    break;
                }
                changed = raw.changed() => {
                    if changed.is_err() {
                        return;
                    }
                    candidate = StableState::from_raw(&raw.borrow_and_update());
                }
            }
        }
    }
}

/// Trailing-edge throttle: a burst of count updates produces one visible
/// update carrying the latest value, never more than one per window. The
/// final value is delayed, never dropped.
async fn throttle_counts(
    mut raw: watch::Receiver<u64>,
    visible: watch::Sender<u64>,
    window: Duration,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            changed = raw.changed() => {
                if changed.is_err() {
                    return;
                }
            }
        }
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(window) => {}
        }
        let latest = *raw.borrow_and_update();
        if *visible.borrow() != latest {
            visible.send_replace(latest);
        }
    }
}
