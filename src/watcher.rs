//! Mutation watcher
//!
//! Coalesces a stream of "something changed" notices into scan triggers with
//! a trailing-edge debounce: every notice restarts the quiet window and a
//! trigger fires once the window elapses with no further notices.

use tokio::sync::mpsc;
use tokio::time::{sleep_until, Duration, Instant};
use tracing::debug;

/// A change notification from the host document. Carries no payload: any
/// change restarts the window and the next pass re-queries everything.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MutationNotice;

/// Downstream "re-scan now" signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanTrigger {
    /// Notices folded into this trigger
    pub coalesced: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebounceState {
    Idle,
    Pending { deadline: Instant },
}

/// Clock-free debounce state machine; callers pass the current instant
#[derive(Debug, Clone)]
pub struct Debouncer {
    window: Duration,
    state: DebounceState,
    coalesced: usize,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            state: DebounceState::Idle,
            coalesced: 0,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn state(&self) -> DebounceState {
        self.state
    }

    pub fn deadline(&self) -> Option<Instant> {
        match self.state {
            DebounceState::Idle => None,
            DebounceState::Pending { deadline } => Some(deadline),
        }
    }

    /// Record a notice, cancelling any pending deadline and starting a new one
    pub fn notify(&mut self, now: Instant) {
        self.state = DebounceState::Pending {
            deadline: now + self.window,
        };
        self.coalesced += 1;
    }

    /// Fire if the quiet window has elapsed, returning to idle
    pub fn fire_if_due(&mut self, now: Instant) -> Option<ScanTrigger> {
        match self.state {
            DebounceState::Pending { deadline } if now >= deadline => {
                let trigger = ScanTrigger {
                    coalesced: self.coalesced,
                };
                self.state = DebounceState::Idle;
                self.coalesced = 0;
                Some(trigger)
            }
            _ => None,
        }
    }
}

/// Async driver around [`Debouncer`]
#[derive(Debug)]
pub struct MutationWatcher {
    debouncer: Debouncer,
}

impl MutationWatcher {
    pub fn new(window: Duration) -> Self {
        Self {
            debouncer: Debouncer::new(window),
        }
    }

    /// Run until the notice channel closes or the trigger receiver is gone.
    /// A pending window is still flushed after the notice channel closes.
    pub async fn run(
        mut self,
        mut notices: mpsc::UnboundedReceiver<MutationNotice>,
        triggers: mpsc::UnboundedSender<ScanTrigger>,
    ) {
        let mut open = true;
        loop {
            let Some(deadline) = self.debouncer.deadline() else {
                if !open {
                    return;
                }
                match notices.recv().await {
                    Some(_) => self.debouncer.notify(Instant::now()),
                    None => return,
                }
                continue;
            };

            tokio::select! {
                notice = notices.recv(), if open => match notice {
                    Some(_) => self.debouncer.notify(Instant::now()),
                    None => open = false,
                },
                _ = sleep_until(deadline) => {
                    if let Some(trigger) = self.debouncer.fire_if_due(Instant::now()) {
                        debug!(coalesced = trigger.coalesced, "debounce window elapsed");
                        if triggers.send(trigger).is_err() {
                            return;
                        }
                    }
                }
            }
        }
    }
}
