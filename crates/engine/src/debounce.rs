// ABOUTME: Reconciliation triggers and the debouncer that coalesces bursts of them into one pass.
// ABOUTME: Every trigger pushes the deadline out, up to a max-wait bound measured from the burst's start.

use std::time::Duration;

use tokio::time::Instant;
use url::Url;

/// Why a reconciliation pass was requested.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    /// Bootstrap, before the document is fully parsed.
    Initial,
    /// The effective URL changed.
    Navigation { from: Url, to: Url },
    /// A site-specific re-render signal with no URL change.
    HostEvent(String),
    /// Child-list changes inside the watched subtree.
    Mutation { added: usize, removed: usize },
    /// The coarse periodic safety tick.
    SafetyTick,
}

impl Trigger {
    /// Triggers that re-evaluate every rule even when nothing seems to have
    /// changed since the last pass.
    pub fn forces_sweep(&self) -> bool {
        matches!(self, Trigger::Initial | Trigger::SafetyTick)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Trigger::Initial => "initial",
            Trigger::Navigation { .. } => "navigation",
            Trigger::HostEvent(_) => "host_event",
            Trigger::Mutation { .. } => "mutation",
            Trigger::SafetyTick => "safety_tick",
        }
    }
}

/// The coalesced request for one pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingPass {
    /// The most recent trigger of the burst.
    pub last: Trigger,
    /// How many triggers were folded into this pass.
    pub coalesced: usize,
    /// Whether any folded trigger forces a full sweep.
    pub sweep: bool,
}

impl PendingPass {
    pub fn single(trigger: Trigger) -> Self {
        let sweep = trigger.forces_sweep();
        Self {
            last: trigger,
            coalesced: 1,
            sweep,
        }
    }
}

/// Trailing-edge debouncer.
///
/// A host that never stops mutating would otherwise postpone the pass
/// forever; with a max wait the pass runs at most `max_wait` after the first
/// trigger of the burst.
#[derive(Debug)]
pub struct Debouncer {
    window: Duration,
    max_wait: Option<Duration>,
    burst_start: Option<Instant>,
    deadline: Option<Instant>,
    pending: Option<PendingPass>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            max_wait: None,
            burst_start: None,
            deadline: None,
            pending: None,
        }
    }

    /// Bounds how long a burst can keep pushing the deadline out.
    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = Some(max_wait.max(self.window));
        self
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn max_wait(&self) -> Option<Duration> {
        self.max_wait
    }

    /// Folds `trigger` into the pending pass and moves the deadline to
    /// `now + window`, capped at the burst's max-wait deadline. Returns the
    /// new deadline.
    pub fn trigger(&mut self, now: Instant, trigger: Trigger) -> Instant {
        let sweep = trigger.forces_sweep();
        self.pending = Some(match self.pending.take() {
            Some(pending) => PendingPass {
                last: trigger,
                coalesced: pending.coalesced + 1,
                sweep: pending.sweep || sweep,
            },
            None => {
                self.burst_start = Some(now);
                PendingPass::single(trigger)
            }
        });
        let mut deadline = now + self.window;
        if let (Some(max_wait), Some(start)) = (self.max_wait, self.burst_start) {
            deadline = deadline.min(start + max_wait);
        }
        self.deadline = Some(deadline);
        deadline
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Takes the pending pass if its deadline has passed.
    pub fn take_due(&mut self, now: Instant) -> Option<PendingPass> {
        match self.deadline {
            Some(deadline) if deadline <= now => {
                self.deadline = None;
                self.burst_start = None;
                self.pending.take()
            }
            _ => None,
        }
    }

    /// Drops the pending pass without running it.
    pub fn cancel(&mut self) -> Option<PendingPass> {
        self.deadline = None;
        self.burst_start = None;
        self.pending.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const WINDOW: Duration = Duration::from_millis(100);

    fn mutation() -> Trigger {
        Trigger::Mutation {
            added: 1,
            removed: 0,
        }
    }

    #[test]
    fn burst_coalesces_into_one_pass() {
        let start = Instant::now();
        let mut debouncer = Debouncer::new(WINDOW);
        for i in 0..5 {
            debouncer.trigger(start + Duration::from_millis(i * 20), mutation());
        }
        let last = start + Duration::from_millis(80);
        assert_eq!(debouncer.deadline(), Some(last + WINDOW));

        assert!(debouncer.take_due(last + Duration::from_millis(99)).is_none());
        let pass = debouncer.take_due(last + WINDOW).unwrap();
        assert_eq!(pass.coalesced, 5);
        assert!(!pass.sweep);
        assert!(debouncer.take_due(last + WINDOW * 2).is_none());
        assert!(!debouncer.is_pending());
    }

    #[test]
    fn last_trigger_wins_and_sweep_is_sticky() {
        let start = Instant::now();
        let mut debouncer = Debouncer::new(WINDOW);
        debouncer.trigger(start, Trigger::SafetyTick);
        debouncer.trigger(start, Trigger::HostEvent("yt-navigate-finish".into()));
        let pass = debouncer.take_due(start + WINDOW).unwrap();
        assert_eq!(pass.last, Trigger::HostEvent("yt-navigate-finish".into()));
        assert!(pass.sweep);
    }

    #[test]
    fn max_wait_caps_a_burst_that_never_pauses() {
        let start = Instant::now();
        let mut debouncer = Debouncer::new(WINDOW).with_max_wait(Duration::from_millis(300));
        let mut due = Vec::new();
        for i in 0..20 {
            let now = start + Duration::from_millis(i * 50);
            if let Some(pass) = debouncer.take_due(now) {
                due.push((i, pass.coalesced));
            }
            debouncer.trigger(now, mutation());
        }
        assert_eq!(due, vec![(6, 6), (12, 6), (18, 6)]);
        assert_eq!(debouncer.deadline(), Some(start + Duration::from_millis(1050)));
    }

    #[test]
    fn max_wait_never_shortens_the_window() {
        let debouncer = Debouncer::new(WINDOW).with_max_wait(Duration::from_millis(10));
        assert_eq!(debouncer.max_wait(), Some(WINDOW));
    }

    #[test]
    fn cancel_drops_pending_pass() {
        let start = Instant::now();
        let mut debouncer = Debouncer::new(WINDOW);
        debouncer.trigger(start, mutation());
        assert!(debouncer.cancel().is_some());
        assert_eq!(debouncer.deadline(), None);
        assert!(debouncer.take_due(start + WINDOW).is_none());
    }
}
