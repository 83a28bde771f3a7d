// ABOUTME: Navigation tracker that wraps the page history and turns host signals into triggers.
// ABOUTME: Deduplicates by URL so each location change produces exactly one Navigation trigger.

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info};
use url::Url;

use crate::classifier::PathSet;
use crate::debounce::Trigger;
use crate::dom::{History, HostSignal, Page};
use crate::error::EngineError;
use crate::policy::Policy;

/// Event the page dispatches on back/forward traversal.
pub const POPSTATE: &str = "popstate";

/// History wrapper installed over the page's own history object.
///
/// Every `push_state`/`replace_state` goes through here, including calls made
/// by the site's framework, so navigations are seen the moment they commit.
pub struct ObservedHistory {
    inner: Box<dyn History>,
    guards: PathSet,
    tx: UnboundedSender<HostSignal>,
}

impl ObservedHistory {
    pub fn new(inner: Box<dyn History>, guards: PathSet, tx: UnboundedSender<HostSignal>) -> Self {
        Self { inner, guards, tx }
    }

    fn is_guarded(&self, url: &Url, op: &str) -> bool {
        if self.guards.is_empty() || !self.guards.matches(url.path()) {
            return false;
        }
        info!(target: "quietpage::navigation", op, path = url.path(), "guarded navigation refused");
        true
    }
}

impl History for ObservedHistory {
    fn current(&self) -> &Url {
        self.inner.current()
    }

    fn push_state(&mut self, url: Url) -> bool {
        if self.is_guarded(&url, "push_state") {
            return false;
        }
        let changed = self.inner.push_state(url.clone());
        if changed {
            let _ = self.tx.send(HostSignal::HistoryPush(url));
        }
        changed
    }

    fn replace_state(&mut self, url: Url) -> bool {
        if self.is_guarded(&url, "replace_state") {
            return false;
        }
        let changed = self.inner.replace_state(url.clone());
        if changed {
            let _ = self.tx.send(HostSignal::HistoryReplace(url));
        }
        changed
    }

    fn go(&mut self, delta: isize) -> bool {
        self.inner.go(delta)
    }
}

/// Normalizes history calls, `popstate` and site-specific events into
/// [`Trigger`]s.
pub struct NavigationTracker {
    last_url: Url,
    signals: UnboundedReceiver<HostSignal>,
}

impl NavigationTracker {
    /// Wraps the page history and subscribes to `popstate` plus the policy's
    /// navigation events.
    pub fn install(page: &Page, policy: &Policy) -> Result<Self, EngineError> {
        let guards = PathSet::compile(&policy.guarded_navigations)?;
        let (tx, signals) = mpsc::unbounded_channel();

        let history_tx = tx.clone();
        page.wrap_history(move |inner| {
            Box::new(ObservedHistory::new(inner, guards, history_tx)) as Box<dyn History>
        });
        page.add_event_listener(POPSTATE, tx.clone());
        for name in &policy.navigation_event_names {
            if name != POPSTATE {
                page.add_event_listener(name.clone(), tx.clone());
            }
        }
        debug!(
            target: "quietpage::navigation",
            events = policy.navigation_event_names.len(),
            guards = policy.guarded_navigations.len(),
            "navigation tracker installed"
        );

        Ok(Self {
            last_url: page.location(),
            signals,
        })
    }

    /// The last URL a trigger was emitted for.
    pub fn current(&self) -> &Url {
        &self.last_url
    }

    /// Waits for the next host signal. Pending forever once the page is gone.
    pub async fn recv(&mut self) -> Option<HostSignal> {
        self.signals.recv().await
    }

    /// Turns a host signal into a trigger. A URL change wins over the event
    /// name; `popstate` without a URL change is dropped.
    pub fn observe(&mut self, page: &Page, signal: &HostSignal) -> Option<Trigger> {
        if let Some(trigger) = self.poll(page) {
            return Some(trigger);
        }
        match signal {
            HostSignal::Event(name) if name != POPSTATE => Some(Trigger::HostEvent(name.clone())),
            _ => None,
        }
    }

    /// Compares the page location against the last seen URL.
    pub fn poll(&mut self, page: &Page) -> Option<Trigger> {
        let location = page.location();
        if location == self.last_url {
            return None;
        }
        let from = std::mem::replace(&mut self.last_url, location.clone());
        debug!(
            target: "quietpage::navigation",
            from = %from,
            to = %location,
            "location changed"
        );
        Some(Trigger::Navigation { from, to: location })
    }
}
