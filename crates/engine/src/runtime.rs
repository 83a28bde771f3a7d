// ABOUTME: Lifecycle bootstrap and the cooperative event loop driving one policy on one page.
// ABOUTME: Host signals and mutations feed the debouncer; each elapsed deadline runs one pass.

use std::future;
use std::rc::Rc;
use std::time::Duration;

use tokio::select;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::time::{interval_at, sleep_until, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::classifier::EntryContext;
use crate::debounce::{Debouncer, PendingPass, Trigger};
use crate::dom::Page;
use crate::error::EngineError;
use crate::navigation::NavigationTracker;
use crate::options::EngineOptions;
use crate::policy::Policy;
use crate::reconcile::{PassOutcome, Reconciler};
use crate::watcher::MutationWatcher;

/// One engine instance: a policy bound to a page.
///
/// The runtime is `!Send`; drive [`Runtime::run`] on a current-thread runtime
/// inside a `tokio::task::LocalSet`.
pub struct Runtime {
    page: Rc<Page>,
    opts: EngineOptions,
    reconciler: Reconciler,
    tracker: NavigationTracker,
    watcher: MutationWatcher,
    debouncer: Debouncer,
    periodic: Duration,
    critical_style_id: String,
    /// Generation the page had when the last pass finished. Mutation records
    /// at or below it were already seen by that pass.
    settled: u64,
    subscribers: Vec<UnboundedSender<PassOutcome>>,
    shutdown: CancellationToken,
}

impl Runtime {
    /// Compiles `policy` and installs the navigation tracker on `page`.
    /// Nothing is mutated until [`Runtime::bootstrap`] or [`Runtime::run`].
    pub fn new(page: Rc<Page>, policy: Policy, opts: EngineOptions) -> Result<Self, EngineError> {
        let mark = opts.mark_for(&policy);
        let critical_style_id = opts.critical_style_id(&policy);
        let debouncer =
            Debouncer::new(opts.debounce_for(&policy)).with_max_wait(opts.max_wait_for(&policy));
        let periodic = opts.periodic_for(&policy);
        let entry = EntryContext::from_page(&page);

        let reconciler = Reconciler::new(policy, &mark, entry)?;
        let tracker = NavigationTracker::install(&page, reconciler.policy())?;
        let watcher = MutationWatcher::new(opts.attach_selector.clone());

        Ok(Self {
            page,
            opts,
            reconciler,
            tracker,
            watcher,
            debouncer,
            periodic,
            critical_style_id,
            settled: 0,
            subscribers: Vec::new(),
            shutdown: CancellationToken::new(),
        })
    }

    pub fn page(&self) -> &Rc<Page> {
        &self.page
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    /// Receives one [`PassOutcome`] per pass from now on.
    pub fn subscribe(&mut self) -> UnboundedReceiver<PassOutcome> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.push(tx);
        rx
    }

    /// Cancelling the token stops [`Runtime::run`].
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Injects the critical stylesheet and runs the first pass immediately,
    /// before the page has finished rendering.
    pub fn bootstrap(&mut self) -> PassOutcome {
        if let Some(ref css) = self.reconciler.policy().critical_css {
            if self.page.inject_style(&self.critical_style_id, css) {
                debug!(target: "quietpage::runtime", id = %self.critical_style_id, "critical css injected");
            }
        }
        self.reconcile_now(Trigger::Initial)
    }

    /// Runs a pass for `trigger` immediately, bypassing the debouncer.
    pub fn reconcile_now(&mut self, trigger: Trigger) -> PassOutcome {
        self.debouncer.cancel();
        self.run_pass(PendingPass::single(trigger))
    }

    /// Runs the engine until the shutdown token is cancelled.
    pub async fn run(mut self) {
        let page = Rc::clone(&self.page);
        let shutdown = self.shutdown.clone();
        info!(
            target: "quietpage::runtime",
            policy = %self.reconciler.policy().name,
            url = %page.location(),
            "engine started"
        );

        self.bootstrap();

        let mut attach_at = match self.watcher.try_attach(&page) {
            Ok(()) => None,
            Err(err) => self.attach_failed(err),
        };
        let mut url_poll_at: Option<Instant> = None;
        let mut periodic = interval_at(Instant::now() + self.periodic, self.periodic);
        periodic.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let debounce_at = self.debouncer.deadline();
            select! {
                biased;
                _ = shutdown.cancelled() => {
                    debug!(target: "quietpage::runtime", "shutdown requested");
                    break;
                }
                _ = sleep_until_opt(debounce_at) => {
                    if let Some(pass) = self.debouncer.take_due(Instant::now()) {
                        self.run_pass(pass);
                    }
                }
                signal = self.tracker.recv() => {
                    let Some(signal) = signal else {
                        debug!(target: "quietpage::runtime", "host signal channel closed");
                        break;
                    };
                    if let Some(trigger) = self.tracker.observe(&page, &signal) {
                        self.schedule(trigger);
                    }
                    url_poll_at = Some(Instant::now() + self.opts.url_poll_delay);
                }
                record = self.watcher.recv() => {
                    match record {
                        Some(record) if record.generation > self.settled => {
                            self.schedule(Trigger::Mutation {
                                added: record.added,
                                removed: record.removed,
                            });
                        }
                        Some(_) => {}
                        None => {
                            debug!(target: "quietpage::runtime", "mutation channel closed");
                            break;
                        }
                    }
                }
                _ = sleep_until_opt(url_poll_at) => {
                    url_poll_at = None;
                    if let Some(trigger) = self.tracker.poll(&page) {
                        self.schedule(trigger);
                    }
                }
                _ = sleep_until_opt(attach_at) => {
                    attach_at = match self.watcher.try_attach(&page) {
                        Ok(()) => {
                            self.schedule(Trigger::Initial);
                            None
                        }
                        Err(err) => self.attach_failed(err),
                    };
                }
                _ = periodic.tick() => {
                    self.safety_tick();
                }
            }
        }

        info!(target: "quietpage::runtime", "engine stopped");
    }

    fn schedule(&mut self, trigger: Trigger) {
        let kind = trigger.kind();
        let deadline = self.debouncer.trigger(Instant::now(), trigger);
        debug!(
            target: "quietpage::runtime",
            trigger = kind,
            in_ms = deadline.saturating_duration_since(Instant::now()).as_millis() as u64,
            "pass scheduled"
        );
    }

    /// Runs the periodic sweep immediately. Any pending debounced pass is
    /// folded into it, so host churn can never postpone the tick.
    fn safety_tick(&mut self) -> PassOutcome {
        let folded = self.debouncer.cancel().map_or(0, |pending| pending.coalesced);
        if let Some(Trigger::Navigation { from, to }) = self.tracker.poll(&self.page) {
            debug!(target: "quietpage::runtime", from = %from, to = %to, "location change caught by safety tick");
        }
        self.run_pass(PendingPass {
            last: Trigger::SafetyTick,
            coalesced: folded + 1,
            sweep: true,
        })
    }

    /// Returns when to retry attaching, or `None` to stop retrying.
    fn attach_failed(&self, err: EngineError) -> Option<Instant> {
        if err.is_attach_point_unavailable() {
            Some(Instant::now() + self.opts.attach_retry)
        } else {
            warn!(target: "quietpage::runtime", error = %err, "mutation watcher disabled");
            None
        }
    }

    fn run_pass(&mut self, pass: PendingPass) -> PassOutcome {
        let outcome = self.reconciler.reconcile(&self.page, &pass);
        self.settled = outcome.generation;
        self.subscribers
            .retain(|tx| tx.send(outcome.clone()).is_ok());
        outcome
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => future::pending().await,
    }
}
