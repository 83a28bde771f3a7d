// ABOUTME: Reconciliation engine: one synchronous pass classifies the page and converges the DOM.
// ABOUTME: Skips unchanged pages cheaply, isolates per-rule failures and never touches preserved nodes.

//! Reconciliation passes.
//!
//! A pass is the only place the engine writes to the page. It runs to
//! completion without awaiting, so the host can never observe a half-applied
//! policy. Its inputs are the page, the policy and the last checkpoint; its
//! output is a [`PassOutcome`] for diagnostics.

use std::collections::HashSet;

use dom_query::{Matcher, NodeId, NodeRef};
use tracing::{debug, info, warn};

use crate::classifier::{Classifier, EntryContext};
use crate::debounce::{PendingPass, Trigger};
use crate::dom::Page;
use crate::error::EngineError;
use crate::matcher::{self, compiled};
use crate::mutator::DomMutator;
use crate::overlay::{OverlayChange, OverlayManager, StateMarker, OVERLAY_ATTR};
use crate::policy::{Action, PageState, Policy};

/// A rule that could not be evaluated during a pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleFailure {
    /// Which list the rule came from and its position, e.g. `hide_rules[2]`.
    pub rule: String,
    pub message: String,
}

/// Diagnostics for one pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassOutcome {
    pub trigger: Trigger,
    /// Triggers folded into this pass by the debouncer.
    pub coalesced: usize,
    pub previous: Option<PageState>,
    pub state: PageState,
    /// True when the cheap path skipped rule evaluation.
    pub skipped: bool,
    /// Nodes newly mutated by this pass.
    pub applied: usize,
    pub overlay: Option<OverlayChange>,
    pub failures: Vec<RuleFailure>,
    /// Page generation at the end of the pass.
    pub generation: u64,
}

impl PassOutcome {
    pub fn is_transition(&self) -> bool {
        self.previous != Some(self.state)
    }
}

/// Per-pass scratch state. Discarded when the pass ends.
#[derive(Debug)]
pub struct ReconciliationContext {
    pub previous: Option<PageState>,
    pub state: PageState,
    touched: HashSet<NodeId>,
    applied: usize,
    failures: Vec<RuleFailure>,
}

impl ReconciliationContext {
    fn new(previous: Option<PageState>, state: PageState) -> Self {
        Self {
            previous,
            state,
            touched: HashSet::new(),
            applied: 0,
            failures: Vec::new(),
        }
    }

    /// Claims `node` for this pass. Returns false if an earlier rule did.
    fn claim(&mut self, node: &NodeRef) -> bool {
        self.touched.insert(node.id)
    }

    fn fail(&mut self, rule: String, err: EngineError) {
        warn!(
            target: "quietpage::reconcile",
            rule = %rule,
            error = %err,
            "rule evaluation failed"
        );
        self.failures.push(RuleFailure {
            rule,
            message: err.to_string(),
        });
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Checkpoint {
    state: PageState,
    generation: u64,
}

/// Per-instance reconciliation state for one policy on one page.
pub struct Reconciler {
    policy: Policy,
    classifier: Classifier,
    entry: EntryContext,
    mutator: DomMutator,
    overlay: OverlayManager,
    marker: Option<StateMarker>,
    last: Option<Checkpoint>,
}

impl Reconciler {
    /// Compiles the policy. `mark` is the processed-mark attribute for this
    /// instance.
    pub fn new(policy: Policy, mark: &str, entry: EntryContext) -> Result<Self, EngineError> {
        let classifier = Classifier::new(&policy)?;
        compiled::precompile_selectors(policy.selectors());
        let overlay = OverlayManager::new(policy.overlay.clone(), mark);
        let marker = policy.state_attribute.clone().map(StateMarker::new);
        Ok(Self {
            classifier,
            entry,
            mutator: DomMutator::new(mark),
            overlay,
            marker,
            last: None,
            policy,
        })
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    pub fn mutator(&self) -> &DomMutator {
        &self.mutator
    }

    pub fn entry(&self) -> &EntryContext {
        &self.entry
    }

    /// State computed by the last pass, if any ran.
    pub fn state(&self) -> Option<PageState> {
        self.last.map(|checkpoint| checkpoint.state)
    }

    /// Classifies the page without touching it.
    pub fn classify(&self, page: &Page) -> PageState {
        self.classifier.classify(&page.location(), &self.entry, page)
    }

    /// Runs one pass.
    pub fn reconcile(&mut self, page: &Page, pass: &PendingPass) -> PassOutcome {
        let state = self.classify(page);
        let previous = self.state();

        let unchanged = self.last
            == Some(Checkpoint {
                state,
                generation: page.generation(),
            });
        if unchanged && !pass.sweep {
            return PassOutcome {
                trigger: pass.last.clone(),
                coalesced: pass.coalesced,
                previous,
                state,
                skipped: true,
                applied: 0,
                overlay: None,
                failures: Vec::new(),
                generation: page.generation(),
            };
        }

        if previous != Some(state) {
            info!(
                target: "quietpage::reconcile",
                policy = %self.policy.name,
                from = previous.map(|s| s.as_str()).unwrap_or("none"),
                to = state.as_str(),
                path = page.location().path(),
                "page state changed"
            );
        }

        let mut ctx = ReconciliationContext::new(previous, state);
        let excluded = self.exclusions(&mut ctx);
        self.apply_match_rules(page, &excluded, &mut ctx);
        self.apply_text_rules(page, &excluded, &mut ctx);
        let overlay = self.reconcile_overlay(page, state);
        if let Some(ref marker) = self.marker {
            marker.write(page, state);
        }

        let generation = page.generation();
        self.last = Some(Checkpoint { state, generation });

        debug!(
            target: "quietpage::reconcile",
            trigger = pass.last.kind(),
            coalesced = pass.coalesced,
            state = state.as_str(),
            applied = ctx.applied,
            failures = ctx.failures.len(),
            "pass complete"
        );

        PassOutcome {
            trigger: pass.last.clone(),
            coalesced: pass.coalesced,
            previous,
            state,
            skipped: false,
            applied: ctx.applied,
            overlay,
            failures: ctx.failures,
            generation,
        }
    }

    /// Preserve rules plus the engine's own overlay.
    fn exclusions(&self, ctx: &mut ReconciliationContext) -> Vec<Matcher> {
        let mut out = Vec::with_capacity(self.policy.preserve_rules.len() + 1);
        for (i, rule) in self.policy.preserve_rules.iter().enumerate() {
            match compiled::compile(&rule.selector, "preserve") {
                Ok(m) => out.push(m),
                Err(err) => ctx.fail(format!("preserve_rules[{}]", i), err),
            }
        }
        if let Some(m) = matcher::get_or_compile(&format!("[{}]", OVERLAY_ATTR)) {
            out.push(m);
        }
        out
    }

    fn apply_match_rules(&self, page: &Page, excluded: &[Matcher], ctx: &mut ReconciliationContext) {
        for (i, rule) in self.policy.hide_rules.iter().enumerate() {
            if !rule.scope.applies_to(ctx.state) {
                continue;
            }
            let label = format!("hide_rules[{}]", i);
            let selector = match compiled::compile(&rule.selector, "hide") {
                Ok(m) => m,
                Err(err) => {
                    ctx.fail(label, err);
                    continue;
                }
            };
            let container = match rule.closest.as_deref().map(|c| compiled::compile(c, "closest")) {
                None => None,
                Some(Ok(m)) => Some(m),
                Some(Err(err)) => {
                    ctx.fail(label, err);
                    continue;
                }
            };

            for node in matcher::select_all(page.document(), &selector) {
                let target = match container {
                    Some(ref c) => match matcher::closest(&node, c) {
                        Some(target) => target,
                        None => continue,
                    },
                    None => node,
                };
                self.mutate(page, &target, rule.action, excluded, ctx);
            }
        }
    }

    fn apply_text_rules(&self, page: &Page, excluded: &[Matcher], ctx: &mut ReconciliationContext) {
        for (i, rule) in self.policy.text_rules.iter().enumerate() {
            if !rule.scope.applies_to(ctx.state) {
                continue;
            }
            let label = format!("text_rules[{}]", i);
            let within = match compiled::compile(&rule.within, "text candidates") {
                Ok(m) => m,
                Err(err) => {
                    ctx.fail(label, err);
                    continue;
                }
            };
            let container = match rule.closest.as_deref().map(|c| compiled::compile(c, "closest")) {
                None => None,
                Some(Ok(m)) => Some(m),
                Some(Err(err)) => {
                    ctx.fail(label, err);
                    continue;
                }
            };

            for candidate in matcher::select_all(page.document(), &within) {
                let text = matcher::own_text(&candidate);
                if !rule.texts.iter().any(|t| t == &text) {
                    continue;
                }
                let target = match container {
                    Some(ref c) => matcher::closest(&candidate, c),
                    None => matcher::ascend(&candidate, rule.max_ascent),
                };
                if let Some(target) = target {
                    self.mutate(page, &target, rule.action, excluded, ctx);
                }
            }
        }
    }

    fn mutate(
        &self,
        page: &Page,
        target: &NodeRef,
        action: Action,
        excluded: &[Matcher],
        ctx: &mut ReconciliationContext,
    ) {
        if !matcher::is_connected(page.document(), target) {
            return;
        }
        if matcher::is_preserved(target, excluded) {
            return;
        }
        if !ctx.claim(target) {
            return;
        }
        if self.mutator.apply(page, target, action).is_new() {
            ctx.applied += 1;
        }
    }

    /// Shows the overlay on blocked pages that have a message, hides it
    /// otherwise. Touches the DOM only when presence differs.
    fn reconcile_overlay(&self, page: &Page, state: PageState) -> Option<OverlayChange> {
        let template = match self.policy.message_template {
            Some(ref template) if state == PageState::Blocked => Some(template.as_str()),
            _ => None,
        };
        let shown = self.overlay.is_shown(page);
        match (template, shown) {
            (Some(template), false) => self
                .overlay
                .show(page, template)
                .then_some(OverlayChange::Shown),
            (None, true) => self.overlay.hide(page).then_some(OverlayChange::Hidden),
            _ => None,
        }
    }
}
