// ABOUTME: Main library entry point for the quietpage content-policy reconciliation engine.
// ABOUTME: Re-exports the public API: Page, Policy, PolicyRegistry, Runtime, EngineBuilder, EngineError.

//! quietpage - keeps a declarative content policy applied to a live,
//! self-rewriting page.
//!
//! A [`Policy`] says which pages are blocked and which regions of them to
//! hide, remove or replace. The engine classifies the current location,
//! mutates matching nodes, shows a notice on blocked pages and keeps all of
//! that correct while the site re-renders and navigates without reloading.
//!
//! # Example
//!
//! ```no_run
//! use std::rc::Rc;
//! use quietpage_engine::{init_logging, EngineBuilder, EngineError, Page, PolicyRegistry};
//!
//! # async fn demo(registry: PolicyRegistry, html: &str) -> Result<(), EngineError> {
//! // QUIETPAGE_LOG overrides the default filter.
//! init_logging("quietpage=info");
//! let page = Rc::new(Page::new("https://www.reddit.com/", html)?);
//! if let Some(policy) = registry.for_url(&page.location()).cloned() {
//!     let runtime = EngineBuilder::new().build(Rc::clone(&page), policy)?;
//!     tokio::task::LocalSet::new().run_until(runtime.run()).await;
//! }
//! # Ok(())
//! # }
//! ```

pub mod classifier;
pub mod debounce;
pub mod dom;
pub mod error;
pub mod matcher;
pub mod mutator;
pub mod navigation;
pub mod options;
pub mod overlay;
pub mod policy;
pub mod reconcile;
pub mod runtime;
pub mod telemetry;
pub mod watcher;

pub use crate::classifier::{Classifier, DomProbe, EntryContext, Probe};
pub use crate::debounce::{Debouncer, PendingPass, Trigger};
pub use crate::dom::{History, HostSignal, MutationRecord, Page, SessionHistory};
pub use crate::error::{EngineError, ErrorCode};
pub use crate::mutator::{Applied, DomMutator};
pub use crate::navigation::{NavigationTracker, ObservedHistory};
pub use crate::options::{EngineBuilder, EngineOptions};
pub use crate::overlay::{OverlayChange, OverlayManager, StateMarker};
pub use crate::policy::{
    Action, Exemption, MatchRule, OverlayPosition, OverlaySpec, PageState, PathMatch, PathPattern,
    Policy, PolicyRegistry, RuleScope, TextRule,
};
pub use crate::reconcile::{PassOutcome, ReconciliationContext, Reconciler, RuleFailure};
pub use crate::runtime::Runtime;
pub use crate::telemetry::init_logging;
pub use crate::watcher::MutationWatcher;
