// ABOUTME: Built-in per-site content policies for the quietpage engine.
// ABOUTME: Re-exports the loader functions over the embedded policy table.

//! quietpage-sites - the policy tables for the sites quietpage ships with.
//!
//! # Example
//!
//! ```no_run
//! use std::rc::Rc;
//! use quietpage_engine::{EngineBuilder, Page};
//!
//! # async fn demo(html: &str) -> Result<(), quietpage_engine::EngineError> {
//! quietpage_engine::init_logging("quietpage=info");
//! let page = Rc::new(Page::new("https://www.instagram.com/", html)?);
//! if let Some(policy) = quietpage_sites::policy_for_host("www.instagram.com") {
//!     let runtime = EngineBuilder::new().build(Rc::clone(&page), policy)?;
//!     tokio::task::LocalSet::new().run_until(runtime.run()).await;
//! }
//! # Ok(())
//! # }
//! ```

pub mod loader;

pub use crate::loader::{builtin_policy, builtin_registry, load_builtin_policies, policy_for_host};
