// ABOUTME: Loader for the built-in per-site policies embedded as JSON.
// ABOUTME: Provides load_builtin_policies() and a shared lazily-built registry.

//! Built-in policy loader.
//!
//! The policy tables are data: they are compiled into the binary from
//! `data/policies.json` and parsed into a [`PolicyRegistry`] on first use.

use once_cell::sync::Lazy;
use quietpage_engine::{Policy, PolicyRegistry};
use tracing::debug;

/// Embedded JSON containing every built-in site policy.
const BUILTIN_POLICIES_JSON: &str = include_str!("../data/policies.json");

static BUILTIN: Lazy<PolicyRegistry> = Lazy::new(load_builtin_policies);

/// Loads the built-in policy registry from embedded JSON.
///
/// # Panics
///
/// Panics if the embedded JSON is malformed or cannot be deserialized.
pub fn load_builtin_policies() -> PolicyRegistry {
    let policies: Vec<Policy> =
        serde_json::from_str(BUILTIN_POLICIES_JSON).expect("failed to parse builtin policies");

    let mut registry = PolicyRegistry::new();
    for policy in policies {
        registry.register(policy);
    }
    debug!(target: "quietpage::sites", domains = registry.len(), "builtin policies loaded");
    registry
}

/// The shared built-in registry.
pub fn builtin_registry() -> &'static PolicyRegistry {
    &BUILTIN
}

/// A copy of the built-in policy named `name`.
pub fn builtin_policy(name: &str) -> Option<Policy> {
    BUILTIN.get(name).cloned()
}

/// A copy of the built-in policy for `host`, including subdomains.
pub fn policy_for_host(host: &str) -> Option<Policy> {
    BUILTIN.for_host(host).cloned()
}
