// ABOUTME: Registry for looking up per-site policies by host name.
// ABOUTME: Supports exact host hits and subdomains of a policy's listed domains.

use std::collections::HashMap;

use url::Url;

use crate::error::EngineError;
use crate::policy::Policy;

/// Registry for looking up policies by domain.
#[derive(Debug, Default, Clone)]
pub struct PolicyRegistry {
    policies: Vec<Policy>,
    by_domain: HashMap<String, usize>,
}

impl PolicyRegistry {
    /// Creates a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a JSON array of policies into a registry.
    pub fn from_json(json: &str) -> Result<Self, EngineError> {
        let policies: Vec<Policy> = serde_json::from_str(json)
            .map_err(|e| EngineError::invalid_policy("<json>", "load policies", Some(e.into())))?;
        let mut registry = Self::new();
        for policy in policies {
            registry.register(policy);
        }
        Ok(registry)
    }

    /// Registers a policy under each of its domains. A later registration for
    /// the same domain replaces the earlier one.
    pub fn register(&mut self, policy: Policy) {
        let index = self.policies.len();
        for domain in &policy.domains {
            self.by_domain.insert(domain.to_ascii_lowercase(), index);
        }
        self.policies.push(policy);
    }

    /// Looks up a policy by its registered name.
    pub fn get(&self, name: &str) -> Option<&Policy> {
        self.policies.iter().rev().find(|p| p.name == name)
    }

    /// Looks up a policy for a host: an exact domain hit first, then the
    /// closest registered parent domain (`old.reddit.com` → `reddit.com`).
    pub fn for_host(&self, host: &str) -> Option<&Policy> {
        let host = host.trim_end_matches('.').to_ascii_lowercase();
        let mut candidate = host.as_str();
        loop {
            if let Some(&index) = self.by_domain.get(candidate) {
                return self.policies.get(index);
            }
            match candidate.split_once('.') {
                Some((_, rest)) if rest.contains('.') => candidate = rest,
                _ => return None,
            }
        }
    }

    /// Looks up a policy for the host of `url`.
    pub fn for_url(&self, url: &Url) -> Option<&Policy> {
        url.host_str().and_then(|host| self.for_host(host))
    }

    /// Returns the number of registered domain mappings.
    pub fn len(&self) -> usize {
        self.by_domain.len()
    }

    /// Returns true if no policies are registered.
    pub fn is_empty(&self) -> bool {
        self.by_domain.is_empty()
    }

    /// Iterates over registered policies in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &Policy> {
        self.policies.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(name: &str, domains: &[&str]) -> Policy {
        let mut p = Policy::new(name);
        p.domains = domains.iter().map(|d| d.to_string()).collect();
        p
    }

    #[test]
    fn exact_and_subdomain_lookup() {
        let mut registry = PolicyRegistry::new();
        registry.register(policy("reddit", &["reddit.com", "www.reddit.com"]));
        assert_eq!(registry.for_host("www.reddit.com").unwrap().name, "reddit");
        assert_eq!(registry.for_host("old.reddit.com").unwrap().name, "reddit");
        assert_eq!(registry.for_host("REDDIT.COM.").unwrap().name, "reddit");
        assert!(registry.for_host("notreddit.com").is_none());
        assert!(registry.for_host("com").is_none());
    }

    #[test]
    fn lookup_by_url_and_name() {
        let mut registry = PolicyRegistry::new();
        registry.register(policy("wikipedia", &["wikipedia.org"]));
        let url = Url::parse("https://en.wikipedia.org/wiki/Rust").unwrap();
        assert_eq!(registry.for_url(&url).unwrap().name, "wikipedia");
        assert!(registry.get("wikipedia").is_some());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn from_json_rejects_malformed_input() {
        let err = PolicyRegistry::from_json("{not json").unwrap_err();
        assert!(err.is_invalid_policy());
        let ok = PolicyRegistry::from_json(r#"[{"name": "x", "domains": ["x.com"]}]"#).unwrap();
        assert!(!ok.is_empty());
    }
}
