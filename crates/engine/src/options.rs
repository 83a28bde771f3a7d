// ABOUTME: Runtime configuration: EngineOptions and the fluent EngineBuilder.
// ABOUTME: Durations left unset fall back to the policy's own debounce and periodic intervals.

use std::rc::Rc;
use std::time::Duration;

use crate::dom::Page;
use crate::error::EngineError;
use crate::policy::Policy;
use crate::runtime::Runtime;

/// Prefix of the default processed-mark attribute.
pub const MARK_PREFIX: &str = "data-quietpage-";

/// Default max wait of a debounced burst, in debounce windows.
pub const MAX_WAIT_WINDOWS: u32 = 5;

/// Configuration options for one engine instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineOptions {
    /// Processed-mark attribute. Defaults to `data-quietpage-<policy name>`.
    pub mark_attribute: Option<String>,
    /// Element the mutation watcher attaches to.
    pub attach_selector: String,
    pub attach_retry: Duration,
    /// Delay of the URL-equality poll that follows every host signal.
    pub url_poll_delay: Duration,
    pub debounce: Option<Duration>,
    /// Longest a continuous burst may postpone its pass. Defaults to
    /// `MAX_WAIT_WINDOWS` debounce windows.
    pub debounce_max_wait: Option<Duration>,
    pub periodic_interval: Option<Duration>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            mark_attribute: None,
            attach_selector: "body".to_string(),
            attach_retry: Duration::from_millis(10),
            url_poll_delay: Duration::from_millis(100),
            debounce: None,
            debounce_max_wait: None,
            periodic_interval: None,
        }
    }
}

impl EngineOptions {
    /// The mark attribute for `policy`.
    pub fn mark_for(&self, policy: &Policy) -> String {
        match self.mark_attribute {
            Some(ref mark) => mark.clone(),
            None => format!("{}{}", MARK_PREFIX, sanitize(&policy.name)),
        }
    }

    /// Element id of the injected critical stylesheet for `policy`.
    pub fn critical_style_id(&self, policy: &Policy) -> String {
        format!("quietpage-critical-{}", sanitize(&policy.name))
    }

    pub fn debounce_for(&self, policy: &Policy) -> Duration {
        self.debounce
            .unwrap_or_else(|| Duration::from_millis(policy.debounce_ms))
    }

    pub fn max_wait_for(&self, policy: &Policy) -> Duration {
        self.debounce_max_wait
            .unwrap_or_else(|| self.debounce_for(policy) * MAX_WAIT_WINDOWS)
    }

    pub fn periodic_for(&self, policy: &Policy) -> Duration {
        self.periodic_interval
            .unwrap_or_else(|| Duration::from_millis(policy.periodic_interval_ms))
    }
}

/// Attribute names only allow a narrow alphabet; policy names like
/// `smol.ai` are folded into it.
fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect()
}

/// Builder for constructing [`Runtime`] instances with custom configuration.
#[derive(Debug, Clone)]
pub struct EngineBuilder {
    opts: EngineOptions,
}

impl EngineBuilder {
    /// Create a new EngineBuilder with default options.
    pub fn new() -> Self {
        Self {
            opts: EngineOptions::default(),
        }
    }

    /// Set the processed-mark attribute.
    pub fn mark_attribute(mut self, mark: impl Into<String>) -> Self {
        self.opts.mark_attribute = Some(mark.into());
        self
    }

    /// Set the element the mutation watcher attaches to.
    pub fn attach_selector(mut self, selector: impl Into<String>) -> Self {
        self.opts.attach_selector = selector.into();
        self
    }

    pub fn attach_retry(mut self, interval: Duration) -> Self {
        self.opts.attach_retry = interval;
        self
    }

    pub fn url_poll_delay(mut self, delay: Duration) -> Self {
        self.opts.url_poll_delay = delay;
        self
    }

    /// Override the policy's debounce window.
    pub fn debounce(mut self, window: Duration) -> Self {
        self.opts.debounce = Some(window);
        self
    }

    /// Bound how long a continuous burst of triggers can delay a pass.
    pub fn debounce_max_wait(mut self, max_wait: Duration) -> Self {
        self.opts.debounce_max_wait = Some(max_wait);
        self
    }

    /// Override the policy's safety-tick interval.
    pub fn periodic_interval(mut self, interval: Duration) -> Self {
        self.opts.periodic_interval = Some(interval);
        self
    }

    pub fn options(&self) -> &EngineOptions {
        &self.opts
    }

    /// Build a runtime for `policy` on `page`.
    pub fn build(self, page: Rc<Page>, policy: Policy) -> Result<Runtime, EngineError> {
        Runtime::new(page, policy, self.opts)
    }
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn defaults_follow_the_policy() {
        let mut policy = Policy::new("smol.ai");
        policy.debounce_ms = 250;
        let opts = EngineOptions::default();
        assert_eq!(opts.mark_for(&policy), "data-quietpage-smol-ai");
        assert_eq!(opts.critical_style_id(&policy), "quietpage-critical-smol-ai");
        assert_eq!(opts.debounce_for(&policy), Duration::from_millis(250));
        assert_eq!(opts.max_wait_for(&policy), Duration::from_millis(1250));
        assert_eq!(opts.periodic_for(&policy), Duration::from_millis(2000));
        assert_eq!(opts.attach_selector, "body");
    }

    #[test]
    fn builder_overrides() {
        let builder = EngineBuilder::new()
            .mark_attribute("data-x")
            .debounce(Duration::from_millis(50))
            .debounce_max_wait(Duration::from_millis(400))
            .periodic_interval(Duration::from_secs(1))
            .attach_selector("#app");
        let policy = Policy::new("x");
        let opts = builder.options();
        assert_eq!(opts.mark_for(&policy), "data-x");
        assert_eq!(opts.debounce_for(&policy), Duration::from_millis(50));
        assert_eq!(opts.max_wait_for(&policy), Duration::from_millis(400));
        assert_eq!(opts.periodic_for(&policy), Duration::from_secs(1));
        assert_eq!(opts.attach_selector, "#app");
    }
}
