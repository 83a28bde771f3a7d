// ABOUTME: Process-wide cache of parsed policy selectors, including the ones the parser rejects.
// ABOUTME: Every rule, probe and overlay lookup goes through it, once per pass.

//! Selector cache.
//!
//! Policies are data, written against whatever the target site's markup
//! looks like this month, and the same selectors are re-evaluated on every
//! pass. Some of them will not parse here: a site table may use syntax the
//! selector engine does not support or simply carry a typo. Such a rule fails
//! on every pass for the rest of the session, so the rejection is cached
//! alongside the successes. A broken rule then costs one parse per process
//! and a map lookup per pass, and the caller still gets an
//! `InvalidSelector` error to record against the rule.

use std::collections::HashMap;
use std::sync::RwLock;

use dom_query::Matcher;
use once_cell::sync::Lazy;
use tracing::debug;

use crate::error::EngineError;

#[derive(Clone)]
enum Parsed {
    Ready(Matcher),
    /// Why the parser refused the selector.
    Rejected(String),
}

impl Parsed {
    fn parse(css: &str) -> Self {
        match Matcher::new(css) {
            Ok(matcher) => Parsed::Ready(matcher),
            Err(err) => {
                let reason = format!("{:?}", err);
                debug!(target: "quietpage::matcher", selector = css, reason = %reason, "selector rejected");
                Parsed::Rejected(reason)
            }
        }
    }

    fn matcher(&self) -> Option<Matcher> {
        match self {
            Parsed::Ready(matcher) => Some(matcher.clone()),
            Parsed::Rejected(_) => None,
        }
    }
}

static PARSED: Lazy<RwLock<HashMap<String, Parsed>>> = Lazy::new(|| RwLock::new(HashMap::new()));

fn lookup(css: &str) -> Parsed {
    if let Some(parsed) = PARSED.read().unwrap_or_else(|e| e.into_inner()).get(css) {
        return parsed.clone();
    }
    PARSED
        .write()
        .unwrap_or_else(|e| e.into_inner())
        .entry(css.to_string())
        .or_insert_with(|| Parsed::parse(css))
        .clone()
}

/// The compiled matcher for `css`, or `None` if it does not parse.
pub fn get_or_compile(css: &str) -> Option<Matcher> {
    lookup(css).matcher()
}

/// Like [`get_or_compile`], but reports a rejected selector as an
/// `InvalidSelector` error for `op`, with the parser's reason attached.
pub fn compile(css: &str, op: &str) -> Result<Matcher, EngineError> {
    match lookup(css) {
        Parsed::Ready(matcher) => Ok(matcher),
        Parsed::Rejected(reason) => Err(EngineError::invalid_selector(
            css,
            op,
            Some(anyhow::anyhow!(reason)),
        )),
    }
}

/// Parses a policy's selectors up front so the first pass after load finds
/// them all cached.
pub fn precompile_selectors<I, S>(selectors: I)
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut parsed = PARSED.write().unwrap_or_else(|e| e.into_inner());
    for css in selectors {
        let css = css.as_ref();
        if !parsed.contains_key(css) {
            parsed.insert(css.to_string(), Parsed::parse(css));
        }
    }
}
