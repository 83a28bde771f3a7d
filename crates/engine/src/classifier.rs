// ABOUTME: Page classifier: a pure function from location, entry context and DOM probes to PageState.
// ABOUTME: Evaluates exemptions, then allow predicates, then block predicates, then the policy fallback.

use regex::{Regex, RegexBuilder};
use url::Url;

use crate::dom::Page;
use crate::error::EngineError;
use crate::matcher;
use crate::policy::{Exemption, PageState, PathMatch, PathPattern, Policy};

/// Result of a lightweight DOM probe. A partially rendered page may not be
/// able to answer, which is `Unknown`, never an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Probe {
    Present,
    Absent,
    Unknown,
}

/// Read-only DOM access the classifier is allowed to use.
pub trait DomProbe {
    fn probe(&self, selector: &str) -> Probe;
}

impl DomProbe for Page {
    fn probe(&self, selector: &str) -> Probe {
        let Some(m) = matcher::get_or_compile(selector) else {
            return Probe::Unknown;
        };
        if matcher::select_all(self.document(), &m).is_empty() {
            Probe::Absent
        } else {
            Probe::Present
        }
    }
}

/// How the visit started: captured once at bootstrap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryContext {
    pub referrer: Option<Url>,
    pub entry_url: Url,
}

impl EntryContext {
    pub fn new(entry_url: Url, referrer: Option<Url>) -> Self {
        Self {
            referrer,
            entry_url,
        }
    }

    pub fn from_page(page: &Page) -> Self {
        Self::new(page.location(), page.referrer().cloned())
    }

    /// True if there is no referrer or it is not under any of `internal_hosts`.
    pub fn is_external(&self, internal_hosts: &[String]) -> bool {
        let Some(host) = self.referrer.as_ref().and_then(|r| r.host_str()) else {
            return true;
        };
        let host = host.to_ascii_lowercase();
        !internal_hosts.iter().any(|internal| {
            let internal = internal.to_ascii_lowercase();
            host == internal || host.ends_with(&format!(".{}", internal))
        })
    }
}

/// A path predicate ready for matching against lowercased paths.
#[derive(Debug, Clone)]
enum CompiledPath {
    Prefix(String),
    Exact(String),
    Segment(String),
    Contains(String),
    Regex(Regex),
}

impl CompiledPath {
    fn compile(pattern: &PathPattern) -> Result<Self, EngineError> {
        let path = pattern.path().to_ascii_lowercase();
        Ok(match pattern.mode() {
            PathMatch::Prefix => CompiledPath::Prefix(path),
            PathMatch::Exact => CompiledPath::Exact(path),
            PathMatch::Segment => CompiledPath::Segment(path.trim_end_matches('/').to_string()),
            PathMatch::Contains => CompiledPath::Contains(path),
            PathMatch::Regex => {
                let re = RegexBuilder::new(pattern.path())
                    .case_insensitive(true)
                    .build()
                    .map_err(|e| {
                        EngineError::invalid_pattern(pattern.path(), "compile path", Some(e.into()))
                    })?;
                CompiledPath::Regex(re)
            }
        })
    }

    /// `path` must already be lowercased.
    fn is_match(&self, path: &str) -> bool {
        match self {
            CompiledPath::Prefix(p) => path.starts_with(p.as_str()),
            CompiledPath::Exact(p) => path == p,
            CompiledPath::Segment(p) => {
                path == p
                    || path
                        .strip_prefix(p.as_str())
                        .map(|rest| rest.starts_with('/'))
                        .unwrap_or(false)
            }
            CompiledPath::Contains(p) => path.contains(p.as_str()),
            CompiledPath::Regex(re) => re.is_match(path),
        }
    }
}

/// A set of compiled path predicates.
#[derive(Debug, Clone, Default)]
pub struct PathSet {
    paths: Vec<CompiledPath>,
}

impl PathSet {
    pub fn compile(patterns: &[PathPattern]) -> Result<Self, EngineError> {
        let paths = patterns
            .iter()
            .map(CompiledPath::compile)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { paths })
    }

    /// True if any predicate matches `path` (case-insensitive).
    pub fn matches(&self, path: &str) -> bool {
        let path = path.to_ascii_lowercase();
        self.paths.iter().any(|p| p.is_match(&path))
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

#[derive(Debug, Clone)]
enum CompiledExemption {
    ExternalDeepLink {
        internal_hosts: Vec<String>,
        entry_path: CompiledPath,
    },
    ElementPresent(String),
    Path(CompiledPath),
}

/// A policy's classification predicates, compiled once per runtime.
#[derive(Debug, Clone)]
pub struct Classifier {
    exemptions: Vec<CompiledExemption>,
    allow: PathSet,
    block: PathSet,
    fallback: PageState,
}

impl Classifier {
    pub fn new(policy: &Policy) -> Result<Self, EngineError> {
        let exemptions = policy
            .exemptions
            .iter()
            .map(|exemption| {
                Ok(match exemption {
                    Exemption::ExternalDeepLink {
                        internal_hosts,
                        entry_path,
                    } => CompiledExemption::ExternalDeepLink {
                        internal_hosts: internal_hosts.clone(),
                        entry_path: CompiledPath::compile(entry_path)?,
                    },
                    Exemption::ElementPresent { selector } => {
                        CompiledExemption::ElementPresent(selector.clone())
                    }
                    Exemption::Path { pattern } => {
                        CompiledExemption::Path(CompiledPath::compile(pattern)?)
                    }
                })
            })
            .collect::<Result<Vec<_>, EngineError>>()?;

        Ok(Self {
            exemptions,
            allow: PathSet::compile(&policy.allow_predicates)?,
            block: PathSet::compile(&policy.block_predicates)?,
            fallback: policy.fallback,
        })
    }

    /// Classifies the page at `location`.
    pub fn classify(&self, location: &Url, entry: &EntryContext, probe: &dyn DomProbe) -> PageState {
        let path = location.path().to_ascii_lowercase();

        if self.is_exempt(&path, entry, probe) {
            return PageState::Exempt;
        }
        if self.allow.matches(&path) {
            return PageState::Allowed;
        }
        if self.block.matches(&path) {
            return PageState::Blocked;
        }
        self.fallback
    }

    fn is_exempt(&self, path: &str, entry: &EntryContext, probe: &dyn DomProbe) -> bool {
        self.exemptions.iter().any(|exemption| match exemption {
            CompiledExemption::ExternalDeepLink {
                internal_hosts,
                entry_path,
            } => {
                let landed = entry.entry_url.path().to_ascii_lowercase();
                landed == path && entry_path.is_match(&landed) && entry.is_external(internal_hosts)
            }
            CompiledExemption::ElementPresent(selector) => probe.probe(selector) == Probe::Present,
            CompiledExemption::Path(pattern) => pattern.is_match(path),
        })
    }
}
