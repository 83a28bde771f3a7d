// ABOUTME: Declarative per-site policy data model: path predicates, match rules, text rules, overlay.
// ABOUTME: All types are serde-deserializable so site tables can live in JSON outside the engine.

//! Per-site content policies.
//!
//! A [`Policy`] is pure data. The engine consumes it read-only: the classifier
//! reads the path predicates and exemptions, the reconciler reads the rule
//! lists, the overlay manager reads the overlay spec and message template.

pub mod registry;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use registry::PolicyRegistry;

/// The classification of the current page under a policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PageState {
    Blocked,
    #[default]
    Allowed,
    /// Policy-defined carve-out from an otherwise blocked page.
    Exempt,
}

impl PageState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PageState::Blocked => "blocked",
            PageState::Allowed => "allowed",
            PageState::Exempt => "exempt",
        }
    }
}

impl fmt::Display for PageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a path predicate compares against the location path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PathMatch {
    #[default]
    Prefix,
    Exact,
    /// `path == p` or `path` starts with `p + "/"`.
    Segment,
    Contains,
    Regex,
}

/// A detailed path predicate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathRule {
    pub path: String,
    #[serde(default, rename = "match")]
    pub mode: PathMatch,
}

/// A path predicate: a bare string is a case-insensitive prefix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathPattern {
    Prefix(String),
    Rule(PathRule),
}

impl PathPattern {
    pub fn new(path: impl Into<String>, mode: PathMatch) -> Self {
        PathPattern::Rule(PathRule {
            path: path.into(),
            mode,
        })
    }

    pub fn path(&self) -> &str {
        match self {
            PathPattern::Prefix(p) => p,
            PathPattern::Rule(r) => &r.path,
        }
    }

    pub fn mode(&self) -> PathMatch {
        match self {
            PathPattern::Prefix(_) => PathMatch::Prefix,
            PathPattern::Rule(r) => r.mode,
        }
    }
}

/// What the mutator does to a matched node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    #[default]
    Hide,
    Remove,
    #[serde(rename = "replace")]
    ReplaceWithPlaceholder,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Hide => "hide",
            Action::Remove => "remove",
            Action::ReplaceWithPlaceholder => "replace",
        }
    }
}

/// The page states in which a rule applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RuleScope {
    /// Only while the page classifies `Blocked`.
    #[default]
    Blocked,
    /// In every state, including `Allowed` and `Exempt`.
    Always,
}

impl RuleScope {
    pub fn applies_to(&self, state: PageState) -> bool {
        match self {
            RuleScope::Blocked => state == PageState::Blocked,
            RuleScope::Always => true,
        }
    }
}

/// A structural rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RuleDef")]
pub struct MatchRule {
    pub selector: String,
    pub action: Action,
    /// Ascend from each match to the nearest ancestor-or-self matching this
    /// selector; matches without such a container are dropped.
    pub closest: Option<String>,
    pub scope: RuleScope,
}

impl MatchRule {
    pub fn hide(selector: impl Into<String>) -> Self {
        Self {
            selector: selector.into(),
            action: Action::Hide,
            closest: None,
            scope: RuleScope::Blocked,
        }
    }

    pub fn with_action(mut self, action: Action) -> Self {
        self.action = action;
        self
    }

    pub fn with_closest(mut self, closest: impl Into<String>) -> Self {
        self.closest = Some(closest.into());
        self
    }

    pub fn with_scope(mut self, scope: RuleScope) -> Self {
        self.scope = scope;
        self
    }
}

/// Wire shape of a [`MatchRule`]: a bare selector or a full object.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum RuleDef {
    Css(String),
    Full {
        selector: String,
        #[serde(default)]
        action: Action,
        #[serde(default)]
        closest: Option<String>,
        #[serde(default)]
        scope: RuleScope,
    },
}

impl From<RuleDef> for MatchRule {
    fn from(def: RuleDef) -> Self {
        match def {
            RuleDef::Css(selector) => MatchRule::hide(selector),
            RuleDef::Full {
                selector,
                action,
                closest,
                scope,
            } => MatchRule {
                selector,
                action,
                closest,
                scope,
            },
        }
    }
}

fn default_text_within() -> String {
    "span".to_string()
}

/// Matches elements whose own text equals one of `texts`, then acts on a
/// container found by bounded ascent (or by `closest`, when given).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextRule {
    pub texts: Vec<String>,
    #[serde(default = "default_text_within")]
    pub within: String,
    #[serde(default)]
    pub max_ascent: usize,
    #[serde(default)]
    pub closest: Option<String>,
    #[serde(default)]
    pub action: Action,
    #[serde(default)]
    pub scope: RuleScope,
}

impl TextRule {
    pub fn new<I, S>(texts: I, max_ascent: usize) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            texts: texts.into_iter().map(Into::into).collect(),
            within: default_text_within(),
            max_ascent,
            closest: None,
            action: Action::Hide,
            scope: RuleScope::Blocked,
        }
    }

    pub fn with_scope(mut self, scope: RuleScope) -> Self {
        self.scope = scope;
        self
    }

    pub fn with_within(mut self, within: impl Into<String>) -> Self {
        self.within = within.into();
        self
    }
}

/// A carve-out evaluated before every path predicate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Exemption {
    /// The visit arrived from outside the site, landed on a path matching
    /// `entry_path`, and has not navigated away from that path since.
    ExternalDeepLink {
        internal_hosts: Vec<String>,
        entry_path: PathPattern,
    },
    /// An element matching `selector` is present in the page.
    ElementPresent { selector: String },
    /// The current path matches `pattern`.
    Path { pattern: PathPattern },
}

/// Where the overlay is inserted relative to its anchor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OverlayPosition {
    Prepend,
    #[default]
    Append,
}

fn default_overlay_id() -> String {
    "quietpage-blocked".to_string()
}

fn default_overlay_anchor() -> String {
    "body".to_string()
}

/// Placement of the singleton "blocked" notice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverlaySpec {
    #[serde(default = "default_overlay_id")]
    pub id: String,
    #[serde(default = "default_overlay_anchor")]
    pub anchor: String,
    #[serde(default)]
    pub position: OverlayPosition,
    /// Content hidden while the overlay is shown and restored afterwards.
    #[serde(default)]
    pub conceal: Option<String>,
}

impl Default for OverlaySpec {
    fn default() -> Self {
        Self {
            id: default_overlay_id(),
            anchor: default_overlay_anchor(),
            position: OverlayPosition::default(),
            conceal: None,
        }
    }
}

fn default_periodic_interval_ms() -> u64 {
    2000
}

fn default_debounce_ms() -> u64 {
    100
}

/// A complete per-site policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
    pub name: String,
    #[serde(default)]
    pub domains: Vec<String>,
    #[serde(default)]
    pub block_predicates: Vec<PathPattern>,
    #[serde(default)]
    pub allow_predicates: Vec<PathPattern>,
    #[serde(default)]
    pub exemptions: Vec<Exemption>,
    /// State for paths no predicate matches.
    #[serde(default)]
    pub fallback: PageState,
    #[serde(default)]
    pub hide_rules: Vec<MatchRule>,
    #[serde(default)]
    pub preserve_rules: Vec<MatchRule>,
    #[serde(default)]
    pub text_rules: Vec<TextRule>,
    #[serde(default)]
    pub message_template: Option<String>,
    #[serde(default)]
    pub overlay: OverlaySpec,
    #[serde(default)]
    pub navigation_event_names: Vec<String>,
    /// History entries the page is never allowed to push or replace to.
    #[serde(default)]
    pub guarded_navigations: Vec<PathPattern>,
    /// Stylesheet injected before first render as a flicker guard.
    #[serde(default)]
    pub critical_css: Option<String>,
    /// Attribute written on `<body>` with the current page state.
    #[serde(default)]
    pub state_attribute: Option<String>,
    #[serde(default = "default_periodic_interval_ms")]
    pub periodic_interval_ms: u64,
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

impl Policy {
    /// Creates an empty policy that allows every page.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            domains: Vec::new(),
            block_predicates: Vec::new(),
            allow_predicates: Vec::new(),
            exemptions: Vec::new(),
            fallback: PageState::Allowed,
            hide_rules: Vec::new(),
            preserve_rules: Vec::new(),
            text_rules: Vec::new(),
            message_template: None,
            overlay: OverlaySpec::default(),
            navigation_event_names: Vec::new(),
            guarded_navigations: Vec::new(),
            critical_css: None,
            state_attribute: None,
            periodic_interval_ms: default_periodic_interval_ms(),
            debounce_ms: default_debounce_ms(),
        }
    }

    /// Every selector the policy evaluates, for cache warm-up.
    pub fn selectors(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        for rule in self.hide_rules.iter().chain(&self.preserve_rules) {
            out.push(&rule.selector);
            if let Some(ref closest) = rule.closest {
                out.push(closest);
            }
        }
        for rule in &self.text_rules {
            out.push(&rule.within);
            if let Some(ref closest) = rule.closest {
                out.push(closest);
            }
        }
        for exemption in &self.exemptions {
            if let Exemption::ElementPresent { selector } = exemption {
                out.push(selector);
            }
        }
        out.push(&self.overlay.anchor);
        if let Some(ref conceal) = self.overlay.conceal {
            out.push(conceal);
        }
        out
    }
}
