// ABOUTME: DOM mutator applying Hide, Remove and ReplaceWithPlaceholder idempotently.
// ABOUTME: The processed-mark attribute is written in the same synchronous step as the mutation.

use dom_query::NodeRef;
use tracing::trace;

use crate::dom::Page;
use crate::policy::Action;

/// Inline declarations written by `Hide`. Host sites ship their own inline
/// and class styles, so every declaration is `!important`.
pub const HIDE_STYLE: &str =
    "display: none !important; visibility: hidden !important; pointer-events: none !important;";

/// What `apply` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Applied,
    AlreadyApplied,
}

impl Applied {
    pub fn is_new(&self) -> bool {
        matches!(self, Applied::Applied)
    }
}

/// Applies policy actions to nodes, tagging each with the processed mark.
#[derive(Debug, Clone)]
pub struct DomMutator {
    mark: String,
    style_backup: String,
}

impl DomMutator {
    /// `mark` is the processed-mark attribute name, e.g. `data-quietpage-reddit`.
    pub fn new(mark: impl Into<String>) -> Self {
        let mark = mark.into();
        let style_backup = format!("{}-style", mark);
        Self { mark, style_backup }
    }

    pub fn mark(&self) -> &str {
        &self.mark
    }

    /// True if `node` already carries this mutator's mark.
    pub fn is_processed(&self, node: &NodeRef) -> bool {
        node.has_attr(&self.mark)
    }

    /// Applies `action` to `node`. A node already processed (or, for
    /// `Remove`, already detached) is left untouched.
    pub fn apply(&self, page: &Page, node: &NodeRef, action: Action) -> Applied {
        if self.is_processed(node) {
            return Applied::AlreadyApplied;
        }
        let applied = match action {
            Action::Hide => self.hide(node),
            Action::Remove => self.remove(page, node),
            Action::ReplaceWithPlaceholder => self.replace(page, node),
        };
        if applied.is_new() {
            trace!(target: "quietpage::mutator", action = action.as_str(), "applied");
        }
        applied
    }

    /// Undoes `Hide` on `node` and clears the mark. Returns false if the
    /// node was not hidden by us.
    ///
    /// The inline style is restored only while it is still exactly what
    /// `hide` wrote. If another mutator hid the node on top of us, or the
    /// host rewrote the style, the current style stays: restoring our backup
    /// would silently undo a mutation whose mark is still on the node.
    pub fn retract(&self, node: &NodeRef) -> bool {
        match node.attr(&self.mark) {
            Some(value) if &*value == Action::Hide.as_str() => {}
            _ => return false,
        }
        let original = node.attr(&self.style_backup).map(|s| s.to_string());
        let current = node.attr("style").map(|s| s.to_string());
        if current.as_deref() == Some(hidden_style(original.as_deref()).as_str()) {
            match original {
                Some(ref original) => node.set_attr("style", original),
                None => node.remove_attr("style"),
            }
        } else {
            trace!(target: "quietpage::mutator", mark = %self.mark, "style changed since hide; left in place");
        }
        node.remove_attr(&self.style_backup);
        node.remove_attr(&self.mark);
        true
    }

    fn hide(&self, node: &NodeRef) -> Applied {
        let existing = node
            .attr("style")
            .map(|s| s.to_string())
            .filter(|s| !s.trim().is_empty());
        if let Some(ref existing) = existing {
            node.set_attr(&self.style_backup, existing);
        }
        let style = hidden_style(existing.as_deref());
        node.set_attr("style", &style);
        node.set_attr(&self.mark, Action::Hide.as_str());
        Applied::Applied
    }

    fn remove(&self, page: &Page, node: &NodeRef) -> Applied {
        if node.parent().is_none() {
            return Applied::AlreadyApplied;
        }
        node.set_attr(&self.mark, Action::Remove.as_str());
        page.detach(node);
        Applied::Applied
    }

    fn replace(&self, page: &Page, node: &NodeRef) -> Applied {
        if node.parent().is_none() {
            return Applied::AlreadyApplied;
        }
        let class = node
            .attr("class")
            .map(|c| format!(" class=\"{}\"", escape_attr(&c)))
            .unwrap_or_default();
        let placeholder = format!(
            "<span{} {}=\"{}\">{}</span>",
            class,
            self.mark,
            Action::ReplaceWithPlaceholder.as_str(),
            node.inner_html()
        );
        page.replace_with_html(node, &placeholder);
        Applied::Applied
    }
}

/// The inline style `hide` writes over `existing`.
fn hidden_style(existing: Option<&str>) -> String {
    match existing {
        Some(existing) => format!("{}; {}", existing.trim().trim_end_matches(';'), HIDE_STYLE),
        None => HIDE_STYLE.to_string(),
    }
}

fn escape_attr(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}
