// ABOUTME: Overlay manager for the singleton "blocked" notice and the page-state marker.
// ABOUTME: show/hide are idempotent by element id; callers decide when the overlay belongs on the page.

use tracing::debug;

use crate::dom::Page;
use crate::matcher;
use crate::mutator::DomMutator;
use crate::policy::{Action, OverlayPosition, OverlaySpec, PageState};

/// Attribute carried by the overlay root. Nothing inside it is ever mutated.
pub const OVERLAY_ATTR: &str = "data-quietpage-overlay";

/// What an overlay call changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlayChange {
    Shown,
    Hidden,
}

/// Presentation-only manager of one overlay node.
///
/// It does not know about page states: the reconciler only calls `show` for
/// `Blocked` pages.
#[derive(Debug, Clone)]
pub struct OverlayManager {
    spec: OverlaySpec,
    id_selector: String,
    concealer: DomMutator,
}

impl OverlayManager {
    pub fn new(spec: OverlaySpec, mark: &str) -> Self {
        let id_selector = format!("#{}", spec.id);
        Self {
            spec,
            id_selector,
            concealer: DomMutator::new(format!("{}-concealed", mark)),
        }
    }

    pub fn spec(&self) -> &OverlaySpec {
        &self.spec
    }

    /// True if the overlay node is in the page.
    pub fn is_shown(&self, page: &Page) -> bool {
        page.first(&self.id_selector).is_some()
    }

    /// Inserts the overlay with `template` as its content. Returns false if
    /// it was already shown or the anchor does not exist yet.
    pub fn show(&self, page: &Page, template: &str) -> bool {
        if self.is_shown(page) {
            return false;
        }
        let Some(anchor) = page.first(&self.spec.anchor) else {
            debug!(
                target: "quietpage::overlay",
                anchor = %self.spec.anchor,
                "overlay anchor not rendered yet"
            );
            return false;
        };
        self.conceal(page);
        let html = format!(
            "<div id=\"{}\" {}=\"\">{}</div>",
            self.spec.id, OVERLAY_ATTR, template
        );
        match self.spec.position {
            OverlayPosition::Prepend => page.prepend_to(&anchor, &html),
            OverlayPosition::Append => page.append_to(&anchor, &html),
        }
        true
    }

    /// Removes the overlay and restores concealed content. Returns false if
    /// there was no overlay.
    pub fn hide(&self, page: &Page) -> bool {
        let nodes = match page.query(&self.id_selector) {
            Ok(nodes) => nodes,
            Err(_) => return false,
        };
        let mut removed = false;
        for node in &nodes {
            removed |= page.detach(node);
        }
        if removed {
            self.reveal(page);
        }
        removed
    }

    fn conceal(&self, page: &Page) {
        let Some(ref css) = self.spec.conceal else {
            return;
        };
        if let Ok(nodes) = page.query(css) {
            for node in &nodes {
                self.concealer.apply(page, node, Action::Hide);
            }
        }
    }

    fn reveal(&self, page: &Page) {
        let selector = format!("[{}]", self.concealer.mark());
        let Some(m) = matcher::get_or_compile(&selector) else {
            return;
        };
        for node in matcher::select_all(page.document(), &m) {
            self.concealer.retract(&node);
        }
    }
}

/// Writes the current page state on `<body>` so stylesheets can key off it.
#[derive(Debug, Clone)]
pub struct StateMarker {
    attribute: String,
}

impl StateMarker {
    pub fn new(attribute: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
        }
    }

    /// Returns false if there is no `<body>` yet or it already carries `state`.
    pub fn write(&self, page: &Page, state: PageState) -> bool {
        let Some(body) = page.first("body") else {
            return false;
        };
        if body.attr(&self.attribute).as_deref() == Some(state.as_str()) {
            return false;
        }
        body.set_attr(&self.attribute, state.as_str());
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HTML: &str = r#"<body><main role="main"><section><main class="inner">feed</main></section></main></body>"#;

    fn page() -> Page {
        Page::new("https://www.instagram.com/", HTML).unwrap()
    }

    fn spec() -> OverlaySpec {
        OverlaySpec {
            id: "blocker-message".into(),
            anchor: "main[role=\"main\"]".into(),
            position: OverlayPosition::Prepend,
            conceal: Some("section > main".into()),
        }
    }

    #[test]
    fn show_and_hide_are_idempotent() {
        let page = page();
        let overlay = OverlayManager::new(spec(), "data-quietpage-ig");

        assert!(overlay.show(&page, "Feed blocked"));
        assert!(!overlay.show(&page, "Feed blocked"));
        assert_eq!(page.count("#blocker-message"), 1);
        assert_eq!(page.count("main[role=\"main\"] > #blocker-message:first-child"), 1);

        assert!(overlay.hide(&page));
        assert!(!overlay.hide(&page));
        assert_eq!(page.count("#blocker-message"), 0);
    }

    #[test]
    fn conceal_is_restored_on_hide() {
        let page = page();
        let overlay = OverlayManager::new(spec(), "data-quietpage-ig");
        overlay.show(&page, "Feed blocked");
        let inner = page.first("main.inner").unwrap();
        assert!(inner.attr("style").unwrap().contains("visibility: hidden !important"));

        overlay.hide(&page);
        let inner = page.first("main.inner").unwrap();
        assert!(inner.attr("style").is_none());
    }

    #[test]
    fn missing_anchor_is_transient() {
        let page = Page::new("https://www.instagram.com/", "<body><div id=\"loading\"></div></body>").unwrap();
        let overlay = OverlayManager::new(spec(), "data-quietpage-ig");
        assert!(!overlay.show(&page, "Feed blocked"));
        assert!(!overlay.is_shown(&page));

        page.set_inner_html("body", HTML).unwrap();
        assert!(overlay.show(&page, "Feed blocked"));
    }

    #[test]
    fn state_marker_writes_body_attribute() {
        let page = page();
        let marker = StateMarker::new("data-page");
        assert!(marker.write(&page, PageState::Blocked));
        assert_eq!(page.first("body").unwrap().attr("data-page").as_deref(), Some("blocked"));
        assert!(!marker.write(&page, PageState::Blocked));
        assert!(marker.write(&page, PageState::Exempt));
        assert_eq!(page.first("body").unwrap().attr("data-page").as_deref(), Some("exempt"));
    }
}
