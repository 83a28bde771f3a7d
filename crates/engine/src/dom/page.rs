// ABOUTME: Host page model: a live dom_query tree, session history, referrer and event dispatch.
// ABOUTME: Every child-list change bumps a generation counter and notifies subtree observers.

use std::cell::{Cell, RefCell};

use dom_query::{Document, NodeId, NodeRef};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::trace;
use url::Url;

use crate::dom::history::{History, HostSignal, SessionHistory};
use crate::error::EngineError;
use crate::matcher::{self, compiled};

/// A child-list change inside an observed subtree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MutationRecord {
    /// The element whose children changed.
    pub target: NodeId,
    pub added: usize,
    pub removed: usize,
    /// Page generation after the change.
    pub generation: u64,
}

struct Observer {
    root: NodeId,
    tx: UnboundedSender<MutationRecord>,
}

struct Listener {
    event: String,
    tx: UnboundedSender<HostSignal>,
}

/// The page a policy runs against.
///
/// All methods take `&self`: the page is shared between the host (the site's
/// own scripts) and the engine on one thread, as `Rc<Page>`.
pub struct Page {
    doc: Document,
    history: RefCell<Box<dyn History>>,
    referrer: Option<Url>,
    generation: Cell<u64>,
    observers: RefCell<Vec<Observer>>,
    listeners: RefCell<Vec<Listener>>,
}

impl std::fmt::Debug for Page {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Page")
            .field("location", self.history.borrow().current())
            .field("referrer", &self.referrer)
            .field("generation", &self.generation.get())
            .finish_non_exhaustive()
    }
}

impl Page {
    /// Creates a page at `url` from an HTML document.
    pub fn new(url: &str, html: &str) -> Result<Self, EngineError> {
        let location = Url::parse(url)
            .map_err(|e| EngineError::invalid_url(url, "load page", Some(e.into())))?;
        Ok(Self {
            doc: Document::from(html),
            history: RefCell::new(Box::new(SessionHistory::new(location))),
            referrer: None,
            generation: Cell::new(0),
            observers: RefCell::new(Vec::new()),
            listeners: RefCell::new(Vec::new()),
        })
    }

    /// Sets the document referrer the page was loaded with.
    pub fn referred_by(mut self, referrer: &str) -> Result<Self, EngineError> {
        let parsed = Url::parse(referrer)
            .map_err(|e| EngineError::invalid_url(referrer, "set referrer", Some(e.into())))?;
        self.referrer = Some(parsed);
        Ok(self)
    }

    pub fn document(&self) -> &Document {
        &self.doc
    }

    /// The current location.
    pub fn location(&self) -> Url {
        self.history.borrow().current().clone()
    }

    pub fn referrer(&self) -> Option<&Url> {
        self.referrer.as_ref()
    }

    /// Counter bumped by every child-list change.
    pub fn generation(&self) -> u64 {
        self.generation.get()
    }

    /// Serializes the whole document.
    pub fn html(&self) -> String {
        self.doc.html().to_string()
    }

    /// All elements matching `css`, in document order.
    pub fn query(&self, css: &str) -> Result<Vec<NodeRef<'_>>, EngineError> {
        let m = compiled::compile(css, "query")?;
        Ok(matcher::select_all(&self.doc, &m))
    }

    /// The first element matching `css`; `None` for no match or an invalid selector.
    pub fn first(&self, css: &str) -> Option<NodeRef<'_>> {
        self.query(css).ok().and_then(|nodes| nodes.into_iter().next())
    }

    /// Number of elements matching `css` (zero for an invalid selector).
    pub fn count(&self, css: &str) -> usize {
        self.query(css).map(|nodes| nodes.len()).unwrap_or(0)
    }

    // ------------------------------------------------------------------
    // Tree mutation
    // ------------------------------------------------------------------

    /// Appends parsed `html` to the first element matching `css`.
    /// Returns false if nothing matched.
    pub fn append_html(&self, css: &str, html: &str) -> Result<bool, EngineError> {
        let Some(parent) = self.query(css)?.into_iter().next() else {
            return Ok(false);
        };
        self.append_to(&parent, html);
        Ok(true)
    }

    /// Prepends parsed `html` to the first element matching `css`.
    pub fn prepend_html(&self, css: &str, html: &str) -> Result<bool, EngineError> {
        let Some(parent) = self.query(css)?.into_iter().next() else {
            return Ok(false);
        };
        self.prepend_to(&parent, html);
        Ok(true)
    }

    /// Replaces the children of the first element matching `css`.
    pub fn set_inner_html(&self, css: &str, html: &str) -> Result<bool, EngineError> {
        let Some(parent) = self.query(css)?.into_iter().next() else {
            return Ok(false);
        };
        let before = parent.children();
        for child in &before {
            child.remove_from_parent();
        }
        parent.append_html(html);
        let added = parent.children().len();
        self.record(&parent, added, before.len());
        Ok(true)
    }

    /// Detaches every element matching `css`. Returns how many were removed.
    pub fn remove(&self, css: &str) -> Result<usize, EngineError> {
        let nodes = self.query(css)?;
        let mut removed = 0;
        for node in &nodes {
            if self.detach(node) {
                removed += 1;
            }
        }
        Ok(removed)
    }

    pub fn append_to(&self, parent: &NodeRef, html: &str) {
        let before = parent.children().len();
        parent.append_html(html);
        let added = parent.children().len().saturating_sub(before);
        self.record(parent, added, 0);
    }

    pub fn prepend_to(&self, parent: &NodeRef, html: &str) {
        let before = parent.children().len();
        parent.prepend_html(html);
        let added = parent.children().len().saturating_sub(before);
        self.record(parent, added, 0);
    }

    /// Detaches `node` from its parent. Returns false if it was already detached.
    pub fn detach(&self, node: &NodeRef) -> bool {
        let Some(parent) = node.parent() else {
            return false;
        };
        node.remove_from_parent();
        self.record(&parent, 0, 1);
        true
    }

    /// Swaps `node` for parsed `html`. Returns false if `node` was detached.
    pub fn replace_with_html(&self, node: &NodeRef, html: &str) -> bool {
        let Some(parent) = node.parent() else {
            return false;
        };
        node.replace_with_html(html);
        self.record(&parent, 1, 1);
        true
    }

    /// Injects a `<style>` element into `<head>` (or the root element when
    /// there is no head yet). Idempotent per `id`.
    pub fn inject_style(&self, id: &str, css: &str) -> bool {
        if self.first(&format!("style#{}", id)).is_some() {
            return false;
        }
        let Some(container) = self.first("head").or_else(|| self.first("html")) else {
            return false;
        };
        self.append_to(&container, &format!("<style id=\"{}\">{}</style>", id, css));
        true
    }

    // ------------------------------------------------------------------
    // Observation
    // ------------------------------------------------------------------

    /// Subscribes to child-list changes at or below `root`.
    pub fn observe(&self, root: &NodeRef) -> UnboundedReceiver<MutationRecord> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.observers.borrow_mut().push(Observer { root: root.id, tx });
        rx
    }

    fn record(&self, target: &NodeRef, added: usize, removed: usize) {
        let generation = self.generation.get() + 1;
        self.generation.set(generation);
        let record = MutationRecord {
            target: target.id,
            added,
            removed,
            generation,
        };
        trace!(target: "quietpage::page", ?record, "child list changed");
        self.observers.borrow_mut().retain(|observer| {
            if !is_within(target, observer.root) {
                return !observer.tx.is_closed();
            }
            observer.tx.send(record).is_ok()
        });
    }

    // ------------------------------------------------------------------
    // Window events and history
    // ------------------------------------------------------------------

    /// Registers `tx` to receive `event` dispatches.
    pub fn add_event_listener(&self, event: impl Into<String>, tx: UnboundedSender<HostSignal>) {
        self.listeners.borrow_mut().push(Listener {
            event: event.into(),
            tx,
        });
    }

    /// Dispatches a window-level event to its listeners.
    pub fn dispatch_event(&self, event: &str) {
        self.listeners.borrow_mut().retain(|listener| {
            if listener.event != event {
                return !listener.tx.is_closed();
            }
            listener.tx.send(HostSignal::Event(event.to_string())).is_ok()
        });
    }

    /// `history.pushState` with a URL resolved against the current location.
    pub fn push_state(&self, url: &str) -> Result<bool, EngineError> {
        let resolved = self.resolve(url, "push_state")?;
        Ok(self.history.borrow_mut().push_state(resolved))
    }

    /// `history.replaceState` with a URL resolved against the current location.
    pub fn replace_state(&self, url: &str) -> Result<bool, EngineError> {
        let resolved = self.resolve(url, "replace_state")?;
        Ok(self.history.borrow_mut().replace_state(resolved))
    }

    /// `history.back()`; dispatches `popstate` when the entry changed.
    pub fn back(&self) -> bool {
        self.traverse(-1)
    }

    /// `history.forward()`; dispatches `popstate` when the entry changed.
    pub fn forward(&self) -> bool {
        self.traverse(1)
    }

    fn traverse(&self, delta: isize) -> bool {
        let moved = self.history.borrow_mut().go(delta);
        if moved {
            self.dispatch_event("popstate");
        }
        moved
    }

    /// Replaces the history object with a wrapper around it. This is the only
    /// seam through which navigation can be intercepted.
    pub fn wrap_history<F>(&self, wrap: F)
    where
        F: FnOnce(Box<dyn History>) -> Box<dyn History>,
    {
        let current = self.location();
        let mut slot = self.history.borrow_mut();
        let inner = std::mem::replace(&mut *slot, Box::new(SessionHistory::new(current)));
        *slot = wrap(inner);
    }

    fn resolve(&self, url: &str, op: &str) -> Result<Url, EngineError> {
        self.location()
            .join(url)
            .map_err(|e| EngineError::invalid_url(url, op, Some(e.into())))
    }
}

fn is_within(node: &NodeRef, root: NodeId) -> bool {
    let mut current = Some(node.clone());
    while let Some(candidate) = current {
        if candidate.id == root {
            return true;
        }
        current = candidate.parent();
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    const HTML: &str = r#"<html><head></head><body><main><div id="feed"></div></main><footer></footer></body></html>"#;

    #[test]
    fn host_mutations_bump_generation() {
        let page = Page::new("https://example.com/", HTML).unwrap();
        assert_eq!(page.generation(), 0);
        assert!(page.append_html("#feed", "<article>one</article>").unwrap());
        assert_eq!(page.generation(), 1);
        assert_eq!(page.count("article"), 1);
        assert_eq!(page.remove("article").unwrap(), 1);
        assert_eq!(page.generation(), 2);
        assert!(!page.append_html("#missing", "<p></p>").unwrap());
        assert_eq!(page.generation(), 2);
    }

    #[test]
    fn observers_only_see_their_subtree() {
        let page = Page::new("https://example.com/", HTML).unwrap();
        let main = page.first("main").unwrap();
        let mut rx = page.observe(&main);
        page.append_html("footer", "<p>outside</p>").unwrap();
        assert!(rx.try_recv().is_err());
        page.append_html("#feed", "<article>a</article><article>b</article>").unwrap();
        let record = rx.try_recv().unwrap();
        assert_eq!(record.added, 2);
        assert_eq!(record.generation, 2);
    }

    #[test]
    fn set_inner_html_reports_both_directions() {
        let page = Page::new("https://example.com/", HTML).unwrap();
        page.append_html("#feed", "<article>a</article>").unwrap();
        let body = page.first("body").unwrap();
        let mut rx = page.observe(&body);
        page.set_inner_html("#feed", "<p>x</p><p>y</p>").unwrap();
        let record = rx.try_recv().unwrap();
        assert_eq!((record.added, record.removed), (2, 1));
        assert_eq!(page.count("article"), 0);
    }

    #[test]
    fn back_dispatches_popstate() {
        let page = Page::new("https://example.com/", HTML).unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        page.add_event_listener("popstate", tx);
        page.push_state("/alice/").unwrap();
        assert_eq!(page.location().path(), "/alice/");
        assert!(rx.try_recv().is_err());
        assert!(page.back());
        assert_eq!(page.location().path(), "/");
        assert_eq!(rx.try_recv().unwrap(), HostSignal::Event("popstate".into()));
        assert!(page.forward());
        assert_eq!(page.location().path(), "/alice/");
    }

    #[test]
    fn inject_style_is_idempotent() {
        let page = Page::new("https://example.com/", HTML).unwrap();
        assert!(page.inject_style("guard", "aside { display: none !important; }"));
        assert!(!page.inject_style("guard", "aside { display: none !important; }"));
        assert_eq!(page.count("head > style#guard"), 1);
    }

    #[test]
    fn invalid_urls_are_reported() {
        assert!(Page::new("not a url", HTML).unwrap_err().is_invalid_url());
        let page = Page::new("https://example.com/", HTML).unwrap();
        assert!(page.referred_by("::").unwrap_err().is_invalid_url());
    }
}
