// ABOUTME: Structural and text matching helpers used by the classifier and the reconciler.
// ABOUTME: Provides selector matching, closest-container lookup, own-text extraction and bounded ascent.

//! Selector/text matching over the live page tree.
//!
//! Structural rules are CSS selectors compiled through [`compiled`]. Text rules
//! compare a node's *own* text (its direct text children, not its descendants)
//! so that a wrapper containing "Suggested for you" somewhere deep inside does
//! not itself match. Ascent from a text match is bounded by hop count and by
//! structural boundary tags, never by the document root.

pub mod compiled;

use dom_query::{Document, Matcher, NodeRef};

pub use compiled::{compile, get_or_compile, precompile_selectors};

/// Tags an ascent never steps onto.
pub const BOUNDARY_TAGS: &[&str] = &["main", "body", "section", "nav", "html"];

/// Returns true if `node` is an element matched by `matcher`.
pub fn matches(node: &NodeRef, matcher: &Matcher) -> bool {
    node.is_element() && node.is_match(matcher)
}

/// Returns the first of `node` and its ancestors matched by `matcher`.
pub fn closest<'a>(node: &NodeRef<'a>, matcher: &Matcher) -> Option<NodeRef<'a>> {
    let mut current = Some(node.clone());
    while let Some(candidate) = current {
        if matches(&candidate, matcher) {
            return Some(candidate);
        }
        current = candidate.parent();
    }
    None
}

/// Returns true if any descendant of `node` (excluding `node`) is matched.
pub fn has_descendant(node: &NodeRef, matcher: &Matcher) -> bool {
    let mut stack = node.children();
    while let Some(candidate) = stack.pop() {
        if matches(&candidate, matcher) {
            return true;
        }
        stack.extend(candidate.children());
    }
    false
}

/// Returns all elements in the document matched by `matcher`, in document order.
pub fn select_all<'a>(doc: &'a Document, matcher: &Matcher) -> Vec<NodeRef<'a>> {
    doc.select_matcher(matcher).nodes().to_vec()
}

/// Returns the concatenated, trimmed text of `node`'s direct text children.
pub fn own_text(node: &NodeRef) -> String {
    let mut text = String::new();
    for child in node.children() {
        if child.is_text() {
            text.push_str(&child.text());
        }
    }
    text.trim().to_string()
}

/// Returns true if `node` is a structural boundary an ascent must not cross.
pub fn is_boundary(node: &NodeRef) -> bool {
    if !node.is_element() {
        return true;
    }
    let tag = node
        .node_name()
        .map(|name| name.to_ascii_lowercase())
        .unwrap_or_default();
    if BOUNDARY_TAGS.contains(&tag.as_str()) {
        return true;
    }
    node.attr("role")
        .map(|role| role.eq_ignore_ascii_case("main"))
        .unwrap_or(false)
}

/// Walks up from `node` at most `max_ascent` hops, stopping below the first
/// boundary ancestor. Returns `None` if `node` is itself a boundary.
pub fn ascend<'a>(node: &NodeRef<'a>, max_ascent: usize) -> Option<NodeRef<'a>> {
    if is_boundary(node) {
        return None;
    }
    let mut current = node.clone();
    for _ in 0..max_ascent {
        match current.parent() {
            Some(parent) if !is_boundary(&parent) => current = parent,
            _ => break,
        }
    }
    Some(current)
}

/// Returns true if `node` is still reachable from the document root.
pub fn is_connected(doc: &Document, node: &NodeRef) -> bool {
    let root = doc.root().id;
    let mut current = Some(node.clone());
    while let Some(candidate) = current {
        if candidate.id == root {
            return true;
        }
        current = candidate.parent();
    }
    false
}

/// Returns true if `node`, one of its ancestors, or one of its descendants is
/// matched by any of `preserve`.
pub fn is_preserved(node: &NodeRef, preserve: &[Matcher]) -> bool {
    preserve
        .iter()
        .any(|m| closest(node, m).is_some() || has_descendant(node, m))
}

#[cfg(test)]
mod tests {
    use super::*;

    const FEED: &str = r#"
        <html><body>
            <main role="main">
                <section>
                    <div class="outer">
                        <div class="mid">
                            <div class="inner"><span id="label">Suggested for you</span></div>
                        </div>
                    </div>
                    <div id="wrapper"><div><span>Suggested for you</span></div> and more</div>
                </section>
            </main>
            <nav><a id="search" href="/search">Search</a></nav>
        </body></html>
    "#;

    fn first<'a>(doc: &'a Document, css: &str) -> NodeRef<'a> {
        let m = get_or_compile(css).unwrap();
        select_all(doc, &m).into_iter().next().unwrap()
    }

    #[test]
    fn own_text_excludes_descendants() {
        let doc = Document::from(FEED);
        let wrapper = first(&doc, "#wrapper");
        assert_eq!(own_text(&wrapper), "and more");
        let label = first(&doc, "#label");
        assert_eq!(own_text(&label), "Suggested for you");
    }

    #[test]
    fn ascend_stops_below_boundary() {
        let doc = Document::from(FEED);
        let label = first(&doc, "#label");
        let container = ascend(&label, 10).unwrap();
        assert_eq!(container.attr("class").as_deref(), Some("outer"));
    }

    #[test]
    fn ascend_respects_hop_limit() {
        let doc = Document::from(FEED);
        let label = first(&doc, "#label");
        let container = ascend(&label, 2).unwrap();
        assert_eq!(container.attr("class").as_deref(), Some("mid"));
        let same = ascend(&label, 0).unwrap();
        assert_eq!(same.attr("id").as_deref(), Some("label"));
    }

    #[test]
    fn ascend_from_boundary_is_none() {
        let doc = Document::from(FEED);
        let main = first(&doc, "main");
        assert!(ascend(&main, 3).is_none());
    }

    #[test]
    fn closest_includes_self_and_ancestors() {
        let doc = Document::from(FEED);
        let label = first(&doc, "#label");
        let outer = get_or_compile("div.outer").unwrap();
        let found = closest(&label, &outer).unwrap();
        assert_eq!(found.attr("class").as_deref(), Some("outer"));
        let span = get_or_compile("span").unwrap();
        assert_eq!(closest(&label, &span).unwrap().attr("id").as_deref(), Some("label"));
        let nav = get_or_compile("nav").unwrap();
        assert!(closest(&label, &nav).is_none());
    }

    #[test]
    fn preserved_by_ancestor_or_descendant() {
        let doc = Document::from(FEED);
        let keep = vec![get_or_compile("nav").unwrap()];
        let link = first(&doc, "#search");
        assert!(is_preserved(&link, &keep));
        let body = first(&doc, "body");
        assert!(is_preserved(&body, &keep));
        let label = first(&doc, "#label");
        assert!(!is_preserved(&label, &keep));
    }

    #[test]
    fn matches_supports_has_and_attribute_substring() {
        let doc = Document::from(
            r#"<div id="a" aria-label="Stories tray"><ul><li><canvas height="66"></canvas></li></ul></div>"#,
        );
        let node = first(&doc, "#a");
        assert!(matches(&node, &get_or_compile("div:has(> ul > li canvas)").unwrap()));
        assert!(matches(&node, &get_or_compile("[aria-label*=\"Stories\"]").unwrap()));
        assert!(!matches(&node, &get_or_compile("[aria-label=\"Stories\"]").unwrap()));
    }
}
