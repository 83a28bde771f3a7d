// ABOUTME: Session history model for the host page and the signals it can raise.
// ABOUTME: History is a trait so navigation observers can wrap it at a single seam.

use url::Url;

/// A signal raised by the host page towards whoever listens to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostSignal {
    /// A history entry was pushed (after it was committed).
    HistoryPush(Url),
    /// The current history entry was replaced.
    HistoryReplace(Url),
    /// A window-level event was dispatched (`popstate`, site-specific names).
    Event(String),
}

/// The page's session history: the two mutation entry points plus traversal.
///
/// Implementations return whether the operation changed the history.
pub trait History {
    fn current(&self) -> &Url;
    fn push_state(&mut self, url: Url) -> bool;
    fn replace_state(&mut self, url: Url) -> bool;
    /// Moves `delta` entries back (negative) or forward (positive).
    fn go(&mut self, delta: isize) -> bool;
}

/// The plain browser-like history stack.
#[derive(Debug, Clone)]
pub struct SessionHistory {
    entries: Vec<Url>,
    index: usize,
}

impl SessionHistory {
    pub fn new(initial: Url) -> Self {
        Self {
            entries: vec![initial],
            index: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl History for SessionHistory {
    fn current(&self) -> &Url {
        &self.entries[self.index]
    }

    fn push_state(&mut self, url: Url) -> bool {
        self.entries.truncate(self.index + 1);
        self.entries.push(url);
        self.index = self.entries.len() - 1;
        true
    }

    fn replace_state(&mut self, url: Url) -> bool {
        self.entries[self.index] = url;
        true
    }

    fn go(&mut self, delta: isize) -> bool {
        let target = self.index as isize + delta;
        if delta == 0 || target < 0 || target as usize >= self.entries.len() {
            return false;
        }
        self.index = target as usize;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(path: &str) -> Url {
        Url::parse("https://example.com").unwrap().join(path).unwrap()
    }

    #[test]
    fn push_truncates_forward_entries() {
        let mut history = SessionHistory::new(url("/"));
        history.push_state(url("/a"));
        history.push_state(url("/b"));
        assert!(history.go(-2));
        assert_eq!(history.current().path(), "/");
        history.push_state(url("/c"));
        assert_eq!(history.len(), 2);
        assert!(!history.go(1));
        assert_eq!(history.current().path(), "/c");
    }

    #[test]
    fn go_out_of_range_is_refused() {
        let mut history = SessionHistory::new(url("/"));
        assert!(!history.go(-1));
        assert!(!history.go(0));
        history.replace_state(url("/home"));
        assert_eq!(history.current().path(), "/home");
    }
}
