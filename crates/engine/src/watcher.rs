// ABOUTME: Mutation watcher subscribing to child-list changes beneath the attach point.
// ABOUTME: Attachment can fail while the page is still loading; callers retry on a timer.

use tracing::debug;

use crate::dom::{MutationRecord, Page};
use crate::error::EngineError;
use tokio::sync::mpsc::UnboundedReceiver;

pub struct MutationWatcher {
    selector: String,
    records: Option<UnboundedReceiver<MutationRecord>>,
}

impl MutationWatcher {
    pub fn new(selector: impl Into<String>) -> Self {
        Self {
            selector: selector.into(),
            records: None,
        }
    }

    pub fn selector(&self) -> &str {
        &self.selector
    }

    pub fn is_attached(&self) -> bool {
        self.records.is_some()
    }

    /// Subscribes to the first element matching the attach selector.
    ///
    /// Returns `AttachPointUnavailable` when the element is not in the page
    /// yet, `InvalidSelector` when the selector cannot match anything ever.
    pub fn try_attach(&mut self, page: &Page) -> Result<(), EngineError> {
        if self.is_attached() {
            return Ok(());
        }
        let root = page
            .query(&self.selector)?
            .into_iter()
            .next()
            .ok_or_else(|| EngineError::attach_point_unavailable(&self.selector, "attach watcher"))?;
        self.records = Some(page.observe(&root));
        debug!(target: "quietpage::watcher", selector = %self.selector, "attached");
        Ok(())
    }

    /// Waits for the next mutation record. Never resolves while unattached.
    pub async fn recv(&mut self) -> Option<MutationRecord> {
        match self.records.as_mut() {
            Some(rx) => rx.recv().await,
            None => std::future::pending().await,
        }
    }
}
