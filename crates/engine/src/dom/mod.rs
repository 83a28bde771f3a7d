// ABOUTME: Host page model module: the live document, its history and the signals it raises.
// ABOUTME: Re-exports Page, MutationRecord, History, HostSignal and SessionHistory.

pub mod history;
pub mod page;

pub use history::{History, HostSignal, SessionHistory};
pub use page::{MutationRecord, Page};
