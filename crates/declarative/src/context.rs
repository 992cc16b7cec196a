//! Callback traits
//!
//! These let the engine report progress and ask for confirmation without
//! depending on a terminal UI.

use crate::error::Error;
use crate::planner::ChangeEntry;
use anyhow::Result;

/// Progress callback for execution
///
/// Entry callbacks fire from worker threads, so implementations take
/// `&self` and synchronise internally.
pub trait ProgressCallback: Sync {
    /// Called once with the number of entries that will make changes
    fn on_start(&self, total: usize);

    /// Called before the provider is invoked for an entry
    fn on_entry_start(&self, entry: &ChangeEntry);

    /// Called after an entry committed or failed
    fn on_entry_complete(&self, entry: &ChangeEntry, error: Option<&Error>);

    /// Called once after the walk and deposed cleanup
    fn on_finish(&self);
}

/// Confirmation callback for user interaction
pub trait ConfirmCallback: Send {
    /// Ask the user to confirm an action
    ///
    /// # Returns
    /// `true` if the user confirmed, `false` otherwise
    fn confirm(&mut self, prompt: &str) -> Result<bool>;
}

/// No-op progress callback
pub struct NoProgress;

impl ProgressCallback for NoProgress {
    fn on_start(&self, _total: usize) {}
    fn on_entry_start(&self, _entry: &ChangeEntry) {}
    fn on_entry_complete(&self, _entry: &ChangeEntry, _error: Option<&Error>) {}
    fn on_finish(&self) {}
}

/// Auto-confirm callback (always returns true)
pub struct AutoConfirm;

impl ConfirmCallback for AutoConfirm {
    fn confirm(&mut self, _prompt: &str) -> Result<bool> {
        Ok(true)
    }
}

/// Auto-decline callback (always returns false)
pub struct AutoDecline;

impl ConfirmCallback for AutoDecline {
    fn confirm(&mut self, _prompt: &str) -> Result<bool> {
        Ok(false)
    }
}
