//! Terminal side of the reconciler
//!
//! The `declarative` crate plans and executes. This module:
//! 1. Loads a project into a [`Workspace`]
//! 2. Renders change sets and drift
//! 3. Drives the executor with a progress bar and confirmation prompts

pub mod differ;
pub mod executor;
pub mod planner;

pub use differ::{Masker, display_drift, display_plan, masked};
pub use executor::{BarProgress, TerminalConfirm, cancel_on_interrupt, print_summary};
pub use planner::{Workspace, open_state};
