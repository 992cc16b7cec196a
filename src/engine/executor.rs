//! Terminal integration for the engine's executor

use anyhow::Result;
use colored::Colorize;
use declarative::{
    Action, CancelToken, ChangeEntry, ConfirmCallback, Error, ExecuteReport, ExecuteSummary,
    ProgressCallback,
};
use indicatif::ProgressBar;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

use crate::progress;

/// Progress bar over the entries of one apply
pub struct BarProgress {
    bar: ProgressBar,
    started: Mutex<HashMap<String, Instant>>,
    quiet: bool,
}

impl BarProgress {
    pub fn new(quiet: bool) -> Self {
        let bar = if quiet {
            ProgressBar::hidden()
        } else {
            progress::bar(0, "Applying")
        };
        Self {
            bar,
            started: Mutex::new(HashMap::new()),
            quiet,
        }
    }

    fn elapsed(&self, entry: &ChangeEntry) -> Option<String> {
        let mut started = match self.started.lock() {
            Ok(locked) => locked,
            Err(poisoned) => poisoned.into_inner(),
        };
        started
            .remove(&entry.node.to_string())
            .map(|t| format!("{:.1}s", t.elapsed().as_secs_f64()))
    }
}

fn past_tense(action: Action) -> &'static str {
    match action {
        Action::Create => "created",
        Action::Update => "updated",
        Action::Replace => "replaced",
        Action::Destroy => "destroyed",
        Action::NoOp => "unchanged",
    }
}

impl ProgressCallback for BarProgress {
    fn on_start(&self, total: usize) {
        self.bar.set_length(total as u64);
    }

    fn on_entry_start(&self, entry: &ChangeEntry) {
        {
            let mut started = match self.started.lock() {
                Ok(locked) => locked,
                Err(poisoned) => poisoned.into_inner(),
            };
            started.insert(entry.node.to_string(), Instant::now());
        }
        self.bar
            .set_message(format!("{} {}", entry.action.symbol(), entry.node));
    }

    fn on_entry_complete(&self, entry: &ChangeEntry, error: Option<&Error>) {
        let elapsed = self.elapsed(entry).unwrap_or_default();
        if !self.quiet {
            let line = match error {
                None => format!(
                    "  {} {} {} {}",
                    "✓".green(),
                    entry.node,
                    past_tense(entry.action),
                    elapsed.dimmed()
                ),
                Some(e) => format!("  {} {}", "✗".red(), e),
            };
            self.bar.println(line);
        }
        self.bar.inc(1);
    }

    fn on_finish(&self) {
        self.bar.finish_and_clear();
    }
}

/// Asks on the terminal, or answers yes when `assume_yes` is set
///
/// Without a terminal every question is answered no.
pub struct TerminalConfirm {
    pub assume_yes: bool,
}

impl ConfirmCallback for TerminalConfirm {
    fn confirm(&mut self, prompt: &str) -> Result<bool> {
        if self.assume_yes {
            return Ok(true);
        }
        if !console::user_attended() {
            log::warn!("No terminal to confirm on: {prompt}");
            return Ok(false);
        }

        let confirmed = dialoguer::Confirm::new()
            .with_prompt(prompt)
            .default(false)
            .interact()?;
        Ok(confirmed)
    }
}

/// Cancel the run on Ctrl-C; a second Ctrl-C exits at once
pub fn cancel_on_interrupt(token: &CancelToken) {
    let token = token.clone();
    let installed = ctrlc::set_handler(move || {
        if token.is_cancelled() {
            std::process::exit(130);
        }
        eprintln!("Interrupted, stopping calls in flight (Ctrl-C again to quit now)");
        token.cancel();
    });
    if let Err(e) = installed {
        log::warn!("Ctrl-C will not cancel this run: {e}");
    }
}

/// Print the outcome of a run
pub fn print_summary(report: &ExecuteReport, verb: &str) {
    let summary = &report.summary;
    println!();
    if report.is_success() {
        println!("  {} {} complete", "✓".green().bold(), verb);
    } else {
        println!("  {} {} finished with errors", "⚠".yellow().bold(), verb);
    }

    for line in summary_lines(summary) {
        println!("    • {line}");
    }

    for failure in &report.failures {
        println!("    {} {}", "✗".red(), failure);
    }
    if !report.not_started.is_empty() {
        let names: Vec<String> = report.not_started.iter().map(ToString::to_string).collect();
        println!("    {} not started: {}", "⊘".dimmed(), names.join(", "));
    }
}

fn summary_lines(summary: &ExecuteSummary) -> Vec<String> {
    [
        (summary.created, "created"),
        (summary.updated, "updated"),
        (summary.replaced, "replaced"),
        (summary.destroyed, "destroyed"),
        (summary.failed, "failed"),
        (summary.not_started, "not started"),
    ]
    .into_iter()
    .filter(|(count, _)| *count > 0)
    .map(|(count, what)| {
        let noun = if count == 1 { "resource" } else { "resources" };
        format!("{count} {noun} {what}")
    })
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_lines_skip_zero_counts() {
        let summary = ExecuteSummary {
            created: 2,
            destroyed: 1,
            ..Default::default()
        };
        assert_eq!(
            summary_lines(&summary),
            vec!["2 resources created", "1 resource destroyed"]
        );
    }

    #[test]
    fn test_assume_yes_confirms() {
        let mut confirm = TerminalConfirm { assume_yes: true };
        assert!(confirm.confirm("Destroy everything?").unwrap());
    }

    #[test]
    fn test_hidden_bar_tracks_entries() {
        let progress = BarProgress::new(true);
        let entry = ChangeEntry {
            node: "null_resource.a".parse().unwrap(),
            provider: "null".to_string(),
            action: Action::Create,
            reason: "not in state".to_string(),
            destructive: false,
            create_before_destroy: false,
            changes: Vec::new(),
            after: Vec::new(),
        };
        progress.on_start(1);
        progress.on_entry_start(&entry);
        progress.on_entry_complete(&entry, None);
        assert_eq!(progress.bar.position(), 1);
        progress.on_finish();
    }
}
