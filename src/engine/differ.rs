//! Plan rendering

use colored::Colorize;
use declarative::{Action, AttributeChange, ChangeEntry, ChangeSet, Drift, Value};
use similar::{ChangeTag, TextDiff};
use std::collections::BTreeSet;

use crate::ui;

/// Attribute names whose values are never printed
const SENSITIVE_ATTRIBUTES: &[&str] = &["password", "secret_data", "string_data"];

/// Hides sensitive values in plan output
///
/// A value is hidden when its attribute name is known to carry secrets or
/// when it contains the value of a sensitive variable.
#[derive(Debug, Default, Clone)]
pub struct Masker {
    secrets: BTreeSet<String>,
}

impl Masker {
    pub fn new(secrets: impl IntoIterator<Item = String>) -> Self {
        Self {
            secrets: secrets.into_iter().filter(|s| !s.is_empty()).collect(),
        }
    }

    pub fn hides(&self, attribute: &str, value: &Value) -> bool {
        if SENSITIVE_ATTRIBUTES.contains(&attribute) {
            return true;
        }
        let rendered = value.to_string();
        self.secrets.iter().any(|secret| rendered.contains(secret))
    }

    fn render(&self, attribute: &str, value: &Value) -> String {
        if self.hides(attribute, value) {
            ui::SENSITIVE.to_string()
        } else {
            render_value(value)
        }
    }
}

/// Maps and lists are shown as pretty JSON so they can be diffed by line
fn render_value(value: &Value) -> String {
    match value {
        Value::Map(_) | Value::List(_) => {
            serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
        }
        other => other.to_string(),
    }
}

/// Copy of a change set with sensitive values replaced
pub fn masked(changes: &ChangeSet, masker: &Masker) -> ChangeSet {
    let mut copy = changes.clone();
    for entry in &mut copy.entries {
        for change in &mut entry.changes {
            let hidden = [&change.before, &change.after]
                .into_iter()
                .flatten()
                .any(|v| masker.hides(&change.name, v));
            if hidden {
                let placeholder = Value::from(ui::SENSITIVE);
                change.before = change.before.as_ref().map(|_| placeholder.clone());
                change.after = change.after.as_ref().map(|_| placeholder);
            }
        }
    }
    copy
}

fn colored_symbol(action: Action) -> String {
    match action {
        Action::Create => action.symbol().green().to_string(),
        Action::Update => action.symbol().yellow().to_string(),
        Action::Replace => action.symbol().magenta().to_string(),
        Action::Destroy => action.symbol().red().to_string(),
        Action::NoOp => action.symbol().dimmed().to_string(),
    }
}

/// Print drift found by a refresh
pub fn display_drift(drift: &[Drift]) {
    if drift.is_empty() {
        return;
    }
    println!();
    println!(
        "┌─ {} ─────────────────────────────────────────┐",
        "Drift".yellow().bold()
    );
    println!("│");
    for warning in drift {
        println!("│  {} {}", "⚠".yellow(), warning);
    }
    println!("│");
    println!("└─────────────────────────────────────────────────────┘");
}

/// Print a change set
pub fn display_plan(changes: &ChangeSet, masker: &Masker) {
    display_drift(&changes.drift);

    if !changes.has_changes() {
        println!();
        println!(
            "  {} No changes. Infrastructure matches the declarations.",
            "✓".green()
        );
        return;
    }

    println!();
    println!(
        "┌─ {} ─────────────────────────────────────────┐",
        "Execution Plan".bold()
    );
    println!("│");

    for entry in changes.changes() {
        display_entry(entry, masker);
    }

    let summary = changes.summary();
    let destructive = changes.destructive().count();
    println!("├─────────────────────────────────────────────────────┤");
    println!(
        "│ Plan: {} to create, {} to update, {} to replace, {} to destroy",
        summary.create.to_string().green(),
        summary.update.to_string().yellow(),
        summary.replace.to_string().magenta(),
        summary.destroy.to_string().red()
    );
    if destructive > 0 {
        println!(
            "│ {} {} destructive {} on data-bearing resources",
            "⚠".yellow(),
            destructive,
            if destructive == 1 { "change" } else { "changes" }
        );
    }
    println!("└─────────────────────────────────────────────────────┘");
}

fn display_entry(entry: &ChangeEntry, masker: &Masker) {
    let destructive = if entry.destructive {
        " [destructive]".red().bold().to_string()
    } else {
        String::new()
    };
    let order = if entry.create_before_destroy {
        " (create before destroy)".dimmed().to_string()
    } else {
        String::new()
    };

    println!(
        "│ {:>3} {:<45} {}{}{}",
        colored_symbol(entry.action),
        entry.node.to_string().bold(),
        entry.reason.dimmed(),
        order,
        destructive
    );

    if entry.action != Action::Destroy {
        for change in &entry.changes {
            for line in change_lines(change, masker) {
                println!("│       {line}");
            }
        }
    }
    println!("│");
}

/// Lines describing one attribute change
pub fn change_lines(change: &AttributeChange, masker: &Masker) -> Vec<String> {
    let forces = if change.forces_replacement {
        format!(" {}", "# forces replacement".magenta())
    } else {
        String::new()
    };

    match (&change.before, &change.after) {
        (None, Some(after)) => vec![format!(
            "{} {} = {}{}",
            "+".green(),
            change.name,
            masker.render(&change.name, after),
            forces
        )],
        (Some(before), None) => vec![format!(
            "{} {} = {}{}",
            "-".red(),
            change.name,
            masker.render(&change.name, before),
            forces
        )],
        (Some(before), Some(after)) => {
            let old = masker.render(&change.name, before);
            let new = masker.render(&change.name, after);
            if !old.contains('\n') && !new.contains('\n') {
                return vec![format!(
                    "{} {}: {} → {}{}",
                    "~".yellow(),
                    change.name,
                    old,
                    new,
                    forces
                )];
            }

            let mut lines = vec![format!("{} {}:{}", "~".yellow(), change.name, forces)];
            let diff = TextDiff::from_lines(&old, &new);
            for line in diff.iter_all_changes() {
                let text = line.value().trim_end_matches('\n');
                let rendered = match line.tag() {
                    ChangeTag::Delete => format!("    {} {}", "-".red(), text.red()),
                    ChangeTag::Insert => format!("    {} {}", "+".green(), text.green()),
                    ChangeTag::Equal => format!("      {}", text.dimmed()),
                };
                lines.push(rendered);
            }
            lines
        }
        (None, None) => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn change(name: &str, before: Option<Value>, after: Option<Value>) -> AttributeChange {
        AttributeChange {
            name: name.to_string(),
            before,
            after,
            forces_replacement: false,
        }
    }

    #[test]
    fn test_masker_hides_secret_names_and_values() {
        let masker = Masker::new(["s3cret".to_string(), String::new()]);
        assert!(masker.hides("password", &Value::from("anything")));
        assert!(masker.hides("url", &Value::from("postgres://app:s3cret@db")));
        assert!(!masker.hides("url", &Value::from("postgres://db")));
    }

    #[test]
    fn test_single_line_change() {
        colored::control::set_override(false);
        let lines = change_lines(
            &change("replicas", Some(Value::Int(2)), Some(Value::Int(3))),
            &Masker::default(),
        );
        assert_eq!(lines, vec!["~ replicas: 2 → 3"]);
    }

    #[test]
    fn test_map_change_is_diffed_by_line() {
        colored::control::set_override(false);
        let before = Value::Map(
            [
                ("cpu".to_string(), Value::from("1")),
                ("memory".to_string(), Value::from("2Gi")),
            ]
            .into(),
        );
        let after = Value::Map(
            [
                ("cpu".to_string(), Value::from("1")),
                ("memory".to_string(), Value::from("4Gi")),
            ]
            .into(),
        );
        let lines = change_lines(
            &change("resources", Some(before), Some(after)),
            &Masker::default(),
        );
        assert_eq!(lines[0], "~ resources:");
        assert!(lines.iter().any(|l| l.contains("- ") && l.contains("2Gi")));
        assert!(lines.iter().any(|l| l.contains("+ ") && l.contains("4Gi")));
        assert!(lines.iter().any(|l| l.contains("\"cpu\": \"1\"")));
    }

    #[test]
    fn test_masked_change_set() {
        let mut entry_change = change("password", Some(Value::from("old")), Some(Value::from("new")));
        entry_change.forces_replacement = true;
        let changes = ChangeSet {
            entries: vec![ChangeEntry {
                node: "null_resource.db".parse().unwrap(),
                provider: "null".to_string(),
                action: Action::Update,
                reason: "attributes changed".to_string(),
                destructive: false,
                create_before_destroy: false,
                changes: vec![entry_change],
                after: Vec::new(),
            }],
            drift: Vec::new(),
        };
        let copy = masked(&changes, &Masker::default());
        let hidden = &copy.entries[0].changes[0];
        assert_eq!(hidden.before, Some(Value::from(ui::SENSITIVE)));
        assert_eq!(hidden.after, Some(Value::from(ui::SENSITIVE)));
        assert_eq!(changes.entries[0].changes[0].after, Some(Value::from("new")));
    }

    #[test]
    fn test_sensitive_values_are_masked() {
        colored::control::set_override(false);
        let lines = change_lines(
            &change("password", None, Some(Value::from("hunter2"))),
            &Masker::default(),
        );
        assert_eq!(lines, vec!["+ password = (sensitive)"]);
    }
}
