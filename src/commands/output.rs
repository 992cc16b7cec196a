use anyhow::{Context as AnyhowContext, Result};
use colored::Colorize;
use declarative::{OutputValue, Value};
use std::collections::BTreeMap;

use crate::Context;
use crate::cli::OutputArgs;
use crate::engine::open_state;
use crate::ui;

pub fn run(ctx: &Context, args: &OutputArgs) -> Result<()> {
    let store = open_state(ctx)?;
    let outputs = store.outputs();

    if let Some(name) = &args.name {
        let output = outputs
            .get(name)
            .with_context(|| format!("No output named '{name}' in state"))?;
        if args.json {
            let value = visible(output, args.show_sensitive);
            println!("{}", serde_json::to_string_pretty(&value)?);
        } else if output.sensitive && !args.show_sensitive {
            println!("{}", ui::SENSITIVE);
            ui::dim("Pass --show-sensitive to print it");
        } else {
            println!("{}", raw(&output.value));
        }
        return Ok(());
    }

    if args.json {
        let shown: BTreeMap<&String, Value> = outputs
            .iter()
            .map(|(name, output)| (name, visible(output, args.show_sensitive)))
            .collect();
        println!("{}", serde_json::to_string_pretty(&shown)?);
    } else if outputs.is_empty() {
        ui::info("No outputs recorded; run `keel apply` first");
    } else {
        print_outputs(&outputs, args.show_sensitive);
    }
    Ok(())
}

fn visible(output: &OutputValue, show_sensitive: bool) -> Value {
    if output.sensitive && !show_sensitive {
        Value::from(ui::SENSITIVE)
    } else {
        output.value.clone()
    }
}

/// Scalars without quotes, collections as JSON
fn raw(value: &Value) -> String {
    match value {
        Value::List(_) | Value::Map(_) => {
            serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
        }
        other => other.interpolate().unwrap_or_else(|| other.to_string()),
    }
}

/// Print `name = value` lines
pub fn print_outputs(outputs: &BTreeMap<String, OutputValue>, show_sensitive: bool) {
    if outputs.is_empty() {
        return;
    }
    ui::section("Outputs");
    for (name, output) in outputs {
        let shown = if output.sensitive && !show_sensitive {
            ui::SENSITIVE.dimmed().to_string()
        } else {
            output.value.to_string()
        };
        println!("  {name} = {shown}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_rendering() {
        assert_eq!(raw(&Value::from("34.1.2.3")), "34.1.2.3");
        assert_eq!(raw(&Value::Int(5432)), "5432");
        assert_eq!(
            raw(&Value::List(vec!["a".into(), "b".into()])),
            "[\n  \"a\",\n  \"b\"\n]"
        );
    }

    #[test]
    fn test_sensitive_values_hidden_unless_asked() {
        let output = OutputValue {
            value: Value::from("hunter2"),
            sensitive: true,
        };
        assert_eq!(visible(&output, false), Value::from(ui::SENSITIVE));
        assert_eq!(visible(&output, true), Value::from("hunter2"));
    }
}
