use anyhow::{Context as AnyhowContext, Result};
use colored::Colorize;
use declarative::{Attributes, NodeId, StateStore};

use crate::Context;
use crate::cli::StateCommand;
use crate::engine::{Masker, open_state};
use crate::ui;

pub fn run(ctx: &Context, cmd: StateCommand) -> Result<()> {
    match cmd {
        StateCommand::List => list(ctx),
        StateCommand::Show { id } => show(ctx, &id),
        StateCommand::Rm { ids } => rm(ctx, &ids),
    }
}

fn parse_id(id: &str) -> Result<NodeId> {
    id.parse::<NodeId>().map_err(anyhow::Error::msg)
}

fn list(ctx: &Context) -> Result<()> {
    let store = open_state(ctx)?;
    let resources = store.snapshot();
    if resources.is_empty() {
        ui::info(&format!("No resources in {}", store.path().display()));
        return Ok(());
    }

    if ctx.verbose > 0 {
        ui::kv("state", &store.path().display().to_string());
        ui::kv("serial", &store.serial().to_string());
        ui::kv("lineage", &store.lineage());
        println!();
    }

    for state in &resources {
        let deposed = if state.deposed.is_empty() {
            String::new()
        } else {
            format!(" ({} deposed)", state.deposed.len()).yellow().to_string()
        };
        println!(
            "{:<50} {}{}",
            state.node.to_string(),
            ui::truncate(&state.resource_id, 60).dimmed(),
            deposed
        );
    }
    Ok(())
}

fn show(ctx: &Context, id: &str) -> Result<()> {
    let store = open_state(ctx)?;
    let node = parse_id(id)?;
    let state = store
        .get(&node)
        .with_context(|| format!("{node} is not in state"))?;

    ui::header(&node.to_string());
    ui::kv("id", &state.resource_id);
    ui::kv("provider", &state.provider);
    ui::kv("generation", &state.generation.to_string());
    ui::kv("updated", &state.updated_at.to_rfc3339());
    if !state.dependencies.is_empty() {
        let deps: Vec<String> = state.dependencies.iter().map(ToString::to_string).collect();
        ui::kv("depends on", &deps.join(", "));
    }
    if !state.deposed.is_empty() {
        let deposed: Vec<String> = state.deposed.iter().map(ToString::to_string).collect();
        ui::kv("deposed", &deposed.join(", "));
    }

    print_attributes("Inputs", &state.inputs);
    print_attributes("Outputs", &state.outputs);
    Ok(())
}

fn print_attributes(title: &str, attributes: &Attributes) {
    if attributes.is_empty() {
        return;
    }
    let masker = Masker::default();
    ui::section(title);
    for (name, value) in attributes {
        let shown = if masker.hides(name, value) {
            ui::SENSITIVE.to_string()
        } else {
            value.to_string()
        };
        println!("  {name} = {shown}");
    }
}

/// Forget resources; the infrastructure itself is left alone
fn rm(ctx: &Context, ids: &[String]) -> Result<()> {
    let store = open_state(ctx)?;
    let nodes = ids.iter().map(|id| parse_id(id)).collect::<Result<Vec<_>>>()?;

    if let Some(missing) = nodes.iter().find(|n| !store.contains(n)) {
        anyhow::bail!("{missing} is not in state");
    }

    for node in &nodes {
        store
            .delete(node)
            .with_context(|| format!("Could not remove {node} from state"))?;
        ui::success(&format!("Removed {node} from state"));
    }
    ui::dim("The resources still exist; keel no longer manages them");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_id() {
        assert_eq!(
            parse_id("gcp_compute_network.vpc").unwrap(),
            NodeId::new("gcp_compute_network", "vpc")
        );
        assert!(parse_id("vpc").is_err());
    }
}
