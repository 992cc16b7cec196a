use anyhow::Result;
use colored::Colorize;
use std::collections::BTreeSet;

use crate::Context;
use crate::cli::VarArgs;
use crate::engine::Workspace;
use crate::ui;

pub fn run(ctx: &Context, vars: &VarArgs) -> Result<()> {
    let ws = Workspace::load(ctx, &super::var_inputs(vars))?;

    let providers: BTreeSet<&str> = ws.graph.nodes().iter().map(|n| n.provider.as_str()).collect();
    ui::success(&format!(
        "{} resources, {} outputs in {} files are valid",
        ws.graph.len(),
        ws.declarations.outputs.len(),
        ws.declarations.sources.len()
    ));

    if ctx.verbose > 0 {
        ui::section("Apply order");
        for (i, node) in ws.graph.topological_order().enumerate() {
            println!("  {:>3}. {} {}", i + 1, node.id, format!("({})", node.provider).dimmed());
        }
        ui::kv(
            "providers",
            &providers.into_iter().collect::<Vec<_>>().join(", "),
        );
    }
    Ok(())
}
