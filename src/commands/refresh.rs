use anyhow::{Context as AnyhowContext, Result};

use crate::Context;
use crate::cli::RefreshArgs;
use crate::engine::{Workspace, display_drift};
use crate::ui;

/// Report drift; never changes state
pub fn run(ctx: &Context, args: &RefreshArgs) -> Result<()> {
    let ws = Workspace::load(ctx, &super::var_inputs(&args.vars))?;
    if ws.store.is_empty() {
        ui::info("State is empty, nothing to refresh");
        return Ok(());
    }

    let drift = ws.refresh(args.timeout, ctx.quiet || args.json)?;
    if args.json {
        let json = serde_json::to_string_pretty(&drift).context("Could not serialize drift")?;
        println!("{json}");
    } else if drift.is_empty() {
        ui::success(&format!(
            "{} resources match their recorded state",
            ws.store.document().resources.len()
        ));
    } else {
        display_drift(&drift);
        ui::dim("Run `keel plan --refresh` to see the changes that would correct it");
    }
    Ok(())
}
