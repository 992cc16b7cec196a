use anyhow::Result;
use declarative::PlanMode;

use super::apply::{Converge, converge};
use crate::Context;
use crate::cli::DestroyArgs;
use crate::engine::Workspace;
use crate::ui;

pub fn run(ctx: &Context, args: &DestroyArgs) -> Result<()> {
    let ws = Workspace::load(ctx, &super::var_inputs(&args.vars))?;
    if ws.store.is_empty() {
        ui::info("State is empty, nothing to destroy");
        return Ok(());
    }

    let changes = ws.plan(PlanMode::Destroy, Vec::new())?;
    converge(
        ctx,
        &ws,
        &changes,
        Converge {
            mode: PlanMode::Destroy,
            yes: args.yes,
            allow_destructive: args.allow_destructive,
            run: &args.run,
        },
    )
}
