use anyhow::Result;
use declarative::{ChangeSet, ConfirmCallback, Error, PlanMode, execute};

use super::output::print_outputs;
use super::plan::PlanFile;
use crate::Context;
use crate::cli::{ApplyArgs, RunArgs};
use crate::engine::{
    BarProgress, TerminalConfirm, Workspace, cancel_on_interrupt, display_plan, print_summary,
};
use crate::ui;

/// How a confirmed change set is run
pub struct Converge<'a> {
    pub mode: PlanMode,
    pub yes: bool,
    pub allow_destructive: bool,
    pub run: &'a RunArgs,
}

pub fn run(ctx: &Context, args: &ApplyArgs) -> Result<()> {
    let ws = Workspace::load(ctx, &super::var_inputs(&args.vars))?;

    let saved = args.plan_file.as_deref().map(PlanFile::load).transpose()?;
    let (mode, refresh) = match &saved {
        Some(plan) => (plan.mode(), plan.refresh),
        None => (PlanMode::Apply, ws.wants_refresh(args.refresh)),
    };

    let drift = if refresh {
        ws.refresh(args.run.timeout, ctx.quiet)?
    } else {
        Vec::new()
    };
    let changes = ws.plan(mode, drift)?;
    if let Some(plan) = &saved {
        plan.verify(&ws.store, &changes)?;
    }

    converge(
        ctx,
        &ws,
        &changes,
        Converge {
            mode,
            // The saved plan was already reviewed
            yes: args.yes || saved.is_some(),
            allow_destructive: args.allow_destructive,
            run: &args.run,
        },
    )
}

/// Show, confirm and execute a change set, then record outputs
pub fn converge(
    ctx: &Context,
    ws: &Workspace,
    changes: &ChangeSet,
    opts: Converge<'_>,
) -> Result<()> {
    let verb = match opts.mode {
        PlanMode::Apply => "Apply",
        PlanMode::Destroy => "Destroy",
    };

    display_plan(changes, &ws.masker());
    if !changes.has_changes() {
        if opts.mode == PlanMode::Apply {
            record_outputs(ctx, ws)?;
        }
        return Ok(());
    }

    if !opts.yes && !console::user_attended() {
        anyhow::bail!(
            "No terminal to confirm on; pass --yes to {} without asking",
            verb.to_lowercase()
        );
    }
    println!();
    let mut confirm = TerminalConfirm {
        assume_yes: opts.yes,
    };
    if !confirm.confirm(&format!("{verb} these changes?"))? {
        ui::warn("Aborted, nothing was changed");
        return Ok(());
    }

    // --yes covers the plan, not data loss
    let mut destructive = TerminalConfirm { assume_yes: false };

    let exec = ws.execute_options(opts.run.jobs, opts.run.timeout, opts.allow_destructive)?;
    cancel_on_interrupt(&exec.cancel);
    let progress = BarProgress::new(ctx.quiet);
    let report = match execute(
        changes,
        &ws.graph,
        &ws.store,
        &ws.providers,
        &exec,
        &progress,
        &mut destructive,
    ) {
        Ok(report) => report,
        Err(e @ Error::DestructiveRefused { .. }) => {
            ui::dim("Nothing was changed. Pass --allow-destructive to skip this check.");
            return Err(e.into());
        }
        Err(e) => return Err(e.into()),
    };
    print_summary(&report, verb);

    match opts.mode {
        PlanMode::Apply if report.is_success() => record_outputs(ctx, ws)?,
        PlanMode::Destroy if report.is_success() => {
            ws.store.set_outputs(Default::default())?;
        }
        _ => {}
    }

    if !report.is_success() {
        anyhow::bail!(
            "{verb} incomplete: {} failed, {} not started; state holds every committed change",
            report.summary.failed,
            report.summary.not_started
        );
    }
    Ok(())
}

fn record_outputs(ctx: &Context, ws: &Workspace) -> Result<()> {
    if ws.declarations.outputs.is_empty() && ws.store.outputs().is_empty() {
        return Ok(());
    }
    let evaluated = ws.record_outputs()?;
    for (name, result) in &evaluated {
        if let Err(e) = result {
            ui::warn(&format!("Output '{name}' not recorded: {e}"));
        }
    }
    if !ctx.quiet {
        print_outputs(&ws.store.outputs(), false);
    }
    Ok(())
}
