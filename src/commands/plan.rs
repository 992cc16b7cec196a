//! `keel plan` and saved plan files
//!
//! A plan file records the actions that were shown together with the
//! fingerprint of the state they were planned against. `keel apply FILE`
//! re-plans and refuses to run unless both still match.

use anyhow::{Context as AnyhowContext, Result};
use chrono::{DateTime, Utc};
use declarative::{Action, ChangeSet, NodeId, PlanMode};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::Context;
use crate::cli::PlanArgs;
use crate::engine::{Workspace, display_plan, masked};
use crate::state::FileStateStore;
use crate::ui;

/// Version of the plan file layout
pub const PLAN_FORMAT: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedAction {
    pub node: NodeId,
    pub action: Action,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanFile {
    pub format: u32,
    pub lineage: String,
    pub fingerprint: String,
    pub destroy: bool,
    pub refresh: bool,
    pub created_at: DateTime<Utc>,
    pub actions: Vec<PlannedAction>,
}

impl PlanFile {
    pub fn new(store: &FileStateStore, changes: &ChangeSet, destroy: bool, refresh: bool) -> Self {
        Self {
            format: PLAN_FORMAT,
            lineage: store.lineage(),
            fingerprint: store.fingerprint(),
            destroy,
            refresh,
            created_at: Utc::now(),
            actions: planned_actions(changes),
        }
    }

    pub fn mode(&self) -> PlanMode {
        if self.destroy {
            PlanMode::Destroy
        } else {
            PlanMode::Apply
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Could not read plan file {}", path.display()))?;
        let plan: Self = serde_json::from_str(&content)
            .with_context(|| format!("Invalid plan file {}", path.display()))?;
        if plan.format != PLAN_FORMAT {
            anyhow::bail!(
                "Plan file {} has format {}, this keel reads format {}",
                path.display(),
                plan.format,
                PLAN_FORMAT
            );
        }
        Ok(plan)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Could not create {}", parent.display()))?;
        }
        let content = serde_json::to_string_pretty(self).context("Could not serialize plan")?;
        fs::write(path, content)
            .with_context(|| format!("Could not write plan file {}", path.display()))
    }

    /// Refuse a plan made against other state or yielding other actions
    pub fn verify(&self, store: &FileStateStore, changes: &ChangeSet) -> Result<()> {
        // A state that was never written gets a fresh lineage on every open
        if store.serial() > 0 && self.lineage != store.lineage() {
            anyhow::bail!("Plan was made for a different state file; run `keel plan` again");
        }
        if self.fingerprint != store.fingerprint() {
            anyhow::bail!("State changed since the plan was made; run `keel plan` again");
        }
        if self.actions != planned_actions(changes) {
            anyhow::bail!("Declarations changed since the plan was made; run `keel plan` again");
        }
        Ok(())
    }
}

fn planned_actions(changes: &ChangeSet) -> Vec<PlannedAction> {
    changes
        .actions()
        .into_iter()
        .map(|(node, action)| PlannedAction { node, action })
        .collect()
}

pub fn run(ctx: &Context, args: &PlanArgs) -> Result<()> {
    let ws = Workspace::load(ctx, &super::var_inputs(&args.vars))?;

    let refresh = ws.wants_refresh(args.refresh);
    let drift = if refresh {
        ws.refresh(args.timeout, ctx.quiet || args.json)?
    } else {
        Vec::new()
    };
    let mode = if args.destroy {
        PlanMode::Destroy
    } else {
        PlanMode::Apply
    };
    let changes = ws.plan(mode, drift)?;

    if args.json {
        let json = serde_json::to_string_pretty(&masked(&changes, &ws.masker()))
            .context("Could not serialize plan")?;
        println!("{json}");
    } else {
        display_plan(&changes, &ws.masker());
    }

    if let Some(out) = &args.out {
        PlanFile::new(&ws.store, &changes, args.destroy, refresh).save(out)?;
        if !args.json {
            println!();
            ui::success(&format!("Saved plan to {}", out.display()));
            ui::dim(&format!("Run `keel apply {}` to apply it", out.display()));
        }
    }
    Ok(())
}
