//! Project loading and planning
//!
//! A [`Workspace`] is everything one invocation works on: the declarations,
//! their dependency graph, the state file and the provider registry.

use anyhow::{Context as AnyhowContext, Result};
use declarative::{
    ChangeSet, ConfigError, DependencyGraph, Drift, ExecuteOptions, OutputValue, PlanMode,
    PlanOptions, ProviderRegistry, evaluate_outputs, plan, refresh, resolved_outputs,
    validate_outputs,
};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use super::differ::Masker;
use crate::Context;
use crate::config::UserConfig;
use crate::paths;
use crate::progress;
use crate::providers;
use crate::schema::{self, Declarations, VariableInputs};
use crate::state::FileStateStore;

/// Default worker pool size
pub const DEFAULT_PARALLELISM: usize = 4;

/// Default limit for one provider call
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(20 * 60);

pub struct Workspace {
    pub project: PathBuf,
    pub declarations: Declarations,
    pub graph: DependencyGraph,
    pub store: FileStateStore,
    pub providers: ProviderRegistry,
    pub user: UserConfig,
}

/// Open the state file for the current project
pub fn open_state(ctx: &Context) -> Result<FileStateStore> {
    let project = paths::project_dir(ctx.project.as_deref())?;
    let path = paths::state_file(&project, ctx.state.as_deref());
    FileStateStore::open(&path)
}

impl Workspace {
    /// Load declarations, build the graph and open state
    pub fn load(ctx: &Context, vars: &VariableInputs) -> Result<Self> {
        Self::load_with(ctx, vars, providers::default_registry())
    }

    pub fn load_with(
        ctx: &Context,
        vars: &VariableInputs,
        providers: ProviderRegistry,
    ) -> Result<Self> {
        let project = paths::project_dir(ctx.project.as_deref())?;
        let declarations = schema::load(&project, vars)?;

        let graph = DependencyGraph::build(declarations.nodes.clone())
            .context("Invalid resource graph")?;
        providers
            .validate(&graph)
            .context("Invalid resource graph")?;
        validate_outputs(&declarations.outputs, &graph).context("Invalid outputs")?;
        log::debug!("Graph has {} nodes", graph.len());

        let store = FileStateStore::open(&paths::state_file(&project, ctx.state.as_deref()))?;
        let user = UserConfig::load()?;

        Ok(Self {
            project,
            declarations,
            graph,
            store,
            providers,
            user,
        })
    }

    /// Hides values of sensitive variables in output
    pub fn masker(&self) -> Masker {
        Masker::new(
            self.declarations
                .variables
                .values()
                .filter(|v| v.sensitive)
                .filter_map(|v| v.value.interpolate()),
        )
    }

    /// Whether to refresh before planning
    pub fn wants_refresh(&self, flag: bool) -> bool {
        flag || self.user.refresh
    }

    /// Per-call timeout: flag, then project settings, then user config
    pub fn timeout(&self, flag: Option<Duration>) -> Result<Duration> {
        if let Some(timeout) = flag.or(self.declarations.settings.timeout) {
            return Ok(timeout);
        }
        Ok(self.user.timeout()?.unwrap_or(DEFAULT_TIMEOUT))
    }

    /// Worker pool size: flag, then project settings, then user config
    pub fn parallelism(&self, flag: Option<usize>) -> usize {
        flag.or(self.declarations.settings.parallelism)
            .or(self.user.parallelism)
            .unwrap_or(DEFAULT_PARALLELISM)
            .max(1)
    }

    pub fn execute_options(
        &self,
        jobs: Option<usize>,
        timeout: Option<Duration>,
        allow_destructive: bool,
    ) -> Result<ExecuteOptions> {
        Ok(ExecuteOptions {
            parallelism: self.parallelism(jobs),
            timeout: Some(self.timeout(timeout)?),
            allow_destructive,
            ..Default::default()
        })
    }

    /// Read every stored resource back through its provider
    pub fn refresh(&self, timeout: Option<Duration>, quiet: bool) -> Result<Vec<Drift>> {
        let timeout = self.timeout(timeout)?;
        let spinner = (!quiet).then(|| progress::spinner("Refreshing state..."));
        let drift = refresh(&self.store, &self.providers, Some(timeout));
        if let Some(spinner) = spinner {
            spinner.finish_and_clear();
        }
        Ok(drift)
    }

    pub fn plan(&self, mode: PlanMode, drift: Vec<Drift>) -> Result<ChangeSet> {
        let changes = plan(
            &self.graph,
            &self.store,
            &self.providers,
            PlanOptions { mode, drift },
        )?;
        Ok(changes)
    }

    /// Resolve outputs and record the resolvable ones in state
    pub fn record_outputs(&self) -> Result<BTreeMap<String, Result<OutputValue, ConfigError>>> {
        let evaluated = evaluate_outputs(&self.declarations.outputs, &self.store);
        self.store
            .set_outputs(resolved_outputs(&evaluated))
            .context("Could not record outputs")?;
        Ok(evaluated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::NullProvider;
    use declarative::Action;
    use std::fs;
    use std::sync::Arc;
    use tempfile::TempDir;

    const DECLARATIONS: &str = r#"
[settings]
parallelism = 2

[variables.password]
default = "hunter2"
sensitive = true

[[resource]]
type = "null_resource"
name = "network"
[resource.attributes]
cidr = "10.0.0.0/16"

[[resource]]
type = "null_resource"
name = "cluster"
[resource.attributes]
network = "${null_resource.network.cidr}"
password = "${var.password}"

[outputs.network]
value = "${null_resource.network.cidr}"
"#;

    fn workspace(dir: &TempDir) -> Workspace {
        fs::write(dir.path().join("main.toml"), DECLARATIONS).unwrap();
        let ctx = Context {
            verbose: 0,
            quiet: true,
            project: Some(dir.path().to_path_buf()),
            state: None,
        };
        Workspace::load_with(
            &ctx,
            &VariableInputs::default(),
            ProviderRegistry::new().with(Arc::new(NullProvider::new())),
        )
        .unwrap()
    }

    #[test]
    fn test_load_builds_graph_and_empty_state() {
        let dir = TempDir::new().unwrap();
        let ws = workspace(&dir);
        assert_eq!(ws.graph.len(), 2);
        assert!(ws.store.is_empty());

        let changes = ws.plan(PlanMode::Apply, Vec::new()).unwrap();
        let actions: Vec<_> = changes.actions().into_iter().map(|(_, a)| a).collect();
        assert_eq!(actions, vec![Action::Create, Action::Create]);
    }

    #[test]
    fn test_settings_precedence() {
        let dir = TempDir::new().unwrap();
        let ws = workspace(&dir);
        assert_eq!(ws.parallelism(None), 2);
        assert_eq!(ws.parallelism(Some(8)), 8);
        assert_eq!(ws.parallelism(Some(0)), 1);
        assert_eq!(
            ws.timeout(Some(Duration::from_secs(5))).unwrap(),
            Duration::from_secs(5)
        );
    }

    #[test]
    fn test_masker_hides_sensitive_variables() {
        let dir = TempDir::new().unwrap();
        let ws = workspace(&dir);
        let masker = ws.masker();
        assert!(masker.hides("connection", &declarative::Value::from("user:hunter2@db")));
        assert!(!masker.hides("cidr", &declarative::Value::from("10.0.0.0/16")));
    }
}
