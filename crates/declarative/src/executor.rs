//! Execution engine - walks a change set in dependency order
//!
//! Entries run in waves on a rayon pool: every entry whose predecessors
//! have committed is started together. A failure halts the walk; entries
//! already in flight finish and commit, nothing new starts.

use crate::context::{AutoDecline, ConfirmCallback, NoProgress, ProgressCallback};
use crate::error::{ConfigError, Error, ProviderError, Result, StateError};
use crate::graph::DependencyGraph;
use crate::planner::{Action, ChangeEntry, ChangeSet};
use crate::provider::{Applied, CancelToken, OperationContext, Provider, ProviderRegistry};
use crate::resolve::{lookup_in_store, resolve_attributes};
use crate::state::StateStore;
use crate::types::{AppliedState, Attributes, Deposed, Node, NodeId, Value};
use chrono::Utc;
use rayon::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;

/// Options for execution
#[derive(Debug, Clone)]
pub struct ExecuteOptions {
    /// Worker pool size; `1` applies entries one at a time
    pub parallelism: usize,
    /// Limit for each provider call
    pub timeout: Option<Duration>,
    /// Skip the confirmation for destructive entries
    pub allow_destructive: bool,
    /// Stops new waves and cancels provider calls in flight
    pub cancel: CancelToken,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            parallelism: 4,
            timeout: Some(Duration::from_secs(20 * 60)),
            allow_destructive: false,
            cancel: CancelToken::new(),
        }
    }
}

/// Counts of what a run did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecuteSummary {
    pub created: usize,
    pub updated: usize,
    pub replaced: usize,
    pub destroyed: usize,
    pub unchanged: usize,
    pub failed: usize,
    pub not_started: usize,
}

impl ExecuteSummary {
    /// Total number of actual changes made
    pub fn total_changes(&self) -> usize {
        self.created + self.updated + self.replaced + self.destroyed
    }

    pub fn is_success(&self) -> bool {
        self.failed == 0 && self.not_started == 0
    }

    fn record(&mut self, action: Action) {
        match action {
            Action::Create => self.created += 1,
            Action::Update => self.updated += 1,
            Action::Replace => self.replaced += 1,
            Action::Destroy => self.destroyed += 1,
            Action::NoOp => self.unchanged += 1,
        }
    }
}

/// Outcome of a run
#[derive(Debug, Default)]
pub struct ExecuteReport {
    pub summary: ExecuteSummary,
    /// Failed entries and failed deposed cleanups, in completion order
    pub failures: Vec<Error>,
    /// Entries that never started because the walk halted
    pub not_started: Vec<NodeId>,
    /// Entries that committed, in commit order
    pub committed: Vec<NodeId>,
}

impl ExecuteReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty() && self.not_started.is_empty()
    }
}

/// Apply a change set
///
/// Destructive entries need `allow_destructive` or an approving `confirm`;
/// otherwise nothing runs and [`Error::DestructiveRefused`] is returned.
/// Provider failures do not make this return `Err`: they halt the walk and
/// are listed in the report.
pub fn execute<P, C>(
    changes: &ChangeSet,
    graph: &DependencyGraph,
    store: &dyn StateStore,
    providers: &ProviderRegistry,
    opts: &ExecuteOptions,
    progress: &P,
    confirm: &mut C,
) -> Result<ExecuteReport>
where
    P: ProgressCallback,
    C: ConfirmCallback,
{
    let destructive: Vec<NodeId> = changes.destructive().map(|e| e.node.clone()).collect();
    if !destructive.is_empty() && !opts.allow_destructive {
        let prompt = format!(
            "Replace or destroy data-bearing resources ({})?",
            destructive
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        );
        if !confirm.confirm(&prompt).map_err(Error::Confirm)? {
            return Err(Error::DestructiveRefused { nodes: destructive });
        }
    }

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(opts.parallelism.max(1))
        .thread_name(|i| format!("keel-worker-{i}"))
        .build()
        .map_err(|e| Error::Pool(e.to_string()))?;

    let walker = Walker {
        graph,
        store,
        providers,
        timeout: opts.timeout,
        cancel: &opts.cancel,
        progress,
    };

    let entries = &changes.entries;
    let index: HashMap<&NodeId, usize> = entries
        .iter()
        .enumerate()
        .map(|(i, e)| (&e.node, i))
        .collect();
    let predecessors: Vec<Vec<usize>> = entries
        .iter()
        .map(|e| e.after.iter().filter_map(|n| index.get(n).copied()).collect())
        .collect();

    let mut report = ExecuteReport::default();
    let mut done = vec![false; entries.len()];
    let mut started = vec![false; entries.len()];
    for (i, entry) in entries.iter().enumerate() {
        if entry.action == Action::NoOp {
            done[i] = true;
            started[i] = true;
            report.summary.unchanged += 1;
        }
    }

    progress.on_start(changes.changes().count());
    log::info!(
        "Applying {} changes with parallelism {}",
        changes.changes().count(),
        opts.parallelism.max(1)
    );

    let mut halted = false;
    while !halted {
        let ready: Vec<usize> = (0..entries.len())
            .filter(|&i| !started[i] && predecessors[i].iter().all(|&p| done[p]))
            .collect();
        let Some(&first) = ready.first() else {
            break;
        };

        if opts.cancel.is_cancelled() {
            log::warn!("Run cancelled before {}", entries[first].node);
            report.failures.push(Error::Cancelled {
                node: entries[first].node.clone(),
            });
            break;
        }

        let wave = if opts.parallelism <= 1 {
            &ready[..1]
        } else {
            &ready[..]
        };
        for &i in wave {
            started[i] = true;
        }
        log::debug!("Starting wave of {} entries", wave.len());

        let results: Vec<(usize, Result<()>)> = pool.install(|| {
            wave.par_iter()
                .map(|&i| (i, walker.run_entry(&entries[i])))
                .collect()
        });

        for (i, result) in results {
            match result {
                Ok(()) => {
                    done[i] = true;
                    report.summary.record(entries[i].action);
                    report.committed.push(entries[i].node.clone());
                }
                Err(e) => {
                    log::error!("{e}");
                    report.summary.failed += 1;
                    report.failures.push(e);
                    halted = true;
                }
            }
        }
    }

    report.not_started = (0..entries.len())
        .filter(|&i| !started[i])
        .map(|i| entries[i].node.clone())
        .collect();
    report.summary.not_started = report.not_started.len();

    if report.failures.is_empty() {
        let cleanup = walker.remove_deposed();
        report.summary.failed += cleanup.len();
        report.failures.extend(cleanup);
    } else {
        log::warn!(
            "Run halted: {} failed, {} not started",
            report.summary.failed,
            report.summary.not_started
        );
    }

    progress.on_finish();
    Ok(report)
}

/// Execution without progress reporting
///
/// Destructive entries only run with `allow_destructive` set.
pub fn execute_simple(
    changes: &ChangeSet,
    graph: &DependencyGraph,
    store: &dyn StateStore,
    providers: &ProviderRegistry,
    opts: &ExecuteOptions,
) -> Result<ExecuteReport> {
    execute(
        changes,
        graph,
        store,
        providers,
        opts,
        &NoProgress,
        &mut AutoDecline,
    )
}

struct Walker<'a, P> {
    graph: &'a DependencyGraph,
    store: &'a dyn StateStore,
    providers: &'a ProviderRegistry,
    timeout: Option<Duration>,
    cancel: &'a CancelToken,
    progress: &'a P,
}

impl<P: ProgressCallback> Walker<'_, P> {
    fn run_entry(&self, entry: &ChangeEntry) -> Result<()> {
        self.progress.on_entry_start(entry);
        let result = match entry.action {
            Action::NoOp => Ok(()),
            Action::Destroy => self.destroy(entry),
            Action::Create | Action::Update | Action::Replace => self.converge(entry),
        };
        self.progress.on_entry_complete(entry, result.as_ref().err());
        result
    }

    fn converge(&self, entry: &ChangeEntry) -> Result<()> {
        let node = self
            .graph
            .node(&entry.node)
            .ok_or_else(|| ConfigError::Invalid {
                node: entry.node.clone(),
                message: "planned but not declared".to_string(),
            })?;
        let provider = self.providers.for_node(node)?;
        let inputs = resolve_attributes(&node.id, &node.attributes, &|r| {
            lookup_in_store(self.store, r)
        })?;
        let previous = self.store.get(&node.id);
        let fail = |action: Action| {
            let node = node.id.clone();
            move |source: ProviderError| Error::Provider {
                node,
                action,
                source,
            }
        };

        match entry.action {
            Action::Create => {
                let applied = self.create(&provider, node, &inputs).map_err(fail(Action::Create))?;
                let deposed = previous.as_ref().map(|p| p.deposed.clone()).unwrap_or_default();
                self.commit(node, previous.as_ref(), applied, inputs, deposed)
            }
            Action::Update => {
                let previous = self.require_state(node)?;
                let applied = {
                    let provider = Arc::clone(&provider);
                    let resource_type = node.id.resource_type.clone();
                    let id = previous.resource_id.clone();
                    let attributes = inputs.clone();
                    call_with_timeout(self.context(&node.id), self.timeout, move |ctx| {
                        provider.update(ctx, &resource_type, &id, &attributes)
                    })
                    .map_err(fail(Action::Update))?
                };
                // An update reports what changed; the rest is still true
                let mut outputs = previous.outputs.clone();
                outputs.extend(applied.outputs);
                let applied = Applied {
                    id: applied.id,
                    outputs,
                };
                let deposed = previous.deposed.clone();
                self.commit(node, Some(&previous), applied, inputs, deposed)
            }
            Action::Replace => {
                let previous = self.require_state(node)?;
                let mut deposed = previous.deposed.clone();
                if entry.create_before_destroy {
                    let applied = self.create(&provider, node, &inputs).map_err(fail(Action::Replace))?;
                    log::info!("{}: deposed {}", node.id, previous.resource_id);
                    deposed.push(Deposed {
                        id: previous.resource_id.clone(),
                        provider: previous.provider.clone(),
                    });
                    self.commit(node, Some(&previous), applied, inputs, deposed)
                } else {
                    let old = self.providers.resolve(&node.id, &previous.provider)?;
                    self.delete(&old, &node.id, &previous.resource_id)
                        .map_err(fail(Action::Replace))?;
                    // The row stays until the new instance commits, so deposed ids are not lost
                    let applied = self.create(&provider, node, &inputs).map_err(|source| {
                        log::warn!(
                            "{}: {} was deleted but its replacement failed",
                            node.id,
                            previous.resource_id
                        );
                        fail(Action::Replace)(source)
                    })?;
                    self.commit(node, Some(&previous), applied, inputs, deposed)
                }
            }
            Action::Destroy | Action::NoOp => Ok(()),
        }
    }

    fn destroy(&self, entry: &ChangeEntry) -> Result<()> {
        let Some(previous) = self.store.get(&entry.node) else {
            log::debug!("{} already absent from state", entry.node);
            return Ok(());
        };
        let current = Deposed {
            id: previous.resource_id.clone(),
            provider: previous.provider.clone(),
        };
        for instance in previous.deposed.iter().chain(std::iter::once(&current)) {
            let provider = self.providers.resolve(&previous.node, &instance.provider)?;
            self.delete(&provider, &previous.node, &instance.id)
                .map_err(|source| Error::Provider {
                    node: previous.node.clone(),
                    action: Action::Destroy,
                    source,
                })?;
        }
        self.store.delete(&previous.node)?;
        log::info!("Destroyed {}", previous.node);
        Ok(())
    }

    fn create(
        &self,
        provider: &Arc<dyn Provider>,
        node: &Node,
        inputs: &Attributes,
    ) -> std::result::Result<Applied, ProviderError> {
        let provider = Arc::clone(provider);
        let resource_type = node.id.resource_type.clone();
        let attributes = inputs.clone();
        call_with_timeout(self.context(&node.id), self.timeout, move |ctx| {
            provider.create(ctx, &resource_type, &attributes)
        })
    }

    fn delete(
        &self,
        provider: &Arc<dyn Provider>,
        node: &NodeId,
        id: &str,
    ) -> std::result::Result<(), ProviderError> {
        let provider = Arc::clone(provider);
        let resource_type = node.resource_type.clone();
        let id = id.to_string();
        call_with_timeout(self.context(node), self.timeout, move |ctx| {
            provider.delete(ctx, &resource_type, &id)
        })
    }

    fn context(&self, node: &NodeId) -> OperationContext {
        OperationContext::new(node.clone()).with_cancel(self.cancel)
    }

    fn require_state(&self, node: &Node) -> Result<AppliedState> {
        self.store.get(&node.id).ok_or_else(|| {
            Error::State(StateError::new(format!(
                "{} has no applied state to change",
                node.id
            )))
        })
    }

    fn commit(
        &self,
        node: &Node,
        previous: Option<&AppliedState>,
        applied: Applied,
        inputs: Attributes,
        deposed: Vec<Deposed>,
    ) -> Result<()> {
        let mut outputs = applied.outputs;
        outputs.insert("id".to_string(), Value::String(applied.id.clone()));
        let state = AppliedState {
            node: node.id.clone(),
            provider: node.provider.clone(),
            resource_id: applied.id,
            inputs,
            outputs,
            dependencies: node.dependencies().into_iter().collect(),
            generation: previous.map_or(0, |p| p.generation) + 1,
            deposed,
            updated_at: Utc::now(),
        };
        log::info!("Committed {} (generation {})", node.id, state.generation);
        self.store.put(&node.id, state)?;
        Ok(())
    }

    /// Delete instances left behind by create-before-destroy replacements
    ///
    /// Ids that fail to delete stay recorded for the next run.
    fn remove_deposed(&self) -> Vec<Error> {
        let mut failures = Vec::new();
        for mut state in self.store.snapshot() {
            if state.deposed.is_empty() {
                continue;
            }
            let before = state.deposed.len();
            let mut remaining = Vec::new();
            for instance in std::mem::take(&mut state.deposed) {
                let provider = match self.providers.resolve(&state.node, &instance.provider) {
                    Ok(provider) => provider,
                    Err(e) => {
                        failures.push(e.into());
                        remaining.push(instance);
                        continue;
                    }
                };
                match self.delete(&provider, &state.node, &instance.id) {
                    Ok(()) => log::info!("{}: removed deposed {}", state.node, instance),
                    Err(source) => {
                        failures.push(Error::Provider {
                            node: state.node.clone(),
                            action: Action::Destroy,
                            source,
                        });
                        remaining.push(instance);
                    }
                }
            }

            if remaining.len() != before {
                let node = state.node.clone();
                state.deposed = remaining;
                state.updated_at = Utc::now();
                if let Err(e) = self.store.put(&node, state) {
                    failures.push(e.into());
                }
            }
        }
        failures
    }
}

/// Run a provider call with an optional time limit
///
/// The call runs on a helper thread. On timeout the context's token is
/// cancelled so the provider can stop its work, and the caller gets a
/// timeout error without waiting for it.
pub(crate) fn call_with_timeout<T, F>(
    ctx: OperationContext,
    timeout: Option<Duration>,
    op: F,
) -> std::result::Result<T, ProviderError>
where
    T: Send + 'static,
    F: FnOnce(&OperationContext) -> std::result::Result<T, ProviderError> + Send + 'static,
{
    let ctx = ctx.with_timeout(timeout);
    let Some(limit) = timeout else {
        return op(&ctx);
    };

    let (tx, rx) = mpsc::channel();
    let worker_ctx = ctx.clone();
    thread::Builder::new()
        .name(format!("keel-call-{}", ctx.node))
        .spawn(move || {
            let _ = tx.send(op(&worker_ctx));
        })
        .map_err(|e| ProviderError::failed(format!("failed to start provider call: {e}")))?;

    match rx.recv_timeout(limit) {
        Ok(result) => result,
        Err(RecvTimeoutError::Timeout) => {
            ctx.cancel.cancel();
            Err(ProviderError::timeout(format!(
                "no response after {}",
                format_duration(limit)
            )))
        }
        Err(RecvTimeoutError::Disconnected) => Err(ProviderError::failed(
            "provider call ended without a result",
        )),
    }
}

/// Render a duration the way timeouts are configured (`90s`, `20m`)
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if duration.subsec_millis() != 0 || secs == 0 {
        format!("{}ms", duration.as_millis())
    } else if secs % 3600 == 0 {
        format!("{}h", secs / 3600)
    } else if secs % 60 == 0 {
        format!("{}m", secs / 60)
    } else {
        format!("{secs}s")
    }
}
