//! Test doubles shared by the unit tests

use crate::error::ProviderError;
use crate::provider::{Applied, OperationContext, Provider, ResourceSchema};
use crate::state::lock;
use crate::types::{AppliedState, Attributes, NodeId, Value};
use chrono::Utc;
use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// In-memory provider that records every call
///
/// Remote objects live in a map keyed by resource id. Failures and delays
/// are injected per node name.
#[derive(Debug, Default)]
pub(crate) struct RecordingProvider {
    name: String,
    schemas: HashMap<String, ResourceSchema>,
    failing: BTreeSet<String>,
    delays: HashMap<String, Duration>,
    failing_deletes: Mutex<BTreeSet<String>>,
    failing_creates: Mutex<BTreeSet<String>>,
    create_outputs: Attributes,
    remote: Mutex<HashMap<String, Attributes>>,
    calls: Mutex<Vec<String>>,
    next_id: AtomicUsize,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl RecordingProvider {
    pub(crate) fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub(crate) fn with_schema(mut self, resource_type: &str, schema: ResourceSchema) -> Self {
        self.schemas.insert(resource_type.to_string(), schema);
        self
    }

    /// Every operation on the named node fails
    pub(crate) fn fail_on(mut self, node_name: &str) -> Self {
        self.failing.insert(node_name.to_string());
        self
    }

    /// Operations on the named node take this long, or until cancelled
    pub(crate) fn delay_on(mut self, node_name: &str, delay: Duration) -> Self {
        self.delays.insert(node_name.to_string(), delay);
        self
    }

    /// Outputs only create reports, like an endpoint assigned once
    pub(crate) fn with_create_output(mut self, name: &str, value: Value) -> Self {
        self.create_outputs.insert(name.to_string(), value);
        self
    }

    /// Creates of the named node fail from now on
    pub(crate) fn fail_create_of(&self, node_name: &str) {
        lock(&self.failing_creates).insert(node_name.to_string());
    }

    pub(crate) fn fail_delete_of(&self, id: &str) {
        lock(&self.failing_deletes).insert(id.to_string());
    }

    pub(crate) fn set_remote(&self, id: &str, attributes: &[(&str, Value)]) {
        lock(&self.remote).insert(id.to_string(), attrs(attributes));
    }

    /// Calls as `"<op> <node> [<id>]"`, in the order they were made
    pub(crate) fn calls(&self) -> Vec<String> {
        lock(&self.calls).clone()
    }

    pub(crate) fn clear_calls(&self) {
        lock(&self.calls).clear();
    }

    /// Highest number of operations that were in flight at once
    pub(crate) fn max_concurrency(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    fn enter(&self, ctx: &OperationContext, call: String) -> Result<(), ProviderError> {
        lock(&self.calls).push(call);
        if self.failing.contains(&ctx.node.name) {
            return Err(ProviderError::failed(format!(
                "injected failure for {}",
                ctx.node
            )));
        }

        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);
        let waited = match self.delays.get(&ctx.node.name) {
            Some(&delay) => wait(ctx, delay),
            None => Ok(()),
        };
        self.active.fetch_sub(1, Ordering::SeqCst);
        waited
    }

    fn outputs(resource_type: &str, id: &str) -> Attributes {
        [(
            "self_link".to_string(),
            Value::String(format!("{resource_type}/{id}")),
        )]
        .into()
    }
}

fn wait(ctx: &OperationContext, delay: Duration) -> Result<(), ProviderError> {
    let end = Instant::now() + delay;
    while Instant::now() < end {
        ctx.check()?;
        thread::sleep(Duration::from_millis(5));
    }
    Ok(())
}

impl Provider for RecordingProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn schema(&self, resource_type: &str) -> ResourceSchema {
        self.schemas.get(resource_type).cloned().unwrap_or_default()
    }

    fn create(
        &self,
        ctx: &OperationContext,
        resource_type: &str,
        attributes: &Attributes,
    ) -> Result<Applied, ProviderError> {
        self.enter(ctx, format!("create {}", ctx.node))?;
        if lock(&self.failing_creates).contains(&ctx.node.name) {
            return Err(ProviderError::failed(format!("cannot create {}", ctx.node)));
        }
        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let id = format!("{}-{n}", ctx.node.name);
        lock(&self.remote).insert(id.clone(), attributes.clone());
        let mut outputs = Self::outputs(resource_type, &id);
        outputs.extend(self.create_outputs.clone());
        Ok(Applied { outputs, id })
    }

    fn update(
        &self,
        ctx: &OperationContext,
        resource_type: &str,
        id: &str,
        attributes: &Attributes,
    ) -> Result<Applied, ProviderError> {
        self.enter(ctx, format!("update {} {id}", ctx.node))?;
        lock(&self.remote).insert(id.to_string(), attributes.clone());
        Ok(Applied {
            id: id.to_string(),
            outputs: Self::outputs(resource_type, id),
        })
    }

    fn delete(
        &self,
        ctx: &OperationContext,
        _resource_type: &str,
        id: &str,
    ) -> Result<(), ProviderError> {
        self.enter(ctx, format!("delete {} {id}", ctx.node))?;
        if lock(&self.failing_deletes).contains(id) {
            return Err(ProviderError::failed(format!("cannot delete {id}")));
        }
        lock(&self.remote).remove(id);
        Ok(())
    }

    fn read(
        &self,
        ctx: &OperationContext,
        _resource_type: &str,
        id: &str,
    ) -> Result<Option<Attributes>, ProviderError> {
        self.enter(ctx, format!("read {} {id}", ctx.node))?;
        Ok(lock(&self.remote).get(id).cloned())
    }
}

pub(crate) fn attrs(pairs: &[(&str, Value)]) -> Attributes {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), v.clone()))
        .collect()
}

/// Applied state for `null_resource.<name>` with id `<name>-id`
pub(crate) fn applied(name: &str, inputs: &[(&str, Value)]) -> AppliedState {
    AppliedState {
        node: NodeId::new("null_resource", name),
        provider: "null".to_string(),
        resource_id: format!("{name}-id"),
        inputs: attrs(inputs),
        outputs: Attributes::new(),
        dependencies: Vec::new(),
        generation: 1,
        deposed: Vec::new(),
        updated_at: Utc::now(),
    }
}
