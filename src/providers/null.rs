//! In-process provider that manages nothing
//!
//! Every `null_*` type is accepted. Inputs are echoed back as outputs, so
//! references between null resources resolve to declared values. Two
//! attributes steer behaviour:
//! - `fail = true` makes create and update fail
//! - `delay = "2s"` makes create and update take that long
//!
//! `triggers` forces replacement when it changes and `null_volume` is
//! treated as data-bearing.

use declarative::{
    Applied, Attributes, OperationContext, Provider, ProviderError, ResourceSchema, Value,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crate::ui;

#[derive(Debug, Default)]
pub struct NullProvider {
    counter: AtomicU64,
}

impl NullProvider {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&self, ctx: &OperationContext) -> String {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        let seed = format!(
            "{}-{}-{}",
            ctx.node,
            n,
            chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default()
        );
        format!(
            "{}-{}",
            ctx.node.name,
            &blake3::hash(seed.as_bytes()).to_hex().as_str()[..8]
        )
    }

    fn converge(
        ctx: &OperationContext,
        id: String,
        attributes: &Attributes,
    ) -> Result<Applied, ProviderError> {
        if let Some(delay) = attributes.get("delay").and_then(Value::as_str) {
            let delay = ui::parse_duration(delay).map_err(ProviderError::failed)?;
            wait(ctx, delay)?;
        }
        if attributes.get("fail").and_then(Value::as_bool) == Some(true) {
            return Err(ProviderError::failed(format!(
                "{} requested failure",
                ctx.node
            )));
        }
        Ok(Applied {
            id,
            outputs: attributes.clone(),
        })
    }
}

fn wait(ctx: &OperationContext, delay: Duration) -> Result<(), ProviderError> {
    let end = Instant::now() + delay;
    while Instant::now() < end {
        ctx.check()?;
        thread::sleep(Duration::from_millis(10));
    }
    Ok(())
}

impl Provider for NullProvider {
    fn name(&self) -> &str {
        "null"
    }

    fn supports(&self, resource_type: &str) -> bool {
        resource_type.starts_with("null_")
    }

    fn schema(&self, resource_type: &str) -> ResourceSchema {
        let schema = ResourceSchema::with_immutable(["triggers"]);
        if resource_type == "null_volume" {
            schema.data_bearing()
        } else {
            schema
        }
    }

    fn create(
        &self,
        ctx: &OperationContext,
        _resource_type: &str,
        attributes: &Attributes,
    ) -> Result<Applied, ProviderError> {
        Self::converge(ctx, self.next_id(ctx), attributes)
    }

    fn update(
        &self,
        ctx: &OperationContext,
        _resource_type: &str,
        id: &str,
        attributes: &Attributes,
    ) -> Result<Applied, ProviderError> {
        Self::converge(ctx, id.to_string(), attributes)
    }

    fn delete(
        &self,
        ctx: &OperationContext,
        _resource_type: &str,
        _id: &str,
    ) -> Result<(), ProviderError> {
        ctx.check()
    }

    fn read(
        &self,
        ctx: &OperationContext,
        _resource_type: &str,
        _id: &str,
    ) -> Result<Option<Attributes>, ProviderError> {
        ctx.check()?;
        // Nothing external to observe
        Ok(Some(Attributes::new()))
    }
}
