//! Persisted applied state
//!
//! The state file is a versioned JSON document. [`FileStateStore`] keeps the
//! resources in a [`MemoryStateStore`] and rewrites the file after every
//! commit, so an interrupted run leaves every committed node on disk.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use declarative::{
    AppliedState, Attributes, MemoryStateStore, NodeId, OutputValue, StateError, StateStore,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

/// Current state document version
pub const STATE_VERSION: u64 = 2;

// ============================================================================
// State Document
// ============================================================================

/// On-disk layout
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StateDocument {
    pub version: u64,
    /// Incremented on every write
    pub serial: u64,
    /// Identifies one state history across writes
    pub lineage: String,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub resources: Vec<AppliedState>,
    #[serde(default)]
    pub outputs: BTreeMap<String, OutputValue>,
}

/// Version 1 layout: one merged attribute map per resource
#[derive(Debug, Deserialize)]
struct LegacyDocument {
    #[serde(default)]
    serial: u64,
    #[serde(default)]
    lineage: Option<String>,
    #[serde(default)]
    resources: Vec<LegacyResource>,
}

#[derive(Debug, Deserialize)]
struct LegacyResource {
    #[serde(rename = "type")]
    resource_type: String,
    name: String,
    #[serde(default)]
    provider: Option<String>,
    id: String,
    #[serde(default)]
    attributes: Attributes,
    #[serde(default)]
    dependencies: Vec<NodeId>,
    #[serde(default = "first_generation")]
    generation: u64,
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,
}

fn first_generation() -> u64 {
    1
}

impl LegacyResource {
    fn migrate(self) -> AppliedState {
        let node = NodeId::new(self.resource_type, self.name);
        let provider = self
            .provider
            .unwrap_or_else(|| node.default_provider().to_string());
        AppliedState {
            provider,
            resource_id: self.id,
            // Inputs and outputs were not kept apart; the next apply splits them
            inputs: self.attributes.clone(),
            outputs: self.attributes,
            dependencies: self.dependencies,
            generation: self.generation,
            deposed: Vec::new(),
            updated_at: self.updated_at.unwrap_or_else(Utc::now),
            node,
        }
    }
}

impl StateDocument {
    pub fn empty() -> Self {
        Self {
            version: STATE_VERSION,
            serial: 0,
            lineage: new_lineage(),
            updated_at: Utc::now(),
            resources: Vec::new(),
            outputs: BTreeMap::new(),
        }
    }

    /// Parse any supported version, migrating older layouts
    pub fn parse(content: &str) -> Result<Self> {
        let raw: serde_json::Value =
            serde_json::from_str(content).context("State file is not valid JSON")?;
        let version = raw
            .get("version")
            .and_then(serde_json::Value::as_u64)
            .context("State file has no version field")?;

        match version {
            1 => {
                let legacy: LegacyDocument =
                    serde_json::from_value(raw).context("Invalid version 1 state file")?;
                log::info!(
                    "Migrating {} resources from state version 1",
                    legacy.resources.len()
                );
                Ok(Self {
                    version: STATE_VERSION,
                    serial: legacy.serial,
                    lineage: legacy.lineage.unwrap_or_else(new_lineage),
                    updated_at: Utc::now(),
                    resources: legacy
                        .resources
                        .into_iter()
                        .map(LegacyResource::migrate)
                        .collect(),
                    outputs: BTreeMap::new(),
                })
            }
            STATE_VERSION => serde_json::from_value(raw).context("Invalid state file"),
            newer => anyhow::bail!(
                "State file version {} is newer than this keel supports ({})",
                newer,
                STATE_VERSION
            ),
        }
    }

    /// Stable digest of the resources, used to detect state changes
    pub fn fingerprint(&self) -> String {
        fingerprint(&self.resources)
    }
}

fn fingerprint(resources: &[AppliedState]) -> String {
    let mut hasher = blake3::Hasher::new();
    for resource in resources {
        // Serializing plain data into a Vec cannot fail
        let bytes = serde_json::to_vec(resource).unwrap_or_default();
        hasher.update(&bytes);
        hasher.update(b"\n");
    }
    hasher.finalize().to_hex().to_string()
}

fn new_lineage() -> String {
    let seed = format!(
        "{}-{}",
        Utc::now().timestamp_nanos_opt().unwrap_or_default(),
        std::process::id()
    );
    blake3::hash(seed.as_bytes()).to_hex().as_str()[..16].to_string()
}

// ============================================================================
// File Store
// ============================================================================

#[derive(Debug)]
struct Meta {
    serial: u64,
    lineage: String,
    outputs: BTreeMap<String, OutputValue>,
    backed_up: bool,
}

/// State store backed by a JSON file
#[derive(Debug)]
pub struct FileStateStore {
    path: PathBuf,
    resources: MemoryStateStore,
    meta: Mutex<Meta>,
}

impl FileStateStore {
    /// Open the state at `path`; a missing file is an empty state
    pub fn open(path: &Path) -> Result<Self> {
        let (document, existed) = if path.exists() {
            let content = fs::read_to_string(path)
                .with_context(|| format!("Could not read state file {}", path.display()))?;
            let document = StateDocument::parse(&content)
                .with_context(|| format!("Could not load state file {}", path.display()))?;
            (document, true)
        } else {
            log::debug!("No state file at {}, starting empty", path.display());
            (StateDocument::empty(), false)
        };

        log::debug!(
            "Opened state {} (serial {}, {} resources)",
            document.lineage,
            document.serial,
            document.resources.len()
        );

        Ok(Self {
            path: path.to_path_buf(),
            resources: MemoryStateStore::from_states(document.resources),
            meta: Mutex::new(Meta {
                serial: document.serial,
                lineage: document.lineage,
                outputs: document.outputs,
                backed_up: !existed,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn serial(&self) -> u64 {
        self.meta().serial
    }

    pub fn lineage(&self) -> String {
        self.meta().lineage.clone()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Digest of the current resources
    pub fn fingerprint(&self) -> String {
        fingerprint(&self.resources.snapshot())
    }

    pub fn outputs(&self) -> BTreeMap<String, OutputValue> {
        self.meta().outputs.clone()
    }

    /// Replace the stored outputs and persist
    pub fn set_outputs(&self, outputs: BTreeMap<String, OutputValue>) -> Result<(), StateError> {
        let mut meta = self.meta();
        meta.outputs = outputs;
        self.persist(&mut meta)
    }

    /// Current document, as it would be written
    pub fn document(&self) -> StateDocument {
        let meta = self.meta();
        StateDocument {
            version: STATE_VERSION,
            serial: meta.serial,
            lineage: meta.lineage.clone(),
            updated_at: Utc::now(),
            resources: self.resources.snapshot(),
            outputs: meta.outputs.clone(),
        }
    }

    fn meta(&self) -> MutexGuard<'_, Meta> {
        match self.meta.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Write the whole document via a temp file and rename
    ///
    /// Callers hold the meta lock, which serializes writers.
    fn persist(&self, meta: &mut Meta) -> Result<(), StateError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|e| {
                StateError::new(format!("cannot create {}: {e}", parent.display()))
            })?;
        }

        if !meta.backed_up {
            let backup = self.path.with_extension("json.backup");
            fs::copy(&self.path, &backup).map_err(|e| {
                StateError::new(format!("cannot back up state to {}: {e}", backup.display()))
            })?;
            meta.backed_up = true;
        }

        meta.serial += 1;
        let document = StateDocument {
            version: STATE_VERSION,
            serial: meta.serial,
            lineage: meta.lineage.clone(),
            updated_at: Utc::now(),
            resources: self.resources.snapshot(),
            outputs: meta.outputs.clone(),
        };
        let content = serde_json::to_string_pretty(&document)
            .map_err(|e| StateError::new(format!("cannot serialize state: {e}")))?;

        let temp = self.path.with_extension("json.tmp");
        fs::write(&temp, content)
            .map_err(|e| StateError::new(format!("cannot write {}: {e}", temp.display())))?;
        fs::rename(&temp, &self.path).map_err(|e| {
            StateError::new(format!("cannot replace {}: {e}", self.path.display()))
        })?;

        log::debug!("Wrote state serial {} to {}", meta.serial, self.path.display());
        Ok(())
    }
}

impl StateStore for FileStateStore {
    fn get(&self, node: &NodeId) -> Option<AppliedState> {
        self.resources.get(node)
    }

    fn put(&self, node: &NodeId, state: AppliedState) -> Result<(), StateError> {
        self.resources.put(node, state)?;
        let mut meta = self.meta();
        self.persist(&mut meta)
    }

    fn delete(&self, node: &NodeId) -> Result<Option<AppliedState>, StateError> {
        let previous = self.resources.delete(node)?;
        if previous.is_some() {
            let mut meta = self.meta();
            self.persist(&mut meta)?;
        }
        Ok(previous)
    }

    fn snapshot(&self) -> Vec<AppliedState> {
        self.resources.snapshot()
    }
}

// ============================================================================
// Tests
// ============================================================================
