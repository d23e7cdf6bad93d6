//! Target registry.
//!
//! The roster of monitored endpoints, grouped into collections that share a
//! probe cadence. Loaded once at startup from the embedded `targets.json`
//! (or a file given by `STATUSBOARD_TARGETS_PATH`) and never changed while
//! the process runs.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

const BUILTIN_ROSTER: &str = include_str!("targets.json");

const DEFAULT_INTERVAL_SECS: u64 = 60;
const DEFAULT_WORKERS: usize = 10;

/// Registry error types.
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("failed to read roster: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid roster: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("duplicate collection: {0}")]
    DuplicateCollection(String),
    #[error("duplicate group {group} in collection {collection}")]
    DuplicateGroup { collection: String, group: String },
    #[error("duplicate target {name} in collection {collection}")]
    DuplicateTarget { collection: String, name: String },
    #[error("collection {0} has no targets")]
    EmptyCollection(String),
    #[error("target in collection {0} is missing a name or address")]
    InvalidTarget(String),
}

/// How a target is probed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeMethod {
    Http,
    Tcp,
}

/// One monitored endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct Target {
    pub name: String,
    /// URL for HTTP targets, `host` or `host:port` for TCP targets.
    pub address: String,
    pub method: ProbeMethod,
    pub icon: String,
    pub collection: String,
    pub group: String,
    pub group_name: String,
}

/// A display grouping inside a collection (a website page, a cloud area).
#[derive(Debug, Clone, Serialize)]
pub struct Group {
    pub key: String,
    pub name: String,
}

/// Overrides for a collection's cadence, taken from the environment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CollectionOverride {
    pub interval_secs: Option<u64>,
    pub workers: Option<usize>,
}

/// A named set of targets probed together on one period.
#[derive(Debug, Clone)]
pub struct Collection {
    pub key: String,
    pub name: String,
    pub method: ProbeMethod,
    pub interval: Duration,
    pub workers: usize,
    pub groups: Vec<Group>,
    pub targets: Vec<Arc<Target>>,
}

impl Collection {
    /// Find a group by key.
    pub fn group(&self, key: &str) -> Option<&Group> {
        self.groups.iter().find(|g| g.key == key)
    }

    /// Find a target by name, ignoring case.
    pub fn target(&self, name: &str) -> Option<&Arc<Target>> {
        let wanted = name.to_lowercase();
        self.targets.iter().find(|t| t.name.to_lowercase() == wanted)
    }
}

/// The immutable roster of all collections.
#[derive(Debug, Clone)]
pub struct Registry {
    collections: Vec<Arc<Collection>>,
}

#[derive(Deserialize)]
struct RosterFile {
    collections: Vec<RawCollection>,
}

#[derive(Deserialize)]
struct RawCollection {
    key: String,
    name: String,
    method: ProbeMethod,
    #[serde(default)]
    interval_secs: Option<u64>,
    #[serde(default)]
    workers: Option<usize>,
    groups: Vec<RawGroup>,
}

#[derive(Deserialize)]
struct RawGroup {
    key: String,
    name: String,
    targets: Vec<RawTarget>,
}

#[derive(Deserialize)]
struct RawTarget {
    name: String,
    address: String,
    #[serde(default)]
    icon: String,
    #[serde(default)]
    method: Option<ProbeMethod>,
}

impl Registry {
    /// Load the roster compiled into the binary.
    pub fn builtin() -> Result<Self, RegistryError> {
        Self::from_json(BUILTIN_ROSTER)
    }

    /// Load a roster from a JSON file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, RegistryError> {
        let data = std::fs::read_to_string(path)?;
        Self::from_json(&data)
    }

    /// Parse and validate a roster.
    pub fn from_json(data: &str) -> Result<Self, RegistryError> {
        let roster: RosterFile = serde_json::from_str(data)?;

        let mut seen_collections = HashSet::new();
        let mut collections = Vec::with_capacity(roster.collections.len());

        for raw in roster.collections {
            if !seen_collections.insert(raw.key.clone()) {
                return Err(RegistryError::DuplicateCollection(raw.key));
            }
            collections.push(Arc::new(build_collection(raw)?));
        }

        Ok(Self { collections })
    }

    /// Apply per-collection cadence overrides.
    pub fn with_overrides(self, overrides: &HashMap<String, CollectionOverride>) -> Self {
        let collections = self
            .collections
            .into_iter()
            .map(|c| match overrides.get(&c.key) {
                Some(o) => {
                    let mut tuned = (*c).clone();
                    if let Some(secs) = o.interval_secs {
                        tuned.interval = Duration::from_secs(secs.max(1));
                    }
                    if let Some(workers) = o.workers {
                        tuned.workers = workers.max(1);
                    }
                    Arc::new(tuned)
                }
                None => c,
            })
            .collect();

        Self { collections }
    }

    pub fn collections(&self) -> &[Arc<Collection>] {
        &self.collections
    }

    pub fn get(&self, key: &str) -> Option<&Arc<Collection>> {
        self.collections.iter().find(|c| c.key == key)
    }

    /// Total number of targets across all collections.
    pub fn target_count(&self) -> usize {
        self.collections.iter().map(|c| c.targets.len()).sum()
    }
}

fn build_collection(raw: RawCollection) -> Result<Collection, RegistryError> {
    let mut groups = Vec::with_capacity(raw.groups.len());
    let mut targets = Vec::new();
    let mut seen_groups = HashSet::new();
    let mut seen_names = HashSet::new();

    for group in raw.groups {
        if !seen_groups.insert(group.key.clone()) {
            return Err(RegistryError::DuplicateGroup {
                collection: raw.key,
                group: group.key,
            });
        }

        for t in group.targets {
            if t.name.trim().is_empty() || t.address.trim().is_empty() {
                return Err(RegistryError::InvalidTarget(raw.key));
            }
            // Lookups are case-insensitive, so uniqueness is too.
            if !seen_names.insert(t.name.to_lowercase()) {
                return Err(RegistryError::DuplicateTarget {
                    collection: raw.key,
                    name: t.name,
                });
            }

            targets.push(Arc::new(Target {
                name: t.name,
                address: t.address,
                method: t.method.unwrap_or(raw.method),
                icon: t.icon,
                collection: raw.key.clone(),
                group: group.key.clone(),
                group_name: group.name.clone(),
            }));
        }

        groups.push(Group {
            key: group.key,
            name: group.name,
        });
    }

    if targets.is_empty() {
        return Err(RegistryError::EmptyCollection(raw.key));
    }

    Ok(Collection {
        key: raw.key,
        name: raw.name,
        method: raw.method,
        interval: Duration::from_secs(raw.interval_secs.unwrap_or(DEFAULT_INTERVAL_SECS).max(1)),
        workers: raw.workers.unwrap_or(DEFAULT_WORKERS).max(1),
        groups,
        targets,
    })
}
