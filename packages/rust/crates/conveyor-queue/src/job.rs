//! Job payload model: what the caller schedules.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One unit of schedulable work.
///
/// Identity is the `path` key. The queue never deduplicates; callers are
/// responsible for keeping paths unique.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Unique key for this job (e.g. a project or file path).
    pub path: String,
    /// Scheduling priority; higher pops first under `Strategy::Priority`.
    pub priority: i64,
    /// Free-form metadata consulted by the size/alpha strategies.
    #[serde(default)]
    pub metadata: JobMetadata,
    /// Number of times this job has been re-enqueued after failure.
    #[serde(default)]
    pub retry_count: u32,
    /// Opaque caller data carried through scheduling untouched.
    #[serde(default)]
    pub payload: Value,
}

impl Job {
    /// Create a job with empty metadata and payload.
    #[must_use]
    pub fn new(path: impl Into<String>, priority: i64) -> Self {
        Self {
            path: path.into(),
            priority,
            metadata: JobMetadata::default(),
            retry_count: 0,
            payload: Value::Null,
        }
    }

    /// Attach metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: JobMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Attach an opaque payload.
    #[must_use]
    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }
}

/// Structured metadata with the fields the ordering strategies consult,
/// plus arbitrary extra tags.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobMetadata {
    /// Workload size hint; `Strategy::Size` orders ascending on this.
    #[serde(default)]
    pub size: u64,
    /// Display name; `Strategy::Alpha` orders ascending on this.
    #[serde(default)]
    pub name: String,
    /// Arbitrary extra tags, flattened on (de)serialization.
    #[serde(default, flatten)]
    pub tags: Map<String, Value>,
}

impl JobMetadata {
    /// Metadata with a size hint and name, no extra tags.
    #[must_use]
    pub fn new(size: u64, name: impl Into<String>) -> Self {
        Self {
            size,
            name: name.into(),
            tags: Map::new(),
        }
    }

    /// Merge a partial update into this metadata. Present fields overwrite;
    /// tags merge key by key.
    pub fn apply(&mut self, patch: JobMetadataPatch) {
        if let Some(size) = patch.size {
            self.size = size;
        }
        if let Some(name) = patch.name {
            self.name = name;
        }
        for (key, value) in patch.tags {
            self.tags.insert(key, value);
        }
    }
}

/// Partial metadata update; `None` fields are left unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobMetadataPatch {
    /// New size hint, if any.
    #[serde(default)]
    pub size: Option<u64>,
    /// New display name, if any.
    #[serde(default)]
    pub name: Option<String>,
    /// Tags to insert or overwrite.
    #[serde(default, flatten)]
    pub tags: Map<String, Value>,
}
