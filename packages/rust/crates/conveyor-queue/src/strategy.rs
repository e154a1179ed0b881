//! Ordering strategies: total orders over queue entries.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::queue::QueueEntry;

/// Rule the queue uses to select the next entries.
///
/// All strategies break ties on insertion order (earlier wins), except
/// `Lifo` where later insertion wins outright.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// Ascending insertion order.
    #[default]
    Fifo,
    /// Descending insertion order.
    Lifo,
    /// Descending job priority.
    Priority,
    /// Ascending `metadata.size` (missing treated as 0).
    Size,
    /// Ascending `metadata.name` (missing treated as empty string).
    Alpha,
}

impl Strategy {
    /// Compare two entries under this strategy's total order.
    #[must_use]
    pub fn compare(self, a: &QueueEntry, b: &QueueEntry) -> Ordering {
        let insertion = a.insertion_index.cmp(&b.insertion_index);
        match self {
            Self::Fifo => insertion,
            Self::Lifo => insertion.reverse(),
            Self::Priority => b.job.priority.cmp(&a.job.priority).then(insertion),
            Self::Size => a
                .job
                .metadata
                .size
                .cmp(&b.job.metadata.size)
                .then(insertion),
            Self::Alpha => a
                .job
                .metadata
                .name
                .cmp(&b.job.metadata.name)
                .then(insertion),
        }
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Fifo => "fifo",
            Self::Lifo => "lifo",
            Self::Priority => "priority",
            Self::Size => "size",
            Self::Alpha => "alpha",
        };
        write!(f, "{name}")
    }
}
