use crate::error::FleetError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Kind of record stream a worker can process.
///
/// Declaration order is the processing priority; `Ord` follows it, so a
/// `BTreeMap<TaskKind, _>` iterates in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TaskKind {
    #[serde(rename = "advertiser")]
    Advertiser,
    #[serde(rename = "device_data")]
    Device,
    #[serde(rename = "location_data")]
    Location,
    #[serde(rename = "campaign")]
    Campaign,
    #[serde(rename = "total_data")]
    TotalData,
}

impl TaskKind {
    /// Every kind, in processing priority order.
    pub const ALL: [TaskKind; 5] = [
        TaskKind::Advertiser,
        TaskKind::Device,
        TaskKind::Location,
        TaskKind::Campaign,
        TaskKind::TotalData,
    ];

    /// One-letter tag used by operators.
    pub fn tag(self) -> char {
        match self {
            TaskKind::Advertiser => 'A',
            TaskKind::Device => 'D',
            TaskKind::Location => 'L',
            TaskKind::Campaign => 'C',
            TaskKind::TotalData => 'T',
        }
    }

    /// Sink collection the kind writes to; also its record-file prefix.
    pub fn collection(self) -> &'static str {
        match self {
            TaskKind::Advertiser => "advertiser",
            TaskKind::Device => "device_data",
            TaskKind::Location => "location_data",
            TaskKind::Campaign => "campaign",
            TaskKind::TotalData => "total_data",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tag())
    }
}

/// Accepts either the tag letter (any case) or the collection name.
impl FromStr for TaskKind {
    type Err = FleetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskKind::ALL
            .into_iter()
            .find(|kind| {
                s.eq_ignore_ascii_case(&kind.tag().to_string()) || s == kind.collection()
            })
            .ok_or_else(|| FleetError::malformed(format!("unknown task kind '{}'", s)))
    }
}

/// One unit of sink work: fields to set and fields to add to a single keyed
/// document.
#[derive(Debug, Clone, PartialEq)]
pub struct SinkUpdate {
    pub collection: &'static str,
    pub key: String,
    pub set: Map<String, Value>,
    pub inc: Map<String, Value>,
}

impl SinkUpdate {
    pub fn new(collection: &'static str, key: impl Into<String>) -> Self {
        Self {
            collection,
            key: key.into(),
            set: Map::new(),
            inc: Map::new(),
        }
    }
}

/// A ready batch of raw records, one per line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordBatch {
    pub name: String,
    pub lines: Vec<String>,
}

impl RecordBatch {
    pub fn new(name: impl Into<String>, text: &str) -> Self {
        Self {
            name: name.into(),
            lines: text
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(str::to_string)
                .collect(),
        }
    }
}

/// Operator-set targets for the pool.
///
/// Shared with the membership delegate so join summaries and state snapshots
/// can report them without holding the pool itself.
#[derive(Debug)]
pub struct PoolTargets {
    workers: AtomicUsize,
    rate: AtomicU64,
}

impl PoolTargets {
    pub fn new(workers: usize, rate: u64) -> Self {
        Self {
            workers: AtomicUsize::new(workers),
            rate: AtomicU64::new(rate),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers.load(Ordering::SeqCst)
    }

    pub fn set_workers(&self, workers: usize) {
        self.workers.store(workers, Ordering::SeqCst);
    }

    pub fn rate(&self) -> u64 {
        self.rate.load(Ordering::SeqCst)
    }

    pub fn set_rate(&self, rate: u64) {
        self.rate.store(rate, Ordering::SeqCst);
    }
}

/// Helper to get the current system time in milliseconds.
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
