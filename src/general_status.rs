//! Structured outcome records attached to nodes that reached a terminal result.
//!
//! A [`BehaviorResult`] only says whether a node succeeded. A [`GeneralStatus`]
//! says why: an integer status code, optional metadata about the hardware or task
//! that produced the outcome, and the records of the children that were consumed
//! on the way, nested in the order they were consumed. The child that decided the
//! outcome is not nested: its record is merged into the parent's.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::BehaviorResult;

pub type StatusCode = i32;

/// Reserved status codes.
pub mod codes {
    use super::StatusCode;

    pub const OK: StatusCode = 0;
    /// A node failed without anyone reporting a more specific code.
    pub const NODE_FAILURE: StatusCode = 2_000_000;
    /// More than one child of a parallel node failed without a specific code.
    pub const PARALLEL_MULTIPLE_FAILURES: StatusCode = 2_000_001;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp {
    pub seconds: i64,
    pub nanos: i32,
}

impl Timestamp {
    pub fn now() -> Self {
        let now = chrono::Utc::now();
        Self {
            seconds: now.timestamp(),
            nanos: now.timestamp_subsec_nanos() as i32,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HardwareInfo {
    pub id: u64,
    pub error_source: i32,
    pub additional_error_code: Option<u32>,
    pub error_description: Option<String>,
    pub hardware_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskInfo {
    pub id: u64,
    pub task_id: u64,
    pub host_id: u64,
    pub host_name: String,
}

/// Optional metadata a node may annotate its outcome with.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusDetails {
    pub source: Option<i32>,
    pub hardware_info: Option<HardwareInfo>,
    pub task_info: Option<TaskInfo>,
    pub message: Option<String>,
    pub shuttle_id: Option<u64>,
    pub station_name: Option<String>,
}

impl StatusDetails {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Takes every field `other` has set.
    pub fn overwrite_with(&mut self, other: &StatusDetails) {
        if other.source.is_some() {
            self.source = other.source;
        }
        if other.hardware_info.is_some() {
            self.hardware_info = other.hardware_info.clone();
        }
        if other.task_info.is_some() {
            self.task_info = other.task_info.clone();
        }
        if other.message.is_some() {
            self.message = other.message.clone();
        }
        if other.shuttle_id.is_some() {
            self.shuttle_id = other.shuttle_id;
        }
        if other.station_name.is_some() {
            self.station_name = other.station_name.clone();
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneralStatus {
    /// Id of the node that produced the record.
    pub id: u64,
    pub timestamp: Timestamp,
    pub status_code: StatusCode,
    pub details: StatusDetails,
    pub underlying: Vec<GeneralStatus>,
    pub uuid: Uuid,
}

impl GeneralStatus {
    pub fn new(id: u64, status_code: StatusCode) -> Self {
        Self {
            id,
            timestamp: Timestamp::now(),
            status_code,
            details: StatusDetails::default(),
            underlying: vec![],
            uuid: Uuid::new_v4(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status_code == codes::OK
    }

    /// A copy without the nested records.
    pub fn shallow_copy(&self) -> Self {
        Self {
            id: self.id,
            timestamp: self.timestamp,
            status_code: self.status_code,
            details: self.details.clone(),
            underlying: vec![],
            uuid: self.uuid,
        }
    }

    /// Overwrites every field but the nested records with those of `other`.
    pub fn merge_data_shallow(&mut self, other: &GeneralStatus) {
        self.id = other.id;
        self.timestamp = other.timestamp;
        self.status_code = other.status_code;
        self.details = other.details.clone();
        self.uuid = other.uuid;
    }

    /// Visits this record and every nested one depth first, with the nesting depth.
    pub fn walk(&self, f: &mut impl FnMut(&GeneralStatus, usize)) {
        fn walk_rec(status: &GeneralStatus, depth: usize, f: &mut impl FnMut(&GeneralStatus, usize)) {
            f(status, depth);
            for child in &status.underlying {
                walk_rec(child, depth + 1, f);
            }
        }
        walk_rec(self, 0, f)
    }

    /// Finds the first nested record (including this one) produced by node `id`.
    pub fn find(&self, id: u64) -> Option<&GeneralStatus> {
        if self.id == id {
            return Some(self);
        }
        self.underlying.iter().find_map(|child| child.find(id))
    }
}

/// What a node collected during the current cycle, turned into a
/// [`GeneralStatus`] once the node reaches a terminal result.
#[derive(Debug, Default)]
pub(crate) struct StatusDraft {
    code: Option<StatusCode>,
    details: StatusDetails,
    adopted: Option<GeneralStatus>,
    underlying: Vec<GeneralStatus>,
    failures: Vec<GeneralStatus>,
}

impl StatusDraft {
    pub fn set_code(&mut self, code: StatusCode) {
        self.code = Some(code);
    }

    pub fn details_mut(&mut self) -> &mut StatusDetails {
        &mut self.details
    }

    pub fn nest(&mut self, status: GeneralStatus) {
        self.underlying.push(status);
    }

    /// Makes `status` the deciding record. A record adopted earlier in the cycle
    /// is nested instead.
    pub fn adopt(&mut self, status: GeneralStatus) {
        if let Some(previous) = self.adopted.replace(status) {
            self.underlying.push(previous);
        }
    }

    /// Registers a failed child for the multiple failures rule of parallel nodes.
    pub fn note_failure(&mut self, status: GeneralStatus) {
        self.failures.push(status);
    }

    pub fn finalize(self, id: u64, result: BehaviorResult) -> GeneralStatus {
        let adopted_code = self
            .adopted
            .as_ref()
            .map(|status| status.status_code)
            .filter(|code| *code != codes::OK);
        let multiple_failures =
            self.failures.len() > 1 && self.failures.iter().all(|status| status.is_ok());

        let status_code = match (result, self.code) {
            (_, Some(code)) => code,
            (BehaviorResult::Fail, None) if multiple_failures => {
                codes::PARALLEL_MULTIPLE_FAILURES
            }
            (BehaviorResult::Fail, None) => adopted_code.unwrap_or(codes::NODE_FAILURE),
            _ => codes::OK,
        };

        let mut status = GeneralStatus::new(id, status_code);
        status.underlying = self.underlying;
        if let Some(adopted) = self.adopted {
            status.details = adopted.details;
            // Records nested by the deciding child move up one level.
            status.underlying.extend(adopted.underlying);
        }
        status.details.overwrite_with(&self.details);
        status
    }
}
