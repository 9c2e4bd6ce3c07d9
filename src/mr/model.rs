//! In-memory job/task entities, state enums, and lookup helpers (spec §3, §4.1).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskType {
    Map,
    Reduce,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::Map => "MAP",
            TaskType::Reduce => "REDUCE",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskState {
    Idle,
    InProgress,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "PENDING",
            JobState::Running => "RUNNING",
            JobState::Completed => "COMPLETED",
            JobState::Failed => "FAILED",
        }
    }
}

/// A single unit of work assignable to a worker.
///
/// Identified by `{job-id}-{map|reduce}-{index}`, with a `-backup` suffix
/// for speculative copies (spec §3).
#[derive(Debug, Clone)]
pub struct Task {
    pub task_id: String,
    pub task_type: TaskType,
    pub job_id: String,
    pub state: TaskState,
    pub worker_id: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    /// Immutable after creation.
    pub is_backup: bool,
    pub backup_task_id: Option<String>,

    // MAP-only fields.
    pub input_file: Option<String>,
    pub map_task_number: Option<i32>,

    // REDUCE-only fields.
    pub reduce_task_number: Option<i32>,
}

impl Task {
    pub fn new_map(task_id: String, job_id: String, input_file: String, map_task_number: i32) -> Self {
        Self {
            task_id,
            task_type: TaskType::Map,
            job_id,
            state: TaskState::Idle,
            worker_id: None,
            start_time: None,
            end_time: None,
            is_backup: false,
            backup_task_id: None,
            input_file: Some(input_file),
            map_task_number: Some(map_task_number),
            reduce_task_number: None,
        }
    }

    pub fn new_reduce(task_id: String, job_id: String, reduce_task_number: i32) -> Self {
        Self {
            task_id,
            task_type: TaskType::Reduce,
            job_id,
            state: TaskState::Idle,
            worker_id: None,
            start_time: None,
            end_time: None,
            is_backup: false,
            backup_task_id: None,
            input_file: None,
            map_task_number: None,
            reduce_task_number: Some(reduce_task_number),
        }
    }

    /// Build the backup (speculative) twin of this task: same type and
    /// per-type parameters, `is_backup = true`, state `Idle` (spec §4.4).
    pub fn new_backup(&self) -> Self {
        Self {
            task_id: format!("{}-backup", self.task_id),
            task_type: self.task_type,
            job_id: self.job_id.clone(),
            state: TaskState::Idle,
            worker_id: None,
            start_time: None,
            end_time: None,
            is_backup: true,
            backup_task_id: None,
            input_file: self.input_file.clone(),
            map_task_number: self.map_task_number,
            reduce_task_number: self.reduce_task_number,
        }
    }
}

/// A user-submitted MapReduce workload: M map tasks + R reduce tasks over a
/// single input (spec §3).
#[derive(Debug, Clone)]
pub struct Job {
    pub job_id: String,
    pub input_path: String,
    pub output_path: String,
    pub mapper_code: Vec<u8>,
    pub reducer_code: Vec<u8>,
    pub num_maps: i32,
    pub num_reduces: i32,
    pub state: JobState,
    pub created_at: DateTime<Utc>,
    /// Task IDs owned by this job, in creation order.
    pub map_task_ids: Vec<String>,
    pub reduce_task_ids: Vec<String>,
}

impl Job {
    pub fn new(
        job_id: String,
        input_path: String,
        output_path: String,
        mapper_code: Vec<u8>,
        reducer_code: Vec<u8>,
        num_maps: i32,
        num_reduces: i32,
    ) -> Self {
        Self {
            job_id,
            input_path,
            output_path,
            mapper_code,
            reducer_code,
            num_maps,
            num_reduces,
            state: JobState::Pending,
            created_at: Utc::now(),
            map_task_ids: Vec::new(),
            reduce_task_ids: Vec::new(),
        }
    }
}

/// Last-heartbeat timestamp for a worker, used only for liveness signaling
/// (spec §3) — never for task ownership.
#[derive(Debug, Clone)]
pub struct WorkerRecord {
    pub last_heartbeat: DateTime<Utc>,
    pub current_task_id: Option<String>,
}

pub type TaskMap = HashMap<String, Task>;
pub type JobMap = HashMap<String, Job>;
pub type WorkerMap = HashMap<String, WorkerRecord>;
