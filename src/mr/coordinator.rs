//! Scheduler core: task assignment, phase gating, and completion handling
//! (spec §4.3), plus the RPC surface that exposes it (spec §4.6).

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use futures::future::{ready, Ready};
use serde::{Deserialize, Serialize};
use tarpc::context;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::mr::model::{Job, JobMap, JobState, Task, TaskMap, TaskState, TaskType, WorkerMap, WorkerRecord};
use crate::mr::splitter;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitJobResponse {
    pub job_id: String,
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetJobStatusResponse {
    pub job_id: String,
    pub status: String,
    pub map_progress: i32,
    pub reduce_progress: i32,
    pub total_maps: i32,
    pub total_reduces: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetTaskResponse {
    pub task_id: String,
    pub task_type: String,
    pub job_id: String,
    pub input_file: String,
    pub map_task_number: i32,
    pub reduce_task_number: i32,
    pub num_maps: i32,
    pub num_reduces: i32,
    pub mapper_code: Vec<u8>,
    pub reducer_code: Vec<u8>,
}

impl GetTaskResponse {
    fn none() -> Self {
        Self {
            task_id: String::new(),
            task_type: "NONE".to_string(),
            job_id: String::new(),
            input_file: String::new(),
            map_task_number: -1,
            reduce_task_number: -1,
            num_maps: 0,
            num_reduces: 0,
            mapper_code: Vec::new(),
            reducer_code: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportTaskCompleteResponse {
    pub acknowledged: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatResponse {
    pub acknowledged: bool,
}

/// Directory defaults matching spec §6's filesystem layout.
#[derive(Debug, Clone)]
pub struct Paths {
    pub intermediate_dir: PathBuf,
    pub output_dir: PathBuf,
}

impl Default for Paths {
    fn default() -> Self {
        Self {
            intermediate_dir: PathBuf::from("/intermediate"),
            output_dir: PathBuf::from("/output"),
        }
    }
}

/// All coordinator state lives under a single mutex, per spec §5: RPC
/// handlers, the straggler monitor, and the worker-liveness monitor all
/// share this one critical section.
#[derive(Debug, Default)]
pub struct CoordinatorState {
    pub jobs: JobMap,
    pub tasks: TaskMap,
    pub workers: WorkerMap,
}

impl CoordinatorState {
    /// Finds an idle, non-backup task of `task_type` belonging to a RUNNING
    /// job (spec §4.3 selection policy, primary scan).
    fn find_idle_primary(&self, task_type: TaskType) -> Option<String> {
        self.tasks
            .values()
            .find(|t| t.task_type == task_type && t.state == TaskState::Idle && !t.is_backup)
            .map(|t| t.task_id.clone())
    }

    /// Second pass: an idle backup task, dispatched only once the primary
    /// scan above is exhausted (spec §9 open question 3 — explicit, rather
    /// than relying on map iteration order).
    fn find_idle_backup(&self, task_type: TaskType) -> Option<String> {
        self.tasks
            .values()
            .find(|t| t.task_type == task_type && t.state == TaskState::Idle && t.is_backup)
            .map(|t| t.task_id.clone())
    }

    /// Phase gate: true iff every non-backup map task of `job_id` is
    /// COMPLETED. Scoped to the single job being considered — spec §9 open
    /// question 2 flags the reference's cross-job gating as likely a bug;
    /// this crate implements the per-job fix, matching Testable Property 3
    /// in spec §8.
    fn job_maps_complete(&self, job_id: &str) -> bool {
        let Some(job) = self.jobs.get(job_id) else {
            return false;
        };
        job.map_task_ids.iter().all(|id| {
            self.tasks
                .get(id)
                .map(|t| t.is_backup || t.state == TaskState::Completed)
                .unwrap_or(true)
        })
    }

    /// Reverse lookup for backup-finishes-first: the primary task (if any)
    /// whose `backup_task_id` points at `backup_id`.
    fn find_primary_for_backup(&self, backup_id: &str) -> Option<String> {
        self.tasks
            .values()
            .find(|t| t.backup_task_id.as_deref() == Some(backup_id))
            .map(|t| t.task_id.clone())
    }

    fn assign(&mut self, task_id: &str, worker_id: &str) -> GetTaskResponse {
        let task = self.tasks.get_mut(task_id).expect("task_id came from this state");
        task.state = TaskState::InProgress;
        task.worker_id = Some(worker_id.to_string());
        task.start_time = Some(Utc::now());

        let job_id = task.job_id.clone();
        let task_type = task.task_type;
        let input_file = task.input_file.clone().unwrap_or_default();
        let map_task_number = task.map_task_number.unwrap_or(-1);
        let reduce_task_number = task.reduce_task_number.unwrap_or(-1);
        let response_task_id = task.task_id.clone();

        let job = self.jobs.get(&job_id).expect("job referenced by task must exist");
        GetTaskResponse {
            task_id: response_task_id,
            task_type: task_type.as_str().to_string(),
            job_id,
            input_file,
            map_task_number,
            reduce_task_number,
            num_maps: job.num_maps,
            num_reduces: job.num_reduces,
            mapper_code: job.mapper_code.clone(),
            reducer_code: job.reducer_code.clone(),
        }
    }

    /// Job-completion predicate (spec §4.3): COMPLETED iff every map task
    /// AND every reduce task is COMPLETED. Backups share state with their
    /// primary via completion propagation, so this needs no special case
    /// for them.
    fn maybe_complete_job(&mut self, job_id: &str) {
        let Some(job) = self.jobs.get(job_id) else { return };
        let all_done = job
            .map_task_ids
            .iter()
            .chain(job.reduce_task_ids.iter())
            .all(|id| self.tasks.get(id).map(|t| t.state == TaskState::Completed).unwrap_or(true));

        if all_done {
            if let Some(job) = self.jobs.get_mut(job_id) {
                if job.state != JobState::Completed {
                    job.state = JobState::Completed;
                    info!(job_id, "job completed");
                }
            }
        }
    }
}

#[derive(Clone)]
pub struct Coordinator {
    state: Arc<Mutex<CoordinatorState>>,
    paths: Arc<Paths>,
}

impl Coordinator {
    pub fn new(paths: Paths) -> Self {
        Self {
            state: Arc::new(Mutex::new(CoordinatorState::default())),
            paths: Arc::new(paths),
        }
    }

    pub fn state_handle(&self) -> Arc<Mutex<CoordinatorState>> {
        Arc::clone(&self.state)
    }
}

#[tarpc::service]
pub trait Server {
    async fn submit_job(
        input_path: String,
        output_path: String,
        mapper_code: Vec<u8>,
        reducer_code: Vec<u8>,
        num_maps: i32,
        num_reduces: i32,
    ) -> SubmitJobResponse;
    async fn get_job_status(job_id: String) -> GetJobStatusResponse;
    async fn get_task(worker_id: String) -> GetTaskResponse;
    async fn report_task_complete(
        worker_id: String,
        task_id: String,
        success: bool,
        error_message: String,
    ) -> ReportTaskCompleteResponse;
    async fn heartbeat(worker_id: String, current_task_id: String) -> HeartbeatResponse;
}

#[tarpc::server]
impl Server for Coordinator {
    type SubmitJobFut = Ready<SubmitJobResponse>;
    type GetJobStatusFut = Ready<GetJobStatusResponse>;
    type GetTaskFut = Ready<GetTaskResponse>;
    type ReportTaskCompleteFut = Ready<ReportTaskCompleteResponse>;
    type HeartbeatFut = Ready<HeartbeatResponse>;

    /// Splits the input (outside the lock, spec §9 open question 5) and
    /// then atomically registers the job and all M+R tasks, or registers
    /// nothing (spec §4.6 atomicity requirement). A missing input file is a
    /// hard failure (spec §9 open question 1), not a zero-map job.
    fn submit_job(
        self,
        _: context::Context,
        input_path: String,
        output_path: String,
        mapper_code: Vec<u8>,
        reducer_code: Vec<u8>,
        num_maps: i32,
        num_reduces: i32,
    ) -> Self::SubmitJobFut {
        // Scoped by job_id so concurrently-submitted jobs never share a
        // staging path (spec §8 Testable Property S4: disjoint per-job
        // state); generated up front purely to namespace this directory,
        // the job itself isn't registered until the lock below.
        let job_id = Uuid::new_v4().to_string();
        let staging_dir = self.paths.intermediate_dir.join(&job_id);
        let chunk_paths = match splitter::split_input(&input_path, num_maps, &staging_dir) {
            Ok(paths) => paths,
            Err(e) => {
                error!(input_path, error = %e, "submit_job rejected: input split failed");
                return ready(SubmitJobResponse {
                    job_id: String::new(),
                    success: false,
                    message: format!("failed to split input: {e}"),
                });
            }
        };

        let mut job = Job::new(
            job_id.clone(),
            input_path,
            output_path,
            mapper_code,
            reducer_code,
            num_maps,
            num_reduces,
        );

        let mut new_tasks = HashMap::new();
        for (i, chunk_path) in chunk_paths.into_iter().enumerate() {
            let task_id = format!("{job_id}-map-{i}");
            new_tasks.insert(
                task_id.clone(),
                Task::new_map(task_id.clone(), job_id.clone(), chunk_path.to_string_lossy().into_owned(), i as i32),
            );
            job.map_task_ids.push(task_id);
        }
        for i in 0..num_reduces {
            let task_id = format!("{job_id}-reduce-{i}");
            new_tasks.insert(task_id.clone(), Task::new_reduce(task_id.clone(), job_id.clone(), i));
            job.reduce_task_ids.push(task_id);
        }

        job.state = JobState::Running;
        let num_maps_created = job.map_task_ids.len();
        let num_reduces_created = job.reduce_task_ids.len();

        let mut state = self.state.lock().unwrap();
        state.jobs.insert(job_id.clone(), job);
        state.tasks.extend(new_tasks);
        drop(state);

        info!(job_id, num_maps_created, num_reduces_created, "job submitted");
        ready(SubmitJobResponse {
            job_id: job_id.clone(),
            success: true,
            message: format!("job submitted with {num_maps_created} map tasks and {num_reduces_created} reduce tasks"),
        })
    }

    fn get_job_status(self, _: context::Context, job_id: String) -> Self::GetJobStatusFut {
        let state = self.state.lock().unwrap();
        let Some(job) = state.jobs.get(&job_id) else {
            return ready(GetJobStatusResponse {
                job_id,
                status: "NOT_FOUND".to_string(),
                map_progress: 0,
                reduce_progress: 0,
                total_maps: 0,
                total_reduces: 0,
            });
        };

        let map_progress = job
            .map_task_ids
            .iter()
            .filter(|id| state.tasks.get(*id).map(|t| t.state == TaskState::Completed).unwrap_or(false))
            .count() as i32;
        let reduce_progress = job
            .reduce_task_ids
            .iter()
            .filter(|id| state.tasks.get(*id).map(|t| t.state == TaskState::Completed).unwrap_or(false))
            .count() as i32;

        ready(GetJobStatusResponse {
            job_id: job.job_id.clone(),
            status: job.state.as_str().to_string(),
            map_progress,
            reduce_progress,
            total_maps: job.map_task_ids.len() as i32,
            total_reduces: job.reduce_task_ids.len() as i32,
        })
    }

    /// Selection policy (spec §4.3): MAP tasks first; REDUCE tasks only once
    /// this job's map phase is complete; primary tasks before backups.
    fn get_task(self, _: context::Context, worker_id: String) -> Self::GetTaskFut {
        let mut state = self.state.lock().unwrap();

        if let Some(task_id) = state.find_idle_primary(TaskType::Map) {
            let resp = state.assign(&task_id, &worker_id);
            info!(task_id = %resp.task_id, worker_id, "assigned map task");
            return ready(resp);
        }
        if let Some(task_id) = state.find_idle_backup(TaskType::Map) {
            let resp = state.assign(&task_id, &worker_id);
            info!(task_id = %resp.task_id, worker_id, "assigned backup map task");
            return ready(resp);
        }

        if let Some(task_id) = state.find_idle_primary(TaskType::Reduce) {
            let job_id = state.tasks.get(&task_id).unwrap().job_id.clone();
            if state.job_maps_complete(&job_id) {
                let resp = state.assign(&task_id, &worker_id);
                info!(task_id = %resp.task_id, worker_id, "assigned reduce task");
                return ready(resp);
            }
        }
        if let Some(task_id) = state.find_idle_backup(TaskType::Reduce) {
            let job_id = state.tasks.get(&task_id).unwrap().job_id.clone();
            if state.job_maps_complete(&job_id) {
                let resp = state.assign(&task_id, &worker_id);
                info!(task_id = %resp.task_id, worker_id, "assigned backup reduce task");
                return ready(resp);
            }
        }

        ready(GetTaskResponse::none())
    }

    /// Completion handling (spec §4.3): unknown task -> `acknowledged=false`;
    /// already-COMPLETED task -> idempotent no-op; success propagates to a
    /// linked backup/primary and re-checks job completion; failure marks the
    /// task FAILED with no retry (spec §7, §9 open question 4).
    fn report_task_complete(
        self,
        _: context::Context,
        worker_id: String,
        task_id: String,
        success: bool,
        error_message: String,
    ) -> Self::ReportTaskCompleteFut {
        let mut state = self.state.lock().unwrap();

        if !state.tasks.contains_key(&task_id) {
            warn!(task_id, worker_id, "report_task_complete for unknown task");
            return ready(ReportTaskCompleteResponse { acknowledged: false });
        }

        if state.tasks[&task_id].state == TaskState::Completed {
            info!(task_id, "duplicate completion, already completed");
            return ready(ReportTaskCompleteResponse { acknowledged: true });
        }

        let job_id = state.tasks[&task_id].job_id.clone();

        if success {
            let task = state.tasks.get_mut(&task_id).unwrap();
            task.state = TaskState::Completed;
            task.end_time = Some(Utc::now());
            let backup_task_id = task.backup_task_id.clone();
            let is_backup = task.is_backup;
            info!(task_id, worker_id, "task completed");

            // Completion propagates both ways between a primary and its
            // linked backup (spec §8 Testable Property 5): the primary
            // carries the forward link, so a finishing backup needs the
            // reverse lookup to find and complete its primary.
            if let Some(backup_id) = backup_task_id {
                if let Some(backup) = state.tasks.get_mut(&backup_id) {
                    if backup.state != TaskState::Completed {
                        backup.state = TaskState::Completed;
                        backup.end_time = Some(Utc::now());
                        info!(backup_id, primary_task_id = %task_id, "marking backup completed (primary finished first)");
                    }
                }
            } else if is_backup {
                if let Some(primary_id) = state.find_primary_for_backup(&task_id) {
                    if let Some(primary) = state.tasks.get_mut(&primary_id) {
                        if primary.state != TaskState::Completed {
                            primary.state = TaskState::Completed;
                            primary.end_time = Some(Utc::now());
                            info!(primary_id, backup_task_id = %task_id, "marking primary completed (backup finished first)");
                        }
                    }
                }
            }

            state.maybe_complete_job(&job_id);
        } else {
            let task = state.tasks.get_mut(&task_id).unwrap();
            task.state = TaskState::Failed;
            error!(task_id, worker_id, error_message, "task failed, job will remain RUNNING (no retry)");
        }

        ready(ReportTaskCompleteResponse { acknowledged: true })
    }

    fn heartbeat(self, _: context::Context, worker_id: String, current_task_id: String) -> Self::HeartbeatFut {
        let mut state = self.state.lock().unwrap();
        state.workers.insert(
            worker_id,
            WorkerRecord {
                last_heartbeat: Utc::now(),
                current_task_id: if current_task_id.is_empty() { None } else { Some(current_task_id) },
            },
        );
        ready(HeartbeatResponse { acknowledged: true })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn paths(dir: &std::path::Path) -> Paths {
        Paths {
            intermediate_dir: dir.join("intermediate"),
            output_dir: dir.join("output"),
        }
    }

    fn submit(coordinator: &Coordinator, input: &std::path::Path, num_maps: i32, num_reduces: i32) -> SubmitJobResponse {
        futures::executor::block_on(
            coordinator
                .clone()
                .submit_job(
                    context::current(),
                    input.to_string_lossy().into_owned(),
                    "/output".to_string(),
                    b"wordcount".to_vec(),
                    b"wordcount".to_vec(),
                    num_maps,
                    num_reduces,
                ),
        )
    }

    #[test]
    fn submit_job_is_atomic_on_missing_input() {
        let dir = tempdir().unwrap();
        let coordinator = Coordinator::new(paths(dir.path()));
        let resp = submit(&coordinator, &dir.path().join("missing.txt"), 2, 2);
        assert!(!resp.success);
        assert!(resp.job_id.is_empty());

        let state = coordinator.state_handle();
        let state = state.lock().unwrap();
        assert!(state.jobs.is_empty());
        assert!(state.tasks.is_empty());
    }

    #[test]
    fn phase_gate_blocks_reduce_until_this_jobs_maps_complete() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("input.txt");
        std::fs::write(&input, "a\nb\n").unwrap();
        let coordinator = Coordinator::new(paths(dir.path()));
        let resp = submit(&coordinator, &input, 2, 1);
        assert!(resp.success);

        // Both map tasks get assigned; reduce must stay gated.
        let t1 = futures::executor::block_on(coordinator.clone().get_task(context::current(), "w1".into()));
        assert_eq!(t1.task_type, "MAP");
        let t2 = futures::executor::block_on(coordinator.clone().get_task(context::current(), "w2".into()));
        assert_eq!(t2.task_type, "MAP");

        let none = futures::executor::block_on(coordinator.clone().get_task(context::current(), "w3".into()));
        assert_eq!(none.task_type, "NONE");

        futures::executor::block_on(coordinator.clone().report_task_complete(
            context::current(),
            "w1".into(),
            t1.task_id.clone(),
            true,
            String::new(),
        ));
        // Still one map in progress -> reduce still gated.
        let still_none = futures::executor::block_on(coordinator.clone().get_task(context::current(), "w3".into()));
        assert_eq!(still_none.task_type, "NONE");

        futures::executor::block_on(coordinator.clone().report_task_complete(
            context::current(),
            "w2".into(),
            t2.task_id.clone(),
            true,
            String::new(),
        ));
        let reduce = futures::executor::block_on(coordinator.clone().get_task(context::current(), "w3".into()));
        assert_eq!(reduce.task_type, "REDUCE");
    }

    #[test]
    fn duplicate_completion_is_idempotent_and_acknowledged() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("input.txt");
        std::fs::write(&input, "a\n").unwrap();
        let coordinator = Coordinator::new(paths(dir.path()));
        let resp = submit(&coordinator, &input, 1, 1);
        let task = futures::executor::block_on(coordinator.clone().get_task(context::current(), "w1".into()));

        let r1 = futures::executor::block_on(coordinator.clone().report_task_complete(
            context::current(),
            "w1".into(),
            task.task_id.clone(),
            true,
            String::new(),
        ));
        let r2 = futures::executor::block_on(coordinator.clone().report_task_complete(
            context::current(),
            "w1".into(),
            task.task_id.clone(),
            true,
            String::new(),
        ));
        assert!(r1.acknowledged);
        assert!(r2.acknowledged);

        let state = coordinator.state_handle();
        let state = state.lock().unwrap();
        assert_eq!(state.tasks[&task.task_id].state, TaskState::Completed);
        let _ = resp;
    }

    #[test]
    fn unknown_task_completion_is_not_acknowledged() {
        let dir = tempdir().unwrap();
        let coordinator = Coordinator::new(paths(dir.path()));
        let r = futures::executor::block_on(coordinator.clone().report_task_complete(
            context::current(),
            "w1".into(),
            "no-such-task".into(),
            true,
            String::new(),
        ));
        assert!(!r.acknowledged);
    }

    #[test]
    fn backup_completion_propagates_to_primary_and_vice_versa() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("input.txt");
        std::fs::write(&input, "a\n").unwrap();
        let coordinator = Coordinator::new(paths(dir.path()));
        submit(&coordinator, &input, 1, 1);

        let primary_id;
        {
            let state = coordinator.state_handle();
            let mut state = state.lock().unwrap();
            primary_id = state.jobs.values().next().unwrap().map_task_ids[0].clone();
            state.tasks.get_mut(&primary_id).unwrap().state = TaskState::InProgress;
            state.tasks.get_mut(&primary_id).unwrap().start_time = Some(Utc::now());
            let backup = state.tasks.get(&primary_id).unwrap().new_backup();
            let backup_id = backup.task_id.clone();
            state.tasks.insert(backup_id.clone(), backup);
            state.tasks.get_mut(&primary_id).unwrap().backup_task_id = Some(backup_id);
        }

        let r = futures::executor::block_on(coordinator.clone().report_task_complete(
            context::current(),
            "w1".into(),
            primary_id.clone(),
            true,
            String::new(),
        ));
        assert!(r.acknowledged);

        let state = coordinator.state_handle();
        let state = state.lock().unwrap();
        let backup_id = state.tasks[&primary_id].backup_task_id.clone().unwrap();
        assert_eq!(state.tasks[&backup_id].state, TaskState::Completed);
    }

    #[test]
    fn backup_finishing_first_completes_the_primary_too() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("input.txt");
        std::fs::write(&input, "a\n").unwrap();
        let coordinator = Coordinator::new(paths(dir.path()));
        submit(&coordinator, &input, 1, 1);

        let primary_id;
        let backup_id;
        {
            let state = coordinator.state_handle();
            let mut state = state.lock().unwrap();
            primary_id = state.jobs.values().next().unwrap().map_task_ids[0].clone();
            state.tasks.get_mut(&primary_id).unwrap().state = TaskState::InProgress;
            state.tasks.get_mut(&primary_id).unwrap().start_time = Some(Utc::now());
            let backup = state.tasks.get(&primary_id).unwrap().new_backup();
            backup_id = backup.task_id.clone();
            state.tasks.insert(backup_id.clone(), backup);
            state.tasks.get_mut(&primary_id).unwrap().backup_task_id = Some(backup_id.clone());
        }

        let r = futures::executor::block_on(coordinator.clone().report_task_complete(
            context::current(),
            "w2".into(),
            backup_id.clone(),
            true,
            String::new(),
        ));
        assert!(r.acknowledged);

        let state = coordinator.state_handle();
        let state = state.lock().unwrap();
        assert_eq!(state.tasks[&primary_id].state, TaskState::Completed);
        let job = state.jobs.values().next().unwrap();
        assert_eq!(job.state, JobState::Completed);
    }

    #[test]
    fn failed_task_is_not_retried_and_job_stays_running() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("input.txt");
        std::fs::write(&input, "a\n").unwrap();
        let coordinator = Coordinator::new(paths(dir.path()));
        submit(&coordinator, &input, 1, 1);
        let task = futures::executor::block_on(coordinator.clone().get_task(context::current(), "w1".into()));

        futures::executor::block_on(coordinator.clone().report_task_complete(
            context::current(),
            "w1".into(),
            task.task_id.clone(),
            false,
            "boom".into(),
        ));

        let state = coordinator.state_handle();
        let state = state.lock().unwrap();
        assert_eq!(state.tasks[&task.task_id].state, TaskState::Failed);
        let job = state.jobs.values().next().unwrap();
        assert_eq!(job.state, JobState::Running);
    }
}
