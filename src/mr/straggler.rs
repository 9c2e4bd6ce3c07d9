//! Straggler monitor (spec §4.4): periodic median-duration scan over each
//! RUNNING job's map and reduce phases, spawning backup tasks for
//! in-progress tasks that have overrun 1.5x the phase median.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tracing::warn;

use crate::mr::config::{STRAGGLER_BASELINE_FRACTION, STRAGGLER_PERIOD_SECS, STRAGGLER_THRESHOLD};
use crate::mr::coordinator::CoordinatorState;
use crate::mr::model::{JobState, TaskState, TaskType};

/// Scans `state` once, creating backup tasks for any stragglers found.
/// Exposed separately from the spawn loop so it can be driven directly by
/// tests without sleeping.
pub fn scan_once(state: &mut CoordinatorState) {
    let job_ids: Vec<String> = state
        .jobs
        .iter()
        .filter(|(_, j)| j.state == JobState::Running)
        .map(|(id, _)| id.clone())
        .collect();

    for job_id in job_ids {
        detect_stragglers_for_phase(state, &job_id, TaskType::Map);
        detect_stragglers_for_phase(state, &job_id, TaskType::Reduce);
    }
}

fn detect_stragglers_for_phase(state: &mut CoordinatorState, job_id: &str, task_type: TaskType) {
    let task_ids: Vec<String> = match state.jobs.get(job_id) {
        Some(job) => match task_type {
            TaskType::Map => job.map_task_ids.clone(),
            TaskType::Reduce => job.reduce_task_ids.clone(),
        },
        None => return,
    };

    let mut completed_durations: Vec<i64> = task_ids
        .iter()
        .filter_map(|id| state.tasks.get(id))
        .filter(|t| t.state == TaskState::Completed && !t.is_backup)
        .filter_map(|t| match (t.start_time, t.end_time) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds()),
            _ => None,
        })
        .collect();

    let min_needed = std::cmp::max(1, (task_ids.len() as f64 * STRAGGLER_BASELINE_FRACTION).floor() as usize);
    if completed_durations.len() < min_needed {
        return;
    }

    completed_durations.sort_unstable();
    let median_ms = completed_durations[completed_durations.len() / 2] as f64;

    let now = Utc::now();
    for task_id in task_ids {
        let needs_backup = {
            let Some(task) = state.tasks.get(&task_id) else { continue };
            if task.state != TaskState::InProgress || task.is_backup || task.backup_task_id.is_some() {
                continue;
            }
            let Some(start) = task.start_time else { continue };
            let elapsed_ms = (now - start).num_milliseconds() as f64;
            elapsed_ms > median_ms * STRAGGLER_THRESHOLD
        };

        if needs_backup {
            launch_backup(state, &task_id);
        }
    }
}

fn launch_backup(state: &mut CoordinatorState, primary_id: &str) {
    let Some(primary) = state.tasks.get(primary_id) else { return };
    let backup = primary.new_backup();
    let backup_id = backup.task_id.clone();

    state.tasks.insert(backup_id.clone(), backup);
    if let Some(primary) = state.tasks.get_mut(primary_id) {
        primary.backup_task_id = Some(backup_id.clone());
    }

    warn!(primary_task_id = primary_id, backup_task_id = %backup_id, "straggler detected, launched backup task");
}

/// Spawns the periodic background scan (spec §4.4 period = 5s), matching
/// the reference implementation's daemon thread and the teacher's
/// `tokio::spawn` style for coordinator background work.
pub fn spawn(state: Arc<Mutex<CoordinatorState>>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(Duration::from_secs(STRAGGLER_PERIOD_SECS)).await;
            let mut state = state.lock().unwrap();
            scan_once(&mut state);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mr::model::Task;
    use chrono::Duration as ChronoDuration;

    fn completed_task(id: &str, job_id: &str, duration_secs: i64) -> crate::mr::model::Task {
        let mut t = Task::new_map(id.to_string(), job_id.to_string(), "chunk".to_string(), 0);
        let start = Utc::now() - ChronoDuration::seconds(duration_secs);
        t.state = TaskState::Completed;
        t.start_time = Some(start);
        t.end_time = Some(start + ChronoDuration::seconds(duration_secs));
        t
    }

    fn in_progress_task(id: &str, job_id: &str, elapsed_secs: i64) -> crate::mr::model::Task {
        let mut t = Task::new_map(id.to_string(), job_id.to_string(), "chunk".to_string(), 0);
        t.state = TaskState::InProgress;
        t.start_time = Some(Utc::now() - ChronoDuration::seconds(elapsed_secs));
        t
    }

    fn running_job(job_id: &str, task_ids: Vec<String>) -> crate::mr::model::Job {
        let mut job = crate::mr::model::Job::new(
            job_id.to_string(),
            "input".to_string(),
            "output".to_string(),
            b"wordcount".to_vec(),
            b"wordcount".to_vec(),
            task_ids.len() as i32,
            0,
        );
        job.state = JobState::Running;
        job.map_task_ids = task_ids;
        job
    }

    #[test]
    fn no_backup_without_enough_baseline_samples() {
        let mut state = CoordinatorState::default();
        let job_id = "job-1";
        let slow = in_progress_task("job-1-map-0", job_id, 100);
        state.tasks.insert(slow.task_id.clone(), slow);
        state.jobs.insert(job_id.to_string(), running_job(job_id, vec!["job-1-map-0".to_string()]));

        scan_once(&mut state);
        assert!(state.tasks["job-1-map-0"].backup_task_id.is_none());
    }

    #[test]
    fn straggler_past_threshold_gets_a_backup() {
        let mut state = CoordinatorState::default();
        let job_id = "job-1";

        let fast1 = completed_task("job-1-map-0", job_id, 2);
        let fast2 = completed_task("job-1-map-1", job_id, 2);
        let fast3 = completed_task("job-1-map-2", job_id, 2);
        let slow = in_progress_task("job-1-map-3", job_id, 10); // > 1.5 * 2s median

        let ids = vec![
            fast1.task_id.clone(),
            fast2.task_id.clone(),
            fast3.task_id.clone(),
            slow.task_id.clone(),
        ];
        for t in [fast1, fast2, fast3, slow] {
            state.tasks.insert(t.task_id.clone(), t);
        }
        state.jobs.insert(job_id.to_string(), running_job(job_id, ids));

        scan_once(&mut state);

        let primary = &state.tasks["job-1-map-3"];
        assert!(primary.backup_task_id.is_some());
        let backup_id = primary.backup_task_id.clone().unwrap();
        assert_eq!(backup_id, "job-1-map-3-backup");
        assert!(state.tasks[&backup_id].is_backup);
        assert_eq!(state.tasks[&backup_id].state, TaskState::Idle);
    }

    #[test]
    fn at_most_one_backup_per_primary() {
        let mut state = CoordinatorState::default();
        let job_id = "job-1";

        let fast1 = completed_task("job-1-map-0", job_id, 1);
        let fast2 = completed_task("job-1-map-1", job_id, 1);
        let fast3 = completed_task("job-1-map-2", job_id, 1);
        let mut slow = in_progress_task("job-1-map-3", job_id, 10);
        slow.backup_task_id = Some("job-1-map-3-backup".to_string());

        let ids: Vec<String> = vec!["job-1-map-0", "job-1-map-1", "job-1-map-2", "job-1-map-3"]
            .into_iter()
            .map(String::from)
            .collect();
        for t in [fast1, fast2, fast3, slow] {
            state.tasks.insert(t.task_id.clone(), t);
        }
        state.jobs.insert(job_id.to_string(), running_job(job_id, ids));

        scan_once(&mut state);
        assert_eq!(
            state.tasks["job-1-map-3"].backup_task_id.as_deref(),
            Some("job-1-map-3-backup")
        );
        assert!(!state.tasks.contains_key("job-1-map-3-backup-backup"));
    }
}
