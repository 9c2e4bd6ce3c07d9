//! Worker executor (spec §4.7): fetch task, load user code from the
//! function registry, run it, write intermediates/output, report back.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tarpc::context;
use tracing::{error, info, warn};

use crate::mr::config::{
    HEARTBEAT_PERIOD_SECS, POLL_BACKOFF_SECS, RPC_ERROR_BACKOFF_SECS, SIMULATED_STRAGGLER_DELAY_SECS,
};
use crate::mr::coordinator::{GetTaskResponse, Paths, ServerClient};
use crate::mr::error::{Error, Result};
use crate::mr::registry;
use crate::mr::shuffle;

/// One worker process. Touched only by its own process, so the task-id
/// tracked for heartbeating is the only bit of shared mutable state
/// (matches the teacher's "lock-free" design note, generalized to the
/// pull-based MAP/REDUCE loop of spec §4.7).
pub struct Worker {
    pub worker_id: String,
    pub paths: Paths,
    pub simulate_straggler: bool,
    current_task: Arc<Mutex<Option<String>>>,
}

impl Worker {
    pub fn new(worker_id: String, paths: Paths, simulate_straggler: bool) -> Self {
        Self {
            worker_id,
            paths,
            simulate_straggler,
            current_task: Arc::new(Mutex::new(None)),
        }
    }

    /// Spawns the heartbeat emitter (spec §4.7: every 5s, carrying the
    /// currently-assigned task ID or empty).
    pub fn spawn_heartbeats(&self, client: ServerClient) -> tokio::task::JoinHandle<()> {
        let worker_id = self.worker_id.clone();
        let current_task = Arc::clone(&self.current_task);
        tokio::spawn(async move {
            loop {
                let task_id = current_task.lock().unwrap().clone().unwrap_or_default();
                if let Err(e) = client.heartbeat(context::current(), worker_id.clone(), task_id).await {
                    error!(error = %e, "heartbeat failed");
                }
                tokio::time::sleep(Duration::from_secs(HEARTBEAT_PERIOD_SECS)).await;
            }
        })
    }

    /// The main worker loop (spec §4.7, §5): GetTask -> execute ->
    /// ReportTaskComplete, forever. Backs off 2s on `NONE`, 5s on any RPC
    /// error (spec §5).
    pub async fn run(&self, client: ServerClient) -> anyhow::Result<()> {
        loop {
            let task = match client.get_task(context::current(), self.worker_id.clone()).await {
                Ok(task) => task,
                Err(e) => {
                    error!(error = %e, "RPC error calling get_task");
                    tokio::time::sleep(Duration::from_secs(RPC_ERROR_BACKOFF_SECS)).await;
                    continue;
                }
            };

            if task.task_type == "NONE" {
                tokio::time::sleep(Duration::from_secs(POLL_BACKOFF_SECS)).await;
                continue;
            }

            *self.current_task.lock().unwrap() = Some(task.task_id.clone());
            info!(task_id = %task.task_id, task_type = %task.task_type, "assigned task");

            let outcome = match task.task_type.as_str() {
                "MAP" => self.execute_map(&task),
                "REDUCE" => self.execute_reduce(&task),
                other => Err(Error::UserCodeLoad(format!("unknown task type {other}"))),
            };

            let (success, error_message) = match outcome {
                Ok(()) => (true, String::new()),
                Err(e) => {
                    error!(task_id = %task.task_id, error = %e, "task failed");
                    (false, e.to_string())
                }
            };

            if let Err(e) = client
                .report_task_complete(context::current(), self.worker_id.clone(), task.task_id.clone(), success, error_message)
                .await
            {
                error!(error = %e, "RPC error calling report_task_complete");
                tokio::time::sleep(Duration::from_secs(RPC_ERROR_BACKOFF_SECS)).await;
            }

            *self.current_task.lock().unwrap() = None;
        }
    }

    fn maybe_simulate_straggler(&self) {
        if self.simulate_straggler {
            warn!("SIMULATING STRAGGLER: sleeping before executing task");
            std::thread::sleep(Duration::from_secs(SIMULATED_STRAGGLER_DELAY_SECS));
        }
    }

    /// Execute MAP (spec §4.7): read the chunk, run the mapper per line,
    /// partition by `hash(key) mod R`, write one framed file per non-empty
    /// bucket. Per-line mapper failures are logged and the line skipped;
    /// the task still succeeds.
    pub fn execute_map(&self, task: &GetTaskResponse) -> Result<()> {
        self.maybe_simulate_straggler();

        let app = registry::resolve(&task.mapper_code)?;
        let contents = std::fs::read_to_string(&task.input_file)?;

        let mut buckets: HashMap<i32, Vec<(String, String)>> = HashMap::new();
        for line in contents.lines() {
            let pairs = (app.map)(line);
            for (key, value) in pairs {
                let partition = shuffle::partition_of(&key, task.num_reduces);
                buckets.entry(partition).or_default().push((key, value));
            }
        }

        for (partition, pairs) in buckets {
            if pairs.is_empty() {
                continue;
            }
            let path = shuffle::partition_path(&self.paths.intermediate_dir, &task.job_id, task.map_task_number, partition);
            shuffle::write_partition(&path, &pairs)?;
        }

        info!(task_id = %task.task_id, lines = contents.lines().count(), "map task complete");
        Ok(())
    }

    /// Execute REDUCE (spec §4.7): merge every map partition for this
    /// reduce index (missing files are empty partitions), group values by
    /// key, invoke the reducer in ascending key order, write tab-separated
    /// output lines. Per-key reducer failures are logged and the key
    /// skipped.
    pub fn execute_reduce(&self, task: &GetTaskResponse) -> Result<()> {
        self.maybe_simulate_straggler();

        let app = registry::resolve(&task.reducer_code)?;

        let mut grouped: HashMap<String, Vec<String>> = HashMap::new();
        for map_idx in 0..task.num_maps {
            let path = shuffle::partition_path(&self.paths.intermediate_dir, &task.job_id, map_idx, task.reduce_task_number);
            if let Some(pairs) = shuffle::read_partition(&path)? {
                for (key, value) in pairs {
                    grouped.entry(key).or_default().push(value);
                }
            }
        }

        let mut keys: Vec<&String> = grouped.keys().collect();
        keys.sort();

        let mut lines = Vec::new();
        for key in keys {
            let values: Vec<&str> = grouped[key].iter().map(String::as_str).collect();
            for (out_key, out_value) in (app.reduce)(key, values) {
                lines.push(format!("{out_key}\t{out_value}\n"));
            }
        }

        let output_path = shuffle::output_path(&self.paths.output_dir, task.reduce_task_number);
        shuffle::write_output(&output_path, &lines)?;

        info!(task_id = %task.task_id, keys = grouped.len(), "reduce task complete");
        Ok(())
    }
}
