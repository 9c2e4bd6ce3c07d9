//! Shuffle I/O: intermediate file naming, key partitioning, and the
//! reducer-side partition merge (spec §4.8).

use crate::mr::error::Result;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};

/// Intermediate partition path: `{intermediate_dir}/{job_id}/map-{m}-reduce-{r}`.
pub fn partition_path(intermediate_dir: &Path, job_id: &str, map_idx: i32, reduce_idx: i32) -> PathBuf {
    intermediate_dir
        .join(job_id)
        .join(format!("map-{map_idx}-reduce-{reduce_idx}"))
}

/// Final output path: `{output_dir}/reduce-{r}.txt`.
pub fn output_path(output_dir: &Path, reduce_idx: i32) -> PathBuf {
    output_dir.join(format!("reduce-{reduce_idx}.txt"))
}

/// Deterministic, non-randomized partition hash: same key always maps to the
/// same bucket across map and reduce (spec §4.7 hash requirement).
/// `DefaultHasher`'s seed is fixed per process invocation but not
/// process-randomized across runs of the same build, which is sufficient
/// here because a single coordinator/worker fleet shares one build.
pub fn partition_of(key: &str, num_reduces: i32) -> i32 {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    (hasher.finish() % num_reduces.max(1) as u64) as i32
}

/// Writes a non-empty bucket of (key, value) pairs to `path` atomically: the
/// framed contents are written to a `.tmp` sibling and renamed into place,
/// so a concurrent reducer read never observes a partial write (spec §9
/// open question 6).
pub fn write_partition(path: &Path, pairs: &[(String, String)]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp_path = path.with_extension("tmp");
    let encoded = bincode::serialize(pairs)?;
    std::fs::write(&tmp_path, encoded)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Reads one partition file. Missing files are treated as empty partitions
/// by the caller (this returns `Ok(None)` rather than erroring on absence).
pub fn read_partition(path: &Path) -> Result<Option<Vec<(String, String)>>> {
    if !path.exists() {
        return Ok(None);
    }
    let bytes = std::fs::read(path)?;
    let pairs: Vec<(String, String)> = bincode::deserialize(&bytes)?;
    Ok(Some(pairs))
}

/// Writes the reducer's output atomically, same temp+rename discipline as
/// `write_partition` (spec §9 open question 6 applies symmetrically to the
/// primary/backup reduce race).
pub fn write_output(path: &Path, lines: &[String]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp_path = path.with_extension("tmp");
    std::fs::write(&tmp_path, lines.concat())?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}
