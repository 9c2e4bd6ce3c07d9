//! Input splitter (spec §4.2).
//!
//! Splits an input file into `num_maps` chunks on disk at deterministic
//! paths. Per spec §9 open questions 1 and 5: this runs entirely outside the
//! coordinator's lock (the caller acquires it only to register the resulting
//! job/tasks), and a missing input file is a hard error rather than a job
//! with zero map tasks.

use crate::mr::error::{Error, Result};
use std::path::{Path, PathBuf};

/// Splits `input_path` into `num_maps` chunk files under `staging_dir`,
/// named `input-chunk-{i}`, and returns their paths in order.
///
/// Policy (spec §4.2): let L be the total line count; chunk size
/// `c = max(1, L div num_maps)`; chunk `i` holds lines `[i*c, (i+1)*c)`
/// except the last chunk, which absorbs the remainder `[i*c, L)`.
pub fn split_input(input_path: &str, num_maps: i32, staging_dir: &Path) -> Result<Vec<PathBuf>> {
    if !Path::new(input_path).exists() {
        return Err(Error::InputNotFound(input_path.to_string()));
    }

    let contents = std::fs::read_to_string(input_path)?;
    // `split_inclusive` keeps line terminators so re-joined chunks are byte-identical
    // to slicing the original file; the final chunk may lack a trailing newline.
    let lines: Vec<&str> = contents.split_inclusive('\n').collect();
    let total = lines.len();

    std::fs::create_dir_all(staging_dir)?;

    let chunk_size = std::cmp::max(1, total / num_maps.max(1) as usize);
    let mut chunk_paths = Vec::with_capacity(num_maps as usize);

    for i in 0..num_maps {
        let start = (i as usize) * chunk_size;
        let end = if i == num_maps - 1 {
            total
        } else {
            std::cmp::min(start + chunk_size, total)
        };

        let chunk_path = staging_dir.join(format!("input-chunk-{i}"));
        let body: String = if start < total {
            lines[start..end].concat()
        } else {
            String::new()
        };
        std::fs::write(&chunk_path, body)?;
        chunk_paths.push(chunk_path);
    }

    Ok(chunk_paths)
}
