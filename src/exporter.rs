use crate::cluster::{ArtifactKind, ClusterSet, CodecError, EncodedClusters};
use crate::graph::ExecutionGraph;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("cluster {cluster} references unknown op '{op}'")]
    UnknownOp { cluster: usize, op: String },
    #[error("cluster {cluster} references unknown variable '{var}'")]
    UnknownVar { cluster: usize, var: String },
    #[error("invalid output path '{}': {reason}", path.display())]
    InvalidPath { path: PathBuf, reason: String },
    #[error("I/O error at '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ExportError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        ExportError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportSummary {
    pub path: PathBuf,
    pub clusters: usize,
    pub bytes_written: u64,
}

/// Saves a cluster partition of `graph` under `saved_path`.
///
/// The four strings are the pre-encoded artifacts produced by
/// [`ClusterSet::encode`]. They are decoded and checked against the graph
/// before anything touches the filesystem. The artifacts are then written to
/// a staging directory inside `saved_path` and renamed over the previous set,
/// so a failed export leaves either the previous artifacts or none. Other
/// entries of `saved_path` are not touched.
pub fn save_runtime_graph(
    graph: &ExecutionGraph,
    clusters_ops: &str,
    clusters_inputs: &str,
    cluster_outputs: &str,
    cluster_intervals: &str,
    saved_path: &Path,
) -> Result<ExportSummary, ExportError> {
    let encoded = EncodedClusters {
        ops: clusters_ops.to_string(),
        inputs: clusters_inputs.to_string(),
        outputs: cluster_outputs.to_string(),
        intervals: cluster_intervals.to_string(),
    };
    let clusters = ClusterSet::decode(&encoded)?;
    check_against_graph(graph, &clusters)?;

    let bytes_written = write_all_or_nothing(&encoded, saved_path)?;
    log::info!(
        "Saved {} clusters ({} bytes) to {}",
        clusters.len(),
        bytes_written,
        saved_path.display()
    );
    Ok(ExportSummary {
        path: saved_path.to_path_buf(),
        clusters: clusters.len(),
        bytes_written,
    })
}

/// Encodes `clusters` and saves them with [`save_runtime_graph`].
pub fn export_clusters(
    graph: &ExecutionGraph,
    clusters: &ClusterSet,
    saved_path: &Path,
) -> Result<ExportSummary, ExportError> {
    let encoded = clusters.encode();
    save_runtime_graph(
        graph,
        &encoded.ops,
        &encoded.inputs,
        &encoded.outputs,
        &encoded.intervals,
        saved_path,
    )
}

/// Reloads a partition written by [`save_runtime_graph`].
pub fn load_runtime_graph(saved_path: &Path) -> Result<ClusterSet, ExportError> {
    let read = |kind: ArtifactKind| {
        let path = saved_path.join(kind.file_name());
        fs::read_to_string(&path).map_err(|e| ExportError::io(&path, e))
    };
    let encoded = EncodedClusters {
        ops: read(ArtifactKind::Ops)?,
        inputs: read(ArtifactKind::Inputs)?,
        outputs: read(ArtifactKind::Outputs)?,
        intervals: read(ArtifactKind::Intervals)?,
    };
    Ok(ClusterSet::decode(&encoded)?)
}

fn check_against_graph(graph: &ExecutionGraph, clusters: &ClusterSet) -> Result<(), ExportError> {
    for (idx, cluster) in clusters.iter().enumerate() {
        if let Some(op) = cluster.ops.iter().find(|op| !graph.contains_op(op)) {
            return Err(ExportError::UnknownOp {
                cluster: idx,
                op: op.clone(),
            });
        }
        if let Some(var) = cluster
            .inputs
            .iter()
            .chain(cluster.outputs.iter())
            .find(|var| !graph.has_var(var))
        {
            return Err(ExportError::UnknownVar {
                cluster: idx,
                var: var.clone(),
            });
        }
    }
    Ok(())
}

fn write_all_or_nothing(encoded: &EncodedClusters, saved_path: &Path) -> Result<u64, ExportError> {
    if saved_path.as_os_str().is_empty() {
        return Err(ExportError::InvalidPath {
            path: saved_path.to_path_buf(),
            reason: "path is empty".to_string(),
        });
    }
    if saved_path.exists() && !saved_path.is_dir() {
        return Err(ExportError::InvalidPath {
            path: saved_path.to_path_buf(),
            reason: "a regular file already exists at this path".to_string(),
        });
    }
    let created = !saved_path.exists();
    fs::create_dir_all(saved_path).map_err(|e| ExportError::io(saved_path, e))?;

    match stage_and_commit(encoded, saved_path) {
        Ok(written) => {
            sync_dir(saved_path);
            Ok(written)
        }
        Err(e) => {
            if created {
                if let Err(cleanup) = fs::remove_dir(saved_path) {
                    log::warn!("Failed to remove {}: {}", saved_path.display(), cleanup);
                }
            }
            Err(e)
        }
    }
}

/// Writes the artifacts into a staging directory inside `saved_path`, then
/// renames them over the previous ones. Entries other than the four
/// artifacts are left alone.
fn stage_and_commit(encoded: &EncodedClusters, saved_path: &Path) -> Result<u64, ExportError> {
    let staging = tempfile::Builder::new()
        .prefix(".clusters.staging-")
        .tempdir_in(saved_path)
        .map_err(|e| ExportError::io(saved_path, e))?;
    log::debug!("Staging cluster artifacts in {}", staging.path().display());

    let written = write_artifacts(encoded, staging.path())?;
    let backup = staging.path().join("previous");
    fs::create_dir(&backup).map_err(|e| ExportError::io(&backup, e))?;
    commit_artifacts(staging.path(), &backup, saved_path)?;

    // Only replaced artifacts remain in the staging directory now.
    if let Err(e) = staging.close() {
        log::warn!("Failed to remove staging directory in {}: {}", saved_path.display(), e);
    }
    Ok(written)
}

fn write_artifacts(encoded: &EncodedClusters, dir: &Path) -> Result<u64, ExportError> {
    let mut written = 0u64;
    for kind in ArtifactKind::ALL {
        let path = dir.join(kind.file_name());
        let body = encoded.get(kind).as_bytes();
        let mut file = fs::File::create(&path).map_err(|e| ExportError::io(&path, e))?;
        file.write_all(body).map_err(|e| ExportError::io(&path, e))?;
        file.sync_all().map_err(|e| ExportError::io(&path, e))?;
        written += body.len() as u64;
    }
    Ok(written)
}

/// Moves every staged artifact into `target`. Existing artifacts are parked
/// in `backup` first; if any rename fails, the ones already committed are
/// rolled back so `target` keeps its previous set.
fn commit_artifacts(staged: &Path, backup: &Path, target: &Path) -> Result<(), ExportError> {
    let mut done = Vec::with_capacity(ArtifactKind::ALL.len());
    for kind in ArtifactKind::ALL {
        match commit_one(kind, staged, backup, target) {
            Ok(had_previous) => done.push((kind, had_previous)),
            Err(e) => {
                rollback(&done, backup, target);
                return Err(e);
            }
        }
    }
    Ok(())
}

fn commit_one(
    kind: ArtifactKind,
    staged: &Path,
    backup: &Path,
    target: &Path,
) -> Result<bool, ExportError> {
    let name = kind.file_name();
    let dest = target.join(name);
    let had_previous = fs::symlink_metadata(&dest).is_ok();
    if had_previous {
        fs::rename(&dest, backup.join(name)).map_err(|e| ExportError::io(&dest, e))?;
    }
    if let Err(e) = fs::rename(staged.join(name), &dest) {
        if had_previous {
            restore(&backup.join(name), &dest);
        }
        return Err(ExportError::io(&dest, e));
    }
    Ok(had_previous)
}

fn rollback(done: &[(ArtifactKind, bool)], backup: &Path, target: &Path) {
    for (kind, had_previous) in done.iter().rev() {
        let dest = target.join(kind.file_name());
        if *had_previous {
            restore(&backup.join(kind.file_name()), &dest);
        } else if let Err(e) = fs::remove_file(&dest) {
            log::error!("Failed to roll back {}: {}", dest.display(), e);
        }
    }
}

fn restore(from: &Path, to: &Path) {
    if let Err(e) = fs::rename(from, to) {
        log::error!("Failed to restore {} from {}: {}", to.display(), from.display(), e);
    }
}

// Directory fsync is not available on every platform.
fn sync_dir(dir: &Path) {
    if let Err(e) = fs::File::open(dir).and_then(|d| d.sync_all()) {
        log::debug!("Skipping directory sync for {}: {}", dir.display(), e);
    }
}
