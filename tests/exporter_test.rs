use std::fs;
use std::path::Path;

use rpc_token_graph::cluster::ArtifactKind;
use rpc_token_graph::{
    Cluster, ClusterSet, DataType, ExecutionGraph, ExportError, OpNode, export_clusters,
    load_runtime_graph, save_runtime_graph,
};

/// A chain of `n` ops: v0 -> op_0 -> v1 -> op_1 -> ... -> v{n}.
fn chain_graph(n: usize) -> ExecutionGraph {
    let mut graph = ExecutionGraph::new();
    graph.add_var("v0", DataType::Float32, vec![8, 8]);
    for i in 0..n {
        graph.add_op(
            OpNode::new(format!("op_{}", i), if i % 2 == 0 { "matmul" } else { "relu" })
                .with_input("X", &format!("v{}", i))
                .with_output("Out", &format!("v{}", i + 1)),
        );
    }
    graph
}

/// Splits the chain into clusters of `size` consecutive ops.
fn partition(n: usize, size: usize) -> ClusterSet {
    let clusters = (0..n)
        .step_by(size)
        .map(|start| {
            let end = (start + size).min(n);
            Cluster {
                ops: (start..end).map(|i| format!("op_{}", i)).collect(),
                inputs: vec![format!("v{}", start)],
                outputs: vec![format!("v{}", end)],
                interval: (start as i64, end as i64 - 1),
            }
        })
        .collect();
    ClusterSet(clusters)
}

fn leftover_entries(dir: &Path) -> Vec<String> {
    fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|name| name.starts_with('.'))
        .collect()
}

#[test]
fn test_reload_matches_every_partition_size() {
    let dir = tempfile::tempdir().unwrap();
    for (n, size) in [(0, 1), (1, 1), (5, 2), (9, 3), (12, 12)] {
        let graph = chain_graph(n);
        let clusters = partition(n, size);
        let target = dir.path().join(format!("graph_{}_{}", n, size));

        let summary = export_clusters(&graph, &clusters, &target).unwrap();
        assert_eq!(summary.clusters, clusters.len());

        let reloaded = load_runtime_graph(&target).unwrap();
        assert_eq!(reloaded, clusters, "n={} size={}", n, size);
        assert!(leftover_entries(&target).is_empty());
    }
    assert!(leftover_entries(dir.path()).is_empty());
}

#[test]
fn test_four_artifacts_written() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("saved");
    let clusters = partition(4, 2);
    export_clusters(&chain_graph(4), &clusters, &target).unwrap();

    let encoded = clusters.encode();
    let mut names: Vec<_> = fs::read_dir(&target)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    assert_eq!(
        names,
        vec![
            "clusters_inputs.txt",
            "clusters_intervals.txt",
            "clusters_ops.txt",
            "clusters_outputs.txt"
        ]
    );
    for kind in ArtifactKind::ALL {
        let on_disk = fs::read_to_string(target.join(kind.file_name())).unwrap();
        assert_eq!(on_disk, encoded.get(kind));
    }
}

#[test]
fn test_unwritable_path_fails_without_partial_output() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("not_a_dir");
    fs::write(&blocker, b"file").unwrap();
    let target = blocker.join("nested").join("saved");

    let err = export_clusters(&chain_graph(2), &partition(2, 1), &target).unwrap_err();
    assert!(matches!(err, ExportError::Io { .. }), "got {}", err);
    assert!(!target.exists());
    assert!(leftover_entries(dir.path()).is_empty());
    assert_eq!(fs::read(&blocker).unwrap(), b"file");
}

#[test]
fn test_overwrite_replaces_artifacts_and_keeps_other_files() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("saved");
    let graph = chain_graph(6);

    export_clusters(&graph, &partition(6, 1), &target).unwrap();
    fs::write(target.join("important.txt"), b"keep me").unwrap();
    export_clusters(&graph, &partition(6, 3), &target).unwrap();

    assert_eq!(load_runtime_graph(&target).unwrap(), partition(6, 3));
    assert_eq!(fs::read(target.join("important.txt")).unwrap(), b"keep me");
    assert!(leftover_entries(dir.path()).is_empty());
    assert!(leftover_entries(&target).is_empty());
}

#[test]
fn test_rejected_export_keeps_previous_set() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("saved");
    let graph = chain_graph(4);
    export_clusters(&graph, &partition(4, 2), &target).unwrap();

    let mut bad = partition(4, 1);
    bad.0[2].ops = vec!["op_99".to_string()];
    let err = export_clusters(&graph, &bad, &target).unwrap_err();
    assert!(matches!(err, ExportError::UnknownOp { cluster: 2, .. }));

    assert_eq!(load_runtime_graph(&target).unwrap(), partition(4, 2));
}

#[test]
fn test_misaligned_strings_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("saved");
    let graph = chain_graph(4);
    let two = partition(4, 2).encode();
    let four = partition(4, 1).encode();

    let err = save_runtime_graph(
        &graph,
        &two.ops,
        &two.inputs,
        &four.outputs,
        &two.intervals,
        &target,
    )
    .unwrap_err();
    assert!(matches!(err, ExportError::Codec(_)));
    assert!(!target.exists());
}

#[test]
fn test_graph_not_modified() {
    let dir = tempfile::tempdir().unwrap();
    let graph = chain_graph(3);
    let before = serde_json::to_value(&graph).unwrap();
    export_clusters(&graph, &partition(3, 2), &dir.path().join("saved")).unwrap();
    assert_eq!(serde_json::to_value(&graph).unwrap(), before);
}

#[test]
fn test_load_missing_artifact() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("saved");
    export_clusters(&chain_graph(2), &partition(2, 1), &target).unwrap();
    fs::remove_file(target.join(ArtifactKind::Intervals.file_name())).unwrap();
    assert!(matches!(
        load_runtime_graph(&target),
        Err(ExportError::Io { .. })
    ));
}
