use super::*;
use crate::container::{Container, FieldArray, StoreError};
use crate::records::{FieldBundle, RecordMode, RecordStore};

/// Store with `sizes[f]` localizations in frame `f`. Field values are
/// chosen so each record is globally identifiable: x = frame + offset/10.
fn loc_store(sizes: &[usize]) -> ClusterStore {
    let store = RecordStore::create(Container::open_in_memory().unwrap(), 100.0).unwrap();
    for (frame, &n) in sizes.iter().enumerate() {
        if n == 0 {
            continue;
        }
        let x: Vec<f64> = (0..n).map(|j| frame as f64 + j as f64 / 10.0).collect();
        let y: Vec<f64> = x.iter().map(|v| v + 0.5).collect();
        let bundle = FieldBundle::from([
            ("x", FieldArray::F64(x)),
            ("y", FieldArray::F64(y)),
            ("z", FieldArray::F64(vec![0.25; n])),
            ("category", FieldArray::I64(vec![frame as i64; n])),
        ]);
        store.add_localizations(frame as u32, &bundle).unwrap();
    }
    ClusterStore::new(store)
}

fn track_store(sizes: &[usize]) -> ClusterStore {
    let store = RecordStore::create(Container::open_in_memory().unwrap(), 100.0).unwrap();
    for (index, &n) in sizes.iter().enumerate() {
        let x: Vec<f64> = (0..n).map(|j| index as f64 * 10.0 + j as f64).collect();
        let y: Vec<f64> = x.iter().map(|v| v + 0.5).collect();
        let bundle = FieldBundle::from([
            ("x", FieldArray::F64(x)),
            ("y", FieldArray::F64(y)),
            ("z", FieldArray::F64(vec![0.1; n])),
            ("category", FieldArray::I64(vec![0; n])),
        ]);
        store.add_track_group(&bundle).unwrap();
    }
    ClusterStore::new(store)
}

fn labels(pattern: &[(ClusterLabel, usize)]) -> Vec<ClusterLabel> {
    pattern
        .iter()
        .flat_map(|(label, n)| std::iter::repeat(*label).take(*n))
        .collect()
}

#[test]
fn test_round_trip_membership() {
    let clusters = loc_store(&[3, 2, 4]);
    let data = clusters.data_for_clustering(false).unwrap();
    assert_eq!(data.record_count(), 9);

    let assignment = labels(&[
        (ClusterLabel::Unclustered, 2),
        (ClusterLabel::Clustered(1), 3),
        (ClusterLabel::Clustered(2), 4),
    ]);
    clusters.add_clusters(&assignment, &data.crossrefs).unwrap();

    let mut members = Vec::new();
    for index in 0..=clusters.cluster_count().unwrap() as usize {
        let group = clusters.cluster_group(index).unwrap().unwrap();
        for r in group.record_refs().unwrap() {
            members.push(r);
        }
    }
    members.sort_by_key(|r| match r {
        RecordRef::Localization { frame, offset } => (*frame, *offset),
        RecordRef::Track { track, offset } => (*track, *offset),
    });

    let expected: Vec<RecordRef> = [(0u32, 3usize), (1, 2), (2, 4)]
        .iter()
        .flat_map(|&(frame, n)| {
            (0..n as u32).map(move |offset| RecordRef::Localization { frame, offset })
        })
        .collect();
    assert_eq!(members, expected);
}

#[test]
fn test_cluster_count_excludes_unclustered() {
    let clusters = loc_store(&[5]);
    let data = clusters.data_for_clustering(false).unwrap();
    let assignment = labels(&[
        (ClusterLabel::Unclustered, 2),
        (ClusterLabel::Clustered(1), 2),
        (ClusterLabel::Clustered(4), 1),
    ]);
    clusters.add_clusters(&assignment, &data.crossrefs).unwrap();

    assert_eq!(clusters.cluster_count().unwrap(), 2);
}

#[test]
fn test_size_attributes_match_assignment() {
    let clusters = loc_store(&[6]);
    let data = clusters.data_for_clustering(false).unwrap();
    let assignment = labels(&[
        (ClusterLabel::Unclustered, 1),
        (ClusterLabel::Clustered(1), 2),
        (ClusterLabel::Clustered(2), 3),
    ]);
    clusters.add_clusters(&assignment, &data.crossrefs).unwrap();

    let sizes: Vec<u64> = (0..3)
        .map(|i| clusters.cluster_group(i).unwrap().unwrap().size())
        .collect();
    assert_eq!(sizes, vec![1, 2, 3]);
}

#[test]
fn test_sparse_ids_get_dense_indices() {
    let clusters = loc_store(&[4]);
    let data = clusters.data_for_clustering(false).unwrap();
    let assignment = labels(&[
        (ClusterLabel::Clustered(5), 2),
        (ClusterLabel::Clustered(100), 2),
    ]);
    clusters.add_clusters(&assignment, &data.crossrefs).unwrap();

    // cl_0 reserved (empty), ids 5 and 100 land at indices 1 and 2.
    assert_eq!(clusters.cluster_count().unwrap(), 2);
    assert_eq!(clusters.cluster_group(0).unwrap().unwrap().size(), 0);
    assert_eq!(clusters.cluster_group(1).unwrap().unwrap().size(), 2);
    assert_eq!(clusters.cluster_group(2).unwrap().unwrap().size(), 2);
    assert!(clusters.cluster_group(3).unwrap().is_none());
}

#[test]
fn test_repartition_is_idempotent() {
    let clusters = loc_store(&[4, 3]);
    let data = clusters.data_for_clustering(false).unwrap();
    let assignment = labels(&[
        (ClusterLabel::Unclustered, 3),
        (ClusterLabel::Clustered(1), 4),
    ]);

    clusters.add_clusters(&assignment, &data.crossrefs).unwrap();
    let first: Vec<_> = (0..2)
        .map(|i| {
            let g = clusters.cluster_group(i).unwrap().unwrap();
            (g.size(), g.crossref().clone())
        })
        .collect();

    clusters.add_clusters(&assignment, &data.crossrefs).unwrap();
    let second: Vec<_> = (0..2)
        .map(|i| {
            let g = clusters.cluster_group(i).unwrap().unwrap();
            (g.size(), g.crossref().clone())
        })
        .collect();

    assert_eq!(clusters.cluster_count().unwrap(), 1);
    assert_eq!(first, second);
}

#[test]
fn test_reconstruction_returns_original_fields() {
    let clusters = loc_store(&[3, 2]);
    let data = clusters.data_for_clustering(false).unwrap();
    let assignment = vec![ClusterLabel::Clustered(1); 5];
    clusters.add_clusters(&assignment, &data.crossrefs).unwrap();

    let cluster = clusters.cluster_data(1, None).unwrap();

    // Stored member order is frame-major: frame 0 offsets 0..3, frame 1
    // offsets 0..2. Positions come back in pixels, exactly as stored.
    let expected_x = vec![0.0, 0.1, 0.2, 1.0, 1.1];
    let expected_y: Vec<f64> = expected_x.iter().map(|v| v + 0.5).collect();
    assert_eq!(cluster.get("x").unwrap(), &FieldArray::F64(expected_x));
    assert_eq!(cluster.get("y").unwrap(), &FieldArray::F64(expected_y));
    assert_eq!(cluster.get("z").unwrap(), &FieldArray::F64(vec![0.25; 5]));
    assert_eq!(
        cluster.get("category").unwrap(),
        &FieldArray::I64(vec![0, 0, 0, 1, 1])
    );
    // The raw cross-reference rides along with the joined data.
    assert_eq!(
        cluster.get("frame").unwrap(),
        &FieldArray::I64(vec![0, 0, 0, 1, 1])
    );
    assert_eq!(
        cluster.get("loc_id").unwrap(),
        &FieldArray::I64(vec![0, 1, 2, 0, 1])
    );
}

#[test]
fn test_reconstruction_in_track_mode() {
    let clusters = track_store(&[2, 3]);
    let data = clusters.data_for_clustering(false).unwrap();
    assert_eq!(data.record_count(), 5);

    let assignment = labels(&[
        (ClusterLabel::Unclustered, 2),
        (ClusterLabel::Clustered(1), 3),
    ]);
    clusters.add_clusters(&assignment, &data.crossrefs).unwrap();

    let group = clusters.cluster_group(1).unwrap().unwrap();
    assert_eq!(group.mode(), RecordMode::Tracks);
    assert_eq!(
        group.record_refs().unwrap(),
        vec![
            RecordRef::Track { track: 1, offset: 0 },
            RecordRef::Track { track: 1, offset: 1 },
            RecordRef::Track { track: 1, offset: 2 },
        ]
    );

    let cluster = clusters.cluster_data(1, Some(&["x"])).unwrap();
    assert_eq!(
        cluster.get("x").unwrap(),
        &FieldArray::F64(vec![10.0, 11.0, 12.0])
    );
    assert_eq!(cluster.get("track_id").unwrap(), &FieldArray::I64(vec![1, 1, 1]));
}

#[test]
fn test_iterator_filters_by_size() {
    let clusters = loc_store(&[15]);
    let data = clusters.data_for_clustering(false).unwrap();
    let assignment = labels(&[
        (ClusterLabel::Clustered(1), 5),
        (ClusterLabel::Clustered(2), 2),
        (ClusterLabel::Clustered(3), 8),
    ]);
    clusters.add_clusters(&assignment, &data.crossrefs).unwrap();

    let indices: Vec<usize> = clusters
        .clusters_iter(None, 3, true)
        .unwrap()
        .map(|item| item.unwrap().0)
        .collect();
    assert_eq!(indices, vec![1, 3]);

    // With skip_unclustered off, the reserved group is still held back by
    // the strict size bound (0 > 0 is false).
    let indices: Vec<usize> = clusters
        .clusters_iter(None, 0, false)
        .unwrap()
        .map(|item| item.unwrap().0)
        .collect();
    assert_eq!(indices, vec![1, 2, 3]);
}

#[test]
fn test_iterator_yields_unclustered_when_asked() {
    let clusters = loc_store(&[4]);
    let data = clusters.data_for_clustering(false).unwrap();
    let assignment = labels(&[
        (ClusterLabel::Unclustered, 3),
        (ClusterLabel::Clustered(1), 1),
    ]);
    clusters.add_clusters(&assignment, &data.crossrefs).unwrap();

    let skipped: Vec<usize> = clusters
        .clusters_iter(None, 0, true)
        .unwrap()
        .map(|item| item.unwrap().0)
        .collect();
    assert_eq!(skipped, vec![1]);

    let all: Vec<usize> = clusters
        .clusters_iter(None, 0, false)
        .unwrap()
        .map(|item| item.unwrap().0)
        .collect();
    assert_eq!(all, vec![0, 1]);
}

#[test]
fn test_empty_state_behavior() {
    let clusters = loc_store(&[2]);

    assert!(!clusters.has_clusters().unwrap());
    assert_eq!(clusters.cluster_count().unwrap(), 0);
    assert!(clusters.cluster_group(0).unwrap().is_none());
    assert!(clusters.cluster_data(0, None).unwrap().is_empty());
    assert_eq!(clusters.clusters_iter(None, 0, true).unwrap().count(), 0);
    assert!(clusters.clustering_info().unwrap().is_none());
}

#[test]
fn test_size_mismatch_names_field_and_preserves_container() {
    let clusters = loc_store(&[3]);
    let data = clusters.data_for_clustering(false).unwrap();
    let assignment = vec![ClusterLabel::Clustered(1); 3];
    clusters.add_clusters(&assignment, &data.crossrefs).unwrap();

    let mut bad = data.crossrefs.clone();
    bad.insert("extra", FieldArray::I64(vec![1, 2]));
    let err = clusters.add_clusters(&assignment, &bad).unwrap_err();
    assert!(matches!(
        err,
        ClusterError::SizeMismatch { ref field, expected: 3, actual: 2 } if field == "extra"
    ));

    // The failed partition must not have disturbed the previous one.
    assert!(clusters.has_clusters().unwrap());
    assert_eq!(clusters.cluster_count().unwrap(), 1);
    assert_eq!(clusters.cluster_group(1).unwrap().unwrap().size(), 3);
}

#[test]
fn test_empty_assignment_is_rejected() {
    let clusters = loc_store(&[1]);
    assert!(matches!(
        clusters.add_clusters(&[], &FieldBundle::new()),
        Err(ClusterError::EmptyAssignment)
    ));
    assert!(!clusters.has_clusters().unwrap());
}

#[test]
fn test_dangling_crossref_is_fatal() {
    let clusters = loc_store(&[2]);
    let bundle = FieldBundle::from([
        ("frame", FieldArray::I64(vec![0, 9])),
        ("loc_id", FieldArray::I64(vec![0, 0])),
    ]);
    let assignment = vec![ClusterLabel::Clustered(1); 2];
    clusters.add_clusters(&assignment, &bundle).unwrap();

    // Frame 9 does not exist; the join propagates the store failure.
    assert!(matches!(
        clusters.cluster_data(1, None),
        Err(ClusterError::Store(StoreError::AbsentGroup(_)))
    ));
}

#[test]
fn test_clustering_info_round_trip() {
    let clusters = loc_store(&[1]);
    clusters.set_clustering_info("dbscan eps=80 mc=10").unwrap();
    assert_eq!(
        clusters.clustering_info().unwrap().as_deref(),
        Some("dbscan eps=80 mc=10")
    );
}

#[test]
fn test_extraction_converts_units() {
    let clusters = loc_store(&[2]);

    let flat = clusters.data_for_clustering(false).unwrap();
    assert_eq!(flat.x, vec![0.0, 10.0]); // pixels * 100 nm/pixel
    assert_eq!(flat.y, vec![50.0, 60.0]);
    assert_eq!(flat.z, vec![0.0, 0.0]); // zero-filled without include_z
    assert_eq!(flat.category, vec![0, 0]);
    assert_eq!(
        flat.crossrefs.get("frame").unwrap(),
        &FieldArray::I64(vec![0, 0])
    );
    assert_eq!(
        flat.crossrefs.get("loc_id").unwrap(),
        &FieldArray::I64(vec![0, 1])
    );

    let flat = clusters.data_for_clustering(true).unwrap();
    assert_eq!(flat.z, vec![250.0, 250.0]); // 0.25 um -> nm
}

#[test]
fn test_extraction_prefers_track_mode() {
    let clusters = track_store(&[1, 2]);
    let flat = clusters.data_for_clustering(false).unwrap();

    assert!(flat.crossrefs.contains("track_id"));
    assert!(!flat.crossrefs.contains("frame"));
    assert_eq!(
        flat.crossrefs.get("track_id").unwrap(),
        &FieldArray::I64(vec![0, 1, 1])
    );
    assert_eq!(
        flat.crossrefs.get("loc_id").unwrap(),
        &FieldArray::I64(vec![0, 0, 1])
    );
}

#[test]
fn test_extraction_uses_drift_corrected_positions() {
    let clusters = loc_store(&[1]);
    clusters.records().set_drift(0, 1.0, 0.0, 0.0).unwrap();

    let flat = clusters.data_for_clustering(false).unwrap();
    // (0.0 px + 1.0 px drift) * 100 nm/px
    assert_eq!(flat.x, vec![100.0]);
}

#[test]
fn test_label_adapter_maps_minimum_to_unclustered() {
    let raw = vec![-1, 0, 0, 2, -1];
    let converted = ClusterLabel::from_raw(&raw).unwrap();
    assert_eq!(
        converted,
        vec![
            ClusterLabel::Unclustered,
            ClusterLabel::Clustered(0),
            ClusterLabel::Clustered(0),
            ClusterLabel::Clustered(2),
            ClusterLabel::Unclustered,
        ]
    );

    // All-equal input means nothing was clustered.
    let converted = ClusterLabel::from_raw(&[3, 3]).unwrap();
    assert_eq!(converted, vec![ClusterLabel::Unclustered; 2]);

    assert!(matches!(
        ClusterLabel::from_raw(&[]),
        Err(ClusterError::EmptyAssignment)
    ));
    assert!(matches!(
        ClusterLabel::from_raw(&[-5, -2, 0]),
        Err(ClusterError::NegativeId(-2))
    ));
}
