//! Integration tests for tile extraction and batch iteration
//!
//! These tests verify that the pipeline correctly:
//! 1. Counts annotations against independently drawn label volumes
//! 2. Produces training minibatches with consistent shapes and weights
//! 3. Writes predictions back so that tiles reassemble the full image

mod common;

use common::{
    backend_from_volumes, blob, dataset_from_volumes, generate_volume_with_blobs,
    standard_volumes, write_png_pair,
};
use ndarray::{s, Array5, Axis};
use std::fs;
use tilefeed::{
    Augmentation, Dataset, ImageBackend, MemoryBackend, PredictionBatch, PredictionConfig,
    ProbMapStore, TileError, TrainingBatch, TrainingConfig,
};

#[test]
fn test_label_counts_match_ground_truth() {
    let volumes = standard_volumes();
    let dataset = dataset_from_volumes(&volumes);

    assert_eq!(dataset.label_values(), vec![1, 2, 3]);
    for (i, volume) in volumes.iter().enumerate() {
        let counts = dataset.label_counts(i).unwrap();
        for label in dataset.label_values() {
            let expected = volume.label_counts.get(&label).copied().unwrap_or(0);
            assert_eq!(counts[&label], expected, "image {i}, label {label}");
        }
    }
    let totals = dataset.total_label_counts();
    assert_eq!(totals[&1], 25 + 49);
    assert_eq!(totals[&2], 9);
    assert_eq!(totals[&3], 1);
}

#[test]
fn test_full_image_weight_tiles_reproduce_labels() {
    let volumes = standard_volumes();
    let dataset = dataset_from_volumes(&volumes);
    let labels = dataset.label_values();

    for (i, volume) in volumes.iter().enumerate() {
        let [_, z, x, y] = dataset.image_shape(i).unwrap();
        let tile = dataset
            .weight_tile(i, [0, 0, 0], [z, x, y], &labels, &Augmentation::default())
            .unwrap();
        for (k, &label) in labels.iter().enumerate() {
            let expected = volume.labels.mapv(|v| if v == label { 1.0f32 } else { 0.0 });
            assert_eq!(tile.index_axis(Axis(0), k), expected);
        }
    }
}

#[test]
fn test_equalized_weights_balance_label_mass() {
    let volumes = standard_volumes();
    let mut dataset = dataset_from_volumes(&volumes);
    let weights = dataset.equalize_label_weights();
    assert!((weights.values().sum::<f32>() - 1.0).abs() < 1e-5);
    assert!(weights[&3] > weights[&2] && weights[&2] > weights[&1]);

    // every label carries the same total weight over all images
    let labels = dataset.label_values();
    let mut mass = vec![0.0f32; labels.len()];
    for i in 0..dataset.image_count() {
        let [_, z, x, y] = dataset.image_shape(i).unwrap();
        let tile = dataset
            .weight_tile(i, [0, 0, 0], [z, x, y], &labels, &Augmentation::default())
            .unwrap();
        for (k, m) in mass.iter_mut().enumerate() {
            *m += tile.index_axis(Axis(0), k).sum();
        }
    }
    for m in &mass {
        assert!((m - mass[0]).abs() < 1e-4, "{mass:?}");
    }
}

#[test]
fn test_augmented_training_batches() {
    let dataset = dataset_from_volumes(&standard_volumes());
    let config = TrainingConfig {
        batch_size: 4,
        tile_size: [1, 6, 6],
        padding: [0, 2, 2],
        augment: true,
        equalized: true,
        normalization: "local".to_string(),
        seed: Some(1),
        ..Default::default()
    };

    let batches = TrainingBatch::new(&dataset, config).unwrap();
    for batch in batches.take(10) {
        let batch = batch.unwrap();
        assert_eq!(batch.pixels.shape(), &[4, 2, 1, 10, 10]);
        assert_eq!(batch.weights.shape(), &[4, 3, 1, 6, 6]);
        assert!(batch.pixels.iter().all(|v| v.is_finite()));
        assert!(batch.weights.iter().all(|&w| w == 0.0 || w == 1.0));
        for info in &batch.tiles {
            assert!((-45.0..=45.0).contains(&info.augmentation.rotation));
            assert!((-5.0..=5.0).contains(&info.augmentation.shear));
        }
    }
}

#[test]
fn test_equalized_sampling_favours_rare_labels() {
    let dataset = dataset_from_volumes(&standard_volumes());
    let config = TrainingConfig {
        batch_size: 50,
        tile_size: [1, 3, 3],
        equalized: true,
        seed: Some(4),
        ..Default::default()
    };
    let batch = TrainingBatch::new(&dataset, config)
        .unwrap()
        .next_batch()
        .unwrap();
    let common_label = batch
        .tiles
        .iter()
        .filter(|t| t.center_label == Some(1))
        .count();
    // label 1 holds 74 of 84 annotations but gets about 1% of the draws
    assert!(common_label < 10, "{common_label}");
}

#[test]
fn test_prediction_reassembles_image_in_store() {
    let dir = tempfile::tempdir().unwrap();
    let store = ProbMapStore::new(dir.path().join("probmaps")).unwrap();
    let volumes = vec![generate_volume_with_blobs(
        "cells",
        2,
        [1, 10, 7],
        &[blob(1, [0, 2, 2], 1), blob(2, [0, 8, 5], 1)],
    )];
    let backend = backend_from_volumes(&volumes).with_store(store.clone());
    let mut dataset = Dataset::new(backend).unwrap();

    let config = PredictionConfig {
        batch_size: 3,
        tile_size: [1, 4, 4],
        padding: [0, 1, 1],
        ..Default::default()
    };
    let mut batches = PredictionBatch::new(&mut dataset, config).unwrap();
    assert_eq!(batches.len(), 2);

    for i in 0..batches.len() {
        let batch = batches.get(i).unwrap();
        let n = batch.tiles.len();
        // echo channel 0 of the unpadded tile as the prediction of every label
        let mut probs = Array5::<f32>::zeros((n, 2, 1, 4, 4));
        for k in 0..n {
            for l in 0..2 {
                probs
                    .slice_mut(s![k, l, .., .., ..])
                    .assign(&batch.pixels.slice(s![k, 0, .., 1..5, 1..5]));
            }
        }
        batches.put_probmap_data(i, probs.view()).unwrap();
    }

    let channel_0 = volumes[0].pixels.index_axis(Axis(0), 0);
    for label in [1, 2] {
        let header = store.header("cells", label).unwrap();
        assert_eq!(header.shape, [1, 10, 7]);
        assert_eq!(store.read("cells", label).unwrap(), channel_0);
    }
}

#[test]
fn test_file_backed_dataset() {
    let dir = tempfile::tempdir().unwrap();
    let (image_path, label_path) =
        write_png_pair(dir.path(), "slice", 5, 4, &[(1, 2, 1), (3, 0, 2), (4, 3, 2)]);

    let backend = MemoryBackend::from_image_files(&[(image_path, Some(label_path))]).unwrap();
    assert_eq!(backend.image_name(0), "slice");
    let dataset = Dataset::new(backend).unwrap();
    assert_eq!(dataset.image_shape(0).unwrap(), [1, 1, 5, 4]);
    assert_eq!(dataset.label_counts(0).unwrap()[&2], 2);
    assert_eq!(dataset.label_coordinate(2, 0).unwrap().coordinate(), [0, 0, 3, 0]);

    let tile = dataset
        .pixel_tile(0, [0, 0, 0], [1, 5, 4], &[0], [0, 0, 0], &Augmentation::default())
        .unwrap();
    for x in 0..5 {
        for y in 0..4 {
            assert_eq!(tile[[0, 0, x, y]], (10 * x + y) as f32);
        }
    }
}

#[test]
fn test_config_file_drives_training() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("training.json");
    fs::write(
        &path,
        r#"{
            "batch_size": 2,
            "tile_size": [1, 5, 5],
            "channels": [1],
            "labels": [2, 3],
            "normalization": "global",
            "global_bounds": [0.0, 2000.0],
            "seed": 8
        }"#,
    )
    .unwrap();

    let config = TrainingConfig::from_json_file(&path).unwrap();
    let dataset = dataset_from_volumes(&standard_volumes());
    let batch = TrainingBatch::new(&dataset, config)
        .unwrap()
        .next_batch()
        .unwrap();
    assert_eq!(batch.channels, vec![1]);
    assert_eq!(batch.labels, vec![2, 3]);
    assert_eq!(batch.pixels.shape(), &[2, 1, 1, 5, 5]);
    assert!(batch.pixels.iter().all(|&v| (0.0..=1.0).contains(&v)));
}

#[test]
fn test_tiles_outside_image_are_mirrored() {
    let dataset = dataset_from_volumes(&standard_volumes());
    let tile = dataset
        .pixel_tile(1, [0, -3, 10], [1, 4, 4], &[0], [0, 0, 0], &Augmentation::default())
        .unwrap();
    // x -3..1 reads rows 2, 1, 0, 0; y 10..14 reads columns 10, 11, 11, 10
    let rows = [2, 1, 0, 0];
    let cols = [10, 11, 11, 10];
    for (i, &x) in rows.iter().enumerate() {
        for (j, &y) in cols.iter().enumerate() {
            assert_eq!(tile[[0, 0, i, j]], (10 * x + y) as f32);
        }
    }
}

#[test]
fn test_invalid_requests_fail() {
    let dataset = dataset_from_volumes(&standard_volumes());
    assert!(matches!(
        dataset.pixel_tile(5, [0, 0, 0], [1, 2, 2], &[0], [0, 0, 0], &Augmentation::default()),
        Err(TileError::ImageIndex { index: 5, count: 2 })
    ));
    assert!(matches!(
        dataset.weight_tile(0, [0, 0, 0], [1, 2, 2], &[4], &Augmentation::default()),
        Err(TileError::NotInDataset { .. })
    ));
    let config = TrainingConfig {
        channels: Some(vec![2]),
        ..Default::default()
    };
    assert!(TrainingBatch::new(&dataset, config).is_err());
}
