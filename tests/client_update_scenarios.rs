//! Client Updater Scenario Tests
//!
//! End-to-end scenarios against the bundled gradient-boosted backend:
//! labeled clients, unconfident unlabeled clients, and unlabeled clients
//! whose confident predictions cover only part of the class range.

use fedboost::central::train_central;
use fedboost::client::{run_update, update, SkipReason, TrainingPath, UpdateJob, UpdateOptions};
use fedboost::dataset::Dataset;
use fedboost::model::{GradientBoostedClassifier, ModelArtifact, Producer, TrainingProfile, TreeEnsemble};
use fedboost::UpdateOutcome;

// ============================================================================
// Helpers
// ============================================================================

fn profile(n_estimators: usize) -> TrainingProfile {
    TrainingProfile {
        n_estimators,
        ..TrainingProfile::DEFAULT
    }
}

/// `per_class` tightly packed rows for each class, one cluster per class
/// along a diagonal.
fn clusters(classes: &[usize], per_class: usize, labeled: bool) -> Dataset {
    let mut rows = Vec::new();
    let mut labels = Vec::new();
    for &c in classes {
        for i in 0..per_class {
            let jitter = (i % 7) as f64 * 0.05;
            rows.push(vec![c as f64 * 10.0 + jitter, c as f64 * 4.0 - jitter]);
            labels.push(format!("c{c}"));
        }
    }
    Dataset::from_parts(
        vec!["x".to_string(), "y".to_string()],
        rows,
        labeled.then_some(labels),
    )
    .unwrap()
}

fn central(num_class: usize, n_estimators: usize) -> ModelArtifact<GradientBoostedClassifier> {
    let classes: Vec<usize> = (0..num_class).collect();
    let (artifact, _) =
        train_central::<GradientBoostedClassifier>(&clusters(&classes, 20, true), &profile(n_estimators), 0.0)
            .unwrap();
    artifact
}

// ============================================================================
// Scenario A: labeled client
// ============================================================================

#[test]
fn scenario_a_labeled_client_takes_supervised_path() {
    let base = central(3, 10);
    // 100 labeled rows over the same 3 classes.
    let mut data = clusters(&[0, 1, 2], 33, true);
    let extra = clusters(&[1], 1, true);
    data = Dataset::concat(vec![data, extra]).unwrap();
    assert_eq!(data.len(), 100);

    let report = update(&base, &data, &UpdateOptions::default()).unwrap();

    assert_eq!(
        report.outcome,
        UpdateOutcome::Trained {
            path: TrainingPath::Supervised,
            rows: 100
        }
    );
    assert_eq!(report.artifact.num_class(), 3);
    assert_eq!(report.artifact.model.declared_num_class(), Some(3));
    assert_eq!(report.artifact.classes, base.classes);
    assert_eq!(report.artifact.model.num_rounds(), 2 * base.model.num_rounds());
    let record = report.artifact.latest_record().unwrap();
    assert_eq!(record.producer, Producer::ClientUpdater);
    assert!(!record.class_count_changed);
}

#[test]
fn labeled_client_columns_are_matched_by_name() {
    let base = central(2, 5);
    let data = clusters(&[0, 1], 10, true);
    let swapped = Dataset::from_parts(
        vec!["y".to_string(), "x".to_string()],
        data.rows.iter().map(|r| vec![r[1], r[0]]).collect(),
        data.labels.clone(),
    )
    .unwrap();

    let a = update(&base, &data, &UpdateOptions::default()).unwrap();
    let b = update(&base, &swapped, &UpdateOptions::default()).unwrap();
    let query = vec![vec![10.0, 4.0]];
    assert_eq!(
        a.artifact.model.predict_class_probabilities(&query).unwrap(),
        b.artifact.model.predict_class_probabilities(&query).unwrap()
    );
}

#[test]
fn labeled_client_with_extra_feature_is_schema_mismatch() {
    let base = central(2, 3);
    let data = Dataset::from_parts(
        vec!["x".to_string(), "y".to_string(), "z".to_string()],
        vec![vec![0.0, 0.0, 1.0]],
        Some(vec!["c0".to_string()]),
    )
    .unwrap();
    let err = update(&base, &data, &UpdateOptions::default()).unwrap_err();
    assert_eq!(err.kind(), "SchemaMismatch");
}

// ============================================================================
// Scenario B: nothing confident
// ============================================================================

#[test]
fn scenario_b_unconfident_rows_leave_model_unchanged() {
    // A single boosting round keeps every probability far below 0.95.
    let base = central(3, 1);
    let data = clusters(&[0, 1, 2], 10, false);

    let report = update(&base, &data, &UpdateOptions::default()).unwrap();

    assert_eq!(
        report.outcome,
        UpdateOutcome::SkippedNoConfidentRows {
            reason: SkipReason::BelowThreshold,
            rows_seen: 30
        }
    );
    assert_eq!(report.outcome.trained_rows(), 0);
    assert_eq!(
        serde_json::to_string(&report.artifact).unwrap(),
        serde_json::to_string(&base).unwrap()
    );
}

// ============================================================================
// Scenario C: partial class coverage
// ============================================================================

#[test]
fn scenario_c_partial_classes_build_new_model() {
    let base = central(6, 30);
    let data = clusters(&[0, 2, 5], 12, false);
    let options = UpdateOptions {
        profile: profile(8),
        ..UpdateOptions::default()
    };

    let report = update(&base, &data, &options).unwrap();

    match &report.outcome {
        UpdateOutcome::NewModelDueToClassMismatch {
            remap,
            rows,
            previous_num_class,
            num_class,
        } => {
            assert_eq!(remap.to_string(), "{0->0, 2->1, 5->2}");
            assert_eq!(remap.k(), 3);
            assert_eq!(*rows, 36);
            assert_eq!(*previous_num_class, 6);
            assert_eq!(*num_class, 3);
        }
        other => panic!("expected new model, got {other:?}"),
    }

    let artifact = &report.artifact;
    assert_eq!(artifact.model.declared_num_class(), Some(3));
    assert_eq!(artifact.classes, vec!["c0", "c2", "c5"]);
    assert_eq!(artifact.model.hyper_params().profile.n_estimators, 8);

    let record = artifact.latest_record().unwrap();
    assert!(record.class_count_changed);
    assert_eq!(record.class_remap, Some(vec![(0, 0), (2, 1), (5, 2)]));
    assert_eq!(artifact.provenance.len(), base.provenance.len() + 1);
}

#[test]
fn full_class_coverage_warm_starts_in_place() {
    let base = central(3, 30);
    let data = clusters(&[0, 1, 2], 10, false);

    let report = update(&base, &data, &UpdateOptions::default()).unwrap();

    assert!(matches!(report.outcome, UpdateOutcome::Trained { rows: 30, .. }));
    assert!(report.outcome.remap().unwrap().is_identity());
    assert_eq!(report.artifact.classes, base.classes);
    assert_eq!(report.artifact.num_class(), 3);
}

// ============================================================================
// File-level runs
// ============================================================================

#[test]
fn run_update_persists_to_a_new_location() {
    let dir = tempfile::tempdir().unwrap();
    let model_path = dir.path().join("model/Central_model.json");
    let data_path = dir.path().join("client_data/client_data.csv");
    let output = dir.path().join("model/client_updated_model2.json");

    let base = central(3, 10);
    base.save(&model_path).unwrap();
    let before = std::fs::read(&model_path).unwrap();
    clusters(&[0, 1, 2], 10, true).to_csv(&data_path).unwrap();

    let job = UpdateJob {
        model: None,
        model_candidates: vec![dir.path().join("model/client_updated_model.json"), model_path.clone()],
        dataset: data_path,
        output: output.clone(),
        options: UpdateOptions::default(),
    };
    let report = run_update::<GradientBoostedClassifier>(&job).unwrap();

    assert_eq!(report.outcome.trained_rows(), 30);
    assert_eq!(std::fs::read(&model_path).unwrap(), before);
    let saved = ModelArtifact::<GradientBoostedClassifier>::load(&output).unwrap();
    assert_eq!(saved.provenance.len(), 2);
}

#[test]
fn run_update_persists_no_op_result() {
    let dir = tempfile::tempdir().unwrap();
    let model_path = dir.path().join("central.json");
    let data_path = dir.path().join("unlabeled.csv");
    let output = dir.path().join("out.json");

    central(3, 1).save(&model_path).unwrap();
    clusters(&[0, 1], 5, false).to_csv(&data_path).unwrap();

    let report = run_update::<GradientBoostedClassifier>(&UpdateJob {
        model: Some(model_path),
        model_candidates: Vec::new(),
        dataset: data_path,
        output: output.clone(),
        options: UpdateOptions::default(),
    })
    .unwrap();

    assert!(report.outcome.is_skipped());
    assert!(output.exists());
}

#[test]
fn schema_failure_writes_no_output() {
    let dir = tempfile::tempdir().unwrap();
    let model_path = dir.path().join("central.json");
    let data_path = dir.path().join("extra_column.csv");
    let output = dir.path().join("out.json");

    central(2, 3).save(&model_path).unwrap();
    Dataset::from_parts(
        vec!["x".to_string(), "y".to_string(), "z".to_string()],
        vec![vec![0.0, 0.0, 1.0], vec![10.0, 4.0, 2.0]],
        Some(vec!["c0".to_string(), "c1".to_string()]),
    )
    .unwrap()
    .to_csv(&data_path)
    .unwrap();

    let err = run_update::<GradientBoostedClassifier>(&UpdateJob {
        model: Some(model_path),
        model_candidates: Vec::new(),
        dataset: data_path,
        output: output.clone(),
        options: UpdateOptions::default(),
    })
    .unwrap_err();

    assert_eq!(err.kind(), "SchemaMismatch");
    assert!(!output.exists());
    assert!(!dir.path().join("out.json.tmp").exists());
}

#[test]
fn missing_model_aborts_before_reading_data() {
    let dir = tempfile::tempdir().unwrap();
    let job = UpdateJob {
        model: None,
        model_candidates: vec![dir.path().join("a.json"), dir.path().join("b.json")],
        dataset: dir.path().join("data.csv"),
        output: dir.path().join("out.json"),
        options: UpdateOptions::default(),
    };
    let err = run_update::<GradientBoostedClassifier>(&job).unwrap_err();
    assert_eq!(err.kind(), "NotFound");
    assert!(!dir.path().join("out.json").exists());
}
