//! Aggregator Tests
//!
//! Directory-level selection: weighted choice, recency default, skipping of
//! undecodable candidates, and the empty-input law.

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use fedboost::aggregation::{aggregate_directory, AggregationJob, SelectionPolicy};
use fedboost::model::artifact::digest;
use fedboost::model::{
    GradientBoostedClassifier, ModelArtifact, Producer, ProvenanceRecord, TrainingProfile,
    TreeEnsemble,
};

// ============================================================================
// Helpers
// ============================================================================

fn tiny_model(seed: u64) -> ModelArtifact<GradientBoostedClassifier> {
    let profile = TrainingProfile {
        n_estimators: 2,
        seed,
        ..TrainingProfile::DEFAULT
    };
    let rows = vec![vec![0.0], vec![1.0], vec![seed as f64 + 2.0], vec![seed as f64 + 3.0]];
    let model =
        GradientBoostedClassifier::train(&profile.with_classes(2), &rows, &[0, 0, 1, 1]).unwrap();
    ModelArtifact::new(
        model,
        vec!["a".to_string(), "b".to_string()],
        vec!["x".to_string()],
        ProvenanceRecord::new(Producer::ClientUpdater, "test", 4),
    )
}

/// Write a valid artifact and pin its modification time.
fn write_model(dir: &Path, name: &str, seed: u64, mtime_secs: u64) -> PathBuf {
    let path = dir.join(name);
    tiny_model(seed).save(&path).unwrap();
    set_mtime(&path, mtime_secs);
    path
}

fn write_garbage(dir: &Path, name: &str, mtime_secs: u64) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, b"{\"trees\": \"definitely not a model\"}").unwrap();
    set_mtime(&path, mtime_secs);
    path
}

fn set_mtime(path: &Path, secs: u64) {
    let t = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000 + secs);
    File::options()
        .write(true)
        .open(path)
        .unwrap()
        .set_modified(t)
        .unwrap();
}

fn job(dir: &Path, weights: Option<Vec<f64>>) -> AggregationJob {
    AggregationJob {
        model_dir: dir.to_path_buf(),
        output: dir.join("aggregated_model.json"),
        extension: "json".to_string(),
        weights,
        policy: SelectionPolicy::Auto,
    }
}

// ============================================================================
// Selection
// ============================================================================

#[test]
fn scenario_d_highest_weight_is_selected() {
    let dir = tempfile::tempdir().unwrap();
    write_model(dir.path(), "client_a.json", 1, 300);
    let b = write_model(dir.path(), "client_b.json", 2, 100);
    write_model(dir.path(), "client_c.json", 3, 200);

    let summary =
        aggregate_directory::<GradientBoostedClassifier>(&job(dir.path(), Some(vec![0.2, 0.5, 0.3])))
            .unwrap();

    assert_eq!(summary.chosen, b);
    assert!((summary.weight - 0.5).abs() < 1e-12);
    assert_eq!(summary.policy, SelectionPolicy::HighestWeight);
    assert_eq!(summary.considered, 3);
    assert_eq!(summary.digest, digest(&b).unwrap());
    assert_eq!(
        fs::read(dir.path().join("aggregated_model.json")).unwrap(),
        fs::read(&b).unwrap()
    );
}

#[test]
fn default_run_without_weights_picks_most_recent() {
    let dir = tempfile::tempdir().unwrap();
    write_model(dir.path(), "m1.json", 1, 100);
    let newest = write_model(dir.path(), "m2.json", 2, 900);
    write_model(dir.path(), "m3.json", 3, 500);

    let summary = aggregate_directory::<GradientBoostedClassifier>(&job(dir.path(), None)).unwrap();

    assert_eq!(summary.chosen, newest);
    assert_eq!(summary.policy, SelectionPolicy::MostRecent);
    assert!(summary.to_string().contains("no parameter averaging"));
}

#[test]
fn raw_and_normalized_weights_choose_the_same_candidate() {
    let dir = tempfile::tempdir().unwrap();
    write_model(dir.path(), "a.json", 1, 10);
    write_model(dir.path(), "b.json", 2, 5);

    let raw = aggregate_directory::<GradientBoostedClassifier>(&job(dir.path(), Some(vec![3.0, 7.0])))
        .unwrap();
    let norm =
        aggregate_directory::<GradientBoostedClassifier>(&job(dir.path(), Some(vec![0.3, 0.7])))
            .unwrap();

    assert_eq!(raw.chosen, norm.chosen);
    assert!((raw.weight - norm.weight).abs() < 1e-12);
    assert_eq!(raw.digest, norm.digest);
}

#[test]
fn single_candidate_is_copied_unchanged() {
    let dir = tempfile::tempdir().unwrap();
    let only = write_model(dir.path(), "only.json", 4, 1);

    for weights in [None, Some(vec![0.0]), Some(vec![42.0])] {
        let summary =
            aggregate_directory::<GradientBoostedClassifier>(&job(dir.path(), weights)).unwrap();
        assert_eq!(summary.chosen, only);
        assert_eq!(summary.digest, digest(&only).unwrap());
    }
}

#[test]
fn previous_aggregate_output_is_not_a_candidate() {
    let dir = tempfile::tempdir().unwrap();
    write_model(dir.path(), "a.json", 1, 10);
    write_model(dir.path(), "aggregated_model.json", 9, 99_999);

    let summary = aggregate_directory::<GradientBoostedClassifier>(&job(dir.path(), None)).unwrap();
    assert_eq!(summary.considered, 1);
    assert_eq!(summary.chosen, dir.path().join("a.json"));
}

// ============================================================================
// Failure handling
// ============================================================================

#[test]
fn undecodable_candidates_are_skipped_and_renormalized() {
    let dir = tempfile::tempdir().unwrap();
    write_garbage(dir.path(), "a.json", 10);
    write_model(dir.path(), "b.json", 1, 20);
    let c = write_model(dir.path(), "c.json", 2, 30);

    // The broken file carries most of the weight; the survivors tie.
    let summary = aggregate_directory::<GradientBoostedClassifier>(&job(
        dir.path(),
        Some(vec![0.9, 0.05, 0.05]),
    ))
    .unwrap();

    assert_eq!(summary.skipped, vec![dir.path().join("a.json")]);
    assert_eq!(summary.loaded, 2);
    assert_eq!(summary.chosen, c);
    assert!((summary.weight - 0.5).abs() < 1e-9);
}

#[test]
fn empty_directory_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let err = aggregate_directory::<GradientBoostedClassifier>(&job(dir.path(), None)).unwrap_err();
    assert_eq!(err.kind(), "NotFound");

    let err = aggregate_directory::<GradientBoostedClassifier>(&job(dir.path(), Some(vec![1.0])))
        .unwrap_err();
    assert_eq!(err.kind(), "NotFound");
}

#[test]
fn all_undecodable_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    write_garbage(dir.path(), "a.json", 1);
    write_garbage(dir.path(), "b.json", 2);

    let err = aggregate_directory::<GradientBoostedClassifier>(&job(dir.path(), Some(vec![1.0, 1.0])))
        .unwrap_err();
    assert_eq!(err.kind(), "NotFound");
    assert!(!dir.path().join("aggregated_model.json").exists());
}

#[test]
fn invalid_weights_are_configuration_errors() {
    let dir = tempfile::tempdir().unwrap();
    write_model(dir.path(), "a.json", 1, 1);
    write_model(dir.path(), "b.json", 2, 2);

    for weights in [vec![1.0, -1.0], vec![0.0, 0.0], vec![1.0]] {
        let err = aggregate_directory::<GradientBoostedClassifier>(&job(dir.path(), Some(weights)))
            .unwrap_err();
        assert_eq!(err.kind(), "Configuration");
    }
    assert!(!dir.path().join("aggregated_model.json").exists());
}

#[test]
fn negative_weight_on_undecodable_candidate_is_still_rejected() {
    let dir = tempfile::tempdir().unwrap();
    write_garbage(dir.path(), "a.json", 1);
    write_model(dir.path(), "b.json", 1, 2);
    write_model(dir.path(), "c.json", 2, 3);

    let err = aggregate_directory::<GradientBoostedClassifier>(&job(
        dir.path(),
        Some(vec![-5.0, 1.0, 2.0]),
    ))
    .unwrap_err();
    assert_eq!(err.kind(), "Configuration");
    assert!(err.to_string().contains("#0"));
    assert!(!dir.path().join("aggregated_model.json").exists());

    let err = aggregate_directory::<GradientBoostedClassifier>(&job(
        dir.path(),
        Some(vec![f64::NAN, 1.0, 2.0]),
    ))
    .unwrap_err();
    assert_eq!(err.kind(), "Configuration");
}

#[test]
fn missing_directory_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let err = aggregate_directory::<GradientBoostedClassifier>(&job(&dir.path().join("absent"), None))
        .unwrap_err();
    assert_eq!(err.kind(), "NotFound");
}
