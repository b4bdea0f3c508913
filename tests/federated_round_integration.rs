//! Federated Round Integration Test
//!
//! Runs the full loop on disk: partitioned central data, one labeled and one
//! unlabeled client, then weighted aggregation of the client models. The
//! aggregate becomes the input of the next client update.

use std::path::Path;

use fedboost::aggregation::{aggregate_directory, AggregationJob, SelectionPolicy};
use fedboost::central::{run_central, CentralJob};
use fedboost::client::{run_update, UpdateJob, UpdateOptions};
use fedboost::dataset::Dataset;
use fedboost::model::{GradientBoostedClassifier, ModelArtifact, Producer, TrainingProfile};
use fedboost::UpdateOutcome;

const CLASSES: [&str; 3] = ["benign", "scan", "flood"];

/// Rows for the given class indices around fixed, well separated centers.
fn sample(classes: &[usize], per_class: usize, labeled: bool) -> Dataset {
    let mut rows = Vec::new();
    let mut labels = Vec::new();
    for &c in classes {
        for i in 0..per_class {
            let wobble = ((i * 37) % 11) as f64 * 0.1;
            rows.push(vec![c as f64 * 20.0 + wobble, 100.0 - c as f64 * 15.0 - wobble, wobble]);
            labels.push(CLASSES[c].to_string());
        }
    }
    Dataset::from_parts(
        vec!["bytes".to_string(), "duration".to_string(), "flags".to_string()],
        rows,
        labeled.then_some(labels),
    )
    .unwrap()
}

fn run_client(central: &Path, data: &Dataset, dir: &Path, name: &str) -> UpdateOutcome {
    let dataset = dir.join(format!("client_data/{name}.csv"));
    data.to_csv(&dataset).unwrap();
    run_update::<GradientBoostedClassifier>(&UpdateJob {
        model: Some(central.to_path_buf()),
        model_candidates: Vec::new(),
        dataset,
        output: dir.join(format!("model/{name}.json")),
        options: UpdateOptions::default(),
    })
    .unwrap()
    .outcome
}

#[test]
fn central_clients_aggregate_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();

    // ---- Central ----
    for p in 0..3 {
        sample(&[0, 1, 2], 15, true)
            .to_csv(&root.join(format!("data/part-{p:05}.csv")))
            .unwrap();
    }
    let central_path = root.join("Central_model.json");
    let central = run_central::<GradientBoostedClassifier>(&CentralJob {
        data_dir: root.join("data"),
        part_prefix: "part-".to_string(),
        test_fraction: 0.2,
        output: central_path.clone(),
        profile: TrainingProfile {
            n_estimators: 20,
            ..TrainingProfile::DEFAULT
        },
    })
    .unwrap();

    assert_eq!(central.parts.len(), 3);
    assert_eq!(central.rows, 135);
    assert_eq!(central.eval.test_rows, 27);
    assert_eq!(central.eval.accuracy, Some(1.0));
    let loaded = ModelArtifact::<GradientBoostedClassifier>::load(&central_path).unwrap();
    assert_eq!(loaded.num_class(), 3);
    assert_eq!(loaded.latest_record().unwrap().producer, Producer::CentralTrainer);

    // ---- Clients ----
    let labeled = run_client(&central_path, &sample(&[0, 1, 2], 10, true), root, "site_a");
    assert!(matches!(labeled, UpdateOutcome::Trained { rows: 30, .. }));

    let unlabeled = run_client(&central_path, &sample(&[1, 2], 25, false), root, "site_b");
    match &unlabeled {
        UpdateOutcome::NewModelDueToClassMismatch { num_class, remap, .. } => {
            assert_eq!(*num_class, 2);
            assert_eq!(remap.to_string(), "{1->0, 2->1}");
        }
        other => panic!("expected class-mismatch rebuild, got {other:?}"),
    }
    let site_b =
        ModelArtifact::<GradientBoostedClassifier>::load(&root.join("model/site_b.json")).unwrap();
    // Class ids follow sorted label names: benign=0, flood=1, scan=2.
    assert_eq!(site_b.classes, vec!["flood", "scan"]);

    // ---- Aggregate (weights = client sizes, sorted by file name) ----
    let output = root.join("model/aggregated_model.json");
    let summary = aggregate_directory::<GradientBoostedClassifier>(&AggregationJob {
        model_dir: root.join("model"),
        output: output.clone(),
        extension: "json".to_string(),
        weights: Some(vec![30.0, 50.0]),
        policy: SelectionPolicy::Auto,
    })
    .unwrap();
    assert_eq!(summary.chosen, root.join("model/site_b.json"));
    assert!((summary.weight - 0.625).abs() < 1e-12);

    // ---- Next round starts from the aggregate ----
    let next = run_client(&output, &sample(&[1, 2], 5, true), root, "site_c");
    assert!(matches!(next, UpdateOutcome::Trained { rows: 10, .. }));
}
