//! End-to-end workflow: versioned splits, tracked runs, registered models
//!
//! 1. Write train/test splits as versioned tables, evolve the schema
//! 2. Track a training run against a pinned data version
//! 3. Find the run again by filter, register its model
//! 4. Promote, describe, archive and delete the model
//!
//! Toyota Way: Jidoka (Built-in Quality)

use arrow::array::{Array, Float64Array, Int32Array, RecordBatch};
use arrow::datatypes::{DataType, Field, Schema};
use std::sync::Arc;
use tracklake::evaluation::{RegressionEvaluator, RegressionMetric};
use tracklake::experiment::{ArtifactSource, RunStatus};
use tracklake::registry::{DeletePolicy, DescriptionTarget, Stage};
use tracklake::storage::{Dataset, WriteOptions};
use tracklake::{Error, Workspace};

/// Listings with `id`, `bedrooms` and `price`
#[allow(clippy::cast_precision_loss)]
#[allow(clippy::cast_possible_truncation)]
#[allow(clippy::cast_possible_wrap)]
fn listings(start: usize, rows: usize) -> RecordBatch {
    let schema = Schema::new(vec![
        Field::new("id", DataType::Int32, false),
        Field::new("bedrooms", DataType::Float64, false),
        Field::new("price", DataType::Float64, false),
    ]);
    let ids = start..start + rows;
    RecordBatch::try_new(
        Arc::new(schema),
        vec![
            Arc::new(Int32Array::from_iter_values(ids.clone().map(|i| i as i32))),
            Arc::new(Float64Array::from_iter_values(ids.clone().map(|i| (i % 4) as f64 + 1.0))),
            Arc::new(Float64Array::from_iter_values(ids.map(|i| 50.0 + 25.0 * ((i % 4) as f64)))),
        ],
    )
    .unwrap()
}

/// Fitted "model": price = intercept + slope * bedrooms
fn predict(data: &Dataset, intercept: f64, slope: f64) -> Dataset {
    let batch = data.concat().unwrap();
    let bedrooms = data.column("bedrooms").unwrap();
    let bedrooms = bedrooms.as_any().downcast_ref::<Float64Array>().unwrap();
    let predictions = Float64Array::from_iter_values(
        bedrooms.values().iter().map(|b| intercept + slope * b),
    );

    let mut fields: Vec<Field> = batch.schema().fields().iter().map(|f| f.as_ref().clone()).collect();
    fields.push(Field::new("prediction", DataType::Float64, false));
    let mut columns = batch.columns().to_vec();
    columns.push(Arc::new(predictions));
    Dataset::from(RecordBatch::try_new(Arc::new(Schema::new(fields)), columns).unwrap())
}

#[test]
fn test_time_travel_with_schema_evolution() {
    let workspace = Workspace::builder().build().unwrap();
    let store = workspace.store();

    store.write("/t", listings(0, 3), WriteOptions::overwrite()).unwrap();

    let with_x = {
        let base = listings(3, 2);
        let mut fields: Vec<Field> = base.schema().fields().iter().map(|f| f.as_ref().clone()).collect();
        fields.push(Field::new("x", DataType::Float64, false));
        let mut columns = base.columns().to_vec();
        columns.push(Arc::new(Float64Array::from(vec![0.5, 1.5])));
        RecordBatch::try_new(Arc::new(Schema::new(fields)), columns).unwrap()
    };
    let v1 = store
        .write("/t", with_x, WriteOptions::append().merge_schema(true))
        .unwrap();
    assert_eq!(v1.version(), 1);

    let v0 = store.read("/t", Some(0)).unwrap();
    assert_eq!(v0.num_rows(), 3);
    assert!(!v0.has_column("x"));

    let latest = store.read("/t", Some(1)).unwrap();
    assert_eq!(latest.num_rows(), 5);
    let x = latest.column("x").unwrap();
    assert_eq!(x.null_count(), 3);

    let history = store.history("/t").unwrap();
    assert_eq!(history[0].operation_parameters()["mode"], "Overwrite");
    assert_eq!(history[1].operation_parameters()["mergeSchema"], "true");

    assert!(matches!(
        store.read("/t", Some(5)),
        Err(Error::VersionNotFound { version: 5, latest: 1, .. })
    ));
}

#[test]
fn test_splits_round_trip_through_parquet() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("train.parquet");
    Dataset::from(listings(0, 100)).write_parquet(&path).unwrap();

    let workspace = Workspace::builder().build().unwrap();
    let loaded = Dataset::load_parquet(&path).unwrap();
    workspace
        .store()
        .write("/splits/train", loaded, WriteOptions::overwrite())
        .unwrap();
    assert_eq!(workspace.store().read("/splits/train", None).unwrap().num_rows(), 100);
}

#[test]
fn test_mlflow_lab_workflow() {
    let dir = tempfile::tempdir().unwrap();
    let workspace = Workspace::builder()
        .experiment_name("airbnb-lr")
        .tracking_dir(dir.path().join("mlruns"))
        .tables_dir(dir.path().join("tables"))
        .build()
        .unwrap();

    // Versioned splits
    let train_v0 = workspace
        .store()
        .write("/splits/train", listings(0, 80), WriteOptions::overwrite())
        .unwrap();
    workspace
        .store()
        .write("/splits/test", listings(80, 20), WriteOptions::overwrite())
        .unwrap();

    // Train against the pinned version
    let run_id = workspace
        .tracker()
        .run("lr_model", |run| -> tracklake::Result<String> {
            let test = workspace.store().read("/splits/test", None)?;
            let predictions = predict(&test, 25.0, 25.0);
            let evaluator = RegressionEvaluator::new("price", "prediction");

            run.log_param("label", "price")?;
            run.log_param("features", "all_features")?;
            run.log_param("data_version", train_v0.version())?;
            run.log_metric("rmse", evaluator.clone().metric(RegressionMetric::Rmse).evaluate(&predictions)?, None)?;
            run.log_metric("r2", evaluator.metric(RegressionMetric::R2).evaluate(&predictions)?, None)?;
            run.log_artifact(
                ArtifactSource::Json(serde_json::json!({"intercept": 25.0, "slope": 25.0})),
                "log-model",
            )?;
            Ok(run.run_id().to_string())
        })
        .unwrap();

    // Find it again
    let found = workspace
        .tracker()
        .search_runs("params.data_version = '0' AND metrics.rmse < 1")
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].run_id, run_id);
    assert_eq!(found[0].status, RunStatus::Finished);
    assert!((found[0].metrics["r2"] - 1.0).abs() < 1e-9);

    // Register and promote
    let registry = workspace.registry();
    let model_uri = format!("runs:/{run_id}/log-model");
    let v1 = registry.register_model(&model_uri, "airbnb-lr").unwrap();
    let v2 = registry.register_model(&model_uri, "airbnb-lr").unwrap();
    assert_eq!((v1.version(), v2.version()), (1, 2));

    registry
        .update_description("airbnb-lr", DescriptionTarget::Model, "Predicts listing price")
        .unwrap();
    registry
        .update_description("airbnb-lr", DescriptionTarget::Version(1), "Bedrooms only")
        .unwrap();
    registry
        .transition_stage("airbnb-lr", 1, "Production".parse().unwrap())
        .unwrap();
    registry
        .transition_stage_with("airbnb-lr", 2, Stage::Production, true)
        .unwrap();

    let versions = registry.search_versions("airbnb-lr");
    assert_eq!(versions[0].stage(), Stage::Archived);
    assert_eq!(versions[1].stage(), Stage::Production);
    assert_eq!(versions[0].description(), "Bedrooms only");

    // Load the production model
    let model: serde_json::Value = workspace.load_json("models:/airbnb-lr/Production").unwrap();
    assert_eq!(model["slope"], 25.0);

    // Deletion needs every version archived
    assert!(matches!(
        registry.delete_model("airbnb-lr"),
        Err(Error::ModelHasActiveVersions { .. })
    ));
    registry.transition_stage("airbnb-lr", 2, Stage::Archived).unwrap();
    registry.delete_model("airbnb-lr").unwrap();
    assert!(registry.search_versions("airbnb-lr").is_empty());

    // A later process overwrites the split, then rebuilds from the run
    workspace
        .store()
        .write("/splits/train", listings(200, 5), WriteOptions::overwrite())
        .unwrap();
    drop(workspace);

    let reopened = Workspace::builder()
        .experiment_name("airbnb-lr")
        .tracking_dir(dir.path().join("mlruns"))
        .tables_dir(dir.path().join("tables"))
        .build()
        .unwrap();
    let run = reopened.tracker().get_run(&run_id).unwrap();
    let data_version: u64 = run.param("data_version").unwrap().parse().unwrap();
    assert_eq!(data_version, 0);

    let pinned = reopened.store().read("/splits/train", Some(data_version)).unwrap();
    assert_eq!(pinned.num_rows(), 80);
    assert_eq!(reopened.store().read("/splits/train", None).unwrap().num_rows(), 5);
    let reloaded: serde_json::Value = reopened
        .load_json(&format!("runs:/{run_id}/log-model"))
        .unwrap();
    assert_eq!(reloaded, model);
}

#[test]
fn test_forecast_best_trial_loading() {
    let workspace = Workspace::builder()
        .experiment_name("covid-forecast")
        .delete_policy(DeletePolicy::Cascade)
        .build()
        .unwrap();

    // Several trials, each logging its validation mdape
    for (trial, mdape) in [0.31, 0.12, 0.27].into_iter().enumerate() {
        workspace
            .tracker()
            .run(&format!("trial-{trial}"), |run| -> tracklake::Result<()> {
                run.log_param("horizon", 30)?;
                run.log_metric("val_mdape", mdape, None)?;
                run.log_artifact(
                    ArtifactSource::Json(serde_json::json!({"trial": trial})),
                    "model",
                )?;
                Ok(())
            })
            .unwrap();
    }

    let best = workspace
        .tracker()
        .search_runs_with(
            &tracklake::query::RunQuery::new()
                .order_by("metrics.val_mdape ASC")
                .unwrap()
                .max_results(1),
        )
        .unwrap();
    assert_eq!(best[0].run_name, "trial-1");

    let model: serde_json::Value = workspace
        .load_json(&format!("runs:/{}/model", best[0].run_id))
        .unwrap();
    assert_eq!(model["trial"], 1);

    workspace
        .registry()
        .register_model(&format!("runs:/{}/model", best[0].run_id), "covid-forecast")
        .unwrap();
    workspace
        .registry()
        .transition_stage("covid-forecast", 1, Stage::Production)
        .unwrap();
    // Cascade policy deletes active versions too
    workspace.registry().delete_model("covid-forecast").unwrap();
}
