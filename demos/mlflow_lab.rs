//! MLflow-style Lab: Versioned Splits, Tracked Runs, Registered Models
//!
//! Walks the train/track/register loop end to end:
//! 1. Write a train split, then append rows with a new column (schema evolution)
//! 2. Fit a one-feature linear model and track it against the data version
//! 3. Search runs by parameter and metric
//! 4. Register, promote, describe, archive and delete the model
//!
//! Run with: RUST_LOG=tracklake=debug cargo run --example mlflow_lab

use anyhow::Context;
use arrow::array::{Array, Float64Array, RecordBatch};
use arrow::datatypes::{DataType, Field, Schema};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use tracklake::evaluation::{RegressionEvaluator, RegressionMetric};
use tracklake::experiment::ArtifactSource;
use tracklake::registry::{DescriptionTarget, Stage};
use tracklake::storage::{Dataset, WriteOptions};
use tracklake::Workspace;

/// Synthetic listings: price grows with bedrooms, plus a little noise
#[allow(clippy::cast_precision_loss)]
fn listings(start: usize, rows: usize) -> anyhow::Result<RecordBatch> {
    let schema = Schema::new(vec![
        Field::new("bedrooms", DataType::Float64, false),
        Field::new("price", DataType::Float64, false),
    ]);
    let bedrooms: Vec<f64> = (start..start + rows).map(|i| (i % 5) as f64 + 1.0).collect();
    let price: Vec<f64> = bedrooms
        .iter()
        .enumerate()
        .map(|(i, b)| 40.0 + 35.0 * b + ((i % 7) as f64 - 3.0))
        .collect();
    Ok(RecordBatch::try_new(
        Arc::new(schema),
        vec![
            Arc::new(Float64Array::from(bedrooms)),
            Arc::new(Float64Array::from(price)),
        ],
    )?)
}

fn float_column(data: &Dataset, name: &str) -> anyhow::Result<Vec<f64>> {
    let column = data.column(name)?;
    let column = column
        .as_any()
        .downcast_ref::<Float64Array>()
        .with_context(|| format!("column '{name}' is not Float64"))?;
    Ok(column.iter().flatten().collect())
}

/// Ordinary least squares for price = intercept + slope * bedrooms
#[allow(clippy::cast_precision_loss)]
fn fit(data: &Dataset) -> anyhow::Result<(f64, f64)> {
    let x = float_column(data, "bedrooms")?;
    let y = float_column(data, "price")?;
    let n = x.len() as f64;
    let mean_x = x.iter().sum::<f64>() / n;
    let mean_y = y.iter().sum::<f64>() / n;
    let cov: f64 = x.iter().zip(&y).map(|(a, b)| (a - mean_x) * (b - mean_y)).sum();
    let var: f64 = x.iter().map(|a| (a - mean_x).powi(2)).sum();
    let slope = cov / var;
    Ok((mean_y - slope * mean_x, slope))
}

fn with_predictions(data: &Dataset, intercept: f64, slope: f64) -> anyhow::Result<Dataset> {
    let batch = data.concat()?;
    let predictions: Vec<f64> = float_column(data, "bedrooms")?
        .iter()
        .map(|b| intercept + slope * b)
        .collect();

    let mut fields: Vec<Field> = batch.schema().fields().iter().map(|f| f.as_ref().clone()).collect();
    fields.push(Field::new("prediction", DataType::Float64, false));
    let mut columns = batch.columns().to_vec();
    columns.push(Arc::new(Float64Array::from(predictions)));
    Ok(Dataset::from(RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)?))
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    println!("=== tracklake MLflow Lab ===\n");

    let tracking_dir = std::env::temp_dir().join("tracklake-mlflow-lab");
    let workspace = Workspace::builder()
        .experiment_name("airbnb-lr")
        .tracking_dir(&tracking_dir)
        .build()?;

    // -------------------------------------------------------------------------
    // 1. Versioned splits
    // -------------------------------------------------------------------------
    println!("1. Writing versioned splits...");
    let store = workspace.store();
    let v0 = store.write("/splits/train", listings(0, 80)?, WriteOptions::overwrite())?;
    store.write("/splits/test", listings(80, 20)?, WriteOptions::overwrite())?;

    let extra = {
        let base = listings(100, 10)?;
        let mut fields: Vec<Field> = base.schema().fields().iter().map(|f| f.as_ref().clone()).collect();
        fields.push(Field::new("review_score", DataType::Float64, false));
        let mut columns = base.columns().to_vec();
        columns.push(Arc::new(Float64Array::from(vec![4.5; 10])));
        RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)?
    };
    let v1 = store.write(
        "/splits/train",
        extra,
        WriteOptions::append().merge_schema(true),
    )?;

    for snapshot in store.history("/splits/train")? {
        println!(
            "   v{} {} {:?} rows={}",
            snapshot.version(),
            snapshot.operation(),
            snapshot.operation_parameters(),
            snapshot.num_rows()
        );
    }
    println!(
        "   v{} has review_score: {}",
        v0.version(),
        store.read("/splits/train", Some(v0.version()))?.has_column("review_score")
    );
    println!(
        "   v{} has review_score: {}\n",
        v1.version(),
        store.read("/splits/train", Some(v1.version()))?.has_column("review_score")
    );

    // -------------------------------------------------------------------------
    // 2. Track a training run pinned to v0
    // -------------------------------------------------------------------------
    println!("2. Training against /splits/train@v{}...", v0.version());
    let train = store.read("/splits/train", Some(v0.version()))?;
    let test = store.read("/splits/test", None)?;

    let run_id = workspace.tracker().run("lr_model", |run| -> anyhow::Result<String> {
        let (intercept, slope) = fit(&train)?;
        let scored = with_predictions(&test, intercept, slope)?;
        let evaluator = RegressionEvaluator::new("price", "prediction");

        run.log_param("label", "price")?;
        run.log_param("features", "bedrooms")?;
        run.log_param("data_version", v0.version())?;
        for metric in [RegressionMetric::Rmse, RegressionMetric::R2] {
            let value = evaluator.clone().metric(metric).evaluate(&scored)?;
            run.log_metric(metric.as_str(), value, None)?;
            println!("   {metric} = {value:.4}");
        }
        run.log_artifact(
            ArtifactSource::Json(serde_json::json!({"intercept": intercept, "slope": slope})),
            "log-model",
        )?;
        Ok(run.run_id().to_string())
    })?;
    println!("   run_id = {run_id}\n");

    // -------------------------------------------------------------------------
    // 3. Search
    // -------------------------------------------------------------------------
    println!("3. Searching runs...");
    let filter = format!("params.data_version = '{}' AND metrics.rmse < 10", v0.version());
    for summary in workspace.tracker().search_runs(&filter)? {
        println!(
            "   {} {} {} rmse={:.4}",
            summary.run_id,
            summary.run_name,
            summary.status,
            summary.metrics.get("rmse").copied().unwrap_or(f64::NAN)
        );
    }
    println!();

    // -------------------------------------------------------------------------
    // 4. Registry
    // -------------------------------------------------------------------------
    println!("4. Registering the model...");
    let registry = workspace.registry();
    let model_uri = format!("runs:/{run_id}/log-model");
    let version = registry.register_model(&model_uri, "airbnb-lr")?;
    registry.update_description(
        "airbnb-lr",
        DescriptionTarget::Model,
        "Predicts nightly listing price",
    )?;
    registry.update_description(
        "airbnb-lr",
        DescriptionTarget::Version(version.version()),
        "Linear regression on bedrooms only",
    )?;
    registry.transition_stage("airbnb-lr", version.version(), Stage::Production)?;

    let model: serde_json::Value = workspace.load_json("models:/airbnb-lr/Production")?;
    println!("   models:/airbnb-lr/Production -> {model}");

    for v in registry.search_versions("airbnb-lr") {
        println!("   version {} stage={} source={}", v.version(), v.stage(), v.source());
    }

    registry.transition_stage("airbnb-lr", version.version(), Stage::Archived)?;
    let deleted = registry.delete_model("airbnb-lr")?;
    println!("   deleted '{}' after archiving\n", deleted.name());

    println!("Runs persisted under {}", tracking_dir.display());
    Ok(())
}
