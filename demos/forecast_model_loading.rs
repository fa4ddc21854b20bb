//! Forecast Model Loading: Pick the Best Trial and Load It Back
//!
//! Logs several forecasting trials with a validation MdAPE, picks the best
//! one by search order, registers it and loads it through a `models:/` URI.
//!
//! Run with: cargo run --example forecast_model_loading

use tracing_subscriber::EnvFilter;
use tracklake::evaluation::RegressionMetric;
use tracklake::experiment::ArtifactSource;
use tracklake::query::RunQuery;
use tracklake::registry::Stage;
use tracklake::Workspace;

/// Naive seasonal forecast: repeat the value `season` steps back, scaled
fn forecast(history: &[f64], season: usize, scale: f64, horizon: usize) -> Vec<f64> {
    (0..horizon)
        .map(|h| history[history.len() - season + (h % season)] * scale)
        .collect()
}

#[allow(clippy::cast_precision_loss)]
fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    println!("=== tracklake Forecast Model Loading ===\n");

    let workspace = Workspace::builder()
        .experiment_name("covid-forecast")
        .build()?;

    let cases: Vec<f64> = (0..60)
        .map(|d| 100.0 + 2.0 * d as f64 + 10.0 * ((d % 7) as f64))
        .collect();
    let (train, validation) = cases.split_at(46);

    println!("1. Logging trials...");
    for (season, scale) in [(7, 1.0), (7, 1.1), (14, 1.0), (7, 1.2)] {
        let name = format!("season{season}-scale{scale}");
        let predicted = forecast(train, season, scale, validation.len());
        let mdape = RegressionMetric::Mdape.compute(validation, &predicted)?;

        workspace.tracker().run(&name, |run| -> tracklake::Result<()> {
            run.log_param("season", season)?;
            run.log_param("scale", scale)?;
            run.log_param("horizon", validation.len())?;
            run.log_metric("val_mdape", mdape, None)?;
            run.log_artifact(
                ArtifactSource::Json(serde_json::json!({"season": season, "scale": scale})),
                "model",
            )?;
            Ok(())
        })?;
        println!("   {name}: val_mdape = {mdape:.4}");
    }

    println!("\n2. Selecting the best trial...");
    let query = RunQuery::new()
        .order_by("metrics.val_mdape ASC")?
        .max_results(1);
    let best = workspace
        .tracker()
        .search_runs_with(&query)?
        .into_iter()
        .next()
        .ok_or_else(|| anyhow::anyhow!("no trials logged"))?;
    println!("   best: {} ({})", best.run_name, best.run_id);

    println!("\n3. Registering and loading...");
    let registry = workspace.registry();
    let version = registry.register_model(&format!("runs:/{}/model", best.run_id), "covid-forecast")?;
    registry.transition_stage("covid-forecast", version.version(), Stage::Staging)?;

    let uri = format!("models:/covid-forecast/{}", version.version());
    let params: serde_json::Value = workspace.load_json(&uri)?;
    println!("   {uri} -> {params}");

    let staged: serde_json::Value = workspace.load_json("models:/covid-forecast/Staging")?;
    assert_eq!(params, staged);
    println!("   models:/covid-forecast/Staging resolves to the same model");

    Ok(())
}
