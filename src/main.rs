//! churnforge: customer churn prediction CLI
//!
//! `train` runs the offline pipeline and saves a bundle, `predict` scores one
//! customer against the current bundle, `inspect` describes it.

use anyhow::Result;
use churnforge::config::LoggingConfig;
use churnforge::{
    registry::CHART_FILE, save_bundle, train_from_csv, viz, AppConfig, Args, ChurnError, Command,
    CustomerProfile, ModelVariant, SchemaRegistry, ServingContext,
};
use clap::Parser;
use std::path::Path;
use std::time::Instant;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let args = Args::parse();
    let config = args.resolve_config()?;
    init_logging(&config.logging)?;

    let outcome = match &args.command {
        Command::Train {
            input, no_chart, ..
        } => run_train(&config, input, !no_chart),
        Command::Predict { json, profile, .. } => run_predict(&config, profile, *json),
        Command::Inspect { columns, .. } => run_inspect(&config, *columns),
    };

    if let Err(e) = &outcome {
        if let Some(churn) = e.downcast_ref::<ChurnError>() {
            if churn.is_fatal_for_process() {
                error!(error = %churn, "Artifact bundle unusable, halting");
            }
        }
    }
    outcome
}

/// Install the fmt subscriber; `RUST_LOG` wins over the configured level
fn init_logging(logging: &LoggingConfig) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::new("warn").add_directive(format!("churnforge={}", logging.level).parse()?),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if logging.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(())
}

/// Run the offline pipeline and persist the bundle
fn run_train(config: &AppConfig, input: &Path, render_chart: bool) -> Result<()> {
    println!("=== Training Pipeline ===\n");
    let start_time = Instant::now();
    info!(input = %input.display(), "Starting training run");

    let outcome = train_from_csv(input, &config.training)?;
    println!(
        "✓ Trained {} models on {} features",
        outcome.models.len(),
        outcome.ordered_columns.len()
    );

    println!("\n=== Held-out Results ===");
    let served = config.serving.served_model.parse::<ModelVariant>().ok();
    viz::print_results_table(&outcome.results, served);

    let saved = save_bundle(&config.serving.artifacts_dir, &outcome, render_chart)?;
    println!("\n=== Pipeline Complete ===");
    println!("Run id: {}", saved.run_id);
    println!("Bundle saved to: {}", saved.run_dir.display());
    if render_chart && saved.run_dir.join(CHART_FILE).exists() {
        println!("Chart: {}", saved.run_dir.join(CHART_FILE).display());
    }
    println!("Total processing time: {:.2}s", start_time.elapsed().as_secs_f64());

    Ok(())
}

/// Score one customer from the command-line profile
fn run_predict(config: &AppConfig, profile: &CustomerProfile, json: bool) -> Result<()> {
    let record = profile.to_raw_record()?;
    let context = ServingContext::load(&config.serving.artifacts_dir, &config.serving.served_model)?;
    let prediction = context.score(&record)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&prediction)?);
    } else {
        viz::print_prediction(&prediction);
    }
    Ok(())
}

/// Describe the current bundle
fn run_inspect(config: &AppConfig, show_columns: bool) -> Result<()> {
    let registry = SchemaRegistry::load(&config.serving.artifacts_dir)?;
    let manifest = registry.manifest();

    println!("=== Artifact Bundle ===");
    println!("Run id:        {}", manifest.run_id);
    println!("Created at:    {}", manifest.created_at.to_rfc3339());
    println!("Built by:      churnforge {}", manifest.crate_version);
    println!("Directory:     {}", registry.run_dir().display());
    println!("Features:      {}", manifest.n_features);
    println!(
        "Variants:      {}",
        manifest
            .variants
            .iter()
            .map(ModelVariant::name)
            .collect::<Vec<_>>()
            .join(", ")
    );

    println!("\n=== Category Levels (first = reference) ===");
    for field in registry.schema().levels().fields() {
        println!("{}: {}", field.field, field.categories.join(" | "));
    }

    if show_columns {
        println!("\n=== Feature Columns ===");
        for (i, column) in registry.schema().ordered_columns().iter().enumerate() {
            println!("{:>4}  {}", i, column);
        }
    }

    println!("\n=== Held-out Results ===");
    let served = config.serving.served_model.parse::<ModelVariant>().ok();
    viz::print_results_table(registry.results(), served);

    Ok(())
}
