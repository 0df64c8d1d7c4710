//! Reports for training results and predictions: stdout tables and a Plotters chart

use crate::model::ModelVariant;
use crate::scorer::ChurnPrediction;
use crate::training::TrainingResults;
use plotters::prelude::*;
use std::path::Path;

/// One color per metric, in `METRIC_NAMES` order
const METRIC_COLORS: [RGBColor; 5] = [
    RGBColor(31, 119, 180),
    RGBColor(255, 127, 14),
    RGBColor(44, 160, 44),
    RGBColor(214, 39, 40),
    RGBColor(148, 103, 189),
];

const METRIC_NAMES: [&str; 5] = ["Accuracy", "Precision", "Recall", "F1", "ROC-AUC"];

/// Grouped bar chart of every metric for every trained variant
///
/// # Arguments
/// * `results` - Evaluation summary of a training run
/// * `output_path` - Path to save the PNG chart
///
/// # Returns
/// * Result indicating success or failure
pub fn create_model_comparison_chart(
    results: &TrainingResults,
    output_path: &Path,
) -> crate::Result<()> {
    let n_variants = results.variants.len();
    let names: Vec<&str> = results
        .variants
        .iter()
        .map(|r| r.variant.display_name())
        .collect();

    let root = BitMapBackend::new(output_path, (900, 560)).into_drawing_area();
    root.fill(&WHITE)?;

    let mut chart = ChartBuilder::on(&root)
        .caption("Model Comparison (held-out test split)", ("sans-serif", 28))
        .margin(10)
        .x_label_area_size(50)
        .y_label_area_size(60)
        .build_cartesian_2d(-0.5f64..(n_variants as f64 - 0.5), 0f64..1.05f64)?;

    let label_for = |x: &f64| {
        let i = x.round();
        if (x - i).abs() < 1e-6 && i >= 0.0 && (i as usize) < names.len() {
            names[i as usize].to_string()
        } else {
            String::new()
        }
    };
    chart
        .configure_mesh()
        .disable_x_mesh()
        .x_labels(n_variants.max(1))
        .x_label_formatter(&label_for)
        .y_desc("Score")
        .axis_desc_style(("sans-serif", 15))
        .draw()?;

    let bar_width = 0.8 / METRIC_NAMES.len() as f64;
    for (m, (metric_name, color)) in METRIC_NAMES.iter().zip(METRIC_COLORS).enumerate() {
        let bars = results.variants.iter().enumerate().map(|(i, r)| {
            let values = [
                r.metrics.accuracy,
                r.metrics.precision,
                r.metrics.recall,
                r.metrics.f1,
                r.metrics.roc_auc,
            ];
            let left = i as f64 - 0.4 + m as f64 * bar_width;
            Rectangle::new([(left, 0.0), (left + bar_width, values[m])], color.filled())
        });
        chart
            .draw_series(bars)?
            .label(*metric_name)
            .legend(move |(x, y)| Rectangle::new([(x, y - 5), (x + 10, y + 5)], color.filled()));
    }

    chart
        .configure_series_labels()
        .background_style(&WHITE.mix(0.8))
        .border_style(&BLACK)
        .draw()?;

    root.present()?;
    println!("Model comparison chart saved to: {}", output_path.display());

    Ok(())
}

/// Print the per-variant metric table and the selected model
pub fn print_results_table(results: &TrainingResults, served: Option<ModelVariant>) {
    println!(
        "{:<22} {:>9} {:>10} {:>8} {:>8} {:>8}",
        "Model", "Accuracy", "Precision", "Recall", "F1", "ROC-AUC"
    );
    println!("{}", "-".repeat(70));
    for r in &results.variants {
        let mut marker = String::new();
        if r.variant == results.best {
            marker.push_str(" *best");
        }
        if Some(r.variant) == served {
            marker.push_str(" (served)");
        }
        println!(
            "{:<22} {:>9.4} {:>10.4} {:>8.4} {:>8.4} {:>8.4}{}",
            r.variant.display_name(),
            r.metrics.accuracy,
            r.metrics.precision,
            r.metrics.recall,
            r.metrics.f1,
            r.metrics.roc_auc,
            marker
        );
    }
    println!(
        "\nBest by {}: {}",
        results.selection_metric.to_uppercase(),
        results.best.display_name()
    );
    println!(
        "Class counts (stayed, churned): train {:?} -> resampled {:?}, test {:?}",
        results.train_counts, results.resampled_counts, results.test_counts
    );
}

/// Print a prediction for a human reader
pub fn print_prediction(prediction: &ChurnPrediction) {
    println!("=== Churn Prediction ===");
    println!(
        "Will churn?  {}",
        if prediction.will_churn { "YES" } else { "NO" }
    );
    println!("Risk score:  {:.1}%", prediction.probability_pct);
    println!("Risk level:  {}", prediction.risk);
    println!(
        "Model:       {} (run {})",
        prediction.model.display_name(),
        prediction.run_id
    );
    if !prediction.unrecognized.is_empty() {
        println!(
            "Note: unseen categories scored as baseline: {}",
            prediction.unrecognized.join(", ")
        );
    }
}
