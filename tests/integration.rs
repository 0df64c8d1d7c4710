//! Integration tests for churnforge

use churnforge::config::{ReferenceCategory, TrainingConfig};
use churnforge::profile::{Contract, Gender, InternetService, PaymentMethod, YesNo};
use churnforge::registry::SCALER_FILE;
use churnforge::{
    save_bundle, train_from_csv, ChurnError, CustomerProfile, ModelVariant, RawRecord, RiskBand,
    SchemaRegistry, ServingContext,
};
use std::io::Write;
use tempfile::{NamedTempFile, TempDir};

const PAYMENT_METHODS: [&str; 4] = [
    "Electronic check",
    "Mailed check",
    "Bank transfer (automatic)",
    "Credit card (automatic)",
];

/// Telco-shaped export; returns the file and the (stayed, churned) counts of complete rows
fn create_telco_csv(n: usize) -> (NamedTempFile, (usize, usize)) {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(
        file,
        "CustomerID,Count,Country,Zip Code,Latitude,Longitude,Gender,Senior Citizen,Partner,Dependents,Tenure Months,\
         Phone Service,Internet Service,Tech Support,Contract,Paperless Billing,Payment Method,\
         Monthly Charges,Total Charges,CLTV,Churn Label,Churn Value,Churn Score,Churn Reason"
    )
    .unwrap();

    let mut counts = (0, 0);
    for i in 0..n {
        let contract = ["Month-to-month", "One year", "Two year"][(i / 2) % 3];
        let internet = ["No", "DSL", "Fiber optic", "Fiber optic"][i % 4];
        let tech = if internet != "No" && i % 6 == 1 { "Yes" } else { "No" };
        let tenure = if contract == "Month-to-month" { 1 + i % 20 } else { 20 + i % 50 };
        let monthly = 20.0
            + match internet {
                "Fiber optic" => 70.0,
                "DSL" => 40.0,
                _ => 0.0,
            }
            + (i % 10) as f64 * 1.5;
        let churned = contract == "Month-to-month" && (internet == "Fiber optic" || tenure < 6);

        // Blank total charges, as in the raw export for brand-new customers
        let total = if i % 37 == 5 {
            String::new()
        } else {
            if churned {
                counts.1 += 1;
            } else {
                counts.0 += 1;
            }
            format!("{:.2}", monthly * tenure as f64)
        };

        writeln!(
            file,
            "C{:04},1,United States,{},{:.4},{:.4},{},{},{},{},{},{},{},{},{},{},{},{:.2},{},{},{},{},{},{}",
            i,
            90001 + (i * 13) % 900,
            32.5 + (i % 40) as f64 * 0.12,
            -124.0 + (i % 55) as f64 * 0.1,
            if i % 2 == 0 { "Male" } else { "Female" },
            if i % 7 == 0 { "Yes" } else { "No" },
            if i % 3 == 0 { "Yes" } else { "No" },
            if i % 5 == 0 { "Yes" } else { "No" },
            tenure,
            if i % 10 == 0 { "No" } else { "Yes" },
            internet,
            tech,
            contract,
            if (i / 3) % 2 == 0 { "Yes" } else { "No" },
            PAYMENT_METHODS[(i / 4) % 4],
            monthly,
            total,
            2000 + (i * 37) % 4500,
            if churned { "Yes" } else { "No" },
            u8::from(churned),
            if churned { 80 + i % 20 } else { 20 + i % 40 },
            if churned { "Competitor offered more data" } else { "" },
        )
        .unwrap();
    }
    (file, counts)
}

/// Training config with the documented reference categories of the serving form
fn training_config() -> TrainingConfig {
    let reference = |field: &str, value: &str| ReferenceCategory {
        field: field.to_string(),
        value: value.to_string(),
    };
    TrainingConfig {
        reference_categories: vec![
            reference("Gender", "Male"),
            reference("Phone Service", "Yes"),
            reference("Internet Service", "No"),
            reference("Payment Method", "Electronic check"),
        ],
        forest_trees: 25,
        ..TrainingConfig::default()
    }
}

/// Train on a fresh fixture and save it; the TempDir must outlive the bundle
fn create_bundle() -> (TempDir, churnforge::TrainingOutcome, (usize, usize)) {
    let (csv, counts) = create_telco_csv(240);
    let outcome = train_from_csv(csv.path(), &training_config()).unwrap();
    let dir = TempDir::new().unwrap();
    save_bundle(dir.path(), &outcome, false).unwrap();
    (dir, outcome, counts)
}

fn example_profile() -> CustomerProfile {
    CustomerProfile {
        gender: Gender::Male,
        senior_citizen: YesNo::No,
        partner: YesNo::No,
        dependents: YesNo::No,
        tenure: 12.0,
        contract: Contract::MonthToMonth,
        paperless_billing: YesNo::No,
        payment_method: PaymentMethod::ElectronicCheck,
        phone_service: YesNo::Yes,
        internet_service: InternetService::No,
        tech_support: YesNo::No,
        monthly_charges: 70.0,
        total_charges: Some(840.0),
        cltv: 4400.0,
    }
}

fn stratified_test_count(n: usize) -> usize {
    ((n as f64 * 0.2).round() as usize).clamp(1, n - 1)
}

#[test]
fn test_end_to_end_pipeline() {
    let (dir, outcome, _) = create_bundle();

    // Leakage and geography never reach the feature space
    for column in &outcome.ordered_columns {
        assert!(!column.starts_with("Churn"), "{column} leaked");
        for excluded in ["CustomerID", "Count", "Country", "Zip Code", "Latitude", "Longitude"] {
            assert!(!column.starts_with(excluded), "{column} should be excluded");
        }
    }
    assert!(outcome.ordered_columns.contains(&"Contract_Two year".to_string()));
    assert!(!outcome.ordered_columns.contains(&"Contract_Month-to-month".to_string()));
    assert!(outcome.ordered_columns.contains(&"Gender_Female".to_string()));
    assert!(!outcome.ordered_columns.contains(&"Gender_Male".to_string()));

    let context = ServingContext::load(dir.path(), "random_forest").unwrap();
    assert_eq!(context.model_variant(), ModelVariant::RandomForest);

    let risky = CustomerProfile {
        contract: Contract::MonthToMonth,
        internet_service: InternetService::FiberOptic,
        tenure: 2.0,
        monthly_charges: 95.0,
        ..CustomerProfile::default()
    };
    let loyal = CustomerProfile {
        contract: Contract::TwoYear,
        internet_service: InternetService::Dsl,
        tenure: 60.0,
        monthly_charges: 65.0,
        ..CustomerProfile::default()
    };

    let risky_prediction = context.score(&risky.to_raw_record().unwrap()).unwrap();
    let loyal_prediction = context.score(&loyal.to_raw_record().unwrap()).unwrap();

    assert!(risky_prediction.will_churn);
    assert!(!loyal_prediction.will_churn);
    assert!(risky_prediction.probability_pct > loyal_prediction.probability_pct);
    for prediction in [&risky_prediction, &loyal_prediction] {
        assert!((0.0..=100.0).contains(&prediction.probability_pct));
        assert_eq!(prediction.risk, RiskBand::from_percent(prediction.probability_pct));
        assert!(prediction.unrecognized.is_empty());
    }
    assert_eq!(context.unrecognized_count(), 0);

    // Every family ranks the two customers the same way, whatever label came first in training
    for variant in ModelVariant::ALL {
        let context = ServingContext::load(dir.path(), variant.name()).unwrap();
        let risky_pct = context.score(&risky.to_raw_record().unwrap()).unwrap().probability_pct;
        let loyal_pct = context.score(&loyal.to_raw_record().unwrap()).unwrap().probability_pct;
        assert!(risky_pct > loyal_pct, "{variant}: {risky_pct} <= {loyal_pct}");
    }
}

#[test]
fn test_serving_form_supplies_every_numeric_feature() {
    let (dir, _, _) = create_bundle();
    let context = ServingContext::load(dir.path(), "random_forest").unwrap();
    let levels = context.registry().schema().levels();

    let (_, report) = context.align(&CustomerProfile::default().to_raw_record().unwrap()).unwrap();
    for column in &report.zero_filled {
        let is_indicator = levels
            .fields()
            .iter()
            .any(|f| column.starts_with(&format!("{}_", f.field)));
        assert!(is_indicator, "{column} was zero-filled for a served customer");
    }
}

#[test]
fn test_example_record_aligns_to_template() {
    let (dir, _, _) = create_bundle();
    let context = ServingContext::load(dir.path(), "random_forest").unwrap();
    let schema = context.registry().schema();

    let record = example_profile().to_raw_record().unwrap();
    let (aligned, report) = context.align(&record).unwrap();

    assert!(report.is_clean());
    assert_eq!(aligned.columns(), schema.ordered_columns());
    let numeric = [
        ("Tenure Months", 12.0),
        ("Monthly Charges", 70.0),
        ("Total Charges", 840.0),
        ("CLTV", 4400.0),
    ];
    for ((column, value), template) in aligned
        .columns()
        .iter()
        .zip(aligned.values())
        .zip(schema.zero_template().values())
    {
        match numeric.iter().find(|(name, _)| name == column) {
            Some((_, expected)) => assert_eq!(value, expected, "{column}"),
            None => assert_eq!(value, template, "{column} should match the template"),
        }
    }
}

#[test]
fn test_scaler_applied_to_template_uses_stored_statistics() {
    let (dir, outcome, _) = create_bundle();
    let registry = SchemaRegistry::load(dir.path()).unwrap();

    let scaled = registry
        .scaler()
        .transform_row(registry.schema().zero_template().values())
        .unwrap();
    let mean = outcome.scaler.mean();
    let scale = outcome.scaler.scale();
    assert_eq!(scaled.len(), registry.schema().len());
    for j in 0..scaled.len() {
        assert!((scaled[j] - (0.0 - mean[j]) / scale[j]).abs() < 1e-12);
    }
}

#[test]
fn test_resampling_never_touches_test_split() {
    let (csv, (stayed, churned)) = create_telco_csv(240);
    let outcome = train_from_csv(csv.path(), &training_config()).unwrap();
    let results = &outcome.results;

    let expected_test = (stratified_test_count(stayed), stratified_test_count(churned));
    assert_eq!(results.test_counts, expected_test);
    assert_eq!(
        results.train_counts,
        (stayed - expected_test.0, churned - expected_test.1)
    );
    // Training split is balanced, the test split keeps the raw imbalance
    assert_eq!(results.resampled_counts.0, results.resampled_counts.1);
    assert_ne!(results.test_counts.0, results.test_counts.1);
}

#[test]
fn test_unrecognized_category_is_counted_not_raised() {
    let (dir, _, _) = create_bundle();
    let context = ServingContext::load(dir.path(), "logistic_regression").unwrap();

    let record = example_profile()
        .to_raw_record()
        .unwrap()
        .with("Contract", "Three year");
    let prediction = context.score(&record).unwrap();

    assert_eq!(prediction.unrecognized, vec!["Contract=Three year".to_string()]);
    assert_eq!(context.unrecognized_count(), 1);

    // Same vector as the reference contract
    let (unseen, _) = context.align(&record).unwrap();
    let (reference, _) = context.align(&example_profile().to_raw_record().unwrap()).unwrap();
    assert_eq!(unseen, reference);
    assert_eq!(context.unrecognized_count(), 2);
}

#[test]
fn test_concurrent_scoring_shares_context() {
    let (dir, _, _) = create_bundle();
    let context = ServingContext::load(dir.path(), "k_nearest_neighbors").unwrap();
    let record = example_profile().to_raw_record().unwrap();
    let expected = context.score(&record).unwrap();

    std::thread::scope(|s| {
        let handles: Vec<_> = (0..4)
            .map(|_| s.spawn(|| context.score(&record).unwrap()))
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), expected);
        }
    });
}

#[test]
fn test_every_variant_is_loadable_by_name() {
    let (dir, outcome, _) = create_bundle();
    let record = example_profile().to_raw_record().unwrap();
    for variant in ModelVariant::ALL {
        let context = ServingContext::load(dir.path(), variant.name()).unwrap();
        let prediction = context.score(&record).unwrap();
        assert_eq!(prediction.model, variant);
    }
    let registry = SchemaRegistry::load(dir.path()).unwrap();
    assert_eq!(registry.manifest().best, outcome.results.best);
    assert_eq!(registry.manifest().variants.len(), 3);
}

#[test]
fn test_missing_artifact_halts_loading() {
    let (dir, _, _) = create_bundle();
    let registry = SchemaRegistry::load(dir.path()).unwrap();
    std::fs::remove_file(registry.run_dir().join(SCALER_FILE)).unwrap();

    let err = ServingContext::load(dir.path(), "random_forest").unwrap_err();
    let churn = err.downcast_ref::<ChurnError>().unwrap();
    assert!(matches!(churn, ChurnError::ArtifactMissing { .. }));
    assert!(churn.is_fatal_for_process());

    let empty = TempDir::new().unwrap();
    let err = ServingContext::load(empty.path(), "random_forest").unwrap_err();
    assert!(matches!(
        err.downcast_ref::<ChurnError>(),
        Some(ChurnError::ArtifactMissing { .. })
    ));
}

#[test]
fn test_raw_record_json_scoring() {
    let (dir, _, _) = create_bundle();
    let context = ServingContext::load(dir.path(), "random_forest").unwrap();
    let record = RawRecord::from_json_str(
        r#"{"Gender": "Female", "Contract": "Two year", "Tenure Months": 48, "Monthly Charges": 25.0}"#,
    )
    .unwrap();
    let prediction = context.score(&record).unwrap();
    assert!((0.0..=100.0).contains(&prediction.probability_pct));
}
