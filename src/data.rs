//! Raw tabular data: records, tables, and CSV loading using Polars

use crate::config::TrainingConfig;
use crate::error::ChurnError;
use anyhow::Context;
use ndarray::Array1;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, info, warn};

/// A single raw attribute value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawValue {
    Numeric(f64),
    Categorical(String),
}

impl RawValue {
    /// Text form used when a value is enumerated as a category
    pub fn as_category(&self) -> String {
        match self {
            RawValue::Categorical(s) => s.clone(),
            RawValue::Numeric(v) => format_numeric(*v),
        }
    }
}

impl From<&str> for RawValue {
    fn from(value: &str) -> Self {
        RawValue::Categorical(value.to_string())
    }
}

impl From<f64> for RawValue {
    fn from(value: f64) -> Self {
        RawValue::Numeric(value)
    }
}

/// Render a number as a category label ("1" rather than "1.0" for integral values)
pub fn format_numeric(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}

/// One customer's attributes, keyed by source column name
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    fields: Vec<(String, RawValue)>,
}

impl RawRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a field, keeping first-insertion order
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<RawValue>) {
        let name = name.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = value,
            None => self.fields.push((name, value)),
        }
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<RawValue>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&RawValue> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &RawValue)> {
        self.fields.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Parse a flat JSON object such as `{"Gender": "Male", "Tenure Months": 12}`
    pub fn from_json_str(json: &str) -> crate::Result<Self> {
        let map: serde_json::Map<String, serde_json::Value> =
            serde_json::from_str(json).context("record must be a JSON object")?;
        let mut record = RawRecord::new();
        for (name, value) in map {
            let value = match value {
                serde_json::Value::String(s) => RawValue::Categorical(s),
                serde_json::Value::Number(n) => RawValue::Numeric(n.as_f64().ok_or_else(|| {
                    ChurnError::InvalidInput(format!("field {name} is not a finite number"))
                })?),
                serde_json::Value::Bool(b) => RawValue::Categorical(b.to_string()),
                other => {
                    return Err(ChurnError::InvalidInput(format!(
                        "field {name} has unsupported value {other}"
                    ))
                    .into())
                }
            };
            record.insert(name, value);
        }
        Ok(record)
    }
}

/// Column payload; a column is either entirely categorical or entirely numeric
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnData {
    Categorical(Vec<String>),
    Numeric(Vec<f64>),
}

impl ColumnData {
    pub fn len(&self) -> usize {
        match self {
            ColumnData::Categorical(v) => v.len(),
            ColumnData::Numeric(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn value(&self, row: usize) -> RawValue {
        match self {
            ColumnData::Categorical(v) => RawValue::Categorical(v[row].clone()),
            ColumnData::Numeric(v) => RawValue::Numeric(v[row]),
        }
    }
}

/// A named column of a [`RawTable`]
#[derive(Debug, Clone, PartialEq)]
pub struct RawColumn {
    pub name: String,
    pub data: ColumnData,
}

impl RawColumn {
    pub fn categorical(name: &str, values: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            data: ColumnData::Categorical(values.iter().map(|s| s.to_string()).collect()),
        }
    }

    pub fn numeric(name: &str, values: &[f64]) -> Self {
        Self {
            name: name.to_string(),
            data: ColumnData::Numeric(values.to_vec()),
        }
    }
}

/// In-memory training table with no missing values
#[derive(Debug, Clone, PartialEq)]
pub struct RawTable {
    columns: Vec<RawColumn>,
    height: usize,
}

impl RawTable {
    /// Build a table, checking unique names and equal column heights
    pub fn new(columns: Vec<RawColumn>) -> crate::Result<Self> {
        let height = columns.first().map(|c| c.data.len()).unwrap_or(0);
        let mut seen = HashSet::new();
        for column in &columns {
            if !seen.insert(column.name.as_str()) {
                anyhow::bail!(ChurnError::InvalidInput(format!(
                    "duplicate column {}",
                    column.name
                )));
            }
            if column.data.len() != height {
                anyhow::bail!(ChurnError::DimensionMismatch {
                    context: "table column height",
                    expected: height,
                    actual: column.data.len(),
                });
            }
        }
        Ok(Self { columns, height })
    }

    /// Build a table from records sharing the same fields and value kinds
    pub fn from_records(records: &[RawRecord]) -> crate::Result<Self> {
        let Some(first) = records.first() else {
            return Self::new(Vec::new());
        };

        let mut columns = Vec::with_capacity(first.len());
        for (name, value) in first.iter() {
            let data = match value {
                RawValue::Categorical(_) => ColumnData::Categorical(
                    records
                        .iter()
                        .map(|r| match r.get(name) {
                            Some(RawValue::Categorical(s)) => Ok(s.clone()),
                            _ => Err(ChurnError::InvalidInput(format!(
                                "field {name} must be categorical in every record"
                            ))),
                        })
                        .collect::<Result<Vec<_>, _>>()?,
                ),
                RawValue::Numeric(_) => ColumnData::Numeric(
                    records
                        .iter()
                        .map(|r| match r.get(name) {
                            Some(RawValue::Numeric(v)) => Ok(*v),
                            _ => Err(ChurnError::InvalidInput(format!(
                                "field {name} must be numeric in every record"
                            ))),
                        })
                        .collect::<Result<Vec<_>, _>>()?,
                ),
            };
            columns.push(RawColumn {
                name: name.to_string(),
                data,
            });
        }
        Self::new(columns)
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn columns(&self) -> &[RawColumn] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&RawColumn> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Reassemble row `row` as a record
    pub fn record(&self, row: usize) -> RawRecord {
        let mut record = RawRecord::new();
        for column in &self.columns {
            record.insert(column.name.clone(), column.data.value(row));
        }
        record
    }

    /// Remove the named columns; names that are not present are ignored
    pub fn without_columns(&self, names: &[String]) -> Self {
        let columns = self
            .columns
            .iter()
            .filter(|c| !names.contains(&c.name))
            .cloned()
            .collect();
        Self {
            columns,
            height: self.height,
        }
    }
}

/// Feature table plus binary churn labels (1 = churned)
#[derive(Debug, Clone)]
pub struct LabeledTable {
    pub features: RawTable,
    pub labels: Array1<usize>,
}

impl LabeledTable {
    /// Count of (non-churned, churned) rows
    pub fn class_counts(&self) -> (usize, usize) {
        class_counts(&self.labels)
    }
}

/// Count of (class 0, class 1) labels
pub fn class_counts(labels: &Array1<usize>) -> (usize, usize) {
    let positives = labels.iter().filter(|&&l| l == 1).count();
    (labels.len() - positives, positives)
}

/// Separate the label column and drop leakage columns by name
pub fn split_label(table: &RawTable, config: &TrainingConfig) -> crate::Result<LabeledTable> {
    let label_column = table.column(&config.label_column).ok_or_else(|| {
        ChurnError::InvalidInput(format!("label column {} not found", config.label_column))
    })?;

    let labels: Array1<usize> = match &label_column.data {
        ColumnData::Categorical(values) => values
            .iter()
            .map(|v| usize::from(v.trim() == config.positive_label))
            .collect(),
        ColumnData::Numeric(values) => values.iter().map(|&v| usize::from(v != 0.0)).collect(),
    };

    let mut excluded = config.leakage_columns.clone();
    excluded.push(config.label_column.clone());
    let features = table.without_columns(&excluded);

    debug!(
        excluded = ?excluded,
        features = features.columns().len(),
        "Separated label and leakage columns"
    );

    Ok(LabeledTable { features, labels })
}

/// Intermediate column as read from the CSV, before missing-value handling
enum LoadedColumn {
    Text(Vec<Option<String>>),
    Numeric(Vec<Option<f64>>),
}

impl LoadedColumn {
    fn is_missing(&self, row: usize) -> bool {
        match self {
            LoadedColumn::Text(v) => v[row].is_none(),
            LoadedColumn::Numeric(v) => v[row].is_none(),
        }
    }
}

/// Load the analytic table from CSV
///
/// Columns named in `skip_columns` are never read, so their blanks (e.g. a
/// churn reason left empty for retained customers) cannot drop rows. Text
/// columns whose non-blank cells all parse as numbers become numeric columns;
/// rows with a missing cell in any remaining column are dropped.
pub fn load_training_table<P: AsRef<Path>>(
    path: P,
    skip_columns: &[String],
) -> crate::Result<RawTable> {
    let path = path.as_ref();
    let df = CsvReader::from_path(path)
        .with_context(|| format!("Failed to open {}", path.display()))?
        .has_header(true)
        .infer_schema(Some(10_000))
        .finish()
        .with_context(|| format!("Failed to parse CSV {}", path.display()))?;

    if df.height() == 0 {
        anyhow::bail!(ChurnError::InsufficientData(format!(
            "no rows in {}",
            path.display()
        )));
    }

    let mut loaded = Vec::with_capacity(df.width());
    for series in df.get_columns() {
        let name = series.name().to_string();
        if skip_columns.contains(&name) {
            debug!(column = %name, "Skipping excluded column");
            continue;
        }
        let column = match series.dtype() {
            DataType::String => {
                let values: Vec<Option<String>> = series
                    .str()?
                    .into_iter()
                    .map(|v| v.map(str::trim).filter(|s| !s.is_empty()).map(str::to_string))
                    .collect();
                coerce_text_column(values)
            }
            DataType::Boolean => LoadedColumn::Text(
                series
                    .bool()?
                    .into_iter()
                    .map(|v| v.map(|b| b.to_string()))
                    .collect(),
            ),
            dtype if dtype.is_numeric() => LoadedColumn::Numeric(
                series.cast(&DataType::Float64)?.f64()?.into_iter().collect(),
            ),
            other => anyhow::bail!(ChurnError::InvalidInput(format!(
                "column {name} has unsupported type {other}"
            ))),
        };
        loaded.push((name, column));
    }

    let height = df.height();
    let keep: Vec<usize> = (0..height)
        .filter(|&row| !loaded.iter().any(|(_, c)| c.is_missing(row)))
        .collect();
    if keep.len() < height {
        warn!(
            dropped = height - keep.len(),
            "Dropped rows with missing values"
        );
    }

    let columns = loaded
        .into_iter()
        .map(|(name, column)| {
            let data = match column {
                LoadedColumn::Text(v) => ColumnData::Categorical(
                    keep.iter().map(|&i| v[i].clone().unwrap_or_default()).collect(),
                ),
                LoadedColumn::Numeric(v) => {
                    ColumnData::Numeric(keep.iter().map(|&i| v[i].unwrap_or_default()).collect())
                }
            };
            RawColumn { name, data }
        })
        .collect();

    let table = RawTable::new(columns)?;
    info!(
        rows = table.height(),
        columns = table.columns().len(),
        path = %path.display(),
        "Loaded training table"
    );
    Ok(table)
}

fn coerce_text_column(values: Vec<Option<String>>) -> LoadedColumn {
    let parsed: Vec<Option<Option<f64>>> = values
        .iter()
        .map(|v| v.as_ref().map(|s| s.parse::<f64>().ok()))
        .collect();
    let any_present = parsed.iter().any(Option::is_some);
    let all_numeric = parsed.iter().all(|v| !matches!(v, Some(None)));

    if any_present && all_numeric {
        LoadedColumn::Numeric(parsed.into_iter().map(Option::flatten).collect())
    } else {
        LoadedColumn::Text(values)
    }
}
