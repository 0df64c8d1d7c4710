//! One-hot encoding with a dropped reference category per categorical field
//!
//! Training encodes the whole table and freezes the resulting column order and
//! category levels. Serving never re-derives either: it encodes one record with
//! [`encode_record`] and projects it onto the frozen columns (see `align`).

use crate::config::TrainingConfig;
use crate::data::{ColumnData, RawRecord, RawTable, RawValue};
use crate::error::ChurnError;
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use tracing::{debug, warn};

/// Name of the indicator column for `value` of `field`
pub fn indicator_name(field: &str, value: &str) -> String {
    format!("{field}_{value}")
}

/// Ordered categories of one field; the first entry is the reference category
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldLevels {
    pub field: String,
    pub categories: Vec<String>,
}

impl FieldLevels {
    pub fn reference(&self) -> Option<&str> {
        self.categories.first().map(String::as_str)
    }

    pub fn contains(&self, value: &str) -> bool {
        self.categories.iter().any(|c| c == value)
    }

    /// One indicator per non-reference category, in level order
    pub fn indicator_columns(&self) -> Vec<String> {
        self.categories
            .iter()
            .skip(1)
            .map(|c| indicator_name(&self.field, c))
            .collect()
    }
}

/// Category levels of every categorical field, in source column order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryLevels {
    fields: Vec<FieldLevels>,
}

impl CategoryLevels {
    pub fn new(fields: Vec<FieldLevels>) -> Self {
        Self { fields }
    }

    pub fn get(&self, field: &str) -> Option<&FieldLevels> {
        self.fields.iter().find(|f| f.field == field)
    }

    pub fn is_categorical(&self, field: &str) -> bool {
        self.get(field).is_some()
    }

    pub fn fields(&self) -> &[FieldLevels] {
        &self.fields
    }

    /// Every indicator column these levels produce
    pub fn indicator_columns(&self) -> Vec<String> {
        self.fields.iter().flat_map(|f| f.indicator_columns()).collect()
    }
}

/// Ordered named numeric features
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncodedVector {
    columns: Vec<String>,
    values: Vec<f64>,
}

impl EncodedVector {
    pub fn new(columns: Vec<String>, values: Vec<f64>) -> crate::Result<Self> {
        if columns.len() != values.len() {
            anyhow::bail!(ChurnError::DimensionMismatch {
                context: "encoded vector",
                expected: columns.len(),
                actual: values.len(),
            });
        }
        Ok(Self { columns, values })
    }

    /// All-zero vector over `columns`
    pub fn zeros(columns: &[String]) -> Self {
        Self {
            columns: columns.to_vec(),
            values: vec![0.0; columns.len()],
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, column: &str) -> Option<f64> {
        self.columns
            .iter()
            .position(|c| c == column)
            .map(|i| self.values[i])
    }

    pub fn to_array(&self) -> Array1<f64> {
        Array1::from(self.values.clone())
    }

    pub(crate) fn values_mut(&mut self) -> &mut [f64] {
        &mut self.values
    }

    pub(crate) fn push(&mut self, column: String, value: f64) {
        self.columns.push(column);
        self.values.push(value);
    }
}

/// Encoded training matrix together with its frozen schema
#[derive(Debug, Clone)]
pub struct EncodedTable {
    pub columns: Vec<String>,
    pub matrix: Array2<f64>,
    pub levels: CategoryLevels,
}

impl EncodedTable {
    pub fn row(&self, index: usize) -> EncodedVector {
        EncodedVector {
            columns: self.columns.clone(),
            values: self.matrix.row(index).to_vec(),
        }
    }
}

/// Training-time encoder
#[derive(Debug, Clone, Default)]
pub struct Encoder {
    categorical_fields: Option<Vec<String>>,
    references: BTreeMap<String, String>,
}

impl Encoder {
    /// Encoder treating every text column as categorical, lexicographic references
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &TrainingConfig) -> Self {
        let mut encoder = Self {
            categorical_fields: config.categorical_columns.clone(),
            references: BTreeMap::new(),
        };
        for reference in &config.reference_categories {
            encoder = encoder.with_reference(&reference.field, &reference.value);
        }
        encoder
    }

    /// Declare the categorical fields explicitly
    pub fn with_categorical_fields(mut self, fields: &[&str]) -> Self {
        self.categorical_fields = Some(fields.iter().map(|f| f.to_string()).collect());
        self
    }

    /// Declare the documented reference category of `field`
    pub fn with_reference(mut self, field: &str, value: &str) -> Self {
        self.references.insert(field.to_string(), value.to_string());
        self
    }

    /// Enumerate category levels from the table
    pub fn fit(&self, table: &RawTable) -> crate::Result<CategoryLevels> {
        let declared: Vec<&str> = match &self.categorical_fields {
            Some(fields) => {
                for field in fields {
                    if table.column(field).is_none() {
                        warn!(field = %field, "Declared categorical field not in table, ignoring");
                    }
                }
                fields.iter().map(String::as_str).collect()
            }
            None => table
                .columns()
                .iter()
                .filter(|c| matches!(c.data, ColumnData::Categorical(_)))
                .map(|c| c.name.as_str())
                .collect(),
        };

        let mut fields = Vec::new();
        for column in table.columns() {
            if !declared.contains(&column.name.as_str()) {
                continue;
            }
            let observed: BTreeSet<String> = match &column.data {
                ColumnData::Categorical(values) => values.iter().cloned().collect(),
                ColumnData::Numeric(values) => values
                    .iter()
                    .map(|&v| RawValue::Numeric(v).as_category())
                    .collect(),
            };

            let categories = match self.references.get(&column.name) {
                Some(reference) => {
                    if !observed.contains(reference) {
                        anyhow::bail!(ChurnError::InvalidInput(format!(
                            "reference category {reference} of {} was never observed",
                            column.name
                        )));
                    }
                    std::iter::once(reference.clone())
                        .chain(observed.into_iter().filter(|c| c != reference))
                        .collect()
                }
                None => observed.into_iter().collect::<Vec<_>>(),
            };

            if categories.len() < 2 {
                debug!(field = %column.name, "Single-valued categorical field contributes no columns");
            }
            fields.push(FieldLevels {
                field: column.name.clone(),
                categories,
            });
        }

        for field in self.references.keys() {
            if !fields.iter().any(|f| &f.field == field) {
                warn!(field = %field, "Reference category declared for a non-categorical field");
            }
        }

        Ok(CategoryLevels::new(fields))
    }

    /// Output column order: source order, each categorical column replaced in place
    pub fn ordered_columns(table: &RawTable, levels: &CategoryLevels) -> crate::Result<Vec<String>> {
        let mut columns = Vec::new();
        for column in table.columns() {
            match levels.get(&column.name) {
                Some(field) => columns.extend(field.indicator_columns()),
                None => columns.push(column.name.clone()),
            }
        }

        let mut seen = HashSet::new();
        for column in &columns {
            if !seen.insert(column.as_str()) {
                anyhow::bail!(ChurnError::InvalidInput(format!(
                    "encoded column {column} is produced twice"
                )));
            }
        }
        Ok(columns)
    }

    /// Fit levels and encode every row of the table
    pub fn encode(&self, table: &RawTable) -> crate::Result<EncodedTable> {
        let levels = self.fit(table)?;
        let columns = Self::ordered_columns(table, &levels)?;
        let index: HashMap<&str, usize> = columns
            .iter()
            .enumerate()
            .map(|(i, c)| (c.as_str(), i))
            .collect();

        let mut matrix = Array2::<f64>::zeros((table.height(), columns.len()));
        for column in table.columns() {
            match (levels.get(&column.name), &column.data) {
                (Some(field), data) => {
                    for row in 0..table.height() {
                        let category = data.value(row).as_category();
                        if let Some(&j) = index.get(indicator_name(&field.field, &category).as_str()) {
                            matrix[[row, j]] = 1.0;
                        }
                    }
                }
                (None, ColumnData::Numeric(values)) => {
                    let j = index[column.name.as_str()];
                    for (row, &v) in values.iter().enumerate() {
                        matrix[[row, j]] = v;
                    }
                }
                (None, ColumnData::Categorical(_)) => {
                    anyhow::bail!(ChurnError::InvalidInput(format!(
                        "text column {} is not declared categorical",
                        column.name
                    )));
                }
            }
        }

        debug!(
            rows = table.height(),
            columns = columns.len(),
            categorical_fields = levels.fields().len(),
            "Encoded training table"
        );

        Ok(EncodedTable {
            columns,
            matrix,
            levels,
        })
    }
}

/// Encode a single record with the training rule shape
///
/// Every categorical value becomes a full one-hot indicator (a lone row cannot
/// tell which category is the reference); numeric fields pass through. Whether
/// a field is categorical comes from the frozen `levels`, falling back to the
/// value kind for fields the levels do not know.
pub fn encode_record(record: &RawRecord, levels: &CategoryLevels) -> EncodedVector {
    let mut encoded = EncodedVector::zeros(&[]);
    for (name, value) in record.iter() {
        match value {
            RawValue::Numeric(v) if !levels.is_categorical(name) => {
                encoded.push(name.to_string(), *v);
            }
            other => encoded.push(indicator_name(name, &other.as_category()), 1.0),
        }
    }
    encoded
}
