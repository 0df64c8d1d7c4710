//! Serving-time projection of one raw record onto the frozen feature schema
//!
//! The record is encoded with the training rule shape, then every column of the
//! schema is filled from it in schema order. Columns the record does not
//! produce default to zero; columns the schema does not know are dropped. A
//! categorical value never seen in training therefore lands on the reference
//! representation (all of that field's indicators zero). Text given for a
//! numeric schema column is parsed as a number, and rejected if it is not one.

use crate::data::{RawRecord, RawValue};
use crate::encoder::{encode_record, EncodedVector};
use crate::error::ChurnError;
use crate::registry::FeatureSchema;
use ndarray::Array1;
use std::collections::HashMap;

/// A feature vector whose columns are exactly the schema's, in schema order
///
/// Only [`align`] constructs one.
#[derive(Debug, Clone, PartialEq)]
pub struct AlignedVector(EncodedVector);

impl AlignedVector {
    pub fn columns(&self) -> &[String] {
        self.0.columns()
    }

    pub fn values(&self) -> &[f64] {
        self.0.values()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, column: &str) -> Option<f64> {
        self.0.get(column)
    }

    pub fn to_array(&self) -> Array1<f64> {
        self.0.to_array()
    }

    pub fn as_encoded(&self) -> &EncodedVector {
        &self.0
    }
}

/// A categorical value the training data never contained
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnrecognizedCategory {
    pub field: String,
    pub value: String,
}

/// What alignment had to drop or default
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AlignmentReport {
    /// Categorical values outside the trained levels
    pub unrecognized: Vec<UnrecognizedCategory>,
    /// Encoded record columns with no place in the schema (references included)
    pub dropped_columns: Vec<String>,
    /// Schema columns the record did not produce
    pub zero_filled: Vec<String>,
}

impl AlignmentReport {
    pub fn is_clean(&self) -> bool {
        self.unrecognized.is_empty()
    }
}

/// Parse text values of numeric schema columns ("12" for `Tenure Months`)
fn coerce_numeric_fields(record: &RawRecord, schema: &FeatureSchema) -> crate::Result<RawRecord> {
    let mut coerced = RawRecord::new();
    for (field, value) in record.iter() {
        match value {
            RawValue::Categorical(text)
                if !schema.levels().is_categorical(field)
                    && schema.ordered_columns().iter().any(|c| c == field) =>
            {
                let number = text
                    .trim()
                    .parse::<f64>()
                    .ok()
                    .filter(|v| v.is_finite())
                    .ok_or_else(|| {
                        ChurnError::InvalidInput(format!("{field} expects a number, got {text:?}"))
                    })?;
                coerced.insert(field, number);
            }
            other => coerced.insert(field, other.clone()),
        }
    }
    Ok(coerced)
}

/// Align `record` against `schema`
///
/// Fails with `InvalidInput` when a numeric column holds text that is not a number.
pub fn align(
    record: &RawRecord,
    schema: &FeatureSchema,
) -> crate::Result<(AlignedVector, AlignmentReport)> {
    let record = coerce_numeric_fields(record, schema)?;
    let levels = schema.levels();
    let encoded = encode_record(&record, levels);

    let mut report = AlignmentReport::default();
    for (field, value) in record.iter() {
        if let Some(field_levels) = levels.get(field) {
            let category = value.as_category();
            if !field_levels.contains(&category) {
                report.unrecognized.push(UnrecognizedCategory {
                    field: field.to_string(),
                    value: category,
                });
            }
        }
    }

    let by_name: HashMap<&str, f64> = encoded
        .columns()
        .iter()
        .map(String::as_str)
        .zip(encoded.values().iter().copied())
        .collect();

    let mut aligned = schema.zero_template().clone();
    for (slot, column) in aligned.values_mut().iter_mut().zip(schema.ordered_columns()) {
        match by_name.get(column.as_str()) {
            Some(&v) => *slot = v,
            None => report.zero_filled.push(column.clone()),
        }
    }
    for column in encoded.columns() {
        if !schema.ordered_columns().contains(column) {
            report.dropped_columns.push(column.clone());
        }
    }

    Ok((AlignedVector(aligned), report))
}
