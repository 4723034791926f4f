//! Observed metric values.

use arrow::array::{ArrayRef, Float64Array, StringArray, TimestampNanosecondArray, UInt64Array};
use arrow::datatypes::{DataType, Field, Schema, TimeUnit};
use arrow::record_batch::RecordBatch;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use td_types::{TdError, TdResult};

/// Per-metric `(mean, sem)` for one arm.
pub type Evaluation = BTreeMap<String, (f64, Option<f64>)>;

/// One observation of one metric on one arm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataRow {
    pub trial_index: usize,
    pub arm_name: String,
    pub metric_name: String,
    pub mean: f64,
    pub sem: Option<f64>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Data {
    rows: Vec<DataRow>,
}

impl Data {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_rows(rows: Vec<DataRow>) -> Self {
        Self { rows }
    }

    /// Rows for `trial_index` from `{arm_name: {metric_name: (mean, sem)}}`.
    pub fn from_evaluations(trial_index: usize, evaluations: &BTreeMap<String, Evaluation>) -> Self {
        let rows = evaluations
            .iter()
            .flat_map(|(arm_name, evaluation)| {
                evaluation.iter().map(move |(metric_name, (mean, sem))| DataRow {
                    trial_index,
                    arm_name: arm_name.clone(),
                    metric_name: metric_name.clone(),
                    mean: *mean,
                    sem: *sem,
                    start_time: None,
                    end_time: None,
                })
            })
            .collect();
        Self { rows }
    }

    pub fn from_multiple<'a>(parts: impl IntoIterator<Item = &'a Data>) -> Self {
        Self {
            rows: parts
                .into_iter()
                .flat_map(|d| d.rows.iter().cloned())
                .collect(),
        }
    }

    pub fn rows(&self) -> &[DataRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn metric_names(&self) -> BTreeSet<&str> {
        self.rows.iter().map(|r| r.metric_name.as_str()).collect()
    }

    pub fn trial_indices(&self) -> BTreeSet<usize> {
        self.rows.iter().map(|r| r.trial_index).collect()
    }

    /// Rewrites every row's trial index.
    pub fn with_trial_index(mut self, trial_index: usize) -> Self {
        for row in &mut self.rows {
            row.trial_index = trial_index;
        }
        self
    }

    /// Stamp rows that lack times.
    pub fn with_time_range(mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        for row in &mut self.rows {
            row.start_time.get_or_insert(start);
            row.end_time.get_or_insert(end);
        }
        self
    }

    /// Rows matching both filters; `None` keeps everything on that axis.
    pub fn filter(&self, trial_indices: Option<&[usize]>, metric_names: Option<&[&str]>) -> Self {
        let rows = self
            .rows
            .iter()
            .filter(|r| trial_indices.map_or(true, |idx| idx.contains(&r.trial_index)))
            .filter(|r| metric_names.map_or(true, |names| names.contains(&r.metric_name.as_str())))
            .cloned()
            .collect();
        Self { rows }
    }

    pub fn clone_without_metrics(&self, excluded: &[&str]) -> Self {
        let rows = self
            .rows
            .iter()
            .filter(|r| !excluded.contains(&r.metric_name.as_str()))
            .cloned()
            .collect();
        Self { rows }
    }

    /// `arm -> metric -> mean`, averaging repeated observations.
    pub fn means_by_arm(&self) -> BTreeMap<String, BTreeMap<String, f64>> {
        let mut sums: BTreeMap<(&str, &str), (f64, usize)> = BTreeMap::new();
        for row in &self.rows {
            let entry = sums
                .entry((row.arm_name.as_str(), row.metric_name.as_str()))
                .or_insert((0.0, 0));
            entry.0 += row.mean;
            entry.1 += 1;
        }
        let mut means: BTreeMap<String, BTreeMap<String, f64>> = BTreeMap::new();
        for ((arm, metric), (sum, count)) in sums {
            means
                .entry(arm.to_string())
                .or_default()
                .insert(metric.to_string(), sum / count as f64);
        }
        means
    }

    pub fn schema() -> Arc<Schema> {
        let timestamp = DataType::Timestamp(TimeUnit::Nanosecond, Some("UTC".into()));
        Arc::new(Schema::new(vec![
            Field::new("trial_index", DataType::UInt64, false),
            Field::new("arm_name", DataType::Utf8, false),
            Field::new("metric_name", DataType::Utf8, false),
            Field::new("mean", DataType::Float64, false),
            Field::new("sem", DataType::Float64, true),
            Field::new("start_time", timestamp.clone(), true),
            Field::new("end_time", timestamp, true),
        ]))
    }

    /// Columnar view of the rows.
    pub fn to_record_batch(&self) -> TdResult<RecordBatch> {
        let trial_index: Vec<u64> = self.rows.iter().map(|r| r.trial_index as u64).collect();
        let arm_name: Vec<&str> = self.rows.iter().map(|r| r.arm_name.as_str()).collect();
        let metric_name: Vec<&str> = self.rows.iter().map(|r| r.metric_name.as_str()).collect();
        let mean: Vec<f64> = self.rows.iter().map(|r| r.mean).collect();
        let sem: Vec<Option<f64>> = self.rows.iter().map(|r| r.sem).collect();
        let start: Vec<Option<i64>> = self
            .rows
            .iter()
            .map(|r| r.start_time.and_then(|t| t.timestamp_nanos_opt()))
            .collect();
        let end: Vec<Option<i64>> = self
            .rows
            .iter()
            .map(|r| r.end_time.and_then(|t| t.timestamp_nanos_opt()))
            .collect();

        let arrays: Vec<ArrayRef> = vec![
            Arc::new(UInt64Array::from(trial_index)),
            Arc::new(StringArray::from(arm_name)),
            Arc::new(StringArray::from(metric_name)),
            Arc::new(Float64Array::from(mean)),
            Arc::new(Float64Array::from(sem)),
            Arc::new(TimestampNanosecondArray::from(start).with_timezone("UTC")),
            Arc::new(TimestampNanosecondArray::from(end).with_timezone("UTC")),
        ];

        RecordBatch::try_new(Self::schema(), arrays).map_err(|e| TdError::Arrow(e.to_string()))
    }
}
