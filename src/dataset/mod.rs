//! Tabular datasets.
//!
//! One header row of column names. A column named exactly `label` carries
//! class labels; every other column is a numeric feature. Feature columns are
//! matched to a model by name, not position.
//!
//! A dataset is either fully labeled or fully unlabeled. A `label` column with
//! any empty cell is rejected rather than guessed at.

pub mod csv;

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use tracing::debug;

use crate::error::{FedError, Result};

/// Name of the label column.
pub const LABEL_COLUMN: &str = "label";

/// Feature rows plus optional parallel labels.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    pub feature_names: Vec<String>,
    pub rows: Vec<Vec<f64>>,
    pub labels: Option<Vec<String>>,
}

impl Dataset {
    /// Build a dataset, checking row widths and label count.
    pub fn from_parts(
        feature_names: Vec<String>,
        rows: Vec<Vec<f64>>,
        labels: Option<Vec<String>>,
    ) -> Result<Self> {
        if let Some(i) = rows.iter().position(|r| r.len() != feature_names.len()) {
            return Err(FedError::SchemaMismatch(format!(
                "row {i} has {} values, header declares {} features",
                rows[i].len(),
                feature_names.len()
            )));
        }
        if let Some(labels) = &labels {
            if labels.len() != rows.len() {
                return Err(FedError::SchemaMismatch(format!(
                    "{} feature rows but {} labels",
                    rows.len(),
                    labels.len()
                )));
            }
        }
        Ok(Self {
            feature_names,
            rows,
            labels,
        })
    }

    /// Load a CSV file.
    pub fn from_csv(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| FedError::io(path, e))?;
        let mut lines = BufReader::new(file).lines();

        let header = lines
            .next()
            .ok_or_else(|| FedError::SchemaMismatch(format!("{}: empty file", path.display())))?
            .map_err(|e| FedError::io(path, e))?;
        let columns: Vec<String> = csv::split_line(header.trim_start_matches('\u{feff}'))
            .into_iter()
            .map(|c| c.trim().to_string())
            .collect();

        let mut seen = HashSet::new();
        if let Some(dup) = columns.iter().find(|c| !seen.insert(c.as_str())) {
            return Err(FedError::SchemaMismatch(format!(
                "{}: duplicate column '{dup}'",
                path.display()
            )));
        }

        let label_idx = columns.iter().position(|c| c == LABEL_COLUMN);
        let feature_names: Vec<String> = columns
            .iter()
            .enumerate()
            .filter(|(i, _)| Some(*i) != label_idx)
            .map(|(_, c)| c.clone())
            .collect();

        let mut rows = Vec::new();
        let mut labels = label_idx.map(|_| Vec::new());
        for (line_no, line) in lines.enumerate() {
            let line_no = line_no + 2;
            let line = line.map_err(|e| FedError::io(path, e))?;
            if line.trim().is_empty() {
                continue;
            }
            let fields = csv::split_line(&line);
            if fields.len() != columns.len() {
                return Err(FedError::SchemaMismatch(format!(
                    "{} line {line_no}: {} fields, header has {}",
                    path.display(),
                    fields.len(),
                    columns.len()
                )));
            }

            let mut row = Vec::with_capacity(feature_names.len());
            for (i, raw) in fields.iter().enumerate() {
                let value = raw.trim();
                if Some(i) == label_idx {
                    if value.is_empty() {
                        return Err(FedError::SchemaMismatch(format!(
                            "{} line {line_no}: empty label; partially labeled datasets are not supported",
                            path.display()
                        )));
                    }
                    if let Some(labels) = labels.as_mut() {
                        labels.push(value.to_string());
                    }
                } else {
                    row.push(parse_feature(value).ok_or_else(|| {
                        FedError::SchemaMismatch(format!(
                            "{} line {line_no}: column '{}' is not numeric: '{value}'",
                            path.display(),
                            columns[i]
                        ))
                    })?);
                }
            }
            rows.push(row);
        }

        debug!(
            file = %path.display(),
            rows = rows.len(),
            features = feature_names.len(),
            labeled = labels.is_some(),
            "Loaded dataset"
        );
        Self::from_parts(feature_names, rows, labels)
    }

    /// Write as CSV, label column last.
    pub fn to_csv(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| FedError::io(parent, e))?;
        }
        let mut out = std::io::BufWriter::new(File::create(path).map_err(|e| FedError::io(path, e))?);
        let mut header: Vec<String> = self.feature_names.iter().map(|c| csv::escape_field(c)).collect();
        if self.labels.is_some() {
            header.push(LABEL_COLUMN.to_string());
        }
        writeln!(out, "{}", header.join(",")).map_err(|e| FedError::io(path, e))?;

        for (i, row) in self.rows.iter().enumerate() {
            let mut fields: Vec<String> = row
                .iter()
                .map(|v| if v.is_nan() { String::new() } else { v.to_string() })
                .collect();
            if let Some(labels) = &self.labels {
                fields.push(csv::escape_field(&labels[i]));
            }
            writeln!(out, "{}", fields.join(",")).map_err(|e| FedError::io(path, e))?;
        }
        out.flush().map_err(|e| FedError::io(path, e))
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn is_labeled(&self) -> bool {
        self.labels.is_some()
    }

    /// Reorder feature columns to `expected`. Missing or extra feature
    /// columns are a schema mismatch.
    pub fn align_to(&self, expected: &[String]) -> Result<Self> {
        if self.feature_names == expected {
            return Ok(self.clone());
        }
        let position: HashMap<&str, usize> = self
            .feature_names
            .iter()
            .enumerate()
            .map(|(i, n)| (n.as_str(), i))
            .collect();

        let missing: Vec<&str> = expected
            .iter()
            .filter(|n| !position.contains_key(n.as_str()))
            .map(String::as_str)
            .collect();
        let expected_set: HashSet<&str> = expected.iter().map(String::as_str).collect();
        let extra: Vec<&str> = self
            .feature_names
            .iter()
            .filter(|n| !expected_set.contains(n.as_str()))
            .map(String::as_str)
            .collect();
        if !missing.is_empty() || !extra.is_empty() {
            return Err(FedError::SchemaMismatch(format!(
                "feature columns differ from model schema (missing: {missing:?}, unexpected: {extra:?})"
            )));
        }

        let order: Vec<usize> = expected.iter().map(|n| position[n.as_str()]).collect();
        let rows = self
            .rows
            .iter()
            .map(|r| order.iter().map(|&i| r[i]).collect())
            .collect();
        Ok(Self {
            feature_names: expected.to_vec(),
            rows,
            labels: self.labels.clone(),
        })
    }

    /// Concatenate datasets that share a feature schema (by name) and
    /// labeling mode. The first part fixes the column order.
    pub fn concat(parts: Vec<Self>) -> Result<Self> {
        let mut parts = parts.into_iter();
        let Some(mut merged) = parts.next() else {
            return Err(FedError::NotFound("no dataset parts to concatenate".into()));
        };
        for part in parts {
            if part.is_labeled() != merged.is_labeled() {
                return Err(FedError::SchemaMismatch(
                    "cannot concatenate labeled and unlabeled parts".into(),
                ));
            }
            let part = part.align_to(&merged.feature_names)?;
            merged.rows.extend(part.rows);
            if let (Some(all), Some(more)) = (merged.labels.as_mut(), part.labels) {
                all.extend(more);
            }
        }
        Ok(merged)
    }

    /// Sorted distinct label values. Integer-looking labels sort numerically.
    pub fn distinct_labels(&self) -> Vec<String> {
        let Some(labels) = &self.labels else {
            return Vec::new();
        };
        let distinct: BTreeSet<&str> = labels.iter().map(String::as_str).collect();
        let mut out: Vec<String> = distinct.into_iter().map(str::to_string).collect();
        if out.iter().all(|l| l.parse::<i64>().is_ok()) {
            out.sort_by_key(|l| l.parse::<i64>().unwrap_or_default());
        }
        out
    }

    /// Map label values to class ids by name.
    pub fn encode_labels(&self, classes: &[String]) -> Result<Vec<usize>> {
        let labels = self
            .labels
            .as_ref()
            .ok_or_else(|| FedError::SchemaMismatch("dataset has no label column".into()))?;
        let index: HashMap<&str, usize> = classes
            .iter()
            .enumerate()
            .map(|(i, c)| (c.as_str(), i))
            .collect();
        labels
            .iter()
            .map(|l| {
                index.get(l.as_str()).copied().ok_or_else(|| {
                    FedError::SchemaMismatch(format!(
                        "label '{l}' is not one of the model classes {classes:?}"
                    ))
                })
            })
            .collect()
    }

    /// Copy out the rows at `indices`.
    pub fn select_rows(&self, indices: &[usize]) -> Vec<Vec<f64>> {
        indices.iter().map(|&i| self.rows[i].clone()).collect()
    }
}

fn parse_feature(value: &str) -> Option<f64> {
    if value.is_empty() {
        return Some(f64::NAN);
    }
    value.parse().ok()
}
