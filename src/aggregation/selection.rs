//! Pure selection over already-loaded candidates.

use serde::{Deserialize, Serialize};
use std::time::SystemTime;

use crate::config::defaults::WEIGHT_TIE_EPSILON;
use crate::error::{FedError, Result};

/// How the representative candidate is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionPolicy {
    /// `HighestWeight` when weights are supplied, otherwise `MostRecent`.
    #[default]
    Auto,
    /// Highest normalized weight; ties go to the most recently modified.
    HighestWeight,
    /// Most recently modified; weights are ignored.
    MostRecent,
}

impl SelectionPolicy {
    /// Resolve `Auto` against whether the caller supplied weights.
    pub fn resolve(self, weights_supplied: bool) -> Self {
        match self {
            Self::Auto if weights_supplied => Self::HighestWeight,
            Self::Auto => Self::MostRecent,
            other => other,
        }
    }
}

impl std::fmt::Display for SelectionPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::HighestWeight => write!(f, "highest-weight"),
            Self::MostRecent => write!(f, "most-recent"),
        }
    }
}

/// One candidate model plus the metadata selection looks at.
#[derive(Debug, Clone)]
pub struct Candidate<T> {
    /// Identity used in reports (file name for on-disk candidates).
    pub name: String,
    pub modified: SystemTime,
    pub value: T,
}

/// Index of the chosen candidate, its normalized weight and the resolved
/// policy that picked it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Selection {
    pub index: usize,
    pub weight: f64,
    pub policy: SelectionPolicy,
}

/// Reject any negative or non-finite entry. Positions refer to `raw` as the
/// caller supplied it.
pub fn check_weight_entries(raw: &[f64]) -> Result<()> {
    match raw.iter().enumerate().find(|(_, w)| !w.is_finite() || **w < 0.0) {
        Some((i, w)) => Err(FedError::Configuration(format!(
            "aggregation weight #{i} is {w}; weights must be finite and non-negative"
        ))),
        None => Ok(()),
    }
}

/// Normalize weights to sum to 1. Negative, non-finite and zero-sum sets are
/// rejected.
pub fn normalize_weights(raw: &[f64]) -> Result<Vec<f64>> {
    check_weight_entries(raw)?;
    let sum: f64 = raw.iter().sum();
    if sum <= 0.0 {
        return Err(FedError::Configuration(format!(
            "aggregation weights sum to {sum}; at least one must be positive"
        )));
    }
    Ok(raw.iter().map(|w| w / sum).collect())
}

pub fn uniform_weights(n: usize) -> Vec<f64> {
    vec![1.0 / n.max(1) as f64; n]
}

/// Pick the representative among `candidates` given normalized `weights`
/// (same length). `Auto` is treated as `HighestWeight`; callers resolve it
/// first when the weights were defaulted.
///
/// Remaining ties go to the earliest candidate, which is the first in sorted
/// file-name order for directory scans.
pub fn select_representative<T>(
    candidates: &[Candidate<T>],
    weights: &[f64],
    policy: SelectionPolicy,
) -> Option<Selection> {
    if candidates.is_empty() || candidates.len() != weights.len() {
        return None;
    }
    let policy = match policy {
        SelectionPolicy::Auto => SelectionPolicy::HighestWeight,
        other => other,
    };

    let eligible: Vec<usize> = match policy {
        SelectionPolicy::MostRecent => (0..candidates.len()).collect(),
        _ => {
            let best = weights.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            (0..weights.len())
                .filter(|&i| best - weights[i] <= WEIGHT_TIE_EPSILON)
                .collect()
        }
    };

    let mut chosen = *eligible.first()?;
    for &i in &eligible[1..] {
        if candidates[i].modified > candidates[chosen].modified {
            chosen = i;
        }
    }
    Some(Selection {
        index: chosen,
        weight: weights[chosen],
        policy,
    })
}

/// In-memory aggregation over loaded candidates.
///
/// Weights default to uniform; supplied weights are normalized first. A
/// single candidate is returned as-is whatever its weight.
pub fn aggregate<T>(
    candidates: &[Candidate<T>],
    weights: Option<&[f64]>,
    policy: SelectionPolicy,
) -> Result<Selection> {
    if candidates.is_empty() {
        return Err(FedError::NotFound("no models to aggregate".into()));
    }
    let resolved = policy.resolve(weights.is_some());
    if candidates.len() == 1 {
        return Ok(Selection {
            index: 0,
            weight: 1.0,
            policy: resolved,
        });
    }

    let normalized = match weights {
        Some(raw) if raw.len() != candidates.len() => {
            return Err(FedError::Configuration(format!(
                "{} weights supplied for {} candidates",
                raw.len(),
                candidates.len()
            )));
        }
        Some(raw) => normalize_weights(raw)?,
        None => uniform_weights(candidates.len()),
    };

    select_representative(candidates, &normalized, resolved)
        .ok_or_else(|| FedError::NotFound("no models to aggregate".into()))
}
