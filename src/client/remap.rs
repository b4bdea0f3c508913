//! Dense class renumbering for pseudo-labels.
//!
//! Boosting backends require class ids that start at 0 and are consecutive.
//! [`ClassRemap`] maps the sorted distinct predicted ids `c_0 < c_1 < ...`
//! to `0, 1, ...`. It is always built, even when the ids are already dense.

use serde::Serialize;

/// Bijection from observed class ids onto `[0, k)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClassRemap {
    /// Sorted distinct original ids; position = dense id.
    originals: Vec<usize>,
}

impl ClassRemap {
    /// Build from observed labels. `None` when there are no labels.
    pub fn from_labels(labels: &[usize]) -> Option<Self> {
        let mut originals = labels.to_vec();
        originals.sort_unstable();
        originals.dedup();
        (!originals.is_empty()).then_some(Self { originals })
    }

    /// Number of distinct classes `k`.
    pub fn k(&self) -> usize {
        self.originals.len()
    }

    pub fn is_identity(&self) -> bool {
        self.originals.iter().enumerate().all(|(i, &c)| i == c)
    }

    pub fn dense(&self, original: usize) -> Option<usize> {
        self.originals.binary_search(&original).ok()
    }

    pub fn original(&self, dense: usize) -> Option<usize> {
        self.originals.get(dense).copied()
    }

    /// Remap every label. Labels outside the table map to `None`.
    pub fn apply(&self, labels: &[usize]) -> Option<Vec<usize>> {
        labels.iter().map(|&y| self.dense(y)).collect()
    }

    /// `(original, dense)` pairs in dense order.
    pub fn pairs(&self) -> Vec<(usize, usize)> {
        self.originals.iter().enumerate().map(|(d, &o)| (o, d)).collect()
    }

    /// Class-name table for the first `k` dense ids.
    pub fn observed_names(&self, names: &[String]) -> Vec<String> {
        self.originals
            .iter()
            .map(|&o| class_name(names, o))
            .collect()
    }

    /// Class-name table of length `total` for a model that keeps its original
    /// class count: observed classes first in dense order, then the remaining
    /// original classes in ascending order.
    pub fn permuted_names(&self, names: &[String], total: usize) -> Vec<String> {
        let mut out = self.observed_names(names);
        out.extend(
            (0..total)
                .filter(|c| self.dense(*c).is_none())
                .map(|c| class_name(names, c)),
        );
        out
    }
}

impl std::fmt::Display for ClassRemap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{{")?;
        for (i, (o, d)) in self.pairs().into_iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{o}->{d}")?;
        }
        write!(f, "}}")
    }
}

fn class_name(names: &[String], id: usize) -> String {
    names.get(id).cloned().unwrap_or_else(|| id.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    #[test]
    fn sparse_ids_become_dense() {
        let remap = ClassRemap::from_labels(&[5, 0, 2, 2, 5]).unwrap();
        assert_eq!(remap.pairs(), vec![(0, 0), (2, 1), (5, 2)]);
        assert_eq!(remap.apply(&[5, 0, 2]).unwrap(), vec![2, 0, 1]);
        assert_eq!(remap.to_string(), "{0->0, 2->1, 5->2}");
        assert!(!remap.is_identity());
    }

    #[test]
    fn already_dense_is_identity() {
        let remap = ClassRemap::from_labels(&[1, 0, 2]).unwrap();
        assert!(remap.is_identity());
        assert_eq!(remap.k(), 3);
    }

    #[test]
    fn empty_input_has_no_table() {
        assert!(ClassRemap::from_labels(&[]).is_none());
    }

    #[test]
    fn image_is_always_zero_to_k() {
        let inputs: [&[usize]; 5] = [&[7], &[3, 3, 3], &[9, 1, 4, 1], &[0, 1, 2, 3], &[100, 50, 75, 50]];
        for labels in inputs {
            let remap = ClassRemap::from_labels(labels).unwrap();
            let image: BTreeSet<usize> = remap.apply(labels).unwrap().into_iter().collect();
            let expected: BTreeSet<usize> = (0..remap.k()).collect();
            assert_eq!(image, expected, "labels {labels:?}");
            let distinct: BTreeSet<usize> = labels.iter().copied().collect();
            assert_eq!(remap.k(), distinct.len());
            for &y in labels {
                assert_eq!(remap.original(remap.dense(y).unwrap()), Some(y));
            }
        }
    }

    #[test]
    fn names_follow_the_remap() {
        let names: Vec<String> = ["a", "b", "c", "d", "e", "f"].iter().map(|s| s.to_string()).collect();
        let remap = ClassRemap::from_labels(&[0, 2, 5]).unwrap();
        assert_eq!(remap.observed_names(&names), vec!["a", "c", "f"]);
        assert_eq!(
            remap.permuted_names(&names, 6),
            vec!["a", "c", "f", "b", "d", "e"]
        );
    }
}
