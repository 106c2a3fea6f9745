//! Treatment and confounder design matrices.

use std::collections::HashSet;

use tm_core::types::encode_level;
use tm_core::{Column, Error, FeatureMatrix, Labels, Result, Table};

/// Categorical treatment columns decoded into per-row code tuples.
#[derive(Debug, Clone)]
pub(crate) struct TreatmentDesign {
    names: Vec<String>,
    levels: Vec<Vec<String>>,
    codes: Vec<Vec<usize>>,
    observed: HashSet<Vec<usize>>,
}

impl TreatmentDesign {
    pub(crate) fn from_table(t: &Table) -> Result<Self> {
        if t.n_cols() == 0 {
            return Err(Error::Validation("T must have at least 1 treatment column".into()));
        }
        let n = t.n_rows();
        let mut names = Vec::with_capacity(t.n_cols());
        let mut levels = Vec::with_capacity(t.n_cols());
        let mut columns = Vec::with_capacity(t.n_cols());
        for (name, col) in t.iter() {
            let Column::Categorical { levels: l, codes } = col else {
                return Err(Error::Validation(format!(
                    "treatment column '{}' must be categorical",
                    name
                )));
            };
            names.push(name.to_string());
            levels.push(l.clone());
            columns.push(codes);
        }
        let codes: Vec<Vec<usize>> =
            (0..n).map(|i| columns.iter().map(|c| c[i]).collect()).collect();
        let observed = codes.iter().cloned().collect();
        Ok(Self { names, levels, codes, observed })
    }

    pub(crate) fn names(&self) -> &[String] {
        &self.names
    }

    pub(crate) fn codes(&self) -> &[Vec<usize>] {
        &self.codes
    }

    pub(crate) fn n_rows(&self) -> usize {
        self.codes.len()
    }

    /// Code of `level` in treatment column `j`.
    pub(crate) fn level_code(&self, j: usize, level: &str) -> Option<usize> {
        self.levels[j].iter().position(|l| l == level)
    }

    pub(crate) fn is_observed(&self, combination: &[usize]) -> bool {
        self.observed.contains(combination)
    }

    /// `"t1=CG & t2=TT"`.
    pub(crate) fn describe(&self, combination: &[usize]) -> String {
        self.names
            .iter()
            .zip(combination)
            .enumerate()
            .map(|(j, (name, &c))| format!("{}={}", name, self.levels[j][c]))
            .collect::<Vec<_>>()
            .join(" & ")
    }

    /// Labels for the treatment mechanism.
    pub(crate) fn labels(&self) -> Labels {
        Labels::MultiCategorical {
            codes: self.codes.clone(),
            n_classes: self.levels.iter().map(Vec::len).collect(),
        }
    }

    /// Reference-coded treatment indicators, either as observed or with every
    /// row set to `combination`.
    pub(crate) fn encode(&self, combination: Option<&[usize]>) -> Result<FeatureMatrix> {
        let n = self.n_rows();
        let p: usize = self.levels.iter().map(|l| l.len().saturating_sub(1)).sum();
        let mut data = Vec::with_capacity(n * p);
        for row in &self.codes {
            let codes = combination.unwrap_or(row.as_slice());
            for (j, &c) in codes.iter().enumerate() {
                encode_level(c, self.levels[j].len(), &mut data);
            }
        }
        FeatureMatrix::new(n, p, data)
    }

    /// Outcome-regression design `[treatment indicators | W]`.
    pub(crate) fn outcome_design(
        &self,
        w: &FeatureMatrix,
        combination: Option<&[usize]>,
    ) -> Result<FeatureMatrix> {
        self.encode(combination)?.hstack(w)
    }
}

/// Encode confounders; an empty table yields an `n × 0` matrix.
pub(crate) fn encode_confounders(w: &Table, n: usize) -> Result<FeatureMatrix> {
    if w.n_cols() == 0 {
        return FeatureMatrix::new(n, 0, Vec::new());
    }
    FeatureMatrix::from_table(w)
}
