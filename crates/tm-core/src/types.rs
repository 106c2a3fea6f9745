//! Common data types: tables, design matrices, labels and predictions.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// One column of a [`Table`]; names live on the table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Column {
    /// Real-valued column.
    Continuous(Vec<f64>),
    /// Categorical column: `codes[i]` indexes into `levels`.
    Categorical {
        /// Level labels, in code order.
        levels: Vec<String>,
        /// Per-row level codes.
        codes: Vec<usize>,
    },
}

impl Column {
    /// Continuous column from raw values.
    pub fn continuous(values: Vec<f64>) -> Self {
        Column::Continuous(values)
    }

    /// Categorical column from raw labels.
    ///
    /// Levels are the distinct labels sorted lexicographically, so
    /// `["false", "true"]` maps `true` to code 1.
    pub fn categorical<S: AsRef<str>>(values: &[S]) -> Self {
        let levels: Vec<String> = values
            .iter()
            .map(|v| v.as_ref().to_string())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let codes = values
            .iter()
            .map(|v| levels.binary_search_by(|l| l.as_str().cmp(v.as_ref())).unwrap_or(0))
            .collect();
        Column::Categorical { levels, codes }
    }

    /// Binary categorical column with levels `["false", "true"]`.
    pub fn from_bools(values: &[bool]) -> Self {
        Column::Categorical {
            levels: vec!["false".to_string(), "true".to_string()],
            codes: values.iter().map(|&b| b as usize).collect(),
        }
    }

    /// Categorical column with explicit levels (levels may be unobserved).
    pub fn with_levels(levels: Vec<String>, codes: Vec<usize>) -> Result<Self> {
        if levels.is_empty() {
            return Err(Error::Validation("categorical column needs at least 1 level".into()));
        }
        let column = Column::Categorical { levels, codes };
        column.validate()?;
        Ok(column)
    }

    /// Check that every code indexes a distinct declared level.
    pub fn validate(&self) -> Result<()> {
        match self {
            Column::Continuous(_) => Ok(()),
            Column::Categorical { levels, codes } => {
                let distinct: BTreeSet<&String> = levels.iter().collect();
                if distinct.len() != levels.len() {
                    return Err(Error::Validation("categorical levels must be distinct".into()));
                }
                if let Some(&bad) = codes.iter().find(|&&c| c >= levels.len()) {
                    return Err(Error::Validation(format!(
                        "level code {} out of range for {} levels",
                        bad,
                        levels.len()
                    )));
                }
                Ok(())
            }
        }
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        match self {
            Column::Continuous(v) => v.len(),
            Column::Categorical { codes, .. } => codes.len(),
        }
    }

    /// Whether the column has no rows.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the column is categorical.
    pub fn is_categorical(&self) -> bool {
        matches!(self, Column::Categorical { .. })
    }

    /// Number of declared levels (0 for continuous columns).
    pub fn n_levels(&self) -> usize {
        match self {
            Column::Continuous(_) => 0,
            Column::Categorical { levels, .. } => levels.len(),
        }
    }

    /// Code of `level`, if the column is categorical and declares it.
    pub fn level_code(&self, level: &str) -> Option<usize> {
        match self {
            Column::Continuous(_) => None,
            Column::Categorical { levels, .. } => levels.iter().position(|l| l == level),
        }
    }

    /// Number of design-matrix columns this column expands to.
    ///
    /// Categorical columns use reference coding (first level dropped).
    pub fn encoded_width(&self) -> usize {
        match self {
            Column::Continuous(_) => 1,
            Column::Categorical { levels, .. } => levels.len().saturating_sub(1),
        }
    }

    /// Append the encoded row `i` to `out`.
    pub fn encode_row(&self, i: usize, out: &mut Vec<f64>) {
        match self {
            Column::Continuous(v) => out.push(v[i]),
            Column::Categorical { levels, codes } => {
                encode_level(codes[i], levels.len(), out);
            }
        }
    }
}

/// Append the reference-coded indicator vector for `code` among `n_levels`.
#[inline]
pub fn encode_level(code: usize, n_levels: usize, out: &mut Vec<f64>) {
    for l in 1..n_levels {
        out.push(if code == l { 1.0 } else { 0.0 });
    }
}

fn in_column(name: &str, e: Error) -> Error {
    match e {
        Error::Validation(msg) => Error::Validation(format!("column '{}': {}", name, msg)),
        other => other,
    }
}

/// Column-oriented table with named, typed columns of equal length.
///
/// Deserialization goes through [`Table::push_column`], so a loaded table
/// satisfies the same invariants as one built in code.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawTable")]
pub struct Table {
    names: Vec<String>,
    columns: Vec<Column>,
}

#[derive(Deserialize)]
struct RawTable {
    names: Vec<String>,
    columns: Vec<Column>,
}

impl TryFrom<RawTable> for Table {
    type Error = Error;

    fn try_from(raw: RawTable) -> Result<Self> {
        if raw.names.len() != raw.columns.len() {
            return Err(Error::Validation(format!(
                "table has {} names for {} columns",
                raw.names.len(),
                raw.columns.len()
            )));
        }
        let mut table = Table::new();
        for (name, column) in raw.names.into_iter().zip(raw.columns) {
            table.push_column(name, column)?;
        }
        Ok(table)
    }
}

impl Table {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style [`Table::push_column`].
    pub fn with_column(mut self, name: impl Into<String>, column: Column) -> Result<Self> {
        self.push_column(name, column)?;
        Ok(self)
    }

    /// Append a column. Names must be unique and lengths must agree.
    pub fn push_column(&mut self, name: impl Into<String>, column: Column) -> Result<()> {
        let name = name.into();
        column.validate().map_err(|e| in_column(&name, e))?;
        if self.names.iter().any(|n| *n == name) {
            return Err(Error::Validation(format!("duplicate column name '{}'", name)));
        }
        if let Some(first) = self.columns.first()
            && first.len() != column.len()
        {
            return Err(Error::Validation(format!(
                "column '{}' has {} rows, expected {}",
                name,
                column.len(),
                first.len()
            )));
        }
        self.names.push(name);
        self.columns.push(column);
        Ok(())
    }

    /// Re-check column lengths and categorical codes.
    pub fn validate(&self) -> Result<()> {
        let n = self.n_rows();
        for (name, column) in self.iter() {
            column.validate().map_err(|e| in_column(name, e))?;
            if column.len() != n {
                return Err(Error::Validation(format!(
                    "column '{}' has {} rows, expected {}",
                    name,
                    column.len(),
                    n
                )));
            }
        }
        Ok(())
    }

    /// Number of rows (0 for a table without columns).
    pub fn n_rows(&self) -> usize {
        self.columns.first().map(Column::len).unwrap_or(0)
    }

    /// Number of columns.
    pub fn n_cols(&self) -> usize {
        self.columns.len()
    }

    /// Column names in declaration order.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Column by name.
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.position(name).map(|i| &self.columns[i])
    }

    /// Index of the column named `name`.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    /// Column by index.
    pub fn column_at(&self, i: usize) -> &Column {
        &self.columns[i]
    }

    /// `(name, column)` pairs in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Column)> {
        self.names.iter().map(String::as_str).zip(self.columns.iter())
    }
}

/// Dense row-major design matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureMatrix {
    n: usize,
    p: usize,
    data: Vec<f64>,
}

impl FeatureMatrix {
    /// Wrap row-major `data` of shape `n × p`.
    pub fn new(n: usize, p: usize, data: Vec<f64>) -> Result<Self> {
        if data.len() != n * p {
            return Err(Error::Validation(format!(
                "feature matrix has wrong length: expected n*p={}, got {}",
                n * p,
                data.len()
            )));
        }
        if data.iter().any(|v| !v.is_finite()) {
            return Err(Error::Validation("features must contain only finite values".into()));
        }
        Ok(Self { n, p, data })
    }

    /// Build from row vectors (must be rectangular).
    pub fn from_rows(rows: Vec<Vec<f64>>) -> Result<Self> {
        let n = rows.len();
        let p = rows.first().map(Vec::len).unwrap_or(0);
        let mut data = Vec::with_capacity(n * p);
        for (i, row) in rows.into_iter().enumerate() {
            if row.len() != p {
                return Err(Error::Validation(format!(
                    "rows must be rectangular: row {} has len {}, expected {}",
                    i,
                    row.len(),
                    p
                )));
            }
            data.extend(row);
        }
        Self::new(n, p, data)
    }

    /// Encode every column of `table` (continuous pass-through, categorical
    /// reference coding) into a design matrix.
    pub fn from_table(table: &Table) -> Result<Self> {
        let n = table.n_rows();
        let p: usize = table.iter().map(|(_, c)| c.encoded_width()).sum();
        let mut data = Vec::with_capacity(n * p);
        for i in 0..n {
            for (_, col) in table.iter() {
                col.encode_row(i, &mut data);
            }
        }
        Self::new(n, p, data)
    }

    /// Number of rows.
    #[inline]
    pub fn n_rows(&self) -> usize {
        self.n
    }

    /// Number of columns.
    #[inline]
    pub fn n_cols(&self) -> usize {
        self.p
    }

    /// Row `i` as a slice.
    #[inline]
    pub fn row(&self, i: usize) -> &[f64] {
        let start = i * self.p;
        &self.data[start..start + self.p]
    }

    /// Raw row-major storage.
    pub fn data(&self) -> &[f64] {
        &self.data
    }

    /// New matrix holding the given rows, in order.
    pub fn select_rows(&self, rows: &[usize]) -> Self {
        let mut data = Vec::with_capacity(rows.len() * self.p);
        for &i in rows {
            data.extend_from_slice(self.row(i));
        }
        Self { n: rows.len(), p: self.p, data }
    }

    /// Horizontal concatenation `[self | other]`.
    pub fn hstack(&self, other: &FeatureMatrix) -> Result<Self> {
        if self.n != other.n {
            return Err(Error::Validation(format!(
                "cannot hstack {} rows with {} rows",
                self.n, other.n
            )));
        }
        let p = self.p + other.p;
        let mut data = Vec::with_capacity(self.n * p);
        for i in 0..self.n {
            data.extend_from_slice(self.row(i));
            data.extend_from_slice(other.row(i));
        }
        Ok(Self { n: self.n, p, data })
    }
}

/// Training labels handed to a learner.
#[derive(Debug, Clone, PartialEq)]
pub enum Labels {
    /// Real-valued response.
    Continuous(Vec<f64>),
    /// One categorical response with `n_classes` classes.
    Categorical {
        /// Per-row class codes in `0..n_classes`.
        codes: Vec<usize>,
        /// Number of classes.
        n_classes: usize,
    },
    /// Several categorical responses observed jointly (e.g. a treatment vector).
    MultiCategorical {
        /// Per-row code tuples, one entry per response column.
        codes: Vec<Vec<usize>>,
        /// Number of classes of each response column.
        n_classes: Vec<usize>,
    },
}

impl Labels {
    /// Number of rows.
    pub fn len(&self) -> usize {
        match self {
            Labels::Continuous(y) => y.len(),
            Labels::Categorical { codes, .. } => codes.len(),
            Labels::MultiCategorical { codes, .. } => codes.len(),
        }
    }

    /// Whether there are no rows.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// View as a single categorical response, if possible.
    ///
    /// A one-column `MultiCategorical` is accepted.
    pub fn as_categorical(&self) -> Option<(Vec<usize>, usize)> {
        match self {
            Labels::Categorical { codes, n_classes } => Some((codes.clone(), *n_classes)),
            Labels::MultiCategorical { codes, n_classes } if n_classes.len() == 1 => {
                Some((codes.iter().map(|c| c[0]).collect(), n_classes[0]))
            }
            _ => None,
        }
    }

    /// Labels restricted to `rows`, in order.
    pub fn select(&self, rows: &[usize]) -> Self {
        match self {
            Labels::Continuous(y) => Labels::Continuous(rows.iter().map(|&i| y[i]).collect()),
            Labels::Categorical { codes, n_classes } => Labels::Categorical {
                codes: rows.iter().map(|&i| codes[i]).collect(),
                n_classes: *n_classes,
            },
            Labels::MultiCategorical { codes, n_classes } => Labels::MultiCategorical {
                codes: rows.iter().map(|&i| codes[i].clone()).collect(),
                n_classes: n_classes.clone(),
            },
        }
    }
}

/// Output of [`crate::FittedModel::predict`].
#[derive(Debug, Clone, PartialEq)]
pub enum Prediction {
    /// Point prediction per row.
    Point(Vec<f64>),
    /// Categorical distribution per row (row-major `n × n_classes`).
    Probabilities {
        /// Number of classes.
        n_classes: usize,
        /// Row-major probabilities.
        data: Vec<f64>,
    },
    /// Distribution over joint code tuples (row-major `n × combinations.len()`).
    Joint {
        /// Code tuple of each joint class.
        combinations: Vec<Vec<usize>>,
        /// Row-major probabilities.
        data: Vec<f64>,
    },
}

impl Prediction {
    /// Number of predicted rows.
    pub fn len(&self) -> usize {
        match self {
            Prediction::Point(v) => v.len(),
            Prediction::Probabilities { n_classes, data } => data.len() / (*n_classes).max(1),
            Prediction::Joint { combinations, data } => data.len() / combinations.len().max(1),
        }
    }

    /// Whether there are no predicted rows.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Check that the prediction covers exactly `n` rows.
    pub fn check_rows(&self, n: usize) -> Result<()> {
        let (len, width) = match self {
            Prediction::Point(v) => (v.len(), 1),
            Prediction::Probabilities { n_classes, data } => (data.len(), *n_classes),
            Prediction::Joint { combinations, data } => (data.len(), combinations.len()),
        };
        if width == 0 || len != n * width {
            return Err(Error::Learner(format!(
                "prediction has {} values for {} rows of width {}",
                len, n, width
            )));
        }
        Ok(())
    }

    /// Point predictions; errors for distributional output.
    pub fn into_point(self) -> Result<Vec<f64>> {
        match self {
            Prediction::Point(v) => Ok(v),
            _ => Err(Error::Learner("expected point predictions, got a distribution".into())),
        }
    }

    /// Per-row probability of class `class` of a single categorical response.
    pub fn class_probability(&self, class: usize) -> Result<Vec<f64>> {
        match self {
            Prediction::Probabilities { n_classes, data } => {
                if class >= *n_classes {
                    return Err(Error::Learner(format!(
                        "class {} out of range for {} classes",
                        class, n_classes
                    )));
                }
                Ok(data.chunks_exact(*n_classes).map(|row| row[class]).collect())
            }
            Prediction::Joint { .. } => self.combination_probability(&[class]),
            Prediction::Point(_) => {
                Err(Error::Learner("expected class probabilities, got point predictions".into()))
            }
        }
    }

    /// Per-row probability of the code tuple `combination`.
    ///
    /// A combination the model never saw has probability zero.
    pub fn combination_probability(&self, combination: &[usize]) -> Result<Vec<f64>> {
        match self {
            Prediction::Joint { combinations, data } => {
                let k = combinations.len();
                match combinations.iter().position(|c| c.as_slice() == combination) {
                    Some(j) => Ok(data.chunks_exact(k).map(|row| row[j]).collect()),
                    None => Ok(vec![0.0; self.len()]),
                }
            }
            Prediction::Probabilities { .. } if combination.len() == 1 => {
                self.class_probability(combination[0])
            }
            Prediction::Probabilities { .. } => Err(Error::Learner(format!(
                "single-response probabilities cannot score a {}-column combination",
                combination.len()
            ))),
            Prediction::Point(_) => {
                Err(Error::Learner("expected class probabilities, got point predictions".into()))
            }
        }
    }
}
