//! Stacked generalisation (super learner).
//!
//! Base learners are fit with k-fold cross-validation; their out-of-fold
//! predictions form the design matrix of a meta-learner trained on the
//! original labels. The final ensemble refits every base learner on the full
//! data and feeds their predictions to the meta-learner.
//!
//! Feature construction per base learner:
//! - continuous labels: the point prediction (1 column);
//! - categorical labels with `K` classes: probabilities of classes `1..K`
//!   (`K - 1` columns; class 0 is implied).

use rand::SeedableRng;
use rand::seq::SliceRandom;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tm_core::{Error, FeatureMatrix, FittedModel, Labels, Learner, Prediction, Result};

use crate::validate_rows;

/// Cross-validation settings for [`Stack`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackConfig {
    /// Number of folds (>= 2).
    pub n_folds: usize,
    /// Shuffle rows before assigning folds.
    pub shuffle: bool,
    /// Seed for the fold shuffle.
    pub seed: u64,
}

impl Default for StackConfig {
    fn default() -> Self {
        Self { n_folds: 5, shuffle: true, seed: 0 }
    }
}

/// Stacking ensemble over named base learners.
pub struct Stack {
    learners: Vec<(String, Box<dyn Learner>)>,
    meta: Box<dyn Learner>,
    config: StackConfig,
}

impl Stack {
    /// Empty stack with the given meta-learner.
    pub fn new(meta: impl Learner + 'static) -> Self {
        Self { learners: Vec::new(), meta: Box::new(meta), config: StackConfig::default() }
    }

    /// Add a named base learner.
    pub fn with_learner(mut self, name: impl Into<String>, learner: impl Learner + 'static) -> Self {
        self.learners.push((name.into(), Box::new(learner)));
        self
    }

    /// Override the cross-validation settings.
    pub fn with_config(mut self, config: StackConfig) -> Self {
        self.config = config;
        self
    }

    /// Base learner names in declaration order.
    pub fn learner_names(&self) -> Vec<&str> {
        self.learners.iter().map(|(n, _)| n.as_str()).collect()
    }

    fn folds(&self, n: usize) -> Vec<Vec<usize>> {
        let mut order: Vec<usize> = (0..n).collect();
        if self.config.shuffle {
            let mut rng = rand::rngs::StdRng::seed_from_u64(self.config.seed);
            order.shuffle(&mut rng);
        }
        let k = self.config.n_folds;
        let mut folds = vec![Vec::with_capacity(n / k + 1); k];
        for (pos, i) in order.into_iter().enumerate() {
            folds[pos % k].push(i);
        }
        for f in folds.iter_mut() {
            f.sort_unstable();
        }
        folds
    }
}

/// How base predictions are turned into meta-features.
#[derive(Debug, Clone, Copy)]
enum MetaTask {
    Regression,
    Classification { n_classes: usize },
}

impl MetaTask {
    fn from_labels(y: &Labels) -> Result<Self> {
        match y {
            Labels::Continuous(_) => Ok(MetaTask::Regression),
            _ => {
                let (_, n_classes) = y.as_categorical().ok_or_else(|| {
                    Error::Learner(
                        "Stack needs a single label column; wrap it in FullCategoricalJoint".into(),
                    )
                })?;
                Ok(MetaTask::Classification { n_classes })
            }
        }
    }

    fn width(self) -> usize {
        match self {
            MetaTask::Regression => 1,
            MetaTask::Classification { n_classes } => n_classes.saturating_sub(1),
        }
    }

    /// Row-major `n × width` features from one base prediction of `n` rows.
    fn features(self, pred: &Prediction, n: usize) -> Result<Vec<f64>> {
        pred.check_rows(n)?;
        match self {
            MetaTask::Regression => match pred {
                Prediction::Point(v) => Ok(v.clone()),
                _ => Err(Error::Learner("regression stack member returned a distribution".into())),
            },
            MetaTask::Classification { n_classes } => {
                let cols: Vec<Vec<f64>> =
                    (1..n_classes).map(|c| pred.class_probability(c)).collect::<Result<_>>()?;
                let mut out = Vec::with_capacity(n * cols.len());
                for i in 0..n {
                    out.extend(cols.iter().map(|c| c[i]));
                }
                Ok(out)
            }
        }
    }
}

/// Fitted [`Stack`].
#[derive(Debug)]
pub struct FittedStack {
    base: Vec<Box<dyn FittedModel>>,
    meta: Box<dyn FittedModel>,
    task: MetaTask,
}

impl FittedStack {
    fn meta_features(&self, x: &FeatureMatrix) -> Result<FeatureMatrix> {
        let n = x.n_rows();
        let w = self.task.width();
        let p = w * self.base.len();
        let mut data = vec![0.0; n * p];
        for (j, model) in self.base.iter().enumerate() {
            let block = self.task.features(&model.predict(x)?, n)?;
            scatter_block(&mut data, p, j * w, w, &block, None);
        }
        FeatureMatrix::new(n, p, data)
    }
}

impl FittedModel for FittedStack {
    fn predict(&self, x: &FeatureMatrix) -> Result<Prediction> {
        self.meta.predict(&self.meta_features(x)?)
    }
}

/// Write an `rows × w` block into columns `col..col+w` of a row-major matrix
/// with `p` columns. `rows` maps block rows to destination rows.
fn scatter_block(dst: &mut [f64], p: usize, col: usize, w: usize, block: &[f64], rows: Option<&[usize]>) {
    for (r, chunk) in block.chunks_exact(w.max(1)).enumerate() {
        let i = rows.map(|idx| idx[r]).unwrap_or(r);
        dst[i * p + col..i * p + col + w].copy_from_slice(&chunk[..w]);
    }
}

impl Learner for Stack {
    fn name(&self) -> String {
        let names: Vec<&str> = self.learner_names();
        format!("Stack[{}; meta={}]", names.join(", "), self.meta.name())
    }

    fn fit(&self, x: &FeatureMatrix, y: &Labels) -> Result<Box<dyn FittedModel>> {
        let n = x.n_rows();
        validate_rows(x, y.len())?;
        if self.learners.is_empty() {
            return Err(Error::Validation("Stack needs at least one base learner".into()));
        }
        if self.config.n_folds < 2 || self.config.n_folds > n {
            return Err(Error::Validation(format!(
                "n_folds must be in [2, {}], got {}",
                n, self.config.n_folds
            )));
        }
        let task = MetaTask::from_labels(y)?;
        let w = task.width();
        let p = w * self.learners.len();

        let folds = self.folds(n);
        let fold_blocks: Vec<Vec<(usize, Vec<f64>)>> = folds
            .par_iter()
            .enumerate()
            .map(|(f, test)| {
                let train: Vec<usize> = folds
                    .iter()
                    .enumerate()
                    .filter(|&(g, _)| g != f)
                    .flat_map(|(_, rows)| rows.iter().copied())
                    .collect();
                let x_train = x.select_rows(&train);
                let y_train = y.select(&train);
                let x_test = x.select_rows(test);
                self.learners
                    .iter()
                    .enumerate()
                    .map(|(j, (_, learner))| {
                        let model = learner.fit(&x_train, &y_train)?;
                        Ok((j, task.features(&model.predict(&x_test)?, x_test.n_rows())?))
                    })
                    .collect::<Result<Vec<_>>>()
            })
            .collect::<Result<_>>()?;

        let mut oof = vec![0.0; n * p];
        for (test, blocks) in folds.iter().zip(&fold_blocks) {
            for (j, block) in blocks {
                scatter_block(&mut oof, p, j * w, w, block, Some(test));
            }
        }
        let meta = self.meta.fit(&FeatureMatrix::new(n, p, oof)?, y)?;

        let base = self
            .learners
            .par_iter()
            .map(|(_, learner)| learner.fit(x, y))
            .collect::<Result<Vec<_>>>()?;

        log::debug!("stack: fitted {} base learners over {} folds", base.len(), folds.len());
        Ok(Box::new(FittedStack { base, meta, task }))
    }
}
