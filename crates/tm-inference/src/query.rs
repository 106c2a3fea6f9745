//! Causal queries: which treatment combinations are contrasted.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tm_core::{Error, Result};

use crate::design::TreatmentDesign;

/// How the case and control settings are combined into a contrast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Contrast {
    /// `E[Q(case, W)] - E[Q(control, W)]` (ATE for a single treatment).
    #[default]
    Joint,
    /// Interaction ATE: signed sum over the `2^k` combinations that pick, per
    /// treatment, either its case or its control level. The sign is
    /// `(-1)^(number of control picks)`.
    Interaction,
}

/// A causal contrast between two treatment settings.
///
/// Settings are `(treatment column, level)` pairs; every treatment column of
/// the data must be set exactly once on each side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    name: Option<String>,
    case: Vec<(String, String)>,
    control: Vec<(String, String)>,
    contrast: Contrast,
}

fn owned_setting<K: AsRef<str>, V: AsRef<str>>(setting: &[(K, V)]) -> Vec<(String, String)> {
    setting.iter().map(|(k, v)| (k.as_ref().to_string(), v.as_ref().to_string())).collect()
}

fn describe_setting(setting: &[(String, String)]) -> String {
    setting.iter().map(|(k, v)| format!("{}={}", k, v)).collect::<Vec<_>>().join(" & ")
}

impl Query {
    /// Joint contrast of `case` against `control`.
    pub fn new<K: AsRef<str>, V: AsRef<str>>(case: &[(K, V)], control: &[(K, V)]) -> Self {
        Self {
            name: None,
            case: owned_setting(case),
            control: owned_setting(control),
            contrast: Contrast::Joint,
        }
    }

    /// Interaction contrast (IATE) spanned by `case` and `control`.
    pub fn interaction<K: AsRef<str>, V: AsRef<str>>(case: &[(K, V)], control: &[(K, V)]) -> Self {
        Self { contrast: Contrast::Interaction, ..Self::new(case, control) }
    }

    /// Attach an explicit name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Explicit name, or one derived from the settings.
    pub fn name(&self) -> String {
        match &self.name {
            Some(n) => n.clone(),
            None => {
                let body = format!(
                    "{} vs {}",
                    describe_setting(&self.case),
                    describe_setting(&self.control)
                );
                match self.contrast {
                    Contrast::Joint => body,
                    Contrast::Interaction => format!("IATE({})", body),
                }
            }
        }
    }

    /// Case setting.
    pub fn case(&self) -> &[(String, String)] {
        &self.case
    }

    /// Control setting.
    pub fn control(&self) -> &[(String, String)] {
        &self.control
    }

    /// Contrast kind.
    pub fn contrast(&self) -> Contrast {
        self.contrast
    }

    /// Map a setting onto treatment codes in column order.
    fn codes(&self, setting: &[(String, String)], design: &TreatmentDesign) -> Result<Vec<usize>> {
        let mut seen = HashSet::new();
        for (name, _) in setting {
            if !seen.insert(name.as_str()) {
                return Err(Error::InvalidQuery(format!(
                    "query '{}' sets treatment '{}' twice",
                    self.name(),
                    name
                )));
            }
            if !design.names().iter().any(|n| n == name) {
                return Err(Error::InvalidQuery(format!(
                    "query '{}' references undeclared treatment '{}'",
                    self.name(),
                    name
                )));
            }
        }
        design
            .names()
            .iter()
            .enumerate()
            .map(|(j, col)| {
                let (_, level) = setting.iter().find(|(n, _)| n == col).ok_or_else(|| {
                    Error::InvalidQuery(format!(
                        "query '{}' does not set treatment '{}'",
                        self.name(),
                        col
                    ))
                })?;
                design.level_code(j, level).ok_or_else(|| {
                    Error::InvalidQuery(format!(
                        "query '{}' references undeclared level '{}' of treatment '{}'",
                        self.name(),
                        level,
                        col
                    ))
                })
            })
            .collect()
    }

    /// Validate against the data and expand into signed vertices.
    ///
    /// Fails with `InvalidQuery` for malformed settings and with
    /// `PositivityViolation` when a vertex never occurs in `T`.
    pub(crate) fn resolve(&self, design: &TreatmentDesign) -> Result<ResolvedQuery> {
        let case = self.codes(&self.case, design)?;
        let control = self.codes(&self.control, design)?;
        if case == control {
            return Err(Error::InvalidQuery(format!(
                "query '{}' has identical case and control",
                self.name()
            )));
        }

        let vertices = match self.contrast {
            Contrast::Joint => vec![
                Vertex { codes: case, sign: 1.0 },
                Vertex { codes: control, sign: -1.0 },
            ],
            Contrast::Interaction => {
                if let Some(j) = (0..case.len()).find(|&j| case[j] == control[j]) {
                    return Err(Error::InvalidQuery(format!(
                        "interaction query '{}' uses the same level for treatment '{}'",
                        self.name(),
                        design.names()[j]
                    )));
                }
                let k = case.len();
                (0..1usize << k)
                    .map(|mask| {
                        let codes =
                            (0..k).map(|j| if (mask >> j) & 1 == 1 { control[j] } else { case[j] }).collect();
                        let sign = if mask.count_ones() % 2 == 0 { 1.0 } else { -1.0 };
                        Vertex { codes, sign }
                    })
                    .collect()
            }
        };

        if let Some(v) = vertices.iter().find(|v| !design.is_observed(&v.codes)) {
            return Err(Error::PositivityViolation(format!(
                "query '{}': treatment combination {} never observed",
                self.name(),
                design.describe(&v.codes)
            )));
        }
        Ok(ResolvedQuery { vertices })
    }
}

/// One treatment combination entering a contrast with its sign.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Vertex {
    pub(crate) codes: Vec<usize>,
    pub(crate) sign: f64,
}

/// A query validated against the data.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ResolvedQuery {
    pub(crate) vertices: Vec<Vertex>,
}
