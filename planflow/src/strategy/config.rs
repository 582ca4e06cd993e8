//! Fan-out strategy declarations.

use crate::errors::StrategyConfigError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// A fan-out strategy attached to a node: exactly one of matrix, for-loop
/// or parallelism.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StrategyConfig {
    /// Cartesian product over named axes.
    Matrix(MatrixConfig),
    /// A fixed number of indexed iterations.
    ForLoop(ForLoopConfig),
    /// A fixed fan-out without per-child data.
    Parallelism(ParallelismConfig),
}

impl StrategyConfig {
    /// Checks the config for errors that would make expansion meaningless.
    pub fn validate(&self) -> Result<(), StrategyConfigError> {
        match self {
            Self::Matrix(matrix) => matrix.validate()?,
            Self::ForLoop(_) | Self::Parallelism(_) => {}
        }
        if self.max_concurrency() == Some(0) {
            return Err(StrategyConfigError::ZeroConcurrency);
        }
        Ok(())
    }

    /// How many children may run at once, if limited.
    #[must_use]
    pub fn max_concurrency(&self) -> Option<usize> {
        match self {
            Self::Matrix(matrix) => matrix.max_concurrency,
            Self::ForLoop(for_loop) => for_loop.max_concurrency,
            Self::Parallelism(parallelism) => parallelism.max_concurrency,
        }
    }
}

/// One named matrix axis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatrixAxis {
    /// Axis name.
    pub name: String,
    /// Values in declaration order.
    pub values: Vec<String>,
}

impl MatrixAxis {
    /// Creates an axis.
    #[must_use]
    pub fn new<I, S>(name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }
}

/// Matrix strategy: axes in declaration order plus excluded combinations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct MatrixConfig {
    /// Axes in declaration order.
    pub axes: Vec<MatrixAxis>,
    /// Combinations to skip, matched by exact map equality.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude: Vec<BTreeMap<String, String>>,
    /// Concurrency limit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_concurrency: Option<usize>,
}

impl MatrixConfig {
    /// Creates an empty matrix config.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an axis.
    #[must_use]
    pub fn with_axis<I, S>(mut self, name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.axes.push(MatrixAxis::new(name, values));
        self
    }

    /// Excludes one combination.
    #[must_use]
    pub fn with_exclude<I, K, V>(mut self, combination: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.exclude.push(
            combination
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        );
        self
    }

    /// Sets the concurrency limit.
    #[must_use]
    pub fn with_max_concurrency(mut self, limit: usize) -> Self {
        self.max_concurrency = Some(limit);
        self
    }

    fn validate(&self) -> Result<(), StrategyConfigError> {
        if self.axes.is_empty() {
            return Err(StrategyConfigError::NoAxes);
        }

        let mut names = HashSet::new();
        for axis in &self.axes {
            if !names.insert(axis.name.as_str()) {
                return Err(StrategyConfigError::DuplicateAxis {
                    axis: axis.name.clone(),
                });
            }
            if axis.values.is_empty() {
                return Err(StrategyConfigError::EmptyAxis {
                    axis: axis.name.clone(),
                });
            }
            let mut seen = HashSet::new();
            if let Some(value) = axis.values.iter().find(|value| !seen.insert(value.as_str())) {
                return Err(StrategyConfigError::DuplicateAxisValue {
                    axis: axis.name.clone(),
                    value: value.clone(),
                });
            }
        }

        for combination in &self.exclude {
            if let Some(axis) = combination.keys().find(|key| !names.contains(key.as_str())) {
                return Err(StrategyConfigError::UnknownExcludeAxis { axis: axis.clone() });
            }
        }
        Ok(())
    }
}

/// For-loop strategy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForLoopConfig {
    /// Number of iterations.
    pub iterations: usize,
    /// Concurrency limit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_concurrency: Option<usize>,
}

impl ForLoopConfig {
    /// Creates a for-loop config.
    #[must_use]
    pub fn new(iterations: usize) -> Self {
        Self {
            iterations,
            max_concurrency: None,
        }
    }

    /// Sets the concurrency limit.
    #[must_use]
    pub fn with_max_concurrency(mut self, limit: usize) -> Self {
        self.max_concurrency = Some(limit);
        self
    }
}

/// Parallelism strategy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParallelismConfig {
    /// Number of identical children.
    pub parallelism: usize,
    /// Concurrency limit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_concurrency: Option<usize>,
}

impl ParallelismConfig {
    /// Creates a parallelism config.
    #[must_use]
    pub fn new(parallelism: usize) -> Self {
        Self {
            parallelism,
            max_concurrency: None,
        }
    }

    /// Sets the concurrency limit.
    #[must_use]
    pub fn with_max_concurrency(mut self, limit: usize) -> Self {
        self.max_concurrency = Some(limit);
        self
    }
}
