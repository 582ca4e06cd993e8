//! Per-iteration metadata attached to children of a fan-out.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Matrix coordinates of one iteration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MatrixMetadata {
    /// Position of each value in its axis, in axis declaration order.
    pub combination: Vec<usize>,
    /// Resolved axis name to value mapping.
    pub values: BTreeMap<String, String>,
}

/// Iteration metadata carried by a dispatched child.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StrategyMetadata {
    /// 0-based iteration index.
    pub current_iteration: usize,
    /// Number of iterations in the fan-out.
    pub total_iterations: usize,
    /// Matrix coordinates, for matrix fan-outs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matrix: Option<MatrixMetadata>,
}

impl StrategyMetadata {
    /// Creates metadata for an iteration without matrix data.
    #[must_use]
    pub fn iteration(current_iteration: usize, total_iterations: usize) -> Self {
        Self {
            current_iteration,
            total_iterations,
            matrix: None,
        }
    }

    /// Suffix that makes the child's identifier unique among its siblings.
    ///
    /// Matrix children use their axis values ordered by axis name, or their
    /// index vector when `use_matrix_values` is off. Loop children use
    /// their iteration index.
    #[must_use]
    pub fn identifier_postfix(&self, use_matrix_values: bool) -> String {
        match &self.matrix {
            Some(matrix) if use_matrix_values => {
                let values: Vec<String> = matrix.values.values().map(|v| sanitize(v)).collect();
                format!("_{}", values.join("_"))
            }
            Some(matrix) => {
                let indices: Vec<String> =
                    matrix.combination.iter().map(ToString::to_string).collect();
                format!("_{}", indices.join("_"))
            }
            None => format!("_{}", self.current_iteration),
        }
    }
}

fn sanitize(value: &str) -> String {
    value
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect()
}
