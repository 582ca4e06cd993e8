//! Expansion of a strategy into concrete child iterations.

use super::{MatrixConfig, MatrixMetadata, StrategyConfig, StrategyMetadata};
use crate::errors::StrategyConfigError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One child to dispatch for a fan-out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpandedChild {
    /// Plan node id of the child.
    pub child_node_id: String,
    /// Iteration metadata.
    pub strategy_metadata: StrategyMetadata,
}

/// Computes the ordered children of a fan-out.
///
/// The result is deterministic: matrix children follow the lexicographic
/// product of axis values in declaration order with excluded combinations
/// removed, loop and parallelism children follow their index.
pub fn fetch_children(
    config: &StrategyConfig,
    child_node_id: &str,
) -> Result<Vec<ExpandedChild>, StrategyConfigError> {
    config.validate()?;

    let children = match config {
        StrategyConfig::Matrix(matrix) => {
            let combinations = matrix_combinations(matrix);
            let total = combinations.len();
            combinations
                .into_iter()
                .enumerate()
                .map(|(current, (combination, values))| ExpandedChild {
                    child_node_id: child_node_id.to_string(),
                    strategy_metadata: StrategyMetadata {
                        current_iteration: current,
                        total_iterations: total,
                        matrix: Some(MatrixMetadata {
                            combination,
                            values,
                        }),
                    },
                })
                .collect()
        }
        StrategyConfig::ForLoop(for_loop) => iterations(child_node_id, for_loop.iterations),
        StrategyConfig::Parallelism(parallelism) => {
            iterations(child_node_id, parallelism.parallelism)
        }
    };

    tracing::debug!(
        child_node_id,
        total_iterations = children.len(),
        "Expanded strategy"
    );
    Ok(children)
}

/// Children for a strategy node that carries no strategy config.
#[must_use]
pub fn fetch_bare_children(child_node_id: &str, fanout: usize) -> Vec<ExpandedChild> {
    iterations(child_node_id, fanout)
}

fn iterations(child_node_id: &str, count: usize) -> Vec<ExpandedChild> {
    (0..count)
        .map(|current| ExpandedChild {
            child_node_id: child_node_id.to_string(),
            strategy_metadata: StrategyMetadata::iteration(current, count),
        })
        .collect()
}

type Combination = (Vec<usize>, BTreeMap<String, String>);

/// Surviving matrix combinations in emission order. The full list is built
/// before any child is emitted so each child can carry the total.
fn matrix_combinations(config: &MatrixConfig) -> Vec<Combination> {
    let mut out = Vec::new();
    let mut current = BTreeMap::new();
    let mut path = Vec::with_capacity(config.axes.len());
    collect(config, 0, &mut current, &mut path, &mut out);
    out
}

fn collect(
    config: &MatrixConfig,
    depth: usize,
    current: &mut BTreeMap<String, String>,
    path: &mut Vec<usize>,
    out: &mut Vec<Combination>,
) {
    let Some(axis) = config.axes.get(depth) else {
        if !config.exclude.contains(current) {
            out.push((path.clone(), current.clone()));
        }
        return;
    };

    for (index, value) in axis.values.iter().enumerate() {
        current.insert(axis.name.clone(), value.clone());
        path.push(index);
        collect(config, depth + 1, current, path, out);
        path.pop();
    }
    current.remove(&axis.name);
}
