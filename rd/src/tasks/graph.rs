//! Dependency graph validation
//!
//! Cycle detection uses DFS three-colour marking; the topological sort keeps
//! declaration order as the tie-break so execution order is reproducible.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use super::StructuralError;
use crate::domain::TaskDescriptor;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Colour {
    White,
    Grey,
    Black,
}

/// Check ids are unique, dependencies exist and the graph is acyclic
pub fn validate_dependency_graph(descriptors: &[TaskDescriptor]) -> Result<(), StructuralError> {
    debug!(task_count = descriptors.len(), "validate_dependency_graph: called");

    let mut index: HashMap<&str, usize> = HashMap::new();
    for (i, desc) in descriptors.iter().enumerate() {
        if desc.id.trim().is_empty() {
            debug!(position = i, "validate_dependency_graph: empty id");
            return Err(StructuralError::MalformedDescriptor(format!(
                "task at position {} has an empty id",
                i + 1
            )));
        }
        if index.insert(desc.id.as_str(), i).is_some() {
            debug!(id = %desc.id, "validate_dependency_graph: duplicate id");
            return Err(StructuralError::DuplicateTask { id: desc.id.clone() });
        }
    }

    for desc in descriptors {
        if let Some(dep) = desc.deps.iter().find(|d| !index.contains_key(d.as_str())) {
            debug!(id = %desc.id, %dep, "validate_dependency_graph: unknown dependency");
            return Err(StructuralError::UnknownDependency {
                task: desc.id.clone(),
                dep: dep.clone(),
            });
        }
    }

    let mut colours = vec![Colour::White; descriptors.len()];
    let mut path = Vec::new();
    for start in 0..descriptors.len() {
        if colours[start] == Colour::White && has_cycle_dfs(start, descriptors, &index, &mut colours, &mut path) {
            debug!(?path, "validate_dependency_graph: cycle detected");
            return Err(StructuralError::CyclicDependency { cycle: path });
        }
    }

    debug!("validate_dependency_graph: no cycles found");
    Ok(())
}

/// DFS helper: Grey nodes are on the current stack, a Grey hit is a back edge
fn has_cycle_dfs(
    node: usize,
    descriptors: &[TaskDescriptor],
    index: &HashMap<&str, usize>,
    colours: &mut [Colour],
    path: &mut Vec<String>,
) -> bool {
    colours[node] = Colour::Grey;
    path.push(descriptors[node].id.clone());

    for dep in &descriptors[node].deps {
        let Some(&next) = index.get(dep.as_str()) else {
            continue;
        };
        match colours[next] {
            Colour::Grey => {
                debug!(from = %descriptors[node].id, to = %dep, "has_cycle_dfs: back edge");
                // Trim the path down to the cycle itself
                if let Some(pos) = path.iter().position(|id| id == dep) {
                    path.drain(..pos);
                }
                path.push(dep.clone());
                return true;
            }
            Colour::White => {
                if has_cycle_dfs(next, descriptors, index, colours, path) {
                    return true;
                }
            }
            Colour::Black => {}
        }
    }

    colours[node] = Colour::Black;
    path.pop();
    false
}

/// Topologically sort descriptors (dependencies first)
///
/// Among tasks whose dependencies are all placed, the earliest declared wins.
/// Returns indices into `descriptors`.
pub fn topological_sort(descriptors: &[TaskDescriptor]) -> Result<Vec<usize>, StructuralError> {
    debug!(task_count = descriptors.len(), "topological_sort: called");
    validate_dependency_graph(descriptors)?;

    let mut placed: HashSet<&str> = HashSet::new();
    let mut order = Vec::with_capacity(descriptors.len());
    while order.len() < descriptors.len() {
        let next = descriptors
            .iter()
            .enumerate()
            .find(|(_, d)| !placed.contains(d.id.as_str()) && d.deps.iter().all(|dep| placed.contains(dep.as_str())));
        match next {
            Some((idx, desc)) => {
                placed.insert(desc.id.as_str());
                order.push(idx);
            }
            // Unreachable for a validated graph
            None => break,
        }
    }

    debug!(?order, "topological_sort: complete");
    Ok(order)
}
