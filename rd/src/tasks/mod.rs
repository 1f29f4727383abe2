//! Task graph ownership: loading, selection, lifecycle transitions, persistence

mod error;
pub mod graph;
mod manager;

pub use error::{StateError, StructuralError, TaskError};
pub use graph::{topological_sort, validate_dependency_graph};
pub use manager::{DEFAULT_MAX_ATTEMPTS, TaskManager};
