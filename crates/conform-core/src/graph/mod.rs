//! Task graph model: nodes, guards, composition and splicing.

pub mod dependency;
pub mod guard;
pub mod task_graph;

pub use self::dependency::DependencyGraph;
pub use self::guard::{GuardDecision, TaskGuard};
pub use self::task_graph::{TaskGraph, TaskNode};
