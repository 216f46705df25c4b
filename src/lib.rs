// Library exports for task-planner
// This allows the modules to be imported in tests and external code

pub mod config;
pub mod persistence;
pub mod planning;
pub mod tools;
