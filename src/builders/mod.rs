//! Builders to construct a scheduler from configuration.

pub mod manager_builder;

pub use manager_builder::ManagerBuilder;
