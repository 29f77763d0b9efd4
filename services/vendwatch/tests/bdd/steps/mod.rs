//! BDD step definitions for vendwatch

pub mod command_steps;
pub mod cycle_steps;
pub mod delivery_steps;
