//! Dining Experiment: harness around the contention kernel.
//!
//! This crate runs the kernel the way an experimenter would:
//! - Live runs with a console board rendered by an observer actor
//! - Grids of strategies and table sizes with summary statistics
//! - A reproduction of the hold-and-wait deadlock and its detection

pub mod experiment;
pub mod observer;
pub mod render;
pub mod results;
