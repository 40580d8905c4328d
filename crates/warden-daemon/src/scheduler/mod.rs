//! Background loops

mod sweeps;

pub use sweeps::{Scheduler, SweepIntervals};
