//! Vector Field Histogram processing for kestrel.
//!
//! Two stages: [`histogram`] converts one lidar oscillation into a polar
//! obstacle-density histogram; [`steering`] selects an obstacle-free valley
//! of sectors and turns it into a steering command for the autopilot.

pub mod histogram;
pub mod steering;
pub mod worker;

pub use histogram::{HistogramConfig, VectorFieldHistogram};
pub use steering::{SteeringConfig, SteeringPlanner};
