pub mod chart;
pub mod monitor;
