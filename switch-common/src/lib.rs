pub mod metrics;
pub mod profile;
pub mod signal;
pub mod state;
