//! Deployment rollout control

pub mod controller;

pub use controller::{CreateDeployment, RolloutController};
