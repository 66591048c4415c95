//! fnship-lib: reconcile declared serverless functions with a hosting platform
//!
//! This crate provides the building blocks of a deploy run:
//! - `DeployConfig`: the validated deploy document
//! - `Gateway`: narrow capability interface over the platform
//! - `DeploymentPlan`: create/update and layer decisions, computed purely
//! - `apply`: packaging, layer publishing and the settle-aware apply loop
//! - `prune`: retention-based cleanup of old versions
//! - `Reconciler`: wires the phases together

pub mod apply;
pub mod collect;
pub mod config;
pub mod consts;
pub mod gateway;
pub mod manifest;
pub mod plan;
pub mod prune;
pub mod reconcile;
pub mod util;

pub use config::DeployConfig;
pub use reconcile::{DeployReport, PlanOutcome, ReconcileOptions, Reconciler, RunError};
