//! # Services module
//!
//! This module provide services to resolve the provider config of gitea
//! managed resources, run their controllers and helpers to do so.
pub mod cfg;
pub mod controller;
pub mod crd;
pub mod gitea;
pub mod k8s;
pub mod telemetry;
