//! # CPM simulation driver
//!
//! Runs the synthetic collaboration-policy experiment on top of
//! [`cpm_core`] and handles everything around it: settings loading and
//! validation, CSV curve artifacts, deterministic dataset splits, and the
//! artifact-based results report.

pub mod output;
pub mod report;
pub mod settings;
pub mod simulation;
pub mod splits;
