//! apkx - timeout-enforcing parallel task executor for APK analysis.
//!
//! [`executor::killer_pmap`] maps a task over a batch of inputs, running
//! each in its own subordinate process under a hard wall-clock limit.
//! [`extractor::FeatureExtractor`] builds APK feature extraction on top.
//!
//! The subordinate is the calling executable itself, re-entered with
//! [`executor::SUBORDINATE_ARG`]. A binary that uses this crate must hand
//! that argument to [`executor::run_subordinate_main`] before doing anything
//! else, or point [`executor::PoolConfig::program`] at one that does.

pub mod error;
pub mod executor;
pub mod extractor;
pub mod logging;
pub mod paths;
pub mod tasks;

pub use error::{ApkxError, Result};
