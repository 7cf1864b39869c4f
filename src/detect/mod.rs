// src/detect/mod.rs

//! Classification helpers used by the grade stage:
//!
//! - [`markers`]: the Result Detector, mapping marker files to a verdict.
//! - [`language`]: picks the submission language from source extensions.

pub mod language;
pub mod markers;

pub use language::LanguageDetector;
pub use markers::{Detection, MarkerLocator, MarkerRule, ResultDetector};
