//! Connection quality metrics.
//!
//! Turns raw probe results into a confidence score, a quality tier and the
//! reachability verdict.

mod quality;

pub use quality::{
    classify, confidence, QualityReport, EXCELLENT_CONFIDENCE, FAIR_CONFIDENCE, GOOD_CONFIDENCE,
};
