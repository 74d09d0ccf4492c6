pub mod frame;
pub mod indicators;
pub mod patterns;
pub mod regime;
pub mod scoring;

pub use frame::IndicatorFrame;
pub use regime::{RegimeDetection, RegimeDetector, RegimeIndicators};
pub use scoring::{BarScores, ScoringEngine};
