pub mod executor;
pub mod reasons;
pub mod registry;

pub use executor::{StableConservative, ThresholdParams, TrendMomentum};
pub use registry::StrategyRegistry;
