pub mod broker;
pub mod engine;
pub mod metrics;
pub mod models;
pub mod optimizer;
pub mod repository;
pub mod robustness;
pub mod sop;
pub mod walk_forward;

#[cfg(test)]
mod tests;

pub use broker::BrokerSimulator;
pub use engine::{BacktestEngine, BacktestRequest};
pub use metrics::PerformanceAnalyzer;
pub use models::*;
pub use optimizer::{generate_param_grid, grid_search, CancelToken, GridSearchConfig};
pub use repository::{
    FsRunRepository, RunDescriptor, RunFilter, RunRecord, RunRepository, StoredRun,
};
pub use robustness::{
    fold_consistency, overfitting_risk, parameter_sensitivity, walkforward_degradation,
};
pub use sop::{SopValidator, StrategyHorizon};
pub use walk_forward::{train_test_split, walk_forward, walk_forward_parallel, WalkForwardConfig};
