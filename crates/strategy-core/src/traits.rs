use crate::error::EngineError;
use crate::spec::StrategySpec;
use crate::types::{Bar, DailySignal, Regime};

/// Capability interface for strategy executors.
///
/// Implementations derive indicators, score each bar, and emit one
/// `DailySignal` per input bar. They must be stateless across calls so a
/// single instance can be shared by parallel optimizer workers.
pub trait SignalGenerator: Send + Sync {
    /// Transform bars plus a strategy spec into the daily signal frame.
    /// The output is aligned 1:1 with `bars`.
    fn generate_signals(
        &self,
        bars: &[Bar],
        spec: &StrategySpec,
        regime: Option<Regime>,
    ) -> Result<Vec<DailySignal>, EngineError>;
}
