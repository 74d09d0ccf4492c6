pub mod error;
pub mod loader;
pub mod spec;
pub mod traits;
pub mod types;

pub use error::EngineError;
pub use loader::{load_bars_csv, validate_bars};
pub use spec::{
    BollingerParams, ChartPattern, FilterConfig, MacdParams, PatternConfig, PeriodParams,
    SignalWeights, StochasticParams, StrategyConfig, StrategySpec, TechnicalConfig,
};
pub use traits::SignalGenerator;
pub use types::{Bar, DailySignal, Regime, Signal};
