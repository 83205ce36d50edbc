// Trading signal strategies
pub mod band_distance;

pub use band_distance::BandDistanceStrategy;

use crate::models::Bands;

/// Action side of a generated signal
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SignalAction {
    Buy,
    Sell,
    Hold,
}

/// Sized trading decision produced by a strategy
#[derive(Debug, Clone)]
pub struct TradeSignal {
    pub action: SignalAction,
    pub volume_usd: f64,
    pub distance_ratio: f64,
    pub multiplier: f64,
    pub reason: String,
}

impl TradeSignal {
    /// A no-trade signal with the given reason
    pub fn hold(reason: impl Into<String>) -> Self {
        Self {
            action: SignalAction::Hold,
            volume_usd: 0.0,
            distance_ratio: 0.0,
            multiplier: 1.0,
            reason: reason.into(),
        }
    }
}

/// Per-account inputs that vary between evaluations
#[derive(Debug, Clone, Copy)]
pub struct StrategyInputs {
    /// Base USD amount the sizing multiplier scales
    pub base_usd: f64,
    /// Half-width of the neutral zone, as percent of the band half-width
    pub hold_zone_percent: f64,
}

/// Pluggable signal generator: pure function of the bands and the
/// per-account inputs. Ledger and throttle logic never depend on which
/// implementation produced the signal.
pub trait SignalStrategy: Send + Sync {
    /// Classify the current price against the bands and size a trade
    fn evaluate(&self, bands: &Bands, inputs: &StrategyInputs) -> TradeSignal;

    /// Strategy name for logs
    fn name(&self) -> &str;
}
