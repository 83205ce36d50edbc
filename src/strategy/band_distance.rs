use crate::models::Bands;
use crate::strategy::{SignalAction, SignalStrategy, StrategyInputs, TradeSignal};

/// Round to whole cents, the precision trade volumes are recorded at
fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Distance-from-MA volume strategy.
///
/// Price inside the neutral zone around the moving average holds. Outside
/// it, the trade is sized by how far the price has travelled toward the
/// relevant band: the distance ratio in [0, 1] maps to a multiplier in
/// [1.0, 2.0] applied to the account's base amount. Below the MA buys,
/// above it sells.
#[derive(Debug, Clone, Default)]
pub struct BandDistanceStrategy;

impl BandDistanceStrategy {
    pub fn new() -> Self {
        Self
    }
}

impl SignalStrategy for BandDistanceStrategy {
    fn evaluate(&self, bands: &Bands, inputs: &StrategyInputs) -> TradeSignal {
        let Bands {
            upper,
            middle,
            lower,
            price,
        } = *bands;

        let upper_width = upper - middle;
        let lower_width = middle - lower;

        // Degenerate or too-short series collapses the bands; holding here
        // guards the divisions below
        if upper_width <= 0.0 || lower_width <= 0.0 {
            return TradeSignal::hold("Invalid band width");
        }

        let min_volume = inputs.base_usd;
        let max_volume = inputs.base_usd * 2.0;

        let hold_zone = inputs.hold_zone_percent / 100.0;
        let hold_zone_upper = middle + upper_width * hold_zone;
        let hold_zone_lower = middle - lower_width * hold_zone;

        if price >= hold_zone_lower && price <= hold_zone_upper {
            return TradeSignal::hold(format!(
                "Price in neutral zone (±{}% from MA)",
                inputs.hold_zone_percent
            ));
        }

        let (action, ratio) = if price < middle {
            (SignalAction::Buy, ((middle - price) / lower_width).clamp(0.0, 1.0))
        } else {
            (SignalAction::Sell, ((price - middle) / upper_width).clamp(0.0, 1.0))
        };

        let multiplier = 1.0 + ratio;
        let volume_usd = (inputs.base_usd * multiplier).clamp(min_volume, max_volume);

        let reason = match action {
            SignalAction::Buy => {
                format!("Buy: {:.1}% distance to lower band", ratio * 100.0)
            }
            _ => format!("Sell: {:.1}% distance to upper band", ratio * 100.0),
        };

        tracing::debug!(
            "Band distance signal: {:?} price={:.2} middle={:.2} ratio={:.3} volume=${:.2}",
            action,
            price,
            middle,
            ratio,
            volume_usd
        );

        TradeSignal {
            action,
            volume_usd: round_cents(volume_usd),
            distance_ratio: ratio,
            multiplier: round_cents(multiplier),
            reason,
        }
    }

    fn name(&self) -> &str {
        "Band Distance"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs() -> StrategyInputs {
        StrategyInputs {
            base_usd: 6.0,
            hold_zone_percent: 10.0,
        }
    }

    fn bands(upper: f64, middle: f64, lower: f64, price: f64) -> Bands {
        Bands {
            upper,
            middle,
            lower,
            price,
        }
    }

    #[test]
    fn test_invalid_band_width_holds() {
        let strategy = BandDistanceStrategy::new();

        // Collapsed bands from a flat or too-short series
        let signal = strategy.evaluate(&bands(100.0, 100.0, 100.0, 100.0), &inputs());
        assert_eq!(signal.action, SignalAction::Hold);
        assert_eq!(signal.volume_usd, 0.0);
        assert_eq!(signal.reason, "Invalid band width");
    }

    #[test]
    fn test_neutral_zone_holds_with_zero_volume() {
        let strategy = BandDistanceStrategy::new();

        // Band half-width 10, hold zone 10% -> neutral within [99, 101]
        let signal = strategy.evaluate(&bands(110.0, 100.0, 90.0, 100.5), &inputs());
        assert_eq!(signal.action, SignalAction::Hold);
        assert_eq!(signal.volume_usd, 0.0);
        assert_eq!(signal.distance_ratio, 0.0);

        // Edges of the zone are inclusive
        let signal = strategy.evaluate(&bands(110.0, 100.0, 90.0, 99.0), &inputs());
        assert_eq!(signal.action, SignalAction::Hold);
    }

    #[test]
    fn test_buy_below_ma_scales_with_distance() {
        let strategy = BandDistanceStrategy::new();

        // Halfway to the lower band: ratio 0.5, multiplier 1.5
        let signal = strategy.evaluate(&bands(110.0, 100.0, 90.0, 95.0), &inputs());
        assert_eq!(signal.action, SignalAction::Buy);
        assert_eq!(signal.distance_ratio, 0.5);
        assert_eq!(signal.multiplier, 1.5);
        assert_eq!(signal.volume_usd, 9.0);
        assert_eq!(signal.reason, "Buy: 50.0% distance to lower band");
    }

    #[test]
    fn test_sell_above_ma_scales_with_distance() {
        let strategy = BandDistanceStrategy::new();

        let signal = strategy.evaluate(&bands(110.0, 100.0, 90.0, 102.5), &inputs());
        assert_eq!(signal.action, SignalAction::Sell);
        assert_eq!(signal.distance_ratio, 0.25);
        assert_eq!(signal.multiplier, 1.25);
        assert_eq!(signal.volume_usd, 7.5);
    }

    #[test]
    fn test_ratio_clamped_beyond_band() {
        let strategy = BandDistanceStrategy::new();

        // Price below the lower band: ratio caps at 1, volume at 2x base
        let signal = strategy.evaluate(&bands(110.0, 100.0, 90.0, 80.0), &inputs());
        assert_eq!(signal.action, SignalAction::Buy);
        assert_eq!(signal.distance_ratio, 1.0);
        assert_eq!(signal.multiplier, 2.0);
        assert_eq!(signal.volume_usd, 12.0);
    }

    #[test]
    fn test_volume_bounded_by_base_and_double_base() {
        let strategy = BandDistanceStrategy::new();
        let base = inputs().base_usd;

        for price in [80.0, 88.5, 95.0, 98.5, 101.5, 104.0, 111.0, 120.0] {
            let signal = strategy.evaluate(&bands(110.0, 100.0, 90.0, price), &inputs());
            if signal.action != SignalAction::Hold {
                assert!(signal.volume_usd >= base, "volume below base at {}", price);
                assert!(
                    signal.volume_usd <= base * 2.0,
                    "volume above 2x base at {}",
                    price
                );
                assert!((0.0..=1.0).contains(&signal.distance_ratio));
            }
        }
    }
}
