use crate::models::Bands;

/// Default moving-average period
pub const DEFAULT_PERIOD: usize = 20;
/// Default band width in standard deviations
pub const DEFAULT_MULTIPLIER: f64 = 2.0;

/// Simple Moving Average over the trailing `period` prices.
///
/// A series shorter than `period` degrades to the most recent price rather
/// than erroring - the signal layer then sees zero-width bands and holds.
pub fn calculate_sma(prices: &[f64], period: usize) -> f64 {
    if prices.len() < period {
        return prices.last().copied().unwrap_or(0.0);
    }

    let sum: f64 = prices.iter().rev().take(period).sum();
    sum / period as f64
}

/// Population standard deviation over the trailing `period` prices.
///
/// Returns 0.0 when the series is shorter than `period`, matching the SMA
/// degrade policy above.
pub fn calculate_std_dev(prices: &[f64], period: usize) -> f64 {
    if prices.len() < period {
        return 0.0;
    }

    let window = &prices[prices.len() - period..];
    let mean = window.iter().sum::<f64>() / period as f64;
    let variance = window
        .iter()
        .map(|price| (price - mean).powi(2))
        .sum::<f64>()
        / period as f64;

    variance.sqrt()
}

/// Bollinger bands over the trailing window: middle is the SMA, upper/lower
/// sit `multiplier` standard deviations away, price is the last element.
pub fn calculate_bands(prices: &[f64], period: usize, multiplier: f64) -> Bands {
    let middle = calculate_sma(prices, period);
    let std_dev = calculate_std_dev(prices, period);
    let price = prices.last().copied().unwrap_or(0.0);

    Bands {
        upper: middle + multiplier * std_dev,
        middle,
        lower: middle - multiplier * std_dev,
        price,
    }
}
