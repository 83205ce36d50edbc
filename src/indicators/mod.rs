// Technical indicators module
pub mod bollinger;

pub use bollinger::{
    calculate_bands, calculate_sma, calculate_std_dev, DEFAULT_MULTIPLIER, DEFAULT_PERIOD,
};
