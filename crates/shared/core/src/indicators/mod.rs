//! Price indicators fed by market candles

mod moving_average;

pub use moving_average::{MovingAverage, MovingAverageKind};
