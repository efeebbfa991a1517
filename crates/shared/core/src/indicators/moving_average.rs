//! Simple and exponential moving averages over decimal observations

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;

/// Decimal places kept on every computed average
const VALUE_DP: u32 = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MovingAverageKind {
    Simple,
    Exponential,
}

impl fmt::Display for MovingAverageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MovingAverageKind::Simple => f.write_str("simple"),
            MovingAverageKind::Exponential => f.write_str("exponential"),
        }
    }
}

impl FromStr for MovingAverageKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "simple" | "sma" => Ok(MovingAverageKind::Simple),
            "exponential" | "ema" => Ok(MovingAverageKind::Exponential),
            other => Err(format!("unsupported moving average type '{other}'")),
        }
    }
}

/// Moving average calculator.
///
/// Both kinds stay empty until `period` observations have been seen. The
/// simple average then tracks the mean of the last `period` observations;
/// the exponential average is seeded with that first mean and afterwards
/// updated with `alpha = 2 / (period + 1)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovingAverage {
    kind: MovingAverageKind,
    period: u32,
    /// Observations in the current window (only the warm-up window for EMA)
    window: VecDeque<Decimal>,
    value: Option<Decimal>,
}

impl MovingAverage {
    pub fn new(kind: MovingAverageKind, period: u32) -> Self {
        let period = period.max(1);
        Self {
            kind,
            period,
            window: VecDeque::with_capacity(period as usize),
            value: None,
        }
    }

    pub fn period(&self) -> u32 {
        self.period
    }

    /// Current value, `None` while warming up
    pub fn value(&self) -> Option<Decimal> {
        self.value
    }

    /// Feed one observation and return the updated value
    pub fn update(&mut self, observation: Decimal) -> Option<Decimal> {
        match (self.kind, self.value) {
            (MovingAverageKind::Exponential, Some(previous)) => {
                let alpha = Decimal::TWO / Decimal::from(self.period + 1);
                let next = observation * alpha + previous * (Decimal::ONE - alpha);
                self.value = Some(round(next));
            }
            (MovingAverageKind::Exponential, None) => {
                self.window.push_back(observation);
                if self.window.len() == self.period as usize {
                    self.value = Some(self.window_mean());
                    self.window.clear();
                }
            }
            (MovingAverageKind::Simple, _) => {
                self.window.push_back(observation);
                if self.window.len() > self.period as usize {
                    self.window.pop_front();
                }
                if self.window.len() == self.period as usize {
                    self.value = Some(self.window_mean());
                }
            }
        }
        self.value
    }

    fn window_mean(&self) -> Decimal {
        let sum: Decimal = self.window.iter().copied().sum();
        round(sum / Decimal::from(self.period))
    }
}

fn round(value: Decimal) -> Decimal {
    value.round_dp(VALUE_DP).normalize()
}
