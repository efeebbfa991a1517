use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::CommandError;
use crate::indicators::MovingAverageKind;
use crate::values::Asset;

/// Onboarding parameters of a trader: the asset pair it trades, its
/// starting balances and the moving averages it follows
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraderProfile {
    pub base_asset: Asset,
    pub quote_asset: Asset,
    pub base_balance: Decimal,
    pub quote_balance: Decimal,
    pub ma_kind: MovingAverageKind,
    pub short_period: u32,
    pub long_period: u32,
}

impl TraderProfile {
    pub fn validate(&self) -> Result<(), CommandError> {
        if self.base_asset.trim().is_empty() || self.quote_asset.trim().is_empty() {
            return Err(CommandError::InvalidProfile(
                "base and quote assets are required".to_string(),
            ));
        }
        if self.base_asset.eq_ignore_ascii_case(&self.quote_asset) {
            return Err(CommandError::InvalidProfile(format!(
                "base and quote asset are both {}",
                self.base_asset
            )));
        }
        if self.base_balance < Decimal::ZERO || self.quote_balance < Decimal::ZERO {
            return Err(CommandError::InvalidProfile(
                "starting balances must not be negative".to_string(),
            ));
        }
        if self.short_period == 0 {
            return Err(CommandError::InvalidProfile(
                "moving average periods must be positive".to_string(),
            ));
        }
        if self.short_period >= self.long_period {
            return Err(CommandError::InvalidProfile(format!(
                "short period {} must be below long period {}",
                self.short_period, self.long_period
            )));
        }
        Ok(())
    }
}
