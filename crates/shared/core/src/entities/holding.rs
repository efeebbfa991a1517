use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Balance of one asset, split into the part free to trade and the part
/// held against open orders
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Holding {
    pub available: Decimal,
    pub reserved: Decimal,
}

impl Holding {
    pub fn new(available: Decimal) -> Self {
        Self {
            available,
            reserved: Decimal::ZERO,
        }
    }

    pub fn total(&self) -> Decimal {
        self.available + self.reserved
    }

    /// Move `amount` from available to reserved
    pub fn reserve(&mut self, amount: Decimal) {
        self.available -= amount;
        self.reserved += amount;
    }

    /// Move `amount` from reserved back to available
    pub fn release(&mut self, amount: Decimal) {
        self.reserved -= amount;
        self.available += amount;
    }

    /// Remove `amount` from the reserved part (spent by a fill)
    pub fn consume(&mut self, amount: Decimal) {
        self.reserved -= amount;
    }

    pub fn credit(&mut self, amount: Decimal) {
        self.available += amount;
    }

    /// Whether consuming `consumed` from the reserved part and crediting
    /// `credit` leaves a balance that can still be represented
    pub fn can_settle(&self, consumed: Decimal, credit: Decimal) -> bool {
        let Some(reserved) = self.reserved.checked_sub(consumed) else {
            return false;
        };
        self.available
            .checked_add(credit)
            .and_then(|available| available.checked_add(reserved))
            .is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_reserve_release_keeps_total() {
        let mut h = Holding::new(dec!(100));
        h.reserve(dec!(40));
        assert_eq!(h.available, dec!(60));
        assert_eq!(h.reserved, dec!(40));
        assert_eq!(h.total(), dec!(100));

        h.release(dec!(15));
        assert_eq!(h.available, dec!(75));
        assert_eq!(h.total(), dec!(100));
    }

    #[test]
    fn test_can_settle_detects_overflow() {
        let h = Holding::new(dec!(10));
        assert!(h.can_settle(dec!(0), dec!(5)));
        assert!(!h.can_settle(dec!(0), Decimal::MAX));
    }

    #[test]
    fn test_consume_reduces_total() {
        let mut h = Holding::new(dec!(10));
        h.reserve(dec!(10));
        h.consume(dec!(4));
        assert_eq!(h.total(), dec!(6));
    }
}
