use soroban_sdk::contracttype;

use crate::{
    Error,
    fixed_point::{DECIMAL_PRECISION, mul_div, mul_div_rem},
};

/// Cumulative reward per unit of weight, plus the division remainder carried into the
/// next bump so truncation never accumulates into a permanent loss.
///
/// Trove redistribution (`L_collateral`, `L_debt`) and fee staking (`F_collateral`,
/// `F_debt`) bump with a factor of one and credit against a per-entity snapshot.
/// Stability pool sums (`S`, `G`) bump with the running product `P` as the factor.
#[contracttype]
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Accumulator {
    pub value: i128,
    pub error: i128,
}

impl Accumulator {
    /// Adds `amount * factor / total_weight` to the running value and returns the increment.
    ///
    /// State is untouched when an error is returned.
    pub fn bump(&mut self, amount: i128, factor: i128, total_weight: i128) -> Result<i128, Error> {
        if total_weight <= 0 {
            return Err(Error::DivisionByZero);
        }
        let (quotient, remainder) = mul_div_rem(amount, factor, total_weight)?;
        let Some(carried) = remainder.checked_add(self.error) else {
            return Err(Error::Overflow);
        };
        let Some(increment) = quotient.checked_add(carried / total_weight) else {
            return Err(Error::Overflow);
        };
        let Some(value) = self.value.checked_add(increment) else {
            return Err(Error::Overflow);
        };

        self.value = value;
        self.error = carried % total_weight;
        Ok(increment)
    }

    /// Adds `amount` per unit of weight, scaled by 1e18.
    pub fn distribute(&mut self, amount: i128, total_weight: i128) -> Result<i128, Error> {
        self.bump(amount, DECIMAL_PRECISION, total_weight)
    }

    /// Reward owed to `weight` units that last synced at `snapshot`.
    pub fn credit(&self, snapshot: i128, weight: i128) -> Result<i128, Error> {
        let Some(delta) = self.value.checked_sub(snapshot) else {
            return Err(Error::Overflow);
        };
        mul_div(weight, delta, DECIMAL_PRECISION)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const E18: i128 = DECIMAL_PRECISION;

    #[test]
    fn test_remainder_is_carried_forward() {
        let mut acc = Accumulator::default();
        assert_eq!(acc.distribute(1, 3), Ok(333_333_333_333_333_333));
        assert_eq!(acc.error, 1);
        assert_eq!(acc.distribute(1, 3), Ok(333_333_333_333_333_333));
        assert_eq!(acc.error, 2);
        assert_eq!(acc.distribute(1, 3), Ok(333_333_333_333_333_334));
        assert_eq!(acc.error, 0);
        assert_eq!(acc.value, E18);
    }

    #[test]
    fn test_credit_against_snapshot() {
        let mut acc = Accumulator::default();
        acc.distribute(50 * E18, 100 * E18).unwrap();
        let snapshot = acc.value;
        acc.distribute(30 * E18, 100 * E18).unwrap();

        assert_eq!(acc.credit(0, 40 * E18), Ok(32 * E18));
        assert_eq!(acc.credit(snapshot, 40 * E18), Ok(12 * E18));
        assert_eq!(acc.credit(acc.value, 40 * E18), Ok(0));
    }

    #[test]
    fn test_value_never_decreases() {
        let mut acc = Accumulator::default();
        let mut previous = acc.value;
        for (i, amount) in [1i128, 7, 0, 999_999, 3 * E18, 13].iter().enumerate() {
            acc.distribute(*amount, 7 * E18 + i as i128).unwrap();
            assert!(acc.value >= previous);
            previous = acc.value;
        }
    }

    #[test]
    fn test_failed_bump_leaves_state() {
        let mut acc = Accumulator { value: i128::MAX - 1, error: 5 };
        assert_eq!(acc.distribute(10 * E18, E18), Err(Error::Overflow));
        assert_eq!(acc, Accumulator { value: i128::MAX - 1, error: 5 });
        assert_eq!(acc.distribute(1, 0), Err(Error::DivisionByZero));
    }
}
