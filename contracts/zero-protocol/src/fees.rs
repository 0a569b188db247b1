use soroban_sdk::{Env, contracttype};

use crate::{
    Error,
    config::ProtocolConfig,
    fixed_point::{DECIMAL_PRECISION, Decimal, mul_div},
    index_types::BaseRateUpdated,
};

const SECONDS_IN_ONE_MINUTE: u64 = 60;

#[contracttype]
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct FeeState {
    pub base_rate: i128,
    pub last_fee_operation_time: u64,
}

impl FeeState {
    fn minutes_passed(&self, now: u64) -> u64 {
        now.saturating_sub(self.last_fee_operation_time) / SECONDS_IN_ONE_MINUTE
    }

    /// Base rate after decaying it for every whole minute since the last fee operation
    pub fn decayed_base_rate(&self, config: &ProtocolConfig, now: u64) -> Result<i128, Error> {
        let factor = Decimal::from_raw(config.minute_decay_factor).pow(self.minutes_passed(now))?;
        Decimal::from_raw(self.base_rate)
            .checked_mul(factor)
            .map(Decimal::raw)
    }

    pub fn borrowing_rate(&self, config: &ProtocolConfig, now: u64) -> Result<i128, Error> {
        let rate = self
            .decayed_base_rate(config, now)?
            .checked_add(config.borrowing_fee_floor)
            .ok_or(Error::Overflow)?;
        Ok(rate.min(config.max_borrowing_fee))
    }

    pub fn redemption_rate(&self, config: &ProtocolConfig, now: u64) -> Result<i128, Error> {
        let rate = self
            .decayed_base_rate(config, now)?
            .checked_add(config.redemption_fee_floor)
            .ok_or(Error::Overflow)?;
        Ok(rate.min(DECIMAL_PRECISION))
    }

    /// Decays the base rate and, when `fraction` is non-zero, raises it by `fraction / beta`.
    /// The result is capped at 100%.
    fn update(
        &mut self,
        env: &Env,
        config: &ProtocolConfig,
        fraction: i128,
        now: u64,
    ) -> Result<(), Error> {
        let decayed = self.decayed_base_rate(config, now)?;
        let Some(raised) = decayed.checked_add(fraction / config.beta) else {
            return Err(Error::Overflow);
        };
        self.base_rate = raised.min(DECIMAL_PRECISION);

        // the decay clock only advances once a whole minute has passed
        if now.saturating_sub(self.last_fee_operation_time) >= SECONDS_IN_ONE_MINUTE {
            self.last_fee_operation_time = now;
        }

        BaseRateUpdated {
            base_rate: self.base_rate,
            last_fee_operation_time: self.last_fee_operation_time,
        }
        .publish(env);
        Ok(())
    }
}

/// Max fee must not be above 100%, and outside recovery mode not below the fee floor
pub fn validate_max_fee(max_fee: i128, floor: i128, recovery_mode: bool) -> Result<(), Error> {
    let lower = if recovery_mode { 0 } else { floor };
    if max_fee < lower || max_fee > DECIMAL_PRECISION {
        return Err(Error::InvalidMaxFee);
    }
    Ok(())
}

fn require_fee_accepted(fee: i128, amount: i128, max_fee: i128) -> Result<(), Error> {
    if amount == 0 {
        return Ok(());
    }
    let fee_percentage = mul_div(fee, DECIMAL_PRECISION, amount)?;
    if fee_percentage > max_fee {
        return Err(Error::FeeExceedsTolerance);
    }
    Ok(())
}

/// Fee charged on `debt_amount` of newly drawn debt.
///
/// The base rate is decayed first and the fee uses the decayed rate. With
/// `bump_on_borrow` the drawn fraction of `total_debt` is then added to the base rate.
pub fn borrowing_fee(
    env: &Env,
    config: &ProtocolConfig,
    fees: &mut FeeState,
    debt_amount: i128,
    total_debt: i128,
    max_fee: i128,
    now: u64,
) -> Result<i128, Error> {
    let rate = fees.borrowing_rate(config, now)?;
    let fee = mul_div(debt_amount, rate, DECIMAL_PRECISION)?;
    require_fee_accepted(fee, debt_amount, max_fee)?;

    let fraction = if config.bump_on_borrow && total_debt > 0 {
        mul_div(debt_amount, DECIMAL_PRECISION, total_debt)?
    } else {
        0
    };
    fees.update(env, config, fraction, now)?;
    Ok(fee)
}

/// Fee, in collateral, charged on `collateral_drawn` by a redemption of `debt_redeemed`.
///
/// The base rate is raised by the redeemed fraction of `total_debt` before the rate is read.
#[allow(clippy::too_many_arguments)]
pub fn redemption_fee(
    env: &Env,
    config: &ProtocolConfig,
    fees: &mut FeeState,
    collateral_drawn: i128,
    debt_redeemed: i128,
    total_debt: i128,
    max_fee: i128,
    now: u64,
) -> Result<i128, Error> {
    let fraction = mul_div(debt_redeemed, DECIMAL_PRECISION, total_debt)?;
    fees.update(env, config, fraction, now)?;

    // `update` left the base rate decayed to `now`
    let rate = fees
        .base_rate
        .checked_add(config.redemption_fee_floor)
        .ok_or(Error::Overflow)?
        .min(DECIMAL_PRECISION);
    let fee = mul_div(collateral_drawn, rate, DECIMAL_PRECISION)?;
    require_fee_accepted(fee, collateral_drawn, max_fee)?;
    Ok(fee)
}
