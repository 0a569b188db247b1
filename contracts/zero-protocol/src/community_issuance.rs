use soroban_sdk::{Env, contracttype};

use crate::{
    Error,
    config::ProtocolConfig,
    fixed_point::{DECIMAL_PRECISION, Decimal, mul_div},
    index_types::RewardIssued,
    token_ledger,
};

const SECONDS_IN_ONE_MINUTE: u64 = 60;

/// Reward token issuance schedule for stability pool depositors.
///
/// Cumulative issuance after `t` minutes is `supply_cap * (1 - issuance_factor^t)`, so half of
/// the cap is issued in the first year with the default factor.
#[contracttype]
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct IssuanceState {
    pub deployment_time: u64,
    pub total_issued: i128,
}

impl IssuanceState {
    pub fn cumulative_issuance(&self, config: &ProtocolConfig, now: u64) -> Result<i128, Error> {
        let minutes = now.saturating_sub(self.deployment_time) / SECONDS_IN_ONE_MINUTE;
        let remaining = Decimal::from_raw(config.issuance_factor).pow(minutes)?;
        let issued_fraction = Decimal::ONE.checked_sub(remaining)?;
        mul_div(config.issuance_supply_cap, issued_fraction.raw(), DECIMAL_PRECISION)
    }

    /// Issues everything accrued since the last call and returns the amount
    pub fn issue(&mut self, config: &ProtocolConfig, now: u64) -> Result<i128, Error> {
        let cumulative = self.cumulative_issuance(config, now)?;
        // a lowered supply cap must not claw back what was already issued
        let Some(issued) = cumulative.checked_sub(self.total_issued) else {
            return Err(Error::Overflow);
        };
        if issued <= 0 {
            return Ok(0);
        }
        self.total_issued = cumulative;
        Ok(issued)
    }
}

/// Issues accrued rewards into the stability pool and logs the issuance
pub fn issue(env: &Env, config: &ProtocolConfig, state: &mut IssuanceState) -> Result<i128, Error> {
    let issued = state.issue(config, env.ledger().timestamp())?;
    if issued > 0 {
        token_ledger::issue_reward(env, &token_ledger::protocol(env), issued);
        RewardIssued {
            amount: issued,
            total_issued: state.total_issued,
        }
        .publish(env);
    }
    Ok(issued)
}
