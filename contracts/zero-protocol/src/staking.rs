use soroban_sdk::{Address, Env, contracttype};

use crate::{
    Error,
    accumulator::Accumulator,
    index_types::{FeeForgone, StakeUpdated, StakingFeesUpdated},
    storage::{self, ProtocolState, StakeRecord},
    token_ledger,
};

#[contracttype]
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct StakingState {
    pub total_staked: i128,
    /// Collateral fees per unit staked
    pub f_collateral: Accumulator,
    /// Debt token fees per unit staked
    pub f_debt: Accumulator,
}

#[contracttype]
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct StakeView {
    pub staked: i128,
    pub collateral_gain: i128,
    pub debt_gain: i128,
}

pub trait IsStaking {
    /// Stake governance tokens, paying out pending fee gains
    fn stake(env: &Env, owner: Address, amount: i128) -> Result<StakeView, Error>;
    /// Unstake governance tokens, paying out pending fee gains. Zero only claims the gains.
    fn unstake(env: &Env, owner: Address, amount: i128) -> Result<StakeView, Error>;
    /// Pay out pending fee gains without changing the stake
    fn claim_staking_gains(env: &Env, owner: Address) -> Result<StakeView, Error>;
    /// Staked amount and pending gains of `owner`
    fn stake_of(env: &Env, owner: Address) -> Result<StakeView, Error>;
    fn total_staked(env: &Env) -> i128;
    fn staking_state(env: &Env) -> StakingState;
}

impl StakingState {
    fn pending_gains(&self, record: &StakeRecord) -> Result<(i128, i128), Error> {
        if record.amount == 0 {
            return Ok((0, 0));
        }
        Ok((
            self.f_collateral
                .credit(record.f_collateral_snapshot, record.amount)?,
            self.f_debt.credit(record.f_debt_snapshot, record.amount)?,
        ))
    }

    pub fn view(&self, record: &StakeRecord) -> Result<StakeView, Error> {
        let (collateral_gain, debt_gain) = self.pending_gains(record)?;
        Ok(StakeView {
            staked: record.amount,
            collateral_gain,
            debt_gain,
        })
    }
}

fn increase_fee(
    env: &Env,
    state: &mut StakingState,
    collateral_fee: i128,
    debt_fee: i128,
) -> Result<(), Error> {
    if collateral_fee == 0 && debt_fee == 0 {
        return Ok(());
    }
    if state.total_staked == 0 {
        // nobody to credit: the accumulators stay put and the fee is not escrowed
        FeeForgone {
            collateral_fee,
            debt_fee,
        }
        .publish(env);
        return Ok(());
    }

    let total = state.total_staked;
    if collateral_fee > 0 {
        state.f_collateral.distribute(collateral_fee, total)?;
    }
    if debt_fee > 0 {
        state.f_debt.distribute(debt_fee, total)?;
    }
    StakingFeesUpdated {
        f_collateral: state.f_collateral.value,
        f_debt: state.f_debt.value,
    }
    .publish(env);
    Ok(())
}

/// Credits a redemption fee, held by the protocol in collateral, to stakers
pub fn increase_collateral_fee(
    env: &Env,
    state: &mut StakingState,
    fee: i128,
) -> Result<(), Error> {
    increase_fee(env, state, fee, 0)
}

/// Mints a borrowing fee to the protocol and credits it to stakers
pub fn increase_debt_fee(env: &Env, state: &mut StakingState, fee: i128) -> Result<(), Error> {
    token_ledger::mint_debt(env, &token_ledger::protocol(env), fee);
    increase_fee(env, state, 0, fee)
}

fn pay_out_gains(env: &Env, owner: &Address, collateral_gain: i128, debt_gain: i128) {
    let protocol = token_ledger::protocol(env);
    token_ledger::transfer_collateral(env, &protocol, owner, collateral_gain);
    token_ledger::transfer_debt(env, &protocol, owner, debt_gain);
}

fn save(env: &Env, owner: &Address, record: &StakeRecord, gains: (i128, i128)) {
    storage::set_stake(env, owner, record);
    StakeUpdated {
        owner: owner.clone(),
        amount: record.amount,
        collateral_gain: gains.0,
        debt_gain: gains.1,
    }
    .publish(env);
}

pub fn stake(
    env: &Env,
    state: &mut ProtocolState,
    owner: &Address,
    amount: i128,
) -> Result<StakeView, Error> {
    if amount <= 0 {
        return Err(Error::InvalidAmount);
    }
    let staking = &mut state.staking;
    let mut record = storage::get_stake(env, owner);
    let gains = staking.pending_gains(&record)?;

    let Some(staked) = record.amount.checked_add(amount) else {
        return Err(Error::Overflow);
    };
    let Some(total_staked) = staking.total_staked.checked_add(amount) else {
        return Err(Error::Overflow);
    };
    record.amount = staked;
    record.f_collateral_snapshot = staking.f_collateral.value;
    record.f_debt_snapshot = staking.f_debt.value;
    staking.total_staked = total_staked;

    token_ledger::transfer_gov(env, owner, &token_ledger::protocol(env), amount);
    pay_out_gains(env, owner, gains.0, gains.1);
    save(env, owner, &record, gains);
    staking.view(&record)
}

pub fn unstake(
    env: &Env,
    state: &mut ProtocolState,
    owner: &Address,
    amount: i128,
) -> Result<StakeView, Error> {
    if amount < 0 {
        return Err(Error::InvalidAmount);
    }
    let staking = &mut state.staking;
    let mut record = storage::get_stake(env, owner);
    if record.amount == 0 || amount > record.amount {
        return Err(Error::InsufficientStake);
    }
    let gains = staking.pending_gains(&record)?;

    record.amount -= amount;
    record.f_collateral_snapshot = staking.f_collateral.value;
    record.f_debt_snapshot = staking.f_debt.value;
    staking.total_staked -= amount;

    token_ledger::transfer_gov(env, &token_ledger::protocol(env), owner, amount);
    pay_out_gains(env, owner, gains.0, gains.1);
    save(env, owner, &record, gains);
    staking.view(&record)
}
