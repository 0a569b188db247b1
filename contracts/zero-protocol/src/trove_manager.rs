use soroban_sdk::{Address, Env, Vec, contracttype};

use crate::{
    Error,
    accumulator::Accumulator,
    config::ProtocolConfig,
    fees,
    fixed_point::{DECIMAL_PRECISION, Decimal, mul_div},
    index_types::{CollateralSurplus, Redemption, TotalsUpdated, TroveLiquidated, TroveUpdated},
    stability_pool, staking,
    storage::{self, ProtocolState, Trove},
    token_ledger,
    trove::{
        LiquidationTotals, PendingRewards, RedemptionTotals, TroveOperation, TroveStatus,
        TroveView,
    },
};

/// 100.0 as a decimal
const NICR_PRECISION: Decimal = Decimal::from_raw(100_000_000_000_000_000_000);

#[contracttype]
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SystemTotals {
    pub total_stakes: i128,
    /// Collateral of all troves, pending redistribution rewards included
    pub total_collateral: i128,
    /// Debt of all troves, pending redistribution rewards included
    pub total_debt: i128,
    /// `total_stakes` right after the last liquidation
    pub total_stakes_snapshot: i128,
    /// `total_collateral` right after the last liquidation
    pub total_collateral_snapshot: i128,
    /// Redistributed collateral per unit of stake
    pub l_collateral: Accumulator,
    /// Redistributed debt per unit of stake
    pub l_debt: Accumulator,
}

/// Collateral per unit of debt without a price, used to order the sorted index
pub fn nominal_ratio(collateral: i128, debt: i128) -> Result<i128, Error> {
    let debt = Decimal::from_raw(debt);
    if debt.is_zero() {
        return Ok(Decimal::MAX.raw());
    }
    Decimal::from_raw(collateral)
        .mul_div(NICR_PRECISION, debt)
        .map(Decimal::raw)
}

pub fn collateral_ratio(collateral: i128, debt: i128, price: i128) -> Result<i128, Error> {
    let debt = Decimal::from_raw(debt);
    if debt.is_zero() {
        return Ok(Decimal::MAX.raw());
    }
    Decimal::from_raw(collateral)
        .mul_div(Decimal::from_raw(price), debt)
        .map(Decimal::raw)
}

impl SystemTotals {
    pub fn tcr(&self, price: i128) -> Result<i128, Error> {
        collateral_ratio(self.total_collateral, self.total_debt, price)
    }

    pub fn is_recovery_mode(&self, config: &ProtocolConfig, price: i128) -> Result<bool, Error> {
        Ok(self.tcr(price)? < config.ccr)
    }

    fn tcr_after(
        &self,
        collateral_change: i128,
        debt_change: i128,
        price: i128,
    ) -> Result<i128, Error> {
        let collateral = Decimal::from_raw(self.total_collateral)
            .checked_add(Decimal::from_raw(collateral_change))?;
        let debt = Decimal::from_raw(self.total_debt).checked_add(Decimal::from_raw(debt_change))?;
        collateral_ratio(collateral.raw(), debt.raw(), price)
    }

    /// Stake for `collateral`, scaled by the stake/collateral ratio left by past liquidations
    fn compute_stake(&self, collateral: i128) -> Result<i128, Error> {
        if self.total_stakes_snapshot == 0 || self.total_collateral_snapshot == 0 {
            return Ok(collateral);
        }
        Decimal::from_raw(collateral)
            .mul_div(
                Decimal::from_raw(self.total_stakes_snapshot),
                Decimal::from_raw(self.total_collateral_snapshot),
            )
            .map(Decimal::raw)
    }

    pub fn pending_rewards(&self, trove: &Trove) -> Result<PendingRewards, Error> {
        if trove.status != TroveStatus::Open || trove.stake == 0 {
            return Ok(PendingRewards::default());
        }
        Ok(PendingRewards {
            collateral: self
                .l_collateral
                .credit(trove.l_collateral_snapshot, trove.stake)?,
            debt: self.l_debt.credit(trove.l_debt_snapshot, trove.stake)?,
        })
    }

    fn change(&mut self, stake: i128, collateral: i128, debt: i128) -> Result<(), Error> {
        let total_stakes =
            Decimal::from_raw(self.total_stakes).checked_add(Decimal::from_raw(stake))?;
        let total_collateral =
            Decimal::from_raw(self.total_collateral).checked_add(Decimal::from_raw(collateral))?;
        let total_debt = Decimal::from_raw(self.total_debt).checked_add(Decimal::from_raw(debt))?;
        self.total_stakes = total_stakes.raw();
        self.total_collateral = total_collateral.raw();
        self.total_debt = total_debt.raw();
        Ok(())
    }

    fn redistribute(
        &mut self,
        collateral: i128,
        debt: i128,
        total_stakes: i128,
    ) -> Result<(), Error> {
        if collateral > 0 {
            self.l_collateral.distribute(collateral, total_stakes)?;
        }
        if debt > 0 {
            self.l_debt.distribute(debt, total_stakes)?;
        }
        Ok(())
    }

    fn update_snapshots(&mut self, env: &Env) {
        self.total_stakes_snapshot = self.total_stakes;
        self.total_collateral_snapshot = self.total_collateral;
        TotalsUpdated {
            total_stakes_snapshot: self.total_stakes_snapshot,
            total_collateral_snapshot: self.total_collateral_snapshot,
            l_collateral: self.l_collateral.value,
            l_debt: self.l_debt.value,
        }
        .publish(env);
    }
}

fn apply_rewards(totals: &SystemTotals, trove: &mut Trove) -> Result<(), Error> {
    let pending = totals.pending_rewards(trove)?;
    let (Some(collateral), Some(debt)) = (
        trove.collateral.checked_add(pending.collateral),
        trove.debt.checked_add(pending.debt),
    ) else {
        return Err(Error::Overflow);
    };
    trove.collateral = collateral;
    trove.debt = debt;
    trove.l_collateral_snapshot = totals.l_collateral.value;
    trove.l_debt_snapshot = totals.l_debt.value;
    Ok(())
}

/// Open trove of `owner` with its pending rewards applied in memory
fn load_open_trove(env: &Env, state: &ProtocolState, owner: &Address) -> Result<Trove, Error> {
    let mut trove = storage::get_trove(env, owner);
    if trove.status != TroveStatus::Open {
        return Err(Error::NotOpen);
    }
    apply_rewards(&state.totals, &mut trove)?;
    Ok(trove)
}

/// Replaces the trove's stake with one computed from its current collateral
fn update_stake(totals: &mut SystemTotals, trove: &mut Trove) -> Result<(), Error> {
    let stake = totals.compute_stake(trove.collateral)?;
    let Some(total_stakes) = totals
        .total_stakes
        .checked_sub(trove.stake)
        .and_then(|total| total.checked_add(stake))
    else {
        return Err(Error::Overflow);
    };
    totals.total_stakes = total_stakes;
    trove.stake = stake;
    Ok(())
}

fn save_trove(env: &Env, owner: &Address, trove: &Trove, operation: TroveOperation) {
    storage::set_trove(env, owner, trove);
    TroveUpdated {
        owner: owner.clone(),
        collateral: trove.collateral,
        debt: trove.debt,
        stake: trove.stake,
        status: trove.status,
        operation,
        ledger: env.ledger().sequence(),
        timestamp: env.ledger().timestamp(),
    }
    .publish(env);
}

/// Zeroes the record, marks it with a terminal `status` and unlinks it from the index.
/// The caller settles stakes and totals.
fn close_trove_record(
    env: &Env,
    state: &mut ProtocolState,
    owner: &Address,
    status: TroveStatus,
    operation: TroveOperation,
) -> Result<(), Error> {
    state.sorted.remove(env, owner)?;
    let closed = Trove {
        status,
        ..Trove::default()
    };
    save_trove(env, owner, &closed, operation);
    Ok(())
}

fn add_surplus(env: &Env, owner: &Address, amount: i128) -> Result<(), Error> {
    if amount == 0 {
        return Ok(());
    }
    let Some(claimable) = storage::get_surplus(env, owner).checked_add(amount) else {
        return Err(Error::Overflow);
    };
    storage::set_surplus(env, owner, claimable);
    CollateralSurplus {
        owner: owner.clone(),
        claimable,
    }
    .publish(env);
    Ok(())
}

pub fn current_icr(
    env: &Env,
    state: &ProtocolState,
    owner: &Address,
    price: i128,
) -> Result<i128, Error> {
    let trove = load_open_trove(env, state, owner)?;
    collateral_ratio(trove.collateral, trove.debt, price)
}

pub fn current_nicr(env: &Env, state: &ProtocolState, owner: &Address) -> Result<i128, Error> {
    let trove = load_open_trove(env, state, owner)?;
    nominal_ratio(trove.collateral, trove.debt)
}

pub fn view(
    env: &Env,
    state: &ProtocolState,
    owner: &Address,
    price: i128,
) -> Result<TroveView, Error> {
    let mut trove = storage::get_trove(env, owner);
    let (icr, nicr) = if trove.status == TroveStatus::Open {
        apply_rewards(&state.totals, &mut trove)?;
        (
            collateral_ratio(trove.collateral, trove.debt, price)?,
            nominal_ratio(trove.collateral, trove.debt)?,
        )
    } else {
        (0, 0)
    };
    Ok(TroveView {
        owner: owner.clone(),
        collateral: trove.collateral,
        debt: trove.debt,
        stake: trove.stake,
        status: trove.status,
        icr,
        nicr,
    })
}

#[allow(clippy::too_many_arguments)]
pub fn open_trove(
    env: &Env,
    config: &ProtocolConfig,
    state: &mut ProtocolState,
    owner: &Address,
    collateral: i128,
    debt_amount: i128,
    max_fee: i128,
    price: i128,
    upper_hint: Option<Address>,
    lower_hint: Option<Address>,
) -> Result<Trove, Error> {
    if collateral <= 0 || debt_amount <= 0 {
        return Err(Error::InvalidAmount);
    }
    if storage::get_trove(env, owner).status == TroveStatus::Open {
        return Err(Error::AlreadyOpen);
    }

    let recovery = state.totals.is_recovery_mode(config, price)?;
    fees::validate_max_fee(max_fee, config.borrowing_fee_floor, recovery)?;
    let fee = if recovery {
        0
    } else {
        fees::borrowing_fee(
            env,
            config,
            &mut state.fees,
            debt_amount,
            state.totals.total_debt,
            max_fee,
            env.ledger().timestamp(),
        )?
    };

    let Some(net_debt) = debt_amount.checked_add(fee) else {
        return Err(Error::Overflow);
    };
    if net_debt < config.min_net_debt {
        return Err(Error::BelowMinimumDebt);
    }
    let Some(composite_debt) = net_debt.checked_add(config.gas_compensation) else {
        return Err(Error::Overflow);
    };

    let icr = collateral_ratio(collateral, composite_debt, price)?;
    if recovery {
        if icr < config.ccr {
            return Err(Error::RecoveryModeViolation);
        }
    } else {
        if icr < config.mcr {
            return Err(Error::CollateralRatioTooLow);
        }
        if state.totals.tcr_after(collateral, composite_debt, price)? < config.ccr {
            return Err(Error::RecoveryModeViolation);
        }
    }

    let mut trove = Trove {
        collateral,
        debt: composite_debt,
        stake: 0,
        l_collateral_snapshot: state.totals.l_collateral.value,
        l_debt_snapshot: state.totals.l_debt.value,
        status: TroveStatus::Open,
    };
    update_stake(&mut state.totals, &mut trove)?;
    state.totals.change(0, collateral, composite_debt)?;
    state.sorted.insert(
        env,
        owner,
        nominal_ratio(collateral, composite_debt)?,
        upper_hint,
        lower_hint,
    )?;

    let protocol = token_ledger::protocol(env);
    token_ledger::transfer_collateral(env, owner, &protocol, collateral);
    token_ledger::mint_debt(env, owner, debt_amount);
    token_ledger::mint_debt(env, &protocol, config.gas_compensation);
    staking::increase_debt_fee(env, &mut state.staking, fee)?;

    save_trove(env, owner, &trove, TroveOperation::Open);
    Ok(trove)
}

#[allow(clippy::too_many_arguments)]
pub fn adjust_trove(
    env: &Env,
    config: &ProtocolConfig,
    state: &mut ProtocolState,
    owner: &Address,
    collateral_change: i128,
    debt_change: i128,
    max_fee: i128,
    price: i128,
    upper_hint: Option<Address>,
    lower_hint: Option<Address>,
) -> Result<Trove, Error> {
    if collateral_change == 0 && debt_change == 0 {
        return Err(Error::InvalidAmount);
    }
    let mut trove = load_open_trove(env, state, owner)?;

    let recovery = state.totals.is_recovery_mode(config, price)?;
    if debt_change > 0 {
        fees::validate_max_fee(max_fee, config.borrowing_fee_floor, recovery)?;
    }
    if recovery && collateral_change < 0 {
        return Err(Error::RecoveryModeViolation);
    }

    let Some(new_collateral) = trove.collateral.checked_add(collateral_change) else {
        return Err(Error::Overflow);
    };
    if new_collateral < 0 {
        return Err(Error::InsufficientCollateral);
    }
    let net_debt = (trove.debt - config.gas_compensation).max(0);
    if debt_change < 0 && debt_change.unsigned_abs() > net_debt.unsigned_abs() {
        return Err(Error::RepaymentExceedsDebt);
    }

    let fee = if debt_change > 0 && !recovery {
        fees::borrowing_fee(
            env,
            config,
            &mut state.fees,
            debt_change,
            state.totals.total_debt,
            max_fee,
            env.ledger().timestamp(),
        )?
    } else {
        0
    };
    let Some(debt_increase) = debt_change.checked_add(fee) else {
        return Err(Error::Overflow);
    };
    let Some(new_net_debt) = net_debt.checked_add(debt_increase) else {
        return Err(Error::Overflow);
    };
    if new_net_debt != 0 && new_net_debt < config.min_net_debt {
        return Err(Error::BelowMinimumDebt);
    }
    let new_debt = trove.debt + debt_increase;

    let old_icr = collateral_ratio(trove.collateral, trove.debt, price)?;
    let new_icr = collateral_ratio(new_collateral, new_debt, price)?;
    if recovery {
        if new_icr < old_icr {
            return Err(Error::RecoveryModeViolation);
        }
        if debt_change > 0 && new_icr < config.ccr {
            return Err(Error::RecoveryModeViolation);
        }
    } else {
        if new_icr < config.mcr {
            return Err(Error::CollateralRatioTooLow);
        }
        if state.totals.tcr_after(collateral_change, debt_increase, price)? < config.ccr {
            return Err(Error::RecoveryModeViolation);
        }
    }

    trove.collateral = new_collateral;
    trove.debt = new_debt;
    update_stake(&mut state.totals, &mut trove)?;
    state.totals.change(0, collateral_change, debt_increase)?;
    state.sorted.re_insert(
        env,
        owner,
        nominal_ratio(new_collateral, new_debt)?,
        upper_hint,
        lower_hint,
    )?;

    let protocol = token_ledger::protocol(env);
    if collateral_change > 0 {
        token_ledger::transfer_collateral(env, owner, &protocol, collateral_change);
    } else {
        token_ledger::transfer_collateral(env, &protocol, owner, -collateral_change);
    }
    if debt_change > 0 {
        token_ledger::mint_debt(env, owner, debt_change);
    } else {
        token_ledger::burn_debt(env, owner, -debt_change);
    }
    staking::increase_debt_fee(env, &mut state.staking, fee)?;

    save_trove(env, owner, &trove, TroveOperation::Adjust);
    Ok(trove)
}

pub fn close_trove(
    env: &Env,
    config: &ProtocolConfig,
    state: &mut ProtocolState,
    owner: &Address,
    price: i128,
) -> Result<(), Error> {
    let trove = load_open_trove(env, state, owner)?;
    if state.totals.is_recovery_mode(config, price)? {
        return Err(Error::RecoveryModeViolation);
    }
    if trove.debt > config.gas_compensation {
        return Err(Error::DebtNotRepaid);
    }
    if state.totals.tcr_after(-trove.collateral, -trove.debt, price)? < config.ccr {
        return Err(Error::RecoveryModeViolation);
    }

    state
        .totals
        .change(-trove.stake, -trove.collateral, -trove.debt)?;
    close_trove_record(
        env,
        state,
        owner,
        TroveStatus::ClosedByOwner,
        TroveOperation::Close,
    )?;

    let protocol = token_ledger::protocol(env);
    token_ledger::burn_debt(env, &protocol, trove.debt);
    token_ledger::transfer_collateral(env, &protocol, owner, trove.collateral);
    Ok(())
}

pub fn apply_pending_rewards(
    env: &Env,
    state: &ProtocolState,
    owner: &Address,
) -> Result<Trove, Error> {
    let trove = load_open_trove(env, state, owner)?;
    save_trove(env, owner, &trove, TroveOperation::ApplyRewards);
    Ok(trove)
}

pub fn claim_collateral(env: &Env, owner: &Address) -> Result<i128, Error> {
    let amount = storage::get_surplus(env, owner);
    if amount == 0 {
        return Err(Error::NothingToClaim);
    }
    storage::set_surplus(env, owner, 0);
    token_ledger::transfer_collateral(env, &token_ledger::protocol(env), owner, amount);
    CollateralSurplus {
        owner: owner.clone(),
        claimable: 0,
    }
    .publish(env);
    Ok(amount)
}

/// How a single liquidation splits the trove
struct LiquidationValues {
    closed: bool,
    debt_offset: i128,
    collateral_to_pool: i128,
    debt_redistributed: i128,
    collateral_redistributed: i128,
    collateral_gas_compensation: i128,
    debt_gas_compensation: i128,
    collateral_surplus: i128,
}

impl LiquidationTotals {
    fn add(&mut self, values: &LiquidationValues) -> Result<(), Error> {
        let sum = |a: i128, b: i128| a.checked_add(b).ok_or(Error::Overflow);
        if values.closed {
            self.liquidated += 1;
        } else {
            self.partially_liquidated += 1;
        }
        self.debt_offset = sum(self.debt_offset, values.debt_offset)?;
        self.collateral_to_pool = sum(self.collateral_to_pool, values.collateral_to_pool)?;
        self.debt_redistributed = sum(self.debt_redistributed, values.debt_redistributed)?;
        self.collateral_redistributed =
            sum(self.collateral_redistributed, values.collateral_redistributed)?;
        self.collateral_gas_compensation = sum(
            self.collateral_gas_compensation,
            values.collateral_gas_compensation,
        )?;
        self.debt_gas_compensation =
            sum(self.debt_gas_compensation, values.debt_gas_compensation)?;
        self.collateral_surplus = sum(self.collateral_surplus, values.collateral_surplus)?;
        Ok(())
    }

    fn is_empty(&self) -> bool {
        self.liquidated == 0 && self.partially_liquidated == 0
    }
}

/// Gas compensation comes off the collateral first. The rest is offset against up to
/// `pool_deposits` of the debt and the remainder goes to redistribution.
fn split_offset_and_redistribution(
    config: &ProtocolConfig,
    collateral: i128,
    debt: i128,
    pool_deposits: i128,
) -> Result<LiquidationValues, Error> {
    let collateral_gas_compensation = collateral / config.coll_gas_comp_divisor;
    let to_liquidate = collateral - collateral_gas_compensation;
    let debt_offset = debt.min(pool_deposits.max(0));
    let collateral_to_pool = if debt_offset > 0 {
        mul_div(to_liquidate, debt_offset, debt)?
    } else {
        0
    };
    Ok(LiquidationValues {
        closed: true,
        debt_offset,
        collateral_to_pool,
        debt_redistributed: debt - debt_offset,
        collateral_redistributed: to_liquidate - collateral_to_pool,
        collateral_gas_compensation,
        debt_gas_compensation: config.gas_compensation,
        collateral_surplus: 0,
    })
}

/// Recovery mode liquidation of a trove at or above the minimum ratio: the pool only
/// receives collateral worth `debt * mcr`, the owner keeps the rest as a claimable surplus.
fn capped_offset(
    config: &ProtocolConfig,
    collateral: i128,
    debt: i128,
    price: i128,
) -> Result<LiquidationValues, Error> {
    let capped = mul_div(debt, config.mcr, price)?.min(collateral);
    let collateral_gas_compensation = capped / config.coll_gas_comp_divisor;
    Ok(LiquidationValues {
        closed: true,
        debt_offset: debt,
        collateral_to_pool: capped - collateral_gas_compensation,
        debt_redistributed: 0,
        collateral_redistributed: 0,
        collateral_gas_compensation,
        debt_gas_compensation: config.gas_compensation,
        collateral_surplus: collateral - capped,
    })
}

fn publish_liquidation(
    env: &Env,
    owner: &Address,
    collateral: i128,
    debt: i128,
    values: &LiquidationValues,
    price: i128,
) {
    TroveLiquidated {
        owner: owner.clone(),
        collateral,
        debt,
        debt_offset: values.debt_offset,
        collateral_to_pool: values.collateral_to_pool,
        debt_redistributed: values.debt_redistributed,
        collateral_redistributed: values.collateral_redistributed,
        collateral_surplus: values.collateral_surplus,
        price,
        ledger: env.ledger().sequence(),
        timestamp: env.ledger().timestamp(),
    }
    .publish(env);
}

/// The only staked trove cannot redistribute to anyone. Whatever the pool can absorb is
/// offset and the rest stays in the trove, which remains open.
fn offset_sole_trove(
    env: &Env,
    config: &ProtocolConfig,
    state: &mut ProtocolState,
    owner: &Address,
    mut trove: Trove,
    price: i128,
) -> Result<LiquidationValues, Error> {
    let (collateral, debt) = (trove.collateral, trove.debt);
    let debt_offset = debt.min(state.pool.total_deposits);
    if debt_offset == 0 {
        return Err(Error::NotLiquidatable);
    }
    let collateral_to_pool = mul_div(collateral, debt_offset, debt)?;
    stability_pool::offset(env, config, state, debt_offset, collateral_to_pool)?;

    trove.collateral = collateral - collateral_to_pool;
    trove.debt = debt - debt_offset;
    state.totals.change(0, -collateral_to_pool, -debt_offset)?;
    update_stake(&mut state.totals, &mut trove)?;
    state.sorted.re_insert(
        env,
        owner,
        nominal_ratio(trove.collateral, trove.debt)?,
        None,
        None,
    )?;
    save_trove(env, owner, &trove, TroveOperation::Liquidate);

    let values = LiquidationValues {
        closed: false,
        debt_offset,
        collateral_to_pool,
        debt_redistributed: 0,
        collateral_redistributed: 0,
        collateral_gas_compensation: 0,
        debt_gas_compensation: 0,
        collateral_surplus: 0,
    };
    publish_liquidation(env, owner, collateral, debt, &values, price);
    Ok(values)
}

fn liquidate_trove(
    env: &Env,
    config: &ProtocolConfig,
    state: &mut ProtocolState,
    owner: &Address,
    price: i128,
) -> Result<LiquidationValues, Error> {
    let trove = load_open_trove(env, state, owner)?;
    let (collateral, debt) = (trove.collateral, trove.debt);
    let icr = collateral_ratio(collateral, debt, price)?;
    let tcr = state.totals.tcr(price)?;
    let recovery = tcr < config.ccr;
    let pool_deposits = state.pool.total_deposits;

    let values = if recovery && icr <= DECIMAL_PRECISION {
        split_offset_and_redistribution(config, collateral, debt, 0)?
    } else if icr < config.mcr {
        split_offset_and_redistribution(config, collateral, debt, pool_deposits)?
    } else if recovery && icr < tcr && debt <= pool_deposits {
        capped_offset(config, collateral, debt, price)?
    } else {
        return Err(Error::NotLiquidatable);
    };

    let other_stakes = state.totals.total_stakes - trove.stake;
    let values = if other_stakes == 0
        && (values.debt_redistributed > 0 || values.collateral_redistributed > 0)
    {
        // nobody to redistribute to, so the pool takes whatever it can
        if debt > pool_deposits {
            return offset_sole_trove(env, config, state, owner, trove, price);
        }
        split_offset_and_redistribution(config, collateral, debt, pool_deposits)?
    } else {
        values
    };

    stability_pool::offset(
        env,
        config,
        state,
        values.debt_offset,
        values.collateral_to_pool,
    )?;
    state.totals.redistribute(
        values.collateral_redistributed,
        values.debt_redistributed,
        other_stakes,
    )?;

    let collateral_removed = values
        .collateral_to_pool
        .checked_add(values.collateral_gas_compensation)
        .and_then(|removed| removed.checked_add(values.collateral_surplus))
        .ok_or(Error::Overflow)?;
    state
        .totals
        .change(-trove.stake, -collateral_removed, -values.debt_offset)?;
    add_surplus(env, owner, values.collateral_surplus)?;
    close_trove_record(
        env,
        state,
        owner,
        TroveStatus::ClosedByLiquidation,
        TroveOperation::Liquidate,
    )?;

    publish_liquidation(env, owner, collateral, debt, &values, price);
    Ok(values)
}

fn finish_liquidation(
    env: &Env,
    state: &mut ProtocolState,
    liquidator: &Address,
    totals: &LiquidationTotals,
) -> Result<(), Error> {
    if totals.is_empty() {
        return Err(Error::NotLiquidatable);
    }
    state.totals.update_snapshots(env);

    let protocol = token_ledger::protocol(env);
    token_ledger::transfer_debt(env, &protocol, liquidator, totals.debt_gas_compensation);
    token_ledger::transfer_collateral(
        env,
        &protocol,
        liquidator,
        totals.collateral_gas_compensation,
    );
    Ok(())
}

pub fn liquidate(
    env: &Env,
    config: &ProtocolConfig,
    state: &mut ProtocolState,
    liquidator: &Address,
    owner: &Address,
    price: i128,
) -> Result<LiquidationTotals, Error> {
    let mut totals = LiquidationTotals::default();
    let values = liquidate_trove(env, config, state, owner, price)?;
    totals.add(&values)?;
    finish_liquidation(env, state, liquidator, &totals)?;
    Ok(totals)
}

/// Liquidates every eligible trove in `owners`. Troves that are closed or healthy are skipped.
pub fn batch_liquidate(
    env: &Env,
    config: &ProtocolConfig,
    state: &mut ProtocolState,
    liquidator: &Address,
    owners: &Vec<Address>,
    price: i128,
) -> Result<LiquidationTotals, Error> {
    let mut totals = LiquidationTotals::default();
    for owner in owners.iter() {
        match liquidate_trove(env, config, state, &owner, price) {
            Ok(values) => totals.add(&values)?,
            Err(Error::NotLiquidatable | Error::NotOpen) => continue,
            Err(err) => return Err(err),
        }
    }
    finish_liquidation(env, state, liquidator, &totals)?;
    Ok(totals)
}

/// Walks up to `count` troves from the lowest ratio. Outside recovery mode the walk ends at
/// the first healthy trove; in recovery mode troves the pool cannot cover are skipped.
pub fn liquidate_troves(
    env: &Env,
    config: &ProtocolConfig,
    state: &mut ProtocolState,
    liquidator: &Address,
    count: u32,
    price: i128,
) -> Result<LiquidationTotals, Error> {
    let mut totals = LiquidationTotals::default();
    let mut cursor = state.sorted.last();
    let mut visited = 0;
    while visited < count {
        let Some(owner) = cursor else {
            break;
        };
        let next = state.sorted.prev(env, &owner);
        match liquidate_trove(env, config, state, &owner, price) {
            Ok(values) => totals.add(&values)?,
            Err(Error::NotLiquidatable) => {
                if !state.totals.is_recovery_mode(config, price)? {
                    break;
                }
            }
            Err(err) => return Err(err),
        }
        cursor = next;
        visited += 1;
    }
    finish_liquidation(env, state, liquidator, &totals)?;
    Ok(totals)
}

/// One trove's share of a redemption, computed before anything is written
#[contracttype(export = false)]
#[derive(Clone)]
struct RedemptionStep {
    owner: Address,
    trove: Trove,
    debt_lot: i128,
    collateral_lot: i128,
    closes: bool,
}

fn apply_redemption_step(
    env: &Env,
    state: &mut ProtocolState,
    step: RedemptionStep,
    upper_hint: &Option<Address>,
    lower_hint: &Option<Address>,
) -> Result<(), Error> {
    let RedemptionStep {
        owner,
        mut trove,
        debt_lot,
        collateral_lot,
        closes,
    } = step;
    trove.debt -= debt_lot;
    trove.collateral -= collateral_lot;

    if closes {
        // only the gas compensation is left, it is burned from the gas pool
        let surplus = trove.collateral;
        state.totals.change(
            -trove.stake,
            -(collateral_lot + surplus),
            -(debt_lot + trove.debt),
        )?;
        token_ledger::burn_debt(env, &token_ledger::protocol(env), trove.debt);
        add_surplus(env, &owner, surplus)?;
        close_trove_record(
            env,
            state,
            &owner,
            TroveStatus::ClosedByRedemption,
            TroveOperation::Redeem,
        )
    } else {
        state.totals.change(0, -collateral_lot, -debt_lot)?;
        update_stake(&mut state.totals, &mut trove)?;
        state.sorted.re_insert(
            env,
            &owner,
            nominal_ratio(trove.collateral, trove.debt)?,
            upper_hint.clone(),
            lower_hint.clone(),
        )?;
        save_trove(env, &owner, &trove, TroveOperation::Redeem);
        Ok(())
    }
}

/// Redeems `amount` debt tokens against the troves with the lowest collateral ratio.
///
/// The walk skips troves below the minimum ratio and stops when the amount is used up,
/// after `max_iterations` troves (zero for no limit), or at a partial redemption that
/// would leave less than the minimum net debt. Every trove is planned before the fee
/// tolerance is checked and anything is written.
#[allow(clippy::too_many_arguments)]
pub fn redeem_collateral(
    env: &Env,
    config: &ProtocolConfig,
    state: &mut ProtocolState,
    redeemer: &Address,
    amount: i128,
    max_iterations: u32,
    max_fee: i128,
    price: i128,
    upper_hint: Option<Address>,
    lower_hint: Option<Address>,
) -> Result<RedemptionTotals, Error> {
    if amount <= 0 {
        return Err(Error::InvalidAmount);
    }
    fees::validate_max_fee(max_fee, config.redemption_fee_floor, false)?;
    if state.totals.tcr(price)? < config.mcr {
        return Err(Error::TcrBelowMinimum);
    }

    let mut cursor = state.sorted.last();
    while let Some(id) = cursor.clone() {
        if current_icr(env, state, &id, price)? >= config.mcr {
            break;
        }
        cursor = state.sorted.prev(env, &id);
    }

    let mut steps: Vec<RedemptionStep> = Vec::new(env);
    let mut totals = RedemptionTotals::default();
    let mut remaining = amount;
    while let Some(owner) = cursor {
        if remaining == 0 || (max_iterations != 0 && steps.len() >= max_iterations) {
            break;
        }
        let next = state.sorted.prev(env, &owner);
        let trove = load_open_trove(env, state, &owner)?;
        let net_debt = trove.debt - config.gas_compensation;
        if net_debt <= 0 {
            cursor = next;
            continue;
        }

        let debt_lot = remaining.min(net_debt);
        let collateral_lot = mul_div(debt_lot, DECIMAL_PRECISION, price)?.min(trove.collateral);
        let net_debt_left = net_debt - debt_lot;
        let closes = net_debt_left == 0;
        if !closes && net_debt_left < config.min_net_debt {
            break;
        }

        remaining -= debt_lot;
        totals.collateral_drawn = totals
            .collateral_drawn
            .checked_add(collateral_lot)
            .ok_or(Error::Overflow)?;
        totals.troves_redeemed += 1;
        if closes {
            totals.troves_closed += 1;
        }
        steps.push_back(RedemptionStep {
            owner,
            trove,
            debt_lot,
            collateral_lot,
            closes,
        });
        cursor = next;
    }

    totals.debt_redeemed = amount - remaining;
    if totals.debt_redeemed == 0 {
        return Err(Error::RedemptionAmountTooSmall);
    }
    totals.collateral_fee = fees::redemption_fee(
        env,
        config,
        &mut state.fees,
        totals.collateral_drawn,
        totals.debt_redeemed,
        state.totals.total_debt,
        max_fee,
        env.ledger().timestamp(),
    )?;

    for step in steps.iter() {
        apply_redemption_step(env, state, step, &upper_hint, &lower_hint)?;
    }

    let protocol = token_ledger::protocol(env);
    token_ledger::burn_debt(env, redeemer, totals.debt_redeemed);
    token_ledger::transfer_collateral(
        env,
        &protocol,
        redeemer,
        totals.collateral_drawn - totals.collateral_fee,
    );
    staking::increase_collateral_fee(env, &mut state.staking, totals.collateral_fee)?;

    Redemption {
        redeemer: redeemer.clone(),
        requested: amount,
        debt_redeemed: totals.debt_redeemed,
        collateral_drawn: totals.collateral_drawn,
        collateral_fee: totals.collateral_fee,
        price,
        ledger: env.ledger().sequence(),
        timestamp: env.ledger().timestamp(),
    }
    .publish(env);
    Ok(totals)
}

#[cfg(test)]
mod tests {
    use super::*;

    const E18: i128 = DECIMAL_PRECISION;

    #[test]
    fn test_ratios() {
        assert_eq!(
            collateral_ratio(10 * E18, 1010 * E18, 200 * E18),
            Ok(1_980_198_019_801_980_198)
        );
        assert_eq!(nominal_ratio(10 * E18, 1000 * E18), Ok(E18));
        assert_eq!(collateral_ratio(E18, 0, 200 * E18), Ok(i128::MAX));
        assert_eq!(nominal_ratio(0, 0), Ok(i128::MAX));
    }

    #[test]
    fn test_totals_change_and_stake() {
        let mut totals = SystemTotals::default();
        totals.change(10 * E18, 10 * E18, 1010 * E18).unwrap();
        assert_eq!(totals.tcr(100 * E18), Ok(990_099_009_900_990_099));
        assert_eq!(
            totals.tcr_after(E18, -10 * E18, 100 * E18),
            Ok(1_100_000_000_000_000_000)
        );
        assert_eq!(totals.change(0, i128::MAX, 0), Err(Error::Overflow));

        // no liquidation yet, so the stake is the collateral
        assert_eq!(totals.compute_stake(3 * E18), Ok(3 * E18));
        totals.total_stakes_snapshot = 10 * E18;
        totals.total_collateral_snapshot = 20 * E18;
        assert_eq!(totals.compute_stake(3 * E18), Ok(1_500_000_000_000_000_000));
    }
}
