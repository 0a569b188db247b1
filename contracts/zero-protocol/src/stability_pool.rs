//! Stability pool deposits, liquidation offsets and gain tracking.
//!
//! Every offset multiplies the running product `P` by the fraction of deposits that
//! survive it, and adds the collateral gained per unit deposited, scaled by `P`, to the
//! sum `S` of the current `(epoch, scale)`. Reward issuance is tracked the same way in `G`.
//! A deposit therefore only needs a snapshot of `P`, `S`, `G`, scale and epoch to derive
//! its compounded value and gains at any later time:
//!
//! - compounded deposit = `d0 * P / P0`, divided by `SCALE_FACTOR` once per scale change,
//!   and zero after an epoch change or after two or more scale changes
//! - collateral gain = `d0 * (S[e0][s0] - S0 + S[e0][s0 + 1] / SCALE_FACTOR) / P0`
//!
//! When `P` would drop below `SCALE_FACTOR` it is multiplied by `SCALE_FACTOR` and the scale
//! increments. An offset that empties the pool starts a new epoch with `P` reset to one.

use soroban_sdk::{Address, Env, contracttype};

use crate::{
    Error,
    accumulator::Accumulator,
    community_issuance,
    config::ProtocolConfig,
    fixed_point::{DECIMAL_PRECISION, mul_div, mul_div_rem},
    index_types::{
        DepositUpdated, EpochChanged, FrontendRegistered, FrontendStakeUpdated, PoolUpdated,
        ScaleChanged,
    },
    storage::{self, Deposit, DepositSnapshot, Frontend, ProtocolState, ScaleSums},
    token_ledger,
    trove_manager,
};

pub const SCALE_FACTOR: i128 = 1_000_000_000;

/// Compounded values below `initial / PRECISION_GUARD` are treated as fully consumed
const PRECISION_GUARD: i128 = 1_000_000_000;

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PoolState {
    pub total_deposits: i128,
    /// Collateral gained from offsets and not yet paid out to depositors
    pub collateral_balance: i128,
    pub p: i128,
    pub scale: u64,
    pub epoch: u64,
    /// Collateral gain sum `S` of the current (epoch, scale)
    pub s: Accumulator,
    /// Reward gain sum `G` of the current (epoch, scale)
    pub g: Accumulator,
    /// Over-estimate carried by the last loss-per-unit, subtracted from the next one
    pub loss_error: i128,
}

impl Default for PoolState {
    fn default() -> Self {
        PoolState {
            total_deposits: 0,
            collateral_balance: 0,
            p: DECIMAL_PRECISION,
            scale: 0,
            epoch: 0,
            s: Accumulator::default(),
            g: Accumulator::default(),
            loss_error: 0,
        }
    }
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DepositView {
    pub initial_value: i128,
    pub current_value: i128,
    pub collateral_gain: i128,
    pub reward_gain: i128,
    pub frontend: Option<Address>,
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FrontendView {
    pub kickback_rate: i128,
    pub stake: i128,
    pub reward_gain: i128,
}

pub trait IsStabilityPool {
    /// Deposit debt tokens. `frontend` tags a first deposit and is ignored afterwards.
    fn provide_to_sp(
        env: &Env,
        owner: Address,
        amount: i128,
        frontend: Option<Address>,
    ) -> Result<DepositView, Error>;
    /// Withdraw part of the compounded deposit and collect gains. Zero only collects gains.
    fn withdraw_from_sp(env: &Env, owner: Address, amount: i128) -> Result<DepositView, Error>;
    /// Withdraw the whole compounded deposit and collect gains
    fn withdraw_all_from_sp(env: &Env, owner: Address) -> Result<DepositView, Error>;
    /// Register the caller as a frontend passing `kickback_rate` of reward gains to its depositors
    fn register_frontend(env: &Env, frontend: Address, kickback_rate: i128) -> Result<(), Error>;
    /// Compounded deposit and pending gains of `owner`
    fn deposit(env: &Env, owner: Address) -> Result<DepositView, Error>;
    fn frontend(env: &Env, frontend: Address) -> Result<FrontendView, Error>;
    fn pool_state(env: &Env) -> PoolState;
}

impl PoolState {
    fn snapshot(&self) -> DepositSnapshot {
        DepositSnapshot {
            p: self.p,
            s: self.s.value,
            g: self.g.value,
            scale: self.scale,
            epoch: self.epoch,
        }
    }

    fn sums_at(&self, env: &Env, epoch: u64, scale: u64) -> ScaleSums {
        if epoch == self.epoch && scale == self.scale {
            ScaleSums {
                s: self.s.value,
                g: self.g.value,
            }
        } else {
            storage::get_scale_sums(env, epoch, scale)
        }
    }

    /// Stores the sums of the current (epoch, scale) before it is left behind
    fn archive_sums(&self, env: &Env) {
        storage::set_scale_sums(
            env,
            self.epoch,
            self.scale,
            &ScaleSums {
                s: self.s.value,
                g: self.g.value,
            },
        );
    }

    fn compounded(&self, initial: i128, snapshot: &DepositSnapshot) -> Result<i128, Error> {
        if initial == 0 || snapshot.epoch < self.epoch {
            return Ok(0);
        }
        let compounded = match self.scale.saturating_sub(snapshot.scale) {
            0 => mul_div(initial, self.p, snapshot.p)?,
            1 => mul_div(initial, self.p, snapshot.p)? / SCALE_FACTOR,
            _ => 0,
        };
        if compounded < initial / PRECISION_GUARD {
            return Ok(0);
        }
        Ok(compounded)
    }

    fn gain(
        &self,
        env: &Env,
        initial: i128,
        snapshot: &DepositSnapshot,
        sum: impl Fn(&ScaleSums) -> i128,
        snapshot_sum: i128,
    ) -> Result<i128, Error> {
        if initial == 0 {
            return Ok(0);
        }
        let first = sum(&self.sums_at(env, snapshot.epoch, snapshot.scale));
        let second = sum(&self.sums_at(env, snapshot.epoch, snapshot.scale + 1)) / SCALE_FACTOR;
        let Some(delta) = first
            .checked_sub(snapshot_sum)
            .and_then(|first| first.checked_add(second))
        else {
            return Err(Error::Overflow);
        };
        mul_div(initial, delta, snapshot.p)
    }

    fn collateral_gain(
        &self,
        env: &Env,
        initial: i128,
        snapshot: &DepositSnapshot,
    ) -> Result<i128, Error> {
        self.gain(env, initial, snapshot, |sums| sums.s, snapshot.s)
    }

    fn reward_gain(
        &self,
        env: &Env,
        initial: i128,
        snapshot: &DepositSnapshot,
    ) -> Result<i128, Error> {
        self.gain(env, initial, snapshot, |sums| sums.g, snapshot.g)
    }

    /// Fraction of each deposit consumed by offsetting `debt`, rounded up.
    ///
    /// Rounding up keeps the sum of compounded deposits at or below the pool total. The
    /// over-estimate is remembered and subtracted from the next offset's numerator.
    fn loss_per_unit(&mut self, debt: i128, total: i128) -> Result<i128, Error> {
        if debt == total {
            self.loss_error = 0;
            return Ok(DECIMAL_PRECISION);
        }
        let (quotient, remainder) = mul_div_rem(debt, DECIMAL_PRECISION, total)?;

        // numerator = quotient * total + remainder - loss_error
        let mut quotient = quotient - self.loss_error / total;
        let mut remainder = remainder - self.loss_error % total;
        if remainder < 0 {
            quotient -= 1;
            remainder += total;
        }
        if quotient < 0 {
            // earlier over-estimates already cover this loss
            let Some(error) = quotient
                .checked_neg()
                .and_then(|q| q.checked_mul(total))
                .and_then(|e| e.checked_sub(remainder))
            else {
                return Err(Error::Overflow);
            };
            self.loss_error = error;
            return Ok(0);
        }

        let loss = quotient + 1;
        if loss >= DECIMAL_PRECISION {
            self.loss_error = 0;
            return Ok(DECIMAL_PRECISION);
        }
        self.loss_error = total - remainder;
        Ok(loss)
    }

    fn update_product(&mut self, env: &Env, loss_per_unit: i128) -> Result<(), Error> {
        let factor = DECIMAL_PRECISION - loss_per_unit;

        if factor == 0 {
            self.archive_sums(env);
            self.epoch += 1;
            self.scale = 0;
            self.p = DECIMAL_PRECISION;
            self.s = Accumulator::default();
            self.g = Accumulator::default();
            EpochChanged { epoch: self.epoch }.publish(env);
            return Ok(());
        }

        let new_p = mul_div(self.p, factor, DECIMAL_PRECISION)?;
        if new_p < SCALE_FACTOR {
            self.archive_sums(env);
            self.p = mul_div(self.p, factor, DECIMAL_PRECISION / SCALE_FACTOR)?;
            self.scale += 1;
            self.s.value = 0;
            self.g.value = 0;
            ScaleChanged { scale: self.scale }.publish(env);
        } else {
            self.p = new_p;
        }
        if self.p <= 0 {
            return Err(Error::Overflow);
        }
        Ok(())
    }

    fn publish(&self, env: &Env) {
        PoolUpdated {
            total_deposits: self.total_deposits,
            collateral_balance: self.collateral_balance,
            p: self.p,
            s: self.s.value,
            g: self.g.value,
            scale: self.scale,
            epoch: self.epoch,
        }
        .publish(env);
    }
}

/// Issues accrued rewards and spreads them over current deposits through `G`.
/// Rewards issued while the pool is empty are not distributed.
fn trigger_issuance(
    env: &Env,
    config: &ProtocolConfig,
    state: &mut ProtocolState,
) -> Result<(), Error> {
    let issued = community_issuance::issue(env, config, &mut state.issuance)?;
    let pool = &mut state.pool;
    if issued == 0 || pool.total_deposits == 0 {
        return Ok(());
    }
    let p = pool.p;
    pool.g.bump(issued, p, pool.total_deposits)?;
    Ok(())
}

/// Cancels `debt` against the pool's deposits and hands it `collateral` in return.
///
/// Does nothing when the pool is empty or there is no debt to offset.
pub fn offset(
    env: &Env,
    config: &ProtocolConfig,
    state: &mut ProtocolState,
    debt: i128,
    collateral: i128,
) -> Result<(), Error> {
    let total = state.pool.total_deposits;
    if total == 0 || debt == 0 {
        return Ok(());
    }
    if debt > total {
        return Err(Error::InsufficientDeposit);
    }
    trigger_issuance(env, config, state)?;

    let pool = &mut state.pool;
    let p = pool.p;
    pool.s.bump(collateral, p, total)?;
    let loss = pool.loss_per_unit(debt, total)?;
    pool.update_product(env, loss)?;

    pool.total_deposits = total - debt;
    let Some(balance) = pool.collateral_balance.checked_add(collateral) else {
        return Err(Error::Overflow);
    };
    pool.collateral_balance = balance;

    token_ledger::burn_debt(env, &token_ledger::protocol(env), debt);
    pool.publish(env);
    Ok(())
}

/// Pays out the reward gains owed to a depositor and to their frontend
fn pay_out_rewards(
    env: &Env,
    pool: &PoolState,
    owner: &Address,
    deposit: &Deposit,
    frontend: &Option<(Address, Frontend)>,
) -> Result<(), Error> {
    let reward = pool.reward_gain(env, deposit.initial_value, &deposit.snapshot)?;
    let protocol = token_ledger::protocol(env);

    let depositor_reward = match frontend {
        Some((address, frontend)) => {
            let frontend_gain = pool.reward_gain(env, frontend.stake, &frontend.snapshot)?;
            let frontend_reward = mul_div(
                frontend_gain,
                DECIMAL_PRECISION - frontend.kickback_rate,
                DECIMAL_PRECISION,
            )?;
            token_ledger::transfer_reward(env, &protocol, address, frontend_reward);
            mul_div(reward, frontend.kickback_rate, DECIMAL_PRECISION)?
        }
        None => reward,
    };
    token_ledger::transfer_reward(env, &protocol, owner, depositor_reward);
    Ok(())
}

fn load_frontend(env: &Env, tag: &Option<Address>) -> Result<Option<(Address, Frontend)>, Error> {
    match tag {
        Some(address) => match storage::get_frontend(env, address) {
            Some(frontend) => Ok(Some((address.clone(), frontend))),
            None => Err(Error::InvalidFrontend),
        },
        None => Ok(None),
    }
}

fn update_frontend_stake(
    env: &Env,
    pool: &PoolState,
    frontend: Option<(Address, Frontend)>,
    change: i128,
) -> Result<(), Error> {
    let Some((address, mut frontend)) = frontend else {
        return Ok(());
    };
    let compounded = pool.compounded(frontend.stake, &frontend.snapshot)?;
    let Some(stake) = compounded.checked_add(change) else {
        return Err(Error::Overflow);
    };
    // truncation can leave the frontend stake a unit short of its depositors' withdrawals
    frontend.stake = stake.max(0);
    frontend.snapshot = if frontend.stake == 0 {
        DepositSnapshot::default()
    } else {
        pool.snapshot()
    };
    storage::set_frontend(env, &address, &frontend);

    FrontendStakeUpdated {
        frontend: address,
        stake: frontend.stake,
        p: frontend.snapshot.p,
        g: frontend.snapshot.g,
        scale: frontend.snapshot.scale,
        epoch: frontend.snapshot.epoch,
    }
    .publish(env);
    Ok(())
}

fn save_deposit(
    env: &Env,
    pool: &PoolState,
    owner: &Address,
    value: i128,
    frontend: Option<Address>,
    collateral_gain: i128,
) {
    let deposit = if value == 0 {
        Deposit {
            initial_value: 0,
            frontend: None,
            snapshot: DepositSnapshot::default(),
        }
    } else {
        Deposit {
            initial_value: value,
            frontend,
            snapshot: pool.snapshot(),
        }
    };
    storage::set_deposit(env, owner, &deposit);

    DepositUpdated {
        owner: owner.clone(),
        deposit: value,
        collateral_gain,
        p: deposit.snapshot.p,
        s: deposit.snapshot.s,
        g: deposit.snapshot.g,
        scale: deposit.snapshot.scale,
        epoch: deposit.snapshot.epoch,
    }
    .publish(env);
}

fn empty_deposit() -> Deposit {
    Deposit {
        initial_value: 0,
        frontend: None,
        snapshot: DepositSnapshot::default(),
    }
}

fn pay_out_collateral(
    env: &Env,
    pool: &mut PoolState,
    owner: &Address,
    gain: i128,
) -> Result<(), Error> {
    let Some(balance) = pool.collateral_balance.checked_sub(gain) else {
        return Err(Error::Overflow);
    };
    pool.collateral_balance = balance;
    token_ledger::transfer_collateral(env, &token_ledger::protocol(env), owner, gain);
    Ok(())
}

pub fn provide(
    env: &Env,
    config: &ProtocolConfig,
    state: &mut ProtocolState,
    owner: &Address,
    amount: i128,
    frontend_tag: Option<Address>,
) -> Result<DepositView, Error> {
    if amount <= 0 {
        return Err(Error::InvalidAmount);
    }
    if storage::get_frontend(env, owner).is_some() {
        return Err(Error::InvalidFrontend);
    }
    load_frontend(env, &frontend_tag)?;

    trigger_issuance(env, config, state)?;

    let deposit = storage::get_deposit(env, owner).unwrap_or_else(empty_deposit);
    let tag = if deposit.initial_value == 0 {
        frontend_tag
    } else {
        deposit.frontend.clone()
    };
    let frontend = load_frontend(env, &tag)?;

    let pool = &mut state.pool;
    let collateral_gain = pool.collateral_gain(env, deposit.initial_value, &deposit.snapshot)?;
    let compounded = pool.compounded(deposit.initial_value, &deposit.snapshot)?;
    pay_out_rewards(env, pool, owner, &deposit, &frontend)?;
    update_frontend_stake(env, pool, frontend, amount)?;

    let Some(new_value) = compounded.checked_add(amount) else {
        return Err(Error::Overflow);
    };
    let Some(total) = pool.total_deposits.checked_add(amount) else {
        return Err(Error::Overflow);
    };
    pool.total_deposits = total;

    token_ledger::transfer_debt(env, owner, &token_ledger::protocol(env), amount);
    pay_out_collateral(env, pool, owner, collateral_gain)?;
    save_deposit(env, pool, owner, new_value, tag, collateral_gain);
    pool.publish(env);

    deposit_view(env, state, owner)
}

/// Withdraws `amount` from the compounded deposit, or all of it when `withdraw_all` is set.
pub fn withdraw(
    env: &Env,
    config: &ProtocolConfig,
    state: &mut ProtocolState,
    owner: &Address,
    amount: i128,
    withdraw_all: bool,
    price: i128,
) -> Result<DepositView, Error> {
    if amount < 0 {
        return Err(Error::InvalidAmount);
    }
    let Some(deposit) = storage::get_deposit(env, owner).filter(|d| d.initial_value > 0) else {
        return Err(Error::InsufficientDeposit);
    };
    if amount > 0 || withdraw_all {
        require_no_undercollateralized_troves(env, config, state, price)?;
    }

    trigger_issuance(env, config, state)?;
    let frontend = load_frontend(env, &deposit.frontend)?;

    let pool = &mut state.pool;
    let collateral_gain = pool.collateral_gain(env, deposit.initial_value, &deposit.snapshot)?;
    let compounded = pool.compounded(deposit.initial_value, &deposit.snapshot)?;
    let to_withdraw = if withdraw_all { compounded } else { amount };
    if to_withdraw > compounded {
        return Err(Error::InsufficientDeposit);
    }

    pay_out_rewards(env, pool, owner, &deposit, &frontend)?;
    update_frontend_stake(env, pool, frontend, -to_withdraw)?;

    let Some(total) = pool.total_deposits.checked_sub(to_withdraw) else {
        return Err(Error::Overflow);
    };
    pool.total_deposits = total;

    token_ledger::transfer_debt(env, &token_ledger::protocol(env), owner, to_withdraw);
    pay_out_collateral(env, pool, owner, collateral_gain)?;
    save_deposit(
        env,
        pool,
        owner,
        compounded - to_withdraw,
        deposit.frontend.clone(),
        collateral_gain,
    );
    pool.publish(env);

    deposit_view(env, state, owner)
}

fn require_no_undercollateralized_troves(
    env: &Env,
    config: &ProtocolConfig,
    state: &ProtocolState,
    price: i128,
) -> Result<(), Error> {
    if let Some(lowest) = state.sorted.last() {
        if trove_manager::current_icr(env, state, &lowest, price)? < config.mcr {
            return Err(Error::UndercollateralizedTroves);
        }
    }
    Ok(())
}

pub fn register_frontend(
    env: &Env,
    state: &ProtocolState,
    frontend: &Address,
    kickback_rate: i128,
) -> Result<(), Error> {
    if storage::get_frontend(env, frontend).is_some() {
        return Err(Error::InvalidFrontend);
    }
    if storage::get_deposit(env, frontend).is_some_and(|d| d.initial_value > 0) {
        return Err(Error::InvalidFrontend);
    }
    if !(0..=DECIMAL_PRECISION).contains(&kickback_rate) {
        return Err(Error::InvalidAmount);
    }

    storage::set_frontend(
        env,
        frontend,
        &Frontend {
            kickback_rate,
            stake: 0,
            snapshot: state.pool.snapshot(),
        },
    );
    FrontendRegistered {
        frontend: frontend.clone(),
        kickback_rate,
    }
    .publish(env);
    Ok(())
}

pub fn deposit_view(
    env: &Env,
    state: &ProtocolState,
    owner: &Address,
) -> Result<DepositView, Error> {
    let pool = &state.pool;
    let deposit = storage::get_deposit(env, owner).unwrap_or_else(empty_deposit);
    let reward = pool.reward_gain(env, deposit.initial_value, &deposit.snapshot)?;
    let reward_gain = match load_frontend(env, &deposit.frontend)? {
        Some((_, frontend)) => mul_div(reward, frontend.kickback_rate, DECIMAL_PRECISION)?,
        None => reward,
    };
    Ok(DepositView {
        initial_value: deposit.initial_value,
        current_value: pool.compounded(deposit.initial_value, &deposit.snapshot)?,
        collateral_gain: pool.collateral_gain(env, deposit.initial_value, &deposit.snapshot)?,
        reward_gain,
        frontend: deposit.frontend,
    })
}

pub fn frontend_view(
    env: &Env,
    state: &ProtocolState,
    address: &Address,
) -> Result<FrontendView, Error> {
    let Some((_, frontend)) = load_frontend(env, &Some(address.clone()))? else {
        return Err(Error::InvalidFrontend);
    };
    let pool = &state.pool;
    let gain = pool.reward_gain(env, frontend.stake, &frontend.snapshot)?;
    Ok(FrontendView {
        kickback_rate: frontend.kickback_rate,
        stake: pool.compounded(frontend.stake, &frontend.snapshot)?,
        reward_gain: mul_div(gain, DECIMAL_PRECISION - frontend.kickback_rate, DECIMAL_PRECISION)?,
    })
}
