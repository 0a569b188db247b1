use soroban_sdk::{
    self, Address, BytesN, Env, Vec, contract, contractimpl, panic_with_error,
};

use crate::{
    Asset, Error, PriceData, PriceFeedClient,
    config::ProtocolConfig,
    stability_pool::{self, DepositView, FrontendView, IsStabilityPool, PoolState},
    staking::{self, IsStaking, StakeView, StakingState},
    storage::{self, ProtocolState},
    trove::{
        InsertPosition, IsBorrowerOperations, IsTroveManager, LiquidationTotals, PendingRewards,
        RedemptionTotals, TroveView,
    },
    trove_manager::{self, SystemTotals},
};

const VERSION_STRING: &str = concat!(
    env!("CARGO_PKG_VERSION_MAJOR"),
    ".",
    env!("CARGO_PKG_VERSION_MINOR"),
    ".",
    env!("CARGO_PKG_VERSION_PATCH")
);
const PRICE_DECIMALS: u32 = 18;

#[contract]
pub struct ZeroProtocol;

#[contractimpl]
impl ZeroProtocol {
    pub fn __constructor(env: &Env, admin: Address, config: ProtocolConfig) {
        if let Err(err) = config.validate() {
            panic_with_error!(env, err);
        }
        storage::set_admin(env, &admin);
        storage::set_config(env, &config);
        ProtocolState::new(env.ledger().timestamp()).save(env);
    }

    /// Upgrade the contract to new wasm. Admin-only.
    pub fn upgrade(env: &Env, new_wasm_hash: BytesN<32>) {
        Self::require_admin(env);
        env.deployer().update_current_contract_wasm(new_wasm_hash);
    }

    /// Replace the protocol parameters. Admin-only.
    pub fn set_config(env: &Env, config: ProtocolConfig) -> Result<(), Error> {
        Self::require_admin(env);
        config.validate()?;
        storage::set_config(env, &config);
        Ok(())
    }

    pub fn config(env: &Env) -> ProtocolConfig {
        storage::get_config(env)
    }

    pub fn admin(env: &Env) -> Option<Address> {
        storage::get_admin(env)
    }

    pub fn version(env: &Env) -> soroban_sdk::String {
        soroban_sdk::String::from_str(env, VERSION_STRING)
    }

    /// Collateral price in debt tokens, normalized to 18 decimals
    pub fn price(env: &Env) -> Result<i128, Error> {
        Self::fetch_price(env, &storage::get_config(env))
    }
}

impl ZeroProtocol {
    fn require_admin(env: &Env) {
        let Some(admin) = storage::get_admin(env) else {
            panic_with_error!(env, Error::NotInitialized);
        };
        admin.require_auth();
    }

    fn fetch_price(env: &Env, config: &ProtocolConfig) -> Result<i128, Error> {
        let client = PriceFeedClient::new(env, &config.price_feed);
        let Ok(Ok(decimals)) = client.try_decimals() else {
            return Err(Error::PriceUnavailable);
        };
        let asset = Asset::Other(config.collateral_asset.clone());
        let Ok(Ok(Some(PriceData { price, .. }))) = client.try_lastprice(&asset) else {
            return Err(Error::PriceUnavailable);
        };
        if price <= 0 {
            return Err(Error::PriceUnavailable);
        }

        let normalized = if decimals <= PRICE_DECIMALS {
            10i128
                .checked_pow(PRICE_DECIMALS - decimals)
                .and_then(|factor| price.checked_mul(factor))
        } else {
            10i128
                .checked_pow(decimals - PRICE_DECIMALS)
                .map(|factor| price / factor)
        };
        match normalized {
            Some(price) if price > 0 => Ok(price),
            _ => Err(Error::PriceUnavailable),
        }
    }

    fn now(env: &Env) -> u64 {
        env.ledger().timestamp()
    }
}

#[contractimpl]
impl IsBorrowerOperations for ZeroProtocol {
    fn open_trove(
        env: &Env,
        owner: Address,
        collateral: i128,
        debt: i128,
        max_fee: i128,
        upper_hint: Option<Address>,
        lower_hint: Option<Address>,
    ) -> Result<TroveView, Error> {
        owner.require_auth();
        let config = storage::get_config(env);
        let price = Self::fetch_price(env, &config)?;
        let mut state = ProtocolState::load(env);

        trove_manager::open_trove(
            env,
            &config,
            &mut state,
            &owner,
            collateral,
            debt,
            max_fee,
            price,
            upper_hint,
            lower_hint,
        )?;
        state.save(env);
        trove_manager::view(env, &state, &owner, price)
    }

    fn adjust_trove(
        env: &Env,
        owner: Address,
        collateral_change: i128,
        debt_change: i128,
        max_fee: i128,
        upper_hint: Option<Address>,
        lower_hint: Option<Address>,
    ) -> Result<TroveView, Error> {
        owner.require_auth();
        let config = storage::get_config(env);
        let price = Self::fetch_price(env, &config)?;
        let mut state = ProtocolState::load(env);

        trove_manager::adjust_trove(
            env,
            &config,
            &mut state,
            &owner,
            collateral_change,
            debt_change,
            max_fee,
            price,
            upper_hint,
            lower_hint,
        )?;
        state.save(env);
        trove_manager::view(env, &state, &owner, price)
    }

    fn close_trove(env: &Env, owner: Address) -> Result<(), Error> {
        owner.require_auth();
        let config = storage::get_config(env);
        let price = Self::fetch_price(env, &config)?;
        let mut state = ProtocolState::load(env);

        trove_manager::close_trove(env, &config, &mut state, &owner, price)?;
        state.save(env);
        Ok(())
    }

    fn apply_pending_rewards(env: &Env, owner: Address) -> Result<TroveView, Error> {
        owner.require_auth();
        let config = storage::get_config(env);
        let price = Self::fetch_price(env, &config)?;
        let state = ProtocolState::load(env);

        trove_manager::apply_pending_rewards(env, &state, &owner)?;
        trove_manager::view(env, &state, &owner, price)
    }

    fn claim_collateral(env: &Env, owner: Address) -> Result<i128, Error> {
        owner.require_auth();
        trove_manager::claim_collateral(env, &owner)
    }

    fn collateral_surplus(env: &Env, owner: Address) -> i128 {
        storage::get_surplus(env, &owner)
    }
}

#[contractimpl]
impl IsTroveManager for ZeroProtocol {
    fn liquidate(
        env: &Env,
        liquidator: Address,
        owner: Address,
    ) -> Result<LiquidationTotals, Error> {
        liquidator.require_auth();
        let config = storage::get_config(env);
        let price = Self::fetch_price(env, &config)?;
        let mut state = ProtocolState::load(env);

        let totals =
            trove_manager::liquidate(env, &config, &mut state, &liquidator, &owner, price)?;
        state.save(env);
        Ok(totals)
    }

    fn batch_liquidate(
        env: &Env,
        liquidator: Address,
        owners: Vec<Address>,
    ) -> Result<LiquidationTotals, Error> {
        liquidator.require_auth();
        let config = storage::get_config(env);
        let price = Self::fetch_price(env, &config)?;
        let mut state = ProtocolState::load(env);

        let totals =
            trove_manager::batch_liquidate(env, &config, &mut state, &liquidator, &owners, price)?;
        state.save(env);
        Ok(totals)
    }

    fn liquidate_troves(
        env: &Env,
        liquidator: Address,
        count: u32,
    ) -> Result<LiquidationTotals, Error> {
        liquidator.require_auth();
        let config = storage::get_config(env);
        let price = Self::fetch_price(env, &config)?;
        let mut state = ProtocolState::load(env);

        let totals =
            trove_manager::liquidate_troves(env, &config, &mut state, &liquidator, count, price)?;
        state.save(env);
        Ok(totals)
    }

    fn redeem_collateral(
        env: &Env,
        redeemer: Address,
        amount: i128,
        max_iterations: u32,
        max_fee: i128,
        upper_hint: Option<Address>,
        lower_hint: Option<Address>,
    ) -> Result<RedemptionTotals, Error> {
        redeemer.require_auth();
        let config = storage::get_config(env);
        let price = Self::fetch_price(env, &config)?;
        let mut state = ProtocolState::load(env);

        let totals = trove_manager::redeem_collateral(
            env,
            &config,
            &mut state,
            &redeemer,
            amount,
            max_iterations,
            max_fee,
            price,
            upper_hint,
            lower_hint,
        )?;
        state.save(env);
        Ok(totals)
    }

    fn trove(env: &Env, owner: Address) -> Result<TroveView, Error> {
        let price = Self::price(env)?;
        trove_manager::view(env, &ProtocolState::load(env), &owner, price)
    }

    fn pending_rewards(env: &Env, owner: Address) -> Result<PendingRewards, Error> {
        let state = ProtocolState::load(env);
        state.totals.pending_rewards(&storage::get_trove(env, &owner))
    }

    fn nominal_icr(env: &Env, owner: Address) -> Result<i128, Error> {
        trove_manager::current_nicr(env, &ProtocolState::load(env), &owner)
    }

    fn current_icr(env: &Env, owner: Address) -> Result<i128, Error> {
        let price = Self::price(env)?;
        trove_manager::current_icr(env, &ProtocolState::load(env), &owner, price)
    }

    fn tcr(env: &Env) -> Result<i128, Error> {
        let price = Self::price(env)?;
        ProtocolState::load(env).totals.tcr(price)
    }

    fn is_recovery_mode(env: &Env) -> Result<bool, Error> {
        let config = storage::get_config(env);
        let price = Self::fetch_price(env, &config)?;
        ProtocolState::load(env).totals.is_recovery_mode(&config, price)
    }

    fn system_totals(env: &Env) -> SystemTotals {
        ProtocolState::load(env).totals
    }

    fn base_rate(env: &Env) -> Result<i128, Error> {
        let config = storage::get_config(env);
        ProtocolState::load(env)
            .fees
            .decayed_base_rate(&config, Self::now(env))
    }

    fn borrowing_rate(env: &Env) -> Result<i128, Error> {
        let config = storage::get_config(env);
        ProtocolState::load(env)
            .fees
            .borrowing_rate(&config, Self::now(env))
    }

    fn redemption_rate(env: &Env) -> Result<i128, Error> {
        let config = storage::get_config(env);
        ProtocolState::load(env)
            .fees
            .redemption_rate(&config, Self::now(env))
    }

    fn first_trove(env: &Env) -> Option<Address> {
        ProtocolState::load(env).sorted.first()
    }

    fn last_trove(env: &Env) -> Option<Address> {
        ProtocolState::load(env).sorted.last()
    }

    fn next_trove(env: &Env, id: Address) -> Option<Address> {
        ProtocolState::load(env).sorted.next(env, &id)
    }

    fn prev_trove(env: &Env, id: Address) -> Option<Address> {
        ProtocolState::load(env).sorted.prev(env, &id)
    }

    fn trove_count(env: &Env) -> u32 {
        ProtocolState::load(env).sorted.size
    }

    fn find_insert_position(
        env: &Env,
        nicr: i128,
        prev_hint: Option<Address>,
        next_hint: Option<Address>,
    ) -> InsertPosition {
        let (prev, next) =
            ProtocolState::load(env)
                .sorted
                .find_insert_position(env, nicr, prev_hint, next_hint);
        InsertPosition { prev, next }
    }
}

#[contractimpl]
impl IsStabilityPool for ZeroProtocol {
    fn provide_to_sp(
        env: &Env,
        owner: Address,
        amount: i128,
        frontend: Option<Address>,
    ) -> Result<DepositView, Error> {
        owner.require_auth();
        let config = storage::get_config(env);
        let mut state = ProtocolState::load(env);

        let view = stability_pool::provide(env, &config, &mut state, &owner, amount, frontend)?;
        state.save(env);
        Ok(view)
    }

    fn withdraw_from_sp(env: &Env, owner: Address, amount: i128) -> Result<DepositView, Error> {
        owner.require_auth();
        let config = storage::get_config(env);
        let price = Self::fetch_price(env, &config)?;
        let mut state = ProtocolState::load(env);

        let view =
            stability_pool::withdraw(env, &config, &mut state, &owner, amount, false, price)?;
        state.save(env);
        Ok(view)
    }

    fn withdraw_all_from_sp(env: &Env, owner: Address) -> Result<DepositView, Error> {
        owner.require_auth();
        let config = storage::get_config(env);
        let price = Self::fetch_price(env, &config)?;
        let mut state = ProtocolState::load(env);

        let view = stability_pool::withdraw(env, &config, &mut state, &owner, 0, true, price)?;
        state.save(env);
        Ok(view)
    }

    fn register_frontend(env: &Env, frontend: Address, kickback_rate: i128) -> Result<(), Error> {
        frontend.require_auth();
        let state = ProtocolState::load(env);
        stability_pool::register_frontend(env, &state, &frontend, kickback_rate)
    }

    fn deposit(env: &Env, owner: Address) -> Result<DepositView, Error> {
        stability_pool::deposit_view(env, &ProtocolState::load(env), &owner)
    }

    fn frontend(env: &Env, frontend: Address) -> Result<FrontendView, Error> {
        stability_pool::frontend_view(env, &ProtocolState::load(env), &frontend)
    }

    fn pool_state(env: &Env) -> PoolState {
        ProtocolState::load(env).pool
    }
}

#[contractimpl]
impl IsStaking for ZeroProtocol {
    fn stake(env: &Env, owner: Address, amount: i128) -> Result<StakeView, Error> {
        owner.require_auth();
        let mut state = ProtocolState::load(env);
        let view = staking::stake(env, &mut state, &owner, amount)?;
        state.save(env);
        Ok(view)
    }

    fn unstake(env: &Env, owner: Address, amount: i128) -> Result<StakeView, Error> {
        owner.require_auth();
        let mut state = ProtocolState::load(env);
        let view = staking::unstake(env, &mut state, &owner, amount)?;
        state.save(env);
        Ok(view)
    }

    fn claim_staking_gains(env: &Env, owner: Address) -> Result<StakeView, Error> {
        Self::unstake(env, owner, 0)
    }

    fn stake_of(env: &Env, owner: Address) -> Result<StakeView, Error> {
        ProtocolState::load(env)
            .staking
            .view(&storage::get_stake(env, &owner))
    }

    fn total_staked(env: &Env) -> i128 {
        ProtocolState::load(env).staking.total_staked
    }

    fn staking_state(env: &Env) -> StakingState {
        ProtocolState::load(env).staking
    }
}

