use soroban_sdk::{Address, Env, Vec, contracttype};

use crate::{Error, trove_manager::SystemTotals};

#[contracttype]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TroveStatus {
    /// Never opened. Closed troves may reopen as if they were in this state.
    NonExistent,
    /// Carries collateral and debt, and sits in the sorted trove index.
    Open,
    /// Closed by the owner after repaying its net debt.
    ClosedByOwner,
    /// Liquidated against the stability pool and/or redistributed to the other troves.
    ClosedByLiquidation,
    /// Net debt fully redeemed; any remaining collateral became a claimable surplus.
    ClosedByRedemption,
}

#[contracttype]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TroveOperation {
    Open,
    Adjust,
    Close,
    ApplyRewards,
    Liquidate,
    Redeem,
}

/// Trove with pending redistribution rewards applied, priced at the current feed price.
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TroveView {
    pub owner: Address,
    pub collateral: i128,
    pub debt: i128,
    pub stake: i128,
    pub status: TroveStatus,
    /// Individual collateral ratio
    pub icr: i128,
    /// Nominal collateral ratio, the sorted index key
    pub nicr: i128,
}

#[contracttype]
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct PendingRewards {
    pub collateral: i128,
    pub debt: i128,
}

#[contracttype]
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct LiquidationTotals {
    /// Troves closed by the liquidation
    pub liquidated: u32,
    /// Troves that could only be partially offset and stay open
    pub partially_liquidated: u32,
    pub debt_offset: i128,
    pub collateral_to_pool: i128,
    pub debt_redistributed: i128,
    pub collateral_redistributed: i128,
    pub collateral_gas_compensation: i128,
    pub debt_gas_compensation: i128,
    pub collateral_surplus: i128,
}

#[contracttype]
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RedemptionTotals {
    pub debt_redeemed: i128,
    pub collateral_drawn: i128,
    pub collateral_fee: i128,
    pub troves_redeemed: u32,
    pub troves_closed: u32,
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InsertPosition {
    pub prev: Option<Address>,
    pub next: Option<Address>,
}

/// Borrower-facing trove operations. The price is read from the configured feed.
pub trait IsBorrowerOperations {
    /// Open a trove, drawing `debt` for the owner. A borrowing fee and the gas compensation
    /// are added on top of it. `upper_hint`/`lower_hint` are the expected neighbours in the
    /// sorted index.
    fn open_trove(
        env: &Env,
        owner: Address,
        collateral: i128,
        debt: i128,
        max_fee: i128,
        upper_hint: Option<Address>,
        lower_hint: Option<Address>,
    ) -> Result<TroveView, Error>;

    /// Add or withdraw collateral and draw or repay debt in one step.
    /// Positive changes add to the trove, negative changes take from it.
    fn adjust_trove(
        env: &Env,
        owner: Address,
        collateral_change: i128,
        debt_change: i128,
        max_fee: i128,
        upper_hint: Option<Address>,
        lower_hint: Option<Address>,
    ) -> Result<TroveView, Error>;

    /// Close a trove whose net debt has been repaid, returning its collateral
    fn close_trove(env: &Env, owner: Address) -> Result<(), Error>;

    /// Move pending redistribution rewards into the trove record
    fn apply_pending_rewards(env: &Env, owner: Address) -> Result<TroveView, Error>;

    /// Claim collateral left over from a liquidation in recovery mode or a full redemption
    fn claim_collateral(env: &Env, owner: Address) -> Result<i128, Error>;

    /// Collateral currently claimable by `owner`
    fn collateral_surplus(env: &Env, owner: Address) -> i128;
}

/// Liquidation, redemption and system-wide queries.
pub trait IsTroveManager {
    /// Liquidate a single trove
    fn liquidate(
        env: &Env,
        liquidator: Address,
        owner: Address,
    ) -> Result<LiquidationTotals, Error>;

    /// Liquidate every eligible trove in `owners`, skipping the rest
    fn batch_liquidate(
        env: &Env,
        liquidator: Address,
        owners: Vec<Address>,
    ) -> Result<LiquidationTotals, Error>;

    /// Liquidate up to `count` troves starting from the lowest collateral ratio
    fn liquidate_troves(
        env: &Env,
        liquidator: Address,
        count: u32,
    ) -> Result<LiquidationTotals, Error>;

    /// Exchange `amount` debt tokens for collateral at face value, starting from the trove
    /// with the lowest collateral ratio. `max_iterations` of zero means no limit. The hints
    /// position a trove that is only partially redeemed.
    fn redeem_collateral(
        env: &Env,
        redeemer: Address,
        amount: i128,
        max_iterations: u32,
        max_fee: i128,
        upper_hint: Option<Address>,
        lower_hint: Option<Address>,
    ) -> Result<RedemptionTotals, Error>;

    /// Trove of `owner` with pending rewards applied
    fn trove(env: &Env, owner: Address) -> Result<TroveView, Error>;

    /// Redistribution rewards not yet applied to the trove
    fn pending_rewards(env: &Env, owner: Address) -> Result<PendingRewards, Error>;

    fn nominal_icr(env: &Env, owner: Address) -> Result<i128, Error>;

    fn current_icr(env: &Env, owner: Address) -> Result<i128, Error>;

    /// Total collateral ratio of the system
    fn tcr(env: &Env) -> Result<i128, Error>;

    fn is_recovery_mode(env: &Env) -> Result<bool, Error>;

    fn system_totals(env: &Env) -> SystemTotals;

    /// Base rate decayed to the current time
    fn base_rate(env: &Env) -> Result<i128, Error>;

    fn borrowing_rate(env: &Env) -> Result<i128, Error>;

    fn redemption_rate(env: &Env) -> Result<i128, Error>;

    /// Trove with the highest nominal collateral ratio
    fn first_trove(env: &Env) -> Option<Address>;

    /// Trove with the lowest nominal collateral ratio
    fn last_trove(env: &Env) -> Option<Address>;

    /// Next trove towards lower collateral ratios
    fn next_trove(env: &Env, id: Address) -> Option<Address>;

    /// Previous trove towards higher collateral ratios
    fn prev_trove(env: &Env, id: Address) -> Option<Address>;

    fn trove_count(env: &Env) -> u32;

    /// Neighbours a trove with `nicr` would be inserted between, starting from the hints
    fn find_insert_position(
        env: &Env,
        nicr: i128,
        prev_hint: Option<Address>,
        next_hint: Option<Address>,
    ) -> InsertPosition;
}
