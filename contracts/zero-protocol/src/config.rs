use soroban_sdk::{Address, Symbol, contracttype};

use crate::{Error, fixed_point::DECIMAL_PRECISION};

const PERCENT: i128 = DECIMAL_PRECISION / 100;

/// Protocol parameters. Ratios and rates are 18-decimal fixed point.
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProtocolConfig {
    /// SEP-40 style price feed for the collateral asset
    pub price_feed: Address,
    /// Symbol queried on the price feed
    pub collateral_asset: Symbol,
    /// Minimum collateral ratio for an individual trove
    pub mcr: i128,
    /// Total collateral ratio below which the system is in recovery mode
    pub ccr: i128,
    /// Debt reserved on every trove to pay liquidators
    pub gas_compensation: i128,
    /// Smallest debt a trove may carry on top of the gas compensation
    pub min_net_debt: i128,
    /// Liquidators also receive `collateral / coll_gas_comp_divisor`
    pub coll_gas_comp_divisor: i128,
    pub borrowing_fee_floor: i128,
    pub max_borrowing_fee: i128,
    pub redemption_fee_floor: i128,
    /// Per-minute decay applied to the base rate
    pub minute_decay_factor: i128,
    /// Redeemed fraction is divided by `beta` before it is added to the base rate
    pub beta: i128,
    /// Whether borrowing also raises the base rate by the borrowed fraction
    pub bump_on_borrow: bool,
    /// Total reward tokens the community issuance schedule converges to
    pub issuance_supply_cap: i128,
    /// Per-minute factor of the issuance schedule
    pub issuance_factor: i128,
}

impl ProtocolConfig {
    pub fn with_defaults(price_feed: Address, collateral_asset: Symbol) -> Self {
        ProtocolConfig {
            price_feed,
            collateral_asset,
            mcr: 110 * PERCENT,
            ccr: 150 * PERCENT,
            gas_compensation: 200 * DECIMAL_PRECISION,
            min_net_debt: 1_800 * DECIMAL_PRECISION,
            coll_gas_comp_divisor: 200,
            borrowing_fee_floor: PERCENT / 2,
            max_borrowing_fee: 5 * PERCENT,
            redemption_fee_floor: PERCENT / 2,
            minute_decay_factor: 999_037_758_833_783_000,
            beta: 2,
            bump_on_borrow: false,
            issuance_supply_cap: 32_000_000 * DECIMAL_PRECISION,
            issuance_factor: 999_998_681_227_695_000,
        }
    }

    pub fn validate(&self) -> Result<(), Error> {
        let rate_in_range = |rate: i128| (0..=DECIMAL_PRECISION).contains(&rate);
        let valid = self.mcr >= DECIMAL_PRECISION
            && self.ccr >= self.mcr
            && self.gas_compensation >= 0
            && self.min_net_debt > 0
            && self.coll_gas_comp_divisor > 0
            && rate_in_range(self.borrowing_fee_floor)
            && rate_in_range(self.max_borrowing_fee)
            && self.borrowing_fee_floor <= self.max_borrowing_fee
            && rate_in_range(self.redemption_fee_floor)
            && rate_in_range(self.minute_decay_factor)
            && self.beta > 0
            && self.issuance_supply_cap >= 0
            && rate_in_range(self.issuance_factor);
        if valid { Ok(()) } else { Err(Error::InvalidConfig) }
    }
}
