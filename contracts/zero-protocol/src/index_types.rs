use crate::trove::{TroveOperation, TroveStatus};
use soroban_sdk::{Address, contractevent};

#[contractevent(topics = ["trove"])]
pub struct TroveUpdated {
    #[topic]
    pub owner: Address,
    pub collateral: i128,
    pub debt: i128,
    pub stake: i128,
    pub status: TroveStatus,
    pub operation: TroveOperation,
    pub ledger: u32,
    pub timestamp: u64,
}

#[contractevent(topics = ["liquidation"])]
pub struct TroveLiquidated {
    #[topic]
    pub owner: Address,
    pub collateral: i128,
    pub debt: i128,
    pub debt_offset: i128,
    pub collateral_to_pool: i128,
    pub debt_redistributed: i128,
    pub collateral_redistributed: i128,
    pub collateral_surplus: i128,
    pub price: i128,
    pub ledger: u32,
    pub timestamp: u64,
}

#[contractevent(topics = ["redemption"])]
pub struct Redemption {
    #[topic]
    pub redeemer: Address,
    pub requested: i128,
    pub debt_redeemed: i128,
    pub collateral_drawn: i128,
    pub collateral_fee: i128,
    pub price: i128,
    pub ledger: u32,
    pub timestamp: u64,
}

#[contractevent(topics = ["totals"])]
pub struct TotalsUpdated {
    pub total_stakes_snapshot: i128,
    pub total_collateral_snapshot: i128,
    pub l_collateral: i128,
    pub l_debt: i128,
}

#[contractevent(topics = ["surplus"], data_format = "single-value")]
pub struct CollateralSurplus {
    #[topic]
    pub owner: Address,
    pub claimable: i128,
}

#[contractevent(topics = ["deposit"])]
pub struct DepositUpdated {
    #[topic]
    pub owner: Address,
    pub deposit: i128,
    pub collateral_gain: i128,
    pub p: i128,
    pub s: i128,
    pub g: i128,
    pub scale: u64,
    pub epoch: u64,
}

#[contractevent(topics = ["frontend"])]
pub struct FrontendRegistered {
    #[topic]
    pub frontend: Address,
    pub kickback_rate: i128,
}

#[contractevent(topics = ["frontend_stake"])]
pub struct FrontendStakeUpdated {
    #[topic]
    pub frontend: Address,
    pub stake: i128,
    pub p: i128,
    pub g: i128,
    pub scale: u64,
    pub epoch: u64,
}

#[contractevent(topics = ["pool"])]
pub struct PoolUpdated {
    pub total_deposits: i128,
    pub collateral_balance: i128,
    pub p: i128,
    pub s: i128,
    pub g: i128,
    pub scale: u64,
    pub epoch: u64,
}

#[contractevent(topics = ["epoch"], data_format = "single-value")]
pub struct EpochChanged {
    pub epoch: u64,
}

#[contractevent(topics = ["scale"], data_format = "single-value")]
pub struct ScaleChanged {
    pub scale: u64,
}

#[contractevent(topics = ["reward_issued"])]
pub struct RewardIssued {
    pub amount: i128,
    pub total_issued: i128,
}

#[contractevent(topics = ["stake"])]
pub struct StakeUpdated {
    #[topic]
    pub owner: Address,
    pub amount: i128,
    pub collateral_gain: i128,
    pub debt_gain: i128,
}

#[contractevent(topics = ["staking_fees"])]
pub struct StakingFeesUpdated {
    pub f_collateral: i128,
    pub f_debt: i128,
}

/// A fee arrived while nothing was staked; it does not reach any staker.
#[contractevent(topics = ["fee_forgone"])]
pub struct FeeForgone {
    pub collateral_fee: i128,
    pub debt_fee: i128,
}

#[contractevent(topics = ["base_rate"])]
pub struct BaseRateUpdated {
    pub base_rate: i128,
    pub last_fee_operation_time: u64,
}
