use soroban_sdk::{Address, Env, Symbol, contracttype, panic_with_error, symbol_short};

use crate::{
    Error,
    community_issuance::IssuanceState,
    config::ProtocolConfig,
    fees::FeeState,
    sorted_troves::SortedList,
    stability_pool::PoolState,
    staking::StakingState,
    trove::TroveStatus,
    trove_manager::SystemTotals,
};

// Persistent storage keys
#[contracttype]
pub enum DataKey {
    /// Trove of each owner; one per address
    Trove(Address),
    /// Sorted trove index node of each open trove
    SortedNode(Address),
    /// Stability pool deposit of each depositor
    Deposit(Address),
    /// Registered frontends and their aggregate stake
    Frontend(Address),
    /// Fee staking position of each staker
    Stake(Address),
    /// S and G sums of a finished (epoch, scale)
    ScaleSums(u64, u64),
    /// Collateral left over from liquidations and redemptions, claimable by the owner
    Surplus(Address),
}

const ADMIN_KEY: Symbol = symbol_short!("ADMIN");

// Instance storage
const CONFIG: Symbol = symbol_short!("CONFIG");
const STORAGE: Symbol = symbol_short!("STORAGE");

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Trove {
    pub collateral: i128,
    /// Composite debt, gas compensation included
    pub debt: i128,
    pub stake: i128,
    pub l_collateral_snapshot: i128,
    pub l_debt_snapshot: i128,
    pub status: TroveStatus,
}

impl Default for Trove {
    fn default() -> Self {
        Trove {
            collateral: 0,
            debt: 0,
            stake: 0,
            l_collateral_snapshot: 0,
            l_debt_snapshot: 0,
            status: TroveStatus::NonExistent,
        }
    }
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SortedNode {
    /// Nominal collateral ratio the node was inserted with
    pub nicr: i128,
    pub prev: Option<Address>,
    pub next: Option<Address>,
}

/// Pool globals at the time a deposit or frontend stake last changed
#[contracttype]
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct DepositSnapshot {
    pub p: i128,
    pub s: i128,
    pub g: i128,
    pub scale: u64,
    pub epoch: u64,
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Deposit {
    pub initial_value: i128,
    pub frontend: Option<Address>,
    pub snapshot: DepositSnapshot,
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Frontend {
    /// Share of reward gains passed on to the frontend's depositors
    pub kickback_rate: i128,
    /// Sum of the tagged deposits, compounded like a deposit
    pub stake: i128,
    pub snapshot: DepositSnapshot,
}

#[contracttype]
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct StakeRecord {
    pub amount: i128,
    pub f_collateral_snapshot: i128,
    pub f_debt_snapshot: i128,
}

#[contracttype]
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ScaleSums {
    pub s: i128,
    pub g: i128,
}

/// Every protocol-wide mutable value. Loaded once per call and written back on success.
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProtocolState {
    pub totals: SystemTotals,
    pub sorted: SortedList,
    pub pool: PoolState,
    pub staking: StakingState,
    pub fees: FeeState,
    pub issuance: IssuanceState,
}

impl ProtocolState {
    pub fn new(deployment_time: u64) -> Self {
        ProtocolState {
            totals: SystemTotals::default(),
            sorted: SortedList::default(),
            pool: PoolState::default(),
            staking: StakingState::default(),
            fees: FeeState {
                base_rate: 0,
                last_fee_operation_time: deployment_time,
            },
            issuance: IssuanceState {
                deployment_time,
                total_issued: 0,
            },
        }
    }

    pub fn load(env: &Env) -> Self {
        env.storage()
            .instance()
            .get(&STORAGE)
            .unwrap_or_else(|| panic_with_error!(env, Error::NotInitialized))
    }

    pub fn save(&self, env: &Env) {
        env.storage().instance().set(&STORAGE, self);
    }
}

pub fn get_config(env: &Env) -> ProtocolConfig {
    env.storage()
        .instance()
        .get(&CONFIG)
        .unwrap_or_else(|| panic_with_error!(env, Error::NotInitialized))
}

pub fn set_config(env: &Env, config: &ProtocolConfig) {
    env.storage().instance().set(&CONFIG, config);
}

pub fn get_admin(env: &Env) -> Option<Address> {
    env.storage().instance().get(&ADMIN_KEY)
}

pub fn set_admin(env: &Env, admin: &Address) {
    env.storage().instance().set(&ADMIN_KEY, admin);
}

fn extend(env: &Env, key: &DataKey) {
    let ttl = env.storage().max_ttl();
    env.storage().persistent().extend_ttl(key, ttl, ttl);
}

pub fn get_trove(env: &Env, owner: &Address) -> Trove {
    env.storage()
        .persistent()
        .get(&DataKey::Trove(owner.clone()))
        .unwrap_or_default()
}

pub fn set_trove(env: &Env, owner: &Address, trove: &Trove) {
    let key = DataKey::Trove(owner.clone());
    env.storage().persistent().set(&key, trove);
    extend(env, &key);
}

pub fn get_node(env: &Env, id: &Address) -> Option<SortedNode> {
    env.storage()
        .persistent()
        .get(&DataKey::SortedNode(id.clone()))
}

pub fn set_node(env: &Env, id: &Address, node: &SortedNode) {
    let key = DataKey::SortedNode(id.clone());
    env.storage().persistent().set(&key, node);
    extend(env, &key);
}

pub fn remove_node(env: &Env, id: &Address) {
    env.storage()
        .persistent()
        .remove(&DataKey::SortedNode(id.clone()));
}

pub fn get_deposit(env: &Env, owner: &Address) -> Option<Deposit> {
    env.storage()
        .persistent()
        .get(&DataKey::Deposit(owner.clone()))
}

pub fn set_deposit(env: &Env, owner: &Address, deposit: &Deposit) {
    let key = DataKey::Deposit(owner.clone());
    env.storage().persistent().set(&key, deposit);
    extend(env, &key);
}

pub fn get_frontend(env: &Env, frontend: &Address) -> Option<Frontend> {
    env.storage()
        .persistent()
        .get(&DataKey::Frontend(frontend.clone()))
}

pub fn set_frontend(env: &Env, address: &Address, frontend: &Frontend) {
    let key = DataKey::Frontend(address.clone());
    env.storage().persistent().set(&key, frontend);
    extend(env, &key);
}

pub fn get_stake(env: &Env, owner: &Address) -> StakeRecord {
    env.storage()
        .persistent()
        .get(&DataKey::Stake(owner.clone()))
        .unwrap_or_default()
}

pub fn set_stake(env: &Env, owner: &Address, stake: &StakeRecord) {
    let key = DataKey::Stake(owner.clone());
    env.storage().persistent().set(&key, stake);
    extend(env, &key);
}

pub fn get_scale_sums(env: &Env, epoch: u64, scale: u64) -> ScaleSums {
    env.storage()
        .persistent()
        .get(&DataKey::ScaleSums(epoch, scale))
        .unwrap_or_default()
}

pub fn set_scale_sums(env: &Env, epoch: u64, scale: u64, sums: &ScaleSums) {
    let key = DataKey::ScaleSums(epoch, scale);
    env.storage().persistent().set(&key, sums);
    extend(env, &key);
}

pub fn get_surplus(env: &Env, owner: &Address) -> i128 {
    env.storage()
        .persistent()
        .get(&DataKey::Surplus(owner.clone()))
        .unwrap_or(0)
}

pub fn set_surplus(env: &Env, owner: &Address, amount: i128) {
    let key = DataKey::Surplus(owner.clone());
    if amount == 0 {
        env.storage().persistent().remove(&key);
        return;
    }
    env.storage().persistent().set(&key, &amount);
    extend(env, &key);
}
