#![no_std]
use soroban_sdk::{self, Address, Env, Symbol, contractclient, contracttype};

mod accumulator;
mod community_issuance;
mod config;
mod error;
mod fees;
mod fixed_point;
mod index_types;
mod sorted_troves;
mod stability_pool;
mod staking;
mod storage;
mod token_ledger;
mod trove;
mod trove_manager;

pub mod protocol;

pub use config::ProtocolConfig;
pub use error::Error;

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PriceData {
    pub price: i128,    //asset price at given point in time
    pub timestamp: u64, //recording timestamp
}

/// Asset identifier understood by SEP-40 price feeds
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Asset {
    Stellar(Address),
    Other(Symbol),
}

/// The part of the SEP-40 oracle interface the protocol reads
#[contractclient(name = "PriceFeedClient")]
pub trait PriceFeed {
    fn decimals(env: Env) -> u32;
    fn lastprice(env: Env, asset: Asset) -> Option<PriceData>;
}

mod test;
