//! Balance instructions for the external token ledgers.
//!
//! The protocol never moves tokens itself. Every balance change is published as an
//! `(account, signed amount)` event that the token side applies: positive amounts are
//! received by the account, negative amounts are paid by it. The contract's own address
//! stands for every pool the protocol holds funds in.

use soroban_sdk::{Address, Env, contractevent};

#[contractevent(topics = ["debt_token"], data_format = "single-value")]
pub struct DebtTokenDelta {
    #[topic]
    pub account: Address,
    pub amount: i128,
}

#[contractevent(topics = ["collateral"], data_format = "single-value")]
pub struct CollateralDelta {
    #[topic]
    pub account: Address,
    pub amount: i128,
}

#[contractevent(topics = ["reward_token"], data_format = "single-value")]
pub struct RewardTokenDelta {
    #[topic]
    pub account: Address,
    pub amount: i128,
}

#[contractevent(topics = ["gov_token"], data_format = "single-value")]
pub struct GovTokenDelta {
    #[topic]
    pub account: Address,
    pub amount: i128,
}

pub fn protocol(env: &Env) -> Address {
    env.current_contract_address()
}

pub fn mint_debt(env: &Env, to: &Address, amount: i128) {
    if amount != 0 {
        DebtTokenDelta {
            account: to.clone(),
            amount,
        }
        .publish(env);
    }
}

pub fn burn_debt(env: &Env, from: &Address, amount: i128) {
    if amount != 0 {
        DebtTokenDelta {
            account: from.clone(),
            amount: -amount,
        }
        .publish(env);
    }
}

pub fn transfer_debt(env: &Env, from: &Address, to: &Address, amount: i128) {
    burn_debt(env, from, amount);
    mint_debt(env, to, amount);
}

pub fn transfer_collateral(env: &Env, from: &Address, to: &Address, amount: i128) {
    if amount == 0 {
        return;
    }
    CollateralDelta {
        account: from.clone(),
        amount: -amount,
    }
    .publish(env);
    CollateralDelta {
        account: to.clone(),
        amount,
    }
    .publish(env);
}

/// Newly issued reward tokens come out of the community issuance allocation.
pub fn issue_reward(env: &Env, to: &Address, amount: i128) {
    if amount != 0 {
        RewardTokenDelta {
            account: to.clone(),
            amount,
        }
        .publish(env);
    }
}

pub fn transfer_reward(env: &Env, from: &Address, to: &Address, amount: i128) {
    if amount == 0 {
        return;
    }
    RewardTokenDelta {
        account: from.clone(),
        amount: -amount,
    }
    .publish(env);
    issue_reward(env, to, amount);
}

pub fn transfer_gov(env: &Env, from: &Address, to: &Address, amount: i128) {
    if amount == 0 {
        return;
    }
    GovTokenDelta {
        account: from.clone(),
        amount: -amount,
    }
    .publish(env);
    GovTokenDelta {
        account: to.clone(),
        amount,
    }
    .publish(env);
}
