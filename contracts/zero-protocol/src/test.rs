#![cfg(test)]
extern crate std;

use crate::error::Error;
use crate::fixed_point::DECIMAL_PRECISION;
use crate::protocol::{ZeroProtocol, ZeroProtocolClient};
use crate::sorted_troves::SortedList;
use crate::storage::{self, ProtocolState};
use crate::trove::TroveStatus;
use crate::{ProtocolConfig, stability_pool};
use price_feed::{MockPriceFeed, MockPriceFeedClient};
use soroban_sdk::testutils::{Address as _, Ledger};
use soroban_sdk::{Address, Env, String, Symbol, vec};

mod price_feed {
    use crate::{Asset, PriceData};
    use soroban_sdk::{Env, contract, contractimpl, symbol_short};

    #[contract]
    pub struct MockPriceFeed;

    #[contractimpl]
    impl MockPriceFeed {
        pub fn set_price(env: Env, price: i128) {
            env.storage().instance().set(&symbol_short!("PRICE"), &price);
        }

        pub fn set_decimals(env: Env, decimals: u32) {
            env.storage()
                .instance()
                .set(&symbol_short!("DECIMALS"), &decimals);
        }

        pub fn decimals(env: Env) -> u32 {
            env.storage()
                .instance()
                .get(&symbol_short!("DECIMALS"))
                .unwrap_or(18)
        }

        pub fn lastprice(env: Env, _asset: Asset) -> Option<PriceData> {
            let price: Option<i128> = env.storage().instance().get(&symbol_short!("PRICE"));
            price.map(|price| PriceData {
                price,
                timestamp: env.ledger().timestamp(),
            })
        }
    }
}

const MAX_FEE: i128 = DECIMAL_PRECISION / 20; // 5%

fn dec(units: i128) -> i128 {
    units * DECIMAL_PRECISION
}

fn assert_approx(actual: i128, expected: i128, tolerance: i128) {
    assert!(
        (actual - expected).abs() <= tolerance,
        "{actual} is not within {tolerance} of {expected}"
    );
}

// Small gas compensation and minimum debt, no fee floors
fn test_config(e: &Env, price_feed: &Address) -> ProtocolConfig {
    let mut config = ProtocolConfig::with_defaults(price_feed.clone(), Symbol::new(e, "XLM"));
    config.gas_compensation = dec(10);
    config.min_net_debt = dec(90);
    config.borrowing_fee_floor = 0;
    config.redemption_fee_floor = 0;
    config
}

fn create_protocol<'a>(
    e: &Env,
    configure: impl FnOnce(&mut ProtocolConfig),
) -> (ZeroProtocolClient<'a>, MockPriceFeedClient<'a>) {
    let feed_id = e.register(MockPriceFeed, ());
    let feed = MockPriceFeedClient::new(e, &feed_id);
    feed.set_price(&dec(200));

    let mut config = test_config(e, &feed_id);
    configure(&mut config);
    let admin = Address::generate(e);
    let contract_id = e.register(ZeroProtocol, (admin, config));
    (ZeroProtocolClient::new(e, &contract_id), feed)
}

fn open(client: &ZeroProtocolClient, owner: &Address, collateral: i128, debt: i128) {
    client.open_trove(owner, &collateral, &debt, &MAX_FEE, &None, &None);
}

#[test]
fn test_initialization() {
    let e = Env::default();
    e.mock_all_auths();
    let (client, feed) = create_protocol(&e, |_| {});

    assert_eq!(client.version(), String::from_str(&e, "0.1.0"));
    assert_eq!(client.config().price_feed, feed.address);
    assert_eq!(client.config().gas_compensation, dec(10));
    assert_eq!(client.price(), dec(200));
    assert_eq!(client.trove_count(), 0);
    assert_eq!(client.tcr(), i128::MAX);
    assert!(!client.is_recovery_mode());
    assert_eq!(client.pool_state().p, DECIMAL_PRECISION);
}

#[test]
fn test_price_feed_decimals_are_normalized() {
    let e = Env::default();
    e.mock_all_auths();
    let (client, feed) = create_protocol(&e, |_| {});

    feed.set_decimals(&7);
    feed.set_price(&200_0000000);
    assert_eq!(client.price(), dec(200));

    feed.set_decimals(&20);
    feed.set_price(&(dec(150) * 100));
    assert_eq!(client.price(), dec(150));

    feed.set_price(&0);
    let result = client.try_price();
    assert_eq!(result.unwrap_err().unwrap(), Error::PriceUnavailable);
}

#[test]
fn test_set_config() {
    let e = Env::default();
    e.mock_all_auths();
    let (client, _) = create_protocol(&e, |_| {});

    let mut config = client.config();
    config.gas_compensation = dec(20);
    client.set_config(&config);
    assert_eq!(client.config().gas_compensation, dec(20));

    config.mcr = DECIMAL_PRECISION / 2;
    let result = client.try_set_config(&config);
    assert_eq!(result.unwrap_err().unwrap(), Error::InvalidConfig);
}

#[test]
fn test_open_trove() {
    let e = Env::default();
    e.mock_all_auths();
    let (client, _) = create_protocol(&e, |_| {});
    let alice = Address::generate(&e);

    let trove = client.open_trove(&alice, &dec(10), &dec(1000), &MAX_FEE, &None, &None);
    assert_eq!(trove.collateral, dec(10));
    // gas compensation is added on top of the drawn debt
    assert_eq!(trove.debt, dec(1010));
    assert_eq!(trove.stake, dec(10));
    assert_eq!(trove.status, TroveStatus::Open);
    assert_eq!(trove.icr, 1_980_198_019_801_980_198);

    let totals = client.system_totals();
    assert_eq!(totals.total_collateral, dec(10));
    assert_eq!(totals.total_debt, dec(1010));
    assert_eq!(totals.total_stakes, dec(10));
    assert_eq!(client.trove_count(), 1);
    assert_eq!(client.first_trove(), Some(alice.clone()));
    assert_eq!(client.last_trove(), Some(alice));
}

#[test]
fn test_open_trove_errors() {
    let e = Env::default();
    e.mock_all_auths();
    let (client, _) = create_protocol(&e, |_| {});
    let alice = Address::generate(&e);
    let bob = Address::generate(&e);

    let result = client.try_open_trove(&alice, &0, &dec(1000), &MAX_FEE, &None, &None);
    assert_eq!(result.unwrap_err().unwrap(), Error::InvalidAmount);

    let result = client.try_open_trove(&alice, &dec(10), &dec(50), &MAX_FEE, &None, &None);
    assert_eq!(result.unwrap_err().unwrap(), Error::BelowMinimumDebt);

    let result = client.try_open_trove(&alice, &dec(5), &dec(1000), &MAX_FEE, &None, &None);
    assert_eq!(result.unwrap_err().unwrap(), Error::CollateralRatioTooLow);

    let result = client.try_open_trove(&alice, &dec(10), &dec(1000), &(dec(1) + 1), &None, &None);
    assert_eq!(result.unwrap_err().unwrap(), Error::InvalidMaxFee);

    open(&client, &alice, dec(10), dec(1000));
    let result = client.try_open_trove(&alice, &dec(10), &dec(1000), &MAX_FEE, &None, &None);
    assert_eq!(result.unwrap_err().unwrap(), Error::AlreadyOpen);

    // ICR 1.13 is above MCR but the system would drop below CCR
    let result = client.try_open_trove(&bob, &dec(13), &dec(2290), &MAX_FEE, &None, &None);
    assert_eq!(result.unwrap_err().unwrap(), Error::RecoveryModeViolation);
}

#[test]
fn test_collateral_ratio_equal_to_minimum_is_allowed() {
    let e = Env::default();
    e.mock_all_auths();
    let (client, feed) = create_protocol(&e, |config| {
        config.mcr = DECIMAL_PRECISION * 3 / 2;
        config.ccr = DECIMAL_PRECISION * 3 / 2;
        config.gas_compensation = 0;
        config.min_net_debt = dec(1);
    });
    feed.set_price(&dec(150));
    let alice = Address::generate(&e);
    let bob = Address::generate(&e);

    // 2 collateral at 150 against 200 debt is exactly 150%
    let trove = client.open_trove(&alice, &dec(2), &dec(200), &MAX_FEE, &None, &None);
    assert_eq!(trove.icr, DECIMAL_PRECISION * 3 / 2);
    assert!(!client.is_recovery_mode());

    let result = client.try_open_trove(&bob, &dec(2), &(dec(200) + 1), &MAX_FEE, &None, &None);
    assert_eq!(result.unwrap_err().unwrap(), Error::CollateralRatioTooLow);

    let result = client.try_adjust_trove(&alice, &0, &1, &MAX_FEE, &None, &None);
    assert_eq!(result.unwrap_err().unwrap(), Error::CollateralRatioTooLow);
    assert_eq!(client.trove(&alice).debt, dec(200));
}

#[test]
fn test_adjust_and_close_trove() {
    let e = Env::default();
    e.mock_all_auths();
    let (client, _) = create_protocol(&e, |_| {});
    let alice = Address::generate(&e);
    let bob = Address::generate(&e);
    open(&client, &alice, dec(10), dec(1000));
    open(&client, &bob, dec(10), dec(1000));

    let trove = client.adjust_trove(&alice, &dec(5), &0, &MAX_FEE, &None, &None);
    assert_eq!(trove.collateral, dec(15));
    assert_eq!(trove.debt, dec(1010));

    let trove = client.adjust_trove(&alice, &-dec(2), &dec(100), &MAX_FEE, &None, &None);
    assert_eq!(trove.collateral, dec(13));
    assert_eq!(trove.debt, dec(1110));
    assert_eq!(client.system_totals().total_debt, dec(2120));

    let result = client.try_adjust_trove(&alice, &0, &0, &MAX_FEE, &None, &None);
    assert_eq!(result.unwrap_err().unwrap(), Error::InvalidAmount);
    let result = client.try_adjust_trove(&alice, &0, &-dec(2000), &MAX_FEE, &None, &None);
    assert_eq!(result.unwrap_err().unwrap(), Error::RepaymentExceedsDebt);
    let result = client.try_adjust_trove(&alice, &-dec(20), &0, &MAX_FEE, &None, &None);
    assert_eq!(result.unwrap_err().unwrap(), Error::InsufficientCollateral);
    let result = client.try_adjust_trove(&alice, &0, &-dec(1050), &MAX_FEE, &None, &None);
    assert_eq!(result.unwrap_err().unwrap(), Error::BelowMinimumDebt);

    let result = client.try_close_trove(&alice);
    assert_eq!(result.unwrap_err().unwrap(), Error::DebtNotRepaid);

    // repaying the whole net debt leaves only the gas compensation
    let trove = client.adjust_trove(&alice, &0, &-dec(1100), &MAX_FEE, &None, &None);
    assert_eq!(trove.debt, dec(10));

    client.close_trove(&alice);
    let trove = client.trove(&alice);
    assert_eq!(trove.status, TroveStatus::ClosedByOwner);
    assert_eq!(trove.collateral, 0);
    assert_eq!(trove.debt, 0);
    assert_eq!(client.trove_count(), 1);
    assert_eq!(client.system_totals().total_debt, dec(1010));
    assert_eq!(client.system_totals().total_collateral, dec(10));

    let result = client.try_adjust_trove(&alice, &dec(1), &0, &MAX_FEE, &None, &None);
    assert_eq!(result.unwrap_err().unwrap(), Error::NotOpen);

    // a closed trove can be opened again
    open(&client, &alice, dec(10), dec(1000));
    assert_eq!(client.trove(&alice).status, TroveStatus::Open);
}

#[test]
fn test_troves_are_sorted_by_nominal_ratio() {
    let e = Env::default();
    e.mock_all_auths();
    let (client, _) = create_protocol(&e, |_| {});
    let alice = Address::generate(&e);
    let bob = Address::generate(&e);
    let carol = Address::generate(&e);

    open(&client, &alice, dec(10), dec(1000));
    open(&client, &bob, dec(20), dec(1000));
    open(&client, &carol, dec(15), dec(1000));

    assert_eq!(client.first_trove(), Some(bob.clone()));
    assert_eq!(client.next_trove(&bob), Some(carol.clone()));
    assert_eq!(client.next_trove(&carol), Some(alice.clone()));
    assert_eq!(client.next_trove(&alice), None);
    assert_eq!(client.last_trove(), Some(alice.clone()));
    assert_eq!(client.prev_trove(&alice), Some(carol.clone()));

    assert_eq!(client.nominal_icr(&bob), dec(20) * 100 / 1010);

    // topping up Alice moves her to the front
    client.adjust_trove(&alice, &dec(20), &0, &MAX_FEE, &Some(bob.clone()), &None);
    assert_eq!(client.first_trove(), Some(alice.clone()));
    assert_eq!(client.last_trove(), Some(carol.clone()));

    let position = client.find_insert_position(&(dec(17) * 100 / 1010), &None, &None);
    assert_eq!(position.prev, Some(bob));
    assert_eq!(position.next, Some(carol));
}

#[test]
fn test_sorted_list_repairs_stale_hints() {
    let e = Env::default();
    let (client, _) = create_protocol(&e, |_| {});
    let a = Address::generate(&e);
    let b = Address::generate(&e);
    let c = Address::generate(&e);
    let d = Address::generate(&e);

    e.as_contract(&client.address, || {
        let mut list = SortedList::default();
        list.insert(&e, &a, 300, None, None).unwrap();
        list.insert(&e, &b, 100, None, None).unwrap();
        list.insert(&e, &c, 200, Some(a.clone()), Some(b.clone())).unwrap();
        // d belongs in front of a, the hint points at the tail
        list.insert(&e, &d, 400, Some(b.clone()), None).unwrap();

        assert_eq!(list.first(), Some(d.clone()));
        assert_eq!(list.next(&e, &d), Some(a.clone()));
        assert_eq!(list.next(&e, &a), Some(c.clone()));
        assert_eq!(list.next(&e, &c), Some(b.clone()));
        assert_eq!(list.last(), Some(b.clone()));
        assert_eq!(list.size, 4);

        assert_eq!(list.insert(&e, &a, 50, None, None), Err(Error::AlreadyOpen));
        assert_eq!(
            list.insert(&e, &Address::generate(&e), 0, None, None),
            Err(Error::InvalidAmount)
        );

        list.re_insert(&e, &a, 50, None, None).unwrap();
        assert_eq!(list.last(), Some(a.clone()));

        list.remove(&e, &c).unwrap();
        assert_eq!(list.remove(&e, &c), Err(Error::NotOpen));
        assert_eq!(list.size, 3);

        assert_eq!(
            list.find_insert_position(&e, 150, None, None),
            (Some(d.clone()), Some(b.clone()))
        );
        assert_eq!(
            list.find_insert_position(&e, 10, Some(d.clone()), None),
            (Some(a.clone()), None)
        );
    });
}

#[test]
fn test_liquidation_offsets_against_pool() {
    let e = Env::default();
    e.mock_all_auths();
    let (client, feed) = create_protocol(&e, |_| {});
    let whale = Address::generate(&e);
    let alice = Address::generate(&e);
    let liquidator = Address::generate(&e);

    open(&client, &whale, dec(100), dec(2000));
    client.provide_to_sp(&whale, &dec(2000), &None);
    open(&client, &alice, dec(10), dec(1000));

    let result = client.try_liquidate(&liquidator, &alice);
    assert_eq!(result.unwrap_err().unwrap(), Error::NotLiquidatable);

    feed.set_price(&dec(100));
    let totals = client.liquidate(&liquidator, &alice);
    assert_eq!(totals.liquidated, 1);
    assert_eq!(totals.debt_offset, dec(1010));
    assert_eq!(totals.collateral_to_pool, 9_950_000_000_000_000_000);
    assert_eq!(totals.debt_redistributed, 0);
    assert_eq!(totals.collateral_redistributed, 0);
    assert_eq!(totals.collateral_gas_compensation, 50_000_000_000_000_000);
    assert_eq!(totals.debt_gas_compensation, dec(10));

    assert_eq!(client.trove(&alice).status, TroveStatus::ClosedByLiquidation);
    assert_eq!(client.trove_count(), 1);

    let pool = client.pool_state();
    assert_eq!(pool.total_deposits, dec(990));
    assert_eq!(pool.collateral_balance, 9_950_000_000_000_000_000);

    let deposit = client.deposit(&whale);
    assert_eq!(deposit.current_value, 989_999_999_999_999_998_000);
    assert_eq!(deposit.collateral_gain, 9_950_000_000_000_000_000);

    let system = client.system_totals();
    assert_eq!(system.total_debt, dec(2010));
    assert_eq!(system.total_collateral, dec(100));
}

#[test]
fn test_liquidation_redistributes_without_pool() {
    let e = Env::default();
    e.mock_all_auths();
    let (client, feed) = create_protocol(&e, |_| {});
    let whale = Address::generate(&e);
    let bob = Address::generate(&e);
    let alice = Address::generate(&e);
    let liquidator = Address::generate(&e);

    open(&client, &whale, dec(100), dec(2000));
    open(&client, &bob, dec(20), dec(1000));
    open(&client, &alice, dec(10), dec(1000));

    feed.set_price(&dec(100));
    let totals = client.liquidate(&liquidator, &alice);
    assert_eq!(totals.debt_offset, 0);
    assert_eq!(totals.debt_redistributed, dec(1010));
    assert_eq!(totals.collateral_redistributed, 9_950_000_000_000_000_000);

    let system = client.system_totals();
    assert_eq!(system.total_stakes, dec(120));
    assert_eq!(system.total_stakes_snapshot, dec(120));
    assert_eq!(system.total_collateral_snapshot, 129_950_000_000_000_000_000);
    assert_eq!(system.total_collateral, 129_950_000_000_000_000_000);
    assert_eq!(system.total_debt, dec(4030));

    let pending = client.pending_rewards(&bob);
    assert_eq!(pending.collateral, 1_658_333_333_333_333_320);
    assert_eq!(pending.debt, 168_333_333_333_333_333_320);

    let trove = client.apply_pending_rewards(&bob);
    assert_eq!(e.auths()[0].0, bob);
    assert_eq!(trove.collateral, 21_658_333_333_333_333_320);
    assert_eq!(trove.debt, 1_178_333_333_333_333_333_320);
    assert_eq!(client.pending_rewards(&bob).debt, 0);
    assert_eq!(client.trove(&bob).debt, 1_178_333_333_333_333_333_320);
}

#[test]
fn test_liquidate_troves_walks_from_lowest_ratio() {
    let e = Env::default();
    e.mock_all_auths();
    let (client, feed) = create_protocol(&e, |_| {});
    let whale = Address::generate(&e);
    let alice = Address::generate(&e);
    let bob = Address::generate(&e);
    let liquidator = Address::generate(&e);

    open(&client, &whale, dec(100), dec(2000));
    open(&client, &alice, dec(10), dec(1000));
    open(&client, &bob, dec(11), dec(1000));

    feed.set_price(&dec(100));
    let totals = client.liquidate_troves(&liquidator, &10);
    assert_eq!(totals.liquidated, 2);
    assert_eq!(client.trove_count(), 1);
    assert_eq!(client.trove(&alice).status, TroveStatus::ClosedByLiquidation);
    assert_eq!(client.trove(&bob).status, TroveStatus::ClosedByLiquidation);
    assert_eq!(client.trove(&whale).status, TroveStatus::Open);
    assert_eq!(client.system_totals().total_debt, dec(4030));

    let result = client.try_liquidate_troves(&liquidator, &10);
    assert_eq!(result.unwrap_err().unwrap(), Error::NotLiquidatable);
}

#[test]
fn test_batch_liquidate_skips_healthy_troves() {
    let e = Env::default();
    e.mock_all_auths();
    let (client, feed) = create_protocol(&e, |_| {});
    let whale = Address::generate(&e);
    let alice = Address::generate(&e);
    let liquidator = Address::generate(&e);

    open(&client, &whale, dec(100), dec(2000));
    open(&client, &alice, dec(10), dec(1000));
    feed.set_price(&dec(100));

    let result = client.try_batch_liquidate(&liquidator, &vec![&e, whale.clone()]);
    assert_eq!(result.unwrap_err().unwrap(), Error::NotLiquidatable);

    let totals = client.batch_liquidate(&liquidator, &vec![&e, whale.clone(), alice.clone()]);
    assert_eq!(totals.liquidated, 1);
    assert_eq!(client.trove(&alice).status, TroveStatus::ClosedByLiquidation);
    assert_eq!(client.trove(&whale).status, TroveStatus::Open);
}

#[test]
fn test_recovery_mode_rules() {
    let e = Env::default();
    e.mock_all_auths();
    let (client, feed) = create_protocol(&e, |_| {});
    let alice = Address::generate(&e);
    let bob = Address::generate(&e);
    let carol = Address::generate(&e);

    open(&client, &alice, dec(10), dec(1000));
    feed.set_price(&dec(140));
    assert!(client.is_recovery_mode());

    // ICR 1.39 is above MCR but below CCR
    let result = client.try_open_trove(&bob, &dec(10), &dec(1000), &MAX_FEE, &None, &None);
    assert_eq!(result.unwrap_err().unwrap(), Error::RecoveryModeViolation);

    let result = client.try_adjust_trove(&alice, &-dec(1), &0, &MAX_FEE, &None, &None);
    assert_eq!(result.unwrap_err().unwrap(), Error::RecoveryModeViolation);

    let result = client.try_close_trove(&alice);
    assert_eq!(result.unwrap_err().unwrap(), Error::RecoveryModeViolation);

    // no borrowing fee in recovery mode
    let trove = client.open_trove(&carol, &dec(20), &dec(1000), &0, &None, &None);
    assert_eq!(trove.debt, dec(1010));
    assert!(!client.is_recovery_mode());
}

#[test]
fn test_recovery_mode_liquidation_caps_collateral() {
    let e = Env::default();
    e.mock_all_auths();
    let (client, feed) = create_protocol(&e, |_| {});
    let whale = Address::generate(&e);
    let alice = Address::generate(&e);
    let liquidator = Address::generate(&e);

    open(&client, &alice, dec(10), dec(1000));
    open(&client, &whale, dec(30), dec(3000));
    client.provide_to_sp(&whale, &dec(2000), &None);

    // TCR 1.49, Alice at 1.485 is above MCR but below TCR
    feed.set_price(&dec(150));
    assert!(client.is_recovery_mode());

    let totals = client.liquidate(&liquidator, &alice);
    assert_eq!(totals.debt_offset, dec(1010));
    assert_eq!(totals.collateral_gas_compensation, 37_033_333_333_333_333);
    assert_eq!(totals.collateral_to_pool, 7_369_633_333_333_333_333);
    assert_eq!(totals.collateral_surplus, 2_593_333_333_333_333_334);
    assert_eq!(client.trove(&alice).status, TroveStatus::ClosedByLiquidation);

    assert_eq!(client.collateral_surplus(&alice), 2_593_333_333_333_333_334);
    assert_eq!(client.claim_collateral(&alice), 2_593_333_333_333_333_334);
    assert_eq!(client.collateral_surplus(&alice), 0);
    let result = client.try_claim_collateral(&alice);
    assert_eq!(result.unwrap_err().unwrap(), Error::NothingToClaim);
}

#[test]
fn test_sole_trove_fully_covered_by_pool_is_closed() {
    let e = Env::default();
    e.mock_all_auths();
    let (client, feed) = create_protocol(&e, |_| {});
    let alice = Address::generate(&e);
    let bob = Address::generate(&e);
    let liquidator = Address::generate(&e);

    open(&client, &alice, dec(10), dec(1000));
    client.provide_to_sp(&bob, &dec(5000), &None);

    // below 100% in recovery mode, with nobody left to redistribute to
    feed.set_price(&dec(90));
    assert!(client.is_recovery_mode());
    let totals = client.liquidate(&liquidator, &alice);
    assert_eq!(totals.liquidated, 1);
    assert_eq!(totals.partially_liquidated, 0);
    assert_eq!(totals.debt_offset, dec(1010));
    assert_eq!(totals.collateral_to_pool, 9_950_000_000_000_000_000);
    assert_eq!(totals.debt_redistributed, 0);
    assert_eq!(totals.collateral_redistributed, 0);
    assert_eq!(totals.collateral_gas_compensation, 50_000_000_000_000_000);
    assert_eq!(totals.debt_gas_compensation, dec(10));

    let trove = client.trove(&alice);
    assert_eq!(trove.status, TroveStatus::ClosedByLiquidation);
    assert_eq!(trove.collateral, 0);
    assert_eq!(trove.debt, 0);
    assert_eq!(client.trove_count(), 0);
    assert_eq!(client.first_trove(), None);

    let system = client.system_totals();
    assert_eq!(system.total_stakes, 0);
    assert_eq!(system.total_collateral, 0);
    assert_eq!(system.total_debt, 0);
    assert_eq!(client.pool_state().total_deposits, dec(3990));
    assert_approx(
        client.deposit(&bob).collateral_gain,
        9_950_000_000_000_000_000,
        1_000,
    );
}

#[test]
fn test_sole_trove_partially_covered_by_pool_stays_open() {
    let e = Env::default();
    e.mock_all_auths();
    let (client, feed) = create_protocol(&e, |_| {});
    let alice = Address::generate(&e);
    let bob = Address::generate(&e);
    let liquidator = Address::generate(&e);

    open(&client, &alice, dec(10), dec(1000));
    client.provide_to_sp(&bob, &dec(500), &None);

    feed.set_price(&dec(90));
    let totals = client.liquidate(&liquidator, &alice);
    assert_eq!(totals.liquidated, 0);
    assert_eq!(totals.partially_liquidated, 1);
    assert_eq!(totals.debt_offset, dec(500));
    assert_eq!(totals.collateral_to_pool, 4_950_495_049_504_950_495);
    assert_eq!(totals.collateral_gas_compensation, 0);
    assert_eq!(totals.debt_gas_compensation, 0);

    // the remainder stays with the trove
    let trove = client.trove(&alice);
    assert_eq!(trove.status, TroveStatus::Open);
    assert_eq!(trove.collateral, 5_049_504_950_495_049_505);
    assert_eq!(trove.debt, dec(510));
    assert_eq!(client.trove_count(), 1);

    let pool = client.pool_state();
    assert_eq!(pool.total_deposits, 0);
    assert_eq!(pool.epoch, 1);

    let system = client.system_totals();
    assert_eq!(system.total_collateral, 5_049_504_950_495_049_505);
    assert_eq!(system.total_debt, dec(510));

    // an empty pool cannot take any more of it
    let result = client.try_liquidate(&liquidator, &alice);
    assert_eq!(result.unwrap_err().unwrap(), Error::NotLiquidatable);
}

#[test]
fn test_partial_redemption() {
    let e = Env::default();
    e.mock_all_auths();
    let (client, _) = create_protocol(&e, |_| {});
    let alice = Address::generate(&e);
    let bob = Address::generate(&e);
    let redeemer = Address::generate(&e);

    open(&client, &alice, dec(10), dec(1000));
    open(&client, &bob, dec(20), dec(1000));

    let totals = client.redeem_collateral(
        &redeemer,
        &dec(500),
        &0,
        &DECIMAL_PRECISION,
        &None,
        &None,
    );
    assert_eq!(totals.debt_redeemed, dec(500));
    assert_eq!(totals.collateral_drawn, 2_500_000_000_000_000_000);
    assert_eq!(totals.troves_redeemed, 1);
    assert_eq!(totals.troves_closed, 0);
    // base rate grows by half the redeemed fraction of 2020 total debt
    assert_eq!(client.base_rate(), 123_762_376_237_623_762);
    assert_eq!(totals.collateral_fee, 309_405_940_594_059_405);

    let trove = client.trove(&alice);
    assert_eq!(trove.debt, dec(510));
    assert_eq!(trove.collateral, 7_500_000_000_000_000_000);
    assert_eq!(client.trove(&bob).debt, dec(1010));
    assert_eq!(client.system_totals().total_debt, dec(1520));

    assert_eq!(client.borrowing_rate(), MAX_FEE);
}

#[test]
fn test_redemption_beyond_total_debt_closes_every_trove() {
    let e = Env::default();
    e.mock_all_auths();
    let (client, _) = create_protocol(&e, |_| {});
    let alice = Address::generate(&e);
    let bob = Address::generate(&e);
    let redeemer = Address::generate(&e);

    open(&client, &alice, dec(10), dec(1000));
    open(&client, &bob, dec(20), dec(1000));

    let totals = client.redeem_collateral(
        &redeemer,
        &dec(10_000),
        &0,
        &DECIMAL_PRECISION,
        &None,
        &None,
    );
    assert_eq!(totals.debt_redeemed, dec(2000));
    assert_eq!(totals.collateral_drawn, dec(10));
    assert_eq!(totals.troves_closed, 2);
    assert_eq!(client.trove_count(), 0);
    assert_eq!(client.trove(&alice).status, TroveStatus::ClosedByRedemption);

    assert_eq!(client.collateral_surplus(&alice), dec(5));
    assert_eq!(client.collateral_surplus(&bob), dec(15));

    let system = client.system_totals();
    assert_eq!(system.total_debt, 0);
    assert_eq!(system.total_collateral, 0);
    assert_eq!(system.total_stakes, 0);
}

#[test]
fn test_redemption_skips_undercollateralized_troves() {
    let e = Env::default();
    e.mock_all_auths();
    let (client, feed) = create_protocol(&e, |_| {});
    let whale = Address::generate(&e);
    let alice = Address::generate(&e);
    let bob = Address::generate(&e);
    let redeemer = Address::generate(&e);

    open(&client, &whale, dec(100), dec(2000));
    open(&client, &alice, dec(10), dec(1000));
    open(&client, &bob, dec(11), dec(1000));
    feed.set_price(&dec(100));

    let totals = client.redeem_collateral(
        &redeemer,
        &dec(100),
        &0,
        &DECIMAL_PRECISION,
        &None,
        &None,
    );
    assert_eq!(totals.troves_redeemed, 1);
    assert_eq!(client.trove(&whale).debt, dec(1910));
    assert_eq!(client.trove(&alice).debt, dec(1010));
    assert_eq!(client.trove(&bob).debt, dec(1010));
}

#[test]
fn test_redemption_errors() {
    let e = Env::default();
    e.mock_all_auths();
    let (client, feed) = create_protocol(&e, |_| {});
    let alice = Address::generate(&e);
    let redeemer = Address::generate(&e);
    open(&client, &alice, dec(10), dec(1000));

    let result = client.try_redeem_collateral(&redeemer, &0, &0, &DECIMAL_PRECISION, &None, &None);
    assert_eq!(result.unwrap_err().unwrap(), Error::InvalidAmount);

    let result = client.try_redeem_collateral(
        &redeemer,
        &dec(100),
        &0,
        &(dec(1) + 1),
        &None,
        &None,
    );
    assert_eq!(result.unwrap_err().unwrap(), Error::InvalidMaxFee);

    // nothing is written when the fee is refused
    let result = client.try_redeem_collateral(&redeemer, &dec(100), &0, &0, &None, &None);
    assert_eq!(result.unwrap_err().unwrap(), Error::FeeExceedsTolerance);
    assert_eq!(client.trove(&alice).debt, dec(1010));
    assert_eq!(client.base_rate(), 0);

    // a partial redemption may not leave less than the minimum net debt
    let result = client.try_redeem_collateral(
        &redeemer,
        &dec(950),
        &0,
        &DECIMAL_PRECISION,
        &None,
        &None,
    );
    assert_eq!(result.unwrap_err().unwrap(), Error::RedemptionAmountTooSmall);

    feed.set_price(&dec(100));
    let result = client.try_redeem_collateral(
        &redeemer,
        &dec(100),
        &0,
        &DECIMAL_PRECISION,
        &None,
        &None,
    );
    assert_eq!(result.unwrap_err().unwrap(), Error::TcrBelowMinimum);
}

#[test]
fn test_base_rate_decays_per_minute() {
    let e = Env::default();
    e.mock_all_auths();
    let (client, _) = create_protocol(&e, |_| {});
    let alice = Address::generate(&e);
    let bob = Address::generate(&e);
    let redeemer = Address::generate(&e);
    open(&client, &alice, dec(10), dec(1000));
    open(&client, &bob, dec(20), dec(1000));

    client.redeem_collateral(&redeemer, &dec(500), &0, &DECIMAL_PRECISION, &None, &None);
    let base_rate = client.base_rate();

    e.ledger().set_timestamp(59);
    assert_eq!(client.base_rate(), base_rate);

    // half-life of 12 hours
    e.ledger().set_timestamp(720 * 60);
    assert_approx(client.base_rate(), base_rate / 2, base_rate / 1_000_000);
}

#[test]
fn test_stability_pool_offset_split() {
    let e = Env::default();
    e.mock_all_auths();
    let (client, _) = create_protocol(&e, |_| {});
    let alice = Address::generate(&e);
    let bob = Address::generate(&e);

    client.provide_to_sp(&alice, &dec(500), &None);
    client.provide_to_sp(&bob, &dec(500), &None);

    e.as_contract(&client.address, || {
        let config = storage::get_config(&e);
        let mut state = ProtocolState::load(&e);
        stability_pool::offset(&e, &config, &mut state, dec(200), dec(2)).unwrap();
        state.save(&e);
    });

    let deposit = client.deposit(&alice);
    assert_eq!(deposit.initial_value, dec(500));
    assert_eq!(deposit.current_value, dec(400) - 500);
    assert_eq!(deposit.collateral_gain, dec(1));
    assert_eq!(client.deposit(&bob).current_value, dec(400) - 500);

    let deposit = client.withdraw_all_from_sp(&alice);
    assert_eq!(deposit.current_value, 0);
    assert_eq!(deposit.collateral_gain, 0);

    let pool = client.pool_state();
    assert_eq!(pool.total_deposits, dec(400) + 500);
    assert_eq!(pool.collateral_balance, dec(1));

    let result = client.try_withdraw_from_sp(&alice, &1);
    assert_eq!(result.unwrap_err().unwrap(), Error::InsufficientDeposit);
    let result = client.try_withdraw_from_sp(&bob, &dec(401));
    assert_eq!(result.unwrap_err().unwrap(), Error::InsufficientDeposit);
}

#[test]
fn test_stability_pool_emptied_starts_new_epoch() {
    let e = Env::default();
    e.mock_all_auths();
    let (client, _) = create_protocol(&e, |_| {});
    let alice = Address::generate(&e);
    let bob = Address::generate(&e);
    let carol = Address::generate(&e);

    client.provide_to_sp(&alice, &dec(500), &None);
    client.provide_to_sp(&bob, &dec(500), &None);

    e.as_contract(&client.address, || {
        let config = storage::get_config(&e);
        let mut state = ProtocolState::load(&e);
        stability_pool::offset(&e, &config, &mut state, dec(1000), dec(5)).unwrap();
        state.save(&e);
    });

    let pool = client.pool_state();
    assert_eq!(pool.epoch, 1);
    assert_eq!(pool.scale, 0);
    assert_eq!(pool.p, DECIMAL_PRECISION);
    assert_eq!(pool.total_deposits, 0);

    let deposit = client.deposit(&alice);
    assert_eq!(deposit.current_value, 0);
    assert_eq!(deposit.collateral_gain, 2_500_000_000_000_000_000);

    client.provide_to_sp(&carol, &dec(100), &None);
    assert_eq!(client.deposit(&carol).current_value, dec(100));

    // withdrawing zero only collects the gain
    client.withdraw_from_sp(&alice, &0);
    let deposit = client.deposit(&alice);
    assert_eq!(deposit.initial_value, 0);
    assert_eq!(deposit.collateral_gain, 0);
}

#[test]
fn test_stability_pool_scale_change() {
    let e = Env::default();
    e.mock_all_auths();
    let (client, _) = create_protocol(&e, |_| {});
    let alice = Address::generate(&e);
    let bob = Address::generate(&e);

    client.provide_to_sp(&alice, &dec(1000), &None);
    e.as_contract(&client.address, || {
        let config = storage::get_config(&e);
        let mut state = ProtocolState::load(&e);
        stability_pool::offset(&e, &config, &mut state, dec(1000) - 10_000_000_000_000, 1).unwrap();
        state.save(&e);
    });
    assert_eq!(client.pool_state().p, 9_999_999_999);
    assert_eq!(client.pool_state().scale, 0);

    client.provide_to_sp(&bob, &dec(1000), &None);
    e.as_contract(&client.address, || {
        let config = storage::get_config(&e);
        let mut state = ProtocolState::load(&e);
        stability_pool::offset(&e, &config, &mut state, dec(950), dec(10)).unwrap();
        state.save(&e);
    });

    let pool = client.pool_state();
    assert_eq!(pool.scale, 1);
    assert!(pool.p >= stability_pool::SCALE_FACTOR);

    let deposit = client.deposit(&bob);
    assert_approx(deposit.current_value, dec(50), DECIMAL_PRECISION / 1_000);
    assert_approx(deposit.collateral_gain, dec(10), DECIMAL_PRECISION / 1_000_000);
    // what is left of Alice's deposit is below the precision guard
    assert_eq!(client.deposit(&alice).current_value, 0);
}

#[test]
fn test_deposits_never_exceed_pool_total() {
    let e = Env::default();
    e.mock_all_auths();
    let (client, _) = create_protocol(&e, |_| {});
    let depositors: [Address; 4] = core::array::from_fn(|_| Address::generate(&e));

    for round in 0..40i128 {
        let index = (round % 4) as usize;
        client.provide_to_sp(&depositors[index], &dec(100 + round * 7), &None);

        if round % 3 == 2 {
            let owner = &depositors[(index + 1) % 4];
            let current = client.deposit(owner).current_value;
            if current > 0 {
                client.withdraw_from_sp(owner, &(current / 2));
            }
        }

        let total = client.pool_state().total_deposits;
        let loss = total * (round % 5 + 1) / 7;
        e.as_contract(&client.address, || {
            let config = storage::get_config(&e);
            let mut state = ProtocolState::load(&e);
            stability_pool::offset(&e, &config, &mut state, loss, dec(1)).unwrap();
            state.save(&e);
        });

        let sum: i128 = depositors
            .iter()
            .map(|owner| client.deposit(owner).current_value)
            .sum();
        let total = client.pool_state().total_deposits;
        assert!(sum <= total, "round {round}: deposits {sum} exceed pool {total}");
    }
}

#[test]
fn test_withdrawal_blocked_while_troves_undercollateralized() {
    let e = Env::default();
    e.mock_all_auths();
    let (client, feed) = create_protocol(&e, |_| {});
    let whale = Address::generate(&e);
    let alice = Address::generate(&e);

    open(&client, &whale, dec(100), dec(2000));
    client.provide_to_sp(&whale, &dec(1000), &None);
    open(&client, &alice, dec(10), dec(1000));

    feed.set_price(&dec(100));
    let result = client.try_withdraw_from_sp(&whale, &dec(100));
    assert_eq!(result.unwrap_err().unwrap(), Error::UndercollateralizedTroves);

    let deposit = client.withdraw_from_sp(&whale, &0);
    assert_eq!(deposit.current_value, dec(1000));
}

#[test]
fn test_frontend_kickback() {
    let e = Env::default();
    e.mock_all_auths();
    let (client, _) = create_protocol(&e, |_| {});
    let frontend = Address::generate(&e);
    let alice = Address::generate(&e);
    let bob = Address::generate(&e);
    let carol = Address::generate(&e);

    client.register_frontend(&frontend, &(DECIMAL_PRECISION / 2));
    let result = client.try_register_frontend(&frontend, &(DECIMAL_PRECISION / 2));
    assert_eq!(result.unwrap_err().unwrap(), Error::InvalidFrontend);
    let result = client.try_register_frontend(&carol, &(DECIMAL_PRECISION + 1));
    assert_eq!(result.unwrap_err().unwrap(), Error::InvalidAmount);

    let result = client.try_provide_to_sp(&carol, &dec(100), &Some(bob.clone()));
    assert_eq!(result.unwrap_err().unwrap(), Error::InvalidFrontend);
    let result = client.try_provide_to_sp(&frontend, &dec(100), &None);
    assert_eq!(result.unwrap_err().unwrap(), Error::InvalidFrontend);

    let deposit = client.provide_to_sp(&alice, &dec(500), &Some(frontend.clone()));
    assert_eq!(deposit.frontend, Some(frontend.clone()));
    assert_eq!(client.frontend(&frontend).stake, dec(500));

    // an hour of issuance, picked up by the next pool operation
    e.ledger().set_timestamp(3_600);
    client.provide_to_sp(&bob, &dec(100), &None);

    let issued = 2_531_944_322_067_424_000_000;
    assert_eq!(client.deposit(&alice).reward_gain, issued / 2);
    assert_eq!(client.frontend(&frontend).reward_gain, issued / 2);
    assert_eq!(client.deposit(&bob).reward_gain, 0);
}

#[test]
fn test_staking_collects_fees() {
    let e = Env::default();
    e.mock_all_auths();
    let (client, _) = create_protocol(&e, |config| {
        config.borrowing_fee_floor = DECIMAL_PRECISION / 200;
    });
    let alice = Address::generate(&e);
    let bob = Address::generate(&e);
    let carol = Address::generate(&e);
    let redeemer = Address::generate(&e);

    let view = client.stake(&alice, &dec(100));
    assert_eq!(view.staked, dec(100));
    assert_eq!(client.total_staked(), dec(100));

    // 0.5% of 1000 is credited to the only staker
    let trove = client.open_trove(&bob, &dec(10), &dec(1000), &MAX_FEE, &None, &None);
    assert_eq!(trove.debt, dec(1015));
    assert_eq!(client.staking_state().f_debt.value, 50_000_000_000_000_000);
    assert_eq!(client.stake_of(&alice).debt_gain, dec(5));

    client.stake(&carol, &dec(100));
    assert_eq!(client.stake_of(&carol).debt_gain, 0);

    let f_debt = client.staking_state().f_debt.value;
    client.redeem_collateral(&redeemer, &dec(100), &0, &DECIMAL_PRECISION, &None, &None);
    assert!(client.staking_state().f_debt.value >= f_debt);
    let alice_view = client.stake_of(&alice);
    let carol_view = client.stake_of(&carol);
    assert!(alice_view.collateral_gain > 0);
    assert_eq!(alice_view.collateral_gain, carol_view.collateral_gain);
    assert_eq!(alice_view.debt_gain, dec(5));

    let view = client.unstake(&alice, &dec(40));
    assert_eq!(view.staked, dec(60));
    assert_eq!(view.collateral_gain, 0);
    assert_eq!(view.debt_gain, 0);
    assert_eq!(client.total_staked(), dec(160));

    let result = client.try_unstake(&alice, &dec(100));
    assert_eq!(result.unwrap_err().unwrap(), Error::InsufficientStake);
    let result = client.try_unstake(&redeemer, &0);
    assert_eq!(result.unwrap_err().unwrap(), Error::InsufficientStake);
    let result = client.try_stake(&redeemer, &0);
    assert_eq!(result.unwrap_err().unwrap(), Error::InvalidAmount);

    client.claim_staking_gains(&carol);
    assert_eq!(client.stake_of(&carol).collateral_gain, 0);
    assert_eq!(client.stake_of(&carol).staked, dec(100));
}

#[test]
fn test_unstaking_everything_returns_the_stake() {
    let e = Env::default();
    e.mock_all_auths();
    let (client, _) = create_protocol(&e, |_| {});
    let alice = Address::generate(&e);

    client.stake(&alice, &dec(100));
    let view = client.unstake(&alice, &dec(100));
    assert_eq!(view.staked, 0);
    assert_eq!(view.collateral_gain, 0);
    assert_eq!(view.debt_gain, 0);
    assert_eq!(client.total_staked(), 0);

    let result = client.try_unstake(&alice, &1);
    assert_eq!(result.unwrap_err().unwrap(), Error::InsufficientStake);
}

#[test]
fn test_fees_without_stakers_are_forgone() {
    let e = Env::default();
    e.mock_all_auths();
    let (client, _) = create_protocol(&e, |config| {
        config.borrowing_fee_floor = DECIMAL_PRECISION / 200;
    });
    let bob = Address::generate(&e);

    open(&client, &bob, dec(10), dec(1000));
    assert_eq!(client.staking_state().f_debt.value, 0);
    assert_eq!(client.total_staked(), 0);
}
