use soroban_sdk::contracterror;

#[contracterror]
#[derive(Copy, Clone, Debug, Eq, PartialEq, PartialOrd, Ord)]
#[repr(u32)]
pub enum Error {
    /// Amount must be positive
    InvalidAmount = 1,

    /// Net debt would fall below the minimum net debt
    BelowMinimumDebt = 2,

    /// Individual collateral ratio would fall below the minimum collateral ratio
    CollateralRatioTooLow = 3,

    /// Operation not permitted in recovery mode, or it would push the system into recovery mode
    RecoveryModeViolation = 4,

    /// Trove is already open for this owner
    AlreadyOpen = 5,

    /// Trove does not exist or is closed
    NotOpen = 6,

    /// Net debt must be repaid before the trove can be closed
    DebtNotRepaid = 7,

    /// Trove is not eligible for liquidation
    NotLiquidatable = 8,

    /// Withdrawal exceeds the current compounded deposit
    InsufficientDeposit = 9,

    /// Unstake exceeds the staked amount
    InsufficientStake = 10,

    /// Computed fee rate exceeds the caller's maximum fee percentage
    FeeExceedsTolerance = 11,

    /// No debt could be redeemed
    RedemptionAmountTooSmall = 12,

    /// Division by zero
    DivisionByZero = 13,

    /// Arithmetic overflow or underflow occurred
    Overflow = 14,

    /// Collateral withdrawal exceeds the trove's collateral
    InsufficientCollateral = 15,

    /// Repayment exceeds the trove's net debt
    RepaymentExceedsDebt = 16,

    /// Max fee percentage must lie between the fee floor and 100%
    InvalidMaxFee = 17,

    /// Frontend tag is not registered, or the caller conflicts with a frontend registration
    InvalidFrontend = 18,

    /// Stability pool withdrawals are blocked while a trove is below the minimum collateral ratio
    UndercollateralizedTroves = 19,

    /// Redemptions are blocked while the total collateral ratio is below the minimum
    /// collateral ratio
    TcrBelowMinimum = 20,

    /// Failed to fetch a price from the price feed
    PriceUnavailable = 21,

    /// Protocol configuration is inconsistent
    InvalidConfig = 22,

    /// Contract state has not been initialized
    NotInitialized = 23,

    /// Nothing to claim
    NothingToClaim = 24,
}
