use rust_decimal::Decimal;

/// Checks applied to a transfer before anything is written.
///
/// Both are off by default, which lets zero, negative and overdrawing
/// transfers through unchanged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferPolicy {
    pub reject_non_positive: bool,
    pub reject_overdraft: bool,
}

impl TransferPolicy {
    pub fn strict() -> Self {
        Self {
            reject_non_positive: true,
            reject_overdraft: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerConfig {
    /// Balance every user starts with, and the base of every log replay.
    pub base_grant: Decimal,
    pub transfer_policy: TransferPolicy,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            base_grant: Decimal::ONE_HUNDRED,
            transfer_policy: TransferPolicy::default(),
        }
    }
}
