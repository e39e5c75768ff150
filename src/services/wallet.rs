//! Wallet allocation: how much of the payable total is drawn from the
//! stored-value wallet versus routed to the gateway.
//!
//! Allocation is pure and reserves nothing. The actual debit happens at
//! settlement, which must re-check the balance atomically (see
//! `services::settlement`).

use crate::entities::wallet_account;
use crate::errors::ServiceError;
use async_trait::async_trait;
use rust_decimal::Decimal;
use sea_orm::{DatabaseConnection, EntityTrait};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// Result of splitting the payable total. Invariant:
/// `wallet_amount + remainder == final_total`, both non-negative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletAllocation {
    pub wallet_amount: Decimal,
    pub remainder: Decimal,
}

impl WalletAllocation {
    /// No wallet usage at all.
    pub fn none(final_total: Decimal) -> Self {
        Self {
            wallet_amount: Decimal::ZERO,
            remainder: final_total,
        }
    }

    pub fn fully_covered(&self) -> bool {
        self.remainder.is_zero()
    }
}

/// Splits `final_total` between wallet and gateway.
///
/// With no override the allocation takes as much from the wallet as
/// possible: `min(balance, final_total)`. A requested override is accepted
/// only when `0 < requested <= min(balance, final_total)`; the rejection
/// names whichever bound was violated so the caller can surface it inline.
pub fn allocate(
    balance: Decimal,
    final_total: Decimal,
    requested: Option<Decimal>,
) -> Result<WalletAllocation, ServiceError> {
    let ceiling = balance.min(final_total);

    let wallet_amount = match requested {
        None => ceiling,
        Some(amount) if amount <= Decimal::ZERO => {
            return Err(ServiceError::ValidationError(
                "Wallet amount must be greater than zero".to_string(),
            ));
        }
        Some(amount) if amount > balance => {
            return Err(ServiceError::ValidationError(format!(
                "Wallet amount ₹{amount} exceeds wallet balance ₹{balance}"
            )));
        }
        Some(amount) if amount > final_total => {
            return Err(ServiceError::ValidationError(format!(
                "Wallet amount ₹{amount} exceeds payable total ₹{final_total}"
            )));
        }
        Some(amount) => amount,
    };

    Ok(WalletAllocation {
        wallet_amount,
        remainder: final_total - wallet_amount,
    })
}

/// Wallet balance collaborator contract.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait WalletBalanceService: Send + Sync {
    async fn balance(&self, user_id: Uuid) -> Result<Decimal, ServiceError>;
}

/// Balance reads backed by the `wallet_accounts` table. A user without a
/// wallet row has a zero balance.
#[derive(Clone)]
pub struct DbWalletBalances {
    db: Arc<DatabaseConnection>,
}

impl DbWalletBalances {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl WalletBalanceService for DbWalletBalances {
    async fn balance(&self, user_id: Uuid) -> Result<Decimal, ServiceError> {
        let account = wallet_account::Entity::find_by_id(user_id)
            .one(&*self.db)
            .await?;
        Ok(account.map(|a| a.balance).unwrap_or(Decimal::ZERO))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn default_allocation_takes_min_of_balance_and_total() {
        // Balance below the payable total
        let alloc = allocate(dec!(500), dec!(899.58), None).unwrap();
        assert_eq!(alloc.wallet_amount, dec!(500));
        assert_eq!(alloc.remainder, dec!(399.58));
        assert!(!alloc.fully_covered());

        // Balance covers the payable total
        let alloc = allocate(dec!(1000), dec!(899.58), None).unwrap();
        assert_eq!(alloc.wallet_amount, dec!(899.58));
        assert_eq!(alloc.remainder, Decimal::ZERO);
        assert!(alloc.fully_covered());
    }

    #[test]
    fn allocation_sums_to_final_total() {
        for (balance, total, requested) in [
            (dec!(500), dec!(899.58), None),
            (dec!(1000), dec!(899.58), None),
            (dec!(1000), dec!(899.58), Some(dec!(250))),
            (dec!(0), dec!(899.58), None),
        ] {
            let alloc = allocate(balance, total, requested).unwrap();
            assert_eq!(alloc.wallet_amount + alloc.remainder, total);
            assert!(alloc.wallet_amount >= Decimal::ZERO);
            assert!(alloc.remainder >= Decimal::ZERO);
        }
    }

    #[test]
    fn override_above_balance_names_the_balance_bound() {
        let err = allocate(dec!(1000), dec!(5000), Some(dec!(1500))).unwrap_err();
        match err {
            ServiceError::ValidationError(msg) => assert!(msg.contains("wallet balance")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn override_above_total_names_the_payable_bound() {
        // Absurd override against a small total
        let err = allocate(dec!(1000), dec!(899.58), Some(dec!(1000000))).unwrap_err();
        match err {
            ServiceError::ValidationError(msg) => assert!(msg.contains("balance")),
            other => panic!("unexpected error: {other:?}"),
        }

        let err = allocate(dec!(1000), dec!(899.58), Some(dec!(950))).unwrap_err();
        match err {
            ServiceError::ValidationError(msg) => assert!(msg.contains("payable total")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn zero_and_negative_overrides_are_rejected() {
        assert!(allocate(dec!(1000), dec!(500), Some(Decimal::ZERO)).is_err());
        assert!(allocate(dec!(1000), dec!(500), Some(dec!(-10))).is_err());
    }

    #[test]
    fn exact_bound_override_is_accepted() {
        let alloc = allocate(dec!(1000), dec!(899.58), Some(dec!(899.58))).unwrap();
        assert!(alloc.fully_covered());
    }
}
