//! Settlement: the only step that moves money.
//!
//! The checkout director hands settlement a stable order id, the wallet
//! amount, and the gateway remainder. The wallet debit is conditional on the
//! live balance (`UPDATE ... WHERE balance >= amount`), so two concurrent
//! checkouts against the same wallet contend here, not at allocation time,
//! and overdraft is refused atomically.

use crate::{
    db::DbPool,
    entities::order::{self, OrderStatus},
    entities::payment_transaction::{self, TransactionDirection, TransactionStatus},
    entities::wallet_account,
    errors::ServiceError,
};
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set,
    TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use strum::{Display, EnumString};
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Payment method the remainder (or the whole amount) is routed through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum PaymentMethod {
    Wallet,
    Upi,
    Qr,
}

#[derive(Debug, Clone)]
pub struct SettlementRequest {
    pub user_id: Uuid,
    pub order_id: Uuid,
    /// Identity of the gateway-bound transaction (or the wallet transaction
    /// when the wallet covers everything); doubles as the gateway reference.
    pub transaction_id: Uuid,
    /// Full amount being settled in this call
    pub amount: Decimal,
    pub method: PaymentMethod,
    pub use_wallet: bool,
    pub wallet_amount: Decimal,
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct SettlementOutcome {
    pub success: bool,
    pub wallet_transaction_id: Option<Uuid>,
    pub gateway_transaction_id: Option<Uuid>,
}

/// Settlement collaborator contract. Implementations must debit the wallet
/// with a compare-and-set balance check and must mark wallet transactions
/// completed and verified in the same transaction as the debit.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SettlementService: Send + Sync {
    async fn settle(&self, req: SettlementRequest) -> Result<SettlementOutcome, ServiceError>;
}

/// Reference settlement implementation over the local wallet and
/// transaction tables.
#[derive(Clone)]
pub struct DbSettlementService {
    db: Arc<DbPool>,
}

impl DbSettlementService {
    pub fn new(db: Arc<DbPool>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl SettlementService for DbSettlementService {
    #[instrument(skip(self, req), fields(order_id = %req.order_id, amount = %req.amount, wallet_amount = %req.wallet_amount))]
    async fn settle(&self, req: SettlementRequest) -> Result<SettlementOutcome, ServiceError> {
        if req.wallet_amount > req.amount {
            return Err(ServiceError::InvalidOperation(
                "Wallet amount exceeds settlement amount".to_string(),
            ));
        }

        let remainder = req.amount - req.wallet_amount;
        let now = Utc::now();
        let txn = self.db.begin().await?;

        let mut wallet_transaction_id = None;

        if req.use_wallet && req.wallet_amount > Decimal::ZERO {
            // Compare-and-set debit: refuses overdraft even if the balance
            // shrank between allocation and settlement.
            let debit = wallet_account::Entity::update_many()
                .col_expr(
                    wallet_account::Column::Balance,
                    Expr::col(wallet_account::Column::Balance).sub(Expr::val(req.wallet_amount)),
                )
                .col_expr(wallet_account::Column::UpdatedAt, Expr::value(now))
                .filter(wallet_account::Column::UserId.eq(req.user_id))
                .filter(wallet_account::Column::Balance.gte(req.wallet_amount))
                .exec(&txn)
                .await?;

            if debit.rows_affected == 0 {
                warn!(user_id = %req.user_id, "wallet debit refused: insufficient balance");
                return Err(ServiceError::PaymentFailed(
                    "Insufficient wallet balance".to_string(),
                ));
            }

            // The wallet leg is settled here and now, so it is completed and
            // verified in the same transaction as the debit.
            let wallet_txn_id = if remainder.is_zero() {
                req.transaction_id
            } else {
                Uuid::new_v4()
            };
            payment_transaction::ActiveModel {
                id: Set(wallet_txn_id),
                order_id: Set(Some(req.order_id)),
                user_id: Set(req.user_id),
                amount: Set(req.wallet_amount),
                direction: Set(TransactionDirection::Debit.to_string()),
                method: Set(PaymentMethod::Wallet.to_string()),
                status: Set(TransactionStatus::Completed.to_string()),
                verified: Set(true),
                created_at: Set(now),
                updated_at: Set(Some(now)),
            }
            .insert(&txn)
            .await?;
            wallet_transaction_id = Some(wallet_txn_id);
        }

        let gateway_transaction_id = if remainder > Decimal::ZERO {
            payment_transaction::ActiveModel {
                id: Set(req.transaction_id),
                order_id: Set(Some(req.order_id)),
                user_id: Set(req.user_id),
                amount: Set(remainder),
                direction: Set(TransactionDirection::Debit.to_string()),
                method: Set(req.method.to_string()),
                status: Set(TransactionStatus::Pending.to_string()),
                verified: Set(false),
                created_at: Set(now),
                updated_at: Set(Some(now)),
            }
            .insert(&txn)
            .await?;
            Some(req.transaction_id)
        } else {
            // Full wallet coverage: the order is paid as part of settlement.
            order::Entity::update_many()
                .col_expr(
                    order::Column::Status,
                    Expr::value(OrderStatus::Paid.to_string()),
                )
                .col_expr(
                    order::Column::PaymentMethod,
                    Expr::value(PaymentMethod::Wallet.to_string()),
                )
                .col_expr(order::Column::UpdatedAt, Expr::value(now))
                .filter(order::Column::Id.eq(req.order_id))
                .exec(&txn)
                .await?;
            None
        };

        txn.commit().await?;

        info!(
            order_id = %req.order_id,
            wallet_amount = %req.wallet_amount,
            gateway_remainder = %remainder,
            "settlement recorded"
        );

        Ok(SettlementOutcome {
            success: true,
            wallet_transaction_id,
            gateway_transaction_id,
        })
    }
}

/// Builder for the generic gateway deep link handed to the user when a
/// remainder must be collected externally.
#[derive(Debug, Clone)]
pub struct UpiDeepLink {
    vpa: String,
    payee_name: String,
}

impl UpiDeepLink {
    pub fn new(vpa: impl Into<String>, payee_name: impl Into<String>) -> Self {
        Self {
            vpa: vpa.into(),
            payee_name: payee_name.into(),
        }
    }

    /// `upi://pay` URI carrying the merchant identity, the amount due, and
    /// the transaction reference the verification worker will match on.
    pub fn payment_uri(&self, amount: Decimal, reference: &str) -> String {
        format!(
            "upi://pay?pa={}&pn={}&am={}&tr={}&cu=INR",
            encode_query_value(&self.vpa),
            encode_query_value(&self.payee_name),
            amount.round_dp(2),
            encode_query_value(reference),
        )
    }
}

fn encode_query_value(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}
