//! Payment director: the single orchestrator behind the three checkout
//! entry flows (fresh cart, buy now, retry of a failed payment).
//!
//! One `CheckoutSession` carries the attempt through the state machine
//!
//! ```text
//! Idle -> AddressRequired -> PricingReady -> AwaitingUserPaymentChoice
//!      -> Settling -> AwaitingGatewayConfirmation -> Completed | Failed
//! ```
//!
//! Pricing and wallet allocation are pure and re-run on every adjustment;
//! order creation is the only side-effecting step before settlement and
//! strictly precedes it. `AwaitingGatewayConfirmation` is resolved by the
//! external verification worker, never by this service.

use crate::{
    entities::order::{self, OrderStatus},
    errors::ServiceError,
    events::{Event, EventSender},
    services::coupons::{CouponDiscount, DiscountResolver},
    services::orders::{CreateOrderInput, OrderService, ShippingAddress},
    services::pricing::{self, CartLine, ShippingTier, Totals},
    services::settlement::{
        PaymentMethod, SettlementRequest, SettlementService, UpiDeepLink,
    },
    services::wallet::{self, WalletAllocation, WalletBalanceService},
    webhooks::VerificationNotifier,
};
use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// How this checkout attempt was entered. Explicit and typed; no ambient
/// flags distinguish the flows.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CheckoutContext {
    FreshCart { lines: Vec<CartLine> },
    BuyNow { line: CartLine },
    Retry { original_order_id: Uuid },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckoutState {
    Idle,
    AddressRequired,
    PricingReady,
    AwaitingUserPaymentChoice,
    Settling,
    AwaitingGatewayConfirmation,
    Completed,
    Failed,
}

/// The live checkout attempt. Serializable so the HTTP layer can persist it
/// in a session store between user adjustments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutSession {
    pub attempt_id: Uuid,
    pub user_id: Option<Uuid>,
    pub state: CheckoutState,
    pub lines: Vec<CartLine>,
    pub shipping_tier: ShippingTier,
    /// Fee actually charged; on retry this is the original order's stored
    /// fee, not the current tier price.
    pub shipping_fee: Decimal,
    pub lucky_discount: Decimal,
    /// True when the lucky discount was preserved from a prior attempt
    pub lucky_carried_over: bool,
    pub coupon: Option<CouponDiscount>,
    pub address: Option<ShippingAddress>,
    pub use_wallet: bool,
    /// User-requested wallet amount; `None` with `use_wallet` means "as much
    /// as possible"
    pub wallet_request: Option<Decimal>,
    /// Original order id when this attempt retries a failed payment
    pub retry_of: Option<Uuid>,
}

impl CheckoutSession {
    /// Recomputes totals from the session's current choices. Pure; safe to
    /// call on every render.
    pub fn quote(&self) -> Totals {
        pricing::compute_totals(
            &self.lines,
            self.shipping_fee,
            self.lucky_discount,
            self.coupon.as_ref(),
        )
    }

    pub fn product_ids(&self) -> Vec<Uuid> {
        self.lines.iter().map(|l| l.product_id).collect()
    }

    fn is_retry(&self) -> bool {
        self.retry_of.is_some()
    }
}

/// Final state of a successful submission.
#[derive(Debug, Clone, Serialize)]
pub struct CheckoutOutcome {
    pub order: order::Model,
    /// True when a retry found its original order gone and a replacement
    /// was created under a new identity
    pub order_recreated: bool,
    pub settlement: SettlementResult,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SettlementResult {
    /// Wallet covered everything; the order is paid.
    PaidInFull { wallet_amount: Decimal },
    /// A remainder is routed to the gateway; the order stays pending until
    /// the verification worker resolves it.
    GatewayPending {
        transaction_id: Uuid,
        amount_due: Decimal,
        payment_uri: String,
    },
}

/// Label for the submit button: a visible distinction between paying a
/// gateway remainder and paying entirely from the wallet.
pub fn payment_button_label(allocation: &WalletAllocation) -> String {
    if allocation.fully_covered() {
        "Pay with Wallet".to_string()
    } else {
        format!("Pay ₹{}", allocation.remainder.round_dp(2))
    }
}

#[derive(Clone)]
pub struct CheckoutService {
    event_sender: Arc<EventSender>,
    orders: Arc<OrderService>,
    settlement: Arc<dyn SettlementService>,
    wallet_balances: Arc<dyn WalletBalanceService>,
    discounts: DiscountResolver,
    notifier: Arc<VerificationNotifier>,
    deep_link: UpiDeepLink,
    in_flight: Arc<DashMap<Uuid, ()>>,
}

impl CheckoutService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        event_sender: Arc<EventSender>,
        orders: Arc<OrderService>,
        settlement: Arc<dyn SettlementService>,
        wallet_balances: Arc<dyn WalletBalanceService>,
        discounts: DiscountResolver,
        notifier: Arc<VerificationNotifier>,
        deep_link: UpiDeepLink,
    ) -> Self {
        Self {
            event_sender,
            orders,
            settlement,
            wallet_balances,
            discounts,
            notifier,
            deep_link,
            in_flight: Arc::new(DashMap::new()),
        }
    }

    /// Opens a checkout attempt for one of the three entry flows. The lucky
    /// discount is drawn here, once per attempt; a retry carries the value
    /// (and the shipping fee, lines, and address) from the original order.
    #[instrument(skip(self, context))]
    pub async fn begin(
        &self,
        user_id: Option<Uuid>,
        context: CheckoutContext,
        shipping_tier: ShippingTier,
    ) -> Result<CheckoutSession, ServiceError> {
        let attempt_id = Uuid::new_v4();

        let session = match context {
            CheckoutContext::FreshCart { lines } => {
                pricing::validate_lines(&lines)?;
                self.fresh_session(attempt_id, user_id, lines, shipping_tier)
            }
            CheckoutContext::BuyNow { line } => {
                let lines = vec![line];
                pricing::validate_lines(&lines)?;
                self.fresh_session(attempt_id, user_id, lines, shipping_tier)
            }
            CheckoutContext::Retry { original_order_id } => {
                self.retry_session(attempt_id, user_id, original_order_id)
                    .await?
            }
        };

        self.event_sender
            .send(Event::CheckoutStarted { attempt_id })
            .await;
        info!(
            attempt_id = %attempt_id,
            state = ?session.state,
            retry = session.is_retry(),
            "checkout attempt opened"
        );
        Ok(session)
    }

    fn fresh_session(
        &self,
        attempt_id: Uuid,
        user_id: Option<Uuid>,
        lines: Vec<CartLine>,
        shipping_tier: ShippingTier,
    ) -> CheckoutSession {
        CheckoutSession {
            attempt_id,
            user_id,
            state: CheckoutState::AddressRequired,
            lines,
            shipping_tier,
            shipping_fee: shipping_tier.fee(),
            lucky_discount: pricing::draw_lucky_discount(),
            lucky_carried_over: false,
            coupon: None,
            address: None,
            use_wallet: false,
            wallet_request: None,
            retry_of: None,
        }
    }

    /// Rebuilds a session from a previously failed order. Pricing inputs
    /// (lines, shipping fee, lucky discount, coupon, address) come from the
    /// stored order so the retried payment charges exactly what the original
    /// attempt did.
    async fn retry_session(
        &self,
        attempt_id: Uuid,
        user_id: Option<Uuid>,
        original_order_id: Uuid,
    ) -> Result<CheckoutSession, ServiceError> {
        let order = self
            .orders
            .get_order(original_order_id)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Order {original_order_id} not found"))
            })?;
        let order_lines = self.orders.get_order_lines(original_order_id).await?;

        let lines = order_lines
            .into_iter()
            .map(|l| CartLine {
                product_id: l.product_id,
                variant_id: l.variant_id,
                name: l.product_name,
                brand: l.brand,
                image_url: l.image_url,
                unit_price: l.unit_price,
                quantity: l.quantity.max(1) as u32,
            })
            .collect();

        let coupon = match (&order.coupon_code, &order.coupon_name, order.coupon_amount) {
            (Some(code), Some(name), Some(amount)) => Some(CouponDiscount {
                code: code.clone(),
                name: name.clone(),
                amount,
            }),
            _ => None,
        };

        let shipping_tier = order.shipping_method.parse().unwrap_or_default();

        Ok(CheckoutSession {
            attempt_id,
            user_id,
            state: CheckoutState::PricingReady,
            lines,
            shipping_tier,
            // Retries must not re-price shipping.
            shipping_fee: order.shipping_fee,
            lucky_discount: order.lucky_discount,
            lucky_carried_over: true,
            coupon,
            address: Some(ShippingAddress {
                full_name: order.ship_to_name.clone(),
                phone: order.ship_to_phone.clone(),
                address: order.ship_address.clone(),
                city: order.ship_city.clone(),
                state: order.ship_state.clone(),
                postal_code: order.ship_postal_code.clone(),
                country: order.ship_country.clone(),
                label: None,
            }),
            use_wallet: false,
            wallet_request: None,
            retry_of: Some(order.id),
        })
    }

    /// Attaches the shipping address chosen from the address book.
    pub fn set_address(
        &self,
        session: &mut CheckoutSession,
        address: ShippingAddress,
    ) -> Result<Totals, ServiceError> {
        session.address = Some(address);
        if matches!(
            session.state,
            CheckoutState::Idle | CheckoutState::AddressRequired
        ) {
            session.state = CheckoutState::PricingReady;
        }
        Ok(session.quote())
    }

    /// Resolves and applies a coupon, replacing any previous one. Retried
    /// payments keep their original pricing and refuse coupon changes.
    #[instrument(skip(self, session))]
    pub async fn apply_coupon(
        &self,
        session: &mut CheckoutSession,
        code: &str,
    ) -> Result<Totals, ServiceError> {
        if session.is_retry() {
            return Err(ServiceError::InvalidOperation(
                "Retried payments keep their original pricing".to_string(),
            ));
        }
        let subtotal: Decimal = session.lines.iter().map(CartLine::line_total).sum();
        let discount = self
            .discounts
            .resolve(code, subtotal, &session.product_ids())
            .await?;
        session.coupon = Some(discount);
        self.enter_payment_choice(session);
        Ok(session.quote())
    }

    pub fn remove_coupon(&self, session: &mut CheckoutSession) -> Result<Totals, ServiceError> {
        if session.is_retry() {
            return Err(ServiceError::InvalidOperation(
                "Retried payments keep their original pricing".to_string(),
            ));
        }
        session.coupon = None;
        self.enter_payment_choice(session);
        Ok(session.quote())
    }

    /// Sets the wallet preference. An out-of-bounds custom amount is
    /// rejected and the previous allocation stands.
    #[instrument(skip(self, session))]
    pub async fn set_wallet(
        &self,
        session: &mut CheckoutSession,
        use_wallet: bool,
        requested: Option<Decimal>,
    ) -> Result<WalletAllocation, ServiceError> {
        let totals = session.quote();

        if !use_wallet {
            session.use_wallet = false;
            session.wallet_request = None;
            self.enter_payment_choice(session);
            return Ok(WalletAllocation::none(totals.final_total));
        }

        let user_id = session
            .user_id
            .ok_or_else(|| ServiceError::AuthError("Sign in to use your wallet".to_string()))?;
        let balance = self.wallet_balances.balance(user_id).await?;

        // Validation failure leaves the session's wallet choice unchanged.
        let allocation = wallet::allocate(balance, totals.final_total, requested)?;

        session.use_wallet = true;
        session.wallet_request = requested;
        self.enter_payment_choice(session);
        Ok(allocation)
    }

    fn enter_payment_choice(&self, session: &mut CheckoutSession) {
        if session.address.is_some()
            && !matches!(
                session.state,
                CheckoutState::Completed | CheckoutState::AwaitingGatewayConfirmation
            )
        {
            session.state = CheckoutState::AwaitingUserPaymentChoice;
        }
    }

    /// Submits the attempt: creates (or, on retry, locates) the order, then
    /// settles. Exactly one order per attempt; concurrent submissions of the
    /// same attempt are refused.
    #[instrument(skip(self, session), fields(attempt_id = %session.attempt_id))]
    pub async fn submit(
        &self,
        session: &mut CheckoutSession,
        gateway_method: PaymentMethod,
    ) -> Result<CheckoutOutcome, ServiceError> {
        if matches!(
            session.state,
            CheckoutState::Completed | CheckoutState::AwaitingGatewayConfirmation
        ) {
            return Err(ServiceError::Conflict(
                "This checkout attempt was already submitted".to_string(),
            ));
        }

        // The guard only serializes concurrent submissions of one attempt;
        // exactly-once order creation is enforced by the attempt link on
        // the order row, so entries never outlive the call.
        if self.in_flight.insert(session.attempt_id, ()).is_some() {
            return Err(ServiceError::Conflict(
                "A submission for this attempt is already in progress".to_string(),
            ));
        }
        let result = self.submit_inner(session, gateway_method).await;
        self.in_flight.remove(&session.attempt_id);
        result
    }

    async fn submit_inner(
        &self,
        session: &mut CheckoutSession,
        gateway_method: PaymentMethod,
    ) -> Result<CheckoutOutcome, ServiceError> {
        let user_id = session
            .user_id
            .ok_or_else(|| ServiceError::AuthError("Sign in to place an order".to_string()))?;

        let Some(address) = session.address.clone() else {
            session.state = CheckoutState::AddressRequired;
            return Err(ServiceError::AddressRequired);
        };

        session.state = CheckoutState::Settling;
        let totals = session.quote();

        let allocation = if session.use_wallet {
            let balance = self.wallet_balances.balance(user_id).await?;
            match wallet::allocate(balance, totals.final_total, session.wallet_request) {
                Ok(allocation) => allocation,
                Err(e) => {
                    session.state = CheckoutState::AwaitingUserPaymentChoice;
                    return Err(e);
                }
            }
        } else {
            WalletAllocation::none(totals.final_total)
        };

        let input = CreateOrderInput {
            user_id,
            lines: session.lines.clone(),
            address,
            shipping_tier: session.shipping_tier,
            shipping_fee: session.shipping_fee,
            lucky_discount: session.lucky_discount,
            coupon: session.coupon.clone(),
            payment_method: None,
            custom_amount: None,
            attempt_id: Some(session.attempt_id),
        };

        let placement = match self.orders.create_or_get_order(session.retry_of, input).await {
            Ok(placement) => placement,
            Err(e) => {
                // No order was written; the user stays on the payment step
                // with cart and selections intact.
                session.state = CheckoutState::AwaitingUserPaymentChoice;
                return Err(e);
            }
        };
        let order_recreated = placement.was_recreated();
        let order = placement.into_order();

        // A resubmission can surface an order that is already settled, for
        // example through a stale copy of a completed session.
        if order.status() == Some(OrderStatus::Paid) {
            session.state = CheckoutState::Completed;
            return Err(ServiceError::Conflict(format!(
                "Order {} is already paid",
                order.display_order_id
            )));
        }

        let transaction_id = Uuid::new_v4();
        let method = if allocation.fully_covered() {
            PaymentMethod::Wallet
        } else {
            gateway_method
        };

        let request = SettlementRequest {
            user_id,
            order_id: order.id,
            transaction_id,
            amount: totals.final_total,
            method,
            use_wallet: session.use_wallet,
            wallet_amount: allocation.wallet_amount,
            metadata: json!({
                "attempt_id": session.attempt_id,
                "display_order_id": order.display_order_id,
                "retry_of": session.retry_of,
            }),
        };

        if let Err(e) = self.settlement.settle(request).await {
            // The order exists and stays pending; the retry flow can pick
            // it up later.
            warn!(
                order_id = %order.id,
                error = %e,
                "settlement failed after order creation"
            );
            session.state = CheckoutState::Failed;
            self.event_sender
                .send(Event::PaymentFailed {
                    order_id: order.id,
                    reason: e.to_string(),
                })
                .await;
            return Err(ServiceError::PaymentFailed(format!(
                "Payment failed; order {} is saved and can be retried",
                order.display_order_id
            )));
        }

        if allocation.fully_covered() {
            session.state = CheckoutState::Completed;
            self.event_sender
                .send(Event::PaymentCompleted {
                    order_id: order.id,
                    amount: totals.final_total,
                })
                .await;
            info!(order_id = %order.id, "order paid in full from wallet");
            return Ok(CheckoutOutcome {
                order,
                order_recreated,
                settlement: SettlementResult::PaidInFull {
                    wallet_amount: allocation.wallet_amount,
                },
            });
        }

        let payment_uri = self
            .deep_link
            .payment_uri(allocation.remainder, &transaction_id.to_string());

        // One-way signal; issued only for gateway-bound settlements and
        // never allowed to block or fail the checkout.
        self.notifier
            .notify(transaction_id, order.id, allocation.remainder);

        self.event_sender
            .send(Event::PaymentInitiated {
                order_id: order.id,
                transaction_id,
                amount: allocation.remainder,
            })
            .await;

        session.state = CheckoutState::AwaitingGatewayConfirmation;
        info!(
            order_id = %order.id,
            amount_due = %allocation.remainder,
            "gateway payment initiated"
        );

        Ok(CheckoutOutcome {
            order,
            order_recreated,
            settlement: SettlementResult::GatewayPending {
                transaction_id,
                amount_due: allocation.remainder,
                payment_uri,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::coupons::MockCouponValidator;
    use crate::services::settlement::MockSettlementService;
    use crate::services::wallet::MockWalletBalanceService;
    use rust_decimal_macros::dec;
    use sea_orm::DatabaseConnection;
    use tokio::sync::mpsc;

    fn service_with_balance(balance: Decimal) -> CheckoutService {
        let (tx, _rx) = mpsc::channel(16);
        let mut balances = MockWalletBalanceService::new();
        balances.expect_balance().returning(move |_| Ok(balance));
        let mut validator = MockCouponValidator::new();
        validator.expect_validate_coupon().returning(|_, _, _| {
            Ok(crate::services::coupons::CouponVerdict {
                valid: true,
                discount: Some(CouponDiscount {
                    code: "SAVE100".to_string(),
                    name: "Flat ₹100 Off".to_string(),
                    amount: dec!(100),
                }),
                reason: None,
            })
        });

        CheckoutService::new(
            Arc::new(EventSender::new(tx)),
            Arc::new(OrderService::new(
                Arc::new(DatabaseConnection::Disconnected),
                None,
            )),
            Arc::new(MockSettlementService::new()),
            Arc::new(balances),
            DiscountResolver::new(Arc::new(validator)),
            Arc::new(VerificationNotifier::disabled()),
            UpiDeepLink::new("store@upi", "Test Store"),
        )
    }

    fn cart_line() -> CartLine {
        CartLine {
            product_id: Uuid::new_v4(),
            variant_id: None,
            name: "Classic Blend".to_string(),
            brand: None,
            image_url: None,
            unit_price: dec!(1000),
            quantity: 1,
        }
    }

    fn address() -> ShippingAddress {
        ShippingAddress {
            full_name: "Asha Rao".to_string(),
            phone: "9999999999".to_string(),
            address: "12 MG Road".to_string(),
            city: "Bengaluru".to_string(),
            state: "Karnataka".to_string(),
            postal_code: "560001".to_string(),
            country: "India".to_string(),
            label: Some("home".to_string()),
        }
    }

    #[tokio::test]
    async fn begin_fresh_cart_requires_address() {
        let service = service_with_balance(Decimal::ZERO);
        let session = service
            .begin(
                Some(Uuid::new_v4()),
                CheckoutContext::FreshCart {
                    lines: vec![cart_line()],
                },
                ShippingTier::Standard,
            )
            .await
            .unwrap();

        assert_eq!(session.state, CheckoutState::AddressRequired);
        assert!(session.lucky_discount > Decimal::ZERO);
        assert!(session.lucky_discount <= Decimal::ONE);
        assert!(!session.lucky_carried_over);
    }

    #[tokio::test]
    async fn begin_rejects_empty_cart() {
        let service = service_with_balance(Decimal::ZERO);
        let err = service
            .begin(
                None,
                CheckoutContext::FreshCart { lines: vec![] },
                ShippingTier::Standard,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn set_address_unlocks_pricing() {
        let service = service_with_balance(Decimal::ZERO);
        let mut session = service
            .begin(
                Some(Uuid::new_v4()),
                CheckoutContext::BuyNow { line: cart_line() },
                ShippingTier::Express,
            )
            .await
            .unwrap();

        let totals = service.set_address(&mut session, address()).unwrap();
        assert_eq!(session.state, CheckoutState::PricingReady);
        assert_eq!(totals.shipping_fee, dec!(99));
        assert_eq!(totals.subtotal, dec!(1000));
    }

    #[tokio::test]
    async fn coupon_replaces_previous_coupon() {
        let service = service_with_balance(Decimal::ZERO);
        let mut session = service
            .begin(
                Some(Uuid::new_v4()),
                CheckoutContext::FreshCart {
                    lines: vec![cart_line()],
                },
                ShippingTier::Standard,
            )
            .await
            .unwrap();
        service.set_address(&mut session, address()).unwrap();

        session.coupon = Some(CouponDiscount {
            code: "OLD".to_string(),
            name: "Old".to_string(),
            amount: dec!(50),
        });
        let totals = service.apply_coupon(&mut session, "SAVE100").await.unwrap();

        assert_eq!(session.coupon.as_ref().unwrap().code, "SAVE100");
        assert_eq!(
            totals.discount_total,
            dec!(100) + session.lucky_discount
        );
        assert_eq!(session.state, CheckoutState::AwaitingUserPaymentChoice);
    }

    #[tokio::test]
    async fn invalid_wallet_override_leaves_choice_unchanged() {
        let service = service_with_balance(dec!(1000));
        let mut session = service
            .begin(
                Some(Uuid::new_v4()),
                CheckoutContext::FreshCart {
                    lines: vec![cart_line()],
                },
                ShippingTier::Standard,
            )
            .await
            .unwrap();
        service.set_address(&mut session, address()).unwrap();

        let ok = service.set_wallet(&mut session, true, Some(dec!(200))).await.unwrap();
        assert_eq!(ok.wallet_amount, dec!(200));

        // An absurd override is rejected and the earlier choice stands.
        let err = service
            .set_wallet(&mut session, true, Some(dec!(1000000)))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::ValidationError(_)));
        assert_eq!(session.wallet_request, Some(dec!(200)));
        assert!(session.use_wallet);
    }

    #[tokio::test]
    async fn wallet_requires_signed_in_user() {
        let service = service_with_balance(dec!(1000));
        let mut session = service
            .begin(
                None,
                CheckoutContext::FreshCart {
                    lines: vec![cart_line()],
                },
                ShippingTier::Standard,
            )
            .await
            .unwrap();
        service.set_address(&mut session, address()).unwrap();

        let err = service.set_wallet(&mut session, true, None).await.unwrap_err();
        assert!(matches!(err, ServiceError::AuthError(_)));
    }

    #[tokio::test]
    async fn submit_without_session_user_is_a_precondition_error() {
        let service = service_with_balance(Decimal::ZERO);
        let mut session = service
            .begin(
                None,
                CheckoutContext::FreshCart {
                    lines: vec![cart_line()],
                },
                ShippingTier::Standard,
            )
            .await
            .unwrap();
        service.set_address(&mut session, address()).unwrap();

        let err = service
            .submit(&mut session, PaymentMethod::Upi)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::AuthError(_)));
    }

    #[tokio::test]
    async fn submit_without_address_demands_address_selection() {
        let service = service_with_balance(Decimal::ZERO);
        let mut session = service
            .begin(
                Some(Uuid::new_v4()),
                CheckoutContext::FreshCart {
                    lines: vec![cart_line()],
                },
                ShippingTier::Standard,
            )
            .await
            .unwrap();

        let err = service
            .submit(&mut session, PaymentMethod::Upi)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::AddressRequired));
        assert_eq!(session.state, CheckoutState::AddressRequired);
    }

    #[tokio::test]
    async fn settlement_failure_then_resubmit_reuses_the_order() {
        use crate::db::{self, DbConfig};
        use crate::services::settlement::SettlementOutcome;
        use sea_orm::EntityTrait;

        let db_config = DbConfig {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
            min_connections: 1,
            ..Default::default()
        };
        let db = db::establish_connection(&db_config).await.unwrap();
        db::run_migrations(&db).await.unwrap();
        let db = Arc::new(db);

        let (tx, _rx) = mpsc::channel(16);
        let mut balances = MockWalletBalanceService::new();
        balances.expect_balance().returning(|_| Ok(Decimal::ZERO));
        let mut settlement = MockSettlementService::new();
        settlement.expect_settle().times(1).returning(|_| {
            Err(ServiceError::PaymentFailed(
                "gateway unreachable".to_string(),
            ))
        });
        settlement.expect_settle().times(1).returning(|req| {
            Ok(SettlementOutcome {
                success: true,
                wallet_transaction_id: None,
                gateway_transaction_id: Some(req.transaction_id),
            })
        });

        let service = CheckoutService::new(
            Arc::new(EventSender::new(tx)),
            Arc::new(OrderService::new(db.clone(), None)),
            Arc::new(settlement),
            Arc::new(balances),
            DiscountResolver::new(Arc::new(MockCouponValidator::new())),
            Arc::new(VerificationNotifier::disabled()),
            UpiDeepLink::new("store@upi", "Test Store"),
        );

        let mut session = service
            .begin(
                Some(Uuid::new_v4()),
                CheckoutContext::FreshCart {
                    lines: vec![cart_line()],
                },
                ShippingTier::Standard,
            )
            .await
            .unwrap();
        service.set_address(&mut session, address()).unwrap();

        let err = service
            .submit(&mut session, PaymentMethod::Upi)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::PaymentFailed(_)));
        assert_eq!(session.state, CheckoutState::Failed);
        let orders_after_failure = order::Entity::find().all(&*db).await.unwrap();
        assert_eq!(orders_after_failure.len(), 1);

        // Submitting the same attempt again must pick up the order the
        // failed run already wrote, never create a second one.
        let outcome = service
            .submit(&mut session, PaymentMethod::Upi)
            .await
            .unwrap();
        assert_eq!(outcome.order.id, orders_after_failure[0].id);
        assert!(!outcome.order_recreated);
        let orders = order::Entity::find().all(&*db).await.unwrap();
        assert_eq!(orders.len(), 1);
        assert_eq!(session.state, CheckoutState::AwaitingGatewayConfirmation);
    }

    #[test]
    fn payment_button_distinguishes_wallet_from_gateway() {
        let gateway = WalletAllocation {
            wallet_amount: dec!(500),
            remainder: dec!(399.58),
        };
        assert_eq!(payment_button_label(&gateway), "Pay ₹399.58");

        let wallet_only = WalletAllocation {
            wallet_amount: dec!(899.58),
            remainder: Decimal::ZERO,
        };
        assert_eq!(payment_button_label(&wallet_only), "Pay with Wallet");
    }
}
