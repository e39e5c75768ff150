//! Checkout payment orchestration service.
//!
//! One director (`services::checkout`) drives the three checkout entry
//! flows — fresh cart, buy now, and retry of a failed payment — through
//! pricing, wallet allocation, exactly-once order creation, and settlement.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod services;
pub mod webhooks;

use axum::Router;
use dashmap::DashMap;
use sea_orm::DatabaseConnection;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use uuid::Uuid;

use services::checkout::{CheckoutService, CheckoutSession};
use services::coupons::{CouponValidator, DiscountResolver};
use services::orders::OrderService;
use services::settlement::{DbSettlementService, UpiDeepLink};
use services::wallet::DbWalletBalances;
use webhooks::VerificationNotifier;

/// Sessions idle longer than this are dropped; an abandoned cart holds no
/// database state, so expiry loses nothing that matters.
const SESSION_TTL: Duration = Duration::from_secs(30 * 60);

struct StoredSession {
    session: CheckoutSession,
    touched_at: Instant,
}

/// In-memory store for live checkout sessions, keyed by attempt id.
/// Entries expire after [`SESSION_TTL`] of inactivity so abandoned
/// checkouts do not accumulate.
pub struct SessionStore {
    entries: DashMap<Uuid, StoredSession>,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    pub fn insert(&self, session: CheckoutSession) {
        self.entries.insert(
            session.attempt_id,
            StoredSession {
                session,
                touched_at: Instant::now(),
            },
        );
    }

    /// Returns the session and refreshes its idle clock. An expired entry
    /// is removed and reported as absent.
    pub fn get(&self, attempt_id: &Uuid) -> Option<CheckoutSession> {
        let expired = match self.entries.get_mut(attempt_id) {
            Some(mut entry) => {
                if entry.touched_at.elapsed() <= self.ttl {
                    entry.touched_at = Instant::now();
                    return Some(entry.session.clone());
                }
                true
            }
            None => return None,
        };
        if expired {
            self.entries.remove(attempt_id);
        }
        None
    }

    pub fn remove(&self, attempt_id: &Uuid) -> Option<CheckoutSession> {
        self.entries.remove(attempt_id).map(|(_, e)| e.session)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drops every expired session, returning how many were removed.
    pub fn prune_expired(&self) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| entry.touched_at.elapsed() <= self.ttl);
        before - self.entries.len()
    }

    /// Periodic sweep; spawned once at startup.
    pub async fn prune_loop(self: Arc<Self>, period: Duration) {
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            let removed = self.prune_expired();
            if removed > 0 {
                tracing::debug!(removed, remaining = self.len(), "pruned expired checkout sessions");
            }
        }
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(SESSION_TTL)
    }
}

/// Shared application state for the HTTP layer.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: config::AppConfig,
    pub event_sender: events::EventSender,
    pub checkout_service: Arc<CheckoutService>,
    pub order_service: Arc<OrderService>,
    /// Live checkout sessions keyed by attempt id
    pub sessions: Arc<SessionStore>,
}

impl AppState {
    /// Wires the service graph over one database connection. The coupon
    /// validator is injected because coupon rules belong to the catalog
    /// collaborator, not to this service.
    pub fn new(
        db: Arc<DatabaseConnection>,
        config: config::AppConfig,
        event_sender: events::EventSender,
        coupon_validator: Arc<dyn CouponValidator>,
    ) -> Self {
        let sender = Arc::new(event_sender.clone());
        let order_service = Arc::new(OrderService::new(db.clone(), Some(sender.clone())));
        let checkout_service = Arc::new(CheckoutService::new(
            sender,
            order_service.clone(),
            Arc::new(DbSettlementService::new(db.clone())),
            Arc::new(DbWalletBalances::new(db.clone())),
            DiscountResolver::new(coupon_validator),
            Arc::new(VerificationNotifier::new(
                config.verification_worker_url.clone(),
                config.verification_webhook_secret.clone(),
            )),
            UpiDeepLink::new(config.merchant_vpa.clone(), config.merchant_name.clone()),
        ));

        Self {
            db,
            config,
            event_sender,
            checkout_service,
            order_service,
            sessions: Arc::new(SessionStore::default()),
        }
    }
}

/// Assembles the application router with tracing and CORS layers.
pub fn app(state: AppState) -> Router {
    handlers::router()
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// JSON envelope used by all success responses.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
        }
    }
}
