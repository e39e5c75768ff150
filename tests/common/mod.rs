//! Test harness: application state over an in-memory SQLite database with
//! a seeded coupon book.

use std::sync::Arc;

use chrono::Utc;
use checkout_api::{
    config::AppConfig,
    db::{self, DbConfig},
    entities::wallet_account,
    events::{self, EventSender},
    services::checkout::CheckoutService,
    services::coupons::StaticCouponBook,
    services::orders::{OrderService, ShippingAddress},
    services::pricing::CartLine,
    AppState,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sea_orm::{ActiveModelTrait, Set};
use tokio::sync::mpsc;
use uuid::Uuid;

pub struct TestApp {
    pub state: AppState,
    #[allow(dead_code)]
    event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    /// Fresh in-memory database with the default coupon book.
    pub async fn new() -> Self {
        Self::with_coupons(
            StaticCouponBook::new().with_coupon("SAVE100", "Flat ₹100 Off", dec!(100), dec!(500)),
        )
        .await
    }

    pub async fn with_coupons(book: StaticCouponBook) -> Self {
        // A single connection: every pooled connection to sqlite::memory:
        // would otherwise see its own empty database.
        let db_config = DbConfig {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
            min_connections: 1,
            ..Default::default()
        };
        let db = db::establish_connection(&db_config)
            .await
            .expect("database connection");
        db::run_migrations(&db).await.expect("schema setup");

        let (event_tx, event_rx) = mpsc::channel(1024);
        let event_sender = EventSender::new(event_tx);
        let event_task = tokio::spawn(events::process_events(event_rx));

        let cfg = AppConfig::new(
            "sqlite::memory:".to_string(),
            "store@ybl".to_string(),
            "Test Store".to_string(),
        );

        let state = AppState::new(Arc::new(db), cfg, event_sender, Arc::new(book));
        Self { state, event_task }
    }

    #[allow(dead_code)]
    pub fn checkout(&self) -> Arc<CheckoutService> {
        self.state.checkout_service.clone()
    }

    #[allow(dead_code)]
    pub fn orders(&self) -> Arc<OrderService> {
        self.state.order_service.clone()
    }

    /// Creates (or replaces) the user's wallet with the given balance.
    pub async fn seed_wallet(&self, user_id: Uuid, balance: Decimal) {
        use sea_orm::EntityTrait;
        wallet_account::Entity::delete_by_id(user_id)
            .exec(&*self.state.db)
            .await
            .expect("wallet cleanup");
        wallet_account::ActiveModel {
            user_id: Set(user_id),
            balance: Set(balance),
            updated_at: Set(Utc::now()),
        }
        .insert(&*self.state.db)
        .await
        .expect("wallet seed");
    }

    #[allow(dead_code)]
    pub async fn wallet_balance(&self, user_id: Uuid) -> Decimal {
        use sea_orm::EntityTrait;
        wallet_account::Entity::find_by_id(user_id)
            .one(&*self.state.db)
            .await
            .expect("wallet lookup")
            .map(|a| a.balance)
            .unwrap_or(Decimal::ZERO)
    }
}

#[allow(dead_code)]
pub fn cart_line(name: &str, unit_price: Decimal, quantity: u32) -> CartLine {
    CartLine {
        product_id: Uuid::new_v4(),
        variant_id: None,
        name: name.to_string(),
        brand: Some("Classic".to_string()),
        image_url: Some("https://cdn.example/p.jpg".to_string()),
        unit_price,
        quantity,
    }
}

#[allow(dead_code)]
pub fn shipping_address() -> ShippingAddress {
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
