//! Coupon resolution.
//!
//! Validity rules (date windows, minimum cart value, usage limits, product
//! scoping) live with the catalog collaborator behind [`CouponValidator`];
//! this module only fails fast on blank codes and adapts the verdict into
//! the discount shape the pricing engine consumes.

use crate::errors::ServiceError;
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

/// A resolved coupon ready to enter the discount stack. At most one is
/// active per attempt; applying a new one replaces the previous.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CouponDiscount {
    pub code: String,
    pub name: String,
    pub amount: Decimal,
}

/// Catalog-side verdict on a coupon code.
#[derive(Debug, Clone)]
pub struct CouponVerdict {
    pub valid: bool,
    pub discount: Option<CouponDiscount>,
    /// Human-readable rejection reason when invalid
    pub reason: Option<String>,
}

/// Catalog/discount collaborator contract.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CouponValidator: Send + Sync {
    async fn validate_coupon(
        &self,
        code: &str,
        cart_value: Decimal,
        product_ids: &[Uuid],
    ) -> Result<CouponVerdict, ServiceError>;
}

#[derive(Clone)]
pub struct DiscountResolver {
    validator: Arc<dyn CouponValidator>,
}

impl DiscountResolver {
    pub fn new(validator: Arc<dyn CouponValidator>) -> Self {
        Self { validator }
    }

    /// Resolves a user-supplied code into a discount. Blank codes are
    /// rejected before any lookup reaches the catalog.
    #[instrument(skip(self, product_ids))]
    pub async fn resolve(
        &self,
        code: &str,
        cart_value: Decimal,
        product_ids: &[Uuid],
    ) -> Result<CouponDiscount, ServiceError> {
        let code = code.trim();
        if code.is_empty() {
            return Err(ServiceError::InvalidInput(
                "Coupon code cannot be empty".to_string(),
            ));
        }

        let verdict = self
            .validator
            .validate_coupon(code, cart_value, product_ids)
            .await?;

        match verdict {
            CouponVerdict {
                valid: true,
                discount: Some(discount),
                ..
            } => {
                info!(code = %discount.code, amount = %discount.amount, "coupon applied");
                Ok(discount)
            }
            CouponVerdict { reason, .. } => Err(ServiceError::CouponRejected(
                reason.unwrap_or_else(|| "This coupon cannot be applied".to_string()),
            )),
        }
    }
}

/// In-memory coupon book. Stands in for the catalog service in deployments
/// that have not wired a real one, and in tests.
#[derive(Debug, Clone, Default)]
pub struct StaticCouponBook {
    coupons: std::collections::HashMap<String, StaticCoupon>,
}

#[derive(Debug, Clone)]
pub struct StaticCoupon {
    pub name: String,
    pub amount: Decimal,
    pub min_cart_value: Decimal,
}

impl StaticCouponBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_coupon(mut self, code: &str, name: &str, amount: Decimal, min_cart_value: Decimal) -> Self {
        self.coupons.insert(
            code.to_uppercase(),
            StaticCoupon {
                name: name.to_string(),
                amount,
                min_cart_value,
            },
        );
        self
    }
}

#[async_trait]
impl CouponValidator for StaticCouponBook {
    async fn validate_coupon(
        &self,
        code: &str,
        cart_value: Decimal,
        _product_ids: &[Uuid],
    ) -> Result<CouponVerdict, ServiceError> {
        match self.coupons.get(&code.to_uppercase()) {
            None => Ok(CouponVerdict {
                valid: false,
                discount: None,
                reason: Some(format!("Coupon {code} does not exist")),
            }),
            Some(coupon) if cart_value < coupon.min_cart_value => Ok(CouponVerdict {
                valid: false,
                discount: None,
                reason: Some(format!(
                    "Coupon {} needs a cart worth at least ₹{}",
                    code, coupon.min_cart_value
                )),
            }),
            Some(coupon) => Ok(CouponVerdict {
                valid: true,
                discount: Some(CouponDiscount {
                    code: code.to_uppercase(),
                    name: coupon.name.clone(),
                    amount: coupon.amount,
                }),
                reason: None,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn resolver_with(verdict: CouponVerdict) -> DiscountResolver {
        let mut validator = MockCouponValidator::new();
        validator
            .expect_validate_coupon()
            .returning(move |_, _, _| Ok(verdict.clone()));
        DiscountResolver::new(Arc::new(validator))
    }

    #[tokio::test]
    async fn blank_code_fails_before_any_lookup() {
        let mut validator = MockCouponValidator::new();
        validator.expect_validate_coupon().never();
        let resolver = DiscountResolver::new(Arc::new(validator));

        for code in ["", "   ", "\t\n"] {
            let err = resolver.resolve(code, dec!(1000), &[]).await.unwrap_err();
            assert!(matches!(err, ServiceError::InvalidInput(_)));
        }
    }

    #[tokio::test]
    async fn valid_verdict_becomes_discount() {
        let resolver = resolver_with(CouponVerdict {
            valid: true,
            discount: Some(CouponDiscount {
                code: "SAVE100".to_string(),
                name: "Flat ₹100 Off".to_string(),
                amount: dec!(100),
            }),
            reason: None,
        });

        let discount = resolver.resolve(" SAVE100 ", dec!(1000), &[]).await.unwrap();
        assert_eq!(discount.amount, dec!(100));
        assert_eq!(discount.name, "Flat ₹100 Off");
    }

    #[tokio::test]
    async fn rejection_surfaces_catalog_reason() {
        let resolver = resolver_with(CouponVerdict {
            valid: false,
            discount: None,
            reason: Some("Coupon expired on 2026-01-01".to_string()),
        });

        let err = resolver.resolve("OLD", dec!(1000), &[]).await.unwrap_err();
        match err {
            ServiceError::CouponRejected(reason) => {
                assert!(reason.contains("expired"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn static_book_enforces_minimum_cart_value() {
        let book = StaticCouponBook::new().with_coupon(
            "SAVE100",
            "Flat ₹100 Off",
            dec!(100),
            dec!(500),
        );
        let resolver = DiscountResolver::new(Arc::new(book));

        let err = resolver.resolve("SAVE100", dec!(200), &[]).await.unwrap_err();
        assert!(matches!(err, ServiceError::CouponRejected(_)));

        let discount = resolver.resolve("save100", dec!(1000), &[]).await.unwrap();
        assert_eq!(discount.amount, dec!(100));
        assert_eq!(discount.code, "SAVE100");
    }

    #[tokio::test]
    async fn valid_flag_without_discount_is_a_rejection() {
        let resolver = resolver_with(CouponVerdict {
            valid: true,
            discount: None,
            reason: None,
        });

        let err = resolver.resolve("WEIRD", dec!(1000), &[]).await.unwrap_err();
        assert!(matches!(err, ServiceError::CouponRejected(_)));
    }
}
