pub mod checkout;
pub mod coupons;
pub mod orders;
pub mod pricing;
pub mod settlement;
pub mod wallet;
