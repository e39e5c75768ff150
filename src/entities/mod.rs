pub mod order;
pub mod order_line;
pub mod payment_transaction;
pub mod wallet_account;
