/// Outbound notification delivery for external workers
pub mod verification;

pub use verification::{VerificationNotifier, VerificationPayload};
