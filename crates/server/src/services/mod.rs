//! Business logic services.

pub mod email;
pub mod linking;
pub mod verification;

pub use email::{EmailError, EmailService};
pub use linking::{LinkingError, LinkingService};
pub use verification::{ConsumeError, VerificationStore};
