//! Identity, session and relationship core.
//!
//! Everything here is synchronous and talks to persistence only through
//! [`tsuki_types::store::Store`]. Callers on an async runtime should run
//! these operations on a blocking thread.

pub mod accounts;
pub mod error;
pub mod identity;
pub mod notify;
pub mod password;
pub mod session;
pub mod toggle;
pub mod token;
pub mod verification;

pub use accounts::{Accounts, Session};
pub use error::{AuthError, Result};
pub use identity::{IdentityNormalizer, Resolution};
pub use notify::{LogNotifier, Notifier};
pub use session::SessionGate;
pub use toggle::ToggleStateManager;
pub use token::{TokenProfile, TokenService};
pub use verification::{MailPayload, Redemption, VerificationFlow};
