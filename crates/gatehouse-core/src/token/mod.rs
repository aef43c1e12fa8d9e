//! Token issuing and verification.
//!
//! - [`codec`]: stateless sign/verify of a single token against one secret.
//! - [`service`]: access/refresh pairs with independent secrets, and
//!   refresh-token redemption against the current user record.

pub mod codec;
pub mod service;

pub use codec::{issue, issue_at, unix_now, verify, verify_at, Claims, ClaimsInput};
pub use service::{TokenPair, TokenService};
