//! In-memory stores behind the core source traits.

pub mod policy;
pub mod users;

pub use policy::ConfigPolicySource;
pub use users::{StoredUser, UserStore};
