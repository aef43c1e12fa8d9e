//! Configuration for the token, admission and breaker components.
//!
//! [`settings::GuardConfig`] groups the sections a server embeds in its own
//! TOML file: `[tokens]`, `[rate_limit]` and `[breaker]`.

pub mod settings;
