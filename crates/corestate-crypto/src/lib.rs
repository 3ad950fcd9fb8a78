#![cfg_attr(
    not(test),
    deny(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::panic,
        clippy::unimplemented,
        clippy::todo
    )
)]

//! # corestate-crypto
//!
//! Key loading (spec §4.8) and the at-rest cipher envelope used by the
//! storage drivers: a private-key source behind a small [`KeyFetcher`]
//! capability (file, remote secret store with bearer token, remote secret
//! store with workload-identity token exchange), feeding a zstd-then-AEAD
//! [`ContentCipher`].

/// The closed error type for this crate.
pub mod error;
/// Private-key sources (`file://`, `<store>://...`) behind [`KeyFetcher`].
pub mod key_source;
/// A minimal HTTP client for a generic key-value secret store.
pub mod secret_store;
/// The compression-aware, AEAD at-rest cipher.
pub mod cipher;

pub use cipher::ContentCipher;
pub use error::CryptoError;
pub use key_source::{parse_key_source, KeyFetcher, KeySource};
