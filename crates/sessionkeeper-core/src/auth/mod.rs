//! Client-side token handling.
//!
//! This module provides:
//! - `token`: unverified decoding of three-part bearer tokens
//! - `storage`: durable key-value backends (memory, JSON file, OS keychain)
//! - `TokenStore`: the persisted token/expiry pair and its expiry arithmetic

pub mod storage;
pub mod store;
pub mod token;

pub use storage::{FileStorage, KeyringStorage, MemoryStorage, StorageBackend, StorageError};
pub use store::{
    Reservation, StoreSettings, StoredToken, TokenStatus, TokenStatusReport, TokenStore,
};
pub use token::{decode, TokenClaims};
