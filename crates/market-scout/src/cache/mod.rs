//! Small in-process caches shared by adapters of the same kind.
//!
//! Both caches are single-owner objects handed to adapters through an
//! `Arc`, so tests can build private instances. Entries are idempotent
//! re-derivations of their key: concurrent writers for one key are allowed
//! and the last write wins.

pub mod location;
pub mod token;

pub use location::{LocationCache, LocationCoordinates};
pub use token::{CachedToken, TokenCache, TOKEN_REFRESH_MARGIN};
