// Copyright 2026 Market Scout Contributors
// SPDX-License-Identifier: Apache-2.0

//! Market Scout: one search, many secondhand marketplaces.
//!
//! A [`Query`] goes in, normalized [`Listing`]s come out. Each marketplace
//! is reached through its own [`Marketplace`] adapter; the [`Aggregator`]
//! fans a query out to all of them and isolates their failures.

#![allow(clippy::new_without_default)]

pub mod adapters;
pub mod aggregator;
pub mod cache;
pub mod config;
pub mod error;
pub mod http_client;
pub mod marketplace;
pub mod model;
pub mod registry;
pub mod renderer;
pub mod structured;

pub use aggregator::Aggregator;
pub use config::Config;
pub use error::{MarketError, MarketResult};
pub use marketplace::{Marketplace, MarketplaceInfo, MarketplaceKind};
pub use model::{Condition, Listing, ListingDetail, Outcome, Query, SortOrder};
pub use registry::{Registry, Resources};
