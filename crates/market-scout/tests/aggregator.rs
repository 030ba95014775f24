//! Fan-out behaviour across several adapters, and a registry wired to a
//! scripted browser.

mod common;

use async_trait::async_trait;
use common::{by_operation, init_tracing, json_response, FakeLauncher, PageScript};
use market_scout::aggregator::Aggregator;
use market_scout::config::{DepopConfig, MercariConfig};
use market_scout::marketplace::{MarketplaceInfo, MarketplaceKind};
use market_scout::{
    Config, Listing, ListingDetail, MarketError, Marketplace, Outcome, Query, Registry, Resources,
};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

enum Behaviour {
    Listings(usize),
    Fail,
    Panic,
}

struct Stub {
    info: MarketplaceInfo,
    behaviour: Behaviour,
    calls: AtomicUsize,
}

impl Stub {
    fn new(kind: MarketplaceKind, behaviour: Behaviour) -> Arc<Self> {
        Arc::new(Self {
            info: MarketplaceInfo::new(kind, false),
            behaviour,
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl Marketplace for Stub {
    fn info(&self) -> &MarketplaceInfo {
        &self.info
    }

    async fn search(&self, query: &Query) -> Outcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        // Yield so the adapters genuinely interleave.
        tokio::time::sleep(Duration::from_millis(5)).await;
        match self.behaviour {
            Behaviour::Listings(n) => {
                let listings = (0..n)
                    .map(|i| {
                        Listing::new(&self.info.name, i.to_string(), query.text(), "$10")
                    })
                    .collect();
                Outcome::ok(&self.info.name, listings, Some(n as u64))
            }
            Behaviour::Fail => {
                Outcome::failed(&self.info.name, "upstream unavailable (HTTP 503): down")
            }
            Behaviour::Panic => panic!("selector table corrupted"),
        }
    }

    async fn listing_details(&self, id: &str) -> Result<ListingDetail, MarketError> {
        Err(MarketError::NotFound(id.to_string()))
    }

    async fn health_check(&self) -> bool {
        match self.behaviour {
            Behaviour::Listings(_) => true,
            Behaviour::Fail => false,
            Behaviour::Panic => panic!("health endpoint exploded"),
        }
    }
}

fn stub(kind: MarketplaceKind, behaviour: Behaviour) -> Arc<dyn Marketplace> {
    Stub::new(kind, behaviour)
}

#[tokio::test]
async fn test_panicking_adapter_is_isolated() {
    init_tracing();
    let ebay = Stub::new(MarketplaceKind::Ebay, Behaviour::Listings(3));
    let facebook = Stub::new(MarketplaceKind::Facebook, Behaviour::Panic);
    let mercari = Stub::new(MarketplaceKind::Mercari, Behaviour::Listings(1));
    let adapters: Vec<Arc<dyn Marketplace>> = vec![ebay.clone(), facebook.clone(), mercari.clone()];
    let agg = Aggregator::new(adapters);

    let outcomes = agg.search(&Query::new("tripod")).await;

    let names: Vec<&str> = outcomes.iter().map(|o| o.marketplace()).collect();
    assert_eq!(names, vec!["ebay", "facebook", "mercari"]);
    assert!(outcomes[0].success());
    assert_eq!(outcomes[0].listings().len(), 3);
    assert!(!outcomes[1].success());
    assert!(outcomes[1].error().unwrap().contains("selector table corrupted"));
    assert!(outcomes[1].listings().is_empty());
    assert!(outcomes[2].success());

    for stub in [&ebay, &facebook, &mercari] {
        assert_eq!(stub.calls.load(Ordering::SeqCst), 1);
    }
}

#[tokio::test]
async fn test_failed_outcomes_pass_through() {
    let agg = Aggregator::new(vec![
        stub(MarketplaceKind::Depop, Behaviour::Fail),
        stub(MarketplaceKind::Ebay, Behaviour::Listings(0)),
    ]);
    let outcomes = agg.search(&Query::new("lamp")).await;
    assert!(!outcomes[0].success());
    assert!(outcomes[0].error().unwrap().contains("HTTP 503"));
    assert!(outcomes[1].success());
    assert!(outcomes[1].listings().is_empty());
}

#[tokio::test]
async fn test_health_checks_survive_panics() {
    let agg = Aggregator::new(vec![
        stub(MarketplaceKind::Ebay, Behaviour::Listings(0)),
        stub(MarketplaceKind::Mercari, Behaviour::Fail),
        stub(MarketplaceKind::Depop, Behaviour::Panic),
    ]);
    let health = agg.health_checks().await;
    assert_eq!(
        health,
        vec![
            ("ebay".to_string(), true),
            ("mercari".to_string(), false),
            ("depop".to_string(), false),
        ]
    );
}

#[tokio::test]
async fn test_browser_adapters_share_one_launch() {
    init_tracing();
    let mercari_search: Value =
        serde_json::from_str(include_str!("fixtures/mercari_search.json")).unwrap();
    let depop_api: Value =
        serde_json::from_str(include_str!("fixtures/depop_search_api.json")).unwrap();

    let script = PageScript::default()
        .on_fetch(by_operation(HashMap::from([(
            "searchQuery",
            json_response(200, &mercari_search),
        )])))
        .capture(depop_api)
        .page("/search/", include_str!("fixtures/depop_search.html"));
    let launcher = FakeLauncher::new(script);

    let config = Config {
        enabled: vec![MarketplaceKind::Mercari, MarketplaceKind::Depop],
        mercari: MercariConfig {
            settle_ms: 10,
            ..Default::default()
        },
        depop: DepopConfig {
            grace_ms: 50,
            settle_ms: 10,
            ..Default::default()
        },
        ..Default::default()
    };
    let registry =
        Registry::build_with(&config, Resources::with_launcher(&config, launcher.clone())).unwrap();
    assert!(registry.disabled().is_empty());
    assert_eq!(launcher.launches(), 0);

    let outcomes = registry.aggregator().search(&Query::new("vintage")).await;
    assert_eq!(outcomes.len(), 2);
    assert!(outcomes.iter().all(|o| o.success()), "{outcomes:?}");
    assert_eq!(outcomes[0].marketplace(), "mercari");
    assert_eq!(outcomes[1].marketplace(), "depop");
    assert_eq!(launcher.launches(), 1);
    assert_eq!(launcher.state.opened(), 2);
    assert_eq!(launcher.state.closed(), 2);

    registry.shutdown().await;
    assert!(!registry.session().is_running().await);
}
