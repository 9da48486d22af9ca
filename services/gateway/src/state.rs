use crate::config::GatewayConfig;
use crate::rate_limit::RateLimiter;
use crate::upstream::{HttpContentStore, HttpLedger};
use auction_engine::admission::BidAdmissionService;
use auction_engine::catalog::AuctionCatalog;
use auction_engine::ledger::{Ledger, LedgerDetails, MemoryLedger};
use auction_engine::lifecycle::LifecycleMonitor;
use auction_engine::snapshot::AuctionSnapshotBuilder;
use auction_engine::store::{ContentStore, MemoryContentStore};
use event_broker::BrokerHandle;
use reqwest::Client;
use std::sync::Arc;
use types::auction::AuctionView;
use types::clock::{Clock, SystemClock};
use types::numeric::Amount;

#[derive(Clone)]
pub struct AppState {
    pub snapshots: Arc<AuctionSnapshotBuilder>,
    pub catalog: Arc<AuctionCatalog>,
    pub admission: Arc<BidAdmissionService>,
    pub ledger: Arc<dyn Ledger>,
    pub broker: BrokerHandle,
    pub lifecycle: Arc<LifecycleMonitor>,
    pub rate_limiter: Arc<RateLimiter>,
    /// Present when running on the in-memory ledger: new auctions get
    /// their contract there.
    pub local_ledger: Option<Arc<MemoryLedger>>,
}

impl AppState {
    pub fn new(
        config: GatewayConfig,
        store: Arc<dyn ContentStore>,
        ledger: Arc<dyn Ledger>,
        local_ledger: Option<Arc<MemoryLedger>>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let broker = BrokerHandle::new(config.broker_config());
        let snapshots = Arc::new(AuctionSnapshotBuilder::new(
            store.clone(),
            ledger.clone(),
            clock.clone(),
            config.snapshot_config(),
        ));
        let catalog = Arc::new(AuctionCatalog::new(
            store.clone(),
            snapshots.clone(),
            clock.clone(),
        ));
        let admission = Arc::new(BidAdmissionService::new(
            snapshots.clone(),
            ledger.clone(),
            store,
            Arc::new(broker.clone()),
            config.admission_config(),
        ));
        let lifecycle = Arc::new(LifecycleMonitor::new(
            snapshots.clone(),
            Arc::new(broker.clone()),
            clock,
        ));

        Self {
            snapshots,
            catalog,
            admission,
            ledger,
            broker,
            lifecycle,
            rate_limiter: Arc::new(RateLimiter::new()),
            local_ledger,
        }
    }

    /// HTTP upstreams where URLs are configured, in-memory ones otherwise.
    pub fn from_config(config: GatewayConfig) -> Result<Self, anyhow::Error> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let http_client = Client::builder().timeout(config.fetch_timeout).build()?;

        let store: Arc<dyn ContentStore> = match &config.content_store_url {
            Some(url) => {
                tracing::info!(url = %url, "Using pinning service content store");
                Arc::new(HttpContentStore::new(
                    http_client.clone(),
                    url.clone(),
                    config.gateway_template.clone(),
                    config.content_api_key.clone(),
                    config.content_api_secret.clone(),
                ))
            }
            None => {
                tracing::warn!("CONTENT_STORE_URL not set, using in-memory content store");
                Arc::new(MemoryContentStore::new())
            }
        };

        let (ledger, local_ledger) = match &config.ledger_url {
            Some(url) => {
                tracing::info!(url = %url, "Using ledger relay");
                let relay: Arc<dyn Ledger> = Arc::new(HttpLedger::new(http_client, url.clone()));
                (relay, None)
            }
            None => {
                tracing::warn!("LEDGER_URL not set, using in-memory ledger");
                let memory = Arc::new(MemoryLedger::new(clock.clone()));
                let ledger: Arc<dyn Ledger> = memory.clone();
                (ledger, Some(memory))
            }
        };

        Ok(Self::new(config, store, ledger, local_ledger, clock))
    }

    /// Give a freshly created auction a contract on the in-memory ledger.
    pub async fn register_local_contract(&self, view: &AuctionView) {
        let Some(ledger) = &self.local_ledger else {
            return;
        };
        ledger
            .register(
                view.id.clone(),
                LedgerDetails {
                    seller: view.seller_address.clone(),
                    title: view.title.clone(),
                    image_ref: String::new(),
                    starting_bid: view.starting_bid,
                    end_time: view.end_time,
                    ended: false,
                    highest_bidder: None,
                    highest_bid: Amount::ZERO,
                },
            )
            .await;
    }
}
