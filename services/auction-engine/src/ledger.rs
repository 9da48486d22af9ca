//! Ledger interface: the authoritative auction contract
//!
//! Read side: `read_auction_details`. Write side: bid submission with a
//! native-currency value transfer, finalized by a receipt. Bidders reach
//! the write side through a `BidSubmitter` capability selected at
//! construction time.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use types::clock::Clock;
use types::ids::{Address, AuctionId};
use types::numeric::Amount;
use uuid::Uuid;

use crate::retry::Retryable;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("transient ledger failure: {0}")]
    Transient(String),

    #[error("permanent ledger failure: {0}")]
    Permanent(String),

    #[error("transaction reverted: {0}")]
    Reverted(String),
}

impl Retryable for LedgerError {
    fn is_transient(&self) -> bool {
        matches!(self, LedgerError::Transient(_))
    }
}

/// Contract state as returned by `readAuctionDetails`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerDetails {
    pub seller: String,
    pub title: String,
    pub image_ref: String,
    pub starting_bid: Amount,
    pub end_time: DateTime<Utc>,
    pub ended: bool,
    pub highest_bidder: Option<Address>,
    /// Zero while no bid has been placed
    pub highest_bid: Amount,
}

/// Reference to a submitted, not yet final, transaction
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TxReference(pub String);

/// Finality confirmation for a submitted bid
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    pub tx: TxReference,
    pub confirmed_at: DateTime<Utc>,
}

#[async_trait]
pub trait Ledger: Send + Sync {
    /// `Ok(None)` when the ledger has no contract for this auction.
    async fn read_auction_details(
        &self,
        auction_id: &AuctionId,
    ) -> Result<Option<LedgerDetails>, LedgerError>;

    async fn submit_bid(
        &self,
        auction_id: &AuctionId,
        bidder: &Address,
        amount: Amount,
    ) -> Result<TxReference, LedgerError>;

    /// Resolves once the transaction is final; `Reverted` if it failed.
    async fn await_receipt(&self, tx: &TxReference) -> Result<Receipt, LedgerError>;
}

/// Bidder-side capability: who is bidding and how the bid reaches the ledger.
#[async_trait]
pub trait BidSubmitter: Send + Sync {
    /// Raw address as presented by the bidder; validated by admission.
    fn address(&self) -> &str;

    async fn submit_bid(
        &self,
        auction_id: &AuctionId,
        amount: Amount,
    ) -> Result<TxReference, LedgerError>;
}

/// Submitter that relays a bid for `address` straight to a ledger.
pub struct LedgerSession {
    address: String,
    ledger: Arc<dyn Ledger>,
}

impl LedgerSession {
    pub fn new(address: impl Into<String>, ledger: Arc<dyn Ledger>) -> Self {
        Self {
            address: address.into(),
            ledger,
        }
    }
}

#[async_trait]
impl BidSubmitter for LedgerSession {
    fn address(&self) -> &str {
        &self.address
    }

    async fn submit_bid(
        &self,
        auction_id: &AuctionId,
        amount: Amount,
    ) -> Result<TxReference, LedgerError> {
        let bidder = Address::parse(&self.address)
            .map_err(|e| LedgerError::Permanent(e.to_string()))?;
        self.ledger.submit_bid(auction_id, &bidder, amount).await
    }
}

#[derive(Debug, Clone)]
struct PendingTx {
    auction_id: AuctionId,
    bidder: Address,
    amount: Amount,
}

#[derive(Debug, Default)]
struct LedgerState {
    auctions: BTreeMap<AuctionId, LedgerDetails>,
    pending: BTreeMap<TxReference, PendingTx>,
}

/// In-memory ledger.
///
/// Mirrors the contract's acceptance rule (bid above the current highest,
/// auction not ended) at receipt time so concurrent submissions race the
/// same way they would on chain.
pub struct MemoryLedger {
    state: RwLock<LedgerState>,
    clock: Arc<dyn Clock>,
    unreachable: AtomicBool,
    revert_next: AtomicBool,
    hold_receipts: AtomicBool,
}

impl MemoryLedger {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: RwLock::new(LedgerState::default()),
            clock,
            unreachable: AtomicBool::new(false),
            revert_next: AtomicBool::new(false),
            hold_receipts: AtomicBool::new(false),
        }
    }

    pub async fn register(&self, auction_id: AuctionId, details: LedgerDetails) {
        self.state.write().await.auctions.insert(auction_id, details);
    }

    /// Every call fails transiently while set.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// The next receipt resolves as reverted.
    pub fn revert_next(&self) {
        self.revert_next.store(true, Ordering::SeqCst);
    }

    /// Receipts never resolve while set (stuck transaction).
    pub fn hold_receipts(&self, hold: bool) {
        self.hold_receipts.store(hold, Ordering::SeqCst);
    }

    /// Flag the auction as ended on the contract.
    pub async fn end_auction(&self, auction_id: &AuctionId) {
        if let Some(details) = self.state.write().await.auctions.get_mut(auction_id) {
            details.ended = true;
        }
    }

    pub async fn details(&self, auction_id: &AuctionId) -> Option<LedgerDetails> {
        self.state.read().await.auctions.get(auction_id).cloned()
    }

    fn check_reachable(&self) -> Result<(), LedgerError> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(LedgerError::Transient("ledger unreachable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn read_auction_details(
        &self,
        auction_id: &AuctionId,
    ) -> Result<Option<LedgerDetails>, LedgerError> {
        self.check_reachable()?;
        Ok(self.state.read().await.auctions.get(auction_id).cloned())
    }

    async fn submit_bid(
        &self,
        auction_id: &AuctionId,
        bidder: &Address,
        amount: Amount,
    ) -> Result<TxReference, LedgerError> {
        self.check_reachable()?;
        let mut state = self.state.write().await;
        if !state.auctions.contains_key(auction_id) {
            return Err(LedgerError::Permanent(format!(
                "no contract for auction {}",
                auction_id
            )));
        }

        let tx = TxReference(format!("0x{}", Uuid::now_v7().simple()));
        state.pending.insert(
            tx.clone(),
            PendingTx {
                auction_id: auction_id.clone(),
                bidder: bidder.clone(),
                amount,
            },
        );
        debug!(tx = %tx.0, auction_id = %auction_id, amount = %amount, "Bid transaction submitted");
        Ok(tx)
    }

    async fn await_receipt(&self, tx: &TxReference) -> Result<Receipt, LedgerError> {
        if self.hold_receipts.load(Ordering::SeqCst) {
            futures::future::pending::<()>().await;
        }
        self.check_reachable()?;

        let mut state = self.state.write().await;
        let pending = state
            .pending
            .remove(tx)
            .ok_or_else(|| LedgerError::Permanent(format!("unknown transaction {}", tx.0)))?;

        if self.revert_next.swap(false, Ordering::SeqCst) {
            warn!(tx = %tx.0, "Transaction reverted (injected)");
            return Err(LedgerError::Reverted("execution reverted".to_string()));
        }

        let now = self.clock.now();
        let details = state
            .auctions
            .get_mut(&pending.auction_id)
            .ok_or_else(|| LedgerError::Permanent("auction vanished".to_string()))?;

        if details.ended || now >= details.end_time {
            return Err(LedgerError::Reverted("auction already ended".to_string()));
        }
        if pending.amount <= details.highest_bid || pending.amount < details.starting_bid {
            return Err(LedgerError::Reverted(format!(
                "bid {} does not beat {}",
                pending.amount, details.highest_bid
            )));
        }

        details.highest_bid = pending.amount;
        details.highest_bidder = Some(pending.bidder.clone());
        info!(
            tx = %tx.0,
            auction_id = %pending.auction_id,
            bidder = %pending.bidder,
            amount = %pending.amount,
            "Bid confirmed"
        );

        Ok(Receipt {
            tx: tx.clone(),
            confirmed_at: now,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use types::clock::ManualClock;

    fn start() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2025-03-01T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn bidder() -> Address {
        Address::parse("0x52908400098527886E0F7030069857D2E4169EE7").unwrap()
    }

    async fn ledger_with_auction() -> (MemoryLedger, AuctionId) {
        let ledger = MemoryLedger::new(Arc::new(ManualClock::new(start())));
        let id = AuctionId::new("QmLedger");
        ledger
            .register(
                id.clone(),
                LedgerDetails {
                    seller: "0x0000000000000000000000000000000000000001".into(),
                    title: "Lamp".into(),
                    image_ref: String::new(),
                    starting_bid: Amount::from_u64(100),
                    end_time: start() + Duration::hours(1),
                    ended: false,
                    highest_bidder: None,
                    highest_bid: Amount::ZERO,
                },
            )
            .await;
        (ledger, id)
    }

    #[tokio::test]
    async fn test_receipt_applies_bid() {
        let (ledger, id) = ledger_with_auction().await;
        let tx = ledger
            .submit_bid(&id, &bidder(), Amount::from_u64(110))
            .await
            .unwrap();
        let receipt = ledger.await_receipt(&tx).await.unwrap();
        assert_eq!(receipt.tx, tx);

        let details = ledger.details(&id).await.unwrap();
        assert_eq!(details.highest_bid, Amount::from_u64(110));
        assert_eq!(details.highest_bidder, Some(bidder()));
    }

    #[tokio::test]
    async fn test_injected_revert() {
        let (ledger, id) = ledger_with_auction().await;
        ledger.revert_next();
        let tx = ledger
            .submit_bid(&id, &bidder(), Amount::from_u64(110))
            .await
            .unwrap();
        assert!(matches!(
            ledger.await_receipt(&tx).await,
            Err(LedgerError::Reverted(_))
        ));
        assert_eq!(ledger.details(&id).await.unwrap().highest_bid, Amount::ZERO);
    }

    #[tokio::test]
    async fn test_unreachable_is_transient() {
        let (ledger, id) = ledger_with_auction().await;
        ledger.set_unreachable(true);
        let err = ledger.read_auction_details(&id).await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_session_rejects_malformed_address() {
        let (ledger, id) = ledger_with_auction().await;
        let session = LedgerSession::new("nobody", Arc::new(ledger));
        let err = session
            .submit_bid(&id, Amount::from_u64(110))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Permanent(_)));
    }
}
