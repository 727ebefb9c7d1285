//! Transaction lifecycle manager
//!
//! Accepts transaction intents, persists them, and drives each one to a terminal
//! status on its own supervised worker task.

use super::nonce::NonceManager;
use super::worker::TxWorker;
use crate::chain::ChainClient;
use crate::error::{RelayerError, RelayerResult};
use crate::signer::SignerProvider;
use crate::store::{ListTxsFilter, TxRecord, TxStatus, TxStore};

use dashmap::DashMap;
use ethers::types::{Address, Bytes};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Upper bound between store reads while a caller waits on a record
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Reliable multi-chain transaction manager
pub struct TxManager {
    pub(crate) store: Arc<dyn TxStore>,
    pub(crate) clients: HashMap<u64, Arc<dyn ChainClient>>,
    pub(crate) sender: Address,
    pub(crate) bump_interval: Duration,
    pub(crate) poll_interval: Duration,
    pub(crate) signer: SignerProvider,
    pub(crate) nonces: NonceManager,
    shutdown: CancellationToken,
    tracker: TaskTracker,
    /// Records with a live worker
    active: DashMap<String, ()>,
    /// Per-record wake-ups for waiters
    waiters: DashMap<String, Arc<Notify>>,
    started: AtomicBool,
}

impl TxManager {
    /// Create a new transaction manager
    pub fn new(
        store: Arc<dyn TxStore>,
        clients: HashMap<u64, Arc<dyn ChainClient>>,
        sender: Address,
        bump_interval: Duration,
        poll_interval: Duration,
        signer: SignerProvider,
    ) -> Self {
        Self {
            store,
            clients,
            sender,
            bump_interval,
            poll_interval,
            signer,
            nonces: NonceManager::new(sender),
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
            active: DashMap::new(),
            waiters: DashMap::new(),
            started: AtomicBool::new(false),
        }
    }

    /// Begin servicing records, resuming every pending record in the store
    pub async fn start(self: &Arc<Self>) -> RelayerResult<()> {
        if self.shutdown.is_cancelled() {
            return Err(RelayerError::ManagerStopped);
        }
        if self.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let pending = self
            .store
            .list_txs(ListTxsFilter::status(TxStatus::Pending))
            .await?;

        let mut resumed = 0;
        for record in pending {
            if !self.clients.contains_key(&record.chain_id) {
                warn!(
                    "Skipping pending tx {}: chain {} is not configured",
                    record.id, record.chain_id
                );
                continue;
            }

            if let Some(nonce) = record.nonce {
                self.nonces.reserve(record.chain_id, nonce).await;
            }
            if self.spawn_worker(record) {
                resumed += 1;
            }
        }

        info!(
            "Transaction manager started for {} chains, sender {:?}, resumed {} pending transactions",
            self.clients.len(),
            self.sender,
            resumed
        );
        Ok(())
    }

    /// Cancel all workers and wait for them to exit
    pub async fn stop(&self) {
        self.shutdown.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        info!("Transaction manager stopped");
    }

    /// Persist a new transaction intent and schedule it; returns the record ID
    pub async fn submit_async(
        self: &Arc<Self>,
        chain_id: u64,
        to: Address,
        data: Bytes,
        gas_limit: u64,
    ) -> RelayerResult<String> {
        if self.shutdown.is_cancelled() {
            return Err(RelayerError::ManagerStopped);
        }
        if !self.clients.contains_key(&chain_id) {
            return Err(RelayerError::ChainNotFound { chain_id });
        }
        (self.signer)(chain_id)?;

        let id = Uuid::new_v4().to_string();
        let record = TxRecord::new(id.clone(), chain_id, to, data, gas_limit);
        self.store.store_tx(record.clone()).await?;

        crate::metrics::record_tx_submitted(chain_id);
        debug!("Accepted tx {} for chain {} to {:?}", id, chain_id, to);

        if self.started.load(Ordering::SeqCst) {
            self.spawn_worker(record);
        }

        Ok(id)
    }

    /// Wait until the record has been broadcast at least once, or has finished
    /// without ever being broadcast
    pub async fn wait_tx(&self, id: &str, cancel: &CancellationToken) -> RelayerResult<TxRecord> {
        self.wait_for(id, cancel, |record| {
            record.is_broadcast() || record.is_completed()
        })
        .await
    }

    /// Wait until the record reaches a terminal status
    pub async fn wait_tx_completed(
        &self,
        id: &str,
        cancel: &CancellationToken,
    ) -> RelayerResult<TxRecord> {
        self.wait_for(id, cancel, TxRecord::is_completed).await
    }

    /// Fetch a record snapshot
    pub async fn get_tx(&self, id: &str) -> RelayerResult<TxRecord> {
        self.store
            .get_tx(id)
            .await?
            .ok_or_else(|| RelayerError::TransactionNotFound { tx_id: id.to_string() })
    }

    /// Chains this manager can submit to
    pub fn chain_ids(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self.clients.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Number of records with a live worker
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    async fn wait_for(
        &self,
        id: &str,
        cancel: &CancellationToken,
        ready: fn(&TxRecord) -> bool,
    ) -> RelayerResult<TxRecord> {
        let notify = self
            .waiters
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Notify::new()))
            .clone();

        loop {
            // Register before reading so a write landing in between still wakes us
            let notified = notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let record = self
                .store
                .get_tx(id)
                .await?
                .ok_or_else(|| RelayerError::TransactionNotFound { tx_id: id.to_string() })?;

            if ready(&record) {
                if record.is_completed() {
                    self.waiters.remove(id);
                }
                return Ok(record);
            }

            tokio::select! {
                _ = cancel.cancelled() => return Err(RelayerError::Cancelled),
                _ = &mut notified => {}
                _ = tokio::time::sleep(WAIT_POLL_INTERVAL) => {}
            }
        }
    }

    /// Wake everyone waiting on a record
    pub(crate) fn notify(&self, id: &str) {
        if let Some(notify) = self.waiters.get(id) {
            notify.notify_waiters();
        }
    }

    /// Final wake-up for a terminal record; drops its waiter entry
    pub(crate) fn notify_completed(&self, id: &str) {
        if let Some((_, notify)) = self.waiters.remove(id) {
            notify.notify_waiters();
        }
    }

    /// Spawn a worker unless one is already running for the record
    fn spawn_worker(self: &Arc<Self>, record: TxRecord) -> bool {
        let client = match self.clients.get(&record.chain_id) {
            Some(client) => client.clone(),
            None => return false,
        };
        if self.active.insert(record.id.clone(), ()).is_some() {
            return false;
        }

        let manager = self.clone();
        let cancel = self.shutdown.child_token();
        self.tracker.spawn(async move {
            let id = record.id.clone();
            TxWorker::new(manager.clone(), client, record, cancel)
                .run()
                .await;
            manager.active.remove(&id);
        });
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::MockChainClient;
    use crate::signer;
    use crate::signer::tests::TEST_KEY;
    use crate::store::{InMemoryTxStore, MockTxStore, SignedTx};
    use crate::tx::gas::MAX_ATTEMPTS;

    use async_trait::async_trait;
    use ethers::signers::Signer;
    use ethers::types::{TransactionReceipt, H256, U256, U64};
    use std::collections::{HashSet, VecDeque};
    use std::sync::Mutex;

    const CHAIN: u64 = 1337;
    const BUMP_INTERVAL: Duration = Duration::from_secs(36);
    const POLL_INTERVAL: Duration = Duration::from_secs(12);

    struct FakeState {
        /// Consumed front to back; the last value sticks
        suggested: VecDeque<U256>,
        pending_nonce: u64,
        sent: Vec<SignedTx>,
        mined: HashSet<H256>,
        /// Mine the n-th accepted broadcast
        mine_on_send: Option<usize>,
        /// Reject this many broadcasts first
        reject_sends: usize,
        /// Accept this many broadcasts but report a connection error
        lose_responses: usize,
        receipt_status: u64,
    }

    struct FakeChain {
        state: Mutex<FakeState>,
    }

    impl FakeChain {
        fn new(suggested: &[u64]) -> Arc<Self> {
            Arc::new(Self {
                state: Mutex::new(FakeState {
                    suggested: suggested.iter().map(|p| U256::from(*p)).collect(),
                    pending_nonce: 0,
                    sent: Vec::new(),
                    mined: HashSet::new(),
                    mine_on_send: None,
                    reject_sends: 0,
                    lose_responses: 0,
                    receipt_status: 1,
                }),
            })
        }

        fn configure(&self, f: impl FnOnce(&mut FakeState)) {
            f(&mut self.state.lock().unwrap());
        }

        fn sent(&self) -> Vec<SignedTx> {
            self.state.lock().unwrap().sent.clone()
        }

        fn sent_prices(&self) -> Vec<u64> {
            self.sent().iter().map(|tx| tx.gas_price.as_u64()).collect()
        }
    }

    #[async_trait]
    impl ChainClient for FakeChain {
        async fn pending_nonce(&self, _address: Address) -> RelayerResult<u64> {
            Ok(self.state.lock().unwrap().pending_nonce)
        }

        async fn suggest_gas_price(&self) -> RelayerResult<U256> {
            let mut state = self.state.lock().unwrap();
            if state.suggested.len() > 1 {
                Ok(state.suggested.pop_front().unwrap_or_default())
            } else {
                Ok(state.suggested.front().copied().unwrap_or_default())
            }
        }

        async fn send_transaction(&self, tx: &SignedTx) -> RelayerResult<H256> {
            let mut state = self.state.lock().unwrap();
            if state.reject_sends > 0 {
                state.reject_sends -= 1;
                return Err(RelayerError::NonceTooLow {
                    chain_id: CHAIN,
                    message: "nonce too low".to_string(),
                });
            }

            let nonce_used = state
                .sent
                .iter()
                .any(|sent| sent.nonce == tx.nonce && state.mined.contains(&sent.hash));
            if nonce_used {
                return Err(RelayerError::NonceTooLow {
                    chain_id: CHAIN,
                    message: "nonce too low".to_string(),
                });
            }

            state.sent.push(tx.clone());
            if state.mine_on_send == Some(state.sent.len()) {
                state.mined.insert(tx.hash);
            }
            if state.lose_responses > 0 {
                state.lose_responses -= 1;
                return Err(RelayerError::ChainConnection {
                    chain_id: CHAIN,
                    message: "timeout".to_string(),
                });
            }
            Ok(tx.hash)
        }

        async fn transaction_receipt(&self, hash: H256) -> RelayerResult<Option<TransactionReceipt>> {
            let state = self.state.lock().unwrap();
            if !state.mined.contains(&hash) {
                return Ok(None);
            }

            Ok(Some(TransactionReceipt {
                transaction_hash: hash,
                status: Some(U64::from(state.receipt_status)),
                block_number: Some(U64::from(100)),
                ..Default::default()
            }))
        }
    }

    fn sender() -> Address {
        signer::from_private_key(TEST_KEY).unwrap()(CHAIN).unwrap().address()
    }

    fn manager_with(
        store: Arc<dyn TxStore>,
        chain: Arc<FakeChain>,
        signer: SignerProvider,
    ) -> Arc<TxManager> {
        let mut clients: HashMap<u64, Arc<dyn ChainClient>> = HashMap::new();
        clients.insert(CHAIN, chain);
        Arc::new(TxManager::new(
            store,
            clients,
            sender(),
            BUMP_INTERVAL,
            POLL_INTERVAL,
            signer,
        ))
    }

    fn manager(chain: Arc<FakeChain>) -> Arc<TxManager> {
        manager_with(
            Arc::new(InMemoryTxStore::new()),
            chain,
            signer::from_private_key(TEST_KEY).unwrap(),
        )
    }

    async fn submit(manager: &Arc<TxManager>) -> String {
        manager
            .submit_async(
                CHAIN,
                Address::repeat_byte(0x22),
                Bytes::from(vec![0xab, 0xcd]),
                900_000,
            )
            .await
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_confirmed_on_first_broadcast() {
        let chain = FakeChain::new(&[100]);
        chain.configure(|s| s.mine_on_send = Some(1));
        let manager = manager(chain.clone());
        manager.start().await.unwrap();

        let id = submit(&manager).await;
        let record = manager
            .wait_tx_completed(&id, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(record.status, TxStatus::Succeeded);
        assert_eq!(record.receipt.unwrap().status, Some(U64::from(1)));
        assert_eq!(chain.sent_prices(), vec![115]);
        manager.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_attempts() {
        let chain = FakeChain::new(&[100]);
        chain.configure(|s| s.pending_nonce = 9);
        let manager = manager(chain.clone());
        manager.start().await.unwrap();

        let id = submit(&manager).await;
        let record = manager
            .wait_tx_completed(&id, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(record.status, TxStatus::Errored);
        assert_eq!(
            record.status_message.as_deref(),
            Some("tx not confirmed after several attempts")
        );
        assert!(record.receipt.is_none());

        let sent = chain.sent();
        assert_eq!(sent.len() as u64, MAX_ATTEMPTS);
        assert_eq!(chain.sent_prices(), vec![115, 149, 216, 345, 603]);
        assert!(sent.iter().all(|tx| tx.nonce == 9));
        assert_eq!(record.nonce, Some(9));
        assert_eq!(record.signed_tx.unwrap().gas_price, U256::from(603));
        manager.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_confirmed_after_bumps_stops_broadcasting() {
        let chain = FakeChain::new(&[100]);
        chain.configure(|s| s.mine_on_send = Some(3));
        let manager = manager(chain.clone());
        manager.start().await.unwrap();

        let id = submit(&manager).await;
        let record = manager
            .wait_tx_completed(&id, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(record.status, TxStatus::Succeeded);
        let receipt = record.receipt.unwrap();
        assert_eq!(receipt.transaction_hash, chain.sent()[2].hash);

        tokio::time::sleep(BUMP_INTERVAL * 3).await;
        assert_eq!(chain.sent_prices(), vec![115, 149, 216]);
        manager.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_suggested_price_spike() {
        let chain = FakeChain::new(&[100, 300]);
        chain.configure(|s| s.mine_on_send = Some(2));
        let manager = manager(chain.clone());
        manager.start().await.unwrap();

        let id = submit(&manager).await;
        manager
            .wait_tx_completed(&id, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(chain.sent_prices(), vec![115, 390]);
        manager.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_reverted_receipt_marks_failed() {
        let chain = FakeChain::new(&[100]);
        chain.configure(|s| {
            s.mine_on_send = Some(1);
            s.receipt_status = 0;
        });
        let manager = manager(chain.clone());
        manager.start().await.unwrap();

        let id = submit(&manager).await;
        let record = manager
            .wait_tx_completed(&id, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(record.status, TxStatus::Failed);
        assert_eq!(record.status_message.as_deref(), Some("transaction reverted"));
        assert_eq!(record.receipt.unwrap().status, Some(U64::from(0)));
        manager.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_broadcast_consumes_attempt() {
        let chain = FakeChain::new(&[100]);
        chain.configure(|s| {
            s.reject_sends = 1;
            s.mine_on_send = Some(1);
        });
        let manager = manager(chain.clone());
        manager.start().await.unwrap();

        let id = submit(&manager).await;
        let record = manager
            .wait_tx_completed(&id, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(record.status, TxStatus::Succeeded);
        // The rejected first attempt was priced at 115
        assert_eq!(chain.sent_prices(), vec![149]);
        manager.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_mined_despite_lost_send_response() {
        let chain = FakeChain::new(&[100]);
        chain.configure(|s| {
            s.mine_on_send = Some(1);
            s.lose_responses = 1;
        });
        let manager = manager(chain.clone());
        manager.start().await.unwrap();

        let id = submit(&manager).await;
        let record = manager
            .wait_tx_completed(&id, &CancellationToken::new())
            .await
            .unwrap();

        let sent = chain.sent();
        assert_eq!(record.status, TxStatus::Succeeded);
        assert_eq!(record.receipt.unwrap().transaction_hash, sent[0].hash);
        assert_eq!(record.signed_tx.unwrap().hash, sent[0].hash);
        assert_eq!(sent.len(), 1);
        manager.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_tx_returns_when_never_broadcast() {
        let chain = FakeChain::new(&[100]);
        chain.configure(|s| s.reject_sends = MAX_ATTEMPTS as usize);
        let manager = manager(chain.clone());
        manager.start().await.unwrap();

        let id = submit(&manager).await;
        let record = manager
            .wait_tx(&id, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(record.status, TxStatus::Errored);
        assert!(record.signed_tx.is_none());
        assert!(chain.sent().is_empty());
        manager.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_waiter_entries_dropped_on_completion() {
        let chain = FakeChain::new(&[100]);
        chain.configure(|s| s.mine_on_send = Some(2));
        let manager = manager(chain.clone());
        manager.start().await.unwrap();

        let id = submit(&manager).await;
        manager.wait_tx(&id, &CancellationToken::new()).await.unwrap();
        assert!(manager.waiters.contains_key(&id));

        tokio::time::sleep(BUMP_INTERVAL * 2).await;
        assert_eq!(manager.get_tx(&id).await.unwrap().status, TxStatus::Succeeded);
        assert!(manager.waiters.is_empty());
        manager.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_is_idempotent() {
        let chain = FakeChain::new(&[100]);
        chain.configure(|s| s.mine_on_send = Some(2));
        let manager = manager(chain.clone());
        manager.start().await.unwrap();

        let id = submit(&manager).await;
        let cancel = CancellationToken::new();
        let first = manager.wait_tx(&id, &cancel).await.unwrap();
        let again = manager.wait_tx(&id, &cancel).await.unwrap();
        assert_eq!(first.nonce, again.nonce);
        assert!(again.signed_tx.unwrap().gas_price >= first.signed_tx.unwrap().gas_price);

        let done = manager.wait_tx_completed(&id, &cancel).await.unwrap();
        let done_again = manager.wait_tx_completed(&id, &cancel).await.unwrap();
        assert_eq!(done.status, TxStatus::Succeeded);
        assert_eq!(done_again.status, TxStatus::Succeeded);
        assert_eq!(done.signed_tx, done_again.signed_tx);
        manager.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_cancellation_leaves_worker_running() {
        let chain = FakeChain::new(&[100]);
        let manager = manager(chain.clone());
        manager.start().await.unwrap();

        let id = submit(&manager).await;
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            trigger.cancel();
        });

        let result = manager.wait_tx_completed(&id, &cancel).await;
        assert!(matches!(result, Err(RelayerError::Cancelled)));

        let record = manager
            .wait_tx_completed(&id, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(record.status, TxStatus::Errored);
        manager.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_unknown_record() {
        let manager = manager(FakeChain::new(&[100]));
        let result = manager.wait_tx("missing", &CancellationToken::new()).await;
        assert!(matches!(
            result,
            Err(RelayerError::TransactionNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_submit_rejects_unknown_chain() {
        let manager = manager(FakeChain::new(&[100]));
        let result = manager
            .submit_async(999, Address::zero(), Bytes::default(), 21_000)
            .await;
        assert!(matches!(
            result,
            Err(RelayerError::ChainNotFound { chain_id: 999 })
        ));
    }

    #[tokio::test]
    async fn test_submit_rejects_missing_signer() {
        let store = Arc::new(InMemoryTxStore::new());
        let manager = manager_with(
            store.clone(),
            FakeChain::new(&[100]),
            signer::restricted(signer::from_private_key(TEST_KEY).unwrap(), vec![1]),
        );

        let result = manager
            .submit_async(CHAIN, Address::zero(), Bytes::default(), 21_000)
            .await;
        assert!(matches!(result, Err(RelayerError::Signer { .. })));
        assert!(store
            .list_txs(ListTxsFilter::default())
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_submit_propagates_store_failure() {
        let mut store = MockTxStore::new();
        store.expect_store_tx().returning(|_| {
            Err(RelayerError::Internal("disk full".to_string()))
        });
        let manager = manager_with(
            Arc::new(store),
            FakeChain::new(&[100]),
            signer::from_private_key(TEST_KEY).unwrap(),
        );

        let result = manager
            .submit_async(CHAIN, Address::zero(), Bytes::default(), 21_000)
            .await;
        assert!(matches!(result, Err(RelayerError::Internal(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_leaves_record_pending() {
        let chain = FakeChain::new(&[100]);
        let manager = manager(chain.clone());
        manager.start().await.unwrap();

        let id = submit(&manager).await;
        manager.wait_tx(&id, &CancellationToken::new()).await.unwrap();
        manager.stop().await;

        assert_eq!(manager.active_count(), 0);
        let record = manager.get_tx(&id).await.unwrap();
        assert_eq!(record.status, TxStatus::Pending);
        assert_eq!(chain.sent().len(), 1);

        let result = manager
            .submit_async(CHAIN, Address::zero(), Bytes::default(), 21_000)
            .await;
        assert!(matches!(result, Err(RelayerError::ManagerStopped)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_submissions_get_distinct_nonces() {
        let chain = FakeChain::new(&[100]);
        chain.configure(|s| s.pending_nonce = 4);
        let manager = manager(chain.clone());
        manager.start().await.unwrap();

        let first = submit(&manager).await;
        let second = submit(&manager).await;

        let cancel = CancellationToken::new();
        let a = manager.wait_tx(&first, &cancel).await.unwrap();
        let b = manager.wait_tx(&second, &cancel).await.unwrap();

        let mut nonces = vec![a.nonce.unwrap(), b.nonce.unwrap()];
        nonces.sort_unstable();
        assert_eq!(nonces, vec![4, 5]);
        manager.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_submitted_before_start_is_picked_up() {
        let chain = FakeChain::new(&[100]);
        chain.configure(|s| s.mine_on_send = Some(1));
        let manager = manager(chain.clone());

        let id = submit(&manager).await;
        assert!(chain.sent().is_empty());

        manager.start().await.unwrap();
        let record = manager
            .wait_tx_completed(&id, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(record.status, TxStatus::Succeeded);
        manager.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_resumes_broadcast_record_on_start() {
        let store = Arc::new(InMemoryTxStore::new());
        let previous = SignedTx {
            hash: H256::repeat_byte(0x77),
            raw: Bytes::from(vec![0x01]),
            nonce: 5,
            gas_price: U256::from(200),
        };
        let record = TxRecord::new(
            "resumed".to_string(),
            CHAIN,
            Address::repeat_byte(0x22),
            Bytes::default(),
            900_000,
        );
        store.store_tx(record).await.unwrap();
        store.update_raw_tx("resumed", previous.clone()).await.unwrap();

        let chain = FakeChain::new(&[100]);
        chain.configure(|s| {
            s.mined.insert(previous.hash);
        });
        let manager = manager_with(
            store,
            chain.clone(),
            signer::from_private_key(TEST_KEY).unwrap(),
        );
        manager.start().await.unwrap();

        let record = manager
            .wait_tx_completed("resumed", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(record.status, TxStatus::Succeeded);
        assert_eq!(record.nonce, Some(5));
        assert!(chain.sent().is_empty());
        manager.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_resumed_record_keeps_nonce_and_price_floor() {
        let store = Arc::new(InMemoryTxStore::new());
        let previous = SignedTx {
            hash: H256::repeat_byte(0x78),
            raw: Bytes::from(vec![0x01]),
            nonce: 5,
            gas_price: U256::from(200),
        };
        store
            .store_tx(TxRecord::new(
                "resumed".to_string(),
                CHAIN,
                Address::repeat_byte(0x22),
                Bytes::default(),
                900_000,
            ))
            .await
            .unwrap();
        store.update_raw_tx("resumed", previous).await.unwrap();

        let chain = FakeChain::new(&[100]);
        chain.configure(|s| s.pending_nonce = 5);
        let manager = manager_with(
            store,
            chain.clone(),
            signer::from_private_key(TEST_KEY).unwrap(),
        );
        manager.start().await.unwrap();

        // A fresh submission must not collide with the recovered nonce
        let id = submit(&manager).await;
        let fresh = manager.wait_tx(&id, &CancellationToken::new()).await.unwrap();
        assert_eq!(fresh.nonce, Some(6));

        tokio::time::sleep(Duration::from_secs(1)).await;
        let rebroadcast: Vec<_> = chain.sent().into_iter().filter(|tx| tx.nonce == 5).collect();
        assert_eq!(rebroadcast.len(), 1);
        assert_eq!(rebroadcast[0].gas_price, U256::from(230));

        let resumed = manager.get_tx("resumed").await.unwrap();
        assert_eq!(resumed.status, TxStatus::Pending);
        assert_eq!(resumed.signed_tx.unwrap().gas_price, U256::from(230));
        manager.stop().await;
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let mut client = MockChainClient::new();
        client.expect_pending_nonce().never();

        let mut clients: HashMap<u64, Arc<dyn ChainClient>> = HashMap::new();
        clients.insert(CHAIN, Arc::new(client));

        let mut store = MockTxStore::new();
        store
            .expect_list_txs()
            .times(1)
            .returning(|_| Ok(Vec::new()));

        let manager = Arc::new(TxManager::new(
            Arc::new(store),
            clients,
            Address::zero(),
            BUMP_INTERVAL,
            POLL_INTERVAL,
            signer::from_private_key(TEST_KEY).unwrap(),
        ));

        manager.start().await.unwrap();
        manager.start().await.unwrap();
        manager.stop().await;
        assert!(matches!(
            manager.start().await,
            Err(RelayerError::ManagerStopped)
        ));
    }
}
