//! Transaction lifecycle tracking.
//!
//! ```text
//! idle -> submitting -> pending -> success
//!                   \          \-> error   (revert, abort)
//!                    \-> error  \-> timeout
//! ```
//!
//! `timeout` is not `error`: the transaction is still in the mempool and may
//! be mined later. An abort ends in `error` with `aborted: true`. RPC
//! failures while polling for the receipt are logged and polled through.

use std::future::Future;
use std::time::Duration;

use ethers::types::{TransactionReceipt, H256, U64};
use tokio::sync::watch;
use tokio::time::{sleep, sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backend::AppAuthBackend;
use crate::error::{OnchainError, OnchainResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxState {
    Idle,
    Submitting,
    Pending { tx_hash: H256 },
    Success { tx_hash: H256, block_number: Option<u64> },
    Error { message: String, tx_hash: Option<H256>, aborted: bool },
    Timeout { tx_hash: H256 },
}

impl TxState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TxState::Success { .. } | TxState::Error { .. } | TxState::Timeout { .. })
    }
}

#[derive(Debug, Clone)]
pub struct WaitOptions {
    pub timeout: Duration,
    pub poll_interval: Duration,
    /// Cancelling this token stops the receipt wait (not the transaction).
    pub cancel: CancellationToken,
}

impl Default for WaitOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(120),
            poll_interval: Duration::from_secs(2),
            cancel: CancellationToken::new(),
        }
    }
}

impl WaitOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// Publishes the state of the transaction currently being driven.
#[derive(Debug)]
pub struct TransactionTracker {
    state: watch::Sender<TxState>,
}

impl Default for TransactionTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl TransactionTracker {
    pub fn new() -> Self {
        let (state, _) = watch::channel(TxState::Idle);
        Self { state }
    }

    pub fn state(&self) -> TxState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<TxState> {
        self.state.subscribe()
    }

    pub fn reset(&self) {
        self.set(TxState::Idle);
    }

    fn set(&self, next: TxState) {
        debug!(state = ?next, "transaction state");
        self.state.send_replace(next);
    }

    pub(crate) fn fail(&self, err: OnchainError) -> OnchainError {
        self.set(TxState::Error {
            message: err.to_string(),
            tx_hash: err.tx_hash(),
            aborted: matches!(err, OnchainError::Aborted { .. }),
        });
        err
    }

    /// Submit via `submit` and wait for a successful receipt.
    pub async fn track<Fut>(
        &self,
        backend: &dyn AppAuthBackend,
        submit: Fut,
        options: &WaitOptions,
    ) -> OnchainResult<TransactionReceipt>
    where
        Fut: Future<Output = OnchainResult<H256>>,
    {
        if options.cancel.is_cancelled() {
            return Err(self.fail(OnchainError::Aborted { tx_hash: None }));
        }

        self.set(TxState::Submitting);
        let tx_hash = match submit.await {
            Ok(hash) => hash,
            Err(err) => return Err(self.fail(err)),
        };
        self.set(TxState::Pending { tx_hash });
        info!(tx = ?tx_hash, "transaction submitted");

        let deadline = Instant::now() + options.timeout;
        let outcome = tokio::select! {
            _ = options.cancel.cancelled() => Err(OnchainError::Aborted { tx_hash: Some(tx_hash) }),
            _ = sleep_until(deadline) => Err(OnchainError::Timeout { tx_hash }),
            receipt = poll_receipt(backend, tx_hash, options.poll_interval) => receipt,
        };

        match outcome {
            Ok(receipt) if receipt.status == Some(U64::zero()) => {
                warn!(tx = ?tx_hash, "transaction reverted");
                Err(self.fail(OnchainError::Reverted { tx_hash }))
            }
            Ok(receipt) => {
                let block_number = receipt.block_number.map(|n| n.as_u64());
                self.set(TxState::Success { tx_hash, block_number });
                info!(tx = ?tx_hash, block = ?block_number, "transaction confirmed");
                Ok(receipt)
            }
            Err(OnchainError::Timeout { tx_hash }) => {
                warn!(tx = ?tx_hash, "receipt wait timed out; transaction may still be mined");
                self.set(TxState::Timeout { tx_hash });
                Err(OnchainError::Timeout { tx_hash })
            }
            Err(err) => Err(self.fail(err)),
        }
    }
}

async fn poll_receipt(
    backend: &dyn AppAuthBackend,
    tx_hash: H256,
    poll_interval: Duration,
) -> OnchainResult<TransactionReceipt> {
    loop {
        match backend.receipt(tx_hash).await {
            Ok(Some(receipt)) => return Ok(receipt),
            Ok(None) => {}
            // Already broadcast: only the deadline or an abort ends the wait.
            Err(err) => warn!(tx = ?tx_hash, error = %err, "receipt poll failed; polling again"),
        }
        sleep(poll_interval).await;
    }
}
