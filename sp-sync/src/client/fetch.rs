//! Queue fetch requests to fetch data from the indexer

use std::{collections::VecDeque, future::Future, sync::Arc, time::Duration};

use tokio::sync::{mpsc::UnboundedReceiver, oneshot};

use crate::client::{BlockIndexer, FetchRequest, IndexerError};

/// Receives [`crate::client::FetchRequest`]'s via an [`tokio::sync::mpsc::UnboundedReceiver`] for queueing
/// and fetching from the indexer.
/// Returns the data specified in the [`crate::client::FetchRequest`] variant via the provided [`tokio::sync::oneshot::Sender`].
///
/// All requests to the indexer are handled from this single task, in the order they were sent. Each
/// request is bounded by `request_timeout`.
pub async fn fetch(
    mut fetch_request_receiver: UnboundedReceiver<FetchRequest>,
    indexer: Arc<dyn BlockIndexer>,
    request_timeout: Duration,
) {
    let mut fetch_request_queue: VecDeque<FetchRequest> = VecDeque::new();

    loop {
        // returns here when all requests have been served and every sender is dropped
        if receive_fetch_requests(&mut fetch_request_receiver, &mut fetch_request_queue).await {
            tracing::debug!("Fetch request channel closed.");
            return;
        }

        if let Some(request) = fetch_request_queue.pop_front() {
            fetch_from_indexer(indexer.as_ref(), request_timeout, request).await;
        }
    }
}

// receives fetch requests and populates the fetch request queue
//
// returns `true` if the fetch request channel is closed and all fetch requests have been completed
async fn receive_fetch_requests(
    receiver: &mut UnboundedReceiver<FetchRequest>,
    fetch_request_queue: &mut VecDeque<FetchRequest>,
) -> bool {
    // if there are no fetch requests to process, sleep until the next fetch request is received
    // or channel is closed
    if fetch_request_queue.is_empty() {
        match receiver.recv().await {
            Some(fetch_request) => fetch_request_queue.push_back(fetch_request),
            None => return true,
        }
    }
    // receive all remaining fetch requests from channel
    loop {
        match receiver.try_recv() {
            Ok(fetch_request) => fetch_request_queue.push_back(fetch_request),
            Err(tokio::sync::mpsc::error::TryRecvError::Empty) => break,
            Err(tokio::sync::mpsc::error::TryRecvError::Disconnected) => {
                return fetch_request_queue.is_empty();
            }
        }
    }

    false
}

async fn fetch_from_indexer(
    indexer: &dyn BlockIndexer,
    request_timeout: Duration,
    fetch_request: FetchRequest,
) {
    match fetch_request {
        FetchRequest::ChainTip(sender) => {
            tracing::debug!("Fetching chain tip.");
            reply(sender, with_timeout(request_timeout, indexer.chain_tip()).await);
        }
        FetchRequest::Tweaks(sender, height, dust_limit) => {
            tracing::debug!(height, dust_limit, "Fetching tweaks.");
            reply(
                sender,
                with_timeout(request_timeout, indexer.tweaks(height, dust_limit)).await,
            );
        }
        FetchRequest::Filter(sender, height, filter_type) => {
            tracing::debug!(height, ?filter_type, "Fetching filter.");
            reply(
                sender,
                with_timeout(request_timeout, indexer.filter(height, filter_type)).await,
            );
        }
        FetchRequest::Utxos(sender, height) => {
            tracing::debug!(height, "Fetching utxos.");
            reply(
                sender,
                with_timeout(request_timeout, indexer.utxos(height)).await,
            );
        }
        FetchRequest::SpentIndex(sender, height) => {
            tracing::debug!(height, "Fetching spent index.");
            reply(
                sender,
                with_timeout(request_timeout, indexer.spent_index(height)).await,
            );
        }
    }
}

async fn with_timeout<T>(
    request_timeout: Duration,
    request: impl Future<Output = Result<T, IndexerError>>,
) -> Result<T, IndexerError> {
    tokio::time::timeout(request_timeout, request)
        .await
        .unwrap_or(Err(IndexerError::Timeout))
}

// the requester may have given up, eg. on cancellation
fn reply<T>(sender: oneshot::Sender<T>, value: T) {
    if sender.send(value).is_err() {
        tracing::debug!("Fetch requester dropped before the reply arrived.");
    }
}
