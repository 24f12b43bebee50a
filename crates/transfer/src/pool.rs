//! Bounded-concurrency execution of transfer batches.

use crate::engine::TransferEngine;
use crate::error::ErrorKind;
use crate::request::TransferRequest;
use crate::result::TransferResult;
use crate::space::{Locality, locality_of};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Which way files are moving between the tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum Direction {
    ToCache,
    ToArray,
}

/// Maximum transfers in flight, per direction and locality.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct PoolLimits {
    pub to_cache_local: usize,
    pub to_cache_network: usize,
    pub to_array_local: usize,
    pub to_array_network: usize,
}
impl Default for PoolLimits {
    fn default() -> Self {
        Self { to_cache_local: 5, to_cache_network: 2, to_array_local: 2, to_array_network: 1 }
    }
}
impl PoolLimits {
    pub fn get(&self, direction: Direction, locality: Locality) -> usize {
        match (direction, locality) {
            (Direction::ToCache, Locality::Local) => self.to_cache_local,
            (Direction::ToCache, Locality::Network) => self.to_cache_network,
            (Direction::ToArray, Locality::Local) => self.to_array_local,
            (Direction::ToArray, Locality::Network) => self.to_array_network,
        }
    }
}

/// Results of a [`TransferPool::run`].
#[derive(Debug)]
pub struct PoolRun {
    /// One result per started request, in submission order.
    pub results: Vec<TransferResult>,
    /// Requests never started because the batch was cancelled.
    pub skipped: Vec<TransferRequest>,
}
impl PoolRun {
    pub fn cancelled(&self) -> bool {
        !self.skipped.is_empty()
    }
}

/// Runs transfers in parallel, bounded independently for each combination
/// of [`Direction`] and [`Locality`].
///
/// The limits are shared by every batch run through the same pool.
#[derive(Debug, Clone)]
pub struct TransferPool {
    engine: TransferEngine,
    to_cache_local: Arc<Semaphore>,
    to_cache_network: Arc<Semaphore>,
    to_array_local: Arc<Semaphore>,
    to_array_network: Arc<Semaphore>,
}
impl TransferPool {
    pub fn new(engine: TransferEngine, limits: PoolLimits) -> Self {
        let semaphore = |permits: usize| Arc::new(Semaphore::new(permits.max(1)));
        Self {
            engine,
            to_cache_local: semaphore(limits.to_cache_local),
            to_cache_network: semaphore(limits.to_cache_network),
            to_array_local: semaphore(limits.to_array_local),
            to_array_network: semaphore(limits.to_array_network),
        }
    }

    pub fn engine(&self) -> &TransferEngine {
        &self.engine
    }

    fn semaphore(&self, direction: Direction, locality: Locality) -> &Arc<Semaphore> {
        match (direction, locality) {
            (Direction::ToCache, Locality::Local) => &self.to_cache_local,
            (Direction::ToCache, Locality::Network) => &self.to_cache_network,
            (Direction::ToArray, Locality::Local) => &self.to_array_local,
            (Direction::ToArray, Locality::Network) => &self.to_array_network,
        }
    }

    /// Executes `requests`, waiting for a free slot before starting each one.
    ///
    /// Cancellation is checked between submissions only: transfers already
    /// started run to completion, the rest are returned as skipped.
    pub async fn run(
        &self,
        direction: Direction,
        requests: Vec<TransferRequest>,
        cancel: &CancellationToken,
    ) -> PoolRun {
        let total = requests.len();
        let mut tasks = JoinSet::new();
        let mut submitted: Vec<(PathBuf, PathBuf)> = Vec::with_capacity(total);
        let mut skipped = Vec::new();
        let mut pending = requests.into_iter();

        for request in pending.by_ref() {
            if cancel.is_cancelled() {
                skipped.push(request);
                break;
            }
            let locality = locality_of(&request.source, &request.destination).await;
            let semaphore = self.semaphore(direction, locality).clone();
            let permit = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    skipped.push(request);
                    break;
                },
                permit = semaphore.acquire_owned() => match permit {
                    Ok(permit) => permit,
                    // Never closed.
                    Err(_) => {
                        skipped.push(request);
                        break;
                    },
                },
            };
            let index = submitted.len();
            submitted.push((request.source.clone(), request.destination.clone()));
            let engine = self.engine.clone();
            tasks.spawn(async move {
                let _permit = permit;
                (index, engine.execute(request).await)
            });
        }
        skipped.extend(pending);
        if !skipped.is_empty() {
            info!(skipped = skipped.len(), "Batch cancelled; remaining transfers not started");
        }

        let mut slots: Vec<Option<TransferResult>> = (0..submitted.len()).map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, result)) => slots[index] = Some(result),
                Err(e) => error!(error = %e, "Transfer task panicked"),
            }
        }
        let results = slots
            .into_iter()
            .zip(submitted)
            .map(|(slot, (source, destination))| {
                slot.unwrap_or_else(|| {
                    TransferResult::rejected(source, destination, ErrorKind::IoFailure("transfer task panicked".into()))
                })
            })
            .collect::<Vec<_>>();
        debug!(total, started = results.len(), "Batch finished");
        PoolRun { results, skipped }
    }
}
