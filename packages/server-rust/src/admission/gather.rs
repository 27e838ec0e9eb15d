//! Concurrent fan-out through the admission queue.

use std::fmt::Display;
use std::future::Future;

use futures_util::future::join_all;
use futures_util::stream::{FuturesUnordered, StreamExt};
use serde::{Deserialize, Serialize};
use switchyard_core::Priority;
use tokio::sync::Semaphore;

use super::AdmissionQueue;
use crate::error::AdmissionError;

/// How a gather treats individual failures.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatherPolicy {
    /// Every operation runs to completion; failures are returned in place.
    #[default]
    PartialOk,
    /// The first failure aborts the gather; outstanding operations are dropped.
    AllOrNothing,
}

impl AdmissionQueue {
    /// Runs `operations` through `priority`'s lane with at most `concurrency`
    /// of them in flight at once.
    ///
    /// Results keep the input order. The sub-pool limit applies on top of the
    /// lane's own limits, so a gather never takes more of the lane than
    /// `concurrency` slots.
    ///
    /// # Errors
    ///
    /// Under [`GatherPolicy::AllOrNothing`], returns the first error observed.
    /// Under [`GatherPolicy::PartialOk`] the outer result is always `Ok`.
    pub async fn gather<I, F, T, E>(
        &self,
        operations: I,
        priority: Priority,
        concurrency: usize,
        policy: GatherPolicy,
    ) -> Result<Vec<Result<T, E>>, E>
    where
        I: IntoIterator<Item = F>,
        F: Future<Output = Result<T, E>>,
        E: From<AdmissionError> + Display,
    {
        let pool = Semaphore::new(concurrency.max(1));
        let pool = &pool;

        let tasks = operations.into_iter().map(|operation| async move {
            // The pool is never closed, so acquire cannot fail.
            let _slot = pool.acquire().await.ok();
            self.submit(operation, priority, None).await
        });

        match policy {
            GatherPolicy::PartialOk => Ok(join_all(tasks).await),
            GatherPolicy::AllOrNothing => {
                let mut pending: FuturesUnordered<_> = tasks
                    .enumerate()
                    .map(|(index, task)| async move { (index, task.await) })
                    .collect();

                let mut results: Vec<Option<T>> = Vec::new();
                results.resize_with(pending.len(), || None);

                while let Some((index, result)) = pending.next().await {
                    match result {
                        Ok(value) => results[index] = Some(value),
                        Err(err) => return Err(err),
                    }
                }

                Ok(results.into_iter().flatten().map(Ok).collect())
            }
        }
    }
}
