//! Insert-or-replace by primary key.

use futures::{StreamExt, TryStreamExt, stream};
use tracing::debug;

use crate::store::{Record, Store, StoreError};

/// Upsert one record, returning the stored row.
///
/// An existing row has every field replaced; a missing row is inserted with
/// the record's own id. Rejections are returned as-is, without retry.
///
/// # Errors
///
/// Returns `StoreError::ConstraintViolation` if the store rejects the row.
pub async fn upsert<S: Store>(store: &S, record: &Record) -> Result<Record, StoreError> {
    store.upsert(record).await
}

/// Upsert a batch of records of one kind with at most `concurrency` calls in
/// flight.
///
/// Stops at the first error. Upserts that completed before it stay in the
/// store, so the batch can be re-run from the top. Returns the number of
/// records written.
///
/// # Errors
///
/// Returns the first `StoreError` any upsert produced.
pub async fn upsert_all<S: Store>(
    store: &S,
    records: &[Record],
    concurrency: usize,
) -> Result<usize, StoreError> {
    stream::iter(records)
        .map(Ok)
        .try_for_each_concurrent(concurrency.max(1), |record| async move {
            store.upsert(record).await.map(|_| ())
        })
        .await?;

    debug!(count = records.len(), concurrency, "Upserted batch");
    Ok(records.len())
}
