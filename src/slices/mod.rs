//! # Slice Store
//!
//! Turns an unbounded input (record iterator or integer range) into an
//! ordered set of bounded slices, and distributes those slices to workers
//! with exactly-once-claim semantics. One store instance is bound to one
//! `(job, category)` collection and its resolved codec.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde_json::json;
use tracing::{debug, warn};

use crate::codec::Codec;
use crate::error::Result;
use crate::models::{JobException, Record, Slice};
use crate::state_machine::{SliceEvent, SliceState};
use crate::store::{CollectionId, InsertOutcome, Store};

/// Failure summary for one exception class across a collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionGroup {
    pub count: usize,
    /// Distinct messages seen for this class.
    pub messages: Vec<String>,
}

/// Ordered collection of slices for one job + category.
pub struct SliceStore {
    store: Arc<dyn Store>,
    collection: CollectionId,
    codec: Codec,
    slice_size: usize,
    next_slice_id: AtomicU64,
    next_record_number: AtomicU64,
}

impl SliceStore {
    /// Open a store over `collection`, continuing id/record numbering after
    /// whatever the collection already holds.
    pub async fn open(
        store: Arc<dyn Store>,
        collection: CollectionId,
        codec: Codec,
        slice_size: usize,
    ) -> Result<Self> {
        let max_id = store.max_slice_id(&collection).await?;
        let existing_records: u64 = store
            .slices(&collection)
            .await?
            .iter()
            .map(|slice| slice.record_count)
            .sum();
        Ok(Self {
            store,
            collection,
            codec,
            slice_size,
            next_slice_id: AtomicU64::new(max_id + 1),
            next_record_number: AtomicU64::new(existing_records + 1),
        })
    }

    pub fn collection(&self) -> &CollectionId {
        &self.collection
    }

    pub fn codec(&self) -> &Codec {
        &self.codec
    }

    /// Split `records` into slices of `slice_size`, flushing each full
    /// buffer as one slice. Returns the number of records uploaded.
    ///
    /// Any failure mid-upload drops the entire collection — no partial
    /// state is left behind — and the error is re-raised.
    pub async fn upload<I>(&self, records: I) -> Result<u64>
    where
        I: IntoIterator<Item = Record>,
    {
        match self.upload_inner(records).await {
            Ok(count) => Ok(count),
            Err(e) => {
                warn!(
                    collection = %self.collection,
                    error = %e,
                    "upload failed; dropping partially-built collection"
                );
                self.drop_after_failed_upload().await;
                Err(e)
            }
        }
    }

    /// Best-effort cleanup after a failed upload. The caller re-raises the
    /// original upload error; a failed drop is logged, not raised.
    async fn drop_after_failed_upload(&self) {
        if let Err(drop_err) = self.store.drop_collection(&self.collection).await {
            warn!(
                collection = %self.collection,
                error = %drop_err,
                "dropping partially-built collection failed"
            );
        }
    }

    async fn upload_inner<I>(&self, records: I) -> Result<u64>
    where
        I: IntoIterator<Item = Record>,
    {
        let mut buffer: Vec<Record> = Vec::with_capacity(self.slice_size);
        let mut uploaded: u64 = 0;

        for record in records {
            buffer.push(record);
            uploaded += 1;
            if buffer.len() >= self.slice_size {
                self.flush(std::mem::take(&mut buffer)).await?;
            }
        }
        if !buffer.is_empty() {
            self.flush(buffer).await?;
        }
        debug!(collection = %self.collection, records = uploaded, "upload complete");
        Ok(uploaded)
    }

    /// Synthesize `[start_id, end_id]` pair records covering
    /// `start..=end` in ascending order, one pair per slice.
    pub async fn upload_integer_range(&self, start: i64, end: i64) -> Result<u64> {
        let result = async {
            let mut lower = start;
            while lower <= end {
                let upper = end.min(lower + self.slice_size as i64 - 1);
                self.flush(vec![json!([lower, upper])]).await?;
                lower = upper + 1;
            }
            Ok((end - start + 1).max(0) as u64)
        }
        .await;

        match result {
            Ok(count) => Ok(count),
            Err(e) => {
                self.drop_after_failed_upload().await;
                Err(e)
            }
        }
    }

    /// Mirror of [`upload_integer_range`] that pre-assigns slices in
    /// descending record order: the first-created (lowest-id, and therefore
    /// first-claimed) slice covers the top of the range. Claiming stays
    /// ascending by id either way.
    ///
    /// [`upload_integer_range`]: SliceStore::upload_integer_range
    pub async fn upload_integer_range_in_reverse_order(
        &self,
        start: i64,
        end: i64,
    ) -> Result<u64> {
        let result = async {
            let mut upper = end;
            while upper >= start {
                let lower = start.max(upper - self.slice_size as i64 + 1);
                self.flush(vec![json!([lower, upper])]).await?;
                upper = lower - 1;
            }
            Ok((end - start + 1).max(0) as u64)
        }
        .await;

        match result {
            Ok(count) => Ok(count),
            Err(e) => {
                self.drop_after_failed_upload().await;
                Err(e)
            }
        }
    }

    async fn flush(&self, records: Vec<Record>) -> Result<()> {
        let record_count = records.len() as u64;
        let id = self.next_slice_id.fetch_add(1, Ordering::SeqCst);
        let first_record_number = self
            .next_record_number
            .fetch_add(record_count, Ordering::SeqCst);

        let slice = Slice::build(id, first_record_number, records, &self.codec)?;
        self.insert(slice).await
    }

    /// Insert with store-level dedup: a duplicate id is a benign no-op with
    /// a warning, supporting safe re-upload after partial failure.
    pub async fn insert(&self, slice: Slice) -> Result<()> {
        let id = slice.id;
        match self.store.insert_slice(&self.collection, slice).await? {
            InsertOutcome::Inserted => Ok(()),
            InsertOutcome::Duplicate => {
                warn!(
                    collection = %self.collection,
                    slice_id = id,
                    "slice already exists; ignoring duplicate insert"
                );
                Ok(())
            }
        }
    }

    /// Atomically claim the lowest-id queued slice for `worker_name`.
    /// Returns `None` when no queued slice exists.
    pub async fn next_slice(&self, worker_name: &str) -> Result<Option<Slice>> {
        self.store
            .claim_next_slice(&self.collection, worker_name)
            .await
    }

    pub async fn complete_slice(&self, slice: &mut Slice) -> Result<()> {
        slice.complete()?;
        self.store.update_slice(&self.collection, slice).await
    }

    pub async fn fail_slice(&self, slice: &mut Slice, exception: JobException) -> Result<()> {
        slice.fail_with(exception)?;
        self.store.update_slice(&self.collection, slice).await
    }

    pub async fn retry_slice(&self, slice: &mut Slice) -> Result<()> {
        slice.fire(SliceEvent::Retry)?;
        slice.worker_name = None;
        self.store.update_slice(&self.collection, slice).await
    }

    /// Reset all failed slices to queued for another attempt.
    pub async fn requeue_failed(&self) -> Result<usize> {
        self.store.requeue_failed_slices(&self.collection).await
    }

    pub async fn all(&self) -> Result<Vec<Slice>> {
        self.store.slices(&self.collection).await
    }

    pub async fn counts_by_state(
        &self,
    ) -> Result<std::collections::HashMap<SliceState, usize>> {
        self.store.slice_counts_by_state(&self.collection).await
    }

    /// Group failed slices by exception class: count plus distinct messages
    /// per class, for operator-facing failure summaries.
    pub async fn group_exceptions(&self) -> Result<BTreeMap<String, ExceptionGroup>> {
        let mut groups: BTreeMap<String, ExceptionGroup> = BTreeMap::new();
        for slice in self.store.slices(&self.collection).await? {
            if slice.state != SliceState::Failed {
                continue;
            }
            let Some(exception) = slice.exception else {
                continue;
            };
            let group = groups
                .entry(exception.class_name.clone())
                .or_insert_with(|| ExceptionGroup {
                    count: 0,
                    messages: Vec::new(),
                });
            group.count += 1;
            if !group.messages.contains(&exception.message) {
                group.messages.push(exception.message);
            }
        }
        Ok(groups)
    }
}
