//! Per-collection operational façade
//!
//! `DbSet` wraps one untyped collection and optionally owns a
//! `ClientSession`. Every operation picks the session path when a
//! transaction is active and the caller did not opt out via the
//! `not_in_transaction` flag on its options; otherwise it runs on the bare
//! collection handle. The session is released when the `DbSet` drops.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bson::{doc, Bson, Document as BsonDocument};
use datakit_common::{DataKitError, Result};
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use mongodb::options::{
    FindOneAndUpdateOptions, InsertManyOptions, ReplaceOptions, ReturnDocument, UpdateOptions,
};
use mongodb::{ClientSession, Collection};
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;

use crate::options::{
    BulkWriteOptions, FacetOptions, FacetPage, FindOptions, FindOptionsPaging, PagedResult,
};
use crate::query::{Query, TextSearchOptions};
use crate::update::Update;
use crate::validation::{validate_filter, ValidatedCollectionName};

/// One operation of a bulk write
#[derive(Debug, Clone)]
pub enum WriteOp {
    InsertOne {
        document: BsonDocument,
    },
    UpdateOne {
        filter: Query,
        update: Update,
        upsert: bool,
    },
    UpdateMany {
        filter: Query,
        update: Update,
        upsert: bool,
    },
    ReplaceOne {
        filter: Query,
        replacement: BsonDocument,
        upsert: bool,
    },
    DeleteOne {
        filter: Query,
    },
    DeleteMany {
        filter: Query,
    },
}

/// Accumulated counts of a bulk write
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BulkWriteSummary {
    pub inserted: u64,
    pub matched: u64,
    pub modified: u64,
    pub deleted: u64,
    pub upserted: u64,
}

impl BulkWriteSummary {
    /// Total documents touched: inserted + matched + modified + deleted
    pub fn affected(&self) -> u64 {
        self.inserted + self.matched + self.modified + self.deleted
    }

    fn absorb(&mut self, other: BulkWriteSummary) {
        self.inserted += other.inserted;
        self.matched += other.matched;
        self.modified += other.modified;
        self.deleted += other.deleted;
        self.upserted += other.upserted;
    }
}

/// Outcome of a single update/replace call
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateOutcome {
    pub matched: u64,
    pub modified: u64,
    pub upserted_id: Option<Bson>,
}

/// Façade over one untyped document collection
pub struct DbSet {
    name: ValidatedCollectionName,
    collection: Collection<BsonDocument>,
    session: Option<Arc<Mutex<ClientSession>>>,
    in_transaction: Arc<AtomicBool>,
}

impl DbSet {
    /// Sessionless façade
    pub fn new(name: ValidatedCollectionName, collection: Collection<BsonDocument>) -> Self {
        Self {
            name,
            collection,
            session: None,
            in_transaction: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Façade owning a session for transactional use
    pub fn with_session(
        name: ValidatedCollectionName,
        collection: Collection<BsonDocument>,
        session: ClientSession,
    ) -> Self {
        Self {
            name,
            collection,
            session: Some(Arc::new(Mutex::new(session))),
            in_transaction: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Collection name
    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    /// Whether this `DbSet` owns a session
    pub fn has_session(&self) -> bool {
        self.session.is_some()
    }

    /// Whether a transaction is currently active
    pub fn in_transaction(&self) -> bool {
        self.in_transaction.load(Ordering::Acquire)
    }

    // The session to run on, honoring the per-call opt-out. None outside a
    // transaction: sessionless reads keep the lazy cursor path.
    fn active_session(&self, not_in_transaction: bool) -> Option<&Arc<Mutex<ClientSession>>> {
        if not_in_transaction || !self.in_transaction() {
            None
        } else {
            self.session.as_ref()
        }
    }

    /// Start a transaction on the owned session
    pub async fn begin_transaction(&self) -> Result<()> {
        let session = self.require_session()?;
        let mut guard = session.lock().await;
        guard.start_transaction().await?;
        self.in_transaction.store(true, Ordering::Release);
        tracing::debug!(collection = %self.name, "transaction started");
        Ok(())
    }

    /// Commit the active transaction
    pub async fn commit_transaction(&self) -> Result<()> {
        let session = self.require_session()?;
        let mut guard = session.lock().await;
        guard.commit_transaction().await?;
        self.in_transaction.store(false, Ordering::Release);
        tracing::debug!(collection = %self.name, "transaction committed");
        Ok(())
    }

    /// Abort the active transaction
    pub async fn abort_transaction(&self) -> Result<()> {
        let session = self.require_session()?;
        let mut guard = session.lock().await;
        guard.abort_transaction().await?;
        self.in_transaction.store(false, Ordering::Release);
        tracing::debug!(collection = %self.name, "transaction aborted");
        Ok(())
    }

    fn require_session(&self) -> Result<&Arc<Mutex<ClientSession>>> {
        self.session.as_ref().ok_or_else(|| {
            DataKitError::Validation(
                "DbSet has no session; construct it with transactional_db_set".to_string(),
            )
        })
    }

    /// Find matching documents as a lazy, forward-only, single-pass stream
    ///
    /// Re-enumerating requires a new call. On the transactional path the
    /// cursor is drained eagerly (session cursors need exclusive session
    /// access) and re-exposed as a stream.
    pub async fn find<T>(
        &self,
        query: &Query,
        options: &FindOptions,
    ) -> Result<BoxStream<'static, Result<T>>>
    where
        T: DeserializeOwned + Send + Sync + 'static,
    {
        validate_filter(query.as_document())?;
        let typed = self.collection.clone_with_type::<T>();
        let filter = query.to_document();
        let driver_options = options.to_driver();

        if let Some(session) = self.active_session(options.not_in_transaction) {
            let mut guard = session.lock().await;
            let mut cursor = typed
                .find(filter)
                .with_options(driver_options)
                .session(&mut *guard)
                .await?;
            let mut items: Vec<Result<T>> = Vec::new();
            while let Some(item) = cursor.next(&mut guard).await {
                items.push(item.map_err(DataKitError::from));
            }
            Ok(futures::stream::iter(items).boxed())
        } else {
            let cursor = typed.find(filter).with_options(driver_options).await?;
            Ok(cursor.map_err(DataKitError::from).boxed())
        }
    }

    /// Find one matching document
    ///
    /// When the query carries an attached `Update`, runs
    /// find-one-and-update and returns the post-image.
    pub async fn find_one<T>(&self, query: &Query, options: &FindOptions) -> Result<Option<T>>
    where
        T: DeserializeOwned + Send + Sync + 'static,
    {
        validate_filter(query.as_document())?;
        let typed = self.collection.clone_with_type::<T>();
        let filter = query.to_document();
        let session = self.active_session(options.not_in_transaction);

        if let Some(update) = query.update() {
            let mut driver_options = FindOneAndUpdateOptions::default();
            driver_options.sort = options.sort.clone();
            driver_options.projection = options.projection.clone();
            driver_options.return_document = Some(ReturnDocument::After);
            let modifications = update.to_modifications();

            let found = if let Some(session) = session {
                let mut guard = session.lock().await;
                typed
                    .find_one_and_update(filter, modifications)
                    .with_options(driver_options)
                    .session(&mut *guard)
                    .await?
            } else {
                typed
                    .find_one_and_update(filter, modifications)
                    .with_options(driver_options)
                    .await?
            };
            Ok(found)
        } else {
            let driver_options = options.to_driver_find_one();
            let found = if let Some(session) = session {
                let mut guard = session.lock().await;
                typed
                    .find_one(filter)
                    .with_options(driver_options)
                    .session(&mut *guard)
                    .await?
            } else {
                typed.find_one(filter).with_options(driver_options).await?
            };
            Ok(found)
        }
    }

    /// Find one page of matching documents plus pagination metadata
    ///
    /// Validates the paging options before any database call, counts the
    /// full result set ignoring paging, then fetches at most
    /// `min(page_size, total - offset)` items.
    pub async fn find_paged<T>(
        &self,
        query: &Query,
        paging: &FindOptionsPaging,
    ) -> Result<PagedResult<T>>
    where
        T: DeserializeOwned + Send + Sync + 'static,
    {
        paging.validate()?;
        validate_filter(query.as_document())?;

        let not_in_transaction = paging.options.not_in_transaction;
        let total = self
            .count_filter(query.to_document(), not_in_transaction)
            .await?;

        let (skip, take) = page_window(total, paging.page, paging.page_size);
        if take == 0 {
            return Ok(PagedResult::new(
                Vec::new(),
                paging.page,
                paging.page_size,
                total,
            ));
        }

        let mut options = paging.options.clone();
        options.skip = Some(skip);
        options.limit = Some(take as i64);

        let mut stream = self.find::<T>(query, &options).await?;
        let mut items = Vec::with_capacity(take as usize);
        while let Some(item) = stream.try_next().await? {
            items.push(item);
        }

        tracing::debug!(
            collection = %self.name,
            page = paging.page,
            page_size = paging.page_size,
            returned = items.len(),
            total = total,
            "paged find"
        );

        Ok(PagedResult::new(items, paging.page, paging.page_size, total))
    }

    /// Count matching documents, ignoring skip/limit
    pub async fn count(&self, query: &Query) -> Result<u64> {
        validate_filter(query.as_document())?;
        self.count_filter(query.to_document(), false).await
    }

    async fn count_filter(&self, filter: BsonDocument, not_in_transaction: bool) -> Result<u64> {
        let count = if let Some(session) = self.active_session(not_in_transaction) {
            let mut guard = session.lock().await;
            self.collection
                .count_documents(filter)
                .session(&mut *guard)
                .await?
        } else {
            self.collection.count_documents(filter).await?
        };
        Ok(count)
    }

    /// Insert one document, returning its id
    pub async fn insert_one(&self, document: BsonDocument) -> Result<Bson> {
        let result = if let Some(session) = self.active_session(false) {
            let mut guard = session.lock().await;
            self.collection
                .insert_one(document)
                .session(&mut *guard)
                .await?
        } else {
            self.collection.insert_one(document).await?
        };
        Ok(result.inserted_id)
    }

    /// Insert many documents, returning their ids in input order
    pub async fn insert_many(
        &self,
        documents: Vec<BsonDocument>,
        ordered: bool,
    ) -> Result<Vec<Bson>> {
        let mut options = InsertManyOptions::default();
        options.ordered = Some(ordered);

        let result = if let Some(session) = self.active_session(false) {
            let mut guard = session.lock().await;
            self.collection
                .insert_many(documents)
                .with_options(options)
                .session(&mut *guard)
                .await?
        } else {
            self.collection
                .insert_many(documents)
                .with_options(options)
                .await?
        };

        let mut ids: Vec<(usize, Bson)> = result.inserted_ids.into_iter().collect();
        ids.sort_by_key(|(index, _)| *index);
        Ok(ids.into_iter().map(|(_, id)| id).collect())
    }

    /// Replace the first matching document
    pub async fn replace_one(
        &self,
        query: &Query,
        replacement: BsonDocument,
        upsert: bool,
    ) -> Result<UpdateOutcome> {
        validate_filter(query.as_document())?;
        let mut options = ReplaceOptions::default();
        options.upsert = Some(upsert);
        let filter = query.to_document();

        let result = if let Some(session) = self.active_session(false) {
            let mut guard = session.lock().await;
            self.collection
                .replace_one(filter, replacement)
                .with_options(options)
                .session(&mut *guard)
                .await?
        } else {
            self.collection
                .replace_one(filter, replacement)
                .with_options(options)
                .await?
        };
        Ok(UpdateOutcome {
            matched: result.matched_count,
            modified: result.modified_count,
            upserted_id: result.upserted_id,
        })
    }

    /// Update the first matching document
    pub async fn update_one(&self, query: &Query, update: &Update) -> Result<UpdateOutcome> {
        self.update_with(query, update, false, false).await
    }

    /// Update all matching documents
    pub async fn update_many(&self, query: &Query, update: &Update) -> Result<UpdateOutcome> {
        self.update_with(query, update, true, false).await
    }

    async fn update_with(
        &self,
        query: &Query,
        update: &Update,
        many: bool,
        upsert: bool,
    ) -> Result<UpdateOutcome> {
        validate_filter(query.as_document())?;
        let filter = query.to_document();
        let modifications = update.to_modifications();
        let mut options = UpdateOptions::default();
        options.upsert = Some(upsert);

        let result = if let Some(session) = self.active_session(false) {
            let mut guard = session.lock().await;
            if many {
                self.collection
                    .update_many(filter, modifications)
                    .with_options(options)
                    .session(&mut *guard)
                    .await?
            } else {
                self.collection
                    .update_one(filter, modifications)
                    .with_options(options)
                    .session(&mut *guard)
                    .await?
            }
        } else if many {
            self.collection
                .update_many(filter, modifications)
                .with_options(options)
                .await?
        } else {
            self.collection
                .update_one(filter, modifications)
                .with_options(options)
                .await?
        };

        Ok(UpdateOutcome {
            matched: result.matched_count,
            modified: result.modified_count,
            upserted_id: result.upserted_id,
        })
    }

    /// Delete the first matching document, returning the deleted count
    pub async fn delete_one(&self, query: &Query) -> Result<u64> {
        self.delete_with(query, false).await
    }

    /// Delete all matching documents, returning the deleted count
    pub async fn delete_many(&self, query: &Query) -> Result<u64> {
        self.delete_with(query, true).await
    }

    async fn delete_with(&self, query: &Query, many: bool) -> Result<u64> {
        validate_filter(query.as_document())?;
        let filter = query.to_document();

        let result = if let Some(session) = self.active_session(false) {
            let mut guard = session.lock().await;
            if many {
                self.collection
                    .delete_many(filter)
                    .session(&mut *guard)
                    .await?
            } else {
                self.collection
                    .delete_one(filter)
                    .session(&mut *guard)
                    .await?
            }
        } else if many {
            self.collection.delete_many(filter).await?
        } else {
            self.collection.delete_one(filter).await?
        };
        Ok(result.deleted_count)
    }

    /// Run an aggregation pipeline through a `$facet` paging stage
    ///
    /// Appends a `$facet` stage with a `result` branch (`$skip` + `$limit`)
    /// and a `total` branch (`$count`), executes once, and returns the
    /// windowed items plus the unwindowed total. A facet producing no
    /// document is treated as zero results.
    pub async fn aggregate<T>(
        &self,
        pipeline: Vec<BsonDocument>,
        options: &FacetOptions,
    ) -> Result<FacetPage<T>>
    where
        T: DeserializeOwned,
    {
        options.validate()?;

        let mut stages = pipeline;
        stages.push(facet_stage(options.skip, options.limit));

        let facet = if let Some(session) = self.active_session(options.not_in_transaction) {
            let mut guard = session.lock().await;
            let mut cursor = self
                .collection
                .aggregate(stages)
                .session(&mut *guard)
                .await?;
            cursor.next(&mut guard).await.transpose()?
        } else {
            let mut cursor = self.collection.aggregate(stages).await?;
            cursor.try_next().await?
        };

        let Some(facet) = facet else {
            return Ok(FacetPage::empty(options.skip, options.limit));
        };

        let raw_items = facet
            .get_array("result")
            .cloned()
            .unwrap_or_default();
        let mut items = Vec::with_capacity(raw_items.len());
        for item in raw_items {
            items.push(bson::from_bson::<T>(item)?);
        }

        let total = facet
            .get_array("total")
            .ok()
            .and_then(|branch| branch.first())
            .and_then(Bson::as_document)
            .and_then(|counts| counts.get("count"))
            .and_then(bson_to_u64)
            .unwrap_or(0);

        Ok(FacetPage {
            items,
            skip: options.skip,
            limit: options.limit,
            total,
        })
    }

    /// Full-text search over the collection's text index
    pub async fn text_search<T>(
        &self,
        search: &str,
        text_options: &TextSearchOptions,
        options: &FindOptions,
    ) -> Result<BoxStream<'static, Result<T>>>
    where
        T: DeserializeOwned + Send + Sync + 'static,
    {
        self.find(&Query::text(search, text_options), options).await
    }

    /// Execute a batch of write operations
    ///
    /// Runs on the active transaction unless the caller opts out. Ordered
    /// batches stop at the first failure; unordered batches log and
    /// continue. Returns accumulated per-kind counts.
    pub async fn bulk_write(
        &self,
        operations: Vec<WriteOp>,
        options: &BulkWriteOptions,
    ) -> Result<BulkWriteSummary> {
        let session = self.active_session(options.not_in_transaction);
        let mut guard = match session {
            Some(session) => Some(session.lock().await),
            None => None,
        };

        let mut summary = BulkWriteSummary::default();
        for op in operations {
            match self.apply_write(op, guard.as_deref_mut()).await {
                Ok(delta) => summary.absorb(delta),
                Err(e) if options.ordered => return Err(e),
                Err(e) => {
                    tracing::warn!(
                        collection = %self.name,
                        error = %e,
                        "unordered bulk write operation failed"
                    );
                }
            }
        }

        tracing::debug!(
            collection = %self.name,
            affected = summary.affected(),
            "bulk write finished"
        );
        Ok(summary)
    }

    async fn apply_write(
        &self,
        op: WriteOp,
        session: Option<&mut ClientSession>,
    ) -> Result<BulkWriteSummary> {
        let mut delta = BulkWriteSummary::default();
        match op {
            WriteOp::InsertOne { document } => {
                match session {
                    Some(session) => {
                        self.collection.insert_one(document).session(session).await?;
                    }
                    None => {
                        self.collection.insert_one(document).await?;
                    }
                }
                delta.inserted = 1;
            }
            WriteOp::UpdateOne {
                filter,
                update,
                upsert,
            } => {
                validate_filter(filter.as_document())?;
                let mut options = UpdateOptions::default();
                options.upsert = Some(upsert);
                let result = match session {
                    Some(session) => {
                        self.collection
                            .update_one(filter.into_document(), update.to_modifications())
                            .with_options(options)
                            .session(session)
                            .await?
                    }
                    None => {
                        self.collection
                            .update_one(filter.into_document(), update.to_modifications())
                            .with_options(options)
                            .await?
                    }
                };
                delta.matched = result.matched_count;
                delta.modified = result.modified_count;
                delta.upserted = result.upserted_id.is_some() as u64;
            }
            WriteOp::UpdateMany {
                filter,
                update,
                upsert,
            } => {
                validate_filter(filter.as_document())?;
                let mut options = UpdateOptions::default();
                options.upsert = Some(upsert);
                let result = match session {
                    Some(session) => {
                        self.collection
                            .update_many(filter.into_document(), update.to_modifications())
                            .with_options(options)
                            .session(session)
                            .await?
                    }
                    None => {
                        self.collection
                            .update_many(filter.into_document(), update.to_modifications())
                            .with_options(options)
                            .await?
                    }
                };
                delta.matched = result.matched_count;
                delta.modified = result.modified_count;
                delta.upserted = result.upserted_id.is_some() as u64;
            }
            WriteOp::ReplaceOne {
                filter,
                replacement,
                upsert,
            } => {
                validate_filter(filter.as_document())?;
                let mut options = ReplaceOptions::default();
                options.upsert = Some(upsert);
                let result = match session {
                    Some(session) => {
                        self.collection
                            .replace_one(filter.into_document(), replacement)
                            .with_options(options)
                            .session(session)
                            .await?
                    }
                    None => {
                        self.collection
                            .replace_one(filter.into_document(), replacement)
                            .with_options(options)
                            .await?
                    }
                };
                delta.matched = result.matched_count;
                delta.modified = result.modified_count;
                delta.upserted = result.upserted_id.is_some() as u64;
            }
            WriteOp::DeleteOne { filter } => {
                validate_filter(filter.as_document())?;
                let result = match session {
                    Some(session) => {
                        self.collection
                            .delete_one(filter.into_document())
                            .session(session)
                            .await?
                    }
                    None => self.collection.delete_one(filter.into_document()).await?,
                };
                delta.deleted = result.deleted_count;
            }
            WriteOp::DeleteMany { filter } => {
                validate_filter(filter.as_document())?;
                let result = match session {
                    Some(session) => {
                        self.collection
                            .delete_many(filter.into_document())
                            .session(session)
                            .await?
                    }
                    None => self.collection.delete_many(filter.into_document()).await?,
                };
                delta.deleted = result.deleted_count;
            }
        }
        Ok(delta)
    }
}

// The $facet stage appended by `aggregate`: a windowed result branch and an
// unwindowed count branch, evaluated in one server round trip.
fn facet_stage(skip: u64, limit: u64) -> BsonDocument {
    doc! {
        "$facet": {
            "result": [
                { "$skip": skip as i64 },
                { "$limit": limit as i64 },
            ],
            "total": [ { "$count": "count" } ],
        }
    }
}

// Skip/take window for a page: items past the end of the result set are
// never requested, so the fetched page is at most min(page_size, total).
fn page_window(total: u64, page: u64, page_size: u64) -> (u64, u64) {
    let skip = page.saturating_mul(page_size);
    let take = page_size.min(total.saturating_sub(skip));
    (skip, take)
}

fn bson_to_u64(value: &Bson) -> Option<u64> {
    match value {
        Bson::Int32(v) if *v >= 0 => Some(*v as u64),
        Bson::Int64(v) if *v >= 0 => Some(*v as u64),
        Bson::Double(v) if *v >= 0.0 => Some(*v as u64),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_window_full_pages() {
        assert_eq!(page_window(25, 0, 10), (0, 10));
        assert_eq!(page_window(25, 1, 10), (10, 10));
    }

    #[test]
    fn test_page_window_trailing_page() {
        // 25 documents, page_size 10, third page: 5 items remain.
        assert_eq!(page_window(25, 2, 10), (20, 5));
    }

    #[test]
    fn test_page_window_past_the_end() {
        assert_eq!(page_window(25, 3, 10), (30, 0));
        assert_eq!(page_window(0, 0, 10), (0, 0));
    }

    #[test]
    fn test_facet_stage_shape() {
        let stage = facet_stage(20, 10);
        assert_eq!(
            stage,
            doc! {
                "$facet": {
                    "result": [
                        { "$skip": 20_i64 },
                        { "$limit": 10_i64 },
                    ],
                    "total": [ { "$count": "count" } ],
                }
            }
        );
    }

    #[test]
    fn test_bulk_summary_affected() {
        let mut summary = BulkWriteSummary::default();
        summary.absorb(BulkWriteSummary {
            inserted: 2,
            ..Default::default()
        });
        summary.absorb(BulkWriteSummary {
            matched: 3,
            modified: 1,
            deleted: 4,
            upserted: 1,
            ..Default::default()
        });

        assert_eq!(summary.inserted, 2);
        assert_eq!(summary.matched, 3);
        assert_eq!(summary.modified, 1);
        assert_eq!(summary.deleted, 4);
        assert_eq!(summary.upserted, 1);
        assert_eq!(summary.affected(), 10);
    }

    #[test]
    fn test_bson_to_u64() {
        assert_eq!(bson_to_u64(&Bson::Int32(7)), Some(7));
        assert_eq!(bson_to_u64(&Bson::Int64(7)), Some(7));
        assert_eq!(bson_to_u64(&Bson::Int32(-1)), None);
        assert_eq!(bson_to_u64(&Bson::String("7".to_string())), None);
    }
}
