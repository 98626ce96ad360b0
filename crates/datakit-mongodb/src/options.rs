//! Option records and result carriers for `DbSet` operations

use bson::Document as BsonDocument;
use datakit_common::{DataKitError, Result};

/// Options for find/count operations
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindOptions {
    /// Sort order
    pub sort: Option<BsonDocument>,
    /// Field projection
    pub projection: Option<BsonDocument>,
    /// Documents to skip
    pub skip: Option<u64>,
    /// Maximum documents to return
    pub limit: Option<i64>,
    /// Cursor batch size
    pub batch_size: Option<u32>,
    /// Run outside the active transaction even when the `DbSet` holds one
    pub not_in_transaction: bool,
}

impl FindOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the sort order
    pub fn sort(mut self, sort: BsonDocument) -> Self {
        self.sort = Some(sort);
        self
    }

    /// Set the field projection
    pub fn projection(mut self, projection: BsonDocument) -> Self {
        self.projection = Some(projection);
        self
    }

    /// Set the number of documents to skip
    pub fn skip(mut self, skip: u64) -> Self {
        self.skip = Some(skip);
        self
    }

    /// Set the maximum number of documents to return
    pub fn limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Set the cursor batch size
    pub fn batch_size(mut self, batch_size: u32) -> Self {
        self.batch_size = Some(batch_size);
        self
    }

    /// Opt this call out of the active transaction
    pub fn not_in_transaction(mut self, not_in_transaction: bool) -> Self {
        self.not_in_transaction = not_in_transaction;
        self
    }

    /// Convert to the driver's find options
    pub fn to_driver(&self) -> mongodb::options::FindOptions {
        let mut options = mongodb::options::FindOptions::default();
        options.sort = self.sort.clone();
        options.projection = self.projection.clone();
        options.skip = self.skip;
        options.limit = self.limit;
        options.batch_size = self.batch_size;
        options
    }

    /// Convert to the driver's find-one options
    pub fn to_driver_find_one(&self) -> mongodb::options::FindOneOptions {
        let mut options = mongodb::options::FindOneOptions::default();
        options.sort = self.sort.clone();
        options.projection = self.projection.clone();
        options.skip = self.skip;
        options
    }
}

/// Paging options: base find options plus a zero-indexed page
///
/// `page_size` must be positive; the zero-lower-bound on `page` is enforced
/// by the type.
#[derive(Debug, Clone, PartialEq)]
pub struct FindOptionsPaging {
    /// Base find options (skip/limit are derived from the page and ignored)
    pub options: FindOptions,
    /// Zero-indexed page number
    pub page: u64,
    /// Items per page; must be greater than zero
    pub page_size: u64,
}

impl FindOptionsPaging {
    pub fn new(page: u64, page_size: u64) -> Self {
        Self {
            options: FindOptions::default(),
            page,
            page_size,
        }
    }

    /// Attach base find options (sort, projection, ...)
    pub fn with_options(mut self, options: FindOptions) -> Self {
        self.options = options;
        self
    }

    /// Check the paging invariants, before any database call
    pub fn validate(&self) -> Result<()> {
        if self.page_size == 0 {
            return Err(DataKitError::Validation(
                "page size must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Documents to skip for this page, saturating at `u64::MAX`
    pub fn offset(&self) -> u64 {
        self.page.saturating_mul(self.page_size)
    }
}

/// One page of results plus pagination metadata
///
/// Constructed once per paged query; never mutated afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct PagedResult<T> {
    items: Vec<T>,
    page: u64,
    page_size: u64,
    total: u64,
}

impl<T> PagedResult<T> {
    pub fn new(items: Vec<T>, page: u64, page_size: u64, total: u64) -> Self {
        Self {
            items,
            page,
            page_size,
            total,
        }
    }

    /// Items on this page
    pub fn items(&self) -> &[T] {
        &self.items
    }

    /// Consume into the items
    pub fn into_items(self) -> Vec<T> {
        self.items
    }

    /// Zero-indexed page number
    pub fn page(&self) -> u64 {
        self.page
    }

    /// Requested page size
    pub fn page_size(&self) -> u64 {
        self.page_size
    }

    /// Total matching documents, ignoring paging
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Number of items on this page
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether this page is empty
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Total number of pages at this page size
    pub fn page_count(&self) -> u64 {
        if self.page_size == 0 {
            0
        } else {
            self.total.div_ceil(self.page_size)
        }
    }
}

/// Skip/limit window for `$facet` aggregation
#[derive(Debug, Clone, PartialEq)]
pub struct FacetOptions {
    /// Documents to skip inside the result branch
    pub skip: u64,
    /// Maximum documents in the result branch; must be greater than zero
    pub limit: u64,
    /// Run outside the active transaction even when the `DbSet` holds one
    pub not_in_transaction: bool,
}

impl FacetOptions {
    pub fn new(skip: u64, limit: u64) -> Self {
        Self {
            skip,
            limit,
            not_in_transaction: false,
        }
    }

    /// Check the window invariants, before any database call
    pub fn validate(&self) -> Result<()> {
        if self.limit == 0 {
            return Err(DataKitError::Validation(
                "facet limit must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// One `$facet` window of aggregation results
#[derive(Debug, Clone, PartialEq)]
pub struct FacetPage<T> {
    /// Items in the result branch window
    pub items: Vec<T>,
    /// Skip applied inside the result branch
    pub skip: u64,
    /// Limit applied inside the result branch
    pub limit: u64,
    /// Total documents produced by the pipeline, ignoring skip/limit
    pub total: u64,
}

impl<T> FacetPage<T> {
    /// Empty page: a facet that produced no document is zero results
    pub(crate) fn empty(skip: u64, limit: u64) -> Self {
        Self {
            items: Vec::new(),
            skip,
            limit,
            total: 0,
        }
    }
}

/// Options for bulk writes
#[derive(Debug, Clone, PartialEq)]
pub struct BulkWriteOptions {
    /// Stop at the first failed operation (default) or keep going
    pub ordered: bool,
    /// Run outside the active transaction even when the `DbSet` holds one
    pub not_in_transaction: bool,
}

impl Default for BulkWriteOptions {
    fn default() -> Self {
        Self {
            ordered: true,
            not_in_transaction: false,
        }
    }
}

impl BulkWriteOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ordered(mut self, ordered: bool) -> Self {
        self.ordered = ordered;
        self
    }

    pub fn not_in_transaction(mut self, not_in_transaction: bool) -> Self {
        self.not_in_transaction = not_in_transaction;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn test_find_options_builder() {
        let options = FindOptions::new()
            .sort(doc! { "created_at": -1 })
            .projection(doc! { "name": 1 })
            .skip(5)
            .limit(10)
            .batch_size(100)
            .not_in_transaction(true);

        assert_eq!(options.sort, Some(doc! { "created_at": -1 }));
        assert_eq!(options.skip, Some(5));
        assert_eq!(options.limit, Some(10));
        assert!(options.not_in_transaction);

        let driver = options.to_driver();
        assert_eq!(driver.sort, Some(doc! { "created_at": -1 }));
        assert_eq!(driver.limit, Some(10));
        assert_eq!(driver.batch_size, Some(100));
    }

    #[test]
    fn test_paging_validation() {
        assert!(FindOptionsPaging::new(0, 10).validate().is_ok());
        assert!(FindOptionsPaging::new(3, 1).validate().is_ok());

        let err = FindOptionsPaging::new(0, 0).validate().unwrap_err();
        assert!(matches!(err, DataKitError::Validation(_)));
    }

    #[test]
    fn test_paging_offset() {
        assert_eq!(FindOptionsPaging::new(0, 10).offset(), 0);
        assert_eq!(FindOptionsPaging::new(2, 10).offset(), 20);
        assert_eq!(FindOptionsPaging::new(u64::MAX, 2).offset(), u64::MAX);
    }

    #[test]
    fn test_paged_result_accessors() {
        let page = PagedResult::new(vec![1, 2, 3, 4, 5], 2, 10, 25);
        assert_eq!(page.len(), 5);
        assert_eq!(page.page(), 2);
        assert_eq!(page.page_size(), 10);
        assert_eq!(page.total(), 25);
        assert_eq!(page.page_count(), 3);
        assert_eq!(page.items(), &[1, 2, 3, 4, 5]);
        assert_eq!(page.into_items(), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_facet_options_validation() {
        assert!(FacetOptions::new(0, 1).validate().is_ok());
        assert!(FacetOptions::new(10, 50).validate().is_ok());

        let err = FacetOptions::new(0, 0).validate().unwrap_err();
        assert!(matches!(err, DataKitError::Validation(_)));
    }

    #[test]
    fn test_facet_page_empty() {
        let page: FacetPage<i32> = FacetPage::empty(10, 50);
        assert!(page.items.is_empty());
        assert_eq!(page.skip, 10);
        assert_eq!(page.limit, 50);
        assert_eq!(page.total, 0);
    }

    #[test]
    fn test_bulk_write_options_default() {
        let options = BulkWriteOptions::default();
        assert!(options.ordered);
        assert!(!options.not_in_transaction);
    }
}
