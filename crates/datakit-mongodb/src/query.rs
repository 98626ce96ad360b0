//! Composable query filters
//!
//! `Query` wraps a BSON filter document and composes with `&` (AND),
//! `|` (OR), and `!` (NOT). AND/OR combination flattens nested clauses of
//! the same operator, so `(a & b) & c` and `a & (b & c)` render identically.
//!
//! Equality and hashing are defined over the rendered filter JSON:
//! semantically equivalent filters with differently ordered keys are NOT
//! equal. Queries are short-lived value objects built per call.

use std::hash::{Hash, Hasher};
use std::ops::{BitAnd, BitOr, Not};

use bson::{doc, Bson, Document as BsonDocument};
use datakit_common::{DataKitError, Result};

use crate::update::Update;

/// Options for `$text` search filters
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TextSearchOptions {
    /// Search language (server default when unset)
    pub language: Option<String>,
    /// Match case-sensitively
    pub case_sensitive: bool,
    /// Match diacritic-sensitively
    pub diacritic_sensitive: bool,
}

impl TextSearchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    pub fn case_sensitive(mut self, case_sensitive: bool) -> Self {
        self.case_sensitive = case_sensitive;
        self
    }

    pub fn diacritic_sensitive(mut self, diacritic_sensitive: bool) -> Self {
        self.diacritic_sensitive = diacritic_sensitive;
        self
    }
}

/// Filter value object for find/update/delete operations
///
/// Optionally carries an `Update` for find-and-modify flows; `DbSet::find_one`
/// executes a query with an attached update as find-one-and-update.
#[derive(Debug, Clone, Default)]
pub struct Query {
    filter: BsonDocument,
    update: Option<Update>,
}

// Equality is the rendered filter JSON, nothing else: an attached update
// does not participate, and hashing uses the same representation.
impl PartialEq for Query {
    fn eq(&self, other: &Query) -> bool {
        self.to_json() == other.to_json()
    }
}

impl Eq for Query {}

impl Query {
    /// Match-all query
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a filter from a JSON string
    ///
    /// Fails with `DataKitError::Query` naming the offending text when the
    /// string is not valid JSON or not a JSON object.
    pub fn from_json(text: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(text)
            .map_err(|e| DataKitError::Query(format!("invalid filter JSON '{}': {}", text, e)))?;
        let bson = bson::to_bson(&value)
            .map_err(|e| DataKitError::Query(format!("invalid filter JSON '{}': {}", text, e)))?;
        match bson {
            Bson::Document(filter) => Ok(Self {
                filter,
                update: None,
            }),
            _ => Err(DataKitError::Query(format!(
                "filter JSON must be an object: '{}'",
                text
            ))),
        }
    }

    /// Equality condition: `{ field: value }`
    pub fn eq(field: impl Into<String>, value: impl Into<Bson>) -> Self {
        Self::condition(field, value.into())
    }

    /// `$ne` condition
    pub fn ne(field: impl Into<String>, value: impl Into<Bson>) -> Self {
        Self::operator(field, "$ne", value.into())
    }

    /// `$gt` condition
    pub fn gt(field: impl Into<String>, value: impl Into<Bson>) -> Self {
        Self::operator(field, "$gt", value.into())
    }

    /// `$gte` condition
    pub fn gte(field: impl Into<String>, value: impl Into<Bson>) -> Self {
        Self::operator(field, "$gte", value.into())
    }

    /// `$lt` condition
    pub fn lt(field: impl Into<String>, value: impl Into<Bson>) -> Self {
        Self::operator(field, "$lt", value.into())
    }

    /// `$lte` condition
    pub fn lte(field: impl Into<String>, value: impl Into<Bson>) -> Self {
        Self::operator(field, "$lte", value.into())
    }

    /// `$in` condition over the given values
    pub fn within<I, V>(field: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Bson>,
    {
        let values: Vec<Bson> = values.into_iter().map(Into::into).collect();
        Self::operator(field, "$in", Bson::Array(values))
    }

    /// `$exists` condition
    pub fn exists(field: impl Into<String>, exists: bool) -> Self {
        Self::operator(field, "$exists", Bson::Boolean(exists))
    }

    /// `$regex` condition with PCRE option flags (e.g. "i")
    pub fn regex(field: impl Into<String>, pattern: impl Into<String>, options: &str) -> Self {
        let mut condition = doc! { "$regex": pattern.into() };
        if !options.is_empty() {
            condition.insert("$options", options);
        }
        Self::condition(field, Bson::Document(condition))
    }

    /// Full-text search filter (`$text`)
    ///
    /// Requires a text index on the collection.
    pub fn text(search: impl Into<String>, options: &TextSearchOptions) -> Self {
        let mut spec = doc! { "$search": search.into() };
        if let Some(language) = &options.language {
            spec.insert("$language", language.as_str());
        }
        if options.case_sensitive {
            spec.insert("$caseSensitive", true);
        }
        if options.diacritic_sensitive {
            spec.insert("$diacriticSensitive", true);
        }
        Self {
            filter: doc! { "$text": spec },
            update: None,
        }
    }

    fn condition(field: impl Into<String>, value: Bson) -> Self {
        let mut filter = BsonDocument::new();
        filter.insert(field.into(), value);
        Self {
            filter,
            update: None,
        }
    }

    fn operator(field: impl Into<String>, op: &str, value: Bson) -> Self {
        let mut condition = BsonDocument::new();
        condition.insert(op, value);
        Self::condition(field, Bson::Document(condition))
    }

    /// Attach an update for find-and-modify execution
    pub fn with_update(mut self, update: Update) -> Self {
        self.update = Some(update);
        self
    }

    /// The attached update, if any
    pub fn update(&self) -> Option<&Update> {
        self.update.as_ref()
    }

    /// The underlying filter document
    pub fn as_document(&self) -> &BsonDocument {
        &self.filter
    }

    /// Clone of the underlying filter document
    pub fn to_document(&self) -> BsonDocument {
        self.filter.clone()
    }

    /// Consume into the underlying filter document
    pub fn into_document(self) -> BsonDocument {
        self.filter
    }

    /// Whether this is the match-all filter
    pub fn is_empty(&self) -> bool {
        self.filter.is_empty()
    }

    /// Rendered filter JSON (the equality/hash representation)
    pub fn to_json(&self) -> String {
        serde_json::to_string(&self.filter).unwrap_or_default()
    }

    // Clauses contributed to an $and/$or combination. Existing clauses of
    // the same operator are flattened; empty filters contribute nothing.
    fn clauses_for(filter: BsonDocument, op: &str) -> Vec<Bson> {
        if filter.is_empty() {
            return Vec::new();
        }
        if filter.len() == 1 {
            if let Ok(existing) = filter.get_array(op) {
                return existing.clone();
            }
        }
        vec![Bson::Document(filter)]
    }

    fn combine(self, other: Query, op: &str) -> Query {
        let update = self.update.or(other.update);
        let mut clauses = Self::clauses_for(self.filter, op);
        clauses.extend(Self::clauses_for(other.filter, op));

        let filter = match clauses.len() {
            0 => BsonDocument::new(),
            1 => match clauses.remove(0) {
                Bson::Document(d) => d,
                other => doc! { op: [other] },
            },
            _ => doc! { op: clauses },
        };

        Query { filter, update }
    }
}

impl From<BsonDocument> for Query {
    fn from(filter: BsonDocument) -> Self {
        Self {
            filter,
            update: None,
        }
    }
}

impl BitAnd for Query {
    type Output = Query;

    fn bitand(self, rhs: Query) -> Query {
        self.combine(rhs, "$and")
    }
}

impl BitOr for Query {
    type Output = Query;

    fn bitor(self, rhs: Query) -> Query {
        self.combine(rhs, "$or")
    }
}

impl Not for Query {
    type Output = Query;

    fn not(self) -> Query {
        Query {
            filter: doc! { "$nor": [self.filter] },
            update: self.update,
        }
    }
}

impl Hash for Query {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.to_json().hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_is_match_all() {
        let q = Query::new();
        assert!(q.is_empty());
        assert_eq!(q.to_json(), "{}");
    }

    #[test]
    fn test_field_conditions() {
        assert_eq!(
            Query::eq("name", "ada").as_document(),
            &doc! { "name": "ada" }
        );
        assert_eq!(
            Query::gte("age", 18).as_document(),
            &doc! { "age": { "$gte": 18 } }
        );
        assert_eq!(
            Query::within("status", ["active", "pending"]).as_document(),
            &doc! { "status": { "$in": ["active", "pending"] } }
        );
        assert_eq!(
            Query::exists("deleted_at", false).as_document(),
            &doc! { "deleted_at": { "$exists": false } }
        );
    }

    #[test]
    fn test_regex_with_options() {
        assert_eq!(
            Query::regex("email", "@example.com$", "i").as_document(),
            &doc! { "email": { "$regex": "@example.com$", "$options": "i" } }
        );
        assert_eq!(
            Query::regex("email", "@example.com$", "").as_document(),
            &doc! { "email": { "$regex": "@example.com$" } }
        );
    }

    #[test]
    fn test_and_combination() {
        let q = Query::eq("a", 1) & Query::eq("b", 2);
        assert_eq!(
            q.as_document(),
            &doc! { "$and": [ { "a": 1 }, { "b": 2 } ] }
        );
    }

    #[test]
    fn test_and_is_associative_in_rendered_form() {
        let left = (Query::eq("a", 1) & Query::eq("b", 2)) & Query::eq("c", 3);
        let right = Query::eq("a", 1) & (Query::eq("b", 2) & Query::eq("c", 3));
        assert_eq!(left.to_json(), right.to_json());
        assert_eq!(
            left.as_document(),
            &doc! { "$and": [ { "a": 1 }, { "b": 2 }, { "c": 3 } ] }
        );
    }

    #[test]
    fn test_or_flattens() {
        let q = Query::eq("a", 1) | Query::eq("b", 2) | Query::eq("c", 3);
        assert_eq!(
            q.as_document(),
            &doc! { "$or": [ { "a": 1 }, { "b": 2 }, { "c": 3 } ] }
        );
    }

    #[test]
    fn test_empty_query_is_combination_identity() {
        let q = Query::new() & Query::eq("a", 1);
        assert_eq!(q.as_document(), &doc! { "a": 1 });

        let q = Query::eq("a", 1) | Query::new();
        assert_eq!(q.as_document(), &doc! { "a": 1 });
    }

    #[test]
    fn test_not() {
        let q = !Query::eq("a", 1);
        assert_eq!(q.as_document(), &doc! { "$nor": [ { "a": 1 } ] });
    }

    #[test]
    fn test_from_json() {
        let q = Query::from_json(r#"{ "age": { "$gte": 18 } }"#).unwrap();
        assert_eq!(q.as_document(), &doc! { "age": { "$gte": 18 } });
    }

    #[test]
    fn test_from_json_malformed_names_offending_text() {
        let err = Query::from_json("{ not json").unwrap_err();
        let message = err.to_string();
        assert!(message.contains("{ not json"), "message was: {}", message);
    }

    #[test]
    fn test_from_json_non_object() {
        assert!(Query::from_json("[1, 2]").is_err());
        assert!(Query::from_json("42").is_err());
    }

    #[test]
    fn test_text_search_options() {
        let q = Query::text(
            "coffee",
            &TextSearchOptions::new().language("en").case_sensitive(true),
        );
        assert_eq!(
            q.as_document(),
            &doc! { "$text": {
                "$search": "coffee",
                "$language": "en",
                "$caseSensitive": true
            } }
        );
    }

    #[test]
    fn test_equality_is_order_sensitive() {
        // Documented limitation: rendered-JSON equality.
        let a = Query::from_json(r#"{ "a": 1, "b": 2 }"#).unwrap();
        let b = Query::from_json(r#"{ "b": 2, "a": 1 }"#).unwrap();
        assert_ne!(a, b);

        let c = Query::from_json(r#"{ "a": 1, "b": 2 }"#).unwrap();
        assert_eq!(a, c);
        assert_eq!(a.to_json(), c.to_json());
    }

    #[test]
    fn test_equality_ignores_attached_update() {
        let plain = Query::eq("name", "ada");
        let with_update = Query::eq("name", "ada").with_update(Update::new().set("age", 1));
        assert_eq!(plain.to_json(), with_update.to_json());
        assert_eq!(plain, with_update);
    }

    #[test]
    fn test_with_update_is_carried_through_combination() {
        let q = Query::eq("a", 1).with_update(Update::new().set("b", 2));
        let combined = q & Query::eq("c", 3);
        assert!(combined.update().is_some());
    }
}
