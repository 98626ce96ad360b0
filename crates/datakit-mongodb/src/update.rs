//! Fluent update builders
//!
//! `Update` wraps either a single update-operator document (`$set`, `$inc`,
//! ...) or an aggregation-pipeline update. Fluent methods merge their clause
//! into the operator document: the first call initializes the operator
//! section, later calls extend it, and the last write to a field wins.
//!
//! Like `Query`, equality is defined over the serialized form; equivalent
//! updates with differently ordered keys are not equal.

use std::hash::{Hash, Hasher};
use std::ops::{Add, BitAnd};

use bson::{Bson, Document as BsonDocument};
use datakit_common::{DataKitError, Result};
use mongodb::options::UpdateModifications;

/// The two wire shapes an update can take
#[derive(Debug, Clone, PartialEq)]
enum UpdateSpec {
    /// Operator document: `{ "$set": { ... }, "$inc": { ... } }`
    Document(BsonDocument),
    /// Aggregation pipeline: `[ { "$set": ... }, { "$unset": ... } ]`
    Pipeline(Vec<BsonDocument>),
}

/// Composable update definition
#[derive(Debug, Clone, PartialEq)]
pub struct Update {
    spec: UpdateSpec,
}

impl Update {
    /// Empty document-form update
    pub fn new() -> Self {
        Self {
            spec: UpdateSpec::Document(BsonDocument::new()),
        }
    }

    /// Pipeline-form update from explicit stages
    pub fn pipeline(stages: Vec<BsonDocument>) -> Self {
        Self {
            spec: UpdateSpec::Pipeline(stages),
        }
    }

    /// Parse an update from JSON
    ///
    /// An object becomes a document-form update, an array of objects a
    /// pipeline-form update. Fails with `DataKitError::Query` naming the
    /// offending text otherwise.
    pub fn from_json(text: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(text)
            .map_err(|e| DataKitError::Query(format!("invalid update JSON '{}': {}", text, e)))?;
        let bson = bson::to_bson(&value)
            .map_err(|e| DataKitError::Query(format!("invalid update JSON '{}': {}", text, e)))?;
        match bson {
            Bson::Document(doc) => Ok(Self {
                spec: UpdateSpec::Document(doc),
            }),
            Bson::Array(items) => {
                let mut stages = Vec::with_capacity(items.len());
                for item in items {
                    match item {
                        Bson::Document(stage) => stages.push(stage),
                        _ => {
                            return Err(DataKitError::Query(format!(
                                "update pipeline stages must be objects: '{}'",
                                text
                            )))
                        }
                    }
                }
                Ok(Self::pipeline(stages))
            }
            _ => Err(DataKitError::Query(format!(
                "update JSON must be an object or an array of objects: '{}'",
                text
            ))),
        }
    }

    /// `$set` a field
    pub fn set(self, field: impl Into<String>, value: impl Into<Bson>) -> Self {
        self.merge("$set", field, value.into())
    }

    /// `$inc` a numeric field
    pub fn inc(self, field: impl Into<String>, amount: impl Into<Bson>) -> Self {
        self.merge("$inc", field, amount.into())
    }

    /// `$mul` a numeric field
    pub fn mul(self, field: impl Into<String>, factor: impl Into<Bson>) -> Self {
        self.merge("$mul", field, factor.into())
    }

    /// `$min`: keep the smaller of current and given value
    pub fn min(self, field: impl Into<String>, value: impl Into<Bson>) -> Self {
        self.merge("$min", field, value.into())
    }

    /// `$max`: keep the larger of current and given value
    pub fn max(self, field: impl Into<String>, value: impl Into<Bson>) -> Self {
        self.merge("$max", field, value.into())
    }

    /// `$rename` a field
    pub fn rename(self, field: impl Into<String>, new_name: impl Into<String>) -> Self {
        self.merge("$rename", field, Bson::String(new_name.into()))
    }

    /// `$unset` a field
    pub fn unset(self, field: impl Into<String>) -> Self {
        self.merge("$unset", field, Bson::String(String::new()))
    }

    /// `$currentDate`: set the field to the server's current date
    pub fn current_date(self, field: impl Into<String>) -> Self {
        self.merge("$currentDate", field, Bson::Boolean(true))
    }

    /// `$push` one value onto an array field
    pub fn push(self, field: impl Into<String>, value: impl Into<Bson>) -> Self {
        self.merge("$push", field, value.into())
    }

    /// `$push` with `$each`: append all values to an array field
    pub fn push_each<I, V>(self, field: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Bson>,
    {
        let values: Vec<Bson> = values.into_iter().map(Into::into).collect();
        let mut each = BsonDocument::new();
        each.insert("$each", Bson::Array(values));
        self.merge("$push", field, Bson::Document(each))
    }

    /// `$pull` matching values from an array field
    pub fn pull(self, field: impl Into<String>, value: impl Into<Bson>) -> Self {
        self.merge("$pull", field, value.into())
    }

    /// `$addToSet`: append a value unless already present
    pub fn add_to_set(self, field: impl Into<String>, value: impl Into<Bson>) -> Self {
        self.merge("$addToSet", field, value.into())
    }

    /// `$pop` the first element of an array field
    pub fn pop_first(self, field: impl Into<String>) -> Self {
        self.merge("$pop", field, Bson::Int32(-1))
    }

    /// `$pop` the last element of an array field
    pub fn pop_last(self, field: impl Into<String>) -> Self {
        self.merge("$pop", field, Bson::Int32(1))
    }

    /// `$bit` AND against an integer field
    pub fn bit_and(self, field: impl Into<String>, mask: i64) -> Self {
        self.bitwise(field, "and", mask)
    }

    /// `$bit` OR against an integer field
    pub fn bit_or(self, field: impl Into<String>, mask: i64) -> Self {
        self.bitwise(field, "or", mask)
    }

    /// `$bit` XOR against an integer field
    pub fn bit_xor(self, field: impl Into<String>, mask: i64) -> Self {
        self.bitwise(field, "xor", mask)
    }

    fn bitwise(self, field: impl Into<String>, op: &str, mask: i64) -> Self {
        let mut spec = BsonDocument::new();
        spec.insert(op, Bson::Int64(mask));
        self.merge("$bit", field, Bson::Document(spec))
    }

    // Merge one clause into the operator document. Operator methods are
    // ignored on pipeline-form updates (stages are author-controlled).
    fn merge(mut self, op: &str, field: impl Into<String>, value: Bson) -> Self {
        match &mut self.spec {
            UpdateSpec::Document(doc) => {
                let mut section = doc.get_document(op).cloned().unwrap_or_default();
                section.insert(field.into(), value);
                doc.insert(op, section);
            }
            UpdateSpec::Pipeline(_) => {
                tracing::warn!(
                    operator = op,
                    "update operator ignored on pipeline-form update"
                );
            }
        }
        self
    }

    /// Combine two updates into one
    ///
    /// Document forms merge per operator section, with the right-hand
    /// update winning on duplicate fields. Pipeline forms concatenate
    /// stages. Mixing the two forms is an error.
    pub fn try_combine(self, other: Update) -> Result<Update> {
        match (self.spec, other.spec) {
            (UpdateSpec::Document(mut left), UpdateSpec::Document(right)) => {
                for (op, value) in right {
                    match value {
                        Bson::Document(incoming) => match left.get_document_mut(&op) {
                            Ok(existing) => {
                                for (field, v) in incoming {
                                    existing.insert(field, v);
                                }
                            }
                            Err(_) => {
                                left.insert(op, incoming);
                            }
                        },
                        other => {
                            left.insert(op, other);
                        }
                    }
                }
                Ok(Update {
                    spec: UpdateSpec::Document(left),
                })
            }
            (UpdateSpec::Pipeline(mut left), UpdateSpec::Pipeline(right)) => {
                left.extend(right);
                Ok(Update::pipeline(left))
            }
            _ => Err(DataKitError::Validation(
                "cannot combine a document-form update with a pipeline-form update".to_string(),
            )),
        }
    }

    /// Whether any clause or stage has been added
    pub fn is_empty(&self) -> bool {
        match &self.spec {
            UpdateSpec::Document(doc) => doc.is_empty(),
            UpdateSpec::Pipeline(stages) => stages.is_empty(),
        }
    }

    /// Whether this is a pipeline-form update
    pub fn is_pipeline(&self) -> bool {
        matches!(self.spec, UpdateSpec::Pipeline(_))
    }

    /// The operator document, when in document form
    pub fn as_document(&self) -> Option<&BsonDocument> {
        match &self.spec {
            UpdateSpec::Document(doc) => Some(doc),
            UpdateSpec::Pipeline(_) => None,
        }
    }

    /// Serialized form (the equality/hash representation)
    pub fn to_json(&self) -> String {
        match &self.spec {
            UpdateSpec::Document(doc) => serde_json::to_string(doc).unwrap_or_default(),
            UpdateSpec::Pipeline(stages) => serde_json::to_string(stages).unwrap_or_default(),
        }
    }

    /// Convert into the driver's update representation
    pub fn to_modifications(&self) -> UpdateModifications {
        match &self.spec {
            UpdateSpec::Document(doc) => UpdateModifications::Document(doc.clone()),
            UpdateSpec::Pipeline(stages) => UpdateModifications::Pipeline(stages.clone()),
        }
    }
}

impl Default for Update {
    fn default() -> Self {
        Self::new()
    }
}

// Operator combination mirrors `Query`: `&` and `+` both combine. Mixing
// document and pipeline forms keeps the left-hand side and logs an error;
// use `try_combine` when the form is not statically known.
impl BitAnd for Update {
    type Output = Update;

    fn bitand(self, rhs: Update) -> Update {
        let fallback = self.clone();
        self.try_combine(rhs).unwrap_or_else(|e| {
            tracing::error!(error = %e, "update combination failed");
            fallback
        })
    }
}

impl Add for Update {
    type Output = Update;

    fn add(self, rhs: Update) -> Update {
        self & rhs
    }
}

impl Hash for Update {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.to_json().hash(state);
    }
}
