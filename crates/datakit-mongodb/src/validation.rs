//! Input validation for MongoDB operations
//!
//! Collection names and filters coming from callers are validated before a
//! `DbSet` is handed out or a query is executed, to keep operator injection
//! out of collection names and server-side code execution out of filters.

use bson::{Bson, Document as BsonDocument};
use datakit_common::{DataKitError, Result};

/// Maximum allowed length for collection names (MongoDB's limit is 255)
const MAX_COLLECTION_NAME_LENGTH: usize = 120;

/// Query operators that execute caller-supplied code on the server
const SERVER_EXECUTION_OPERATORS: &[&str] = &["$where", "$function", "$accumulator"];

/// Collection name checked against injection-prone patterns
///
/// Guarantees: non-empty, at most 120 characters, no null bytes, no
/// `system.` prefix, no `$` characters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedCollectionName {
    name: String,
}

impl ValidatedCollectionName {
    /// Validate a collection name
    pub fn new(name: &str) -> Result<Self> {
        if name.is_empty() {
            return Err(DataKitError::Validation(
                "Collection name cannot be empty".to_string(),
            ));
        }

        if name.len() > MAX_COLLECTION_NAME_LENGTH {
            return Err(DataKitError::Validation(format!(
                "Collection name exceeds maximum length of {} characters: '{}'",
                MAX_COLLECTION_NAME_LENGTH, name
            )));
        }

        if name.contains('\0') {
            return Err(DataKitError::Validation(
                "Collection name cannot contain null bytes".to_string(),
            ));
        }

        if name.starts_with("system.") {
            return Err(DataKitError::Validation(format!(
                "Collection name cannot start with 'system.' (reserved): '{}'",
                name
            )));
        }

        if name.contains('$') {
            return Err(DataKitError::Validation(format!(
                "Collection name cannot contain '$' character: '{}'",
                name
            )));
        }

        if name.contains("..") || name.contains("//") {
            tracing::warn!(name = %name, "Collection name contains suspicious pattern");
        }

        Ok(ValidatedCollectionName {
            name: name.to_string(),
        })
    }

    /// The validated name as a string slice
    pub fn as_str(&self) -> &str {
        &self.name
    }

    /// Consume and return the inner String
    pub fn into_string(self) -> String {
        self.name
    }
}

impl AsRef<str> for ValidatedCollectionName {
    fn as_ref(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Display for ValidatedCollectionName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Reject filters containing server-side execution operators
///
/// Walks the whole filter, including nested documents and arrays.
pub fn validate_filter(filter: &BsonDocument) -> Result<()> {
    for (key, value) in filter.iter() {
        if SERVER_EXECUTION_OPERATORS.contains(&key.as_str()) {
            return Err(DataKitError::Validation(format!(
                "Filter contains forbidden operator '{}'",
                key
            )));
        }
        validate_value(value)?;
    }
    Ok(())
}

fn validate_value(value: &Bson) -> Result<()> {
    match value {
        Bson::Document(doc) => validate_filter(doc),
        Bson::Array(items) => {
            for item in items {
                validate_value(item)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn test_valid_collection_name() {
        let name = ValidatedCollectionName::new("users").unwrap();
        assert_eq!(name.as_str(), "users");
        assert_eq!(name.to_string(), "users");
    }

    #[test]
    fn test_empty_collection_name() {
        assert!(ValidatedCollectionName::new("").is_err());
    }

    #[test]
    fn test_collection_name_too_long() {
        let name = "a".repeat(121);
        assert!(ValidatedCollectionName::new(&name).is_err());
    }

    #[test]
    fn test_collection_name_null_byte() {
        assert!(ValidatedCollectionName::new("users\0").is_err());
    }

    #[test]
    fn test_collection_name_system_prefix() {
        assert!(ValidatedCollectionName::new("system.users").is_err());
    }

    #[test]
    fn test_collection_name_dollar() {
        assert!(ValidatedCollectionName::new("users$cmd").is_err());
    }

    #[test]
    fn test_validate_filter_clean() {
        let filter = doc! { "age": { "$gte": 18 }, "status": "active" };
        assert!(validate_filter(&filter).is_ok());
    }

    #[test]
    fn test_validate_filter_where() {
        let filter = doc! { "$where": "this.a == this.b" };
        assert!(validate_filter(&filter).is_err());
    }

    #[test]
    fn test_validate_filter_nested() {
        let filter = doc! {
            "$or": [
                { "name": "a" },
                { "inner": { "$where": "sleep(1000)" } }
            ]
        };
        assert!(validate_filter(&filter).is_err());
    }
}
