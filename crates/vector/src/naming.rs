//! Collection naming for dataset indexes.
//!
//! `index_name` maps a dataset identifier to a backend-safe collection name:
//! `-` becomes `_`, and a fixed prefix and suffix keep dataset collections
//! apart from unrelated ones. Identifiers are restricted to lower-case ASCII
//! letters, digits and `-` (UUIDs and similar), which keeps the mapping
//! injective: `_` never appears in an accepted identifier, so every `_` in
//! the sanitized middle part came from a `-`. Upper case is refused because
//! some backends (SQLite tables) compare collection names case-insensitively.

use docindex_core::{AppError, AppResult};

pub const INDEX_PREFIX: &str = "vector_index_";
pub const INDEX_SUFFIX: &str = "_node";

/// Check that a dataset identifier is in the accepted alphabet.
pub fn validate_dataset_id(dataset_id: &str) -> AppResult<()> {
    if dataset_id.is_empty()
        || !dataset_id
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        return Err(AppError::InvalidDatasetId(dataset_id.to_string()));
    }
    Ok(())
}

/// Derive the collection name for a dataset.
///
/// Deterministic: the same identifier always yields the same name.
///
/// ```
/// use docindex_vector::naming::index_name;
///
/// assert_eq!(index_name("abc-123-def").unwrap(), "vector_index_abc_123_def_node");
/// ```
pub fn index_name(dataset_id: &str) -> AppResult<String> {
    validate_dataset_id(dataset_id)?;

    let sanitized = dataset_id.replace('-', "_");
    Ok(format!("{}{}{}", INDEX_PREFIX, sanitized, INDEX_SUFFIX))
}

/// Whether `name` is safe to splice into backend identifiers
/// (SQL table names, Weaviate class names).
pub fn is_safe_collection_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .next()
            .map(|c| c.is_ascii_alphabetic())
            .unwrap_or(false)
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_index_name_sanitizes_separators() {
        assert_eq!(
            index_name("abc-123-def").unwrap(),
            "vector_index_abc_123_def_node"
        );
    }

    #[test]
    fn test_index_name_is_deterministic() {
        let first = index_name("abc-123-def").unwrap();
        for _ in 0..10 {
            assert_eq!(index_name("abc-123-def").unwrap(), first);
        }
    }

    #[test]
    fn test_index_name_uuid() {
        let name = index_name("5b1c7a3e-9f0d-4e2b-8c4a-1d2e3f4a5b6c").unwrap();
        assert_eq!(
            name,
            "vector_index_5b1c7a3e_9f0d_4e2b_8c4a_1d2e3f4a5b6c_node"
        );
        assert!(is_safe_collection_name(&name));
    }

    #[test]
    fn test_index_name_rejects_disallowed_characters() {
        assert!(matches!(
            index_name("a_b"),
            Err(AppError::InvalidDatasetId(_))
        ));
        assert!(index_name("").is_err());
        assert!(index_name("ds/../etc").is_err());
        assert!(index_name("ds 1").is_err());
        assert!(index_name("dé").is_err());
    }

    #[test]
    fn test_index_name_rejects_upper_case() {
        assert!(matches!(
            index_name("ABC"),
            Err(AppError::InvalidDatasetId(_))
        ));
        assert!(validate_dataset_id("5B1C7A3E-9F0D").is_err());
        assert!(validate_dataset_id("5b1c7a3e-9f0d").is_ok());
    }

    #[test]
    fn test_safe_collection_name() {
        assert!(is_safe_collection_name("vector_index_x_node"));
        assert!(!is_safe_collection_name("1abc"));
        assert!(!is_safe_collection_name("a\"b"));
        assert!(!is_safe_collection_name(""));
    }

    proptest! {
        #[test]
        fn prop_index_name_is_injective(a in "[a-z0-9-]{1,40}", b in "[a-z0-9-]{1,40}") {
            prop_assume!(a != b);
            prop_assert_ne!(
                index_name(&a).unwrap().to_ascii_lowercase(),
                index_name(&b).unwrap().to_ascii_lowercase()
            );
        }

        #[test]
        fn prop_index_name_is_backend_safe(id in "[a-z0-9-]{1,64}") {
            let name = index_name(&id).unwrap();
            prop_assert!(is_safe_collection_name(&name));
            prop_assert!(!name.contains('-'));
        }
    }
}
