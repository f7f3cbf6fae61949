//! Error types for container operations.
//!
//! Absence (a missing key, an out-of-range subscript read) is reported as
//! `None`, not as an error. The variants here cover writes whose precondition
//! does not hold at the moment they are applied.

use thiserror::Error;

/// Error returned when a write cannot be applied to the current contents.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CollectionError {
    /// The index does not address an element of the collection
    #[error("index {index} is out of range for length {len}")]
    IndexOutOfRange {
        /// The requested index
        index: usize,
        /// Length of the collection when the write was applied
        len: usize,
    },

    /// The operation needs at least one element
    #[error("collection is empty")]
    EmptyCollection,
}

/// Result type for container operations.
pub type Result<T, E = CollectionError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CollectionError::IndexOutOfRange { index: 4, len: 2 };
        assert_eq!(err.to_string(), "index 4 is out of range for length 2");
        assert_eq!(
            CollectionError::EmptyCollection.to_string(),
            "collection is empty"
        );
    }
}
