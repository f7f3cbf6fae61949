//! Items held by the reuse pool.

use std::any::{self, Any};
use std::fmt;

/// A payload waiting in the pool, tagged with its identifier and group.
///
/// Two items are equal when their identifiers match. Payload and group are
/// not compared.
pub struct PooledItem {
    identifier: String,
    group: String,
    payload: Box<dyn Any + Send>,
}

impl PooledItem {
    /// Wrap `payload`. Without an explicit identifier the payload's type name
    /// is used.
    pub fn new<P: Any + Send>(payload: P, identifier: Option<&str>, group: impl Into<String>) -> Self {
        let identifier = identifier.map_or_else(|| default_identifier::<P>().to_owned(), str::to_owned);
        Self {
            identifier,
            group: group.into(),
            payload: Box::new(payload),
        }
    }

    /// Key the item is filed under
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Secondary tag. Not used for lookup.
    pub fn group(&self) -> &str {
        &self.group
    }

    /// Borrow the payload
    pub fn payload(&self) -> &(dyn Any + Send) {
        self.payload.as_ref()
    }

    /// Whether the payload is a `P`
    pub fn holds<P: Any>(&self) -> bool {
        self.payload.is::<P>()
    }

    /// Give up the wrapper and keep the payload
    pub fn into_payload(self) -> Box<dyn Any + Send> {
        self.payload
    }

    /// Recover a payload of type `P`, or get the item back unchanged.
    pub fn downcast<P: Any>(self) -> Result<P, Self> {
        let Self {
            identifier,
            group,
            payload,
        } = self;
        match payload.downcast::<P>() {
            Ok(payload) => Ok(*payload),
            Err(payload) => Err(Self {
                identifier,
                group,
                payload,
            }),
        }
    }
}

/// Identifier used when none is given at check-in: the type name of `P`.
///
/// The name is the static type. A `Box<dyn Any + Send>` is named as the box,
/// whatever it holds.
pub fn default_identifier<P: Any>() -> &'static str {
    any::type_name::<P>()
}

impl PartialEq for PooledItem {
    fn eq(&self, other: &Self) -> bool {
        self.identifier == other.identifier
    }
}

impl Eq for PooledItem {}

impl fmt::Debug for PooledItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledItem")
            .field("identifier", &self.identifier)
            .field("group", &self.group)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Cell {
        row: usize,
    }

    #[test]
    fn test_identifier_defaults_to_type_name() {
        let item = PooledItem::new(Cell { row: 3 }, None, "inbox");
        assert_eq!(item.identifier(), default_identifier::<Cell>());
        assert!(item.identifier().ends_with("Cell"));
        assert_eq!(item.group(), "inbox");

        let named = PooledItem::new(Cell { row: 4 }, Some("row"), "inbox");
        assert_eq!(named.identifier(), "row");
    }

    #[test]
    fn test_equality_compares_identifier_only() {
        let a = PooledItem::new(1u8, Some("x"), "first");
        let b = PooledItem::new("text", Some("x"), "second");
        let c = PooledItem::new(1u8, Some("y"), "first");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_downcast() {
        let item = PooledItem::new(Cell { row: 9 }, None, "g");
        assert!(item.holds::<Cell>());
        assert!(!item.holds::<u32>());

        let item = item.downcast::<u32>().unwrap_err();
        let cell = item.downcast::<Cell>().ok().unwrap();
        assert_eq!(cell.row, 9);
    }
}
