use std::borrow::Cow;
use std::fmt;

use crate::engine::error::HostError;

/// Object identifier for catalog entries (schemas and tables).
pub type Oid = u32;

/// First OID handed out to user objects.
pub const FIRST_NORMAL_OID: Oid = 16384;

/// 1-based column number within a tuple descriptor.
pub type AttrNumber = u16;

/// Physical identity of a tuple version inside a heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ItemPointer(pub u64);

impl fmt::Display for ItemPointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(0,{})", self.0)
    }
}

/// A non-null text value. Comparison is plain byte order; the engine never
/// interprets the encoding.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Datum(Vec<u8>);

impl Datum {
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Text rendering, replacing invalid UTF-8 sequences.
    pub fn to_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.0)
    }
}

impl fmt::Debug for Datum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.to_text())
    }
}

impl From<&str> for Datum {
    fn from(s: &str) -> Self {
        Self(s.as_bytes().to_vec())
    }
}

impl From<String> for Datum {
    fn from(s: String) -> Self {
        Self(s.into_bytes())
    }
}

impl From<&[u8]> for Datum {
    fn from(b: &[u8]) -> Self {
        Self(b.to_vec())
    }
}

/// One column of a relation. Every column is of type `text`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name: String,
    pub not_null: bool,
}

/// Shape of the rows stored in a relation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TupleDesc {
    attrs: Vec<Attribute>,
}

impl TupleDesc {
    pub fn new(attrs: Vec<Attribute>) -> Self {
        Self { attrs }
    }

    pub fn natts(&self) -> usize {
        self.attrs.len()
    }

    /// Column by 1-based number.
    pub fn attr(&self, attno: AttrNumber) -> Option<&Attribute> {
        (attno as usize)
            .checked_sub(1)
            .and_then(|idx| self.attrs.get(idx))
    }

    pub fn attrs(&self) -> &[Attribute] {
        &self.attrs
    }
}

/// A tuple version as handed out by a scan: its values plus the item pointer
/// that locates it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeapTuple {
    pub tid: ItemPointer,
    pub values: Vec<Option<Datum>>,
}

impl HeapTuple {
    /// Value of a 1-based column; `None` for SQL NULL or an out-of-range column.
    pub fn attr(&self, attno: AttrNumber) -> Option<&Datum> {
        (attno as usize)
            .checked_sub(1)
            .and_then(|idx| self.values.get(idx))
            .and_then(|v| v.as_ref())
    }
}

/// Mutable carrier used to assemble a row before it is inserted.
///
/// The slot borrows the descriptor of the relation it was made for, so it
/// cannot outlive the open relation.
#[derive(Debug)]
pub struct TupleSlot<'d> {
    desc: &'d TupleDesc,
    values: Vec<Option<Datum>>,
    is_virtual: bool,
}

impl<'d> TupleSlot<'d> {
    pub fn new(desc: &'d TupleDesc) -> Self {
        Self {
            desc,
            values: vec![None; desc.natts()],
            is_virtual: false,
        }
    }

    /// Empty the slot: every column becomes NULL and the slot holds no tuple.
    pub fn clear(&mut self) {
        self.values.iter_mut().for_each(|v| *v = None);
        self.is_virtual = false;
    }

    /// Store a non-null value in a 1-based column.
    pub fn set_value(&mut self, attno: AttrNumber, value: Datum) -> Result<(), HostError> {
        let slot = self.position(attno)?;
        *slot = Some(value);
        Ok(())
    }

    pub fn set_null(&mut self, attno: AttrNumber) -> Result<(), HostError> {
        let slot = self.position(attno)?;
        *slot = None;
        Ok(())
    }

    /// Declare the column values complete; the slot now holds a virtual tuple.
    pub fn store_virtual(&mut self) {
        self.is_virtual = true;
    }

    pub fn is_empty(&self) -> bool {
        !self.is_virtual
    }

    /// Produce an owned copy of the row, checking not-null constraints.
    pub fn materialize(&self) -> Result<Vec<Option<Datum>>, HostError> {
        if !self.is_virtual {
            return Err(HostError::EmptySlot);
        }
        for (attr, value) in self.desc.attrs().iter().zip(&self.values) {
            if attr.not_null && value.is_none() {
                return Err(HostError::NotNullViolation {
                    column: attr.name.clone(),
                });
            }
        }
        Ok(self.values.clone())
    }

    fn position(&mut self, attno: AttrNumber) -> Result<&mut Option<Datum>, HostError> {
        let natts = self.values.len();
        (attno as usize)
            .checked_sub(1)
            .and_then(|idx| self.values.get_mut(idx))
            .ok_or(HostError::InvalidAttribute { attno, natts })
    }
}

/// Comparison applied by a scan key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Equal,
    GreaterEqual,
}

/// Single-column predicate installed on a heap scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanKey {
    pub attno: AttrNumber,
    pub strategy: Strategy,
    pub argument: Datum,
}

impl ScanKey {
    pub fn new(attno: AttrNumber, strategy: Strategy, argument: Datum) -> Self {
        Self {
            attno,
            strategy,
            argument,
        }
    }

    /// Operators are strict: a NULL column never satisfies the key.
    pub fn matches(&self, values: &[Option<Datum>]) -> bool {
        let column = (self.attno as usize)
            .checked_sub(1)
            .and_then(|idx| values.get(idx))
            .and_then(|v| v.as_ref());
        match column {
            Some(value) => match self.strategy {
                Strategy::Equal => value.as_bytes() == self.argument.as_bytes(),
                Strategy::GreaterEqual => value.as_bytes() >= self.argument.as_bytes(),
            },
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kv_desc() -> TupleDesc {
        TupleDesc::new(vec![
            Attribute { name: "key".into(), not_null: true },
            Attribute { name: "value".into(), not_null: true },
        ])
    }

    #[test]
    fn scan_key_compares_bytes() {
        let row = vec![Some(Datum::from("name.1")), Some(Datum::from("Julia"))];
        assert!(ScanKey::new(1, Strategy::Equal, "name.1".into()).matches(&row));
        assert!(!ScanKey::new(1, Strategy::Equal, "name.".into()).matches(&row));
        assert!(ScanKey::new(1, Strategy::GreaterEqual, "name.".into()).matches(&row));
        assert!(!ScanKey::new(1, Strategy::GreaterEqual, "zzz".into()).matches(&row));
        // Byte order, not locale order: 'Z' (0x5a) sorts before 'a' (0x61).
        let upper = vec![Some(Datum::from("Z")), None];
        assert!(!ScanKey::new(1, Strategy::GreaterEqual, "a".into()).matches(&upper));
    }

    #[test]
    fn scan_key_never_matches_null() {
        let row = vec![None, Some(Datum::from("v"))];
        assert!(!ScanKey::new(1, Strategy::GreaterEqual, Datum::default()).matches(&row));
    }

    #[test]
    fn slot_enforces_not_null() {
        let desc = kv_desc();
        let mut slot = TupleSlot::new(&desc);
        slot.set_value(1, "k".into()).unwrap();
        slot.store_virtual();
        let err = slot.materialize().unwrap_err();
        assert!(matches!(err, HostError::NotNullViolation { ref column } if column == "value"));

        slot.clear();
        assert!(slot.is_empty());
        slot.set_value(1, "k".into()).unwrap();
        slot.set_value(2, "v".into()).unwrap();
        slot.store_virtual();
        let row = slot.materialize().unwrap();
        assert_eq!(row, vec![Some("k".into()), Some("v".into())]);
    }

    #[test]
    fn slot_rejects_out_of_range_columns() {
        let desc = kv_desc();
        let mut slot = TupleSlot::new(&desc);
        assert!(slot.set_value(0, "x".into()).is_err());
        assert!(slot.set_null(3).is_err());
    }

    #[test]
    fn empty_slot_cannot_materialize() {
        let desc = kv_desc();
        let slot = TupleSlot::new(&desc);
        assert!(matches!(slot.materialize(), Err(HostError::EmptySlot)));
    }
}
