use crate::engine::Datum;

/// Accumulates `list` output as `[k1 = v1, k2 = v2]`.
///
/// Rows are pushed in scan order. Keys that do not start with the prefix are
/// skipped; the scan feeding the formatter is a lower-bound scan over an
/// unordered heap, so a non-matching row says nothing about the rows after it.
pub struct ListFormatter {
    prefix: Vec<u8>,
    out: Vec<u8>,
    entries: usize,
}

impl ListFormatter {
    pub fn new(prefix: &[u8]) -> Self {
        Self {
            prefix: prefix.to_vec(),
            out: vec![b'['],
            entries: 0,
        }
    }

    /// Append the row if its key has the prefix. Returns whether it did.
    pub fn push(&mut self, key: &[u8], value: &[u8]) -> bool {
        if !key.starts_with(&self.prefix) {
            return false;
        }
        if self.entries > 0 {
            self.out.extend_from_slice(b", ");
        }
        self.out.extend_from_slice(key);
        self.out.extend_from_slice(b" = ");
        self.out.extend_from_slice(value);
        self.entries += 1;
        true
    }

    pub fn entries(&self) -> usize {
        self.entries
    }

    pub fn finish(mut self) -> Datum {
        self.out.push(b']');
        Datum::from_bytes(self.out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_list() {
        assert_eq!(ListFormatter::new(b"").finish(), Datum::from("[]"));
        let mut f = ListFormatter::new(b"name.");
        assert!(!f.push(b"age.1", b"9"));
        assert_eq!(f.finish(), Datum::from("[]"));
    }

    #[test]
    fn separators_between_entries() {
        let mut f = ListFormatter::new(b"");
        f.push(b"a", b"1");
        assert_eq!(f.entries(), 1);
        f.push(b"b", b"2");
        f.push(b"c", b"3");
        assert_eq!(f.finish(), Datum::from("[a = 1, b = 2, c = 3]"));
    }

    #[test]
    fn skips_without_stopping() {
        let mut f = ListFormatter::new(b"name.");
        // Order as an unordered heap might return it under `key >= 'name.'`.
        assert!(f.push(b"name.2", b"Rex"));
        assert!(!f.push(b"zebra", b"z"));
        assert!(f.push(b"name.1", b"Julia"));
        assert_eq!(f.finish(), Datum::from("[name.2 = Rex, name.1 = Julia]"));
    }

    #[test]
    fn emits_bytes_verbatim() {
        let mut f = ListFormatter::new(b"");
        f.push(b"a, b", b"x = y]");
        assert_eq!(f.finish(), Datum::from("[a, b = x = y]]"));
    }
}
