//! The AS (autonomous system) table: a sorted, binary-searchable array.

use crate::error::WriteError;
use crate::format;
use crate::pool::Pool;
use std::collections::HashSet;

/// Information on an AS, resolved from a table record and the string pool.
#[derive(Debug, Clone, Copy)]
pub struct As<'a> {
    asn: u32,
    name: &'a str,
}

impl<'a> As<'a> {
    pub fn asn(&self) -> u32 {
        self.asn
    }

    pub fn name(&self) -> &'a str {
        self.name
    }
}

/// A read-only view over the on-disk AS table.
#[derive(Clone, Copy)]
pub struct AsTable<'a> {
    records: &'a [format::As],
}

impl<'a> AsTable<'a> {
    /// Wraps `records`, which must already be known to be sorted by `asn`
    /// (checked by the caller at open time).
    pub fn new(records: &'a [format::As]) -> AsTable<'a> {
        AsTable { records }
    }

    pub fn is_sorted(records: &[format::As]) -> bool {
        records.windows(2).all(|w| w[0].asn.get() < w[1].asn.get())
    }

    pub fn get(&self, pool: &Pool<'a>, asn: u32) -> Option<As<'a>> {
        let index = self.records.binary_search_by_key(&asn, |r| r.asn.get()).ok()?;
        let record = &self.records[index];
        let name = pool.get(record.name.offset.get()).ok()?;
        Some(As { asn: record.asn.get(), name })
    }
}

/// Accumulates `(asn, name)` pairs for the writer, rejecting duplicate ASNs.
#[derive(Default)]
pub struct AsTableBuilder {
    entries: Vec<(u32, String)>,
    seen: HashSet<u32>,
}

impl AsTableBuilder {
    pub fn new() -> AsTableBuilder {
        AsTableBuilder::default()
    }

    pub fn add(&mut self, asn: u32, name: &str) -> Result<(), WriteError> {
        if asn == 0 {
            return Err(WriteError::InvalidArgument("AS number must be non-zero".into()));
        }
        if !self.seen.insert(asn) {
            return Err(WriteError::Duplicate);
        }
        self.entries.push((asn, name.to_string()));
        Ok(())
    }

    /// Returns entries sorted ascending by ASN, ready for serialisation.
    pub fn into_sorted(mut self) -> Vec<(u32, String)> {
        self.entries.sort_by_key(|(asn, _)| *asn);
        self.entries
    }

    /// Same as [`AsTableBuilder::into_sorted`] but without consuming the
    /// builder, so [`crate::Writer::write`] can be retried after failure.
    pub fn sorted_entries(&self) -> Vec<(u32, String)> {
        let mut entries = self.entries.clone();
        entries.sort_by_key(|(asn, _)| *asn);
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_zero_asn() {
        let mut b = AsTableBuilder::new();
        assert!(matches!(b.add(0, "x"), Err(WriteError::InvalidArgument(_))));
    }

    #[test]
    fn rejects_duplicate_asn() {
        let mut b = AsTableBuilder::new();
        b.add(1, "one").unwrap();
        assert!(matches!(b.add(1, "one again"), Err(WriteError::Duplicate)));
    }

    #[test]
    fn sorts_on_finalize() {
        let mut b = AsTableBuilder::new();
        b.add(300, "c").unwrap();
        b.add(100, "a").unwrap();
        b.add(200, "b").unwrap();
        let sorted = b.into_sorted();
        assert_eq!(sorted.iter().map(|(asn, _)| *asn).collect::<Vec<_>>(), vec![100, 200, 300]);
    }
}
