#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

//! See the crate-level [README](self) for an overview. The modules below
//! implement, leaves-first, the on-disk format this crate reads and writes:
//!
//! - [`address`] — 128-bit address arithmetic with IPv4 embedded at
//!   `::ffff:0:0/96`.
//! - [`pool`] — the deduplicating string arena every name/description is
//!   stored in.
//! - [`as_table`] / [`country`] — the two binary-searchable metadata tables.
//! - [`tree`] — the network-leaf table and the radix tree indexing it.
//! - [`format`] — the on-disk record layouts shared by reader and writer.
//! - [`database`] — opening, verifying, and querying a database file.
//! - [`writer`] — building and serialising a new one.
//! - [`context`] / [`error`] — the ambient `Context` value and error types.

pub mod address;
pub mod as_table;
pub mod context;
pub mod country;
pub mod database;
pub mod error;
pub mod format;
pub mod pool;
pub mod tree;
pub mod writer;

mod sign;

pub use crate::address::Family;
pub use crate::context::Context;
pub use crate::database::{As, Country, Database, Filter, Network, NetworkV4, NetworkV6};
pub use crate::error::{AddressError, AddressRangeError, InvalidArgument, OpenError, VerifyError, WriteError};
pub use crate::tree::LeafData;
pub use crate::writer::Writer;

#[cfg(test)]
mod tests {
    //! Crate-level smoke test exercising the façade end to end, independent
    //! of the module-local unit tests and `tests/roundtrip.rs`.
    use super::*;
    use std::io::Cursor;

    #[test]
    fn facade_round_trips_through_the_public_api() {
        let mut writer = Writer::new();
        writer.set_vendor("Test Vendor").unwrap();
        writer.set_description("L").unwrap();
        writer.set_license("CC").unwrap();
        writer.add_as(65001, "TEST").unwrap();
        writer.add_country("DE", "EU", "Germany").unwrap();
        writer
            .add_network(
                "2001:db8::/32".parse().unwrap(),
                LeafData { country_code: *b"DE", flags: 0, asn: 65001 },
            )
            .unwrap();

        let mut buf = Cursor::new(Vec::new());
        writer.write(&mut buf, format::VERSION).unwrap();

        let path = std::env::temp_dir().join(format!("libloc-facade-test-{}.db", std::process::id()));
        std::fs::write(&path, buf.into_inner()).unwrap();
        let db = Database::open(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(db.vendor(), "Test Vendor");
        assert_eq!(db.description(), "L");
        assert_eq!(db.license(), "CC");
        assert_eq!(db.as_(65001).unwrap().name(), "TEST");
        assert_eq!(db.country("DE").unwrap().continent_code(), "EU");
        assert_eq!(db.lookup("2001:db8::1".parse().unwrap()).unwrap().asn(), 65001);
    }
}
