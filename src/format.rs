//! On-disk record layouts for the database file.
//!
//! Every multi-byte integer is big-endian; every struct here is `Unaligned`
//! so it can be read directly out of an mmap'd byte slice regardless of its
//! address's alignment.

use std::mem;
use zerocopy::byteorder::big_endian as be;
use zerocopy::{AsBytes, FromBytes, FromZeroes, Unaligned};
// Traits and derive macros of the same name live in separate namespaces, so
// both imports coexist: the line above brings the traits into scope, this one
// brings in the `#[derive(...)]` macros actually used below.
use zerocopy_derive::{AsBytes, FromBytes, FromZeroes, Unaligned};

/// The 7 ASCII bytes every database file starts with.
pub const MAGIC_BYTES: [u8; 7] = *b"LOCDBXX";
/// The only version this implementation understands.
pub const VERSION: u16 = 1;
/// Length in bytes of the magic + version preamble.
pub const MAGIC_LEN: usize = 9;

/// Sentinel used for "no child"/"no leaf" in [`TreeNode`].
pub const SENTINEL: u32 = u32::MAX;

/// Maximum length in bytes of an embedded signature.
pub const SIGNATURE_MAX_LEN: usize = 2048;

/// Leaf flag: network hosts anonymous proxies.
pub const NETWORK_FLAG_ANONYMOUS_PROXY: u16 = 1 << 0;
/// Leaf flag: network is operated by a satellite provider.
pub const NETWORK_FLAG_SATELLITE_PROVIDER: u16 = 1 << 1;
/// Leaf flag: network consists of anycast addresses.
pub const NETWORK_FLAG_ANYCAST: u16 = 1 << 2;
/// Leaf flag: network is on the operator's drop list.
pub const NETWORK_FLAG_DROP: u16 = 1 << 3;

/// The 9-byte magic + version preamble.
#[derive(Clone, Copy, Debug, AsBytes, FromBytes, FromZeroes, Unaligned)]
#[repr(C)]
pub struct Magic {
    pub magic: [u8; 7],
    pub version: be::U16,
}

/// A reference into the string pool.
#[derive(Clone, Copy, Debug, AsBytes, FromBytes, FromZeroes, Unaligned)]
#[repr(C)]
pub struct StrRef {
    pub offset: be::U32,
}

/// A `(offset, length)` section descriptor, both relative to the start of the file.
#[derive(Clone, Copy, Debug, AsBytes, FromBytes, FromZeroes, Unaligned)]
#[repr(C)]
pub struct FileRange {
    pub offset: be::U32,
    pub length: be::U32,
}

impl FileRange {
    pub fn start(&self) -> u32 {
        self.offset.get()
    }
    pub fn end(&self) -> Option<u32> {
        self.offset.get().checked_add(self.length.get())
    }
}

/// The fixed-size header that immediately follows the magic preamble.
///
/// Field order matches the external wire format: vendor/description/license
/// string refs, creation time, then the five section descriptors, then the
/// two signature slots.
#[derive(Clone, Copy, AsBytes, FromBytes, FromZeroes, Unaligned)]
#[repr(C)]
pub struct Header {
    pub vendor: StrRef,
    pub description: StrRef,
    pub license: StrRef,
    pub created_at: be::U64,
    pub pool: FileRange,
    pub as_: FileRange,
    pub network_tree: FileRange,
    pub networks: FileRange,
    pub countries: FileRange,
    pub signature1_length: be::U16,
    pub signature1: [u8; SIGNATURE_MAX_LEN],
    pub signature2_length: be::U16,
    pub signature2: [u8; SIGNATURE_MAX_LEN],
}

/// Number of trailing bytes of [`Header`] that make up the two signature slots.
///
/// Kept as a formula (rather than a literal) so it stays correct if the
/// slot size ever changes: `length` field + body, twice over.
pub const SIG_BLOCK_LEN: usize = (2 + SIGNATURE_MAX_LEN) * 2;

impl Header {
    /// Byte offset, within the header, at which the signature block begins.
    pub fn sig_block_offset() -> usize {
        mem::size_of::<Header>() - SIG_BLOCK_LEN
    }
}

/// An autonomous system record. 8 bytes on disk.
#[derive(Clone, Copy, Debug, AsBytes, FromBytes, FromZeroes, Unaligned)]
#[repr(C)]
pub struct As {
    pub asn: be::U32,
    pub name: StrRef,
}

/// A country record. 8 bytes on disk.
#[derive(Clone, Copy, Debug, AsBytes, FromBytes, FromZeroes, Unaligned)]
#[repr(C)]
pub struct Country {
    pub code: [u8; 2],
    pub continent_code: [u8; 2],
    pub name: StrRef,
}

/// A network-leaf record: the attributes attached to a tree leaf. 8 bytes on disk.
#[derive(Clone, Copy, Debug, PartialEq, Eq, AsBytes, FromBytes, FromZeroes, Unaligned)]
#[repr(C)]
pub struct NetworkLeaf {
    pub country_code: [u8; 2],
    pub flags: be::U16,
    pub asn: be::U32,
}

/// A radix tree node. 12 bytes on disk.
#[derive(Clone, Copy, Debug, AsBytes, FromBytes, FromZeroes, Unaligned)]
#[repr(C)]
pub struct TreeNode {
    pub zero: be::U32,
    pub one: be::U32,
    pub network_index: be::U32,
}

impl TreeNode {
    pub fn child(&self, bit: bool) -> u32 {
        if bit {
            self.one.get()
        } else {
            self.zero.get()
        }
    }
    pub fn network(&self) -> Option<u32> {
        let idx = self.network_index.get();
        (idx != SENTINEL).then_some(idx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_sizes_match_spec() {
        assert_eq!(mem::size_of::<As>(), 8);
        assert_eq!(mem::size_of::<Country>(), 8);
        assert_eq!(mem::size_of::<NetworkLeaf>(), 8);
        assert_eq!(mem::size_of::<TreeNode>(), 12);
        assert_eq!(MAGIC_LEN, mem::size_of::<Magic>());
    }

    #[test]
    fn sig_block_is_the_headers_tail() {
        let off = Header::sig_block_offset();
        assert_eq!(mem::size_of::<Header>() - off, SIG_BLOCK_LEN);
    }
}
