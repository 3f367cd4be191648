//! Opening, verifying, and querying a database file.

use ipnet::{IpNet, Ipv4Net, Ipv6Net};
use memmap2::Mmap;
use std::fs::File;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::ops::Deref;
use std::path::Path;
use stable_deref_trait::StableDeref;
use tracing::{debug, instrument};
use yoke::Yoke;
use yoke_derive::Yokeable;
use zerocopy::FromBytes;

use crate::address::{Address, Family};
use crate::as_table::AsTable;
use crate::context::Context;
use crate::country::CountryTable;
use crate::error::{InvalidArgument, OpenError, VerifyError};
use crate::format::{self, Header, MAGIC_BYTES, MAGIC_LEN, VERSION};
use crate::pool::Pool;
use crate::sign;
use crate::tree::{self, Tree};

pub use crate::as_table::As;
pub use crate::country::Country;
pub use crate::tree::Filter;

/// The bytes a [`Database`] is backed by: a memory map on the happy path, or
/// a heap-allocated copy when mapping the file failed for a reason that
/// doesn't preclude reading it (e.g. an in-memory filesystem that refuses
/// `mmap`, or a file shorter than a page on some platforms).
enum Backing {
    Mmap(Mmap),
    Heap(Vec<u8>),
}

impl Deref for Backing {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            Backing::Mmap(m) => m,
            Backing::Heap(v) => v,
        }
    }
}

// SAFETY: both variants deref to a pointer stable across moves of the
// `Backing` value itself (`Mmap` is its own stable allocation; `Vec<u8>`'s
// data pointer does not move when the `Vec` is moved).
unsafe impl StableDeref for Backing {}

#[derive(Yokeable)]
struct DatabaseInner<'a> {
    header: &'a Header,
    pool: Pool<'a>,
    as_: AsTable<'a>,
    countries: CountryTable<'a>,
    tree: Tree<'a>,
    leaves: &'a [format::NetworkLeaf],
}

trait ByteSliceExt {
    fn get_range(&self, range: format::FileRange) -> Result<&[u8], OpenError>;
    fn get_typed_range<T: FromBytes>(&self, range: format::FileRange, field: &'static str) -> Result<&[T], OpenError>;
}

impl ByteSliceExt for [u8] {
    fn get_range(&self, range: format::FileRange) -> Result<&[u8], OpenError> {
        let end = range.end().ok_or(OpenError::InvalidData("section end overflows"))?;
        self.get(range.start() as usize..end as usize).ok_or(OpenError::InvalidData("section out of bounds"))
    }

    fn get_typed_range<T: FromBytes>(&self, range: format::FileRange, field: &'static str) -> Result<&[T], OpenError> {
        let bytes = self.get_range(range)?;
        T::slice_from(bytes).ok_or(OpenError::InvalidData(field))
    }
}

/// Validates that none of the named sections overlap one another, per the
/// open procedure's requirement that declared sections be non-overlapping.
fn check_non_overlapping(sections: &[(&'static str, format::FileRange)]) -> Result<(), OpenError> {
    let mut spans: Vec<(u32, u32, &'static str)> = Vec::with_capacity(sections.len());
    for &(name, range) in sections {
        let end = range.end().ok_or(OpenError::InvalidData("section end overflows"))?;
        spans.push((range.start(), end, name));
    }
    spans.sort_by_key(|&(start, _, _)| start);
    for pair in spans.windows(2) {
        let (_, prev_end, _) = pair[0];
        let (next_start, _, _) = pair[1];
        if next_start < prev_end {
            return Err(OpenError::InvalidData("sections overlap"));
        }
    }
    Ok(())
}

fn parse(bytes: &[u8]) -> Result<DatabaseInner<'_>, OpenError> {
    if bytes.len() < MAGIC_LEN || bytes[..7] != MAGIC_BYTES {
        return Err(OpenError::NotADatabase);
    }
    let version = u16::from_be_bytes([bytes[7], bytes[8]]);
    if version != VERSION {
        return Err(OpenError::UnsupportedVersion(version));
    }

    let header_bytes = bytes.get(MAGIC_LEN..).ok_or(OpenError::NotADatabase)?;
    let header = Header::ref_from_prefix(header_bytes).ok_or(OpenError::InvalidData("header"))?;

    // Covers the magic+version preamble as well as the header itself, so a
    // section offset of 0 (landing on the magic bytes) is caught too.
    let header_range = format::FileRange {
        offset: 0u32.into(),
        length: ((MAGIC_LEN + std::mem::size_of::<Header>()) as u32).into(),
    };
    check_non_overlapping(&[
        ("magic + header", header_range),
        ("pool", header.pool),
        ("as table", header.as_),
        ("network tree", header.network_tree),
        ("network leaf table", header.networks),
        ("country table", header.countries),
    ])?;

    let pool_bytes = bytes.get_range(header.pool)?;
    let as_records: &[format::As] = bytes.get_typed_range(header.as_, "as table")?;
    let countries: &[format::Country] = bytes.get_typed_range(header.countries, "country table")?;
    let tree_nodes: &[format::TreeNode] = bytes.get_typed_range(header.network_tree, "network tree")?;
    let leaves: &[format::NetworkLeaf] = bytes.get_typed_range(header.networks, "network leaf table")?;

    if !AsTable::is_sorted(as_records) {
        return Err(OpenError::InvalidData("as table not sorted"));
    }
    if !CountryTable::is_sorted(countries) {
        return Err(OpenError::InvalidData("country table not sorted"));
    }

    Ok(DatabaseInner {
        header,
        pool: Pool::new(pool_bytes),
        as_: AsTable::new(as_records),
        countries: CountryTable::new(countries),
        tree: Tree::new(tree_nodes),
        leaves,
    })
}

/// A database, memory-mapped from disk.
pub struct Database {
    inner: Yoke<DatabaseInner<'static>, Backing>,
    ctx: Context,
}

impl Database {
    /// Opens the database at `path` with a default, unnamed [`Context`].
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Database, OpenError> {
        Database::open_with_context(Context::default(), path)
    }

    /// Opens the database at `path`, tagging diagnostic spans with `ctx`.
    #[instrument(skip(path), fields(ctx = %ctx))]
    pub fn open_with_context<P: AsRef<Path>>(ctx: Context, path: P) -> Result<Database, OpenError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(OpenError::Open)?;

        let backing = match unsafe { Mmap::map(&file) } {
            Ok(mmap) => {
                #[cfg(unix)]
                let _ = mmap.advise(memmap2::Advice::Random);
                Backing::Mmap(mmap)
            }
            Err(e) => {
                debug!(error = %e, "mmap failed, falling back to a heap-buffered read");
                use std::io::Read;
                let mut buf = Vec::new();
                let mut file = file;
                file.read_to_end(&mut buf).map_err(OpenError::Open)?;
                Backing::Heap(buf)
            }
        };

        let inner = Yoke::try_attach_to_cart(backing, |bytes| parse(bytes))?;
        {
            let parsed = inner.get();
            debug!(vendor = %parsed.header_field(parsed.header.vendor, &parsed.pool), "opened database");
        }
        Ok(Database { inner, ctx })
    }

    /// The [`Context`] this database was opened with.
    pub fn context(&self) -> &Context {
        &self.ctx
    }

    /// The database's declared creation time, as a Unix timestamp.
    pub fn created_at(&self) -> u64 {
        self.inner.get().header.created_at.get()
    }

    pub fn vendor(&self) -> &str {
        let inner = self.inner.get();
        inner.header_field(inner.header.vendor, &inner.pool)
    }

    pub fn description(&self) -> &str {
        let inner = self.inner.get();
        inner.header_field(inner.header.description, &inner.pool)
    }

    pub fn license(&self) -> &str {
        let inner = self.inner.get();
        inner.header_field(inner.header.license, &inner.pool)
    }

    /// Looks up an autonomous system by number.
    pub fn as_(&self, asn: u32) -> Option<As<'_>> {
        let inner = self.inner.get();
        inner.as_.get(&inner.pool, asn)
    }

    /// Looks up a country by its ISO 3166-1 alpha-2 (or reserved pseudo-)
    /// code.
    pub fn country(&self, code: &str) -> Option<Country<'_>> {
        let inner = self.inner.get();
        inner.countries.get(&inner.pool, code).ok().flatten()
    }

    /// Looks up network information for an IP address.
    pub fn lookup(&self, addr: IpAddr) -> Option<Network<'_>> {
        match addr {
            IpAddr::V4(a) => self.lookup_v4(a).map(Into::into),
            IpAddr::V6(a) => self.lookup_v6(a).map(Into::into),
        }
    }

    /// Parses `addr` (either family) and looks it up, per the public API
    /// surface's `lookup(address_string)`. `InvalidArgument` on parse failure.
    pub fn lookup_str(&self, addr: &str) -> Result<Option<Network<'_>>, InvalidArgument> {
        let addr: IpAddr = addr.parse().map_err(|_| InvalidArgument)?;
        Ok(self.lookup(addr))
    }

    pub fn lookup_v4(&self, addr: Ipv4Addr) -> Option<NetworkV4<'_>> {
        let inner = self.inner.get();
        let hit = inner.tree.lookup(Address::from_v4(addr))?;
        // A hit shallower than `::ffff:0:0/96` covers the entire v4-mapped
        // range (e.g. a network inserted as `::/0`); clamp to `0.0.0.0/0`
        // rather than underflowing, so a genuine LPM match is never dropped.
        let prefix = hit.prefix.saturating_sub(crate::address::V4_MAPPED_PREFIX_LEN) as u8;
        let addrs = Ipv4Net::new(addr, prefix).ok()?.trunc();
        Some(NetworkV4 { inner: NetworkInner::from_leaf(inner, hit.leaf_index)?, addrs })
    }

    pub fn lookup_v6(&self, addr: Ipv6Addr) -> Option<NetworkV6<'_>> {
        let inner = self.inner.get();
        let hit = inner.tree.lookup(Address::from_v6(addr))?;
        let addrs = Ipv6Net::new(addr, hit.prefix as u8).ok()?.trunc();
        Some(NetworkV6 { inner: NetworkInner::from_leaf(inner, hit.leaf_index)?, addrs })
    }

    /// Enumerates every network in the database (or, with `filter`, the
    /// subset matching it), in ascending address order.
    pub fn list_networks(&self, filter: Filter) -> impl Iterator<Item = Network<'_>> + '_ {
        let inner = self.inner.get();
        networks_from_walk(inner, inner.tree.full(), filter)
    }

    /// Enumerates the networks on or below `net` (or, with `filter`, the
    /// subset matching it), in ascending address order. Yields nothing if
    /// `net` doesn't land exactly on a node already present in the tree.
    pub fn list_networks_under(&self, net: IpNet, filter: Filter) -> impl Iterator<Item = Network<'_>> + '_ {
        let inner = self.inner.get();
        let (address, prefix) = match net {
            IpNet::V4(n) => (Address::from_v4(n.network()), u32::from(n.prefix_len()) + crate::address::V4_MAPPED_PREFIX_LEN),
            IpNet::V6(n) => (Address::from_v6(n.network()), u32::from(n.prefix_len())),
        };
        networks_from_walk(inner, inner.tree.subnet(address, prefix), filter)
    }

    /// Verifies the database's signature against a PEM-encoded public key.
    ///
    /// Whether the database carries a signature at all is a property of the
    /// database, independent of the caller's key, so `NoSignature` is
    /// checked before the key is even parsed.
    pub fn verify(&self, public_key_pem: &str) -> Result<(), VerifyError> {
        let header = self.inner.get().header;
        let sig1_len = header.signature1_length.get() as usize;
        let sig2_len = header.signature2_length.get() as usize;
        if sig1_len == 0 && sig2_len == 0 {
            return Err(VerifyError::NoSignature);
        }

        let pubkey = sign::parse_public_key(public_key_pem).map_err(|_| VerifyError::BadSignature)?;

        let full = self.inner.backing_cart().deref();
        let mut zeroed = full.to_vec();
        let header_start = MAGIC_LEN;
        let sig_start = header_start + Header::sig_block_offset();
        zeroed[sig_start..header_start + std::mem::size_of::<Header>()].fill(0);

        if sig1_len != 0 && sign::verify(&pubkey, &zeroed, &header.signature1[..sig1_len]) {
            return Ok(());
        }
        if sig2_len != 0 && sign::verify(&pubkey, &zeroed, &header.signature2[..sig2_len]) {
            return Ok(());
        }
        Err(VerifyError::BadSignature)
    }
}

impl<'a> DatabaseInner<'a> {
    fn header_field(&self, r: format::StrRef, pool: &Pool<'a>) -> &'a str {
        pool.get(r.offset.get()).unwrap_or("")
    }
}

fn networks_from_walk<'a>(
    inner: &'a DatabaseInner<'a>,
    walk: tree::Walk<'a>,
    filter: Filter,
) -> impl Iterator<Item = Network<'a>> + 'a {
    walk.filter_map(move |hit| {
        let leaf = inner.leaves.get(hit.leaf_index as usize)?;
        let family = hit.address.family();
        if !filter.matches(leaf, family) {
            return None;
        }
        let addrs = hit_to_ipnet(hit, family)?;
        Some(Network { inner: NetworkInner::from_leaf(inner, hit.leaf_index)?, addrs })
    })
}

fn hit_to_ipnet(hit: tree::Hit, family: Family) -> Option<IpNet> {
    match family {
        Family::V4 => {
            let addr = hit.address.to_ipv4()?;
            let prefix = hit.prefix.saturating_sub(crate::address::V4_MAPPED_PREFIX_LEN) as u8;
            Some(IpNet::V4(Ipv4Net::new(addr, prefix).ok()?))
        }
        Family::V6 => {
            let addr = hit.address.to_ipv6();
            Some(IpNet::V6(Ipv6Net::new(addr, hit.prefix as u8).ok()?))
        }
    }
}

/// Information on an IP network, resolved from a tree hit and its leaf payload.
#[derive(Debug)]
pub struct Network<'a> {
    inner: NetworkInner<'a>,
    addrs: IpNet,
}

/// Same as [`Network`], specialised to IPv4.
#[derive(Debug)]
pub struct NetworkV4<'a> {
    inner: NetworkInner<'a>,
    addrs: Ipv4Net,
}

/// Same as [`Network`], specialised to IPv6.
#[derive(Debug)]
pub struct NetworkV6<'a> {
    inner: NetworkInner<'a>,
    addrs: Ipv6Net,
}

#[derive(Debug)]
struct NetworkInner<'a> {
    country_code: &'a str,
    asn: u32,
    flags: u16,
}

impl<'a> NetworkInner<'a> {
    fn from_leaf(inner: &DatabaseInner<'a>, leaf_index: u32) -> Option<NetworkInner<'a>> {
        let leaf = inner.leaves.get(leaf_index as usize)?;
        Some(NetworkInner {
            country_code: std::str::from_utf8(&leaf.country_code).unwrap_or(""),
            asn: leaf.asn.get(),
            flags: leaf.flags.get(),
        })
    }
}

impl<'a> From<NetworkV4<'a>> for Network<'a> {
    fn from(n: NetworkV4<'a>) -> Network<'a> {
        Network { inner: n.inner, addrs: n.addrs.into() }
    }
}

impl<'a> From<NetworkV6<'a>> for Network<'a> {
    fn from(n: NetworkV6<'a>) -> Network<'a> {
        Network { inner: n.inner, addrs: n.addrs.into() }
    }
}

macro_rules! network_accessors {
    () => {
        /// The ISO 3166-1 alpha-2 country code associated with this network.
        pub fn country_code(&self) -> &'a str {
            self.inner.country_code
        }
        /// The ASN of this network, 0 if unknown.
        pub fn asn(&self) -> u32 {
            self.inner.asn
        }
        pub fn is_anonymous_proxy(&self) -> bool {
            self.inner.flags & format::NETWORK_FLAG_ANONYMOUS_PROXY != 0
        }
        pub fn is_satellite_provider(&self) -> bool {
            self.inner.flags & format::NETWORK_FLAG_SATELLITE_PROVIDER != 0
        }
        pub fn is_anycast(&self) -> bool {
            self.inner.flags & format::NETWORK_FLAG_ANYCAST != 0
        }
        pub fn is_drop(&self) -> bool {
            self.inner.flags & format::NETWORK_FLAG_DROP != 0
        }
    };
}

impl<'a> Network<'a> {
    network_accessors!();

    pub fn addrs(&self) -> IpNet {
        self.addrs
    }
}

impl<'a> NetworkV4<'a> {
    network_accessors!();

    pub fn addrs(&self) -> Ipv4Net {
        self.addrs
    }
}

impl<'a> NetworkV6<'a> {
    network_accessors!();

    pub fn addrs(&self) -> Ipv6Net {
        self.addrs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::LeafData;
    use crate::writer::Writer;
    use std::io::Cursor;

    fn sample_db() -> Vec<u8> {
        let mut w = Writer::new();
        w.set_vendor("Test Vendor").unwrap();
        w.add_country("DE", "EU", "Germany").unwrap();
        w.add_as(1234, "Example AS").unwrap();
        w.add_network(
            "10.0.0.0/8".parse().unwrap(),
            LeafData { country_code: *b"DE", flags: 0, asn: 1234 },
        )
        .unwrap();
        let mut buf = Cursor::new(Vec::new());
        w.write(&mut buf, format::VERSION).unwrap();
        buf.into_inner()
    }

    #[test]
    fn parse_rejects_empty_input() {
        assert!(matches!(parse(&[]), Err(OpenError::NotADatabase)));
    }

    #[test]
    fn parse_rejects_bad_magic() {
        assert!(matches!(parse(b"NOTADB!!!"), Err(OpenError::NotADatabase)));
    }

    #[test]
    fn parses_written_database() {
        let bytes = sample_db();
        let inner = parse(&bytes).unwrap();
        assert_eq!(inner.header_field(inner.header.vendor, &inner.pool), "Test Vendor");
    }

    #[test]
    fn rejects_section_overlapping_the_header() {
        let mut bytes = sample_db();
        // `pool` is the first `FileRange` field after `vendor`/`description`/
        // `license`/`created_at` (4 + 4 + 4 + 8 = 20 bytes into the header);
        // zeroing its offset plants it on top of the magic/header bytes.
        let pool_offset_field = MAGIC_LEN + 20;
        bytes[pool_offset_field..pool_offset_field + 4].copy_from_slice(&0u32.to_be_bytes());
        assert!(matches!(parse(&bytes), Err(OpenError::InvalidData("sections overlap"))));
    }

    #[test]
    fn rejects_section_claiming_the_magic_bytes() {
        let mut bytes = sample_db();
        // Offset 0, length 4: lands entirely within the magic preamble
        // rather than overlapping the header fields checked above.
        let pool_offset_field = MAGIC_LEN + 20;
        bytes[pool_offset_field..pool_offset_field + 4].copy_from_slice(&0u32.to_be_bytes());
        bytes[pool_offset_field + 4..pool_offset_field + 8].copy_from_slice(&4u32.to_be_bytes());
        assert!(matches!(parse(&bytes), Err(OpenError::InvalidData("sections overlap"))));
    }

    #[test]
    fn lookup_v4_does_not_underflow_on_a_shallow_covering_network() {
        let mut w = Writer::new();
        w.add_network("::/0".parse().unwrap(), LeafData { country_code: *b"DE", flags: 0, asn: 1 }).unwrap();
        let mut buf = Cursor::new(Vec::new());
        w.write(&mut buf, format::VERSION).unwrap();
        let path = std::env::temp_dir().join(format!("libloc-v4-underflow-test-{}.db", std::process::id()));
        std::fs::write(&path, buf.into_inner()).unwrap();
        let db = Database::open(&path).unwrap();
        std::fs::remove_file(&path).ok();

        let hit = db.lookup_v4(Ipv4Addr::new(8, 8, 8, 8)).expect("::/0 covers every v4 address too");
        assert_eq!(hit.addrs().prefix_len(), 0);
        assert_eq!(hit.asn(), 1);
    }

    #[test]
    fn lookup_str_parses_and_looks_up() {
        let bytes = sample_db();
        let path = std::env::temp_dir().join(format!("libloc-lookup-str-test-{}.db", std::process::id()));
        std::fs::write(&path, bytes).unwrap();
        let db = Database::open(&path).unwrap();
        std::fs::remove_file(&path).ok();

        let network = db.lookup_str("10.1.2.3").unwrap().unwrap();
        assert_eq!(network.country_code(), "DE");
        assert!(db.lookup_str("11.0.0.1").unwrap().is_none());
        assert!(db.lookup_str("not an address").is_err());
    }
}
