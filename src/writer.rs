//! Building and serialising a new database file.

use ipnet::IpNet;
use rsa::RsaPrivateKey;
use std::cell::Cell;
use std::io::Write;
use std::time::{SystemTime, UNIX_EPOCH};
use zerocopy::AsBytes;

use crate::address::Address;
use crate::as_table::AsTableBuilder;
use crate::context::Context;
use crate::country::{self, CountryTableBuilder};
use crate::error::WriteError;
use crate::format::{self, Header, MAGIC_BYTES, MAGIC_LEN, SIGNATURE_MAX_LEN};
use crate::pool::PoolBuilder;
use crate::sign;
use crate::tree::{LeafData, TreeBuilder};

/// Accumulates vendor/description/license, AS, country and network records,
/// then serialises them into a single database file.
///
/// Moves through three states: `Empty` at construction, `Populated` once any
/// `add_*`/`set_*` call has been made (tracked implicitly — no observable
/// difference from `Empty` other than having data), and `Sealed` once
/// [`Writer::write`] succeeds. `add_*`/`set_*`/`write` all reject further
/// calls with [`WriteError::Sealed`] once sealed; a *failed* `write` does not
/// seal the writer, so it remains usable for retry.
pub struct Writer {
    ctx: Context,
    vendor: String,
    description: String,
    license: String,
    as_builder: AsTableBuilder,
    country_builder: CountryTableBuilder,
    tree_builder: TreeBuilder,
    sign_keys: Vec<RsaPrivateKey>,
    sealed: Cell<bool>,
}

impl Writer {
    /// Creates an empty writer with a default, unnamed [`Context`].
    pub fn new() -> Writer {
        Writer::new_with_context(Context::default())
    }

    /// Creates an empty writer, tagging diagnostic spans with `ctx`.
    pub fn new_with_context(ctx: Context) -> Writer {
        Writer {
            ctx,
            vendor: String::new(),
            description: String::new(),
            license: String::new(),
            as_builder: AsTableBuilder::new(),
            country_builder: CountryTableBuilder::new(),
            tree_builder: TreeBuilder::new(),
            sign_keys: Vec::new(),
            sealed: Cell::new(false),
        }
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    /// Whether a prior [`Writer::write`] has sealed this writer; no further
    /// mutation or writes are possible.
    pub fn is_sealed(&self) -> bool {
        self.sealed.get()
    }

    fn ensure_not_sealed(&self) -> Result<(), WriteError> {
        if self.sealed.get() {
            return Err(WriteError::Sealed);
        }
        Ok(())
    }

    pub fn set_vendor(&mut self, vendor: impl Into<String>) -> Result<(), WriteError> {
        self.ensure_not_sealed()?;
        self.vendor = vendor.into();
        Ok(())
    }

    pub fn set_description(&mut self, description: impl Into<String>) -> Result<(), WriteError> {
        self.ensure_not_sealed()?;
        self.description = description.into();
        Ok(())
    }

    pub fn set_license(&mut self, license: impl Into<String>) -> Result<(), WriteError> {
        self.ensure_not_sealed()?;
        self.license = license.into();
        Ok(())
    }

    /// Registers a PEM-encoded RSA private key the database will be signed
    /// with. At most two keys may be registered; the on-disk format has
    /// exactly two signature slots.
    pub fn add_sign_key(&mut self, private_key_pem: &str) -> Result<(), WriteError> {
        self.ensure_not_sealed()?;
        if self.sign_keys.len() >= 2 {
            return Err(WriteError::InvalidArgument("at most two signing keys are supported".into()));
        }
        self.sign_keys.push(sign::parse_private_key(private_key_pem)?);
        Ok(())
    }

    pub fn add_as(&mut self, asn: u32, name: &str) -> Result<(), WriteError> {
        self.ensure_not_sealed()?;
        self.as_builder.add(asn, name)
    }

    pub fn add_country(&mut self, code: &str, continent: &str, name: &str) -> Result<(), WriteError> {
        self.ensure_not_sealed()?;
        self.country_builder.add(code, continent, name)
    }

    /// Adds a network with the given attributes. `net`'s host bits are
    /// ignored; insertion, deduplication and merging follow the same rules
    /// as the on-disk tree's construction.
    pub fn add_network(&mut self, net: IpNet, data: LeafData) -> Result<(), WriteError> {
        self.ensure_not_sealed()?;
        if !country::is_valid_for_leaf(data.country_code) {
            return Err(WriteError::InvalidArgument("invalid country code in network record".into()));
        }
        let (address, prefix) = match net {
            IpNet::V4(n) => (Address::from_v4(n.network()), u32::from(n.prefix_len()) + 96),
            IpNet::V6(n) => (Address::from_v6(n.network()), u32::from(n.prefix_len())),
        };
        self.tree_builder.insert(address, prefix, data);
        Ok(())
    }

    /// Serialises the accumulated data as a database of the given format
    /// `version` and writes it to `sink`, sealing the writer on success.
    pub fn write<W: Write>(&self, sink: &mut W, version: u16) -> Result<(), WriteError> {
        self.ensure_not_sealed()?;
        if version != format::VERSION {
            return Err(WriteError::UnsupportedVersion(version));
        }

        let mut pool = PoolBuilder::new();
        let vendor_off = pool.add(&self.vendor);
        let description_off = pool.add(&self.description);
        let license_off = pool.add(&self.license);

        let as_records: Vec<format::As> = self
            .as_builder
            .sorted_entries()
            .into_iter()
            .map(|(asn, name)| format::As { asn: asn.into(), name: format::StrRef { offset: pool.add(&name).into() } })
            .collect();

        let country_records: Vec<format::Country> = self
            .country_builder
            .sorted_entries()
            .into_iter()
            .map(|(code, continent, name)| format::Country {
                code,
                continent_code: continent,
                name: format::StrRef { offset: pool.add(&name).into() },
            })
            .collect();

        let canonical = self.tree_builder.canonicalize();

        let pool_bytes = pool.into_bytes();
        let as_bytes = as_records.as_slice().as_bytes();
        let networks_bytes = canonical.leaves.as_slice().as_bytes();
        let tree_bytes = canonical.nodes.as_slice().as_bytes();
        let countries_bytes = country_records.as_slice().as_bytes();

        let header_len = std::mem::size_of::<Header>() as u32;
        let pool_off = header_len;
        let as_off = pool_off + pool_bytes.len() as u32;
        let networks_off = as_off + as_bytes.len() as u32;
        let tree_off = networks_off + networks_bytes.len() as u32;
        let countries_off = tree_off + tree_bytes.len() as u32;

        let range = |offset: u32, len: usize| format::FileRange { offset: offset.into(), length: (len as u32).into() };

        let created_at =
            SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0);

        let mut header = Header {
            vendor: format::StrRef { offset: vendor_off.into() },
            description: format::StrRef { offset: description_off.into() },
            license: format::StrRef { offset: license_off.into() },
            created_at: created_at.into(),
            pool: range(pool_off, pool_bytes.len()),
            as_: range(as_off, as_bytes.len()),
            network_tree: range(tree_off, tree_bytes.len()),
            networks: range(networks_off, networks_bytes.len()),
            countries: range(countries_off, countries_bytes.len()),
            signature1_length: 0.into(),
            signature1: [0u8; SIGNATURE_MAX_LEN],
            signature2_length: 0.into(),
            signature2: [0u8; SIGNATURE_MAX_LEN],
        };

        let mut buffer = Vec::with_capacity(MAGIC_LEN + header_len as usize + pool_bytes.len());
        buffer.extend_from_slice(&MAGIC_BYTES);
        buffer.extend_from_slice(&version.to_be_bytes());
        buffer.extend_from_slice(header.as_bytes());
        buffer.extend_from_slice(&pool_bytes);
        buffer.extend_from_slice(as_bytes);
        buffer.extend_from_slice(networks_bytes);
        buffer.extend_from_slice(tree_bytes);
        buffer.extend_from_slice(countries_bytes);

        if !self.sign_keys.is_empty() {
            // The signature block within the header is currently all zero,
            // which is also what a verifier must reconstruct before
            // checking a signature: sign the buffer as it stands.
            let slots = [(&mut header.signature1_length, &mut header.signature1), (
                &mut header.signature2_length,
                &mut header.signature2,
            )];
            for (key, (length, bytes)) in self.sign_keys.iter().zip(slots.into_iter()) {
                let signature = sign::sign(key, &buffer)?;
                length.set(signature.len() as u16);
                bytes[..signature.len()].copy_from_slice(&signature);
            }
            let header_start = MAGIC_LEN;
            buffer[header_start..header_start + header_len as usize].copy_from_slice(header.as_bytes());
        }

        sink.write_all(&buffer)?;
        self.sealed.set(true);
        Ok(())
    }
}

impl Default for Writer {
    fn default() -> Self {
        Writer::new()
    }
}
