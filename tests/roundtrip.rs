//! End-to-end scenarios from the on-disk format's testable properties:
//! writer output round-trips through the reader, longest-prefix match picks
//! the most specific network, adjacent identical networks merge on write,
//! signatures verify (and tampering breaks verification), and the
//! enumerator's family filter restricts to the right address range.

use libloc::{Database, Family, Filter, LeafData, OpenError, VerifyError, Writer};
use rand_core::OsRng;
use rsa::pkcs8::{EncodePrivateKey, EncodePublicKey};
use rsa::{RsaPrivateKey, RsaPublicKey};
use std::io::Cursor;

fn write_to_temp(writer: &Writer) -> tempfile::NamedTempFile {
    let mut buf = Cursor::new(Vec::new());
    writer.write(&mut buf, 1).expect("write database");
    let mut file = tempfile::NamedTempFile::new().expect("create temp file");
    std::io::Write::write_all(&mut file, &buf.into_inner()).expect("write temp file");
    file
}

#[test]
fn empty_file_is_rejected() {
    let file = tempfile::NamedTempFile::new().unwrap();
    let err = Database::open(file.path()).unwrap_err();
    assert!(matches!(err, OpenError::NotADatabase));
}

#[test]
fn random_bytes_are_rejected_without_crashing() {
    let bytes: Vec<u8> = (0..4096u32).map(|i| (i * 2654435761) as u8).collect();
    let file = tempfile::NamedTempFile::new().unwrap();
    std::fs::write(file.path(), &bytes).unwrap();
    let err = Database::open(file.path()).unwrap_err();
    assert!(matches!(err, OpenError::NotADatabase | OpenError::UnsupportedVersion(_)));
}

#[test]
fn write_read_round_trip() {
    let mut writer = Writer::new();
    writer.set_vendor("Test Vendor").unwrap();
    writer.set_description("L").unwrap();
    writer.set_license("CC").unwrap();
    writer.add_as(65001, "TEST").unwrap();
    writer.add_country("DE", "EU", "Germany").unwrap();
    writer
        .add_network("2001:db8::/32".parse().unwrap(), LeafData { country_code: *b"DE", flags: 0, asn: 65001 })
        .unwrap();

    let file = write_to_temp(&writer);
    let db = Database::open(file.path()).unwrap();

    assert_eq!(db.vendor(), "Test Vendor");
    assert_eq!(db.description(), "L");
    assert_eq!(db.license(), "CC");
    assert_eq!(db.as_(65001).unwrap().name(), "TEST");
    assert_eq!(db.country("DE").unwrap().continent_code(), "EU");
    assert_eq!(db.lookup("2001:db8::1".parse().unwrap()).unwrap().asn(), 65001);
}

#[test]
fn longest_prefix_match_picks_most_specific_network() {
    let mut writer = Writer::new();
    writer.add_country("US", "NA", "United States").unwrap();
    writer.add_country("CA", "NA", "Canada").unwrap();
    writer.add_network("10.0.0.0/8".parse().unwrap(), LeafData { country_code: *b"US", flags: 0, asn: 0 }).unwrap();
    writer.add_network("10.1.0.0/16".parse().unwrap(), LeafData { country_code: *b"CA", flags: 0, asn: 0 }).unwrap();

    let file = write_to_temp(&writer);
    let db = Database::open(file.path()).unwrap();

    assert_eq!(db.lookup("10.1.2.3".parse().unwrap()).unwrap().country_code(), "CA");
    assert_eq!(db.lookup("10.2.0.1".parse().unwrap()).unwrap().country_code(), "US");
    assert!(db.lookup("11.0.0.1".parse().unwrap()).is_none());
}

#[test]
fn adjacent_identical_networks_merge_on_write() {
    let mut writer = Writer::new();
    writer.add_country("DE", "EU", "Germany").unwrap();
    let leaf = LeafData { country_code: *b"DE", flags: 0, asn: 1 };
    writer.add_network("10.0.0.0/9".parse().unwrap(), leaf).unwrap();
    writer.add_network("10.128.0.0/9".parse().unwrap(), leaf).unwrap();

    let file = write_to_temp(&writer);
    let db = Database::open(file.path()).unwrap();

    let networks: Vec<_> = db.list_networks(Filter::new()).collect();
    assert_eq!(networks.len(), 1);
    assert_eq!(networks[0].addrs().to_string(), "10.0.0.0/8");
}

#[test]
fn list_networks_under_restricts_to_the_given_subnet() {
    let mut writer = Writer::new();
    writer.add_network("10.1.0.0/16".parse().unwrap(), LeafData { country_code: *b"US", flags: 0, asn: 1 }).unwrap();
    writer.add_network("10.2.0.0/16".parse().unwrap(), LeafData { country_code: *b"US", flags: 0, asn: 2 }).unwrap();
    writer
        .add_network("192.168.0.0/16".parse().unwrap(), LeafData { country_code: *b"US", flags: 0, asn: 3 })
        .unwrap();

    let file = write_to_temp(&writer);
    let db = Database::open(file.path()).unwrap();

    let under_10: Vec<_> = db.list_networks_under("10.0.0.0/8".parse().unwrap(), Filter::new()).collect();
    assert_eq!(under_10.len(), 2);
    assert_eq!(under_10[0].addrs().to_string(), "10.1.0.0/16");
    assert_eq!(under_10[1].addrs().to_string(), "10.2.0.0/16");

    let under_single: Vec<_> = db.list_networks_under("10.1.0.0/16".parse().unwrap(), Filter::new()).collect();
    assert_eq!(under_single.len(), 1);
    assert_eq!(under_single[0].asn(), 1);

    let under_unrelated: Vec<_> = db.list_networks_under("172.16.0.0/12".parse().unwrap(), Filter::new()).collect();
    assert!(under_unrelated.is_empty());
}

#[test]
fn signature_verifies_and_tampering_breaks_it() {
    let key = RsaPrivateKey::new(&mut OsRng, 2048).unwrap();
    let pubkey = RsaPublicKey::from(&key);
    let private_pem = key.to_pkcs8_pem(Default::default()).unwrap();
    let public_pem = pubkey.to_public_key_pem(Default::default()).unwrap();

    let mut writer = Writer::new();
    writer.set_vendor("Signed Vendor").unwrap();
    writer.add_sign_key(private_pem.as_str()).unwrap();
    writer.add_network("2001:db8::/32".parse().unwrap(), LeafData { country_code: *b"DE", flags: 0, asn: 1 }).unwrap();

    let mut buf = Cursor::new(Vec::new());
    writer.write(&mut buf, 1).unwrap();
    let mut bytes = buf.into_inner();

    let file = tempfile::NamedTempFile::new().unwrap();
    std::fs::write(file.path(), &bytes).unwrap();
    let db = Database::open(file.path()).unwrap();
    db.verify(&public_pem).expect("signature should verify");

    // Flip one byte well past the header, inside the string pool.
    let header_and_magic_len = 9 + std::mem::size_of::<libloc::format::Header>();
    bytes[header_and_magic_len + 4] ^= 0xff;
    std::fs::write(file.path(), &bytes).unwrap();
    let tampered = Database::open(file.path()).unwrap();
    let err = tampered.verify(&public_pem).unwrap_err();
    assert!(matches!(err, VerifyError::BadSignature));
}

#[test]
fn unsigned_database_has_no_signature() {
    let mut writer = Writer::new();
    writer.add_network("2001:db8::/32".parse().unwrap(), LeafData { country_code: *b"DE", flags: 0, asn: 1 }).unwrap();
    let file = write_to_temp(&writer);
    let db = Database::open(file.path()).unwrap();
    assert!(matches!(db.verify("not a key"), Err(VerifyError::NoSignature)));
}

#[test]
fn family_filter_restricts_enumeration_to_v4_or_v6() {
    let mut writer = Writer::new();
    writer.add_network("10.0.0.0/8".parse().unwrap(), LeafData { country_code: *b"US", flags: 0, asn: 1 }).unwrap();
    writer
        .add_network("192.168.0.0/16".parse().unwrap(), LeafData { country_code: *b"US", flags: 0, asn: 2 })
        .unwrap();
    writer
        .add_network("2001:db8::/32".parse().unwrap(), LeafData { country_code: *b"DE", flags: 0, asn: 3 })
        .unwrap();

    let file = write_to_temp(&writer);
    let db = Database::open(file.path()).unwrap();

    let v4: Vec<_> = db.list_networks(Filter::new().family(Family::V4)).collect();
    assert_eq!(v4.len(), 2);
    assert!(v4.windows(2).all(|w| w[0].addrs().network() < w[1].addrs().network()));
    for n in &v4 {
        assert!(n.addrs().addr().is_ipv4());
    }

    let v6: Vec<_> = db.list_networks(Filter::new().family(Family::V6)).collect();
    assert_eq!(v6.len(), 1);
    assert!(v6[0].addrs().addr().is_ipv6());
}
