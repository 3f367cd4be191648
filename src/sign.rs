//! PEM-encoded RSA/SHA-512 signing and verification of the digest produced by
//! zeroing the header's signature block before hashing.

use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::{pkcs1v15, RsaPrivateKey, RsaPublicKey};
use sha2::Sha512;
use signature::{SignatureEncoding, Signer, Verifier};

use crate::error::WriteError;
use crate::format::SIGNATURE_MAX_LEN;

/// Parses a PEM-encoded RSA private key, trying PKCS#8 then PKCS#1.
pub fn parse_private_key(pem: &str) -> Result<RsaPrivateKey, WriteError> {
    RsaPrivateKey::from_pkcs8_pem(pem)
        .or_else(|_| RsaPrivateKey::from_pkcs1_pem(pem))
        .map_err(|_| WriteError::InvalidArgument("could not parse private key PEM".into()))
}

/// Parses a PEM-encoded RSA public key, trying PKCS#8 then PKCS#1.
pub fn parse_public_key(pem: &str) -> Result<RsaPublicKey, &'static str> {
    RsaPublicKey::from_public_key_pem(pem)
        .or_else(|_| RsaPublicKey::from_pkcs1_pem(pem))
        .map_err(|_| "could not parse public key PEM")
}

/// Signs `digest_input` (the header/file bytes with the signature block
/// zeroed) with `key`, returning a DER signature no longer than
/// [`SIGNATURE_MAX_LEN`].
pub fn sign(key: &RsaPrivateKey, digest_input: &[u8]) -> Result<Vec<u8>, WriteError> {
    let signing_key = pkcs1v15::SigningKey::<Sha512>::new(key.clone());
    let signature = signing_key.sign(digest_input);
    let bytes = signature.to_vec();
    if bytes.len() > SIGNATURE_MAX_LEN {
        return Err(WriteError::InvalidArgument("signature exceeds on-disk signature slot".into()));
    }
    Ok(bytes)
}

/// Verifies `signature` over `digest_input` against `key`.
pub fn verify(key: &RsaPublicKey, digest_input: &[u8], signature: &[u8]) -> bool {
    let verifying_key = pkcs1v15::VerifyingKey::<Sha512>::new(key.clone());
    let Ok(sig) = pkcs1v15::Signature::try_from(signature) else {
        return false;
    };
    verifying_key.verify(digest_input, &sig).is_ok()
}
