//! RSA primitives behind the crypto seams.
//!
//! The resolver and facade consume two small traits — [`KeypairGenerator`]
//! and [`AsymmetricCrypto`] — so tests can substitute deterministic fakes
//! and the algorithm choice stays in one place. Keys cross these seams as
//! DER bytes: SubjectPublicKeyInfo for public halves, PKCS#8 for private
//! halves.
//!
//! # Padding
//!
//! - [`public_encrypt`](AsymmetricCrypto::public_encrypt) / [`private_decrypt`](AsymmetricCrypto::private_decrypt) use OAEP with SHA-256, chunked per
//!   modulus block so payloads larger than one block (wrapped PKCS#8 keys)
//!   round-trip.
//! - [`private_encrypt`](AsymmetricCrypto::private_encrypt) / [`public_decrypt`](AsymmetricCrypto::public_decrypt) use PKCS#1 v1.5 type-1 padding: a
//!   private-key transform whose output the public key recovers. This is
//!   signing semantics, and it is what the sign/verify operations are
//!   built on.

use rsa::{
    pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey},
    rand_core::OsRng,
    traits::PublicKeyParts,
    BigUint, Oaep, Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey,
};
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::error::{KeymanagerError, Result};

/// OAEP-SHA256 overhead per modulus block: two hash lengths plus two bytes.
const OAEP_OVERHEAD: usize = 2 * 32 + 2;

/// PKCS#1 v1.5 type-1 overhead: leading `00 01`, eight-plus padding bytes
/// and the `00` separator.
const PKCS1_TYPE1_OVERHEAD: usize = 11;

/// A freshly generated keypair, DER-encoded on both halves.
pub struct GeneratedKeypair {
    /// DER SubjectPublicKeyInfo of the public half.
    pub public_key_der: Vec<u8>,
    /// PKCS#8 DER of the private half.
    pub private_key_der: Zeroizing<Vec<u8>>,
}

/// Generates asymmetric keypairs for minting.
pub trait KeypairGenerator: Send + Sync {
    /// Generates a fresh keypair.
    fn generate(&self) -> Result<GeneratedKeypair>;
}

/// The asymmetric primitives the facade and resolver consume.
pub trait AsymmetricCrypto: Send + Sync {
    /// Encrypts `plaintext` under the public key, chunking as needed.
    fn public_encrypt(&self, public_key_der: &[u8], plaintext: &[u8]) -> Result<Vec<u8>>;

    /// Decrypts ciphertext produced by
    /// [`public_encrypt`](AsymmetricCrypto::public_encrypt).
    fn private_decrypt(
        &self,
        private_key_der: &[u8],
        ciphertext: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>>;

    /// Applies the private-key transform to `data` (PKCS#1 v1.5 type-1).
    /// Limited to one modulus block.
    fn private_encrypt(&self, private_key_der: &[u8], data: &[u8]) -> Result<Vec<u8>>;

    /// Recovers the data embedded by
    /// [`private_encrypt`](AsymmetricCrypto::private_encrypt) using the
    /// public key.
    fn public_decrypt(&self, public_key_der: &[u8], data: &[u8]) -> Result<Vec<u8>>;

    /// Checks that `private_key_der` parses as a PKCS#8 RSA private key.
    fn validate_private_key(&self, private_key_der: &[u8]) -> Result<()>;
}

fn crypto_err(context: &str, err: impl std::fmt::Display) -> KeymanagerError {
    KeymanagerError::Crypto(format!("{context}: {err}"))
}

fn parse_public(der: &[u8]) -> Result<RsaPublicKey> {
    RsaPublicKey::from_public_key_der(der).map_err(|e| crypto_err("parse RSA public key", e))
}

fn parse_private(der: &[u8]) -> Result<RsaPrivateKey> {
    RsaPrivateKey::from_pkcs8_der(der).map_err(|e| crypto_err("parse RSA private key", e))
}

/// RSA keypair generator.
#[derive(Debug, Clone, Copy)]
pub struct RsaKeypairGenerator {
    bits: usize,
}

impl RsaKeypairGenerator {
    /// Creates a generator producing keys of the given modulus size.
    #[must_use]
    pub fn new(bits: usize) -> Self {
        Self { bits }
    }
}

impl Default for RsaKeypairGenerator {
    fn default() -> Self {
        Self { bits: 2048 }
    }
}

impl KeypairGenerator for RsaKeypairGenerator {
    fn generate(&self) -> Result<GeneratedKeypair> {
        let mut rng = OsRng;
        let private_key = RsaPrivateKey::new(&mut rng, self.bits)
            .map_err(|e| crypto_err("generate RSA keypair", e))?;
        let public_key = RsaPublicKey::from(&private_key);

        let public_key_der = public_key
            .to_public_key_der()
            .map_err(|e| crypto_err("encode RSA public key", e))?
            .as_bytes()
            .to_vec();
        let private_key_der = Zeroizing::new(
            private_key
                .to_pkcs8_der()
                .map_err(|e| crypto_err("encode RSA private key", e))?
                .as_bytes()
                .to_vec(),
        );

        Ok(GeneratedKeypair { public_key_der, private_key_der })
    }
}

/// RSA implementation of [`AsymmetricCrypto`].
#[derive(Debug, Clone, Copy, Default)]
pub struct RsaCrypto;

impl AsymmetricCrypto for RsaCrypto {
    fn public_encrypt(&self, public_key_der: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
        let public_key = parse_public(public_key_der)?;
        let block = public_key.size();
        let chunk = block
            .checked_sub(OAEP_OVERHEAD)
            .ok_or_else(|| KeymanagerError::Crypto("RSA modulus too small for OAEP".into()))?;

        let mut rng = OsRng;
        let mut out = Vec::with_capacity(plaintext.len().div_ceil(chunk.max(1)) * block);
        for piece in plaintext.chunks(chunk) {
            let encrypted = public_key
                .encrypt(&mut rng, Oaep::new::<Sha256>(), piece)
                .map_err(|e| crypto_err("OAEP encrypt", e))?;
            out.extend_from_slice(&encrypted);
        }
        Ok(out)
    }

    fn private_decrypt(
        &self,
        private_key_der: &[u8],
        ciphertext: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>> {
        let private_key = parse_private(private_key_der)?;
        let block = private_key.size();
        if ciphertext.is_empty() || ciphertext.len() % block != 0 {
            return Err(KeymanagerError::Crypto(format!(
                "ciphertext length {} is not a multiple of the {block}-byte modulus",
                ciphertext.len()
            )));
        }

        let mut out = Zeroizing::new(Vec::with_capacity(ciphertext.len()));
        for piece in ciphertext.chunks(block) {
            let decrypted = private_key
                .decrypt(Oaep::new::<Sha256>(), piece)
                .map_err(|e| crypto_err("OAEP decrypt", e))?;
            out.extend_from_slice(&decrypted);
        }
        Ok(out)
    }

    fn private_encrypt(&self, private_key_der: &[u8], data: &[u8]) -> Result<Vec<u8>> {
        let private_key = parse_private(private_key_der)?;
        let block = private_key.size();
        if data.len() + PKCS1_TYPE1_OVERHEAD > block {
            return Err(KeymanagerError::Crypto(format!(
                "data length {} exceeds the {} bytes one {block}-byte block can carry",
                data.len(),
                block - PKCS1_TYPE1_OVERHEAD
            )));
        }

        private_key
            .sign(Pkcs1v15Sign::new_unprefixed(), data)
            .map_err(|e| crypto_err("private-key transform", e))
    }

    fn public_decrypt(&self, public_key_der: &[u8], data: &[u8]) -> Result<Vec<u8>> {
        let public_key = parse_public(public_key_der)?;
        let block = public_key.size();
        if data.len() != block {
            return Err(KeymanagerError::Crypto(format!(
                "transformed data length {} does not match the {block}-byte modulus",
                data.len()
            )));
        }

        // Raw public-key operation, then strip the PKCS#1 v1.5 type-1
        // padding the private transform applied.
        let c = BigUint::from_bytes_be(data);
        if c >= *public_key.n() {
            return Err(KeymanagerError::Crypto("transformed data out of range".into()));
        }
        let em = c.modpow(public_key.e(), public_key.n()).to_bytes_be();

        let mut padded = vec![0u8; block - em.len()];
        padded.extend_from_slice(&em);
        strip_type1_padding(&padded)
    }

    fn validate_private_key(&self, private_key_der: &[u8]) -> Result<()> {
        parse_private(private_key_der).map(|_| ())
    }
}

/// Strips `00 01 FF.. 00` type-1 padding from an encryption block.
fn strip_type1_padding(em: &[u8]) -> Result<Vec<u8>> {
    let invalid = || KeymanagerError::Crypto("invalid PKCS#1 type-1 padding".into());

    if em.len() < PKCS1_TYPE1_OVERHEAD || em[0] != 0x00 || em[1] != 0x01 {
        return Err(invalid());
    }
    let separator = em[2..].iter().position(|&b| b == 0x00).ok_or_else(invalid)?;
    // Padding string must be all FF and at least eight bytes long.
    if separator < 8 || em[2..2 + separator].iter().any(|&b| b != 0xFF) {
        return Err(invalid());
    }
    Ok(em[2 + separator + 1..].to_vec())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn keypair() -> GeneratedKeypair {
        RsaKeypairGenerator::default().generate().unwrap()
    }

    #[test]
    fn test_generated_keys_are_der_parseable() {
        let pair = keypair();
        assert!(RsaPublicKey::from_public_key_der(&pair.public_key_der).is_ok());
        assert!(RsaPrivateKey::from_pkcs8_der(&pair.private_key_der).is_ok());
    }

    #[test]
    fn test_oaep_roundtrip_single_block() {
        let pair = keypair();
        let crypto = RsaCrypto;
        let plaintext = b"a 32-byte symmetric key material";

        let ciphertext = crypto.public_encrypt(&pair.public_key_der, plaintext).unwrap();
        assert_eq!(ciphertext.len(), 256);

        let decrypted = crypto.private_decrypt(&pair.private_key_der, &ciphertext).unwrap();
        assert_eq!(decrypted.as_slice(), plaintext);
    }

    #[test]
    fn test_oaep_roundtrip_multi_block() {
        // A wrapped PKCS#8 private key spans several modulus blocks.
        let master = keypair();
        let leaf = keypair();
        let crypto = RsaCrypto;

        let wrapped = crypto.public_encrypt(&master.public_key_der, &leaf.private_key_der).unwrap();
        assert!(wrapped.len() > 256);
        assert_eq!(wrapped.len() % 256, 0);

        let unwrapped = crypto.private_decrypt(&master.private_key_der, &wrapped).unwrap();
        assert_eq!(unwrapped.as_slice(), leaf.private_key_der.as_slice());
        assert!(crypto.validate_private_key(&unwrapped).is_ok());
    }

    #[test]
    fn test_private_decrypt_rejects_partial_block() {
        let pair = keypair();
        let crypto = RsaCrypto;
        let result = crypto.private_decrypt(&pair.private_key_der, &[0u8; 100]);
        assert!(matches!(result, Err(KeymanagerError::Crypto(_))));
    }

    #[test]
    fn test_private_transform_roundtrip() {
        let pair = keypair();
        let crypto = RsaCrypto;
        let data = b"hashed payload to bind";

        let transformed = crypto.private_encrypt(&pair.private_key_der, data).unwrap();
        assert_eq!(transformed.len(), 256);

        let recovered = crypto.public_decrypt(&pair.public_key_der, &transformed).unwrap();
        assert_eq!(recovered, data);
    }

    #[test]
    fn test_private_transform_rejects_oversized_data() {
        let pair = keypair();
        let data = vec![0u8; 256 - PKCS1_TYPE1_OVERHEAD + 1];
        assert!(matches!(
            RsaCrypto.private_encrypt(&pair.private_key_der, &data),
            Err(KeymanagerError::Crypto(_))
        ));
    }

    #[test]
    fn test_public_decrypt_rejects_wrong_key() {
        let pair = keypair();
        let other = keypair();
        let crypto = RsaCrypto;

        let transformed = crypto.private_encrypt(&pair.private_key_der, b"payload").unwrap();
        let result = crypto.public_decrypt(&other.public_key_der, &transformed);
        assert!(matches!(result, Err(KeymanagerError::Crypto(_))));
    }

    #[test]
    fn test_public_decrypt_rejects_tampered_data() {
        let pair = keypair();
        let crypto = RsaCrypto;

        let mut transformed = crypto.private_encrypt(&pair.private_key_der, b"payload").unwrap();
        transformed[10] ^= 0xFF;
        let result = crypto.public_decrypt(&pair.public_key_der, &transformed);
        assert!(matches!(result, Err(KeymanagerError::Crypto(_))));
    }

    #[test]
    fn test_decrypt_with_wrong_private_key_fails() {
        let pair = keypair();
        let other = keypair();
        let crypto = RsaCrypto;

        let ciphertext = crypto.public_encrypt(&pair.public_key_der, b"secret").unwrap();
        let result = crypto.private_decrypt(&other.private_key_der, &ciphertext);
        assert!(matches!(result, Err(KeymanagerError::Crypto(_))));
    }

    #[test]
    fn test_validate_private_key_rejects_garbage() {
        assert!(RsaCrypto.validate_private_key(&[0x30, 0x00]).is_err());
    }

    #[test]
    fn test_strip_type1_padding_requires_minimum_padding() {
        // 00 01 with fewer than eight FF bytes before the separator.
        let mut em = vec![0x00, 0x01];
        em.extend_from_slice(&[0xFF; 4]);
        em.push(0x00);
        em.extend_from_slice(b"msg");
        em.resize(256, 0xAA);
        assert!(strip_type1_padding(&em).is_err());
    }
}
