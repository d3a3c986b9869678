//! `ssh-dss` host keys and signatures (RFC 4253 Section 6.6, FIPS 186-2).
//!
//! The server proves possession of its host key by signing the exchange
//! hash with DSA. This module parses the public key blob and signature blob
//! the server sends in SSH_MSG_KEXDH_REPLY and verifies the signature.
//!
//! # Wire Formats
//!
//! ```text
//! Public key blob:           Signature blob:
//!   string  "ssh-dss"          string  "ssh-dss"
//!   mpint   p                  string  r || s  (two 20-byte integers)
//!   mpint   q
//!   mpint   g
//!   mpint   y
//! ```
//!
//! # Example
//!
//! ```rust
//! use keel_proto::ssh::hostkey::DssSignature;
//!
//! let mut blob = vec![0, 0, 0, 7];
//! blob.extend_from_slice(b"ssh-dss");
//! blob.extend_from_slice(&[0, 0, 0, 40]);
//! blob.extend_from_slice(&[1u8; 40]);
//!
//! let sig = DssSignature::from_blob(&blob).unwrap();
//! assert_eq!(sig.r(), sig.s());
//! ```

use std::fmt;

use keel_platform::{KeelError, KeelResult};
use num_bigint::BigUint;
use signature::hazmat::PrehashVerifier;
use tracing::debug;

use super::crypto::sha1;
use super::wire::{WireReader, WireWriter};

/// Host key algorithm name.
pub const DSS_ALGORITHM: &str = "ssh-dss";

/// Length of each of `r` and `s` in the signature blob.
pub const DSS_SIGNATURE_HALF_LEN: usize = 20;

fn to_dsa(n: &BigUint) -> dsa::BigUint {
    dsa::BigUint::from_bytes_be(&n.to_bytes_be())
}

/// A server's `ssh-dss` public key.
///
/// Keeps the blob exactly as received, since those bytes (not a
/// re-encoding) feed the exchange hash.
#[derive(Clone)]
pub struct DssPublicKey {
    p: BigUint,
    q: BigUint,
    g: BigUint,
    y: BigUint,
    key: dsa::VerifyingKey,
    blob: Vec<u8>,
}

impl DssPublicKey {
    /// Parses a public key blob.
    ///
    /// # Errors
    ///
    /// Returns [`KeelError::KeyExchange`] if the key type is not `ssh-dss`
    /// or the domain parameters are malformed (`q >= p`, `g` or `y`
    /// outside `(1, p)`, `y` not in the order-`q` subgroup). Truncated
    /// fields give [`KeelError::Protocol`].
    pub fn from_blob(blob: &[u8]) -> KeelResult<Self> {
        let mut r = WireReader::new(blob);
        let key_type = r.read_string()?;
        if key_type != DSS_ALGORITHM.as_bytes() {
            return Err(KeelError::KeyExchange(format!(
                "Unsupported host key type: {}",
                String::from_utf8_lossy(key_type)
            )));
        }

        let p = r.read_mpint()?;
        let q = r.read_mpint()?;
        let g = r.read_mpint()?;
        let y = r.read_mpint()?;

        Self::build(p, q, g, y, blob.to_vec())
    }

    /// Builds a key from its parameters, encoding a fresh blob.
    ///
    /// # Errors
    ///
    /// Same parameter checks as [`DssPublicKey::from_blob`].
    pub fn from_parts(p: BigUint, q: BigUint, g: BigUint, y: BigUint) -> KeelResult<Self> {
        let mut w = WireWriter::new();
        w.put_str(DSS_ALGORITHM)
            .put_mpint(&p)
            .put_mpint(&q)
            .put_mpint(&g)
            .put_mpint(&y);
        let blob = w.finish();
        Self::build(p, q, g, y, blob)
    }

    fn build(p: BigUint, q: BigUint, g: BigUint, y: BigUint, blob: Vec<u8>) -> KeelResult<Self> {
        let invalid = || KeelError::KeyExchange("Invalid ssh-dss domain parameters".to_string());

        let one = BigUint::from(1u32);
        if q.bits() == 0 || q >= p || g <= one || g >= p || y <= one || y >= p {
            return Err(invalid());
        }

        let components =
            dsa::Components::from_components(to_dsa(&p), to_dsa(&q), to_dsa(&g)).map_err(|_| invalid())?;
        let key = dsa::VerifyingKey::from_components(components, to_dsa(&y)).map_err(|_| invalid())?;

        Ok(Self {
            p,
            q,
            g,
            y,
            key,
            blob,
        })
    }

    /// Prime modulus.
    pub fn p(&self) -> &BigUint {
        &self.p
    }

    /// Subgroup order.
    pub fn q(&self) -> &BigUint {
        &self.q
    }

    /// Generator.
    pub fn g(&self) -> &BigUint {
        &self.g
    }

    /// Public value.
    pub fn y(&self) -> &BigUint {
        &self.y
    }

    /// The blob as received (`K_S` in the exchange hash).
    pub fn blob(&self) -> &[u8] {
        &self.blob
    }

    /// SHA-1 fingerprint of the blob, colon-separated hex.
    pub fn fingerprint(&self) -> String {
        sha1(&self.blob)
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect::<Vec<_>>()
            .join(":")
    }

    /// Verifies a DSA signature over `digest`.
    ///
    /// `digest` is the already-hashed message; it is not hashed again.
    /// Returns `false` when either half of the signature is outside
    /// `(0, q)` or the signature does not check out.
    pub fn verify(&self, digest: &[u8], signature: &DssSignature) -> bool {
        let (r, s) = (&signature.r, &signature.s);
        if r.bits() == 0 || s.bits() == 0 || r >= &self.q || s >= &self.q {
            return false;
        }

        let sig = match dsa::Signature::from_components(to_dsa(r), to_dsa(s)) {
            Ok(sig) => sig,
            Err(_) => return false,
        };

        match self.key.verify_prehash(digest, &sig) {
            Ok(()) => true,
            Err(e) => {
                debug!(error = %e, "ssh-dss signature rejected");
                false
            }
        }
    }
}

impl PartialEq for DssPublicKey {
    fn eq(&self, other: &Self) -> bool {
        self.blob == other.blob
    }
}

impl Eq for DssPublicKey {}

impl fmt::Debug for DssPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DssPublicKey")
            .field("bits", &self.p.bits())
            .field("fingerprint", &self.fingerprint())
            .finish()
    }
}

/// An `ssh-dss` signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DssSignature {
    r: BigUint,
    s: BigUint,
}

impl DssSignature {
    /// Creates a signature from its halves.
    pub fn new(r: BigUint, s: BigUint) -> Self {
        Self { r, s }
    }

    /// Parses a signature blob.
    ///
    /// # Errors
    ///
    /// Returns [`KeelError::KeyExchange`] if the signature type is not
    /// `ssh-dss` or the signature body is not 40 bytes.
    pub fn from_blob(blob: &[u8]) -> KeelResult<Self> {
        let mut reader = WireReader::new(blob);
        let sig_type = reader.read_string()?;
        if sig_type != DSS_ALGORITHM.as_bytes() {
            return Err(KeelError::KeyExchange(format!(
                "Unsupported signature type: {}",
                String::from_utf8_lossy(sig_type)
            )));
        }

        let body = reader.read_string()?;
        if body.len() != 2 * DSS_SIGNATURE_HALF_LEN {
            return Err(KeelError::KeyExchange(format!(
                "Invalid ssh-dss signature length: {} bytes (expected {})",
                body.len(),
                2 * DSS_SIGNATURE_HALF_LEN
            )));
        }

        let (r, s) = body.split_at(DSS_SIGNATURE_HALF_LEN);
        Ok(Self {
            r: BigUint::from_bytes_be(r),
            s: BigUint::from_bytes_be(s),
        })
    }

    /// Encodes the signature blob, left-padding each half to 20 bytes.
    ///
    /// # Errors
    ///
    /// Returns [`KeelError::Protocol`] if either half exceeds 160 bits.
    pub fn to_blob(&self) -> KeelResult<Vec<u8>> {
        let mut body = Vec::with_capacity(2 * DSS_SIGNATURE_HALF_LEN);
        for half in [&self.r, &self.s] {
            let bytes = half.to_bytes_be();
            if bytes.len() > DSS_SIGNATURE_HALF_LEN {
                return Err(KeelError::Protocol(
                    "ssh-dss signature component exceeds 160 bits".to_string(),
                ));
            }
            body.resize(body.len() + DSS_SIGNATURE_HALF_LEN - bytes.len(), 0);
            body.extend_from_slice(&bytes);
        }

        let mut w = WireWriter::new();
        w.put_str(DSS_ALGORITHM).put_string(&body);
        Ok(w.finish())
    }

    /// First half.
    pub fn r(&self) -> &BigUint {
        &self.r
    }

    /// Second half.
    pub fn s(&self) -> &BigUint {
        &self.s
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // 1024-bit domain; x is the private exponent behind y.
    const P: &str = "fbf56a3f3b05cb4c7cba6364fc414abb1c741886e20bf1013dfc6e8d15f866b63706d0f90cb2d4e9af86ead0a890ebbc3e0c5641c181e1cbd2bac64d27045912eb90a165ac2932495bedde6419e4919045772891787d099a0d87cf86396825ce19106750b29502859ca39db4b6f3ccb99fcf8733e91b6efb26a5f08f3ec89531";
    const Q: &str = "c6aa34b8a93753e647c710ee79090529d0d7536d";
    const G: &str = "40421baf62066e024bef4be680278aa7f03b56d13b91f97a59806f7ccba1417cab99f7eea18924e04f16c4882e5830f8800a45c2231b379ce0e7ab3abe66d3ee6b7da27564bf332646d569b430fd377453e6827d2687a746c47e64d4e4c1ca157f7c8c9793aaae6e69992a318759e863d388bc1886b7231eb66861f0af673f3c";
    const Y: &str = "32601242720e3eba097be16e63aa2b0eea283e9794c41dba19568b4cece09dc7836547266f52d6e0a5fa3ea81279d241d494f5d032b1aabb6d1db94bc277234f3cb99aa94dfcd1bd94dd0dd3d893f96c4986e348b3ba5e1c529df45421c3fd6179cda7fb44b59c529245a637e78a32785fba76353164d331b47f5abddd52ed88";
    const X: &str = "bc732b073e70b051a995624c941157b7ab8d1b96";

    fn big(hex: &str) -> BigUint {
        BigUint::parse_bytes(hex.as_bytes(), 16).unwrap()
    }

    fn test_key() -> DssPublicKey {
        DssPublicKey::from_parts(big(P), big(Q), big(G), big(Y)).unwrap()
    }

    // r = (g^k mod p) mod q, s = k^-1 (h + x r) mod q
    fn sign(digest: &[u8], k: u32) -> DssSignature {
        let (p, q, g, x) = (big(P), big(Q), big(G), big(X));
        let k = BigUint::from(k);
        let r = g.modpow(&k, &p) % &q;
        let k_inv = k.modpow(&(&q - 2u32), &q);
        let s = (k_inv * (BigUint::from_bytes_be(digest) + x * &r)) % &q;
        DssSignature::new(r, s)
    }

    #[test]
    fn test_signature_verifies() {
        let key = test_key();
        let digest = sha1(b"exchange hash");
        assert!(key.verify(&digest, &sign(&digest, 0x1234_5678)));
    }

    #[test]
    fn test_signature_wrong_digest() {
        let key = test_key();
        let digest = sha1(b"exchange hash");
        let sig = sign(&digest, 0x1234_5678);
        assert!(!key.verify(&sha1(b"another hash"), &sig));
    }

    #[test]
    fn test_signature_tampered_s() {
        let key = test_key();
        let digest = sha1(b"exchange hash");
        let sig = sign(&digest, 99);
        let forged = DssSignature::new(sig.r().clone(), sig.s() + 1u32);
        assert!(!key.verify(&digest, &forged));
    }

    #[test]
    fn test_signature_out_of_range() {
        let key = test_key();
        let digest = sha1(b"exchange hash");
        assert!(!key.verify(&digest, &DssSignature::new(BigUint::from(0u32), BigUint::from(1u32))));
        assert!(!key.verify(&digest, &DssSignature::new(BigUint::from(1u32), big(Q))));
    }

    #[test]
    fn test_public_key_blob_round_trip() {
        let key = test_key();
        let parsed = DssPublicKey::from_blob(key.blob()).unwrap();
        assert_eq!(parsed, key);
        assert_eq!(parsed.y(), &big(Y));
        assert_eq!(parsed.fingerprint().len(), 59);
    }

    #[test]
    fn test_public_key_wrong_type() {
        let mut w = WireWriter::new();
        w.put_str("ssh-rsa")
            .put_mpint(&BigUint::from(3u32))
            .put_mpint(&BigUint::from(5u32));
        assert!(matches!(
            DssPublicKey::from_blob(&w.finish()),
            Err(KeelError::KeyExchange(_))
        ));
    }

    #[test]
    fn test_public_key_degenerate_params() {
        let mut w = WireWriter::new();
        w.put_str(DSS_ALGORITHM)
            .put_mpint(&big(P))
            .put_mpint(&big(Q))
            .put_mpint(&BigUint::from(1u32))
            .put_mpint(&big(Y));
        assert!(DssPublicKey::from_blob(&w.finish()).is_err());
    }

    #[test]
    fn test_public_key_outside_subgroup() {
        // 2 is in range but 2^q mod p != 1
        let result = DssPublicKey::from_parts(big(P), big(Q), big(G), BigUint::from(2u32));
        assert!(matches!(result, Err(KeelError::KeyExchange(_))));
    }

    #[test]
    fn test_public_key_truncated() {
        let key = test_key();
        let blob = key.blob();
        assert!(DssPublicKey::from_blob(&blob[..blob.len() - 1]).is_err());
    }

    #[test]
    fn test_signature_blob_round_trip() {
        let sig = DssSignature::new(BigUint::from(0x1234u32), BigUint::from(0xabcdefu32));
        let blob = sig.to_blob().unwrap();
        assert_eq!(blob.len(), 4 + 7 + 4 + 40);
        assert_eq!(DssSignature::from_blob(&blob).unwrap(), sig);
    }

    #[test]
    fn test_signature_bad_length() {
        let mut w = WireWriter::new();
        w.put_str(DSS_ALGORITHM).put_string(&[1u8; 39]);
        assert!(DssSignature::from_blob(&w.finish()).is_err());
    }
}
