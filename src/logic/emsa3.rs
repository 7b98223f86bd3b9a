//! EMSA-PKCS1-v1_5 message encoding
//!
//! The token signs with the raw RSA mechanism, so the full `k`-byte block
//! `00 01 FF..FF 00 || DigestInfo` is built here.

use md2::Md2;
use md5::Md5;
use sha1::{Digest, Sha1};
use sha2::Sha256;

use crate::model::DigestAlgorithm;

const MD2_PREFIX: &[u8] = &[
    0x30, 0x20, 0x30, 0x0c, 0x06, 0x08, 0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x02, 0x02, 0x05, 0x00,
    0x04, 0x10,
];
const MD5_PREFIX: &[u8] = &[
    0x30, 0x20, 0x30, 0x0c, 0x06, 0x08, 0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x02, 0x05, 0x05, 0x00,
    0x04, 0x10,
];
const SHA1_PREFIX: &[u8] = &[
    0x30, 0x21, 0x30, 0x09, 0x06, 0x05, 0x2b, 0x0e, 0x03, 0x02, 0x1a, 0x05, 0x00, 0x04, 0x14,
];
const SHA256_PREFIX: &[u8] = &[
    0x30, 0x31, 0x30, 0x0d, 0x06, 0x09, 0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x02, 0x01, 0x05,
    0x00, 0x04, 0x20,
];

/// Minimum number of `FF` padding bytes
const MIN_PADDING: usize = 8;

/// DER prefix of the DigestInfo for `algorithm`
pub fn digest_info_prefix(algorithm: DigestAlgorithm) -> &'static [u8] {
    match algorithm {
        DigestAlgorithm::Sha1 => SHA1_PREFIX,
        DigestAlgorithm::Md5 => MD5_PREFIX,
        DigestAlgorithm::Md2 => MD2_PREFIX,
        DigestAlgorithm::Sha256 => SHA256_PREFIX,
    }
}

pub fn digest_info(algorithm: DigestAlgorithm, digest: &[u8]) -> Vec<u8> {
    let prefix = digest_info_prefix(algorithm);
    let mut out = Vec::with_capacity(prefix.len() + digest.len());
    out.extend_from_slice(prefix);
    out.extend_from_slice(digest);
    out
}

/// Builds the `k`-byte encoded block around `payload`.
///
/// Returns an empty vector when `payload` does not fit.
pub fn encode(payload: &[u8], k: usize) -> Vec<u8> {
    if payload.is_empty() || k < payload.len() + MIN_PADDING + 3 {
        return Vec::new();
    }

    let padding = k - payload.len() - 3;
    let mut out = Vec::with_capacity(k);
    out.push(0x00);
    out.push(0x01);
    out.resize(2 + padding, 0xff);
    out.push(0x00);
    out.extend_from_slice(payload);
    out
}

/// Running digest for one of the supported algorithms
#[derive(Clone)]
pub enum Digester {
    Sha1(Sha1),
    Md5(Md5),
    Md2(Md2),
    Sha256(Sha256),
}

impl Digester {
    pub fn new(algorithm: DigestAlgorithm) -> Self {
        match algorithm {
            DigestAlgorithm::Sha1 => Digester::Sha1(Sha1::new()),
            DigestAlgorithm::Md5 => Digester::Md5(Md5::new()),
            DigestAlgorithm::Md2 => Digester::Md2(Md2::new()),
            DigestAlgorithm::Sha256 => Digester::Sha256(Sha256::new()),
        }
    }

    pub fn algorithm(&self) -> DigestAlgorithm {
        match self {
            Digester::Sha1(_) => DigestAlgorithm::Sha1,
            Digester::Md5(_) => DigestAlgorithm::Md5,
            Digester::Md2(_) => DigestAlgorithm::Md2,
            Digester::Sha256(_) => DigestAlgorithm::Sha256,
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        match self {
            Digester::Sha1(d) => d.update(data),
            Digester::Md5(d) => d.update(data),
            Digester::Md2(d) => d.update(data),
            Digester::Sha256(d) => d.update(data),
        }
    }

    pub fn finalize(self) -> Vec<u8> {
        match self {
            Digester::Sha1(d) => d.finalize().to_vec(),
            Digester::Md5(d) => d.finalize().to_vec(),
            Digester::Md2(d) => d.finalize().to_vec(),
            Digester::Sha256(d) => d.finalize().to_vec(),
        }
    }

    /// Finalizes into the DigestInfo structure for this digest.
    pub fn finalize_digest_info(self) -> Vec<u8> {
        let algorithm = self.algorithm();
        digest_info(algorithm, &self.finalize())
    }
}
