//! Content fingerprints used as dedup keys.
//!
//! Identity is content-only: the same text arriving from two different chats
//! maps to the same key.

use std::fmt::{self, Write};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

const DIGEST_HEX_LEN: usize = 64;

/// Hex-encoded SHA-256 of whitespace-normalized message text.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Accept a persisted key. Returns `None` unless it is a full lowercase hex digest.
    pub fn from_hex(raw: &str) -> Option<Self> {
        let ok = raw.len() == DIGEST_HEX_LEN
            && raw
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        ok.then(|| Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 8 hex chars, for log lines.
    pub fn short(&self) -> &str {
        &self.0[..8]
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Collapse every whitespace run to a single space and trim both ends.
pub fn normalize(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn fingerprint(text: &str) -> Fingerprint {
    let mut h = Sha256::new();
    h.update(normalize(text).as_bytes());
    let digest = h.finalize();

    let mut out = String::with_capacity(DIGEST_HEX_LEN);
    for b in digest {
        let _ = write!(&mut out, "{:02x}", b);
    }
    Fingerprint(out)
}
