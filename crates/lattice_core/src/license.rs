//! License tiers and the write-capacity guard.
//!
//! A license key is 70 bytes, base64 encoded:
//!
//! ```text
//! | version (1) | tier (1) | expiry u32 LE (4) | Ed25519 signature (64) |
//! ```
//!
//! The signature covers the first six bytes and is checked against the
//! product public key compiled into this crate. A key that is missing,
//! malformed, badly signed or expired resolves to [`Tier::Free`].
//!
//! In evaluation mode every add is checked against the tier ceiling before
//! anything else happens. Only a verified `Unlimited` key can leave
//! evaluation mode, and builds with the `fixed-capacity` feature never can.

use crate::error::{LatticeError, LatticeResult};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use ed25519_dalek::{Signature, VerifyingKey};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Product public key used to verify license signatures.
pub const PRODUCT_PUBLIC_KEY: [u8; 32] = [
    0x7b, 0xb0, 0xb5, 0xe5, 0xf1, 0xce, 0xd5, 0x43, 0xb0, 0x4e, 0xd4, 0xc1, 0x3d, 0x7d, 0xf6, 0xdc,
    0xe3, 0x68, 0x1a, 0x58, 0x20, 0x33, 0xd2, 0x80, 0x3c, 0x57, 0xf2, 0xc2, 0x22, 0xbb, 0x68, 0x49,
];

/// Whether this build refuses to ever leave evaluation mode.
pub const FIXED_CAPACITY: bool = cfg!(feature = "fixed-capacity");

/// License tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Tier {
    /// No valid key.
    Free = 0,
    /// Up to 100 000 nodes.
    Tier100K = 1,
    /// Up to 1 000 000 nodes.
    Tier1M = 2,
    /// Up to 10 000 000 nodes.
    Tier10M = 3,
    /// Up to 50 000 000 nodes.
    Tier50M = 4,
    /// No tier ceiling.
    Unlimited = 5,
}

impl Tier {
    /// Converts a byte to a tier.
    #[must_use]
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(Self::Free),
            1 => Some(Self::Tier100K),
            2 => Some(Self::Tier1M),
            3 => Some(Self::Tier10M),
            4 => Some(Self::Tier50M),
            5 => Some(Self::Unlimited),
            _ => None,
        }
    }

    /// Converts the tier to a byte.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }

    /// Node ceiling of this tier, `None` for `Unlimited`.
    #[must_use]
    pub const fn ceiling(self) -> Option<u64> {
        match self {
            Self::Free => Some(10_000),
            Self::Tier100K => Some(100_000),
            Self::Tier1M => Some(1_000_000),
            Self::Tier10M => Some(10_000_000),
            Self::Tier50M => Some(50_000_000),
            Self::Unlimited => None,
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Free => "free",
            Self::Tier100K => "tier-100k",
            Self::Tier1M => "tier-1m",
            Self::Tier10M => "tier-10m",
            Self::Tier50M => "tier-50m",
            Self::Unlimited => "unlimited",
        })
    }
}

/// A parsed, not yet verified, license key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LicenseKey {
    /// Key format version.
    pub version: u8,
    /// Tier granted.
    pub tier: Tier,
    /// Unix seconds after which the key is void, 0 for never.
    pub expiry: u32,
    /// Ed25519 signature over the first six bytes.
    pub signature: [u8; 64],
}

impl LicenseKey {
    /// Decoded length in bytes.
    pub const ENCODED_LEN: usize = 70;

    /// Bytes covered by the signature.
    pub const SIGNED_LEN: usize = 6;

    /// The only accepted key format version.
    pub const VERSION: u8 = 1;

    /// Parses a base64 key.
    ///
    /// # Errors
    ///
    /// Returns `LicenseInvalid` for bad base64, wrong length, unsupported
    /// version or unknown tier.
    pub fn parse(encoded: &str) -> LatticeResult<Self> {
        let bytes = BASE64
            .decode(encoded.trim())
            .map_err(|e| LatticeError::license_invalid(format!("not base64: {e}")))?;
        Self::from_bytes(&bytes)
    }

    /// Parses the raw 70-byte form.
    ///
    /// # Errors
    ///
    /// Returns `LicenseInvalid` for wrong length, unsupported version or
    /// unknown tier.
    pub fn from_bytes(bytes: &[u8]) -> LatticeResult<Self> {
        if bytes.len() != Self::ENCODED_LEN {
            return Err(LatticeError::license_invalid(format!(
                "key is {} bytes, expected {}",
                bytes.len(),
                Self::ENCODED_LEN
            )));
        }
        if bytes[0] != Self::VERSION {
            return Err(LatticeError::license_invalid(format!(
                "unsupported key version {}",
                bytes[0]
            )));
        }
        let tier = Tier::from_byte(bytes[1])
            .ok_or_else(|| LatticeError::license_invalid(format!("unknown tier {}", bytes[1])))?;
        let expiry = u32::from_le_bytes([bytes[2], bytes[3], bytes[4], bytes[5]]);
        let mut signature = [0u8; 64];
        signature.copy_from_slice(&bytes[Self::SIGNED_LEN..]);

        Ok(Self {
            version: bytes[0],
            tier,
            expiry,
            signature,
        })
    }

    /// The bytes the signature covers.
    #[must_use]
    pub fn signed_bytes(&self) -> [u8; Self::SIGNED_LEN] {
        let e = self.expiry.to_le_bytes();
        [self.version, self.tier.as_byte(), e[0], e[1], e[2], e[3]]
    }

    /// The raw 70-byte form.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; Self::ENCODED_LEN] {
        let mut out = [0u8; Self::ENCODED_LEN];
        out[..Self::SIGNED_LEN].copy_from_slice(&self.signed_bytes());
        out[Self::SIGNED_LEN..].copy_from_slice(&self.signature);
        out
    }

    /// Base64 form.
    #[must_use]
    pub fn encode(&self) -> String {
        BASE64.encode(self.to_bytes())
    }

    /// Returns `true` if the key has expired at `now` (Unix seconds).
    #[must_use]
    pub fn is_expired(&self, now: u64) -> bool {
        self.expiry != 0 && now >= u64::from(self.expiry)
    }

    /// Issues a key signed with `signing_key`.
    #[cfg(any(test, feature = "test-keys"))]
    #[must_use]
    pub fn issue(tier: Tier, expiry: u32, signing_key: &ed25519_dalek::SigningKey) -> Self {
        use ed25519_dalek::Signer;

        let mut key = Self {
            version: Self::VERSION,
            tier,
            expiry,
            signature: [0u8; 64],
        };
        key.signature = signing_key.sign(&key.signed_bytes()).to_bytes();
        key
    }
}

/// Outcome of resolving the configured key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierResolution {
    /// The tier in force.
    pub tier: Tier,
    /// Whether a key was supplied at all.
    pub key_present: bool,
    /// Why a supplied key was rejected.
    pub rejection: Option<String>,
}

/// Checks license signatures against a public key.
#[derive(Debug, Clone)]
pub struct LicenseVerifier {
    key: VerifyingKey,
}

impl LicenseVerifier {
    /// Verifier for the product public key.
    ///
    /// # Errors
    ///
    /// Returns `LicenseInvalid` if the embedded key is not a valid point.
    pub fn product() -> LatticeResult<Self> {
        Self::from_key_bytes(&PRODUCT_PUBLIC_KEY)
    }

    fn from_key_bytes(bytes: &[u8; 32]) -> LatticeResult<Self> {
        let key = VerifyingKey::from_bytes(bytes)
            .map_err(|e| LatticeError::license_invalid(format!("bad public key: {e}")))?;
        Ok(Self { key })
    }

    /// Verifier for an arbitrary public key.
    ///
    /// # Errors
    ///
    /// Returns `LicenseInvalid` if `bytes` is not a valid point.
    #[cfg(any(test, feature = "test-keys"))]
    pub fn from_public_key(bytes: &[u8; 32]) -> LatticeResult<Self> {
        Self::from_key_bytes(bytes)
    }

    /// Verifies signature and expiry and returns the granted tier.
    ///
    /// # Errors
    ///
    /// Returns `LicenseInvalid` if the signature does not verify or the key
    /// has expired.
    pub fn verify(&self, key: &LicenseKey, now: u64) -> LatticeResult<Tier> {
        let signature = Signature::from_bytes(&key.signature);
        self.key
            .verify_strict(&key.signed_bytes(), &signature)
            .map_err(|_| LatticeError::license_invalid("signature does not verify"))?;

        if key.is_expired(now) {
            return Err(LatticeError::license_invalid(format!(
                "expired at {}",
                key.expiry
            )));
        }
        Ok(key.tier)
    }

    /// Resolves an optional base64 key to a tier. Never fails: any problem
    /// yields `Free` with the reason recorded.
    #[must_use]
    pub fn resolve(&self, encoded: Option<&str>, now: u64) -> TierResolution {
        let Some(encoded) = encoded else {
            return TierResolution {
                tier: Tier::Free,
                key_present: false,
                rejection: None,
            };
        };

        match LicenseKey::parse(encoded).and_then(|key| self.verify(&key, now)) {
            Ok(tier) => TierResolution {
                tier,
                key_present: true,
                rejection: None,
            },
            Err(e) => TierResolution {
                tier: Tier::Free,
                key_present: true,
                rejection: Some(e.to_string()),
            },
        }
    }
}

/// Current Unix time in seconds.
#[must_use]
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs())
}

/// Gate applied before every mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierGuard {
    tier: Tier,
    evaluation_mode: bool,
}

impl TierGuard {
    /// Creates a guard. A request to start outside evaluation mode is only
    /// honoured for `Unlimited` in builds without `fixed-capacity`.
    #[must_use]
    pub fn new(tier: Tier, requested_evaluation_mode: bool) -> Self {
        let mut guard = Self {
            tier,
            evaluation_mode: true,
        };
        if !requested_evaluation_mode && guard.disable_evaluation_mode().is_err() {
            tracing::warn!(%tier, "evaluation mode cannot be disabled; enforcing tier ceiling");
        }
        guard
    }

    /// The tier in force.
    #[must_use]
    pub fn tier(&self) -> Tier {
        self.tier
    }

    /// Whether the tier ceiling is enforced.
    #[must_use]
    pub fn evaluation_mode(&self) -> bool {
        self.evaluation_mode
    }

    /// Enforced ceiling, `None` when unbounded.
    #[must_use]
    pub fn ceiling(&self) -> Option<u64> {
        if self.evaluation_mode {
            self.tier.ceiling()
        } else {
            None
        }
    }

    /// Rejects an add once `total_nodes` has reached the ceiling.
    ///
    /// # Errors
    ///
    /// Returns `TierLimitExceeded`.
    pub fn guard_before_add(&self, total_nodes: u64) -> LatticeResult<()> {
        self.guard_before_add_many(total_nodes, 1)
    }

    /// Rejects a write of `count` records that would pass the ceiling.
    ///
    /// # Errors
    ///
    /// Returns `TierLimitExceeded`.
    pub fn guard_before_add_many(&self, total_nodes: u64, count: u64) -> LatticeResult<()> {
        match self.ceiling() {
            Some(ceiling) if total_nodes.saturating_add(count) > ceiling => {
                Err(LatticeError::TierLimitExceeded {
                    tier: self.tier,
                    ceiling,
                })
            }
            _ => Ok(()),
        }
    }

    /// Leaves evaluation mode. Fails without side effects unless the tier is
    /// `Unlimited` and this is not a fixed-capacity build.
    ///
    /// # Errors
    ///
    /// Returns `EvaluationModeLocked`.
    pub fn disable_evaluation_mode(&mut self) -> LatticeResult<()> {
        if FIXED_CAPACITY || self.tier != Tier::Unlimited {
            return Err(LatticeError::EvaluationModeLocked { tier: self.tier });
        }
        self.evaluation_mode = false;
        Ok(())
    }
}
