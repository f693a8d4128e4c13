use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{FormatError, FormatResult};

/// Stream magic.
pub const MAGIC: &[u8; 4] = b"CFGC";

/// Schema version written by registries that do not set their own.
/// Bump whenever the canonical codec list or any codec's payload changes.
pub const ENGINE_VERSION: u32 = 1;

/// Encoded header size: magic + version + flags + fingerprint.
pub const HEADER_LEN: usize = 4 + 4 + 4 + 8;

/// Feature-flag bitset stored in the header.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct FeatureFlags(u32);

impl FeatureFlags {
    /// Body is a zstd stream.
    pub const COMPRESSED: Self = Self(1 << 0);

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }
}

impl fmt::Debug for FeatureFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FeatureFlags({:#x})", self.0)
    }
}

/// Body compression selected for a session.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    #[default]
    None,
    Zstd { level: i32 },
}

impl Compression {
    /// zstd with its default level.
    pub const fn zstd() -> Self {
        Self::Zstd { level: 3 }
    }

    /// Header flags this setting contributes.
    pub fn flags(self) -> FeatureFlags {
        match self {
            Self::None => FeatureFlags::empty(),
            Self::Zstd { .. } => FeatureFlags::COMPRESSED,
        }
    }
}

/// Digest of a registry's ordered codec list.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SchemaFingerprint([u8; 8]);

impl SchemaFingerprint {
    pub fn compute<'a>(names: impl IntoIterator<Item = &'a str>) -> Self {
        let mut hasher = blake3::Hasher::new();
        for name in names {
            hasher.update(name.as_bytes());
            hasher.update(&[0]);
        }
        let mut out = [0u8; 8];
        out.copy_from_slice(&hasher.finalize().as_bytes()[..8]);
        Self(out)
    }

    pub const fn from_bytes(bytes: [u8; 8]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 8] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for SchemaFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SchemaFingerprint({})", self.to_hex())
    }
}

impl fmt::Display for SchemaFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Fixed-size stream header.
///
/// On-disk format:
/// ```text
/// [4 bytes: magic "CFGC"]
/// [4 bytes: schema version (big-endian u32)]
/// [4 bytes: feature flags (big-endian u32)]
/// [8 bytes: registry fingerprint]
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StreamHeader {
    pub version: u32,
    pub flags: FeatureFlags,
    pub fingerprint: SchemaFingerprint,
}

impl StreamHeader {
    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[0..4].copy_from_slice(MAGIC);
        out[4..8].copy_from_slice(&self.version.to_be_bytes());
        out[8..12].copy_from_slice(&self.flags.bits().to_be_bytes());
        out[12..20].copy_from_slice(self.fingerprint.as_bytes());
        out
    }

    pub fn from_bytes(data: &[u8]) -> FormatResult<Self> {
        if data.len() < HEADER_LEN {
            return Err(FormatError::Truncated("header"));
        }
        if &data[0..4] != MAGIC {
            return Err(FormatError::InvalidMagic {
                expected: String::from_utf8_lossy(MAGIC).into(),
                actual: String::from_utf8_lossy(&data[0..4]).into(),
            });
        }
        let mut version = [0u8; 4];
        version.copy_from_slice(&data[4..8]);
        let mut flags = [0u8; 4];
        flags.copy_from_slice(&data[8..12]);
        let mut fingerprint = [0u8; 8];
        fingerprint.copy_from_slice(&data[12..20]);
        Ok(Self {
            version: u32::from_be_bytes(version),
            flags: FeatureFlags::from_bits(u32::from_be_bytes(flags)),
            fingerprint: SchemaFingerprint::from_bytes(fingerprint),
        })
    }

    /// Check that a stream written with `self` can be read by an engine
    /// expecting `expected`. Everything must match exactly.
    pub fn validate(&self, expected: &Self) -> FormatResult<()> {
        if self.version != expected.version {
            return Err(FormatError::VersionMismatch {
                expected: expected.version,
                found: self.version,
            });
        }
        if self.flags != expected.flags {
            return Err(FormatError::FlagsMismatch {
                expected: expected.flags.bits(),
                found: self.flags.bits(),
            });
        }
        if self.fingerprint != expected.fingerprint {
            return Err(FormatError::RegistryMismatch {
                expected: expected.fingerprint.to_hex(),
                found: self.fingerprint.to_hex(),
            });
        }
        Ok(())
    }
}
