/*!
 * Lock file record codec
 *
 * Byte layout, little-endian: 16-byte lock id, u32 length-prefixed UTF-8
 * host identifier, u64 process id, one schema byte. Anything appended
 * beyond the record is life-sign noise and is ignored by the parser.
 */

use rand::Rng;

/// Current record schema
pub const LOCK_SCHEMA_VERSION: u8 = 1;

/// Universally unique lock identifier, generated at acquire time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LockId(pub [u8; 16]);

impl LockId {
    pub fn generate() -> Self {
        LockId(rand::rng().random())
    }
}

impl std::fmt::Display for LockId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// Self-describing contents of a lock file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockRecord {
    pub id: LockId,
    /// Host identifier of the holder (machine name)
    pub host: String,
    /// Numeric process id of the holder
    pub pid: u64,
    pub schema: u8,
}

impl LockRecord {
    pub fn new(host: impl Into<String>, pid: u64) -> Self {
        Self {
            id: LockId::generate(),
            host: host.into(),
            pid,
            schema: LOCK_SCHEMA_VERSION,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let host_bytes = self.host.as_bytes();
        let mut out = Vec::with_capacity(16 + 4 + host_bytes.len() + 8 + 1);
        out.extend_from_slice(&self.id.0);
        out.extend_from_slice(&(host_bytes.len() as u32).to_le_bytes());
        out.extend_from_slice(host_bytes);
        out.extend_from_slice(&self.pid.to_le_bytes());
        out.push(self.schema);
        out
    }

    /// Parse a record from the head of a lock file. `None` means the record
    /// is short or corrupt and the lock is treated as abandoned.
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < 16 + 4 {
            return None;
        }
        let mut id = [0u8; 16];
        id.copy_from_slice(&bytes[..16]);

        let host_len = u32::from_le_bytes(bytes[16..20].try_into().ok()?) as usize;
        let rest = &bytes[20..];
        if rest.len() < host_len + 8 + 1 {
            return None;
        }
        let host = std::str::from_utf8(&rest[..host_len]).ok()?.to_string();
        let pid = u64::from_le_bytes(rest[host_len..host_len + 8].try_into().ok()?);
        let schema = rest[host_len + 8];

        Some(Self {
            id: LockId(id),
            host,
            pid,
            schema,
        })
    }

    /// Size of the encoded record, excluding life-sign bytes
    pub fn encoded_len(&self) -> u64 {
        (16 + 4 + self.host.as_bytes().len() + 8 + 1) as u64
    }
}
