//! Memcached ASCII protocol command types

/// Maximum key length (memcached spec)
pub const MAX_KEY_LENGTH: usize = 250;

/// Maximum value size accepted on a storage command (1 MiB)
pub const MAX_VALUE_SIZE: usize = 1 << 20;

/// Variant of a storage command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOp {
    Set,
    Add,
    Replace,
    Cas,
}

impl StoreOp {
    pub fn name(self) -> &'static str {
        match self {
            Self::Set => "set",
            Self::Add => "add",
            Self::Replace => "replace",
            Self::Cas => "cas",
        }
    }
}

/// Fully parsed memcached command. Owns its bytes so the request loop can
/// drain the input buffer before the command is executed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// get/gets <key>*
    Get { keys: Vec<Vec<u8>>, with_cas: bool },

    /// set/add/replace <key> <flags> <exptime> <bytes> [noreply]
    /// cas <key> <flags> <exptime> <bytes> <cas> [noreply]
    Store {
        op: StoreOp,
        key: Vec<u8>,
        flags: u32,
        exptime: u64,
        cas: u64,
        data: Vec<u8>,
        noreply: bool,
    },

    /// delete <key> [noreply]
    Delete { key: Vec<u8>, noreply: bool },

    /// incr/decr <key> <delta> [noreply]
    Arith {
        key: Vec<u8>,
        delta: u64,
        incr: bool,
        noreply: bool,
    },

    /// touch <key> <exptime> [noreply]
    Touch {
        key: Vec<u8>,
        exptime: u64,
        noreply: bool,
    },

    /// flush_all [delay] [noreply]
    FlushAll { delay: u64, noreply: bool },

    /// stats
    Stats,

    /// version
    Version,

    /// quit
    Quit,
}

impl Command {
    /// Returns true if this command should not send a response
    pub fn is_noreply(&self) -> bool {
        match self {
            Command::Store { noreply, .. }
            | Command::Delete { noreply, .. }
            | Command::Arith { noreply, .. }
            | Command::Touch { noreply, .. }
            | Command::FlushAll { noreply, .. } => *noreply,
            _ => false,
        }
    }
}

/// Check if a key is valid
pub fn is_valid_key(key: &[u8]) -> bool {
    if key.is_empty() || key.len() > MAX_KEY_LENGTH {
        return false;
    }
    // Keys cannot contain control characters or whitespace
    key.iter().all(|&b| b > 32 && b < 127)
}
