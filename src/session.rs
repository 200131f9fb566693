//! Per-backup session state: keys, counters, and reader flags.
use std::path::PathBuf;

/// State shared by `FrameReader` and the resync probes for a single open
/// backup. One session owns one `ByteSource` exclusively; nothing here is
/// global, so two sessions on the same file hold independent counters.
pub struct Session {
    /// Path to the backup file, kept so attachment descriptors can reopen
    /// their own read window later.
    pub source_path: PathBuf,

    pub cipher_key: [u8; 32],
    pub mac_key: Vec<u8>,
    pub iv_seed: [u8; 16],

    /// Incorporated into the CTR IV; incremented once per frame and once
    /// more for frames that carry an attachment tail.
    pub counter: u32,
    /// Informational count of frames successfully decoded.
    pub frame_number: u64,

    /// Set whenever MAC verification failed on the current or most recent
    /// frame; suppresses attachment processing until a MAC succeeds again.
    pub bad_mac: bool,
    /// If set, a bad MAC is fatal rather than merely logged.
    pub stop_on_error: bool,
    /// If set, a declared attachment size that runs past EOF is tolerated
    /// instead of raising `Truncated`.
    pub assume_bad_size: bool,
    pub verbose: bool,
}

impl Session {
    /// Build a session from derived keys and the header frame's IV seed.
    /// `counter` starts at the big-endian value of the first four bytes of
    /// `iv_seed`, per the wire format's bootstrap rule.
    pub fn new(
        source_path: PathBuf,
        cipher_key: [u8; 32],
        mac_key: Vec<u8>,
        iv_seed: [u8; 16],
        stop_on_error: bool,
        assume_bad_size: bool,
        verbose: bool,
    ) -> Self {
        let counter = u32::from_be_bytes([iv_seed[0], iv_seed[1], iv_seed[2], iv_seed[3]]);
        Self {
            source_path,
            cipher_key,
            mac_key,
            iv_seed,
            counter,
            frame_number: 0,
            bad_mac: false,
            stop_on_error,
            assume_bad_size,
            verbose,
        }
    }

    /// The IV for the current counter value.
    pub fn current_iv(&self) -> [u8; 16] {
        crate::crypto::build_iv(&self.iv_seed, self.counter)
    }
}
