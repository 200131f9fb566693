//! Flat error taxonomy for the frame reader core.
use thiserror::Error;

/// Errors that can terminate a [`crate::reader::FrameReader`] session.
///
/// `InvalidFrame` is deliberately *not* a variant here: a frame whose MAC
/// checks out but whose plaintext does not parse is a data outcome, not a
/// failure of the reader itself. See [`crate::reader::ReadOutcome`].
#[derive(Error, Debug)]
pub enum FrameError {
    /// A read inside a frame returned fewer bytes than required and the
    /// stream was not at a frame boundary.
    #[error("truncated read: expected {expected} bytes, got {got}")]
    Truncated {
        /// Bytes the caller asked for.
        expected: usize,
        /// Bytes actually available.
        got: usize,
    },

    /// The 4-byte length prefix decoded outside `[11, 110 MiB]`.
    #[error("malformed frame length {length} (must be in [11, {max}])", max = crate::reader::MAX_FRAME_LENGTH)]
    MalformedLength {
        /// The offending length.
        length: u32,
    },

    /// Truncated HMAC-SHA256 over the frame did not match the trailing tag.
    #[error("bad MAC at frame {frame_number}")]
    BadMac {
        /// Informational frame counter at the time of failure.
        frame_number: u64,
    },

    /// AES-256-CTR context initialisation or decryption failed.
    #[error("crypto failure: {0}")]
    Crypto(String),

    /// Resync exhausted its attempt budget without finding a valid frame.
    #[error("resync exhausted {attempts} attempts without resynchronising")]
    ResyncFailed {
        /// Attempts made before giving up.
        attempts: u32,
    },

    /// Underlying byte source failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while deriving backup keys from a passphrase.
#[derive(Error, Debug)]
pub enum KeyDerivationError {
    /// The passphrase did not contain exactly 30 digits after stripping
    /// non-digit characters.
    #[error("expected 30 numeric digits in passphrase, found {found}")]
    BadPassphraseLength {
        /// Digits actually found.
        found: usize,
    },

    /// HKDF expansion asked for an output length HKDF-SHA256 cannot produce.
    #[error("hkdf expansion failed: {0}")]
    Hkdf(String),
}
