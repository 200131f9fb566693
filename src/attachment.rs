//! Lazy attachment handles: a value object recording enough to decrypt a
//! trailing ciphertext blob later, without holding the backup file open.
use crate::byte_source::{ByteSource, FileSource};
use crate::crypto::{aes_256_ctr_decrypt, verify_frame_mac};
use crate::error::FrameError;
use std::path::PathBuf;

/// A handle to an attachment, avatar, or sticker blob that trails a frame.
///
/// The descriptor exclusively owns its copies of the IV and key material —
/// it never borrows them from the session that produced it, since the
/// session's counters keep moving after the descriptor is handed out.
#[derive(Debug, Clone)]
pub struct AttachmentDescriptor {
    source_path: PathBuf,
    offset: u64,
    size: u32,
    iv: [u8; 16],
    cipher_key: [u8; 32],
    mac_key: Vec<u8>,
}

impl AttachmentDescriptor {
    /// Construct a descriptor pointing at `offset` in `source_path`, with
    /// its own copies of the IV and key material needed to decrypt later.
    pub fn new(
        source_path: PathBuf,
        offset: u64,
        size: u32,
        iv: [u8; 16],
        cipher_key: [u8; 32],
        mac_key: &[u8],
    ) -> Self {
        Self {
            source_path,
            offset,
            size,
            iv,
            cipher_key,
            mac_key: mac_key.to_vec(),
        }
    }

    /// Byte offset into the source file where the ciphertext begins.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Size of the ciphertext blob, in bytes (excludes the trailing MAC).
    pub fn size(&self) -> u32 {
        self.size
    }

    /// Open a fresh read window on the source file and decrypt the blob.
    ///
    /// This is the "stateless re-decrypter" the core exposes to
    /// collaborators: it does not touch the session's cursor or counters,
    /// so it may be called long after the session that produced it has
    /// moved on, or even after it has been dropped.
    pub fn decrypt(&self) -> Result<Vec<u8>, FrameError> {
        let mut source = FileSource::open(&self.source_path)?;
        source.seek_absolute(self.offset)?;

        let mut ciphertext = vec![0u8; self.size as usize];
        let n = source.read(&mut ciphertext)?;
        if n != ciphertext.len() {
            return Err(FrameError::Truncated {
                expected: ciphertext.len(),
                got: n,
            });
        }

        let mut tag = [0u8; crate::crypto::MAC_LEN];
        let n = source.read(&mut tag)?;
        if n != tag.len() {
            return Err(FrameError::Truncated {
                expected: tag.len(),
                got: n,
            });
        }

        if !verify_frame_mac(&self.mac_key, &ciphertext, &tag) {
            return Err(FrameError::BadMac { frame_number: 0 });
        }

        aes_256_ctr_decrypt(&self.cipher_key, &self.iv, &ciphertext)
    }
}
