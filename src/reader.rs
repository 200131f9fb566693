//! FrameReader: the state machine that turns a byte stream into a sequence
//! of decoded, authenticated frames.
use std::convert::TryFrom;
use std::path::PathBuf;

use log::{debug, warn};

use crate::attachment::AttachmentDescriptor;
use crate::byte_source::ByteSource;
use crate::crypto::{aes_256_ctr_decrypt, verify_frame_mac, MAC_LEN};
use crate::error::FrameError;
use crate::frame::Frame;
use crate::session::Session;

/// Smallest legal frame length: 1 byte of ciphertext plus the 10-byte MAC.
pub const MIN_FRAME_LENGTH: u32 = 11;
/// Largest legal frame length: 110 MiB.
pub const MAX_FRAME_LENGTH: u32 = 110 * 1024 * 1024;

/// Bound on brute-force resync attempts before giving up on the stream.
pub const RESYNC_ATTEMPT_BUDGET: u32 = 1_000_000;

/// What a single `next()` call produced.
#[derive(Debug)]
pub enum ReadOutcome {
    /// A frame was decoded (and authenticated, unless `bad_mac` was set).
    Frame(Frame),
    /// The stream has been fully consumed.
    EndOfStream,
    /// The MAC checked out but the plaintext did not decode into a
    /// recognised frame. Not an error: the caller may keep reading.
    InvalidFrame,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Streaming,
    Terminated,
}

/// Reads and decrypts frames from a backup stream.
///
/// Constructed via [`read_header`] (which bootstraps the unencrypted header
/// frame and the initial counter) followed by [`FrameReader::new`] once the
/// caller has derived keys from the header's salt.
pub struct FrameReader<S: ByteSource> {
    pub(crate) source: S,
    pub(crate) session: Session,
    pending_header: Option<Frame>,
    state: State,
}

/// Read and parse the unencrypted bootstrap frame: a 4-byte length prefix
/// followed by plaintext carrying the salt and IV seed. No MAC, no AES.
pub fn read_header<S: ByteSource>(source: &mut S) -> Result<Frame, FrameError> {
    let mut len_bytes = [0u8; 4];
    let n = source.read(&mut len_bytes)?;
    if n != 4 {
        return Err(FrameError::Truncated {
            expected: 4,
            got: n,
        });
    }
    let length = u32::from_be_bytes(len_bytes);
    if !(MIN_FRAME_LENGTH..=MAX_FRAME_LENGTH).contains(&length) {
        return Err(FrameError::MalformedLength { length });
    }

    let mut buf = vec![0u8; length as usize];
    let n = source.read(&mut buf)?;
    if n != buf.len() {
        return Err(FrameError::Truncated {
            expected: buf.len(),
            got: n,
        });
    }

    match Frame::try_from(buf.as_slice()) {
        Ok(frame @ Frame::Header { .. }) => Ok(frame),
        Ok(_) => Err(FrameError::Crypto(
            "first frame in stream is not a header".to_string(),
        )),
        Err(_) => Err(FrameError::Crypto(
            "first frame in stream did not parse as a header".to_string(),
        )),
    }
}

impl<S: ByteSource> FrameReader<S> {
    /// Build a reader over an already-bootstrapped session. `header` is the
    /// frame `read_header` returned; it is yielded verbatim by the first
    /// call to `next()`, without touching counters or the stream.
    pub fn new(source: S, session: Session, header: Frame) -> Self {
        Self {
            source,
            session,
            pending_header: Some(header),
            state: State::Streaming,
        }
    }

    /// Current absolute byte offset in the source.
    pub fn position(&mut self) -> std::io::Result<u64> {
        self.source.position()
    }

    /// Whether MAC verification failed on the current or most recently read
    /// frame.
    pub fn bad_mac(&self) -> bool {
        self.session.bad_mac
    }

    /// Current counter value (informational / for tests).
    pub fn counter(&self) -> u32 {
        self.session.counter
    }

    /// Current frame number (informational / for tests).
    pub fn frame_number(&self) -> u64 {
        self.session.frame_number
    }

    /// Read the next frame from the stream.
    ///
    /// Calling `next()` again after `EndOfStream` or after a fatal error
    /// keeps returning `EndOfStream` without further I/O or counter
    /// movement.
    pub fn next(&mut self) -> Result<ReadOutcome, FrameError> {
        if self.state == State::Terminated {
            return Ok(ReadOutcome::EndOfStream);
        }
        if let Some(header) = self.pending_header.take() {
            return Ok(ReadOutcome::Frame(header));
        }
        if self.source.eof()? {
            self.state = State::Terminated;
            return Ok(ReadOutcome::EndOfStream);
        }
        match self.read_one_frame() {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                self.state = State::Terminated;
                Err(e)
            }
        }
    }

    fn read_length(&mut self) -> Result<Option<u32>, FrameError> {
        let mut len_bytes = [0u8; 4];
        let n = self.source.read(&mut len_bytes)?;
        if n == 0 {
            return Ok(None);
        }
        if n != 4 {
            return Err(FrameError::Truncated {
                expected: 4,
                got: n,
            });
        }
        let length = u32::from_be_bytes(len_bytes);
        if !(MIN_FRAME_LENGTH..=MAX_FRAME_LENGTH).contains(&length) {
            return Err(FrameError::MalformedLength { length });
        }
        Ok(Some(length))
    }

    fn read_one_frame(&mut self) -> Result<ReadOutcome, FrameError> {
        let length = match self.read_length()? {
            Some(l) => l,
            None => {
                self.state = State::Terminated;
                return Ok(ReadOutcome::EndOfStream);
            }
        };

        let mut buf = vec![0u8; length as usize];
        let n = self.source.read(&mut buf)?;
        if n != buf.len() {
            return Err(FrameError::Truncated {
                expected: buf.len(),
                got: n,
            });
        }

        let cipher_len = length as usize - MAC_LEN;
        let (cipher, tag) = buf.split_at(cipher_len);

        if verify_frame_mac(&self.session.mac_key, cipher, tag) {
            self.session.bad_mac = false;
        } else {
            warn!(
                "bad MAC at frame {}: theirs={:02x?}",
                self.session.frame_number, tag
            );
            self.session.bad_mac = true;
            if self.session.stop_on_error {
                return Err(FrameError::BadMac {
                    frame_number: self.session.frame_number,
                });
            }
        }

        let iv = self.session.current_iv();
        self.session.counter += 1;
        let plain = aes_256_ctr_decrypt(&self.session.cipher_key, &iv, cipher)?;

        let frame_number = self.session.frame_number;
        self.session.frame_number += 1;

        let mut frame = match Frame::try_from(plain.as_slice()) {
            Ok(f) => f,
            Err(_) => {
                if self.session.bad_mac {
                    return Err(FrameError::BadMac { frame_number });
                }
                debug!("frame {frame_number} did not parse; surfacing as InvalidFrame");
                return Ok(ReadOutcome::InvalidFrame);
            }
        };
        if self.session.verbose {
            debug!("frame {frame_number}: {frame}");
        }

        let attachment_size = frame.attachment_size();
        if attachment_size > 0 && !self.session.bad_mac {
            let remaining = self.source.size().saturating_sub(self.source.position()?);
            if remaining < attachment_size as u64 + MAC_LEN as u64 && !self.session.assume_bad_size
            {
                return Err(FrameError::Truncated {
                    expected: attachment_size as usize + MAC_LEN,
                    got: remaining as usize,
                });
            }

            let iv = self.session.current_iv();
            self.session.counter += 1;
            let offset = self.source.position()?;
            let descriptor = AttachmentDescriptor::new(
                self.source_path(),
                offset,
                attachment_size,
                iv,
                self.session.cipher_key,
                &self.session.mac_key,
            );
            frame.set_descriptor(descriptor);
            self.source
                .seek_relative(attachment_size as i64 + MAC_LEN as i64)?;
        }

        Ok(ReadOutcome::Frame(frame))
    }

    fn source_path(&self) -> PathBuf {
        self.session.source_path.clone()
    }
}
