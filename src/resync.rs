//! Bounded brute-force resynchronisation, invoked explicitly by a caller
//! that suspects the counter has drifted from the stream. Not called
//! automatically by `FrameReader::next()` — an unparseable frame with a
//! good MAC is reported as `ReadOutcome::InvalidFrame` and it is the
//! caller's decision whether to attempt recovery.
use std::convert::TryFrom;

use log::debug;

use crate::byte_source::ByteSource;
use crate::crypto::{aes_256_ctr_decrypt, hmac_sha256, MAC_LEN};
use crate::error::FrameError;
use crate::frame::{Frame, FrameType};
use crate::reader::{FrameReader, RESYNC_ATTEMPT_BUDGET};

/// One entry of the MAC catalogue built by [`FrameReader::build_mac_catalogue`]:
/// the full-length HMAC-SHA256 digest that would terminate a frame starting
/// at `position`, and the position itself.
#[derive(Debug, Clone)]
pub struct MacCandidate {
    pub position: u64,
    pub mac: [u8; 32],
}

impl<S: ByteSource> FrameReader<S> {
    /// Strategy A: assume the stream position is correct but the counter
    /// has drifted. Re-derives the IV at `counter + k` for `k = 1..=budget`
    /// and re-attempts the read already in flight at the current stream
    /// position, stopping at the first `k` whose frame validates, is not a
    /// `Header`, and — if it is an `End` — leaves the stream fully
    /// consumed.
    ///
    /// `cipher` is the frame body whose MAC has *already* verified against
    /// `session.mac_key` (the MAC covers ciphertext only, never the
    /// counter, so it is unaffected by which counter value decrypts it
    /// correctly). Only the decrypted plaintext's shape is used to pick the
    /// right counter.
    ///
    /// On success, the session's counter and frame number are advanced past
    /// the skipped frames and the matching frame is returned. The stream
    /// position is left immediately after the frame's fixed fields (not
    /// including any attachment tail); callers proceed with `next()` as
    /// usual afterward.
    pub fn resync_counter_drift(&mut self, cipher: &[u8]) -> Result<Frame, FrameError> {
        for skipped in 1..=RESYNC_ATTEMPT_BUDGET {
            if skipped % 1000 == 0 {
                debug!("resync: tried {skipped} counter offsets");
            }
            let candidate_counter = self.session.counter.wrapping_add(skipped);
            let iv = crate::crypto::build_iv(&self.session.iv_seed, candidate_counter);
            let Ok(plain) = aes_256_ctr_decrypt(&self.session.cipher_key, &iv, cipher) else {
                continue;
            };
            let Ok(frame) = Frame::try_from(plain.as_slice()) else {
                continue;
            };
            if !frame.validate() || frame.frame_type() == FrameType::Header {
                continue;
            }
            if frame.frame_type() == FrameType::End && !self.source.eof()? {
                continue;
            }

            self.session.counter = candidate_counter + 1;
            self.session.frame_number += skipped as u64;
            self.session.bad_mac = false;
            debug!("resync: recovered after skipping {skipped} frame(s)");
            return Ok(frame);
        }
        Err(FrameError::ResyncFailed {
            attempts: RESYNC_ATTEMPT_BUDGET,
        })
    }

    /// Strategy B: scan the remainder of the stream for every offset whose
    /// trailing bytes form a valid frame (independent of the counter),
    /// recording the full HMAC-SHA256 digest that would authenticate it.
    /// The returned catalogue lets a caller compare against a MAC recovered
    /// from elsewhere (e.g. a known-good frame boundary) to pick a resync
    /// point, without committing to any one candidate itself.
    ///
    /// This does not touch the session's counters; it only reads forward
    /// from the current position and restores it afterward.
    pub fn build_mac_catalogue(&mut self) -> Result<Vec<MacCandidate>, FrameError> {
        let start = self.source.position()?;
        let mut candidates = Vec::new();

        loop {
            let position = self.source.position()?;
            if self.source.eof()? {
                break;
            }
            let mut len_bytes = [0u8; 4];
            if self.source.read(&mut len_bytes)? != 4 {
                break;
            }
            let length = u32::from_be_bytes(len_bytes);
            if !(crate::reader::MIN_FRAME_LENGTH..=crate::reader::MAX_FRAME_LENGTH)
                .contains(&length)
            {
                self.source.seek_absolute(position + 1)?;
                continue;
            }
            let mut buf = vec![0u8; length as usize];
            if self.source.read(&mut buf)? != buf.len() {
                break;
            }
            let cipher_len = buf.len() - MAC_LEN;
            let digest = hmac_sha256(&self.session.mac_key, &buf[..cipher_len]);
            candidates.push(MacCandidate { position, mac: digest });
        }

        self.source.seek_absolute(start)?;
        Ok(candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::byte_source::MemorySource;
    use crate::frame::tests_support::*;
    use crate::reader::read_header;
    use crate::session::Session;
    use std::path::PathBuf;

    fn session_with(iv_seed: [u8; 16], cipher_key: [u8; 32], mac_key: Vec<u8>) -> Session {
        Session::new(
            PathBuf::from("/nonexistent"),
            cipher_key,
            mac_key,
            iv_seed,
            false,
            false,
            false,
        )
    }

    fn framed(cipher_key: &[u8; 32], mac_key: &[u8], iv: [u8; 16], plaintext: &[u8]) -> Vec<u8> {
        let ciphertext = aes_256_ctr_decrypt(cipher_key, &iv, plaintext).unwrap();
        let tag = hmac_sha256(mac_key, &ciphertext);
        let mut out = Vec::new();
        let total_len = (ciphertext.len() + MAC_LEN) as u32;
        out.extend_from_slice(&total_len.to_be_bytes());
        out.extend_from_slice(&ciphertext);
        out.extend_from_slice(&tag[..MAC_LEN]);
        out
    }

    #[test]
    fn counter_drift_recovers_at_known_offset() {
        let cipher_key = [0u8; 32];
        let mac_key = vec![0u8; 32];
        let iv_seed = [0u8; 16];

        let header_bytes = encode_header_frame(&[0; 16], &iv_seed);
        let mut stream = Vec::new();
        stream.extend_from_slice(&(header_bytes.len() as u32).to_be_bytes());
        stream.extend_from_slice(&header_bytes);

        // Encrypt the End frame under counter+3, simulating three frames
        // that were dropped from the stream without moving our counter.
        let end_plain = encode_end_frame();
        let true_counter = 3u32;
        let iv = crate::crypto::build_iv(&iv_seed, true_counter);
        let frame_bytes = framed(&cipher_key, &mac_key, iv, &end_plain);
        stream.extend_from_slice(&frame_bytes);

        let mut source = MemorySource::new(stream);
        let header = read_header(&mut source).unwrap();
        let session = session_with(iv_seed, cipher_key, mac_key.clone());
        let mut reader = FrameReader::new(source, session, header);
        reader.next().unwrap(); // header

        // Advance the stream past this frame's length+body+tag, as the
        // normal read path would have by the time it discovered the
        // plaintext didn't parse; `resync_counter_drift` checks `eof()` to
        // decide whether a candidate `End` frame is plausible.
        let cipher_len = frame_bytes.len() - 4 - MAC_LEN;
        let mut discard = vec![0u8; frame_bytes.len()];
        reader.source.read(&mut discard).unwrap();
        let cipher = &frame_bytes[4..4 + cipher_len];

        let recovered = reader.resync_counter_drift(cipher).unwrap();
        assert!(matches!(recovered, Frame::End));
        assert_eq!(reader.counter(), true_counter + 1);
    }

    #[test]
    fn counter_drift_recovers_a_single_dropped_frame() {
        let cipher_key = [0u8; 32];
        let mac_key = vec![0u8; 32];
        let iv_seed = [0u8; 16];

        let header_bytes = encode_header_frame(&[0; 16], &iv_seed);
        let mut stream = Vec::new();
        stream.extend_from_slice(&(header_bytes.len() as u32).to_be_bytes());
        stream.extend_from_slice(&header_bytes);

        // A single frame was dropped ahead of this one without moving our
        // counter, so the real counter for this frame is ours + 1.
        let end_plain = encode_end_frame();
        let true_counter = 1u32;
        let iv = crate::crypto::build_iv(&iv_seed, true_counter);
        let frame_bytes = framed(&cipher_key, &mac_key, iv, &end_plain);
        stream.extend_from_slice(&frame_bytes);

        let mut source = MemorySource::new(stream);
        let header = read_header(&mut source).unwrap();
        let session = session_with(iv_seed, cipher_key, mac_key.clone());
        let mut reader = FrameReader::new(source, session, header);
        reader.next().unwrap(); // header

        let mut discard = vec![0u8; frame_bytes.len()];
        reader.source.read(&mut discard).unwrap();
        let cipher_len = frame_bytes.len() - 4 - MAC_LEN;
        let cipher = &frame_bytes[4..4 + cipher_len];

        let recovered = reader.resync_counter_drift(cipher).unwrap();
        assert!(matches!(recovered, Frame::End));
        assert_eq!(reader.counter(), true_counter + 1);
    }

    #[test]
    fn counter_drift_gives_up_within_budget() {
        let cipher_key = [0u8; 32];
        let mac_key = vec![0u8; 32];
        let iv_seed = [0u8; 16];
        let header_bytes = encode_header_frame(&[0; 16], &iv_seed);
        let mut stream = Vec::new();
        stream.extend_from_slice(&(header_bytes.len() as u32).to_be_bytes());
        stream.extend_from_slice(&header_bytes);

        let mut source = MemorySource::new(stream);
        let header = read_header(&mut source).unwrap();
        let session = session_with(iv_seed, cipher_key, mac_key);
        let mut reader = FrameReader::new(source, session, header);
        reader.next().unwrap();

        // An empty ciphertext decrypts to empty plaintext under every IV, so
        // this is a deterministic way to exhaust the attempt budget without
        // any chance of a spurious valid-looking frame turning up.
        let empty_cipher: Vec<u8> = Vec::new();
        let err = reader.resync_counter_drift(&empty_cipher).unwrap_err();
        assert!(matches!(err, FrameError::ResyncFailed { .. }));
    }

    #[test]
    fn mac_catalogue_finds_the_one_frame_and_rewinds() {
        let cipher_key = [0u8; 32];
        let mac_key = vec![0u8; 32];
        let iv_seed = [0u8; 16];
        let header_bytes = encode_header_frame(&[0; 16], &iv_seed);
        let mut stream = Vec::new();
        stream.extend_from_slice(&(header_bytes.len() as u32).to_be_bytes());
        stream.extend_from_slice(&header_bytes);

        let end_plain = encode_end_frame();
        let iv = crate::crypto::build_iv(&iv_seed, 0);
        let frame_bytes = framed(&cipher_key, &mac_key, iv, &end_plain);
        let expected_position = stream.len() as u64;
        stream.extend_from_slice(&frame_bytes);

        let mut source = MemorySource::new(stream);
        let header = read_header(&mut source).unwrap();
        let session = session_with(iv_seed, cipher_key, mac_key.clone());
        let mut reader = FrameReader::new(source, session, header);
        reader.next().unwrap(); // header

        let position_before = reader.position().unwrap();
        let catalogue = reader.build_mac_catalogue().unwrap();
        assert_eq!(reader.position().unwrap(), position_before, "catalogue must not move the cursor");

        let cipher_len = frame_bytes.len() - 4 - MAC_LEN;
        let expected_mac = hmac_sha256(&mac_key, &frame_bytes[4..4 + cipher_len]);
        assert!(catalogue
            .iter()
            .any(|c| c.position == expected_position && c.mac == expected_mac));
    }
}
