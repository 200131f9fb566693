//! Ambient CLI consumer: writes decrypted attachment/avatar/sticker blobs
//! to the output directory and tallies frame counts for the end-of-run
//! summary. Does not replay `Statement` frames against a database or write
//! `Preference` frames back into `.ini` files — both are out of scope.
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::frame::FrameType;

/// Writes attachment bytes to disk under a stable, collision-resistant
/// name and accumulates the counters `main` prints at the end of a run.
pub struct OutputWriter {
    output_dir: PathBuf,
    force_overwrite: bool,
    frame_counts: BTreeMap<FrameType, u64>,
    attachment_bytes_written: u64,
}

impl OutputWriter {
    /// Create the output directory (if missing) and an empty writer.
    pub fn new(output_dir: PathBuf, force_overwrite: bool) -> Result<Self> {
        fs::create_dir_all(&output_dir)
            .with_context(|| format!("could not create output dir {}", output_dir.display()))?;
        Ok(Self {
            output_dir,
            force_overwrite,
            frame_counts: BTreeMap::new(),
            attachment_bytes_written: 0,
        })
    }

    /// Record that a frame of `frame_type` was read, for the summary.
    pub fn record_frame(&mut self, frame_type: FrameType) {
        *self.frame_counts.entry(frame_type).or_insert(0) += 1;
    }

    /// Write a decrypted attachment/avatar/sticker blob under `name`
    /// (already disambiguated by the caller, e.g. `attachment_12_3`).
    pub fn write_blob(&mut self, name: &str, bytes: &[u8]) -> Result<()> {
        let path = self.output_dir.join(name);
        if path.exists() && !self.force_overwrite {
            anyhow::bail!("refusing to overwrite existing file {}", path.display());
        }
        fs::write(&path, bytes)
            .with_context(|| format!("could not write {}", path.display()))?;
        self.attachment_bytes_written += bytes.len() as u64;
        Ok(())
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Render the end-of-run summary line by line.
    pub fn summary_lines(&self) -> Vec<String> {
        let mut lines = Vec::new();
        for (frame_type, count) in &self.frame_counts {
            lines.push(format!("{frame_type:?}: {count}"));
        }
        lines.push(format!(
            "attachment bytes written: {}",
            self.attachment_bytes_written
        ));
        lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    static COUNTER: AtomicU32 = AtomicU32::new(0);

    fn scratch_dir(label: &str) -> PathBuf {
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        std::env::temp_dir().join(format!("vaultframe-test-{label}-{}-{n}", std::process::id()))
    }

    #[test]
    fn write_blob_refuses_overwrite_without_force() {
        let dir = scratch_dir("no-force");
        let mut writer = OutputWriter::new(dir.clone(), false).unwrap();
        writer.write_blob("a", b"one").unwrap();
        let err = writer.write_blob("a", b"two");
        assert!(err.is_err());
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn write_blob_overwrites_with_force() {
        let dir = scratch_dir("force");
        let mut writer = OutputWriter::new(dir.clone(), true).unwrap();
        writer.write_blob("a", b"one").unwrap();
        writer.write_blob("a", b"two").unwrap();
        let contents = fs::read(dir.join("a")).unwrap();
        assert_eq!(contents, b"two");
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn record_frame_tallies_by_type() {
        let dir = scratch_dir("tally");
        let mut writer = OutputWriter::new(dir.clone(), true).unwrap();
        writer.record_frame(FrameType::End);
        writer.record_frame(FrameType::End);
        writer.record_frame(FrameType::Version);
        let lines = writer.summary_lines();
        assert!(lines.iter().any(|l| l.contains("End: 2")));
        assert!(lines.iter().any(|l| l.contains("Version: 1")));
        let _ = fs::remove_dir_all(&dir);
    }
}
