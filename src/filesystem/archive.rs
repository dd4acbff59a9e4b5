//! Blocking file helpers with progress reporting.
//!
//! These run inside task bodies, typically through `tokio::task::spawn_blocking`.
//! Each helper checks [`ProgressSink::is_cancelled`] between chunks or entries
//! and returns [`TaskError::Cancelled`] when asked to stop.

use crate::constants::COPY_CHUNK_SIZE;
use crate::error::{Result, TaskError};
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;
use tracing::debug;
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// Receiver of `(done, total)` work updates
pub trait ProgressSink: Send + Sync {
    fn report(&self, done: u64, total: u64);

    fn is_cancelled(&self) -> bool {
        false
    }
}

/// Sink that ignores progress and never cancels
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn report(&self, _done: u64, _total: u64) {}
}

/// Copy `src` to `dst`, reporting bytes copied
///
/// A partially written `dst` is removed when the copy is cancelled. Copying a
/// file onto itself is refused before anything is opened for writing.
pub fn copy_file_with_progress(src: &Path, dst: &Path, progress: &dyn ProgressSink) -> Result<u64> {
    if dst.exists() && fs::canonicalize(src)? == fs::canonicalize(dst)? {
        return Err(TaskError::execution(format!(
            "cannot copy {} onto itself",
            src.display()
        )));
    }
    let total = fs::metadata(src)?.len();
    let mut reader = BufReader::new(File::open(src)?);
    let mut writer = BufWriter::new(File::create(dst)?);
    let mut buffer = vec![0u8; COPY_CHUNK_SIZE];
    let mut done = 0u64;

    progress.report(0, total);
    loop {
        if progress.is_cancelled() {
            drop(writer);
            let _ = fs::remove_file(dst);
            return Err(TaskError::Cancelled);
        }

        let read = reader.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        writer.write_all(&buffer[..read])?;
        done += read as u64;
        progress.report(done, total);
    }
    writer.flush()?;

    debug!(src = %src.display(), dst = %dst.display(), bytes = done, "File copied");
    Ok(done)
}

/// Zip the contents of `src_dir` into `dst_zip`, reporting entries written
///
/// Entry names are relative to `src_dir` and use `/` separators. Returns the
/// number of entries written.
pub fn zip_directory(src_dir: &Path, dst_zip: &Path, progress: &dyn ProgressSink) -> Result<u64> {
    let entries = WalkDir::new(src_dir)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .collect::<std::result::Result<Vec<_>, walkdir::Error>>()
        .map_err(io::Error::from)?;

    let total = entries.len() as u64;
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut writer = ZipWriter::new(File::create(dst_zip)?);

    progress.report(0, total);
    for (index, entry) in entries.iter().enumerate() {
        if progress.is_cancelled() {
            drop(writer);
            let _ = fs::remove_file(dst_zip);
            return Err(TaskError::Cancelled);
        }

        let relative = entry
            .path()
            .strip_prefix(src_dir)
            .map_err(|e| TaskError::execution(format!("entry outside source directory: {e}")))?;
        let name = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        if entry.file_type().is_dir() {
            writer.add_directory(name, options)?;
        } else {
            writer.start_file(name, options)?;
            let mut file = File::open(entry.path())?;
            io::copy(&mut file, &mut writer)?;
        }
        progress.report(index as u64 + 1, total);
    }
    writer.finish()?;

    debug!(src = %src_dir.display(), archive = %dst_zip.display(), entries = total, "Directory zipped");
    Ok(total)
}

/// Extract `zip_path` below `dst_dir`, reporting entries extracted
///
/// Entries whose names would escape `dst_dir` are rejected.
pub fn unzip_archive(zip_path: &Path, dst_dir: &Path, progress: &dyn ProgressSink) -> Result<u64> {
    let mut archive = ZipArchive::new(File::open(zip_path)?)?;
    let total = archive.len() as u64;
    fs::create_dir_all(dst_dir)?;

    progress.report(0, total);
    for index in 0..archive.len() {
        if progress.is_cancelled() {
            return Err(TaskError::Cancelled);
        }

        let mut entry = archive.by_index(index)?;
        let relative = entry.enclosed_name().ok_or_else(|| {
            TaskError::execution(format!("archive entry escapes destination: {}", entry.name()))
        })?;
        let target = dst_dir.join(relative);

        if entry.is_dir() {
            fs::create_dir_all(&target)?;
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut out = File::create(&target)?;
            io::copy(&mut entry, &mut out)?;
        }
        progress.report(index as u64 + 1, total);
    }

    debug!(archive = %zip_path.display(), dst = %dst_dir.display(), entries = total, "Archive extracted");
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Default)]
    struct Recorder {
        updates: Mutex<Vec<(u64, u64)>>,
        cancelled: AtomicBool,
    }

    impl ProgressSink for Recorder {
        fn report(&self, done: u64, total: u64) {
            self.updates.lock().push((done, total));
        }

        fn is_cancelled(&self) -> bool {
            self.cancelled.load(Ordering::SeqCst)
        }
    }

    #[test]
    fn test_copy_onto_itself_leaves_source_intact() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("report.csv");
        fs::write(&src, b"id,total\n1,42\n").unwrap();
        let same = dir.path().join(".").join("report.csv");

        let err = copy_file_with_progress(&src, &same, &NoProgress).unwrap_err();
        assert!(matches!(err, TaskError::Execution(ref msg) if msg.contains("onto itself")));
        assert_eq!(fs::read(&src).unwrap(), b"id,total\n1,42\n");
    }

    #[test]
    fn test_copy_reports_monotonic_progress() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src.bin");
        let dst = dir.path().join("dst.bin");
        let payload = vec![7u8; COPY_CHUNK_SIZE * 2 + 17];
        fs::write(&src, &payload).unwrap();

        let recorder = Recorder::default();
        let copied = copy_file_with_progress(&src, &dst, &recorder).unwrap();

        assert_eq!(copied, payload.len() as u64);
        assert_eq!(fs::read(&dst).unwrap(), payload);
        let updates = recorder.updates.lock();
        assert_eq!(updates.first(), Some(&(0, payload.len() as u64)));
        assert_eq!(updates.last(), Some(&(payload.len() as u64, payload.len() as u64)));
        assert!(updates.windows(2).all(|w| w[0].0 <= w[1].0));
    }

    #[test]
    fn test_cancelled_copy_removes_partial_output() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src.bin");
        let dst = dir.path().join("dst.bin");
        fs::write(&src, b"payload").unwrap();

        let recorder = Recorder::default();
        recorder.cancelled.store(true, Ordering::SeqCst);

        let err = copy_file_with_progress(&src, &dst, &recorder).unwrap_err();
        assert!(err.is_cancellation());
        assert!(!dst.exists());
    }

    #[test]
    fn test_zip_and_unzip_preserve_tree() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("tree");
        fs::create_dir_all(src.join("nested/deeper")).unwrap();
        fs::write(src.join("top.txt"), b"top").unwrap();
        fs::write(src.join("nested/deeper/leaf.txt"), b"leaf").unwrap();

        let archive = dir.path().join("tree.zip");
        let written = zip_directory(&src, &archive, &NoProgress).unwrap();
        assert_eq!(written, 4);

        let out = dir.path().join("out");
        let extracted = unzip_archive(&archive, &out, &NoProgress).unwrap();
        assert_eq!(extracted, 4);
        assert_eq!(fs::read(out.join("top.txt")).unwrap(), b"top");
        assert_eq!(fs::read(out.join("nested/deeper/leaf.txt")).unwrap(), b"leaf");
    }

    #[test]
    fn test_unzip_rejects_escaping_entries() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("evil.zip");
        {
            let mut writer = ZipWriter::new(File::create(&archive).unwrap());
            writer
                .start_file("../escape.txt", SimpleFileOptions::default())
                .unwrap();
            writer.write_all(b"nope").unwrap();
            writer.finish().unwrap();
        }

        let out = dir.path().join("out");
        let err = unzip_archive(&archive, &out, &NoProgress).unwrap_err();
        assert_eq!(err.kind(), "execution");
        assert!(!dir.path().join("escape.txt").exists());
    }
}
