//! Read-only source file pool.
//!
//! A FileVault volume group may span several physical volumes (a Fusion
//! drive, for instance). Every source file gets one ranged handle starting
//! at the same volume offset; handle 0 also serves as the primary (umbrella)
//! volume handle.

use crate::error::{FvdeError, FvdeResult};
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

/// One source file, viewed from `offset` onwards.
#[derive(Debug)]
pub struct RangedSource {
    path: PathBuf,
    offset: u64,
    /// Bytes available after `offset`. `None` for devices whose size the
    /// metadata does not report.
    range_size: Option<u64>,
    file: File,
}

impl RangedSource {
    fn open(path: &Path, offset: u64) -> FvdeResult<Self> {
        let file = File::open(path).map_err(|e| FvdeError::io(path, e))?;
        let metadata = file.metadata().map_err(|e| FvdeError::io(path, e))?;

        let range_size = if metadata.is_file() {
            let len = metadata.len();
            if offset >= len {
                return Err(FvdeError::InvalidArgument(format!(
                    "volume offset {offset} is beyond the end of {} ({len} bytes)",
                    path.display()
                )));
            }
            Some(len - offset)
        } else {
            None
        };

        Ok(Self {
            path: path.to_path_buf(),
            offset,
            range_size,
            file,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Byte offset of the range within the source file.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn range_size(&self) -> Option<u64> {
        self.range_size
    }

    /// Positioned read relative to the start of the range.
    ///
    /// Reads past the end of a sized range return 0.
    pub fn read_at(&self, buf: &mut [u8], position: u64) -> io::Result<usize> {
        let len = match self.range_size {
            Some(size) if position >= size => return Ok(0),
            Some(size) => buf
                .len()
                .min(usize::try_from(size - position).unwrap_or(usize::MAX)),
            None => buf.len(),
        };
        let absolute = self.offset.checked_add(position).ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "read offset overflows")
        })?;
        read_file_at(&self.file, &mut buf[..len], absolute)
    }
}

#[cfg(unix)]
fn read_file_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    std::os::unix::fs::FileExt::read_at(file, buf, offset)
}

#[cfg(windows)]
fn read_file_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    std::os::windows::fs::FileExt::seek_read(file, buf, offset)
}

/// The set of ranged source handles a volume engine reads from.
#[derive(Debug)]
pub struct IoPool {
    sources: Vec<RangedSource>,
}

impl IoPool {
    /// Opens every source read-only at `offset`.
    ///
    /// Fails on an empty source list, on the first file that cannot be
    /// opened, and when `offset` lies beyond the end of a regular file.
    pub fn open<P: AsRef<Path>>(sources: &[P], offset: u64) -> FvdeResult<Self> {
        if sources.is_empty() {
            return Err(FvdeError::NoSources);
        }
        let sources = sources
            .iter()
            .map(|path| RangedSource::open(path.as_ref(), offset))
            .collect::<FvdeResult<Vec<_>>>()?;
        tracing::debug!(count = sources.len(), offset, "Opened source file pool");
        Ok(Self { sources })
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&RangedSource> {
        self.sources.get(index)
    }

    /// Handle 0, used to open the primary volume.
    pub fn primary(&self) -> &RangedSource {
        // Non-empty by construction.
        &self.sources[0]
    }

    pub fn iter(&self) -> impl Iterator<Item = &RangedSource> {
        self.sources.iter()
    }
}

impl Drop for IoPool {
    fn drop(&mut self) {
        tracing::debug!(count = self.sources.len(), "Closing source file pool");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn source_with(content: &[u8]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_empty_sources_rejected() {
        let sources: [PathBuf; 0] = [];
        assert!(matches!(IoPool::open(&sources, 0), Err(FvdeError::NoSources)));
    }

    #[test]
    fn test_missing_source_reports_path() {
        let err = IoPool::open(&["/nonexistent/fvde/source.img"], 0).unwrap_err();
        match err {
            FvdeError::Io { path, source } => {
                assert_eq!(path, Path::new("/nonexistent/fvde/source.img"));
                assert_eq!(source.kind(), io::ErrorKind::NotFound);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_offset_beyond_end_rejected() {
        let file = source_with(b"0123456789");
        let err = IoPool::open(&[file.path()], 10).unwrap_err();
        assert!(matches!(err, FvdeError::InvalidArgument(_)), "{err:?}");
    }

    #[test]
    fn test_ranged_reads_apply_offset() {
        let file = source_with(b"headerPAYLOAD");
        let pool = IoPool::open(&[file.path()], 6).unwrap();
        let source = pool.primary();
        assert_eq!(source.range_size(), Some(7));

        let mut buf = [0u8; 4];
        assert_eq!(source.read_at(&mut buf, 0).unwrap(), 4);
        assert_eq!(&buf, b"PAYL");

        let mut tail = [0u8; 16];
        assert_eq!(source.read_at(&mut tail, 4).unwrap(), 3);
        assert_eq!(&tail[..3], b"OAD");

        assert_eq!(source.read_at(&mut tail, 7).unwrap(), 0);
    }

    #[test]
    fn test_multiple_sources_share_offset() {
        let first = source_with(b"xxAAAA");
        let second = source_with(b"xxBBBBBB");
        let pool = IoPool::open(&[first.path(), second.path()], 2).unwrap();

        assert_eq!(pool.len(), 2);
        let offsets: Vec<u64> = pool.iter().map(RangedSource::offset).collect();
        assert_eq!(offsets, vec![2, 2]);
        assert_eq!(pool.get(1).unwrap().range_size(), Some(6));
        assert!(pool.get(2).is_none());
    }
}
