//! Read an ordered group of files as if they were one big text file

use std::fs::File;
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tracing::{debug, warn};

use super::{IngestError, IngestResult, LogRecordParser};

/// How much of each file is sampled when looking for its first timestamp
const TIMESTAMP_SAMPLE_BYTES: u64 = 5 * 1024;

struct Segment {
    path: PathBuf,
    reader: BufReader<File>,
    /// Offset of the first byte of this file in the virtual stream
    start: u64,
    len: u64,
}

/// A seekable byte stream spanning several append-only files
///
/// Offsets address one logical space: the first byte of file *i* comes right
/// after the last byte of file *i - 1*. Empty files are left out.
pub struct VirtualLogStream {
    segments: Vec<Segment>,
    current: usize,
    size: u64,
}

impl VirtualLogStream {
    pub fn open<P: AsRef<Path>>(paths: &[P]) -> IngestResult<Self> {
        if paths.is_empty() {
            return Err(IngestError::Configuration(
                "You must specify at least one log file".to_string(),
            ));
        }

        let mut segments = Vec::with_capacity(paths.len());
        let mut size = 0;
        for path in paths {
            let path = path.as_ref();
            let file = File::open(path)?;
            let len = file.metadata()?.len();
            if len == 0 {
                debug!(path = %path.display(), "skipping empty log file");
                continue;
            }

            segments.push(Segment {
                path: path.to_path_buf(),
                reader: BufReader::new(file),
                start: size,
                len,
            });
            size += len;
        }

        Ok(Self {
            segments,
            current: 0,
            size,
        })
    }

    /// Total size of all files in bytes
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Files backing the stream, in stream order
    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.segments.iter().map(|segment| segment.path.as_path())
    }

    /// Read the next line including its terminator, `None` at the end of the stream
    ///
    /// A file that doesn't end with a newline yields its last line on its own;
    /// lines never span two files.
    pub fn read_line(&mut self) -> io::Result<Option<String>> {
        if self.segments.is_empty() {
            return Ok(None);
        }

        loop {
            let has_next = self.current + 1 < self.segments.len();
            let segment = &mut self.segments[self.current];
            let local = segment.reader.stream_position()?;

            if local >= segment.len && has_next {
                self.current += 1;
                self.segments[self.current].reader.seek(SeekFrom::Start(0))?;
                continue;
            }

            let mut buf = Vec::new();
            let read = segment.reader.read_until(b'\n', &mut buf)?;
            if read == 0 {
                return Ok(None);
            }
            return Ok(Some(String::from_utf8_lossy(&buf).into_owned()));
        }
    }

    /// Current offset in the virtual stream
    pub fn tell(&mut self) -> io::Result<u64> {
        match self.segments.get_mut(self.current) {
            Some(segment) => Ok(segment.start + segment.reader.stream_position()?),
            None => Ok(0),
        }
    }

    pub fn eof(&mut self) -> io::Result<bool> {
        Ok(self.tell()? >= self.size)
    }
}

impl Seek for VirtualLogStream {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        if self.segments.is_empty() {
            return Ok(0);
        }

        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::End(delta) => self.size.checked_add_signed(delta),
            SeekFrom::Current(delta) => self.tell()?.checked_add_signed(delta),
        }
        .ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "seek to a negative offset")
        })?;

        let index = self
            .segments
            .iter()
            .rposition(|segment| segment.start <= target)
            .unwrap_or(0);
        self.current = index;

        let segment = &mut self.segments[index];
        segment.reader.seek(SeekFrom::Start(target - segment.start))?;
        Ok(target)
    }

    fn stream_position(&mut self) -> io::Result<u64> {
        self.tell()
    }
}

/// Sort log files oldest first by the timestamp of their first parseable entry
///
/// Files whose sample contains no parseable entry fall back to their
/// modification time.
pub fn order_by_first_timestamp<P: AsRef<Path>>(
    paths: &[P],
    parser: &LogRecordParser,
) -> IngestResult<Vec<PathBuf>> {
    let mut keyed = Vec::with_capacity(paths.len());

    for path in paths {
        let path = path.as_ref();
        let key = match first_timestamp(path, parser)? {
            Some(timestamp) => timestamp,
            None => modification_time(path)?,
        };
        keyed.push((key, path.to_path_buf()));
    }

    keyed.sort_by_key(|(key, _)| *key);
    Ok(keyed.into_iter().map(|(_, path)| path).collect())
}

fn first_timestamp(path: &Path, parser: &LogRecordParser) -> io::Result<Option<i64>> {
    let mut sample = Vec::new();
    File::open(path)?
        .take(TIMESTAMP_SAMPLE_BYTES)
        .read_to_end(&mut sample)?;

    let sample = String::from_utf8_lossy(&sample);
    Ok(sample
        .lines()
        .find_map(|line| parser.parse_line(line, 0).ok())
        .map(|record| record.timestamp))
}

fn modification_time(path: &Path) -> io::Result<i64> {
    let modified = std::fs::metadata(path)?.modified()?;
    match modified.duration_since(UNIX_EPOCH) {
        Ok(elapsed) => Ok(elapsed.as_secs() as i64),
        Err(_) => {
            warn!(path = %path.display(), "modification time predates the epoch");
            Ok(0)
        }
    }
}
