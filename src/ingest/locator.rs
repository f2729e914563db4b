use std::io::{self, Seek, SeekFrom};

use super::{LogRecordParser, VirtualLogStream};

/// Find the first log entry whose timestamp is greater or equal to `target`
///
/// Returns the stream offset of that entry, or `None` when the stream is empty
/// or every entry is older. Assumes the stream is sorted chronologically.
/// Unparseable lines are skipped while probing; a probe that finds nothing
/// parseable before the end of the stream counts as "not older" so the search
/// keeps narrowing to the left. The stream position is restored before
/// returning.
pub fn find_first_entry_by_timestamp(
    stream: &mut VirtualLogStream,
    parser: &LogRecordParser,
    target: i64,
) -> io::Result<Option<u64>> {
    let original_position = stream.tell()?;
    let result = search(stream, parser, target);
    stream.seek(SeekFrom::Start(original_position))?;
    result
}

fn search(
    stream: &mut VirtualLogStream,
    parser: &LogRecordParser,
    target: i64,
) -> io::Result<Option<u64>> {
    let size = stream.size();
    if size == 0 {
        return Ok(None);
    }

    // Every probe discards the line under the cursor, so the very first line
    // could never be reached by the search itself.
    stream.seek(SeekFrom::Start(0))?;
    if let Some(line) = stream.read_line()? {
        if let Ok(entry) = parser.parse_line(&line, 0) {
            if entry.timestamp >= target {
                return Ok(Some(0));
            }
        }
    }

    let mut beginning: u64 = 0;
    let mut end: u64 = size - 1;

    while beginning <= end {
        let middle = beginning + (end - beginning) / 2;
        stream.seek(SeekFrom::Start(middle))?;

        // Probably in the middle of a line.
        stream.read_line()?;

        let mut comparison = None;
        while comparison.is_none() {
            let Some(line) = stream.read_line()? else {
                break;
            };
            if line.trim().is_empty() {
                continue;
            }
            if let Ok(entry) = parser.parse_line(&line, 0) {
                comparison = Some(entry.timestamp.cmp(&target));
            }
        }

        match comparison {
            Some(std::cmp::Ordering::Less) => beginning = middle + 1,
            _ => {
                if middle == 0 {
                    break;
                }
                end = middle - 1;
            }
        }
    }

    stream.seek(SeekFrom::Start(beginning))?;
    stream.read_line()?;

    // Junk lines may separate the narrowed position from the entry or fill the rest of the stream.
    loop {
        let position = stream.tell()?;
        let Some(line) = stream.read_line()? else {
            return Ok(None);
        };
        if let Ok(entry) = parser.parse_line(&line, 0) {
            if entry.timestamp >= target {
                return Ok(Some(position));
            }
        }
    }
}
