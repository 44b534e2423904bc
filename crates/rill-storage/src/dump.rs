//! Segment file dumper. Strictly a debugging aid, not part of the hot path.

use std::fs::File;
use std::io::{BufReader, ErrorKind, Read, Write};
use std::path::Path;

use crate::error::Result;
use crate::record::{RecordHeader, HEADER_SIZE};

/// Truncate payloads to this many bytes when printing.
const PAYLOAD_PREVIEW: usize = 100;

/// Walk the records of a segment file and print each header plus a
/// truncated payload to `out`. Stops after `max_records` when given.
/// Returns the number of records printed.
pub fn dump_file(
    path: impl AsRef<Path>,
    max_records: Option<usize>,
    out: &mut impl Write,
) -> Result<usize> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);

    let mut header_buf = [0u8; HEADER_SIZE];
    let mut record_num = 0usize;

    loop {
        if let Some(max) = max_records {
            if record_num == max {
                break;
            }
        }

        match reader.read_exact(&mut header_buf) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        }
        let header = RecordHeader::decode(&header_buf);

        let mut payload = vec![0u8; header.payload_size as usize];
        reader.read_exact(&mut payload)?;

        let preview = &payload[..payload.len().min(PAYLOAD_PREVIEW)];
        writeln!(out, "Record #{record_num}")?;
        writeln!(out, "  Offset:    {}", header.logical_offset)?;
        writeln!(out, "  Size:      {}", header.payload_size)?;
        writeln!(out, "  Timestamp: {} ns", header.timestamp_ns)?;
        writeln!(out, "  Payload:   {:?}", String::from_utf8_lossy(preview))?;
        writeln!(out)?;

        record_num += 1;
    }

    writeln!(out, "Total: {record_num} records")?;
    out.flush()?;
    Ok(record_num)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Durability;
    use crate::segment::Segment;

    #[test]
    fn dumps_all_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dump.log");
        let segment = Segment::open(&path, 0, Durability::Medium).unwrap();
        for i in 0..3u64 {
            segment.append(format!("payload {i}").as_bytes()).unwrap();
        }
        segment.close().unwrap();

        let mut out = Vec::new();
        let count = dump_file(&path, None, &mut out).unwrap();
        assert_eq!(count, 3);

        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("Record #0"));
        assert!(text.contains("payload 2"));
        assert!(text.contains("Total: 3 records"));
    }

    #[test]
    fn honors_the_record_cap() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dump.log");
        let segment = Segment::open(&path, 0, Durability::Medium).unwrap();
        for i in 0..10u64 {
            segment.append(format!("payload {i}").as_bytes()).unwrap();
        }
        segment.close().unwrap();

        let mut out = Vec::new();
        let count = dump_file(&path, Some(4), &mut out).unwrap();
        assert_eq!(count, 4);
        assert!(String::from_utf8(out).unwrap().contains("Total: 4 records"));
    }
}
