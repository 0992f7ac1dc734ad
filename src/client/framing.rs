//! Message framing on a client connection
//!
//! A message ends at the first line consisting of `//`. Reads land in a
//! growable buffer one fixed window at a time; bytes after the terminator
//! stay buffered for the next message.

use std::io::{self, Read};

/// Bytes requested from the stream per read
const READ_WINDOW: usize = 16 * 1024;

/// Reads `//`-terminated messages from a stream
#[derive(Debug)]
pub struct MessageReader<R> {
    reader: R,
    buf: Vec<u8>,

    /// Start of the first line not yet checked for the terminator
    scan_from: usize,
}

impl<R: Read> MessageReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buf: Vec::with_capacity(READ_WINDOW),
            scan_from: 0,
        }
    }

    /// Next complete message including its terminator line
    ///
    /// Returns `Ok(None)` when the peer closes the connection. A partial
    /// message pending at that point is dropped, unless its last line is
    /// an unterminated `//`.
    pub fn read_message(&mut self) -> io::Result<Option<Vec<u8>>> {
        loop {
            if let Some(end) = self.find_terminator() {
                return Ok(Some(self.take_message(end)));
            }

            if self.fill()? == 0 {
                if is_terminator(&self.buf[self.scan_from..]) {
                    let end = self.buf.len();
                    return Ok(Some(self.take_message(end)));
                }
                return Ok(None);
            }
        }
    }

    fn take_message(&mut self, end: usize) -> Vec<u8> {
        self.scan_from = 0;
        self.buf.drain(..end).collect()
    }

    /// Read more bytes; returns how many arrived
    ///
    /// Only the next window past the buffered bytes is zeroed, so a large
    /// message costs time linear in its size.
    fn fill(&mut self) -> io::Result<usize> {
        let len = self.buf.len();
        self.buf.resize(len + READ_WINDOW, 0);

        let result = loop {
            match self.reader.read(&mut self.buf[len..]) {
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                other => break other,
            }
        };

        let n = *result.as_ref().unwrap_or(&0);
        self.buf.truncate(len + n);
        result
    }

    /// End offset of the first complete terminator line, if one is buffered
    fn find_terminator(&mut self) -> Option<usize> {
        let mut line_start = self.scan_from;

        while let Some(rel) = self.buf[line_start..].iter().position(|&b| b == b'\n') {
            if is_terminator(&self.buf[line_start..line_start + rel]) {
                return Some(line_start + rel + 1);
            }
            line_start += rel + 1;
        }

        // Incomplete last line; rescanned once more bytes arrive
        self.scan_from = line_start;
        None
    }
}

fn is_terminator(line: &[u8]) -> bool {
    line.trim_ascii_end() == b"//"
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Hands out its input a few bytes per read
    struct Trickle<'a> {
        data: &'a [u8],
        step: usize,
    }

    impl Read for Trickle<'_> {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = self.step.min(self.data.len()).min(buf.len());
            buf[..n].copy_from_slice(&self.data[..n]);
            self.data = &self.data[n..];
            Ok(n)
        }
    }

    #[test]
    fn test_single_message() {
        let mut reader = MessageReader::new(&b"@--seqdb 1\n>q\nACDE\n//\n"[..]);
        let msg = reader.read_message().unwrap().unwrap();
        assert_eq!(msg, b"@--seqdb 1\n>q\nACDE\n//\n");
        assert!(reader.read_message().unwrap().is_none());
    }

    #[test]
    fn test_partial_reads() {
        let data = b"@--seqdb 1\n>q\nACDEFGHIKL\n//\n";
        for step in [1, 2, 3, 7] {
            let mut reader = MessageReader::new(Trickle { data, step });
            let msg = reader.read_message().unwrap().unwrap();
            assert_eq!(msg, data);
        }
    }

    #[test]
    fn test_leftover_bytes_kept() {
        let data = b"!shutdown\n//\n@--seqdb 1\n>q\nAC\n//\n";
        let mut reader = MessageReader::new(&data[..]);

        assert_eq!(reader.read_message().unwrap().unwrap(), b"!shutdown\n//\n");
        assert_eq!(
            reader.read_message().unwrap().unwrap(),
            b"@--seqdb 1\n>q\nAC\n//\n"
        );
    }

    #[test]
    fn test_slashes_inside_line_do_not_terminate() {
        let data = b">q some//desc\nAC\n//x\n//\n";
        let mut reader = MessageReader::new(&data[..]);
        assert_eq!(reader.read_message().unwrap().unwrap(), data);
    }

    #[test]
    fn test_crlf_and_unterminated_final_line() {
        let mut reader = MessageReader::new(&b"!shutdown\r\n//\r\n"[..]);
        assert!(reader.read_message().unwrap().is_some());

        let mut reader = MessageReader::new(&b"!shutdown\n//"[..]);
        assert_eq!(reader.read_message().unwrap().unwrap(), b"!shutdown\n//");
    }

    #[test]
    fn test_partial_message_dropped_on_close() {
        let mut reader = MessageReader::new(&b"@--seqdb 1\n>q\nAC\n"[..]);
        assert!(reader.read_message().unwrap().is_none());
    }

    #[test]
    fn test_large_message_grows_buffer() {
        let mut data = b">big\n".to_vec();
        for _ in 0..2000 {
            data.extend_from_slice(b"ACDEFGHIKLMNPQRSTVWY\n");
        }
        data.extend_from_slice(b"//\n");

        let mut reader = MessageReader::new(Trickle {
            data: &data,
            step: 997,
        });
        assert_eq!(reader.read_message().unwrap().unwrap().len(), data.len());
    }

    #[test]
    fn test_slashes_split_across_reads() {
        let data = b">q\nAC\n//x\n//\n";
        let mut reader = MessageReader::new(Trickle { data, step: 1 });
        assert_eq!(reader.read_message().unwrap().unwrap(), data);
    }

    /// Records the largest buffer it is asked to fill
    struct Recording<'a> {
        data: &'a [u8],
        largest_request: usize,
    }

    impl Read for Recording<'_> {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.largest_request = self.largest_request.max(buf.len());
            let n = buf.len().min(self.data.len()).min(8192);
            buf[..n].copy_from_slice(&self.data[..n]);
            self.data = &self.data[n..];
            Ok(n)
        }
    }

    #[test]
    fn test_reads_use_fixed_window() {
        let mut data = b">huge\n".to_vec();
        while data.len() < 2 * 1024 * 1024 {
            data.extend_from_slice(b"ACDEFGHIKLMNPQRSTVWY\n");
        }
        data.extend_from_slice(b"//\n");

        let mut reader = MessageReader::new(Recording {
            data: &data,
            largest_request: 0,
        });
        assert_eq!(reader.read_message().unwrap().unwrap().len(), data.len());
        assert_eq!(reader.reader.largest_request, READ_WINDOW);
    }
}
