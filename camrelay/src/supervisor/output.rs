//! Transcoder stderr reader.
//!
//! ffmpeg ends some lines with `\r` only and may print bytes that are not
//! UTF-8 (device names, metadata). Records are therefore split on either
//! delimiter and decoded lossily; a bad byte never ends the stream.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, BufReader};

const READ_CHUNK: usize = 4096;

/// Yields non-empty text records delimited by `\n` or `\r`.
pub(crate) struct StderrRecords<R> {
    reader: BufReader<R>,
    pending: Vec<u8>,
}

impl<R> StderrRecords<R>
where
    R: AsyncRead + Unpin,
{
    pub(crate) fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
            pending: Vec::new(),
        }
    }

    /// Next record, `None` at end of stream.
    pub(crate) async fn next_record(&mut self) -> io::Result<Option<String>> {
        let mut chunk = [0u8; READ_CHUNK];

        loop {
            while let Some(end) = self.pending.iter().position(|&b| is_delimiter(b)) {
                let record = decode(&self.pending[..end]);
                let skip = self.pending[end..]
                    .iter()
                    .take_while(|&&b| is_delimiter(b))
                    .count();
                self.pending.drain(..end + skip);

                if !record.is_empty() {
                    return Ok(Some(record));
                }
            }

            let n = self.reader.read(&mut chunk).await?;
            if n == 0 {
                let rest = decode(&self.pending);
                self.pending.clear();
                return Ok((!rest.is_empty()).then_some(rest));
            }
            self.pending.extend_from_slice(&chunk[..n]);
        }
    }

    /// Give back the underlying reader, e.g. to keep draining it.
    pub(crate) fn into_inner(self) -> BufReader<R> {
        self.reader
    }
}

fn is_delimiter(b: u8) -> bool {
    matches!(b, b'\n' | b'\r')
}

fn decode(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).trim().to_string()
}
