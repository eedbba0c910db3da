//! Newline-delimited JSON over any async byte stream
//!
//! The receiver binary wires these to stdin and stdout; tests use in-memory
//! duplex pipes.

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, Lines};

use crate::error::Result;
use crate::protocol::{Command, Event};

/// Reads commands, one per line
pub struct ControlReader<R> {
    lines: Lines<R>,
}

impl<R: AsyncBufRead + Unpin> ControlReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
        }
    }

    /// Next command line.
    ///
    /// `Ok(None)` means the peer closed the stream. A line that does not
    /// parse is returned as `Some(Err(..))` so the caller can report it and
    /// keep reading. Cancel safe.
    pub async fn next_command(&mut self) -> std::io::Result<Option<Result<Command>>> {
        loop {
            let Some(line) = self.lines.next_line().await? else {
                return Ok(None);
            };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            return Ok(Some(Command::parse(line)));
        }
    }
}

/// Writes events, one per line, flushing after each
pub struct EventWriter<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> EventWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub async fn send(&mut self, event: &Event) -> Result<()> {
        let mut line = event.to_line()?;
        line.push('\n');
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use tokio::io::BufReader;

    #[tokio::test]
    async fn test_reader_skips_blank_lines_and_reports_garbage() {
        let input: &[u8] = b"{\"command\":\"ping\"}\n\n  \nnot json\n{\"command\":\"stop\"}";
        let mut reader = ControlReader::new(BufReader::new(input));

        assert_eq!(reader.next_command().await.unwrap().unwrap().unwrap(), Command::Ping);
        assert!(matches!(
            reader.next_command().await.unwrap(),
            Some(Err(Error::Json(_)))
        ));
        assert_eq!(reader.next_command().await.unwrap().unwrap().unwrap(), Command::Stop);
        assert!(reader.next_command().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_writer_emits_one_line_per_event() {
        let mut out = Vec::new();
        {
            let mut writer = EventWriter::new(&mut out);
            writer.send(&Event::Ready(true)).await.unwrap();
            writer.send(&Event::MuteState(false)).await.unwrap();
        }

        let text = String::from_utf8(out).unwrap();
        assert_eq!(
            text,
            "{\"type\":\"ready\",\"data\":true}\n{\"type\":\"mute_state\",\"data\":false}\n"
        );
    }
}
