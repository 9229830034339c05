//! Line scanning with byte offset tracking

use serde::Serialize;
use std::io::SeekFrom;
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncSeekExt, BufReader};

/// Start of the next unread line: `line` lines precede byte `offset`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Position {
    pub line: u64,
    pub offset: u64,
}

/// One raw line of the log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    /// Raw bytes including the line terminator, if any
    pub bytes: Vec<u8>,
    /// Byte offset of the first byte of the line
    pub offset: u64,
    /// 1-based line number within the file
    pub number: u64,
    /// False only for a last line without a trailing newline
    pub terminated: bool,
}

impl LogLine {
    /// Position of this line, for resuming at it
    pub fn start(&self) -> Position {
        Position {
            line: self.number - 1,
            offset: self.offset,
        }
    }

    /// Content for log messages, without the terminator
    pub fn lossy_content(&self) -> String {
        String::from_utf8_lossy(&self.bytes).trim_end().to_string()
    }
}

/// Reads lines sequentially while tracking where the next one starts
#[derive(Debug)]
pub struct LineScanner<R> {
    reader: R,
    position: Position,
}

impl LineScanner<BufReader<File>> {
    /// Open `path` for sequential reading, positioned at `start`
    ///
    /// `start` must be the start of a line, as recorded in a checkpoint.
    pub async fn open(path: &Path, start: Position) -> std::io::Result<Self> {
        let mut file = File::open(path).await?;
        if start.offset > 0 {
            file.seek(SeekFrom::Start(start.offset)).await?;
        }
        Ok(Self::new(BufReader::new(file), start))
    }
}

impl<R: AsyncBufRead + Unpin> LineScanner<R> {
    pub fn new(reader: R, start: Position) -> Self {
        Self {
            reader,
            position: start,
        }
    }

    /// Where the next line starts
    pub fn position(&self) -> Position {
        self.position
    }

    /// Read the next line, or `None` at end of file
    pub async fn next_line(&mut self) -> std::io::Result<Option<LogLine>> {
        let mut bytes = Vec::new();
        let read = self.reader.read_until(b'\n', &mut bytes).await?;
        if read == 0 {
            return Ok(None);
        }

        let line = LogLine {
            terminated: bytes.last() == Some(&b'\n'),
            bytes,
            offset: self.position.offset,
            number: self.position.line + 1,
        };

        self.position = Position {
            line: line.number,
            offset: line.offset + read as u64,
        };

        Ok(Some(line))
    }
}
