//! Newline-delimited text framing shared by every connection.

use std::io;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

const LINE_ENDINGS: &[char] = &['\n', '\r'];

/// Reads the next non-empty line, without its terminator. `None` at end of stream.
pub async fn read_line_message<R>(reader: &mut R) -> io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    loop {
        line.clear();
        let bytes = reader.read_line(&mut line).await?;
        if bytes == 0 {
            return Ok(None);
        }

        let trimmed = line.trim_end_matches(LINE_ENDINGS);
        if trimmed.trim().is_empty() {
            continue;
        }
        return Ok(Some(trimmed.to_string()));
    }
}

/// Writes `message` followed by a newline and flushes.
///
/// Multi-line payloads (query results, help text) are written as-is; the
/// receiving shell prints every line it gets.
pub async fn write_line_message<W>(writer: &mut W, message: &str) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut encoded = Vec::with_capacity(message.len() + 1);
    encoded.extend_from_slice(message.trim_end_matches(LINE_ENDINGS).as_bytes());
    encoded.push(b'\n');
    writer.write_all(&encoded).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lines_survive_the_pipe() {
        let (mut writer, reader) = tokio::io::duplex(1024);
        let mut reader = tokio::io::BufReader::new(reader);

        write_line_message(&mut writer, "OUTPUT blk_3").await.expect("write");
        write_line_message(&mut writer, "SUCCESS\n").await.expect("write");

        let first = read_line_message(&mut reader).await.expect("read");
        let second = read_line_message(&mut reader).await.expect("read");
        assert_eq!(first.as_deref(), Some("OUTPUT blk_3"));
        assert_eq!(second.as_deref(), Some("SUCCESS"));
    }

    #[tokio::test]
    async fn blank_lines_and_crlf_are_skipped() {
        let input: &[u8] = b"\r\n   \nselect * from t\r\n";
        let mut reader = tokio::io::BufReader::new(input);

        let line = read_line_message(&mut reader).await.expect("read");
        assert_eq!(line.as_deref(), Some("select * from t"));
        assert_eq!(read_line_message(&mut reader).await.expect("eof"), None);
    }
}
