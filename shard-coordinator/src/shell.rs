//! Interactive front end: stdin lines go to the coordinator, its replies go to stdout.

use anyhow::{Context, Result};
use tokio::{
    io::{self, AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader},
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    select,
};
use tracing::{info, warn};

use crate::{
    cli::ShellArgs,
    wire::{read_line_message, write_line_message},
};

const PROMPT_HINT: &str = "*** connected; type !help for commands, !exit to stop the coordinator";

pub async fn run(args: ShellArgs) -> Result<()> {
    let (mut reader, mut writer) = establish_connection(&args).await?;
    write_stdout(PROMPT_HINT).await?;

    let mut stdin = BufReader::new(tokio::io::stdin());
    run_shell_loop(&mut reader, &mut writer, &mut stdin).await?;
    shutdown_connection(&mut writer).await;

    Ok(())
}

async fn establish_connection(
    args: &ShellArgs,
) -> Result<(BufReader<OwnedReadHalf>, OwnedWriteHalf)> {
    let stream = TcpStream::connect(args.server)
        .await
        .with_context(|| format!("failed to connect to {}", args.server))?;

    info!("connected to {}", args.server);

    let (reader, writer) = stream.into_split();
    Ok((BufReader::new(reader), writer))
}

/// Pumps lines in both directions until either side closes or ctrl-c.
pub async fn run_shell_loop<R, W, I>(reader: &mut R, writer: &mut W, stdin: &mut I) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
    I: AsyncBufRead + Unpin,
{
    let mut input = String::new();
    loop {
        input.clear();
        select! {
            server_line = read_line_message(reader) => {
                if !handle_server_line(server_line).await? {
                    break;
                }
            }
            bytes_read = stdin.read_line(&mut input) => {
                if !handle_stdin_input(bytes_read, &input, writer).await? {
                    break;
                }
            }
            ctrl_c = tokio::signal::ctrl_c() => {
                handle_ctrl_c(ctrl_c);
                break;
            }
        }
    }
    Ok(())
}

async fn handle_server_line(line: io::Result<Option<String>>) -> Result<bool> {
    match line? {
        Some(line) if line.starts_with("ERROR") => {
            write_stderr(&format!("!!! {line}")).await?;
            Ok(true)
        }
        Some(line) => {
            write_stdout(&line).await?;
            Ok(true)
        }
        None => {
            write_stdout("*** coordinator closed the connection").await?;
            Ok(false)
        }
    }
}

async fn handle_stdin_input<W>(
    bytes_read: io::Result<usize>,
    input: &str,
    writer: &mut W,
) -> Result<bool>
where
    W: AsyncWrite + Unpin,
{
    let bytes_read = bytes_read?;
    if bytes_read == 0 {
        return Ok(false);
    }

    let text = input.trim();
    if text.is_empty() {
        return Ok(true);
    }

    write_line_message(writer, text).await?;
    Ok(true)
}

fn handle_ctrl_c(result: io::Result<()>) {
    if let Err(error) = result {
        warn!(?error, "ctrl-c handler failed");
    }
}

async fn shutdown_connection<W>(writer: &mut W)
where
    W: AsyncWrite + Unpin,
{
    if let Err(error) = writer.shutdown().await {
        warn!(?error, "failed to shutdown shell writer cleanly");
    }
}

async fn write_stdout(line: &str) -> io::Result<()> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(line.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await
}

async fn write_stderr(line: &str) -> io::Result<()> {
    let mut stderr = tokio::io::stderr();
    stderr.write_all(line.as_bytes()).await?;
    stderr.write_all(b"\n").await?;
    stderr.flush().await
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn stdin_lines_are_forwarded_until_eof() {
        let (server_side, shell_side) = tokio::io::duplex(1024);
        let (shell_read, mut shell_write) = tokio::io::split(shell_side);
        let mut shell_read = BufReader::new(shell_read);
        let mut server = BufReader::new(server_side);

        let input: &[u8] = b"select * from t\n\n!nodes\n";
        let mut stdin = BufReader::new(input);

        tokio::time::timeout(
            Duration::from_secs(1),
            run_shell_loop(&mut shell_read, &mut shell_write, &mut stdin),
        )
        .await
        .expect("loop ends at stdin eof")
        .expect("loop ok");

        let first = read_line_message(&mut server).await.expect("read");
        let second = read_line_message(&mut server).await.expect("read");
        assert_eq!(first.as_deref(), Some("select * from t"));
        assert_eq!(second.as_deref(), Some("!nodes"));
    }
}
