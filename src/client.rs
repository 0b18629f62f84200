use std::net::SocketAddr;

use anyhow::{Context, Result};
use tokio::{
    io::{self, AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    select,
};
use tracing::warn;

use crate::{
    cli::ClientArgs,
    message::{Message, read_message, write_message},
};

/// Presentation-facing handle on a relay connection: connect, send a
/// sender-tagged line, receive the next inbound message. The terminal front
/// end below drives the same halves directly so it can multiplex with stdin.
pub struct ChatClient {
    reader: OwnedReadHalf,
    writer: OwnedWriteHalf,
}

impl ChatClient {
    pub async fn connect(addr: SocketAddr) -> Result<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .with_context(|| format!("failed to connect to {addr}"))?;
        let (reader, writer) = stream.into_split();
        Ok(Self { reader, writer })
    }

    pub async fn send(&mut self, sender: &str, text: &str) -> io::Result<()> {
        write_message(&mut self.writer, &Message::new(sender, text)).await
    }

    /// `None` means the relay closed the connection.
    pub async fn recv(&mut self) -> io::Result<Option<Message>> {
        read_message(&mut self.reader).await
    }
}

/// Terminal front end: multiplex inbound messages, stdin lines, and ctrl-c.
pub async fn run(args: ClientArgs) -> Result<()> {
    let client = ChatClient::connect(args.server).await?;
    let ChatClient { mut reader, mut writer } = client;

    write_stdout(&format!("*** connected to {}", args.server)).await?;

    let mut stdin = BufReader::new(tokio::io::stdin());
    let mut input = String::new();

    loop {
        input.clear();
        select! {
            inbound = read_message(&mut reader) => {
                if !handle_inbound(inbound).await? {
                    break;
                }
            }
            bytes_read = stdin.read_line(&mut input) => {
                if !handle_stdin_input(bytes_read, &input, &args.name, &mut writer).await? {
                    break;
                }
            }
            ctrl_c = tokio::signal::ctrl_c() => {
                if let Err(error) = ctrl_c {
                    warn!(?error, "ctrl-c handler failed");
                }
                break;
            }
        }
    }

    if let Err(error) = writer.shutdown().await {
        warn!(?error, "failed to shut down client writer cleanly");
    }
    Ok(())
}

async fn handle_inbound(inbound: io::Result<Option<Message>>) -> Result<bool> {
    match inbound? {
        Some(message) => {
            write_stdout(&message.to_string()).await?;
            Ok(true)
        }
        None => {
            // Informational, not an error: the relay went away.
            write_stdout("*** disconnected from relay").await?;
            Ok(false)
        }
    }
}

async fn handle_stdin_input(
    bytes_read: io::Result<usize>,
    input: &str,
    name: &str,
    writer: &mut OwnedWriteHalf,
) -> Result<bool> {
    if bytes_read? == 0 {
        return Ok(false);
    }

    let text = input.trim_end();
    if text.is_empty() {
        return Ok(true);
    }
    if text.eq_ignore_ascii_case("/quit") {
        write_stdout("*** leaving chat").await?;
        return Ok(false);
    }

    write_message(writer, &Message::new(name, text)).await?;
    Ok(true)
}

pub(crate) async fn write_stdout(line: &str) -> io::Result<()> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(line.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await
}
