use std::{net::SocketAddr, path::PathBuf};

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the relay server, fanning each message out to every other peer.
    Server(ServerArgs),
    /// Connect to a relay server and chat from the terminal.
    Client(ClientArgs),
    /// Chat with other processes on this host through the shared-memory
    /// mailbox; no server involved.
    Mailbox(MailboxArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ServerArgs {
    /// Socket address the relay should bind to. Use port 0 for an ephemeral
    /// port.
    #[arg(long, default_value = "127.0.0.1:60000")]
    pub listen: SocketAddr,
}

#[derive(Args, Debug, Clone)]
pub struct ClientArgs {
    /// Participant name prepended to every message you send.
    #[arg(long)]
    pub name: String,

    /// Address of the relay server to connect to.
    #[arg(long, default_value = "127.0.0.1:60000")]
    pub server: SocketAddr,
}

#[derive(Args, Debug, Clone)]
pub struct MailboxArgs {
    /// Participant name; your own published messages are not echoed back.
    #[arg(long)]
    pub name: String,

    /// Path of the shared segment file. Defaults to a well-known path under
    /// the temp directory so participants find each other without
    /// coordination.
    #[arg(long)]
    pub segment: Option<PathBuf>,
}
