// lanpost: LAN messaging daemon and command line.

mod config;
mod listener;
mod node;
mod notify;
mod sender;

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use lanpost_core::{protocol, MessageKind};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::listener::Listener;
use crate::node::Node;
use crate::sender::{compose_text, Attachment, Sender};

const DEFAULT_FILTER: &str = "info,lanpost=debug,lanpost_core=debug";

#[derive(Parser, Debug)]
#[command(name = "lanpost")]
#[command(author, version, about = "Serverless messaging between devices on one LAN", long_about = None)]
struct Args {
    /// Log filter directive; RUST_LOG wins when set
    #[arg(short, long)]
    log_level: Option<String>,

    /// Read this config file instead of the default locations
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Listen for incoming messages until interrupted
    Listen,
    /// Send a text message
    Send {
        ip: String,
        #[arg(required = true, num_args = 1..)]
        text: Vec<String>,
    },
    /// Send a photo, video or voice file
    SendFile {
        ip: String,
        path: PathBuf,
        /// Media kind; inferred from the extension when omitted
        #[arg(long, value_enum)]
        kind: Option<KindArg>,
    },
    /// Manage saved contacts
    #[command(subcommand)]
    Contacts(ContactsCommand),
    /// Show or clear the conversation with a peer
    #[command(subcommand)]
    History(HistoryCommand),
    /// Print this device's LAN address
    Whoami,
}

#[derive(Subcommand, Debug)]
enum ContactsCommand {
    List,
    Add {
        ip: String,
        #[arg(default_value = "")]
        name: String,
    },
    Rename { ip: String, name: String },
    /// Delete a contact by id, together with its history
    Delete { id: String },
}

#[derive(Subcommand, Debug)]
enum HistoryCommand {
    Show { ip: String },
    Clear { ip: String },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum KindArg {
    Image,
    Video,
    Audio,
}

impl From<KindArg> for MessageKind {
    fn from(k: KindArg) -> Self {
        match k {
            KindArg::Image => MessageKind::Image,
            KindArg::Video => MessageKind::Video,
            KindArg::Audio => MessageKind::Audio,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.log_level.as_deref());

    let cfg = match &args.config {
        Some(path) => config::load_path(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => config::load(),
    };
    let node = Node::open(cfg).await?;

    match args.command {
        Command::Listen => listen(node).await,
        Command::Send { ip, text } => {
            let Some(envelope) = compose_text(&text.join(" ")) else {
                bail!("message is empty");
            };
            Sender::new(node).send(&ip, envelope).await?;
            Ok(())
        }
        Command::SendFile { ip, path, kind } => {
            let max = node.config.max_attachment_bytes;
            let attachment = Attachment::load(&path, kind.map(Into::into), max).await?;
            info!(kind = %attachment.kind, size = attachment.size, "attachment loaded");
            Sender::new(node).send(&ip, attachment.into_envelope()).await?;
            Ok(())
        }
        Command::Contacts(cmd) => contacts(node, cmd).await,
        Command::History(cmd) => history(node, cmd).await,
        Command::Whoami => {
            println!("{}", local_ip().await?);
            Ok(())
        }
    }
}

fn init_logging(directive: Option<&str>) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(directive.unwrap_or(DEFAULT_FILTER)));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn listen(node: Node) -> Result<()> {
    let addr = node.config.listen_addr();
    let listener = Listener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tokio::select! {
        _ = listener.run(node) => {}
        r = shutdown_signal() => r?,
    }
    info!("shutting down");
    Ok(())
}

async fn contacts(node: Node, cmd: ContactsCommand) -> Result<()> {
    match cmd {
        ContactsCommand::List => {
            for c in node.contacts.list().await? {
                println!("{}\t{}\t{}", c.id, c.ip, c.name);
            }
        }
        ContactsCommand::Add { ip, name } => {
            let c = node.contacts.add(&name, &ip).await?;
            println!("{}\t{}\t{}", c.id, c.ip, c.name);
        }
        ContactsCommand::Rename { ip, name } => {
            let c = node.contacts.rename(&ip, &name).await?;
            println!("{}\t{}\t{}", c.id, c.ip, c.name);
        }
        ContactsCommand::Delete { id } => {
            if !node.contacts.delete(&id).await? {
                bail!("no contact with id {id}");
            }
        }
    }
    Ok(())
}

async fn history(node: Node, cmd: HistoryCommand) -> Result<()> {
    match cmd {
        HistoryCommand::Show { ip } => {
            let ip = lanpost_core::normalize_peer_ip(&ip);
            let name = node
                .contacts
                .find_by_ip(&ip)
                .await?
                .map(|c| c.name)
                .unwrap_or_else(|| ip.clone());
            for m in node.history.load(&ip).await? {
                let who = match m.sender {
                    protocol::Sender::Me => "me",
                    protocol::Sender::Other => name.as_str(),
                };
                let when = m.timestamp.format("%Y-%m-%d %H:%M:%S");
                match m.kind {
                    MessageKind::Text => println!("[{when}] {who}: {}", m.content),
                    kind => println!("[{when}] {who}: <{kind}> {}", m.content),
                }
            }
        }
        HistoryCommand::Clear { ip } => {
            node.history.clear(&lanpost_core::normalize_peer_ip(&ip)).await?;
        }
    }
    Ok(())
}

/// Address of the interface that routes off-host. Connecting a UDP socket sends nothing.
async fn local_ip() -> Result<std::net::IpAddr> {
    let socket = tokio::net::UdpSocket::bind("0.0.0.0:0").await?;
    socket
        .connect("8.8.8.8:80")
        .await
        .context("no route off this host; is the network up?")?;
    Ok(socket.local_addr()?.ip())
}

/// Wait for Ctrl+C or SIGTERM (Unix).
async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }
    Ok(())
}
