//! Interactive operator shell
//!
//! Reads one command per line from stdin and drives the local replica.

use consensus::{PeerId, Replica};
use std::io::{self, Write};
use std::net::{IpAddr, SocketAddr};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

const HELP: &str = "\
Commands:
  add <id> <host:port|port>  connect to a peer
  submit <data...>           propose an entry (primary only)
  print                      print the local ledger
  peers                      show view, primary and known peers
  byzantine                  toggle corrupted votes
  view-change                vote to move to the next view
  help                       show this message
  exit                       stop the node";

/// Shell input errors
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ParseError {
    #[error("Unknown command '{0}'; type 'help' for a list")]
    Unknown(String),

    #[error("Usage: {0}")]
    Usage(&'static str),

    #[error("Invalid peer id '{0}'")]
    InvalidId(String),

    #[error("Invalid address '{0}'")]
    InvalidAddress(String),
}

/// One parsed shell line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Add { id: PeerId, addr: SocketAddr },
    Submit(String),
    Print,
    Peers,
    Byzantine,
    ViewChange,
    Help,
    Exit,
}

impl Command {
    /// Parse a non-empty line. A bare port in `add` resolves against
    /// `default_host`.
    pub fn parse(line: &str, default_host: IpAddr) -> Result<Self, ParseError> {
        let line = line.trim();
        let (word, rest) = line
            .split_once(char::is_whitespace)
            .map(|(w, r)| (w, r.trim()))
            .unwrap_or((line, ""));

        match word.to_ascii_lowercase().as_str() {
            "add" => {
                let mut args = rest.split_whitespace();
                let (Some(id), Some(target), None) = (args.next(), args.next(), args.next()) else {
                    return Err(ParseError::Usage("add <id> <host:port|port>"));
                };
                let id = id
                    .parse::<u64>()
                    .map(PeerId)
                    .map_err(|_| ParseError::InvalidId(id.to_string()))?;
                let addr = parse_target(target, default_host)?;
                Ok(Command::Add { id, addr })
            }
            "submit" if rest.is_empty() => Err(ParseError::Usage("submit <data...>")),
            "submit" => Ok(Command::Submit(rest.to_string())),
            "print" => Ok(Command::Print),
            "peers" => Ok(Command::Peers),
            "byzantine" => Ok(Command::Byzantine),
            "view-change" => Ok(Command::ViewChange),
            "help" | "?" => Ok(Command::Help),
            "exit" | "quit" => Ok(Command::Exit),
            other => Err(ParseError::Unknown(other.to_string())),
        }
    }
}

fn parse_target(target: &str, default_host: IpAddr) -> Result<SocketAddr, ParseError> {
    if let Ok(port) = target.parse::<u16>() {
        return Ok(SocketAddr::new(default_host, port));
    }
    target
        .parse::<SocketAddr>()
        .map_err(|_| ParseError::InvalidAddress(target.to_string()))
}

/// Run until `exit`, Ctrl+C, or Ctrl+C after stdin closes
pub async fn run(replica: &Replica, default_host: IpAddr) -> io::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    println!("{}", HELP);

    loop {
        print!("peer {}> ", replica.id());
        io::stdout().flush()?;

        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C");
                break;
            }
        };
        let Some(line) = line else {
            info!("stdin closed; press Ctrl+C to stop");
            tokio::signal::ctrl_c().await?;
            break;
        };
        if line.trim().is_empty() {
            continue;
        }

        match Command::parse(&line, default_host) {
            Ok(Command::Exit) => break,
            Ok(command) => execute(replica, command).await,
            Err(e) => println!("{}", e),
        }
    }
    Ok(())
}

async fn execute(replica: &Replica, command: Command) {
    match command {
        Command::Add { id, addr } => match replica.connect_peer(id, addr).await {
            Ok(()) => println!("Connected to peer {} at {}", id, addr),
            Err(e) => println!("Failed to connect to peer {}: {}", id, e),
        },
        Command::Submit(data) => match replica.propose_block(data.into_bytes()).await {
            Ok(entry) => println!("Proposed entry {} ({})", entry.sequence_index, entry.digest),
            Err(e) => println!("Submission rejected: {}", e),
        },
        Command::Print => match replica.ledger().await {
            Some(ledger) => println!("{}", ledger),
            None => println!("Ledger not initialized"),
        },
        Command::Peers => {
            println!(
                "view {} | primary {} | n = {}",
                replica.view().await,
                replica.primary().await,
                replica.n().await
            );
            for (id, addr) in replica.peers().await {
                println!("  peer {} at {}", id, addr);
            }
        }
        Command::Byzantine => {
            let byzantine = !replica.is_byzantine().await;
            replica.set_byzantine(byzantine).await;
            println!("Byzantine mode {}", if byzantine { "on" } else { "off" });
        }
        Command::ViewChange => {
            let view = replica.request_view_change().await;
            println!("Requested view {}", view);
        }
        Command::Help => println!("{}", HELP),
        Command::Exit => {}
    }
}
