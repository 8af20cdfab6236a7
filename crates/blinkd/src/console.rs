//! Line-oriented operator console on stdin.
//!
//! One command per line; results go to stderr so stdout stays a clean
//! stream of JSON event lines.

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, BufReader};

use blink_core::{Identity, PeerHash};

use crate::engine::Engine;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Chat { to: PeerHash, text: String },
    Match(PeerHash),
    Accept(PeerHash),
    Reject(PeerHash),
    Unmatch(PeerHash),
    Block(PeerHash),
    Visible(bool),
    Name(String),
    Peers,
    Help,
    Quit,
}

/// Why the console stopped reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleExit {
    Quit,
    /// stdin closed; the daemon keeps running.
    Eof,
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("unknown command: {0}")]
    Unknown(String),

    #[error("{0}: missing argument")]
    Missing(&'static str),

    #[error("not a peer hash: {0}")]
    BadPeer(String),

    #[error("expected on/off, got {0}")]
    BadFlag(String),
}

/// Parse one console line. Blank lines yield `None`.
pub fn parse(line: &str) -> Result<Option<ConsoleCommand>, ParseError> {
    let line = line.trim();
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };

    let command = match (word, rest) {
        ("", _) => return Ok(None),
        ("chat", rest) => {
            let (peer, text) = rest.split_once(char::is_whitespace).ok_or(ParseError::Missing("chat"))?;
            ConsoleCommand::Chat {
                to: peer_arg(peer)?,
                text: text.trim().to_string(),
            }
        }
        ("match", peer) => ConsoleCommand::Match(required_peer("match", peer)?),
        ("accept", peer) => ConsoleCommand::Accept(required_peer("accept", peer)?),
        ("reject", peer) => ConsoleCommand::Reject(required_peer("reject", peer)?),
        ("unmatch", peer) => ConsoleCommand::Unmatch(required_peer("unmatch", peer)?),
        ("block", peer) => ConsoleCommand::Block(required_peer("block", peer)?),
        ("visible", "on") => ConsoleCommand::Visible(true),
        ("visible", "off") => ConsoleCommand::Visible(false),
        ("visible", "") => return Err(ParseError::Missing("visible")),
        ("visible", other) => return Err(ParseError::BadFlag(other.to_string())),
        ("name", "") => return Err(ParseError::Missing("name")),
        ("name", name) => ConsoleCommand::Name(name.to_string()),
        ("peers", _) => ConsoleCommand::Peers,
        ("help", _) | ("?", _) => ConsoleCommand::Help,
        ("quit", _) | ("exit", _) => ConsoleCommand::Quit,
        (other, _) => return Err(ParseError::Unknown(other.to_string())),
    };
    Ok(Some(command))
}

fn required_peer(command: &'static str, arg: &str) -> Result<PeerHash, ParseError> {
    if arg.is_empty() {
        return Err(ParseError::Missing(command));
    }
    peer_arg(arg)
}

fn peer_arg(arg: &str) -> Result<PeerHash, ParseError> {
    arg.parse().map_err(|_| ParseError::BadPeer(arg.to_string()))
}

fn print_usage() {
    eprintln!("commands:");
    eprintln!("  peers                   list nearby peers");
    eprintln!("  chat <peer> <text>      send a chat message");
    eprintln!("  match <peer>            send a match request");
    eprintln!("  accept <peer>           accept a match request");
    eprintln!("  reject <peer>           reject a match request");
    eprintln!("  unmatch <peer>          end a match");
    eprintln!("  block <peer>            block a peer");
    eprintln!("  visible on|off          toggle presence");
    eprintln!("  name <display name>     change display name");
    eprintln!("  quit");
}

/// Read commands from stdin until EOF or `quit`.
pub async fn run(engine: Engine, mut identity: Identity) -> Result<ConsoleExit> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        let command = match parse(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(e) => {
                eprintln!("{e}");
                continue;
            }
        };

        let result = match command {
            ConsoleCommand::Chat { to, text } => engine.send_chat(to, text).await,
            ConsoleCommand::Match(peer) => engine.send_match_request(peer).await,
            ConsoleCommand::Accept(peer) => engine.respond_to_match(peer, true).await,
            ConsoleCommand::Reject(peer) => engine.respond_to_match(peer, false).await,
            ConsoleCommand::Unmatch(peer) => engine.send_unmatch(peer).await,
            ConsoleCommand::Block(peer) => engine.send_block(peer).await,
            ConsoleCommand::Visible(visible) => engine.set_visibility(visible),
            ConsoleCommand::Name(name) => {
                identity.display_name = name;
                engine.set_identity(&identity).await
            }
            ConsoleCommand::Peers => {
                let mut peers = engine.peers().snapshot();
                peers.sort_by_key(|peer| peer.hash);
                eprintln!("{} peer(s)", peers.len());
                for peer in peers {
                    eprintln!(
                        "  {}  {:<10}  {:?}  rssi {}  seen {}s ago",
                        peer.hash,
                        peer.display_name,
                        peer.gender,
                        peer.signal_strength
                            .map(|s| s.to_string())
                            .unwrap_or_else(|| "-".into()),
                        peer.last_seen_at.elapsed().as_secs()
                    );
                }
                Ok(())
            }
            ConsoleCommand::Help => {
                print_usage();
                Ok(())
            }
            ConsoleCommand::Quit => return Ok(ConsoleExit::Quit),
        };

        if let Err(e) = result {
            eprintln!("error: {e}");
        }
    }

    Ok(ConsoleExit::Eof)
}
