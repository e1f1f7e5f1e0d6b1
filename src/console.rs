// Console - Line commands for the interactive board
//
// Every line of input is either a `/command` or a post. Parsing is pure so the
// binary only has to map commands onto node calls.

use crate::transport::ConnectionId;
use thiserror::Error;

/// Help text printed by `/usage`
pub const USAGE: &str = "\
to start a session:
  board --name <name> --port <port> --file <store path> [--peer <host:port>]...
        --tout <storage timeout ms> --sendtout <message timeout ms>
commands:
  /peers                     list peers and connection ids
  /mymessages                list every stored message
  /delete <post_uuid>        delete one of your posts everywhere
  /timeout                   run the expiry sweep now
  /preservemymessages        refresh your posts on every peer
  /connect <host[:port]>     connect to another peer
  /disconnect <conn_id>      disconnect from a peer
  /sync <conn_id>            request missing messages from a peer
  /settimeout <seconds>      set the timeout of your future posts
  /usage                     show this help
  /exit                      close all connections and quit
anything else is posted";

/// Errors from parsing a console line
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConsoleError {
    #[error("Unknown command /{0}, try /usage")]
    UnknownCommand(String),

    #[error("/{0} needs an argument, try /usage")]
    MissingArgument(&'static str),

    #[error("Invalid argument for /{command}: {value}")]
    InvalidArgument {
        command: &'static str,
        value: String,
    },
}

/// One parsed console line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Exit,
    Peers,
    MyMessages,
    Usage,
    Delete(String),
    Timeout,
    Preserve,
    Connect(String),
    Disconnect(ConnectionId),
    Sync(ConnectionId),
    /// New custom timeout for future posts, in milliseconds
    SetTimeout(u64),
    Post(String),
    /// Blank input
    Empty,
}

impl Command {
    /// Parse one line of input
    pub fn parse(line: &str) -> Result<Self, ConsoleError> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(Command::Empty);
        }

        let Some(rest) = line.strip_prefix('/') else {
            return Ok(Command::Post(line.to_string()));
        };

        let (word, arg) = match rest.split_once(char::is_whitespace) {
            Some((word, arg)) => (word, Some(arg.trim()).filter(|a| !a.is_empty())),
            None => (rest, None),
        };

        match word {
            "exit" => Ok(Command::Exit),
            "peers" => Ok(Command::Peers),
            "mymessages" => Ok(Command::MyMessages),
            "usage" => Ok(Command::Usage),
            "timeout" => Ok(Command::Timeout),
            "preservemymessages" => Ok(Command::Preserve),
            "delete" => Ok(Command::Delete(required("delete", arg)?.to_string())),
            "connect" => Ok(Command::Connect(required("connect", arg)?.to_string())),
            "disconnect" => Ok(Command::Disconnect(connection_id("disconnect", arg)?)),
            "sync" => Ok(Command::Sync(connection_id("sync", arg)?)),
            "settimeout" => {
                let value = required("settimeout", arg)?;
                let seconds: u64 = value.parse().map_err(|_| ConsoleError::InvalidArgument {
                    command: "settimeout",
                    value: value.to_string(),
                })?;
                Ok(Command::SetTimeout(seconds.saturating_mul(1000)))
            }
            other => Err(ConsoleError::UnknownCommand(other.to_string())),
        }
    }
}

fn required<'a>(command: &'static str, arg: Option<&'a str>) -> Result<&'a str, ConsoleError> {
    arg.ok_or(ConsoleError::MissingArgument(command))
}

fn connection_id(command: &'static str, arg: Option<&str>) -> Result<ConnectionId, ConsoleError> {
    let value = required(command, arg)?;
    value.parse().map_err(|_| ConsoleError::InvalidArgument {
        command,
        value: value.to_string(),
    })
}
