//! REPL command parsing for the interactive shell.
//!
//! Commands are case-insensitive and most have a one-letter alias. `GET @`
//! and `GET *` are shorthands for the local and global dumps.

use anyhow::{Result, anyhow};

/// Commands that can be entered at the prompt.
#[derive(Debug, PartialEq, Eq)]
pub enum ConsoleCommand {
    Put { key: String, value: String },
    Get { key: String },
    Delete { key: String },
    LocalDump,
    GlobalDump,
    Status,
    Help,
    Exit,
}

pub const HELP: &str = "\
Commands (case-insensitive):
  PUT <key> <value>  (alias: p)  -- replicate to the key's three replicas
  GET <key>          (alias: g)  -- read locally, then from replicas
  GET @                          -- same as LDUMP
  GET *                          -- same as GDUMP
  DELETE <key>       (alias: d)  -- delete from the key's replicas
  LDUMP              (alias: l)  -- list this node's records
  GDUMP              (alias: *)  -- list every node's records
  STATUS             (alias: s)  -- show ring order and liveness
  HELP               (alias: h)  -- show this message
  EXIT               (alias: e)  -- shut down this node";

impl ConsoleCommand {
    /// Parses a line of user input into a command.
    pub fn parse(line: &str) -> Result<Self> {
        let parts: Vec<&str> = line.split_whitespace().collect();
        let Some(first) = parts.first() else {
            return Err(anyhow!("empty command"));
        };

        let cmd = first.to_uppercase();
        let normalized = match cmd.as_str() {
            "P" => "PUT",
            "G" => "GET",
            "D" => "DELETE",
            "L" => "LDUMP",
            "*" => "GDUMP",
            "S" => "STATUS",
            "H" => "HELP",
            "E" => "EXIT",
            other => other,
        };

        match (normalized, parts.len()) {
            ("EXIT", 1) => Ok(ConsoleCommand::Exit),
            ("HELP", 1) => Ok(ConsoleCommand::Help),
            ("STATUS", 1) => Ok(ConsoleCommand::Status),
            ("LDUMP", 1) => Ok(ConsoleCommand::LocalDump),
            ("GDUMP", 1) => Ok(ConsoleCommand::GlobalDump),
            ("GET", 2) => Ok(match parts[1] {
                "@" => ConsoleCommand::LocalDump,
                "*" => ConsoleCommand::GlobalDump,
                key => ConsoleCommand::Get {
                    key: key.to_string(),
                },
            }),
            ("DELETE", 2) => Ok(ConsoleCommand::Delete {
                key: parts[1].to_string(),
            }),
            ("PUT", 3) => Ok(ConsoleCommand::Put {
                key: parts[1].to_string(),
                value: parts[2].to_string(),
            }),
            ("GET", _) => Err(anyhow!("GET requires exactly one argument: GET <key>")),
            ("DELETE", _) => Err(anyhow!("DELETE requires exactly one argument: DELETE <key>")),
            ("PUT", _) => Err(anyhow!("PUT requires exactly two arguments: PUT <key> <value>")),
            ("EXIT" | "HELP" | "STATUS" | "LDUMP" | "GDUMP", _) => {
                Err(anyhow!("{normalized} takes no arguments"))
            }
            _ => Err(anyhow!(
                "invalid command. Try: PUT/p <key> <value>, GET/g <key>, DELETE/d <key>, LDUMP/l, GDUMP/*, STATUS/s, HELP/h, EXIT/e"
            )),
        }
    }
}
