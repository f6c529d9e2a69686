//! Stdin command parsing.

use thiserror::Error;

/// Errors for malformed command lines.
#[derive(Debug, Error, PartialEq)]
pub enum CommandError {
    #[error("Unknown command: {0} (try `help`)")]
    Unknown(String),
    #[error("Usage: {0}")]
    Usage(&'static str),
    #[error("Not a number: {0}")]
    BadNumber(String),
}

const CURSOR_USAGE: &str = "cursor X Y";
const TEXT_USAGE: &str = "text [--id ID] X Y TEXT...";

/// One line of user input.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Cursor { x: f64, y: f64 },
    Text { id: Option<String>, x: f64, y: f64, text: String },
    Connect { url: Option<String> },
    Disconnect,
    State,
    Status,
    Help,
    Quit,
}

pub const HELP: &str = "\
commands:
  cursor X Y              move the local cursor (throttled)
  text [--id ID] X Y TEXT...
                          create or edit a text element (new id if omitted)
  connect [URL]           (re)connect, to URL or the startup address
  disconnect              close the connection
  state                   print the current canvas as JSON
  status                  print the connection status
  help                    show this message
  quit                    disconnect and exit";

fn number(token: &str) -> Result<f64, CommandError> {
    match token.parse::<f64>() {
        Ok(value) if value.is_finite() => Ok(value),
        _ => Err(CommandError::BadNumber(token.to_string())),
    }
}

impl Command {
    /// Parse a line. Blank lines yield `None`.
    pub fn parse(line: &str) -> Result<Option<Command>, CommandError> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let Some((&name, rest)) = tokens.split_first() else {
            return Ok(None);
        };

        let command = match name {
            "cursor" => match rest {
                [x, y] => Command::Cursor {
                    x: number(x)?,
                    y: number(y)?,
                },
                _ => return Err(CommandError::Usage(CURSOR_USAGE)),
            },
            "text" => {
                let (id, rest) = match rest {
                    ["--id", id, rest @ ..] => (Some(id.to_string()), rest),
                    ["--id"] => return Err(CommandError::Usage(TEXT_USAGE)),
                    _ => (None, rest),
                };
                match rest {
                    [x, y, words @ ..] if !words.is_empty() => Command::Text {
                        id,
                        x: number(x)?,
                        y: number(y)?,
                        text: words.join(" "),
                    },
                    _ => return Err(CommandError::Usage(TEXT_USAGE)),
                }
            }
            "connect" => match rest {
                [] => Command::Connect { url: None },
                [url] => Command::Connect {
                    url: Some(url.to_string()),
                },
                _ => return Err(CommandError::Usage("connect [URL]")),
            },
            "disconnect" => Command::Disconnect,
            "state" => Command::State,
            "status" => Command::Status,
            "help" | "?" => Command::Help,
            "quit" | "exit" => Command::Quit,
            other => return Err(CommandError::Unknown(other.to_string())),
        };
        Ok(Some(command))
    }
}
