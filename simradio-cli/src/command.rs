//! Parsing of console commands.

use simradio_core::StationId;
use thiserror::Error;

pub const HELP: &str = "\
Commands:
  list              List series and stations
  play <id>         Play a station
  pause             Pause playback
  resume            Resume the paused station
  toggle <id>       Play or pause a station
  stop              Stop playback
  download <id>     Download a station's media
  cancel <id>       Cancel a download
  state             Show playback and active downloads
  help              Show this help
  quit              Exit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    List,
    Play(StationId),
    Pause,
    Resume,
    Toggle(StationId),
    Stop,
    Download(StationId),
    Cancel(StationId),
    State,
    Help,
    Quit,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("Unknown command '{0}', type 'help' for a list")]
    UnknownCommand(String),

    #[error("'{command}' needs a station id")]
    MissingStation { command: &'static str },

    #[error("'{command}' takes no arguments")]
    UnexpectedArgument { command: &'static str },
}

impl Command {
    /// Parse one input line. Blank lines yield `None`.
    ///
    /// # Errors
    ///
    /// Returns a [`ParseError`] for unknown commands or wrong arguments.
    pub fn parse(line: &str) -> Result<Option<Self>, ParseError> {
        let mut words = line.split_whitespace();
        let Some(name) = words.next() else {
            return Ok(None);
        };
        let argument = words.next();
        if words.next().is_some() {
            return Err(ParseError::UnexpectedArgument {
                command: static_name(name),
            });
        }

        let command = match name.to_ascii_lowercase().as_str() {
            "list" | "ls" => no_argument(Self::List, "list", argument)?,
            "play" => Self::Play(station(argument, "play")?),
            "pause" => no_argument(Self::Pause, "pause", argument)?,
            "resume" => no_argument(Self::Resume, "resume", argument)?,
            "toggle" => Self::Toggle(station(argument, "toggle")?),
            "stop" => no_argument(Self::Stop, "stop", argument)?,
            "download" | "dl" => Self::Download(station(argument, "download")?),
            "cancel" => Self::Cancel(station(argument, "cancel")?),
            "state" | "status" => no_argument(Self::State, "state", argument)?,
            "help" | "?" => Self::Help,
            "quit" | "exit" | "q" => Self::Quit,
            _ => return Err(ParseError::UnknownCommand(name.to_string())),
        };
        Ok(Some(command))
    }
}

fn station(argument: Option<&str>, command: &'static str) -> Result<StationId, ParseError> {
    argument
        .map(StationId::from)
        .ok_or(ParseError::MissingStation { command })
}

fn no_argument(
    command: Command,
    name: &'static str,
    argument: Option<&str>,
) -> Result<Command, ParseError> {
    match argument {
        Some(_) => Err(ParseError::UnexpectedArgument { command: name }),
        None => Ok(command),
    }
}

fn static_name(name: &str) -> &'static str {
    match name.to_ascii_lowercase().as_str() {
        "list" | "ls" => "list",
        "play" => "play",
        "pause" => "pause",
        "resume" => "resume",
        "toggle" => "toggle",
        "stop" => "stop",
        "download" | "dl" => "download",
        "cancel" => "cancel",
        "state" | "status" => "state",
        _ => "command",
    }
}
