//! UCI (Universal Chess Interface) protocol types.
//!
//! This crate owns the text protocol and nothing else: parsing GUI
//! commands, formatting engine replies, and the option registry. The
//! engine proper never sees a protocol string.
//!
//! # Standard commands
//!
//! - `uci` - identify, list options, `uciok`
//! - `isready` / `readyok` - synchronisation
//! - `setoption name <N> [value <V>]` - configure
//! - `ucinewgame` - reset engine state
//! - `position (startpos | fen <fen>) [moves <move>...]`
//! - `go [depth|nodes|movetime|clock fields|infinite] [searchmoves ...]`
//! - `stop`, `quit`
//!
//! Debug commands (`bench`, `d`, `eval`, `perft`, `moves`) are parsed here
//! too; the engine front-end decides what to do with them.

mod command;
mod info;
mod options;

pub use command::{GoOptions, GuiCommand};
pub use info::EngineInfo;
pub use options::{EngineOptions, OptionError, UciOptionDef, UciOptionKind, OPTION_REGISTRY};

use std::io::{BufRead, Write};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum UciError {
    #[error("invalid command: {0}")]
    InvalidCommand(String),
    #[error("parse error: {0}")]
    ParseError(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Messages sent from engine to GUI.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineMessage {
    Id { name: String, author: String },
    Option(String),
    UciOk,
    ReadyOk,
    Info(EngineInfo),
    BestMove { mv: String, ponder: Option<String> },
}

impl EngineMessage {
    /// Formats the message for the wire.
    pub fn to_uci(&self) -> String {
        match self {
            EngineMessage::Id { name, author } => {
                format!("id name {name}\nid author {author}")
            }
            EngineMessage::Option(line) => line.clone(),
            EngineMessage::UciOk => "uciok".to_string(),
            EngineMessage::ReadyOk => "readyok".to_string(),
            EngineMessage::Info(info) => info.to_uci(),
            EngineMessage::BestMove { mv, ponder } => match ponder {
                Some(p) => format!("bestmove {mv} ponder {p}"),
                None => format!("bestmove {mv}"),
            },
        }
    }
}

/// Line-based UCI transport over any reader/writer pair.
pub struct UciStream<R: BufRead, W: Write> {
    reader: R,
    writer: W,
}

impl<R: BufRead, W: Write> UciStream<R, W> {
    pub fn new(reader: R, writer: W) -> Self {
        Self { reader, writer }
    }

    /// Reads and parses the next command. Returns `None` on EOF.
    pub fn read_command(&mut self) -> Result<Option<GuiCommand>, UciError> {
        let mut line = String::new();
        if self.reader.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        Ok(Some(GuiCommand::parse(&line)))
    }

    /// Sends one message, flushed immediately.
    pub fn send(&mut self, msg: &EngineMessage) -> Result<(), UciError> {
        writeln!(self.writer, "{}", msg.to_uci())?;
        self.writer.flush()?;
        Ok(())
    }
}

/// A UCI stream over stdin/stdout.
pub fn stdio_stream() -> UciStream<std::io::BufReader<std::io::Stdin>, std::io::Stdout> {
    UciStream::new(std::io::BufReader::new(std::io::stdin()), std::io::stdout())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bestmove_formatting() {
        let msg = EngineMessage::BestMove {
            mv: "e2e4".into(),
            ponder: None,
        };
        assert_eq!(msg.to_uci(), "bestmove e2e4");

        let msg = EngineMessage::BestMove {
            mv: "e2e4".into(),
            ponder: Some("e7e5".into()),
        };
        assert_eq!(msg.to_uci(), "bestmove e2e4 ponder e7e5");
    }

    #[test]
    fn id_formatting() {
        let msg = EngineMessage::Id {
            name: "Tessera".into(),
            author: "the Tessera developers".into(),
        };
        let out = msg.to_uci();
        assert!(out.starts_with("id name Tessera\n"));
        assert!(out.contains("id author"));
    }

    #[test]
    fn stream_roundtrip() {
        let input = b"uci\nisready\n" as &[u8];
        let mut output = Vec::new();
        let mut stream = UciStream::new(input, &mut output);
        assert_eq!(stream.read_command().unwrap(), Some(GuiCommand::Uci));
        assert_eq!(stream.read_command().unwrap(), Some(GuiCommand::IsReady));
        assert_eq!(stream.read_command().unwrap(), None);

        stream.send(&EngineMessage::UciOk).unwrap();
        drop(stream);
        assert_eq!(output, b"uciok\n");
    }
}
