//! UCI command parsing.

/// Commands sent from GUI to engine. Command words are matched
/// case-insensitively; unknown input becomes [`GuiCommand::Unknown`] so the
/// engine can log and carry on (the protocol forbids aborting).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuiCommand {
    /// Initialize UCI mode.
    Uci,
    /// Check if the engine is ready.
    IsReady,
    /// Forget everything learned from previous games.
    NewGame,
    /// Configure an option.
    SetOption { name: String, value: Option<String> },
    /// Set up a position.
    Position {
        fen: Option<String>,
        moves: Vec<String>,
    },
    /// Start calculating.
    Go(GoOptions),
    /// Stop calculating; `bestmove` must still follow.
    Stop,
    /// The pondered-on move was played.
    PonderHit,
    /// Quit the engine.
    Quit,
    /// Debug: run the built-in benchmark.
    Bench { depth: Option<i32> },
    /// Debug: print the board.
    Display,
    /// Debug: print the static evaluation.
    Eval,
    /// Debug: run perft to the given depth.
    Perft { depth: u32 },
    /// Debug: list the legal moves.
    Moves,
    /// Anything unparseable (kept for a diagnostic).
    Unknown(String),
}

/// Parameters of the `go` command.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GoOptions {
    /// Search exactly this long, in milliseconds.
    pub movetime: Option<u64>,
    /// Search to this depth.
    pub depth: Option<i32>,
    /// Search this many nodes.
    pub nodes: Option<u64>,
    /// White/Black clock and increment, in milliseconds.
    pub wtime: Option<u64>,
    pub btime: Option<u64>,
    pub winc: Option<u64>,
    pub binc: Option<u64>,
    /// Moves to the next time control.
    pub movestogo: Option<u32>,
    /// Search until `stop`.
    pub infinite: bool,
    /// Search in ponder mode.
    pub ponder: bool,
    /// Restrict the root to these moves.
    pub searchmoves: Vec<String>,
}

impl GuiCommand {
    /// Parses one line of GUI input.
    pub fn parse(input: &str) -> Self {
        let input = input.trim();
        let mut parts = input.split_whitespace();
        let cmd = parts.next().unwrap_or("").to_ascii_lowercase();

        match cmd.as_str() {
            "uci" => GuiCommand::Uci,
            "isready" => GuiCommand::IsReady,
            "ucinewgame" => GuiCommand::NewGame,
            "setoption" => Self::parse_setoption(parts),
            "position" => Self::parse_position(parts),
            "go" => Self::parse_go(parts),
            "stop" => GuiCommand::Stop,
            "ponderhit" => GuiCommand::PonderHit,
            "quit" => GuiCommand::Quit,
            "bench" => GuiCommand::Bench {
                depth: parts.next().and_then(|s| s.parse().ok()),
            },
            "d" => GuiCommand::Display,
            "eval" => GuiCommand::Eval,
            "perft" => GuiCommand::Perft {
                depth: parts.next().and_then(|s| s.parse().ok()).unwrap_or(1),
            },
            "moves" => GuiCommand::Moves,
            _ => GuiCommand::Unknown(input.to_string()),
        }
    }

    /// `setoption name <tokens...> [value <tokens...>]`. Option names may
    /// contain spaces, so everything between `name` and `value` belongs to
    /// the name.
    fn parse_setoption<'a>(parts: impl Iterator<Item = &'a str>) -> Self {
        #[derive(PartialEq)]
        enum Target {
            Skip,
            Name,
            Value,
        }

        let mut name_tokens: Vec<&str> = Vec::new();
        let mut value_tokens: Vec<&str> = Vec::new();
        let mut target = Target::Skip;

        for token in parts {
            match token.to_ascii_lowercase().as_str() {
                "name" if target == Target::Skip => target = Target::Name,
                "value" if target != Target::Value => target = Target::Value,
                _ => match target {
                    Target::Name => name_tokens.push(token),
                    Target::Value => value_tokens.push(token),
                    Target::Skip => {}
                },
            }
        }

        let name = name_tokens.join(" ");
        if name.is_empty() {
            return GuiCommand::Unknown("setoption without a name".to_string());
        }
        let value = if value_tokens.is_empty() {
            None
        } else {
            Some(value_tokens.join(" "))
        };
        GuiCommand::SetOption { name, value }
    }

    fn parse_position<'a>(mut parts: impl Iterator<Item = &'a str>) -> Self {
        let mut fen = None;

        match parts.next().map(|s| s.to_ascii_lowercase()) {
            Some(ref s) if s == "startpos" => {}
            Some(ref s) if s == "fen" => {
                let mut fen_parts = Vec::new();
                for part in parts.by_ref() {
                    if part.eq_ignore_ascii_case("moves") {
                        let moves = parts.map(str::to_string).collect();
                        return GuiCommand::Position {
                            fen: Some(fen_parts.join(" ")),
                            moves,
                        };
                    }
                    fen_parts.push(part);
                }
                fen = Some(fen_parts.join(" "));
            }
            other => {
                return GuiCommand::Unknown(format!(
                    "position expects 'startpos' or 'fen', got {other:?}"
                ));
            }
        }

        // startpos case: skip to "moves" if present.
        let rest: Vec<&str> = parts.collect();
        let moves = match rest.iter().position(|s| s.eq_ignore_ascii_case("moves")) {
            Some(idx) => rest[idx + 1..].iter().map(|s| s.to_string()).collect(),
            None => Vec::new(),
        };
        GuiCommand::Position { fen, moves }
    }

    fn parse_go<'a>(parts: impl Iterator<Item = &'a str>) -> Self {
        let mut opts = GoOptions::default();
        let tokens: Vec<&str> = parts.collect();
        let mut i = 0;

        fn next_num<T: std::str::FromStr>(tokens: &[&str], i: &mut usize) -> Option<T> {
            *i += 1;
            tokens.get(*i).and_then(|s| s.parse().ok())
        }

        while i < tokens.len() {
            match tokens[i].to_ascii_lowercase().as_str() {
                "movetime" => opts.movetime = next_num(&tokens, &mut i),
                "depth" => opts.depth = next_num(&tokens, &mut i),
                "nodes" => opts.nodes = next_num(&tokens, &mut i),
                "wtime" => opts.wtime = next_num(&tokens, &mut i),
                "btime" => opts.btime = next_num(&tokens, &mut i),
                "winc" => opts.winc = next_num(&tokens, &mut i),
                "binc" => opts.binc = next_num(&tokens, &mut i),
                "movestogo" => opts.movestogo = next_num(&tokens, &mut i),
                "infinite" => opts.infinite = true,
                "ponder" => opts.ponder = true,
                "searchmoves" => {
                    // Everything after searchmoves that looks like a move.
                    while i + 1 < tokens.len() && looks_like_move(tokens[i + 1]) {
                        i += 1;
                        opts.searchmoves.push(tokens[i].to_string());
                    }
                }
                _ => {}
            }
            i += 1;
        }

        GuiCommand::Go(opts)
    }
}

/// Coordinate-notation shape check: files a-h, ranks 1-8, optional
/// promotion letter.
fn looks_like_move(s: &str) -> bool {
    let b = s.as_bytes();
    (4..=5).contains(&b.len())
        && b[0].is_ascii_lowercase()
        && (b'a'..=b'h').contains(&b[0])
        && (b'1'..=b'8').contains(&b[1])
        && (b'a'..=b'h').contains(&b[2])
        && (b'1'..=b'8').contains(&b[3])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_basic_commands() {
        assert_eq!(GuiCommand::parse("uci"), GuiCommand::Uci);
        assert_eq!(GuiCommand::parse("  isready "), GuiCommand::IsReady);
        assert_eq!(GuiCommand::parse("ucinewgame"), GuiCommand::NewGame);
        assert_eq!(GuiCommand::parse("stop"), GuiCommand::Stop);
        assert_eq!(GuiCommand::parse("quit"), GuiCommand::Quit);
        // Case-insensitive command words.
        assert_eq!(GuiCommand::parse("UCI"), GuiCommand::Uci);
        assert_eq!(GuiCommand::parse("IsReady"), GuiCommand::IsReady);
    }

    #[test]
    fn parse_setoption_with_value() {
        let cmd = GuiCommand::parse("setoption name Hash value 128");
        assert_eq!(
            cmd,
            GuiCommand::SetOption {
                name: "Hash".into(),
                value: Some("128".into())
            }
        );
    }

    #[test]
    fn parse_setoption_spaced_name() {
        let cmd = GuiCommand::parse("setoption name Move Overhead value 42");
        assert_eq!(
            cmd,
            GuiCommand::SetOption {
                name: "Move Overhead".into(),
                value: Some("42".into())
            }
        );
    }

    #[test]
    fn parse_setoption_button_style() {
        let cmd = GuiCommand::parse("setoption name Clear Hash");
        assert_eq!(
            cmd,
            GuiCommand::SetOption {
                name: "Clear Hash".into(),
                value: None
            }
        );
    }

    #[test]
    fn parse_position_startpos_with_moves() {
        let cmd = GuiCommand::parse("position startpos moves e2e4 e7e5");
        assert_eq!(
            cmd,
            GuiCommand::Position {
                fen: None,
                moves: vec!["e2e4".into(), "e7e5".into()]
            }
        );
    }

    #[test]
    fn parse_position_fen_with_moves() {
        let fen = "rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR b KQkq e3 0 1";
        let cmd = GuiCommand::parse(&format!("position fen {fen} moves e7e5"));
        assert_eq!(
            cmd,
            GuiCommand::Position {
                fen: Some(fen.into()),
                moves: vec!["e7e5".into()]
            }
        );
    }

    #[test]
    fn parse_go_clock() {
        let cmd =
            GuiCommand::parse("go wtime 300000 btime 300000 winc 2000 binc 2000 movestogo 40");
        let GuiCommand::Go(opts) = cmd else {
            panic!("expected go");
        };
        assert_eq!(opts.wtime, Some(300_000));
        assert_eq!(opts.btime, Some(300_000));
        assert_eq!(opts.winc, Some(2000));
        assert_eq!(opts.binc, Some(2000));
        assert_eq!(opts.movestogo, Some(40));
        assert!(!opts.infinite);
    }

    #[test]
    fn parse_go_searchmoves() {
        let cmd = GuiCommand::parse("go depth 10 searchmoves e2e4 d2d4");
        let GuiCommand::Go(opts) = cmd else {
            panic!("expected go");
        };
        assert_eq!(opts.depth, Some(10));
        assert_eq!(opts.searchmoves, vec!["e2e4", "d2d4"]);
    }

    #[test]
    fn parse_go_nodes_and_infinite() {
        let GuiCommand::Go(opts) = GuiCommand::parse("go nodes 5000 infinite") else {
            panic!("expected go");
        };
        assert_eq!(opts.nodes, Some(5000));
        assert!(opts.infinite);
    }

    #[test]
    fn parse_debug_commands() {
        assert_eq!(GuiCommand::parse("d"), GuiCommand::Display);
        assert_eq!(GuiCommand::parse("eval"), GuiCommand::Eval);
        assert_eq!(GuiCommand::parse("perft 5"), GuiCommand::Perft { depth: 5 });
        assert_eq!(GuiCommand::parse("moves"), GuiCommand::Moves);
        assert_eq!(GuiCommand::parse("bench"), GuiCommand::Bench { depth: None });
        assert_eq!(
            GuiCommand::parse("bench 8"),
            GuiCommand::Bench { depth: Some(8) }
        );
    }

    #[test]
    fn unknown_commands_are_preserved() {
        assert!(matches!(
            GuiCommand::parse("xyzzy something"),
            GuiCommand::Unknown(_)
        ));
    }
}
