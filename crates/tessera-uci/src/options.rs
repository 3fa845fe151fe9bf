//! The engine option registry.
//!
//! Options are declared once in [`OPTION_REGISTRY`]; parsing, range
//! clamping and the `option ...` lines for the `uci` handshake all derive
//! from it. [`EngineOptions`] holds the current values - applying them
//! (resizing the hash, reloading the network) is the front-end's job.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum OptionError {
    #[error("unknown option '{0}'")]
    Unknown(String),
    #[error("option '{name}' expects {expected}, got '{got}'")]
    BadValue {
        name: String,
        expected: &'static str,
        got: String,
    },
    #[error("option '{name}' value {value} is outside {min}..={max}")]
    OutOfRange {
        name: String,
        value: i64,
        min: i64,
        max: i64,
    },
}

/// The three option shapes Tessera exposes.
#[derive(Debug, Clone, Copy)]
pub enum UciOptionKind {
    Spin { default: i64, min: i64, max: i64 },
    Check { default: bool },
    Text { default: &'static str },
}

/// One registered option.
pub struct UciOptionDef {
    pub name: &'static str,
    pub kind: UciOptionKind,
}

/// Every option the engine announces, in handshake order.
pub const OPTION_REGISTRY: &[UciOptionDef] = &[
    UciOptionDef {
        name: "Hash",
        kind: UciOptionKind::Spin {
            default: 16,
            min: 1,
            max: 131_072,
        },
    },
    UciOptionDef {
        name: "Threads",
        kind: UciOptionKind::Spin {
            default: 1,
            min: 1,
            max: 2048,
        },
    },
    UciOptionDef {
        name: "MultiPV",
        kind: UciOptionKind::Spin {
            default: 1,
            min: 1,
            max: 256,
        },
    },
    UciOptionDef {
        name: "UCI_Chess960",
        kind: UciOptionKind::Check { default: false },
    },
    UciOptionDef {
        name: "UCI_ShowWDL",
        kind: UciOptionKind::Check { default: false },
    },
    UciOptionDef {
        name: "MoveOverhead",
        kind: UciOptionKind::Spin {
            default: 10,
            min: 0,
            max: 50_000,
        },
    },
    UciOptionDef {
        name: "Contempt",
        kind: UciOptionKind::Spin {
            default: 0,
            min: -1000,
            max: 1000,
        },
    },
    UciOptionDef {
        name: "EvalFile",
        kind: UciOptionKind::Text {
            default: "<builtin>",
        },
    },
    UciOptionDef {
        name: "SyzygyPath",
        kind: UciOptionKind::Text { default: "<empty>" },
    },
    UciOptionDef {
        name: "SyzygyProbeDepth",
        kind: UciOptionKind::Spin {
            default: 1,
            min: 1,
            max: 100,
        },
    },
    UciOptionDef {
        name: "SyzygyProbeLimit",
        kind: UciOptionKind::Spin {
            default: 7,
            min: 0,
            max: 7,
        },
    },
    UciOptionDef {
        name: "SyzygyProbeRoot",
        kind: UciOptionKind::Check { default: true },
    },
];

/// Current option values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineOptions {
    pub hash_mb: usize,
    pub threads: usize,
    pub multipv: usize,
    pub chess960: bool,
    pub show_wdl: bool,
    pub move_overhead_ms: u64,
    pub contempt: i32,
    pub eval_file: Option<String>,
    pub syzygy_path: Option<String>,
    pub syzygy_probe_depth: i32,
    pub syzygy_probe_limit: u32,
    pub syzygy_probe_root: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        EngineOptions {
            hash_mb: 16,
            threads: 1,
            multipv: 1,
            chess960: false,
            show_wdl: false,
            move_overhead_ms: 10,
            contempt: 0,
            eval_file: None,
            syzygy_path: None,
            syzygy_probe_depth: 1,
            syzygy_probe_limit: 7,
            syzygy_probe_root: true,
        }
    }
}

impl EngineOptions {
    /// Applies a `setoption` pair. Option names match case-insensitively.
    /// Values are validated against the registry; out-of-range spins are an
    /// error rather than silently clamped, so the GUI learns of the typo.
    pub fn set(&mut self, name: &str, value: Option<&str>) -> Result<(), OptionError> {
        let def = OPTION_REGISTRY
            .iter()
            .find(|def| def.name.eq_ignore_ascii_case(name))
            .ok_or_else(|| OptionError::Unknown(name.to_string()))?;
        let value = value.unwrap_or("");

        match def.kind {
            UciOptionKind::Spin { min, max, .. } => {
                let parsed: i64 = value.parse().map_err(|_| OptionError::BadValue {
                    name: def.name.to_string(),
                    expected: "an integer",
                    got: value.to_string(),
                })?;
                if parsed < min || parsed > max {
                    return Err(OptionError::OutOfRange {
                        name: def.name.to_string(),
                        value: parsed,
                        min,
                        max,
                    });
                }
                match def.name {
                    "Hash" => self.hash_mb = parsed as usize,
                    "Threads" => self.threads = parsed as usize,
                    "MultiPV" => self.multipv = parsed as usize,
                    "MoveOverhead" => self.move_overhead_ms = parsed as u64,
                    "Contempt" => self.contempt = parsed as i32,
                    "SyzygyProbeDepth" => self.syzygy_probe_depth = parsed as i32,
                    "SyzygyProbeLimit" => self.syzygy_probe_limit = parsed as u32,
                    _ => unreachable!("unhandled spin option"),
                }
            }
            UciOptionKind::Check { .. } => {
                let parsed = match value.to_ascii_lowercase().as_str() {
                    "true" => true,
                    "false" => false,
                    _ => {
                        return Err(OptionError::BadValue {
                            name: def.name.to_string(),
                            expected: "'true' or 'false'",
                            got: value.to_string(),
                        })
                    }
                };
                match def.name {
                    "UCI_Chess960" => self.chess960 = parsed,
                    "UCI_ShowWDL" => self.show_wdl = parsed,
                    "SyzygyProbeRoot" => self.syzygy_probe_root = parsed,
                    _ => unreachable!("unhandled check option"),
                }
            }
            UciOptionKind::Text { default } => {
                let text = if value.is_empty() || value == default {
                    None
                } else {
                    Some(value.to_string())
                };
                match def.name {
                    "EvalFile" => self.eval_file = text,
                    "SyzygyPath" => self.syzygy_path = text,
                    _ => unreachable!("unhandled text option"),
                }
            }
        }
        Ok(())
    }

    /// The `option name ...` lines for the `uci` handshake.
    pub fn handshake_lines() -> Vec<String> {
        OPTION_REGISTRY
            .iter()
            .map(|def| match def.kind {
                UciOptionKind::Spin { default, min, max } => format!(
                    "option name {} type spin default {} min {} max {}",
                    def.name, default, min, max
                ),
                UciOptionKind::Check { default } => {
                    format!("option name {} type check default {}", def.name, default)
                }
                UciOptionKind::Text { default } => {
                    format!("option name {} type string default {}", def.name, default)
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_registry() {
        let opts = EngineOptions::default();
        assert_eq!(opts.hash_mb, 16);
        assert_eq!(opts.threads, 1);
        assert_eq!(opts.multipv, 1);
        assert!(!opts.chess960);
        assert_eq!(opts.move_overhead_ms, 10);
    }

    #[test]
    fn set_spin_option() {
        let mut opts = EngineOptions::default();
        opts.set("Hash", Some("256")).unwrap();
        assert_eq!(opts.hash_mb, 256);
        // Case-insensitive names.
        opts.set("threads", Some("8")).unwrap();
        assert_eq!(opts.threads, 8);
    }

    #[test]
    fn set_check_option() {
        let mut opts = EngineOptions::default();
        opts.set("UCI_Chess960", Some("true")).unwrap();
        assert!(opts.chess960);
        opts.set("UCI_Chess960", Some("false")).unwrap();
        assert!(!opts.chess960);
    }

    #[test]
    fn set_text_option() {
        let mut opts = EngineOptions::default();
        opts.set("EvalFile", Some("nets/tessera.nnue")).unwrap();
        assert_eq!(opts.eval_file.as_deref(), Some("nets/tessera.nnue"));
        // The default sentinel clears it again.
        opts.set("EvalFile", Some("<builtin>")).unwrap();
        assert_eq!(opts.eval_file, None);
    }

    #[test]
    fn out_of_range_is_rejected() {
        let mut opts = EngineOptions::default();
        let err = opts.set("Hash", Some("0")).unwrap_err();
        assert!(matches!(err, OptionError::OutOfRange { .. }));
        let err = opts.set("Threads", Some("100000")).unwrap_err();
        assert!(matches!(err, OptionError::OutOfRange { .. }));
        // Value untouched after a rejected set.
        assert_eq!(opts.hash_mb, 16);
    }

    #[test]
    fn bad_values_are_rejected() {
        let mut opts = EngineOptions::default();
        assert!(matches!(
            opts.set("Hash", Some("many")),
            Err(OptionError::BadValue { .. })
        ));
        assert!(matches!(
            opts.set("UCI_ShowWDL", Some("yes")),
            Err(OptionError::BadValue { .. })
        ));
        assert!(matches!(
            opts.set("NoSuchOption", Some("1")),
            Err(OptionError::Unknown(_))
        ));
    }

    #[test]
    fn handshake_lines_cover_all_options() {
        let lines = EngineOptions::handshake_lines();
        assert_eq!(lines.len(), OPTION_REGISTRY.len());
        assert!(lines
            .iter()
            .any(|l| l == "option name Hash type spin default 16 min 1 max 131072"));
        assert!(lines
            .iter()
            .any(|l| l == "option name UCI_Chess960 type check default false"));
        assert!(lines
            .iter()
            .any(|l| l == "option name EvalFile type string default <builtin>"));
    }
}
