//! `info` line formatting.

/// One `info` record, formatted field-by-field in the conventional order:
/// `info depth D seldepth S multipv K time T nodes N nps P score ...
/// [bound] [wdl w d l] hashfull H pv m1 m2 ...`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EngineInfo {
    pub depth: Option<i32>,
    pub seldepth: Option<usize>,
    pub multipv: Option<usize>,
    pub time_ms: Option<u64>,
    pub nodes: Option<u64>,
    pub nps: Option<u64>,
    /// Centipawn score, exclusive with `mate`.
    pub score_cp: Option<i32>,
    /// Mate distance in moves, signed by the winner.
    pub score_mate: Option<i32>,
    pub lowerbound: bool,
    pub upperbound: bool,
    /// Win/draw/loss in permille.
    pub wdl: Option<(u32, u32, u32)>,
    pub hashfull: Option<usize>,
    pub pv: Vec<String>,
    /// Free-form diagnostic, consumes the rest of the line.
    pub string: Option<String>,
}

impl EngineInfo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Formats the record as one `info` line.
    pub fn to_uci(&self) -> String {
        let mut parts = vec!["info".to_string()];

        if let Some(d) = self.depth {
            parts.push(format!("depth {d}"));
        }
        if let Some(s) = self.seldepth {
            parts.push(format!("seldepth {s}"));
        }
        if let Some(k) = self.multipv {
            parts.push(format!("multipv {k}"));
        }
        if let Some(t) = self.time_ms {
            parts.push(format!("time {t}"));
        }
        if let Some(n) = self.nodes {
            parts.push(format!("nodes {n}"));
        }
        if let Some(n) = self.nps {
            parts.push(format!("nps {n}"));
        }
        if let Some(m) = self.score_mate {
            parts.push(format!("score mate {m}"));
        } else if let Some(cp) = self.score_cp {
            parts.push(format!("score cp {cp}"));
        }
        if self.lowerbound {
            parts.push("lowerbound".to_string());
        }
        if self.upperbound {
            parts.push("upperbound".to_string());
        }
        if let Some((w, d, l)) = self.wdl {
            parts.push(format!("wdl {w} {d} {l}"));
        }
        if let Some(h) = self.hashfull {
            parts.push(format!("hashfull {h}"));
        }
        if !self.pv.is_empty() {
            parts.push(format!("pv {}", self.pv.join(" ")));
        }
        if let Some(ref s) = self.string {
            parts.push(format!("string {s}"));
        }

        parts.join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_info_line() {
        let info = EngineInfo {
            depth: Some(12),
            seldepth: Some(20),
            multipv: Some(1),
            time_ms: Some(350),
            nodes: Some(1_234_567),
            nps: Some(3_527_334),
            score_cp: Some(35),
            hashfull: Some(420),
            pv: vec!["e2e4".into(), "e7e5".into(), "g1f3".into()],
            ..Default::default()
        };

        assert_eq!(
            info.to_uci(),
            "info depth 12 seldepth 20 multipv 1 time 350 nodes 1234567 \
             nps 3527334 score cp 35 hashfull 420 pv e2e4 e7e5 g1f3"
        );
    }

    #[test]
    fn mate_score_wins_over_cp() {
        let info = EngineInfo {
            depth: Some(5),
            score_cp: Some(9999),
            score_mate: Some(3),
            ..Default::default()
        };
        let line = info.to_uci();
        assert!(line.contains("score mate 3"));
        assert!(!line.contains("cp"));
    }

    #[test]
    fn bounds_and_wdl() {
        let info = EngineInfo {
            score_cp: Some(88),
            lowerbound: true,
            wdl: Some((512, 444, 44)),
            ..Default::default()
        };
        let line = info.to_uci();
        assert!(line.contains("score cp 88 lowerbound wdl 512 444 44"));
    }

    #[test]
    fn string_goes_last() {
        let info = EngineInfo {
            string: Some("builtin network".into()),
            ..Default::default()
        };
        assert_eq!(info.to_uci(), "info string builtin network");
    }
}
