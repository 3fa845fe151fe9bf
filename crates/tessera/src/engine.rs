//! The engine front-end: UCI loop, option application, search dispatch.

use std::io::Write;
use std::sync::Arc;
use std::time::Instant;

use tessera_core::Move;
use tessera_engine::limits::{Composite, Infinite, Limiter, MoveTime, NodeLimit, TimeManager};
use tessera_engine::movegen::{generate_all, MoveList};
use tessera_engine::nnue::network::Network;
use tessera_engine::nnue::Evaluator;
use tessera_engine::observer::NullObserver;
use tessera_engine::params::SCORE_NONE;
use tessera_engine::perft::perft_divide;
use tessera_engine::search::threads::{JobData, SearchPool};
use tessera_engine::search::{InfoSink, SearchJob, SearchReport, MAX_DEPTH};
use tessera_engine::tb::{NoTablebase, TablebaseProber};
use tessera_engine::tt::TranspositionTable;
use tessera_engine::Position;
use tessera_uci::{EngineInfo, EngineMessage, EngineOptions, GoOptions, GuiCommand};
use tracing::{debug, warn};

const NAME: &str = concat!("Tessera ", env!("CARGO_PKG_VERSION"));
const AUTHOR: &str = "the Tessera developers";

/// Writes one protocol line to stdout, flushed.
fn send(msg: &EngineMessage) {
    let stdout = std::io::stdout();
    let mut lock = stdout.lock();
    let _ = writeln!(lock, "{}", msg.to_uci());
    let _ = lock.flush();
}

/// Prints `info` and `bestmove` lines for the search.
struct UciSink;

impl InfoSink for UciSink {
    fn info(&self, report: &SearchReport) {
        let mut info = EngineInfo {
            depth: Some(report.depth),
            seldepth: Some(report.seldepth),
            multipv: Some(report.multipv),
            time_ms: Some(report.time_ms),
            nodes: Some(report.nodes),
            nps: Some(report.nps),
            lowerbound: report.lowerbound,
            upperbound: report.upperbound,
            wdl: report.wdl,
            hashfull: Some(report.hashfull),
            pv: report
                .pv
                .iter()
                .map(|m| m.to_uci(report.chess960))
                .collect(),
            ..Default::default()
        };
        match report.mate {
            Some(mate) => info.score_mate = Some(mate),
            None => info.score_cp = Some(report.score),
        }
        send(&EngineMessage::Info(info));
    }

    fn bestmove(&self, mv: Move, ponder: Option<Move>, chess960: bool) {
        send(&EngineMessage::BestMove {
            mv: mv.to_uci(chess960),
            ponder: ponder.map(|p| p.to_uci(chess960)),
        });
    }
}

pub struct Engine {
    options: EngineOptions,
    pool: SearchPool,
    tt: Arc<TranspositionTable>,
    network: Arc<Network>,
    prober: Arc<dyn TablebaseProber>,
    position: Position,
    sink: Arc<UciSink>,
}

impl Engine {
    pub fn new() -> Self {
        let options = EngineOptions::default();
        Engine {
            pool: SearchPool::new(options.threads),
            tt: Arc::new(TranspositionTable::new(options.hash_mb)),
            network: Arc::new(Network::builtin()),
            prober: Arc::new(NoTablebase),
            position: Position::startpos(),
            sink: Arc::new(UciSink),
            options,
        }
    }

    /// Loads a network file, replacing the active one. Fails without
    /// touching the current network.
    pub fn load_network(&mut self, path: &str) -> anyhow::Result<()> {
        let network = Network::from_file(std::path::Path::new(path))?;
        self.network = Arc::new(network);
        Ok(())
    }

    /// Applies one option by name, reporting problems on stderr. Used both
    /// by `setoption` and the command line.
    pub fn set_option(&mut self, name: &str, value: Option<&str>) {
        if self.pool.is_searching() {
            warn!("ignoring setoption while searching");
            return;
        }
        if let Err(err) = self.options.set(name, value) {
            warn!("{err}");
            return;
        }

        // Options with side effects beyond the value itself.
        if name.eq_ignore_ascii_case("Hash") {
            self.tt = Arc::new(TranspositionTable::new(self.options.hash_mb));
        } else if name.eq_ignore_ascii_case("Threads") {
            self.pool.set_threads(self.options.threads);
        } else if name.eq_ignore_ascii_case("UCI_Chess960") {
            self.position.set_chess960(self.options.chess960);
        } else if name.eq_ignore_ascii_case("EvalFile") {
            match self.options.eval_file.clone() {
                Some(path) => {
                    if let Err(err) = self.load_network(&path) {
                        warn!("EvalFile rejected: {err}");
                        self.options.eval_file = None;
                    }
                }
                None => self.network = Arc::new(Network::builtin()),
            }
        } else if name.eq_ignore_ascii_case("SyzygyPath") {
            if let Some(ref path) = self.options.syzygy_path {
                if !std::path::Path::new(path).is_dir() {
                    warn!("SyzygyPath '{path}' is not a readable directory");
                    self.options.syzygy_path = None;
                }
                // Probing stays on the inert implementation; the option
                // surface is kept so controllers can set it uniformly.
            }
        }
    }

    /// Reads commands until `quit` or EOF.
    pub fn uci_loop(&mut self) {
        let mut stream = tessera_uci::stdio_stream();
        loop {
            let cmd = match stream.read_command() {
                Ok(Some(cmd)) => cmd,
                Ok(None) => break,
                Err(err) => {
                    debug!("input error: {err}");
                    continue;
                }
            };
            if !self.handle(cmd) {
                break;
            }
        }
        self.pool.stop();
        self.pool.wait_idle();
    }

    /// Processes one command; returns false on `quit`.
    fn handle(&mut self, cmd: GuiCommand) -> bool {
        match cmd {
            GuiCommand::Uci => {
                send(&EngineMessage::Id {
                    name: NAME.to_string(),
                    author: AUTHOR.to_string(),
                });
                for line in EngineOptions::handshake_lines() {
                    send(&EngineMessage::Option(line));
                }
                send(&EngineMessage::UciOk);
            }
            GuiCommand::IsReady => {
                self.pool.wait_idle();
                send(&EngineMessage::ReadyOk);
            }
            GuiCommand::NewGame => {
                if self.pool.is_searching() {
                    warn!("ignoring ucinewgame while searching");
                } else {
                    self.tt.clear();
                    self.pool.new_game();
                    self.position = Position::startpos();
                    self.position.set_chess960(self.options.chess960);
                }
            }
            GuiCommand::SetOption { name, value } => {
                self.set_option(&name, value.as_deref());
            }
            GuiCommand::Position { fen, moves } => self.set_position(fen.as_deref(), &moves),
            GuiCommand::Go(opts) => self.go(&opts),
            GuiCommand::Stop => self.pool.stop(),
            GuiCommand::PonderHit => {
                // Pondering searches run on the infinite limiter; the GUI
                // follows up with its own stop or go.
            }
            GuiCommand::Bench { depth } => {
                if !self.pool.is_searching() {
                    crate::bench::run(self, depth.unwrap_or(10));
                }
            }
            GuiCommand::Display => {
                if !self.pool.is_searching() {
                    println!("{}", self.position);
                    println!("fen: {}", self.position.to_fen());
                    println!("key: {:016x}", self.position.key());
                }
            }
            GuiCommand::Eval => {
                if !self.pool.is_searching() {
                    let mut eval = Evaluator::new(self.network.clone());
                    eval.reset(&self.position);
                    let score = if self.position.in_check() {
                        SCORE_NONE
                    } else {
                        eval.evaluate(&self.position)
                    };
                    if score == SCORE_NONE {
                        println!("eval: none (in check)");
                    } else {
                        println!("eval: {score} cp");
                    }
                }
            }
            GuiCommand::Perft { depth } => {
                if !self.pool.is_searching() {
                    let start = Instant::now();
                    let mut pos = self.position.clone();
                    let divide = perft_divide(&mut pos, depth);
                    for (mv, nodes) in &divide {
                        println!("{mv}: {nodes}");
                    }
                    let total: u64 = divide.iter().map(|(_, n)| n).sum();
                    let elapsed = start.elapsed();
                    println!(
                        "perft {depth}: {total} nodes in {} ms",
                        elapsed.as_millis()
                    );
                }
            }
            GuiCommand::Moves => {
                if !self.pool.is_searching() {
                    let mut moves = MoveList::new();
                    generate_all(&self.position, &mut moves);
                    let legal: Vec<String> = moves
                        .as_slice()
                        .iter()
                        .filter(|&&m| self.position.is_legal(m))
                        .map(|m| m.to_uci(self.position.is_chess960()))
                        .collect();
                    println!("{}", legal.join(" "));
                }
            }
            GuiCommand::Unknown(line) => {
                if !line.is_empty() {
                    debug!("ignoring unknown command: {line}");
                }
            }
            GuiCommand::Quit => return false,
        }
        true
    }

    /// `position ...`: rebuild the board and replay the move list,
    /// recording every key for repetition detection.
    fn set_position(&mut self, fen: Option<&str>, moves: &[String]) {
        if self.pool.is_searching() {
            warn!("ignoring position while searching");
            return;
        }

        let mut pos = match fen {
            Some(fen) => match Position::from_fen(fen) {
                Ok(pos) => pos,
                Err(err) => {
                    warn!("rejecting position: {err}");
                    return;
                }
            },
            None => Position::startpos(),
        };
        pos.set_chess960(self.options.chess960);

        for mv_str in moves {
            match pos.parse_uci_move(mv_str) {
                Some(mv) => pos.make(mv, &mut NullObserver),
                None => {
                    warn!("illegal move '{mv_str}' in position command, ignoring the rest");
                    break;
                }
            }
        }
        self.position = pos;
    }

    /// `go ...`: assemble the limiter stack and hand the job to the pool.
    fn go(&mut self, opts: &GoOptions) {
        if self.pool.is_searching() {
            warn!("ignoring go while searching");
            return;
        }
        let start = Instant::now();
        let overhead = self.options.move_overhead_ms;

        let mut limiters: Vec<Box<dyn Limiter>> = Vec::new();
        if let Some(nodes) = opts.nodes {
            limiters.push(Box::new(NodeLimit::new(nodes)));
        }
        if let Some(ms) = opts.movetime {
            limiters.push(Box::new(MoveTime::new(start, ms, overhead)));
        }
        if !opts.ponder && !opts.infinite && (opts.wtime.is_some() || opts.btime.is_some()) {
            limiters.push(Box::new(TimeManager::new(
                start,
                self.position.side_to_move(),
                opts.wtime.unwrap_or(u64::MAX / 4),
                opts.btime.unwrap_or(u64::MAX / 4),
                opts.winc.unwrap_or(0),
                opts.binc.unwrap_or(0),
                opts.movestogo,
                overhead,
            )));
        }
        let limiter: Arc<dyn Limiter> = match limiters.len() {
            0 => Arc::new(Infinite),
            1 => Arc::from(limiters.pop().unwrap()),
            _ => Arc::new(Composite::new(limiters)),
        };

        let search_moves = self.root_move_filter(opts);

        self.pool.start_search(JobData {
            job: SearchJob {
                position: self.position.clone(),
                max_depth: opts.depth.unwrap_or(MAX_DEPTH),
                limiter,
                search_moves,
                multipv: self.options.multipv,
                contempt: self.options.contempt,
                show_wdl: self.options.show_wdl,
            },
            network: self.network.clone(),
            tt: self.tt.clone(),
            sink: self.sink.clone(),
            start,
        });
    }

    /// Searches one benchmark position to a fixed depth and returns the
    /// node count. Clears all state first so runs are reproducible.
    pub(crate) fn bench_search(&mut self, fen: &str, depth: i32) -> u64 {
        #[derive(Default)]
        struct BenchSink {
            nodes: std::sync::atomic::AtomicU64,
        }

        impl InfoSink for BenchSink {
            fn info(&self, report: &SearchReport) {
                self.nodes
                    .store(report.nodes, std::sync::atomic::Ordering::Relaxed);
            }

            fn bestmove(&self, _mv: Move, _ponder: Option<Move>, _chess960: bool) {}
        }

        let position = Position::from_fen(fen).expect("bench position is valid");
        self.tt.clear();
        self.pool.new_game();

        let sink = Arc::new(BenchSink::default());
        self.pool.start_search(JobData {
            job: SearchJob {
                position,
                max_depth: depth,
                limiter: Arc::new(Infinite),
                search_moves: None,
                multipv: 1,
                contempt: 0,
                show_wdl: false,
            },
            network: self.network.clone(),
            tt: self.tt.clone(),
            sink: sink.clone(),
            start: Instant::now(),
        });
        self.pool.wait_idle();
        sink.nodes.load(std::sync::atomic::Ordering::Relaxed)
    }

    /// Combines `searchmoves` with the tablebase root filter.
    fn root_move_filter(&self, opts: &GoOptions) -> Option<Vec<Move>> {
        let mut filter: Option<Vec<Move>> = None;

        if !opts.searchmoves.is_empty() {
            let mut parsed = Vec::new();
            for s in &opts.searchmoves {
                match self.position.parse_uci_move(s) {
                    Some(mv) => parsed.push(mv),
                    None => warn!("ignoring illegal searchmove '{s}'"),
                }
            }
            if !parsed.is_empty() {
                filter = Some(parsed);
            }
        }

        if self.options.syzygy_path.is_some() && self.options.syzygy_probe_root {
            let mut moves = MoveList::new();
            generate_all(&self.position, &mut moves);
            if let Some(tb_moves) = self.prober.probe_root(&self.position, &moves) {
                filter = Some(match filter {
                    Some(existing) => existing
                        .into_iter()
                        .filter(|m| tb_moves.contains(m))
                        .collect(),
                    None => tb_moves,
                });
            }
        }

        filter
    }
}
