//! The worker pool: lazy SMP over persistent kernel threads.
//!
//! Workers park on a condvar between searches and react to generation
//! bumps: each published command (search, new game, quit) is processed by
//! every worker exactly once. During a search nothing blocks; the only
//! shared mutable state is the transposition table, the limiter and the
//! stop flag, all accessed with relaxed atomics. Worker 0 is the main
//! worker: it owns reporting, time-management updates and the final
//! `bestmove`.

use super::{InfoSink, SearchJob, ThreadData};
use crate::history::Histories;
use crate::nnue::network::Network;
use crate::tt::TranspositionTable;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Instant;
use tessera_core::Move;

/// Everything one `go` hands to the workers.
pub struct JobData {
    pub job: SearchJob,
    pub network: Arc<Network>,
    pub tt: Arc<TranspositionTable>,
    pub sink: Arc<dyn InfoSink>,
    pub start: Instant,
}

enum Command {
    Idle,
    Search(Arc<JobData>),
    NewGame,
}

struct PoolState {
    generation: u64,
    command: Command,
    running: usize,
    quit: bool,
}

struct PoolShared {
    state: Mutex<PoolState>,
    /// Workers wait here for the next generation.
    job_cv: Condvar,
    /// The controller waits here for all workers to go idle.
    idle_cv: Condvar,
    stop: Arc<AtomicBool>,
    nodes: Arc<AtomicU64>,
}

/// Handle to the worker threads. Owned by the engine front-end.
pub struct SearchPool {
    shared: Arc<PoolShared>,
    handles: Vec<JoinHandle<()>>,
}

impl SearchPool {
    /// Spawns `threads` workers (at least one).
    pub fn new(threads: usize) -> Self {
        let shared = Arc::new(PoolShared {
            state: Mutex::new(PoolState {
                generation: 0,
                command: Command::Idle,
                running: 0,
                quit: false,
            }),
            job_cv: Condvar::new(),
            idle_cv: Condvar::new(),
            stop: Arc::new(AtomicBool::new(false)),
            nodes: Arc::new(AtomicU64::new(0)),
        });

        let mut pool = SearchPool {
            shared,
            handles: Vec::new(),
        };
        pool.spawn(threads.max(1));
        pool
    }

    fn spawn(&mut self, threads: usize) {
        for id in 0..threads {
            let shared = self.shared.clone();
            let handle = std::thread::Builder::new()
                .name(format!("tessera-{id}"))
                .stack_size(8 * 1024 * 1024)
                .spawn(move || worker_loop(id, shared))
                .expect("failed to spawn search worker");
            self.handles.push(handle);
        }
    }

    /// Number of workers.
    pub fn threads(&self) -> usize {
        self.handles.len()
    }

    /// Replaces the pool with one of a different size. Blocks until the
    /// current search (if any) finishes.
    pub fn set_threads(&mut self, threads: usize) {
        self.shutdown();
        self.shared.stop.store(false, Ordering::Relaxed);
        {
            let mut state = self.shared.state.lock().unwrap();
            state.quit = false;
            state.command = Command::Idle;
        }
        self.spawn(threads.max(1));
    }

    /// Publishes a command to every worker and marks them running.
    fn publish(&self, command: Command) {
        let mut state = self.shared.state.lock().unwrap();
        debug_assert_eq!(state.running, 0, "publish while workers are busy");
        state.generation += 1;
        state.command = command;
        state.running = self.handles.len();
        drop(state);
        self.shared.job_cv.notify_all();
    }

    /// Starts a search. The pool must be idle (the UCI front-end serialises
    /// `go` commands through `wait_idle`).
    pub fn start_search(&self, data: JobData) {
        self.wait_idle();
        self.shared.stop.store(false, Ordering::Relaxed);
        self.shared.nodes.store(0, Ordering::Relaxed);
        data.tt.age_up();
        self.publish(Command::Search(Arc::new(data)));
    }

    /// Cooperative stop: workers notice on their next poll.
    pub fn stop(&self) {
        self.shared.stop.store(true, Ordering::Release);
    }

    /// True while any worker is searching.
    pub fn is_searching(&self) -> bool {
        self.shared.state.lock().unwrap().running > 0
    }

    /// Blocks until every worker is idle.
    pub fn wait_idle(&self) {
        let mut state = self.shared.state.lock().unwrap();
        while state.running > 0 {
            state = self.shared.idle_cv.wait(state).unwrap();
        }
    }

    /// Clears per-thread history state in every worker.
    pub fn new_game(&self) {
        self.wait_idle();
        self.publish(Command::NewGame);
        self.wait_idle();
    }

    fn shutdown(&mut self) {
        self.stop();
        self.wait_idle();
        {
            let mut state = self.shared.state.lock().unwrap();
            state.quit = true;
        }
        self.shared.job_cv.notify_all();
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for SearchPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(id: usize, shared: Arc<PoolShared>) {
    let mut histories = Histories::new();
    let mut last_generation = 0u64;

    loop {
        // Park until a new generation (or quit) shows up.
        let command = {
            let mut state = shared.state.lock().unwrap();
            loop {
                if state.quit {
                    return;
                }
                if state.generation != last_generation {
                    last_generation = state.generation;
                    break;
                }
                state = shared.job_cv.wait(state).unwrap();
            }
            match &state.command {
                Command::Idle => None,
                Command::NewGame => {
                    histories.clear();
                    None
                }
                Command::Search(data) => Some(data.clone()),
            }
        };

        if let Some(data) = command {
            run_search(id, &shared, &data, &mut histories);
        }

        let mut state = shared.state.lock().unwrap();
        state.running -= 1;
        if state.running == 0 {
            shared.idle_cv.notify_all();
        }
    }
}

fn run_search(id: usize, shared: &PoolShared, data: &JobData, histories: &mut Histories) {
    let mut td = ThreadData::new(
        id,
        &data.job,
        data.network.clone(),
        histories,
        &data.tt,
        &shared.stop,
        shared.nodes.clone(),
    );

    let chess960 = data.job.position.is_chess960();
    if td.root_moves.is_empty() {
        // Mate or stalemate at the root: there is nothing to search.
        if id == 0 {
            shared.stop.store(true, Ordering::Release);
            let mated = data.job.position.in_check();
            data.sink.info(&super::SearchReport {
                depth: 0,
                seldepth: 0,
                multipv: 1,
                score: if mated { -crate::params::SCORE_MATE } else { 0 },
                mate: mated.then_some(0),
                lowerbound: false,
                upperbound: false,
                nodes: 0,
                nps: 0,
                time_ms: 0,
                hashfull: 0,
                wdl: None,
                pv: Vec::new(),
                chess960,
            });
            data.sink.bestmove(Move::NULL, None, chess960);
        }
        return;
    }

    let sink = (id == 0).then_some(&*data.sink);
    td.iterative_deepening(sink, data.start);

    if id == 0 {
        // Main worker: wind the helpers down and answer with the best
        // move found, always.
        shared.stop.store(true, Ordering::Release);
        let best = &td.root_moves[0];
        let ponder = best.pv.moves().get(1).copied();
        data.sink.bestmove(best.mv, ponder, chess960);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limits::NodeLimit;
    use crate::position::Position;
    use crate::search::SearchReport;
    use std::sync::Mutex as StdMutex;

    /// Collects search output for assertions.
    struct Capture {
        infos: StdMutex<Vec<(i32, crate::params::Score, Vec<Move>)>>,
        best: StdMutex<Option<Move>>,
    }

    impl Capture {
        fn new() -> Arc<Self> {
            Arc::new(Capture {
                infos: StdMutex::new(Vec::new()),
                best: StdMutex::new(None),
            })
        }
    }

    impl InfoSink for Capture {
        fn info(&self, report: &SearchReport) {
            self.infos
                .lock()
                .unwrap()
                .push((report.depth, report.score, report.pv.clone()));
        }

        fn bestmove(&self, mv: Move, _ponder: Option<Move>, _chess960: bool) {
            *self.best.lock().unwrap() = Some(mv);
        }
    }

    fn run_job(fen: &str, depth: i32, threads: usize) -> (Arc<Capture>, Position) {
        let pos = Position::from_fen(fen).unwrap();
        let sink = Capture::new();
        let pool = SearchPool::new(threads);
        pool.start_search(JobData {
            job: SearchJob {
                position: pos.clone(),
                max_depth: depth,
                limiter: Arc::new(crate::limits::Infinite),
                search_moves: None,
                multipv: 1,
                contempt: 0,
                show_wdl: false,
            },
            network: Arc::new(Network::builtin()),
            tt: Arc::new(TranspositionTable::new(8)),
            sink: sink.clone(),
            start: Instant::now(),
        });
        pool.wait_idle();
        (sink, pos)
    }

    #[test]
    fn depth_one_returns_a_legal_move() {
        let (sink, pos) = run_job(
            "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1",
            1,
            1,
        );
        let best = sink.best.lock().unwrap().expect("bestmove emitted");
        assert!(pos.parse_uci_move(&best.to_uci(false)).is_some());
        assert!(!sink.infos.lock().unwrap().is_empty());
    }

    #[test]
    fn mate_in_one_is_found() {
        let (sink, pos) = run_job("6k1/5ppp/8/8/8/8/5PPP/R5K1 w - - 0 1", 4, 1);
        let best = sink.best.lock().unwrap().expect("bestmove emitted");
        assert_eq!(best.to_uci(false), "a1a8");
        let infos = sink.infos.lock().unwrap();
        let (_, score, _) = infos.last().unwrap();
        assert_eq!(*score, crate::params::SCORE_MATE - 1);
        let _ = pos;
    }

    #[test]
    fn stalemate_root_gives_null_bestmove() {
        let (sink, _) = run_job("7k/5Q2/6K1/8/8/8/8/8 b - - 0 1", 3, 1);
        let best = sink.best.lock().unwrap().expect("bestmove emitted");
        assert!(best.is_null());
    }

    #[test]
    fn kp_endgame_is_winning_for_white() {
        let (sink, _) = run_job("4k3/8/8/8/8/8/4P3/4K3 w - - 0 1", 10, 1);
        let infos = sink.infos.lock().unwrap();
        let (_, score, _) = infos.last().unwrap();
        assert!(*score > 0, "white to move should be better, got {score}");
    }

    #[test]
    fn multithreaded_search_terminates() {
        let pos = Position::startpos();
        let sink = Capture::new();
        let pool = SearchPool::new(4);
        pool.start_search(JobData {
            job: SearchJob {
                position: pos,
                max_depth: 6,
                limiter: Arc::new(NodeLimit::new(200_000)),
                search_moves: None,
                multipv: 1,
                contempt: 0,
                show_wdl: false,
            },
            network: Arc::new(Network::builtin()),
            tt: Arc::new(TranspositionTable::new(8)),
            sink: sink.clone(),
            start: Instant::now(),
        });
        pool.wait_idle();
        assert!(sink.best.lock().unwrap().is_some());
    }

    #[test]
    fn new_game_and_resize_are_idempotent() {
        let mut pool = SearchPool::new(2);
        pool.new_game();
        pool.set_threads(3);
        assert_eq!(pool.threads(), 3);
        pool.new_game();
    }

    #[test]
    fn single_thread_search_is_deterministic() {
        let run = || {
            let (sink, _) = run_job(
                "r1bqkbnr/pppp1ppp/2n5/4p3/4P3/5N2/PPPP1PPP/RNBQKB1R w KQkq - 2 3",
                6,
                1,
            );
            let infos = sink.infos.lock().unwrap();
            infos.last().cloned().unwrap()
        };
        let first = run();
        let second = run();
        assert_eq!(first.1, second.1, "scores differ between runs");
        assert_eq!(first.2, second.2, "PVs differ between runs");
    }
}
