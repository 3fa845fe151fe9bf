//! Tessera, a UCI chess engine.
//!
//! The binary is a thin shell: diagnostics go to stderr via `tracing`, the
//! protocol runs over stdin/stdout, and everything interesting happens in
//! `tessera-engine`.

mod bench;
mod engine;

use anyhow::Context;
use clap::Parser;
use engine::Engine;

/// Tessera, a UCI chess engine.
#[derive(Parser, Debug)]
#[command(name = "tessera", version, about, long_about = None)]
struct Cli {
    /// Run the fixed-position benchmark and exit (used by OpenBench-style
    /// testing rigs), optionally at a given depth.
    #[arg(long)]
    bench: bool,

    /// Benchmark depth.
    #[arg(long, default_value_t = 10)]
    bench_depth: i32,

    /// Number of search threads.
    #[arg(long)]
    threads: Option<usize>,

    /// Transposition table size in MiB.
    #[arg(long)]
    hash: Option<usize>,

    /// NNUE weights file; the built-in network is used when absent.
    #[arg(long)]
    eval_file: Option<String>,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(tracing::Level::WARN)
        .without_time()
        .init();

    let cli = Cli::parse();

    let mut engine = Engine::new();
    if let Some(threads) = cli.threads {
        engine.set_option("Threads", Some(&threads.to_string()));
    }
    if let Some(hash) = cli.hash {
        engine.set_option("Hash", Some(&hash.to_string()));
    }
    if let Some(ref path) = cli.eval_file {
        // In non-interactive mode a broken network is fatal; over UCI the
        // engine keeps the previous network and plays on.
        engine
            .load_network(path)
            .with_context(|| format!("cannot load EvalFile '{path}'"))?;
    }

    if cli.bench {
        bench::run(&mut engine, cli.bench_depth);
        return Ok(());
    }

    engine.uci_loop();
    Ok(())
}
