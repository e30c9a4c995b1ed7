//! faultline CLI: replay resilience scenarios from the terminal.
//!
//! Usage:
//! ```bash
//! # Trip a circuit breaker with failing calls
//! faultline circuit --threshold 2 --open-secs 60 --calls 4
//!
//! # Fire a burst of calls at a fixed-window rate limiter
//! faultline rate --capacity 5 --window-secs 10 --calls 10
//!
//! # Launch concurrent calls against a bulkhead
//! faultline bulkhead --concurrency 2 --queue 4 --calls 10
//!
//! # Drive a chain described by a JSON file
//! faultline chain --config policies.json --calls 20 --fail-every 3
//! ```

use std::env;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use faultline_core::{
    Bulkhead, BulkheadConfig, CircuitBreaker, CircuitBreakerConfig, ExecutorConfig, Outcome,
    PolicyExecutor, RateLimiter, RateLimiterConfig,
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        print_usage();
        process::exit(1);
    }

    let result = match args[1].as_str() {
        "circuit" => cmd_circuit(&args[2..]).await,
        "rate" => cmd_rate(&args[2..]).await,
        "bulkhead" => cmd_bulkhead(&args[2..]).await,
        "chain" => cmd_chain(&args[2..]).await,
        "version" | "--version" | "-V" => {
            println!("faultline {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        "help" | "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {other}");
            print_usage();
            process::exit(1);
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

fn print_usage() {
    println!("faultline {}", env!("CARGO_PKG_VERSION"));
    println!("Replay circuit breaker, rate limit and bulkhead scenarios\n");
    println!("USAGE:");
    println!("    faultline <COMMAND> [FLAGS]\n");
    println!("COMMANDS:");
    println!("    circuit    Send failing calls through a circuit breaker");
    println!("    rate       Send a burst of calls through a rate limiter");
    println!("    bulkhead   Launch concurrent calls against a bulkhead");
    println!("    chain      Run calls through a chain loaded from JSON");
    println!("    version    Print version");
    println!("    help       Print this help\n");
    println!("CIRCUIT FLAGS:");
    println!("    --threshold <N>     Failures before opening      [default: 2]");
    println!("    --open-secs <S>     Seconds to stay open         [default: 60]");
    println!("    --calls <N>         Calls to send                [default: 4]");
    println!("RATE FLAGS:");
    println!("    --capacity <N>      Calls per window             [default: 5]");
    println!("    --window-secs <S>   Window length                [default: 10]");
    println!("    --calls <N>         Calls to send                [default: 10]");
    println!("BULKHEAD FLAGS:");
    println!("    --concurrency <N>   Parallel slots               [default: 2]");
    println!("    --queue <N>         Waiting queue size           [default: 4]");
    println!("    --calls <N>         Concurrent calls             [default: 10]");
    println!("    --work-ms <MS>      Time each call holds a slot  [default: 100]");
    println!("CHAIN FLAGS:");
    println!("    --config <FILE>     JSON executor config         [required]");
    println!("    --calls <N>         Calls to send                [default: 20]");
    println!("    --fail-every <N>    Every Nth call fails (0 = never) [default: 0]");
}

async fn cmd_circuit(args: &[String]) -> anyhow::Result<()> {
    let config = CircuitBreakerConfig {
        failure_threshold: parse_num(args, "--threshold", 2)?,
        open_duration: Duration::from_secs(parse_num(args, "--open-secs", 60)?),
        ..Default::default()
    };
    let calls: u32 = parse_num(args, "--calls", 4)?;

    let breaker = CircuitBreaker::new(config)?;
    let exec = PolicyExecutor::builder().policy(breaker.clone()).build();

    for i in 1..=calls {
        let outcome: Outcome<(), String> = exec
            .run(|| async { Err("simulated failure".to_string()) })
            .await;
        println!("  call {i:>3}: {:<40} circuit={}", describe(&outcome), breaker.state());
    }
    Ok(())
}

async fn cmd_rate(args: &[String]) -> anyhow::Result<()> {
    let config = RateLimiterConfig {
        capacity: parse_num(args, "--capacity", 5)?,
        window: Duration::from_secs(parse_num(args, "--window-secs", 10)?),
    };
    let calls: u32 = parse_num(args, "--calls", 10)?;

    let limiter = RateLimiter::new(config)?;
    let exec = PolicyExecutor::builder().policy(limiter.clone()).build();

    for i in 1..=calls {
        let outcome: Outcome<u32, String> = exec.run(|| async move { Ok(i) }).await;
        println!("  call {i:>3}: {:<40} remaining={}", describe(&outcome), limiter.remaining());
    }
    Ok(())
}

async fn cmd_bulkhead(args: &[String]) -> anyhow::Result<()> {
    let config = BulkheadConfig {
        max_concurrency: parse_num(args, "--concurrency", 2)?,
        max_queue: parse_num(args, "--queue", 4)?,
        ..Default::default()
    };
    let calls: u32 = parse_num(args, "--calls", 10)?;
    let work = Duration::from_millis(parse_num(args, "--work-ms", 100)?);

    let bulkhead = Bulkhead::new(config)?;
    let tasks = launch_bulkhead_calls(&bulkhead, calls, work).await;
    for task in tasks {
        let (i, outcome) = task.await.context("bulkhead task panicked")?;
        println!("  call {i:>3}: {}", describe(&outcome));
    }
    println!(
        "  in_flight={} queued={}",
        bulkhead.in_flight(),
        bulkhead.queued()
    );
    Ok(())
}

type BulkheadCall = tokio::task::JoinHandle<(u32, Outcome<u32, String>)>;

/// Spawn `calls` operations against `bulkhead`, each holding its slot for `work`.
async fn launch_bulkhead_calls(bulkhead: &Bulkhead, calls: u32, work: Duration) -> Vec<BulkheadCall> {
    let exec = Arc::new(PolicyExecutor::builder().policy(bulkhead.clone()).build());
    let mut tasks = Vec::with_capacity(calls as usize);
    for i in 1..=calls {
        let exec = Arc::clone(&exec);
        let occupied = bulkhead.in_flight() + bulkhead.queued();
        let task = tokio::spawn(async move {
            let outcome: Outcome<u32, String> = exec
                .run(|| async move {
                    tokio::time::sleep(work).await;
                    Ok(i)
                })
                .await;
            (i, outcome)
        });
        // Launch order is admission order: wait until this call holds a
        // slot, sits in the queue or has already been turned away.
        while bulkhead.in_flight() + bulkhead.queued() <= occupied && !task.is_finished() {
            tokio::task::yield_now().await;
        }
        tasks.push(task);
    }
    tasks
}

async fn cmd_chain(args: &[String]) -> anyhow::Result<()> {
    let Some(path) = parse_flag(args, "--config") else {
        bail!("--config is required");
    };
    let calls: u32 = parse_num(args, "--calls", 20)?;
    let fail_every: u32 = parse_num(args, "--fail-every", 0)?;

    let raw = std::fs::read_to_string(&path).with_context(|| format!("reading {path}"))?;
    let config: ExecutorConfig =
        serde_json::from_str(&raw).with_context(|| format!("parsing {path}"))?;
    let exec = PolicyExecutor::from_config(&config)?;
    tracing::info!(policies = ?exec.kinds(), "chain loaded from {path}");

    let (mut ok, mut failed, mut rejected) = (0u32, 0u32, 0u32);
    for i in 1..=calls {
        let fails = fail_every != 0 && i % fail_every == 0;
        let outcome: Outcome<u32, String> = exec
            .run(|| async move {
                if fails {
                    Err(format!("call {i} failed"))
                } else {
                    Ok(i)
                }
            })
            .await;
        match &outcome {
            Outcome::Success(_) => ok += 1,
            Outcome::Failure(_) => failed += 1,
            Outcome::Rejected(_) => rejected += 1,
        }
        println!("  call {i:>3}: {}", describe(&outcome));
    }
    println!("\n  success={ok} failure={failed} rejected={rejected}");
    Ok(())
}

fn describe<T: std::fmt::Debug>(outcome: &Outcome<T, String>) -> String {
    match outcome {
        Outcome::Success(v) => format!("ok ({v:?})"),
        Outcome::Failure(f) => format!("failed ({f:?})"),
        Outcome::Rejected(r) => format!("rejected ({r})"),
    }
}

fn parse_flag(args: &[String], flag: &str) -> Option<String> {
    let pos = args.iter().position(|a| a == flag)?;
    args.get(pos + 1).cloned()
}

fn parse_num<N>(args: &[String], flag: &str, default: N) -> anyhow::Result<N>
where
    N: std::str::FromStr,
    N::Err: std::error::Error + Send + Sync + 'static,
{
    match parse_flag(args, flag) {
        Some(raw) => raw
            .parse()
            .with_context(|| format!("{flag} expects a number, got {raw:?}")),
        None => Ok(default),
    }
}
