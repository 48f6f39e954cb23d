//! Runs one ring member with an interactive console on stdin.
//!
//! Start the classic five-node ring in five terminals:
//! ```bash
//! cargo run -p simple-dynamo -- --id 5554 --data-dir /tmp/dynamo/5554
//! cargo run -p simple-dynamo -- --id 5556 --data-dir /tmp/dynamo/5556
//! # ... 5558, 5560, 5562
//! ```
//! Restarting a node with the same `--data-dir` makes it recover from its
//! peers before accepting commands.

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{self, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::select;
use tracing::{info, warn};

use simple_dynamo::boot::{BootMarker, StartupMode};
use simple_dynamo::cli::Cli;
use simple_dynamo::config::{ClusterFile, NodeConfig, default_peers, parse_peers};
use simple_dynamo::console::{ConsoleCommand, HELP};
use simple_dynamo::runtime::{NodeHandle, spawn_node};
use simple_dynamo::store::Record;

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = build_config(&cli)?;
    let handle = spawn_node(config).await?;
    if let Some(report) = handle.recovery() {
        info!(
            answered = report.peers_answered,
            expected = report.peers_expected,
            kept = report.kept,
            timed_out = report.timed_out,
            "recovered from peers"
        );
    }

    write_stdout(&format!(
        "node {} ready on {}. Type HELP (or h) for commands.",
        handle.id(),
        handle.local_addr()
    ))
    .await?;

    let result = run_console(&handle).await;
    handle.shutdown().await?;
    result
}

fn build_config(cli: &Cli) -> Result<NodeConfig> {
    let file = cli.config.as_deref().map(ClusterFile::load).transpose()?;

    let peers = if !cli.peer.is_empty() {
        parse_peers(&cli.peer)?
    } else if let Some(peers) = file.as_ref().map(ClusterFile::peers).transpose()?.flatten() {
        peers
    } else {
        default_peers()?
    };

    let mut config = NodeConfig::new(cli.id.clone(), peers)?;
    if let Some(listen) = cli.listen {
        config.listen_addr = listen;
    }
    if let Some(file) = &file {
        file.apply(&mut config.tuning);
    }
    if let Some(quorum) = cli.read_quorum {
        config.tuning.read_quorum = quorum;
    }
    config.startup = match &cli.data_dir {
        Some(dir) => BootMarker::new(dir).detect()?,
        None => StartupMode::FirstBoot,
    };
    config.validate()?;
    Ok(config)
}

async fn run_console(handle: &NodeHandle) -> Result<()> {
    let mut stdin = BufReader::new(tokio::io::stdin());
    let mut input = String::new();

    loop {
        input.clear();
        select! {
            bytes_read = stdin.read_line(&mut input) => {
                if bytes_read.context("failed to read stdin")? == 0 {
                    break;
                }
                if !execute(handle, &input).await? {
                    break;
                }
            }
            ctrl_c = tokio::signal::ctrl_c() => {
                if let Err(error) = ctrl_c {
                    warn!(?error, "ctrl-c handler failed");
                }
                break;
            }
        }
    }
    Ok(())
}

/// Runs one console line. Returns `false` when the console should exit.
async fn execute(handle: &NodeHandle, line: &str) -> Result<bool> {
    if line.trim().is_empty() {
        return Ok(true);
    }

    match ConsoleCommand::parse(line) {
        Ok(ConsoleCommand::Put { key, value }) => {
            handle.put(key.clone(), value.clone());
            write_stdout(&format!("OK: {key} = {value}")).await?;
        }
        Ok(ConsoleCommand::Get { key }) => match handle.get(&key).await {
            Ok(Some(value)) => write_stdout(&format!("{key} = {value}")).await?,
            Ok(None) => write_stdout(&format!("{key} not found")).await?,
            Err(err) => write_stderr(&format!("ERROR: {err}")).await?,
        },
        Ok(ConsoleCommand::Delete { key }) => {
            let rows = handle.delete(&key);
            write_stdout(&format!("deleted {key} ({rows} local row(s))")).await?;
        }
        Ok(ConsoleCommand::LocalDump) => print_records(&handle.local_dump()).await?,
        Ok(ConsoleCommand::GlobalDump) => match handle.dump_all().await {
            Ok(records) => print_records(&records).await?,
            Err(err) => write_stderr(&format!("ERROR: {err}")).await?,
        },
        Ok(ConsoleCommand::Status) => {
            let status = handle.status();
            write_stdout(&format!(
                "Node {} | consistent: {} | stored: {}",
                status.id, status.consistent, status.stored
            ))
            .await?;
            for member in status.members {
                let marker = if member.id == status.id { "*" } else { " " };
                let state = if member.alive { "up" } else { "down" };
                write_stdout(&format!("{marker} {:<8} {} {state}", member.id, member.hash)).await?;
            }
        }
        Ok(ConsoleCommand::Help) => write_stdout(HELP).await?,
        Ok(ConsoleCommand::Exit) => {
            write_stdout("Shutting down...").await?;
            return Ok(false);
        }
        Err(err) => write_stderr(&format!("ERROR: {err}")).await?,
    }
    Ok(true)
}

async fn print_records(records: &[Record]) -> io::Result<()> {
    if records.is_empty() {
        return write_stdout("(no records)").await;
    }
    for record in records {
        write_stdout(&format!("{} = {}", record.key, record.value)).await?;
    }
    write_stdout(&format!("({} record(s))", records.len())).await
}

async fn write_stdout(line: &str) -> io::Result<()> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(line.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await
}

async fn write_stderr(line: &str) -> io::Result<()> {
    let mut stderr = tokio::io::stderr();
    stderr.write_all(line.as_bytes()).await?;
    stderr.write_all(b"\n").await?;
    stderr.flush().await
}
