use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, ValueHint};

/// Command-line arguments for a ring member.
#[derive(Parser, Debug)]
#[command(author, version, about = "Run one member of a simple Dynamo ring", long_about = None)]
pub struct Cli {
    /// This node's id; must be one of the ring members.
    #[arg(long)]
    pub id: String,

    /// Address to listen on. Defaults to this node's entry in the peer map.
    #[arg(long, value_hint = ValueHint::Hostname)]
    pub listen: Option<SocketAddr>,

    /// Peer map as id=addr entries, comma separated or repeated (must include
    /// self). Defaults to the classic five-node ring on derived ports.
    #[arg(long, value_delimiter = ',', value_hint = ValueHint::Other)]
    pub peer: Vec<String>,

    /// JSON cluster file with members and timeout overrides.
    #[arg(long, value_hint = ValueHint::FilePath)]
    pub config: Option<PathBuf>,

    /// Directory holding the boot marker. Without it every start is a first
    /// boot and no recovery runs.
    #[arg(long, value_hint = ValueHint::DirPath)]
    pub data_dir: Option<PathBuf>,

    /// Matching replica replies a remote read waits for (1 to 3).
    #[arg(long)]
    pub read_quorum: Option<usize>,
}
