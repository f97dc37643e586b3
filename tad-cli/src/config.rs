use std::path::PathBuf;

use structopt::StructOpt;

/// Craft frames from JSON templates and match received frames against JSON patterns.
#[derive(Clone, StructOpt)]
#[structopt(name = "tad")]
pub struct Config {
    /// Runtime configuration file, `TAD_CONFIG` is used when absent.
    #[structopt(long = "config", parse(from_os_str))]
    pub config: Option<PathBuf>,

    /// The layer stack, a JSON array of layer descriptions top-most first.
    #[structopt(short = "l", long = "layers", parse(from_os_str))]
    pub layers: PathBuf,

    #[structopt(subcommand)]
    pub command: Command,
}

#[derive(Clone, StructOpt)]
pub enum Command {
    /// Print the frames a template generates, one hex line each.
    #[structopt(name = "gen")]
    Gen(Gen),

    /// Send the frames of a template on an interface.
    #[structopt(name = "send")]
    Send(Send),

    /// Receive frames matching a pattern and print them as JSON.
    #[structopt(name = "recv")]
    Recv(Recv),
}

#[derive(Clone, StructOpt)]
pub struct Gen {
    /// The template, as JSON.
    #[structopt(parse(from_os_str))]
    pub template: PathBuf,
}

#[derive(Clone, StructOpt)]
pub struct Send {
    /// Interface to send on.
    pub interface: String,
    /// The template, as JSON.
    #[structopt(parse(from_os_str))]
    pub template: PathBuf,
    /// Send the template this many times.
    #[structopt(short = "n", default_value = "1")]
    pub repeat: usize,
    /// Treat the template as a TCP segment and advance its sequence number between copies.
    #[structopt(long = "flood")]
    pub flood: bool,
}

#[derive(Clone, StructOpt)]
pub struct Recv {
    /// Interface to receive on.
    pub interface: String,
    /// The pattern, as JSON.
    #[structopt(parse(from_os_str))]
    pub pattern: PathBuf,
    /// Stop after this many matches.
    #[structopt(short = "n")]
    pub count: Option<usize>,
    /// Stop after this many milliseconds.
    #[structopt(short = "t", long = "timeout")]
    pub timeout_ms: Option<u64>,
    /// Also deliver frames sent by this host.
    #[structopt(long = "outgoing")]
    pub outgoing: bool,
}

impl Config {
    pub fn from_args() -> Self {
        StructOpt::from_args()
    }
}
