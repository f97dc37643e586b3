//! Craft and match packets from the command line.
//!
//! The layer stack, templates and patterns are JSON files. Call examples:
//!
//! * `tad -l demos/udp-ip4-eth.json gen demos/ping.json`
//! * `tad -l demos/udp-ip4-eth.json send eth0 demos/ping.json -n 10`
//! * `tad -l demos/udp-ip4-eth.json recv eth0 demos/any-udp.json -n 1 -t 5000`
use std::process;
use std::time::Duration;

use tracing_subscriber::EnvFilter;

use tad::csap::RecvOptions;
use tad::nds::{Node, Pattern, Template};
use tad::nic::RecvMode;
use tad_cli::config::{Command, Config};
use tad_cli::Result;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = Config::from_args();
    if let Err(err) = run(&config) {
        eprintln!("[-] {}", err);
        process::exit(1);
    }
}

fn run(config: &Config) -> Result<()> {
    let runtime = tad_cli::runtime(config.config.as_deref())?;
    let layers: Vec<Node> = tad_cli::load_json(&config.layers)?;

    match &config.command {
        Command::Gen(gen) => {
            let template: Template = tad_cli::load_json(&gen.template)?;
            for frame in tad_cli::generate(&runtime, &layers, &template)? {
                println!("{}", tad_cli::hex(&frame));
            }
        },
        Command::Send(send) => {
            let template: Template = tad_cli::load_json(&send.template)?;
            let endpoint = tad_cli::open_interface(&send.interface)?;
            let sent = tad_cli::send(&runtime, &layers, endpoint, &template, send.repeat, send.flood)?;
            eprintln!("[+] Sent {} frames on {}", sent, send.interface);
        },
        Command::Recv(recv) => {
            let pattern: Pattern = tad_cli::load_json(&recv.pattern)?;
            let endpoint = tad_cli::open_interface(&recv.interface)?;
            let mut mode = RecvMode::default();
            if recv.outgoing {
                mode = mode | RecvMode::OUTGOING;
            }
            let options = RecvOptions {
                timeout: recv.timeout_ms.map(Duration::from_millis),
                want_results: true,
                max_packets: recv.count,
                mode,
            };
            for result in tad_cli::receive(&runtime, &layers, endpoint, &pattern, options)? {
                println!("{}", tad_cli::result_json(&result));
            }
        },
    }

    Ok(())
}
