//! The building blocks of the `tad` command.
//!
//! Each command opens a CSAP on a fresh runtime, the layer stack, templates and patterns are read
//! from JSON files in the notation of [`tad::nds`].
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::{fs, io};

use serde::de::DeserializeOwned;
use serde_json::json;

use tad::config::{ConfigError, RuntimeConfig};
use tad::csap::{RecvOptions, RecvResult};
use tad::nds::{Node, Pattern, Template};
use tad::nic::{Endpoint, Loopback};
use tad::Runtime;

pub mod config;

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("cannot read {}: {source}", path.display())]
    Read { path: PathBuf, source: io::Error },
    #[error("{} is not valid: {source}", path.display())]
    Json { path: PathBuf, source: serde_json::Error },
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Tad(#[from] tad::Error),
    #[error("raw sockets are not available in this build")]
    NoRawSockets,
}

pub type Result<T> = core::result::Result<T, CliError>;

/// Read a JSON document.
pub fn load_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let text = fs::read_to_string(path)
        .map_err(|source| CliError::Read { path: path.to_owned(), source })?;
    serde_json::from_str(&text)
        .map_err(|source| CliError::Json { path: path.to_owned(), source })
}

/// Create the runtime from an explicit configuration file or the environment.
pub fn runtime(config: Option<&Path>) -> Result<Runtime> {
    let config = match config {
        Some(path) => RuntimeConfig::load(path)?,
        None => RuntimeConfig::from_env()?,
    };
    Ok(Runtime::new(config))
}

/// Build the frames of a template without touching the network.
pub fn generate(runtime: &Runtime, layers: &[Node], template: &Template) -> Result<Vec<Vec<u8>>> {
    let wire = Loopback::new();
    let id = runtime.csap_create(layers, Box::new(wire.clone()))?;
    let sent = runtime.csap(id)?.send(template);
    runtime.csap_destroy(id)?;
    sent?;
    Ok(wire.take_sent())
}

/// Send a template `repeat` times, returns the number of frames written.
///
/// With `flood` the template is built once and only the TCP sequence number changes between the
/// copies.
pub fn send(
    runtime: &Runtime,
    layers: &[Node],
    endpoint: Box<dyn Endpoint>,
    template: &Template,
    repeat: usize,
    flood: bool,
) -> Result<usize> {
    let id = runtime.csap_create(layers, endpoint)?;
    let csap = runtime.csap(id)?;
    let sent = if flood {
        csap.tcp_flood(template, repeat)
    } else {
        (0..repeat).try_fold(0, |total, _| csap.send(template).map(|sent| total + sent))
    };
    runtime.csap_destroy(id)?;
    Ok(sent?)
}

/// Receive until the options end the operation, returns the matched frames.
pub fn receive(
    runtime: &Runtime,
    layers: &[Node],
    endpoint: Box<dyn Endpoint>,
    pattern: &Pattern,
    options: RecvOptions,
) -> Result<Vec<RecvResult>> {
    let id = runtime.csap_create(layers, endpoint)?;
    let csap = runtime.csap(id)?;
    csap.recv_start(pattern, options)?;
    let matched = csap.wait(None);
    let results = csap.poll_results();
    runtime.csap_destroy(id)?;
    tracing::info!(csap = id, matched = results.len(), "receive done");
    matched?;
    Ok(results)
}

/// Open a raw socket on the named interface.
#[cfg(all(feature = "sys", target_os = "linux"))]
pub fn open_interface(name: &str) -> Result<Box<dyn Endpoint>> {
    Ok(Box::new(tad::nic::sys::RawSocket::new(name)?))
}

#[cfg(not(all(feature = "sys", target_os = "linux")))]
pub fn open_interface(_: &str) -> Result<Box<dyn Endpoint>> {
    Err(CliError::NoRawSockets)
}

/// Lower case hex, two digits per octet.
pub fn hex(frame: &[u8]) -> String {
    let mut line = String::with_capacity(2*frame.len());
    for byte in frame {
        let _ = write!(line, "{:02x}", byte);
    }
    line
}

/// A matched frame as one JSON object.
pub fn result_json(result: &RecvResult) -> serde_json::Value {
    json!({
        "unit": result.unit,
        "pdus": result.pdus,
        "payload": hex(&result.payload),
    })
}
