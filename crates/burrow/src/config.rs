//! CLI surface and runtime settings.

use crate::probe::ProbeOptions;
use burrow_common::base58;
use burrow_common::types::{ForwardSpec, Proto, DEFAULT_HOST};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// CLI interface for the tunnel daemon.
#[derive(Parser)]
#[command(name = "burrow", about = "Peer-to-peer port forwarding through a DHT overlay")]
#[command(version)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Path to a settings file (TOML).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Increase log verbosity (repeat for more detail).
    #[arg(short = 'v', long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Write logs to a file instead of stderr.
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,
}

/// Available subcommands.
#[derive(Subcommand)]
pub enum Commands {
    /// Expose local ports to peers that know this identity.
    Serve {
        /// Shared secret the identity keys are derived from.
        #[arg(long, env = "BURROW_SECRET")]
        secret: String,
        /// TCP port to expose (repeatable).
        #[arg(long = "tcp", value_name = "PORT")]
        tcp: Vec<u16>,
        /// UDP port to expose (repeatable).
        #[arg(long = "udp", value_name = "PORT")]
        udp: Vec<u16>,
        /// TCP-over-datagram port to expose (repeatable).
        #[arg(long = "tcpudp", value_name = "PORT")]
        tcpudp: Vec<u16>,
        /// Host the exposed services live on.
        #[arg(long, default_value = DEFAULT_HOST)]
        host: String,
    },
    /// Forward local ports to a peer's exposed services.
    Connect {
        /// Peer identity public key (base58).
        #[arg(long)]
        peer: String,
        /// Forward in `proto:remote[:local]` form (repeatable). The local
        /// port defaults to the remote port.
        #[arg(long = "forward", value_name = "PROTO:REMOTE[:LOCAL]")]
        forwards: Vec<String>,
    },
    /// Run every forward described by a JSON file.
    Run {
        /// Path to a JSON array of forward specs.
        file: PathBuf,
    },
    /// Print the identity public key derived from a secret.
    Identity {
        /// Shared secret the identity keys are derived from.
        #[arg(long, env = "BURROW_SECRET")]
        secret: String,
    },
}

/// Builds server forward specs from the `serve` arguments, preserving flag
/// order within each protocol (tcp, then udp, then tcpudp).
#[must_use]
pub fn server_specs(
    secret: &str,
    tcp: &[u16],
    udp: &[u16],
    tcpudp: &[u16],
    host: &str,
) -> Vec<ForwardSpec> {
    let mut specs = Vec::with_capacity(tcp.len() + udp.len() + tcpudp.len());
    let groups = [
        (Proto::Tcp, tcp),
        (Proto::Udp, udp),
        (Proto::TcpUdp, tcpudp),
    ];
    for (proto, ports) in groups {
        for &port in ports {
            specs.push(ForwardSpec::Server {
                proto,
                remote_port: port,
                host: host.to_string(),
                secret: secret.to_string(),
            });
        }
    }
    specs
}

/// Parses one `proto:remote[:local]` forward argument.
///
/// # Errors
///
/// Returns a description of what is malformed.
pub fn parse_forward(arg: &str) -> Result<(Proto, u16, u16), String> {
    let mut parts = arg.split(':');
    let proto: Proto = parts
        .next()
        .ok_or_else(|| format!("malformed forward {arg:?}"))?
        .parse()?;
    let remote: u16 = parts
        .next()
        .ok_or_else(|| format!("forward {arg:?} is missing a port"))?
        .parse()
        .map_err(|e| format!("bad remote port in {arg:?}: {e}"))?;
    let local = match parts.next() {
        Some(port) => port
            .parse()
            .map_err(|e| format!("bad local port in {arg:?}: {e}"))?,
        None => remote,
    };
    if parts.next().is_some() {
        return Err(format!("forward {arg:?} has too many components"));
    }
    Ok((proto, remote, local))
}

/// Builds client forward specs from the `connect` arguments.
///
/// # Errors
///
/// Returns a description of the first malformed argument.
pub fn client_specs(peer: &str, forwards: &[String]) -> Result<Vec<ForwardSpec>, String> {
    let peer_public_key =
        base58::decode_pubkey(peer).map_err(|e| format!("invalid peer key: {e}"))?;
    if forwards.is_empty() {
        return Err("at least one --forward is required".to_string());
    }
    forwards
        .iter()
        .map(|arg| {
            let (proto, remote_port, local_port) = parse_forward(arg)?;
            Ok(ForwardSpec::Client {
                proto,
                remote_port,
                local_port,
                peer_public_key,
            })
        })
        .collect()
}

/// Loads forward specs from the JSON document surface.
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed.
pub fn load_forwards(path: &Path) -> anyhow::Result<Vec<ForwardSpec>> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
    let specs: Vec<ForwardSpec> = serde_json::from_str(&text)
        .map_err(|e| anyhow::anyhow!("failed to parse {}: {e}", path.display()))?;
    Ok(specs)
}

/// Runtime tuning, layered: defaults, then an optional TOML file, then
/// `BURROW_`-prefixed environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Startup probe attempts before a client forward gives up.
    pub probe_attempts: u32,
    /// Delay between probe attempts, in milliseconds.
    pub probe_retry_delay_ms: u64,
    /// How long live bridges get to drain on shutdown, in milliseconds.
    pub shutdown_grace_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            probe_attempts: 3,
            probe_retry_delay_ms: 1000,
            shutdown_grace_ms: 5000,
        }
    }
}

impl Settings {
    /// Validates the settings values are within acceptable bounds.
    /// Returns Ok(()) if valid, Err with description otherwise.
    pub fn validate(&self) -> Result<(), String> {
        if self.probe_attempts == 0 {
            return Err("probe_attempts must be greater than 0".to_string());
        }
        if self.probe_attempts > 100 {
            return Err("probe_attempts exceeds reasonable limit (100)".to_string());
        }
        if self.probe_retry_delay_ms > 60_000 {
            return Err("probe_retry_delay_ms exceeds reasonable limit (60s)".to_string());
        }
        if self.shutdown_grace_ms > 600_000 {
            return Err("shutdown_grace_ms exceeds reasonable limit (10min)".to_string());
        }
        Ok(())
    }

    /// Delay between probe attempts.
    #[must_use]
    pub fn probe_retry_delay(&self) -> Duration {
        Duration::from_millis(self.probe_retry_delay_ms)
    }

    /// Grace period for draining live bridges on shutdown.
    #[must_use]
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    /// Probe policy with the given per-attempt timeout.
    #[must_use]
    pub fn probe_options(&self, timeout: Duration) -> ProbeOptions {
        ProbeOptions {
            attempts: self.probe_attempts,
            retry_delay: self.probe_retry_delay(),
            timeout,
        }
    }
}

/// Loads settings from defaults, an optional TOML file, and the environment.
///
/// # Errors
///
/// Returns an error if the settings file cannot be read or parsed.
#[allow(clippy::cast_possible_wrap)]
pub fn load_settings(path: Option<&Path>) -> anyhow::Result<Settings> {
    let defaults = Settings::default();
    let mut builder = config::Config::builder()
        .set_default("probe_attempts", i64::from(defaults.probe_attempts))?
        .set_default("probe_retry_delay_ms", defaults.probe_retry_delay_ms as i64)?
        .set_default("shutdown_grace_ms", defaults.shutdown_grace_ms as i64)?;

    if let Some(config_path) = path {
        if config_path.exists() {
            builder = builder.add_source(config::File::from(config_path));
        }
    }
    builder = builder.add_source(config::Environment::with_prefix("BURROW"));

    let settings = builder.build()?.try_deserialize()?;
    Ok(settings)
}
