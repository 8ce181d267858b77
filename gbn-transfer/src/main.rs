//! Entry point for `gbn-transfer`.
//!
//! Parses CLI arguments and dispatches into either **send** or **receive**
//! mode.  All protocol work is delegated to library modules; `main.rs` owns
//! only process setup (logging, argument parsing, files and exit codes).

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};

use gbn_transfer::config::{
    ReceiverConfig, SenderConfig, DEFAULT_FIN_RETRIES, DEFAULT_HANDSHAKE_RETRIES,
    DEFAULT_IDLE_TIMEOUT, DEFAULT_LOSS_RATE,
};
use gbn_transfer::connection::ConnError;
use gbn_transfer::receiver;
use gbn_transfer::sender;
use gbn_transfer::simulator::{LossModel, NoLoss, RandomLoss};
use gbn_transfer::socket::Socket;

/// Reliable file transfer over UDP with Go-Back-N ARQ.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand)]
enum Mode {
    /// Serve one file request, then exit.
    Send {
        /// UDP port to listen on.
        listen_port: u16,
        /// Maximum number of unacknowledged blocks in flight.
        window_size: usize,
        /// Retransmission timeout in seconds.
        timeout_seconds: f64,
        /// Directory requested file names are resolved against.
        #[arg(long, default_value = ".")]
        root: PathBuf,
        /// FIN transmissions before giving up on a FIN-ACK.
        #[arg(long, default_value_t = DEFAULT_FIN_RETRIES)]
        fin_retries: u32,
        #[command(flatten)]
        net: NetArgs,
    },
    /// Fetch a file from a running sender.
    Receive {
        sender_host: String,
        sender_port: u16,
        /// Name of the file on the sender.
        remote_file: String,
        /// Where to write the received bytes.
        local_file: PathBuf,
        /// Requested payload bytes per DATA datagram.
        block_size: u32,
        /// Seconds without traffic after which the transfer is abandoned.
        #[arg(long, default_value_t = DEFAULT_IDLE_TIMEOUT.as_secs_f64())]
        idle_timeout: f64,
        /// REQUEST transmissions before the handshake fails.
        #[arg(long, default_value_t = DEFAULT_HANDSHAKE_RETRIES)]
        handshake_retries: u32,
        #[command(flatten)]
        net: NetArgs,
    },
}

#[derive(Args)]
struct NetArgs {
    /// Probability of dropping an outgoing DATA/ACK datagram.
    #[arg(long, default_value_t = DEFAULT_LOSS_RATE)]
    loss: f64,
    /// Seed for the loss generator (random if absent).
    #[arg(long)]
    seed: Option<u64>,
    /// Local address to bind.
    #[arg(long, default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    bind: IpAddr,
}

impl NetArgs {
    fn loss_model(&self) -> anyhow::Result<Box<dyn LossModel>> {
        anyhow::ensure!(
            (0.0..=1.0).contains(&self.loss),
            "--loss must be between 0 and 1, got {}",
            self.loss
        );
        if self.loss == 0.0 {
            return Ok(Box::new(NoLoss));
        }
        Ok(match self.seed {
            Some(seed) => Box::new(RandomLoss::new(self.loss, seed)),
            None => Box::new(RandomLoss::from_os_rng(self.loss)),
        })
    }
}

fn seconds(value: f64, flag: &str) -> anyhow::Result<Duration> {
    Duration::try_from_secs_f64(value)
        .ok()
        .filter(|d| !d.is_zero())
        .with_context(|| format!("{flag} must be a positive number of seconds, got {value}"))
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    // Initialise env_logger; set RUST_LOG to control verbosity.
    env_logger::init();

    let cli = Cli::parse();
    let outcome = match cli.mode {
        Mode::Send {
            listen_port,
            window_size,
            timeout_seconds,
            root,
            fin_retries,
            net,
        } => {
            let config = SenderConfig {
                window_size,
                timeout: seconds(timeout_seconds, "timeout_seconds")?,
                fin_retries,
                root,
            };
            let addr = SocketAddr::new(net.bind, listen_port);
            let socket = Socket::bind_with_loss(addr, net.loss_model()?)
                .await
                .with_context(|| format!("binding {addr}"))?;
            log::info!("Listening on {} (window={window_size})", socket.local_addr);

            sender::serve(socket, &config).await.map(|report| {
                log::info!("Sent {report:?}");
            })
        }
        Mode::Receive {
            sender_host,
            sender_port,
            remote_file,
            local_file,
            block_size,
            idle_timeout,
            handshake_retries,
            net,
        } => {
            let config = ReceiverConfig {
                block_size,
                idle_timeout: seconds(idle_timeout, "--idle-timeout")?,
                handshake_retries,
                ..ReceiverConfig::default()
            };
            let peer = tokio::net::lookup_host((sender_host.as_str(), sender_port))
                .await
                .with_context(|| format!("resolving {sender_host}"))?
                .next()
                .with_context(|| format!("no address for {sender_host}"))?;
            let socket = Socket::bind_with_loss(SocketAddr::new(net.bind, 0), net.loss_model()?)
                .await
                .context("binding receive socket")?;
            log::info!("Requesting {remote_file:?} from {peer}");

            receiver::fetch_to_file(socket, peer, &remote_file, &local_file, &config)
                .await
                .map(|report| {
                    log::info!("Received {report:?}");
                })
        }
    };

    match outcome {
        Ok(()) => Ok(ExitCode::SUCCESS),
        Err(e @ (ConnError::FileNotFound(_) | ConnError::RemoteFileNotFound(_))) => {
            log::error!("{e}");
            eprintln!("{e}");
            Ok(ExitCode::FAILURE)
        }
        Err(e) => Err(e.into()),
    }
}
