pub mod config;
pub mod error;
pub mod logger;
pub mod media;
pub mod peer;
pub mod session;
pub mod signaling;
pub mod utils;

#[cfg(test)]
pub(crate) mod test_support;

pub use config::SessionConfig;
pub use error::{CaptureError, Error, Result};
pub use logger::Notice;
pub use media::{MediaSelection, SyntheticDevices};
pub use peer::{Endpoint, RtcEngineFactory};
pub use session::{Session, SessionPhase};

use clap::Parser;
use media::DeviceCatalog;
use signaling::{decode_envelope, encode_envelope, DescriptionEnvelope};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

/// Loopback call between two in-process peers.
#[derive(Parser, Debug)]
#[command(name = "peerlink", version, about)]
pub struct Cli {
    /// Session config (JSON); defaults apply when omitted
    #[arg(long, env = "PEERLINK_CONFIG")]
    pub config: Option<PathBuf>,

    /// Audio input device id
    #[arg(long)]
    pub audio: Option<String>,

    /// Video input device id
    #[arg(long)]
    pub video: Option<String>,

    /// Print the device catalog and exit
    #[arg(long)]
    pub list_devices: bool,

    /// Negotiate step by step, passing each description through its portable envelope
    #[arg(long)]
    pub manual: bool,

    /// Counter values to receive before hanging up
    #[arg(long, default_value_t = 3)]
    pub messages: usize,

    #[arg(long, default_value_t = 15)]
    pub timeout_secs: u64,
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    logger::init();

    let config = match &cli.config {
        Some(path) => SessionConfig::load(path)?,
        None => SessionConfig::default(),
    };
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| Error::Config(format!("cannot start runtime: {e}")))?;
    runtime.block_on(run_loopback(cli, config))
}

async fn run_loopback(cli: Cli, config: SessionConfig) -> Result<()> {
    let factory = RtcEngineFactory::new(&config)?;
    let devices = SyntheticDevices::new(config.devices.clone());
    let mut session = Session::new(config, devices, factory);

    let mut notices = session.subscribe();
    let printer = tokio::spawn(async move {
        while let Some(notice) = notices.recv().await {
            print_notice(&notice);
        }
    });

    let catalog = session.enumerate_devices().await?;
    if cli.list_devices {
        print_catalog(&catalog);
        return Ok(());
    }

    session
        .start(MediaSelection {
            audio: cli.audio,
            video: cli.video,
        })
        .await?;

    if cli.manual {
        negotiate_manually(&mut session).await?;
    } else {
        session.negotiate().await?;
    }

    let wanted = cli.messages;
    let done = session
        .run_until(Duration::from_secs(cli.timeout_secs), |s| {
            s.received().len() >= wanted
        })
        .await;
    let received = session.received().len();
    session.hangup().await;
    drop(session);
    let _ = printer.await;

    if done {
        info!(received, "loopback call complete");
        Ok(())
    } else {
        Err(Error::DataChannel(format!(
            "received {received} of {wanted} messages before timing out"
        )))
    }
}

/// Offer and answer each take a trip through the envelope encoding, the way
/// they would when pasted between two machines.
async fn negotiate_manually<D, F>(session: &mut Session<D, F>) -> Result<()>
where
    D: media::MediaDevices,
    F: peer::EngineFactory,
{
    let offer = session.create_offer().await?;
    let wire = encode_envelope(&DescriptionEnvelope::new(offer))?;
    println!("offer:\n{wire}\n");
    session.apply_offer(decode_envelope(&wire)?.sdp).await?;

    let answer = session.create_answer().await?;
    let wire = encode_envelope(&DescriptionEnvelope::new(answer))?;
    println!("answer:\n{wire}\n");
    session.apply_answer(decode_envelope(&wire)?.sdp).await
}

fn print_catalog(catalog: &DeviceCatalog) {
    println!("audio inputs:");
    for option in &catalog.audio {
        println!("  {}  {}", option.device_id, option.label);
    }
    println!("video inputs:");
    for option in &catalog.video {
        println!("  {}  {}", option.device_id, option.label);
    }
}

fn print_notice(notice: &Notice) {
    match notice {
        Notice::Phase(phase) => println!("phase: {phase:?}"),
        Notice::Description {
            endpoint,
            description,
        } => println!("{endpoint} {:?}:\n{}", description.kind, description.sdp),
        Notice::CounterSent(value) => println!("sent {value}"),
        Notice::CounterReceived(value) => println!("received {value}"),
        Notice::RemoteTrack(track) => println!("remote track {} ({:?})", track.id, track.kind),
        Notice::Error(message) => eprintln!("error: {message}"),
    }
}
