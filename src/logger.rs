use crate::peer::types::{Endpoint, RemoteTrack, SessionDescription};
use crate::session::SessionPhase;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::time::FormatTime;
use tracing_subscriber::EnvFilter;

/// Local wall-clock timestamps with millisecond precision.
struct LocalTime;

impl FormatTime for LocalTime {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"))
    }
}

/// Installs the global subscriber. `RUST_LOG` wins over the build default.
/// Calling it twice is harmless.
pub fn init() {
    let default = if crate::config::LOGGING_ENABLED {
        "info"
    } else {
        "off"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(LocalTime)
        .with_target(false)
        .try_init();
}

/// What the UI layer gets told about.
#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    Phase(SessionPhase),
    /// A description was created and may be shown/edited before it is applied
    Description {
        endpoint: Endpoint,
        description: SessionDescription,
    },
    CounterSent(u64),
    CounterReceived(u64),
    RemoteTrack(RemoteTrack),
    Error(String),
}

/// Fan-out of session notices to an optional UI subscriber.
#[derive(Debug, Default)]
pub struct Notifier {
    tx: Option<mpsc::UnboundedSender<Notice>>,
}

impl Notifier {
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<Notice> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.tx = Some(tx);
        rx
    }

    fn emit(&self, notice: Notice) {
        if let Some(tx) = &self.tx {
            if tx.send(notice).is_err() {
                debug!("notice subscriber is gone");
            }
        }
    }

    pub fn emit_phase(&self, phase: SessionPhase) {
        info!(?phase, "session phase changed");
        self.emit(Notice::Phase(phase));
    }

    pub fn emit_description(&self, endpoint: Endpoint, description: &SessionDescription) {
        debug!(%endpoint, kind = ?description.kind, "{}", description.sdp);
        self.emit(Notice::Description {
            endpoint,
            description: description.clone(),
        });
    }

    pub fn emit_sent(&self, value: u64) {
        info!("data channel send counter: {value}");
        self.emit(Notice::CounterSent(value));
    }

    pub fn emit_received(&self, value: u64) {
        info!("data channel receive counter: {value}");
        self.emit(Notice::CounterReceived(value));
    }

    pub fn emit_remote_track(&self, track: &RemoteTrack) {
        info!(track = %track.id, stream = %track.stream_id, "received remote track");
        self.emit(Notice::RemoteTrack(track.clone()));
    }

    pub fn emit_error(&self, message: impl Into<String>) {
        let message = message.into();
        warn!("{message}");
        self.emit(Notice::Error(message));
    }
}
