use nowplaying_proto::config::LoggingConfig;
use nowplaying_proto::protocol::PluginCommand;
use std::path::PathBuf;
use tokio::sync::broadcast;
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Forwards WARN and ERROR events to the host's log view.
pub struct HostLogLayer {
    sender: broadcast::Sender<PluginCommand>,
}

impl HostLogLayer {
    pub fn new(sender: broadcast::Sender<PluginCommand>) -> Self {
        Self { sender }
    }
}

impl<S> tracing_subscriber::Layer<S> for HostLogLayer
where
    S: tracing::Subscriber,
{
    fn on_event(
        &self,
        event: &tracing::Event<'_>,
        _ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        let level = event.metadata().level();
        if !matches!(*level, tracing::Level::WARN | tracing::Level::ERROR) {
            return;
        }

        let mut message = String::new();
        let now = chrono::Local::now();
        message.push_str(&format!("{} ", now.format("%H:%M:%S")));

        let mut visitor = MessageVisitor(&mut message);
        event.record(&mut visitor);

        // No host connected is fine
        let _ = self.sender.send(PluginCommand::Log {
            level: level.to_string(),
            message,
        });
    }
}

struct MessageVisitor<'a>(&'a mut String);

impl<'a> tracing::field::Visit for MessageVisitor<'a> {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.0.push_str(&format!("{:?}", value));
        } else {
            self.0.push_str(&format!(" {}={:?}", field.name(), value));
        }
    }
}

/// `RUST_LOG` wins; otherwise the configured level with HTTP client noise
/// held at warn.
pub fn filter_directive(config: &LoggingConfig) -> String {
    format!("{},hyper=warn,reqwest=warn,tungstenite=warn", config.level)
}

/// File log plus host forwarding.  Returns the log file path.
pub fn init(
    config: &LoggingConfig,
    host_tx: broadcast::Sender<PluginCommand>,
) -> anyhow::Result<PathBuf> {
    let data_dir = nowplaying_proto::platform::data_dir();
    std::fs::create_dir_all(&data_dir)?;
    let log_path = data_dir.join("plugin.log");

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(log_file)
        .with_ansi(false);

    let directive = filter_directive(config);
    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(HostLogLayer::new(host_tx))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(directive)),
        )
        .init();

    install_panic_hook();
    info!("Log file: {:?}", log_path);
    Ok(log_path)
}

/// Panics are logged before the default hook runs.
fn install_panic_hook() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        error!("Panic: {}", panic_info);
        default_hook(panic_info);
    }));
}
