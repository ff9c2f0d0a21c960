use eyre::{eyre, WrapErr};
use mountd::ipc::{ChannelCommandSource, IncomingCommand, MountStatus, StatusSink};
use mountd::mount_control::comm::{NullPort, Port, TtyPort};
use mountd::util::{IpcError, Mailer, NullMailer, ProcessMailer, SignalFlags, SystemClock};
use mountd::{EngineIo, MountConfig, MountEngine};
use std::io::{BufRead, Write};
use tracing::{error, info, warn};

/// Status sink for standalone operation: one JSON record per line on
/// stdout. The real observatory link wires its own `StatusSink` through
/// the library instead.
struct JsonStatusSink {
    out: std::io::Stdout,
}

impl StatusSink for JsonStatusSink {
    fn publish(&mut self, status: &MountStatus) -> Result<bool, IpcError> {
        let line = serde_json::to_string(status)
            .map_err(|e| IpcError(format!("status encode failed: {}", e)))?;
        let mut lock = self.out.lock();
        writeln!(lock, "{}", line).map_err(|e| IpcError(format!("status write failed: {}", e)))?;
        Ok(true)
    }
}

/// Feed newline-delimited JSON commands from stdin into the engine.
fn spawn_stdin_reader(tx: std::sync::mpsc::Sender<IncomingCommand>) {
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let line = match line {
                Ok(l) => l,
                Err(e) => {
                    warn!("stdin closed: {}", e);
                    break;
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<IncomingCommand>(&line) {
                Ok(cmd) => {
                    if tx.send(cmd).is_err() {
                        break;
                    }
                }
                Err(e) => warn!("unparseable command line: {}", e),
            }
        }
    });
}

fn open_port(path: &str, baud: u32, bypassed: bool) -> eyre::Result<Box<dyn Port>> {
    if bypassed {
        return Ok(Box::new(NullPort));
    }
    let port = TtyPort::open(path, baud).wrap_err_with(|| format!("opening {}", path))?;
    info!("{} opened", path);
    Ok(Box::new(port))
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> eyre::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config_path = std::env::args()
        .nth(1)
        .ok_or_else(|| eyre!("usage: mountd <config-file>"))?;
    let cfg = MountConfig::load(&config_path).map_err(|e| eyre!("{}", e))?;
    info!("starting mountd with config {}", config_path);

    let mount_port = open_port(&cfg.mount_dev, cfg.mount_baud, cfg.testmode.no_mount())?;
    let focus_port = open_port(&cfg.focus_dev, cfg.focus_baud, cfg.testmode.no_focus())?;

    let (tx, source) = ChannelCommandSource::new();
    spawn_stdin_reader(tx);

    let mailer: Box<dyn Mailer> = if cfg.errormail.is_empty() {
        Box::new(NullMailer)
    } else {
        Box::new(ProcessMailer::new(cfg.errormail.clone()))
    };

    let signals = SignalFlags::new();
    signals.install().wrap_err("installing signal handlers")?;

    let io = EngineIo {
        mount_port,
        focus_port,
        clock: Box::new(SystemClock),
        source: Box::new(source),
        sink: Box::new(JsonStatusSink {
            out: std::io::stdout(),
        }),
        mailer,
        cal_feed: None,
        focus_feed: None,
        signals,
        config_path: Some(config_path.into()),
    };

    let mut engine = MountEngine::new(cfg, io);
    match engine.run().await {
        Ok(()) => Ok(()),
        Err(fatal) => {
            error!("{}", fatal);
            std::process::exit(1);
        }
    }
}
