use crate::bus;
use crate::config::schema::AppConfig;
use crate::config::watcher;
use crate::console::{self, output::OutputSink};
use crate::detector::{self, ProximityStatus};
use crate::dispatch::Dispatcher;
use crate::driver::{audio, light, motor};
use crate::error::Result;
use crate::faults::{Fault, FaultRegister};
use crate::net::{NetService, NetStatus};
use crate::settings::SettingsStore;
use crate::show::{self, table::TableSet, Show};
use arc_swap::ArcSwap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::BufReader;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Spawned tasks plus what to flag if one of them dies early.
struct Tasks {
    handles: Vec<JoinHandle<()>>,
    faults: Arc<FaultRegister>,
    cancel: CancellationToken,
}

impl Tasks {
    fn spawn<F>(&mut self, name: &'static str, fault: Fault, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let inner = tokio::spawn(task);
        let faults = self.faults.clone();
        let cancel = self.cancel.clone();
        self.handles.push(tokio::spawn(async move {
            match inner.await {
                Ok(()) if cancel.is_cancelled() => {}
                Ok(()) => {
                    warn!("{name} task exited unexpectedly");
                    faults.set(fault);
                }
                Err(e) => {
                    error!("{name} task failed: {e}");
                    faults.set(fault);
                }
            }
        }));
    }
}

/// Run the propd daemon.
///
/// # Errors
/// Returns `PropError::Bus` if the message bus cannot be created. Every other
/// failure is contained in its task and recorded as a fault.
pub async fn run(config: AppConfig, config_path: PathBuf, output: OutputSink) -> Result<()> {
    let cancel = CancellationToken::new();
    let (bus, ends) = bus::create(&config.bus)?;
    let faults = Arc::new(FaultRegister::new());

    let settings = Arc::new(SettingsStore::new(&config.propd.settings_path));
    if let Err(e) = settings.begin() {
        warn!("settings not persisted, running on defaults: {e}");
        faults.set(Fault::ConfigRestore);
    }

    let tables = Arc::new(ArcSwap::from_pointee(TableSet::from_config(&config.tables)));
    let prox_status = Arc::new(ProximityStatus::default());
    let net_status = Arc::new(NetStatus::new(&config.network));

    let mut tasks = Tasks {
        handles: Vec::new(),
        faults: faults.clone(),
        cancel: cancel.clone(),
    };

    let orchestrator = Show::new(
        bus.clone(),
        tables.clone(),
        config.show.turnaround_ms,
        config.show.autostart,
    );
    tasks.spawn(
        "show",
        Fault::ShowTask,
        show::run(
            orchestrator,
            ends.show,
            Duration::from_millis(config.show.tick_ms),
            cancel.clone(),
        ),
    );

    tasks.spawn(
        "proximity",
        Fault::ProxDetectTask,
        detector::run(
            config.detector.clone(),
            bus.show.clone(),
            prox_status.clone(),
            faults.clone(),
            cancel.clone(),
        ),
    );

    let net = NetService {
        config: config.network.clone(),
        settings: settings.clone(),
        show: bus.show.clone(),
        status: net_status.clone(),
        faults: faults.clone(),
    };
    tasks.spawn("network", Fault::NetworkTask, net.run(ends.net, cancel.clone()));

    tasks.spawn(
        "audio",
        Fault::AudioTask,
        audio::run(
            config.audio.clone(),
            settings.volume(),
            ends.audio,
            faults.clone(),
            cancel.clone(),
        ),
    );
    tasks.spawn(
        "light",
        Fault::LightTask,
        light::run(config.light.clone(), ends.light, cancel.clone()),
    );
    tasks.spawn(
        "motor",
        Fault::MotorTask,
        motor::run(config.motor.clone(), ends.motor, cancel.clone()),
    );

    if config.console.enabled {
        let (line_tx, line_rx) = mpsc::channel(config.console.queue_len);
        let dispatcher = Dispatcher {
            bus: bus.clone(),
            settings: settings.clone(),
            faults: faults.clone(),
            net: net_status,
            prox: prox_status,
        };
        tasks.spawn(
            "console",
            Fault::ConsoleTask,
            console::run_reader(BufReader::new(tokio::io::stdin()), line_tx, cancel.clone()),
        );
        tasks.spawn(
            "command",
            Fault::CommandExecTask,
            console::run_executor(dispatcher, line_rx, output.clone(), cancel.clone()),
        );
    }

    let watcher_cancel = cancel.clone();
    let watcher_tables = tables.clone();
    let watcher_handle = tokio::spawn(async move {
        if let Err(e) = watcher::watch_config(config_path, watcher_tables, watcher_cancel).await {
            error!("config watcher error: {e}");
        }
    });

    // The tasks hold their own senders; the daemon's copy is not needed.
    drop(bus);

    info!("propd running");
    if !faults.active().is_empty() {
        warn!("started with faults: {}", faults.report().replace('\n', ", "));
    }

    tokio::select! {
        () = cancel.cancelled() => {}
        () = async { tokio::signal::ctrl_c().await.ok(); } => {
            info!("received SIGINT, shutting down");
        }
    }

    info!("daemon shutting down...");
    cancel.cancel();

    let mut handles = tasks.handles;
    handles.push(watcher_handle);
    if tokio::time::timeout(SHUTDOWN_GRACE, futures::future::join_all(handles))
        .await
        .is_err()
    {
        warn!("tasks still running after {}s", SHUTDOWN_GRACE.as_secs());
    }

    info!("daemon stopped");
    Ok(())
}
