use crate::error::{PropError, Result};
use crate::show::table::TableSet;
use arc_swap::ArcSwap;
use notify::RecursiveMode;
use notify_debouncer_mini::{new_debouncer, DebounceEventResult, DebouncedEventKind};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const DEBOUNCE: Duration = Duration::from_millis(500);

/// Re-read `path` and publish its show tables.
///
/// # Errors
/// Any load or validation error; `tables` is left as it was.
pub fn reload_tables(path: &Path, tables: &ArcSwap<TableSet>) -> Result<()> {
    let config = crate::config::load(path)?;
    tables.store(Arc::new(TableSet::from_config(&config.tables)));
    Ok(())
}

/// Watch the config file and swap in its show tables when it changes.
///
/// The parent directory is watched so editors that save by rename are seen.
/// Only the tables are live-reloaded; other sections take effect on restart.
///
/// # Errors
/// Returns `PropError::Watcher` if the file watcher cannot be initialized.
pub async fn watch_config(
    config_path: PathBuf,
    tables: Arc<ArcSwap<TableSet>>,
    cancel: CancellationToken,
) -> Result<()> {
    let (changed_tx, mut changed_rx) = mpsc::channel::<()>(1);
    let (ready_tx, ready_rx) = oneshot::channel();
    let file = config_path.clone();
    let thread_cancel = cancel.clone();

    // The debouncer owns a thread and must stay alive for the whole watch.
    tokio::task::spawn_blocking(move || {
        let dir = match file.parent() {
            Some(d) if !d.as_os_str().is_empty() => d.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let target = file.clone();
        let handler = move |res: DebounceEventResult| match res {
            Ok(events) => {
                let hit = events.iter().any(|e| {
                    e.kind == DebouncedEventKind::Any && e.path.file_name() == target.file_name()
                });
                if hit {
                    // A pending signal already covers this change.
                    let _ = changed_tx.try_send(());
                }
            }
            Err(e) => warn!("file watcher error: {e}"),
        };

        let mut debouncer = match new_debouncer(DEBOUNCE, handler) {
            Ok(d) => d,
            Err(e) => {
                let _ = ready_tx.send(Err(PropError::Watcher(e.to_string())));
                return;
            }
        };
        if let Err(e) = debouncer.watcher().watch(&dir, RecursiveMode::NonRecursive) {
            let _ = ready_tx.send(Err(PropError::Watcher(format!("{}: {e}", dir.display()))));
            return;
        }
        let _ = ready_tx.send(Ok(()));

        while !thread_cancel.is_cancelled() {
            std::thread::sleep(Duration::from_millis(250));
        }
        debug!("config watcher thread stopped");
    });

    ready_rx
        .await
        .map_err(|_| PropError::Watcher("watcher thread exited".to_string()))??;
    info!("watching config file: {}", config_path.display());

    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                info!("config watcher shutting down");
                return Ok(());
            }
            Some(()) = changed_rx.recv() => {
                match reload_tables(&config_path, &tables) {
                    Ok(()) => info!("config changed, show tables reloaded"),
                    Err(e) => warn!("config reload failed, keeping current tables: {e}"),
                }
            }
        }
    }
}
