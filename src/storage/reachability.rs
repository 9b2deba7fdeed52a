use std::{
    os::unix::fs::MetadataExt as _,
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use tokio::{
    sync::watch,
    task::JoinHandle,
    time::{MissedTickBehavior, interval},
};
use tracing::{info, warn};

/// Whether the backup medium is currently usable.
///
/// Written only by the poller; the storage writer reads it before touching
/// the mirror.
#[derive(Debug, Clone)]
pub struct BackupReachability(Arc<AtomicBool>);

impl BackupReachability {
    pub fn new(reachable: bool) -> Self {
        Self(Arc::new(AtomicBool::new(reachable)))
    }

    pub fn is_reachable(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Returns the previous value.
    pub fn set(&self, reachable: bool) -> bool {
        self.0.swap(reachable, Ordering::AcqRel)
    }
}

/// Checks that `path` is a directory and, with `require_mount`, that it sits
/// on a different device from its parent, i.e. a USB stick is actually
/// mounted there rather than the bare mount point on the SD card.
pub fn probe_backup(path: &Path, require_mount: bool) -> bool {
    let Ok(metadata) = path.metadata() else {
        return false;
    };
    if !metadata.is_dir() {
        return false;
    }
    if !require_mount {
        return true;
    }

    let Some(parent) = path.parent() else {
        return false;
    };
    match parent.metadata() {
        Ok(parent_metadata) => parent_metadata.dev() != metadata.dev(),
        Err(_) => false,
    }
}

/// Re-probes the backup path every `period` until `shutdown` flips,
/// publishing the result into `reachability`.
pub fn spawn_reachability_poller(
    path: PathBuf,
    require_mount: bool,
    period: Duration,
    reachability: BackupReachability,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                Ok(()) = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }

            let reachable = probe_backup(&path, require_mount);
            let was_reachable = reachability.set(reachable);
            match (was_reachable, reachable) {
                (false, true) => info!(?path, "backup medium reachable"),
                (true, false) => warn!(?path, "backup medium unreachable"),
                _ => {}
            }
        }
    })
}
