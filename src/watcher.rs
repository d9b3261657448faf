use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver};

use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use voxstream_world::{StreamConfig, load_config_from_path};

/// Watches the stream config file and hands back a freshly parsed copy after it changes.
pub struct ConfigWatcher {
    path: PathBuf,
    rx: Receiver<()>,
    _watcher: RecommendedWatcher,
}

impl ConfigWatcher {
    pub fn new(path: &Path) -> notify::Result<Self> {
        let (tx, rx) = mpsc::channel::<()>();
        let mut watcher = notify::recommended_watcher(move |res: Result<notify::Event, notify::Error>| {
            if let Ok(event) = res {
                match event.kind {
                    EventKind::Modify(_) | EventKind::Create(_) | EventKind::Any => {
                        let _ = tx.send(());
                    }
                    _ => {}
                }
            }
        })?;
        watcher.watch(path, RecursiveMode::NonRecursive)?;
        Ok(Self {
            path: path.to_path_buf(),
            rx,
            _watcher: watcher,
        })
    }

    /// Drains pending change events; `Some` once per burst that parses cleanly.
    pub fn poll(&self) -> Option<StreamConfig> {
        let mut changed = false;
        for _ in self.rx.try_iter() {
            changed = true;
        }
        if !changed {
            return None;
        }
        if !self.path.exists() {
            log::warn!("stream config missing: {}", self.path.display());
            return None;
        }
        match load_config_from_path(&self.path) {
            Ok(cfg) => {
                log::info!("stream config reloaded from {}", self.path.display());
                Some(cfg)
            }
            Err(e) => {
                log::warn!("stream config reload failed ({}): {}", self.path.display(), e);
                None
            }
        }
    }
}
