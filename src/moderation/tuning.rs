//! Moderation tuning with hot-reload from `config/moderation.json`.
//!
//! On each `current()` call we check the file's modified time and reload if
//! changed. A file that fails to parse or compile keeps the previous tuning.

use std::{
    fs,
    path::{Path, PathBuf},
    sync::{Arc, PoisonError, RwLock},
    time::SystemTime,
};

use anyhow::{Context, Result};

use crate::moderation::signals::{CompiledTuning, ModerationTuning};

pub const DEFAULT_TUNING_PATH: &str = "config/moderation.json";

#[derive(Debug)]
pub struct HotReloadTuning {
    path: Option<PathBuf>,
    inner: RwLock<State>,
}

#[derive(Debug)]
struct State {
    compiled: Arc<CompiledTuning>,
    last_modified: Option<SystemTime>,
}

impl HotReloadTuning {
    /// Watch `path`; built-in defaults apply until (and unless) it loads.
    pub fn new(path: Option<&Path>) -> Result<Self> {
        Ok(Self {
            path: path.map(Path::to_path_buf),
            inner: RwLock::new(State {
                compiled: Arc::new(CompiledTuning::compile(ModerationTuning::default())?),
                last_modified: None,
            }),
        })
    }

    /// Fixed tuning, no file behind it.
    pub fn fixed(tuning: ModerationTuning) -> Result<Self> {
        Ok(Self {
            path: None,
            inner: RwLock::new(State {
                compiled: Arc::new(CompiledTuning::compile(tuning)?),
                last_modified: None,
            }),
        })
    }

    /// Get the latest tuning, reloading if the config file changed.
    pub fn current(&self) -> Arc<CompiledTuning> {
        let Some(path) = &self.path else {
            return self.snapshot();
        };
        let mtime = match fs::metadata(path).and_then(|m| m.modified()) {
            Ok(t) => t,
            // If file isn't there, keep what we have.
            Err(_) => return self.snapshot(),
        };

        {
            let guard = self.inner.read().unwrap_or_else(PoisonError::into_inner);
            if guard.last_modified == Some(mtime) {
                return guard.compiled.clone();
            }
        }

        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        // Double-check in case of races.
        if guard.last_modified != Some(mtime) {
            match load_tuning_file(path) {
                Ok(compiled) => {
                    tracing::info!(target: "moderation", path = %path.display(), "moderation tuning reloaded");
                    guard.compiled = Arc::new(compiled);
                }
                Err(e) => {
                    tracing::warn!(target: "moderation", path = %path.display(), error = ?e, "moderation tuning rejected, keeping previous");
                }
            }
            guard.last_modified = Some(mtime);
        }
        guard.compiled.clone()
    }

    fn snapshot(&self) -> Arc<CompiledTuning> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .compiled
            .clone()
    }
}

/// Load and compile tuning directly (no caching). Public for tests/tools.
pub fn load_tuning_file(path: &Path) -> Result<CompiledTuning> {
    let bytes = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let tuning: ModerationTuning =
        serde_json::from_slice(&bytes).with_context(|| format!("parsing {}", path.display()))?;
    CompiledTuning::compile(tuning)
}
