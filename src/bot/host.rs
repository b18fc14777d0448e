//! Task host: discovers Lua tasklets on disk, starts and stops them as
//! cooperative tokio tasks, and persists the enabled set.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use indexmap::IndexMap;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::bot::context::BotContext;
use crate::bot::script::{self, LogRing};
use crate::bot::settings::BotSettings;
use crate::error::{Error, Result};

struct TaskEntry {
    enabled: bool,
    source_digest: u32,
    handle: Option<JoinHandle<()>>,
    log: LogRing,
}

impl TaskEntry {
    fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }
}

/// Status row surfaced by `list_actions`.
#[derive(Debug, Clone, Serialize)]
pub struct TaskStatus {
    pub name: String,
    pub enabled: bool,
    pub running: bool,
    pub source_digest: u32,
    pub recent_log: Vec<String>,
}

/// Owns the task registry. Tasks are `<tasks_dir>/<name>.lua`; the
/// enabled set lives in `bot_settings.json` next to them.
pub struct TaskHost {
    tasks_dir: PathBuf,
    settings_path: PathBuf,
    settings: Mutex<BotSettings>,
    registry: Mutex<IndexMap<String, TaskEntry>>,
    bot: BotContext,
    session_started: AtomicBool,
}

impl TaskHost {
    pub fn new(tasks_dir: impl Into<PathBuf>, settings_path: impl Into<PathBuf>, bot: BotContext) -> Self {
        let settings_path = settings_path.into();
        let settings = BotSettings::load(&settings_path);
        Self {
            tasks_dir: tasks_dir.into(),
            settings_path,
            settings: Mutex::new(settings),
            registry: Mutex::new(IndexMap::new()),
            bot,
            session_started: AtomicBool::new(false),
        }
    }

    pub fn settings_snapshot(&self) -> BotSettings {
        self.settings.lock().unwrap().clone()
    }

    /// Scan the tasks directory and register any scripts found. Keeps
    /// existing entries (and their running state) intact.
    pub fn discover(&self) {
        let Ok(entries) = std::fs::read_dir(&self.tasks_dir) else {
            warn!(dir = %self.tasks_dir.display(), "tasks directory unreadable");
            return;
        };
        let settings = self.settings.lock().unwrap();
        let mut registry = self.registry.lock().unwrap();
        let mut names: Vec<String> = entries
            .flatten()
            .filter_map(|entry| {
                let path = entry.path();
                if path.extension().map(|e| e == "lua").unwrap_or(false) {
                    path.file_stem().map(|s| s.to_string_lossy().into_owned())
                } else {
                    None
                }
            })
            .collect();
        names.sort();

        for name in names {
            if registry.contains_key(&name) {
                continue;
            }
            let digest = self
                .read_source(&name)
                .map(|source| crc32fast::hash(source.as_bytes()))
                .unwrap_or(0);
            registry.insert(
                name.clone(),
                TaskEntry {
                    enabled: settings.is_enabled(&name),
                    source_digest: digest,
                    handle: None,
                    log: script::new_log_ring(),
                },
            );
            info!(task = name, "task discovered");
        }
    }

    pub fn list(&self) -> Vec<TaskStatus> {
        let registry = self.registry.lock().unwrap();
        registry
            .iter()
            .map(|(name, entry)| TaskStatus {
                name: name.clone(),
                enabled: entry.enabled,
                running: entry.is_running(),
                source_digest: entry.source_digest,
                recent_log: entry.log.lock().unwrap().iter().cloned().collect(),
            })
            .collect()
    }

    /// Enable or disable a task, persist the choice, and start/stop the
    /// running instance to match (starting only with a live session).
    pub fn toggle(&self, name: &str, enabled: bool) -> Result<()> {
        {
            let mut registry = self.registry.lock().unwrap();
            let entry = registry
                .get_mut(name)
                .ok_or_else(|| Error::UnknownTask(name.to_string()))?;
            entry.enabled = enabled;
        }
        {
            let mut settings = self.settings.lock().unwrap();
            settings.set_enabled(name, enabled);
            settings.save(&self.settings_path)?;
        }
        if enabled {
            if self.bot.is_connected() {
                self.start(name)?;
            }
        } else {
            self.stop(name);
        }
        info!(task = name, enabled, "task toggled");
        Ok(())
    }

    /// Stop, re-read the script from disk, start. Edits on disk become
    /// visible here.
    pub fn restart(&self, name: &str) -> Result<()> {
        if !self.registry.lock().unwrap().contains_key(name) {
            return Err(Error::UnknownTask(name.to_string()));
        }
        self.stop(name);
        self.start(name)?;
        info!(task = name, "task restarted");
        Ok(())
    }

    /// Launch one task from its on-disk source. No-op when already
    /// running.
    pub fn start(&self, name: &str) -> Result<()> {
        let source = self.read_source(name)?;
        let digest = crc32fast::hash(source.as_bytes());

        let mut registry = self.registry.lock().unwrap();
        let entry = registry
            .get_mut(name)
            .ok_or_else(|| Error::UnknownTask(name.to_string()))?;
        if entry.is_running() {
            return Ok(());
        }
        entry.source_digest = digest;

        let bot = self.bot.clone();
        let log = entry.log.clone();
        let task_name = name.to_string();
        entry.handle = Some(tokio::spawn(async move {
            info!(task = %task_name, "task started");
            match script::run_task_script(&task_name, &source, bot, log.clone()).await {
                Ok(()) => info!(task = %task_name, "task finished"),
                Err(e) => {
                    // A crashing task takes down only itself.
                    warn!(task = %task_name, error = %e, "task crashed");
                    script::push_log(&log, format!("error: {e}"));
                }
            }
        }));
        Ok(())
    }

    /// Cancel a running task. Abort lands on the next sleep point.
    pub fn stop(&self, name: &str) {
        let mut registry = self.registry.lock().unwrap();
        if let Some(entry) = registry.get_mut(name) {
            if let Some(handle) = entry.handle.take() {
                handle.abort();
                info!(task = name, "task stopped");
            }
        }
    }

    /// Fired on session login. Idempotent per session: reconnect resets
    /// it via `on_session_closed`.
    pub fn start_all_enabled(&self) {
        if self.session_started.swap(true, Ordering::SeqCst) {
            return;
        }
        let names: Vec<String> = {
            let registry = self.registry.lock().unwrap();
            registry
                .iter()
                .filter(|(_, entry)| entry.enabled)
                .map(|(name, _)| name.clone())
                .collect()
        };
        for name in names {
            if let Err(e) = self.start(&name) {
                warn!(task = %name, error = %e, "failed to start enabled task");
            }
        }
    }

    /// Stop everything when the session drops.
    pub fn on_session_closed(&self) {
        self.session_started.store(false, Ordering::SeqCst);
        let names: Vec<String> = self.registry.lock().unwrap().keys().cloned().collect();
        for name in names {
            self.stop(&name);
        }
    }

    fn read_source(&self, name: &str) -> Result<String> {
        let path = self.tasks_dir.join(format!("{name}.lua"));
        std::fs::read_to_string(&path)
            .map_err(|_| Error::UnknownTask(format!("{name} ({} missing)", path.display())))
    }

    pub fn tasks_dir(&self) -> &Path {
        &self.tasks_dir
    }
}
