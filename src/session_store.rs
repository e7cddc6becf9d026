use std::fs;
use std::path::{Path, PathBuf};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::browser::{BrowserError, BrowserSession};
use crate::config::SessionConfig;
use crate::error::AutomationError;

/// Cookies and local storage captured from a logged-in browser, replayed
/// verbatim into a later session to skip the interactive login.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionArtifact {
    pub cookies: Vec<Value>,
    pub local_storage: Map<String, Value>,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct ReplayReport {
    pub cookies_applied: usize,
    pub storage_applied: usize,
    pub failures: usize,
}

pub fn capture<S: BrowserSession + ?Sized>(session: &mut S) -> Result<SessionArtifact, BrowserError> {
    let cookies = session.cookies()?;
    let local_storage = session.local_storage()?;
    info!("Captured {} cookies and {} local storage entries.", cookies.len(), local_storage.len());
    Ok(SessionArtifact { cookies, local_storage })
}

/// Applies an artifact to the page currently open in `session`. Entries the
/// browser rejects are logged and skipped.
pub fn replay<S: BrowserSession + ?Sized>(session: &mut S, artifact: &SessionArtifact) -> ReplayReport {
    let mut report = ReplayReport::default();

    for cookie in &artifact.cookies {
        let mut cookie = cookie.clone();
        // Drivers reject some sameSite values the browser itself exported.
        if let Some(obj) = cookie.as_object_mut() {
            obj.remove("sameSite");
            // Drivers only take whole seconds.
            if let Some(expiry) = obj.get("expiry").and_then(Value::as_f64) {
                obj.insert("expiry".to_string(), Value::from(expiry.trunc() as i64));
            }
        }
        match session.add_cookie(cookie) {
            Ok(()) => report.cookies_applied += 1,
            Err(e) => {
                warn!("Failed to load cookie: {}", e);
                report.failures += 1;
            }
        }
    }

    for (key, value) in &artifact.local_storage {
        let text = match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        match session.set_local_storage_item(key, &text) {
            Ok(()) => report.storage_applied += 1,
            Err(e) => {
                warn!("Failed to set local storage entry '{}': {}", key, e);
                report.failures += 1;
            }
        }
    }

    info!(
        "Session artifact replayed: {} cookies, {} local storage entries, {} failures.",
        report.cookies_applied, report.storage_applied, report.failures
    );
    report
}

/// Where artifacts live on disk: one JSON file for cookies, one for local
/// storage, as a browser export would produce them.
pub struct SessionStore {
    cookies_file: PathBuf,
    local_storage_file: PathBuf,
}

impl SessionStore {
    pub fn new(cookies_file: impl Into<PathBuf>, local_storage_file: impl Into<PathBuf>) -> Self {
        SessionStore {
            cookies_file: cookies_file.into(),
            local_storage_file: local_storage_file.into(),
        }
    }

    pub fn from_config(config: &SessionConfig) -> Self {
        SessionStore::new(&config.cookies_file, &config.local_storage_file)
    }

    pub fn exists(&self) -> bool {
        self.cookies_file.exists()
    }

    pub fn save(&self, artifact: &SessionArtifact) -> Result<(), AutomationError> {
        write_json(&self.cookies_file, &artifact.cookies)?;
        write_json(&self.local_storage_file, &artifact.local_storage)?;
        info!("Session artifact saved to {:?} and {:?}.", self.cookies_file, self.local_storage_file);
        Ok(())
    }

    /// `None` when no cookies were ever saved. A missing local storage file
    /// just means an empty map.
    pub fn load(&self) -> Result<Option<SessionArtifact>, AutomationError> {
        if !self.exists() {
            info!("No session artifact at {:?}.", self.cookies_file);
            return Ok(None);
        }
        let cookies: Vec<Value> = read_json(&self.cookies_file)?;
        let local_storage = if self.local_storage_file.exists() {
            read_json(&self.local_storage_file)?
        } else {
            Map::new()
        };
        info!("Loaded session artifact: {} cookies.", cookies.len());
        Ok(Some(SessionArtifact { cookies, local_storage }))
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), AutomationError> {
    let json = serde_json::to_string_pretty(value).map_err(|e| AutomationError::json(path, e))?;
    fs::write(path, json).map_err(|e| AutomationError::file(path, e))
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T, AutomationError> {
    let content = fs::read_to_string(path).map_err(|e| AutomationError::file(path, e))?;
    serde_json::from_str(&content).map_err(|e| AutomationError::json(path, e))
}
