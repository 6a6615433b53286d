//! Atomic file primitives.
//!
//! Writes go to a temp file in the same directory and are renamed into
//! place, so readers never observe a torn file. Reads never fail: a missing
//! file is `None`, and malformed JSON is treated as missing with a
//! rate-limited warning (once per file per minute).

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock};
use std::time::{Duration, Instant};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

use foreman_common::Result;

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

const MALFORMED_WARN_INTERVAL: Duration = Duration::from_secs(60);

fn malformed_warn_times() -> &'static Mutex<HashMap<String, Instant>> {
    static TIMES: OnceLock<Mutex<HashMap<String, Instant>>> = OnceLock::new();
    TIMES.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Create a directory (and parents) if it does not exist. Idempotent.
pub fn ensure_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path)?;
    Ok(())
}

/// Serialize `value` as pretty JSON and atomically replace `path` with it.
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    write_bytes(path, json.as_bytes())
}

/// Atomically replace `path` with `bytes` via a same-directory temp file.
pub fn write_bytes(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    ensure_dir(dir)?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "state".to_string());
    let tmp = dir.join(format!(
        ".{}.tmp-{}-{}",
        file_name,
        std::process::id(),
        TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
    ));

    fs::write(&tmp, bytes)?;
    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(e.into());
    }
    Ok(())
}

/// Read and parse a JSON file.
///
/// Missing files and unparseable contents both yield `None`; the latter
/// logs a warning at most once per file per minute.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Option<T> {
    let content = fs::read_to_string(path).ok()?;
    match serde_json::from_str(&content) {
        Ok(value) => Some(value),
        Err(e) => {
            warn_malformed(path, &e.to_string());
            None
        }
    }
}

/// Append one line to a file, creating it (and parent dirs) as needed.
///
/// Line appends are not atomic across processes, but a single `write` of a
/// line-terminated buffer keeps concurrent readers line-consistent.
pub fn append_line(path: &Path, line: &str) -> Result<()> {
    use std::io::Write;

    if let Some(dir) = path.parent() {
        ensure_dir(dir)?;
    }
    let mut file = fs::OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(line.as_bytes())?;
    file.write_all(b"\n")?;
    Ok(())
}

/// Remove a file, ignoring "not found".
pub fn remove_file(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

fn warn_malformed(path: &Path, error: &str) {
    let key = path.to_string_lossy().into_owned();
    let mut times = match malformed_warn_times().lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    let now = Instant::now();
    let due = times
        .get(&key)
        .map(|last| now.duration_since(*last) >= MALFORMED_WARN_INTERVAL)
        .unwrap_or(true);
    if due {
        warn!(file = %key, error = %error, "Malformed state file, treating as missing");
        times.insert(key, now);
    }
}
