//! Process transport: one PTY child process per worker.
//!
//! Used when no terminal multiplexer is available. Each slot is a login
//! shell on its own PTY; output is drained by a reader thread into a
//! bounded tail buffer so `capture` works the same way as a pane capture.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};
use tracing::{debug, warn};

use foreman_common::{ForemanError, Result};

use crate::buffer::TailBuffer;
use crate::{SlotSpec, Transport, TransportKind};

struct ProcSlot {
    session: String,
    pid: Option<u32>,
    buffer: Arc<Mutex<TailBuffer>>,
    writer: Mutex<Box<dyn Write + Send>>,
    child: Mutex<Box<dyn Child + Send + Sync>>,
    // Held so the PTY master outlives the reader thread.
    _master: Mutex<Box<dyn MasterPty + Send>>,
}

impl ProcSlot {
    fn is_running(&self) -> bool {
        match self.child.lock() {
            Ok(mut child) => matches!(child.try_wait(), Ok(None)),
            Err(_) => false,
        }
    }
}

#[derive(Default)]
pub struct ProcessTransport {
    slots: Mutex<HashMap<String, Arc<ProcSlot>>>,
    sessions: Mutex<HashMap<String, Vec<String>>>,
    next_slot: AtomicU64,
}

impl ProcessTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, address: &str) -> Result<Arc<ProcSlot>> {
        self.slots
            .lock()
            .unwrap()
            .get(address)
            .cloned()
            .ok_or_else(|| ForemanError::Transport(format!("unknown slot '{address}'")))
    }

    fn forget(&self, address: &str) {
        if let Some(slot) = self.slots.lock().unwrap().remove(address) {
            if let Some(addresses) = self.sessions.lock().unwrap().get_mut(&slot.session) {
                addresses.retain(|a| a != address);
            }
        }
    }

    fn shell() -> String {
        std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_string())
    }
}

#[async_trait]
impl Transport for ProcessTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Process
    }

    async fn create_session(&self, name: &str) -> Result<String> {
        self.sessions
            .lock()
            .unwrap()
            .entry(name.to_string())
            .or_default();
        debug!(session = %name, "Registered process session");
        Ok(name.to_string())
    }

    async fn add_slot(&self, session: &str, spec: &SlotSpec) -> Result<String> {
        if !self.sessions.lock().unwrap().contains_key(session) {
            return Err(ForemanError::Transport(format!(
                "unknown session '{session}'"
            )));
        }

        let pty = native_pty_system();
        let pair = pty
            .openpty(PtySize {
                rows: 40,
                cols: 120,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| ForemanError::Transport(format!("openpty failed: {e}")))?;

        let mut cmd = CommandBuilder::new(Self::shell());
        cmd.cwd(&spec.cwd);
        for (key, value) in &spec.env {
            cmd.env(key, value);
        }

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| ForemanError::Transport(format!("spawn failed: {e}")))?;
        let pid = child.process_id();

        let mut reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| ForemanError::Transport(format!("clone reader failed: {e}")))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| ForemanError::Transport(format!("take writer failed: {e}")))?;

        let buffer = Arc::new(Mutex::new(TailBuffer::new()));
        let drain = buffer.clone();
        std::thread::spawn(move || {
            let mut buf = [0u8; 4096];
            loop {
                match reader.read(&mut buf) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if let Ok(mut tail) = drain.lock() {
                            tail.push(&buf[..n]);
                        }
                    }
                }
            }
        });

        let address = format!("proc-{}", self.next_slot.fetch_add(1, Ordering::Relaxed) + 1);
        let slot = Arc::new(ProcSlot {
            session: session.to_string(),
            pid,
            buffer,
            writer: Mutex::new(writer),
            child: Mutex::new(child),
            _master: Mutex::new(pair.master),
        });
        self.slots
            .lock()
            .unwrap()
            .insert(address.clone(), slot);
        self.sessions
            .lock()
            .unwrap()
            .get_mut(session)
            .expect("session checked above")
            .push(address.clone());

        debug!(session = %session, slot = %address, pid = ?pid, title = %spec.title, "Spawned PTY slot");
        Ok(address)
    }

    async fn slot_pid(&self, address: &str) -> Result<Option<u32>> {
        Ok(self.slot(address)?.pid)
    }

    async fn send_text(&self, address: &str, text: &str) -> Result<()> {
        let slot = self.slot(address)?;
        let mut writer = slot.writer.lock().unwrap();
        writer.write_all(text.as_bytes())?;
        writer.flush()?;
        Ok(())
    }

    async fn send_submit(&self, address: &str) -> Result<()> {
        let slot = self.slot(address)?;
        let mut writer = slot.writer.lock().unwrap();
        writer.write_all(b"\r")?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        Ok(())
    }

    async fn capture(&self, address: &str) -> Result<String> {
        let slot = self.slot(address)?;
        let tail = slot.buffer.lock().unwrap().tail();
        Ok(tail)
    }

    async fn kill_slot(&self, address: &str, grace: Duration) -> Result<()> {
        let slot = self.slot(address)?;

        #[cfg(unix)]
        if let Some(pid) = slot.pid {
            unsafe {
                libc::kill(pid as libc::pid_t, libc::SIGTERM);
            }
        }

        let deadline = tokio::time::Instant::now() + grace;
        let mut exited = false;
        while tokio::time::Instant::now() < deadline {
            if !slot.is_running() {
                exited = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        if !exited {
            warn!(slot = %address, "Process survived grace period, killing");
            if let Ok(mut child) = slot.child.lock() {
                let _ = child.kill();
            }
        }

        self.forget(address);
        Ok(())
    }

    async fn list_slots(&self, session: &str) -> Result<Vec<String>> {
        let addresses = self
            .sessions
            .lock()
            .unwrap()
            .get(session)
            .cloned()
            .unwrap_or_default();
        let slots = self.slots.lock().unwrap();
        Ok(addresses
            .into_iter()
            .filter(|a| slots.get(a).map(|s| s.is_running()).unwrap_or(false))
            .collect())
    }

    async fn destroy_session(&self, session: &str) -> Result<()> {
        let addresses = self
            .sessions
            .lock()
            .unwrap()
            .get(session)
            .cloned()
            .unwrap_or_default();
        for address in addresses {
            let _ = self.kill_slot(&address, Duration::from_millis(500)).await;
        }
        self.sessions.lock().unwrap().remove(session);
        debug!(session = %session, "Destroyed process session");
        Ok(())
    }
}
