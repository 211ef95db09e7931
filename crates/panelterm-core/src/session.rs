//! Terminal session lifecycle and PTY I/O
//!
//! A session owns exactly one PTY-backed process. The process is spawned
//! lazily on the first attach; until then the session only holds its
//! resolved command. Output flows from a blocking reader task through an
//! async pump that either forwards it live to the UI channel or parks it
//! in the pending buffer while no tab is watching.

use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use portable_pty::{
    Child, ChildKiller as _, CommandBuilder, MasterPty, NativePtySystem, PtySize, PtySystem,
};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use panelterm_protocol::HostMessage;

use crate::config::MuxConfig;
use crate::error::{MuxError, Result};
use crate::registry::CreateSessionRequest;
use crate::replay::ReplayBuffer;

/// Process lifecycle. Advances one way: Created -> Running -> Exited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifecycle {
    Created,
    Running,
    Exited,
}

/// Whether output is forwarded live or accumulated for replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderState {
    Suspended,
    Rendering,
}

/// How a session ended: an exit status from the process, or the error
/// that prevented it from ever spawning.
#[derive(Debug, Clone)]
pub struct SessionExit {
    pub code: Option<i32>,
    pub error: Option<String>,
}

/// Hooks supplied by the session's creator. Invoked as side effects;
/// they never alter the session state machine.
#[derive(Default)]
pub struct SessionCallbacks {
    pub on_spawn: Option<Box<dyn Fn(u32) + Send + Sync>>,
    pub on_exit: Option<Box<dyn Fn(&SessionExit) + Send + Sync>>,
    pub on_text: Option<Box<dyn Fn(&str) + Send + Sync>>,
}

/// Point-in-time view of a session, for listings and diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMetadata {
    pub id: String,
    pub name: String,
    pub program: PathBuf,
    pub working_dir: Option<PathBuf>,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub cols: u16,
    pub rows: u16,
    pub pid: Option<u32>,
    pub exit_code: Option<i32>,
}

struct OutputState {
    render: RenderState,
    pending: Vec<u8>,
    replay: ReplayBuffer,
}

#[derive(Default)]
struct IoChannels {
    cmd_tx: Option<mpsc::Sender<Vec<u8>>>,
    resize_tx: Option<mpsc::Sender<(u16, u16)>>,
}

struct MetaInner {
    created_at: DateTime<Utc>,
    last_activity: DateTime<Utc>,
    cols: u16,
    rows: u16,
    pid: Option<u32>,
    exit_code: Option<i32>,
}

/// One PTY-backed process bridged to the UI channel.
pub struct TerminalSession {
    id: String,
    name: String,
    program: PathBuf,
    args: Vec<String>,
    cwd: Option<PathBuf>,
    env: Vec<(String, String)>,
    close_on_exit: bool,
    grace_timeout: std::time::Duration,
    callbacks: SessionCallbacks,
    outbound: mpsc::UnboundedSender<HostMessage>,

    lifecycle: Mutex<Lifecycle>,
    output: Mutex<OutputState>,
    io: Mutex<IoChannels>,
    child: Arc<Mutex<Option<Box<dyn Child + Send + Sync>>>>,
    meta: Mutex<MetaInner>,

    exit_reported: AtomicBool,
    exit_notified: AtomicBool,
    exited_tx: watch::Sender<bool>,
    exited_rx: watch::Receiver<bool>,
}

impl TerminalSession {
    pub(crate) fn new(
        id: String,
        program: PathBuf,
        request: CreateSessionRequest,
        outbound: mpsc::UnboundedSender<HostMessage>,
        config: &MuxConfig,
    ) -> Arc<Self> {
        let now = Utc::now();
        let (exited_tx, exited_rx) = watch::channel(false);
        Arc::new(Self {
            id,
            name: request.display_name,
            program,
            args: request.args,
            cwd: request.cwd,
            env: request.env,
            close_on_exit: request.close_on_exit,
            grace_timeout: config.grace_timeout,
            callbacks: request.callbacks,
            outbound,
            lifecycle: Mutex::new(Lifecycle::Created),
            output: Mutex::new(OutputState {
                render: RenderState::Suspended,
                pending: Vec::new(),
                replay: ReplayBuffer::new(
                    config.default_size.rows,
                    config.default_size.cols,
                    config.emulator_scrollback_lines,
                    config.scrollback_max_bytes,
                ),
            }),
            io: Mutex::new(IoChannels::default()),
            child: Arc::new(Mutex::new(None)),
            meta: Mutex::new(MetaInner {
                created_at: now,
                last_activity: now,
                cols: config.default_size.cols,
                rows: config.default_size.rows,
                pid: None,
                exit_code: None,
            }),
            exit_reported: AtomicBool::new(false),
            exit_notified: AtomicBool::new(false),
            exited_tx,
            exited_rx,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn lifecycle(&self) -> Lifecycle {
        *self.lifecycle.lock().unwrap()
    }

    pub fn render_state(&self) -> RenderState {
        self.output.lock().unwrap().render
    }

    pub fn metadata(&self) -> SessionMetadata {
        let meta = self.meta.lock().unwrap();
        SessionMetadata {
            id: self.id.clone(),
            name: self.name.clone(),
            program: self.program.clone(),
            working_dir: self.cwd.clone(),
            created_at: meta.created_at,
            last_activity: meta.last_activity,
            cols: meta.cols,
            rows: meta.rows,
            pid: meta.pid,
            exit_code: meta.exit_code,
        }
    }

    /// Spawn the backing process. No-op unless the session is Created.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock().unwrap();
        if *lifecycle != Lifecycle::Created {
            return Ok(());
        }
        match self.spawn_process() {
            Ok(()) => {
                *lifecycle = Lifecycle::Running;
                Ok(())
            }
            Err(e) => {
                // Spawn failures are fatal: the session is done for good.
                *lifecycle = Lifecycle::Exited;
                drop(lifecycle);
                error!("Failed to spawn session {}: {}", self.id, e);
                let _ = self.exited_tx.send(true);
                if !self.exit_reported.swap(true, Ordering::SeqCst) {
                    if let Some(cb) = &self.callbacks.on_exit {
                        cb(&SessionExit {
                            code: None,
                            error: Some(e.to_string()),
                        });
                    }
                }
                self.notify_exit();
                Err(e)
            }
        }
    }

    fn spawn_process(self: &Arc<Self>) -> Result<()> {
        let size = {
            let meta = self.meta.lock().unwrap();
            PtySize {
                rows: meta.rows,
                cols: meta.cols,
                pixel_width: 0,
                pixel_height: 0,
            }
        };

        let pty_system = NativePtySystem::default();
        let pair = pty_system.openpty(size).map_err(|e| self.spawn_err(e))?;

        let mut cmd = CommandBuilder::new(&self.program);
        cmd.args(&self.args);
        if let Some(cwd) = &self.cwd {
            cmd.cwd(cwd);
        }
        for (key, value) in &self.env {
            cmd.env(key, value);
        }

        let child = pair.slave.spawn_command(cmd).map_err(|e| self.spawn_err(e))?;
        // The child holds its own slave handles; ours would keep the
        // master from ever reading EOF.
        drop(pair.slave);
        let master = pair.master;

        let pid = child.process_id();
        info!("Session {} spawned {:?} (pid {:?})", self.id, self.program, pid);

        let mut reader = master.try_clone_reader().map_err(|e| self.spawn_err(e))?;
        let mut writer = master.take_writer().map_err(|e| self.spawn_err(e))?;

        let (cmd_tx, mut cmd_rx) = mpsc::channel::<Vec<u8>>(100);
        let (resize_tx, resize_rx) = mpsc::channel::<(u16, u16)>(10);

        *self.child.lock().unwrap() = Some(child);
        {
            let mut meta = self.meta.lock().unwrap();
            meta.pid = pid;
        }
        {
            let mut io = self.io.lock().unwrap();
            io.cmd_tx = Some(cmd_tx);
            io.resize_tx = Some(resize_tx);
        }

        if let (Some(cb), Some(pid)) = (&self.callbacks.on_spawn, pid) {
            cb(pid);
        }

        // Writer task: drain the input channel into the PTY.
        tokio::task::spawn_blocking(move || {
            while let Some(data) = cmd_rx.blocking_recv() {
                if writer.write_all(&data).is_err() || writer.flush().is_err() {
                    break;
                }
            }
        });

        // Reader task: blocking PTY reads feeding the async pump.
        let (reader_tx, reader_rx) = mpsc::channel::<std::io::Result<Bytes>>(1000);
        tokio::task::spawn_blocking(move || {
            let mut buf = [0u8; 4096];
            loop {
                match reader.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        if reader_tx
                            .blocking_send(Ok(Bytes::copy_from_slice(&buf[..n])))
                            .is_err()
                        {
                            break;
                        }
                    }
                    Err(e) => {
                        let _ = reader_tx.blocking_send(Err(e));
                        break;
                    }
                }
            }
        });

        tokio::spawn(Arc::clone(self).pump(master, reader_rx, resize_rx));

        Ok(())
    }

    /// Per-session event loop: output, resize requests, then reaping.
    async fn pump(
        self: Arc<Self>,
        master: Box<dyn MasterPty + Send>,
        mut reader_rx: mpsc::Receiver<std::io::Result<Bytes>>,
        mut resize_rx: mpsc::Receiver<(u16, u16)>,
    ) {
        loop {
            tokio::select! {
                res = reader_rx.recv() => match res {
                    Some(Ok(data)) => self.handle_output(&data),
                    Some(Err(e)) => {
                        self.emit_read_error(&e);
                        break;
                    }
                    None => break,
                },
                Some((cols, rows)) = resize_rx.recv() => {
                    debug!("Resizing PTY of session {} to {}x{}", self.id, cols, rows);
                    if let Err(e) = master.resize(PtySize { rows, cols, pixel_width: 0, pixel_height: 0 }) {
                        warn!("PTY resize failed for session {}: {}", self.id, e);
                    }
                }
            }
        }
        drop(master);

        let child = self.child.clone();
        let code = tokio::task::spawn_blocking(move || {
            let mut guard = child.lock().unwrap();
            guard
                .take()
                .and_then(|mut c| c.wait().ok())
                .map(|status| status.exit_code() as i32)
        })
        .await
        .unwrap_or(None);

        self.finish_exit(code);
    }

    fn handle_output(&self, data: &[u8]) {
        if let Some(cb) = &self.callbacks.on_text {
            cb(&String::from_utf8_lossy(data));
        }
        {
            let mut meta = self.meta.lock().unwrap();
            meta.last_activity = Utc::now();
        }
        let mut out = self.output.lock().unwrap();
        match out.render {
            RenderState::Rendering => {
                out.replay.process(data);
                let _ = self.outbound.send(HostMessage::TermOutput {
                    id: self.id.clone(),
                    chunk: String::from_utf8_lossy(data).into_owned(),
                });
            }
            RenderState::Suspended => out.pending.extend_from_slice(data),
        }
    }

    fn emit_read_error(&self, err: &std::io::Error) {
        warn!("PTY read error on session {}: {}", self.id, err);
        let styled = format!("\r\n\x1b[31m[session] read error: {}\x1b[0m\r\n", err);
        self.handle_output(styled.as_bytes());
    }

    /// Forward user input to the process. On an exited session this emits
    /// the end-of-session notification instead.
    pub async fn write(&self, text: &str) {
        match self.lifecycle() {
            Lifecycle::Running => {
                let tx = self.io.lock().unwrap().cmd_tx.clone();
                if let Some(tx) = tx {
                    if tx.send(text.as_bytes().to_vec()).await.is_err() {
                        debug!("Input channel closed for session {}", self.id);
                    }
                }
            }
            Lifecycle::Exited => self.notify_exit(),
            Lifecycle::Created => {
                debug!("Dropping input for unstarted session {}", self.id);
            }
        }
    }

    /// Resize the replay emulator, and the live PTY if one exists.
    pub async fn resize(&self, cols: u16, rows: u16) {
        {
            let mut out = self.output.lock().unwrap();
            out.replay.resize(cols, rows);
        }
        {
            let mut meta = self.meta.lock().unwrap();
            meta.cols = cols;
            meta.rows = rows;
        }
        if self.lifecycle() == Lifecycle::Running {
            let tx = self.io.lock().unwrap().resize_tx.clone();
            if let Some(tx) = tx {
                let _ = tx.send((cols, rows)).await;
            }
        }
    }

    /// Begin forwarding output live. Lazily spawns a Created session.
    ///
    /// Bytes that raced into the pending buffer since the last
    /// `serialized()` call are folded into the replay emulator and sent
    /// as one live chunk, so the attach handshake never drops output.
    pub fn start_rendering(self: &Arc<Self>) -> Result<()> {
        {
            let mut out = self.output.lock().unwrap();
            if !out.pending.is_empty() {
                let pending = std::mem::take(&mut out.pending);
                out.replay.process(&pending);
                let _ = self.outbound.send(HostMessage::TermOutput {
                    id: self.id.clone(),
                    chunk: String::from_utf8_lossy(&pending).into_owned(),
                });
            }
            out.render = RenderState::Rendering;
        }
        self.start()
    }

    /// Stop forwarding output; it accumulates for the next attach.
    pub fn stop_rendering(&self) {
        let mut out = self.output.lock().unwrap();
        out.render = RenderState::Suspended;
    }

    /// Drain pending output into the replay buffer and return the full
    /// scrollback snapshot.
    pub fn serialized(&self) -> String {
        let mut out = self.output.lock().unwrap();
        let pending = std::mem::take(&mut out.pending);
        out.replay.process(&pending);
        out.replay.serialize()
    }

    /// Soft interrupt: the interactive interrupt keystroke, through the
    /// input stream. No effect unless Running.
    pub async fn kill(&self) {
        if self.lifecycle() != Lifecycle::Running {
            return;
        }
        let tx = self.io.lock().unwrap().cmd_tx.clone();
        if let Some(tx) = tx {
            debug!("Sending interrupt to session {}", self.id);
            let _ = tx.send(vec![0x03]).await;
        }
    }

    fn spawn_err(&self, e: impl std::fmt::Display) -> MuxError {
        MuxError::Spawn {
            program: self.program.display().to_string(),
            message: e.to_string(),
        }
    }

    /// Graceful teardown: request termination, wait out the grace period,
    /// escalate to `force_kill` if the process ignores it.
    pub async fn dispose(&self) {
        let prior = {
            let mut lifecycle = self.lifecycle.lock().unwrap();
            let prior = *lifecycle;
            if prior == Lifecycle::Created {
                // Never spawned; nothing to wait for, but the session
                // must not be startable afterwards.
                *lifecycle = Lifecycle::Exited;
            }
            prior
        };
        match prior {
            Lifecycle::Created => {
                let _ = self.exited_tx.send(true);
                debug!("Disposed unstarted session {}", self.id);
            }
            Lifecycle::Running => {
                self.request_terminate();
                if timeout(self.grace_timeout, self.wait_for_exit())
                    .await
                    .is_err()
                {
                    warn!(
                        "Session {} ignored termination for {:?}, force killing",
                        self.id, self.grace_timeout
                    );
                    self.force_kill();
                }
            }
            Lifecycle::Exited => {}
        }
        self.release_io();
    }

    /// Hard kill: terminate the process outright, synchronously mark the
    /// session Exited and fire the exit notification. Idempotent.
    pub fn force_kill(&self) {
        let was_running = {
            let mut lifecycle = self.lifecycle.lock().unwrap();
            if *lifecycle == Lifecycle::Running {
                *lifecycle = Lifecycle::Exited;
                true
            } else {
                false
            }
        };
        if !was_running {
            return;
        }
        info!("Force killing session {}", self.id);
        #[cfg(unix)]
        {
            let pid = self.meta.lock().unwrap().pid;
            if let Some(pid) = pid {
                // An abort-class signal; SIGHUP/SIGTERM were the soft paths.
                unsafe {
                    libc::kill(pid as i32, libc::SIGKILL);
                }
            }
        }
        #[cfg(not(unix))]
        if let Some(child) = self.child.lock().unwrap().as_mut() {
            if let Err(e) = child.kill() {
                warn!("Failed to kill process of session {}: {}", self.id, e);
            }
        }
        {
            let mut meta = self.meta.lock().unwrap();
            meta.pid = None;
        }
        let _ = self.exited_tx.send(true);
        self.notify_exit();
        self.release_io();
    }

    /// Resolves once the backing process has terminated (or immediately
    /// if it already has).
    pub async fn wait_for_exit(&self) {
        let mut rx = self.exited_rx.clone();
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                break;
            }
        }
    }

    fn request_terminate(&self) {
        #[cfg(unix)]
        {
            let pid = self.meta.lock().unwrap().pid;
            if let Some(pid) = pid {
                debug!("Sending SIGTERM to pid {} (session {})", pid, self.id);
                unsafe {
                    libc::kill(pid as i32, libc::SIGTERM);
                }
                return;
            }
        }
        if let Some(child) = self.child.lock().unwrap().as_mut() {
            let _ = child.kill();
        }
    }

    fn finish_exit(&self, code: Option<i32>) {
        {
            let mut lifecycle = self.lifecycle.lock().unwrap();
            *lifecycle = Lifecycle::Exited;
        }
        {
            let mut meta = self.meta.lock().unwrap();
            if meta.exit_code.is_none() {
                meta.exit_code = code;
            }
            meta.pid = None;
        }
        let _ = self.exited_tx.send(true);
        if !self.exit_reported.swap(true, Ordering::SeqCst) {
            if let Some(cb) = &self.callbacks.on_exit {
                cb(&SessionExit { code, error: None });
            }
        }
        info!("Session {} exited with code {:?}", self.id, code);
        if self.close_on_exit {
            self.notify_exit();
        }
        self.release_io();
    }

    /// Tell the UI the session is over. At most one notification per
    /// session, however many paths race to send it.
    fn notify_exit(&self) {
        if !self.exit_notified.swap(true, Ordering::SeqCst) {
            let _ = self.outbound.send(HostMessage::TermExit {
                id: self.id.clone(),
            });
        }
    }

    fn release_io(&self) {
        let mut io = self.io.lock().unwrap();
        io.cmd_tx = None;
        io.resize_tx = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::{PathResolver, ToolResolver};
    use std::time::Duration;
    use uuid::Uuid;

    fn test_session(
        program: &str,
        args: &[&str],
        close_on_exit: bool,
    ) -> (Arc<TerminalSession>, mpsc::UnboundedReceiver<HostMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let request = CreateSessionRequest {
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            display_name: "test".to_string(),
            cwd: None,
            env: Vec::new(),
            close_on_exit,
            callbacks: SessionCallbacks::default(),
        };
        let resolved = PathResolver.resolve(program).unwrap();
        let session = TerminalSession::new(
            Uuid::new_v4().to_string(),
            resolved,
            request,
            tx,
            &MuxConfig::default(),
        );
        (session, rx)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<HostMessage>) -> Vec<HostMessage> {
        let mut msgs = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            msgs.push(msg);
        }
        msgs
    }

    #[tokio::test]
    async fn session_spawns_lazily_on_first_render() {
        let (session, mut rx) = test_session("cat", &[], true);
        assert_eq!(session.lifecycle(), Lifecycle::Created);
        assert_eq!(session.metadata().pid, None);

        session.start_rendering().unwrap();
        assert_eq!(session.lifecycle(), Lifecycle::Running);
        assert!(session.metadata().pid.is_some());

        session.force_kill();
        session.wait_for_exit().await;
        assert_eq!(session.lifecycle(), Lifecycle::Exited);

        tokio::time::sleep(Duration::from_millis(200)).await;
        let exits = drain(&mut rx)
            .into_iter()
            .filter(|m| matches!(m, HostMessage::TermExit { .. }))
            .count();
        assert_eq!(exits, 1);
    }

    #[tokio::test]
    async fn start_is_idempotent() {
        let (session, _rx) = test_session("cat", &[], true);
        session.start().unwrap();
        let pid = session.metadata().pid;
        session.start().unwrap();
        assert_eq!(session.metadata().pid, pid);
        session.force_kill();
        session.wait_for_exit().await;
    }

    #[tokio::test]
    async fn force_kill_twice_notifies_once() {
        let (session, mut rx) = test_session("cat", &[], true);
        session.start_rendering().unwrap();

        session.force_kill();
        session.force_kill();
        session.wait_for_exit().await;
        tokio::time::sleep(Duration::from_millis(300)).await;

        let exits = drain(&mut rx)
            .into_iter()
            .filter(|m| matches!(m, HostMessage::TermExit { .. }))
            .count();
        assert_eq!(exits, 1);
    }

    #[tokio::test]
    async fn write_on_unstarted_session_is_dropped() {
        let (session, mut rx) = test_session("cat", &[], true);
        session.write("ignored").await;
        assert_eq!(session.lifecycle(), Lifecycle::Created);
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn kill_on_unstarted_session_is_a_no_op() {
        let (session, mut rx) = test_session("cat", &[], true);
        session.kill().await;
        assert_eq!(session.lifecycle(), Lifecycle::Created);
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn resize_before_start_only_touches_emulator() {
        let (session, _rx) = test_session("cat", &[], true);
        session.resize(132, 50).await;
        let meta = session.metadata();
        assert_eq!((meta.cols, meta.rows), (132, 50));
        assert_eq!(session.lifecycle(), Lifecycle::Created);
    }

    #[tokio::test]
    async fn dispose_on_unstarted_session_prevents_later_start() {
        let (session, _rx) = test_session("cat", &[], true);
        session.dispose().await;
        assert_eq!(session.lifecycle(), Lifecycle::Exited);
        // start() must stay a no-op afterwards
        session.start().unwrap();
        assert_eq!(session.metadata().pid, None);
    }
}
