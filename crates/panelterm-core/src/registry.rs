//! Session registry and control-channel dispatch
//!
//! The registry is the single public entry point for creating sessions
//! and the single dispatch point for inbound UI messages. It is an
//! explicit context object: construct one at host startup and pass it by
//! reference to anything that needs terminals.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch, RwLock};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use panelterm_protocol::{HostMessage, TerminalTheme, UiMessage};

use crate::config::MuxConfig;
use crate::error::Result;
use crate::resolver::{PathResolver, ToolResolver};
use crate::session::{Lifecycle, SessionCallbacks, TerminalSession};

/// Request to create a new session
pub struct CreateSessionRequest {
    pub program: String,
    pub args: Vec<String>,
    pub display_name: String,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    pub close_on_exit: bool,
    pub callbacks: SessionCallbacks,
}

impl CreateSessionRequest {
    pub fn new(program: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            display_name: display_name.into(),
            cwd: None,
            env: Vec::new(),
            close_on_exit: true,
            callbacks: SessionCallbacks::default(),
        }
    }
}

/// Session summary for listings, most recently active first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: String,
    pub name: String,
    pub status: Lifecycle,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub last_activity: chrono::DateTime<chrono::Utc>,
    pub pid: Option<u32>,
    pub exit_code: Option<i32>,
}

struct RegistryInner {
    config: MuxConfig,
    resolver: Box<dyn ToolResolver>,
    sessions: RwLock<HashMap<String, Arc<TerminalSession>>>,
    outbound: mpsc::UnboundedSender<HostMessage>,
    ready_tx: watch::Sender<bool>,
}

/// Central hub for all terminal sessions.
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<RegistryInner>,
}

impl SessionRegistry {
    /// Create a registry; the returned receiver is the UI host's end of
    /// the control channel.
    pub fn new(
        config: MuxConfig,
        resolver: Box<dyn ToolResolver>,
    ) -> (Self, mpsc::UnboundedReceiver<HostMessage>) {
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (ready_tx, _) = watch::channel(false);
        let registry = Self {
            inner: Arc::new(RegistryInner {
                config,
                resolver,
                sessions: RwLock::new(HashMap::new()),
                outbound,
                ready_tx,
            }),
        };
        (registry, outbound_rx)
    }

    pub fn with_defaults() -> (Self, mpsc::UnboundedReceiver<HostMessage>) {
        Self::new(MuxConfig::default(), Box::new(PathResolver))
    }

    /// Whether the UI surface has announced readiness.
    pub fn channel_ready(&self) -> bool {
        *self.inner.ready_tx.borrow()
    }

    /// Register a session for `request` and announce it to the UI.
    ///
    /// Resolution failure is the only error surfaced here. The call
    /// queues behind UI readiness and waits indefinitely if the surface
    /// never reports in.
    pub async fn create_session(&self, request: CreateSessionRequest) -> Result<SessionHandle> {
        let program = self.inner.resolver.resolve(&request.program)?;

        self.wait_channel_ready().await;

        let id = Uuid::new_v4().to_string();
        let name = request.display_name.clone();
        let session = TerminalSession::new(
            id.clone(),
            program,
            request,
            self.inner.outbound.clone(),
            &self.inner.config,
        );

        self.inner
            .sessions
            .write()
            .await
            .insert(id.clone(), session);
        info!("Created session {} (name: {})", id, name);

        if self
            .inner
            .outbound
            .send(HostMessage::CreateTerminal {
                id: id.clone(),
                name,
            })
            .is_err()
        {
            warn!("Control channel closed; session {} has no UI tab", id);
        }

        Ok(SessionHandle {
            id,
            registry: self.clone(),
        })
    }

    /// Single dispatch point for messages from the UI surface.
    pub async fn handle_message(&self, msg: UiMessage) {
        match msg {
            UiMessage::ChannelReady => {
                if !self.inner.ready_tx.send_replace(true) {
                    info!("Control channel ready");
                }
            }
            UiMessage::Attach { id } => {
                let Some(session) = self.session(&id).await else {
                    warn!("Attach for unknown session {}", id);
                    return;
                };
                let snapshot = session.serialized();
                let _ = self.inner.outbound.send(HostMessage::TermInit {
                    id: id.clone(),
                    snapshot,
                });
                if let Err(e) = session.start_rendering() {
                    error!("Session {} failed to start: {}", id, e);
                }
            }
            UiMessage::Detach { id } => {
                if let Some(session) = self.session(&id).await {
                    session.stop_rendering();
                }
            }
            UiMessage::Input { id, text } => {
                if let Some(session) = self.session(&id).await {
                    session.write(&text).await;
                }
            }
            UiMessage::Resize { id, cols, rows } => {
                if let Some(session) = self.session(&id).await {
                    session.resize(cols, rows).await;
                }
            }
            UiMessage::Close { id } => {
                let Some(session) = self.session(&id).await else {
                    debug!("Close for unknown session {}", id);
                    return;
                };
                session.dispose().await;
                self.inner.sessions.write().await.remove(&id);
                info!("Closed session {}", id);
            }
        }
    }

    /// Look up a live session by id.
    pub async fn session(&self, id: &str) -> Option<Arc<TerminalSession>> {
        self.inner.sessions.read().await.get(id).cloned()
    }

    /// List all sessions, most recently active first.
    pub async fn sessions(&self) -> Vec<SessionSummary> {
        let sessions = self.inner.sessions.read().await;
        let mut summaries: Vec<SessionSummary> = sessions
            .values()
            .map(|session| {
                let meta = session.metadata();
                SessionSummary {
                    id: meta.id,
                    name: meta.name,
                    status: session.lifecycle(),
                    created_at: meta.created_at,
                    last_activity: meta.last_activity,
                    pid: meta.pid,
                    exit_code: meta.exit_code,
                }
            })
            .collect();
        summaries.sort_by(|a, b| b.last_activity.cmp(&a.last_activity));
        summaries
    }

    /// Bring a session's tab to the foreground.
    pub fn focus(&self, id: &str) {
        let _ = self.inner.outbound.send(HostMessage::SwitchToTerminal {
            id: id.to_string(),
        });
    }

    /// Push theme and font settings to the UI terminal widgets.
    pub fn set_theme(&self, theme: TerminalTheme) {
        let _ = self.inner.outbound.send(HostMessage::SetTheme { theme });
    }

    /// Dispose every session. For host shutdown.
    pub async fn shutdown(&self) {
        let sessions: Vec<Arc<TerminalSession>> = {
            let mut map = self.inner.sessions.write().await;
            map.drain().map(|(_, s)| s).collect()
        };
        for session in sessions {
            session.dispose().await;
        }
    }

    async fn wait_channel_ready(&self) {
        let mut rx = self.inner.ready_tx.subscribe();
        // Waits forever if the UI never bootstraps; accepted behavior.
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                break;
            }
        }
    }
}

/// Caller-facing handle to one session, bound to its id.
#[derive(Clone)]
pub struct SessionHandle {
    id: String,
    registry: SessionRegistry,
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.id)
            .finish()
    }
}

impl SessionHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Forward text to the session's process.
    pub async fn send_text(&self, text: &str) {
        if let Some(session) = self.registry.session(&self.id).await {
            session.write(text).await;
        }
    }

    /// Ask the UI to bring this session's tab to the foreground.
    pub fn focus_terminal(&self) {
        self.registry.focus(&self.id);
    }

    /// Soft interrupt.
    pub async fn kill(&self) {
        if let Some(session) = self.registry.session(&self.id).await {
            session.kill().await;
        }
    }

    /// Hard kill.
    pub async fn force_kill(&self) {
        if let Some(session) = self.registry.session(&self.id).await {
            session.force_kill();
        }
    }
}
