//! Terminal session multiplexer for an editor extension host.
//!
//! Creates, multiplexes, buffers, and tears down PTY-backed processes and
//! bridges their I/O to an asynchronous UI surface over the
//! [`panelterm_protocol`] control channel. Construct one
//! [`SessionRegistry`] at host startup, hand the outbound receiver to the
//! UI host, and feed inbound [`panelterm_protocol::UiMessage`]s to
//! [`SessionRegistry::handle_message`].

pub mod config;
pub mod error;
pub mod registry;
pub mod replay;
pub mod resolver;
pub mod session;

pub use config::MuxConfig;
pub use error::{MuxError, Result};
pub use registry::{CreateSessionRequest, SessionHandle, SessionRegistry, SessionSummary};
pub use replay::ReplayBuffer;
pub use resolver::{PathResolver, ToolResolver};
pub use session::{
    Lifecycle, RenderState, SessionCallbacks, SessionExit, SessionMetadata, TerminalSession,
};
