//! Control-channel message protocol

use serde::{Deserialize, Serialize};

/// UI -> Host messages
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "camelCase")]
pub enum UiMessage {
    /// The UI surface finished bootstrapping and can accept terminals.
    ChannelReady,
    /// Attach the UI to a session and start rendering its output.
    Attach { id: String },
    /// Detach the UI from a session; output accumulates until reattach.
    Detach { id: String },
    /// User keystrokes for a session.
    Input { id: String, text: String },
    /// Terminal geometry change.
    Resize { id: String, cols: u16, rows: u16 },
    /// Close a session and remove its tab.
    Close { id: String },
}

/// Host -> UI messages
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "camelCase")]
pub enum HostMessage {
    /// A new session exists; the UI should create a tab for it.
    CreateTerminal { id: String, name: String },
    /// Full scrollback snapshot, sent on attach before any live output.
    TermInit { id: String, snapshot: String },
    /// Live output chunk for a rendering session.
    TermOutput { id: String, chunk: String },
    /// The session's process has ended.
    TermExit { id: String },
    /// Bring a session's tab to the foreground.
    SwitchToTerminal { id: String },
    /// Theme and font sync; not part of the session protocol proper.
    SetTheme { theme: TerminalTheme },
}

/// Terminal geometry in character cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TermSize {
    pub cols: u16,
    pub rows: u16,
}

impl Default for TermSize {
    fn default() -> Self {
        Self { cols: 80, rows: 24 }
    }
}

/// Colors and font settings pushed to the UI terminal widget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminalTheme {
    pub background: String,
    pub foreground: String,
    pub font_family: String,
    pub font_size: u16,
}
