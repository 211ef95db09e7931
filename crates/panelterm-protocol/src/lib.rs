//! Control-channel protocol between the host and the terminal UI surface.
//!
//! Messages are a `kind` discriminator plus a `data` payload, serialized as
//! JSON. The host side owns session lifecycle; the UI side owns rendering
//! and user input.

pub mod message;

pub use message::{HostMessage, TermSize, TerminalTheme, UiMessage};
