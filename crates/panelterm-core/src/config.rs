//! Multiplexer tuning knobs

use std::time::Duration;

use panelterm_protocol::TermSize;

/// Grace period between a termination request and forced kill.
const GRACE_TIMEOUT: Duration = Duration::from_secs(60);

/// Maximum raw bytes retained for lossless scrollback replay (4MB).
const SCROLLBACK_MAX_BYTES: usize = 4 * 1024 * 1024;

/// Scrollback lines kept by the headless emulator.
const EMULATOR_SCROLLBACK_LINES: usize = 1000;

/// Runtime configuration for a [`SessionRegistry`](crate::SessionRegistry).
///
/// Constructed once at host startup; sessions copy the values they need at
/// creation time, so changing the config later does not affect live
/// sessions.
#[derive(Debug, Clone)]
pub struct MuxConfig {
    /// How long `dispose()` waits for a graceful exit before escalating.
    pub grace_timeout: Duration,
    /// Geometry for sessions created before the UI reports a size.
    pub default_size: TermSize,
    /// Cap on the raw replay history per session.
    pub scrollback_max_bytes: usize,
    /// Scrollback depth of the headless emulator.
    pub emulator_scrollback_lines: usize,
}

impl Default for MuxConfig {
    fn default() -> Self {
        Self {
            grace_timeout: GRACE_TIMEOUT,
            default_size: TermSize::default(),
            scrollback_max_bytes: SCROLLBACK_MAX_BYTES,
            emulator_scrollback_lines: EMULATOR_SCROLLBACK_LINES,
        }
    }
}
