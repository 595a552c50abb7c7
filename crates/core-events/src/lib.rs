//! Event and mode types for the cooperative single-threaded event loop,
//! plus the signal flags shared with interrupt context.
//!
//! The editor blocks in exactly one place: the terminal read inside the
//! event pump, which takes a millisecond timeout chosen by
//! [`EventResponse`]. Signal handlers may only set the atomic flags in
//! [`signals`]; the loop samples them before every blocking read and
//! long-running operations poll [`signals::interrupted`] at checkpoints.

use std::sync::atomic::{AtomicBool, Ordering};

/// Keystrokes required since the last preserve before the preserve timer
/// is armed.
pub const PSVKEYS: u32 = 60;

/// The mode machine's states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InputState {
    #[default]
    Normal,
    /// Awaiting the second character of a two-character command.
    SubNormal,
    Insert,
    Replace,
    /// Building a `:` / `/` / `?` line on the status row.
    Cmdline,
    /// Paging through multi-line output (`:set all`, `:map`, ...).
    Display,
    Exiting,
}

/// One event delivered to the editor core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// A byte arrived from the keyboard (already keymap-translated or
    /// raw, depending on the pipeline stage).
    Char(u8),
    /// The requested input timeout expired with nothing read.
    Timeout,
    /// The backend wants the screen repainted (e.g. after `^L`).
    Refresh,
    /// Physical screen size changed.
    Resize { rows: usize, cols: usize },
    MouseClick { row: usize, col: usize },
    MouseDrag {
        from_row: usize,
        from_col: usize,
        to_row: usize,
        to_col: usize,
    },
    MouseMove { row: usize },
    /// Interrupt key (signal-level, not a typed character).
    Breakin,
    SuspendRequest,
    Terminate,
    Disconnected,
}

/// What the core wants the event pump to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventResponse {
    /// Leave the editor with this exit status.
    Exit(i32),
    /// Read more input; block at most `timeout_ms` (0 = indefinitely).
    TimedInput { timeout_ms: u64 },
}

impl EventResponse {
    pub fn wait() -> Self {
        EventResponse::TimedInput { timeout_ms: 0 }
    }
}

/// Signal-handler flags. Handlers do nothing but store `true`; all
/// consumption happens on the editor thread.
pub mod signals {
    use super::*;

    pub static KBD_INTERRUPT: AtomicBool = AtomicBool::new(false);
    pub static TERMINATE: AtomicBool = AtomicBool::new(false);
    pub static SUSPEND_REQUEST: AtomicBool = AtomicBool::new(false);
    pub static DISCONNECTED: AtomicBool = AtomicBool::new(false);
    pub static SIZE_CHANGED: AtomicBool = AtomicBool::new(false);

    /// Check-and-clear the interrupt flag. Long-running loops (search,
    /// global, substitute, redraw) poll this to abort cleanly.
    pub fn interrupted() -> bool {
        KBD_INTERRUPT.swap(false, Ordering::Relaxed)
    }

    pub fn raise_interrupt() {
        KBD_INTERRUPT.store(true, Ordering::Relaxed);
    }

    pub fn take(flag: &AtomicBool) -> bool {
        flag.swap(false, Ordering::Relaxed)
    }

    pub fn raise(flag: &AtomicBool) {
        flag.store(true, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interrupt_flag_is_check_and_clear() {
        signals::raise_interrupt();
        assert!(signals::interrupted());
        assert!(!signals::interrupted());
    }

    #[test]
    fn take_clears_flag() {
        signals::raise(&signals::SIZE_CHANGED);
        assert!(signals::take(&signals::SIZE_CHANGED));
        assert!(!signals::take(&signals::SIZE_CHANGED));
    }
}
