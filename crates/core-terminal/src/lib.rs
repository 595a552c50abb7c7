//! Physical terminal backend: raw-mode lifecycle and the crossterm
//! implementation of the screen-backend contract.
//!
//! Everything above this crate is terminal-agnostic; this is the one
//! place that talks to the device. Writes are queued and flushed in a
//! batch, cursor motion is skipped when the cursor is already in place,
//! and colour changes are only emitted on transitions.

use std::io::{Stdout, Write, stdout};

use anyhow::{Context, Result};
use crossterm::style::{Color, SetBackgroundColor, SetForegroundColor};
use crossterm::{cursor, execute, queue, terminal};
use core_render::ScreenBackend;
use tracing::{debug, warn};

/// RAII guard for raw mode + the alternate screen. Dropping restores
/// the terminal even on an error path.
pub struct TerminalSession {
    active: bool,
}

impl TerminalSession {
    pub fn begin() -> Result<Self> {
        terminal::enable_raw_mode().context("cannot enable raw mode")?;
        execute!(
            stdout(),
            terminal::EnterAlternateScreen,
            terminal::Clear(terminal::ClearType::All),
            cursor::MoveTo(0, 0),
        )
        .context("cannot enter alternate screen")?;
        debug!(target: "terminal.session", "raw mode on");
        Ok(Self { active: true })
    }

    /// Temporarily restore the terminal (shell escapes, suspension).
    pub fn pause(&mut self) -> Result<()> {
        if self.active {
            execute!(stdout(), terminal::LeaveAlternateScreen)?;
            terminal::disable_raw_mode()?;
            self.active = false;
        }
        Ok(())
    }

    pub fn resume(&mut self) -> Result<()> {
        if !self.active {
            terminal::enable_raw_mode()?;
            execute!(stdout(), terminal::EnterAlternateScreen)?;
            self.active = true;
        }
        Ok(())
    }

    pub fn size() -> (usize, usize) {
        match terminal::size() {
            Ok((cols, rows)) => (rows as usize, cols as usize),
            Err(_) => (24, 80),
        }
    }
}

impl Drop for TerminalSession {
    fn drop(&mut self) {
        if self.active
            && let Err(e) = self.pause()
        {
            warn!(target: "terminal.session", error = %e, "restore failed");
        }
    }
}

/// What the device can do; probed once at startup.
#[derive(Debug, Clone, Copy)]
pub struct Capabilities {
    pub colours: bool,
    pub scroll_region: bool,
}

impl Capabilities {
    pub fn probe() -> Self {
        // crossterm emulates colour everywhere it runs; scroll regions
        // are emitted as ScrollUp/ScrollDown over the whole screen, so
        // partial-region scrolling stays off.
        Self {
            colours: true,
            scroll_region: false,
        }
    }
}

/// Colour values for the five logical slots, chosen to read on both
/// dark and light defaults.
fn slot_colours(slot: u8) -> (Color, Color) {
    match slot {
        1 => (Color::Black, Color::Grey),       // status
        2 => (Color::White, Color::DarkRed),    // readonly
        3 => (Color::Yellow, Color::Reset),     // system
        4 => (Color::Cyan, Color::Reset),       // tag
        _ => (Color::Reset, Color::Reset),      // normal
    }
}

/// The crossterm screen backend.
pub struct CrosstermBackend {
    out: Stdout,
    rows: usize,
    cols: usize,
    caps: Capabilities,
    cursor_at: Option<(usize, usize)>,
    colour: u8,
}

impl CrosstermBackend {
    pub fn new(rows: usize, cols: usize) -> Self {
        Self {
            out: stdout(),
            rows,
            cols,
            caps: Capabilities::probe(),
            cursor_at: None,
            colour: 0,
        }
    }

    pub fn set_size(&mut self, rows: usize, cols: usize) {
        self.rows = rows;
        self.cols = cols;
        self.cursor_at = None;
    }

    fn move_to(&mut self, row: usize, col: usize) {
        // Minimum-cost motion: nothing when already there, and short
        // relative moves when only one axis changed.
        match self.cursor_at {
            Some((r, c)) if r == row && c == col => return,
            Some((r, c)) if r == row && c < col && col - c <= 3 => {
                let _ = queue!(self.out, cursor::MoveRight((col - c) as u16));
            }
            Some((r, c)) if c == col && r != row => {
                let d = row.abs_diff(r) as u16;
                if row > r {
                    let _ = queue!(self.out, cursor::MoveDown(d));
                } else {
                    let _ = queue!(self.out, cursor::MoveUp(d));
                }
            }
            _ => {
                let _ = queue!(self.out, cursor::MoveTo(col as u16, row as u16));
            }
        }
        self.cursor_at = Some((row, col));
    }

    fn apply_colour(&mut self, colour: u8) {
        if colour == self.colour {
            return;
        }
        let (fg, bg) = slot_colours(colour);
        let _ = queue!(self.out, SetForegroundColor(fg), SetBackgroundColor(bg));
        self.colour = colour;
    }
}

impl ScreenBackend for CrosstermBackend {
    fn size(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    fn goto(&mut self, row: usize, col: usize) {
        self.move_to(row, col);
    }

    fn write(&mut self, row: usize, col: usize, text: &[u8], colour: &[u8]) {
        self.move_to(row, col);
        // Emit runs of a single colour in one burst.
        let mut i = 0;
        while i < text.len() {
            let run_colour = colour.get(i).copied().unwrap_or(0);
            let mut j = i;
            while j < text.len() && colour.get(j).copied().unwrap_or(0) == run_colour {
                j += 1;
            }
            self.apply_colour(run_colour);
            let _ = self.out.write_all(&text[i..j]);
            i = j;
        }
        if let Some((r, c)) = self.cursor_at {
            self.cursor_at = Some((r, c + text.len()));
        }
    }

    fn clear_to_eol(&mut self, row: usize, col: usize) {
        self.move_to(row, col);
        self.apply_colour(0);
        let _ = queue!(
            self.out,
            terminal::Clear(terminal::ClearType::UntilNewLine)
        );
    }

    fn clear_all(&mut self) {
        self.apply_colour(0);
        let _ = queue!(self.out, terminal::Clear(terminal::ClearType::All));
        self.cursor_at = None;
    }

    fn scroll(&mut self, start: usize, end: usize, n: isize) -> bool {
        // Only whole-screen scrolls map onto the device.
        if start != 0 || end + 1 != self.rows {
            return false;
        }
        self.apply_colour(0);
        let ok = if n > 0 {
            queue!(self.out, terminal::ScrollUp(n as u16)).is_ok()
        } else {
            queue!(self.out, terminal::ScrollDown((-n) as u16)).is_ok()
        };
        self.cursor_at = None;
        ok
    }

    fn can_scroll(&self) -> bool {
        self.caps.scroll_region
    }

    fn flush_output(&mut self) {
        let _ = self.out.flush();
    }

    fn beep(&mut self) {
        let _ = self.out.write_all(b"\x07");
        let _ = self.out.flush();
    }
}
