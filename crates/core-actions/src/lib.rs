//! The editor context and the command layers that act on it.
//!
//! [`Editor`] is the explicit context record passed through every
//! handler: buffers, windows, parameters, registers, the keymap
//! pipeline, search and tag state, and the per-mode partial state. There
//! are no globals; "current window" and "current buffer" are a focus
//! index inside the record.

use core_config::{ParamEffect, ParamId, Params};
use core_events::InputState;
use core_keymap::KeymapTranslator;
use core_model::{BufferId, WindowLayout};
use core_render::VirtScr;
use core_state::{Buffer, RegisterFile};
use core_text::Position;
use core_text::motion::CharSearch;
use tracing::debug;

pub mod dispatcher;
pub mod display;
pub mod ex;
pub mod io_ops;
pub mod pipe;
pub mod preserve;
pub mod search;
pub mod tags;

pub use dispatcher::handle_event;

/// Insert-mode sub-state.
#[derive(Debug, Default)]
pub struct InsertState {
    /// Where the insert began; `^H` never erases past it.
    pub start: Position,
    /// Repeat count from e.g. `3i`; the text replays count-1 extra
    /// times on ESC.
    pub count: u32,
    /// Bytes inserted during this session (for the `<` register, redo
    /// and ESC replay).
    pub text: Vec<u8>,
    /// The next byte is taken literally (`^V` / `^Q`).
    pub literal_next: bool,
    /// `^B` was seen; the next byte names a register to insert.
    pub awaiting_register: bool,
    /// Replace-mode bookkeeping when entered via `r` / `R`.
    pub replace: Option<ReplaceState>,
}

#[derive(Debug)]
pub enum ReplaceState {
    /// `r`: replace exactly one character, then leave.
    ReplaceOne,
    /// `R`: overwrite until ESC. The original line is snapshotted so
    /// `^H` restores overwritten characters.
    Overwrite {
        saved_line: Vec<u8>,
        start_index: usize,
    },
}

/// Command-line (`:` `/` `?`) being typed on the status row.
#[derive(Debug, Default)]
pub struct CmdlineState {
    pub prefix: u8,
    pub line: Vec<u8>,
}

/// Multi-line output pager (Display mode).
#[derive(Debug, Default)]
pub struct Pager {
    pub lines: Vec<String>,
    start: usize,
    end: usize,
}

impl Pager {
    pub fn start(lines: Vec<String>) -> Self {
        Self {
            lines,
            start: 0,
            end: 0,
        }
    }

    /// Advance to the next page of `height` rows.
    pub fn advance(&mut self, height: usize) {
        self.start = self.end;
        self.end = (self.start + height.max(1)).min(self.lines.len());
    }

    /// The page currently on display.
    pub fn current(&self) -> &[String] {
        &self.lines[self.start..self.end]
    }

    pub fn finished(&self) -> bool {
        self.end >= self.lines.len()
    }
}

/// Partial normal-mode command: everything parsed before the command
/// character arrives.
#[derive(Debug, Default)]
pub struct PendingCmd {
    pub prenum: Option<u32>,
    /// Operator character and its own count (`2d3w`).
    pub operator: Option<u8>,
    pub opnum: Option<u32>,
    pub register: Option<u8>,
    pub awaiting_register: bool,
    /// First character of a two-character command (`z`, `g`, `Z`, `m`,
    /// `r`, `f`, ...), held while awaiting the second.
    pub two_char: Option<u8>,
}

impl PendingCmd {
    pub fn clear(&mut self) {
        *self = PendingCmd::default();
    }

    /// Effective count: prefix and operator counts multiply.
    pub fn count(&self) -> u32 {
        self.prenum.unwrap_or(1).saturating_mul(self.opnum.unwrap_or(1)).max(1)
    }
}

/// Replayable byte form of the last change command, for `.`.
#[derive(Debug, Default)]
pub struct RedoBuffer {
    building: Vec<u8>,
    saved: Vec<u8>,
}

impl RedoBuffer {
    /// Begin recording a candidate command.
    pub fn begin(&mut self) {
        self.building.clear();
    }

    pub fn push(&mut self, c: u8) {
        self.building.push(c);
    }

    pub fn push_bytes(&mut self, bytes: &[u8]) {
        self.building.extend_from_slice(bytes);
    }

    /// The command completed and changed the buffer: keep it.
    pub fn commit(&mut self) {
        self.saved = std::mem::take(&mut self.building);
    }

    pub fn replay(&self) -> &[u8] {
        &self.saved
    }
}

/// The whole editor.
pub struct Editor {
    pub buffers: Vec<Buffer>,
    pub layout: WindowLayout,
    pub screen: VirtScr,
    pub params: Params,
    pub registers: RegisterFile,
    pub keymap: KeymapTranslator,
    pub state: InputState,
    pub search: search::SearchState,
    pub tags: tags::TagCache,
    pub char_search: CharSearch,
    pub pending: PendingCmd,
    pub insert: InsertState,
    pub cmdline: CmdlineState,
    pub pager: Pager,
    pub redo: RedoBuffer,
    /// Pending status-line message (shown at next redraw).
    pub message: Option<String>,
    /// Matching-bracket position to flash the cursor at (`showmatch`).
    pub showmatch: Option<Position>,
    /// Ring the bell at next flush (`errorbells`).
    pub bell_pending: bool,
    /// Alternate filename (`#` expansion, `^^`).
    pub alt_file: Option<String>,
    /// The `:args` file list and position within it.
    pub files: Vec<String>,
    pub file_ix: usize,
    pub psv_clock: preserve::PreserveClock,
    /// The event pump should suspend the process (`:stop`, `^Z`).
    pub suspend_pending: bool,
    /// Set when the editor should exit.
    pub exit_code: Option<i32>,
}

impl Editor {
    pub fn new(rows: usize, cols: usize) -> Self {
        let mut buffer = Buffer::new();
        buffer.nwindows = 1;
        let topline = buffer.lines.first();
        let mut keymap = KeymapTranslator::new();
        let params = Params::new();
        keymap.timeout_ms = params.num(ParamId::Timeout) as u64;
        Self {
            layout: WindowLayout::new(0, topline, rows, cols),
            buffers: vec![buffer],
            screen: VirtScr::new(rows, cols),
            params,
            registers: RegisterFile::new(),
            keymap,
            state: InputState::Normal,
            search: search::SearchState::default(),
            tags: tags::TagCache::new(),
            char_search: CharSearch::default(),
            pending: PendingCmd::default(),
            insert: InsertState::default(),
            cmdline: CmdlineState::default(),
            pager: Pager::default(),
            redo: RedoBuffer::default(),
            message: None,
            showmatch: None,
            bell_pending: false,
            alt_file: None,
            files: Vec::new(),
            file_ix: 0,
            psv_clock: preserve::PreserveClock::default(),
            suspend_pending: false,
            exit_code: None,
        }
    }

    // ---- focus helpers ---------------------------------------------------

    pub fn curbuf_id(&self) -> BufferId {
        self.layout.current().buffer
    }

    pub fn curbuf(&self) -> &Buffer {
        &self.buffers[self.curbuf_id()]
    }

    pub fn curbuf_mut(&mut self) -> &mut Buffer {
        let id = self.curbuf_id();
        &mut self.buffers[id]
    }

    pub fn cursor(&self) -> Position {
        self.layout.current().cursor
    }

    pub fn set_cursor(&mut self, pos: Position) {
        self.layout.current_mut().cursor = pos;
    }

    /// Clamp the cursor for normal mode: at most on the last character
    /// of its line (or column 0 of an empty line).
    pub fn clamp_cursor(&mut self) {
        let buf = &self.buffers[self.layout.current().buffer];
        let mut pos = self.layout.current().cursor;
        let len = buf.lines.len(pos.line);
        if pos.index >= len {
            pos.index = len.saturating_sub(1);
        }
        self.layout.current_mut().cursor = pos;
    }

    // ---- status-line surface ---------------------------------------------

    pub fn show_message(&mut self, msg: impl Into<String>) {
        self.message = Some(msg.into());
    }

    pub fn show_error(&mut self, msg: impl Into<String>) {
        let msg = msg.into();
        debug!(target: "editor.status", error = %msg, "error surfaced");
        if self.params.is_set(ParamId::Errorbells) {
            self.bell_pending = true;
        }
        self.message = Some(msg);
    }

    pub fn beep(&mut self) {
        self.bell_pending = true;
    }

    /// Report "N more/fewer lines" when a change is big enough.
    pub fn report_lines(&mut self, delta: i64) {
        let report = self.params.num(ParamId::Report);
        if report > 0 && delta.unsigned_abs() >= report as u64 {
            let n = delta.unsigned_abs();
            let word = if delta < 0 { "fewer" } else { "more" };
            let s = if n == 1 { "" } else { "s" };
            self.show_message(format!("{n} {word} line{s}"));
        }
    }

    /// Apply parameter-change effects to the rest of the editor.
    pub fn apply_param_effects(&mut self, effects: &[ParamEffect]) {
        for fx in effects {
            match fx {
                ParamEffect::InvalidateTags => self.tags.invalidate(),
                ParamEffect::UndoLevels(n) => {
                    for buf in &mut self.buffers {
                        buf.set_undo_levels(*n);
                    }
                }
                ParamEffect::MapTimeout(ms) => self.keymap.timeout_ms = *ms,
                ParamEffect::RedrawAll => {
                    for buf in &mut self.buffers {
                        buf.dirty.mark_from(1);
                    }
                }
            }
        }
        self.keymap.remap = self.params.is_set(ParamId::Remap);
    }

    /// Record the previous-context mark before a long jump.
    pub fn set_pcmark(&mut self) {
        let pos = self.cursor();
        self.curbuf_mut().marks.set_prev_context(pos);
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;

    /// An 80x24 editor with the given buffer contents, cursor at 1,0.
    pub fn editor_with(lines: &[&str]) -> Editor {
        let mut ed = Editor::new(24, 80);
        let texts: Vec<Vec<u8>> = lines.iter().map(|l| l.as_bytes().to_vec()).collect();
        let cursor = Position::new(ed.curbuf().lines.first(), 0);
        let buf = ed.curbuf_mut();
        buf.start_command(cursor);
        let chain = buf.lines.chain_from_texts(&texts);
        buf.replbuffer(chain);
        buf.end_command();
        buf.set_modified(false);
        buf.clear_undo_history();
        let first = ed.curbuf().lines.first();
        ed.set_cursor(Position::new(first, 0));
        ed
    }

    pub fn contents(ed: &Editor) -> Vec<String> {
        let buf = ed.curbuf();
        buf.lines
            .iter_from(buf.lines.first())
            .map(|id| String::from_utf8(buf.lines.text(id).to_vec()).unwrap())
            .collect()
    }

    /// Feed bytes through the full keymap + mode machine.
    pub fn feed(ed: &mut Editor, bytes: &[u8]) {
        for &b in bytes {
            ed.keymap.push_raw(b);
        }
        dispatcher::drain_input(ed);
    }

    pub fn cursor_lineno(ed: &Editor) -> u64 {
        ed.curbuf().lines.lineno(ed.cursor().line)
    }
}
