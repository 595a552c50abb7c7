//! The event loop's editor side: the mode machine and per-mode
//! character dispatch.
//!
//! Events arrive from the terminal pump; characters go through the
//! two-stage keymap translation and are then fed to whichever handler
//! the current input state selects. The returned [`EventResponse`]
//! carries the next read timeout: the keymap timeout while a map is
//! mid-match, the preserve timeout once enough keystrokes have piled
//! up, else an indefinite wait.

use core_config::ParamId;
use core_events::{Event, EventResponse, InputState, signals};
use core_keymap::MapMode;
use core_text::Position;
use tracing::{debug, trace};

use crate::io_ops::FileFormat;
use crate::{Editor, preserve};

pub mod cmdline;
pub mod insert;
pub mod normal;

fn mode_for(state: InputState) -> MapMode {
    match state {
        InputState::Normal | InputState::SubNormal => MapMode::Command,
        InputState::Insert | InputState::Replace | InputState::Cmdline => MapMode::Insert,
        InputState::Display | InputState::Exiting => MapMode::PassThrough,
    }
}

/// Feed one fully mapped character to the current mode's handler.
pub fn dispatch_char(ed: &mut Editor, c: u8) {
    // Any keystroke ends a showmatch flash.
    ed.showmatch = None;
    trace!(target: "dispatch.mode", state = ?ed.state, ch = c, "char");
    match ed.state {
        InputState::Normal | InputState::SubNormal => normal::process_char(ed, c),
        InputState::Insert => insert::process_char(ed, c),
        InputState::Replace => insert::process_replace_char(ed, c),
        InputState::Cmdline => cmdline::process_char(ed, c),
        InputState::Display => display_char(ed, c),
        InputState::Exiting => {}
    }
}

/// Pull every available mapped character through the mode machine.
pub fn drain_input(ed: &mut Editor) {
    loop {
        if ed.state == InputState::Exiting {
            break;
        }
        let mode = mode_for(ed.state);
        match ed.keymap.getc(mode) {
            Some(c) => dispatch_char(ed, c),
            None => break,
        }
    }
}

/// Enter Display mode over multi-line output, or put a single line
/// straight on the status line.
pub fn enter_display(ed: &mut Editor, lines: Vec<String>) {
    match lines.len() {
        0 => {}
        1 => ed.show_message(lines.into_iter().next().expect("one line")),
        _ => {
            let rows = ed.layout.current().text_rows().max(1);
            ed.pager = crate::Pager::start(lines);
            ed.pager.advance(rows);
            ed.state = InputState::Display;
        }
    }
}

fn display_char(ed: &mut Editor, c: u8) {
    match c {
        b' ' | b'\r' | b'\n' => {
            if ed.pager.finished() {
                leave_display(ed);
            } else {
                let rows = ed.layout.current().text_rows().max(1);
                ed.pager.advance(rows);
            }
        }
        b'q' | 0x1b | 0x03 => leave_display(ed),
        _ => {}
    }
}

fn leave_display(ed: &mut Editor) {
    ed.pager = crate::Pager::default();
    ed.state = InputState::Normal;
    ed.screen.invalidate();
    ed.curbuf_mut().dirty.mark_from(1);
}

/// Preserve every modified buffer (periodic timer, fatal events).
pub fn preserve_all(ed: &mut Editor) {
    let format = FileFormat::from_params(&ed.params);
    for buf in &mut ed.buffers {
        if buf.is_modified() {
            let _ = preserve::preserve_buffer(buf, format);
        }
    }
    ed.psv_clock.reset();
    debug!(target: "dispatch.preserve", "buffers preserved");
}

/// Handle one event and say how the pump should wait next.
pub fn handle_event(ed: &mut Editor, event: Event) -> EventResponse {
    match event {
        Event::Char(c) => {
            ed.keymap.push_raw(c);
            ed.psv_clock.note_keystroke();
            drain_input(ed);
        }
        Event::Timeout => {
            ed.showmatch = None;
            if ed.keymap.waiting() {
                ed.keymap.timeout();
                drain_input(ed);
            } else if ed.psv_clock.due(&ed.params) {
                preserve_all(ed);
            }
        }
        Event::Refresh => {
            ed.screen.invalidate();
            for buf in &mut ed.buffers {
                buf.dirty.mark_from(1);
            }
        }
        Event::Resize { rows, cols } => {
            ed.screen.resize(rows, cols);
            ed.layout.adjust(rows, cols);
            ed.screen.invalidate();
            for buf in &mut ed.buffers {
                buf.dirty.mark_from(1);
            }
            debug!(target: "dispatch.mode", rows, cols, "resized");
        }
        Event::Breakin => {
            // During Display mode an interrupt reads as ^C and ends the
            // paging; elsewhere it just rings the bell.
            if ed.state == InputState::Display {
                ed.keymap.stuff(&[0x03]);
                drain_input(ed);
            } else {
                ed.beep();
            }
        }
        Event::SuspendRequest => match ed.state {
            InputState::Normal => ed.suspend_pending = true,
            InputState::SubNormal => dispatch_char(ed, 0x1b),
            _ => ed.beep(),
        },
        Event::Terminate | Event::Disconnected => {
            preserve_all(ed);
            ed.exit_code = Some(1);
            ed.state = InputState::Exiting;
        }
        Event::MouseClick { row, col } => mouse_click(ed, row, col),
        Event::MouseDrag {
            from_row, to_row, ..
        } => mouse_drag(ed, from_row, to_row),
        Event::MouseMove { .. } => {}
    }
    response(ed)
}

/// Click: focus the window owning the row and move the cursor there.
fn mouse_click(ed: &mut Editor, row: usize, col: usize) {
    if ed.state != InputState::Normal {
        ed.beep();
        return;
    }
    let target = (0..ed.layout.len()).find(|&i| {
        let w = ed.layout.get(i);
        !w.is_hidden() && row >= w.winpos && row <= w.cmdline
    });
    let Some(i) = target else { return };
    ed.layout.focus(i);
    let win = ed.layout.get(i);
    if row == win.cmdline {
        return; // status line, focus change only
    }
    let offset = row - win.winpos;
    let bufid = win.buffer;
    let set = &ed.buffers[bufid].lines;
    let mut line = win.topline;
    if set.line_at(set.lineno(line).clamp(1, set.count() as u64)) != line {
        line = set.first();
    }
    for _ in 0..offset {
        match set.next(line) {
            Some(l) if !set.is_lastline(l) => line = l,
            _ => break,
        }
    }
    let index = crate::display::index_for_virt_col(set.text(line), col, &ed.params);
    ed.set_cursor(Position::new(line, index));
    ed.clamp_cursor();
}

/// Dragging a status line resizes the window above it.
fn mouse_drag(ed: &mut Editor, from_row: usize, to_row: usize) {
    let target = (0..ed.layout.len()).find(|&i| {
        let w = ed.layout.get(i);
        !w.is_hidden() && from_row == w.cmdline
    });
    if let Some(i) = target {
        let delta = to_row as isize - from_row as isize;
        ed.layout.resize(i, delta);
        ed.screen.invalidate();
        for buf in &mut ed.buffers {
            buf.dirty.mark_from(1);
        }
    }
}

/// Choose the pump's next wait.
pub fn response(ed: &mut Editor) -> EventResponse {
    if let Some(code) = ed.exit_code {
        return EventResponse::Exit(code);
    }
    if signals::take(&signals::TERMINATE) || signals::take(&signals::DISCONNECTED) {
        preserve_all(ed);
        return EventResponse::Exit(1);
    }
    let timeout_ms = if ed.showmatch.is_some() {
        200
    } else if ed.keymap.waiting() {
        ed.keymap.timeout_ms
    } else if ed.psv_clock.armed() {
        (ed.params.num(ParamId::Preservetime).max(1) as u64) * 1000
    } else {
        0
    };
    EventResponse::TimedInput { timeout_ms }
}
