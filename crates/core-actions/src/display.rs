//! The logical-to-virtual half of the display pipeline: painting each
//! window's buffer region into the shared virtual screen.
//!
//! Buffer bytes are expanded cell by cell: tabs to the next `tabstop`
//! column (or `^I` in list mode), control characters as `^X`, high-bit
//! bytes as `\xHH`. A buffer line too long for the window wraps onto
//! following rows; when the window runs out of rows mid-line the last
//! row shows `@` markers. Rows past the end of the buffer show `~`.
//! The cell-level diffing below all of this lives in `core-render`.

use core_config::{ParamId, Params};
use core_model::Window;
use core_render::{ColourSlot, SlineFlags, VirtScr};
use core_state::Buffer;
use core_text::{FmtArg, Flexbuf, Position};

use crate::Editor;

/// Width reserved for line numbers when `number` is set ("%6ld  ").
pub const NUM_WIDTH: usize = 8;

/// Expand one buffer byte into display cells.
fn expand_byte(c: u8, at_col: usize, tabstop: usize, list: bool, tabs: bool, out: &mut Vec<u8>) {
    match c {
        b'\t' if list || !tabs => {
            out.extend_from_slice(b"^I");
        }
        b'\t' => {
            let next = (at_col / tabstop + 1) * tabstop;
            out.resize(out.len() + (next - at_col), b' ');
        }
        0x00..=0x1f => {
            out.push(b'^');
            out.push(c + b'@');
        }
        0x7f => {
            out.extend_from_slice(b"^?");
        }
        0x80..=0xff => {
            let mut f = Flexbuf::new();
            f.push_bytes(b"\\x");
            let hex = b"0123456789ABCDEF";
            f.push(hex[(c >> 4) as usize]);
            f.push(hex[(c & 0xf) as usize]);
            out.extend_from_slice(f.as_bytes());
        }
        _ => out.push(c),
    }
}

/// Expand a whole line to display cells.
pub fn expand_line(text: &[u8], params: &Params) -> Vec<u8> {
    let tabstop = params.num(ParamId::Tabstop).max(1) as usize;
    let list = params.is_set(ParamId::List);
    let tabs = params.is_set(ParamId::Tabs);
    let mut out = Vec::with_capacity(text.len() + 8);
    for &c in text {
        let col = out.len();
        expand_byte(c, col, tabstop, list, tabs, &mut out);
    }
    if list {
        out.push(b'$');
    }
    out
}

/// Screen column of the byte at `index` (the virtual column, before any
/// wrapping).
pub fn virt_col(text: &[u8], index: usize, params: &Params) -> usize {
    let tabstop = params.num(ParamId::Tabstop).max(1) as usize;
    let list = params.is_set(ParamId::List);
    let tabs = params.is_set(ParamId::Tabs);
    let mut out = Vec::new();
    for &c in text.iter().take(index) {
        let col = out.len();
        expand_byte(c, col, tabstop, list, tabs, &mut out);
    }
    out.len()
}

/// Byte index whose cell span covers virtual column `want` (for sticky
/// columns in vertical motion). Clamps to the last character.
pub fn index_for_virt_col(text: &[u8], want: usize, params: &Params) -> usize {
    if text.is_empty() {
        return 0;
    }
    for i in 0..text.len() {
        if virt_col(text, i + 1, params) > want {
            return i;
        }
    }
    text.len() - 1
}

/// Rows the expanded line occupies in a window `cols` wide.
pub fn physical_rows(text: &[u8], cols: usize, params: &Params) -> usize {
    let cells = expand_line(text, params).len();
    if cols == 0 || cells == 0 {
        return 1;
    }
    cells.div_ceil(cols)
}

/// Make sure the cursor line is inside the window frame, moving
/// `topline` the shortest distance that works (a jump-scroll rather
/// than a full recentre).
pub fn frame_cursor(buf: &Buffer, win: &mut Window, params: &Params) {
    let rows = win.text_rows();
    if rows == 0 {
        return;
    }
    let set = &buf.lines;
    // Cursor and topline handles may be stale after heavy edits (a line
    // they pointed at was detached); fall back to the nearest attached
    // line with the remembered number.
    let count = set.count() as u64;
    let n = set.lineno(win.cursor.line).clamp(1, count);
    if set.line_at(n) != win.cursor.line {
        win.cursor = Position::new(set.line_at(n), 0);
    }
    let cur = set.lineno(win.cursor.line);
    let mut top = set.lineno(win.topline).clamp(1, count);
    if set.line_at(top) != win.topline {
        win.topline = set.line_at(top.min(cur));
        top = set.lineno(win.topline);
    }
    if cur < top {
        win.topline = set.line_at(cur);
        return;
    }
    // Count physical rows from topline down to the cursor line.
    let mut used = 0usize;
    let mut id = set.line_at(top);
    loop {
        used += physical_rows(set.text(id), win.ncols.saturating_sub(num_pad(params)), params);
        if set.lineno(id) == cur {
            break;
        }
        match set.next(id) {
            Some(n) if !set.is_lastline(n) => id = n,
            _ => break,
        }
    }
    while used > rows {
        // Scroll the top off until the cursor fits.
        let top_id = win.topline;
        used -= physical_rows(
            set.text(top_id),
            win.ncols.saturating_sub(num_pad(params)),
            params,
        );
        match set.next(top_id) {
            Some(n) if !set.is_lastline(n) => win.topline = n,
            _ => break,
        }
    }
}

fn num_pad(params: &Params) -> usize {
    if params.is_set(ParamId::Number) {
        NUM_WIDTH
    } else {
        0
    }
}

/// Paint one window (text rows, markers, status line) into the screen.
/// Returns the screen (row, col) the cursor should sit at, when this is
/// the current window.
pub fn update_window(
    screen: &mut VirtScr,
    buf: &Buffer,
    win: &mut Window,
    params: &Params,
) -> (usize, usize) {
    if win.is_hidden() {
        return (0, 0);
    }
    frame_cursor(buf, win, params);
    let set = &buf.lines;
    let numbering = params.is_set(ParamId::Number);
    let pad = num_pad(params);
    let text_cols = win.ncols.saturating_sub(pad);
    let mut row = win.winpos;
    let last_text_row = win.winpos + win.text_rows();
    let mut id = win.topline;
    let mut cursor_at = (win.winpos, 0usize);
    win.botline = win.topline;
    screen.set_colour(ColourSlot::Normal);

    while row < last_text_row && !set.is_lastline(id) {
        let text = set.text(id);
        let cells = expand_line(text, params);
        let nphys = if cells.is_empty() {
            1
        } else {
            cells.len().div_ceil(text_cols.max(1))
        };
        let fits = row + nphys <= last_text_row;
        let mut f = Flexbuf::new();
        if numbering {
            f.lformat("%6lu  ", &[FmtArg::Unum(set.lineno(id))]);
        }

        if id == win.cursor.line {
            let vcol = virt_col(text, win.cursor.index, params);
            win.virt_col = vcol;
            let crow = row + vcol / text_cols.max(1);
            cursor_at = (
                crow.min(last_text_row.saturating_sub(1)),
                pad + vcol % text_cols.max(1),
            );
        }

        if fits {
            for (i, chunk) in cells.chunks(text_cols.max(1)).enumerate() {
                screen.clear_line(row, 0);
                if i == 0 && numbering {
                    screen.write(row, 0, f.as_bytes());
                }
                screen.write(row, pad, chunk);
                screen.int_line_flags(row, SlineFlags::TEXT);
                row += 1;
            }
            if cells.is_empty() {
                // chunks() yields nothing for an empty line.
                screen.clear_line(row, 0);
                if numbering {
                    screen.write(row, 0, f.as_bytes());
                }
                screen.int_line_flags(row, SlineFlags::TEXT);
                row += 1;
            }
            win.botline = id;
        } else {
            // A cut-off long line: remaining rows show '@'.
            while row < last_text_row {
                screen.clear_line(row, 0);
                screen.write(row, 0, b"@");
                screen.int_line_flags(row, SlineFlags::MARKER);
                row += 1;
            }
            break;
        }
        match set.next(id) {
            Some(n) => id = n,
            None => break,
        }
    }
    // Rows past the end of the buffer.
    while row < last_text_row {
        screen.clear_line(row, 0);
        screen.write(row, 0, b"~");
        screen.int_line_flags(row, SlineFlags::MARKER);
        row += 1;
    }
    (cursor_at.0, cursor_at.1)
}

/// Build and paint a window's status line: an explicit message, the
/// command being typed, or file information.
pub fn update_status(
    screen: &mut VirtScr,
    buf: &Buffer,
    win: &Window,
    message: Option<&str>,
    typing: Option<&[u8]>,
) {
    if win.is_hidden() {
        return;
    }
    let row = win.cmdline;
    let readonly = buf.is_readonly();
    screen.set_colour(if readonly {
        ColourSlot::Readonly
    } else {
        ColourSlot::Status
    });
    screen.clear_line(row, 0);
    let mut f = Flexbuf::new();
    if let Some(cmd) = typing {
        f.push_bytes(cmd);
        screen.int_line_flags(row, SlineFlags::COMMAND);
    } else if let Some(msg) = message {
        f.push_bytes(msg.as_bytes());
        screen.int_line_flags(row, SlineFlags::MESSAGE);
    } else {
        let name = buf.display_name();
        let modified: &[u8] = if buf.is_modified() { b" [Modified]" } else { b"" };
        let ro: &[u8] = if readonly { b" [Readonly]" } else { b"" };
        f.lformat(
            "\"%s\"%s%s %lu lines",
            &[
                FmtArg::Str(name.as_bytes()),
                FmtArg::Str(modified),
                FmtArg::Str(ro),
                FmtArg::Unum(buf.lines.count() as u64),
            ],
        );
        if readonly {
            screen.int_line_flags(row, SlineFlags::READONLY);
        }
    }
    let width = win.ncols;
    let bytes = f.as_bytes();
    screen.write(row, 0, &bytes[..bytes.len().min(width)]);
    screen.set_colour(ColourSlot::Normal);
}

/// Repaint every displayed window of the editor and position the
/// cursor for the current one.
pub fn update_all(ed: &mut Editor) {
    let current = ed.layout.current_index();
    let mut cursor_rc = (0, 0);
    // A showmatch flash paints with the cursor on the matching bracket;
    // the real cursor comes back at the next keystroke or timeout.
    let saved_cursor = ed.showmatch.map(|pos| {
        let real = ed.layout.current().cursor;
        ed.layout.current_mut().cursor = pos;
        real
    });
    for i in 0..ed.layout.len() {
        if ed.layout.get(i).is_hidden() {
            continue;
        }
        let bufid = ed.layout.get(i).buffer;
        // Field-wise split borrows: screen + one window + one buffer.
        let (screen, win, buf, params) = {
            let Editor {
                screen,
                layout,
                buffers,
                params,
                ..
            } = ed;
            (screen, layout.get_mut(i), &buffers[bufid], &*params)
        };
        let rc = update_window(screen, buf, win, params);
        if i == current {
            cursor_rc = rc;
        }
        let message = if i == current {
            ed.message.as_deref()
        } else {
            None
        };
        let typing = {
            let w = ed.layout.get(i);
            if i == current && !w.cmd_echo.is_empty() {
                Some(w.cmd_echo.clone())
            } else {
                None
            }
        };
        let Editor {
            screen,
            layout,
            buffers,
            ..
        } = ed;
        update_status(
            screen,
            &buffers[bufid],
            layout.get(i),
            message,
            typing.as_deref(),
        );
    }
    if let Some(real) = saved_cursor {
        ed.layout.current_mut().cursor = real;
    }
    if matches!(ed.state, core_events::InputState::Display) {
        paint_pager(ed);
    }
    for buf in &mut ed.buffers {
        buf.dirty.clear();
    }
    ed.screen.goto(cursor_rc.0, cursor_rc.1);
}

/// Display mode: the pager's current page covers the focused window.
fn paint_pager(ed: &mut Editor) {
    let win = ed.layout.current();
    let (start, rows, cols, cmdline) = (win.winpos, win.text_rows(), win.ncols, win.cmdline);
    ed.screen.set_colour(ColourSlot::System);
    let page: Vec<String> = ed.pager.current().to_vec();
    for r in 0..rows {
        ed.screen.clear_line(start + r, 0);
        if let Some(line) = page.get(r) {
            let bytes = line.as_bytes();
            ed.screen
                .write(start + r, 0, &bytes[..bytes.len().min(cols)]);
        }
        ed.screen.int_line_flags(start + r, SlineFlags::MESSAGE);
    }
    ed.screen.set_colour(ColourSlot::Status);
    ed.screen.clear_line(cmdline, 0);
    let prompt: &[u8] = if ed.pager.finished() {
        b"[Hit return to continue]"
    } else {
        b"--More--"
    };
    ed.screen.write(cmdline, 0, prompt);
    ed.screen.int_line_flags(cmdline, SlineFlags::COMMAND);
    ed.screen.set_colour(ColourSlot::Normal);
}
