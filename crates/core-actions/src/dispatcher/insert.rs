//! Insert and replace modes: character entry, autoindent, wrap margin,
//! literal-next, register insertion, and the overwrite variants.
//!
//! The whole insert session sits inside one change bracket, so a later
//! `u` removes everything typed (plus whatever a `c` / `o` command did
//! before entering the mode). Typed bytes accumulate in
//! `InsertState::text` for the `<` register, redo, and count replay.

use core_config::ParamId;
use core_events::InputState;
use core_state::registers::RegisterName;
use core_text::{Position, motion};
use tracing::trace;

use crate::display::virt_col;
use crate::{Editor, ReplaceState};

/// Enter insert mode at `at`, opening the change bracket.
pub fn begin_insert(ed: &mut Editor, at: Position, count: u32) {
    let bufid = ed.layout.current().buffer;
    ed.buffers[bufid].start_command(at);
    begin_insert_continuing(ed, at, count);
}

/// Enter insert mode inside a bracket the caller already opened (`c`,
/// `o`, `O`).
pub fn begin_insert_continuing(ed: &mut Editor, at: Position, count: u32) {
    ed.insert = crate::InsertState {
        start: at,
        count: count.max(1),
        text: Vec::new(),
        literal_next: false,
        awaiting_register: false,
        replace: None,
    };
    ed.set_cursor(at);
    ed.state = InputState::Insert;
    trace!(target: "edit.insert", "insert begins");
}

/// `R`: overwrite mode. The line is snapshotted so `^H` can restore
/// overwritten characters.
pub fn begin_overwrite(ed: &mut Editor, at: Position) {
    let bufid = ed.layout.current().buffer;
    let saved = ed.buffers[bufid].lines.text(at.line).to_vec();
    ed.buffers[bufid].start_command(at);
    begin_insert_continuing(ed, at, 1);
    ed.insert.replace = Some(ReplaceState::Overwrite {
        saved_line: saved,
        start_index: at.index,
    });
    ed.state = InputState::Replace;
}

/// `r`: replace exactly `count` characters with the next byte typed.
pub fn begin_replace_one(ed: &mut Editor, count: u32) {
    ed.insert = crate::InsertState {
        start: ed.cursor(),
        count: count.max(1),
        text: Vec::new(),
        literal_next: false,
        awaiting_register: false,
        replace: Some(ReplaceState::ReplaceOne),
    };
    ed.state = InputState::Replace;
}

/// One mapped byte in Insert mode.
pub fn process_char(ed: &mut Editor, c: u8) {
    if ed.insert.literal_next {
        ed.insert.literal_next = false;
        ed.redo.push(c);
        insert_byte(ed, c);
        return;
    }
    if ed.insert.awaiting_register {
        ed.insert.awaiting_register = false;
        insert_register(ed, c);
        return;
    }
    match c {
        0x1b => end_insert(ed),
        0x08 | 0x7f => erase_char(ed),
        0x17 => erase_word(ed), // ^W
        0x14 => shift_current(ed, true),  // ^T
        0x04 => shift_current(ed, false), // ^D
        b'\r' | b'\n' => {
            ed.redo.push(b'\r');
            split_line(ed);
        }
        0x16 | 0x11 => {
            // ^V / ^Q: take the next byte literally.
            ed.insert.literal_next = true;
        }
        0x01 => {
            // ^A: insert the last-insert register.
            insert_register(ed, b'<');
        }
        0x02 => {
            // ^B <reg>: insert a named register.
            ed.insert.awaiting_register = true;
        }
        _ => {
            ed.redo.push(c);
            insert_byte(ed, c);
        }
    }
}

/// One mapped byte in Replace mode.
pub fn process_replace_char(ed: &mut Editor, c: u8) {
    if ed.insert.literal_next {
        ed.insert.literal_next = false;
        if matches!(ed.insert.replace, Some(ReplaceState::Overwrite { .. })) {
            ed.redo.push(c);
            overwrite_byte(ed, c);
        }
        return;
    }
    match ed.insert.replace {
        Some(ReplaceState::ReplaceOne) => {
            if c == 0x1b {
                ed.state = InputState::Normal;
                return;
            }
            ed.redo.push(c);
            replace_chars(ed, c);
        }
        Some(ReplaceState::Overwrite { .. }) => match c {
            0x1b => end_insert(ed),
            0x08 | 0x7f => overwrite_backspace(ed),
            b'\r' | b'\n' => {
                ed.redo.push(b'\r');
                split_line(ed);
            }
            0x16 | 0x11 => ed.insert.literal_next = true,
            _ => {
                ed.redo.push(c);
                overwrite_byte(ed, c);
            }
        },
        None => {
            // Shouldn't happen; recover to normal mode.
            ed.state = InputState::Normal;
        }
    }
}

/// `r` execution: count copies of `c` over the existing characters.
fn replace_chars(ed: &mut Editor, c: u8) {
    let count = ed.insert.count as usize;
    let cur = ed.cursor();
    let bufid = ed.layout.current().buffer;
    let len = ed.buffers[bufid].lines.len(cur.line);
    ed.state = InputState::Normal;
    if cur.index + count > len {
        ed.beep();
        return;
    }
    if c == b'\r' || c == b'\n' {
        // Replacing with a newline splits the line.
        let buf = &mut ed.buffers[bufid];
        buf.start_command(cur);
        let tail = buf.lines.text(cur.line)[cur.index + count..].to_vec();
        let keep = cur.index;
        let len_now = buf.lines.len(cur.line);
        buf.replchars(cur.line, keep, len_now - keep, b"");
        let chain = buf.lines.chain_from_texts(&[tail]);
        let line = chain.expect("one line").head;
        let anchor = buf.lines.next(cur.line).unwrap_or(buf.lines.lastline());
        buf.repllines(anchor, 0, chain);
        buf.end_command();
        ed.set_cursor(Position::new(line, 0));
        ed.redo.commit();
        return;
    }
    let repl = vec![c; count];
    let buf = &mut ed.buffers[bufid];
    buf.start_command(cur);
    buf.replchars(cur.line, cur.index, count, &repl);
    buf.end_command();
    ed.set_cursor(Position::new(cur.line, cur.index + count - 1));
    ed.redo.commit();
}

/// Insert one byte at the cursor, then apply wrap margin and showmatch.
fn insert_byte(ed: &mut Editor, c: u8) {
    let cur = ed.cursor();
    let bufid = ed.layout.current().buffer;
    ed.buffers[bufid].replchars(cur.line, cur.index, 0, &[c]);
    ed.insert.text.push(c);
    ed.set_cursor(Position::new(cur.line, cur.index + 1));

    if c != b' ' && c != b'\t' {
        wrap_margin(ed);
    }
    if matches!(c, b')' | b']' | b'}') && ed.params.is_set(ParamId::Showmatch) {
        let bufid = ed.layout.current().buffer;
        let at = ed.cursor();
        let opener = motion::show_match(
            &ed.buffers[bufid].lines,
            Position::new(at.line, at.index.saturating_sub(1)),
        );
        ed.showmatch = opener;
    }
}

fn overwrite_byte(ed: &mut Editor, c: u8) {
    let cur = ed.cursor();
    let bufid = ed.layout.current().buffer;
    let len = ed.buffers[bufid].lines.len(cur.line);
    let n_del = usize::from(cur.index < len);
    ed.buffers[bufid].replchars(cur.line, cur.index, n_del, &[c]);
    ed.insert.text.push(c);
    ed.set_cursor(Position::new(cur.line, cur.index + 1));
}

/// `^H` in overwrite mode: restore the original character; the cursor
/// cannot cross the starting column.
fn overwrite_backspace(ed: &mut Editor) {
    let cur = ed.cursor();
    let (saved, start_index) = match &ed.insert.replace {
        Some(ReplaceState::Overwrite {
            saved_line,
            start_index,
        }) => (saved_line.clone(), *start_index),
        _ => return,
    };
    if cur.index <= start_index {
        ed.beep();
        return;
    }
    let at = cur.index - 1;
    let bufid = ed.layout.current().buffer;
    let buf = &mut ed.buffers[bufid];
    if at < saved.len() {
        buf.replchars(cur.line, at, 1, &saved[at..at + 1]);
    } else {
        // Past the original end: the byte was appended, just drop it.
        buf.replchars(cur.line, at, 1, b"");
    }
    ed.insert.text.pop();
    ed.set_cursor(Position::new(cur.line, at));
}

/// `^H` / DEL: erase one character, never past the insert start.
fn erase_char(ed: &mut Editor) {
    let cur = ed.cursor();
    let start = ed.insert.start;
    if cur.line == start.line && cur.index <= start.index {
        ed.beep();
        return;
    }
    if cur.index == 0 {
        // Never erases across a line boundary.
        ed.beep();
        return;
    }
    let bufid = ed.layout.current().buffer;
    ed.buffers[bufid].replchars(cur.line, cur.index - 1, 1, b"");
    ed.insert.text.pop();
    ed.set_cursor(Position::new(cur.line, cur.index - 1));
}

/// `^W`: erase the word before the cursor, bounded by the insert start.
fn erase_word(ed: &mut Editor) {
    let cur = ed.cursor();
    let start = ed.insert.start;
    let floor = if cur.line == start.line { start.index } else { 0 };
    if cur.index <= floor {
        ed.beep();
        return;
    }
    let bufid = ed.layout.current().buffer;
    let text = ed.buffers[bufid].lines.text(cur.line).to_vec();
    let mut at = cur.index;
    while at > floor && matches!(text[at - 1], b' ' | b'\t') {
        at -= 1;
    }
    let is_word = |c: u8| c.is_ascii_alphanumeric() || c == b'_';
    if at > floor {
        let word = is_word(text[at - 1]);
        while at > floor
            && !matches!(text[at - 1], b' ' | b'\t')
            && is_word(text[at - 1]) == word
        {
            at -= 1;
        }
    }
    let n = cur.index - at;
    ed.buffers[bufid].replchars(cur.line, at, n, b"");
    for _ in 0..n {
        ed.insert.text.pop();
    }
    ed.set_cursor(Position::new(cur.line, at));
}

/// `^T` / `^D`: shift the current line's indent by one shiftwidth,
/// rounded to a multiple.
fn shift_current(ed: &mut Editor, right: bool) {
    let sw = ed.params.num(ParamId::Shiftwidth).max(1) as usize;
    let ts = ed.params.num(ParamId::Tabstop).max(1) as usize;
    let cur = ed.cursor();
    let bufid = ed.layout.current().buffer;
    let buf = &mut ed.buffers[bufid];
    let text = buf.lines.text(cur.line).to_vec();
    let ws_end = text
        .iter()
        .position(|&c| c != b' ' && c != b'\t')
        .unwrap_or(text.len());
    let mut width = 0usize;
    for &c in &text[..ws_end] {
        width = if c == b'\t' { (width / ts + 1) * ts } else { width + 1 };
    }
    let new_width = if right {
        (width / sw + 1) * sw
    } else {
        (width.saturating_sub(1) / sw) * sw
    };
    let mut indent = vec![b'\t'; new_width / ts];
    indent.resize(indent.len() + new_width % ts, b' ');
    let delta = indent.len() as isize - ws_end as isize;
    buf.replchars(cur.line, 0, ws_end, &indent);
    let ix = (cur.index as isize + delta).max(0) as usize;
    ed.set_cursor(Position::new(cur.line, ix.min(ed.curbuf().lines.len(cur.line))));
}

/// CR: split the line at the cursor, carrying autoindent.
fn split_line(ed: &mut Editor) {
    let cur = ed.cursor();
    let bufid = ed.layout.current().buffer;
    let buf = &mut ed.buffers[bufid];
    let text = buf.lines.text(cur.line).to_vec();
    let indent = if ed.params.is_set(ParamId::Autoindent) {
        text[..text
            .iter()
            .position(|&c| c != b' ' && c != b'\t')
            .unwrap_or(text.len())
            .min(cur.index)]
            .to_vec()
    } else {
        Vec::new()
    };
    let mut newline = indent.clone();
    newline.extend_from_slice(&text[cur.index.min(text.len())..]);
    let tail_len = text.len().saturating_sub(cur.index);
    buf.replchars(cur.line, cur.index, tail_len, b"");
    let chain = buf.lines.chain_from_texts(&[newline]);
    let line = chain.expect("one line").head;
    let anchor = buf.lines.next(cur.line).unwrap_or(buf.lines.lastline());
    buf.repllines(anchor, 0, chain);
    ed.insert.text.push(b'\n');
    ed.insert.text.extend_from_slice(&indent);
    ed.set_cursor(Position::new(line, indent.len()));
}

/// Wrap margin: when the cursor's virtual column crosses
/// `columns - wrapmargin`, break at the last whitespace run, carrying
/// the word being typed to a fresh line and collapsing the run.
fn wrap_margin(ed: &mut Editor) {
    let wm = ed.params.num(ParamId::Wrapmargin).max(0) as usize;
    if wm == 0 {
        return;
    }
    let cols = ed.layout.current().ncols;
    let cur = ed.cursor();
    let bufid = ed.layout.current().buffer;
    let text = ed.buffers[bufid].lines.text(cur.line).to_vec();
    if virt_col(&text, cur.index, &ed.params) < cols.saturating_sub(wm) {
        return;
    }
    // Find the whitespace run before the word being typed.
    let mut ws_end = cur.index;
    while ws_end > 0 && !matches!(text[ws_end - 1], b' ' | b'\t') {
        ws_end -= 1;
    }
    if ws_end == 0 {
        // One unbroken word: nothing to wrap at.
        return;
    }
    let mut ws_start = ws_end;
    while ws_start > 0 && matches!(text[ws_start - 1], b' ' | b'\t') {
        ws_start -= 1;
    }
    let indent = if ed.params.is_set(ParamId::Autoindent) {
        text[..text
            .iter()
            .position(|&c| c != b' ' && c != b'\t')
            .unwrap_or(text.len())
            .min(ws_start)]
            .to_vec()
    } else {
        Vec::new()
    };
    let buf = &mut ed.buffers[bufid];
    let carried = text[ws_end..].to_vec();
    let mut newline = indent.clone();
    newline.extend_from_slice(&carried);
    // Drop the whitespace run and the carried word from this line.
    buf.replchars(cur.line, ws_start, text.len() - ws_start, b"");
    let chain = buf.lines.chain_from_texts(&[newline]);
    let line = chain.expect("one line").head;
    let anchor = buf.lines.next(cur.line).unwrap_or(buf.lines.lastline());
    buf.repllines(anchor, 0, chain);
    let carried_cursor = indent.len() + (cur.index - ws_end);
    ed.set_cursor(Position::new(line, carried_cursor));
    trace!(target: "edit.insert", "wrap margin split");
}

fn insert_register(ed: &mut Editor, designator: u8) {
    let name = match RegisterName::parse(designator) {
        Some((n, _)) => n,
        None => {
            ed.beep();
            return;
        }
    };
    let bytes = match ed.registers.get(name) {
        Some(content) => content.as_input(),
        None => {
            ed.show_error("Nothing in register");
            return;
        }
    };
    for b in bytes {
        if b == b'\n' {
            split_line(ed);
        } else {
            insert_byte(ed, b);
        }
    }
}

/// ESC: close the session. A count of n replays the typed text n-1
/// further times, the `<` register records it, the bracket closes and
/// the redo buffer commits.
pub fn end_insert(ed: &mut Editor) {
    let replay = ed.insert.text.clone();
    let count = ed.insert.count;
    for _ in 1..count {
        for &b in &replay {
            if b == b'\n' {
                split_line(ed);
            } else {
                insert_byte(ed, b);
            }
        }
    }
    let full: Vec<u8> = if count > 1 {
        let mut v = Vec::with_capacity(replay.len() * count as usize);
        for _ in 0..count {
            v.extend_from_slice(&replay);
        }
        v
    } else {
        replay
    };
    if !full.is_empty() {
        ed.registers.record_insert(&full);
    }
    ed.redo.push(0x1b);
    ed.redo.commit();

    let bufid = ed.layout.current().buffer;
    let report = ed.buffers[bufid].end_command();
    if let Some(delta) = report {
        ed.report_lines(delta);
    }

    // The cursor steps back onto the last inserted character.
    let cur = ed.cursor();
    if cur.index > 0 {
        ed.set_cursor(Position::new(cur.line, cur.index - 1));
    }
    ed.clamp_cursor();
    ed.insert = crate::InsertState::default();
    ed.state = InputState::Normal;
    trace!(target: "edit.insert", "insert ends");
}

