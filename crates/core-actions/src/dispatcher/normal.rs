//! Normal-mode command parsing and execution.
//!
//! A command is assembled one mapped byte at a time into the editor's
//! [`PendingCmd`]: optional register, optional count, optional operator
//! with its own count, then a command or motion character (two-character
//! commands hold the first byte and re-enter here with the second).
//! When an operator meets its motion the span between the cursor and the
//! target is handed to [`apply_operator`]; a doubled operator letter
//! works linewise on whole lines. Counts multiply: `2d3w` deletes six
//! words.
//!
//! Every change command leaves its canonical keystrokes in the redo
//! buffer; `.` stuffs them back through the mapped input queue.

use core_events::InputState;
use core_state::registers::{PutDirection, RegisterContent, RegisterName};
use core_text::motion::{self, Direction, ObjectMacros, TextObject, WordType};
use core_text::{LineId, Position};
use tracing::trace;

use crate::display::{index_for_virt_col, virt_col};
use crate::search;
use crate::{Editor, ex};
use core_config::ParamId;

use super::{cmdline, insert};

/// How a motion target combines with an operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotionKind {
    /// Span stops just short of the target position.
    Exclusive,
    /// Span includes the byte at the target position.
    Inclusive,
    /// Whole lines from the cursor line through the target line.
    Linewise,
}

pub fn process_char(ed: &mut Editor, c: u8) {
    // Register designator after '"'.
    if ed.pending.awaiting_register {
        ed.pending.awaiting_register = false;
        if RegisterName::parse(c).is_some() {
            ed.pending.register = Some(c);
            ed.redo.push(c);
        } else {
            ed.beep();
            ed.pending.clear();
        }
        return;
    }

    // Second character of a two-character command.
    if let Some(first) = ed.pending.two_char.take() {
        ed.state = InputState::Normal;
        ed.redo.push(c);
        second_char(ed, first, c);
        return;
    }

    // A fresh command starts a fresh redo candidate.
    let fresh = ed.pending.prenum.is_none()
        && ed.pending.operator.is_none()
        && ed.pending.register.is_none();
    if fresh {
        ed.redo.begin();
    }
    ed.redo.push(c);

    // Counts. A leading '0' is the line-start motion, not a count.
    if c.is_ascii_digit() {
        let slot = if ed.pending.operator.is_some() {
            &mut ed.pending.opnum
        } else {
            &mut ed.pending.prenum
        };
        if !(c == b'0' && slot.is_none()) {
            let digit = u32::from(c - b'0');
            *slot = Some(
                slot.unwrap_or(0)
                    .saturating_mul(10)
                    .saturating_add(digit)
                    .min(999_999),
            );
            return;
        }
    }

    match c {
        b'"' => {
            ed.pending.awaiting_register = true;
        }

        // Operators; a doubled letter works linewise.
        b'd' | b'c' | b'y' | b'<' | b'>' | b'!' => {
            match ed.pending.operator {
                None => ed.pending.operator = Some(c),
                Some(op) if op == c => {
                    let count = ed.pending.count() as usize;
                    linewise_doubled(ed, op, count);
                    ed.pending.clear();
                }
                Some(_) => {
                    ed.beep();
                    ed.pending.clear();
                }
            }
        }

        // Two-character commands: hold the first byte.
        b'f' | b'F' | b't' | b'T' | b'\'' | b'`' | b'g' | b'[' | b']' => {
            ed.pending.two_char = Some(c);
            ed.state = InputState::SubNormal;
        }
        b'm' | b'@' | b'Z' | b'z' if ed.pending.operator.is_none() => {
            ed.pending.two_char = Some(c);
            ed.state = InputState::SubNormal;
        }

        // Vertical motions: sticky column, linewise under an operator.
        b'j' | 0x0e | b'k' | 0x10 | b'+' | b'\r' | b'-' | b'_' => {
            let count = ed.pending.count() as i64;
            let delta = match c {
                b'j' | 0x0e | b'+' | b'\r' => count,
                b'_' => count - 1,
                _ => -count,
            };
            let result = if delta == 0 {
                Some(ed.cursor())
            } else {
                vertical(ed, delta).map(|(p, _)| p)
            };
            match result {
                Some(pos) if ed.pending.operator.is_some() => {
                    finish_motion(ed, pos, MotionKind::Linewise);
                }
                Some(pos) => {
                    let pos = if matches!(c, b'+' | b'\r' | b'-' | b'_') {
                        let text = ed.curbuf().lines.text(pos.line).to_vec();
                        Position::new(pos.line, first_nonblank(&text))
                    } else {
                        pos
                    };
                    ed.set_cursor(pos);
                    ed.pending.clear();
                    ed.clamp_cursor();
                }
                None => {
                    // Hitting the buffer edge fails silently.
                    ed.pending.clear();
                }
            }
        }

        // Simple motions.
        b'h' | 0x08 | b'l' | b' ' | b'0' | b'^' | b'$' | b'|' | b'w' | b'W' | b'b' | b'B'
        | b'e' | b'E' | b'G' | b'H' | b'M' | b'L' | b'(' | b')' | b'{' | b'}' | b'%'
        | b'n' | b'N' | b';' | b',' => {
            if c == b'G' {
                ed.set_pcmark();
            }
            if let Some((pos, kind)) = eval_motion(ed, c, None) {
                finish_motion(ed, pos, kind);
            } else {
                ed.beep();
                ed.pending.clear();
            }
        }

        // Mode entries.
        b'i' | b'I' | b'a' | b'A' => {
            let count = ed.pending.count();
            let at = insert_entry_position(ed, c);
            ed.pending.clear();
            insert::begin_insert(ed, at, count);
        }
        b'o' | b'O' => {
            // The opened line and the typed text undo as one unit.
            let count = ed.pending.count();
            ed.pending.clear();
            let cur = ed.cursor();
            let bufid = ed.layout.current().buffer;
            let buf = &mut ed.buffers[bufid];
            buf.start_command(cur);
            let anchor = if c == b'o' {
                buf.lines.next(cur.line).unwrap_or(buf.lines.lastline())
            } else {
                cur.line
            };
            let indent = if ed.params.is_set(ParamId::Autoindent) {
                let text = buf.lines.text(cur.line);
                text[..first_nonblank_ws(text)].to_vec()
            } else {
                Vec::new()
            };
            let chain = buf.lines.chain_from_texts(&[indent.clone()]);
            let line = chain.expect("one line").head;
            buf.repllines(anchor, 0, chain);
            let at = Position::new(line, indent.len());
            ed.set_cursor(at);
            insert::begin_insert_continuing(ed, at, count);
        }
        b'R' => {
            let at = ed.cursor();
            ed.pending.clear();
            insert::begin_overwrite(ed, at);
        }
        b'r' => {
            let count = ed.pending.count();
            ed.pending.clear();
            insert::begin_replace_one(ed, count);
        }

        // Character edits.
        b'x' => delete_under(ed),
        b'X' => delete_left(ed),
        b'D' => {
            let target = Position::new(ed.cursor().line, line_len(ed, ed.cursor().line));
            let reg = ed.pending.register.take();
            ed.pending.clear();
            ed.pending.register = reg;
            apply_operator(ed, b'd', target, MotionKind::Exclusive);
        }
        b'C' => {
            let target = Position::new(ed.cursor().line, line_len(ed, ed.cursor().line));
            let reg = ed.pending.register.take();
            ed.pending.clear();
            ed.pending.register = reg;
            apply_operator(ed, b'c', target, MotionKind::Exclusive);
        }
        b's' => {
            // Substitute characters: delete count chars, insert.
            let count = ed.pending.count() as usize;
            let cur = ed.cursor();
            let end = (cur.index + count).min(line_len(ed, cur.line));
            let reg = ed.pending.register.take();
            ed.pending.clear();
            ed.pending.register = reg;
            apply_operator(ed, b'c', Position::new(cur.line, end), MotionKind::Exclusive);
        }
        b'S' => {
            let count = ed.pending.count() as usize;
            linewise_doubled(ed, b'c', count);
            ed.pending.clear();
        }
        b'~' => toggle_case(ed),
        b'J' => join_lines(ed),

        b'p' => put(ed, PutDirection::After),
        b'P' => put(ed, PutDirection::Before),

        b'u' => {
            ed.pending.clear();
            do_undo(ed);
        }
        b'.' => {
            ed.pending.clear();
            let replay = ed.redo.replay().to_vec();
            if replay.is_empty() {
                ed.beep();
            } else {
                ed.keymap.stuff(&replay);
            }
        }

        // Command-line and search entries.
        b':' | b'/' | b'?' => {
            ed.pending.clear();
            cmdline::begin(ed, c, b"");
        }

        // Scrolling.
        0x06 => scroll_lines(ed, text_rows(ed) as i64 - 2), // ^F
        0x02 => scroll_lines(ed, -(text_rows(ed) as i64 - 2)), // ^B
        0x04 => scroll_lines(ed, (text_rows(ed) / 2) as i64), // ^D
        0x15 => scroll_lines(ed, -((text_rows(ed) / 2) as i64)), // ^U
        0x05 => scroll_screen(ed, 1),  // ^E
        0x19 => scroll_screen(ed, -1), // ^Y

        0x07 => {
            // ^G: file information.
            ed.pending.clear();
            let buf = ed.curbuf();
            let lineno = buf.lines.lineno(ed.cursor().line);
            let total = buf.lines.count() as u64;
            let name = buf.display_name().to_string();
            let modified = if buf.is_modified() { " [Modified]" } else { "" };
            let pct = if total > 0 { lineno * 100 / total } else { 0 };
            ed.show_message(format!(
                "\"{name}\"{modified} line {lineno} of {total} --{pct}%--"
            ));
        }
        0x0c => {
            // ^L: repaint from scratch.
            ed.pending.clear();
            ed.screen.invalidate();
            ed.curbuf_mut().dirty.mark_from(1);
        }
        0x1d => {
            // ^]: tag to the identifier under the cursor.
            ed.pending.clear();
            tag_under_cursor(ed);
        }
        0x1e => {
            // ^^: edit the alternate file.
            ed.pending.clear();
            match ed.alt_file.clone() {
                Some(f) => ex::edit_file(ed, Some(&f), false),
                None => ed.show_error("No alternate file"),
            }
        }
        0x17 => {
            // ^W: focus the next displayed window.
            ed.pending.clear();
            ed.layout.focus_next();
        }
        0x12 => {
            // ^R: redo.
            ed.pending.clear();
            do_redo(ed);
        }

        0x1b => {
            // ESC cancels whatever was pending; bare ESC beeps.
            if fresh {
                ed.beep();
            }
            ed.pending.clear();
        }

        _ => {
            ed.beep();
            ed.pending.clear();
        }
    }
}

/// Second byte of a two-character command.
fn second_char(ed: &mut Editor, first: u8, c: u8) {
    if c == 0x1b {
        ed.pending.clear();
        return;
    }
    match first {
        b'f' | b'F' | b't' | b'T' => {
            let count = ed.pending.count() as usize;
            let dir = if first.is_ascii_lowercase() {
                Direction::Forward
            } else {
                Direction::Backward
            };
            let to_before = first.eq_ignore_ascii_case(&b't');
            ed.char_search.record(c, dir, to_before);
            // Forward character searches are inclusive motions; the
            // backward ones leave the cursor character out of the span.
            let kind = if dir == Direction::Forward {
                MotionKind::Inclusive
            } else {
                MotionKind::Exclusive
            };
            let buf = &ed.buffers[ed.layout.current().buffer];
            match motion::search_char(&buf.lines, ed.cursor(), c, dir, to_before, count) {
                Some(pos) => finish_motion(ed, pos, kind),
                None => {
                    ed.beep();
                    ed.pending.clear();
                }
            }
        }
        b'\'' | b'`' => {
            let mark = ed.curbuf().marks.get(c);
            match mark {
                Some(pos) => {
                    ed.set_pcmark();
                    let kind = if first == b'\'' {
                        MotionKind::Linewise
                    } else {
                        MotionKind::Exclusive
                    };
                    finish_motion(ed, pos, kind);
                }
                None => {
                    ed.show_error("Mark not set");
                    ed.pending.clear();
                }
            }
        }
        b'm' => {
            let pos = ed.layout.current().cursor;
            if !ed.curbuf_mut().marks.set(c, pos) {
                ed.beep();
            }
            ed.pending.clear();
        }
        b'@' => {
            ed.pending.clear();
            match RegisterName::parse(c) {
                Some((name, _)) => match ed.registers.get(name) {
                    Some(content) => {
                        let bytes = content.as_input();
                        ed.keymap.stuff(&bytes);
                    }
                    None => ed.show_error("Nothing in register"),
                },
                None => ed.beep(),
            }
        }
        b'Z' => {
            ed.pending.clear();
            if c == b'Z' {
                ex::write_and_quit(ed);
            } else {
                ed.beep();
            }
        }
        b'z' => {
            ed.pending.clear();
            reposition(ed, c);
        }
        b'g' => {
            if c == b'g' {
                let lineno = ed.pending.prenum.map_or(1, u64::from);
                let target = ed.curbuf().lines.line_at(lineno.max(1));
                ed.set_pcmark();
                finish_motion(ed, Position::new(target, 0), MotionKind::Linewise);
            } else {
                ed.beep();
                ed.pending.clear();
            }
        }
        b'[' | b']' => {
            if c == first {
                let dir = if first == b'[' {
                    Direction::Backward
                } else {
                    Direction::Forward
                };
                let macros = object_macros(ed);
                let buf = &ed.buffers[ed.layout.current().buffer];
                match motion::locate_object(
                    &buf.lines,
                    ed.cursor(),
                    TextObject::Section,
                    dir,
                    &macros,
                ) {
                    Some(pos) => finish_motion(ed, pos, MotionKind::Linewise),
                    None => {
                        ed.beep();
                        ed.pending.clear();
                    }
                }
            } else {
                ed.beep();
                ed.pending.clear();
            }
        }
        _ => {
            ed.beep();
            ed.pending.clear();
        }
    }
}

fn object_macros(ed: &Editor) -> ObjectMacros {
    ObjectMacros {
        paragraphs: ed.params.string(ParamId::Paragraphs).as_bytes().to_vec(),
        sections: ed.params.string(ParamId::Sections).as_bytes().to_vec(),
    }
}

fn line_len(ed: &Editor, line: LineId) -> usize {
    ed.curbuf().lines.len(line)
}

fn text_rows(ed: &Editor) -> usize {
    ed.layout.current().text_rows().max(1)
}

/// Evaluate a single-character motion from the cursor. `None` means the
/// motion failed (buffer boundary, no match).
fn eval_motion(ed: &mut Editor, c: u8, _arg: Option<u8>) -> Option<(Position, MotionKind)> {
    let count = ed.pending.count() as usize;
    let bufid = ed.layout.current().buffer;
    let cur = ed.cursor();
    let set = &ed.buffers[bufid].lines;
    use MotionKind::{Exclusive, Inclusive, Linewise};
    match c {
        b'h' | 0x08 => {
            let n = cur.index.min(count);
            if n == 0 {
                return None;
            }
            Some((Position::new(cur.line, cur.index - n), Exclusive))
        }
        b'l' | b' ' => {
            let len = set.len(cur.line);
            if len == 0 || cur.index + 1 >= len {
                return None;
            }
            let n = count.min(len - 1 - cur.index);
            Some((Position::new(cur.line, cur.index + n), Exclusive))
        }
        b'0' => Some((Position::new(cur.line, 0), Exclusive)),
        b'^' => {
            let ix = first_nonblank(set.text(cur.line));
            Some((Position::new(cur.line, ix), Exclusive))
        }
        b'$' => {
            let len = set.len(cur.line);
            Some((Position::new(cur.line, len.saturating_sub(1)), Inclusive))
        }
        b'|' => {
            let text = set.text(cur.line);
            let ix = index_for_virt_col(text, count.saturating_sub(1), &ed.params);
            Some((Position::new(cur.line, ix), Exclusive))
        }
        b'w' | b'W' => {
            let ty = if c == b'w' { WordType::Word } else { WordType::BigWord };
            // `cw` behaves like `ce`: it must not eat trailing blanks.
            let skip_white = ed.pending.operator != Some(b'c');
            let mut pos = cur;
            for _ in 0..count {
                match motion::fwd_word(set, pos, ty, skip_white) {
                    Some(p) => pos = p,
                    None if ed.pending.operator.is_some() => {
                        // Operating on the last word runs to end of line.
                        pos = Position::new(pos.line, set.len(pos.line));
                        break;
                    }
                    None => return None,
                }
            }
            Some((pos, Exclusive))
        }
        b'b' | b'B' => {
            let ty = if c == b'b' { WordType::Word } else { WordType::BigWord };
            let mut pos = cur;
            for _ in 0..count {
                pos = motion::bck_word(set, pos, ty)?;
            }
            Some((pos, Exclusive))
        }
        b'e' | b'E' => {
            let ty = if c == b'e' { WordType::Word } else { WordType::BigWord };
            let mut pos = cur;
            for _ in 0..count {
                pos = motion::end_word(set, pos, ty)?;
            }
            Some((pos, Inclusive))
        }
        b'G' => {
            let target = match ed.pending.prenum {
                Some(n) => set.line_at(u64::from(n).max(1)),
                None => set.last(),
            };
            Some((Position::new(target, 0), Linewise))
        }
        b'H' => window_line(ed, 0).map(|p| (p, Linewise)),
        b'M' => window_line(ed, text_rows(ed) / 2).map(|p| (p, Linewise)),
        b'L' => window_line(ed, text_rows(ed).saturating_sub(1)).map(|p| (p, Linewise)),
        b'(' => motion::locate_object(
            set,
            cur,
            TextObject::Sentence,
            Direction::Backward,
            &object_macros(ed),
        )
        .map(|p| (p, Exclusive)),
        b')' => motion::locate_object(
            set,
            cur,
            TextObject::Sentence,
            Direction::Forward,
            &object_macros(ed),
        )
        .map(|p| (p, Exclusive)),
        b'{' => motion::locate_object(
            set,
            cur,
            TextObject::Paragraph,
            Direction::Backward,
            &object_macros(ed),
        )
        .map(|p| (p, Exclusive)),
        b'}' => motion::locate_object(
            set,
            cur,
            TextObject::Paragraph,
            Direction::Forward,
            &object_macros(ed),
        )
        .map(|p| (p, Exclusive)),
        b'%' => motion::show_match(set, cur).map(|p| (p, Inclusive)),
        b';' | b',' => {
            let reverse = c == b',';
            let kind = match ed.char_search.effective_direction(reverse) {
                Some(Direction::Forward) => Inclusive,
                _ => Exclusive,
            };
            ed.char_search
                .repeat(set, cur, reverse, count)
                .map(|p| (p, kind))
        }
        b'n' | b'N' => {
            let prog = ed.search.prog()?;
            let dir = if c == b'n' {
                ed.search.last_dir
            } else {
                match ed.search.last_dir {
                    Direction::Forward => Direction::Backward,
                    Direction::Backward => Direction::Forward,
                }
            };
            let wrapscan = ed.params.is_set(ParamId::Wrapscan);
            let buf = &ed.buffers[bufid];
            let hit = search::search_buffer(buf, &prog, cur, dir, wrapscan);
            if hit.is_none() {
                ed.show_error("Pattern not found");
            }
            hit.map(|p| (p, Exclusive))
        }
        _ => None,
    }
}

/// `j` / `k` and friends: vertical motion to the sticky column.
fn vertical(ed: &mut Editor, delta: i64) -> Option<(Position, MotionKind)> {
    let bufid = ed.layout.current().buffer;
    let cur = ed.cursor();
    let set = &ed.buffers[bufid].lines;
    let mut line = cur.line;
    let n = delta.unsigned_abs();
    let mut moved = 0;
    for _ in 0..n {
        let next = if delta > 0 { set.next(line) } else { set.prev(line) };
        match next {
            Some(l) if !set.is_lastline(l) && !set.is_line0(l) => {
                line = l;
                moved += 1;
            }
            _ => break,
        }
    }
    if moved == 0 {
        return None;
    }
    let win = ed.layout.current();
    let want = if win.set_want_col {
        virt_col(set.text(cur.line), cur.index, &ed.params)
    } else {
        win.want_col
    };
    let ix = index_for_virt_col(set.text(line), want, &ed.params);
    let win = ed.layout.current_mut();
    win.want_col = want;
    win.set_want_col = false;
    Some((Position::new(line, ix), MotionKind::Exclusive))
}

fn window_line(ed: &Editor, offset: usize) -> Option<Position> {
    let win = ed.layout.current();
    let set = &ed.buffers[win.buffer].lines;
    let mut id = win.topline;
    // The handle may be stale; clamp through line numbers.
    if set.line_at(set.lineno(id).clamp(1, set.count() as u64)) != id {
        id = set.first();
    }
    for _ in 0..offset {
        match set.next(id) {
            Some(n) if !set.is_lastline(n) => id = n,
            _ => break,
        }
    }
    Some(Position::new(id, first_nonblank(set.text(id))))
}

pub fn first_nonblank(text: &[u8]) -> usize {
    text.iter()
        .position(|&c| c != b' ' && c != b'\t')
        .unwrap_or_else(|| text.len().saturating_sub(1))
}

/// A motion either moves the cursor or resolves a pending operator.
pub fn finish_motion(ed: &mut Editor, target: Position, kind: MotionKind) {
    match ed.pending.operator.take() {
        Some(op) => {
            apply_operator(ed, op, target, kind);
            ed.pending.clear();
        }
        None => {
            let pos = if kind == MotionKind::Linewise {
                let text = ed.curbuf().lines.text(target.line).to_vec();
                Position::new(target.line, first_nonblank(&text))
            } else {
                target
            };
            ed.set_cursor(pos);
            ed.layout.current_mut().set_want_col = true;
            ed.pending.clear();
            ed.clamp_cursor();
        }
    }
}

/// Order two positions by buffer position.
fn ordered(set: &core_text::LineSet, a: Position, b: Position) -> (Position, Position) {
    let (la, lb) = (set.lineno(a.line), set.lineno(b.line));
    if la < lb || (la == lb && a.index <= b.index) {
        (a, b)
    } else {
        (b, a)
    }
}

/// Apply operator `op` over the span from the cursor to `target`.
pub fn apply_operator(ed: &mut Editor, op: u8, target: Position, kind: MotionKind) {
    let bufid = ed.layout.current().buffer;
    let cur = ed.cursor();
    let reg = ed.pending.register;
    let (from, to) = ordered(&ed.buffers[bufid].lines, cur, target);
    trace!(target: "normal.operator", op = %(op as char), kind = ?kind, "operator");

    if kind == MotionKind::Linewise || matches!(op, b'<' | b'>' | b'!') {
        // Line operators round any span to whole lines.
        line_operator(ed, op, from.line, to.line, reg);
        return;
    }

    // Character span: half-open [from, to_excl).
    let set = &ed.buffers[bufid].lines;
    let mut to_excl = to;
    if kind == MotionKind::Inclusive {
        to_excl.index = (to.index + 1).min(set.len(to.line));
    }
    if from.line == to_excl.line && from.index >= to_excl.index {
        ed.beep();
        return;
    }

    match op {
        b'y' => {
            let content = ed.buffers[bufid].yank_chars(from, to_excl);
            ed.registers.yank(reg, content);
            ed.set_cursor(from);
        }
        b'd' => {
            delete_char_span(ed, bufid, from, to_excl, reg);
            ed.set_cursor(from);
            ed.clamp_cursor();
            ed.redo.commit();
        }
        b'c' => {
            // The delete and the following insert undo as one unit: an
            // outer bracket stays open until the insert ends.
            let at = ed.cursor();
            ed.buffers[bufid].start_command(at);
            delete_char_span(ed, bufid, from, to_excl, reg);
            ed.set_cursor(from);
            insert::begin_insert_continuing(ed, from, 1);
        }
        _ => ed.beep(),
    }
}

/// Yank + delete a character span as one composite change.
fn delete_char_span(
    ed: &mut Editor,
    bufid: usize,
    from: Position,
    to_excl: Position,
    reg: Option<u8>,
) {
    let content = ed.buffers[bufid].yank_chars(from, to_excl);
    ed.registers.push_deleted();
    ed.registers.yank(reg, content);
    let buf = &mut ed.buffers[bufid];
    buf.start_command(from);
    if from.line == to_excl.line {
        buf.replchars(from.line, from.index, to_excl.index - from.index, b"");
    } else {
        // Join the undeleted head and tail into one line, dropping the
        // whole lines in between.
        let mut merged = buf.lines.text(from.line)[..from.index].to_vec();
        merged.extend_from_slice(&buf.lines.text(to_excl.line)[to_excl.index..]);
        let nlines = buf.lines.lineno(to_excl.line) - buf.lines.lineno(from.line) + 1;
        let chain = buf.lines.chain_from_texts(&[merged]);
        buf.repllines(from.line, nlines as usize, chain);
    }
    let report = buf.end_command();
    if let Some(delta) = report {
        ed.report_lines(delta);
    }
}

/// `dd` / `yy` / `cc` / `<<` / `>>` / `!!`: operate linewise on `count`
/// lines starting at the cursor.
fn linewise_doubled(ed: &mut Editor, op: u8, count: usize) {
    let cur = ed.cursor();
    let set = &ed.curbuf().lines;
    let mut last = cur.line;
    for _ in 1..count {
        match set.next(last) {
            Some(n) if !set.is_lastline(n) => last = n,
            _ => break,
        }
    }
    let reg = ed.pending.register;
    line_operator(ed, op, cur.line, last, reg);
}

/// The linewise half of every operator.
fn line_operator(ed: &mut Editor, op: u8, from: LineId, to: LineId, reg: Option<u8>) {
    let bufid = ed.layout.current().buffer;
    let (from, to) = {
        let set = &ed.buffers[bufid].lines;
        if set.earlier(to, from) { (to, from) } else { (from, to) }
    };
    match op {
        b'y' => {
            let content = ed.buffers[bufid].yank_lines(from, to);
            ed.registers.yank(reg, content);
            ed.set_cursor(Position::new(from, 0));
        }
        b'd' | b'c' => {
            let content = ed.buffers[bufid].yank_lines(from, to);
            let n = match &content {
                RegisterContent::Lines(v) => v.len(),
                RegisterContent::Chars(_) => 1,
            };
            ed.registers.push_deleted();
            ed.registers.yank(reg, content);
            let cur = ed.cursor();
            let buf = &mut ed.buffers[bufid];
            buf.start_command(cur);
            if op == b'c' {
                // Change lines: replace them with one empty line and
                // insert there, all inside the bracket just opened.
                let lineno = buf.lines.lineno(from);
                let chain = buf.lines.chain_from_texts(&[Vec::new()]);
                buf.repllines(from, n, chain);
                let line = buf
                    .lines
                    .line_at(lineno.clamp(1, buf.lines.count() as u64));
                let at = Position::new(line, 0);
                ed.set_cursor(at);
                insert::begin_insert_continuing(ed, at, 1);
                return;
            }
            let lineno = buf.lines.lineno(from);
            buf.repllines(from, n, None);
            let report = buf.end_command();
            let landed = buf.lines.line_at(lineno.min(buf.lines.count() as u64).max(1));
            ed.set_cursor(Position::new(landed, 0));
            ed.clamp_cursor();
            if let Some(delta) = report {
                ed.report_lines(delta);
            }
            ed.redo.commit();
        }
        b'<' | b'>' => {
            shift_lines(ed, bufid, from, to, op == b'>');
            ed.redo.commit();
        }
        b'!' => {
            // Hand the range to the command line as :n,m!
            let set = &ed.buffers[bufid].lines;
            let (n, m) = (set.lineno(from), set.lineno(to));
            let initial = format!("{n},{m}!");
            cmdline::begin(ed, b':', initial.as_bytes());
        }
        _ => ed.beep(),
    }
}

/// Shift whole lines by one `shiftwidth`, rebuilding the leading
/// whitespace with tabs then spaces.
pub(crate) fn shift_lines(ed: &mut Editor, bufid: usize, from: LineId, to: LineId, right: bool) {
    let sw = ed.params.num(ParamId::Shiftwidth).max(1) as usize;
    let ts = ed.params.num(ParamId::Tabstop).max(1) as usize;
    let cur = ed.cursor();
    let buf = &mut ed.buffers[bufid];
    buf.start_command(cur);
    let mut id = Some(from);
    let mut done = 0u64;
    while let Some(line) = id {
        let text = buf.lines.text(line).to_vec();
        let ws_end = text
            .iter()
            .position(|&c| c != b' ' && c != b'\t')
            .unwrap_or(text.len());
        let mut width = 0usize;
        for &c in &text[..ws_end] {
            width = if c == b'\t' { (width / ts + 1) * ts } else { width + 1 };
        }
        let new_width = if right {
            width + sw
        } else {
            width.saturating_sub(sw)
        };
        if !text[ws_end..].is_empty() || !right {
            let mut indent = Vec::new();
            indent.resize(new_width / ts, b'\t');
            indent.resize(indent.len() + new_width % ts, b' ');
            buf.replchars(line, 0, ws_end, &indent);
            done += 1;
        }
        id = if line == to { None } else { buf.lines.next(line) };
    }
    let _ = buf.end_command();
    ed.set_cursor(Position::new(from, 0));
    ed.clamp_cursor();
    if done >= ed.params.num(ParamId::Report).max(0) as u64 {
        let s = if done == 1 { "" } else { "s" };
        ed.show_message(format!("{done} line{s} shifted"));
    }
}

fn insert_entry_position(ed: &mut Editor, c: u8) -> Position {
    let cur = ed.cursor();
    let bufid = ed.layout.current().buffer;
    match c {
        b'i' => cur,
        b'I' => {
            let text = ed.buffers[bufid].lines.text(cur.line).to_vec();
            Position::new(cur.line, first_nonblank(&text))
        }
        b'a' => {
            let len = ed.buffers[bufid].lines.len(cur.line);
            Position::new(cur.line, (cur.index + 1).min(len))
        }
        b'A' => Position::new(cur.line, ed.buffers[bufid].lines.len(cur.line)),
        _ => cur,
    }
}

fn delete_under(ed: &mut Editor) {
    let count = ed.pending.count() as usize;
    let reg = ed.pending.register.take();
    ed.pending.clear();
    let cur = ed.cursor();
    let len = line_len(ed, cur.line);
    if len == 0 || cur.index >= len {
        ed.beep();
        return;
    }
    let end = (cur.index + count).min(len);
    ed.pending.register = reg;
    apply_operator(ed, b'd', Position::new(cur.line, end), MotionKind::Exclusive);
    ed.pending.register = None;
}

fn delete_left(ed: &mut Editor) {
    let count = ed.pending.count() as usize;
    let reg = ed.pending.register.take();
    ed.pending.clear();
    let cur = ed.cursor();
    if cur.index == 0 {
        ed.beep();
        return;
    }
    let start = cur.index.saturating_sub(count);
    ed.pending.register = reg;
    apply_operator(ed, b'd', Position::new(cur.line, start), MotionKind::Exclusive);
    ed.pending.register = None;
}

fn toggle_case(ed: &mut Editor) {
    let count = ed.pending.count() as usize;
    ed.pending.clear();
    let cur = ed.cursor();
    let bufid = ed.layout.current().buffer;
    let buf = &mut ed.buffers[bufid];
    let len = buf.lines.len(cur.line);
    if len == 0 {
        ed.beep();
        return;
    }
    let end = (cur.index + count).min(len);
    let flipped: Vec<u8> = buf.lines.text(cur.line)[cur.index..end]
        .iter()
        .map(|&c| {
            if c.is_ascii_lowercase() {
                c.to_ascii_uppercase()
            } else if c.is_ascii_uppercase() {
                c.to_ascii_lowercase()
            } else {
                c
            }
        })
        .collect();
    buf.start_command(cur);
    buf.replchars(cur.line, cur.index, end - cur.index, &flipped);
    buf.end_command();
    ed.set_cursor(Position::new(cur.line, end.min(len.saturating_sub(1))));
    ed.redo.commit();
}

/// `J`: join `count` lines (at least two) with a single separating
/// space, collapsing the next line's leading whitespace.
fn join_lines(ed: &mut Editor) {
    let count = ed.pending.count().max(2) as usize;
    ed.pending.clear();
    let cur = ed.cursor();
    let bufid = ed.layout.current().buffer;
    let buf = &mut ed.buffers[bufid];
    let set = &buf.lines;
    let mut last = cur.line;
    let mut n = 1;
    while n < count {
        match set.next(last) {
            Some(l) if !set.is_lastline(l) => {
                last = l;
                n += 1;
            }
            _ => break,
        }
    }
    if n < 2 {
        ed.beep();
        return;
    }
    let mut joined = set.text(cur.line).to_vec();
    let mut seam = joined.len();
    let mut id = set.next(cur.line);
    for _ in 1..n {
        let line = id.expect("counted above");
        let text = set.text(line);
        let trimmed = &text[first_nonblank_ws(text)..];
        seam = joined.len();
        if !joined.is_empty() && joined.last() != Some(&b' ') && !trimmed.is_empty() {
            joined.push(b' ');
        }
        joined.extend_from_slice(trimmed);
        id = set.next(line);
    }
    buf.start_command(cur);
    let chain = buf.lines.chain_from_texts(&[joined]);
    buf.repllines(cur.line, n, chain);
    buf.end_command();
    let landed = ed.curbuf().lines.line_at(ed.curbuf().lines.lineno(cur.line).max(1));
    ed.set_cursor(Position::new(landed, seam));
    ed.clamp_cursor();
    ed.redo.commit();
}

fn first_nonblank_ws(text: &[u8]) -> usize {
    text.iter()
        .position(|&c| c != b' ' && c != b'\t')
        .unwrap_or(text.len())
}

fn put(ed: &mut Editor, dir: PutDirection) {
    let reg = ed.pending.register.take();
    ed.pending.clear();
    let name = match reg.map(RegisterName::parse) {
        Some(Some((n, _))) => n,
        None => RegisterName::Unnamed,
        Some(None) => {
            ed.beep();
            return;
        }
    };
    let content = match ed.registers.get(name) {
        Some(c) => c.clone(),
        None => {
            ed.show_error("Nothing in register");
            return;
        }
    };
    let cur = ed.cursor();
    let bufid = ed.layout.current().buffer;
    let buf = &mut ed.buffers[bufid];
    buf.start_command(cur);
    let pos = buf.put_register(cur, dir, &content);
    let report = buf.end_command();
    ed.set_cursor(pos);
    ed.clamp_cursor();
    if let Some(delta) = report {
        ed.report_lines(delta);
    }
    ed.redo.commit();
}

fn do_undo(ed: &mut Editor) {
    let cur = ed.cursor();
    let bufid = ed.layout.current().buffer;
    match ed.buffers[bufid].undo(cur) {
        Ok((lineno, index, delta)) => {
            let buf = &ed.buffers[bufid];
            let line = buf.lines.line_at(lineno.clamp(1, buf.lines.count() as u64));
            let index = index.min(buf.lines.len(line));
            ed.set_cursor(Position::new(line, index));
            ed.clamp_cursor();
            ed.report_lines(delta);
        }
        Err(e) => ed.show_error(e.to_string()),
    }
}

pub fn do_redo(ed: &mut Editor) {
    let cur = ed.cursor();
    let bufid = ed.layout.current().buffer;
    match ed.buffers[bufid].redo(cur) {
        Ok((lineno, index, delta)) => {
            let buf = &ed.buffers[bufid];
            let line = buf.lines.line_at(lineno.clamp(1, buf.lines.count() as u64));
            let index = index.min(buf.lines.len(line));
            ed.set_cursor(Position::new(line, index));
            ed.clamp_cursor();
            ed.report_lines(delta);
        }
        Err(e) => ed.show_error(e.to_string()),
    }
}

/// Move the view and cursor by `n` buffer lines (scrolling commands).
fn scroll_lines(ed: &mut Editor, n: i64) {
    ed.pending.clear();
    if n == 0 {
        return;
    }
    let bufid = ed.layout.current().buffer;
    let set = &ed.buffers[bufid].lines;
    let mut line = ed.cursor().line;
    let mut topline = ed.layout.current().topline;
    for _ in 0..n.unsigned_abs() {
        let (next, tnext) = if n > 0 {
            (set.next(line), set.next(topline))
        } else {
            (set.prev(line), set.prev(topline))
        };
        match next {
            Some(l) if !set.is_lastline(l) && !set.is_line0(l) => line = l,
            _ => break,
        }
        if let Some(t) = tnext
            && !set.is_lastline(t)
            && !set.is_line0(t)
        {
            topline = t;
        }
    }
    let win = ed.layout.current_mut();
    win.topline = topline;
    win.cursor = Position::new(line, 0);
    ed.clamp_cursor();
}

/// `^E` / `^Y`: move the screen window without moving the cursor until
/// it would leave the frame.
fn scroll_screen(ed: &mut Editor, n: i64) {
    ed.pending.clear();
    let bufid = ed.layout.current().buffer;
    let set = &ed.buffers[bufid].lines;
    let mut topline = ed.layout.current().topline;
    for _ in 0..n.unsigned_abs() {
        let next = if n > 0 { set.next(topline) } else { set.prev(topline) };
        match next {
            Some(t) if !set.is_lastline(t) && !set.is_line0(t) => topline = t,
            _ => break,
        }
    }
    let rows = text_rows(ed);
    let win = ed.layout.current_mut();
    win.topline = topline;
    // Pull the cursor back inside the frame if the window slid past it.
    let top_no = set.lineno(topline);
    let cur_no = set.lineno(win.cursor.line);
    if cur_no < top_no {
        win.cursor = Position::new(topline, 0);
    } else if cur_no >= top_no + rows as u64 {
        let mut l = topline;
        for _ in 1..rows {
            match set.next(l) {
                Some(x) if !set.is_lastline(x) => l = x,
                _ => break,
            }
        }
        win.cursor = Position::new(l, 0);
    }
    ed.clamp_cursor();
}

/// `z<CR>` / `z.` / `z-` / `zz`: put the cursor line at the top, middle
/// or bottom of the window.
fn reposition(ed: &mut Editor, c: u8) {
    let rows = text_rows(ed);
    let back = match c {
        b'\r' => 0,
        b'.' | b'z' => rows / 2,
        b'-' => rows.saturating_sub(1),
        _ => {
            ed.beep();
            return;
        }
    };
    let bufid = ed.layout.current().buffer;
    let set = &ed.buffers[bufid].lines;
    let mut top = ed.cursor().line;
    for _ in 0..back {
        match set.prev(top) {
            Some(l) if !set.is_line0(l) => top = l,
            _ => break,
        }
    }
    ed.layout.current_mut().topline = top;
}

fn tag_under_cursor(ed: &mut Editor) {
    let cur = ed.cursor();
    let text = ed.curbuf().lines.text(cur.line).to_vec();
    let mut start = cur.index.min(text.len());
    // Skip forward over non-identifier characters first.
    while start < text.len() && !(text[start].is_ascii_alphanumeric() || text[start] == b'_') {
        start += 1;
    }
    let end = text[start..]
        .iter()
        .position(|&c| !(c.is_ascii_alphanumeric() || c == b'_'))
        .map_or(text.len(), |n| start + n);
    if start == end {
        ed.beep();
        return;
    }
    let ident = text[start..end].to_vec();
    ex::tag_to(ed, &ident, false);
}
