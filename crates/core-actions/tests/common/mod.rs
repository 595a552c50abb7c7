//! Shared helpers for the integration suites: build an editor with
//! known content and push keystrokes through the whole pipeline
//! (keymap translation included).

use core_actions::{Editor, dispatcher};
use core_text::Position;

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

/// Type bytes at the editor, exactly as the terminal pump would.
pub fn feed(ed: &mut Editor, bytes: &[u8]) {
    for &b in bytes {
        ed.keymap.push_raw(b);
    }
    dispatcher::drain_input(ed);
}

pub fn cursor_lineno(ed: &Editor) -> u64 {
    ed.curbuf().lines.lineno(ed.cursor().line)
}

pub fn cursor_col(ed: &Editor) -> usize {
    ed.cursor().index
}
