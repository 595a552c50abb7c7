//! The `:` / `/` / `?` command line, edited on the status row.

use core_config::ParamId;
use core_events::InputState;
use core_text::Position;
use core_text::motion::Direction;

use crate::search::{self, Dialect};
use crate::{CmdlineState, Editor, ex};

/// Start building a command line under the given prefix, optionally
/// preloaded (the `!` operator preloads `:n,m!`).
pub fn begin(ed: &mut Editor, prefix: u8, initial: &[u8]) {
    ed.cmdline = CmdlineState {
        prefix,
        line: initial.to_vec(),
    };
    ed.state = InputState::Cmdline;
    refresh_echo(ed);
}

fn refresh_echo(ed: &mut Editor) {
    let mut echo = vec![ed.cmdline.prefix];
    echo.extend_from_slice(&ed.cmdline.line);
    ed.layout.current_mut().cmd_echo = echo;
}

fn leave(ed: &mut Editor) {
    ed.layout.current_mut().cmd_echo.clear();
    ed.state = InputState::Normal;
}

pub fn process_char(ed: &mut Editor, c: u8) {
    match c {
        0x1b => {
            leave(ed);
        }
        b'\r' | b'\n' => {
            let prefix = ed.cmdline.prefix;
            let line = std::mem::take(&mut ed.cmdline.line);
            leave(ed);
            match prefix {
                b':' => ex::execute(ed, &line),
                b'/' | b'?' => do_search(ed, prefix, &line),
                _ => {}
            }
        }
        0x08 | 0x7f => {
            // Erasing past the prompt abandons the command.
            if ed.cmdline.line.pop().is_none() {
                leave(ed);
                return;
            }
            refresh_echo(ed);
        }
        0x15 => {
            // ^U: wipe the line.
            ed.cmdline.line.clear();
            refresh_echo(ed);
        }
        _ => {
            ed.cmdline.line.push(c);
            refresh_echo(ed);
        }
    }
}

/// Execute a `/` or `?` search typed on the command line.
fn do_search(ed: &mut Editor, prefix: u8, pat: &[u8]) {
    let dir = if prefix == b'/' {
        Direction::Forward
    } else {
        Direction::Backward
    };
    let dialect = Dialect::from_params(&ed.params);
    let ignorecase = ed.params.is_set(ParamId::Ignorecase);
    if let Err(e) = ed.search.compile(pat, prefix, dialect, ignorecase) {
        ed.show_error(e.to_string());
        return;
    }
    if !pat.is_empty() {
        ed.registers.record_search(pat, dir == Direction::Backward);
    }
    ed.search.last_dir = dir;
    let prog = match ed.search.prog() {
        Some(p) => p,
        None => {
            ed.show_error("No previous regular expression");
            return;
        }
    };
    let wrapscan = ed.params.is_set(ParamId::Wrapscan);
    let bufid = ed.layout.current().buffer;
    let hit = search::search_buffer(&ed.buffers[bufid], &prog, ed.cursor(), dir, wrapscan);
    match hit {
        Some(pos) => {
            ed.set_pcmark();
            ed.set_cursor(Position::new(pos.line, pos.index));
            ed.clamp_cursor();
        }
        None => ed.show_error("Pattern not found"),
    }
}
