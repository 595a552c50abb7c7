//! The ex command implementations.
//!
//! Each operation is a plain function over the editor context; the
//! parser in the parent module resolves ranges and argument shapes
//! before calling in. Linewise iteration is each command's own
//! business.

use std::path::Path;

use core_config::ParamId;
use core_events::InputState;
use core_model::WindowError;
use core_state::registers::{PutDirection, RegisterName};
use core_text::Position;
use tracing::{debug, info};

use super::{ExArgs, ExError, current_lineno, line_handle};
use crate::dispatcher::normal;
use crate::io_ops::{self, FileFormat};
use crate::search::{self, GlobalOutcome, LineRange};
use crate::{Editor, dispatcher, pipe, preserve};

type ExResult = Result<(), ExError>;

fn msg(e: impl std::fmt::Display) -> ExError {
    ExError::Message(e.to_string())
}

fn range_handles(ed: &Editor, range: (u64, u64)) -> LineRange {
    LineRange {
        from: line_handle(ed, range.0),
        to: line_handle(ed, range.1),
    }
}

// ---------------------------------------------------------------------------
// Files
// ---------------------------------------------------------------------------

/// `:e[dit][!] [file]` and the `^^` alternate-file jump.
pub fn edit_file(ed: &mut Editor, file: Option<&str>, force: bool) {
    if ed.curbuf().is_modified() && !force {
        ed.show_error("No write since last change (:edit! overrides)");
        return;
    }
    let target = match file
        .map(str::to_string)
        .or_else(|| ed.curbuf().filename.clone())
    {
        Some(f) => f,
        None => {
            ed.show_error("No filename");
            return;
        }
    };
    let old = ed.curbuf().filename.clone();
    if old.as_deref() != Some(target.as_str()) {
        ed.alt_file = old;
    }

    let (lines, note) = match io_ops::read_file(Path::new(&target), &ed.params, true) {
        Ok((lines, stats)) => {
            if let Some(fmt) = stats.format {
                let _ = ed.params.set_parsed(ParamId::Format, fmt.name());
            }
            let extra = if stats.incomplete_last_line {
                " [Incomplete last line]"
            } else {
                ""
            };
            let note = format!("\"{target}\"{extra} {} lines", stats.lines);
            (lines, note)
        }
        Err(_) => (Vec::new(), format!("\"{target}\" [New file]")),
    };

    let cursor = ed.cursor();
    let buf = ed.curbuf_mut();
    buf.start_command(cursor);
    let chain = buf.lines.chain_from_texts(&lines);
    buf.replbuffer(chain);
    buf.end_command();
    buf.marks.clear_all();
    buf.clear_undo_history();
    buf.set_modified(false);
    buf.filename = Some(target);
    buf.tempfname = None;
    let first = buf.lines.first();
    ed.set_cursor(Position::new(first, 0));
    ed.layout.current_mut().topline = first;
    ed.show_message(note);
    info!(target: "ex.file", "file edited");
}

pub(super) fn ex_edit(ed: &mut Editor, args: &ExArgs) -> ExResult {
    let arg = args.arg_str();
    let file = if arg.is_empty() { None } else { Some(arg.as_str()) };
    edit_file(ed, file, args.exclam);
    Ok(())
}

/// Write `range` (or everything) to `path` (or the buffer's file).
fn write_range(
    ed: &mut Editor,
    path: Option<&str>,
    range: Option<(u64, u64)>,
    force: bool,
) -> ExResult {
    let target = match path
        .map(str::to_string)
        .or_else(|| ed.curbuf().filename.clone())
    {
        Some(f) => f,
        None => return Err(ExError::Message("No output file".into())),
    };
    if ed.curbuf().is_readonly() && !force && path.is_none() {
        return Err(ExError::Message("File is read only".into()));
    }
    let policy = preserve::PreservePolicy::from_params(&ed.params);
    if preserve::preserve_before_write(policy, ed.curbuf()) && ed.curbuf().is_modified() {
        let format = FileFormat::from_params(&ed.params);
        let _ = preserve::preserve_buffer(ed.curbuf_mut(), format);
    }

    let whole = range.is_none()
        || range == Some((1, ed.curbuf().lines.count() as u64));
    let (from, to) = range.unwrap_or((1, ed.curbuf().lines.count() as u64));
    let buf = ed.curbuf();
    let lines: Vec<&[u8]> = buf
        .lines
        .iter_from(line_handle(ed, from))
        .take((to - from + 1) as usize)
        .map(|id| buf.lines.text(id))
        .collect();
    let format = FileFormat::from_params(&ed.params);
    let (n, bytes) =
        io_ops::write_lines(Path::new(&target), lines.into_iter(), format).map_err(msg)?;

    if whole && Some(target.as_str()) == ed.curbuf().filename.as_deref() {
        ed.curbuf_mut().set_modified(false);
        if preserve::removable_after_write(policy)
            && let Some(psv) = ed.curbuf_mut().tempfname.take()
        {
            let _ = std::fs::remove_file(psv);
        }
    }
    ed.show_message(format!("\"{target}\" {n} lines, {bytes} characters"));
    Ok(())
}

pub(super) fn ex_write(ed: &mut Editor, args: &ExArgs) -> ExResult {
    let arg = args.arg_str();
    if let Some(cmd) = arg.strip_prefix('!') {
        // :w !cmd - feed the range to a command's stdin.
        let (from, to) = args.range_or_all(ed);
        let input = collect_lines(ed, from, to);
        let shell = ed.params.string(ParamId::Shell).to_string();
        ed.registers.record_shell_line(cmd.as_bytes());
        let (_, status) = pipe::run_filter(&shell, cmd, Some(&input), false).map_err(msg)?;
        if status != 0 {
            return Err(ExError::Message(format!("Command exited with {status}")));
        }
        return Ok(());
    }
    let path = if arg.is_empty() { None } else { Some(arg.as_str()) };
    write_range(ed, path, args.range, args.exclam)
}

pub(super) fn ex_write_next(ed: &mut Editor, args: &ExArgs) -> ExResult {
    write_range(ed, None, args.range, args.exclam)?;
    ex_next(ed, args)
}

pub(super) fn ex_write_quit(ed: &mut Editor, args: &ExArgs) -> ExResult {
    let arg = args.arg_str();
    let path = if arg.is_empty() { None } else { Some(arg.as_str()) };
    // A partial range still writes, then the quit proceeds.
    write_range(ed, path, args.range, args.exclam)?;
    quit_current(ed, true)
}

pub(super) fn ex_xit(ed: &mut Editor, args: &ExArgs) -> ExResult {
    if ed.curbuf().is_modified() {
        let arg = args.arg_str();
        let path = if arg.is_empty() { None } else { Some(arg.as_str()) };
        write_range(ed, path, None, args.exclam)?;
    }
    quit_current(ed, true)
}

/// `ZZ`.
pub fn write_and_quit(ed: &mut Editor) {
    let r = if ed.curbuf().is_modified() {
        write_range(ed, None, None, false)
    } else {
        Ok(())
    };
    match r {
        Ok(()) => {
            let _ = quit_current(ed, true);
        }
        Err(e) => ed.show_error(e.to_string()),
    }
}

fn quit_current(ed: &mut Editor, saved: bool) -> ExResult {
    if !saved && ed.curbuf().is_modified() && ed.curbuf().nwindows <= 1 {
        return Err(ExError::NotSaved("quit"));
    }
    match ed.layout.close_window(ed.layout.current_index()) {
        Ok(closed) => {
            ed.buffers[closed.buffer].nwindows =
                ed.buffers[closed.buffer].nwindows.saturating_sub(1);
            ed.curbuf_mut().dirty.mark_from(1);
            Ok(())
        }
        Err(WindowError::LastWindow) => {
            ed.exit_code = Some(0);
            ed.state = InputState::Exiting;
            Ok(())
        }
        Err(e) => Err(msg(e)),
    }
}

pub(super) fn ex_quit(ed: &mut Editor, args: &ExArgs) -> ExResult {
    quit_current(ed, args.exclam)
}

pub(super) fn ex_close(ed: &mut Editor, args: &ExArgs) -> ExResult {
    match ed.layout.close_window(ed.layout.current_index()) {
        Ok(closed) => {
            ed.buffers[closed.buffer].nwindows =
                ed.buffers[closed.buffer].nwindows.saturating_sub(1);
            Ok(())
        }
        Err(WindowError::LastWindow) if args.exclam => quit_current(ed, args.exclam),
        Err(e) => Err(msg(e)),
    }
}

pub(super) fn ex_split(ed: &mut Editor, args: &ExArgs) -> ExResult {
    let bufid = ed.curbuf_id();
    let topline = ed.layout.current().topline;
    ed.layout
        .open_window(bufid, topline, None)
        .map_err(msg)?;
    ed.buffers[bufid].nwindows += 1;
    let cursor = ed.layout.get(ed.layout.next_displayed(ed.layout.current_index())).cursor;
    ed.set_cursor(cursor);
    let arg = args.arg_str();
    if !arg.is_empty() {
        // :split file - the new window edits a fresh buffer.
        let mut buf = core_state::Buffer::new();
        buf.nwindows = 1;
        let first = buf.lines.first();
        ed.buffers.push(buf);
        let newid = ed.buffers.len() - 1;
        ed.buffers[bufid].nwindows -= 1;
        ed.layout.current_mut().buffer = newid;
        ed.layout.current_mut().topline = first;
        ed.set_cursor(Position::new(first, 0));
        edit_file(ed, Some(&arg), true);
    }
    Ok(())
}

pub(super) fn ex_next(ed: &mut Editor, args: &ExArgs) -> ExResult {
    if ed.file_ix + 1 >= ed.files.len() {
        return Err(ExError::Message("No more files".into()));
    }
    ed.file_ix += 1;
    let file = ed.files[ed.file_ix].clone();
    edit_file(ed, Some(&file), args.exclam);
    Ok(())
}

pub(super) fn ex_rewind(ed: &mut Editor, args: &ExArgs) -> ExResult {
    if ed.files.is_empty() {
        return Err(ExError::Message("No files".into()));
    }
    ed.file_ix = 0;
    let file = ed.files[0].clone();
    edit_file(ed, Some(&file), args.exclam);
    Ok(())
}

pub(super) fn ex_args(ed: &mut Editor, _args: &ExArgs) -> ExResult {
    if ed.files.is_empty() {
        return Err(ExError::Message("No files".into()));
    }
    let mut parts = Vec::new();
    for (i, f) in ed.files.iter().enumerate() {
        if i == ed.file_ix {
            parts.push(format!("[{f}]"));
        } else {
            parts.push(f.clone());
        }
    }
    ed.show_message(parts.join(" "));
    Ok(())
}

pub(super) fn ex_read(ed: &mut Editor, args: &ExArgs) -> ExResult {
    let (_, at) = args.range_or_current(ed);
    let arg = args.arg_str();
    let lines = if let Some(cmd) = arg.strip_prefix('!') {
        let shell = ed.params.string(ParamId::Shell).to_string();
        ed.registers.record_shell_line(cmd.as_bytes());
        let (out, status) = pipe::run_filter(&shell, cmd, None, true).map_err(msg)?;
        if status != 0 {
            ed.show_message(format!("Command exited with {status}"));
        }
        out.unwrap_or_default()
    } else if arg.is_empty() {
        return Err(ExError::Message("No filename".into()));
    } else {
        let (lines, stats) =
            io_ops::read_file(Path::new(&arg), &ed.params, true).map_err(msg)?;
        ed.show_message(format!("\"{arg}\" {} lines", stats.lines));
        lines
    };
    if lines.is_empty() {
        return Ok(());
    }
    let cursor = ed.cursor();
    let n = lines.len() as i64;
    let buf = ed.curbuf_mut();
    let anchor = if at == 0 {
        buf.lines.first()
    } else {
        let l = buf.lines.line_at(at.min(buf.lines.count() as u64));
        buf.lines.next(l).unwrap_or(buf.lines.lastline())
    };
    buf.start_command(cursor);
    let chain = buf.lines.chain_from_texts(&lines);
    let head = chain.map(|c| c.head);
    buf.repllines(anchor, 0, chain);
    buf.end_command();
    if let Some(h) = head {
        ed.set_cursor(Position::new(h, 0));
    }
    ed.report_lines(n);
    Ok(())
}

pub(super) fn ex_cd(ed: &mut Editor, args: &ExArgs) -> ExResult {
    let arg = args.arg_str();
    let target = if arg.is_empty() {
        std::env::var("HOME").map_err(|_| ExError::Message("No home directory".into()))?
    } else {
        arg
    };
    std::env::set_current_dir(&target).map_err(msg)?;
    ed.show_message(target);
    Ok(())
}

pub(super) fn ex_source(ed: &mut Editor, args: &ExArgs) -> ExResult {
    let arg = args.arg_str();
    if arg.is_empty() {
        return Err(ExError::Message("No filename".into()));
    }
    let content = std::fs::read(Path::new(&arg)).map_err(msg)?;
    for line in content.split(|&c| c == b'\n') {
        let line: Vec<u8> = line.strip_suffix(b"\r").unwrap_or(line).to_vec();
        if line.is_empty() || line.first() == Some(&b'"') {
            continue;
        }
        super::execute(ed, &line);
    }
    Ok(())
}

pub(super) fn ex_preserve(ed: &mut Editor, _args: &ExArgs) -> ExResult {
    let format = FileFormat::from_params(&ed.params);
    let path = preserve::preserve_buffer(ed.curbuf_mut(), format).map_err(msg)?;
    ed.show_message(format!("Preserved to {}", path.display()));
    Ok(())
}

// ---------------------------------------------------------------------------
// Line surgery
// ---------------------------------------------------------------------------

fn collect_lines(ed: &Editor, from: u64, to: u64) -> Vec<Vec<u8>> {
    let buf = ed.curbuf();
    buf.lines
        .iter_from(line_handle(ed, from))
        .take((to.saturating_sub(from) + 1) as usize)
        .map(|id| buf.lines.text(id).to_vec())
        .collect()
}

pub(super) fn ex_delete(ed: &mut Editor, args: &ExArgs) -> ExResult {
    let (from, to) = args.range_or_current(ed);
    let reg = args.arg.first().copied();
    let lines = collect_lines(ed, from, to);
    let n = lines.len();
    ed.registers.push_deleted();
    ed.registers
        .yank(reg, core_state::RegisterContent::Lines(lines));
    let cursor = ed.cursor();
    let buf = ed.curbuf_mut();
    buf.start_command(cursor);
    let first = buf.lines.line_at(from);
    buf.repllines(first, n, None);
    let report = buf.end_command();
    let landed = line_handle(ed, from);
    ed.set_cursor(Position::new(landed, 0));
    ed.clamp_cursor();
    if let Some(delta) = report {
        ed.report_lines(delta);
    }
    Ok(())
}

pub(super) fn ex_yank(ed: &mut Editor, args: &ExArgs) -> ExResult {
    let (from, to) = args.range_or_current(ed);
    let reg = args.arg.first().copied();
    let lines = collect_lines(ed, from, to);
    ed.registers
        .yank(reg, core_state::RegisterContent::Lines(lines));
    Ok(())
}

pub(super) fn ex_put(ed: &mut Editor, args: &ExArgs) -> ExResult {
    let (_, at) = args.range_or_current(ed);
    let reg = args.arg.first().copied();
    let name = match reg.map(RegisterName::parse) {
        Some(Some((n, _))) => n,
        None => RegisterName::Unnamed,
        Some(None) => return Err(ExError::Message("Bad register".into())),
    };
    let content = ed
        .registers
        .get(name)
        .cloned()
        .ok_or_else(|| ExError::Message("Nothing in register".into()))?;
    let cursor = ed.cursor();
    let buf = ed.curbuf_mut();
    let (anchor_pos, dir) = if at == 0 {
        (Position::new(buf.lines.first(), 0), PutDirection::Before)
    } else {
        let l = buf.lines.line_at(at.min(buf.lines.count() as u64));
        (Position::new(l, 0), PutDirection::After)
    };
    buf.start_command(cursor);
    let pos = buf.put_register(anchor_pos, dir, &content);
    let report = buf.end_command();
    ed.set_cursor(pos);
    ed.clamp_cursor();
    if let Some(delta) = report {
        ed.report_lines(delta);
    }
    Ok(())
}

/// Parse a `:move` / `:copy` destination address from the argument.
fn parse_dest(ed: &mut Editor, arg: &[u8]) -> Result<u64, ExError> {
    let trimmed: Vec<u8> = arg
        .iter()
        .copied()
        .skip_while(|&c| c == b' ' || c == b'\t')
        .collect();
    if trimmed.is_empty() {
        return Err(ExError::BadAddress);
    }
    if trimmed == b"0" {
        return Ok(0);
    }
    let mut p = super::Parser::new(&trimmed);
    let current = current_lineno(ed);
    super::parse_addr(ed, &mut p, current)?.ok_or(ExError::BadAddress)
}

pub(super) fn ex_move(ed: &mut Editor, args: &ExArgs) -> ExResult {
    let (from, to) = args.range_or_current(ed);
    let dest = parse_dest(ed, &args.arg)?;
    if dest >= from && dest <= to {
        return Err(ExError::Message("Move to a moved line".into()));
    }
    let lines = collect_lines(ed, from, to);
    let n = lines.len();
    let cursor = ed.cursor();
    let buf = ed.curbuf_mut();
    buf.start_command(cursor);
    let first = buf.lines.line_at(from);
    buf.repllines(first, n, None);
    // The destination shifts when it sat after the removed range.
    let dest = if dest > to { dest - n as u64 } else { dest };
    let anchor = if dest == 0 {
        buf.lines.first()
    } else {
        let l = buf.lines.line_at(dest.min(buf.lines.count() as u64));
        buf.lines.next(l).unwrap_or(buf.lines.lastline())
    };
    let chain = buf.lines.chain_from_texts(&lines);
    let head = chain.map(|c| c.head);
    buf.repllines(anchor, 0, chain);
    buf.end_command();
    if let Some(h) = head {
        ed.set_cursor(Position::new(h, 0));
    }
    ed.clamp_cursor();
    Ok(())
}

pub(super) fn ex_copy(ed: &mut Editor, args: &ExArgs) -> ExResult {
    let (from, to) = args.range_or_current(ed);
    let dest = parse_dest(ed, &args.arg)?;
    let lines = collect_lines(ed, from, to);
    let n = lines.len() as i64;
    let cursor = ed.cursor();
    let buf = ed.curbuf_mut();
    buf.start_command(cursor);
    let anchor = if dest == 0 {
        buf.lines.first()
    } else {
        let l = buf.lines.line_at(dest.min(buf.lines.count() as u64));
        buf.lines.next(l).unwrap_or(buf.lines.lastline())
    };
    let chain = buf.lines.chain_from_texts(&lines);
    let head = chain.map(|c| c.head);
    buf.repllines(anchor, 0, chain);
    buf.end_command();
    if let Some(h) = head {
        ed.set_cursor(Position::new(h, 0));
    }
    ed.report_lines(n);
    Ok(())
}

pub(super) fn ex_join(ed: &mut Editor, args: &ExArgs) -> ExResult {
    let (from, mut to) = args.range_or_current(ed);
    if from == to {
        to = (from + 1).min(ed.curbuf().lines.count() as u64);
    }
    if from == to {
        return Err(ExError::BadAddress);
    }
    let target = line_handle(ed, from);
    ed.set_cursor(Position::new(target, 0));
    ed.redo.begin();
    ed.pending.prenum = Some((to - from + 1) as u32);
    dispatcher::normal::process_char(ed, b'J');
    Ok(())
}

pub(super) fn ex_shift_left(ed: &mut Editor, args: &ExArgs) -> ExResult {
    let (from, to) = args.range_or_current(ed);
    let bufid = ed.curbuf_id();
    let r = range_handles(ed, (from, to));
    normal::shift_lines(ed, bufid, r.from, r.to, false);
    Ok(())
}

pub(super) fn ex_shift_right(ed: &mut Editor, args: &ExArgs) -> ExResult {
    let (from, to) = args.range_or_current(ed);
    let bufid = ed.curbuf_id();
    let r = range_handles(ed, (from, to));
    normal::shift_lines(ed, bufid, r.from, r.to, true);
    Ok(())
}

pub(super) fn ex_mark(ed: &mut Editor, args: &ExArgs) -> ExResult {
    let name = *args.arg.first().ok_or(ExError::Incomplete)?;
    let (_, at) = args.range_or_current(ed);
    let line = line_handle(ed, at);
    if !ed.curbuf_mut().marks.set(name, Position::new(line, 0)) {
        return Err(ExError::Message("Bad mark name".into()));
    }
    Ok(())
}

pub(super) fn ex_print_lineno(ed: &mut Editor, args: &ExArgs) -> ExResult {
    let (_, at) = args
        .range
        .unwrap_or((0, ed.curbuf().lines.count() as u64));
    ed.show_message(format!("line {at}"));
    Ok(())
}

pub(super) fn ex_print(ed: &mut Editor, args: &ExArgs) -> ExResult {
    let (from, to) = args.range_or_current(ed);
    let lines: Vec<String> = collect_lines(ed, from, to)
        .into_iter()
        .map(|l| String::from_utf8_lossy(&l).into_owned())
        .collect();
    dispatcher::enter_display(ed, lines);
    Ok(())
}

// ---------------------------------------------------------------------------
// Search / substitute / global
// ---------------------------------------------------------------------------

pub(super) fn ex_substitute_cmd(ed: &mut Editor, args: &ExArgs) -> ExResult {
    let range = range_handles(ed, args.range_or_current(ed));
    let cursor = ed.cursor();
    let Editor {
        buffers,
        layout,
        search: st,
        params,
        ..
    } = ed;
    let buf = &mut buffers[layout.current().buffer];
    let n = search::ex_substitute(buf, st, params, range, cursor, &args.arg).map_err(msg)?;
    after_substitute(ed, n);
    Ok(())
}

pub(super) fn ex_amp(ed: &mut Editor, args: &ExArgs) -> ExResult {
    let range = range_handles(ed, args.range_or_current(ed));
    let cursor = ed.cursor();
    let Editor {
        buffers,
        layout,
        search: st,
        params,
        ..
    } = ed;
    let buf = &mut buffers[layout.current().buffer];
    let n = search::ex_ampersand(buf, st, params, range, cursor, &args.arg).map_err(msg)?;
    after_substitute(ed, n);
    Ok(())
}

pub(super) fn ex_tilde_cmd(ed: &mut Editor, args: &ExArgs) -> ExResult {
    let range = range_handles(ed, args.range_or_current(ed));
    let cursor = ed.cursor();
    let Editor {
        buffers,
        layout,
        search: st,
        params,
        ..
    } = ed;
    let buf = &mut buffers[layout.current().buffer];
    let n = search::ex_tilde(buf, st, params, range, cursor, &args.arg).map_err(msg)?;
    after_substitute(ed, n);
    Ok(())
}

fn after_substitute(ed: &mut Editor, n: u64) {
    ed.clamp_cursor();
    let report = ed.params.num(ParamId::Report);
    if report > 0 && n >= report as u64 {
        let s = if n == 1 { "" } else { "s" };
        ed.show_message(format!("{n} substitution{s}"));
    }
}

fn run_global(ed: &mut Editor, args: &ExArgs, forward: bool) -> ExResult {
    let range = range_handles(ed, args.range_or_all(ed));
    let cursor = ed.cursor();
    let Editor {
        buffers,
        layout,
        search: st,
        params,
        ..
    } = ed;
    let buf = &mut buffers[layout.current().buffer];
    let out =
        search::ex_global(buf, st, params, range, cursor, &args.arg, forward).map_err(msg)?;
    match out {
        GlobalOutcome::Edited(n) => {
            ed.clamp_cursor();
            let report = ed.params.num(ParamId::Report);
            if report > 0 && n >= report as u64 {
                ed.show_message(format!("{n} lines"));
            }
        }
        GlobalOutcome::Print(linenos) => {
            let numbered = ed.params.is_set(ParamId::Number);
            let lines: Vec<String> = linenos
                .into_iter()
                .map(|n| {
                    let text = ed.curbuf().lines.text(line_handle(ed, n));
                    let text = String::from_utf8_lossy(text);
                    if numbered {
                        format!("{n:6}  {text}")
                    } else {
                        text.into_owned()
                    }
                })
                .collect();
            dispatcher::enter_display(ed, lines);
        }
    }
    Ok(())
}

pub(super) fn ex_global_cmd(ed: &mut Editor, args: &ExArgs) -> ExResult {
    // :g! is :v.
    run_global(ed, args, !args.exclam)
}

pub(super) fn ex_vglobal_cmd(ed: &mut Editor, args: &ExArgs) -> ExResult {
    run_global(ed, args, false)
}

// ---------------------------------------------------------------------------
// State commands
// ---------------------------------------------------------------------------

pub(super) fn ex_set(ed: &mut Editor, args: &ExArgs) -> ExResult {
    let arg = args.arg_str();
    let words: Vec<&str> = arg.split_whitespace().collect();
    if words.is_empty() {
        let listed: Vec<String> = ed
            .params
            .changed_params()
            .into_iter()
            .map(|id| ed.params.format_param(id))
            .collect();
        if listed.is_empty() {
            ed.show_message("No changed parameters");
        } else {
            ed.show_message(listed.join(" "));
        }
        return Ok(());
    }
    if words == ["all"] {
        let lines: Vec<String> = core_config::ParamId::ALL
            .iter()
            .map(|&id| ed.params.format_param(id))
            .collect();
        dispatcher::enter_display(ed, lines);
        return Ok(());
    }
    for word in words {
        match ed.params.set_from_arg(word) {
            Ok(effects) => ed.apply_param_effects(&effects),
            Err(e) => return Err(msg(e)),
        }
    }
    Ok(())
}

/// Interpret the `\e`-style escapes of `:map` arguments and split lhs
/// from rhs at the first unescaped blank.
fn map_escape(arg: &[u8]) -> (Vec<u8>, Option<Vec<u8>>) {
    let mut out = Vec::with_capacity(arg.len());
    let mut split: Option<usize> = None;
    let mut i = 0;
    while i < arg.len() {
        let c = arg[i];
        match c {
            b'\\' => {
                i += 1;
                match arg.get(i).copied() {
                    Some(b @ (b' ' | b'\t')) => {
                        out.push(b);
                        i += 1;
                    }
                    Some(d @ b'0'..=b'7') => {
                        // Up to three octal digits.
                        let mut v = u32::from(d - b'0');
                        i += 1;
                        for _ in 0..2 {
                            match arg.get(i).copied() {
                                Some(o @ b'0'..=b'7') => {
                                    v = v * 8 + u32::from(o - b'0');
                                    i += 1;
                                }
                                _ => break,
                            }
                        }
                        out.push((v & 0xff) as u8);
                    }
                    Some(b'e') | Some(b'E') => {
                        out.push(0x1b);
                        i += 1;
                    }
                    Some(b'b') => {
                        out.push(0x08);
                        i += 1;
                    }
                    Some(b'f') => {
                        out.push(0x0c);
                        i += 1;
                    }
                    Some(b'n') => {
                        out.push(b'\n');
                        i += 1;
                    }
                    Some(b'r') => {
                        out.push(b'\r');
                        i += 1;
                    }
                    Some(b't') => {
                        out.push(b'\t');
                        i += 1;
                    }
                    Some(b'v') => {
                        out.push(0x0b);
                        i += 1;
                    }
                    Some(b'\\') => {
                        out.push(b'\\');
                        i += 1;
                    }
                    _ => out.push(b'\\'),
                }
            }
            b' ' | b'\t' if split.is_none() => {
                while matches!(arg.get(i), Some(b' ') | Some(b'\t')) {
                    i += 1;
                }
                split = Some(out.len());
            }
            _ => {
                out.push(c);
                i += 1;
            }
        }
    }
    match split {
        Some(s) if s < out.len() => (out[..s].to_vec(), Some(out[s..].to_vec())),
        _ => (out, None),
    }
}

pub(super) fn ex_map(ed: &mut Editor, args: &ExArgs) -> ExResult {
    if args.arg.iter().all(|c| matches!(c, b' ' | b'\t')) {
        // Bare :map displays the list.
        let list = if args.exclam {
            &ed.keymap.ins_map
        } else {
            &ed.keymap.cmd_map
        };
        let lines: Vec<String> = list
            .entries()
            .map(|(l, r)| {
                format!(
                    "{:<18} {}",
                    String::from_utf8_lossy(l),
                    String::from_utf8_lossy(r)
                )
            })
            .collect();
        dispatcher::enter_display(ed, lines);
        return Ok(());
    }
    let (lhs, rhs) = map_escape(&args.arg);
    let rhs = rhs.ok_or_else(|| ExError::Message("Usage: :map lhs rhs".into()))?;
    if args.exclam {
        ed.keymap.ins_map.insert(&lhs, &rhs);
    } else {
        ed.keymap.cmd_map.insert(&lhs, &rhs);
    }
    debug!(target: "ex.map", exclam = args.exclam, "mapping added");
    Ok(())
}

pub(super) fn ex_unmap(ed: &mut Editor, args: &ExArgs) -> ExResult {
    if args.arg.is_empty() {
        return Err(ExError::Message("But what do you want me to unmap?".into()));
    }
    let (lhs, _) = map_escape(&args.arg);
    let list = if args.exclam {
        &mut ed.keymap.ins_map
    } else {
        &mut ed.keymap.cmd_map
    };
    if !list.remove(&lhs) {
        return Err(ExError::Message("No such mapping".into()));
    }
    Ok(())
}

pub(super) fn ex_undo(ed: &mut Editor, _args: &ExArgs) -> ExResult {
    dispatcher::normal::process_char(ed, b'u');
    Ok(())
}

pub(super) fn ex_redo(ed: &mut Editor, _args: &ExArgs) -> ExResult {
    dispatcher::normal::do_redo(ed);
    Ok(())
}

pub(super) fn ex_at(ed: &mut Editor, args: &ExArgs) -> ExResult {
    let name = *args.arg.first().ok_or(ExError::Incomplete)?;
    let content = match RegisterName::parse(name) {
        Some((n, _)) => ed
            .registers
            .get(n)
            .cloned()
            .ok_or_else(|| ExError::Message("Nothing in register".into()))?,
        None => return Err(ExError::Message("Bad register".into())),
    };
    let text = content.as_input();
    for line in text.split(|&c| c == b'\n') {
        if !line.is_empty() {
            super::execute(ed, line);
        }
    }
    Ok(())
}

pub(super) fn ex_stop(ed: &mut Editor, _args: &ExArgs) -> ExResult {
    ed.suspend_pending = true;
    Ok(())
}

pub(super) fn ex_version(ed: &mut Editor, _args: &ExArgs) -> ExResult {
    ed.show_message(format!("vix {}", env!("CARGO_PKG_VERSION")));
    Ok(())
}

pub(super) fn ex_help(ed: &mut Editor, _args: &ExArgs) -> ExResult {
    let lines = vec![
        "vix - a multi-window vi".to_string(),
        String::new(),
        "Move:    h j k l w b e 0 $ ^ | G H M L f t ; , ( ) { } % 'x".to_string(),
        "Edit:    i a o x dd yy p u . J r R ~ < > !".to_string(),
        "Search:  /pattern ?pattern n N".to_string(),
        "Ex:      :w :q :e file :s/lhs/rhs/ :g/pat/cmd :set param".to_string(),
        "Windows: :split :close ^W".to_string(),
    ];
    dispatcher::enter_display(ed, lines);
    Ok(())
}

pub(super) fn ex_shell(ed: &mut Editor, args: &ExArgs) -> ExResult {
    let cmd = args.arg_str();
    if cmd.is_empty() {
        return Err(ExError::Incomplete);
    }
    let shell = ed.params.string(ParamId::Shell).to_string();
    ed.registers.record_shell_line(cmd.as_bytes());
    match args.range {
        Some((from, to)) => {
            // Filter the range through the command.
            let input = collect_lines(ed, from, to);
            let (out, status) =
                pipe::run_filter(&shell, &cmd, Some(&input), true).map_err(msg)?;
            let new_lines = out.unwrap_or_default();
            let cursor = ed.cursor();
            let buf = ed.curbuf_mut();
            buf.start_command(cursor);
            let first = buf.lines.line_at(from);
            let chain = buf.lines.chain_from_texts(&new_lines);
            let head = chain.map(|c| c.head);
            buf.repllines(first, input.len(), chain);
            let report = buf.end_command();
            if let Some(h) = head {
                ed.set_cursor(Position::new(h, 0));
            }
            ed.clamp_cursor();
            if let Some(delta) = report {
                ed.report_lines(delta);
            }
            if status != 0 {
                ed.show_message(format!("Command exited with {status}"));
            }
            Ok(())
        }
        None => {
            let (out, status) = pipe::run_filter(&shell, &cmd, None, true).map_err(msg)?;
            let mut lines: Vec<String> = out
                .unwrap_or_default()
                .into_iter()
                .map(|l| String::from_utf8_lossy(&l).into_owned())
                .collect();
            if status != 0 {
                lines.push(format!("[exit {status}]"));
            }
            dispatcher::enter_display(ed, lines);
            Ok(())
        }
    }
}

// ---------------------------------------------------------------------------
// Tags
// ---------------------------------------------------------------------------

pub(super) fn ex_tag(ed: &mut Editor, args: &ExArgs) -> ExResult {
    let arg = args.arg_str();
    if arg.is_empty() {
        return Err(ExError::Message("Usage: :tag <identifier>".into()));
    }
    tag_to(ed, arg.as_bytes(), args.exclam);
    Ok(())
}

/// Jump to a tag: switch files if needed, then apply the locator.
pub fn tag_to(ed: &mut Editor, ident: &[u8], force: bool) {
    let entry = match ed.tags.find(&ed.params, ident) {
        Some(e) => e,
        None => {
            let m = if ed.tags.is_loaded() {
                "Tag not found"
            } else {
                "No tags file"
            };
            ed.show_error(m);
            return;
        }
    };
    if ed.curbuf().filename.as_deref() != Some(entry.file.as_str()) {
        let file = entry.file.clone();
        edit_file(ed, Some(&file), force);
        if ed.curbuf().filename.as_deref() != Some(file.as_str()) {
            return; // edit refused (unsaved changes)
        }
    }
    match entry.locator_kind() {
        Some(crate::tags::TagLocator::LineNumber(n)) => {
            ed.set_pcmark();
            let line = line_handle(ed, n.max(1));
            ed.set_cursor(Position::new(line, 0));
            ed.clamp_cursor();
        }
        Some(crate::tags::TagLocator::Pattern(pat)) => {
            // Tag patterns use the tags dialect, with wrapscan forced.
            let (mapped, _) = search::map_pattern(pat, 0, search::Dialect::Tags, None);
            let start = Position::new(ed.curbuf().lines.first(), 0);
            let Editor {
                buffers,
                layout,
                search: st,
                ..
            } = ed;
            let buf = &buffers[layout.current().buffer];
            let hit = st.find_pattern(buf, &mapped, core_text::motion::Direction::Forward, start, true);
            match hit {
                Some(pos) => {
                    ed.set_pcmark();
                    ed.set_cursor(pos);
                    ed.clamp_cursor();
                }
                None => ed.beep(),
            }
        }
        None => ed.show_error(format!(
            "Ill-formed tag pattern \"{}\"",
            String::from_utf8_lossy(&entry.locator)
        )),
    }
}
