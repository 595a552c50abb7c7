//! The ex command language: `[range] command [!] [args]`.
//!
//! The range grammar accepts `%`, absolute line numbers, `.`, `$`,
//! `'mark`, `/pattern/` and `?pattern?` addresses, each with trailing
//! signed offsets; `;` rebinds the current line between the two
//! addresses. The command table is sorted by name; an abbreviated name
//! resolves by unambiguous prefix, with per-command priority breaking
//! ties the way users expect (`:s` is substitute, not set).

use bitflags::bitflags;
use core_text::motion::Direction;
use core_text::{LineId, Position};
use thiserror::Error;
use tracing::debug;

use crate::Editor;
use crate::search::{self, Dialect};

mod cmds;

pub use cmds::{edit_file, tag_to, write_and_quit};

#[derive(Debug, Error)]
pub enum ExError {
    #[error("Not an editor command: {0}")]
    Unknown(String),
    #[error("Ambiguous command: {0}")]
    Ambiguous(String),
    #[error("Invalid address")]
    BadAddress,
    #[error("Mark not set")]
    MarkNotSet,
    #[error("No previous regular expression")]
    NoPattern,
    #[error("Pattern not found")]
    NotFound,
    #[error("Command does not take a range")]
    NoRangeAllowed,
    #[error("Incomplete command")]
    Incomplete,
    #[error("No write since last change (:{0}! overrides)")]
    NotSaved(&'static str),
    #[error("{0}")]
    Message(String),
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CmdFlags: u8 {
        /// `!` variant exists.
        const EXCLAM = 1 << 0;
        /// Arguments get filename (tilde) expansion.
        const FILEXP = 1 << 1;
        /// `%` / `#` interpolate to current / alternate filename.
        const INTEXP = 1 << 2;
        /// Address 0 is legal (`:read`, `:put`, `:move`).
        const RANGE0 = 1 << 3;
        /// Takes a range at all.
        const RANGED = 1 << 4;
    }
}

/// Rough shape of the argument text, used for validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgShape {
    None,
    /// Whitespace-separated words.
    Strings,
    /// Exactly zero or one word.
    OneString,
    /// A filename or `!command`.
    FileCmd,
    /// A line address.
    Line,
    /// Everything to the end of the line, verbatim.
    Rest,
    /// Starts with a non-alphanumeric (substitute and friends).
    NonAlnum,
    /// A single lowercase letter (`:k`, `:mark`).
    OneLower,
}

/// Parsed pieces handed to a command handler.
pub struct ExArgs {
    /// Resolved range, when one was given.
    pub range: Option<(u64, u64)>,
    pub exclam: bool,
    pub arg: Vec<u8>,
}

impl ExArgs {
    /// The range, defaulting to the current line.
    pub fn range_or_current(&self, ed: &Editor) -> (u64, u64) {
        self.range.unwrap_or_else(|| {
            let n = current_lineno(ed);
            (n, n)
        })
    }

    /// The range, defaulting to the whole buffer.
    pub fn range_or_all(&self, ed: &Editor) -> (u64, u64) {
        self.range
            .unwrap_or_else(|| (1, ed.curbuf().lines.count() as u64))
    }

    pub fn arg_str(&self) -> String {
        String::from_utf8_lossy(&self.arg).into_owned()
    }
}

type Handler = fn(&mut Editor, &ExArgs) -> Result<(), ExError>;

struct ExCommand {
    full: &'static str,
    short: &'static str,
    priority: u8,
    flags: CmdFlags,
    shape: ArgShape,
    handler: Handler,
}

macro_rules! cmd {
    ($full:literal, $short:literal, $prio:literal, $flags:expr, $shape:ident, $handler:path) => {
        ExCommand {
            full: $full,
            short: $short,
            priority: $prio,
            flags: $flags,
            shape: ArgShape::$shape,
            handler: $handler,
        }
    };
}

const F_NONE: CmdFlags = CmdFlags::empty();
const F_X: CmdFlags = CmdFlags::EXCLAM;
const F_FILE: CmdFlags = CmdFlags::EXCLAM
    .union(CmdFlags::FILEXP)
    .union(CmdFlags::INTEXP);
const F_RANGE: CmdFlags = CmdFlags::RANGED;
const F_RANGE_X: CmdFlags = CmdFlags::RANGED.union(CmdFlags::EXCLAM);
const F_RANGE0: CmdFlags = CmdFlags::RANGED.union(CmdFlags::RANGE0);
const F_WRITE: CmdFlags = CmdFlags::EXCLAM
    .union(CmdFlags::FILEXP)
    .union(CmdFlags::INTEXP)
    .union(CmdFlags::RANGED);

/// The command table, sorted by full name. Priorities give the classic
/// single-letter meanings.
static COMMANDS: &[ExCommand] = &[
    cmd!("!", "!", 0, F_RANGE, Rest, cmds::ex_shell),
    cmd!("&", "&", 0, F_RANGE, Rest, cmds::ex_amp),
    cmd!("<", "<", 0, F_RANGE, Rest, cmds::ex_shift_left),
    cmd!("=", "=", 0, F_RANGE, None, cmds::ex_print_lineno),
    cmd!(">", ">", 0, F_RANGE, Rest, cmds::ex_shift_right),
    cmd!("@", "@", 0, F_NONE, OneLower, cmds::ex_at),
    cmd!("args", "ar", 0, F_NONE, None, cmds::ex_args),
    cmd!("cd", "cd", 0, F_FILE, OneString, cmds::ex_cd),
    cmd!("chdir", "chd", 0, F_FILE, OneString, cmds::ex_cd),
    cmd!("close", "clo", 0, F_X, None, cmds::ex_close),
    cmd!("copy", "co", 1, F_RANGE, Line, cmds::ex_copy),
    cmd!("delete", "d", 1, F_RANGE, Rest, cmds::ex_delete),
    cmd!("edit", "e", 1, F_FILE, FileCmd, cmds::ex_edit),
    cmd!("global", "g", 1, F_RANGE_X, NonAlnum, cmds::ex_global_cmd),
    cmd!("help", "h", 0, F_NONE, None, cmds::ex_help),
    cmd!("join", "j", 1, F_RANGE, None, cmds::ex_join),
    cmd!("k", "k", 0, F_RANGE, OneLower, cmds::ex_mark),
    cmd!("map", "map", 1, F_X, Rest, cmds::ex_map),
    cmd!("mark", "ma", 0, F_RANGE, OneLower, cmds::ex_mark),
    cmd!("move", "m", 1, F_RANGE0, Line, cmds::ex_move),
    cmd!("next", "n", 1, F_X, None, cmds::ex_next),
    cmd!("preserve", "pre", 0, F_NONE, None, cmds::ex_preserve),
    cmd!("print", "p", 1, F_RANGE, None, cmds::ex_print),
    cmd!("put", "pu", 0, F_RANGE0, OneString, cmds::ex_put),
    cmd!("quit", "q", 1, F_X, None, cmds::ex_quit),
    cmd!("read", "r", 1, CmdFlags::RANGE0.union(F_WRITE), FileCmd, cmds::ex_read),
    cmd!("redo", "red", 0, F_NONE, None, cmds::ex_redo),
    cmd!("rewind", "rew", 0, F_X, None, cmds::ex_rewind),
    cmd!("set", "se", 0, F_NONE, Strings, cmds::ex_set),
    cmd!("source", "so", 0, F_FILE, OneString, cmds::ex_source),
    cmd!("split", "sp", 0, F_NONE, FileCmd, cmds::ex_split),
    cmd!("stop", "st", 0, F_NONE, None, cmds::ex_stop),
    cmd!("substitute", "s", 2, F_RANGE, NonAlnum, cmds::ex_substitute_cmd),
    cmd!("suspend", "sus", 0, F_NONE, None, cmds::ex_stop),
    cmd!("t", "t", 0, F_RANGE0, Line, cmds::ex_copy),
    cmd!("tag", "ta", 1, F_X, OneString, cmds::ex_tag),
    cmd!("unmap", "unm", 0, F_X, Rest, cmds::ex_unmap),
    cmd!("undo", "u", 1, F_NONE, None, cmds::ex_undo),
    cmd!("v", "v", 1, F_RANGE, NonAlnum, cmds::ex_vglobal_cmd),
    cmd!("version", "ve", 0, F_NONE, None, cmds::ex_version),
    cmd!("wn", "wn", 0, F_WRITE, FileCmd, cmds::ex_write_next),
    cmd!("wq", "wq", 0, F_WRITE, FileCmd, cmds::ex_write_quit),
    cmd!("write", "w", 1, F_WRITE, FileCmd, cmds::ex_write),
    cmd!("xit", "x", 1, F_WRITE, FileCmd, cmds::ex_xit),
    cmd!("yank", "y", 1, F_RANGE, OneString, cmds::ex_yank),
    cmd!("~", "~", 0, F_RANGE, Rest, cmds::ex_tilde_cmd),
];

pub fn current_lineno(ed: &Editor) -> u64 {
    ed.curbuf().lines.lineno(ed.cursor().line)
}

/// Resolve a line number to its line handle (clamped into the buffer).
pub fn line_handle(ed: &Editor, lineno: u64) -> LineId {
    let set = &ed.curbuf().lines;
    set.line_at(lineno.clamp(1, set.count() as u64))
}

/// Execute one ex command line.
pub fn execute(ed: &mut Editor, line: &[u8]) {
    ed.registers.record_ex_line(line);
    if let Err(e) = execute_inner(ed, line) {
        ed.show_error(e.to_string());
    }
}

fn execute_inner(ed: &mut Editor, line: &[u8]) -> Result<(), ExError> {
    let mut p = Parser::new(line);
    p.skip_space();
    // Leading ':'s are harmless (sourced files, typed habits).
    while p.peek() == Some(b':') {
        p.bump();
    }
    p.skip_space();
    let range = parse_range(ed, &mut p)?;
    p.skip_space();

    let name = p.take_command_name();
    if name.is_empty() {
        // A bare address moves the cursor.
        if let Some((_, to)) = range {
            if to == 0 {
                return Err(ExError::BadAddress);
            }
            let target = line_handle(ed, to);
            ed.set_pcmark();
            ed.set_cursor(Position::new(target, 0));
            ed.clamp_cursor();
        }
        return Ok(());
    }
    let cmd = lookup(&name)?;
    debug!(target: "ex.dispatch", cmd = cmd.full, "dispatch");

    let exclam = if p.peek() == Some(b'!') && cmd.flags.contains(CmdFlags::EXCLAM) {
        p.bump();
        true
    } else {
        false
    };
    if range.is_some() && !cmd.flags.contains(CmdFlags::RANGED) {
        return Err(ExError::NoRangeAllowed);
    }
    if let Some((from, _)) = range
        && from == 0
        && !cmd.flags.contains(CmdFlags::RANGE0)
    {
        return Err(ExError::BadAddress);
    }

    // Argument text. NonAlnum commands keep their text verbatim from
    // the first delimiter; others lose leading blanks.
    let mut arg: Vec<u8> = if cmd.shape == ArgShape::NonAlnum {
        p.rest().to_vec()
    } else {
        p.skip_space();
        p.rest().to_vec()
    };
    if cmd.flags.contains(CmdFlags::INTEXP) {
        arg = interpolate_filenames(ed, &arg)?;
    }
    if cmd.flags.contains(CmdFlags::FILEXP) {
        arg = expand_tilde(&arg);
    }
    validate_shape(cmd.shape, &arg)?;

    let args = ExArgs {
        range,
        exclam,
        arg,
    };
    (cmd.handler)(ed, &args)
}

fn validate_shape(shape: ArgShape, arg: &[u8]) -> Result<(), ExError> {
    match shape {
        ArgShape::None if !arg.is_empty() => {
            Err(ExError::Message("Trailing characters".into()))
        }
        ArgShape::OneString if arg.split(|&c| c == b' ').filter(|w| !w.is_empty()).count() > 1 => {
            Err(ExError::Message("Too many arguments".into()))
        }
        ArgShape::OneLower
            if !(arg.len() == 1 && arg[0].is_ascii_lowercase()) && !arg.is_empty() =>
        {
            Err(ExError::Message("Bad mark name".into()))
        }
        _ => Ok(()),
    }
}

/// Resolve a (possibly abbreviated) command name.
fn lookup(name: &str) -> Result<&'static ExCommand, ExError> {
    let mut best: Option<&ExCommand> = None;
    let mut tied = false;
    for cmd in COMMANDS {
        if cmd.full == name || cmd.short == name {
            return Ok(cmd);
        }
        if cmd.full.starts_with(name) {
            match best {
                None => best = Some(cmd),
                Some(b) => {
                    if cmd.priority > b.priority {
                        best = Some(cmd);
                        tied = false;
                    } else if cmd.priority == b.priority {
                        tied = true;
                    }
                }
            }
        }
    }
    match best {
        Some(cmd) if !tied => Ok(cmd),
        Some(_) => Err(ExError::Ambiguous(name.into())),
        None => Err(ExError::Unknown(name.into())),
    }
}

/// `%` expands to the buffer's filename, `#` to the alternate file;
/// a backslash suppresses either.
fn interpolate_filenames(ed: &Editor, arg: &[u8]) -> Result<Vec<u8>, ExError> {
    let mut out = Vec::with_capacity(arg.len());
    let mut i = 0;
    while i < arg.len() {
        match arg[i] {
            b'\\' if matches!(arg.get(i + 1), Some(b'%') | Some(b'#')) => {
                out.push(arg[i + 1]);
                i += 2;
            }
            b'%' => {
                let name = ed
                    .curbuf()
                    .filename
                    .as_deref()
                    .ok_or_else(|| ExError::Message("No filename".into()))?;
                out.extend_from_slice(name.as_bytes());
                i += 1;
            }
            b'#' => {
                let name = ed
                    .alt_file
                    .as_deref()
                    .ok_or_else(|| ExError::Message("No alternate file".into()))?;
                out.extend_from_slice(name.as_bytes());
                i += 1;
            }
            c => {
                out.push(c);
                i += 1;
            }
        }
    }
    Ok(out)
}

fn expand_tilde(arg: &[u8]) -> Vec<u8> {
    if arg.first() == Some(&b'~')
        && (arg.len() == 1 || arg.get(1) == Some(&b'/'))
        && let Ok(home) = std::env::var("HOME")
    {
        let mut out = home.into_bytes();
        out.extend_from_slice(&arg[1..]);
        return out;
    }
    arg.to_vec()
}

// ---------------------------------------------------------------------------
// Range parsing
// ---------------------------------------------------------------------------

pub(crate) struct Parser<'a> {
    bytes: &'a [u8],
    at: usize,
}

impl<'a> Parser<'a> {
    pub(crate) fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, at: 0 }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.at).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let c = self.peek();
        if c.is_some() {
            self.at += 1;
        }
        c
    }

    fn skip_space(&mut self) {
        while matches!(self.peek(), Some(b' ') | Some(b'\t')) {
            self.at += 1;
        }
    }

    fn rest(&self) -> &'a [u8] {
        &self.bytes[self.at..]
    }

    fn take_number(&mut self) -> Option<u64> {
        let start = self.at;
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.at += 1;
        }
        if self.at == start {
            return None;
        }
        std::str::from_utf8(&self.bytes[start..self.at])
            .ok()?
            .parse()
            .ok()
    }

    /// Command names are alphabetic runs, or a single punctuation
    /// command character.
    fn take_command_name(&mut self) -> String {
        match self.peek() {
            Some(c) if c.is_ascii_alphabetic() => {
                let start = self.at;
                while self.peek().is_some_and(|c| c.is_ascii_alphabetic()) {
                    self.at += 1;
                }
                String::from_utf8_lossy(&self.bytes[start..self.at]).into_owned()
            }
            Some(c @ (b'!' | b'<' | b'>' | b'=' | b'&' | b'~' | b'@')) => {
                self.at += 1;
                (c as char).to_string()
            }
            _ => String::new(),
        }
    }
}

/// Parse `%`, one address, or `addr,addr` / `addr;addr`.
fn parse_range(ed: &mut Editor, p: &mut Parser<'_>) -> Result<Option<(u64, u64)>, ExError> {
    if p.peek() == Some(b'%') {
        p.bump();
        let last = ed.curbuf().lines.count() as u64;
        return Ok(Some((1, last)));
    }
    let current = current_lineno(ed);
    let first = parse_addr(ed, p, current)?;
    let Some(first) = first else {
        return Ok(None);
    };
    p.skip_space();
    match p.peek() {
        Some(b',') => {
            p.bump();
            p.skip_space();
            let second = parse_addr(ed, p, current)?.ok_or(ExError::BadAddress)?;
            Ok(Some(order_range(first, second)))
        }
        Some(b';') => {
            p.bump();
            p.skip_space();
            // The current line becomes the first address while the
            // second is parsed.
            let target = line_handle(ed, first.max(1));
            ed.set_cursor(Position::new(target, 0));
            let second = parse_addr(ed, p, first)?.ok_or(ExError::BadAddress)?;
            Ok(Some(order_range(first, second)))
        }
        _ => Ok(Some((first, first))),
    }
}

fn order_range(a: u64, b: u64) -> (u64, u64) {
    if a <= b { (a, b) } else { (b, a) }
}

/// One address with its trailing signed offsets; `Ok(None)` when no
/// address is present at all.
pub(crate) fn parse_addr(
    ed: &mut Editor,
    p: &mut Parser<'_>,
    current: u64,
) -> Result<Option<u64>, ExError> {
    let base: Option<u64> = match p.peek() {
        Some(b'.') => {
            p.bump();
            Some(current)
        }
        Some(b'$') => {
            p.bump();
            Some(ed.curbuf().lines.count() as u64)
        }
        Some(c) if c.is_ascii_digit() => Some(p.take_number().ok_or(ExError::BadAddress)?),
        Some(b'\'') => {
            p.bump();
            let name = p.bump().ok_or(ExError::BadAddress)?;
            let pos = ed.curbuf().marks.get(name).ok_or(ExError::MarkNotSet)?;
            Some(ed.curbuf().lines.lineno(pos.line))
        }
        Some(d @ (b'/' | b'?')) => {
            p.bump();
            let dialect = Dialect::from_params(&ed.params);
            let pat = p.rest();
            let used = ed
                .search
                .compile(
                    pat,
                    d,
                    dialect,
                    ed.params.is_set(core_config::ParamId::Ignorecase),
                )
                .map_err(|_| ExError::NoPattern)?;
            p.at += used;
            let dir = if d == b'/' {
                Direction::Forward
            } else {
                Direction::Backward
            };
            let prog = ed.search.prog().ok_or(ExError::NoPattern)?;
            let start = line_handle(ed, current);
            let wrapscan = ed.params.is_set(core_config::ParamId::Wrapscan);
            let hit = search::line_search(ed.curbuf(), &prog, start, dir, wrapscan)
                .ok_or(ExError::NotFound)?;
            ed.search.last_dir = dir;
            Some(ed.curbuf().lines.lineno(hit))
        }
        _ => None,
    };

    // Signed offsets may follow an address, or stand alone (".+2",
    // "+", "-3").
    let mut value = base;
    loop {
        match p.peek() {
            Some(sign @ (b'+' | b'-')) => {
                p.bump();
                let n = p.take_number().unwrap_or(1);
                let v = value.unwrap_or(current);
                value = Some(if sign == b'+' {
                    v.saturating_add(n)
                } else {
                    v.saturating_sub(n)
                });
            }
            _ => break,
        }
    }
    if let Some(v) = value {
        let last = ed.curbuf().lines.count() as u64;
        if v > last {
            return Err(ExError::BadAddress);
        }
    }
    Ok(value)
}
