//! Regex search, substitution and the global command.
//!
//! The matcher itself is the `regex` crate (bytes API); this layer owns
//! everything around it: translating the three user dialects (`tags`,
//! `grep`, `egrep`) into one syntax before compiling, remembering the
//! last compiled pattern / last substitution lhs / last replacement rhs,
//! and the substitution template language (`&`, `\1`..`\9`, `\#`, the
//! case-folding toggles and `~`).
//!
//! Compiled programs are handed out as `Rc` handles: `:g/pat/s/other/`
//! keeps the global pattern alive while the inner substitute compiles and
//! retains a different one.

use std::rc::Rc;

use core_config::{ParamId, Params, REGEXTYPE_CHOICES};
use core_state::Buffer;
use core_text::motion::Direction;
use core_text::{Flexbuf, LineId, Position};
use regex::bytes::Regex;
use thiserror::Error;
use tracing::{debug, trace};

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("No previous regular expression")]
    NoPrevious,
    #[error("Usage: :s/search pattern/replacement/")]
    BadSubstitute,
    #[error("Usage: :g/search pattern/command")]
    BadGlobal,
    #[error("Invalid command character")]
    BadGlobalCommand,
    #[error("No substitute to repeat!")]
    NoSubstitute,
    #[error("{0}")]
    BadPattern(String),
    #[error("No match")]
    NoMatch,
}

/// Regex dialect selected by the `regextype` parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// Only `^` and `$` are magic (vi "nomagic").
    Tags,
    /// vi/grep magic: `.` `*` `[]` plus `\(` `\)`.
    Grep,
    /// Full egrep syntax.
    Egrep,
}

impl Dialect {
    pub fn from_params(params: &Params) -> Self {
        match REGEXTYPE_CHOICES[params.enum_ix(ParamId::Regextype)] {
            "tags" => Dialect::Tags,
            "egrep" => Dialect::Egrep,
            _ => Dialect::Grep,
        }
    }
}

/// A compiled program plus the source it was compiled from.
#[derive(Debug)]
pub struct Prog {
    pub re: Regex,
}

/// Search-engine state carried by the editor context.
#[derive(Debug, Default)]
pub struct SearchState {
    /// Most recently compiled pattern (`/`, `?`, `n`, `N`, `:g`, `:s`).
    last_prog: Option<Rc<Prog>>,
    /// lhs of the last substitution (`:&` repeats it).
    last_lhs: Option<Rc<Prog>>,
    /// rhs of the last substitution (`~` expands to it).
    last_rhs: Option<Vec<u8>>,
    /// Direction of the last buffer search, for `n`/`N`.
    pub last_dir: Direction,
    /// One-shot cache for `find_pattern`.
    cached: Option<(Vec<u8>, Rc<Prog>)>,
}

/// Translate a user pattern to `regex` crate syntax, reading up to an
/// unescaped `delim` (or the end). Returns the translated pattern and
/// the number of input bytes consumed (delimiter not included).
pub fn map_pattern(
    src: &[u8],
    delim: u8,
    dialect: Dialect,
    last_rhs: Option<&[u8]>,
) -> (Vec<u8>, usize) {
    #[derive(PartialEq)]
    enum St {
        Normal,
        StartCcl,
        NegCcl,
        Ccl,
        Escape,
    }
    let mut out = Vec::with_capacity(src.len() + 8);
    let mut st = St::Normal;
    let mut i = 0;
    while i < src.len() {
        let c = src[i];
        if c == delim && st == St::Normal {
            break;
        }
        match st {
            St::Normal => match c {
                b'\\' => st = St::Escape,
                b'~' => {
                    // The last replacement text, expanded in place when
                    // the dialect makes bare ~ magic.
                    if dialect != Dialect::Tags {
                        out.extend_from_slice(last_rhs.unwrap_or(b""));
                    } else {
                        out.push(b'~');
                    }
                }
                b'^' => {
                    let prev = out.last().copied();
                    let anchored = match prev {
                        None => true,
                        Some(b'|') | Some(b'(') if dialect == Dialect::Egrep => {
                            out.len() < 2 || out[out.len() - 2] != b'\\'
                        }
                        _ => false,
                    };
                    if !anchored {
                        out.push(b'\\');
                    }
                    out.push(b'^');
                }
                b'$' => {
                    let next = src.get(i + 1).copied();
                    let anchored = match next {
                        None => true,
                        Some(c) if c == delim => true,
                        Some(b'|') | Some(b')') if dialect == Dialect::Egrep => true,
                        _ => false,
                    };
                    if !anchored {
                        out.push(b'\\');
                    }
                    out.push(b'$');
                }
                b'(' | b')' | b'+' | b'?' | b'|' => {
                    if dialect != Dialect::Egrep {
                        out.push(b'\\');
                    }
                    out.push(c);
                }
                b'{' | b'}' => {
                    // Interval syntax is never exposed.
                    out.push(b'\\');
                    out.push(c);
                }
                b'*' | b'.' | b'[' => {
                    if dialect == Dialect::Tags {
                        out.push(b'\\');
                        out.push(c);
                    } else if c == b'[' {
                        st = St::StartCcl;
                        out.push(c);
                    } else {
                        out.push(c);
                    }
                }
                _ => out.push(c),
            },
            St::StartCcl | St::NegCcl => {
                out.push(c);
                st = if c == b'^' && st == St::StartCcl {
                    St::NegCcl
                } else {
                    St::Ccl
                };
            }
            St::Ccl => {
                out.push(c);
                if c == b']' {
                    st = St::Normal;
                }
            }
            St::Escape => {
                match c {
                    b'(' | b')' | b'+' | b'?' | b'|' => {
                        // Escaped operators in the grep dialect; escaped
                        // literals everywhere else.
                        if dialect != Dialect::Grep {
                            out.push(b'\\');
                        }
                        out.push(c);
                    }
                    b'<' | b'>' => {
                        // Word-boundary assertions.
                        out.push(b'\\');
                        out.push(b'b');
                    }
                    b'~' if dialect == Dialect::Tags => {
                        out.extend_from_slice(last_rhs.unwrap_or(b""));
                    }
                    b'w' | b'W' | b'd' | b'D' | b's' | b'S' | b'b' | b'B' => {
                        // Character-class escapes pass through.
                        out.push(b'\\');
                        out.push(c);
                    }
                    b'.' | b'\\' | b'[' | b']' | b'*' | b'^' | b'$' | b'~' | b'{' | b'}' => {
                        out.push(b'\\');
                        out.push(c);
                    }
                    _ if c != delim => {
                        if c.is_ascii_alphanumeric() {
                            // Unknown \x escapes fall back to the bare
                            // character (the matcher rejects them).
                            out.push(c);
                        } else {
                            out.push(b'\\');
                            out.push(c);
                        }
                    }
                    _ => out.push(c),
                }
                st = St::Normal;
            }
        }
        i += 1;
    }
    if st == St::Escape {
        out.extend_from_slice(b"\\\\");
    }
    (out, i)
}

impl SearchState {
    /// Compile `pat` (raw user syntax) up to `delim`, retaining it as
    /// the last pattern. An empty pattern reuses the previous one.
    /// Returns bytes consumed including the closing delimiter if present.
    pub fn compile(
        &mut self,
        pat: &[u8],
        delim: u8,
        dialect: Dialect,
        ignorecase: bool,
    ) -> Result<usize, SearchError> {
        if pat.first() == Some(&delim) {
            return match self.last_prog {
                Some(_) => Ok(1),
                None => Err(SearchError::NoPrevious),
            };
        }
        if pat.is_empty() {
            return match self.last_prog {
                Some(_) => Ok(0),
                None => Err(SearchError::NoPrevious),
            };
        }
        let (mapped, used) = map_pattern(pat, delim, dialect, self.last_rhs.as_deref());
        let prog = compile_mapped(&mapped, ignorecase)?;
        self.last_prog = Some(prog);
        debug!(target: "search.engine", used, "pattern compiled");
        // Count the closing delimiter when present.
        Ok(if pat.get(used) == Some(&delim) {
            used + 1
        } else {
            used
        })
    }

    pub fn prog(&self) -> Option<Rc<Prog>> {
        self.last_prog.clone()
    }

    pub fn set_prog(&mut self, p: Rc<Prog>) {
        self.last_prog = Some(p);
    }

    pub fn has_pattern(&self) -> bool {
        self.last_prog.is_some()
    }

    pub fn last_rhs(&self) -> Option<&[u8]> {
        self.last_rhs.as_deref()
    }
}

fn compile_mapped(mapped: &[u8], ignorecase: bool) -> Result<Rc<Prog>, SearchError> {
    let mut src = String::new();
    if ignorecase {
        src.push_str("(?i)");
    }
    // Raw bytes outside ASCII match themselves.
    src.push_str("(?s-u)");
    src.push_str(&String::from_utf8_lossy(mapped));
    let re = Regex::new(&src).map_err(|e| SearchError::BadPattern(e.to_string()))?;
    Ok(Rc::new(Prog { re }))
}

/// Find a match at or after `ind` on `line`. The returned index is
/// clamped onto the last character for matches past the text (so `$`
/// lands on the final byte, as a cursor must).
fn match_on_line(prog: &Prog, text: &[u8], ind: usize) -> Option<usize> {
    if ind > text.len() {
        return None;
    }
    let m = prog.re.find_at(text, ind)?;
    let mut at = m.start();
    if at >= text.len() {
        at = text.len().saturating_sub(1);
    }
    Some(at)
}

/// Last match on `line` strictly before `maxindex`.
fn rmatch_on_line(prog: &Prog, text: &[u8], from: usize, maxindex: usize) -> Option<usize> {
    let mut last = None;
    let mut ind = from;
    while let Some(at) = match_on_line(prog, text, ind) {
        if at >= maxindex {
            break;
        }
        last = Some(at);
        if at + 1 >= text.len() {
            break;
        }
        ind = at + 1;
    }
    last
}

/// Direction-aware buffer search from (startline, startindex), honouring
/// `wrapscan`. Searches with the current "last pattern".
pub fn search_buffer(
    buf: &Buffer,
    prog: &Prog,
    start: Position,
    dir: Direction,
    wrapscan: bool,
) -> Option<Position> {
    match dir {
        Direction::Forward => fwd_search(buf, prog, start, wrapscan),
        Direction::Backward => bck_search(buf, prog, start, wrapscan),
    }
}

fn fwd_search(buf: &Buffer, prog: &Prog, start: Position, wrapscan: bool) -> Option<Position> {
    let set = &buf.lines;
    // Rest of the start line, after the cursor.
    if !set.is_empty(start.line)
        && let Some(at) = match_on_line(prog, set.text(start.line), start.index + 1)
    {
        return Some(Position::new(start.line, at));
    }
    // Lines after, wrapping to the top when allowed.
    let mut lp = set.next(start.line);
    loop {
        let cur = match lp {
            Some(l) if !set.is_lastline(l) => l,
            Some(_) if wrapscan => {
                lp = Some(set.first());
                continue;
            }
            _ => return None,
        };
        if cur == start.line {
            break;
        }
        if core_events::signals::interrupted() {
            return None;
        }
        if let Some(at) = match_on_line(prog, set.text(cur), 0) {
            return Some(Position::new(cur, at));
        }
        lp = set.next(cur);
    }
    // Wrapped all the way: the start line up to the cursor.
    match match_on_line(prog, set.text(start.line), 0) {
        Some(at) if at <= start.index => Some(Position::new(start.line, at)),
        _ => None,
    }
}

fn bck_search(buf: &Buffer, prog: &Prog, start: Position, wrapscan: bool) -> Option<Position> {
    let set = &buf.lines;
    if let Some(at) = rmatch_on_line(prog, set.text(start.line), 0, start.index) {
        return Some(Position::new(start.line, at));
    }
    let mut lp = set.prev(start.line);
    loop {
        let cur = match lp {
            Some(l) if !set.is_line0(l) => l,
            Some(_) if wrapscan => {
                lp = Some(set.last());
                continue;
            }
            _ => return None,
        };
        if cur == start.line {
            break;
        }
        if core_events::signals::interrupted() {
            return None;
        }
        let text = set.text(cur);
        if let Some(at) = rmatch_on_line(prog, text, 0, usize::MAX) {
            return Some(Position::new(cur, at));
        }
        lp = set.prev(cur);
    }
    let text = set.text(start.line);
    rmatch_on_line(prog, text, start.index, usize::MAX).map(|at| Position::new(start.line, at))
}

/// Line-granular search used by `/pat/` range addresses: first line at
/// or after/before `start` (exclusive) with a match.
pub fn line_search(
    buf: &Buffer,
    prog: &Prog,
    start: LineId,
    dir: Direction,
    wrapscan: bool,
) -> Option<LineId> {
    let set = &buf.lines;
    let mut pos = Position::new(start, 0);
    if dir == Direction::Forward {
        // Start past the end of the current line so a match at the very
        // start of the next line is still seen.
        pos.index = set.len(start);
        if pos.index > 0 {
            pos.index -= 1;
        }
    }
    search_buffer(buf, prog, pos, dir, wrapscan).map(|p| p.line)
}

impl SearchState {
    /// One-shot search that does not become the "last pattern" (used by
    /// tag locators and internal lookups). Caches the last string it
    /// compiled.
    pub fn find_pattern(
        &mut self,
        buf: &Buffer,
        pat: &[u8],
        dir: Direction,
        start: Position,
        match_curpos: bool,
    ) -> Option<Position> {
        let prog = match &self.cached {
            Some((s, p)) if s == pat => p.clone(),
            _ => {
                let p = compile_mapped(pat, false).ok()?;
                self.cached = Some((pat.to_vec(), p.clone()));
                p
            }
        };
        if match_curpos
            && let Some(at) = match_on_line(&prog, buf.lines.text(start.line), start.index)
        {
            return Some(Position::new(start.line, at));
        }
        search_buffer(buf, &prog, start, dir, false)
    }
}

// ---------------------------------------------------------------------------
// Substitution
// ---------------------------------------------------------------------------

/// Case-folding state driven by `\u \U \l \L \e \E` in the replacement.
#[derive(Clone, Copy, PartialEq, Eq)]
enum UlMode {
    Off,
    UpperOne,
    UpperSticky,
    LowerOne,
    LowerSticky,
}

fn fold_push(dest: &mut Flexbuf, c: u8, ul: &mut UlMode) {
    let out = match *ul {
        UlMode::UpperOne | UlMode::UpperSticky => c.to_ascii_uppercase(),
        UlMode::LowerOne | UlMode::LowerSticky => c.to_ascii_lowercase(),
        UlMode::Off => c,
    };
    dest.push(out);
    // One-shot folds expire on the first character they affect, even
    // one coming out of a back-reference.
    if matches!(*ul, UlMode::UpperOne | UlMode::LowerOne) {
        *ul = UlMode::Off;
    }
}

/// Expand the replacement template for one match into `dest`.
fn expand_replacement(
    caps: &regex::bytes::Captures<'_>,
    template: &[u8],
    dest: &mut Flexbuf,
    lnum: u64,
    magic: bool,
) {
    let mut ul = UlMode::Off;
    let mut i = 0;
    while i < template.len() {
        let c = template[i];
        i += 1;
        let mut group: Option<usize> = None;
        if c == b'&' && magic {
            group = Some(0);
        } else if c == b'\\' {
            match template.get(i).copied() {
                Some(d @ b'0'..=b'9') => {
                    group = Some((d - b'0') as usize);
                    i += 1;
                }
                Some(b'#') => {
                    dest.lformat("%lu", &[core_text::FmtArg::Unum(lnum)]);
                    i += 1;
                    continue;
                }
                Some(b'u') => {
                    ul = UlMode::UpperOne;
                    i += 1;
                    continue;
                }
                Some(b'U') => {
                    ul = UlMode::UpperSticky;
                    i += 1;
                    continue;
                }
                Some(b'l') => {
                    ul = UlMode::LowerOne;
                    i += 1;
                    continue;
                }
                Some(b'L') => {
                    ul = UlMode::LowerSticky;
                    i += 1;
                    continue;
                }
                Some(b'e') | Some(b'E') => {
                    ul = UlMode::Off;
                    i += 1;
                    continue;
                }
                _ => {}
            }
        }
        match group {
            None => {
                let c = if c == b'\\' && i < template.len() {
                    let d = template[i];
                    i += 1;
                    d
                } else {
                    c
                };
                fold_push(dest, c, &mut ul);
            }
            Some(no) => {
                if let Some(m) = caps.get(no) {
                    for &b in m.as_bytes() {
                        fold_push(dest, b, &mut ul);
                    }
                }
            }
        }
    }
}

/// Pre-expand `~` in a replacement so a later `~` sees the fully
/// expanded previous rhs ("two twotwo twotwotwotwo").
fn expand_tildes(sub: &[u8], last_rhs: Option<&[u8]>, magic: bool) -> Vec<u8> {
    let mut out = Vec::with_capacity(sub.len());
    let mut escaped = false;
    for (k, &c) in sub.iter().enumerate() {
        match c {
            b'\\' => {
                if escaped {
                    out.extend_from_slice(b"\\\\");
                    escaped = false;
                } else if k + 1 == sub.len() {
                    out.push(b'\\');
                } else {
                    escaped = true;
                }
            }
            b'~' => {
                // Magic: bare ~ expands; nomagic: only \~ does.
                if magic != escaped {
                    out.extend_from_slice(last_rhs.unwrap_or(b""));
                } else {
                    if escaped {
                        out.push(b'\\');
                    }
                    out.push(b'~');
                }
                escaped = false;
            }
            _ => {
                if escaped {
                    out.push(b'\\');
                }
                out.push(c);
                escaped = false;
            }
        }
    }
    out
}

/// The range a substitute / global runs over, as stable line handles.
#[derive(Debug, Clone, Copy)]
pub struct LineRange {
    pub from: LineId,
    pub to: LineId,
}

/// `:[range]s/lhs/rhs/[g]`: parse, compile, and run. `cmd` starts after
/// the `s`. Returns the number of lines changed.
pub fn ex_substitute(
    buf: &mut Buffer,
    state: &mut SearchState,
    params: &Params,
    range: LineRange,
    cursor: Position,
    cmd: &[u8],
) -> Result<u64, SearchError> {
    let cmd = trim_leading(cmd);
    if cmd.is_empty() {
        return ex_ampersand(buf, state, params, range, cursor, cmd);
    }
    let delim = cmd[0];
    if delim.is_ascii_alphanumeric() || delim == b'\\' {
        return Err(SearchError::BadSubstitute);
    }
    let dialect = Dialect::from_params(params);
    let used = state.compile(
        &cmd[1..],
        delim,
        dialect,
        params.is_set(ParamId::Ignorecase),
    )?;
    let rest = &cmd[1 + used..];

    // Scan the rhs up to the next unescaped delimiter.
    let mut end = rest.len();
    let mut k = 0;
    while k < rest.len() {
        if rest[k] == b'\\' {
            k += 2;
            continue;
        }
        if rest[k] == delim {
            end = k;
            break;
        }
        k += 1;
    }
    let rhs = &rest[..end.min(rest.len())];
    let flags = if end < rest.len() { &rest[end + 1..] } else { b"" };

    // The lhs we just compiled becomes the saved substitution pattern.
    state.last_lhs = state.last_prog.clone();

    let magic = params.is_set(ParamId::Magic);
    let prev_rhs_form: &[u8] = if magic { b"~" } else { b"\\~" };
    let sub = if (magic && rhs == b"%") || rhs == prev_rhs_form {
        state.last_rhs.clone().unwrap_or_default()
    } else if rhs.contains(&b'~') {
        expand_tildes(rhs, state.last_rhs.as_deref(), magic)
    } else {
        rhs.to_vec()
    };

    let prog = state.prog().ok_or(SearchError::NoPrevious)?;
    let n = substitute(buf, &prog, range, cursor, &sub, flags, magic)?;
    state.last_rhs = Some(sub);
    Ok(n)
}

/// `:&`: repeat the last substitution (and make its lhs the last
/// pattern again, as vi does).
pub fn ex_ampersand(
    buf: &mut Buffer,
    state: &mut SearchState,
    params: &Params,
    range: LineRange,
    cursor: Position,
    flags: &[u8],
) -> Result<u64, SearchError> {
    let lhs = state.last_lhs.clone().ok_or(SearchError::NoSubstitute)?;
    let rhs = state.last_rhs.clone().ok_or(SearchError::NoSubstitute)?;
    state.last_prog = Some(lhs.clone());
    substitute(
        buf,
        &lhs,
        range,
        cursor,
        &rhs,
        flags,
        params.is_set(ParamId::Magic),
    )
}

/// `:~`: apply the last rhs to the last regular expression used (which
/// may be a search pattern, not the last substitution lhs).
pub fn ex_tilde(
    buf: &mut Buffer,
    state: &mut SearchState,
    params: &Params,
    range: LineRange,
    cursor: Position,
    flags: &[u8],
) -> Result<u64, SearchError> {
    let prog = state.last_prog.clone().ok_or(SearchError::NoSubstitute)?;
    let rhs = state.last_rhs.clone().ok_or(SearchError::NoSubstitute)?;
    state.last_lhs = Some(prog.clone());
    substitute(
        buf,
        &prog,
        range,
        cursor,
        &rhs,
        flags,
        params.is_set(ParamId::Magic),
    )
}

fn trim_leading(mut b: &[u8]) -> &[u8] {
    while b.first().is_some_and(|c| *c == b' ' || *c == b'\t') {
        b = &b[1..];
    }
    b
}

/// Run one substitution pass over the range. At most one replacement
/// per line unless the `g` flag is given. Zero-width matches advance by
/// one byte so the loop always terminates.
fn substitute(
    buf: &mut Buffer,
    prog: &Prog,
    range: LineRange,
    cursor: Position,
    sub: &[u8],
    flags: &[u8],
    magic: bool,
) -> Result<u64, SearchError> {
    let do_all = flags.first() == Some(&b'g');
    let mut nsubs = 0u64;
    buf.start_command(cursor);

    let mut lp = Some(range.from);
    while let Some(line) = lp {
        if buf.lines.is_lastline(line) {
            break;
        }
        if core_events::signals::interrupted() {
            break;
        }
        let next = buf.lines.next(line);
        let text = buf.lines.text(line).to_vec();
        if prog.re.is_match(&text) {
            let mut ns = Flexbuf::new();
            let lnum = buf.lines.lineno(line);
            let mut p = 0usize;
            loop {
                let caps = match prog.re.captures_at(&text, p) {
                    Some(c) => c,
                    None => break,
                };
                let whole = caps.get(0).expect("group 0");
                ns.push_bytes(&text[p..whole.start()]);
                expand_replacement(&caps, sub, &mut ns, lnum, magic);
                p = whole.end();
                if whole.start() >= p {
                    // Zero-width match: move one byte so we make progress.
                    if p >= text.len() {
                        break;
                    }
                    ns.push(text[p]);
                    p += 1;
                }
                if !do_all {
                    break;
                }
            }
            ns.push_bytes(&text[p.min(text.len())..]);
            let newtext = ns.detach();
            buf.replchars(line, 0, text.len(), &newtext);
            nsubs += 1;
            trace!(target: "search.engine", line = lnum, "substituted");
        }
        if line == range.to {
            break;
        }
        lp = next;
    }
    buf.end_command();
    if nsubs == 0 {
        return Err(SearchError::NoMatch);
    }
    Ok(nsubs)
}

// ---------------------------------------------------------------------------
// Global
// ---------------------------------------------------------------------------

/// What a `:g` run produced: either lines were edited, or the matching
/// lines should be paged to the user (`p` / `l`).
pub enum GlobalOutcome {
    Edited(u64),
    Print(Vec<u64>),
}

/// `:[range]g/pat/cmd` (`forward` false for `:v`). Supported trailing
/// commands: `d`, `p`, `l`, `s`, `&`, `~`; default `p`.
pub fn ex_global(
    buf: &mut Buffer,
    state: &mut SearchState,
    params: &Params,
    range: LineRange,
    cursor: Position,
    cmd: &[u8],
    forward: bool,
) -> Result<GlobalOutcome, SearchError> {
    let cmd = trim_leading(cmd);
    if cmd.is_empty() {
        return Err(SearchError::BadGlobal);
    }
    let delim = cmd[0];
    let dialect = Dialect::from_params(params);
    let used = state.compile(
        &cmd[1..],
        delim,
        dialect,
        params.is_set(ParamId::Ignorecase),
    )?;
    let rest = &cmd[1 + used..];

    let (cmdchar, tail) = match rest.first().copied() {
        None => (b'p', &rest[0..0]),
        Some(c @ (b'p' | b'l' | b'd')) => (c, &rest[1..]),
        Some(c @ (b's' | b'&' | b'~')) => (c, &rest[1..]),
        Some(_) => return Err(SearchError::BadGlobalCommand),
    };

    // The global's own pattern must survive an inner :s compiling a new
    // one; holding the Rc is exactly the reference count we need.
    let glob_prog = state.prog().ok_or(SearchError::NoPrevious)?;

    // Mark phase: collect matching lines while the list is stable.
    let mut marked: Vec<LineId> = Vec::new();
    let mut lp = Some(range.from);
    while let Some(line) = lp {
        if buf.lines.is_lastline(line) {
            break;
        }
        if core_events::signals::interrupted() {
            break;
        }
        if glob_prog.re.is_match(buf.lines.text(line)) == forward {
            marked.push(line);
        }
        if line == range.to {
            break;
        }
        lp = buf.lines.next(line);
    }

    if matches!(cmdchar, b'p' | b'l') {
        let nums = marked.iter().map(|&l| buf.lines.lineno(l)).collect();
        return Ok(GlobalOutcome::Print(nums));
    }

    let mut ndone = 0u64;
    buf.start_command(cursor);
    for line in marked {
        if core_events::signals::interrupted() {
            break;
        }
        match cmdchar {
            b'd' => {
                buf.repllines(line, 1, None);
                ndone += 1;
            }
            b's' | b'&' | b'~' => {
                let one = LineRange {
                    from: line,
                    to: line,
                };
                let r = match cmdchar {
                    b's' => ex_substitute(buf, state, params, one, cursor, tail),
                    b'&' => ex_ampersand(buf, state, params, one, cursor, tail),
                    _ => ex_tilde(buf, state, params, one, cursor, tail),
                };
                match r {
                    Ok(n) => ndone += n,
                    Err(SearchError::NoMatch) => {}
                    Err(e) => {
                        buf.end_command();
                        return Err(e);
                    }
                }
            }
            _ => unreachable!(),
        }
    }
    buf.end_command();
    Ok(GlobalOutcome::Edited(ndone))
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_state::Buffer;
    use pretty_assertions::assert_eq;

    fn buffer_with(lines: &[&str]) -> Buffer {
        let mut b = Buffer::new();
        let texts: Vec<Vec<u8>> = lines.iter().map(|l| l.as_bytes().to_vec()).collect();
        let cursor = Position::new(b.lines.first(), 0);
        b.start_command(cursor);
        let chain = b.lines.chain_from_texts(&texts);
        b.replbuffer(chain);
        b.end_command();
        b
    }

    fn contents(b: &Buffer) -> Vec<String> {
        b.lines
            .iter_from(b.lines.first())
            .map(|id| String::from_utf8(b.lines.text(id).to_vec()).unwrap())
            .collect()
    }

    fn whole(b: &Buffer) -> LineRange {
        LineRange {
            from: b.lines.first(),
            to: b.lines.last(),
        }
    }

    fn cursor0(b: &Buffer) -> Position {
        Position::new(b.lines.first(), 0)
    }

    fn default_params() -> Params {
        Params::new()
    }

    #[test]
    fn map_pattern_grep_dialect() {
        let (out, _) = map_pattern(b"a(b)c+d", 0, Dialect::Grep, None);
        assert_eq!(out, b"a\\(b\\)c\\+d".to_vec());
        let (out, _) = map_pattern(b"\\(x\\)", 0, Dialect::Grep, None);
        assert_eq!(out, b"(x)".to_vec());
        let (out, _) = map_pattern(b"a.b*", 0, Dialect::Grep, None);
        assert_eq!(out, b"a.b*".to_vec());
    }

    #[test]
    fn map_pattern_tags_dialect_only_anchors() {
        let (out, _) = map_pattern(b"^a.b$", 0, Dialect::Tags, None);
        assert_eq!(out, b"^a\\.b$".to_vec());
        let (out, _) = map_pattern(b"a^b", 0, Dialect::Tags, None);
        assert_eq!(out, b"a\\^b".to_vec());
    }

    #[test]
    fn map_pattern_word_boundaries() {
        let (out, _) = map_pattern(b"\\<word\\>", 0, Dialect::Grep, None);
        assert_eq!(out, b"\\bword\\b".to_vec());
    }

    #[test]
    fn map_pattern_stops_at_delimiter() {
        let (out, used) = map_pattern(b"foo/bar", b'/', Dialect::Grep, None);
        assert_eq!(out, b"foo".to_vec());
        assert_eq!(used, 3);
        // Escaped delimiter is literal.
        let (out, _) = map_pattern(b"a\\/b", b'/', Dialect::Grep, None);
        assert_eq!(out, b"a/b".to_vec());
    }

    #[test]
    fn search_forward_with_wrapscan() {
        let b = buffer_with(&["alpha", "beta", "gamma"]);
        let mut st = SearchState::default();
        st.compile(b"al", b'/', Dialect::Grep, false).unwrap();
        let prog = st.prog().unwrap();
        // From line 2: forward search wraps to line 1.
        let start = Position::new(b.lines.next(b.lines.first()).unwrap(), 0);
        let hit = search_buffer(&b, &prog, start, Direction::Forward, true).unwrap();
        assert_eq!(b.lines.lineno(hit.line), 1);
        assert_eq!(hit.index, 0);
        // Without wrapscan there is no match.
        assert!(search_buffer(&b, &prog, start, Direction::Forward, false).is_none());
    }

    #[test]
    fn wrapscan_symmetry() {
        let b = buffer_with(&["xx", "needle", "yy"]);
        let mut st = SearchState::default();
        st.compile(b"needle", b'/', Dialect::Grep, false).unwrap();
        let prog = st.prog().unwrap();
        let start = Position::new(b.lines.first(), 0);
        let f = search_buffer(&b, &prog, start, Direction::Forward, true);
        let r = search_buffer(&b, &prog, start, Direction::Backward, true);
        assert_eq!(f.is_some(), r.is_some());
    }

    #[test]
    fn backward_search_finds_last_match_before_cursor() {
        let b = buffer_with(&["ab ab ab"]);
        let mut st = SearchState::default();
        st.compile(b"ab", b'?', Dialect::Grep, false).unwrap();
        let prog = st.prog().unwrap();
        // Cursor on the 'a' of the final "ab": the match under the
        // cursor is excluded, the one before it wins.
        let start = Position::new(b.lines.first(), 6);
        let hit = search_buffer(&b, &prog, start, Direction::Backward, false).unwrap();
        assert_eq!(hit.index, 3);
    }

    #[test]
    fn substitute_with_backrefs_swaps_words() {
        let mut b = buffer_with(&[" hello world "]);
        let mut st = SearchState::default();
        let p = default_params();
        let __range = whole(&b);
        let __cursor = cursor0(&b);
        let n = ex_substitute(
            &mut b,
            &mut st,
            &p,
            __range,
            __cursor,
            br"/\([a-z]\+\) \([a-z]\+\)/\2 \1/",
        )
        .unwrap();
        assert_eq!(n, 1);
        assert_eq!(contents(&b), vec![" world hello "]);

        // :& repeats and is a no-op producing the same text again.
        let before = contents(&b);
        let __range = whole(&b);
        let __cursor = cursor0(&b);
        let _ = ex_ampersand(&mut b, &mut st, &p, __range, __cursor, b"");
        assert_eq!(contents(&b), before);
    }

    #[test]
    fn substitute_identity_is_noop() {
        let mut b = buffer_with(&["any line at all"]);
        let mut st = SearchState::default();
        let p = default_params();
        let __range = whole(&b);
        let __cursor = cursor0(&b);
        ex_substitute(
            &mut b,
            &mut st,
            &p,
            __range,
            __cursor,
            br"/\(.*\)/\1/",
        )
        .unwrap();
        assert_eq!(contents(&b), vec!["any line at all"]);
    }

    #[test]
    fn substitute_global_flag_replaces_all() {
        let mut b = buffer_with(&["aaa"]);
        let mut st = SearchState::default();
        let p = default_params();
        let __range = whole(&b);
        let __cursor = cursor0(&b);
        ex_substitute(&mut b, &mut st, &p, __range, __cursor, b"/a/b/g").unwrap();
        assert_eq!(contents(&b), vec!["bbb"]);
    }

    #[test]
    fn substitute_case_folding() {
        let mut b = buffer_with(&["hello world"]);
        let mut st = SearchState::default();
        let p = default_params();
        let __range = whole(&b);
        let __cursor = cursor0(&b);
        ex_substitute(
            &mut b,
            &mut st,
            &p,
            __range,
            __cursor,
            br"/\([a-z]\+\)/\u\1/",
        )
        .unwrap();
        assert_eq!(contents(&b), vec!["Hello world"]);

        let mut b = buffer_with(&["hello world"]);
        let __range = whole(&b);
        let __cursor = cursor0(&b);
        ex_substitute(
            &mut b,
            &mut st,
            &p,
            __range,
            __cursor,
            br"/hello/\Uyelled\E down/",
        )
        .unwrap();
        assert_eq!(contents(&b), vec!["YELLED down world"]);
    }

    #[test]
    fn doubled_u_keeps_single_shot_semantics() {
        // \u\u: the second toggle just replaces the pending one; only
        // the first following character is uppercased.
        let mut b = buffer_with(&["abc"]);
        let mut st = SearchState::default();
        let p = default_params();
        let __range = whole(&b);
        let __cursor = cursor0(&b);
        ex_substitute(&mut b, &mut st, &p, __range, __cursor, br"/abc/\u\uxyz/").unwrap();
        assert_eq!(contents(&b), vec!["Xyz"]);
    }

    #[test]
    fn ampersand_in_rhs_inserts_whole_match() {
        let mut b = buffer_with(&["ab"]);
        let mut st = SearchState::default();
        let p = default_params();
        let __range = whole(&b);
        let __cursor = cursor0(&b);
        ex_substitute(&mut b, &mut st, &p, __range, __cursor, b"/ab/<&>/").unwrap();
        assert_eq!(contents(&b), vec!["<ab>"]);
    }

    #[test]
    fn tilde_expands_to_previous_rhs_recursively() {
        let mut b = buffer_with(&["one one one"]);
        let mut st = SearchState::default();
        let p = default_params();
        let __range = whole(&b);
        let __cursor = cursor0(&b);
        ex_substitute(&mut b, &mut st, &p, __range, __cursor, b"/one/two/").unwrap();
        let __range = whole(&b);
        let __cursor = cursor0(&b);
        ex_substitute(&mut b, &mut st, &p, __range, __cursor, b"/one/~~/").unwrap();
        let __range = whole(&b);
        let __cursor = cursor0(&b);
        ex_substitute(&mut b, &mut st, &p, __range, __cursor, b"/one/~~/").unwrap();
        assert_eq!(contents(&b), vec!["two twotwo twotwotwotwo"]);
    }

    #[test]
    fn line_number_escape_in_rhs() {
        let mut b = buffer_with(&["x", "x"]);
        let mut st = SearchState::default();
        let p = default_params();
        let __range = whole(&b);
        let __cursor = cursor0(&b);
        ex_substitute(&mut b, &mut st, &p, __range, __cursor, br"/x/\#/").unwrap();
        assert_eq!(contents(&b), vec!["1", "2"]);
    }

    #[test]
    fn global_delete_filters_lines() {
        let mut b = buffer_with(&["a", "bb", "ccc", "dd", "e"]);
        let mut st = SearchState::default();
        let p = default_params();
        let __range = whole(&b);
        let __cursor = cursor0(&b);
        let out = ex_global(
            &mut b,
            &mut st,
            &p,
            __range,
            __cursor,
            b"/[a-c]/d",
            true,
        )
        .unwrap();
        match out {
            GlobalOutcome::Edited(n) => assert_eq!(n, 3),
            GlobalOutcome::Print(_) => panic!("expected edit"),
        }
        assert_eq!(contents(&b), vec!["dd", "e"]);

        // One undo restores everything: the global ran as a single
        // composite change.
        b.undo(cursor0(&b)).unwrap();
        assert_eq!(contents(&b), vec!["a", "bb", "ccc", "dd", "e"]);
    }

    #[test]
    fn global_inverted_keeps_matches() {
        let mut b = buffer_with(&["keep1", "drop", "keep2"]);
        let mut st = SearchState::default();
        let p = default_params();
        let __range = whole(&b);
        let __cursor = cursor0(&b);
        ex_global(
            &mut b,
            &mut st,
            &p,
            __range,
            __cursor,
            b"/keep/d",
            false,
        )
        .unwrap();
        assert_eq!(contents(&b), vec!["keep1", "keep2"]);
    }

    #[test]
    fn global_substitute_keeps_outer_pattern_alive() {
        let mut b = buffer_with(&["foo bar", "baz", "foo baz"]);
        let mut st = SearchState::default();
        let p = default_params();
        // Inner :s compiles a new pattern; the marked set still comes
        // from the outer /foo/.
        let __range = whole(&b);
        let __cursor = cursor0(&b);
        ex_global(
            &mut b,
            &mut st,
            &p,
            __range,
            __cursor,
            b"/foo/s/ba./X/",
            true,
        )
        .unwrap();
        assert_eq!(contents(&b), vec!["foo X", "baz", "foo X"]);
    }

    #[test]
    fn global_print_reports_line_numbers() {
        let mut b = buffer_with(&["a", "b", "a"]);
        let mut st = SearchState::default();
        let p = default_params();
        let __range = whole(&b);
        let __cursor = cursor0(&b);
        let out = ex_global(&mut b, &mut st, &p, __range, __cursor, b"/a/p", true).unwrap();
        match out {
            GlobalOutcome::Print(nums) => assert_eq!(nums, vec![1, 3]),
            GlobalOutcome::Edited(_) => panic!("expected print"),
        }
    }

    #[test]
    fn empty_pattern_reuses_last() {
        let mut b = buffer_with(&["abc abc"]);
        let mut st = SearchState::default();
        let p = default_params();
        let __range = whole(&b);
        let __cursor = cursor0(&b);
        ex_substitute(&mut b, &mut st, &p, __range, __cursor, b"/abc/X/").unwrap();
        // `s//Y/` reuses /abc/.
        let __range = whole(&b);
        let __cursor = cursor0(&b);
        ex_substitute(&mut b, &mut st, &p, __range, __cursor, b"//Y/").unwrap();
        assert_eq!(contents(&b), vec!["X Y"]);
    }

    #[test]
    fn zero_width_match_terminates() {
        let mut b = buffer_with(&["abc"]);
        let mut st = SearchState::default();
        let p = default_params();
        // x* matches empty everywhere; must not loop.
        let __range = whole(&b);
        let __cursor = cursor0(&b);
        ex_substitute(&mut b, &mut st, &p, __range, __cursor, b"/x*/-/g").unwrap();
        assert_eq!(contents(&b), vec!["-a-b-c-"]);
    }
}
