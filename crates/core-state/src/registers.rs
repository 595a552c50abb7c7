//! Yank/put registers.
//!
//! 37 addressable cells: the unnamed register `@`, the kill ring `1`-`9`,
//! the user registers `a`-`z` (addressed as `A`-`Z` to append), the
//! last-insert register `<`, and the command-line memories `/ ? : !`.
//!
//! A register holds either whole lines or a character span. A character
//! span covering k buffer lines is stored as k segments: the first joins
//! the text before the insertion point on put, the last joins the text
//! after, and everything between becomes whole lines. Appending across
//! the representation boundary converts: lines gain a trailing empty
//! segment when they become a character span, and each segment becomes a
//! whole line the other way.

use core_text::{Detached, Position};
use tracing::trace;

use crate::Buffer;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegisterContent {
    /// Character span: one segment per buffer line covered, at least one.
    Chars(Vec<Vec<u8>>),
    /// Whole lines.
    Lines(Vec<Vec<u8>>),
}

impl RegisterContent {
    pub fn chars_single(text: &[u8]) -> Self {
        RegisterContent::Chars(vec![text.to_vec()])
    }

    pub fn is_lines(&self) -> bool {
        matches!(self, RegisterContent::Lines(_))
    }

    /// Byte form used to stuff a register back into the input stream
    /// (`@x` execution). Line registers get a newline after every line.
    pub fn as_input(&self) -> Vec<u8> {
        match self {
            RegisterContent::Chars(segs) => segs.join(&b'\n'),
            RegisterContent::Lines(lines) => {
                let mut out = Vec::new();
                for l in lines {
                    out.extend_from_slice(l);
                    out.push(b'\n');
                }
                out
            }
        }
    }
}

/// Which cell a register name addresses, after case folding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterName {
    Unnamed,
    Letter(u8),
    Numbered(u8),
    Insert,
    Search,
    BackSearch,
    ExLine,
    ShellLine,
}

impl RegisterName {
    /// Parse a register designator. The second value is true when the
    /// designator asks for appending (`A`-`Z`).
    pub fn parse(c: u8) -> Option<(Self, bool)> {
        match c {
            b'@' => Some((RegisterName::Unnamed, false)),
            b'a'..=b'z' => Some((RegisterName::Letter(c), false)),
            b'A'..=b'Z' => Some((RegisterName::Letter(c.to_ascii_lowercase()), true)),
            b'1'..=b'9' => Some((RegisterName::Numbered(c - b'0'), false)),
            b'<' => Some((RegisterName::Insert, false)),
            b'/' => Some((RegisterName::Search, false)),
            b'?' => Some((RegisterName::BackSearch, false)),
            b':' => Some((RegisterName::ExLine, false)),
            b'!' => Some((RegisterName::ShellLine, false)),
            _ => None,
        }
    }
}

#[derive(Debug, Default)]
pub struct RegisterFile {
    letters: [Option<RegisterContent>; 26],
    ring: [Option<RegisterContent>; 9],
    unnamed: Option<RegisterContent>,
    insert: Option<RegisterContent>,
    search: Option<RegisterContent>,
    bsearch: Option<RegisterContent>,
    exline: Option<RegisterContent>,
    shellline: Option<RegisterContent>,
}

impl RegisterFile {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: RegisterName) -> Option<&RegisterContent> {
        match name {
            RegisterName::Unnamed => self.unnamed.as_ref(),
            RegisterName::Letter(c) => self.letters[(c - b'a') as usize].as_ref(),
            RegisterName::Numbered(n) => self.ring[(n - 1) as usize].as_ref(),
            RegisterName::Insert => self.insert.as_ref(),
            RegisterName::Search => self.search.as_ref(),
            RegisterName::BackSearch => self.bsearch.as_ref(),
            RegisterName::ExLine => self.exline.as_ref(),
            RegisterName::ShellLine => self.shellline.as_ref(),
        }
    }

    fn slot_mut(&mut self, name: RegisterName) -> &mut Option<RegisterContent> {
        match name {
            RegisterName::Unnamed => &mut self.unnamed,
            RegisterName::Letter(c) => &mut self.letters[(c - b'a') as usize],
            RegisterName::Numbered(n) => &mut self.ring[(n - 1) as usize],
            RegisterName::Insert => &mut self.insert,
            RegisterName::Search => &mut self.search,
            RegisterName::BackSearch => &mut self.bsearch,
            RegisterName::ExLine => &mut self.exline,
            RegisterName::ShellLine => &mut self.shellline,
        }
    }

    /// Store yanked content. `designator` is the raw register character
    /// from the command, if any; uppercase letters append. The unnamed
    /// register always mirrors the result.
    pub fn yank(&mut self, designator: Option<u8>, content: RegisterContent) {
        let (name, append) = match designator.and_then(RegisterName::parse) {
            Some(parsed) => parsed,
            None => (RegisterName::Unnamed, false),
        };
        let slot = self.slot_mut(name);
        let stored = if append {
            match slot.take() {
                Some(existing) => append_content(existing, content),
                None => content,
            }
        } else {
            content
        };
        *slot = Some(stored.clone());
        if name != RegisterName::Unnamed {
            self.unnamed = Some(stored);
        }
        trace!(target: "state.registers", register = ?name, append, "yank");
    }

    /// Rotate the kill ring before a destructive operation: `1`..`8`
    /// shift into `2`..`9` (dropping the old `9`), and the unnamed
    /// register becomes the new `1`.
    pub fn push_deleted(&mut self) {
        for i in (1..9).rev() {
            self.ring[i] = self.ring[i - 1].take();
        }
        self.ring[0] = self.unnamed.clone();
        trace!(target: "state.registers", "kill ring rotated");
    }

    /// Record the text of the last insert (the `<` register).
    pub fn record_insert(&mut self, text: &[u8]) {
        let segs: Vec<Vec<u8>> = text.split(|&b| b == b'\n').map(<[u8]>::to_vec).collect();
        self.insert = Some(RegisterContent::Chars(segs));
    }

    pub fn record_search(&mut self, pat: &[u8], backward: bool) {
        let content = RegisterContent::chars_single(pat);
        if backward {
            self.bsearch = Some(content);
        } else {
            self.search = Some(content);
        }
    }

    pub fn record_ex_line(&mut self, line: &[u8]) {
        self.exline = Some(RegisterContent::chars_single(line));
    }

    pub fn record_shell_line(&mut self, line: &[u8]) {
        self.shellline = Some(RegisterContent::chars_single(line));
    }
}

/// Append `src` onto `dest`, converting representations when they differ.
fn append_content(dest: RegisterContent, src: RegisterContent) -> RegisterContent {
    use RegisterContent::{Chars, Lines};
    match (dest, src) {
        (Chars(mut a), Chars(b)) => {
            let mut it = b.into_iter();
            if let Some(first) = it.next() {
                a.last_mut().expect("non-empty").extend_from_slice(&first);
            }
            a.extend(it);
            Chars(a)
        }
        (Lines(mut a), Lines(b)) => {
            a.extend(b);
            Lines(a)
        }
        // Char yank into a line register: destination becomes a char span
        // (whole lines keep their line breaks via a trailing empty
        // segment), then the char append applies.
        (Lines(mut a), Chars(b)) => {
            a.push(Vec::new());
            append_content(Chars(a), Chars(b))
        }
        // Line yank into a char register: every segment becomes a line.
        (Chars(a), Lines(b)) => append_content(Lines(a), Lines(b)),
    }
}

/// Which side of the cursor a put lands on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutDirection {
    /// `P`: before the cursor (or above, for line registers).
    Before,
    /// `p`: after the cursor (or below).
    After,
}

impl Buffer {
    /// Copy a character span out of the buffer: `from` inclusive up to
    /// `to` exclusive, in buffer order.
    pub fn yank_chars(&self, from: Position, to: Position) -> RegisterContent {
        if from.line == to.line {
            let text = self.lines.text(from.line);
            let hi = to.index.min(text.len());
            let lo = from.index.min(hi);
            return RegisterContent::Chars(vec![text[lo..hi].to_vec()]);
        }
        let mut segs = Vec::new();
        segs.push(self.lines.text(from.line)[from.index..].to_vec());
        let mut id = self.lines.next(from.line);
        while let Some(cur) = id {
            if cur == to.line || self.lines.is_lastline(cur) {
                break;
            }
            segs.push(self.lines.text(cur).to_vec());
            id = self.lines.next(cur);
        }
        let text = self.lines.text(to.line);
        segs.push(text[..to.index.min(text.len())].to_vec());
        RegisterContent::Chars(segs)
    }

    /// Copy whole lines `from` through `to` inclusive.
    pub fn yank_lines(&self, from: core_text::LineId, to: core_text::LineId) -> RegisterContent {
        let mut lines = Vec::new();
        let mut id = Some(from);
        while let Some(cur) = id {
            if self.lines.is_lastline(cur) {
                break;
            }
            lines.push(self.lines.text(cur).to_vec());
            if cur == to {
                break;
            }
            id = self.lines.next(cur);
        }
        RegisterContent::Lines(lines)
    }

    /// Insert register content at the cursor. Must be called inside a
    /// change bracket. Returns the cursor position after the put.
    pub fn put_register(
        &mut self,
        at: Position,
        dir: PutDirection,
        content: &RegisterContent,
    ) -> Position {
        match content {
            RegisterContent::Lines(lines) => {
                let anchor = match dir {
                    PutDirection::Before => at.line,
                    PutDirection::After => {
                        self.lines.next(at.line).unwrap_or(self.lines.lastline())
                    }
                };
                let first_new = match self.lines.chain_from_texts(lines) {
                    Some(chain) => {
                        let head = chain.head;
                        self.repllines(anchor, 0, Some(chain));
                        head
                    }
                    None => return at,
                };
                Position::new(first_new, 0)
            }
            RegisterContent::Chars(segs) => {
                let len = self.lines.len(at.line);
                let ins_at = match dir {
                    PutDirection::Before => at.index.min(len),
                    PutDirection::After => {
                        if len == 0 {
                            0
                        } else {
                            (at.index + 1).min(len)
                        }
                    }
                };
                if segs.len() == 1 {
                    let seg = &segs[0];
                    if seg.is_empty() {
                        return at;
                    }
                    self.replchars(at.line, ins_at, 0, seg);
                    return Position::new(at.line, ins_at + seg.len() - 1);
                }
                // Split the line: first segment joins the head, the tail
                // of the line joins the last segment, middles go in whole.
                let tail = self.lines.text(at.line)[ins_at..].to_vec();
                let tail_len = tail.len();
                self.replchars(at.line, ins_at, tail_len, &segs[0]);
                let mut new_lines: Vec<Vec<u8>> =
                    segs[1..segs.len() - 1].iter().map(Vec::clone).collect();
                let mut last = segs[segs.len() - 1].clone();
                last.extend_from_slice(&tail);
                new_lines.push(last);
                let anchor = self.lines.next(at.line).unwrap_or(self.lines.lastline());
                let chain = self.lines.chain_from_texts(&new_lines);
                self.repllines(anchor, 0, chain);
                Position::new(at.line, ins_at)
            }
        }
    }

    /// Detached chain from register line content, for callers splicing
    /// by hand.
    pub fn chain_from_register(&mut self, lines: &[Vec<u8>]) -> Option<Detached> {
        self.lines.chain_from_texts(lines)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
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

    #[test]
    fn register_names_parse() {
        assert_eq!(
            RegisterName::parse(b'a'),
            Some((RegisterName::Letter(b'a'), false))
        );
        assert_eq!(
            RegisterName::parse(b'Q'),
            Some((RegisterName::Letter(b'q'), true))
        );
        assert_eq!(
            RegisterName::parse(b'5'),
            Some((RegisterName::Numbered(5), false))
        );
        assert_eq!(RegisterName::parse(b'0'), None);
        assert_eq!(RegisterName::parse(b'%'), None);
    }

    #[test]
    fn yank_mirrors_unnamed() {
        let mut r = RegisterFile::new();
        r.yank(Some(b'a'), RegisterContent::chars_single(b"abc"));
        assert_eq!(
            r.get(RegisterName::Unnamed),
            Some(&RegisterContent::chars_single(b"abc"))
        );
        assert_eq!(
            r.get(RegisterName::Letter(b'a')),
            Some(&RegisterContent::chars_single(b"abc"))
        );
    }

    #[test]
    fn uppercase_appends_chars() {
        let mut r = RegisterFile::new();
        r.yank(Some(b'a'), RegisterContent::chars_single(b"foo"));
        r.yank(Some(b'A'), RegisterContent::chars_single(b"bar"));
        // Append is concatenation of the spans.
        assert_eq!(
            r.get(RegisterName::Letter(b'a')),
            Some(&RegisterContent::chars_single(b"foobar"))
        );
    }

    #[test]
    fn append_line_yank_to_char_register_converts() {
        let mut r = RegisterFile::new();
        r.yank(Some(b'a'), RegisterContent::chars_single(b"head"));
        r.yank(
            Some(b'A'),
            RegisterContent::Lines(vec![b"one".to_vec(), b"two".to_vec()]),
        );
        assert_eq!(
            r.get(RegisterName::Letter(b'a')),
            Some(&RegisterContent::Lines(vec![
                b"head".to_vec(),
                b"one".to_vec(),
                b"two".to_vec()
            ]))
        );
    }

    #[test]
    fn append_char_yank_to_line_register_converts() {
        let mut r = RegisterFile::new();
        r.yank(Some(b'a'), RegisterContent::Lines(vec![b"one".to_vec()]));
        r.yank(Some(b'A'), RegisterContent::chars_single(b"tail"));
        assert_eq!(
            r.get(RegisterName::Letter(b'a')),
            Some(&RegisterContent::Chars(vec![
                b"one".to_vec(),
                b"tail".to_vec()
            ]))
        );
    }

    #[test]
    fn kill_ring_rotation_drops_oldest() {
        let mut r = RegisterFile::new();
        for i in 0..11u8 {
            r.yank(None, RegisterContent::chars_single(&[b'0' + i]));
            r.push_deleted();
        }
        // Most recent delete in "1, the 10th-oldest gone.
        assert_eq!(
            r.get(RegisterName::Numbered(1)),
            Some(&RegisterContent::chars_single(b"\x3a"))
        );
        assert_eq!(
            r.get(RegisterName::Numbered(9)),
            Some(&RegisterContent::chars_single(b"2"))
        );
    }

    #[test]
    fn put_lines_before_and_after() {
        let mut b = buffer_with(&["mid"]);
        let reg = RegisterContent::Lines(vec![b"top".to_vec()]);
        let at = Position::new(b.lines.first(), 0);
        b.start_command(at);
        let p = b.put_register(at, PutDirection::Before, &reg);
        b.end_command();
        assert_eq!(contents(&b), vec!["top", "mid"]);
        assert_eq!(b.lines.lineno(p.line), 1);

        let reg = RegisterContent::Lines(vec![b"bottom".to_vec()]);
        let at = Position::new(b.lines.last(), 0);
        b.start_command(at);
        b.put_register(at, PutDirection::After, &reg);
        b.end_command();
        assert_eq!(contents(&b), vec!["top", "mid", "bottom"]);
    }

    #[test]
    fn put_char_single_segment_lands_after_cursor() {
        let mut b = buffer_with(&["abcd"]);
        let at = Position::new(b.lines.first(), 1);
        b.start_command(at);
        let p = b.put_register(at, PutDirection::After, &RegisterContent::chars_single(b"XY"));
        b.end_command();
        assert_eq!(contents(&b), vec!["abXYcd"]);
        assert_eq!(p.index, 3); // last pasted byte
    }

    #[test]
    fn put_char_multiline_splits_and_joins() {
        let mut b = buffer_with(&["HEAD-TAIL"]);
        let reg = RegisterContent::Chars(vec![
            b"one".to_vec(),
            b"two".to_vec(),
            b"three".to_vec(),
        ]);
        let at = Position::new(b.lines.first(), 4);
        b.start_command(at);
        b.put_register(at, PutDirection::After, &reg);
        b.end_command();
        assert_eq!(contents(&b), vec!["HEAD-one", "two", "three-TAIL"]);

        // The whole put is one composite change.
        b.undo(Position::new(b.lines.first(), 0)).unwrap();
        assert_eq!(contents(&b), vec!["HEAD-TAIL"]);
    }

    #[test]
    fn yank_chars_across_lines() {
        let b = buffer_with(&["foo", "bar"]);
        let from = Position::new(b.lines.first(), 1);
        let to = Position::new(b.lines.last(), 2);
        assert_eq!(
            b.yank_chars(from, to),
            RegisterContent::Chars(vec![b"oo".to_vec(), b"ba".to_vec()])
        );
    }

    #[test]
    fn line_register_as_input_gets_newlines() {
        let reg = RegisterContent::Lines(vec![b"dd".to_vec(), b"x".to_vec()]);
        assert_eq!(reg.as_input(), b"dd\nx\n".to_vec());
        let reg = RegisterContent::Chars(vec![b"ab".to_vec(), b"cd".to_vec()]);
        assert_eq!(reg.as_input(), b"ab\ncd".to_vec());
    }
}
