//! Byte-oriented line storage: a doubly linked list of lines pinned in a
//! typed arena, bracketed by two sentinel lines.
//!
//! Lines are addressed by [`LineId`], a stable index into the arena. A line
//! detached from the list (for undo records or pending insertion) keeps its
//! id and its text; only explicit freeing recycles the slot. This is what
//! lets marks and undo change records refer to lines that are not currently
//! reachable from the buffer.
//!
//! Ordering between two attached lines is decided solely by `number`:
//! `line0` carries 0, `lastline` carries `u64::MAX`, and every real line in
//! between carries a strictly increasing value. Structural edits renumber
//! the tail from the edit point, so the comparison stays authoritative.

use std::fmt;

pub mod flexbuf;
pub mod motion;

pub use flexbuf::{Flexbuf, FmtArg};

/// Line text capacity grows in multiples of this, to bound reallocation
/// frequency during character insertion.
pub const MEMCHUNK: usize = 8;

/// Arena growth quantum: number of line records added when the free list
/// runs dry.
pub const ALLOC_BLOCK: usize = 16;

/// Stable handle to a line record in a [`LineSet`]'s arena. The default
/// value is only a placeholder for state that is reinitialised before
/// use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct LineId(u32);

impl LineId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for LineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.0)
    }
}

/// One line of buffer text. `text` never contains NUL or terminator bytes;
/// "end of line" is `text.len()`, the slot a cursor may rest on.
#[derive(Debug, Default)]
pub struct Line {
    text: Vec<u8>,
    number: u64,
    prev: Option<LineId>,
    next: Option<LineId>,
    free: bool,
}

/// A chain of lines detached from a line set, still owned by its arena.
/// Produced by [`LineSet::detach`] and consumed by [`LineSet::attach_before`]
/// or [`LineSet::free_chain`].
#[derive(Debug, Clone, Copy)]
pub struct Detached {
    pub head: LineId,
    pub tail: LineId,
    pub count: usize,
}

/// Result of a primitive position motion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveResult {
    /// Moved within the same line.
    SameLine,
    /// Moved onto a different line.
    ChangedLine,
    /// Moved onto the end-of-line slot of the same line.
    Eol,
    /// At the buffer boundary; the position is unchanged.
    NoMove,
}

/// A position inside a line set: a line handle plus a byte index.
/// The index may equal the line length, meaning "at end of line".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Position {
    pub line: LineId,
    pub index: usize,
}

impl Position {
    pub fn new(line: LineId, index: usize) -> Self {
        Self { line, index }
    }
}

/// The sentinel-bracketed line list plus its arena.
///
/// Invariants maintained by every public mutator:
/// * `line0.number == 0`, `lastline.number == u64::MAX`, real lines are
///   numbered consecutively from 1 in list order;
/// * for every attached line `l`, `l.next.prev == l` and `l.prev.next == l`;
/// * at least one real line is attached (an "empty" set holds one empty
///   line).
pub struct LineSet {
    arena: Vec<Line>,
    free: Vec<LineId>,
    line0: LineId,
    lastline: LineId,
    nlines: usize,
}

impl Default for LineSet {
    fn default() -> Self {
        Self::new()
    }
}

impl LineSet {
    pub fn new() -> Self {
        let mut set = Self {
            arena: Vec::with_capacity(ALLOC_BLOCK),
            free: Vec::new(),
            line0: LineId(0),
            lastline: LineId(0),
            nlines: 0,
        };
        let line0 = set.alloc_raw(0);
        let first = set.alloc_raw(0);
        let lastline = set.alloc_raw(0);
        set.line0 = line0;
        set.lastline = lastline;
        set.arena[line0.index()].number = 0;
        set.arena[first.index()].number = 1;
        set.arena[lastline.index()].number = u64::MAX;
        set.link(line0, first);
        set.link(first, lastline);
        set.nlines = 1;
        set
    }

    /// Reset to a single empty line, recycling every attached line.
    pub fn clear(&mut self) {
        let first = self.first();
        if !self.is_lastline(first) {
            let chain = self.detach(first, self.nlines);
            self.free_chain(chain);
        }
        let fresh = self.alloc_line(0);
        self.attach_before(
            self.lastline,
            Detached {
                head: fresh,
                tail: fresh,
                count: 1,
            },
        );
    }

    // ---- sentinels and structure --------------------------------------

    pub fn line0(&self) -> LineId {
        self.line0
    }

    pub fn lastline(&self) -> LineId {
        self.lastline
    }

    /// The first real line (line 1). Every set has one.
    pub fn first(&self) -> LineId {
        self.arena[self.line0.index()].next.expect("line0 linked")
    }

    /// The last real line.
    pub fn last(&self) -> LineId {
        self.arena[self.lastline.index()]
            .prev
            .expect("lastline linked")
    }

    pub fn is_line0(&self, id: LineId) -> bool {
        self.arena[id.index()].number == 0
    }

    pub fn is_lastline(&self, id: LineId) -> bool {
        self.arena[id.index()].number == u64::MAX
    }

    pub fn next(&self, id: LineId) -> Option<LineId> {
        self.arena[id.index()].next
    }

    pub fn prev(&self, id: LineId) -> Option<LineId> {
        self.arena[id.index()].prev
    }

    /// Number of attached real lines.
    pub fn count(&self) -> usize {
        self.nlines
    }

    pub fn lineno(&self, id: LineId) -> u64 {
        self.arena[id.index()].number
    }

    /// The authoritative "earlier than" relation.
    pub fn earlier(&self, a: LineId, b: LineId) -> bool {
        self.lineno(a) < self.lineno(b)
    }

    /// Find the attached line with the given 1-based number, clamping to
    /// the last line when past the end.
    pub fn line_at(&self, number: u64) -> LineId {
        let mut id = self.first();
        loop {
            let next = self.next(id).expect("attached");
            if self.lineno(id) >= number || self.is_lastline(next) {
                return id;
            }
            id = next;
        }
    }

    // ---- text access ---------------------------------------------------

    pub fn text(&self, id: LineId) -> &[u8] {
        &self.arena[id.index()].text
    }

    pub fn len(&self, id: LineId) -> usize {
        self.arena[id.index()].text.len()
    }

    pub fn is_empty(&self, id: LineId) -> bool {
        self.arena[id.index()].text.is_empty()
    }

    /// Byte at a position; 0 when the index rests on the end-of-line slot.
    pub fn byte_at(&self, pos: Position) -> u8 {
        let text = self.text(pos.line);
        if pos.index < text.len() { text[pos.index] } else { 0 }
    }

    /// Replace `n_del` bytes at `index` with `ins`, within one line.
    /// This is the raw splice; change recording lives a layer up.
    pub fn splice_text(&mut self, id: LineId, index: usize, n_del: usize, ins: &[u8]) {
        let line = &mut self.arena[id.index()];
        debug_assert!(index + n_del <= line.text.len());
        let grow = ins.len().saturating_sub(n_del);
        if grow > 0 {
            reserve_chunked(&mut line.text, grow);
        }
        line.text.splice(index..index + n_del, ins.iter().copied());
    }

    pub fn set_text(&mut self, id: LineId, text: &[u8]) {
        let line = &mut self.arena[id.index()];
        line.text.clear();
        reserve_chunked(&mut line.text, text.len());
        line.text.extend_from_slice(text);
    }

    // ---- allocation ----------------------------------------------------

    /// Allocate a detached line with room for at least `min_chars` bytes.
    pub fn alloc_line(&mut self, min_chars: usize) -> LineId {
        let id = self.alloc_raw(min_chars);
        let line = &mut self.arena[id.index()];
        line.number = 0;
        line.prev = None;
        line.next = None;
        id
    }

    /// Allocate a detached line holding a copy of `text`.
    pub fn alloc_with_text(&mut self, text: &[u8]) -> LineId {
        let id = self.alloc_line(text.len());
        self.arena[id.index()].text.extend_from_slice(text);
        id
    }

    fn alloc_raw(&mut self, min_chars: usize) -> LineId {
        let id = match self.free.pop() {
            Some(id) => id,
            None => {
                let base = self.arena.len();
                self.arena
                    .extend((0..ALLOC_BLOCK).map(|_| Line::default()));
                // Push high to low so the lowest new slot is handed out next.
                for i in (base + 1..base + ALLOC_BLOCK).rev() {
                    self.arena[i].free = true;
                    self.free.push(LineId(i as u32));
                }
                LineId(base as u32)
            }
        };
        let line = &mut self.arena[id.index()];
        line.free = false;
        line.text.clear();
        reserve_chunked(&mut line.text, min_chars);
        id
    }

    /// Return a detached line to the free list. Most-recently-freed slots
    /// are reused first.
    pub fn free_line(&mut self, id: LineId) {
        debug_assert!(!self.arena[id.index()].free, "double free of {id}");
        let line = &mut self.arena[id.index()];
        line.free = true;
        line.prev = None;
        line.next = None;
        line.number = 0;
        self.free.push(id);
    }

    /// Free every line of a detached chain.
    pub fn free_chain(&mut self, chain: Detached) {
        let mut id = Some(chain.head);
        let mut n = 0usize;
        while let Some(cur) = id {
            id = self.arena[cur.index()].next;
            self.free_line(cur);
            n += 1;
            if cur == chain.tail {
                break;
            }
        }
        debug_assert_eq!(n, chain.count);
    }

    /// Clone the text of each line in a detached chain, head to tail.
    pub fn chain_texts(&self, chain: Detached) -> Vec<Vec<u8>> {
        let mut out = Vec::with_capacity(chain.count);
        let mut id = Some(chain.head);
        while let Some(cur) = id {
            out.push(self.text(cur).to_vec());
            if cur == chain.tail {
                break;
            }
            id = self.arena[cur.index()].next;
        }
        out
    }

    /// Build a detached chain from owned line texts. Returns `None` for an
    /// empty slice.
    pub fn chain_from_texts(&mut self, texts: &[Vec<u8>]) -> Option<Detached> {
        let mut head = None;
        let mut tail: Option<LineId> = None;
        for t in texts {
            let id = self.alloc_with_text(t);
            if let Some(prev) = tail {
                self.link(prev, id);
            } else {
                head = Some(id);
            }
            tail = Some(id);
        }
        match (head, tail) {
            (Some(h), Some(t)) => Some(Detached {
                head: h,
                tail: t,
                count: texts.len(),
            }),
            _ => None,
        }
    }

    // ---- structural edits ----------------------------------------------

    fn link(&mut self, a: LineId, b: LineId) {
        self.arena[a.index()].next = Some(b);
        self.arena[b.index()].prev = Some(a);
    }

    /// Unlink `count` lines starting at `first`, keeping their internal
    /// links intact. The tail of the list is renumbered. `count` is clamped
    /// to the lines actually present.
    pub fn detach(&mut self, first: LineId, count: usize) -> Detached {
        debug_assert!(!self.is_line0(first) && !self.is_lastline(first));
        let mut tail = first;
        let mut n = 1usize;
        while n < count {
            let next = self.arena[tail.index()].next.expect("attached");
            if self.is_lastline(next) {
                break;
            }
            tail = next;
            n += 1;
        }
        let before = self.arena[first.index()].prev.expect("attached");
        let after = self.arena[tail.index()].next.expect("attached");
        self.link(before, after);
        self.arena[first.index()].prev = None;
        self.arena[tail.index()].next = None;
        self.nlines -= n;
        self.renumber_after(before);
        Detached {
            head: first,
            tail,
            count: n,
        }
    }

    /// Splice a detached chain in before `anchor` (which may be the
    /// lastline sentinel). The tail of the list is renumbered.
    pub fn attach_before(&mut self, anchor: LineId, chain: Detached) {
        debug_assert!(!self.is_line0(anchor));
        let before = self.arena[anchor.index()].prev.expect("attached");
        self.link(before, chain.head);
        self.link(chain.tail, anchor);
        self.nlines += chain.count;
        self.renumber_after(before);
    }

    /// Reassign consecutive numbers to every line after `from` (exclusive).
    fn renumber_after(&mut self, from: LineId) {
        let mut n = self.arena[from.index()].number;
        if self.is_lastline(from) {
            return;
        }
        let mut id = self.arena[from.index()].next;
        while let Some(cur) = id {
            if self.is_lastline(cur) {
                break;
            }
            n += 1;
            self.arena[cur.index()].number = n;
            id = self.arena[cur.index()].next;
        }
    }

    // ---- primitive motions ---------------------------------------------

    /// Advance one byte, crossing line boundaries.
    pub fn inc(&self, pos: &mut Position) -> MoveResult {
        let len = self.len(pos.line);
        if pos.index < len {
            pos.index += 1;
            return if pos.index == len {
                MoveResult::Eol
            } else {
                MoveResult::SameLine
            };
        }
        match self.next(pos.line) {
            Some(next) if !self.is_lastline(next) => {
                pos.line = next;
                pos.index = 0;
                MoveResult::ChangedLine
            }
            _ => MoveResult::NoMove,
        }
    }

    /// Retreat one byte, crossing line boundaries (landing on the
    /// end-of-line slot of the previous line).
    pub fn dec(&self, pos: &mut Position) -> MoveResult {
        if pos.index > 0 {
            pos.index -= 1;
            return MoveResult::SameLine;
        }
        match self.prev(pos.line) {
            Some(prev) if !self.is_line0(prev) => {
                pos.line = prev;
                pos.index = self.len(prev);
                MoveResult::ChangedLine
            }
            _ => MoveResult::NoMove,
        }
    }

    /// Iterate attached real lines from `from` (inclusive) forward.
    pub fn iter_from(&self, from: LineId) -> LineIter<'_> {
        LineIter {
            set: self,
            cur: if self.is_lastline(from) {
                None
            } else {
                Some(from)
            },
        }
    }

    /// Walk the whole set verifying the numbering and link invariants.
    /// Used by tests and the consistency check behind internal errors.
    pub fn check_consistency(&self) -> Result<(), String> {
        let mut id = self.line0;
        let mut count = 0usize;
        loop {
            let line = &self.arena[id.index()];
            if line.free {
                return Err(format!("{id} attached but free"));
            }
            if let Some(next) = line.next {
                if self.arena[next.index()].prev != Some(id) {
                    return Err(format!("{id}.next.prev mismatch"));
                }
                if !self.is_lastline(next) {
                    count += 1;
                }
                if self.arena[next.index()].number <= line.number {
                    return Err(format!("numbering not increasing at {next}"));
                }
                id = next;
            } else {
                break;
            }
        }
        if !self.is_lastline(id) {
            return Err("list does not end at lastline".into());
        }
        if count != self.nlines {
            return Err(format!("nlines {} != walked {count}", self.nlines));
        }
        Ok(())
    }
}

pub struct LineIter<'a> {
    set: &'a LineSet,
    cur: Option<LineId>,
}

impl Iterator for LineIter<'_> {
    type Item = LineId;

    fn next(&mut self) -> Option<LineId> {
        let cur = self.cur?;
        let next = self.set.next(cur);
        self.cur = match next {
            Some(n) if !self.set.is_lastline(n) => Some(n),
            _ => None,
        };
        Some(cur)
    }
}

/// Grow a text vector's capacity in MEMCHUNK steps.
fn reserve_chunked(text: &mut Vec<u8>, extra: usize) {
    let want = text.len() + extra;
    if want > text.capacity() {
        let rounded = want.div_ceil(MEMCHUNK) * MEMCHUNK;
        text.reserve_exact(rounded - text.len());
    }
}
