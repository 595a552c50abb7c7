//! Bracketed composite changes with bounded undo/redo history.
//!
//! Every buffer mutation happens between `start_command` and `end_command`.
//! The primitives (`replchars`, `repllines`, `replbuffer`) record enough to
//! reverse themselves; a composite is the LIFO of records between the
//! outermost bracket pair, headed by a `Position` record so the cursor can
//! be put back. Undo replays the inverses in reverse order and pushes the
//! produced inverse composite onto the redo stack; redo is the same
//! machinery pointed the other way.
//!
//! Lines detached from the buffer stay pinned in the arena and are owned by
//! the change record that detached them, until the record itself is dropped
//! off the bottom of a stack.

use core_text::{Detached, LineId, Position};
use thiserror::Error;
use tracing::trace;

use crate::Buffer;

/// Hard cap on retained composite changes per stack.
pub const MAX_UNDO: usize = 100;
/// Floor for the `undolevels` parameter.
pub const MIN_UNDO: usize = 10;

#[derive(Debug, Error)]
pub enum ChangeError {
    #[error("no changes to undo")]
    NothingToUndo,
    #[error("no changes to redo")]
    NothingToRedo,
    #[error("change outside start_command/end_command bracket")]
    NotBracketed,
}

/// One reversible step of a composite change.
#[derive(Debug)]
pub enum Change {
    /// `nlines` lines now sit at `lineno` where `old` (possibly nothing)
    /// used to be. Undo removes them and restitches `old`.
    Lines {
        lineno: u64,
        nlines: usize,
        old: Option<Detached>,
    },
    /// `count` bytes were inserted at (`lineno`, `index`). Undo deletes
    /// them; no text needs storing.
    InsChars {
        lineno: u64,
        index: usize,
        count: usize,
    },
    /// `chars` were deleted at (`lineno`, `index`). Undo reinserts them.
    DelChars {
        lineno: u64,
        index: usize,
        chars: Vec<u8>,
    },
    /// Cursor location at the start of the composite; no buffer change.
    Position { lineno: u64, index: usize },
}

/// Per-buffer undo state: bracket depth, the composite being built, and
/// the two capped stacks.
#[derive(Debug, Default)]
pub struct ChangeData {
    depth: u32,
    total_lines: i64,
    building: Vec<Change>,
    undo: Vec<Vec<Change>>,
    redo: Vec<Vec<Change>>,
    limit: usize,
}

impl ChangeData {
    pub fn new() -> Self {
        Self {
            limit: MAX_UNDO,
            ..Self::default()
        }
    }

    pub fn in_command(&self) -> bool {
        self.depth > 0
    }

    pub fn can_undo(&self) -> bool {
        !self.undo.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo.is_empty()
    }

    pub fn undo_depth(&self) -> usize {
        self.undo.len()
    }

    pub fn redo_depth(&self) -> usize {
        self.redo.len()
    }
}

impl Buffer {
    /// Open a composite change bracket. Nested brackets are counted; only
    /// the outermost pair delimits one undoable unit.
    pub fn start_command(&mut self, cursor: Position) {
        let cd = &mut self.changes;
        if cd.depth == 0 {
            cd.total_lines = 0;
            cd.building.clear();
            cd.building.push(Change::Position {
                lineno: self.lines.lineno(cursor.line),
                index: cursor.index,
            });
        }
        cd.depth += 1;
    }

    /// Close a bracket. The outermost close commits the composite and
    /// returns the net line delta for "N more/fewer lines" reporting;
    /// inner closes return `None`.
    pub fn end_command(&mut self) -> Option<i64> {
        debug_assert!(self.changes.depth > 0, "unbalanced end_command");
        if self.changes.depth == 0 {
            return None;
        }
        self.changes.depth -= 1;
        if self.changes.depth > 0 {
            return None;
        }
        let composite = std::mem::take(&mut self.changes.building);
        if composite.len() <= 1 {
            // Nothing but the position sentinel: not an undoable change.
            self.free_composite(composite);
            return Some(0);
        }
        // A new top-level mutation invalidates the redo history.
        let stale = std::mem::take(&mut self.changes.redo);
        for comp in stale {
            self.free_composite(comp);
        }
        self.changes.undo.push(composite);
        while self.changes.undo.len() > self.changes.limit {
            let oldest = self.changes.undo.remove(0);
            self.free_composite(oldest);
            trace!(target: "state.undo", "oldest composite dropped");
        }
        trace!(
            target: "state.undo",
            undo_depth = self.changes.undo.len(),
            total_lines = self.changes.total_lines,
            "composite committed"
        );
        Some(self.changes.total_lines)
    }

    /// Abandon the composite being built, restoring the buffer to its
    /// state at the outermost `start_command`. Used when an operation
    /// fails partway.
    pub fn abort_command(&mut self) {
        if self.changes.depth == 0 {
            return;
        }
        self.changes.depth = 0;
        let composite = std::mem::take(&mut self.changes.building);
        let (inverse, _) = self.replay(composite, Position::new(self.lines.first(), 0));
        self.free_composite(inverse);
        trace!(target: "state.undo", "composite aborted");
    }

    /// Drop all undo/redo history, releasing the lines it owns. Used
    /// when a buffer's content is replaced wholesale (`:e`).
    pub fn clear_undo_history(&mut self) {
        let undo = std::mem::take(&mut self.changes.undo);
        let redo = std::mem::take(&mut self.changes.redo);
        for comp in undo.into_iter().chain(redo) {
            self.free_composite(comp);
        }
    }

    /// Set the retained-history limit from the `undolevels` parameter.
    pub fn set_undo_levels(&mut self, levels: usize) {
        let limit = levels.clamp(MIN_UNDO, MAX_UNDO);
        self.changes.limit = limit;
        while self.changes.undo.len() > limit {
            let oldest = self.changes.undo.remove(0);
            self.free_composite(oldest);
        }
    }

    // ---- change primitives ----------------------------------------------

    /// Within one line, delete `n_del` bytes at `index` and insert `ins`
    /// in their place. Never crosses a line boundary: callers split lines
    /// with [`Buffer::repllines`] first.
    pub fn replchars(&mut self, line: LineId, index: usize, n_del: usize, ins: &[u8]) {
        debug_assert!(self.changes.in_command(), "replchars outside bracket");
        let lineno = self.lines.lineno(line);
        let removed = self.splice_raw(line, index, n_del, ins);
        if !removed.is_empty() {
            self.changes.building.push(Change::DelChars {
                lineno,
                index,
                chars: removed,
            });
        }
        if !ins.is_empty() {
            self.changes.building.push(Change::InsChars {
                lineno,
                index,
                count: ins.len(),
            });
        }
    }

    /// Delete `n_del` lines starting at `anchor` and splice `new` in
    /// before that point. `anchor` may be the lastline sentinel when
    /// appending at the end of the buffer (with `n_del` 0).
    pub fn repllines(&mut self, anchor: LineId, n_del: usize, new: Option<Detached>) {
        debug_assert!(self.changes.in_command(), "repllines outside bracket");
        let lineno = if self.lines.is_lastline(anchor) {
            self.lines.count() as u64 + 1
        } else {
            self.lines.lineno(anchor)
        };
        let (old, nlines) = self.lines_raw(lineno, n_del, new);
        self.changes.building.push(Change::Lines {
            lineno,
            nlines,
            old,
        });
    }

    /// Replace the entire visible content of the buffer with `new`.
    pub fn replbuffer(&mut self, new: Option<Detached>) {
        let first = self.lines.first();
        let count = self.lines.count();
        self.repllines(first, count, new);
    }

    // ---- undo / redo -----------------------------------------------------

    /// Reverse the most recent composite. Returns the cursor location
    /// recorded at its start, or an error when the stack is empty.
    pub fn undo(&mut self, cursor: Position) -> Result<(u64, usize, i64), ChangeError> {
        let composite = self.changes.undo.pop().ok_or(ChangeError::NothingToUndo)?;
        self.changes.total_lines = 0;
        let (inverse, target) = self.replay(composite, cursor);
        self.changes.redo.push(inverse);
        trace!(
            target: "state.undo",
            undo_depth = self.changes.undo.len(),
            redo_depth = self.changes.redo.len(),
            "undo"
        );
        Ok((target.0, target.1, self.changes.total_lines))
    }

    /// Re-apply the most recently undone composite.
    pub fn redo(&mut self, cursor: Position) -> Result<(u64, usize, i64), ChangeError> {
        let composite = self.changes.redo.pop().ok_or(ChangeError::NothingToRedo)?;
        self.changes.total_lines = 0;
        let (inverse, target) = self.replay(composite, cursor);
        self.changes.undo.push(inverse);
        trace!(
            target: "state.undo",
            undo_depth = self.changes.undo.len(),
            redo_depth = self.changes.redo.len(),
            "redo"
        );
        Ok((target.0, target.1, self.changes.total_lines))
    }

    /// Apply the inverse of each record in reverse order, building the
    /// inverse composite (headed by a `Position` carrying `cursor`).
    fn replay(&mut self, composite: Vec<Change>, cursor: Position) -> (Vec<Change>, (u64, usize)) {
        let mut inverse = vec![Change::Position {
            lineno: self.lines.lineno(cursor.line),
            index: cursor.index,
        }];
        let mut target = (self.lines.lineno(cursor.line), cursor.index);
        for change in composite.into_iter().rev() {
            match change {
                Change::Position { lineno, index } => {
                    target = (lineno, index);
                }
                Change::InsChars {
                    lineno,
                    index,
                    count,
                } => {
                    let line = self.lines.line_at(lineno);
                    let removed = self.splice_raw(line, index, count, b"");
                    inverse.push(Change::DelChars {
                        lineno,
                        index,
                        chars: removed,
                    });
                }
                Change::DelChars {
                    lineno,
                    index,
                    chars,
                } => {
                    let line = self.lines.line_at(lineno);
                    self.splice_raw(line, index, 0, &chars);
                    inverse.push(Change::InsChars {
                        lineno,
                        index,
                        count: chars.len(),
                    });
                }
                Change::Lines {
                    lineno,
                    nlines,
                    old,
                } => {
                    let (removed, attached) = self.lines_raw(lineno, nlines, old);
                    inverse.push(Change::Lines {
                        lineno,
                        nlines: attached,
                        old: removed,
                    });
                }
            }
        }
        (inverse, target)
    }

    // ---- raw operations (shared by primitives and replay) ---------------

    /// Splice within a line, shifting or clamping marks on it and marking
    /// it dirty. Returns the removed bytes.
    fn splice_raw(&mut self, line: LineId, index: usize, n_del: usize, ins: &[u8]) -> Vec<u8> {
        let len = self.lines.len(line);
        let n_del = n_del.min(len.saturating_sub(index));
        let removed = self.lines.text(line)[index..index + n_del].to_vec();
        self.lines.splice_text(line, index, n_del, ins);
        self.marks.adjust_in_line(line, index, n_del, ins.len());
        self.dirty.mark(self.lines.lineno(line));
        self.flags.insert(crate::BufferFlags::MODIFIED);
        removed
    }

    /// Remove `n_del` lines at line number `lineno` and attach `new` in
    /// their place. Guarantees at least one line remains (splicing in a
    /// fresh empty line counted in the result). Returns the detached old
    /// chain and the number of lines now present for this change.
    fn lines_raw(
        &mut self,
        lineno: u64,
        n_del: usize,
        new: Option<Detached>,
    ) -> (Option<Detached>, usize) {
        let count = self.lines.count() as u64;
        let old = if n_del > 0 && lineno <= count {
            let first = self.lines.line_at(lineno);
            let chain = self.lines.detach(first, n_del);
            let mut id = Some(chain.head);
            while let Some(cur) = id {
                self.marks.clear_line(cur);
                id = if cur == chain.tail {
                    None
                } else {
                    self.lines.next(cur)
                };
            }
            self.changes.total_lines -= chain.count as i64;
            Some(chain)
        } else {
            None
        };
        let anchor = if lineno > self.lines.count() as u64 {
            self.lines.lastline()
        } else {
            self.lines.line_at(lineno)
        };
        let mut attached = 0usize;
        if let Some(chain) = new {
            self.lines.attach_before(anchor, chain);
            let mut id = Some(chain.head);
            while let Some(cur) = id {
                self.marks.restore_line(cur);
                id = if cur == chain.tail {
                    None
                } else {
                    self.lines.next(cur)
                };
            }
            attached = chain.count;
            self.changes.total_lines += chain.count as i64;
        }
        if self.lines.count() == 0 {
            // A buffer never goes below one (empty) line.
            let fresh = self.lines.alloc_line(0);
            let lastline = self.lines.lastline();
            self.lines.attach_before(
                lastline,
                Detached {
                    head: fresh,
                    tail: fresh,
                    count: 1,
                },
            );
            attached += 1;
            self.changes.total_lines += 1;
        }
        self.dirty.mark_from(lineno.max(1));
        self.flags.insert(crate::BufferFlags::MODIFIED);
        (old, attached)
    }

    /// Release every detached chain owned by a composite's records.
    fn free_composite(&mut self, composite: Vec<Change>) {
        for change in composite {
            if let Change::Lines {
                old: Some(chain), ..
            } = change
            {
                self.lines.free_chain(chain);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Buffer;
    use core_text::Position;
    use pretty_assertions::assert_eq;

    fn buffer_with(lines: &[&str]) -> Buffer {
        let mut b = Buffer::new();
        let texts: Vec<Vec<u8>> = lines.iter().map(|l| l.as_bytes().to_vec()).collect();
        let cursor = Position::new(b.lines.first(), 0);
        b.start_command(cursor);
        let chain = b.lines.chain_from_texts(&texts);
        b.replbuffer(chain);
        b.end_command();
        b.set_modified(false);
        b
    }

    fn contents(b: &Buffer) -> Vec<String> {
        b.lines
            .iter_from(b.lines.first())
            .map(|id| String::from_utf8(b.lines.text(id).to_vec()).unwrap())
            .collect()
    }

    fn cursor0(b: &Buffer) -> Position {
        Position::new(b.lines.first(), 0)
    }

    #[test]
    fn replchars_and_undo_redo() {
        let mut b = buffer_with(&["hello world"]);
        let first = b.lines.first();
        let c = cursor0(&b);
        b.start_command(c);
        b.replchars(first, 6, 5, b"there");
        b.end_command();
        assert_eq!(contents(&b), vec!["hello there"]);

        let (lineno, index, _) = b.undo(Position::new(first, 6)).unwrap();
        assert_eq!(contents(&b), vec!["hello world"]);
        assert_eq!((lineno, index), (1, 0));

        b.redo(cursor0(&b)).unwrap();
        assert_eq!(contents(&b), vec!["hello there"]);
    }

    #[test]
    fn repllines_delete_and_undo_restores_order() {
        let mut b = buffer_with(&["one", "two", "three"]);
        let second = b.lines.next(b.lines.first()).unwrap();
        b.start_command(cursor0(&b));
        b.repllines(second, 1, None);
        let report = b.end_command();
        assert_eq!(report, Some(-1));
        assert_eq!(contents(&b), vec!["one", "three"]);

        b.undo(cursor0(&b)).unwrap();
        assert_eq!(contents(&b), vec!["one", "two", "three"]);
        b.lines.check_consistency().unwrap();
    }

    #[test]
    fn composite_of_mixed_changes_is_atomic() {
        let mut b = buffer_with(&["alpha", "beta"]);
        let first = b.lines.first();
        b.start_command(cursor0(&b));
        b.replchars(first, 0, 0, b">> ");
        let second = b.lines.next(first).unwrap();
        b.repllines(second, 1, None);
        b.replchars(first, 8, 0, b"!");
        b.end_command();
        assert_eq!(contents(&b), vec![">> alpha!"]);

        b.undo(cursor0(&b)).unwrap();
        assert_eq!(contents(&b), vec!["alpha", "beta"]);
        b.redo(cursor0(&b)).unwrap();
        assert_eq!(contents(&b), vec![">> alpha!"]);
    }

    #[test]
    fn deleting_all_lines_leaves_one_empty() {
        let mut b = buffer_with(&["a", "b"]);
        b.start_command(cursor0(&b));
        let first = b.lines.first();
        b.repllines(first, 2, None);
        b.end_command();
        assert_eq!(contents(&b), vec![""]);

        b.undo(cursor0(&b)).unwrap();
        assert_eq!(contents(&b), vec!["a", "b"]);
        b.redo(cursor0(&b)).unwrap();
        assert_eq!(contents(&b), vec![""]);
    }

    #[test]
    fn new_change_clears_redo() {
        let mut b = buffer_with(&["x"]);
        let first = b.lines.first();
        b.start_command(cursor0(&b));
        b.replchars(first, 0, 0, b"1");
        b.end_command();
        b.undo(cursor0(&b)).unwrap();
        assert!(b.changes.can_redo());

        b.start_command(cursor0(&b));
        b.replchars(b.lines.first(), 0, 0, b"2");
        b.end_command();
        assert!(!b.changes.can_redo());
    }

    #[test]
    fn nested_brackets_commit_once() {
        let mut b = buffer_with(&["x"]);
        let first = b.lines.first();
        b.start_command(cursor0(&b));
        b.start_command(cursor0(&b));
        b.replchars(first, 0, 0, b"a");
        assert_eq!(b.end_command(), None);
        b.replchars(first, 0, 0, b"b");
        assert!(b.end_command().is_some());
        assert_eq!(b.changes.undo_depth(), 1);
        b.undo(cursor0(&b)).unwrap();
        assert_eq!(contents(&b), vec!["x"]);
    }

    #[test]
    fn abort_rolls_back_partial_composite() {
        let mut b = buffer_with(&["keep"]);
        let first = b.lines.first();
        b.start_command(cursor0(&b));
        b.replchars(first, 0, 4, b"drop");
        let chain = b.lines.chain_from_texts(&[b"junk".to_vec()]);
        b.repllines(b.lines.lastline(), 0, chain);
        b.abort_command();
        assert_eq!(contents(&b), vec!["keep"]);
        assert_eq!(b.changes.undo_depth(), 0);
        b.lines.check_consistency().unwrap();
    }

    #[test]
    fn history_is_capped() {
        let mut b = buffer_with(&["x"]);
        b.set_undo_levels(MIN_UNDO);
        for _ in 0..MIN_UNDO + 5 {
            let first = b.lines.first();
            b.start_command(cursor0(&b));
            b.replchars(first, 0, 0, b"y");
            b.end_command();
        }
        assert_eq!(b.changes.undo_depth(), MIN_UNDO);
    }

    #[test]
    fn mark_survives_delete_and_undo() {
        let mut b = buffer_with(&["one", "two", "three"]);
        let second = b.lines.next(b.lines.first()).unwrap();
        b.marks.set(b'a', Position::new(second, 1));
        b.start_command(cursor0(&b));
        b.repllines(second, 1, None);
        b.end_command();
        assert!(b.marks.get(b'a').is_none());

        b.undo(cursor0(&b)).unwrap();
        let m = b.marks.get(b'a').expect("mark restored by undo");
        assert_eq!(m.index, 1);
        assert_eq!(b.lines.lineno(m.line), 2);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        #[derive(Debug, Clone)]
        enum Op {
            Insert(u8, Vec<u8>),
            DeleteLine(u8),
            Edit(u8, Vec<u8>),
        }

        fn op_strategy() -> impl Strategy<Value = Op> {
            prop_oneof![
                (any::<u8>(), prop::collection::vec(b'a'..=b'z', 0..6))
                    .prop_map(|(at, text)| Op::Insert(at, text)),
                any::<u8>().prop_map(Op::DeleteLine),
                (any::<u8>(), prop::collection::vec(b'a'..=b'z', 0..4))
                    .prop_map(|(at, text)| Op::Edit(at, text)),
            ]
        }

        fn apply(b: &mut Buffer, op: &Op) {
            let count = b.lines.count() as u64;
            b.start_command(Position::new(b.lines.first(), 0));
            match op {
                Op::Insert(at, text) => {
                    let lineno = (*at as u64 % (count + 1)) + 1;
                    let chain = b.lines.chain_from_texts(&[text.clone()]).unwrap();
                    let anchor = if lineno > count {
                        b.lines.lastline()
                    } else {
                        b.lines.line_at(lineno)
                    };
                    b.repllines(anchor, 0, Some(chain));
                }
                Op::DeleteLine(at) => {
                    let lineno = (*at as u64 % count) + 1;
                    let line = b.lines.line_at(lineno);
                    b.repllines(line, 1, None);
                }
                Op::Edit(at, text) => {
                    let lineno = (*at as u64 % count) + 1;
                    let line = b.lines.line_at(lineno);
                    let len = b.lines.len(line);
                    b.replchars(line, len / 2, len - len / 2, text);
                }
            }
            b.end_command();
        }

        proptest! {
            /// Invariant 3: n composites followed by n undos restores the
            /// original content; n redos restores the final content.
            #[test]
            fn undo_redo_round_trip(ops in prop::collection::vec(op_strategy(), 1..12)) {
                let mut b = buffer_with(&["seed one", "seed two"]);
                let before = contents(&b);
                for op in &ops {
                    apply(&mut b, op);
                    prop_assert!(b.lines.check_consistency().is_ok());
                }
                let after = contents(&b);
                for _ in 0..ops.len() {
                    b.undo(Position::new(b.lines.first(), 0)).unwrap();
                    prop_assert!(b.lines.check_consistency().is_ok());
                }
                prop_assert_eq!(contents(&b), before);
                for _ in 0..ops.len() {
                    b.redo(Position::new(b.lines.first(), 0)).unwrap();
                }
                prop_assert_eq!(contents(&b), after);
            }
        }
    }
}
