//! Editor state: buffers, the undo engine, marks and yank registers.
//!
//! A [`Buffer`] owns its line storage and everything whose lifetime is tied
//! to it: the mark table, the undo/redo stacks, and the dirty-line
//! accumulator the display pipeline drains. Buffer text is never mutated
//! directly; the only paths are the change primitives in [`undo`]
//! (`replchars` / `repllines` / `replbuffer`), which record inverse
//! operations and keep marks and dirty lines in step.

use std::path::PathBuf;

use bitflags::bitflags;
use core_text::LineSet;

pub mod marks;
pub mod registers;
pub mod undo;

pub use marks::MarkTable;
pub use registers::{RegisterContent, RegisterFile, RegisterName};
pub use undo::{ChangeData, ChangeError, MAX_UNDO};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct BufferFlags: u8 {
        /// Buffer differs from the file it was read from.
        const MODIFIED = 1 << 0;
        /// Writes require `!`.
        const READONLY = 1 << 1;
        /// Buffer may not be edited at all (e.g. `-R` plus readonly file).
        const NOEDIT   = 1 << 2;
    }
}

/// Buffer line numbers touched since the display last caught up.
///
/// Stores raw line numbers; duplicates are cheap and deduped on
/// consumption. `all` short-circuits per-line tracking after structural
/// edits that renumber the tail.
#[derive(Debug, Default)]
pub struct DirtyLines {
    lines: Vec<u64>,
    all_from: Option<u64>,
}

impl DirtyLines {
    pub fn mark(&mut self, lineno: u64) {
        self.lines.push(lineno);
    }

    /// Everything from `lineno` to the end of the buffer needs redrawing.
    pub fn mark_from(&mut self, lineno: u64) {
        self.all_from = Some(match self.all_from {
            Some(cur) => cur.min(lineno),
            None => lineno,
        });
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty() && self.all_from.is_none()
    }

    /// Consume the tracked state: sorted unique line numbers plus the
    /// optional "redraw from here" floor.
    pub fn take(&mut self) -> (Vec<u64>, Option<u64>) {
        let mut v = std::mem::take(&mut self.lines);
        v.sort_unstable();
        v.dedup();
        (v, self.all_from.take())
    }

    pub fn clear(&mut self) {
        self.lines.clear();
        self.all_from = None;
    }
}

/// An in-memory editable document.
pub struct Buffer {
    pub lines: LineSet,
    /// Name of the file being edited, if any.
    pub filename: Option<String>,
    /// Preserve-file path once one has been created.
    pub tempfname: Option<PathBuf>,
    pub flags: BufferFlags,
    /// Count of windows currently viewing this buffer.
    pub nwindows: usize,
    pub marks: MarkTable,
    pub changes: ChangeData,
    pub dirty: DirtyLines,
}

impl Default for Buffer {
    fn default() -> Self {
        Self::new()
    }
}

impl Buffer {
    pub fn new() -> Self {
        Self {
            lines: LineSet::new(),
            filename: None,
            tempfname: None,
            flags: BufferFlags::empty(),
            nwindows: 0,
            marks: MarkTable::new(),
            changes: ChangeData::new(),
            dirty: DirtyLines::default(),
        }
    }

    pub fn is_modified(&self) -> bool {
        self.flags.contains(BufferFlags::MODIFIED)
    }

    pub fn is_readonly(&self) -> bool {
        self.flags.contains(BufferFlags::READONLY)
    }

    pub fn set_modified(&mut self, yes: bool) {
        self.flags.set(BufferFlags::MODIFIED, yes);
    }

    /// Short description used by status lines: name or "No File".
    pub fn display_name(&self) -> &str {
        self.filename.as_deref().unwrap_or("No File")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dirty_lines_dedupes_and_sorts() {
        let mut d = DirtyLines::default();
        d.mark(5);
        d.mark(2);
        d.mark(5);
        let (lines, from) = d.take();
        assert_eq!(lines, vec![2, 5]);
        assert_eq!(from, None);
        assert!(d.is_empty());
    }

    #[test]
    fn dirty_from_takes_minimum() {
        let mut d = DirtyLines::default();
        d.mark_from(7);
        d.mark_from(3);
        d.mark_from(9);
        let (_, from) = d.take();
        assert_eq!(from, Some(3));
    }

    #[test]
    fn new_buffer_is_clean_single_line() {
        let b = Buffer::new();
        assert_eq!(b.lines.count(), 1);
        assert!(!b.is_modified());
        assert_eq!(b.display_name(), "No File");
    }
}
