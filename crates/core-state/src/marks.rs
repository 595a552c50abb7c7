//! Per-buffer mark table: 26 lettered slots plus the previous-context
//! mark reached by `'` and `` ` ``.
//!
//! Deleting a marked line flags the mark rather than dropping it, so an
//! undo that restitches the line brings the mark back at its original
//! position.

use core_text::{LineId, Position};

#[derive(Debug, Clone, Copy)]
struct Mark {
    pos: Position,
    deleted: bool,
}

#[derive(Debug, Default)]
pub struct MarkTable {
    slots: [Option<Mark>; 26],
    prev_context: Option<Mark>,
}

impl MarkTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a mark. `'` and `` ` `` address the previous-context slot;
    /// anything other than a lowercase letter is rejected.
    pub fn set(&mut self, name: u8, pos: Position) -> bool {
        if name == b'\'' || name == b'`' {
            self.prev_context = Some(Mark {
                pos,
                deleted: false,
            });
            return true;
        }
        if name.is_ascii_lowercase() {
            self.slots[(name - b'a') as usize] = Some(Mark {
                pos,
                deleted: false,
            });
            return true;
        }
        false
    }

    /// Record the previous-context mark before a "long" jump.
    pub fn set_prev_context(&mut self, pos: Position) {
        self.prev_context = Some(Mark {
            pos,
            deleted: false,
        });
    }

    /// Look a mark up. Returns `None` for an unknown name, an unset slot,
    /// or a mark whose line is currently deleted.
    pub fn get(&self, name: u8) -> Option<Position> {
        let mark = if name == b'\'' || name == b'`' {
            self.prev_context.as_ref()?
        } else if name.is_ascii_lowercase() {
            self.slots[(name - b'a') as usize].as_ref()?
        } else {
            return None;
        };
        if mark.deleted { None } else { Some(mark.pos) }
    }

    /// A line is being detached: flag lettered marks on it, drop the
    /// previous-context mark outright.
    pub fn clear_line(&mut self, line: LineId) {
        for slot in self.slots.iter_mut().flatten() {
            if slot.pos.line == line {
                slot.deleted = true;
            }
        }
        if self
            .prev_context
            .as_ref()
            .is_some_and(|m| m.pos.line == line)
        {
            self.prev_context = None;
        }
    }

    /// A line has been restitched by undo: reactivate marks flagged on it.
    pub fn restore_line(&mut self, line: LineId) {
        for slot in self.slots.iter_mut().flatten() {
            if slot.pos.line == line {
                slot.deleted = false;
            }
        }
    }

    /// A within-line splice happened: shift marks past the edit, clamp
    /// marks inside the removed span to its start.
    pub fn adjust_in_line(&mut self, line: LineId, index: usize, n_del: usize, n_ins: usize) {
        let fix = |m: &mut Mark| {
            if m.pos.line != line || m.pos.index < index {
                return;
            }
            if m.pos.index >= index + n_del {
                m.pos.index = m.pos.index - n_del + n_ins;
            } else {
                m.pos.index = index;
            }
        };
        for slot in self.slots.iter_mut().flatten() {
            fix(slot);
        }
        if let Some(m) = self.prev_context.as_mut() {
            fix(m);
        }
    }

    /// Forget everything (used when a buffer's content is replaced).
    pub fn clear_all(&mut self) {
        self.slots = [None; 26];
        self.prev_context = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_text::LineSet;

    fn ids(set: &LineSet) -> (LineId, LineId) {
        let a = set.first();
        (a, set.next(a).unwrap())
    }

    fn set2() -> LineSet {
        let mut s = LineSet::new();
        let chain = s
            .chain_from_texts(&[b"alpha".to_vec(), b"beta".to_vec()])
            .unwrap();
        let first = s.first();
        s.attach_before(first, chain);
        let old = s.detach(s.last(), 1);
        s.free_chain(old);
        s
    }

    #[test]
    fn set_and_get_lettered() {
        let s = set2();
        let (a, _) = ids(&s);
        let mut m = MarkTable::new();
        assert!(m.set(b'q', Position::new(a, 3)));
        assert_eq!(m.get(b'q'), Some(Position::new(a, 3)));
        assert_eq!(m.get(b'z'), None);
        assert!(!m.set(b'Q', Position::new(a, 0)));
    }

    #[test]
    fn prev_context_via_quote_and_backquote() {
        let s = set2();
        let (a, _) = ids(&s);
        let mut m = MarkTable::new();
        m.set_prev_context(Position::new(a, 2));
        assert_eq!(m.get(b'\''), Some(Position::new(a, 2)));
        assert_eq!(m.get(b'`'), Some(Position::new(a, 2)));
    }

    #[test]
    fn delete_flag_round_trip() {
        let s = set2();
        let (_, b) = ids(&s);
        let mut m = MarkTable::new();
        m.set(b'a', Position::new(b, 1));
        m.clear_line(b);
        assert_eq!(m.get(b'a'), None);
        m.restore_line(b);
        assert_eq!(m.get(b'a'), Some(Position::new(b, 1)));
    }

    #[test]
    fn splice_shifts_and_clamps() {
        let s = set2();
        let (a, _) = ids(&s);
        let mut m = MarkTable::new();
        m.set(b'x', Position::new(a, 4));
        m.set(b'y', Position::new(a, 2));
        // Delete bytes 1..3, insert one byte.
        m.adjust_in_line(a, 1, 2, 1);
        assert_eq!(m.get(b'x'), Some(Position::new(a, 3)));
        assert_eq!(m.get(b'y'), Some(Position::new(a, 1)));
    }
}
