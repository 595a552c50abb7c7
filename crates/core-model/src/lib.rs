//! Windows: tiled viewports onto buffers, sharing one virtual screen.
//!
//! Windows are kept in top-to-bottom screen order. Each owns a row span
//! `[winpos, cmdline]` whose last row is its status line; the spans of
//! the displayed windows partition the screen exactly. A window may be
//! squeezed to zero rows (hidden), in which case `winpos == cmdline == 0`
//! and it is skipped when cycling. The current window is never hidden.

use core_text::{Flexbuf, LineId, Position};
use thiserror::Error;
use tracing::debug;

/// Smallest useful window: one text row plus the status line.
pub const MINROWS: usize = 2;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WindowError {
    #[error("Not enough room")]
    NoRoom,
    #[error("Cannot close last window")]
    LastWindow,
}

/// Index of a buffer in the editor's buffer table.
pub type BufferId = usize;

/// One viewport onto a buffer.
#[derive(Debug)]
pub struct Window {
    pub buffer: BufferId,
    pub cursor: Position,
    /// Sticky column restored by vertical motions.
    pub want_col: usize,
    /// Recompute `want_col` from the cursor at the next opportunity.
    pub set_want_col: bool,
    /// Screen column of the cursor before line wrapping.
    pub virt_col: usize,
    /// First and last buffer lines framed by the window.
    pub topline: LineId,
    pub botline: LineId,
    /// First screen row of the window's span.
    pub winpos: usize,
    /// Rows in the span, status line included. 0 = hidden.
    pub nrows: usize,
    /// Row holding the status line (last row of the span).
    pub cmdline: usize,
    pub ncols: usize,
    /// Status-line text, rebuilt on demand.
    pub status: Flexbuf,
    /// Echo of a partially typed command (counts, operators).
    pub cmd_echo: Vec<u8>,
}

impl Window {
    fn new(buffer: BufferId, topline: LineId, ncols: usize) -> Self {
        Self {
            buffer,
            cursor: Position::new(topline, 0),
            want_col: 0,
            set_want_col: true,
            virt_col: 0,
            topline,
            botline: topline,
            winpos: 0,
            nrows: 0,
            cmdline: 0,
            ncols,
            status: Flexbuf::new(),
            cmd_echo: Vec::new(),
        }
    }

    pub fn is_hidden(&self) -> bool {
        self.nrows == 0
    }

    /// Text rows (the span minus the status line).
    pub fn text_rows(&self) -> usize {
        self.nrows.saturating_sub(1)
    }
}

/// The set of windows tiling one virtual screen.
pub struct WindowLayout {
    windows: Vec<Window>,
    current: usize,
    screen_rows: usize,
    screen_cols: usize,
}

impl WindowLayout {
    /// The first window opens full screen.
    pub fn new(buffer: BufferId, topline: LineId, rows: usize, cols: usize) -> Self {
        let mut w = Window::new(buffer, topline, cols);
        w.nrows = rows;
        w.winpos = 0;
        w.cmdline = rows.saturating_sub(1);
        Self {
            windows: vec![w],
            current: 0,
            screen_rows: rows,
            screen_cols: cols,
        }
    }

    pub fn screen_rows(&self) -> usize {
        self.screen_rows
    }

    pub fn screen_cols(&self) -> usize {
        self.screen_cols
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    pub fn current_index(&self) -> usize {
        self.current
    }

    pub fn current(&self) -> &Window {
        &self.windows[self.current]
    }

    pub fn current_mut(&mut self) -> &mut Window {
        &mut self.windows[self.current]
    }

    pub fn get(&self, i: usize) -> &Window {
        &self.windows[i]
    }

    pub fn get_mut(&mut self, i: usize) -> &mut Window {
        &mut self.windows[i]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Window> {
        self.windows.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Window> {
        self.windows.iter_mut()
    }

    /// Windows viewing `buffer`.
    pub fn windows_on(&self, buffer: BufferId) -> impl Iterator<Item = usize> + '_ {
        self.windows
            .iter()
            .enumerate()
            .filter(move |(_, w)| w.buffer == buffer)
            .map(|(i, _)| i)
    }

    /// Next displayed window after `i`, cycling; skips hidden windows.
    pub fn next_displayed(&self, i: usize) -> usize {
        let n = self.windows.len();
        for step in 1..=n {
            let j = (i + step) % n;
            if !self.windows[j].is_hidden() {
                return j;
            }
        }
        i
    }

    pub fn focus(&mut self, i: usize) {
        if !self.windows[i].is_hidden() {
            self.current = i;
        }
    }

    pub fn focus_next(&mut self) {
        self.current = self.next_displayed(self.current);
    }

    /// Recompute row offsets from the accumulated `nrows`. Hidden
    /// windows get zeroed positions.
    fn relayout(&mut self) {
        let mut row = 0;
        for w in &mut self.windows {
            if w.nrows == 0 {
                w.winpos = 0;
                w.cmdline = 0;
            } else {
                w.winpos = row;
                w.cmdline = row + w.nrows - 1;
                row += w.nrows;
            }
            w.ncols = self.screen_cols;
        }
        debug_assert_eq!(row, self.screen_rows, "window rows must tile the screen");
    }

    /// Split the current window, giving the upper part to a new window
    /// on `buffer`, which becomes current. If the current window is too
    /// short it is first grown at its neighbours' expense.
    pub fn open_window(
        &mut self,
        buffer: BufferId,
        topline: LineId,
        size_hint: Option<usize>,
    ) -> Result<usize, WindowError> {
        if self.windows[self.current].nrows < 2 * MINROWS {
            let need = 2 * MINROWS - self.windows[self.current].nrows;
            if self.resize(self.current, need as isize) < need as isize {
                return Err(WindowError::NoRoom);
            }
        }
        let cur_rows = self.windows[self.current].nrows;
        let mut new_rows = size_hint.unwrap_or(cur_rows / 2).max(MINROWS);
        if new_rows > cur_rows - MINROWS {
            new_rows = cur_rows - MINROWS;
        }
        let mut w = Window::new(buffer, topline, self.screen_cols);
        w.nrows = new_rows;
        self.windows[self.current].nrows = cur_rows - new_rows;
        self.windows.insert(self.current, w);
        self.relayout();
        debug!(target: "model.windows", count = self.windows.len(), "window opened");
        Ok(self.current)
    }

    /// Close window `i`, returning its rows to an adjacent displayed
    /// sibling (preferring the smaller one).
    pub fn close_window(&mut self, i: usize) -> Result<Window, WindowError> {
        if self.windows.iter().filter(|w| !w.is_hidden()).count() <= 1 {
            return Err(WindowError::LastWindow);
        }
        let rows = self.windows[i].nrows;
        let above = (0..i).rev().find(|&j| !self.windows[j].is_hidden());
        let below = (i + 1..self.windows.len()).find(|&j| !self.windows[j].is_hidden());
        let heir = match (above, below) {
            (Some(a), Some(b)) => {
                if self.windows[a].nrows <= self.windows[b].nrows {
                    a
                } else {
                    b
                }
            }
            (Some(a), None) => a,
            (None, Some(b)) => b,
            (None, None) => return Err(WindowError::LastWindow),
        };
        self.windows[heir].nrows += rows;
        let closed = self.windows.remove(i);
        if self.current == i {
            self.current = if heir > i { heir - 1 } else { heir };
        } else if self.current > i {
            self.current -= 1;
        }
        self.relayout();
        self.ensure_current_displayed();
        Ok(closed)
    }

    /// Divide the screen evenly among the first `n` displayed windows
    /// (all of them when `n` is 0 or too large).
    pub fn equalise(&mut self, n: usize) {
        let displayed: Vec<usize> = (0..self.windows.len())
            .filter(|&i| !self.windows[i].is_hidden())
            .collect();
        let n = if n == 0 { displayed.len() } else { n.min(displayed.len()) };
        if n == 0 {
            return;
        }
        // Windows beyond the first n hide.
        for &i in &displayed[n..] {
            self.windows[i].nrows = 0;
        }
        let share = self.screen_rows / n;
        let mut extra = self.screen_rows % n;
        for &i in &displayed[..n] {
            self.windows[i].nrows = share + usize::from(extra > 0);
            extra = extra.saturating_sub(1);
        }
        self.relayout();
        self.ensure_current_displayed();
    }

    /// Grow (`delta > 0`) or shrink the window `i` by moving its status
    /// line, cascading into following windows (then preceding ones)
    /// until each hits MINROWS, and to zero rows if that is not enough.
    /// Returns the number of rows actually moved.
    pub fn resize(&mut self, i: usize, delta: isize) -> isize {
        if delta == 0 || self.windows[i].is_hidden() {
            return 0;
        }
        if delta < 0 {
            let give = (-delta) as usize;
            let give = give.min(self.windows[i].nrows.saturating_sub(MINROWS));
            if give == 0 {
                return 0;
            }
            self.windows[i].nrows -= give;
            // Hand the rows to the nearest displayed neighbour below,
            // else above.
            let heir = (i + 1..self.windows.len())
                .find(|&j| !self.windows[j].is_hidden())
                .or_else(|| (0..i).rev().find(|&j| !self.windows[j].is_hidden()));
            if let Some(j) = heir {
                self.windows[j].nrows += give;
            } else {
                self.windows[i].nrows += give;
                return 0;
            }
            self.relayout();
            return -(give as isize);
        }
        let mut need = delta as usize;
        let mut taken = 0usize;
        // Two passes: squeeze neighbours to MINROWS first, then to zero.
        for floor in [MINROWS, 0] {
            let order: Vec<usize> = (i + 1..self.windows.len()).chain((0..i).rev()).collect();
            for j in order {
                if need == 0 {
                    break;
                }
                if self.windows[j].is_hidden() {
                    continue;
                }
                let avail = self.windows[j].nrows.saturating_sub(floor);
                let grab = avail.min(need);
                if grab > 0 {
                    self.windows[j].nrows -= grab;
                    need -= grab;
                    taken += grab;
                }
            }
            if need == 0 {
                break;
            }
        }
        self.windows[i].nrows += taken;
        self.relayout();
        self.ensure_current_displayed();
        taken as isize
    }

    /// The physical screen changed size. Added rows go to the bottom
    /// displayed window after any hidden windows are revived; removed
    /// rows come off windows bottom-up, hiding them at zero rather than
    /// dropping them.
    pub fn adjust(&mut self, new_rows: usize, new_cols: usize) {
        let old = self.screen_rows;
        self.screen_rows = new_rows;
        self.screen_cols = new_cols;
        if new_rows > old {
            let mut gain = new_rows - old;
            // Revive hidden windows first, bottom-up.
            for i in (0..self.windows.len()).rev() {
                if gain < MINROWS {
                    break;
                }
                if self.windows[i].is_hidden() {
                    self.windows[i].nrows = MINROWS;
                    gain -= MINROWS;
                }
            }
            if gain > 0 {
                if let Some(i) = (0..self.windows.len())
                    .rev()
                    .find(|&i| !self.windows[i].is_hidden())
                {
                    self.windows[i].nrows += gain;
                }
            }
        } else if new_rows < old {
            let mut lose = old - new_rows;
            // Squeeze windows bottom-up to MINROWS.
            for i in (0..self.windows.len()).rev() {
                if lose == 0 {
                    break;
                }
                if self.windows[i].is_hidden() {
                    continue;
                }
                let grab = self.windows[i].nrows.saturating_sub(MINROWS).min(lose);
                self.windows[i].nrows -= grab;
                lose -= grab;
            }
            // Still short: hide windows bottom-up rather than drop them.
            for i in (0..self.windows.len()).rev() {
                if lose == 0 {
                    break;
                }
                if self.windows[i].is_hidden() {
                    continue;
                }
                let last_displayed =
                    self.windows.iter().filter(|w| !w.is_hidden()).count() == 1;
                let w = self.windows[i].nrows;
                if !last_displayed && w <= lose {
                    self.windows[i].nrows = 0;
                    lose -= w;
                } else {
                    // The survivor absorbs the remainder, even below
                    // MINROWS on a tiny screen.
                    let grab = (w - 1).min(lose);
                    self.windows[i].nrows = w - grab;
                    lose -= grab;
                }
            }
        }
        self.relayout();
        self.ensure_current_displayed();
    }

    /// The current-window pointer must never rest on a hidden window.
    fn ensure_current_displayed(&mut self) {
        if self.windows[self.current].is_hidden() {
            self.current = self.next_displayed(self.current);
        }
    }

    /// Invariant check: displayed spans tile `[0, screen_rows)` exactly.
    pub fn check_accounting(&self) -> Result<(), String> {
        let total: usize = self.windows.iter().map(|w| w.nrows).sum();
        if total != self.screen_rows {
            return Err(format!(
                "rows {} != screen {}",
                total, self.screen_rows
            ));
        }
        let mut row = 0;
        for (i, w) in self.windows.iter().enumerate() {
            if w.is_hidden() {
                if w.winpos != 0 || w.cmdline != 0 {
                    return Err(format!("hidden window {i} keeps a position"));
                }
                continue;
            }
            if w.winpos != row {
                return Err(format!("window {i} starts at {} not {row}", w.winpos));
            }
            if w.cmdline != w.winpos + w.nrows - 1 {
                return Err(format!("window {i} status row misplaced"));
            }
            row += w.nrows;
        }
        if self.windows[self.current].is_hidden() {
            return Err("current window is hidden".into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_text::LineSet;
    use pretty_assertions::assert_eq;

    fn layout(rows: usize) -> (WindowLayout, LineSet) {
        let set = LineSet::new();
        let l = WindowLayout::new(0, set.first(), rows, 80);
        (l, set)
    }

    #[test]
    fn first_window_fills_screen() {
        let (l, _s) = layout(24);
        assert_eq!(l.len(), 1);
        assert_eq!(l.current().nrows, 24);
        assert_eq!(l.current().cmdline, 23);
        l.check_accounting().unwrap();
    }

    #[test]
    fn split_halves_current_window() {
        let (mut l, s) = layout(24);
        l.open_window(0, s.first(), None).unwrap();
        assert_eq!(l.len(), 2);
        // New window is on top and current.
        assert_eq!(l.current_index(), 0);
        assert_eq!(l.get(0).nrows, 12);
        assert_eq!(l.get(1).nrows, 12);
        assert_eq!(l.get(1).winpos, 12);
        l.check_accounting().unwrap();
    }

    #[test]
    fn split_refused_when_screen_too_small() {
        let (mut l, s) = layout(3);
        assert_eq!(
            l.open_window(0, s.first(), None),
            Err(WindowError::NoRoom)
        );
    }

    #[test]
    fn close_returns_rows_to_smaller_sibling() {
        let (mut l, s) = layout(24);
        l.open_window(0, s.first(), None).unwrap(); // [12, 12]
        l.open_window(0, s.first(), None).unwrap(); // [6, 6, 12]
        l.check_accounting().unwrap();
        // Close the middle window: rows go to the smaller neighbour.
        l.close_window(1).unwrap();
        assert_eq!(l.len(), 2);
        assert_eq!(l.get(0).nrows, 12);
        assert_eq!(l.get(1).nrows, 12);
        l.check_accounting().unwrap();
    }

    #[test]
    fn cannot_close_last_window() {
        let (mut l, _s) = layout(24);
        assert_eq!(l.close_window(0).err(), Some(WindowError::LastWindow));
    }

    #[test]
    fn equalise_divides_evenly() {
        let (mut l, s) = layout(24);
        l.open_window(0, s.first(), Some(4)).unwrap();
        l.open_window(0, s.first(), Some(2)).unwrap();
        l.equalise(0);
        let rows: Vec<usize> = l.iter().map(|w| w.nrows).collect();
        assert_eq!(rows, vec![8, 8, 8]);
        l.check_accounting().unwrap();
    }

    #[test]
    fn resize_cascades_into_neighbours() {
        let (mut l, s) = layout(24);
        l.open_window(0, s.first(), None).unwrap(); // current on top: [12, 12]
        let got = l.resize(0, 6);
        assert_eq!(got, 6);
        assert_eq!(l.get(0).nrows, 18);
        assert_eq!(l.get(1).nrows, 6);
        // Grow past the neighbour's MINROWS floor: it gets squeezed to
        // zero rows, and only the rows that exist are handed over.
        let got = l.resize(0, 10);
        assert_eq!(got, 6);
        assert_eq!(l.get(0).nrows, 24);
        assert!(l.get(1).is_hidden());
        l.check_accounting().unwrap();
    }

    #[test]
    fn shrink_gives_rows_to_neighbour() {
        let (mut l, s) = layout(24);
        l.open_window(0, s.first(), None).unwrap();
        let got = l.resize(0, -4);
        assert_eq!(got, -4);
        assert_eq!(l.get(0).nrows, 8);
        assert_eq!(l.get(1).nrows, 16);
        l.check_accounting().unwrap();
    }

    #[test]
    fn screen_shrink_hides_bottom_up_and_grow_revives() {
        let (mut l, s) = layout(24);
        l.open_window(0, s.first(), None).unwrap();
        l.open_window(0, s.first(), None).unwrap();
        l.check_accounting().unwrap();

        l.adjust(5, 80);
        l.check_accounting().unwrap();
        let hidden = l.iter().filter(|w| w.is_hidden()).count();
        assert!(hidden >= 1, "shrinking far enough must hide windows");

        l.adjust(24, 80);
        l.check_accounting().unwrap();
        assert_eq!(l.iter().filter(|w| w.is_hidden()).count(), 0);
    }

    #[test]
    fn current_never_hidden() {
        let (mut l, s) = layout(24);
        l.open_window(0, s.first(), None).unwrap();
        l.focus(1);
        // Growing window 0 enough hides window 1; focus must move.
        l.resize(0, 24);
        assert!(!l.current().is_hidden());
        l.check_accounting().unwrap();
    }

    #[test]
    fn next_displayed_skips_hidden() {
        let (mut l, s) = layout(24);
        l.open_window(0, s.first(), None).unwrap();
        l.open_window(0, s.first(), None).unwrap();
        l.resize(0, 30); // hide 1 and 2 as needed
        let next = l.next_displayed(l.current_index());
        assert!(!l.get(next).is_hidden());
    }
}
