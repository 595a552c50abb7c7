//! The virtual screen: an abstract character display the editor draws
//! into, diffed against what is physically on the device.
//!
//! Two parallel row arrays are kept: `int_lines` (what the editor wants
//! shown) and `ext_lines` (what the terminal currently shows). All
//! drawing mutates the internal image and marks rows dirty; [`VirtScr::flush`]
//! walks the dirty rows, finds the first and last differing cell of each,
//! and emits the minimal write (plus a clear-to-end-of-line when the row
//! shrank) through the [`ScreenBackend`]. After a flush the two images
//! are identical for every row, and no row shows stale cells past its
//! used count.

use bitflags::bitflags;
use tracing::trace;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct SlineFlags: u8 {
        /// Row shows buffer text.
        const TEXT     = 1 << 0;
        /// Row is a continuation / `@` / `~` marker row.
        const MARKER   = 1 << 1;
        /// Internal image differs from the external one.
        const DIRTY    = 1 << 2;
        /// Row holds a message.
        const MESSAGE  = 1 << 3;
        /// Row holds a command line being typed.
        const COMMAND  = 1 << 4;
        /// Status row of a readonly buffer.
        const READONLY = 1 << 5;
    }
}

/// Logical colour slots; each screen maps them to backend values so the
/// same name can be redefined per backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColourSlot {
    Normal = 0,
    Status = 1,
    Readonly = 2,
    System = 3,
    Tag = 4,
}

/// One screen row: text bytes with a parallel colour byte per cell.
#[derive(Debug, Clone, Default)]
pub struct Sline {
    text: Vec<u8>,
    colour: Vec<u8>,
    used: usize,
    pub flags: SlineFlags,
}

impl Sline {
    pub fn used(&self) -> usize {
        self.used
    }

    pub fn text(&self) -> &[u8] {
        &self.text[..self.used]
    }

    pub fn colours(&self) -> &[u8] {
        &self.colour[..self.used]
    }

    fn ensure(&mut self, cells: usize) {
        if self.text.len() < cells {
            self.text.resize(cells, b' ');
            self.colour.resize(cells, 0);
        }
    }

    fn put(&mut self, col: usize, ch: u8, colour: u8) {
        self.ensure(col + 1);
        if col >= self.used {
            // Cells between old used and col become spaces.
            for i in self.used..col {
                self.text[i] = b' ';
                self.colour[i] = colour;
            }
            self.used = col + 1;
        }
        self.text[col] = ch;
        self.colour[col] = colour;
    }

    fn clear_from(&mut self, col: usize) {
        self.used = self.used.min(col);
    }

    fn differs_from(&self, other: &Sline) -> bool {
        self.used != other.used
            || self.text[..self.used] != other.text[..other.used]
            || self.colour[..self.used] != other.colour[..other.used]
    }
}

/// Physical device operations the virtual screen needs. One impl per
/// backend; the minimal one only needs goto/write/clear.
pub trait ScreenBackend {
    fn size(&self) -> (usize, usize);
    fn goto(&mut self, row: usize, col: usize);
    /// Write `text` at (row, col) with per-cell colour values.
    fn write(&mut self, row: usize, col: usize, text: &[u8], colour: &[u8]);
    fn clear_to_eol(&mut self, row: usize, col: usize);
    fn clear_all(&mut self);
    /// Move rows `start..=end` up by `n` (`n < 0` moves down). Returns
    /// false when the device cannot scroll that region.
    fn scroll(&mut self, start: usize, end: usize, n: isize) -> bool;
    fn can_scroll(&self) -> bool {
        false
    }
    fn flush_output(&mut self);
    fn beep(&mut self);
    fn flash(&mut self) {
        self.beep();
    }
}

/// The screen proper.
pub struct VirtScr {
    rows: usize,
    cols: usize,
    int_lines: Vec<Sline>,
    ext_lines: Vec<Sline>,
    cursor: (usize, usize),
    /// Backend colour value for each [`ColourSlot`].
    colours: [u8; 5],
    current: ColourSlot,
}

impl VirtScr {
    pub fn new(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            int_lines: vec![Sline::default(); rows],
            ext_lines: vec![Sline::default(); rows],
            cursor: (0, 0),
            colours: [0, 1, 2, 3, 4],
            current: ColourSlot::Normal,
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn cursor(&self) -> (usize, usize) {
        self.cursor
    }

    pub fn int_line(&self, row: usize) -> &Sline {
        &self.int_lines[row]
    }

    pub fn ext_line(&self, row: usize) -> &Sline {
        &self.ext_lines[row]
    }

    /// Redefine a logical colour for this screen's backend.
    pub fn define_colour(&mut self, slot: ColourSlot, value: u8) {
        self.colours[slot as usize] = value;
    }

    pub fn set_colour(&mut self, slot: ColourSlot) {
        self.current = slot;
    }

    fn colour_value(&self) -> u8 {
        self.colours[self.current as usize]
    }

    /// Forget the external image entirely: the next flush repaints every
    /// row from the internal one (`^L`, resize, return from a subshell).
    pub fn invalidate(&mut self) {
        for ext in &mut self.ext_lines {
            ext.clear_from(0);
            ext.flags = SlineFlags::empty();
        }
        for int in &mut self.int_lines {
            int.flags.insert(SlineFlags::DIRTY);
        }
    }

    /// OR semantic flags into a row's internal image (DIRTY handling is
    /// automatic).
    pub fn int_line_flags(&mut self, row: usize, flags: SlineFlags) {
        if row < self.rows {
            self.int_lines[row].flags.insert(flags);
        }
    }

    /// Resize the grid, preserving what fits.
    pub fn resize(&mut self, rows: usize, cols: usize) {
        self.rows = rows;
        self.cols = cols;
        self.int_lines.resize(rows, Sline::default());
        self.ext_lines.resize(rows, Sline::default());
        for row in &mut self.int_lines {
            row.flags.insert(SlineFlags::DIRTY);
        }
        self.cursor.0 = self.cursor.0.min(rows.saturating_sub(1));
        self.cursor.1 = self.cursor.1.min(cols.saturating_sub(1));
    }

    // ---- drawing ---------------------------------------------------------

    pub fn goto(&mut self, row: usize, col: usize) {
        self.cursor = (row, col);
    }

    /// Hint that `text` is already on the device at (row, col) (the
    /// backend produced it as a side effect, e.g. of insert-char). Keeps
    /// the external image honest without a redraw.
    pub fn advise(&mut self, row: usize, col: usize, text: &[u8]) {
        if row >= self.rows {
            return;
        }
        let colour = self.colour_value();
        let ext = &mut self.ext_lines[row];
        for (i, &ch) in text.iter().enumerate() {
            if col + i >= self.cols {
                break;
            }
            ext.put(col + i, ch, colour);
        }
    }

    pub fn putc(&mut self, row: usize, col: usize, ch: u8) {
        self.write(row, col, std::slice::from_ref(&ch));
    }

    pub fn write(&mut self, row: usize, col: usize, text: &[u8]) {
        if row >= self.rows {
            return;
        }
        let colour = self.colour_value();
        let line = &mut self.int_lines[row];
        for (i, &ch) in text.iter().enumerate() {
            if col + i >= self.cols {
                break;
            }
            line.put(col + i, ch, colour);
        }
        line.flags.insert(SlineFlags::DIRTY);
    }

    /// Insert `text` at (row, col), shifting the tail of the row right.
    pub fn insert(&mut self, row: usize, col: usize, text: &[u8]) {
        if row >= self.rows || text.is_empty() {
            return;
        }
        let colour = self.colour_value();
        let line = &mut self.int_lines[row];
        let tail: Vec<(u8, u8)> = (col..line.used)
            .map(|i| (line.text[i], line.colour[i]))
            .collect();
        for (i, &ch) in text.iter().enumerate() {
            if col + i >= self.cols {
                break;
            }
            line.put(col + i, ch, colour);
        }
        let base = col + text.len();
        for (i, (ch, co)) in tail.into_iter().enumerate() {
            if base + i >= self.cols {
                break;
            }
            line.put(base + i, ch, co);
        }
        line.flags.insert(SlineFlags::DIRTY);
    }

    /// Clear a row from `col` to its end.
    pub fn clear_line(&mut self, row: usize, col: usize) {
        if row >= self.rows {
            return;
        }
        let line = &mut self.int_lines[row];
        line.clear_from(col);
        line.flags.insert(SlineFlags::DIRTY);
    }

    /// Clear rows `start..=end` entirely.
    pub fn clear_rows(&mut self, start: usize, end: usize) {
        for row in start..=end.min(self.rows.saturating_sub(1)) {
            self.clear_line(row, 0);
            self.int_lines[row].flags = SlineFlags::DIRTY;
        }
    }

    pub fn clear_all(&mut self, backend: &mut dyn ScreenBackend) {
        for line in &mut self.int_lines {
            line.clear_from(0);
            line.flags = SlineFlags::empty();
        }
        for line in &mut self.ext_lines {
            line.clear_from(0);
            line.flags = SlineFlags::empty();
        }
        backend.clear_all();
    }

    // ---- scrolling -------------------------------------------------------

    /// Can the device shift `start..=end` by `n` rows?
    pub fn can_scroll(&self, backend: &dyn ScreenBackend) -> bool {
        backend.can_scroll()
    }

    /// Scroll rows `start..=end`; positive `n` moves text up. Both
    /// images move together with the device, so only the vacated rows
    /// need repainting. Returns false (with nothing changed) when the
    /// device cannot do it.
    pub fn scroll(
        &mut self,
        backend: &mut dyn ScreenBackend,
        start: usize,
        end: usize,
        n: isize,
    ) -> bool {
        if n == 0 || start > end || end >= self.rows {
            return false;
        }
        let span = end - start + 1;
        if n.unsigned_abs() >= span {
            return false;
        }
        if !backend.scroll(start, end, n) {
            return false;
        }
        let rotate_up = n > 0;
        let k = n.unsigned_abs();
        for lines in [&mut self.int_lines, &mut self.ext_lines] {
            let region = &mut lines[start..=end];
            if rotate_up {
                region.rotate_left(k);
                for row in &mut region[span - k..] {
                    row.clear_from(0);
                    row.flags = SlineFlags::empty();
                }
            } else {
                region.rotate_right(k);
                for row in &mut region[..k] {
                    row.clear_from(0);
                    row.flags = SlineFlags::empty();
                }
            }
        }
        trace!(target: "render.screen", start, end, n, "scrolled");
        true
    }

    // ---- flushing --------------------------------------------------------

    /// Push every dirty row to the device with minimal writes, then park
    /// the cursor. Afterwards the external image equals the internal one.
    pub fn flush(&mut self, backend: &mut dyn ScreenBackend) {
        for row in 0..self.rows {
            let int = &self.int_lines[row];
            if !int.flags.contains(SlineFlags::DIRTY) {
                continue;
            }
            let ext = &self.ext_lines[row];
            if int.differs_from(ext) {
                let common = int
                    .text()
                    .iter()
                    .zip(int.colours())
                    .zip(ext.text().iter().zip(ext.colours()))
                    .take_while(|(a, b)| a == b)
                    .count();
                let end = int.used;
                if common < end {
                    backend.write(
                        row,
                        common,
                        &int.text()[common..end],
                        &int.colours()[common..end],
                    );
                }
                if ext.used > int.used {
                    backend.clear_to_eol(row, int.used);
                }
                self.ext_lines[row] = Sline {
                    text: int.text.clone(),
                    colour: int.colour.clone(),
                    used: int.used,
                    flags: int.flags & !SlineFlags::DIRTY,
                };
            }
            self.int_lines[row].flags.remove(SlineFlags::DIRTY);
        }
        backend.goto(self.cursor.0, self.cursor.1);
        backend.flush_output();
    }

    pub fn beep(&mut self, backend: &mut dyn ScreenBackend, prefer_flash: bool) {
        if prefer_flash {
            backend.flash();
        } else {
            backend.beep();
        }
    }

    /// Testing / invariant hook: do the two images agree everywhere?
    pub fn images_match(&self) -> bool {
        (0..self.rows).all(|r| !self.int_lines[r].differs_from(&self.ext_lines[r]))
    }
}

/// A backend that records its calls; used by tests and as the reference
/// for writing real backends.
#[derive(Debug, Default)]
pub struct RecordingBackend {
    pub rows: usize,
    pub cols: usize,
    pub writes: Vec<(usize, usize, Vec<u8>)>,
    pub clears: Vec<(usize, usize)>,
    pub scrolls: Vec<(usize, usize, isize)>,
    pub scrollable: bool,
    pub beeps: usize,
}

impl RecordingBackend {
    pub fn new(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            scrollable: true,
            ..Self::default()
        }
    }
}

impl ScreenBackend for RecordingBackend {
    fn size(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }
    fn goto(&mut self, _row: usize, _col: usize) {}
    fn write(&mut self, row: usize, col: usize, text: &[u8], _colour: &[u8]) {
        self.writes.push((row, col, text.to_vec()));
    }
    fn clear_to_eol(&mut self, row: usize, col: usize) {
        self.clears.push((row, col));
    }
    fn clear_all(&mut self) {}
    fn scroll(&mut self, start: usize, end: usize, n: isize) -> bool {
        if self.scrollable {
            self.scrolls.push((start, end, n));
        }
        self.scrollable
    }
    fn can_scroll(&self) -> bool {
        self.scrollable
    }
    fn flush_output(&mut self) {}
    fn beep(&mut self) {
        self.beeps += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn write_then_flush_emits_once() {
        let mut s = VirtScr::new(4, 10);
        let mut b = RecordingBackend::new(4, 10);
        s.write(1, 0, b"hello");
        s.flush(&mut b);
        assert_eq!(b.writes, vec![(1, 0, b"hello".to_vec())]);
        assert!(s.images_match());

        // Flushing again with no changes emits nothing.
        b.writes.clear();
        s.flush(&mut b);
        assert!(b.writes.is_empty());
    }

    #[test]
    fn flush_trims_common_prefix() {
        let mut s = VirtScr::new(2, 20);
        let mut b = RecordingBackend::new(2, 20);
        s.write(0, 0, b"hello world");
        s.flush(&mut b);
        b.writes.clear();

        s.write(0, 0, b"hello there");
        s.flush(&mut b);
        assert_eq!(b.writes, vec![(0, 6, b"there".to_vec())]);
        assert!(s.images_match());
    }

    #[test]
    fn shrinking_row_clears_stale_tail() {
        let mut s = VirtScr::new(2, 20);
        let mut b = RecordingBackend::new(2, 20);
        s.write(0, 0, b"long line here");
        s.flush(&mut b);
        b.writes.clear();

        s.clear_line(0, 0);
        s.write(0, 0, b"hi");
        s.flush(&mut b);
        assert_eq!(b.writes, vec![(0, 0, b"hi".to_vec())]);
        assert_eq!(b.clears, vec![(0, 2)]);
        assert!(s.images_match());
    }

    #[test]
    fn colour_change_forces_rewrite() {
        let mut s = VirtScr::new(1, 10);
        let mut b = RecordingBackend::new(1, 10);
        s.write(0, 0, b"text");
        s.flush(&mut b);
        b.writes.clear();

        s.set_colour(ColourSlot::Status);
        s.write(0, 0, b"text");
        s.flush(&mut b);
        // Same bytes, different colour: must be re-emitted.
        assert_eq!(b.writes, vec![(0, 0, b"text".to_vec())]);
    }

    #[test]
    fn insert_shifts_tail() {
        let mut s = VirtScr::new(1, 20);
        let mut b = RecordingBackend::new(1, 20);
        s.write(0, 0, b"abcd");
        s.flush(&mut b);
        s.insert(0, 1, b"XY");
        s.flush(&mut b);
        assert_eq!(s.int_line(0).text(), b"aXYbcd");
        assert!(s.images_match());
    }

    #[test]
    fn scroll_moves_both_images() {
        let mut s = VirtScr::new(4, 10);
        let mut b = RecordingBackend::new(4, 10);
        s.write(0, 0, b"r0");
        s.write(1, 0, b"r1");
        s.write(2, 0, b"r2");
        s.flush(&mut b);
        assert!(s.scroll(&mut b, 0, 2, 1));
        assert_eq!(s.int_line(0).text(), b"r1");
        assert_eq!(s.int_line(1).text(), b"r2");
        assert_eq!(s.int_line(2).text(), b"");
        assert!(s.images_match());
        assert_eq!(b.scrolls, vec![(0, 2, 1)]);
    }

    #[test]
    fn scroll_rejected_without_device_support() {
        let mut s = VirtScr::new(4, 10);
        let mut b = RecordingBackend::new(4, 10);
        b.scrollable = false;
        s.write(0, 0, b"r0");
        s.flush(&mut b);
        assert!(!s.scroll(&mut b, 0, 3, 1));
        assert_eq!(s.int_line(0).text(), b"r0");
    }

    #[test]
    fn advise_updates_external_image_only() {
        let mut s = VirtScr::new(1, 10);
        let mut b = RecordingBackend::new(1, 10);
        s.write(0, 0, b"ab");
        s.flush(&mut b);
        b.writes.clear();
        // Device printed a char by itself; internal wants the same.
        s.advise(0, 2, b"c");
        s.write(0, 2, b"c");
        s.flush(&mut b);
        assert!(b.writes.is_empty());
        assert!(s.images_match());
    }

    #[test]
    fn putc_past_used_pads_with_spaces() {
        let mut s = VirtScr::new(1, 10);
        s.putc(0, 3, b'x');
        assert_eq!(s.int_line(0).text(), b"   x");
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// Invariant 4: whatever is drawn, after a flush the external
            /// image equals the internal one cell for cell.
            #[test]
            fn flush_converges(ops in prop::collection::vec(
                (0usize..4, 0usize..12, prop::collection::vec(32u8..127, 0..14), any::<bool>()),
                1..30,
            )) {
                let mut s = VirtScr::new(4, 12);
                let mut b = RecordingBackend::new(4, 12);
                for (row, col, text, clear) in ops {
                    if clear {
                        s.clear_line(row, col);
                    } else {
                        s.write(row, col, &text);
                    }
                    if row % 2 == 0 {
                        s.flush(&mut b);
                        prop_assert!(s.images_match());
                    }
                }
                s.flush(&mut b);
                prop_assert!(s.images_match());
            }
        }
    }
}
