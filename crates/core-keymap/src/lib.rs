//! Two-stage keymap translation.
//!
//! Three byte queues are chained: raw (straight from the keyboard),
//! canonical (terminal escape sequences folded into single canonical
//! keycodes by the backend-populated key map), and mapped (what the
//! editor reads). The raw-to-canonical stage and the canonical-to-mapped
//! stage run the same matching machinery over different map lists; only
//! the data differs, so cursor-key folding never shows up as a user map.
//!
//! Each map list is kept sorted by left-hand side, and every entry
//! carries `same`, the length of the prefix it shares with the next
//! entry. While extending a partial match the scan may only advance to
//! the next entry when `same` covers the bytes matched so far, which
//! prunes the search without re-comparing prefixes.

use core_text::Flexbuf;
use smallvec::SmallVec;
use tracing::{debug, trace};

/// Upper bound on remap substitutions per drain of the queues. When the
/// budget runs out the right-hand side is emitted literally, so mutually
/// recursive maps make progress instead of hanging.
pub const MAP_EXPAND_MAX: u32 = 1000;

/// Which user map list the canonical-to-mapped stage consults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapMode {
    /// Normal mode: `cmd_map`.
    Command,
    /// Insert / replace / command-line modes: `ins_map`.
    Insert,
    /// Display mode: no user mapping at all.
    PassThrough,
}

#[derive(Debug)]
pub struct MapEntry {
    pub lhs: Vec<u8>,
    pub rhs: Vec<u8>,
    /// Bytes of `lhs` shared with the next entry in the list.
    same: usize,
}

/// A sorted list of mappings.
#[derive(Debug, Default)]
pub struct MapList {
    entries: Vec<MapEntry>,
}

impl MapList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a mapping.
    pub fn insert(&mut self, lhs: &[u8], rhs: &[u8]) {
        if lhs.is_empty() {
            return;
        }
        match self.entries.binary_search_by(|e| e.lhs.as_slice().cmp(lhs)) {
            Ok(i) => self.entries[i].rhs = rhs.to_vec(),
            Err(i) => self.entries.insert(
                i,
                MapEntry {
                    lhs: lhs.to_vec(),
                    rhs: rhs.to_vec(),
                    same: 0,
                },
            ),
        }
        self.calc_same();
        debug!(target: "input.map", entries = self.entries.len(), "map inserted");
    }

    /// Remove a mapping; reports whether it existed.
    pub fn remove(&mut self, lhs: &[u8]) -> bool {
        match self.entries.binary_search_by(|e| e.lhs.as_slice().cmp(lhs)) {
            Ok(i) => {
                self.entries.remove(i);
                self.calc_same();
                true
            }
            Err(_) => false,
        }
    }

    pub fn entries(&self) -> impl Iterator<Item = (&[u8], &[u8])> {
        self.entries.iter().map(|e| (e.lhs.as_slice(), e.rhs.as_slice()))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn calc_same(&mut self) {
        let n = self.entries.len();
        for i in 0..n {
            self.entries[i].same = if i + 1 < n {
                common_prefix(&self.entries[i].lhs, &self.entries[i + 1].lhs)
            } else {
                0
            };
        }
    }
}

fn common_prefix(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b).take_while(|(x, y)| x == y).count()
}

/// Partial-match position inside one translation stage: candidate entry
/// index plus bytes matched so far.
type MapState = Option<(usize, usize)>;

/// The chained queues and both translation stages.
#[derive(Debug, Default)]
pub struct KeymapTranslator {
    raw: Flexbuf,
    canon: Flexbuf,
    mapped: Flexbuf,
    pub key_map: MapList,
    pub cmd_map: MapList,
    pub ins_map: MapList,
    kstate: MapState,
    nstate: MapState,
    /// Whether an expanded rhs is rescanned against the maps.
    pub remap: bool,
    /// Milliseconds to hold a partial match before giving up on it.
    pub timeout_ms: u64,
}

impl KeymapTranslator {
    pub fn new() -> Self {
        Self {
            remap: true,
            timeout_ms: 200,
            ..Self::default()
        }
    }

    /// Queue one byte arriving from the keyboard.
    pub fn push_raw(&mut self, c: u8) {
        self.raw.push(c);
    }

    /// Append bytes directly to the mapped queue, bypassing translation.
    /// Used by redo replay and `@register` execution.
    pub fn stuff(&mut self, bytes: &[u8]) {
        self.mapped.push_bytes(bytes);
    }

    /// Stuff bytes so they are read before anything already queued.
    pub fn stuff_front(&mut self, bytes: &[u8]) {
        self.mapped.push_back_front(bytes);
    }

    /// True while either stage holds a partial match, i.e. the timeout
    /// clock should be running.
    pub fn waiting(&self) -> bool {
        self.kstate.is_some() || self.nstate.is_some()
    }

    /// Any bytes anywhere in the pipeline?
    pub fn pending(&self) -> bool {
        !self.raw.is_empty() || !self.canon.is_empty() || !self.mapped.is_empty()
    }

    /// The per-keystroke timeout fired: abandon the partial match held
    /// longest upstream.
    pub fn timeout(&mut self) {
        if self.kstate.is_some() {
            fail_match(
                &self.key_map,
                &mut self.kstate,
                &mut self.raw,
                &mut self.canon,
                None,
            );
        } else {
            fail_match(
                &self.cmd_map,
                &mut self.nstate,
                &mut self.canon,
                &mut self.mapped,
                None,
            );
        }
        trace!(target: "input.map", "partial match flushed on timeout");
    }

    /// Pull the next fully translated byte, pushing queued bytes through
    /// both stages as needed. Returns `None` when the pipeline has
    /// nothing ready (possibly mid-match).
    pub fn getc(&mut self, mode: MapMode) -> Option<u8> {
        let mut budget = MAP_EXPAND_MAX;
        while self.mapped.is_empty() {
            if !self.canon.is_empty() {
                let c = self.canon.pop_front().expect("non-empty");
                match mode {
                    MapMode::PassThrough => self.mapped.push(c),
                    MapMode::Command => process(
                        &self.cmd_map,
                        &mut self.nstate,
                        &mut self.canon,
                        &mut self.mapped,
                        self.remap,
                        &mut budget,
                        c,
                    ),
                    MapMode::Insert => process(
                        &self.ins_map,
                        &mut self.nstate,
                        &mut self.canon,
                        &mut self.mapped,
                        self.remap,
                        &mut budget,
                        c,
                    ),
                }
            } else if !self.raw.is_empty() {
                let c = self.raw.pop_front().expect("non-empty");
                process(
                    &self.key_map,
                    &mut self.kstate,
                    &mut self.raw,
                    &mut self.canon,
                    self.remap,
                    &mut budget,
                    c,
                );
            } else {
                break;
            }
        }
        self.mapped.pop_front()
    }
}

/// Feed one byte through a map list.
///
/// The contract, byte by byte:
/// 1. if the byte extends the current partial match, advance;
/// 2. a completed match substitutes its rhs (rescanned when remapping,
///    appended downstream otherwise);
/// 3. a broken partial match flushes its first byte downstream and
///    returns the rest, plus the new byte, upstream;
/// 4. with no partial match active, a non-matching byte passes through.
fn process(
    map: &MapList,
    state: &mut MapState,
    src: &mut Flexbuf,
    dest: &mut Flexbuf,
    remap: bool,
    budget: &mut u32,
    c: u8,
) {
    let (start, ind) = state.take().unwrap_or((0, 0));
    let mut e = start;
    while let Some(entry) = map.entries.get(e) {
        if entry.lhs.get(ind) == Some(&c) {
            if entry.lhs.len() == ind + 1 {
                // Complete match.
                if remap && *budget > 0 {
                    *budget -= 1;
                    src.push_back_front(&entry.rhs);
                    trace!(target: "input.map", budget = *budget, "rhs rescanned");
                } else {
                    dest.push_bytes(&entry.rhs);
                }
            } else {
                *state = Some((e, ind + 1));
            }
            return;
        }
        // The next entry can only continue this match if it shares at
        // least the bytes matched so far.
        if entry.same < ind {
            break;
        }
        e += 1;
    }
    fail_match(map, &mut Some((start, ind)), src, dest, Some(c));
}

/// A partial match is abandoned: its first byte goes downstream, the
/// remainder (and the byte that broke it, if any) go back upstream to be
/// rescanned from scratch.
fn fail_match(
    map: &MapList,
    state: &mut MapState,
    src: &mut Flexbuf,
    dest: &mut Flexbuf,
    breaker: Option<u8>,
) {
    let Some((e, ind)) = state.take() else {
        if let Some(c) = breaker {
            dest.push(c);
        }
        return;
    };
    if ind == 0 {
        if let Some(c) = breaker {
            dest.push(c);
        }
        return;
    }
    let lhs = &map.entries[e].lhs;
    dest.push(lhs[0]);
    let mut back: SmallVec<[u8; 8]> = SmallVec::from_slice(&lhs[1..ind]);
    if let Some(c) = breaker {
        back.push(c);
    }
    src.push_back_front(&back);
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn drain(t: &mut KeymapTranslator, mode: MapMode) -> Vec<u8> {
        let mut out = Vec::new();
        while let Some(c) = t.getc(mode) {
            out.push(c);
        }
        out
    }

    fn feed(t: &mut KeymapTranslator, bytes: &[u8], mode: MapMode) -> Vec<u8> {
        for &b in bytes {
            t.push_raw(b);
        }
        drain(t, mode)
    }

    #[test]
    fn passthrough_without_maps() {
        let mut t = KeymapTranslator::new();
        assert_eq!(feed(&mut t, b"abc", MapMode::Command), b"abc");
    }

    #[test]
    fn single_char_map_substitutes() {
        let mut t = KeymapTranslator::new();
        t.cmd_map.insert(b"x", b"dd");
        t.remap = false;
        assert_eq!(feed(&mut t, b"axb", MapMode::Command), b"addb");
    }

    #[test]
    fn map_only_active_in_its_mode() {
        let mut t = KeymapTranslator::new();
        t.cmd_map.insert(b"x", b"y");
        assert_eq!(feed(&mut t, b"x", MapMode::Insert), b"x");
    }

    #[test]
    fn multichar_match_consumes_all() {
        let mut t = KeymapTranslator::new();
        t.remap = false;
        t.cmd_map.insert(b"abc", b"Z");
        assert_eq!(feed(&mut t, b"abc", MapMode::Command), b"Z");
    }

    #[test]
    fn partial_match_held_until_broken() {
        let mut t = KeymapTranslator::new();
        t.remap = false;
        t.cmd_map.insert(b"ab", b"Z");
        // 'a' alone: held, nothing comes out.
        assert_eq!(feed(&mut t, b"a", MapMode::Command), b"");
        assert!(t.waiting());
        // 'x' breaks the match: the held 'a' flushes, 'x' is rescanned.
        assert_eq!(feed(&mut t, b"x", MapMode::Command), b"ax");
        assert!(!t.waiting());
    }

    #[test]
    fn broken_match_rescans_pushed_back_bytes() {
        let mut t = KeymapTranslator::new();
        t.remap = false;
        t.cmd_map.insert(b"ab", b"X");
        t.cmd_map.insert(b"bc", b"Y");
        // 'a' holds; 'b' extends nothing further... 'ab' completes.
        assert_eq!(feed(&mut t, b"ab", MapMode::Command), b"X");
        // 'a' then 'c': 'a' flushes, 'c' passes through.
        assert_eq!(feed(&mut t, b"ac", MapMode::Command), b"ac");
        // 'abc' -> 'ab' completes, then 'c'.
        assert_eq!(feed(&mut t, b"abc", MapMode::Command), b"Xc");
    }

    #[test]
    fn same_prefix_entries_both_reachable() {
        let mut t = KeymapTranslator::new();
        t.remap = false;
        t.cmd_map.insert(b"aa", b"1");
        t.cmd_map.insert(b"ab", b"2");
        assert_eq!(feed(&mut t, b"aa", MapMode::Command), b"1");
        assert_eq!(feed(&mut t, b"ab", MapMode::Command), b"2");
    }

    #[test]
    fn timeout_flushes_partial_match() {
        let mut t = KeymapTranslator::new();
        t.remap = false;
        t.cmd_map.insert(b"ab", b"Z");
        assert_eq!(feed(&mut t, b"a", MapMode::Command), b"");
        assert!(t.waiting());
        t.timeout();
        assert_eq!(drain(&mut t, MapMode::Command), b"a");
        assert!(!t.waiting());
    }

    #[test]
    fn key_map_stage_canonicalises_escape_sequences() {
        let mut t = KeymapTranslator::new();
        t.remap = false;
        // Arrow-up escape sequence folded to canonical 'k'.
        t.key_map.insert(b"\x1b[A", b"k");
        assert_eq!(feed(&mut t, b"\x1b[A", MapMode::Command), b"k");
        // A bare ESC is held (prefix of the sequence) until timeout.
        assert_eq!(feed(&mut t, b"\x1b", MapMode::Command), b"");
        t.timeout();
        assert_eq!(drain(&mut t, MapMode::Command), b"\x1b");
    }

    #[test]
    fn remap_rescans_rhs() {
        let mut t = KeymapTranslator::new();
        t.cmd_map.insert(b"x", b"y");
        t.cmd_map.insert(b"y", b"Z");
        t.remap = true;
        assert_eq!(feed(&mut t, b"x", MapMode::Command), b"Z");
        // Without remap the first rhs is final.
        t.remap = false;
        assert_eq!(feed(&mut t, b"x", MapMode::Command), b"y");
    }

    #[test]
    fn mutually_recursive_maps_terminate() {
        let mut t = KeymapTranslator::new();
        t.cmd_map.insert(b"x", b"y");
        t.cmd_map.insert(b"y", b"x");
        t.remap = true;
        for &b in b"x" {
            t.push_raw(b);
        }
        // Must terminate (budget exhausts and the rhs lands literally).
        let out = drain(&mut t, MapMode::Command);
        assert_eq!(out.len(), 1);
        assert!(out[0] == b'x' || out[0] == b'y');
    }

    #[test]
    fn stuff_bypasses_translation() {
        let mut t = KeymapTranslator::new();
        t.cmd_map.insert(b"d", b"QQQ");
        t.stuff(b"dw");
        assert_eq!(drain(&mut t, MapMode::Command), b"dw");
    }

    #[test]
    fn insert_replaces_existing_lhs() {
        let mut l = MapList::new();
        l.insert(b"q", b"one");
        l.insert(b"q", b"two");
        assert_eq!(l.entries().count(), 1);
        assert_eq!(l.entries().next().unwrap().1, b"two");
        assert!(l.remove(b"q"));
        assert!(!l.remove(b"q"));
        assert!(l.is_empty());
    }
}
