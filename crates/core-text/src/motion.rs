//! Cursor motions over a [`LineSet`]: word and WORD hops, character
//! search, bracket matching, and the sentence / paragraph / section text
//! objects.
//!
//! Characters fall into three classes: whitespace, word text (alphanumeric
//! plus `_`) and punctuation. A WORD motion folds punctuation into text so
//! only whitespace boundaries matter.

use crate::{LineSet, MoveResult, Position};

/// Word-motion flavour: `w`/`b`/`e` vs `W`/`B`/`E`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WordType {
    Word,
    BigWord,
}

/// Direction argument shared by the searching motions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    #[default]
    Forward,
    Backward,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CharClass {
    White,
    Text,
    Punct,
}

fn is_white(c: u8) -> bool {
    c == b' ' || c == b'\t' || c == 0
}

fn is_text(c: u8) -> bool {
    c.is_ascii_alphanumeric() || c == b'_'
}

fn cls(c: u8, ty: WordType) -> CharClass {
    if is_white(c) {
        CharClass::White
    } else if is_text(c) || ty == WordType::BigWord {
        CharClass::Text
    } else {
        CharClass::Punct
    }
}

fn at_class(set: &LineSet, pos: Position, ty: WordType) -> CharClass {
    cls(set.byte_at(pos), ty)
}

fn blank_line_start(set: &LineSet, pos: Position) -> bool {
    pos.index == 0 && set.is_empty(pos.line)
}

/// Move forward one word. With `skip_white` false (the `cw` case) the
/// motion stops on the first trailing whitespace byte instead of the
/// start of the next word. Returns `None` at end of buffer.
pub fn fwd_word(
    set: &LineSet,
    start: Position,
    ty: WordType,
    skip_white: bool,
) -> Option<Position> {
    let sclass = at_class(set, start, ty);
    let mut pos = start;

    if set.inc(&mut pos) == MoveResult::NoMove {
        return None;
    }

    if sclass != CharClass::White {
        // In the middle of a word: move right until the class changes.
        while at_class(set, pos, ty) == sclass {
            if set.inc(&mut pos) == MoveResult::NoMove {
                return Some(pos);
            }
        }
        // punct <-> text transition is a word start in its own right.
        if at_class(set, pos, ty) != CharClass::White {
            return Some(pos);
        }
    }

    if skip_white {
        while at_class(set, pos, ty) == CharClass::White {
            // A blank line counts as a word.
            if blank_line_start(set, pos) {
                break;
            }
            if set.inc(&mut pos) == MoveResult::NoMove {
                if pos.index != 0 {
                    set.dec(&mut pos);
                }
                break;
            }
        }
        if pos == start {
            return None;
        }
    }

    Some(pos)
}

/// Move backward one word. Returns `None` at start of buffer.
pub fn bck_word(set: &LineSet, start: Position, ty: WordType) -> Option<Position> {
    let sclass = at_class(set, start, ty);
    let mut pos = start;

    if set.dec(&mut pos) == MoveResult::NoMove {
        return None;
    }

    // Inside a word: back up to its first byte.
    if at_class(set, pos, ty) == sclass && sclass != CharClass::White {
        while at_class(set, pos, ty) == sclass {
            if set.dec(&mut pos) == MoveResult::NoMove {
                return Some(pos);
            }
        }
        set.inc(&mut pos);
        return Some(pos);
    }

    // At a word start: skip whitespace, then back over the prior word.
    while at_class(set, pos, ty) == CharClass::White {
        if blank_line_start(set, pos) {
            return Some(pos);
        }
        if set.dec(&mut pos) == MoveResult::NoMove {
            return Some(pos);
        }
    }
    let sclass = at_class(set, pos, ty);
    while at_class(set, pos, ty) == sclass {
        if set.dec(&mut pos) == MoveResult::NoMove {
            return Some(pos);
        }
    }
    set.inc(&mut pos);
    Some(pos)
}

/// Move to the next end-of-word at or after the position following the
/// cursor. Returns `None` at end of buffer.
pub fn end_word(set: &LineSet, start: Position, ty: WordType) -> Option<Position> {
    let sclass = at_class(set, start, ty);
    let mut pos = start;

    match set.inc(&mut pos) {
        MoveResult::NoMove => return None,
        MoveResult::Eol => {
            // At end of buffer EOL is followed by NoMove.
            if set.inc(&mut pos) == MoveResult::NoMove {
                return None;
            }
            set.dec(&mut pos);
        }
        _ => {}
    }

    if at_class(set, pos, ty) == sclass && sclass != CharClass::White {
        while at_class(set, pos, ty) == sclass {
            if set.inc(&mut pos) == MoveResult::NoMove {
                return Some(pos);
            }
        }
        set.dec(&mut pos);
        return Some(pos);
    }

    while at_class(set, pos, ty) == CharClass::White {
        if set.inc(&mut pos) == MoveResult::NoMove {
            return Some(pos);
        }
    }
    let sclass = at_class(set, pos, ty);
    while at_class(set, pos, ty) == sclass {
        if set.inc(&mut pos) == MoveResult::NoMove {
            return Some(pos);
        }
    }
    set.dec(&mut pos);
    Some(pos)
}

/// Search the cursor line for character `c`. With `to_before` the cursor
/// lands just short of the match (`t`/`T`). `count` repeats the search.
pub fn search_char(
    set: &LineSet,
    start: Position,
    c: u8,
    dir: Direction,
    to_before: bool,
    count: usize,
) -> Option<Position> {
    let mut pos = start;
    for _ in 0..count.max(1) {
        let mut found = false;
        loop {
            let moved = match dir {
                Direction::Forward => set.inc(&mut pos),
                Direction::Backward => set.dec(&mut pos),
            };
            if moved != MoveResult::SameLine && moved != MoveResult::Eol {
                break;
            }
            if moved == MoveResult::Eol {
                break;
            }
            if set.byte_at(pos) == c {
                found = true;
                break;
            }
        }
        if !found {
            return None;
        }
    }
    if to_before {
        match dir {
            Direction::Forward => set.dec(&mut pos),
            Direction::Backward => set.inc(&mut pos),
        };
    }
    Some(pos)
}

/// Memory for `;` / `,` repetition of the last character search.
#[derive(Debug, Default, Clone, Copy)]
pub struct CharSearch {
    last: Option<(u8, Direction, bool)>,
}

impl CharSearch {
    pub fn record(&mut self, c: u8, dir: Direction, to_before: bool) {
        self.last = Some((c, dir, to_before));
    }

    /// Direction a repeat would take, after the `,` reversal.
    pub fn effective_direction(&self, reverse: bool) -> Option<Direction> {
        let (_, dir, _) = self.last?;
        Some(match (dir, reverse) {
            (d, false) => d,
            (Direction::Forward, true) => Direction::Backward,
            (Direction::Backward, true) => Direction::Forward,
        })
    }

    /// Repeat the last search; `reverse` flips the direction (`,`).
    pub fn repeat(
        &self,
        set: &LineSet,
        start: Position,
        reverse: bool,
        count: usize,
    ) -> Option<Position> {
        let (c, dir, to_before) = self.last?;
        let dir = if reverse {
            match dir {
                Direction::Forward => Direction::Backward,
                Direction::Backward => Direction::Forward,
            }
        } else {
            dir
        };
        search_char(set, start, c, dir, to_before, count)
    }
}

/// Find the bracket matching the first `()[]{}` at or after the cursor on
/// its line, walking the buffer with a nesting count.
pub fn show_match(set: &LineSet, start: Position) -> Option<Position> {
    let mut pos = start;
    let (open, close, dir) = loop {
        match set.byte_at(pos) {
            b'(' => break (b'(', b')', Direction::Forward),
            b'[' => break (b'[', b']', Direction::Forward),
            b'{' => break (b'{', b'}', Direction::Forward),
            b')' => break (b'(', b')', Direction::Backward),
            b']' => break (b'[', b']', Direction::Backward),
            b'}' => break (b'{', b'}', Direction::Backward),
            _ => {
                // Scan forward on the current line only.
                match set.inc(&mut pos) {
                    MoveResult::SameLine => {}
                    _ => return None,
                }
            }
        }
    };
    let (this, other) = match dir {
        Direction::Forward => (open, close),
        Direction::Backward => (close, open),
    };
    let mut depth = 0i32;
    loop {
        let moved = match dir {
            Direction::Forward => set.inc(&mut pos),
            Direction::Backward => set.dec(&mut pos),
        };
        if moved == MoveResult::NoMove {
            return None;
        }
        let c = set.byte_at(pos);
        if c == this {
            depth += 1;
        } else if c == other {
            if depth == 0 {
                return Some(pos);
            }
            depth -= 1;
        }
    }
}

/// Which text object a span request asks for. A section boundary is also a
/// paragraph boundary, and a paragraph boundary is also a sentence
/// boundary, so locating takes the nearest match among the applicable
/// boundary sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextObject {
    Sentence,
    Paragraph,
    Section,
}

/// nroff macro pairs that open paragraphs / sections, as held by the
/// `paragraphs` and `sections` parameters (two bytes per macro name).
#[derive(Debug, Clone)]
pub struct ObjectMacros {
    pub paragraphs: Vec<u8>,
    pub sections: Vec<u8>,
}

impl Default for ObjectMacros {
    fn default() -> Self {
        Self {
            paragraphs: b"IPLPPPQPP LIpplpipbp".to_vec(),
            sections: b"NHSHH HUnhsh".to_vec(),
        }
    }
}

fn starts_macro(text: &[u8], pairs: &[u8]) -> bool {
    if text.first() != Some(&b'.') {
        return false;
    }
    let name = &text[1..];
    let c0 = match name.first() {
        Some(&c) => c,
        None => return false,
    };
    let c1 = name.get(1).copied().unwrap_or(b' ');
    pairs.chunks(2).any(|pair| {
        let a = pair[0];
        let b = pair.get(1).copied().unwrap_or(b' ');
        c0 == a && (b == b' ' || c1 == b)
    })
}

fn is_para_boundary(set: &LineSet, line: crate::LineId, m: &ObjectMacros) -> bool {
    let text = set.text(line);
    text.is_empty() || starts_macro(text, &m.paragraphs) || is_section_boundary(set, line, m)
}

fn is_section_boundary(set: &LineSet, line: crate::LineId, m: &ObjectMacros) -> bool {
    let text = set.text(line);
    text.first() == Some(&b'{') || text.first() == Some(&0x0c) || starts_macro(text, &m.sections)
}

/// True when the byte ends a sentence: `. ! ?` followed by any run of
/// `) ] " '` and then end of line or two spaces.
fn sentence_end_at(text: &[u8], i: usize) -> bool {
    if !matches!(text.get(i), Some(b'.') | Some(b'!') | Some(b'?')) {
        return false;
    }
    let mut j = i + 1;
    while matches!(text.get(j), Some(b')') | Some(b']') | Some(b'"') | Some(b'\'')) {
        j += 1;
    }
    j >= text.len() || (text.get(j) == Some(&b' ') && text.get(j + 1) == Some(&b' '))
}

/// Locate the start of the next (forward) or enclosing/previous
/// (backward) text object boundary from `start`.
pub fn locate_object(
    set: &LineSet,
    start: Position,
    obj: TextObject,
    dir: Direction,
    macros: &ObjectMacros,
) -> Option<Position> {
    match obj {
        TextObject::Sentence => locate_sentence(set, start, dir, macros),
        TextObject::Paragraph => {
            locate_line_boundary(set, start, dir, |s, l| is_para_boundary(s, l, macros))
        }
        TextObject::Section => {
            locate_line_boundary(set, start, dir, |s, l| is_section_boundary(s, l, macros))
        }
    }
}

fn locate_line_boundary<F>(
    set: &LineSet,
    start: Position,
    dir: Direction,
    pred: F,
) -> Option<Position>
where
    F: Fn(&LineSet, crate::LineId) -> bool,
{
    let mut line = start.line;
    loop {
        let step = match dir {
            Direction::Forward => set.next(line),
            Direction::Backward => set.prev(line),
        };
        match step {
            Some(l) if !set.is_lastline(l) && !set.is_line0(l) => {
                line = l;
                if pred(set, line) {
                    return Some(Position::new(line, 0));
                }
            }
            Some(l) if set.is_lastline(l) => {
                // Buffer end acts as a final boundary.
                return Some(Position::new(set.last(), set.len(set.last())));
            }
            Some(_) => {
                return Some(Position::new(set.first(), 0));
            }
            None => return None,
        }
    }
}

fn locate_sentence(
    set: &LineSet,
    start: Position,
    dir: Direction,
    macros: &ObjectMacros,
) -> Option<Position> {
    let mut pos = start;
    let mut candidate: Option<Position> = None;
    loop {
        let moved = match dir {
            Direction::Forward => set.inc(&mut pos),
            Direction::Backward => set.dec(&mut pos),
        };
        if moved == MoveResult::NoMove {
            return candidate.or(match dir {
                Direction::Forward => Some(Position::new(set.last(), set.len(set.last()))),
                Direction::Backward => Some(Position::new(set.first(), 0)),
            });
        }
        // Paragraph boundaries terminate sentences too.
        if moved == MoveResult::ChangedLine && is_para_boundary(set, pos.line, macros) {
            return Some(Position::new(pos.line, 0));
        }
        let text = set.text(pos.line);
        if sentence_end_at(text, pos.index) {
            // Sentence starts after the end punctuation and its closers
            // plus following whitespace.
            let mut p = pos;
            loop {
                match set.inc(&mut p) {
                    MoveResult::SameLine | MoveResult::Eol => {
                        if !matches!(
                            set.byte_at(p),
                            b' ' | b')' | b']' | b'"' | b'\'' | 0
                        ) {
                            break;
                        }
                    }
                    MoveResult::ChangedLine => break,
                    MoveResult::NoMove => return Some(p),
                }
            }
            match dir {
                Direction::Forward => {
                    if set.earlier(start.line, p.line)
                        || (start.line == p.line && p.index > start.index)
                    {
                        return Some(p);
                    }
                }
                Direction::Backward => {
                    if set.earlier(p.line, start.line)
                        || (start.line == p.line && p.index < start.index)
                    {
                        candidate = Some(p);
                        return candidate;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LineSet;
    use pretty_assertions::assert_eq;

    fn set_with(lines: &[&str]) -> LineSet {
        let mut s = LineSet::new();
        let texts: Vec<Vec<u8>> = lines.iter().map(|l| l.as_bytes().to_vec()).collect();
        if let Some(chain) = s.chain_from_texts(&texts) {
            let first = s.first();
            s.attach_before(first, chain);
            let old = s.detach(s.last(), 1);
            s.free_chain(old);
        }
        s
    }

    #[test]
    fn fwd_word_stops_at_class_changes() {
        let s = set_with(&["foo.bar baz"]);
        let l = s.first();
        let p = fwd_word(&s, Position::new(l, 0), WordType::Word, true).unwrap();
        assert_eq!(p.index, 3); // '.'
        let p = fwd_word(&s, p, WordType::Word, true).unwrap();
        assert_eq!(p.index, 4); // 'bar'
        let p = fwd_word(&s, p, WordType::Word, true).unwrap();
        assert_eq!(p.index, 8); // 'baz'
    }

    #[test]
    fn fwd_big_word_ignores_punctuation() {
        let s = set_with(&["foo.bar baz"]);
        let l = s.first();
        let p = fwd_word(&s, Position::new(l, 0), WordType::BigWord, true).unwrap();
        assert_eq!(p.index, 8);
    }

    #[test]
    fn fwd_word_no_skip_stops_at_whitespace() {
        // The cw case: stop on the space after the word.
        let s = set_with(&["foo bar"]);
        let l = s.first();
        let p = fwd_word(&s, Position::new(l, 0), WordType::Word, false).unwrap();
        assert_eq!(p.index, 3);
    }

    #[test]
    fn fwd_word_crosses_lines_and_blank_lines() {
        let s = set_with(&["foo", "", "bar"]);
        let l = s.first();
        let p = fwd_word(&s, Position::new(l, 0), WordType::Word, true).unwrap();
        assert_eq!(s.lineno(p.line), 2); // the blank line is a word
        let p = fwd_word(&s, p, WordType::Word, true).unwrap();
        assert_eq!(s.lineno(p.line), 3);
        assert_eq!(p.index, 0);
    }

    #[test]
    fn bck_word_to_word_starts() {
        let s = set_with(&["foo bar.baz"]);
        let l = s.first();
        let p = bck_word(&s, Position::new(l, 10), WordType::Word).unwrap();
        assert_eq!(p.index, 8); // baz -> start of baz
        let p = bck_word(&s, p, WordType::Word).unwrap();
        assert_eq!(p.index, 7); // '.'
        let p = bck_word(&s, p, WordType::Word).unwrap();
        assert_eq!(p.index, 4); // bar
        let p = bck_word(&s, p, WordType::Word).unwrap();
        assert_eq!(p.index, 0); // foo
        assert!(bck_word(&s, p, WordType::Word).is_none());
    }

    #[test]
    fn end_word_lands_on_last_byte() {
        let s = set_with(&["foo bar"]);
        let l = s.first();
        let p = end_word(&s, Position::new(l, 0), WordType::Word).unwrap();
        assert_eq!(p.index, 2);
        let p = end_word(&s, p, WordType::Word).unwrap();
        assert_eq!(p.index, 6);
    }

    #[test]
    fn search_char_forward_and_to() {
        let s = set_with(&["abcabc"]);
        let l = s.first();
        let p = search_char(&s, Position::new(l, 0), b'c', Direction::Forward, false, 1).unwrap();
        assert_eq!(p.index, 2);
        let p = search_char(&s, Position::new(l, 0), b'c', Direction::Forward, false, 2).unwrap();
        assert_eq!(p.index, 5);
        let p = search_char(&s, Position::new(l, 0), b'c', Direction::Forward, true, 1).unwrap();
        assert_eq!(p.index, 1);
        assert!(search_char(&s, Position::new(l, 0), b'z', Direction::Forward, false, 1).is_none());
    }

    #[test]
    fn char_search_repeat_and_reverse() {
        let s = set_with(&["abcabc"]);
        let l = s.first();
        let mut cs = CharSearch::default();
        cs.record(b'b', Direction::Forward, false);
        let p = cs.repeat(&s, Position::new(l, 0), false, 1).unwrap();
        assert_eq!(p.index, 1);
        let p = cs.repeat(&s, Position::new(l, 5), true, 1).unwrap();
        assert_eq!(p.index, 4);
    }

    #[test]
    fn show_match_nested() {
        let s = set_with(&["a(b(c)d)e"]);
        let l = s.first();
        let p = show_match(&s, Position::new(l, 1)).unwrap();
        assert_eq!(p.index, 7);
        let p = show_match(&s, Position::new(l, 7)).unwrap();
        assert_eq!(p.index, 1);
        // Cursor before the bracket scans forward to it first.
        let p = show_match(&s, Position::new(l, 0)).unwrap();
        assert_eq!(p.index, 7);
    }

    #[test]
    fn show_match_across_lines() {
        let s = set_with(&["if (x) {", "  y();", "}"]);
        let first = s.first();
        let p = show_match(&s, Position::new(first, 7)).unwrap();
        assert_eq!(s.lineno(p.line), 3);
        assert_eq!(p.index, 0);
    }

    #[test]
    fn paragraph_boundaries_are_blank_and_macro_lines() {
        let s = set_with(&["one", "two", "", ".PP", "three"]);
        let m = ObjectMacros::default();
        let p = locate_object(
            &s,
            Position::new(s.first(), 0),
            TextObject::Paragraph,
            Direction::Forward,
            &m,
        )
        .unwrap();
        assert_eq!(s.lineno(p.line), 3); // blank line
        let p = locate_object(&s, p, TextObject::Paragraph, Direction::Forward, &m).unwrap();
        assert_eq!(s.lineno(p.line), 4); // .PP macro
    }

    #[test]
    fn section_boundary_on_open_brace() {
        let s = set_with(&["int f(void)", "{", "}", "int g(void)", "{", "}"]);
        let m = ObjectMacros::default();
        let p = locate_object(
            &s,
            Position::new(s.first(), 0),
            TextObject::Section,
            Direction::Forward,
            &m,
        )
        .unwrap();
        assert_eq!(s.lineno(p.line), 2);
    }

    #[test]
    fn sentence_forward_lands_after_two_spaces() {
        let s = set_with(&["One.  Two.  Three."]);
        let m = ObjectMacros::default();
        let p = locate_object(
            &s,
            Position::new(s.first(), 0),
            TextObject::Sentence,
            Direction::Forward,
            &m,
        )
        .unwrap();
        assert_eq!(p.index, 6);
    }
}
