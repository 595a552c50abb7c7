//! Insert/replace mode and the undo engine, driven by keystrokes.

mod common;

use common::{contents, cursor_col, cursor_lineno, editor_with, feed};
use pretty_assertions::assert_eq;

#[test]
fn insert_and_undo_empties_buffer() {
    let mut ed = editor_with(&[""]);
    feed(&mut ed, b"iabc\x1b");
    assert_eq!(contents(&ed), vec!["abc"]);
    feed(&mut ed, b"u");
    assert_eq!(contents(&ed), vec![""]);
    assert_eq!(cursor_lineno(&ed), 1);
    assert_eq!(cursor_col(&ed), 0);
}

#[test]
fn insert_variants_position_correctly() {
    let mut ed = editor_with(&["  body"]);
    feed(&mut ed, b"Ix\x1b");
    assert_eq!(contents(&ed), vec!["  xbody"]);
    feed(&mut ed, b"Ay\x1b");
    assert_eq!(contents(&ed), vec!["  xbodyy"]);
    feed(&mut ed, b"ggaz\x1b");
    assert_eq!(contents(&ed), vec!["  xzbodyy"]);
}

#[test]
fn open_line_and_undo_is_one_unit() {
    let mut ed = editor_with(&["top"]);
    feed(&mut ed, b"onew line\x1b");
    assert_eq!(contents(&ed), vec!["top", "new line"]);
    feed(&mut ed, b"u");
    assert_eq!(contents(&ed), vec!["top"]);
    feed(&mut ed, b"Oabove\x1b");
    assert_eq!(contents(&ed), vec!["above", "top"]);
    feed(&mut ed, b"u");
    assert_eq!(contents(&ed), vec!["top"]);
}

#[test]
fn redo_after_undo_chain() {
    let mut ed = editor_with(&[""]);
    feed(&mut ed, b"ia\x1b");
    feed(&mut ed, b"ab\x1b");
    feed(&mut ed, b"ac\x1b");
    assert_eq!(contents(&ed), vec!["abc"]);
    feed(&mut ed, b"uu");
    assert_eq!(contents(&ed), vec!["a"]);
    core_actions::ex::execute(&mut ed, b"redo");
    assert_eq!(contents(&ed), vec!["ab"]);
}

#[test]
fn count_replays_inserted_text() {
    let mut ed = editor_with(&[""]);
    feed(&mut ed, b"3iab\x1b");
    assert_eq!(contents(&ed), vec!["ababab"]);
    // The whole thing is still one change.
    feed(&mut ed, b"u");
    assert_eq!(contents(&ed), vec![""]);
}

#[test]
fn backspace_stops_at_insert_point() {
    let mut ed = editor_with(&["keep"]);
    feed(&mut ed, b"Axy\x08\x08\x08z\x1b");
    // Both typed chars erase; the third backspace is refused.
    assert_eq!(contents(&ed), vec!["keepz"]);
}

#[test]
fn ctrl_w_erases_word() {
    let mut ed = editor_with(&[""]);
    feed(&mut ed, b"ihello world\x17\x1b");
    assert_eq!(contents(&ed), vec!["hello "]);
}

#[test]
fn newline_splits_and_autoindent_carries() {
    let mut ed = editor_with(&["    indented"]);
    core_actions::ex::execute(&mut ed, b"set autoindent");
    feed(&mut ed, b"Anext\rmore\x1b");
    assert_eq!(contents(&ed), vec!["    indentednext", "    more"]);
}

#[test]
fn literal_next_inserts_control_bytes() {
    let mut ed = editor_with(&[""]);
    feed(&mut ed, b"i\x16\x1bdone\x1b");
    let line = contents(&ed)[0].clone();
    assert!(line.as_bytes().starts_with(&[0x1b]));
    assert!(line.ends_with("done"));
}

#[test]
fn ctrl_a_reinserts_last_insert() {
    let mut ed = editor_with(&[""]);
    feed(&mut ed, b"iabc\x1b");
    feed(&mut ed, b"A\x01\x1b");
    assert_eq!(contents(&ed), vec!["abcabc"]);
}

#[test]
fn ctrl_b_inserts_named_register() {
    let mut ed = editor_with(&["seed"]);
    feed(&mut ed, b"\"qyy");
    feed(&mut ed, b"A-\x02q\x1b");
    assert_eq!(contents(&ed)[0], "seed-seed");
}

#[test]
fn replace_one_char() {
    let mut ed = editor_with(&["abc"]);
    feed(&mut ed, b"rx");
    assert_eq!(contents(&ed), vec!["xbc"]);
    // Count replaces that many characters with the same byte.
    feed(&mut ed, b"2rz");
    assert_eq!(contents(&ed), vec!["zzc"]);
    // Too few characters: refused.
    feed(&mut ed, b"$9ry");
    assert_eq!(contents(&ed), vec!["zzc"]);
}

#[test]
fn overwrite_mode_and_backspace_restores() {
    let mut ed = editor_with(&["abcdef"]);
    feed(&mut ed, b"RXY\x08\x08\x1b");
    // Both overwritten characters come back from the snapshot.
    assert_eq!(contents(&ed), vec!["abcdef"]);
    feed(&mut ed, b"RXY\x1b");
    assert_eq!(contents(&ed), vec!["XYcdef"]);
}

#[test]
fn overwrite_past_end_appends() {
    let mut ed = editor_with(&["ab"]);
    feed(&mut ed, b"$Rxyz\x1b");
    assert_eq!(contents(&ed), vec!["axyz"]);
}

#[test]
fn change_commands_undo_as_one() {
    let mut ed = editor_with(&["one two", "three"]);
    feed(&mut ed, b"cwX\x1b");
    assert_eq!(contents(&ed), vec!["X two", "three"]);
    feed(&mut ed, b"u");
    assert_eq!(contents(&ed), vec!["one two", "three"]);

    feed(&mut ed, b"ccnew\x1b");
    assert_eq!(contents(&ed), vec!["new", "three"]);
    feed(&mut ed, b"u");
    assert_eq!(contents(&ed), vec!["one two", "three"]);

    feed(&mut ed, b"CEND\x1b");
    assert_eq!(contents(&ed), vec!["END", "three"]);
    feed(&mut ed, b"u");
    assert_eq!(contents(&ed), vec!["one two", "three"]);
}

#[test]
fn substitute_char_command() {
    let mut ed = editor_with(&["abcd"]);
    feed(&mut ed, b"2sXY\x1b");
    assert_eq!(contents(&ed), vec!["XYcd"]);
}

#[test]
fn wrap_margin_splits_long_lines() {
    let mut ed = editor_with(&[""]);
    core_actions::ex::execute(&mut ed, b"set wrapmargin=20");
    // Type past column 60 (80 - 20): the trailing word wraps.
    let mut text = Vec::new();
    for _ in 0..12 {
        text.extend_from_slice(b"word ");
    }
    text.extend_from_slice(b"last");
    let mut input = b"i".to_vec();
    input.extend_from_slice(&text);
    input.push(0x1b);
    feed(&mut ed, &input);
    let lines = contents(&ed);
    assert!(lines.len() >= 2, "expected a wrap, got {lines:?}");
    // No line crosses the margin and no content is lost.
    for l in &lines {
        assert!(l.len() <= 80);
    }
    let rejoined = lines.join(" ");
    assert!(rejoined.contains("last"));
}

#[test]
fn dot_replays_insert() {
    let mut ed = editor_with(&["x"]);
    feed(&mut ed, b"a!\x1b");
    assert_eq!(contents(&ed), vec!["x!"]);
    feed(&mut ed, b".");
    assert_eq!(contents(&ed), vec!["x!!"]);
}

#[test]
fn insert_records_less_than_register() {
    let mut ed = editor_with(&[""]);
    feed(&mut ed, b"ihello\x1b");
    let reg = ed
        .registers
        .get(core_state::RegisterName::Insert)
        .cloned()
        .unwrap();
    assert_eq!(reg.as_input(), b"hello".to_vec());
}
