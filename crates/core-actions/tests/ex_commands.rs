//! The ex layer end to end: colon commands typed at the editor, file
//! round trips, maps, and the search scenarios.

mod common;

use common::{contents, cursor_lineno, editor_with, feed};
use pretty_assertions::assert_eq;

fn ex(ed: &mut core_actions::Editor, line: &str) {
    core_actions::ex::execute(ed, line.as_bytes());
}

#[test]
fn colon_commands_typed_through_cmdline() {
    let mut ed = editor_with(&["a", "b", "c"]);
    feed(&mut ed, b":2,3d\r");
    assert_eq!(contents(&ed), vec!["a"]);
    // ESC abandons a half-typed command.
    feed(&mut ed, b":1d\x1b");
    assert_eq!(contents(&ed), vec!["a"]);
}

#[test]
fn substitute_scenario_with_backrefs() {
    let mut ed = editor_with(&[" hello world "]);
    feed(&mut ed, b":s/\\([a-z]\\+\\) \\([a-z]\\+\\)/\\2 \\1/\r");
    assert_eq!(contents(&ed), vec![" world hello "]);
    // Repeating via :& is a no-op on this input.
    feed(&mut ed, b":&\r");
    assert_eq!(contents(&ed), vec![" world hello "]);
}

#[test]
fn global_delete_scenario() {
    let mut ed = editor_with(&["a", "bb", "ccc", "dd", "e"]);
    feed(&mut ed, b":g/[a-c]/d\r");
    assert_eq!(contents(&ed), vec!["dd", "e"]);
}

#[test]
fn vglobal_keeps_matching_lines() {
    let mut ed = editor_with(&["keep", "drop", "keep"]);
    ex(&mut ed, "v/keep/d");
    assert_eq!(contents(&ed), vec!["keep", "keep"]);
}

#[test]
fn search_and_repeat() {
    let mut ed = editor_with(&["nothing", "target here", "more", "target again"]);
    feed(&mut ed, b"/target\r");
    assert_eq!(cursor_lineno(&ed), 2);
    feed(&mut ed, b"n");
    assert_eq!(cursor_lineno(&ed), 4);
    // Wrapscan takes n past the end back to the first match.
    feed(&mut ed, b"n");
    assert_eq!(cursor_lineno(&ed), 2);
    feed(&mut ed, b"N");
    assert_eq!(cursor_lineno(&ed), 4);
    // With nowrapscan the search stops failing at the edge.
    ex(&mut ed, "set nowrapscan");
    feed(&mut ed, b"n");
    assert_eq!(cursor_lineno(&ed), 4);
    assert!(ed.message.as_deref().unwrap().contains("not found"));
}

#[test]
fn move_and_copy_lines() {
    let mut ed = editor_with(&["one", "two", "three"]);
    ex(&mut ed, "1m$");
    assert_eq!(contents(&ed), vec!["two", "three", "one"]);
    ex(&mut ed, "3co0");
    assert_eq!(contents(&ed), vec!["one", "two", "three", "one"]);
    ex(&mut ed, "1,2t$");
    assert_eq!(
        contents(&ed),
        vec!["one", "two", "three", "one", "one", "two"]
    );
}

#[test]
fn yank_put_and_join() {
    let mut ed = editor_with(&["aa", "bb"]);
    ex(&mut ed, "1y");
    ex(&mut ed, "2pu");
    assert_eq!(contents(&ed), vec!["aa", "bb", "aa"]);
    ex(&mut ed, "1,2j");
    assert_eq!(contents(&ed), vec!["aa bb", "aa"]);
}

#[test]
fn set_command_and_display_forms() {
    let mut ed = editor_with(&["x"]);
    ex(&mut ed, "set number shiftwidth=4");
    assert!(ed.params.is_set(core_config::ParamId::Number));
    assert_eq!(ed.params.num(core_config::ParamId::Shiftwidth), 4);
    ex(&mut ed, "set");
    let m = ed.message.clone().unwrap();
    assert!(m.contains("number"), "{m}");
    assert!(m.contains("shiftwidth=4"), "{m}");
    ex(&mut ed, "set shiftwidth=0");
    assert!(ed.message.as_deref().unwrap().contains("Invalid"));
}

#[test]
fn map_applies_and_unmap_removes() {
    let mut ed = editor_with(&["one", "two"]);
    ex(&mut ed, "map Q dd");
    feed(&mut ed, b"Q");
    assert_eq!(contents(&ed), vec!["two"]);
    ex(&mut ed, "unmap Q");
    feed(&mut ed, b"Q");
    assert_eq!(contents(&ed), vec!["two"]);
}

#[test]
fn map_bang_applies_in_insert_mode() {
    let mut ed = editor_with(&[""]);
    ex(&mut ed, "map! ; XY");
    feed(&mut ed, b"ia;b\x1b");
    assert_eq!(contents(&ed), vec!["aXYb"]);
}

#[test]
fn recursive_maps_do_not_hang() {
    let mut ed = editor_with(&[""]);
    ex(&mut ed, "map x y");
    ex(&mut ed, "map y x");
    // With remap off, typing x produces the single mapped step.
    ex(&mut ed, "set noremap");
    feed(&mut ed, b"ix\x1b");
    // 'x' maps applied in command mode only; in insert it is literal.
    assert_eq!(contents(&ed), vec!["x"]);
    // With remap on, the expansion is bounded and must terminate.
    ex(&mut ed, "set remap");
    feed(&mut ed, b"x");
    // Reaching this line at all is the assertion.
}

#[test]
fn write_and_read_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out.txt");
    let spec = path.to_str().unwrap();

    let mut ed = editor_with(&["alpha", "beta"]);
    ex(&mut ed, &format!("w {spec}"));
    assert_eq!(std::fs::read(&path).unwrap(), b"alpha\nbeta\n");

    // Read it back under the current line.
    ex(&mut ed, &format!("1r {spec}"));
    assert_eq!(contents(&ed), vec!["alpha", "alpha", "beta", "beta"]);
}

#[test]
fn edit_loads_file_and_tracks_alternate() {
    let dir = tempfile::tempdir().unwrap();
    let a = dir.path().join("a.txt");
    let b = dir.path().join("b.txt");
    std::fs::write(&a, b"file a\n").unwrap();
    std::fs::write(&b, b"file b\n").unwrap();

    let mut ed = editor_with(&[""]);
    ex(&mut ed, &format!("e {}", a.display()));
    assert_eq!(contents(&ed), vec!["file a"]);
    ex(&mut ed, &format!("e {}", b.display()));
    assert_eq!(contents(&ed), vec!["file b"]);
    assert_eq!(ed.alt_file.as_deref(), Some(a.to_str().unwrap()));
    // `#` expands to the alternate name.
    ex(&mut ed, "e #");
    assert_eq!(contents(&ed), vec!["file a"]);
}

#[test]
fn edit_refuses_to_discard_changes() {
    let dir = tempfile::tempdir().unwrap();
    let a = dir.path().join("a.txt");
    std::fs::write(&a, b"content\n").unwrap();

    let mut ed = editor_with(&["modified stuff"]);
    ed.curbuf_mut().set_modified(true);
    ex(&mut ed, &format!("e {}", a.display()));
    assert!(ed.message.as_deref().unwrap().contains("No write"));
    assert_eq!(contents(&ed), vec!["modified stuff"]);
    ex(&mut ed, &format!("e! {}", a.display()));
    assert_eq!(contents(&ed), vec!["content"]);
}

#[test]
fn quit_with_changes_needs_bang() {
    let mut ed = editor_with(&["dirty"]);
    ed.curbuf_mut().set_modified(true);
    ex(&mut ed, "q");
    assert!(ed.exit_code.is_none());
    assert!(ed.message.as_deref().unwrap().contains("No write"));
    ex(&mut ed, "q!");
    assert_eq!(ed.exit_code, Some(0));
}

#[test]
fn filter_range_through_command() {
    let mut ed = editor_with(&["b", "a", "c"]);
    ex(&mut ed, "1,3!sort");
    assert_eq!(contents(&ed), vec!["a", "b", "c"]);
    // One undo restores the pre-filter text.
    feed(&mut ed, b"u");
    assert_eq!(contents(&ed), vec!["b", "a", "c"]);
}

#[test]
fn read_from_command_output() {
    let mut ed = editor_with(&["top"]);
    ex(&mut ed, "r !printf 'x\\ny\\n'");
    assert_eq!(contents(&ed), vec!["top", "x", "y"]);
}

#[test]
fn shift_commands() {
    let mut ed = editor_with(&["a", "b"]);
    ex(&mut ed, "1,2>");
    assert_eq!(contents(&ed), vec!["\ta", "\tb"]);
    ex(&mut ed, "1<");
    assert_eq!(contents(&ed), vec!["a", "\tb"]);
}

#[test]
fn mark_command_and_address() {
    let mut ed = editor_with(&["one", "two", "three"]);
    ex(&mut ed, "2k m");
    ex(&mut ed, "'m");
    assert_eq!(cursor_lineno(&ed), 2);
    ex(&mut ed, "'m,'md");
    assert_eq!(contents(&ed), vec!["one", "three"]);
}

#[test]
fn split_and_close_windows() {
    let mut ed = editor_with(&["x"]);
    ex(&mut ed, "split");
    assert_eq!(ed.layout.len(), 2);
    ed.layout.check_accounting().unwrap();
    ex(&mut ed, "close");
    assert_eq!(ed.layout.len(), 1);
    ed.layout.check_accounting().unwrap();
}

#[test]
fn source_runs_command_file() {
    let dir = tempfile::tempdir().unwrap();
    let script = dir.path().join("cmds.vix");
    std::fs::write(&script, b"set number\n\" a comment\nset shiftwidth=2\n").unwrap();
    let mut ed = editor_with(&["x"]);
    ex(&mut ed, &format!("so {}", script.display()));
    assert!(ed.params.is_set(core_config::ParamId::Number));
    assert_eq!(ed.params.num(core_config::ParamId::Shiftwidth), 2);
}

#[test]
fn undo_and_redo_commands() {
    let mut ed = editor_with(&["keep", "drop"]);
    ex(&mut ed, "2d");
    assert_eq!(contents(&ed), vec!["keep"]);
    ex(&mut ed, "undo");
    assert_eq!(contents(&ed), vec!["keep", "drop"]);
    ex(&mut ed, "redo");
    assert_eq!(contents(&ed), vec!["keep"]);
}

#[test]
fn wq_with_partial_range_still_writes_then_quits() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("part.txt");
    let mut ed = editor_with(&["one", "two", "three"]);
    ex(&mut ed, &format!("1,2wq {}", path.display()));
    assert_eq!(std::fs::read(&path).unwrap(), b"one\ntwo\n");
    assert_eq!(ed.exit_code, Some(0));
}

#[test]
fn bang_operator_preloads_command_line() {
    let mut ed = editor_with(&["b", "a"]);
    feed(&mut ed, b"!jsort\r");
    assert_eq!(contents(&ed), vec!["a", "b"]);
}
