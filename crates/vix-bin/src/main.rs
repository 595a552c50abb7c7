//! vix entry point: startup, the terminal event pump, and teardown.
//!
//! The editor core is synchronous; this binary owns the only blocking
//! point (a poll-with-timeout on terminal input), translates crossterm
//! events into core events, and repaints after every one. Logging goes
//! through a file appender since stdout belongs to the raw-mode screen.

use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use crossterm::event::{
    self, KeyCode, KeyEvent, KeyModifiers, MouseButton, MouseEvent, MouseEventKind,
};
use tracing::{error, info};

use core_actions::{Editor, dispatcher, display, ex};
use core_events::{Event, EventResponse, signals};
use core_terminal::{CrosstermBackend, TerminalSession};

mod args;

use args::{Cli, StartJump};

fn main() -> ExitCode {
    let cli = Cli::parse();
    let _log_guard = init_logging();

    let mut ed = match startup(&cli) {
        Ok(ed) => ed,
        Err(e) => {
            eprintln!("vix: {e}");
            return ExitCode::from(1);
        }
    };

    let mut session = match TerminalSession::begin() {
        Ok(s) => s,
        Err(e) => {
            eprintln!("vix: {e}");
            return ExitCode::from(2);
        }
    };

    let code = match run(&mut ed, &mut session) {
        Ok(code) => code,
        Err(e) => {
            error!(target: "main", error = %e, "fatal terminal failure");
            dispatcher::preserve_all(&mut ed);
            2
        }
    };
    drop(session);
    ExitCode::from(code as u8)
}

fn init_logging() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let dir = std::env::temp_dir();
    let appender = tracing_appender::rolling::never(dir, "vix.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let filter = tracing_subscriber::EnvFilter::try_from_env("VIX_LOG")
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .init();
    Some(guard)
}

/// Build the editor from the environment and command line.
fn startup(cli: &Cli) -> Result<Editor> {
    let (rows, cols) = initial_geometry();
    let mut ed = Editor::new(rows, cols);

    // SHELL seeds the shell parameter before -s can override it.
    if let Ok(shell) = std::env::var("SHELL")
        && !shell.is_empty()
    {
        let _ = ed.params.set_parsed(core_config::ParamId::Shell, &shell);
    }
    for setting in &cli.set {
        let effects = ed
            .params
            .set_from_arg(setting)
            .with_context(|| format!("-s {setting}"))?;
        ed.apply_param_effects(&effects);
    }

    install_key_map(&mut ed);

    let (jump, files) = args::split_positionals(cli.files.clone());
    ed.files = files;
    if !ed.files.is_empty() {
        let first = ed.files[0].clone();
        ex::edit_file(&mut ed, Some(&first), true);
    }
    match jump {
        StartJump::None => {}
        StartJump::Line(n) => ex::execute(&mut ed, n.to_string().as_bytes()),
        StartJump::LastLine => ex::execute(&mut ed, b"$"),
        StartJump::Pattern(pat) => {
            let mut cmd = Vec::from(&b"/"[..]);
            cmd.extend_from_slice(pat.as_bytes());
            ed.keymap.stuff(&cmd);
            ed.keymap.stuff(b"\r");
            dispatcher::drain_input(&mut ed);
        }
    }
    if let Some(tag) = &cli.tag {
        ex::tag_to(&mut ed, tag.as_bytes(), false);
    }

    // VIXINIT runs as a line of ex commands.
    if let Ok(init) = std::env::var("VIXINIT") {
        for cmd in args::split_init_commands(&init) {
            ex::execute(&mut ed, cmd.as_bytes());
        }
    }
    info!(target: "main", files = ed.files.len(), "started");
    Ok(ed)
}

/// Terminal geometry, with LINES/COLUMNS overriding what the device
/// reports.
fn initial_geometry() -> (usize, usize) {
    let (mut rows, mut cols) = TerminalSession::size();
    if let Ok(v) = std::env::var("LINES")
        && let Ok(n) = v.parse()
    {
        rows = n;
    }
    if let Ok(v) = std::env::var("COLUMNS")
        && let Ok(n) = v.parse()
    {
        cols = n;
    }
    (rows.max(2), cols.max(20))
}

/// Teach the raw-to-canonical stage the escape sequences this terminal
/// emits for the movement keys.
fn install_key_map(ed: &mut Editor) {
    let pairs: &[(&[u8], &[u8])] = &[
        (b"\x1b[A", b"k"),
        (b"\x1b[B", b"j"),
        (b"\x1b[C", b"l"),
        (b"\x1b[D", b"h"),
        (b"\x1bOA", b"k"),
        (b"\x1bOB", b"j"),
        (b"\x1bOC", b"l"),
        (b"\x1bOD", b"h"),
        (b"\x1b[H", b"0"),
        (b"\x1b[F", b"$"),
        (b"\x1b[5~", b"\x02"), // page up -> ^B
        (b"\x1b[6~", b"\x06"), // page down -> ^F
        (b"\x1b[3~", b"x"),    // delete
    ];
    for (lhs, rhs) in pairs {
        ed.keymap.key_map.insert(lhs, rhs);
    }
}

fn run(ed: &mut Editor, session: &mut TerminalSession) -> Result<i32> {
    let (rows, cols) = (ed.screen.rows(), ed.screen.cols());
    let mut backend = CrosstermBackend::new(rows, cols);
    let _ = crossterm::execute!(std::io::stdout(), event::EnableMouseCapture);
    let mut response = dispatcher::response(ed);
    let mut drag_from: Option<(usize, usize)> = None;

    loop {
        let timeout_ms = match response {
            EventResponse::Exit(code) => {
                let _ = crossterm::execute!(std::io::stdout(), event::DisableMouseCapture);
                return Ok(code);
            }
            EventResponse::TimedInput { timeout_ms } => timeout_ms,
        };

        display::update_all(ed);
        ed.screen.flush(&mut backend);
        if std::mem::take(&mut ed.bell_pending) {
            use core_render::ScreenBackend;
            backend.beep();
        }
        if std::mem::take(&mut ed.suspend_pending) {
            suspend(ed, session)?;
            response = dispatcher::response(ed);
            continue;
        }

        // Sample the signal flags before blocking.
        if signals::take(&signals::TERMINATE) {
            response = dispatcher::handle_event(ed, Event::Terminate);
            continue;
        }
        if signals::take(&signals::DISCONNECTED) {
            response = dispatcher::handle_event(ed, Event::Disconnected);
            continue;
        }
        if signals::take(&signals::SUSPEND_REQUEST) {
            response = dispatcher::handle_event(ed, Event::SuspendRequest);
            continue;
        }
        if signals::take(&signals::SIZE_CHANGED) {
            let (r, c) = TerminalSession::size();
            backend.set_size(r, c);
            response = dispatcher::handle_event(ed, Event::Resize { rows: r, cols: c });
            continue;
        }

        let wait = if timeout_ms == 0 {
            Duration::from_secs(3600)
        } else {
            Duration::from_millis(timeout_ms)
        };
        let events = if event::poll(wait).context("terminal poll failed")? {
            translate(event::read().context("terminal read failed")?, &mut drag_from)
        } else {
            vec![Event::Timeout]
        };
        for ev in events {
            response = dispatcher::handle_event(ed, ev);
        }
    }
}

/// Map one crossterm event onto core events (usually raw input bytes).
fn translate(ev: event::Event, drag_from: &mut Option<(usize, usize)>) -> Vec<Event> {
    match ev {
        event::Event::Key(key) => {
            if key.modifiers.contains(KeyModifiers::CONTROL) {
                // Interrupt and suspend arrive as events, not input
                // bytes; long-running loops also poll the flag.
                if key.code == KeyCode::Char('c') {
                    signals::raise_interrupt();
                    return vec![Event::Breakin];
                }
                if key.code == KeyCode::Char('z') {
                    return vec![Event::SuspendRequest];
                }
            }
            key_bytes(key).into_iter().map(Event::Char).collect()
        }
        event::Event::Resize(cols, rows) => {
            signals::raise(&signals::SIZE_CHANGED);
            let _ = (cols, rows);
            Vec::new()
        }
        event::Event::Mouse(MouseEvent {
            kind, column, row, ..
        }) => match kind {
            MouseEventKind::Down(MouseButton::Left) => {
                *drag_from = Some((row as usize, column as usize));
                vec![Event::MouseClick {
                    row: row as usize,
                    col: column as usize,
                }]
            }
            MouseEventKind::Drag(MouseButton::Left) => {
                let (fr, fc) = drag_from.unwrap_or((row as usize, column as usize));
                vec![Event::MouseDrag {
                    from_row: fr,
                    from_col: fc,
                    to_row: row as usize,
                    to_col: column as usize,
                }]
            }
            MouseEventKind::Moved => vec![Event::MouseMove {
                row: row as usize,
            }],
            _ => Vec::new(),
        },
        _ => Vec::new(),
    }
}

/// Flatten a key event into the byte stream the keymap stage eats.
fn key_bytes(key: KeyEvent) -> Vec<u8> {
    let mut out = Vec::with_capacity(4);
    if key.modifiers.contains(KeyModifiers::ALT) {
        out.push(0x1b);
    }
    match key.code {
        KeyCode::Char(c) => {
            if key.modifiers.contains(KeyModifiers::CONTROL) {
                match c {
                    c if c.is_ascii_alphabetic() => {
                        out.push((c.to_ascii_uppercase() as u8) & 0x1f);
                    }
                    '^' => out.push(0x1e),
                    ']' => out.push(0x1d),
                    _ => {}
                }
            } else if c.is_ascii() {
                out.push(c as u8);
            } else {
                // Byte-oriented core: non-ASCII input arrives as its
                // UTF-8 bytes.
                let mut buf = [0u8; 4];
                out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
            }
        }
        KeyCode::Enter => out.push(b'\r'),
        KeyCode::Esc => out.push(0x1b),
        KeyCode::Backspace => out.push(0x08),
        KeyCode::Tab => out.push(b'\t'),
        KeyCode::Up => out.extend_from_slice(b"\x1b[A"),
        KeyCode::Down => out.extend_from_slice(b"\x1b[B"),
        KeyCode::Right => out.extend_from_slice(b"\x1b[C"),
        KeyCode::Left => out.extend_from_slice(b"\x1b[D"),
        KeyCode::Home => out.extend_from_slice(b"\x1b[H"),
        KeyCode::End => out.extend_from_slice(b"\x1b[F"),
        KeyCode::PageUp => out.extend_from_slice(b"\x1b[5~"),
        KeyCode::PageDown => out.extend_from_slice(b"\x1b[6~"),
        KeyCode::Delete => out.extend_from_slice(b"\x1b[3~"),
        _ => {}
    }
    out
}

/// `:stop` / `^Z` without job control: drop to a subshell, then repaint.
fn suspend(ed: &mut Editor, session: &mut TerminalSession) -> Result<()> {
    session.pause()?;
    let shell = ed.params.string(core_config::ParamId::Shell).to_string();
    let status = std::process::Command::new(&shell).status();
    session.resume()?;
    ed.screen.invalidate();
    for buf in &mut ed.buffers {
        buf.dirty.mark_from(1);
    }
    if let Err(e) = status {
        ed.show_error(format!("{shell}: {e}"));
    }
    Ok(())
}
