//! Shell filters: run a command with buffer lines on stdin and/or
//! collect its stdout as buffer lines.
//!
//! Covers the three shapes the ex layer needs: `:[range]!cmd` (filter
//! through), `:r !cmd` (read output only) and `:w !cmd` (write input
//! only). The command string goes through `shell -c`, with the shell
//! taken from the `shell` parameter.

use std::io::Write;
use std::process::{Command, Stdio};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info};

use crate::io_ops::{FileFormat, split_lines};

/// Run `cmd` under `shell`, feeding `input` lines (if any) and
/// collecting stdout lines (if wanted). Returns the collected lines and
/// the exit status.
pub fn run_filter(
    shell: &str,
    cmd: &str,
    input: Option<&[Vec<u8>]>,
    want_output: bool,
) -> Result<(Option<Vec<Vec<u8>>>, i32)> {
    let mut child = Command::new(shell)
        .arg("-c")
        .arg(cmd)
        .stdin(if input.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(if want_output {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stderr(Stdio::null())
        .spawn()
        .with_context(|| format!("cannot run {shell}"))?;

    if let Some(lines) = input {
        let mut stdin = child.stdin.take().ok_or_else(|| anyhow!("no child stdin"))?;
        for line in lines {
            stdin.write_all(line)?;
            stdin.write_all(b"\n")?;
        }
        // Dropping closes the pipe so the child sees EOF.
        drop(stdin);
    }

    let out = child.wait_with_output().context("filter command failed")?;
    let status = out.status.code().unwrap_or(-1);
    debug!(target: "io.pipe", cmd, status, "filter finished");

    let lines = if want_output {
        let (mut lines, stats) = split_lines(&out.stdout, FileFormat::Unix);
        if stats.incomplete_last_line {
            info!(target: "io.pipe", "filter output had incomplete last line");
        }
        if lines.is_empty() {
            lines.push(Vec::new());
        }
        Some(lines)
    } else {
        None
    };
    Ok((lines, status))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SH: &str = "/bin/sh";

    #[test]
    fn filter_transforms_lines() {
        let input = vec![b"banana".to_vec(), b"apple".to_vec()];
        let (out, status) = run_filter(SH, "sort", Some(&input), true).unwrap();
        assert_eq!(status, 0);
        assert_eq!(out.unwrap(), vec![b"apple".to_vec(), b"banana".to_vec()]);
    }

    #[test]
    fn read_only_collects_stdout() {
        let (out, status) = run_filter(SH, "printf 'a\\nb\\n'", None, true).unwrap();
        assert_eq!(status, 0);
        assert_eq!(out.unwrap(), vec![b"a".to_vec(), b"b".to_vec()]);
    }

    #[test]
    fn write_only_returns_no_lines() {
        let input = vec![b"x".to_vec()];
        let (out, status) = run_filter(SH, "cat > /dev/null", Some(&input), false).unwrap();
        assert_eq!(status, 0);
        assert!(out.is_none());
    }

    #[test]
    fn nonzero_exit_reported() {
        let (_, status) = run_filter(SH, "exit 3", None, false).unwrap();
        assert_eq!(status, 3);
    }

    #[test]
    fn empty_output_becomes_one_empty_line() {
        let (out, _) = run_filter(SH, "true", None, true).unwrap();
        assert_eq!(out.unwrap(), vec![Vec::<u8>::new()]);
    }
}
