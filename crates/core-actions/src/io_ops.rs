//! Reading and writing buffer files in the supported line formats.
//!
//! Files are byte streams; the `format` parameter names the terminator
//! dialect. With auto-detection the first terminator seen in the stream
//! picks the format. NUL bytes are counted and dropped with a
//! diagnostic, and a final line without its terminator is loaded but
//! flagged so the status line can say "incomplete last line".

use std::fs;
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use core_config::{FORMAT_CHOICES, ParamId, Params};
use tracing::{debug, info};

/// Line-terminator dialects, in `FORMAT_CHOICES` order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Cstring,
    Macintosh,
    Msdos,
    Os2,
    Qnx,
    Tos,
    Unix,
}

impl FileFormat {
    pub fn from_index(ix: usize) -> Self {
        match FORMAT_CHOICES.get(ix).copied() {
            Some("cstring") => FileFormat::Cstring,
            Some("macintosh") => FileFormat::Macintosh,
            Some("msdos") => FileFormat::Msdos,
            Some("os2") => FileFormat::Os2,
            Some("qnx") => FileFormat::Qnx,
            Some("tos") => FileFormat::Tos,
            _ => FileFormat::Unix,
        }
    }

    pub fn index(self) -> usize {
        match self {
            FileFormat::Cstring => 0,
            FileFormat::Macintosh => 1,
            FileFormat::Msdos => 2,
            FileFormat::Os2 => 3,
            FileFormat::Qnx => 4,
            FileFormat::Tos => 5,
            FileFormat::Unix => 6,
        }
    }

    pub fn name(self) -> &'static str {
        FORMAT_CHOICES[self.index()]
    }

    /// Terminator byte sequence emitted on write.
    pub fn terminator(self) -> &'static [u8] {
        match self {
            FileFormat::Cstring => b"\0",
            FileFormat::Macintosh => b"\r",
            FileFormat::Msdos | FileFormat::Os2 | FileFormat::Tos => b"\r\n",
            FileFormat::Qnx => b"\x1e",
            FileFormat::Unix => b"\n",
        }
    }

    pub fn from_params(params: &Params) -> Self {
        Self::from_index(params.enum_ix(ParamId::Format))
    }
}

/// What a read produced besides the lines themselves.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ReadStats {
    pub nul_bytes: usize,
    pub incomplete_last_line: bool,
    /// Format actually used (after auto-detection).
    pub format: Option<FileFormat>,
    pub lines: usize,
    pub bytes: usize,
}

/// Sniff the format from the first terminator byte in the stream.
fn detect_format(bytes: &[u8]) -> Option<FileFormat> {
    for (i, &b) in bytes.iter().enumerate() {
        match b {
            b'\0' => return Some(FileFormat::Cstring),
            b'\n' => return Some(FileFormat::Unix),
            b'\r' => {
                return Some(if bytes.get(i + 1) == Some(&b'\n') {
                    FileFormat::Msdos
                } else {
                    FileFormat::Macintosh
                });
            }
            0x1e => return Some(FileFormat::Qnx),
            _ => {}
        }
    }
    None
}

/// Split a byte stream into lines. NULs inside lines are dropped and
/// counted (except in the cstring format, where NUL is the terminator).
pub fn split_lines(bytes: &[u8], format: FileFormat) -> (Vec<Vec<u8>>, ReadStats) {
    let mut stats = ReadStats {
        format: Some(format),
        bytes: bytes.len(),
        ..ReadStats::default()
    };
    let term = format.terminator();
    let mut lines: Vec<Vec<u8>> = Vec::new();
    let mut cur: Vec<u8> = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i..].starts_with(term) {
            lines.push(std::mem::take(&mut cur));
            i += term.len();
            continue;
        }
        let b = bytes[i];
        if b == 0 && format != FileFormat::Cstring {
            stats.nul_bytes += 1;
        } else {
            cur.push(b);
        }
        i += 1;
    }
    if !cur.is_empty() {
        stats.incomplete_last_line = true;
        lines.push(cur);
    }
    stats.lines = lines.len();
    (lines, stats)
}

/// Read a file into lines, honouring `format` or auto-detecting when
/// `autodetect` is set. A missing file is not an error here; the caller
/// distinguishes "new file" from real failures.
pub fn read_file(path: &Path, params: &Params, autodetect: bool) -> Result<(Vec<Vec<u8>>, ReadStats)> {
    let bytes = fs::read(path).with_context(|| format!("{}: cannot read", path.display()))?;
    let format = if autodetect {
        detect_format(&bytes).unwrap_or_else(|| FileFormat::from_params(params))
    } else {
        FileFormat::from_params(params)
    };
    let (lines, stats) = split_lines(&bytes, format);
    info!(
        target: "io.file",
        path = %path.display(),
        lines = stats.lines,
        format = format.name(),
        nuls = stats.nul_bytes,
        "read"
    );
    Ok((lines, stats))
}

/// Write lines with the active format's terminator after every line.
/// Returns (lines, bytes) written.
pub fn write_lines<'a, I>(path: &Path, lines: I, format: FileFormat) -> Result<(usize, usize)>
where
    I: Iterator<Item = &'a [u8]>,
{
    let mut f = fs::File::create(path)
        .with_context(|| format!("{}: cannot create", path.display()))?;
    let term = format.terminator();
    let mut nlines = 0usize;
    let mut nbytes = 0usize;
    for line in lines {
        f.write_all(line)
            .with_context(|| format!("{}: write failed", path.display()))?;
        f.write_all(term)
            .with_context(|| format!("{}: write failed", path.display()))?;
        nlines += 1;
        nbytes += line.len() + term.len();
    }
    f.flush()?;
    debug!(target: "io.file", path = %path.display(), lines = nlines, "written");
    Ok((nlines, nbytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn unix_round_trip() {
        let (lines, stats) = split_lines(b"one\ntwo\n", FileFormat::Unix);
        assert_eq!(lines, vec![b"one".to_vec(), b"two".to_vec()]);
        assert!(!stats.incomplete_last_line);
        assert_eq!(stats.lines, 2);
    }

    #[test]
    fn msdos_terminators() {
        let (lines, _) = split_lines(b"a\r\nb\r\n", FileFormat::Msdos);
        assert_eq!(lines, vec![b"a".to_vec(), b"b".to_vec()]);
        // A lone \r inside an msdos file stays in the line.
        let (lines, _) = split_lines(b"a\rb\r\n", FileFormat::Msdos);
        assert_eq!(lines, vec![b"a\rb".to_vec()]);
    }

    #[test]
    fn detect_prefers_first_terminator() {
        assert_eq!(detect_format(b"x\ny\r\n"), Some(FileFormat::Unix));
        assert_eq!(detect_format(b"x\r\ny\n"), Some(FileFormat::Msdos));
        assert_eq!(detect_format(b"x\ry"), Some(FileFormat::Macintosh));
        assert_eq!(detect_format(b"x\x1ey"), Some(FileFormat::Qnx));
        assert_eq!(detect_format(b"plain"), None);
    }

    #[test]
    fn nuls_dropped_and_counted() {
        let (lines, stats) = split_lines(b"a\0b\nc\n", FileFormat::Unix);
        assert_eq!(lines, vec![b"ab".to_vec(), b"c".to_vec()]);
        assert_eq!(stats.nul_bytes, 1);
    }

    #[test]
    fn incomplete_last_line_flagged() {
        let (lines, stats) = split_lines(b"done\npartial", FileFormat::Unix);
        assert_eq!(lines.len(), 2);
        assert!(stats.incomplete_last_line);
    }

    #[test]
    fn write_then_read_is_identity() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        let lines: Vec<Vec<u8>> = vec![b"alpha".to_vec(), b"beta".to_vec()];
        let (n, bytes) =
            write_lines(&path, lines.iter().map(Vec::as_slice), FileFormat::Unix).unwrap();
        assert_eq!(n, 2);
        assert_eq!(bytes, 11);
        let back = std::fs::read(&path).unwrap();
        assert_eq!(back, b"alpha\nbeta\n");
        let (lines2, _) = split_lines(&back, FileFormat::Unix);
        assert_eq!(lines2, lines);
    }

    #[test]
    fn cstring_format_uses_nul() {
        let (lines, stats) = split_lines(b"a\0b\0", FileFormat::Cstring);
        assert_eq!(lines, vec![b"a".to_vec(), b"b".to_vec()]);
        assert_eq!(stats.nul_bytes, 0);
    }
}
