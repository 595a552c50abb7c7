//! Preservation: periodic serialisation of modified buffers to
//! recoverable files.
//!
//! A preserve file sits next to the buffer's file, named `#name.tmp`
//! (then `#name.001` ... when taken), falling back to the system temp
//! directory when the sibling directory is unwritable. The `preserve`
//! parameter picks the policy; the timer fires after `preservetime`
//! seconds once enough keystrokes have accumulated.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Result, anyhow};
use core_config::{PRESERVE_CHOICES, ParamId, Params};
use core_events::PSVKEYS;
use core_state::Buffer;
use tracing::{info, warn};

use crate::io_ops::{self, FileFormat};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreservePolicy {
    /// Never preserve before a write.
    Unsafe,
    /// Preserve only when no recent preserve file exists.
    Standard,
    /// Always preserve before a write.
    Safe,
    /// As safe, and the preserve file is never deleted.
    Paranoid,
}

impl PreservePolicy {
    pub fn from_params(params: &Params) -> Self {
        match PRESERVE_CHOICES[params.enum_ix(ParamId::Preserve)] {
            "unsafe" => PreservePolicy::Unsafe,
            "safe" => PreservePolicy::Safe,
            "paranoid" => PreservePolicy::Paranoid,
            _ => PreservePolicy::Standard,
        }
    }
}

/// Timer/keystroke state deciding when the periodic preserve runs.
#[derive(Debug)]
pub struct PreserveClock {
    keystrokes: u32,
    last: Instant,
}

impl Default for PreserveClock {
    fn default() -> Self {
        Self {
            keystrokes: 0,
            last: Instant::now(),
        }
    }
}

impl PreserveClock {
    pub fn note_keystroke(&mut self) {
        self.keystrokes = self.keystrokes.saturating_add(1);
    }

    /// Enough typing since the last preserve to arm the timer?
    pub fn armed(&self) -> bool {
        self.keystrokes >= PSVKEYS
    }

    pub fn due(&self, params: &Params) -> bool {
        self.armed()
            && self.last.elapsed() >= Duration::from_secs(params.num(ParamId::Preservetime) as u64)
    }

    pub fn reset(&mut self) {
        self.keystrokes = 0;
        self.last = Instant::now();
    }
}

/// Candidate preserve paths for a buffer file: `#name.tmp`, then
/// `#name.001` .. `#name.999`, in the file's directory.
fn candidate_paths(file: &Path) -> impl Iterator<Item = PathBuf> + '_ {
    let dir = file.parent().map(Path::to_path_buf).unwrap_or_default();
    let stem = file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "unnamed".into());
    (0..=999usize).map(move |i| {
        let name = if i == 0 {
            format!("#{stem}.tmp")
        } else {
            format!("#{stem}.{i:03}")
        };
        dir.join(name)
    })
}

fn pick_path(file: &Path, reuse: Option<&Path>) -> PathBuf {
    if let Some(p) = reuse {
        return p.to_path_buf();
    }
    for cand in candidate_paths(file) {
        if !cand.exists() {
            return cand;
        }
    }
    std::env::temp_dir().join(format!(
        "#{}.psv",
        file.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "unnamed".into())
    ))
}

/// Serialise one modified buffer. Records the preserve path on the
/// buffer so later preserves overwrite the same file. Falls back to the
/// temp directory when the sibling directory refuses the write.
pub fn preserve_buffer(buf: &mut Buffer, format: FileFormat) -> Result<PathBuf> {
    if !buf.is_modified() {
        return Err(anyhow!("buffer not modified"));
    }
    let source = buf
        .filename
        .clone()
        .unwrap_or_else(|| "unnamed".to_string());
    let path = pick_path(Path::new(&source), buf.tempfname.as_deref());
    let lines: Vec<&[u8]> = buf
        .lines
        .iter_from(buf.lines.first())
        .map(|id| buf.lines.text(id))
        .collect();
    let written = io_ops::write_lines(&path, lines.iter().copied(), format);
    let path = match written {
        Ok(_) => path,
        Err(first_err) => {
            let fallback = std::env::temp_dir().join(
                path.file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "#unnamed.tmp".into()),
            );
            warn!(
                target: "io.preserve",
                error = %first_err,
                fallback = %fallback.display(),
                "sibling dir unwritable"
            );
            io_ops::write_lines(&fallback, lines.iter().copied(), format)?;
            fallback
        }
    };
    buf.tempfname = Some(path.clone());
    info!(target: "io.preserve", path = %path.display(), "buffer preserved");
    Ok(path)
}

/// Should a `:w` be preceded by a preserve under this policy?
pub fn preserve_before_write(policy: PreservePolicy, buf: &Buffer) -> bool {
    match policy {
        PreservePolicy::Unsafe => false,
        PreservePolicy::Standard => buf.tempfname.is_none(),
        PreservePolicy::Safe | PreservePolicy::Paranoid => true,
    }
}

/// May the preserve file be removed after a successful write?
pub fn removable_after_write(policy: PreservePolicy) -> bool {
    !matches!(policy, PreservePolicy::Paranoid)
}
