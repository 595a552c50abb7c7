//! The tag cache: hashed lookup over every configured tags file.
//!
//! Loaded lazily on the first reference and dropped whole whenever the
//! `tags` or `taglength` parameter changes. Entries are bucketed by the
//! classic left-shift-XOR hash of the (length-capped) tag name, so two
//! names agreeing on the first `taglength` bytes land in the same chain
//! and compare equal there, exactly as the lookup wants.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use ahash::RandomState;
use core_config::{ParamId, Params};
use tracing::{debug, warn};

/// Longest identifier we will look up.
pub const TAG_ID_MAX: usize = 50;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagEntry {
    pub name: Vec<u8>,
    pub file: String,
    /// Either a decimal line number or a `/pat/` / `?pat?` search.
    pub locator: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagLocator<'a> {
    LineNumber(u64),
    Pattern(&'a [u8]),
}

impl TagEntry {
    /// Classify the locator, stripping the delimiters off a pattern.
    pub fn locator_kind(&self) -> Option<TagLocator<'_>> {
        match self.locator.first()? {
            b'0'..=b'9' => {
                let s = std::str::from_utf8(&self.locator).ok()?;
                let digits: String = s.chars().take_while(|c| c.is_ascii_digit()).collect();
                digits.parse().ok().map(TagLocator::LineNumber)
            }
            d @ (b'/' | b'?') => {
                let mut pat = &self.locator[1..];
                if pat.last() == Some(d) {
                    pat = &pat[..pat.len() - 1];
                }
                Some(TagLocator::Pattern(pat))
            }
            _ => None,
        }
    }
}

/// Result of a lookup against the text under the cursor.
#[derive(Debug, PartialEq, Eq)]
pub enum TagLookup<'a> {
    /// A tag matched `len` identifier bytes; `offset` spans the whole
    /// identifier run.
    Found {
        entry: &'a TagEntry,
        len: usize,
        offset: usize,
    },
    /// No tag. `len` identifier bytes were considered; `offset` counts
    /// bytes to skip before the next place a tag could start.
    NotFound { len: usize, offset: usize },
}

fn is_id(c: u8) -> bool {
    c.is_ascii_alphanumeric() || c == b'_'
}

fn tag_hash(name: &[u8]) -> u64 {
    let mut f = 0u64;
    for &c in name {
        f <<= 1;
        f ^= u64::from(c);
    }
    f
}

#[derive(Debug, Default)]
pub struct TagCache {
    table: Option<HashMap<u64, Vec<TagEntry>, RandomState>>,
}

impl TagCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop everything; the next lookup reloads.
    pub fn invalidate(&mut self) {
        self.table = None;
        debug!(target: "tags.cache", "invalidated");
    }

    pub fn is_loaded(&self) -> bool {
        self.table.is_some()
    }

    fn ensure_loaded(&mut self, params: &Params) {
        if self.table.is_some() {
            return;
        }
        let cap = taglength(params);
        let mut table: HashMap<u64, Vec<TagEntry>, RandomState> = HashMap::default();
        let mut total = 0usize;
        for file in params.list(ParamId::Tags) {
            match fs::read(Path::new(file)) {
                Ok(bytes) => {
                    for line in bytes.split(|&b| b == b'\n') {
                        if let Some(entry) = parse_tag_line(line, cap) {
                            let h = tag_hash(&entry.name);
                            table.entry(h).or_default().push(entry);
                            total += 1;
                        }
                    }
                }
                Err(e) => {
                    warn!(target: "tags.cache", file = %file, error = %e, "tags file unreadable");
                }
            }
        }
        debug!(target: "tags.cache", entries = total, "loaded");
        self.table = Some(table);
    }

    /// Look up the identifier starting at `text`. Reports, besides any
    /// match, how far the display scanner may skip: over the identifier
    /// run on a miss at an identifier, or over the non-identifier gap
    /// otherwise.
    pub fn lookup<'a>(&'a mut self, params: &Params, text: &[u8]) -> TagLookup<'a> {
        if text.is_empty() {
            return TagLookup::NotFound { len: 0, offset: 0 };
        }
        if !is_id(text[0]) {
            let gap = text.iter().take_while(|&&c| !is_id(c)).count();
            return TagLookup::NotFound {
                len: 0,
                offset: gap,
            };
        }
        self.ensure_loaded(params);
        let cap = taglength(params);
        let ident_full = text.iter().take_while(|&&c| is_id(c)).count();
        let len = ident_full.min(cap);
        let name = &text[..len];
        let h = tag_hash(name);
        let table = self.table.as_ref().expect("loaded");
        let hit = table
            .get(&h)
            .and_then(|chain| chain.iter().find(|e| e.name == name));
        match hit {
            Some(entry) => TagLookup::Found {
                entry,
                len,
                offset: ident_full,
            },
            None => TagLookup::NotFound {
                len,
                offset: ident_full,
            },
        }
    }

    /// Plain by-name lookup for `:tag`.
    pub fn find(&mut self, params: &Params, name: &[u8]) -> Option<TagEntry> {
        let capped = &name[..name.len().min(taglength(params))];
        match self.lookup(params, capped) {
            TagLookup::Found { entry, .. } => Some(entry.clone()),
            TagLookup::NotFound { .. } => None,
        }
    }
}

fn taglength(params: &Params) -> usize {
    match params.num(ParamId::Taglength) {
        0 => usize::MAX,
        n => n as usize,
    }
}

/// One `name<TAB>file<TAB>locator` line, with Exuberant-ctags `;"`
/// trailers stripped and the name capped to `taglength`.
fn parse_tag_line(line: &[u8], cap: usize) -> Option<TagEntry> {
    if line.is_empty() || line[0] == b'!' {
        // Header pseudo-tags start with '!'.
        return None;
    }
    let mut line = line;
    if let Some(p) = find_subslice(line, b";\"\t") {
        line = &line[..p];
    }
    let mut parts = line.splitn(3, |&b| b == b'\t');
    let name = parts.next()?;
    let file = parts.next()?;
    let locator = parts.next()?;
    if name.is_empty() || locator.is_empty() {
        return None;
    }
    let name = &name[..name.len().min(cap)];
    Some(TagEntry {
        name: name.to_vec(),
        file: String::from_utf8_lossy(file).into_owned(),
        locator: locator.to_vec(),
    })
}

fn find_subslice(hay: &[u8], needle: &[u8]) -> Option<usize> {
    hay.windows(needle.len()).position(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    fn params_with_tags(path: &str) -> Params {
        let mut p = Params::new();
        p.set_from_arg(&format!("tags={path}")).unwrap();
        p
    }

    fn write_tags(content: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f
    }

    #[test]
    fn loads_and_finds_simple_tags() {
        let f = write_tags("main\tmain.c\t12\nhelper\tutil.c\t/^int helper(/\n");
        let p = params_with_tags(f.path().to_str().unwrap());
        let mut cache = TagCache::new();
        let t = cache.find(&p, b"main").unwrap();
        assert_eq!(t.file, "main.c");
        assert_eq!(t.locator_kind(), Some(TagLocator::LineNumber(12)));
        let t = cache.find(&p, b"helper").unwrap();
        assert_eq!(t.locator_kind(), Some(TagLocator::Pattern(b"^int helper(")));
        assert!(cache.find(&p, b"absent").is_none());
    }

    #[test]
    fn strips_exuberant_ctags_trailers() {
        let f = write_tags("ANY\tregexp.c\t95;\"\td\tfile:\n");
        let p = params_with_tags(f.path().to_str().unwrap());
        let mut cache = TagCache::new();
        let t = cache.find(&p, b"ANY").unwrap();
        assert_eq!(t.locator_kind(), Some(TagLocator::LineNumber(95)));
    }

    #[test]
    fn pattern_locator_keeps_delimited_body() {
        let f = write_tags("f\ta.c\t/^void f()$/\n");
        let p = params_with_tags(f.path().to_str().unwrap());
        let mut cache = TagCache::new();
        let t = cache.find(&p, b"f").unwrap();
        assert_eq!(t.locator_kind(), Some(TagLocator::Pattern(b"^void f()$")));
    }

    #[test]
    fn taglength_caps_comparison() {
        let f = write_tags("verylongname\tx.c\t1\n");
        let mut p = params_with_tags(f.path().to_str().unwrap());
        p.set_from_arg("taglength=4").unwrap();
        let mut cache = TagCache::new();
        // Any identifier agreeing on the first 4 bytes matches.
        assert!(cache.find(&p, b"veryother").is_some());
        assert!(cache.find(&p, b"vers").is_none());
    }

    #[test]
    fn lookup_reports_gap_for_display() {
        let f = write_tags("name\tx.c\t1\n");
        let p = params_with_tags(f.path().to_str().unwrap());
        let mut cache = TagCache::new();
        match cache.lookup(&p, b"   name") {
            TagLookup::NotFound { len, offset } => {
                assert_eq!(len, 0);
                assert_eq!(offset, 3);
            }
            TagLookup::Found { .. } => panic!("gap expected"),
        }
        match cache.lookup(&p, b"name(x)") {
            TagLookup::Found { len, offset, .. } => {
                assert_eq!(len, 4);
                assert_eq!(offset, 4);
            }
            TagLookup::NotFound { .. } => panic!("tag expected"),
        }
    }

    #[test]
    fn invalidate_forces_reload() {
        let f = write_tags("one\tx.c\t1\n");
        let p = params_with_tags(f.path().to_str().unwrap());
        let mut cache = TagCache::new();
        assert!(cache.find(&p, b"one").is_some());
        assert!(cache.is_loaded());
        cache.invalidate();
        assert!(!cache.is_loaded());
        assert!(cache.find(&p, b"one").is_some());
    }

    #[test]
    fn header_lines_ignored() {
        let f = write_tags("!_TAG_FILE_FORMAT\t2\t/extended/\nreal\tx.c\t1\n");
        let p = params_with_tags(f.path().to_str().unwrap());
        let mut cache = TagCache::new();
        assert!(cache.find(&p, b"real").is_some());
        assert!(cache.find(&p, b"!_TAG_FILE_FORMAT").is_none());
    }
}
