//! Command-line surface:
//!
//! ```text
//! vix [options] [file ...]
//! vix [options] -t tag
//! vix [options] +[n|/pat] file
//! ```

use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "vix", version, about = "A portable multi-window vi")]
pub struct Cli {
    /// Set a parameter before files are read (-s number, -s nowrapscan,
    /// -s shiftwidth=4); may repeat.
    #[arg(short = 's', value_name = "param[=value]")]
    pub set: Vec<String>,

    /// Start at the given tag.
    #[arg(short = 't', value_name = "tag")]
    pub tag: Option<String>,

    /// Files to edit; a leading +n, +$ or +/pat positions the cursor in
    /// the first file.
    #[arg(value_name = "file")]
    pub files: Vec<String>,
}

/// Where to put the cursor after the first file loads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartJump {
    None,
    Line(u64),
    LastLine,
    Pattern(String),
}

/// Split the positional arguments into the jump spec and the file list.
pub fn split_positionals(files: Vec<String>) -> (StartJump, Vec<String>) {
    let mut jump = StartJump::None;
    let mut rest = Vec::with_capacity(files.len());
    for f in files {
        if let Some(spec) = f.strip_prefix('+') {
            jump = if spec.is_empty() || spec == "$" {
                StartJump::LastLine
            } else if let Some(pat) = spec.strip_prefix('/') {
                StartJump::Pattern(pat.to_string())
            } else if let Ok(n) = spec.parse::<u64>() {
                StartJump::Line(n)
            } else {
                StartJump::None
            };
        } else {
            rest.push(f);
        }
    }
    (jump, rest)
}

/// Split a `VIXINIT` line into commands at unescaped `|` or newline;
/// `\|` passes a literal bar through.
pub fn split_init_commands(init: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut cur = String::new();
    let mut chars = init.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some('|') => cur.push('|'),
                Some(other) => {
                    cur.push('\\');
                    cur.push(other);
                }
                None => cur.push('\\'),
            },
            '|' | '\n' => {
                if !cur.trim().is_empty() {
                    out.push(std::mem::take(&mut cur));
                } else {
                    cur.clear();
                }
            }
            _ => cur.push(c),
        }
    }
    if !cur.trim().is_empty() {
        out.push(cur);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn plus_line_number() {
        let (jump, files) = split_positionals(vec!["+12".into(), "foo.c".into()]);
        assert_eq!(jump, StartJump::Line(12));
        assert_eq!(files, vec!["foo.c".to_string()]);
    }

    #[test]
    fn plus_dollar_and_pattern() {
        let (jump, _) = split_positionals(vec!["+$".into(), "x".into()]);
        assert_eq!(jump, StartJump::LastLine);
        let (jump, _) = split_positionals(vec!["+/main".into(), "x".into()]);
        assert_eq!(jump, StartJump::Pattern("main".into()));
    }

    #[test]
    fn no_jump_leaves_files_alone() {
        let (jump, files) = split_positionals(vec!["a".into(), "b".into()]);
        assert_eq!(jump, StartJump::None);
        assert_eq!(files.len(), 2);
    }

    #[test]
    fn init_commands_split_on_bars() {
        assert_eq!(
            split_init_commands("set number|map q ZZ"),
            vec!["set number".to_string(), "map q ZZ".to_string()]
        );
        assert_eq!(
            split_init_commands(r"map x a\|b"),
            vec!["map x a|b".to_string()]
        );
        assert_eq!(split_init_commands("  |  "), Vec::<String>::new());
    }
}
