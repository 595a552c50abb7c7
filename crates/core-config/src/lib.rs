//! The `:set` parameter store.
//!
//! A closed table of named options, each with a full name, a short name,
//! a typed value and a changed flag. Lookup accepts unambiguous prefixes,
//! with a per-parameter priority breaking ties between same-prefix names.
//! Setting a parameter returns the list of [`ParamEffect`]s the caller
//! must apply; this replaces in-store change-watcher callbacks so the
//! store stays free of editor dependencies.

use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParamError {
    #[error("{0}: No such parameter")]
    Unknown(String),
    #[error("{0}: Ambiguous parameter name")]
    Ambiguous(String),
    #[error("{0}: Invalid value")]
    BadValue(String),
    #[error("{0} is not a boolean parameter")]
    NotBool(String),
    #[error("{0} requires a value")]
    NeedsValue(String),
}

/// Typed parameter value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamValue {
    Bool(bool),
    Num(i64),
    /// Index into the parameter's choice table.
    Enum(usize),
    Str(String),
    List(Vec<String>),
}

/// Follow-up work a `set` imposes on the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamEffect {
    /// The whole display must be rebuilt (display-affecting parameter).
    RedrawAll,
    /// The tag cache is stale (`tags` / `taglength` changed).
    InvalidateTags,
    /// Undo history limits changed.
    UndoLevels(usize),
    /// Keymap timeout changed (milliseconds).
    MapTimeout(u64),
}

macro_rules! params {
    ($(($id:ident, $full:literal, $short:literal, $prio:literal, $default:expr, $choices:expr)),+ $(,)?) => {
        /// Identifier for every parameter in the closed set.
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub enum ParamId { $($id),+ }

        impl ParamId {
            pub const ALL: &'static [ParamId] = &[$(ParamId::$id),+];

            pub fn full_name(self) -> &'static str {
                match self { $(ParamId::$id => $full),+ }
            }

            pub fn short_name(self) -> &'static str {
                match self { $(ParamId::$id => $short),+ }
            }

            fn priority(self) -> u8 {
                match self { $(ParamId::$id => $prio),+ }
            }

            fn default_value() -> Vec<ParamValue> {
                vec![$($default),+]
            }

            /// Choice table for enum parameters, empty otherwise.
            pub fn choices(self) -> &'static [&'static str] {
                match self { $(ParamId::$id => $choices),+ }
            }

            fn index(self) -> usize {
                self as usize
            }
        }
    };
}

const NO_CHOICES: &[&str] = &[];
pub const FORMAT_CHOICES: &[&str] = &[
    "cstring",
    "macintosh",
    "msdos",
    "os2",
    "qnx",
    "tos",
    "unix",
];
pub const REGEXTYPE_CHOICES: &[&str] = &["tags", "grep", "egrep"];
pub const PRESERVE_CHOICES: &[&str] = &["unsafe", "standard", "safe", "paranoid"];
pub const INFOUPDATE_CHOICES: &[&str] = &["terse", "continuous"];

fn s(v: &str) -> ParamValue {
    ParamValue::Str(v.into())
}

params! {
    (Autoindent,   "autoindent",   "ai",    0, ParamValue::Bool(false), NO_CHOICES),
    (Autosplit,    "autosplit",    "asp",   0, ParamValue::Num(2),      NO_CHOICES),
    (Autowrite,    "autowrite",    "aw",    0, ParamValue::Bool(false), NO_CHOICES),
    (Colour,       "colour",       "co",    1, ParamValue::Num(0),      NO_CHOICES),
    (Edited,       "edited",       "ed",    0, ParamValue::Bool(false), NO_CHOICES),
    (Errorbells,   "errorbells",   "eb",    0, ParamValue::Bool(true),  NO_CHOICES),
    (Format,       "format",       "fmt",   0, ParamValue::Enum(6),     FORMAT_CHOICES),
    (Ignorecase,   "ignorecase",   "ic",    0, ParamValue::Bool(false), NO_CHOICES),
    (Infoupdate,   "infoupdate",   "iu",    0, ParamValue::Enum(0),     INFOUPDATE_CHOICES),
    (Jumpscans,    "jumpscans",    "js",    0, ParamValue::Bool(true),  NO_CHOICES),
    (List,         "list",         "ls",    0, ParamValue::Bool(false), NO_CHOICES),
    (Magic,        "magic",        "ma",    1, ParamValue::Bool(true),  NO_CHOICES),
    (Minrows,      "minrows",      "min",   0, ParamValue::Num(2),      NO_CHOICES),
    (Number,       "number",       "nu",    0, ParamValue::Bool(false), NO_CHOICES),
    (Paragraphs,   "paragraphs",   "para",  0, s("IPLPPPQPP LIpplpipbp"), NO_CHOICES),
    (Preserve,     "preserve",     "psv",   1, ParamValue::Enum(1),     PRESERVE_CHOICES),
    (Preservetime, "preservetime", "psvt",  0, ParamValue::Num(5),      NO_CHOICES),
    (Regextype,    "regextype",    "rt",    1, ParamValue::Enum(1),     REGEXTYPE_CHOICES),
    (Remap,        "remap",        "remap", 1, ParamValue::Bool(true),  NO_CHOICES),
    (Report,       "report",       "rp",    1, ParamValue::Num(5),      NO_CHOICES),
    (RosColour,    "roscolour",    "rst",   0, ParamValue::Num(2),      NO_CHOICES),
    (Sections,     "sections",     "sect",  0, s("NHSHH HUnhsh"),       NO_CHOICES),
    (Shell,        "shell",        "sh",    1, s("/bin/sh"),            NO_CHOICES),
    (Shiftwidth,   "shiftwidth",   "sw",    1, ParamValue::Num(8),      NO_CHOICES),
    (Showmatch,    "showmatch",    "sm",    0, ParamValue::Bool(false), NO_CHOICES),
    (Sourceany,    "sourceany",    "sa",    0, ParamValue::Bool(false), NO_CHOICES),
    (StatusColour, "statuscolour", "st",    0, ParamValue::Num(1),      NO_CHOICES),
    (SystemColour, "systemcolour", "sy",    0, ParamValue::Num(3),      NO_CHOICES),
    (Tabs,         "tabs",         "tabs",  0, ParamValue::Bool(true),  NO_CHOICES),
    (Tabstop,      "tabstop",      "ts",    1, ParamValue::Num(8),      NO_CHOICES),
    (TagColour,    "tagcolour",    "tc",    0, ParamValue::Num(4),      NO_CHOICES),
    (Taglength,    "taglength",    "tlh",   0, ParamValue::Num(0),      NO_CHOICES),
    (Tags,         "tags",         "tags",  1, ParamValue::List(vec!["tags".into()]), NO_CHOICES),
    (Terse,        "terse",        "terse", 0, ParamValue::Bool(false), NO_CHOICES),
    (Timeout,      "timeout",      "tmo",   0, ParamValue::Num(200),    NO_CHOICES),
    (Undolevels,   "undolevels",   "ul",    0, ParamValue::Num(100),    NO_CHOICES),
    (Vbell,        "vbell",        "vb",    0, ParamValue::Bool(true),  NO_CHOICES),
    (Wrapmargin,   "wrapmargin",   "wm",    0, ParamValue::Num(0),      NO_CHOICES),
    (Wrapscan,     "wrapscan",     "ws",    1, ParamValue::Bool(true),  NO_CHOICES),
}

/// The store itself: one value and one changed flag per parameter.
pub struct Params {
    values: Vec<ParamValue>,
    changed: Vec<bool>,
}

impl Default for Params {
    fn default() -> Self {
        Self::new()
    }
}

impl Params {
    pub fn new() -> Self {
        let values = ParamId::default_value();
        let changed = vec![false; values.len()];
        Self { values, changed }
    }

    // ---- typed getters ---------------------------------------------------

    pub fn is_set(&self, id: ParamId) -> bool {
        matches!(self.values[id.index()], ParamValue::Bool(true))
    }

    pub fn num(&self, id: ParamId) -> i64 {
        match self.values[id.index()] {
            ParamValue::Num(n) => n,
            _ => 0,
        }
    }

    pub fn enum_ix(&self, id: ParamId) -> usize {
        match self.values[id.index()] {
            ParamValue::Enum(ix) => ix,
            _ => 0,
        }
    }

    pub fn string(&self, id: ParamId) -> &str {
        match &self.values[id.index()] {
            ParamValue::Str(v) => v,
            _ => "",
        }
    }

    pub fn list(&self, id: ParamId) -> &[String] {
        match &self.values[id.index()] {
            ParamValue::List(v) => v,
            _ => &[],
        }
    }

    pub fn was_changed(&self, id: ParamId) -> bool {
        self.changed[id.index()]
    }

    // ---- name resolution -------------------------------------------------

    /// Resolve a (possibly abbreviated) parameter name. Exact full or
    /// short names win outright; otherwise a prefix match must be unique
    /// or separated by priority.
    pub fn lookup(name: &str) -> Result<ParamId, ParamError> {
        let mut best: Option<ParamId> = None;
        let mut tied = false;
        for &id in ParamId::ALL {
            if id.full_name() == name || id.short_name() == name {
                return Ok(id);
            }
            if id.full_name().starts_with(name) {
                match best {
                    None => best = Some(id),
                    Some(b) => {
                        if id.priority() > b.priority() {
                            best = Some(id);
                            tied = false;
                        } else if id.priority() == b.priority() {
                            tied = true;
                        }
                    }
                }
            }
        }
        match best {
            Some(id) if !tied => Ok(id),
            Some(_) => Err(ParamError::Ambiguous(name.into())),
            None => Err(ParamError::Unknown(name.into())),
        }
    }

    // ---- setting ---------------------------------------------------------

    /// Apply one `:set` argument: `name`, `noname`, or `name=value`.
    pub fn set_from_arg(&mut self, arg: &str) -> Result<Vec<ParamEffect>, ParamError> {
        if let Some((name, value)) = arg.split_once('=') {
            let id = Self::lookup(name)?;
            return self.set_parsed(id, value);
        }
        // Boolean forms.
        let (name, on) = match arg.strip_prefix("no") {
            Some(rest) if Self::lookup(rest).is_ok() => (rest, false),
            _ => (arg, true),
        };
        let id = Self::lookup(name)?;
        match self.values[id.index()] {
            ParamValue::Bool(_) => self.set_value(id, ParamValue::Bool(on)),
            _ if !on => Err(ParamError::NotBool(name.into())),
            _ => Err(ParamError::NeedsValue(name.into())),
        }
    }

    /// Parse a textual value against the parameter's type and store it.
    pub fn set_parsed(&mut self, id: ParamId, value: &str) -> Result<Vec<ParamEffect>, ParamError> {
        let parsed = match &self.values[id.index()] {
            ParamValue::Bool(_) => match value {
                "true" | "on" => ParamValue::Bool(true),
                "false" | "off" => ParamValue::Bool(false),
                _ => return Err(ParamError::BadValue(id.full_name().into())),
            },
            ParamValue::Num(_) => {
                let n: i64 = value
                    .parse()
                    .map_err(|_| ParamError::BadValue(id.full_name().into()))?;
                ParamValue::Num(n)
            }
            ParamValue::Enum(_) => {
                let ix = id
                    .choices()
                    .iter()
                    .position(|c| *c == value)
                    .ok_or_else(|| ParamError::BadValue(id.full_name().into()))?;
                ParamValue::Enum(ix)
            }
            ParamValue::Str(_) => ParamValue::Str(value.into()),
            ParamValue::List(_) => {
                ParamValue::List(value.split_whitespace().map(String::from).collect())
            }
        };
        self.set_value(id, parsed)
    }

    /// Store a typed value, run range checks and cross-updates, and
    /// report the effects.
    pub fn set_value(
        &mut self,
        id: ParamId,
        value: ParamValue,
    ) -> Result<Vec<ParamEffect>, ParamError> {
        if let ParamValue::Num(n) = value {
            let bad = match id {
                ParamId::Shiftwidth | ParamId::Tabstop => n < 1 || n > 32,
                ParamId::Minrows => n < 1,
                ParamId::Wrapmargin | ParamId::Report | ParamId::Taglength => n < 0,
                ParamId::Timeout | ParamId::Preservetime => n < 0,
                ParamId::Undolevels => n < 0,
                _ => false,
            };
            if bad {
                return Err(ParamError::BadValue(id.full_name().into()));
            }
        }
        self.values[id.index()] = value;
        self.changed[id.index()] = true;
        debug!(target: "config.params", param = id.full_name(), "set");

        let mut effects = Vec::new();
        match id {
            // magic and regextype shadow each other: nomagic is the tags
            // dialect, magic is grep.
            ParamId::Magic => {
                let rt = if self.is_set(ParamId::Magic) { 1 } else { 0 };
                self.values[ParamId::Regextype.index()] = ParamValue::Enum(rt);
            }
            ParamId::Regextype => {
                let magic = self.enum_ix(ParamId::Regextype) != 0;
                self.values[ParamId::Magic.index()] = ParamValue::Bool(magic);
            }
            ParamId::Tags | ParamId::Taglength => effects.push(ParamEffect::InvalidateTags),
            ParamId::Number | ParamId::List | ParamId::Tabstop | ParamId::Tabs => {
                effects.push(ParamEffect::RedrawAll)
            }
            ParamId::Undolevels => {
                effects.push(ParamEffect::UndoLevels(self.num(ParamId::Undolevels) as usize))
            }
            ParamId::Timeout => {
                effects.push(ParamEffect::MapTimeout(self.num(ParamId::Timeout) as u64))
            }
            _ => {}
        }
        Ok(effects)
    }

    // ---- display ---------------------------------------------------------

    /// `name=value` / `[no]name` rendering used by `:set` displays.
    pub fn format_param(&self, id: ParamId) -> String {
        match &self.values[id.index()] {
            ParamValue::Bool(true) => id.full_name().to_string(),
            ParamValue::Bool(false) => format!("no{}", id.full_name()),
            ParamValue::Num(n) => format!("{}={}", id.full_name(), n),
            ParamValue::Enum(ix) => format!("{}={}", id.full_name(), id.choices()[*ix]),
            ParamValue::Str(v) => format!("{}={}", id.full_name(), v),
            ParamValue::List(v) => format!("{}={}", id.full_name(), v.join(" ")),
        }
    }

    /// Parameters to show for a bare `:set`: the ones that have been
    /// changed from their defaults.
    pub fn changed_params(&self) -> Vec<ParamId> {
        ParamId::ALL
            .iter()
            .copied()
            .filter(|id| self.changed[id.index()])
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn defaults_in_place() {
        let p = Params::new();
        assert!(p.is_set(ParamId::Wrapscan));
        assert!(!p.is_set(ParamId::Number));
        assert_eq!(p.num(ParamId::Shiftwidth), 8);
        assert_eq!(p.enum_ix(ParamId::Format), 6); // unix
        assert_eq!(p.list(ParamId::Tags), &["tags".to_string()]);
    }

    #[test]
    fn lookup_full_short_and_prefix() {
        assert_eq!(Params::lookup("wrapscan"), Ok(ParamId::Wrapscan));
        assert_eq!(Params::lookup("ws"), Ok(ParamId::Wrapscan));
        assert_eq!(Params::lookup("wrapm"), Ok(ParamId::Wrapmargin));
        assert_eq!(
            Params::lookup("qq"),
            Err(ParamError::Unknown("qq".into()))
        );
    }

    #[test]
    fn ambiguous_prefix_resolved_by_priority() {
        // "ta" prefixes tabs, tabstop, tagcolour, taglength and tags;
        // tabstop and tags tie on priority.
        assert!(matches!(Params::lookup("ta"), Err(ParamError::Ambiguous(_))));
        // "tab" narrows to tabs and tabstop; tabstop wins on priority.
        assert_eq!(Params::lookup("tab"), Ok(ParamId::Tabstop));
        // "re" prefixes regextype, remap, report: all priority 1 -> tie.
        assert!(matches!(Params::lookup("re"), Err(ParamError::Ambiguous(_))));
        // "rep" uniquely prefixes report.
        assert_eq!(Params::lookup("rep"), Ok(ParamId::Report));
        // "sh" is the exact short name of shell despite prefixing others.
        assert_eq!(Params::lookup("sh"), Ok(ParamId::Shell));
    }

    #[test]
    fn set_bool_forms() {
        let mut p = Params::new();
        p.set_from_arg("number").unwrap();
        assert!(p.is_set(ParamId::Number));
        p.set_from_arg("nonumber").unwrap();
        assert!(!p.is_set(ParamId::Number));
        assert!(p.was_changed(ParamId::Number));
        assert!(matches!(
            p.set_from_arg("shiftwidth"),
            Err(ParamError::NeedsValue(_))
        ));
    }

    #[test]
    fn set_num_and_enum_values() {
        let mut p = Params::new();
        p.set_from_arg("shiftwidth=4").unwrap();
        assert_eq!(p.num(ParamId::Shiftwidth), 4);
        assert!(p.set_from_arg("shiftwidth=0").is_err());
        p.set_from_arg("format=msdos").unwrap();
        assert_eq!(p.enum_ix(ParamId::Format), 2);
        assert!(p.set_from_arg("format=vms").is_err());
    }

    #[test]
    fn magic_and_regextype_shadow_each_other() {
        let mut p = Params::new();
        p.set_from_arg("nomagic").unwrap();
        assert_eq!(p.enum_ix(ParamId::Regextype), 0); // tags
        p.set_from_arg("regextype=egrep").unwrap();
        assert!(p.is_set(ParamId::Magic));
        p.set_from_arg("regextype=tags").unwrap();
        assert!(!p.is_set(ParamId::Magic));
    }

    #[test]
    fn tags_changes_invalidate_cache() {
        let mut p = Params::new();
        let fx = p.set_from_arg("tags=tags ../tags").unwrap();
        assert_eq!(fx, vec![ParamEffect::InvalidateTags]);
        assert_eq!(
            p.list(ParamId::Tags),
            &["tags".to_string(), "../tags".to_string()]
        );
        let fx = p.set_from_arg("taglength=8").unwrap();
        assert_eq!(fx, vec![ParamEffect::InvalidateTags]);
    }

    #[test]
    fn display_forms() {
        let mut p = Params::new();
        assert_eq!(p.format_param(ParamId::Wrapscan), "wrapscan");
        assert_eq!(p.format_param(ParamId::Number), "nonumber");
        assert_eq!(p.format_param(ParamId::Shiftwidth), "shiftwidth=8");
        assert_eq!(p.format_param(ParamId::Format), "format=unix");
        p.set_from_arg("shiftwidth=2").unwrap();
        assert_eq!(p.changed_params(), vec![ParamId::Shiftwidth]);
    }
}
