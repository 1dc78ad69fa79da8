//! Glob compilation and include/exclude/prune predicate sets.
//!
//! Syntax: `*` (no `/`), `**` (any run, `/` included), `?` (one non-`/`
//! character), `[a-z]` / `[!a-z]`, `{a,b}` alternation and `\` escapes.
//! A leading `!` negates a pattern; a negated pattern ending in `/**`
//! prunes whole subtrees instead of filtering single entries.

use std::fmt;
use std::fs::Metadata;
use std::path::{Component, Path};

use regex::Regex;

use crate::spec::{EnumOperationKind, FsError, FsResult, SpecWalkOptions, TypeEntryFilter};

////////////////////////////////////////////////////////////////////////////////
// #region GlobCompile

/// One compiled glob.
#[derive(Debug, Clone)]
pub struct GlobPattern {
    source: String,
    regex: Regex,
}

impl GlobPattern {
    /// Compile a glob string (without any leading `!`).
    pub fn new(pattern: &str) -> FsResult<Self> {
        let expr = translate(pattern)?;
        let regex = Regex::new(&expr).map_err(|e| FsError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            source: pattern.to_string(),
            regex,
        })
    }

    /// The glob string this matcher was built from.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Match a relative path (`/` separated).
    pub fn is_match(&self, path_rel: &str) -> bool {
        self.regex.is_match(path_rel)
    }
}

fn invalid(pattern: &str, reason: &str) -> FsError {
    FsError::InvalidPattern {
        pattern: pattern.to_string(),
        reason: reason.to_string(),
    }
}

fn push_literal(expr: &mut String, c: char) {
    let mut buf = [0u8; 4];
    expr.push_str(&regex::escape(c.encode_utf8(&mut buf)));
}

/// Translate glob syntax into an anchored regular expression.
// Hand-rolled: globset collapses a `**` not bounded by separators into `*`.
fn translate(pattern: &str) -> FsResult<String> {
    let l_chars: Vec<char> = pattern.chars().collect();
    let mut expr = String::with_capacity(pattern.len() * 2 + 2);
    expr.push('^');

    let mut b_in_group = false;
    let mut i = 0;
    while i < l_chars.len() {
        let c = l_chars[i];
        i += 1;
        match c {
            '\\' => {
                let Some(&next) = l_chars.get(i) else {
                    return Err(invalid(pattern, "no character to escape"));
                };
                push_literal(&mut expr, next);
                i += 1;
            }
            '/' => expr.push('/'),
            '[' => {
                expr.push('[');
                let mut b_negated = false;
                if l_chars.get(i) == Some(&'!') {
                    expr.push('^');
                    b_negated = true;
                    i += 1;
                } else if l_chars.get(i) == Some(&'^') {
                    expr.push_str("\\^");
                    i += 1;
                }
                let mut b_closed = false;
                let mut b_first = true;
                while i < l_chars.len() {
                    let c_class = l_chars[i];
                    i += 1;
                    match c_class {
                        ']' if !b_first => {
                            b_closed = true;
                            break;
                        }
                        '/' => return Err(invalid(pattern, "explicit '/' in class")),
                        '-' => expr.push('-'),
                        _ => push_literal(&mut expr, c_class),
                    }
                    b_first = false;
                }
                if !b_closed {
                    return Err(invalid(pattern, "missing ']'"));
                }
                // Classes never match the separator.
                if b_negated {
                    expr.push('/');
                }
                expr.push(']');
            }
            '{' => {
                if b_in_group {
                    return Err(invalid(pattern, "cannot nest groups"));
                }
                expr.push_str("(?:");
                b_in_group = true;
            }
            '}' if b_in_group => {
                expr.push(')');
                b_in_group = false;
            }
            ',' if b_in_group => expr.push('|'),
            '*' => {
                if l_chars.get(i) == Some(&'*') {
                    i += 1;
                    let b_segment_start = i == 2 || l_chars.get(i - 3) == Some(&'/');
                    if b_segment_start && l_chars.get(i) == Some(&'/') {
                        // `**/` also matches zero directories.
                        expr.push_str("(?:.*/)?");
                        i += 1;
                    } else {
                        expr.push_str(".*");
                    }
                } else {
                    expr.push_str("[^/]*");
                }
            }
            '?' => expr.push_str("[^/]"),
            _ => push_literal(&mut expr, c),
        }
    }
    if b_in_group {
        return Err(invalid(pattern, "missing '}'"));
    }
    expr.push('$');
    Ok(expr)
}

/// Escape every glob metacharacter so `name` matches only itself.
pub fn escape_glob(name: &str) -> String {
    let mut escaped = String::with_capacity(name.len());
    for c in name.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '{' | '}' | ',' | '\\' | '!') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Render a relative path with `/` separators for matching.
pub fn to_match_path(path_rel: &Path) -> String {
    let mut rendered = String::new();
    for component in path_rel.components() {
        if let Component::Normal(part) = component {
            if !rendered.is_empty() {
                rendered.push('/');
            }
            rendered.push_str(&part.to_string_lossy());
        }
    }
    rendered
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region PatternSet

/// Include / exclude / prune predicates compiled from [`SpecWalkOptions`].
#[derive(Clone, Default)]
pub struct SpecPatternSet {
    pub(crate) patterns_include: Vec<GlobPattern>,
    pub(crate) patterns_exclude: Vec<GlobPattern>,
    pub(crate) patterns_exclude_dirs: Vec<GlobPattern>,
    pub(crate) filter: Option<TypeEntryFilter>,
}

impl SpecPatternSet {
    /// Classify and compile the option's patterns for one operation kind.
    pub fn compile(spec_options: &SpecWalkOptions, kind: EnumOperationKind) -> FsResult<Self> {
        let mut spec_pats = Self {
            filter: spec_options.filter.clone(),
            ..Self::default()
        };
        for pattern in &spec_options.patterns {
            if let Some(negated) = pattern.strip_prefix('!') {
                if let Some(dir) = negated.strip_suffix("/**") {
                    spec_pats.patterns_exclude_dirs.push(GlobPattern::new(dir)?);
                } else if kind == EnumOperationKind::ScanDirectories {
                    spec_pats.patterns_exclude_dirs.push(GlobPattern::new(negated)?);
                } else {
                    spec_pats.patterns_exclude.push(GlobPattern::new(negated)?);
                }
            } else {
                spec_pats.patterns_include.push(GlobPattern::new(pattern)?);
            }
        }
        Ok(spec_pats)
    }

    /// Whether a directory subtree must be skipped entirely.
    pub fn is_pruned(&self, path_rel: &Path) -> bool {
        if self.patterns_exclude_dirs.is_empty() {
            return false;
        }
        let value = to_match_path(path_rel);
        self.patterns_exclude_dirs.iter().any(|p| p.is_match(&value))
    }

    /// Glob acceptance only: `(no includes OR any include) AND NOT any exclude`.
    pub fn accepts_path(&self, path_rel: &Path) -> bool {
        let value = to_match_path(path_rel);
        if self.patterns_exclude.iter().any(|p| p.is_match(&value)) {
            return false;
        }
        self.patterns_include.is_empty() || self.patterns_include.iter().any(|p| p.is_match(&value))
    }

    /// Full acceptance: globs AND the generic filter when metadata is known.
    pub fn accepts(&self, path_rel: &Path, metadata: Option<&Metadata>) -> bool {
        if !self.accepts_path(path_rel) {
            return false;
        }
        match (&self.filter, metadata) {
            (Some(filter), Some(meta)) => filter(path_rel, meta),
            _ => true,
        }
    }

    /// True when the only pattern is the bare `*` (direct children only).
    pub fn is_direct_children_only(&self) -> bool {
        self.patterns_include.len() == 1
            && self.patterns_include[0].as_str() == "*"
            && self.patterns_exclude.is_empty()
            && self.patterns_exclude_dirs.is_empty()
    }
}

impl fmt::Debug for SpecPatternSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn as_strs(l: &[GlobPattern]) -> Vec<&str> {
            l.iter().map(GlobPattern::as_str).collect()
        }
        f.debug_struct("SpecPatternSet")
            .field("patterns_include", &as_strs(&self.patterns_include))
            .field("patterns_exclude", &as_strs(&self.patterns_exclude))
            .field("patterns_exclude_dirs", &as_strs(&self.patterns_exclude_dirs))
            .field("filter", &self.filter.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::{GlobPattern, SpecPatternSet, escape_glob, to_match_path};
    use crate::spec::{EnumOperationKind, FsError, SpecWalkOptions};

    fn glob(pattern: &str) -> GlobPattern {
        GlobPattern::new(pattern).expect("valid glob")
    }

    #[test]
    fn single_star_stays_in_segment() {
        assert!(glob("*").is_match("file"));
        assert!(!glob("*").is_match("dir/file"));
        assert!(glob("*/text").is_match("dir/text"));
        assert!(glob("*/file*").is_match("dir1/file2"));
        assert!(!glob("*/file*").is_match("dir1/text1"));
    }

    #[test]
    fn double_star_crosses_segments_anywhere() {
        assert!(glob("**").is_match("a/b/c"));
        assert!(glob("**text?").is_match("dir/text1"));
        assert!(glob("**text?").is_match("text2"));
        assert!(glob("**/dir**").is_match("root/dir1/3.txt"));
        assert!(glob("**/dir**").is_match("root/dir2/dir21/file"));
        assert!(!glob("**/dir**").is_match("root/1.txt"));
        assert!(glob("dir2/**").is_match("dir2/text1"));
        assert!(!glob("dir2/**").is_match("dir2"));
    }

    #[test]
    fn double_star_slash_matches_zero_directories() {
        assert!(glob("**/dir**").is_match("dir1/3.txt"));
        assert!(glob("**/*.txt").is_match("a.txt"));
        assert!(glob("**/*.txt").is_match("x/y/a.txt"));
        assert!(glob("a/**/b").is_match("a/b"));
        assert!(glob("a/**/b").is_match("a/x/y/b"));
        assert!(!glob("a/**/b").is_match("ab"));
        assert!(!glob("x**/b").is_match("b"));
    }

    #[test]
    fn question_mark_and_classes() {
        assert!(glob("text?").is_match("text1"));
        assert!(!glob("text?").is_match("text10"));
        assert!(glob("????1").is_match("text1"));
        assert!(!glob("????1").is_match("text2"));
        assert!(glob("text[1-2]").is_match("text2"));
        assert!(!glob("text[1-2]").is_match("text3"));
        assert!(glob("text[!34]").is_match("text1"));
        assert!(!glob("text[!34]").is_match("text4"));
        assert!(!glob("a[!x]b").is_match("a/b"));
    }

    #[test]
    fn groups_and_escapes() {
        assert!(glob("*.{txt,md}").is_match("read.md"));
        assert!(!glob("*.{txt,md}").is_match("read.rs"));
        assert!(glob(r"\*.txt").is_match("*.txt"));
        assert!(!glob(r"\*.txt").is_match("a.txt"));
        assert!(glob("a+b(c).txt").is_match("a+b(c).txt"));
    }

    #[test]
    fn malformed_globs_are_rejected() {
        for pattern in ["text[1-2", "{a,b", "{a,{b}}", "end\\"] {
            let err = GlobPattern::new(pattern).expect_err("must fail");
            assert!(matches!(err, FsError::InvalidPattern { .. }), "{pattern}");
        }
    }

    #[test]
    fn negated_patterns_are_classified() {
        let options = SpecWalkOptions::default().glob(["**", "!**1", "!ignore/**"]);
        let spec_pats = SpecPatternSet::compile(&options, EnumOperationKind::ScanFiles).expect("compile");
        assert_eq!(spec_pats.patterns_include.len(), 1);
        assert_eq!(spec_pats.patterns_exclude.len(), 1);
        assert_eq!(spec_pats.patterns_exclude_dirs.len(), 1);

        assert!(spec_pats.accepts_path(Path::new("text2")));
        assert!(!spec_pats.accepts_path(Path::new("text1")));
        assert!(spec_pats.is_pruned(Path::new("ignore")));
        assert!(!spec_pats.is_pruned(Path::new("ignored")));

        let spec_pats =
            SpecPatternSet::compile(&options, EnumOperationKind::ScanDirectories).expect("compile");
        assert!(spec_pats.patterns_exclude.is_empty());
        assert_eq!(spec_pats.patterns_exclude_dirs.len(), 2);
    }

    #[test]
    fn no_patterns_accepts_everything() {
        let spec_pats = SpecPatternSet::compile(&SpecWalkOptions::default(), EnumOperationKind::Copy)
            .expect("compile");
        assert!(spec_pats.accepts_path(Path::new("any/where.txt")));
        assert!(!spec_pats.is_pruned(Path::new("any")));
        assert!(!spec_pats.is_direct_children_only());

        let star = SpecWalkOptions::default().glob(["*"]);
        let spec_pats = SpecPatternSet::compile(&star, EnumOperationKind::Copy).expect("compile");
        assert!(spec_pats.is_direct_children_only());
    }

    #[test]
    fn filter_is_and_combined() {
        let options = SpecWalkOptions::default()
            .glob(["**"])
            .take(|path: &Path, _| path.starts_with("keep"));
        let spec_pats = SpecPatternSet::compile(&options, EnumOperationKind::Delete).expect("compile");
        let meta = std::fs::metadata(std::env::temp_dir()).expect("metadata");
        assert!(spec_pats.accepts(Path::new("keep/a"), Some(&meta)));
        assert!(!spec_pats.accepts(Path::new("drop/a"), Some(&meta)));
        // Without metadata the filter cannot be consulted.
        assert!(spec_pats.accepts(Path::new("drop/a"), None));
    }

    #[test]
    fn escaped_names_match_literally() {
        for name in ["plain.txt", "a*b?.txt", "[x]{y,z}", "!bang", r"back\slash"] {
            let pattern = glob(&escape_glob(name));
            assert!(pattern.is_match(name), "{name}");
        }
        assert!(!glob(&escape_glob("a*b")).is_match("axxb"));
    }

    #[test]
    fn match_path_uses_forward_slashes() {
        let path_rel = Path::new("a").join("b").join("c.txt");
        assert_eq!(to_match_path(&path_rel), "a/b/c.txt");
        assert_eq!(to_match_path(Path::new("")), "");
    }

    #[test]
    fn debug_lists_classified_patterns() {
        let options = SpecWalkOptions::default().glob(["**.txt", "!tmp/**", "!*.bak"]);
        let spec_pats = SpecPatternSet::compile(&options, EnumOperationKind::Copy).expect("compile");
        let txt = format!("{spec_pats:?}");
        assert!(txt.contains(r#"patterns_include: ["**.txt"]"#), "{txt}");
        assert!(txt.contains(r#"patterns_exclude: ["*.bak"]"#), "{txt}");
        assert!(txt.contains(r#"patterns_exclude_dirs: ["tmp"]"#), "{txt}");
        assert!(txt.contains("filter: None"), "{txt}");
    }
}
