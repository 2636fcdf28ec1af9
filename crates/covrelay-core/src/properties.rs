//! Minimal reader for flat `key=value` property files.
//!
//! Handles the subset of the Java properties format that build plugins emit
//! into `git.properties`: `#`/`!` comments, `=`/`:`/whitespace separators,
//! backslash escapes and line continuations.

use std::collections::BTreeMap;
use std::fmt;

/// Parsed property set, ordered by key for stable diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Properties {
    entries: BTreeMap<String, String>,
}

impl Properties {
    pub fn parse(text: &str) -> Self {
        let mut entries = BTreeMap::new();
        for line in logical_lines(text) {
            let line = line.trim_start();
            if line.is_empty() {
                continue;
            }
            let (key, value) = split_key_value(line);
            entries.insert(unescape(key), unescape(value));
        }
        Self { entries }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Value for `key`, treating an empty value as absent.
    pub fn non_empty(&self, key: &str) -> Option<&str> {
        self.get(key).filter(|value| !value.trim().is_empty())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Display for Properties {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (key, value)) in self.entries.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{key}={value}")?;
        }
        f.write_str("}")
    }
}

/// Joins physical lines ending in an odd number of backslashes.
///
/// Comment and blank lines are dropped before joining, so a comment never
/// continues onto the next line.
fn logical_lines(text: &str) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    let mut continuing = false;

    for raw in text.lines() {
        if !continuing {
            let head = raw.trim_start();
            if head.is_empty() || head.starts_with('#') || head.starts_with('!') {
                continue;
            }
        }
        let part = if continuing { raw.trim_start() } else { raw };
        let trailing = part.chars().rev().take_while(|c| *c == '\\').count();
        if trailing % 2 == 1 {
            current.push_str(&part[..part.len() - 1]);
            continuing = true;
        } else {
            current.push_str(part);
            lines.push(std::mem::take(&mut current));
            continuing = false;
        }
    }
    if continuing {
        lines.push(current);
    }
    lines
}

fn split_key_value(line: &str) -> (&str, &str) {
    let mut escaped = false;
    for (idx, c) in line.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' => escaped = true,
            '=' | ':' => return (&line[..idx], line[idx + 1..].trim_start()),
            c if c.is_whitespace() => {
                let rest = line[idx..].trim_start();
                let rest = rest
                    .strip_prefix('=')
                    .or_else(|| rest.strip_prefix(':'))
                    .unwrap_or(rest);
                return (&line[..idx], rest.trim_start());
            }
            _ => {}
        }
    }
    (line, "")
}

fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('f') => out.push('\u{c}'),
            Some(other) => out.push(other),
            None => {}
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_pairs_and_skips_comments() {
        let props = Properties::parse(
            "#Generated by Git-Commit-Id-Plugin\n\
             ! another comment\n\
             \n\
             git.branch=main\n\
             git.commit.id.abbrev = 1a2b3c4\n",
        );
        assert_eq!(props.len(), 2);
        assert_eq!(props.get("git.branch"), Some("main"));
        assert_eq!(props.get("git.commit.id.abbrev"), Some("1a2b3c4"));
    }

    #[test]
    fn unescapes_colons_in_values() {
        let props = Properties::parse("git.commit.time=2024-03-01T10\\:00\\:00+0000\n");
        assert_eq!(props.get("git.commit.time"), Some("2024-03-01T10:00:00+0000"));
    }

    #[test]
    fn accepts_colon_and_whitespace_separators() {
        let props = Properties::parse("a:1\nb 2\nc = 3\n");
        assert_eq!(props.get("a"), Some("1"));
        assert_eq!(props.get("b"), Some("2"));
        assert_eq!(props.get("c"), Some("3"));
    }

    #[test]
    fn joins_continuation_lines() {
        let props = Properties::parse("git.commit.message.full=first \\\n    second\n");
        assert_eq!(props.get("git.commit.message.full"), Some("first second"));
    }

    #[test]
    fn comment_ending_in_backslash_does_not_swallow_next_line() {
        let props = Properties::parse(
            "#Built on C:\\build\\\n\
             git.branch=main\n\
             ! trailing \\\n\
             git.commit.time=2024-03-01T10\\:00\\:00+0000\n",
        );
        assert_eq!(props.len(), 2);
        assert_eq!(props.get("git.branch"), Some("main"));
        assert_eq!(props.get("git.commit.time"), Some("2024-03-01T10:00:00+0000"));
    }

    #[test]
    fn continued_line_starting_with_hash_is_value_text() {
        let props = Properties::parse("issue=see \\\n    #42\n");
        assert_eq!(props.get("issue"), Some("see #42"));
    }

    #[test]
    fn empty_value_is_not_non_empty() {
        let props = Properties::parse("git.branch=\n");
        assert_eq!(props.get("git.branch"), Some(""));
        assert_eq!(props.non_empty("git.branch"), None);
    }
}
