// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Line sanitization and the patterns shared with tag extraction.
//!
//! A sanitized line has no ANSI escape or control sequences and no
//! `[script:<name>]` or `[<component>]` markers left in it. Escape sequences
//! go through `strip_ansi_escapes`, which runs a full terminal parser, after
//! 8-bit C1 controls have been rewritten to their `ESC <Fe>` form. Removing a
//! tag can splice its neighbours into a new tag (`"[scr[TXADMIN]ipt:x]"`), so
//! removal is repeated until the line stops changing. That fixpoint is what
//! makes [`sanitize`] idempotent.

use lazy_static::lazy_static;
use regex::Regex;

/// Subsystems whose output is prefixed with a bracketed component marker.
pub const KNOWN_COMPONENTS: &[&str] = &[
    "citizen-server-impl",
    "citizen-server-main",
    "citizen-scripting-core",
    "c-scripting-core",
    "resources",
    "svadhesive",
    "TXADMIN",
];

const ESC: char = '\u{1b}';

// Controls the terminal parser drops that are part of the line text.
const KEPT_CONTROLS: [char; 2] = ['\t', '\r'];

lazy_static! {
    /// `[script:<name>]`, blanks allowed inside the brackets. Never spans lines.
    pub(crate) static ref SCRIPT_TAG_REGEX: Regex =
        compile(r"\[[ \t]*script:[ \t]*([^\]\s]+)[ \t]*\]");

    /// `[<component>]` for one of [`KNOWN_COMPONENTS`].
    pub(crate) static ref COMPONENT_TAG_REGEX: Regex = compile(&format!(
        r"\[[ \t]*({})[ \t]*\]",
        KNOWN_COMPONENTS
            .iter()
            .map(|component| regex::escape(component))
            .collect::<Vec<_>>()
            .join("|")
    ));
}

// Only called with the literal patterns above.
#[allow(clippy::expect_used)]
fn compile(pattern: &str) -> Regex {
    Regex::new(pattern).expect("failed creating regex")
}

/// Removes every ANSI sequence and every tag marker from `line`.
///
/// Characters outside the matched sequences are left untouched, including
/// whitespace next to a removed marker.
///
/// ```
/// use loki_shipper::sanitizer::sanitize;
///
/// assert_eq!(sanitize("\u{1b}[31mred\u{1b}[0m"), "red");
/// assert_eq!(sanitize("[script:mybag] hi [TXADMIN]"), " hi ");
/// assert_eq!(sanitize("nothing to do"), "nothing to do");
/// ```
pub fn sanitize(line: &str) -> String {
    let mut current = line.to_string();
    while let Some(next) = strip_once(&current) {
        current = next;
    }
    current
}

// None when nothing was removed.
fn strip_once(line: &str) -> Option<String> {
    let mut stripped = has_escape(line).then(|| strip_escapes(line));
    for pattern in [&*SCRIPT_TAG_REGEX, &*COMPONENT_TAG_REGEX] {
        let input = stripped.as_deref().unwrap_or(line);
        if pattern.is_match(input) {
            let next = pattern.replace_all(input, "").into_owned();
            stripped = Some(next);
        }
    }
    stripped
}

fn is_c1(c: char) -> bool {
    ('\u{80}'..='\u{9f}').contains(&c)
}

fn has_escape(line: &str) -> bool {
    line.chars().any(|c| c == ESC || is_c1(c))
}

fn strip_escapes(line: &str) -> String {
    let widened = widen_c1(line);
    let mut out = String::with_capacity(widened.len());
    for piece in widened.split_inclusive(KEPT_CONTROLS) {
        let body = piece.strip_suffix(KEPT_CONTROLS).unwrap_or(piece);
        out.push_str(&strip_ansi_escapes::strip_str(body));
        out.push_str(&piece[body.len()..]);
    }
    out
}

/// Rewrites each C1 control as `ESC` followed by its 7-bit final byte, so
/// `\u{9b}` becomes `ESC [`.
fn widen_c1(line: &str) -> String {
    let mut widened = String::with_capacity(line.len());
    for c in line.chars() {
        if is_c1(c) {
            widened.push(ESC);
            widened.push(char::from((c as u32 - 0x40) as u8));
        } else {
            widened.push(c);
        }
    }
    widened
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_strips_color_codes() {
        assert_eq!(sanitize("\u{1b}[31mred\u{1b}[0m"), "red");
        assert_eq!(
            sanitize("\u{1b}[1;38;5;208mwarn\u{1b}[0m: disk"),
            "warn: disk"
        );
    }

    #[test]
    fn test_strips_osc_and_short_escapes() {
        assert_eq!(sanitize("\u{1b}]0;title\u{7}body"), "body");
        assert_eq!(sanitize("\u{1b}]8;;http://x\u{1b}\\link"), "link");
        assert_eq!(sanitize("a\u{1b}Mb"), "ab");
    }

    #[test]
    fn test_strips_every_tag_occurrence() {
        assert_eq!(
            sanitize("[script:a] one [script:b] two [ script: c ]"),
            " one  two "
        );
        assert_eq!(
            sanitize("[citizen-server-impl] x [resources] y [ TXADMIN ]"),
            " x  y "
        );
    }

    #[test]
    fn test_unknown_brackets_are_kept() {
        assert_eq!(sanitize("[info] [script:] [TxAdmin]"), "[info] [script:] [TxAdmin]");
    }

    #[test]
    fn test_strips_charset_designators() {
        assert_eq!(sanitize("\u{1b}(B\u{1b}[mhi"), "hi");
        assert_eq!(sanitize("\u{1b}[1mbold\u{1b}(B\u{1b}[m done"), "bold done");
    }

    #[test]
    fn test_strips_dcs_payload() {
        assert_eq!(sanitize("\u{1b}P1$r0m\u{1b}\\text"), "text");
    }

    #[test]
    fn test_strips_c1_controls() {
        assert_eq!(sanitize("\u{9b}31mred\u{9b}0m"), "red");
        assert_eq!(sanitize("\u{9d}0;title\u{9c}body"), "body");
        assert_eq!(widen_c1("a\u{9b}1m"), "a\u{1b}[1m");
    }

    #[test]
    fn test_tabs_survive_escape_removal() {
        assert_eq!(sanitize("\u{1b}[1mname\t\u{1b}[0mvalue\r"), "name\tvalue\r");
    }

    #[test]
    fn test_non_ascii_text_survives_escape_removal() {
        assert_eq!(sanitize("\u{1b}[33mjoueur connecté ✓\u{1b}[0m"), "joueur connecté ✓");
    }

    #[test]
    fn test_spliced_sequences_are_removed() {
        assert!(!sanitize("\u{1b}\u{1b}[0m[31mred").contains(ESC));
        assert_eq!(sanitize("[scr[TXADMIN]ipt:x]hello"), "hello");
        assert_eq!(sanitize("[scr\u{1b}[0mipt:x]hello"), "hello");
    }

    #[test]
    fn test_whitespace_preserved() {
        assert_eq!(sanitize("  a\tb  "), "  a\tb  ");
        assert_eq!(sanitize(""), "");
    }

    proptest! {
        #[test]
        fn sanitize_is_idempotent(line in "(\\PC|\u{1b}|\u{9b}|\\[|\\]|\\(B|P|script:|TXADMIN|\\[0m|;|\t)*") {
            let once = sanitize(&line);
            prop_assert_eq!(sanitize(&once), once);
        }

        #[test]
        fn sanitized_output_has_no_escapes_or_tags(
            line in "(\\PC|\u{1b}\\[[0-9;]{0,4}m|\u{1b}\\(B|\u{1b}\\][a-z0-9;]{0,6}\u{7}|\u{1b}P[0-9$a-z]{0,4}\u{1b}\\\\|\u{9b}[0-9]{0,2}m|\\[script:[a-z]{1,6}\\]|\\[resources\\])*"
        ) {
            let clean = sanitize(&line);
            prop_assert!(!has_escape(&clean));
            prop_assert!(!SCRIPT_TAG_REGEX.is_match(&clean));
            prop_assert!(!COMPONENT_TAG_REGEX.is_match(&clean));
        }
    }
}
