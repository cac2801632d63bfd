/*! Character-level predicates and case canonicalization.

ECMAScript regular expressions compare characters through a
canonicalization function when the pattern is case-insensitive. In
Unicode mode the canonical form is the simple lowercase mapping; outside
Unicode mode it is the uppercase mapping, except that a non-ASCII
character never canonicalizes into ASCII. Multi-character case mappings
(like `ß` -> `SS`) leave the character unchanged in both modes.
*/

/// Canonical form of `c` for case-insensitive comparison.
pub(crate) fn canonicalize(c: char, unicode: bool) -> char {
    if unicode {
        // Simple fold. U+03C2 (final sigma) lowercases to itself but
        // folds to U+03C3.
        if c == '\u{3c2}' {
            return '\u{3c3}';
        }
        let mut lower = c.to_lowercase();
        match (lower.next(), lower.next()) {
            (Some(l), None) => l,
            _ => c,
        }
    } else {
        let mut upper = c.to_uppercase();
        let u = match (upper.next(), upper.next()) {
            (Some(u), None) => u,
            _ => return c,
        };
        if u.is_ascii() && !c.is_ascii() {
            c
        } else {
            u
        }
    }
}

/// True for the characters matched by `\w` and considered by `\b`.
/// ECMAScript keeps this ASCII-only even in Unicode mode.
pub(crate) fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// True for ECMAScript line terminators.
pub(crate) fn is_line_terminator(c: char) -> bool {
    matches!(c, '\n' | '\r' | '\u{2028}' | '\u{2029}')
}

/// Inclusive code point ranges for `\d`.
pub(crate) const DIGIT_RANGES: &[(u32, u32)] = &[(0x30, 0x39)];

/// Inclusive code point ranges for `\w`.
pub(crate) const WORD_RANGES: &[(u32, u32)] =
    &[(0x30, 0x39), (0x41, 0x5a), (0x5f, 0x5f), (0x61, 0x7a)];

/// Inclusive code point ranges for `\s`: WhiteSpace plus LineTerminator.
pub(crate) const SPACE_RANGES: &[(u32, u32)] = &[
    (0x09, 0x0d),
    (0x20, 0x20),
    (0xa0, 0xa0),
    (0x1680, 0x1680),
    (0x2000, 0x200a),
    (0x2028, 0x2029),
    (0x202f, 0x202f),
    (0x205f, 0x205f),
    (0x3000, 0x3000),
    (0xfeff, 0xfeff),
];
