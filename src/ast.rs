/*! Abstract syntax tree produced by the parser and consumed by the
compiler.

The tree is deliberately small: the parser already resolved escapes,
numbered the capturing groups and validated backreferences, so each node
maps almost directly onto a bytecode construct.
*/

use crate::unicode::canonicalize;

#[derive(Debug, PartialEq)]
pub(crate) enum Ast {
    /// Matches the empty string, e.g. one arm of `(a|)`.
    Empty,
    /// A single character.
    Literal(char),
    /// A character class, e.g. `[a-z]`, `\d`, `[^\w-]`.
    Class(ClassSet),
    /// The `.` metacharacter. Dot-all resolution happens at compile time.
    AnyChar,
    Assertion(AssertionKind),
    /// A group. `index` is `None` for `(?:…)`.
    Group { index: Option<u8>, body: Box<Ast> },
    LookAround { kind: LookAroundKind, body: Box<Ast> },
    Alternation(Vec<Ast>),
    Concat(Vec<Ast>),
    Repetition { min: u32, max: Option<u32>, greedy: bool, body: Box<Ast> },
    /// A backreference to capturing group `.0`.
    Backref(u8),
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub(crate) enum AssertionKind {
    StartLine,
    EndLine,
    WordBoundary,
    NotWordBoundary,
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub(crate) enum LookAroundKind {
    Ahead { negated: bool },
    Behind { negated: bool },
}

impl Ast {
    /// Minimum and maximum match width, in characters. A `None` maximum
    /// means the node can match arbitrarily long text. Backreferences
    /// report an unknown maximum, which is what makes them illegal
    /// inside lookbehind.
    pub(crate) fn width(&self) -> (u64, Option<u64>) {
        match self {
            Ast::Empty | Ast::Assertion(_) | Ast::LookAround { .. } => {
                (0, Some(0))
            }
            Ast::Literal(_) | Ast::Class(_) | Ast::AnyChar => (1, Some(1)),
            Ast::Backref(_) => (0, None),
            Ast::Group { body, .. } => body.width(),
            Ast::Alternation(alts) => {
                let mut min = u64::MAX;
                let mut max = Some(0);
                for alt in alts {
                    let (amin, amax) = alt.width();
                    min = min.min(amin);
                    max = match (max, amax) {
                        (Some(m), Some(a)) => Some(m.max(a)),
                        _ => None,
                    };
                }
                (min, max)
            }
            Ast::Concat(items) => {
                let mut min = 0u64;
                let mut max = Some(0u64);
                for item in items {
                    let (imin, imax) = item.width();
                    min = min.saturating_add(imin);
                    max = match (max, imax) {
                        (Some(m), Some(i)) => m.checked_add(i),
                        _ => None,
                    };
                }
                (min, max)
            }
            Ast::Repetition { min, max, body, .. } => {
                let (bmin, bmax) = body.width();
                let rmin = bmin.saturating_mul(*min as u64);
                let rmax = match (bmax, max) {
                    (Some(0), _) => Some(0),
                    (Some(b), Some(n)) => b.checked_mul(*n as u64),
                    _ => None,
                };
                (rmin, rmax)
            }
        }
    }

    /// Lowest and highest capturing group index defined within this
    /// node, if any. Used for emitting per-iteration capture resets.
    pub(crate) fn capture_span(&self) -> Option<(u8, u8)> {
        fn merge(
            a: Option<(u8, u8)>,
            b: Option<(u8, u8)>,
        ) -> Option<(u8, u8)> {
            match (a, b) {
                (Some((alo, ahi)), Some((blo, bhi))) => {
                    Some((alo.min(blo), ahi.max(bhi)))
                }
                (Some(s), None) | (None, Some(s)) => Some(s),
                (None, None) => None,
            }
        }
        match self {
            Ast::Group { index, body } => {
                let own = index.map(|i| (i, i));
                merge(own, body.capture_span())
            }
            Ast::LookAround { body, .. } => body.capture_span(),
            Ast::Repetition { body, .. } => body.capture_span(),
            Ast::Alternation(items) | Ast::Concat(items) => items
                .iter()
                .fold(None, |acc, item| merge(acc, item.capture_span())),
            _ => None,
        }
    }
}

/// A set of code points, stored as sorted, non-overlapping inclusive
/// ranges, plus a negation flag. Negation is applied after membership
/// (and after case canonicalization), matching ECMAScript class
/// semantics.
#[derive(Debug, PartialEq, Eq, Clone, Default)]
pub(crate) struct ClassSet {
    ranges: Vec<(u32, u32)>,
    negated: bool,
}

/// Case folding enumerates the characters of ranges no wider than this;
/// wider ranges get ASCII-only folding plus the VM's runtime
/// canonicalization of the input character.
const FOLD_RANGE_LIMIT: u32 = 0x400;

impl ClassSet {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn negate(&mut self) {
        self.negated = true;
    }

    pub(crate) fn is_negated(&self) -> bool {
        self.negated
    }

    pub(crate) fn ranges(&self) -> &[(u32, u32)] {
        &self.ranges
    }

    pub(crate) fn push_char(&mut self, c: char) {
        self.ranges.push((c as u32, c as u32));
    }

    /// `lo` and `hi` are inclusive; the caller validated `lo <= hi`.
    pub(crate) fn push_range(&mut self, lo: char, hi: char) {
        self.ranges.push((lo as u32, hi as u32));
    }

    pub(crate) fn push_ranges(&mut self, ranges: &[(u32, u32)]) {
        self.ranges.extend_from_slice(ranges);
    }

    /// Adds the complement of `ranges` (which must be sorted and
    /// non-overlapping), for the negated shorthands `\D`, `\W`, `\S`.
    pub(crate) fn push_complement(&mut self, ranges: &[(u32, u32)]) {
        let mut next = 0u32;
        for &(lo, hi) in ranges {
            if lo > next {
                self.ranges.push((next, lo - 1));
            }
            next = hi + 1;
        }
        if next <= char::MAX as u32 {
            self.ranges.push((next, char::MAX as u32));
        }
    }

    /// Sorts and merges the accumulated ranges.
    pub(crate) fn finalize(&mut self) {
        self.ranges.sort_unstable();
        let mut merged: Vec<(u32, u32)> = Vec::with_capacity(self.ranges.len());
        for &(lo, hi) in &self.ranges {
            match merged.last_mut() {
                Some(last) if lo <= last.1.saturating_add(1) => {
                    last.1 = last.1.max(hi);
                }
                _ => merged.push((lo, hi)),
            }
        }
        self.ranges = merged;
    }

    /// Raw membership, ignoring the negation flag.
    pub(crate) fn contains(&self, cp: u32) -> bool {
        self.ranges
            .binary_search_by(|&(lo, hi)| {
                if cp < lo {
                    std::cmp::Ordering::Greater
                } else if cp > hi {
                    std::cmp::Ordering::Less
                } else {
                    std::cmp::Ordering::Equal
                }
            })
            .is_ok()
    }

    /// True when every member is below 0x100 and the set is large enough
    /// that a bitmap encodes smaller than the range list.
    pub(crate) fn fits_bitmap(&self) -> bool {
        self.ranges.len() >= 8
            && self.ranges.last().is_some_and(|&(_, hi)| hi < 0x100)
    }

    /// Adds the canonical counterparts of the set's members, so that a
    /// compile-time-folded set plus runtime canonicalization of the
    /// input character covers both mapping directions.
    pub(crate) fn case_fold(&mut self, unicode: bool) {
        let mut extra = Vec::new();
        for &(lo, hi) in &self.ranges {
            if hi - lo <= FOLD_RANGE_LIMIT {
                for cp in lo..=hi {
                    let Some(c) = char::from_u32(cp) else { continue };
                    let f = canonicalize(c, unicode);
                    if f != c {
                        extra.push((f as u32, f as u32));
                    }
                    if c.is_ascii_alphabetic() {
                        let other = (cp ^ 0x20, cp ^ 0x20);
                        extra.push(other);
                    }
                }
            } else {
                // Fold only the ASCII letters overlapping the range.
                for (alo, ahi) in [(0x41u32, 0x5au32), (0x61, 0x7a)] {
                    let olo = lo.max(alo);
                    let ohi = hi.min(ahi);
                    if olo <= ohi {
                        extra.push((olo ^ 0x20, ohi ^ 0x20));
                    }
                }
            }
        }
        self.ranges.extend(extra);
        self.finalize();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn class_set_merging() {
        let mut set = ClassSet::new();
        set.push_range('a', 'f');
        set.push_range('d', 'k');
        set.push_char('l');
        set.finalize();
        assert_eq!(set.ranges(), &[(0x61, 0x6c)]);
        assert!(set.contains('e' as u32));
        assert!(!set.contains('z' as u32));
    }

    #[test]
    fn class_set_complement() {
        let mut set = ClassSet::new();
        set.push_complement(&[(0x30, 0x39)]);
        set.finalize();
        assert!(!set.contains(0x35));
        assert!(set.contains(0x2f));
        assert!(set.contains(0x3a));
        assert!(set.contains(char::MAX as u32));
    }

    #[test]
    fn width_of_quantified_alternation() {
        // (ab|c){2,4}
        let ast = Ast::Repetition {
            min: 2,
            max: Some(4),
            greedy: true,
            body: Box::new(Ast::Alternation(vec![
                Ast::Concat(vec![Ast::Literal('a'), Ast::Literal('b')]),
                Ast::Literal('c'),
            ])),
        };
        assert_eq!(ast.width(), (2, Some(8)));
    }

    #[test]
    fn backref_width_is_unbounded() {
        let ast = Ast::Concat(vec![Ast::Literal('a'), Ast::Backref(1)]);
        assert_eq!(ast.width(), (1, None));
    }
}
