/*! Parses pattern text into the AST defined in [`crate::ast`].

The parser is a hand-written recursive descent over the pattern string.
It performs all the validation that has a natural byte offset: escapes,
quantifier syntax, class ranges, group syntax, backreference numbering
and lookbehind boundedness, so that every [`CompileError`] it produces
points at the offending construct.

A pre-scan ([`scan_groups`]) counts the capturing groups and collects
the named-group table before the main parse, which is what allows
backreferences (numbered and named) to refer to groups defined later in
the pattern.
*/

use rustc_hash::FxHashMap;

use crate::ast::{AssertionKind, Ast, ClassSet, LookAroundKind};
use crate::errors::{CompileError, CompileErrorKind};
use crate::unicode::{DIGIT_RANGES, SPACE_RANGES, WORD_RANGES};
use crate::{Flag, Flags};

/// Maximum value allowed in a `{m,n}` quantifier.
pub(crate) const MAX_REPEAT: u32 = 1024;

/// Maximum group nesting depth.
pub(crate) const MAX_NESTING: u32 = 250;

/// Maximum number of explicit capturing groups. Together with the
/// implicit group 0 this keeps every group index within a `u8`.
pub(crate) const MAX_CAPTURES: u32 = 254;

/// Maximum number of alternatives in a single alternation.
pub(crate) const MAX_ALTERNATIVES: usize = 255;

/// Maximum width, in characters, of a lookbehind body.
pub(crate) const MAX_LOOKBEHIND: u32 = 0xffff;

/// Result of a successful parse.
pub(crate) struct ParsedPattern {
    pub ast: Ast,
    /// Number of explicit capturing groups (not counting group 0).
    pub group_count: u8,
    /// Maps group names to group indexes.
    pub names: FxHashMap<Box<str>, u8>,
}

pub(crate) fn parse(
    pattern: &str,
    flags: Flags,
) -> Result<ParsedPattern, CompileError> {
    let (group_count, names) = scan_groups(pattern)?;
    let mut parser = Parser {
        pattern,
        pos: 0,
        flags,
        group_count,
        names,
        next_group: 0,
        depth: 0,
    };
    let ast = parser.parse_disjunction()?;
    if parser.pos < pattern.len() {
        // The only way the parse can stop early is an unbalanced `)`.
        return Err(CompileError::new(
            CompileErrorKind::UnmatchedParen,
            parser.pos,
        ));
    }
    Ok(ParsedPattern { ast, group_count, names: parser.names })
}

struct Parser<'a> {
    pattern: &'a str,
    pos: usize,
    flags: Flags,
    /// Total number of capturing groups, from the pre-scan.
    group_count: u8,
    names: FxHashMap<Box<str>, u8>,
    /// Capturing groups allocated so far by the main parse.
    next_group: u8,
    depth: u32,
}

enum Escape {
    Char(char),
    Class(ClassSet),
    Backref(u8),
    WordBoundary(bool),
}

enum ClassAtom {
    Char(char),
    Set(ClassSet),
}

impl<'a> Parser<'a> {
    fn unicode(&self) -> bool {
        self.flags.contains(Flag::Unicode)
    }

    fn peek(&self) -> Option<char> {
        self.pattern[self.pos..].chars().next()
    }

    fn peek2(&self) -> Option<char> {
        self.pattern[self.pos..].chars().nth(1)
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn eat(&mut self, c: char) -> bool {
        if self.peek() == Some(c) {
            self.pos += c.len_utf8();
            true
        } else {
            false
        }
    }

    fn eat_str(&mut self, s: &str) -> bool {
        if self.pattern[self.pos..].starts_with(s) {
            self.pos += s.len();
            true
        } else {
            false
        }
    }

    fn err<T>(
        &self,
        kind: CompileErrorKind,
        offset: usize,
    ) -> Result<T, CompileError> {
        Err(CompileError::new(kind, offset))
    }

    fn parse_disjunction(&mut self) -> Result<Ast, CompileError> {
        let d_off = self.pos;
        let mut alts = vec![self.parse_alternative()?];
        while self.eat('|') {
            alts.push(self.parse_alternative()?);
        }
        if alts.len() > MAX_ALTERNATIVES {
            return self.err(CompileErrorKind::TooManyAlternatives, d_off);
        }
        if alts.len() == 1 {
            Ok(alts.remove(0))
        } else {
            Ok(Ast::Alternation(alts))
        }
    }

    fn parse_alternative(&mut self) -> Result<Ast, CompileError> {
        let mut items = Vec::new();
        loop {
            match self.peek() {
                None | Some('|') | Some(')') => break,
                Some('*' | '+' | '?') => {
                    return self.err(CompileErrorKind::NothingToRepeat, self.pos)
                }
                Some('{') if self.quantifier_ahead() => {
                    return self.err(CompileErrorKind::NothingToRepeat, self.pos)
                }
                _ => {}
            }
            let (ast, quantifiable) = self.parse_term()?;
            let q_off = self.pos;
            match self.parse_quantifier()? {
                Some((min, max, greedy)) => {
                    if !quantifiable {
                        return self
                            .err(CompileErrorKind::NothingToRepeat, q_off);
                    }
                    if (min, max) == (1, Some(1)) {
                        items.push(ast);
                    } else {
                        items.push(Ast::Repetition {
                            min,
                            max,
                            greedy,
                            body: Box::new(ast),
                        });
                    }
                }
                None => items.push(ast),
            }
        }
        Ok(match items.len() {
            0 => Ast::Empty,
            1 => items.remove(0),
            _ => Ast::Concat(items),
        })
    }

    /// Parses a single term. The boolean tells whether a quantifier may
    /// follow: anchors, word boundaries and lookarounds are not
    /// quantifiable.
    fn parse_term(&mut self) -> Result<(Ast, bool), CompileError> {
        match self.peek() {
            Some('^') => {
                self.bump();
                Ok((Ast::Assertion(AssertionKind::StartLine), false))
            }
            Some('$') => {
                self.bump();
                Ok((Ast::Assertion(AssertionKind::EndLine), false))
            }
            Some('.') => {
                self.bump();
                Ok((Ast::AnyChar, true))
            }
            Some('(') => {
                let ast = self.parse_group()?;
                let quantifiable = !matches!(ast, Ast::LookAround { .. });
                Ok((ast, quantifiable))
            }
            Some('[') => Ok((Ast::Class(self.parse_class()?), true)),
            Some('\\') => {
                let off = self.pos;
                self.bump();
                match self.parse_escape(off, false)? {
                    Escape::Char(c) => Ok((Ast::Literal(c), true)),
                    Escape::Class(set) => Ok((Ast::Class(set), true)),
                    Escape::Backref(n) => Ok((Ast::Backref(n), true)),
                    Escape::WordBoundary(false) => Ok((
                        Ast::Assertion(AssertionKind::WordBoundary),
                        false,
                    )),
                    Escape::WordBoundary(true) => Ok((
                        Ast::Assertion(AssertionKind::NotWordBoundary),
                        false,
                    )),
                }
            }
            Some(c) => {
                self.bump();
                Ok((Ast::Literal(c), true))
            }
            None => unreachable!(),
        }
    }

    fn parse_group(&mut self) -> Result<Ast, CompileError> {
        let g_off = self.pos;
        self.bump(); // consume '('
        if self.eat_str("?:") {
            let body = self.parse_group_body(g_off)?;
            Ok(Ast::Group { index: None, body })
        } else if self.eat_str("?=") {
            let body = self.parse_group_body(g_off)?;
            Ok(Ast::LookAround {
                kind: LookAroundKind::Ahead { negated: false },
                body,
            })
        } else if self.eat_str("?!") {
            let body = self.parse_group_body(g_off)?;
            Ok(Ast::LookAround {
                kind: LookAroundKind::Ahead { negated: true },
                body,
            })
        } else if self.eat_str("?<=") {
            let body = self.parse_lookbehind_body(g_off)?;
            Ok(Ast::LookAround {
                kind: LookAroundKind::Behind { negated: false },
                body,
            })
        } else if self.eat_str("?<!") {
            let body = self.parse_lookbehind_body(g_off)?;
            Ok(Ast::LookAround {
                kind: LookAroundKind::Behind { negated: true },
                body,
            })
        } else if self.eat_str("?<") {
            self.parse_group_name()?;
            let index = self.alloc_group();
            let body = self.parse_group_body(g_off)?;
            Ok(Ast::Group { index: Some(index), body })
        } else if self.peek() == Some('?') {
            self.err(CompileErrorKind::InvalidGroup, g_off)
        } else {
            let index = self.alloc_group();
            let body = self.parse_group_body(g_off)?;
            Ok(Ast::Group { index: Some(index), body })
        }
    }

    fn parse_group_body(
        &mut self,
        g_off: usize,
    ) -> Result<Box<Ast>, CompileError> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            return self.err(CompileErrorKind::NestingTooDeep, g_off);
        }
        let body = self.parse_disjunction()?;
        self.depth -= 1;
        if !self.eat(')') {
            return self.err(CompileErrorKind::UnterminatedGroup, g_off);
        }
        Ok(Box::new(body))
    }

    fn parse_lookbehind_body(
        &mut self,
        g_off: usize,
    ) -> Result<Box<Ast>, CompileError> {
        let body = self.parse_group_body(g_off)?;
        match body.width() {
            (_, None) => {
                self.err(CompileErrorKind::UnboundedLookbehind, g_off)
            }
            (_, Some(max)) if max > MAX_LOOKBEHIND as u64 => {
                self.err(CompileErrorKind::TooLarge, g_off)
            }
            _ => Ok(body),
        }
    }

    fn alloc_group(&mut self) -> u8 {
        // The pre-scan already bounded the group count.
        self.next_group += 1;
        self.next_group
    }

    fn parse_group_name(&mut self) -> Result<&'a str, CompileError> {
        let start = self.pos;
        loop {
            match self.peek() {
                Some('>') => break,
                Some(c)
                    if is_group_name_char(c, self.pos == start) =>
                {
                    self.bump();
                }
                _ => {
                    return self
                        .err(CompileErrorKind::InvalidGroupName, start)
                }
            }
        }
        if self.pos == start {
            return self.err(CompileErrorKind::InvalidGroupName, start);
        }
        let name = &self.pattern[start..self.pos];
        self.bump(); // consume '>'
        Ok(name)
    }

    fn parse_class(&mut self) -> Result<ClassSet, CompileError> {
        let off = self.pos;
        self.bump(); // consume '['
        let mut set = ClassSet::new();
        if self.eat('^') {
            set.negate();
        }
        loop {
            match self.peek() {
                None => {
                    return self.err(CompileErrorKind::UnterminatedClass, off)
                }
                Some(']') => {
                    self.bump();
                    break;
                }
                _ => {}
            }
            let atom_off = self.pos;
            let first = self.parse_class_atom(off)?;
            if self.peek() == Some('-')
                && !matches!(self.peek2(), Some(']') | None)
            {
                self.bump(); // consume '-'
                let second = self.parse_class_atom(off)?;
                match (first, second) {
                    (ClassAtom::Char(lo), ClassAtom::Char(hi)) => {
                        if (hi as u32) < (lo as u32) {
                            return self.err(
                                CompileErrorKind::InvalidClassRange,
                                atom_off,
                            );
                        }
                        set.push_range(lo, hi);
                    }
                    // A shorthand endpoint leaves `-` as a literal
                    // member, like `[\d-x]`.
                    (a, b) => {
                        push_class_atom(&mut set, a);
                        push_class_atom(&mut set, b);
                        set.push_char('-');
                    }
                }
            } else {
                push_class_atom(&mut set, first);
            }
        }
        set.finalize();
        Ok(set)
    }

    fn parse_class_atom(
        &mut self,
        class_off: usize,
    ) -> Result<ClassAtom, CompileError> {
        match self.peek() {
            Some('\\') => {
                let off = self.pos;
                self.bump();
                match self.parse_escape(off, true)? {
                    Escape::Char(c) => Ok(ClassAtom::Char(c)),
                    Escape::Class(set) => Ok(ClassAtom::Set(set)),
                    // `parse_escape` never produces these in a class.
                    Escape::Backref(_) | Escape::WordBoundary(_) => {
                        unreachable!()
                    }
                }
            }
            Some(c) => {
                self.bump();
                Ok(ClassAtom::Char(c))
            }
            None => self.err(CompileErrorKind::UnterminatedClass, class_off),
        }
    }

    fn parse_escape(
        &mut self,
        off: usize,
        in_class: bool,
    ) -> Result<Escape, CompileError> {
        let Some(c) = self.bump() else {
            return self.err(CompileErrorKind::UnknownEscape, off);
        };
        match c {
            'n' => Ok(Escape::Char('\n')),
            'r' => Ok(Escape::Char('\r')),
            't' => Ok(Escape::Char('\t')),
            'f' => Ok(Escape::Char('\x0c')),
            'v' => Ok(Escape::Char('\x0b')),
            'd' | 'D' | 'w' | 'W' | 's' | 'S' => {
                Ok(Escape::Class(shorthand_set(c)))
            }
            'b' if in_class => Ok(Escape::Char('\u{8}')),
            'b' => Ok(Escape::WordBoundary(false)),
            'B' if !in_class => Ok(Escape::WordBoundary(true)),
            '0' => {
                if self.peek().is_some_and(|c| c.is_ascii_digit()) {
                    return self.err(CompileErrorKind::UnknownEscape, off);
                }
                Ok(Escape::Char('\0'))
            }
            '1'..='9' => {
                if in_class {
                    return self.err(CompileErrorKind::UnknownEscape, off);
                }
                let mut n = c.to_digit(10).unwrap_or(0);
                while let Some(d) =
                    self.peek().and_then(|c| c.to_digit(10))
                {
                    if n > 999 {
                        break;
                    }
                    n = n * 10 + d;
                    self.bump();
                }
                if n > self.group_count as u32 {
                    return self
                        .err(CompileErrorKind::InvalidBackreference, off);
                }
                Ok(Escape::Backref(n as u8))
            }
            'x' => match self.parse_hex_digits(2) {
                Some(cp) => match char::from_u32(cp) {
                    Some(c) => Ok(Escape::Char(c)),
                    None => unreachable!(),
                },
                None => self.err(CompileErrorKind::UnknownEscape, off),
            },
            'u' => self.parse_unicode_escape(off),
            'c' => match self.bump() {
                Some(l) if l.is_ascii_alphabetic() => {
                    Ok(Escape::Char(((l as u8) % 32) as char))
                }
                _ => self.err(CompileErrorKind::UnknownEscape, off),
            },
            'k' if !in_class => {
                if !self.eat('<') {
                    return self.err(CompileErrorKind::UnknownEscape, off);
                }
                let name = self.parse_group_name()?;
                match self.names.get(name) {
                    Some(&index) => Ok(Escape::Backref(index)),
                    None => {
                        self.err(CompileErrorKind::InvalidBackreference, off)
                    }
                }
            }
            c if self.unicode() => {
                if "^$\\.*+?()[]{}|/".contains(c) || (in_class && c == '-') {
                    Ok(Escape::Char(c))
                } else {
                    self.err(CompileErrorKind::UnknownEscape, off)
                }
            }
            c if c.is_ascii_alphanumeric() => {
                self.err(CompileErrorKind::UnknownEscape, off)
            }
            c => Ok(Escape::Char(c)),
        }
    }

    fn parse_unicode_escape(
        &mut self,
        off: usize,
    ) -> Result<Escape, CompileError> {
        if self.eat('{') {
            if !self.unicode() {
                return self.err(CompileErrorKind::UnknownEscape, off);
            }
            let start = self.pos;
            while self.peek().is_some_and(|c| c.is_ascii_hexdigit()) {
                self.bump();
            }
            let digits = &self.pattern[start..self.pos];
            if digits.is_empty() || digits.len() > 6 || !self.eat('}') {
                return self.err(CompileErrorKind::UnknownEscape, off);
            }
            return match u32::from_str_radix(digits, 16)
                .ok()
                .and_then(char::from_u32)
            {
                Some(c) => Ok(Escape::Char(c)),
                None => self.err(CompileErrorKind::UnknownEscape, off),
            };
        }
        let Some(hi) = self.parse_hex_digits(4) else {
            return self.err(CompileErrorKind::UnknownEscape, off);
        };
        if self.unicode() && (0xd800..=0xdbff).contains(&hi) {
            let saved = self.pos;
            if self.eat_str("\\u") {
                if let Some(lo) = self.parse_hex_digits(4) {
                    if (0xdc00..=0xdfff).contains(&lo) {
                        let cp =
                            0x10000 + ((hi - 0xd800) << 10) + (lo - 0xdc00);
                        if let Some(c) = char::from_u32(cp) {
                            return Ok(Escape::Char(c));
                        }
                    }
                }
                self.pos = saved;
            }
        }
        // Lone surrogates cannot be represented in UTF-8 input.
        match char::from_u32(hi) {
            Some(c) => Ok(Escape::Char(c)),
            None => self.err(CompileErrorKind::UnknownEscape, off),
        }
    }

    /// Parses exactly `n` hex digits, or returns `None` leaving the
    /// position unchanged.
    fn parse_hex_digits(&mut self, n: usize) -> Option<u32> {
        let saved = self.pos;
        let mut value = 0u32;
        for _ in 0..n {
            match self.peek().and_then(|c| c.to_digit(16)) {
                Some(d) => {
                    value = value * 16 + d;
                    self.bump();
                }
                None => {
                    self.pos = saved;
                    return None;
                }
            }
        }
        Some(value)
    }

    fn parse_quantifier(
        &mut self,
    ) -> Result<Option<(u32, Option<u32>, bool)>, CompileError> {
        let (min, max) = match self.peek() {
            Some('*') => {
                self.bump();
                (0, None)
            }
            Some('+') => {
                self.bump();
                (1, None)
            }
            Some('?') => {
                self.bump();
                (0, Some(1))
            }
            Some('{') => match self.parse_braced_quantifier()? {
                Some(bounds) => bounds,
                None => return Ok(None),
            },
            _ => return Ok(None),
        };
        let greedy = !self.eat('?');
        Ok(Some((min, max, greedy)))
    }

    /// Parses `{m}`, `{m,}` or `{m,n}`. Outside Unicode mode a `{` that
    /// doesn't form a quantifier is an ordinary character and the
    /// position is rewound.
    fn parse_braced_quantifier(
        &mut self,
    ) -> Result<Option<(u32, Option<u32>)>, CompileError> {
        let q_off = self.pos;
        self.bump(); // consume '{'
        let Some(min) = self.parse_decimal() else {
            return self.braced_fallback(q_off);
        };
        let max = if self.eat(',') {
            if self.peek() == Some('}') {
                None
            } else {
                match self.parse_decimal() {
                    Some(n) => Some(n),
                    None => return self.braced_fallback(q_off),
                }
            }
        } else {
            Some(min)
        };
        if !self.eat('}') {
            return self.braced_fallback(q_off);
        }
        if max.is_some_and(|n| min > n) {
            return self.err(CompileErrorKind::InvalidQuantifier, q_off);
        }
        if min > MAX_REPEAT || max.is_some_and(|n| n > MAX_REPEAT) {
            return self.err(CompileErrorKind::TooLarge, q_off);
        }
        Ok(Some((min, max)))
    }

    fn braced_fallback(
        &mut self,
        q_off: usize,
    ) -> Result<Option<(u32, Option<u32>)>, CompileError> {
        if self.unicode() {
            self.err(CompileErrorKind::InvalidQuantifier, q_off)
        } else {
            self.pos = q_off;
            Ok(None)
        }
    }

    fn parse_decimal(&mut self) -> Option<u32> {
        let start = self.pos;
        let mut value = 0u64;
        while let Some(d) = self.peek().and_then(|c| c.to_digit(10)) {
            value = (value * 10 + d as u64).min(u32::MAX as u64);
            self.bump();
        }
        if self.pos == start {
            None
        } else {
            Some(value as u32)
        }
    }

    /// True when the text at the current position looks like a braced
    /// quantifier. Used to report `{2}` with nothing to repeat.
    fn quantifier_ahead(&self) -> bool {
        let bytes = self.pattern[self.pos..].as_bytes();
        let mut i = 1; // skip '{'
        let digits_start = i;
        while bytes.get(i).is_some_and(u8::is_ascii_digit) {
            i += 1;
        }
        if i == digits_start {
            return false;
        }
        if bytes.get(i) == Some(&b',') {
            i += 1;
            while bytes.get(i).is_some_and(u8::is_ascii_digit) {
                i += 1;
            }
        }
        bytes.get(i) == Some(&b'}')
    }
}

fn is_group_name_char(c: char, first: bool) -> bool {
    if first {
        c.is_ascii_alphabetic() || c == '_' || c == '$'
    } else {
        c.is_ascii_alphanumeric() || c == '_' || c == '$'
    }
}

fn push_class_atom(set: &mut ClassSet, atom: ClassAtom) {
    match atom {
        ClassAtom::Char(c) => set.push_char(c),
        ClassAtom::Set(s) => set.push_ranges(s.ranges()),
    }
}

fn shorthand_set(c: char) -> ClassSet {
    let mut set = ClassSet::new();
    match c {
        'd' => set.push_ranges(DIGIT_RANGES),
        'D' => set.push_complement(DIGIT_RANGES),
        'w' => set.push_ranges(WORD_RANGES),
        'W' => set.push_complement(WORD_RANGES),
        's' => set.push_ranges(SPACE_RANGES),
        'S' => set.push_complement(SPACE_RANGES),
        _ => unreachable!(),
    }
    set.finalize();
    set
}

/// Pre-scan that counts capturing groups and collects group names, so
/// that backreferences can target groups defined later in the pattern.
fn scan_groups(
    pattern: &str,
) -> Result<(u8, FxHashMap<Box<str>, u8>), CompileError> {
    let bytes = pattern.as_bytes();
    let mut names = FxHashMap::default();
    let mut count: u32 = 0;
    let mut in_class = false;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            // Skipping two bytes after a backslash may land inside a
            // multi-byte character, but those bytes are >= 0x80 and
            // can't be mistaken for syntax.
            b'\\' => i += 2,
            b'[' if !in_class => {
                in_class = true;
                i += 1;
            }
            b']' if in_class => {
                in_class = false;
                i += 1;
            }
            b'(' if !in_class => {
                let capturing = match bytes.get(i + 1) {
                    Some(b'?') => {
                        bytes.get(i + 2) == Some(&b'<')
                            && !matches!(
                                bytes.get(i + 3),
                                Some(b'=') | Some(b'!')
                            )
                    }
                    _ => true,
                };
                if capturing {
                    count += 1;
                    if count > MAX_CAPTURES {
                        return Err(CompileError::new(
                            CompileErrorKind::TooManyCaptures,
                            i,
                        ));
                    }
                    if bytes.get(i + 1) == Some(&b'?') {
                        // Named group; collect the name if it is
                        // well-formed, the main parse validates it.
                        let name_start = i + 3;
                        if let Some(name) = scan_name(pattern, name_start) {
                            if names
                                .insert(
                                    Box::<str>::from(name),
                                    count as u8,
                                )
                                .is_some()
                            {
                                return Err(CompileError::new(
                                    CompileErrorKind::DuplicateGroupName(
                                        name.to_string(),
                                    ),
                                    name_start,
                                ));
                            }
                        }
                    }
                }
                i += 1;
            }
            _ => i += 1,
        }
    }
    Ok((count as u8, names))
}

fn scan_name(pattern: &str, start: usize) -> Option<&str> {
    let rest = pattern.get(start..)?;
    let end = rest.find('>')?;
    let name = &rest[..end];
    let mut chars = name.chars();
    let first = chars.next()?;
    if !is_group_name_char(first, true) {
        return None;
    }
    if chars.all(|c| is_group_name_char(c, false)) {
        Some(name)
    } else {
        None
    }
}
