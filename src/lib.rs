/*! A backtracking regular expression engine.

This crate compiles ECMAScript-style patterns into a compact bytecode
program and executes it with a backtracking VM. The supported syntax
includes capture groups (numbered and named), backreferences, greedy
and lazy quantifiers, lookahead and lookbehind, anchors and word
boundaries, and the `i`/`m`/`s`/`u`/`y`/`g` flags. Matching follows the
ECMAScript priority rules: the leftmost alternative wins, greedy
quantifiers prefer longer matches, and the first accepting path
determines the captures.

Backtracking time can grow exponentially for pathological patterns, so
every match runs under resource ceilings: a limit on the number of live
choice points and a limit on lookaround nesting. Hitting a ceiling is
reported as an error, distinct from a non-match.

# Example

```rust
use bregex::{Flags, Regex};

let re = Regex::compile(r"(\w+)-(\d+)", Flags::none()).unwrap();

let caps = re.captures("order ab-42").unwrap().unwrap();

assert_eq!(caps.get(0).unwrap().as_str(), "ab-42");
assert_eq!(caps.get(1).unwrap().as_str(), "ab");
assert_eq!(caps.get(2).unwrap().as_str(), "42");
```
*/

use std::fmt;
use std::ops::Range;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use bitmask::bitmask;
use rustc_hash::FxHashMap;

mod ast;
mod compiler;
mod errors;
mod instr;
mod parser;
mod unicode;
mod vm;

#[cfg(test)]
mod tests;

pub use errors::{CompileError, CompileErrorKind, MatchError};
pub use vm::{MatchContext, DEFAULT_BACKTRACK_LIMIT, DEFAULT_RECURSION_LIMIT};

use vm::BacktrackVM;

bitmask! {
    /// A set of [`Flag`] values controlling how a pattern is compiled
    /// and matched.
    ///
    /// The flags correspond to the ECMAScript flag letters: `i` is
    /// [`Flag::IgnoreCase`], `m` is [`Flag::Multiline`], `s` is
    /// [`Flag::DotAll`], `u` is [`Flag::Unicode`], `y` is
    /// [`Flag::Sticky`] and `g` is [`Flag::Global`]. `Sticky` pins the
    /// match to the exact start offset instead of scanning forward.
    /// `Global` is a caller-side marker for iterative matching and
    /// doesn't change how a single match behaves.
    #[derive(Debug)]
    pub mask Flags: u8 where
    /// Each of the flags that a pattern can have.
    flags Flag {
        IgnoreCase = 0x01,
        Multiline = 0x02,
        DotAll = 0x04,
        Unicode = 0x08,
        Sticky = 0x10,
        Global = 0x20,
    }
}

impl Flags {
    /// Builds a flag set from ECMAScript flag letters, like `"imu"`.
    pub fn from_modifiers(modifiers: &str) -> Result<Flags, CompileError> {
        let mut flags = Flags::none();
        for (i, c) in modifiers.char_indices() {
            flags.set(match c {
                'i' => Flag::IgnoreCase,
                'm' => Flag::Multiline,
                's' => Flag::DotAll,
                'u' => Flag::Unicode,
                'y' => Flag::Sticky,
                'g' => Flag::Global,
                _ => {
                    return Err(CompileError::new(
                        CompileErrorKind::InvalidFlag(c),
                        i,
                    ))
                }
            });
        }
        Ok(flags)
    }
}

/// A compiled regular expression.
///
/// A `Regex` is immutable once compiled and can be shared freely
/// between threads; all per-match state is allocated per call.
#[derive(Clone)]
pub struct Regex {
    code: Vec<u8>,
    flags: Flags,
    /// Number of capture groups, including the implicit group 0.
    capture_count: u8,
    loop_count: u8,
    names: FxHashMap<Box<str>, u8>,
    /// Byte every match must start with, if there is one.
    first_byte: Option<u8>,
    /// True when the pattern can only match at the start of the input.
    anchored: bool,
    backtrack_limit: usize,
    recursion_limit: usize,
    abort: Option<Arc<AtomicBool>>,
}

impl Regex {
    /// Compiles `pattern` with the given flags.
    pub fn compile(
        pattern: &str,
        flags: Flags,
    ) -> Result<Regex, CompileError> {
        let parsed = parser::parse(pattern, flags)?;
        let program = compiler::compile(&parsed.ast, flags)?;
        // Case-insensitive literals are compiled to canonical
        // characters, not bytes, so no prefilter there.
        let first_byte = if flags.contains(Flag::IgnoreCase) {
            None
        } else {
            compiler::required_first_byte(&program.code)
        };
        let anchored = !flags.contains(Flag::Multiline)
            && compiler::is_start_anchored(&program.code);
        Ok(Regex {
            code: program.code,
            flags,
            capture_count: parsed.group_count + 1,
            loop_count: program.loop_count,
            names: parsed.names,
            first_byte,
            anchored,
            backtrack_limit: DEFAULT_BACKTRACK_LIMIT,
            recursion_limit: DEFAULT_RECURSION_LIMIT,
            abort: None,
        })
    }

    /// Sets the maximum number of choice points a match may hold at
    /// once. The default is [`DEFAULT_BACKTRACK_LIMIT`]. Exceeding the
    /// limit makes the match fail with [`MatchError::StackOverflow`].
    pub fn backtrack_limit(mut self, limit: usize) -> Self {
        self.backtrack_limit = limit;
        self
    }

    /// Sets the maximum lookaround nesting depth during a match. The
    /// default is [`DEFAULT_RECURSION_LIMIT`].
    pub fn recursion_limit(mut self, limit: usize) -> Self {
        self.recursion_limit = limit;
        self
    }

    /// Installs a flag that aborts an in-progress match when raised,
    /// making it fail with [`MatchError::Aborted`]. The flag can be
    /// raised from another thread.
    pub fn abort_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.abort = Some(flag);
        self
    }

    /// The flags the pattern was compiled with.
    pub fn flags(&self) -> Flags {
        self.flags
    }

    /// Number of capture groups, including the implicit group 0 that
    /// spans the whole match.
    pub fn capture_count(&self) -> usize {
        self.capture_count as usize
    }

    /// Index of the capture group named `name`, if the pattern defines
    /// it.
    pub fn group_index(&self, name: &str) -> Option<usize> {
        self.names.get(name).map(|&i| i as usize)
    }

    /// Attempts a match starting exactly at byte offset `start`,
    /// without scanning forward.
    ///
    /// # Panics
    ///
    /// Panics if `start` is beyond the end of `input` or not on a
    /// character boundary.
    pub fn exec_at<'r, 'i>(
        &'r self,
        input: &'i str,
        start: usize,
    ) -> Result<Option<Captures<'r, 'i>>, MatchError> {
        self.exec_at_with(input, start, MatchContext::default())
    }

    /// Like [`Regex::exec_at`], with explicit context flags for
    /// matching inside a larger buffer.
    pub fn exec_at_with<'r, 'i>(
        &'r self,
        input: &'i str,
        start: usize,
        ctx: MatchContext,
    ) -> Result<Option<Captures<'r, 'i>>, MatchError> {
        assert!(
            input.is_char_boundary(start),
            "start offset must lie on a character boundary"
        );
        let mut slots =
            vec![None; 2 * self.capture_count as usize].into_boxed_slice();
        let mut loops =
            vec![0_usize; self.loop_count as usize].into_boxed_slice();
        let vm = self.vm(input, ctx);
        if vm.try_match(start, &mut slots, &mut loops)? {
            Ok(Some(Captures { re: self, input, slots }))
        } else {
            Ok(None)
        }
    }

    /// Finds the first match in `input`.
    pub fn find<'i>(
        &self,
        input: &'i str,
    ) -> Result<Option<Match<'i>>, MatchError> {
        self.find_at(input, 0)
    }

    /// Finds the first match in `input`, scanning forward from byte
    /// offset `start`. With [`Flag::Sticky`] the attempt is pinned at
    /// `start` instead of scanning.
    ///
    /// # Panics
    ///
    /// Panics if `start` is beyond the end of `input` or not on a
    /// character boundary.
    pub fn find_at<'i>(
        &self,
        input: &'i str,
        start: usize,
    ) -> Result<Option<Match<'i>>, MatchError> {
        Ok(self.captures_at(input, start)?.and_then(|caps| caps.get(0)))
    }

    /// Returns the captures of the first match in `input`.
    pub fn captures<'r, 'i>(
        &'r self,
        input: &'i str,
    ) -> Result<Option<Captures<'r, 'i>>, MatchError> {
        self.captures_at(input, 0)
    }

    /// Returns the captures of the first match in `input`, scanning
    /// forward from byte offset `start`.
    ///
    /// # Panics
    ///
    /// Panics if `start` is beyond the end of `input` or not on a
    /// character boundary.
    pub fn captures_at<'r, 'i>(
        &'r self,
        input: &'i str,
        start: usize,
    ) -> Result<Option<Captures<'r, 'i>>, MatchError> {
        assert!(
            input.is_char_boundary(start),
            "start offset must lie on a character boundary"
        );
        if self.flags.contains(Flag::Sticky) || self.anchored {
            return self.exec_at(input, start);
        }
        let bytes = input.as_bytes();
        let mut at = start;
        loop {
            let candidate = match self.first_byte {
                Some(b) => match memchr::memchr(b, &bytes[at..]) {
                    Some(i) => at + i,
                    None => return Ok(None),
                },
                None => at,
            };
            if let Some(caps) = self.exec_at(input, candidate)? {
                return Ok(Some(caps));
            }
            match input[candidate..].chars().next() {
                Some(c) => at = candidate + c.len_utf8(),
                None => return Ok(None),
            }
        }
    }

    /// Iterates over all non-overlapping matches in `input`. An empty
    /// match advances the scan by one character.
    pub fn find_iter<'r, 'i>(&'r self, input: &'i str) -> Matches<'r, 'i> {
        Matches(self.captures_iter(input))
    }

    /// Iterates over the captures of all non-overlapping matches in
    /// `input`.
    pub fn captures_iter<'r, 'i>(
        &'r self,
        input: &'i str,
    ) -> CaptureMatches<'r, 'i> {
        CaptureMatches { re: self, input, at: 0, done: false }
    }

    fn vm<'r, 'i>(
        &'r self,
        input: &'i str,
        ctx: MatchContext,
    ) -> BacktrackVM<'r, 'i> {
        BacktrackVM {
            code: &self.code,
            flags: self.flags,
            input,
            ctx,
            backtrack_limit: self.backtrack_limit,
            recursion_limit: self.recursion_limit,
            abort: self.abort.as_deref(),
        }
    }

    #[cfg(test)]
    pub(crate) fn code(&self) -> &[u8] {
        &self.code
    }
}

impl fmt::Debug for Regex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Regex")
            .field("code_size", &self.code.len())
            .field("capture_count", &self.capture_count)
            .finish()
    }
}

/// A single match within the input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Match<'i> {
    input: &'i str,
    start: usize,
    end: usize,
}

impl<'i> Match<'i> {
    /// Byte offset where the match begins.
    pub fn start(&self) -> usize {
        self.start
    }

    /// Byte offset just past the end of the match.
    pub fn end(&self) -> usize {
        self.end
    }

    /// The matched byte range.
    pub fn range(&self) -> Range<usize> {
        self.start..self.end
    }

    /// The matched text.
    pub fn as_str(&self) -> &'i str {
        &self.input[self.start..self.end]
    }

    /// Length of the match in bytes.
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    /// True when the match is empty.
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// The capture groups of a successful match. Group 0 spans the whole
/// match; groups that didn't participate in the match are unset.
pub struct Captures<'r, 'i> {
    re: &'r Regex,
    input: &'i str,
    slots: Box<[Option<usize>]>,
}

impl<'r, 'i> Captures<'r, 'i> {
    /// The text captured by group `group`, or `None` if the group is
    /// unset or doesn't exist.
    pub fn get(&self, group: usize) -> Option<Match<'i>> {
        let start = (*self.slots.get(group * 2)?)?;
        let end = (*self.slots.get(group * 2 + 1)?)?;
        Some(Match { input: self.input, start, end })
    }

    /// The text captured by the group named `name`.
    pub fn name(&self, name: &str) -> Option<Match<'i>> {
        self.get(self.re.group_index(name)?)
    }

    /// Number of capture groups, including group 0.
    pub fn group_count(&self) -> usize {
        self.slots.len() / 2
    }

    /// Iterates over all groups, in index order.
    pub fn iter(&self) -> impl Iterator<Item = Option<Match<'i>>> + '_ {
        (0..self.group_count()).map(|group| self.get(group))
    }
}

impl fmt::Debug for Captures<'_, '_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.iter().map(|group| group.map(|m| m.as_str())))
            .finish()
    }
}

/// Iterator over all non-overlapping matches, returned by
/// [`Regex::find_iter`].
pub struct Matches<'r, 'i>(CaptureMatches<'r, 'i>);

impl<'i> Iterator for Matches<'_, 'i> {
    type Item = Result<Match<'i>, MatchError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.0.next()? {
            Ok(caps) => caps.get(0).map(Ok),
            Err(err) => Some(Err(err)),
        }
    }
}

/// Iterator over the captures of all non-overlapping matches, returned
/// by [`Regex::captures_iter`].
pub struct CaptureMatches<'r, 'i> {
    re: &'r Regex,
    input: &'i str,
    at: usize,
    done: bool,
}

impl<'r, 'i> Iterator for CaptureMatches<'r, 'i> {
    type Item = Result<Captures<'r, 'i>, MatchError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.at > self.input.len() {
            return None;
        }
        match self.re.captures_at(self.input, self.at) {
            Ok(Some(caps)) => {
                let next_at = match caps.get(0) {
                    Some(m) if m.is_empty() => {
                        // Empty match: step one character so the scan
                        // makes progress.
                        match self.input[m.end()..].chars().next() {
                            Some(c) => m.end() + c.len_utf8(),
                            None => self.input.len() + 1,
                        }
                    }
                    Some(m) => m.end(),
                    None => {
                        self.done = true;
                        return None;
                    }
                };
                self.at = next_at;
                Some(Ok(caps))
            }
            Ok(None) => {
                self.done = true;
                None
            }
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }
}
