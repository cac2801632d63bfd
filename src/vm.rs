/*! A backtracking VM that executes the code produced by the compiler.

The VM tries the highest-priority path through the program first,
recording a choice point on an explicit stack every time a split
instruction offers an alternative. When an instruction fails, the most
recent choice point is popped and execution resumes there; when the
stack is empty the attempt fails. Each stack record snapshots the
capture slots and loop counters, so popping restores exactly the state
that existed when the choice point was pushed.

Lookarounds run as recursive sub-executions of the same VM over the
sub-program embedded in the code. Lookbehind has no backwards-matching
mode; instead the body is tried forwards from candidate start positions
(nearest first), accepting only when it ends exactly at the current
position.
*/

use std::sync::atomic::{AtomicBool, Ordering};

use log::debug;

use crate::errors::MatchError;
use crate::instr::{Instr, InstrParser, Offset};
use crate::unicode::{canonicalize, is_line_terminator, is_word_char};
use crate::{Flag, Flags};

/// Default ceiling on the number of choice points held at once.
pub const DEFAULT_BACKTRACK_LIMIT: usize = 262_144;

/// Default ceiling on lookaround nesting depth during a match.
pub const DEFAULT_RECURSION_LIMIT: usize = 64;

/// Tells the matcher that the text it sees is part of a larger buffer,
/// so that `^` and `$` don't treat the text's edges as the real start
/// and end of the subject.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MatchContext {
    /// The text does not begin at the true start of the subject.
    pub not_string_start: bool,
    /// The text does not extend to the true end of the subject.
    pub not_string_end: bool,
}

/// A choice point. `captures` and `loops` are full snapshots, restored
/// verbatim when the record is popped.
struct BtState {
    pc: usize,
    pos: usize,
    captures: Box<[Option<usize>]>,
    loops: Box<[usize]>,
}

pub(crate) struct BacktrackVM<'r, 'i> {
    pub(crate) code: &'r [u8],
    pub(crate) flags: Flags,
    pub(crate) input: &'i str,
    pub(crate) ctx: MatchContext,
    pub(crate) backtrack_limit: usize,
    pub(crate) recursion_limit: usize,
    pub(crate) abort: Option<&'r AtomicBool>,
}

impl<'r, 'i> BacktrackVM<'r, 'i> {
    /// Attempts a match starting exactly at `start`, which must lie on
    /// a character boundary. On success the capture slots contain the
    /// group boundaries; on failure (`Ok(false)`) their content is
    /// unspecified.
    pub(crate) fn try_match(
        &self,
        start: usize,
        captures: &mut [Option<usize>],
        loops: &mut [usize],
    ) -> Result<bool, MatchError> {
        Ok(self.run(0, start, None, 0, captures, loops)?.is_some())
    }

    /// Runs the (sub-)program at `start_pc` from position `start_pos`.
    /// Returns the end position of the match, if any. `anchor_end`
    /// makes the accept instruction succeed only at that exact
    /// position, which is how lookbehind trials are evaluated.
    fn run(
        &self,
        start_pc: usize,
        start_pos: usize,
        anchor_end: Option<usize>,
        depth: usize,
        captures: &mut [Option<usize>],
        loops: &mut [usize],
    ) -> Result<Option<usize>, MatchError> {
        if depth > self.recursion_limit {
            debug!("lookaround recursion limit reached");
            return Err(MatchError::StackOverflow);
        }
        let mut pc = start_pc;
        let mut pos = start_pos;
        let mut stack: Vec<BtState> = Vec::new();
        loop {
            let (instr, size) = InstrParser::decode_instr(&self.code[pc..]);
            let mut failed = false;
            match instr {
                Instr::Byte(b) => {
                    if self.input.as_bytes().get(pos) == Some(&b) {
                        pos += 1;
                        pc += size;
                    } else {
                        failed = true;
                    }
                }
                Instr::Match => {
                    if anchor_end.map_or(true, |end| end == pos) {
                        return Ok(Some(pos));
                    }
                    failed = true;
                }
                Instr::AnyChar => match self.char_at(pos) {
                    Some(c) => {
                        pos += c.len_utf8();
                        pc += size;
                    }
                    None => failed = true,
                },
                Instr::AnyCharExceptNewline => match self.char_at(pos) {
                    Some(c) if !is_line_terminator(c) => {
                        pos += c.len_utf8();
                        pc += size;
                    }
                    _ => failed = true,
                },
                Instr::Char(target) => match self.char_at(pos) {
                    Some(c) if self.char_eq(c, target) => {
                        pos += c.len_utf8();
                        pc += size;
                    }
                    _ => failed = true,
                },
                Instr::ClassRanges(ref class) => match self.char_at(pos) {
                    Some(c)
                        if self.class_matches(
                            |cp| class.contains(cp),
                            class.negated(),
                            c,
                        ) =>
                    {
                        pos += c.len_utf8();
                        pc += size;
                    }
                    _ => failed = true,
                },
                Instr::ClassBitmap(ref class) => match self.char_at(pos) {
                    Some(c)
                        if self.class_matches(
                            |cp| class.contains(cp),
                            class.negated(),
                            c,
                        ) =>
                    {
                        pos += c.len_utf8();
                        pc += size;
                    }
                    _ => failed = true,
                },
                Instr::SplitA(offset) => {
                    self.push(
                        &mut stack,
                        target(pc, offset),
                        pos,
                        captures,
                        loops,
                    )?;
                    pc += size;
                }
                Instr::SplitB(offset) => {
                    self.push(&mut stack, pc + size, pos, captures, loops)?;
                    pc = target(pc, offset);
                }
                Instr::SplitN(ref split) => {
                    let offsets: Vec<_> = split.offsets().collect();
                    for &offset in offsets[1..].iter().rev() {
                        self.push(
                            &mut stack,
                            target(pc, offset),
                            pos,
                            captures,
                            loops,
                        )?;
                    }
                    pc = target(pc, offsets[0]);
                }
                Instr::Jump(offset) => pc = target(pc, offset),
                Instr::Start => {
                    if self.at_line_start(pos) {
                        pc += size;
                    } else {
                        failed = true;
                    }
                }
                Instr::End => {
                    if self.at_line_end(pos) {
                        pc += size;
                    } else {
                        failed = true;
                    }
                }
                Instr::WordBoundary => {
                    if self.at_word_boundary(pos) {
                        pc += size;
                    } else {
                        failed = true;
                    }
                }
                Instr::WordBoundaryNeg => {
                    if self.at_word_boundary(pos) {
                        failed = true;
                    } else {
                        pc += size;
                    }
                }
                Instr::SaveStart(n) => {
                    captures[2 * n as usize] = Some(pos);
                    pc += size;
                }
                Instr::SaveEnd(n) => {
                    captures[2 * n as usize + 1] = Some(pos);
                    pc += size;
                }
                Instr::SaveReset { from, to } => {
                    for i in from..=to {
                        captures[2 * i as usize] = None;
                        captures[2 * i as usize + 1] = None;
                    }
                    pc += size;
                }
                Instr::Backref(n) => {
                    match (
                        captures[2 * n as usize],
                        captures[2 * n as usize + 1],
                    ) {
                        (Some(start), Some(end)) => {
                            match self.backref_len(pos, start, end) {
                                Some(len) => {
                                    pos += len;
                                    pc += size;
                                }
                                None => failed = true,
                            }
                        }
                        // A backreference to an unset group fails the
                        // branch.
                        _ => failed = true,
                    }
                }
                Instr::MarkLoop(k) => {
                    loops[k as usize] = pos;
                    pc += size;
                }
                Instr::LoopAgain { loop_id, offset } => {
                    if pos > loops[loop_id as usize] {
                        pc = target(pc, offset);
                    } else {
                        failed = true;
                    }
                }
                Instr::LookAhead { negated, offset } => {
                    let body = pc + size;
                    let cont = target(pc, offset);
                    if negated {
                        // A negative lookaround never contributes
                        // captures, whatever its outcome.
                        let saved_caps = captures.to_vec();
                        let saved_loops = loops.to_vec();
                        let matched = self
                            .run(body, pos, None, depth + 1, captures, loops)?
                            .is_some();
                        captures.copy_from_slice(&saved_caps);
                        loops.copy_from_slice(&saved_loops);
                        if matched {
                            failed = true;
                        } else {
                            pc = cont;
                        }
                    } else if self
                        .run(body, pos, None, depth + 1, captures, loops)?
                        .is_some()
                    {
                        pc = cont;
                    } else {
                        failed = true;
                    }
                }
                Instr::LookBehind { negated, min_width, max_width, offset } => {
                    let body = pc + size;
                    let cont = target(pc, offset);
                    let matched = self.run_lookbehind(
                        body, pos, min_width, max_width, negated, depth,
                        captures, loops,
                    )?;
                    if matched != negated {
                        pc = cont;
                    } else {
                        failed = true;
                    }
                }
            }
            if failed {
                match stack.pop() {
                    Some(state) => {
                        pc = state.pc;
                        pos = state.pos;
                        captures.copy_from_slice(&state.captures);
                        loops.copy_from_slice(&state.loops);
                    }
                    None => return Ok(None),
                }
            }
        }
    }

    /// Tries the lookbehind body forwards from every candidate start
    /// position, nearest candidate first, anchored to end at `pos`.
    /// The narrowest width that satisfies the body wins; within one
    /// candidate the body's own priority order applies. On success the
    /// captures made by the winning trial are kept; otherwise the
    /// entry state is restored.
    #[allow(clippy::too_many_arguments)]
    fn run_lookbehind(
        &self,
        body: usize,
        pos: usize,
        min_width: u32,
        max_width: u32,
        negated: bool,
        depth: usize,
        captures: &mut [Option<usize>],
        loops: &mut [usize],
    ) -> Result<bool, MatchError> {
        let Some(highest) = pos.checked_sub(min_width as usize) else {
            return Ok(false);
        };
        let saved_caps = captures.to_vec();
        let saved_loops = loops.to_vec();
        // Widths count characters; the byte window over-approximates.
        let lowest = pos.saturating_sub(max_width as usize * 4);
        for start in (lowest..=highest).rev() {
            if !self.input.is_char_boundary(start) {
                continue;
            }
            captures.copy_from_slice(&saved_caps);
            loops.copy_from_slice(&saved_loops);
            if self
                .run(body, start, Some(pos), depth + 1, captures, loops)?
                .is_some()
            {
                if negated {
                    captures.copy_from_slice(&saved_caps);
                    loops.copy_from_slice(&saved_loops);
                }
                return Ok(true);
            }
        }
        captures.copy_from_slice(&saved_caps);
        loops.copy_from_slice(&saved_loops);
        Ok(false)
    }

    fn push(
        &self,
        stack: &mut Vec<BtState>,
        pc: usize,
        pos: usize,
        captures: &[Option<usize>],
        loops: &[usize],
    ) -> Result<(), MatchError> {
        if let Some(abort) = self.abort {
            if abort.load(Ordering::Relaxed) {
                return Err(MatchError::Aborted);
            }
        }
        if stack.len() >= self.backtrack_limit {
            debug!(
                "backtrack stack limit of {} reached",
                self.backtrack_limit
            );
            return Err(MatchError::StackOverflow);
        }
        stack.push(BtState {
            pc,
            pos,
            captures: captures.to_vec().into_boxed_slice(),
            loops: loops.to_vec().into_boxed_slice(),
        });
        Ok(())
    }

    fn icase(&self) -> bool {
        self.flags.contains(Flag::IgnoreCase)
    }

    fn unicode(&self) -> bool {
        self.flags.contains(Flag::Unicode)
    }

    fn char_at(&self, pos: usize) -> Option<char> {
        self.input[pos..].chars().next()
    }

    fn char_eq(&self, input_char: char, target: char) -> bool {
        if self.icase() {
            canonicalize(input_char, self.unicode()) == target
        } else {
            input_char == target
        }
    }

    fn class_matches(
        &self,
        contains: impl Fn(u32) -> bool,
        negated: bool,
        c: char,
    ) -> bool {
        let mut inside = contains(c as u32);
        if !inside && self.icase() {
            inside = contains(canonicalize(c, self.unicode()) as u32);
        }
        inside != negated
    }

    /// Length in bytes of the text at `pos` matching the captured text
    /// `start..end`, or `None` if it doesn't match.
    fn backref_len(
        &self,
        pos: usize,
        start: usize,
        end: usize,
    ) -> Option<usize> {
        if !self.icase() {
            let needle = &self.input.as_bytes()[start..end];
            let hay = self.input.as_bytes();
            if hay.len() - pos >= needle.len()
                && &hay[pos..pos + needle.len()] == needle
            {
                return Some(needle.len());
            }
            return None;
        }
        // Case-insensitive comparison is character-wise; the matched
        // text may differ in byte length from the captured text.
        let unicode = self.unicode();
        let mut len = 0;
        let mut hay = self.input[pos..].chars();
        for nc in self.input[start..end].chars() {
            let hc = hay.next()?;
            if canonicalize(hc, unicode) != canonicalize(nc, unicode) {
                return None;
            }
            len += hc.len_utf8();
        }
        Some(len)
    }

    fn at_line_start(&self, pos: usize) -> bool {
        if pos == 0 {
            !self.ctx.not_string_start
        } else {
            self.flags.contains(Flag::Multiline)
                && self.input[..pos]
                    .chars()
                    .next_back()
                    .is_some_and(is_line_terminator)
        }
    }

    fn at_line_end(&self, pos: usize) -> bool {
        if pos == self.input.len() {
            !self.ctx.not_string_end
        } else {
            self.flags.contains(Flag::Multiline)
                && self.char_at(pos).is_some_and(is_line_terminator)
        }
    }

    fn at_word_boundary(&self, pos: usize) -> bool {
        let before = self.input[..pos]
            .chars()
            .next_back()
            .is_some_and(is_word_char);
        let after = self.char_at(pos).is_some_and(is_word_char);
        before != after
    }
}

fn target(pc: usize, offset: Offset) -> usize {
    (pc as i64 + offset as i64) as usize
}
