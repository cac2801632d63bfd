/*! Compiles the AST into the bytecode executed by the VM.

The compiler walks the tree once, appending instructions to an
[`InstrSeq`]. Forward jumps are emitted with placeholder offsets and
patched once their target address is known. Repeated sub-patterns are
compiled once and then cloned byte-for-byte; offsets are relative, so a
cloned segment keeps working as long as its jumps stay inside the
segment, which the construction guarantees.
*/

use std::fmt;
use std::io::{Cursor, Seek, SeekFrom, Write};
use std::mem::size_of;

use log::debug;

use crate::ast::{AssertionKind, Ast, ClassSet, LookAroundKind};
use crate::errors::{CompileError, CompileErrorKind};
use crate::instr::{Instr, InstrParser, Offset, CLASS_NEGATED, OPCODE_PREFIX};
use crate::unicode::canonicalize;
use crate::{Flag, Flags};

/// Maximum size of the compiled code, in bytes.
pub(crate) const MAX_CODE_SIZE: usize = 1 << 20;

/// Result of a successful compilation.
pub(crate) struct CompiledProgram {
    pub code: Vec<u8>,
    /// Number of loop counters the VM must allocate per match.
    pub loop_count: u8,
}

pub(crate) fn compile(
    ast: &Ast,
    flags: Flags,
) -> Result<CompiledProgram, CompileError> {
    let mut compiler = Compiler { code: InstrSeq::new(), flags, loop_count: 0 };
    compiler.code.emit_save_start(0);
    compiler.compile_node(ast)?;
    compiler.code.emit_save_end(0);
    compiler.code.emit_instr(Instr::MATCH);
    compiler.check_size()?;
    debug!(
        "compiled pattern: {} bytes of code, {} loop counters",
        compiler.code.location(),
        compiler.loop_count
    );
    Ok(CompiledProgram {
        code: compiler.code.into_inner(),
        loop_count: compiler.loop_count,
    })
}

struct Compiler {
    code: InstrSeq,
    flags: Flags,
    loop_count: u8,
}

impl Compiler {
    fn icase(&self) -> bool {
        self.flags.contains(Flag::IgnoreCase)
    }

    fn unicode(&self) -> bool {
        self.flags.contains(Flag::Unicode)
    }

    fn check_size(&self) -> Result<(), CompileError> {
        if self.code.location() > MAX_CODE_SIZE {
            Err(CompileError::new(CompileErrorKind::TooLarge, 0))
        } else {
            Ok(())
        }
    }

    /// Offset of `target` relative to the instruction at `from`.
    fn offset(from: usize, target: usize) -> Result<Offset, CompileError> {
        Offset::try_from(target as i64 - from as i64)
            .map_err(|_| CompileError::new(CompileErrorKind::TooLarge, 0))
    }

    /// Patches the instruction at `location` to point at `target`.
    fn patch(
        &mut self,
        location: usize,
        target: usize,
    ) -> Result<(), CompileError> {
        let offset = Self::offset(location, target)?;
        self.code.patch_instr(location, offset);
        Ok(())
    }

    fn alloc_loop(&mut self) -> Result<u8, CompileError> {
        if self.loop_count == u8::MAX {
            return Err(CompileError::new(CompileErrorKind::TooLarge, 0));
        }
        let k = self.loop_count;
        self.loop_count += 1;
        Ok(k)
    }

    fn compile_node(&mut self, ast: &Ast) -> Result<(), CompileError> {
        self.check_size()?;
        match ast {
            Ast::Empty => Ok(()),
            Ast::Literal(c) => {
                if self.icase() {
                    self.code.emit_char(canonicalize(*c, self.unicode()));
                } else {
                    self.code.emit_literal(*c);
                }
                Ok(())
            }
            Ast::AnyChar => {
                if self.flags.contains(Flag::DotAll) {
                    self.code.emit_instr(Instr::ANY_CHAR);
                } else {
                    self.code.emit_instr(Instr::ANY_CHAR_NO_NL);
                }
                Ok(())
            }
            Ast::Class(set) => self.compile_class(set),
            Ast::Assertion(kind) => {
                self.code.emit_instr(match kind {
                    AssertionKind::StartLine => Instr::START,
                    AssertionKind::EndLine => Instr::END,
                    AssertionKind::WordBoundary => Instr::WORD_BOUNDARY,
                    AssertionKind::NotWordBoundary => {
                        Instr::WORD_BOUNDARY_NEG
                    }
                });
                Ok(())
            }
            Ast::Backref(n) => {
                self.code.emit_back_ref(*n);
                Ok(())
            }
            Ast::Group { index: None, body } => self.compile_node(body),
            Ast::Group { index: Some(i), body } => {
                self.code.emit_save_start(*i);
                self.compile_node(body)?;
                self.code.emit_save_end(*i);
                Ok(())
            }
            Ast::Concat(items) => {
                for item in items {
                    self.compile_node(item)?;
                }
                Ok(())
            }
            Ast::Alternation(alts) => self.compile_alternation(alts),
            Ast::Repetition { min, max, greedy, body } => {
                self.compile_repetition(*min, *max, *greedy, body)
            }
            Ast::LookAround { kind, body } => {
                self.compile_lookaround(*kind, body)
            }
        }
    }

    fn compile_class(&mut self, set: &ClassSet) -> Result<(), CompileError> {
        let mut set = set.clone();
        if self.icase() {
            set.case_fold(self.unicode());
        }
        if set.fits_bitmap() {
            self.code.emit_class_bitmap(&set);
        } else {
            if set.ranges().len() > u8::MAX as usize {
                return Err(CompileError::new(CompileErrorKind::TooLarge, 0));
            }
            self.code.emit_class_ranges(&set);
        }
        Ok(())
    }

    /// An alternation `e1|e2|e3` compiles to:
    ///
    /// ```text
    ///       split_n l1, l2, l3
    ///   l1: code for e1
    ///       jump l4
    ///   l2: code for e2
    ///       jump l4
    ///   l3: code for e3
    ///   l4:
    /// ```
    fn compile_alternation(
        &mut self,
        alts: &[Ast],
    ) -> Result<(), CompileError> {
        // The parser bounds the number of alternatives at 255.
        let split = self.code.emit_split_n(alts.len() as u8);
        let mut targets = Vec::with_capacity(alts.len());
        let mut jumps = Vec::new();
        for (i, alt) in alts.iter().enumerate() {
            targets.push(self.code.location());
            self.compile_node(alt)?;
            if i + 1 < alts.len() {
                jumps.push(self.code.emit_instr(Instr::JUMP));
            }
        }
        let end = self.code.location();
        for jump in jumps {
            self.patch(jump, end)?;
        }
        let offsets = targets
            .into_iter()
            .map(|t| Self::offset(split, t))
            .collect::<Result<Vec<_>, _>>()?;
        self.code.patch_split_n(split, &offsets);
        Ok(())
    }

    /// Quantifiers compile to combinations of three shapes. `e{m,n}`
    /// is `m` copies of the body followed by `n - m` optional copies:
    ///
    /// ```text
    ///       code for e          (m times)
    ///   l1: split l3            (n - m times, split_a when greedy)
    ///       code for e
    ///   l3:
    /// ```
    ///
    /// `e{m,}` is `m` copies followed by a loop. When the body can
    /// match the empty string the loop closes with `loop_again`, which
    /// fails the iteration if the position didn't advance; this is what
    /// terminates `(a*)*` and discards captures made by an empty
    /// iteration, as ECMAScript requires:
    ///
    /// ```text
    ///   l1: split l2
    ///       mark_loop k         (only when e can match empty)
    ///       code for e
    ///       loop_again k, l1    (jump l1 when e can't match empty)
    ///   l2:
    /// ```
    ///
    /// Each iteration starts with `save_reset` for the capture groups
    /// the body defines, so a group left over from a previous
    /// iteration doesn't leak into the final captures.
    fn compile_repetition(
        &mut self,
        min: u32,
        max: Option<u32>,
        greedy: bool,
        body: &Ast,
    ) -> Result<(), CompileError> {
        if max == Some(0) {
            return Ok(());
        }
        let split_op = if greedy { Instr::SPLIT_A } else { Instr::SPLIT_B };
        let reset = body.capture_span();
        match max {
            None if min == 0 => {
                let l1 = self.code.location();
                let split = self.code.emit_instr(split_op);
                let loop_id = self.emit_loop_guard(body)?;
                self.emit_iteration(reset, body)?;
                self.emit_loop_back(loop_id, l1)?;
                let end = self.code.location();
                self.patch(split, end)
            }
            None => {
                let (seg_start, seg_end) = self.emit_segment(reset, body)?;
                for _ in 1..min {
                    self.emit_clone(seg_start, seg_end)?;
                }
                let l1 = self.code.location();
                let split = self.code.emit_instr(split_op);
                let loop_id = self.emit_loop_guard(body)?;
                self.emit_clone(seg_start, seg_end)?;
                self.emit_loop_back(loop_id, l1)?;
                let end = self.code.location();
                self.patch(split, end)
            }
            Some(n) => {
                let mut seg = None;
                for _ in 0..min {
                    self.emit_segment_or_clone(&mut seg, reset, body)?;
                }
                let mut splits = Vec::with_capacity((n - min) as usize);
                for _ in min..n {
                    splits.push(self.code.emit_instr(split_op));
                    self.emit_segment_or_clone(&mut seg, reset, body)?;
                }
                let end = self.code.location();
                for split in splits {
                    self.patch(split, end)?;
                }
                Ok(())
            }
        }
    }

    /// Compiles one iteration of a quantified body, preceded by the
    /// capture reset when the body defines capture groups.
    fn emit_iteration(
        &mut self,
        reset: Option<(u8, u8)>,
        body: &Ast,
    ) -> Result<(), CompileError> {
        if let Some((from, to)) = reset {
            self.code.emit_save_reset(from, to);
        }
        self.compile_node(body)
    }

    fn emit_segment(
        &mut self,
        reset: Option<(u8, u8)>,
        body: &Ast,
    ) -> Result<(usize, usize), CompileError> {
        let start = self.code.location();
        self.emit_iteration(reset, body)?;
        Ok((start, self.code.location()))
    }

    fn emit_segment_or_clone(
        &mut self,
        seg: &mut Option<(usize, usize)>,
        reset: Option<(u8, u8)>,
        body: &Ast,
    ) -> Result<(), CompileError> {
        match seg {
            Some((start, end)) => self.emit_clone(*start, *end),
            None => {
                *seg = Some(self.emit_segment(reset, body)?);
                Ok(())
            }
        }
    }

    fn emit_clone(
        &mut self,
        start: usize,
        end: usize,
    ) -> Result<(), CompileError> {
        if self.code.location() + (end - start) > MAX_CODE_SIZE {
            return Err(CompileError::new(CompileErrorKind::TooLarge, 0));
        }
        self.code.emit_clone(start, end);
        Ok(())
    }

    fn emit_loop_guard(
        &mut self,
        body: &Ast,
    ) -> Result<Option<u8>, CompileError> {
        if body.width().0 == 0 {
            let k = self.alloc_loop()?;
            self.code.emit_mark_loop(k);
            Ok(Some(k))
        } else {
            Ok(None)
        }
    }

    fn emit_loop_back(
        &mut self,
        loop_id: Option<u8>,
        target: usize,
    ) -> Result<(), CompileError> {
        let location = match loop_id {
            Some(k) => self.code.emit_loop_again(k),
            None => self.code.emit_instr(Instr::JUMP),
        };
        self.patch(location, target)
    }

    /// Lookarounds compile to the lookaround instruction followed by
    /// the body as an inline sub-program terminated by `match`; the
    /// instruction's offset skips over the sub-program.
    fn compile_lookaround(
        &mut self,
        kind: LookAroundKind,
        body: &Ast,
    ) -> Result<(), CompileError> {
        let location = match kind {
            LookAroundKind::Ahead { negated } => {
                self.code.emit_look_ahead(negated)
            }
            LookAroundKind::Behind { negated } => {
                let (min, max) = body.width();
                // The parser rejected unbounded lookbehind.
                let max = max.ok_or_else(|| {
                    CompileError::new(
                        CompileErrorKind::UnboundedLookbehind,
                        0,
                    )
                })?;
                self.code.emit_look_behind(negated, min as u32, max as u32)
            }
        };
        self.compile_node(body)?;
        self.code.emit_instr(Instr::MATCH);
        let end = self.code.location();
        self.patch(location, end)
    }
}

/// A sequence of instructions under construction.
pub(crate) struct InstrSeq {
    seq: Cursor<Vec<u8>>,
}

impl InstrSeq {
    pub fn new() -> Self {
        Self { seq: Cursor::new(Vec::new()) }
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.seq.into_inner()
    }

    /// Location of the next instruction, in bytes from the start.
    pub fn location(&self) -> usize {
        self.seq.position() as usize
    }

    /// Emits an instruction without operands, or with a placeholder
    /// offset for jump and split instructions, returning its location.
    /// Writes to the underlying vector can't fail, hence the unwraps.
    pub fn emit_instr(&mut self, instr: u8) -> usize {
        let location = self.location();
        self.seq.write_all(&[OPCODE_PREFIX, instr]).unwrap();
        match instr {
            Instr::JUMP | Instr::SPLIT_A | Instr::SPLIT_B => {
                self.seq.write_all(&[0; size_of::<Offset>()]).unwrap();
            }
            _ => {}
        }
        location
    }

    pub fn emit_split_n(&mut self, n: u8) -> usize {
        let location = self.location();
        self.seq.write_all(&[OPCODE_PREFIX, Instr::SPLIT_N, n]).unwrap();
        for _ in 0..n {
            self.seq.write_all(&[0; size_of::<Offset>()]).unwrap();
        }
        location
    }

    pub fn emit_save_start(&mut self, group: u8) -> usize {
        let location = self.location();
        self.seq
            .write_all(&[OPCODE_PREFIX, Instr::SAVE_START, group])
            .unwrap();
        location
    }

    pub fn emit_save_end(&mut self, group: u8) -> usize {
        let location = self.location();
        self.seq
            .write_all(&[OPCODE_PREFIX, Instr::SAVE_END, group])
            .unwrap();
        location
    }

    pub fn emit_save_reset(&mut self, from: u8, to: u8) -> usize {
        let location = self.location();
        self.seq
            .write_all(&[OPCODE_PREFIX, Instr::SAVE_RESET, from, to])
            .unwrap();
        location
    }

    pub fn emit_back_ref(&mut self, group: u8) -> usize {
        let location = self.location();
        self.seq
            .write_all(&[OPCODE_PREFIX, Instr::BACK_REF, group])
            .unwrap();
        location
    }

    pub fn emit_mark_loop(&mut self, loop_id: u8) -> usize {
        let location = self.location();
        self.seq
            .write_all(&[OPCODE_PREFIX, Instr::MARK_LOOP, loop_id])
            .unwrap();
        location
    }

    pub fn emit_loop_again(&mut self, loop_id: u8) -> usize {
        let location = self.location();
        self.seq
            .write_all(&[OPCODE_PREFIX, Instr::LOOP_AGAIN, loop_id])
            .unwrap();
        self.seq.write_all(&[0; size_of::<Offset>()]).unwrap();
        location
    }

    pub fn emit_look_ahead(&mut self, negated: bool) -> usize {
        let location = self.location();
        self.seq
            .write_all(&[OPCODE_PREFIX, Instr::LOOK_AHEAD, negated as u8])
            .unwrap();
        self.seq.write_all(&[0; size_of::<Offset>()]).unwrap();
        location
    }

    pub fn emit_look_behind(
        &mut self,
        negated: bool,
        min_width: u32,
        max_width: u32,
    ) -> usize {
        let location = self.location();
        self.seq
            .write_all(&[OPCODE_PREFIX, Instr::LOOK_BEHIND, negated as u8])
            .unwrap();
        self.seq.write_all(&min_width.to_le_bytes()).unwrap();
        self.seq.write_all(&max_width.to_le_bytes()).unwrap();
        self.seq.write_all(&[0; size_of::<Offset>()]).unwrap();
        location
    }

    /// Emits an instruction matching `c` by canonical comparison.
    pub fn emit_char(&mut self, c: char) -> usize {
        let location = self.location();
        self.seq.write_all(&[OPCODE_PREFIX, Instr::CHAR]).unwrap();
        self.seq.write_all(&(c as u32).to_le_bytes()).unwrap();
        location
    }

    /// Emits `c` as inline literal bytes, escaping any byte equal to
    /// the opcode prefix.
    pub fn emit_literal(&mut self, c: char) -> usize {
        let location = self.location();
        let mut buf = [0; 4];
        for &byte in c.encode_utf8(&mut buf).as_bytes() {
            if byte == OPCODE_PREFIX {
                self.seq.write_all(&[byte, byte]).unwrap();
            } else {
                self.seq.write_all(&[byte]).unwrap();
            }
        }
        location
    }

    pub fn emit_class_ranges(&mut self, set: &ClassSet) -> usize {
        let location = self.location();
        let flags = if set.is_negated() { CLASS_NEGATED } else { 0 };
        self.seq
            .write_all(&[
                OPCODE_PREFIX,
                Instr::CLASS_RANGES,
                flags,
                set.ranges().len() as u8,
            ])
            .unwrap();
        for &(lo, hi) in set.ranges() {
            self.seq.write_all(&lo.to_le_bytes()).unwrap();
            self.seq.write_all(&hi.to_le_bytes()).unwrap();
        }
        location
    }

    pub fn emit_class_bitmap(&mut self, set: &ClassSet) -> usize {
        let location = self.location();
        let flags = if set.is_negated() { CLASS_NEGATED } else { 0 };
        let mut bitmap = [0u8; 32];
        for &(lo, hi) in set.ranges() {
            for cp in lo..=hi {
                bitmap[cp as usize / 8] |= 1 << (cp % 8);
            }
        }
        self.seq
            .write_all(&[OPCODE_PREFIX, Instr::CLASS_BITMAP, flags])
            .unwrap();
        self.seq.write_all(&bitmap).unwrap();
        location
    }

    /// Appends a copy of the code between `start` and `end`. Relative
    /// offsets inside the segment remain valid in the copy.
    pub fn emit_clone(&mut self, start: usize, end: usize) {
        self.seq.get_mut().extend_from_within(start..end);
        self.seq
            .seek(SeekFrom::Current((end - start) as i64))
            .unwrap();
    }

    /// Writes `offset` into the offset operand of the jump, split,
    /// loop or lookaround instruction at `location`.
    pub fn patch_instr(&mut self, location: usize, offset: Offset) {
        let code = self.seq.get_mut();
        debug_assert_eq!(code[location], OPCODE_PREFIX);
        let operand = match code[location + 1] {
            Instr::JUMP | Instr::SPLIT_A | Instr::SPLIT_B => location + 2,
            Instr::LOOP_AGAIN | Instr::LOOK_AHEAD => location + 3,
            Instr::LOOK_BEHIND => location + 11,
            _ => unreachable!(),
        };
        code[operand..operand + size_of::<Offset>()]
            .copy_from_slice(&offset.to_le_bytes());
    }

    /// Writes the offsets of a `split_n` instruction at `location`.
    pub fn patch_split_n(&mut self, location: usize, offsets: &[Offset]) {
        let code = self.seq.get_mut();
        debug_assert_eq!(code[location], OPCODE_PREFIX);
        debug_assert_eq!(code[location + 1], Instr::SPLIT_N);
        debug_assert_eq!(code[location + 2] as usize, offsets.len());
        let mut operand = location + 3;
        for offset in offsets {
            code[operand..operand + size_of::<Offset>()]
                .copy_from_slice(&offset.to_le_bytes());
            operand += size_of::<Offset>();
        }
    }
}

/// Disassembles compiled code, resolving jump targets to absolute
/// addresses. Mostly useful in tests and while debugging.
pub(crate) struct CodeListing<'a>(pub &'a [u8]);

impl fmt::Display for CodeListing<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let addr_of = |addr: usize, offset: Offset| {
            (addr as i64 + offset as i64) as usize
        };
        let mut addr = 0;
        while addr < self.0.len() {
            let (instr, size) = InstrParser::decode_instr(&self.0[addr..]);
            write!(f, "{:05x}: {}", addr, instr)?;
            match instr {
                Instr::SplitA(offset)
                | Instr::SplitB(offset)
                | Instr::Jump(offset)
                | Instr::LoopAgain { offset, .. }
                | Instr::LookAhead { offset, .. }
                | Instr::LookBehind { offset, .. } => {
                    write!(f, " {:05x}", addr_of(addr, offset))?;
                }
                Instr::SplitN(split) => {
                    for offset in split.offsets() {
                        write!(f, " {:05x}", addr_of(addr, offset))?;
                    }
                }
                _ => {}
            }
            writeln!(f)?;
            addr += size;
        }
        Ok(())
    }
}

/// If the program can only start matching with one specific byte,
/// returns it, so the scanning loop can skip ahead with `memchr`. Only
/// meaningful for case-sensitive programs, where literals are compiled
/// to inline bytes.
pub(crate) fn required_first_byte(code: &[u8]) -> Option<u8> {
    let mut addr = 0;
    loop {
        match InstrParser::decode_instr(&code[addr..]) {
            (Instr::SaveStart(_), size) => addr += size,
            // ASCII bytes and UTF-8 lead bytes can only occur at
            // character boundaries in the input.
            (Instr::Byte(b), _) if b < 0x80 || b >= 0xc0 => return Some(b),
            _ => return None,
        }
    }
}

/// True when the program starts with a `^` anchor, which pins the
/// match to the scan start unless the pattern is multiline.
pub(crate) fn is_start_anchored(code: &[u8]) -> bool {
    let mut addr = 0;
    loop {
        match InstrParser::decode_instr(&code[addr..]) {
            (Instr::SaveStart(_), size) => addr += size,
            (Instr::Start, _) => return true,
            _ => return false,
        }
    }
}
