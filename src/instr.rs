/*! Instruction set of the regexp engine.

The compiler produces a sequence of instructions for the backtracking VM
that executes patterns. The instruction format is designed so that
literal characters appear inline as their UTF-8 bytes: each byte that is
not equal to [`OPCODE_PREFIX`] is an instruction matching exactly that
byte. [`OPCODE_PREFIX`] introduces a multi-byte instruction whose second
byte is the opcode; a literal 0xAA byte is represented by the prefix
repeated twice. This keeps the common case (plain text) at one byte per
byte of pattern.

All multi-byte operands are little-endian. Jump offsets are `i32`,
relative to the first byte of the instruction that contains them.
*/

use std::fmt;
use std::mem::size_of;

use bitvec::order::Lsb0;
use bitvec::slice::BitSlice;

/// Marker byte introducing a multi-byte instruction.
pub(crate) const OPCODE_PREFIX: u8 = 0xAA;

/// Type of the relative offsets found in jump and split instructions.
pub(crate) type Offset = i32;

/// A decoded instruction.
#[derive(Debug)]
pub(crate) enum Instr<'a> {
    /// Matches a specific byte and advances one byte.
    Byte(u8),

    /// Accepts the match. Inside a lookaround sub-program it accepts
    /// only if the sub-program's end anchor (if any) is satisfied.
    Match,

    /// Matches any character.
    AnyChar,

    /// Matches any character except line terminators.
    AnyCharExceptNewline,

    /// Matches a specific character, by canonical comparison when the
    /// pattern is case-insensitive.
    Char(char),

    /// Matches a character class given as code point ranges.
    ClassRanges(ClassRanges<'a>),

    /// Matches a character class given as a bitmap over code points
    /// below 0x100.
    ClassBitmap(ClassBitmap<'a>),

    /// Pushes a choice point at the target offset and continues at the
    /// next instruction. Used for greedy repetition.
    SplitA(Offset),

    /// Pushes a choice point at the next instruction and continues at
    /// the target offset. Used for lazy repetition.
    SplitB(Offset),

    /// Alternation. Continues at the first target; the remaining
    /// targets become choice points, earlier targets having priority.
    SplitN(SplitN<'a>),

    /// Relative jump.
    Jump(Offset),

    /// The `^` anchor.
    Start,

    /// The `$` anchor.
    End,

    /// The `\b` assertion.
    WordBoundary,

    /// The `\B` assertion.
    WordBoundaryNeg,

    /// Records the start of a capture group at the current position.
    SaveStart(u8),

    /// Records the end of a capture group at the current position.
    SaveEnd(u8),

    /// Unsets capture groups `from..=to`. Emitted at the start of each
    /// iteration of a quantified group.
    SaveReset { from: u8, to: u8 },

    /// Matches the text captured by a group; fails the current branch
    /// if the group is unset.
    Backref(u8),

    /// Records the current position in loop counter `.0`.
    MarkLoop(u8),

    /// Jumps back if the position advanced since [`Instr::MarkLoop`],
    /// fails the branch otherwise. Guards unbounded loops whose body
    /// can match the empty string.
    LoopAgain { loop_id: u8, offset: Offset },

    /// Runs the sub-program that follows as a lookahead at the current
    /// position; `offset` is the continuation after the sub-program.
    LookAhead { negated: bool, offset: Offset },

    /// Runs the sub-program that follows as a lookbehind: trial forward
    /// matches anchored to end exactly at the current position.
    /// `min_width` and `max_width` bound the body's width in
    /// characters.
    LookBehind { negated: bool, min_width: u32, max_width: u32, offset: Offset },
}

impl<'a> Instr<'a> {
    pub const MATCH: u8 = 0x00;
    pub const SPLIT_A: u8 = 0x01;
    pub const SPLIT_B: u8 = 0x02;
    pub const SPLIT_N: u8 = 0x03;
    pub const JUMP: u8 = 0x04;
    pub const ANY_CHAR: u8 = 0x05;
    pub const ANY_CHAR_NO_NL: u8 = 0x06;
    pub const CHAR: u8 = 0x07;
    pub const CLASS_RANGES: u8 = 0x08;
    pub const CLASS_BITMAP: u8 = 0x09;
    pub const START: u8 = 0x0A;
    pub const END: u8 = 0x0B;
    pub const WORD_BOUNDARY: u8 = 0x0C;
    pub const WORD_BOUNDARY_NEG: u8 = 0x0D;
    pub const SAVE_START: u8 = 0x0E;
    pub const SAVE_END: u8 = 0x0F;
    pub const SAVE_RESET: u8 = 0x10;
    pub const BACK_REF: u8 = 0x11;
    pub const MARK_LOOP: u8 = 0x12;
    pub const LOOP_AGAIN: u8 = 0x13;
    pub const LOOK_AHEAD: u8 = 0x14;
    pub const LOOK_BEHIND: u8 = 0x15;
}

/// Negation bit in the flags byte of class instructions.
pub(crate) const CLASS_NEGATED: u8 = 0x01;

/// Parses the instruction sequence emitted by the compiler.
pub(crate) struct InstrParser;

impl InstrParser {
    /// Decodes the instruction at the start of `code`, returning the
    /// instruction and its size in bytes. `code` must not be empty and
    /// must be well-formed; the compiler is the only producer.
    pub(crate) fn decode_instr(code: &[u8]) -> (Instr<'_>, usize) {
        match code[..] {
            [OPCODE_PREFIX, OPCODE_PREFIX, ..] => (Instr::Byte(OPCODE_PREFIX), 2),
            [OPCODE_PREFIX, Instr::MATCH, ..] => (Instr::Match, 2),
            [OPCODE_PREFIX, Instr::ANY_CHAR, ..] => (Instr::AnyChar, 2),
            [OPCODE_PREFIX, Instr::ANY_CHAR_NO_NL, ..] => {
                (Instr::AnyCharExceptNewline, 2)
            }
            [OPCODE_PREFIX, Instr::START, ..] => (Instr::Start, 2),
            [OPCODE_PREFIX, Instr::END, ..] => (Instr::End, 2),
            [OPCODE_PREFIX, Instr::WORD_BOUNDARY, ..] => {
                (Instr::WordBoundary, 2)
            }
            [OPCODE_PREFIX, Instr::WORD_BOUNDARY_NEG, ..] => {
                (Instr::WordBoundaryNeg, 2)
            }
            [OPCODE_PREFIX, Instr::CHAR, ..] => {
                let cp = decode_u32(&code[2..]);
                let c = char::from_u32(cp).unwrap_or(char::REPLACEMENT_CHARACTER);
                (Instr::Char(c), 2 + size_of::<u32>())
            }
            [OPCODE_PREFIX, Instr::SPLIT_A, ..] => {
                (Instr::SplitA(decode_offset(&code[2..])), 2 + size_of::<Offset>())
            }
            [OPCODE_PREFIX, Instr::SPLIT_B, ..] => {
                (Instr::SplitB(decode_offset(&code[2..])), 2 + size_of::<Offset>())
            }
            [OPCODE_PREFIX, Instr::SPLIT_N, n, ..] => {
                let n = n as usize;
                let offsets = &code[3..3 + n * size_of::<Offset>()];
                (
                    Instr::SplitN(SplitN(offsets)),
                    3 + n * size_of::<Offset>(),
                )
            }
            [OPCODE_PREFIX, Instr::JUMP, ..] => {
                (Instr::Jump(decode_offset(&code[2..])), 2 + size_of::<Offset>())
            }
            [OPCODE_PREFIX, Instr::CLASS_RANGES, flags, n, ..] => {
                let n = n as usize;
                let ranges = &code[4..4 + n * 8];
                (
                    Instr::ClassRanges(ClassRanges {
                        negated: flags & CLASS_NEGATED != 0,
                        ranges,
                    }),
                    4 + n * 8,
                )
            }
            [OPCODE_PREFIX, Instr::CLASS_BITMAP, flags, ..] => {
                let bitmap = &code[3..3 + 32];
                (
                    Instr::ClassBitmap(ClassBitmap {
                        negated: flags & CLASS_NEGATED != 0,
                        bitmap,
                    }),
                    3 + 32,
                )
            }
            [OPCODE_PREFIX, Instr::SAVE_START, n, ..] => (Instr::SaveStart(n), 3),
            [OPCODE_PREFIX, Instr::SAVE_END, n, ..] => (Instr::SaveEnd(n), 3),
            [OPCODE_PREFIX, Instr::SAVE_RESET, from, to, ..] => {
                (Instr::SaveReset { from, to }, 4)
            }
            [OPCODE_PREFIX, Instr::BACK_REF, n, ..] => (Instr::Backref(n), 3),
            [OPCODE_PREFIX, Instr::MARK_LOOP, k, ..] => (Instr::MarkLoop(k), 3),
            [OPCODE_PREFIX, Instr::LOOP_AGAIN, k, ..] => (
                Instr::LoopAgain { loop_id: k, offset: decode_offset(&code[3..]) },
                3 + size_of::<Offset>(),
            ),
            [OPCODE_PREFIX, Instr::LOOK_AHEAD, neg, ..] => (
                Instr::LookAhead {
                    negated: neg != 0,
                    offset: decode_offset(&code[3..]),
                },
                3 + size_of::<Offset>(),
            ),
            [OPCODE_PREFIX, Instr::LOOK_BEHIND, neg, ..] => (
                Instr::LookBehind {
                    negated: neg != 0,
                    min_width: decode_u32(&code[3..]),
                    max_width: decode_u32(&code[7..]),
                    offset: decode_offset(&code[11..]),
                },
                11 + size_of::<Offset>(),
            ),
            [b, ..] => (Instr::Byte(b), 1),
            [] => unreachable!(),
        }
    }
}

fn decode_offset(slice: &[u8]) -> Offset {
    Offset::from_le_bytes(slice[..size_of::<Offset>()].try_into().unwrap())
}

fn decode_u32(slice: &[u8]) -> u32 {
    u32::from_le_bytes(slice[..size_of::<u32>()].try_into().unwrap())
}

/// Offsets of a [`Instr::SplitN`] instruction.
#[derive(Debug)]
pub(crate) struct SplitN<'a>(&'a [u8]);

impl<'a> SplitN<'a> {
    pub(crate) fn offsets(&self) -> SplitOffsets<'a> {
        SplitOffsets(self.0)
    }
}

/// Iterates over the targets of a [`Instr::SplitN`].
pub(crate) struct SplitOffsets<'a>(&'a [u8]);

impl<'a> Iterator for SplitOffsets<'a> {
    type Item = Offset;

    fn next(&mut self) -> Option<Offset> {
        if self.0.len() < size_of::<Offset>() {
            return None;
        }
        let next = decode_offset(self.0);
        self.0 = &self.0[size_of::<Offset>()..];
        Some(next)
    }
}

/// Body of a [`Instr::ClassRanges`] instruction.
#[derive(Debug)]
pub(crate) struct ClassRanges<'a> {
    negated: bool,
    ranges: &'a [u8],
}

impl<'a> ClassRanges<'a> {
    pub(crate) fn negated(&self) -> bool {
        self.negated
    }

    /// Iterates over the inclusive code point ranges in the class.
    pub(crate) fn ranges(&self) -> Ranges<'a> {
        Ranges(self.ranges)
    }

    /// Raw membership, ignoring the negation flag.
    pub(crate) fn contains(&self, cp: u32) -> bool {
        self.ranges().any(|(lo, hi)| (lo..=hi).contains(&cp))
    }
}

/// Iterates over the code point ranges in a [`ClassRanges`].
pub(crate) struct Ranges<'a>(&'a [u8]);

impl<'a> Iterator for Ranges<'a> {
    type Item = (u32, u32);

    fn next(&mut self) -> Option<Self::Item> {
        if self.0.len() < 8 {
            return None;
        }
        let lo = decode_u32(self.0);
        let hi = decode_u32(&self.0[4..]);
        self.0 = &self.0[8..];
        Some((lo, hi))
    }
}

/// Body of a [`Instr::ClassBitmap`] instruction.
#[derive(Debug)]
pub(crate) struct ClassBitmap<'a> {
    negated: bool,
    bitmap: &'a [u8],
}

impl<'a> ClassBitmap<'a> {
    pub(crate) fn negated(&self) -> bool {
        self.negated
    }

    /// Raw membership, ignoring the negation flag. Code points at or
    /// above 0x100 are never members.
    pub(crate) fn contains(&self, cp: u32) -> bool {
        if cp >= 0x100 {
            return false;
        }
        self.bits().get(cp as usize).is_some_and(|bit| *bit)
    }

    /// Iterates over the code points in the bitmap.
    pub(crate) fn code_points(&self) -> impl Iterator<Item = u32> + 'a {
        self.bits().iter_ones().map(|cp| cp as u32)
    }

    fn bits(&self) -> &'a BitSlice<u8, Lsb0> {
        BitSlice::<u8, Lsb0>::from_slice(self.bitmap)
    }
}

impl fmt::Display for Instr<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instr::Byte(b) => write!(f, "LIT {:#04x}", b),
            Instr::Match => write!(f, "MATCH"),
            Instr::AnyChar => write!(f, "ANY_CHAR"),
            Instr::AnyCharExceptNewline => write!(f, "ANY_CHAR_NO_NL"),
            Instr::Char(c) => write!(f, "CHAR U+{:04X}", *c as u32),
            Instr::Start => write!(f, "START"),
            Instr::End => write!(f, "END"),
            Instr::WordBoundary => write!(f, "WORD_BOUNDARY"),
            Instr::WordBoundaryNeg => write!(f, "WORD_BOUNDARY_NEG"),
            Instr::SaveStart(n) => write!(f, "SAVE_START {}", n),
            Instr::SaveEnd(n) => write!(f, "SAVE_END {}", n),
            Instr::SaveReset { from, to } => {
                write!(f, "SAVE_RESET {}-{}", from, to)
            }
            Instr::Backref(n) => write!(f, "BACK_REF {}", n),
            Instr::MarkLoop(k) => write!(f, "MARK_LOOP {}", k),
            Instr::ClassRanges(class) => {
                write!(f, "CLASS_RANGES")?;
                if class.negated() {
                    write!(f, " ^")?;
                }
                for (lo, hi) in class.ranges() {
                    write!(f, " [{:#04x}-{:#04x}]", lo, hi)?;
                }
                Ok(())
            }
            Instr::ClassBitmap(class) => {
                write!(f, "CLASS_BITMAP")?;
                if class.negated() {
                    write!(f, " ^")?;
                }
                for cp in class.code_points() {
                    write!(f, " {:#04x}", cp)?;
                }
                Ok(())
            }
            // Split, jump and lookaround targets are printed by the
            // sequence-level Display impl, which knows the instruction
            // address and can resolve them.
            Instr::SplitA(_) => write!(f, "SPLIT_A"),
            Instr::SplitB(_) => write!(f, "SPLIT_B"),
            Instr::SplitN(_) => write!(f, "SPLIT_N"),
            Instr::Jump(_) => write!(f, "JUMP"),
            Instr::LoopAgain { loop_id, .. } => {
                write!(f, "LOOP_AGAIN {}", loop_id)
            }
            Instr::LookAhead { negated, .. } => {
                write!(f, "LOOK_AHEAD{}", if *negated { "_NEG" } else { "" })
            }
            Instr::LookBehind { negated, min_width, max_width, .. } => write!(
                f,
                "LOOK_BEHIND{} {}-{}",
                if *negated { "_NEG" } else { "" },
                min_width,
                max_width
            ),
        }
    }
}
