use thiserror::Error;

/// An error occurred while compiling a pattern.
///
/// `offset` is the byte offset within the pattern where the offending
/// construct begins (the `(` of an unterminated group, the `[` of an
/// unterminated class, the first character of a bad quantifier, and so
/// on). Errors that apply to the pattern as a whole, like [`TooLarge`],
/// use offset 0.
///
/// [`TooLarge`]: CompileErrorKind::TooLarge
#[derive(Error, Debug, PartialEq, Eq, Clone)]
#[error("{kind}, at offset {offset}")]
pub struct CompileError {
    /// Byte offset within the pattern where the error was found.
    pub offset: usize,
    /// What went wrong.
    pub kind: CompileErrorKind,
}

impl CompileError {
    pub(crate) fn new(kind: CompileErrorKind, offset: usize) -> Self {
        Self { offset, kind }
    }
}

/// The reason a pattern failed to compile.
#[derive(Error, Debug, PartialEq, Eq, Clone)]
pub enum CompileErrorKind {
    /// A `(` without a matching `)`.
    #[error("unterminated group")]
    UnterminatedGroup,
    /// A `[` without a matching `]`.
    #[error("unterminated character class")]
    UnterminatedClass,
    /// A `)` without a matching `(`.
    #[error("unmatched parenthesis")]
    UnmatchedParen,
    /// A `{m,n}` quantifier with bad syntax or `m > n`.
    #[error("invalid quantifier")]
    InvalidQuantifier,
    /// A quantifier with nothing to repeat, like `*a` or `a**`.
    #[error("nothing to repeat")]
    NothingToRepeat,
    /// A class range whose end is lower than its start, like `[z-a]`.
    #[error("invalid character class range")]
    InvalidClassRange,
    /// An escape sequence the engine doesn't recognize.
    #[error("unknown escape sequence")]
    UnknownEscape,
    /// A backreference to a group the pattern doesn't define.
    #[error("backreference to undefined group")]
    InvalidBackreference,
    /// A `(?` group with unrecognized syntax.
    #[error("invalid group")]
    InvalidGroup,
    /// A `(?<name>` group with an invalid or missing name.
    #[error("invalid group name")]
    InvalidGroupName,
    /// Two named groups with the same name.
    #[error("duplicate group name `{0}`")]
    DuplicateGroupName(String),
    /// A lookbehind whose body can match arbitrarily long text.
    #[error("lookbehind requires a bounded match length")]
    UnboundedLookbehind,
    /// More capturing groups than the engine supports.
    #[error("too many capturing groups")]
    TooManyCaptures,
    /// More alternatives in a single alternation than the engine supports.
    #[error("too many alternatives")]
    TooManyAlternatives,
    /// Groups nested too deeply.
    #[error("nesting too deep")]
    NestingTooDeep,
    /// The compiled program would exceed the engine's size ceilings.
    #[error("pattern too large")]
    TooLarge,
    /// An unrecognized flag letter.
    #[error("invalid flag `{0}`")]
    InvalidFlag(char),
}

/// An error occurred while executing a compiled pattern.
///
/// Both variants are distinct from a non-match: a non-match is reported
/// as `Ok(None)` by the matching functions.
#[derive(Error, Debug, PartialEq, Eq, Clone, Copy)]
pub enum MatchError {
    /// A resource ceiling was hit: the backtrack stack grew past
    /// [`Regex::backtrack_limit`] or lookarounds nested deeper than
    /// [`Regex::recursion_limit`].
    ///
    /// [`Regex::backtrack_limit`]: crate::Regex::backtrack_limit
    /// [`Regex::recursion_limit`]: crate::Regex::recursion_limit
    #[error("backtracking limit exceeded")]
    StackOverflow,
    /// The abort flag passed to [`Regex::abort_flag`] was raised.
    ///
    /// [`Regex::abort_flag`]: crate::Regex::abort_flag
    #[error("match aborted by the caller")]
    Aborted,
}
