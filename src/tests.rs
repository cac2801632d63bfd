use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use pretty_assertions::assert_eq;

use crate::compiler::CodeListing;
use crate::{CompileError, CompileErrorKind, Flags, MatchContext, MatchError, Regex};

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn re(pattern: &str) -> Regex {
    Regex::compile(pattern, Flags::none()).unwrap()
}

fn re_with(pattern: &str, modifiers: &str) -> Regex {
    Regex::compile(pattern, Flags::from_modifiers(modifiers).unwrap())
        .unwrap()
}

fn listing(pattern: &str) -> String {
    CodeListing(re(pattern).code()).to_string()
}

fn listing_with(pattern: &str, modifiers: &str) -> String {
    CodeListing(re_with(pattern, modifiers).code()).to_string()
}

fn find<'i>(pattern: &str, input: &'i str) -> Option<&'i str> {
    re(pattern).find(input).unwrap().map(|m| m.as_str())
}

fn find_with<'i>(
    pattern: &str,
    modifiers: &str,
    input: &'i str,
) -> Option<&'i str> {
    re_with(pattern, modifiers).find(input).unwrap().map(|m| m.as_str())
}

fn groups<'i>(pattern: &str, input: &'i str) -> Option<Vec<Option<&'i str>>> {
    re(pattern)
        .captures(input)
        .unwrap()
        .map(|caps| caps.iter().map(|m| m.map(|m| m.as_str())).collect())
}

fn compile_err(pattern: &str) -> CompileError {
    Regex::compile(pattern, Flags::none()).unwrap_err()
}

#[test]
fn code_literal() {
    assert_eq!(
        listing("ab"),
        "00000: SAVE_START 0\n\
         00003: LIT 0x61\n\
         00004: LIT 0x62\n\
         00005: SAVE_END 0\n\
         00008: MATCH\n"
    );
}

#[test]
fn code_alternation() {
    assert_eq!(
        listing("a|b"),
        "00000: SAVE_START 0\n\
         00003: SPLIT_N 0000e 00015\n\
         0000e: LIT 0x61\n\
         0000f: JUMP 00016\n\
         00015: LIT 0x62\n\
         00016: SAVE_END 0\n\
         00019: MATCH\n"
    );
}

#[test]
fn code_star() {
    assert_eq!(
        listing("a*"),
        "00000: SAVE_START 0\n\
         00003: SPLIT_A 00010\n\
         00009: LIT 0x61\n\
         0000a: JUMP 00003\n\
         00010: SAVE_END 0\n\
         00013: MATCH\n"
    );
}

#[test]
fn code_nested_star() {
    // The inner loop can match empty, so the outer loop carries a
    // progress guard and resets the inner group at each iteration.
    assert_eq!(
        listing("(a*)*"),
        "00000: SAVE_START 0\n\
         00003: SPLIT_A 0002a\n\
         00009: MARK_LOOP 0\n\
         0000c: SAVE_RESET 1-1\n\
         00010: SAVE_START 1\n\
         00013: SPLIT_A 00020\n\
         00019: LIT 0x61\n\
         0001a: JUMP 00013\n\
         00020: SAVE_END 1\n\
         00023: LOOP_AGAIN 0 00003\n\
         0002a: SAVE_END 0\n\
         0002d: MATCH\n"
    );
}

#[test]
fn code_case_insensitive_char() {
    // With `i` literals become canonical code points instead of bytes.
    assert_eq!(
        listing_with("a", "i"),
        "00000: SAVE_START 0\n\
         00003: CHAR U+0041\n\
         00009: SAVE_END 0\n\
         0000c: MATCH\n"
    );
}

#[test]
fn code_class_ranges() {
    assert_eq!(
        listing("[a-c]"),
        "00000: SAVE_START 0\n\
         00003: CLASS_RANGES [0x61-0x63]\n\
         0000f: SAVE_END 0\n\
         00012: MATCH\n"
    );
}

#[test]
fn literal_scan() {
    init_logger();
    let m = re("ab").find("xxaby").unwrap().unwrap();
    assert_eq!(m.as_str(), "ab");
    assert_eq!(m.range(), 2..4);
    assert_eq!(find("ab", "xxx"), None);
}

#[test]
fn empty_pattern() {
    let m = re("").find("abc").unwrap().unwrap();
    assert_eq!(m.range(), 0..0);
    assert!(m.is_empty());
}

#[test]
fn alternation_prefers_leftmost() {
    assert_eq!(find("a|ab", "ab"), Some("a"));
    assert_eq!(find("ab|a", "ab"), Some("ab"));
}

#[test]
fn greedy_and_lazy() {
    assert_eq!(find("a+", "aaa"), Some("aaa"));
    assert_eq!(find("a+?", "aaa"), Some("a"));
    assert_eq!(find("<(.*)>", "<a><b>"), Some("<a><b>"));
    assert_eq!(find("<(.*?)>", "<a><b>"), Some("<a>"));
}

#[test]
fn bounded_quantifiers() {
    assert_eq!(find("a{2,3}", "aaaa"), Some("aaa"));
    assert_eq!(find("a{2,3}?", "aaaa"), Some("aa"));
    assert_eq!(find("a{2}", "a"), None);
    assert_eq!(find("a{2,}", "aaaa"), Some("aaaa"));
    assert_eq!(find("a{0}b", "b"), Some("b"));
}

#[test]
fn empty_loop_terminates() {
    // The progress guard stops the outer loop after one empty
    // iteration, and the empty iteration doesn't leave a capture.
    assert_eq!(groups("(a*)*", ""), Some(vec![Some(""), None]));
    assert_eq!(groups("(a*)*", "aaa"), Some(vec![Some("aaa"), Some("aaa")]));
}

#[test]
fn loop_resets_captures() {
    assert_eq!(
        groups("(?:(a)|(b))+", "ab"),
        Some(vec![Some("ab"), None, Some("b")])
    );
}

#[test]
fn alternation_captures() {
    assert_eq!(groups("(a)|(b)", "b"), Some(vec![Some("b"), None, Some("b")]));
}

#[test]
fn backreferences() {
    assert_eq!(groups(r"(a+)\1", "aaaa"), Some(vec![Some("aaaa"), Some("aa")]));
    assert_eq!(groups(r"(a+)\1", "aaab"), None);
    // A case-insensitive backreference compares canonically.
    assert_eq!(find_with(r"(a)\1", "i", "aA"), Some("aA"));
}

#[test]
fn backreference_to_unset_group_fails() {
    assert_eq!(find(r"(?:(a)|b)\1", "b"), None);
    assert_eq!(groups(r"(?:(a)|b)\1|b", "b"), Some(vec![Some("b"), None]));
}

#[test]
fn lookahead() {
    assert_eq!(find("a(?=b)", "ab"), Some("a"));
    assert_eq!(find("a(?=b)", "ac"), None);
    assert_eq!(find("a(?!b)", "ab ac"), Some("a"));
    // Captures made inside a positive lookahead survive it.
    assert_eq!(groups("a(?=(b))", "ab"), Some(vec![Some("a"), Some("b")]));
    // A failed negative lookahead leaves no captures behind.
    assert_eq!(groups("a(?!(b))", "ac"), Some(vec![Some("a"), None]));
}

#[test]
fn lookbehind() {
    assert_eq!(find("(?<=a)b", "ab"), Some("b"));
    assert_eq!(find("(?<=a)b", "cb"), None);
    assert_eq!(find("(?<!a)b", "ab"), None);
    assert_eq!(find("(?<!a)b", "cb"), Some("b"));
    // Candidates are tried nearest first, so the shortest width that
    // satisfies the body wins.
    assert_eq!(
        groups("(?<=(a{1,2}))b", "aab"),
        Some(vec![Some("b"), Some("a")])
    );
}

#[test]
fn lookbehind_alternation_priority() {
    // An earlier, narrower alternative is not shadowed by a later one
    // that could match a wider span of the text behind the position.
    assert_eq!(
        groups("(?<=(a|aa))b", "aab"),
        Some(vec![Some("b"), Some("a")])
    );
    // Among alternatives of the same width the body's order decides.
    assert_eq!(
        groups("(?<=(c.)|(.a))d", "cad"),
        Some(vec![Some("d"), Some("ca"), None])
    );
}

#[test]
fn anchors() {
    assert_eq!(find("^a", "ab"), Some("a"));
    assert_eq!(find("^b", "ab"), None);
    assert_eq!(find("b$", "ab"), Some("b"));
    assert_eq!(find("b$", "aba"), None);
    assert_eq!(find_with("^b", "m", "a\nb"), Some("b"));
    assert_eq!(find_with("a$", "m", "a\nb"), Some("a"));
}

#[test]
fn word_boundaries() {
    assert_eq!(find(r"\bfoo\b", "a foo bar"), Some("foo"));
    assert_eq!(find(r"\bfoo\b", "foobar"), None);
    assert_eq!(find(r"\Boo", "foo"), Some("oo"));
}

#[test]
fn any_char() {
    assert_eq!(find("a.b", "a\nb"), None);
    assert_eq!(find_with("a.b", "s", "a\nb"), Some("a\nb"));
    // `.` steps over a whole character, not a byte.
    assert_eq!(find(".", "\u{1F600}"), Some("\u{1F600}"));
    // U+2028 is a line terminator.
    assert_eq!(find(".", "\u{2028}"), None);
    assert_eq!(find_with(".", "s", "\u{2028}"), Some("\u{2028}"));
}

#[test]
fn character_classes() {
    assert_eq!(find("[a-c]+", "xabcy"), Some("abc"));
    assert_eq!(find("[^a-c]+", "abcxyz"), Some("xyz"));
    assert_eq!(find(r"[\d-x]+", "a-1b"), Some("-1"));
    // Enough small ranges to take the bitmap representation.
    assert_eq!(find("[acegikmoq]+", "aceXgik"), Some("ace"));
    assert_eq!(find_with("[a-z]+", "i", "AbC"), Some("AbC"));
}

#[test]
fn case_insensitive_classes() {
    assert_eq!(find_with("[x-z]+", "i", "XyZ"), Some("XyZ"));
    // A lowercase class admits uppercase input through the input's
    // canonical form.
    assert_eq!(find_with("[α-ω]+", "iu", "ΑΒΓδ"), Some("ΑΒΓδ"));
    // An uppercase class admits lowercase input through the folded
    // members added at compile time.
    assert_eq!(find_with("[Α-Ω]+", "iu", "αβγ"), Some("αβγ"));
    assert_eq!(find_with("[Σ]+", "iu", "σς"), Some("σς"));
}

#[test]
fn shorthand_classes() {
    assert_eq!(find(r"\d+", "abc123"), Some("123"));
    assert_eq!(find(r"\D+", "12ab3"), Some("ab"));
    assert_eq!(find(r"\w+", "  foo_1  "), Some("foo_1"));
    assert_eq!(find(r"\s+", "a \t b"), Some(" \t "));
}

#[test]
fn escapes() {
    assert_eq!(find(r"\x41", "A"), Some("A"));
    assert_eq!(find(r"A", "A"), Some("A"));
    assert_eq!(find_with(r"\u{1F600}", "u", "x\u{1F600}"), Some("\u{1F600}"));
    assert_eq!(find(r"a\nb", "a\nb"), Some("a\nb"));
    assert_eq!(find(r"\cJ", "\n"), Some("\n"));
}

#[test]
fn case_insensitive_unicode() {
    // Both capital sigma and final sigma canonicalize to sigma.
    assert_eq!(find_with("Σ", "iu", "σ"), Some("σ"));
    assert_eq!(find_with("Σ", "iu", "ς"), Some("ς"));
    assert_eq!(find_with("ab", "i", "AB"), Some("AB"));
}

#[test]
fn named_groups() {
    let re = re(r"(?<year>\d{4})-(?<month>\d{2})");
    assert_eq!(re.group_index("year"), Some(1));
    assert_eq!(re.group_index("month"), Some(2));
    assert_eq!(re.group_index("day"), None);
    let caps = re.captures("on 2026-08-30").unwrap().unwrap();
    assert_eq!(caps.name("year").unwrap().as_str(), "2026");
    assert_eq!(caps.name("month").unwrap().as_str(), "08");
}

#[test]
fn named_backreference() {
    assert_eq!(find(r"(?<a>x)\k<a>", "xx"), Some("xx"));
    assert_eq!(find(r"(?<a>x)\k<a>", "xy"), None);
}

#[test]
fn sticky_pins_the_start() {
    let re = re_with("b", "y");
    assert_eq!(re.find("ab").unwrap(), None);
    assert!(re.find_at("ab", 1).unwrap().is_some());
}

#[test]
fn exec_at_does_not_scan() {
    let re = re("b");
    assert!(re.exec_at("ab", 0).unwrap().is_none());
    assert!(re.exec_at("ab", 1).unwrap().is_some());
}

#[test]
#[should_panic(expected = "character boundary")]
fn exec_at_rejects_split_characters() {
    let _ = re("a").exec_at("é", 1);
}

#[test]
#[should_panic(expected = "character boundary")]
fn find_at_rejects_out_of_range_offsets() {
    let _ = re("a").find_at("abc", 4);
}

#[test]
fn match_context() {
    let re = re("^a");
    let ctx = MatchContext { not_string_start: true, not_string_end: false };
    assert!(re.exec_at("abc", 0).unwrap().is_some());
    assert!(re.exec_at_with("abc", 0, ctx).unwrap().is_none());
    let re = re_with("^a", "m");
    assert!(re.exec_at_with("abc", 0, ctx).unwrap().is_none());
}

#[test]
fn find_iter_advances_over_empty_matches() {
    let matches: Vec<_> = re("a*")
        .find_iter("aab")
        .map(|m| m.unwrap().as_str())
        .collect();
    assert_eq!(matches, vec!["aa", "", ""]);
}

#[test]
fn find_iter_words() {
    let matches: Vec<_> = re(r"\w+")
        .find_iter("foo bar baz")
        .map(|m| m.unwrap().as_str())
        .collect();
    assert_eq!(matches, vec!["foo", "bar", "baz"]);
}

#[test]
fn backtrack_limit_is_distinct_from_non_match() {
    init_logger();
    let haystack = "a".repeat(16);
    let re = re("(?:a|a)*b");
    // With room to backtrack the result is just a non-match.
    assert_eq!(re.find(&haystack).unwrap(), None);
    assert_eq!(
        re.find("aaab").unwrap().map(|m| m.as_str()),
        Some("aaab")
    );
    // With a tight ceiling the same attempt overflows instead.
    let re = re.backtrack_limit(20);
    assert_eq!(re.find(&haystack), Err(MatchError::StackOverflow));
}

#[test]
fn recursion_limit() {
    let re = re("(?=(?=(?=a)))a");
    assert_eq!(re.find("a").unwrap().map(|m| m.as_str()), Some("a"));
    let re = re.recursion_limit(2);
    assert_eq!(re.find("a"), Err(MatchError::StackOverflow));
}

#[test]
fn abort_flag() {
    let flag = Arc::new(AtomicBool::new(true));
    let re = re("(?:a|a)*b").abort_flag(flag);
    assert_eq!(re.find("aaab"), Err(MatchError::Aborted));
}

#[test]
fn capture_count() {
    assert_eq!(re("abc").capture_count(), 1);
    assert_eq!(re("(a)(b)").capture_count(), 3);
    assert_eq!(re("(?:a)(b)").capture_count(), 2);
}

#[test]
fn compile_errors() {
    assert_eq!(
        compile_err("(a"),
        CompileError { kind: CompileErrorKind::UnterminatedGroup, offset: 0 }
    );
    assert_eq!(
        compile_err("[a"),
        CompileError { kind: CompileErrorKind::UnterminatedClass, offset: 0 }
    );
    assert_eq!(
        compile_err("a)"),
        CompileError { kind: CompileErrorKind::UnmatchedParen, offset: 1 }
    );
    assert_eq!(
        compile_err("*a"),
        CompileError { kind: CompileErrorKind::NothingToRepeat, offset: 0 }
    );
    assert_eq!(
        compile_err("a{2,1}"),
        CompileError { kind: CompileErrorKind::InvalidQuantifier, offset: 1 }
    );
    assert_eq!(
        compile_err("[z-a]"),
        CompileError { kind: CompileErrorKind::InvalidClassRange, offset: 1 }
    );
    assert_eq!(
        compile_err(r"(a)\2"),
        CompileError { kind: CompileErrorKind::InvalidBackreference, offset: 3 }
    );
    assert_eq!(compile_err(r"\q").kind, CompileErrorKind::UnknownEscape);
    assert_eq!(compile_err("(?*)").kind, CompileErrorKind::InvalidGroup);
    assert_eq!(
        compile_err("(?<1a>x)").kind,
        CompileErrorKind::InvalidGroupName
    );
    assert_eq!(
        compile_err("(?<x>a)(?<x>b)").kind,
        CompileErrorKind::DuplicateGroupName("x".to_string())
    );
    assert_eq!(
        compile_err("(?<=a+)b").kind,
        CompileErrorKind::UnboundedLookbehind
    );
}

#[test]
fn compile_limits() {
    let deep = format!("{}a{}", "(".repeat(251), ")".repeat(251));
    assert_eq!(compile_err(&deep).kind, CompileErrorKind::NestingTooDeep);
    assert_eq!(
        compile_err(&"()".repeat(255)).kind,
        CompileErrorKind::TooManyCaptures
    );
    assert_eq!(
        compile_err(&"a|".repeat(256)).kind,
        CompileErrorKind::TooManyAlternatives
    );
    // Quantifier bound above the per-quantifier ceiling.
    assert_eq!(compile_err("a{1025}").kind, CompileErrorKind::TooLarge);
    // Quantifiers within bounds whose expansion exceeds the code size
    // ceiling.
    assert_eq!(
        compile_err("(a{1024}){1024}").kind,
        CompileErrorKind::TooLarge
    );
}

#[test]
fn quantified_assertions_are_rejected() {
    assert_eq!(compile_err("^*").kind, CompileErrorKind::NothingToRepeat);
    assert_eq!(compile_err(r"\b+").kind, CompileErrorKind::NothingToRepeat);
    assert_eq!(compile_err("(?=a)*").kind, CompileErrorKind::NothingToRepeat);
}

#[test]
fn invalid_flags() {
    assert_eq!(
        Flags::from_modifiers("x").unwrap_err(),
        CompileError { kind: CompileErrorKind::InvalidFlag('x'), offset: 0 }
    );
    assert!(Flags::from_modifiers("imsuyg").is_ok());
}

#[test]
fn regex_is_send_and_sync() {
    fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<Regex>();
}
