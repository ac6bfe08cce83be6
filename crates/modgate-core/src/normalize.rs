//! Text normalization for matching
//!
//! Canonicalizes text so that matching is robust to case, diacritics, and
//! common "leet" substitutions. Whitespace and punctuation pass through
//! unchanged, which keeps match positions meaningful.

use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Normalize text for matching.
///
/// Applied in order:
/// 1. NFD decomposition, strip combining marks, recompose to NFC
/// 2. Unicode lowercase
/// 3. Fixed leet substitutions (`0→o 1→i 3→e 4→a 5→s 7→t 8→b @→a $→s`)
///
/// The result is idempotent: `normalize(normalize(t)) == normalize(t)`.
pub fn normalize(text: &str) -> String {
    let recomposed: String = text.nfd().filter(|&c| !is_combining_mark(c)).nfc().collect();

    let mut out = String::with_capacity(recomposed.len());
    for c in recomposed.chars() {
        for lower in c.to_lowercase() {
            out.push(leet_fold(lower));
        }
    }
    out
}

fn leet_fold(c: char) -> char {
    match c {
        '0' => 'o',
        '1' => 'i',
        '3' => 'e',
        '4' => 'a',
        '5' => 's',
        '7' => 't',
        '8' => 'b',
        '@' => 'a',
        '$' => 's',
        other => other,
    }
}

/// Split text into word tokens, preserving order.
///
/// A word character is an ASCII letter/digit/underscore or any code point
/// at or above U+0080; every other character separates tokens.
pub fn tokenize(text: &str) -> Vec<&str> {
    text.split(|c: char| !is_word_char(c))
        .filter(|t| !t.is_empty())
        .collect()
}

fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c as u32 >= 0x80
}
