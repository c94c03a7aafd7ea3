// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2024 Jonathan Lee
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License version 3
// as published by the Free Software Foundation.
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.
// See the GNU Affero General Public License for more details.
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see https://www.gnu.org/licenses/.

//! Lexical passes over raw query text: keyword tokens, the pattern-scan view and
//! bind-variable rewriting. None of these parse SQL; they only need to know where
//! literals, quoted identifiers and comments begin and end.

use lens_contracts::{PlaceholderStyle, SqlDialect};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Span {
    Code,
    StringLiteral,
    QuotedIdent,
    Comment,
}

/// Splits text into spans. Backslashes are never treated as escapes, so a dialect
/// that does honour them can only make the scanner see more code, not less.
fn spans(text: &str) -> Vec<(Span, &str)> {
    let bytes = text.as_bytes();
    let mut out = Vec::new();
    let mut i = 0;
    let mut code_start = 0;
    while i < bytes.len() {
        let rest = &bytes[i..];
        let (kind, end) = match rest[0] {
            b'\'' => (Span::StringLiteral, close_quoted(bytes, i, b'\'')),
            b'"' => (Span::QuotedIdent, close_quoted(bytes, i, b'"')),
            b'`' => (Span::QuotedIdent, close_quoted(bytes, i, b'`')),
            b'[' => (Span::QuotedIdent, find_from(bytes, i + 1, b"]").map_or(bytes.len(), |p| p + 1)),
            b'-' if rest.starts_with(b"--") => (
                Span::Comment,
                find_from(bytes, i + 2, b"\n").unwrap_or(bytes.len()),
            ),
            b'/' if rest.starts_with(b"/*") => (
                Span::Comment,
                find_from(bytes, i + 2, b"*/").map_or(bytes.len(), |p| p + 2),
            ),
            b'$' if rest.starts_with(b"$$") => (
                Span::StringLiteral,
                find_from(bytes, i + 2, b"$$").map_or(bytes.len(), |p| p + 2),
            ),
            _ => {
                i += 1;
                continue;
            }
        };
        push_code(&mut out, text, code_start, i);
        out.push((kind, &text[i..end]));
        i = end;
        code_start = end;
    }
    push_code(&mut out, text, code_start, bytes.len());
    out
}

fn push_code<'a>(out: &mut Vec<(Span, &'a str)>, text: &'a str, from: usize, to: usize) {
    if to > from {
        out.push((Span::Code, &text[from..to]));
    }
}

/// End (exclusive) of a quoted run starting at `start`; a doubled quote is an escape.
fn close_quoted(bytes: &[u8], start: usize, quote: u8) -> usize {
    let mut i = start + 1;
    while i < bytes.len() {
        if bytes[i] == quote {
            if bytes.get(i + 1) == Some(&quote) {
                i += 2;
                continue;
            }
            return i + 1;
        }
        i += 1;
    }
    bytes.len()
}

fn find_from(bytes: &[u8], from: usize, needle: &[u8]) -> Option<usize> {
    if from >= bytes.len() {
        return None;
    }
    bytes[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|p| p + from)
}

/// Upper-cased word tokens outside literals, quoted identifiers and comments.
pub(crate) fn keyword_tokens(text: &str) -> Vec<String> {
    spans(text)
        .into_iter()
        .filter(|(kind, _)| *kind == Span::Code)
        .flat_map(|(_, code)| {
            code.split(|c: char| !(c.is_alphanumeric() || c == '_'))
                .filter(|w| !w.is_empty())
                .map(str::to_uppercase)
                .collect::<Vec<_>>()
        })
        .collect()
}

/// Text the pattern stage runs against: string-literal contents removed, comments and
/// quoted identifiers kept, whitespace collapsed to single spaces.
pub(crate) fn pattern_view(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for (kind, piece) in spans(text) {
        match kind {
            Span::StringLiteral => out.push_str("''"),
            Span::Code | Span::QuotedIdent | Span::Comment => out.push_str(piece),
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn is_ident_char(c: Option<char>) -> bool {
    c.is_some_and(|c| c.is_alphanumeric() || c == '_' || c == ')' || c == ']')
}

fn digits_at(chars: &[char], from: usize) -> usize {
    chars[from.min(chars.len())..]
        .iter()
        .take_while(|c| c.is_ascii_digit())
        .count()
}

fn render_placeholder(style: PlaceholderStyle, n: usize) -> String {
    match style {
        PlaceholderStyle::QuestionMark => "?".to_string(),
        PlaceholderStyle::DollarNumbered => format!("${n}"),
        PlaceholderStyle::ColonNumbered => format!(":{n}"),
        PlaceholderStyle::AtNumbered => format!("@p{n}"),
    }
}

/// Rewrites every bind variable into the target dialect's style. Explicitly numbered
/// placeholders keep their number; a bare `?` takes its 1-based position. Idempotent.
pub fn sanitize_placeholders(query: &str, target: SqlDialect) -> String {
    let style = target.placeholder_style();
    let mut out = String::with_capacity(query.len() + 8);
    let mut position = 0usize;
    for (kind, piece) in spans(query) {
        if kind != Span::Code {
            out.push_str(piece);
            continue;
        }
        let chars: Vec<char> = piece.chars().collect();
        let mut i = 0;
        while i < chars.len() {
            let c = chars[i];
            let prev = if i == 0 { out.chars().last() } else { Some(chars[i - 1]) };
            let next = chars.get(i + 1).copied();
            let found: Option<(Option<usize>, usize)> = match c {
                '?' if !matches!(next, Some('|') | Some('&')) => Some((None, 1)),
                '$' if !is_ident_char(prev) => {
                    let n = digits_at(&chars, i + 1);
                    (n > 0).then(|| (parse_number(&chars[i + 1..i + 1 + n]), 1 + n))
                }
                ':' if prev != Some(':') && !is_ident_char(prev) && next != Some(':') => {
                    let n = digits_at(&chars, i + 1);
                    (n > 0).then(|| (parse_number(&chars[i + 1..i + 1 + n]), 1 + n))
                }
                '@' if !is_ident_char(prev) => {
                    let skip = usize::from(matches!(next, Some('p') | Some('P')));
                    let n = digits_at(&chars, i + 1 + skip);
                    (n > 0).then(|| {
                        let start = i + 1 + skip;
                        (parse_number(&chars[start..start + n]), 1 + skip + n)
                    })
                }
                _ => None,
            };
            match found {
                Some((explicit, width)) => {
                    position += 1;
                    let number = explicit.unwrap_or(position);
                    out.push_str(&render_placeholder(style, number));
                    i += width;
                }
                None => {
                    out.push(c);
                    i += 1;
                }
            }
        }
    }
    out
}

fn parse_number(digits: &[char]) -> Option<usize> {
    digits.iter().collect::<String>().parse().ok()
}

/// Strips control characters and truncates, for putting query text into logs.
pub fn sanitise_for_logging(input: &str, max_len: usize) -> String {
    input
        .chars()
        .map(|c| match c {
            '\n' | '\r' | '\t' => ' ',
            c if c.is_control() => '?',
            _ => c,
        })
        .take(max_len)
        .collect()
}
