//! Line-level grammar of the response stream.
//!
//! The accumulator hands complete lines here, already stripped of their
//! CRLF. These parsers classify a line and split out the keyword and
//! payload; literal bodies never reach this module, they are consumed by
//! byte count before line parsing resumes.

use std::str::FromStr;

use nom::{
    bytes::complete::{tag, take_while, take_while1},
    character::complete::{char, digit1},
    combinator::{map, map_opt, map_res, opt, recognize, rest},
    sequence::{delimited, pair, preceded, tuple},
    IResult,
};

use crate::types::{ListItem, ResponseCode};

fn is_keyword_char(c: char) -> bool {
    c.is_ascii_uppercase() || c == '-'
}

// Response keyword, e.g. OK / PREAUTH / FETCH. Unknown keywords fail.
fn keyword(i: &str) -> IResult<&str, ResponseCode> {
    map_opt(take_while1(is_keyword_char), ResponseCode::from_keyword)(i)
}

fn number(i: &str) -> IResult<&str, u64> {
    map_res(digit1, u64::from_str)(i)
}

// data = rest of line, absent when the line ends at the keyword
fn trailing_data(i: &str) -> IResult<&str, &str> {
    map(opt(preceded(char(' '), rest)), |data| data.unwrap_or(""))(i)
}

/// `<tag> <TYPE>[ <data>]` — the final line of every command.
pub fn tagged_line<'a>(i: &'a str, expected: &str) -> IResult<&'a str, (ResponseCode, &'a str)> {
    preceded(
        pair(tag(expected), char(' ')),
        pair(keyword, trailing_data),
    )(i)
}

/// `* <TYPE>[ <data>]` — untagged line with a leading keyword.
pub fn untagged_leading(i: &str) -> IResult<&str, (ResponseCode, &str)> {
    preceded(tag("* "), pair(keyword, trailing_data))(i)
}

/// `* <data> <TYPE>` — untagged line whose keyword comes last, e.g.
/// `* 12 EXISTS`. The prefix (usually a count) is kept as the data.
pub fn untagged_trailing(i: &str) -> Option<(ResponseCode, &str)> {
    let rest = i.strip_prefix("* ")?;
    let (data, last) = rest.rsplit_once(' ')?;
    Some((ResponseCode::from_keyword(last)?, data))
}

/// `* <id> FETCH (` — opens a FETCH block. Returns the message sequence
/// number and the text after the opening parenthesis.
pub fn fetch_start(i: &str) -> IResult<&str, (u64, &str)> {
    preceded(tag("* "), pair(number, preceded(tag(" FETCH ("), rest)))(i)
}

fn is_section_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '.' || c == '-'
}

/// A fetch section label as echoed by the server, e.g. `BODY[1]` or
/// `BODY[HEADER.FIELDS (DATE SUBJECT FROM TO)]`.
pub fn fetch_field(i: &str) -> IResult<&str, &str> {
    recognize(pair(
        take_while1(is_section_char),
        opt(delimited(char('['), take_while(|c| c != ']'), char(']'))),
    ))(i)
}

/// `(<attrs>) "<parent>" "<name>"` — the payload of one LIST/LSUB line.
pub fn list_item(i: &str) -> IResult<&str, ListItem> {
    map(
        tuple((
            delimited(
                char::<&str, nom::error::Error<&str>>('('),
                take_while1(|c: char| c != ')'),
                char(')'),
            ),
            char(' '),
            delimited(char('"'), take_while1(|c| c != '"'), char('"')),
            char(' '),
            delimited(char('"'), take_while1(|c| c != '"'), char('"')),
        )),
        |(attrs, _, parent, _, name)| ListItem {
            parent: parent.to_string(),
            name: name.to_string(),
            attrs: split_attrs(attrs),
        },
    )(i)
}

/// First `[TYPE]`, `[TYPE data]` or `[TYPE (data)]` group anywhere in the
/// line, as used by SELECT replies (`[UNSEEN 5]`, `[PERMANENTFLAGS
/// (\Seen)]`, `[READ-WRITE]`).
pub fn bracketed(i: &str) -> Option<(&str, Option<&str>)> {
    let start = i.find('[')?;
    let end = i[start..].find(']')? + start;
    let inner = &i[start + 1..end];
    let (ty, data) = match inner.split_once(' ') {
        Some((ty, data)) => (
            ty,
            Some(data.trim_start_matches('(').trim_end_matches(')')),
        ),
        None => (inner, None),
    };
    if ty.is_empty() || !ty.chars().all(is_keyword_char) {
        return None;
    }
    Some((ty, data))
}

/// First parenthesized group in the line, non-empty.
pub fn parenthesized(i: &str) -> Option<&str> {
    let start = i.find('(')?;
    let end = i[start..].find(')')? + start;
    (end > start + 1).then(|| &i[start + 1..end])
}

/// Splits a flag list on spaces, dropping each flag's leading backslash.
pub fn split_attrs(attrs: &str) -> Vec<String> {
    attrs
        .split(' ')
        .filter(|item| !item.is_empty())
        .map(|item| item.strip_prefix('\\').unwrap_or(item).to_string())
        .collect()
}
