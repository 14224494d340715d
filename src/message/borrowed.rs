//! Zero-copy message views.
//!
//! [`MessageRef`] borrows from the raw line and defers all splitting:
//! tags and parameters are exposed through lazy iterators that allocate
//! nothing. Parsing is tolerant of runs of spaces between tokens.

use nom::{
    bytes::complete::take_till1,
    character::complete::{char, space0},
    combinator::opt,
    sequence::preceded,
    IResult,
};

use crate::command::Command;
use crate::error::MessageParseError;

use super::tags::unescape_tag_value;

/// A parsed view over one IRC line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MessageRef<'a> {
    /// The full line, CR/LF stripped.
    pub raw: &'a str,
    /// Raw tag section without the leading `@`, empty when absent.
    pub tags_raw: &'a str,
    /// Source (prefix) without the leading `:`, when present.
    pub source: Option<&'a str>,
    /// The recognized command, [`Command::Unknown`] otherwise.
    pub command: Command,
    /// The command token exactly as received.
    pub command_word: &'a str,
    /// Everything after the command token, unsplit.
    pub params_raw: &'a str,
}

fn header(input: &str) -> IResult<&str, (Option<&str>, Option<&str>, &str)> {
    let (input, tags) = opt(preceded(char('@'), take_till1(|c| c == ' ')))(input)?;
    let (input, _) = space0(input)?;
    let (input, source) = opt(preceded(char(':'), take_till1(|c| c == ' ')))(input)?;
    let (input, _) = space0(input)?;
    let (input, word) = take_till1(|c| c == ' ')(input)?;
    Ok((input, (tags, source, word)))
}

impl<'a> MessageRef<'a> {
    /// Parse one line. Trailing CR/LF is ignored.
    pub fn parse(s: &'a str) -> Result<MessageRef<'a>, MessageParseError> {
        let trimmed = s.trim_end_matches(['\r', '\n']);
        if trimmed.chars().all(|c| c == ' ') {
            return Err(MessageParseError::EmptyMessage);
        }

        let (params_raw, (tags, source, word)) =
            header(trimmed).map_err(|_| MessageParseError::MissingCommand)?;

        Ok(MessageRef {
            raw: trimmed,
            tags_raw: tags.unwrap_or(""),
            source,
            command: Command::from_token(word),
            command_word: word,
            params_raw,
        })
    }

    /// Lazy parameter iterator.
    ///
    /// A `:`-prefixed token yields the rest of the line as the final
    /// parameter, which may be empty.
    pub fn params(&self) -> Params<'a> {
        Params {
            rest: self.params_raw,
        }
    }

    /// The `n`-th parameter, if present.
    pub fn param(&self, n: usize) -> Option<&'a str> {
        self.params().nth(n)
    }

    /// Lazy tag iterator.
    pub fn tags(&self) -> Tags<'a> {
        Tags {
            rest: self.tags_raw,
        }
    }

    /// Raw (still escaped) value of a tag, `Some("")` for a valueless tag.
    pub fn tag(&self, key: &str) -> Option<&'a str> {
        self.tags().find(|t| t.key == key).map(|t| t.value)
    }

    /// The nick portion of the source, up to `!`.
    pub fn source_nick(&self) -> Option<&'a str> {
        self.source
            .map(|s| s.split_once('!').map_or(s, |(nick, _)| nick))
    }
}

/// Iterator over the parameters of a [`MessageRef`].
#[derive(Clone, Copy, Debug)]
pub struct Params<'a> {
    rest: &'a str,
}

impl<'a> Iterator for Params<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<&'a str> {
        let rest = self.rest.trim_start_matches(' ');
        if rest.is_empty() {
            self.rest = "";
            return None;
        }
        if let Some(trailing) = rest.strip_prefix(':') {
            self.rest = "";
            return Some(trailing);
        }
        match rest.find(' ') {
            Some(i) => {
                self.rest = &rest[i..];
                Some(&rest[..i])
            }
            None => {
                self.rest = "";
                Some(rest)
            }
        }
    }
}

/// One message tag, key and raw wire value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Tag<'a> {
    /// Tag key, including any client-tag `+` prefix.
    pub key: &'a str,
    /// Escaped wire value, empty for valueless tags.
    pub value: &'a str,
}

impl Tag<'_> {
    /// The value with IRCv3 escapes resolved.
    pub fn unescaped_value(&self) -> String {
        unescape_tag_value(self.value)
    }
}

/// Iterator over the tags of a [`MessageRef`].
#[derive(Clone, Copy, Debug)]
pub struct Tags<'a> {
    rest: &'a str,
}

impl<'a> Iterator for Tags<'a> {
    type Item = Tag<'a>;

    fn next(&mut self) -> Option<Tag<'a>> {
        if self.rest.is_empty() {
            return None;
        }
        let item = match self.rest.find(';') {
            Some(i) => {
                let item = &self.rest[..i];
                self.rest = &self.rest[i + 1..];
                item
            }
            None => {
                let item = self.rest;
                self.rest = "";
                item
            }
        };
        let (key, value) = match item.find('=') {
            Some(i) => (&item[..i], &item[i + 1..]),
            None => (item, ""),
        };
        Some(Tag { key, value })
    }
}
