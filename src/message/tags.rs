//! IRCv3 message tag value unescaping.

/// Unescape a tag value from wire format.
///
/// Resolves the IRCv3 message-tags escapes (`\:` `\s` `\\` `\r` `\n`).
/// Unknown escapes drop the backslash; a trailing lone backslash is
/// dropped.
pub fn unescape_tag_value(value: &str) -> String {
    let mut unescaped = String::with_capacity(value.len());
    let mut iter = value.chars();
    while let Some(c) = iter.next() {
        let r = if c == '\\' {
            match iter.next() {
                Some(':') => ';',
                Some('s') => ' ',
                Some('\\') => '\\',
                Some('r') => '\r',
                Some('n') => '\n',
                Some(c) => c,
                None => break,
            }
        } else {
            c
        };
        unescaped.push(r);
    }
    unescaped
}
