//! RFC 1459 case-mapping.
//!
//! IRC compares channel names and nicks with a case mapping that treats
//! `[]\~` as the uppercase forms of `{}|^`. Two names refer to the same
//! channel iff they fold equal under this mapping.

use std::cmp::Ordering;

/// Fold one byte to its RFC 1459 lowercase form.
#[inline]
pub fn fold_byte(b: u8) -> u8 {
    match b {
        b'A'..=b'Z' => b | 0x20,
        b'[' => b'{',
        b']' => b'}',
        b'\\' => b'|',
        b'~' => b'^',
        _ => b,
    }
}

/// Convert a string to IRC lowercase.
pub fn irc_to_lower(s: &str) -> String {
    // Folding only remaps ASCII bytes, so the result stays valid UTF-8.
    let bytes: Vec<u8> = s.bytes().map(fold_byte).collect();
    String::from_utf8(bytes).unwrap_or_else(|e| String::from_utf8_lossy(e.as_bytes()).into_owned())
}

/// Compare two strings for equality under RFC 1459 folding.
///
/// Strings of different lengths are never equal.
pub fn irc_eq(a: &str, b: &str) -> bool {
    a.len() == b.len()
        && a.bytes()
            .zip(b.bytes())
            .all(|(x, y)| fold_byte(x) == fold_byte(y))
}

/// Total order under RFC 1459 folding, used for sorted channel insertion
/// and member list ordering.
pub fn irc_cmp(a: &str, b: &str) -> Ordering {
    for (x, y) in a.bytes().zip(b.bytes()) {
        match fold_byte(x).cmp(&fold_byte(y)) {
            Ordering::Equal => {}
            other => return other,
        }
    }
    a.len().cmp(&b.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fold_special_chars() {
        assert_eq!(irc_to_lower("[]\\~"), "{}|^");
        assert_eq!(irc_to_lower("Nick[One]"), "nick{one}");
    }

    #[test]
    fn test_eq_ascii() {
        assert!(irc_eq("aBcDeFgH", "abcdefgh"));
        assert!(irc_eq("#Channel", "#channel"));
    }

    #[test]
    fn test_eq_rfc1459_brackets() {
        assert!(irc_eq("foo[1]", "foo{1}"));
        assert!(irc_eq("a\\b~", "a|b^"));
    }

    #[test]
    fn test_differing_lengths_never_equal() {
        assert!(!irc_eq("abc", "abcd"));
        assert!(!irc_eq("", "a"));
    }

    #[test]
    fn test_cmp_is_fold_insensitive() {
        assert_eq!(irc_cmp("#ALPHA", "#alpha"), Ordering::Equal);
        assert_eq!(irc_cmp("#alpha", "#beta"), Ordering::Less);
        assert_eq!(irc_cmp("#beta", "#alpha"), Ordering::Greater);
        assert_eq!(irc_cmp("#chan", "#chann"), Ordering::Less);
    }
}
