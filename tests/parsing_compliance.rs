//! Wire-format compliance: parsing vectors for the message grammar,
//! parameter iterator edge cases, and RFC 1459 case folding.

use comlink_core::message::MessageRef;
use comlink_core::{irc_eq, Command};

fn params(line: &str) -> Vec<String> {
    MessageRef::parse(line)
        .unwrap()
        .params()
        .map(str::to_string)
        .collect()
}

#[test]
fn test_full_line_round_trip() {
    let msg = MessageRef::parse("@k=v :src CMD p1 p2 :trailing").unwrap();
    let tags: Vec<_> = msg.tags().collect();
    assert_eq!(tags.len(), 1);
    assert_eq!(tags[0].key, "k");
    assert_eq!(tags[0].value, "v");
    assert_eq!(msg.source, Some("src"));
    assert_eq!(msg.command_word, "CMD");
    let params: Vec<_> = msg.params().collect();
    assert_eq!(params, vec!["p1", "p2", "trailing"]);
}

#[test]
fn test_repeated_interior_whitespace_is_tolerated() {
    let tight = MessageRef::parse("@k=v :src CMD p1 p2 :trailing").unwrap();
    let loose = MessageRef::parse("@k=v   :src   CMD   p1  p2  :trailing").unwrap();
    assert_eq!(tight.source, loose.source);
    assert_eq!(tight.command_word, loose.command_word);
    let tight_params: Vec<_> = tight.params().collect();
    let loose_params: Vec<_> = loose.params().collect();
    assert_eq!(tight_params, loose_params);
}

#[test]
fn test_param_iterator_bare_colon_yields_empty_final() {
    assert_eq!(params("CAP * LS :"), vec!["*", "LS", ""]);
}

#[test]
fn test_param_iterator_double_colon_keeps_colon() {
    assert_eq!(params("CAP * LS ::)"), vec!["*", "LS", ":)"]);
}

#[test]
fn test_param_iterator_trailing_keeps_spaces() {
    assert_eq!(
        params("CAP * LS :sasl multi-prefix"),
        vec!["*", "LS", "sasl multi-prefix"]
    );
}

#[test]
fn test_case_fold_equality() {
    assert!(irc_eq("aBcDeFgH", "abcdefgh"));
    assert!(irc_eq("nick[a]\\x~", "nick{a}|x^"));
    assert!(!irc_eq("abcdefgh", "abcdefg"));
    assert!(!irc_eq("abc", "abcd"));
}

#[test]
fn test_numeric_and_named_commands_share_one_table() {
    let numeric = MessageRef::parse(":srv 001 me :hi").unwrap();
    assert_eq!(numeric.command, Command::Welcome);
    let named = MessageRef::parse(":a!b@c privmsg #x :hi").unwrap();
    assert_eq!(named.command, Command::Privmsg);
    let unknown = MessageRef::parse(":srv 421 me FOO :Unknown command").unwrap();
    assert_eq!(unknown.command, Command::Unknown);
    assert_eq!(unknown.command_word, "421");
}

#[test]
fn test_valueless_tag_records_empty_value() {
    let msg = MessageRef::parse("@solo;k=v CMD").unwrap();
    assert_eq!(msg.tag("solo"), Some(""));
    assert_eq!(msg.tag("k"), Some("v"));
}

#[test]
fn test_missing_params_read_as_none() {
    let msg = MessageRef::parse(":srv 332").unwrap();
    assert_eq!(msg.param(0), None);
    assert_eq!(msg.param(1), None);
}

#[test]
fn test_source_nick_extraction() {
    let msg = MessageRef::parse(":alice!u@example.org PRIVMSG #c :x").unwrap();
    assert_eq!(msg.source_nick(), Some("alice"));
    let bare = MessageRef::parse(":irc.example.org NOTICE * :x").unwrap();
    assert_eq!(bare.source_nick(), Some("irc.example.org"));
}
