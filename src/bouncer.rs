//! `soju.im/bouncer-networks` discovery.
//!
//! `BOUNCER NETWORK <id> <attrs>` announces, updates, or (with `*`
//! attrs) deletes a network behind the bouncer. Discovery is the only
//! place one connection spawns another.

use crate::config::ConnectionConfig;
use crate::message::tags::unescape_tag_value;

/// Parsed attribute list of a `BOUNCER NETWORK` message.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NetworkAttrs {
    /// The `*` form: the network was removed.
    pub deleted: bool,
    pub name: Option<String>,
    pub nickname: Option<String>,
}

/// Parse `key=value;key=value` attrs; bare `*` means deletion.
/// Unrecognized keys are ignored.
pub fn parse_attrs(attrs: &str) -> NetworkAttrs {
    if attrs == "*" {
        return NetworkAttrs {
            deleted: true,
            ..NetworkAttrs::default()
        };
    }
    let mut parsed = NetworkAttrs::default();
    for pair in attrs.split(';') {
        let (key, value) = match pair.find('=') {
            Some(i) => (&pair[..i], &pair[i + 1..]),
            None => (pair, ""),
        };
        // Attribute values reuse message-tag escaping.
        match key {
            "name" => parsed.name = Some(unescape_tag_value(value)),
            "nickname" => parsed.nickname = Some(unescape_tag_value(value)),
            _ => {}
        }
    }
    parsed
}

/// The configuration for a connection serving a discovered network:
/// the parent's settings with the network's own nick applied.
pub fn sibling_config(parent: &ConnectionConfig, attrs: &NetworkAttrs) -> ConnectionConfig {
    let mut config = parent.clone();
    if let Some(nick) = &attrs.nickname {
        config.nick = nick.clone();
    }
    config
}
