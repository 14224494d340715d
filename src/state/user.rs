//! Users and nick coloring.

/// Arena index into a connection's user table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct UserId(pub usize);

/// Terminal palette entries nicks are hashed into.
const NICK_PALETTE: [u8; 12] = [31, 32, 33, 34, 35, 36, 91, 92, 93, 94, 95, 96];

/// One known user on a connection, shared across its channels.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct User {
    pub nick: String,
    pub away: bool,
    pub real_name: Option<String>,
    /// Display color, stable for a nick within a run.
    pub color: u8,
}

impl User {
    pub fn new(nick: impl Into<String>) -> User {
        let nick = nick.into();
        let color = nick_color(&nick);
        User {
            nick,
            away: false,
            real_name: None,
            color,
        }
    }
}

/// Deterministic palette color for a nick (FNV-1a).
pub fn nick_color(nick: &str) -> u8 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for b in nick.bytes() {
        hash ^= u64::from(b);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    NICK_PALETTE[(hash % NICK_PALETTE.len() as u64) as usize]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_color_is_stable() {
        assert_eq!(nick_color("alice"), nick_color("alice"));
        assert_eq!(User::new("bob").color, nick_color("bob"));
    }

    #[test]
    fn test_color_from_palette() {
        for nick in ["a", "alice", "Zebranky", "[odd]nick"] {
            assert!(NICK_PALETTE.contains(&nick_color(nick)));
        }
    }
}
