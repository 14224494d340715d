//! Channels and memberships.

use chrono::{DateTime, Duration, Utc};

use crate::message::Message;

use super::user::UserId;

/// Typing indicators expire after this long without renewal.
const TYPING_WINDOW_SECS: i64 = 6;

/// One (channel, user) membership.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Member {
    pub user: UserId,
    /// Highest-priority membership prefix symbol, if any.
    pub prefix: Option<char>,
    typing_at: Option<DateTime<Utc>>,
}

impl Member {
    pub fn new(user: UserId, prefix: Option<char>) -> Member {
        Member {
            user,
            prefix,
            typing_at: None,
        }
    }

    pub fn set_typing(&mut self, at: Option<DateTime<Utc>>) {
        self.typing_at = at;
    }

    /// Derived: typing is active iff the last indicator is recent.
    pub fn is_typing(&self, now: DateTime<Utc>) -> bool {
        self.typing_at
            .is_some_and(|at| now - at < Duration::seconds(TYPING_WINDOW_SECS))
    }
}

/// One joined channel with its retained scrollback.
#[derive(Clone, Debug)]
pub struct Channel {
    pub name: String,
    pub topic: Option<String>,
    /// Chronological by server time; batch insertions re-sort.
    pub messages: Vec<Message>,
    pub members: Vec<Member>,
    /// Read watermark, server-confirmed via MARKREAD.
    pub last_read: Option<DateTime<Utc>>,
    /// No older history remains on the server.
    pub at_oldest: bool,
    pub who_requested: bool,
    pub names_requested: bool,
    pub history_requested: bool,
}

impl Channel {
    pub fn new(name: impl Into<String>) -> Channel {
        Channel {
            name: name.into(),
            topic: None,
            messages: Vec::new(),
            members: Vec::new(),
            last_read: None,
            at_oldest: false,
            who_requested: false,
            names_requested: false,
            history_requested: false,
        }
    }

    pub fn member(&self, user: UserId) -> Option<&Member> {
        self.members.iter().find(|m| m.user == user)
    }

    pub fn member_mut(&mut self, user: UserId) -> Option<&mut Member> {
        self.members.iter_mut().find(|m| m.user == user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_typing_window() {
        let now = Utc::now();
        let mut m = Member::new(UserId(0), None);
        assert!(!m.is_typing(now));

        m.set_typing(Some(now));
        assert!(m.is_typing(now + Duration::seconds(5)));
        assert!(!m.is_typing(now + Duration::seconds(6)));

        m.set_typing(None);
        assert!(!m.is_typing(now));
    }
}
