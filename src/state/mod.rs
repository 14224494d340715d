//! The Directory: a connection's channels, users and memberships.
//!
//! Arena-style ownership: the Directory owns every `User` and `Channel`;
//! memberships refer to users by [`UserId`] index. Only the engine task
//! touches a Directory, so nothing here is synchronized.

mod channel;
mod user;

pub use channel::{Channel, Member};
pub use user::{nick_color, User, UserId};

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::casemap::{irc_cmp, irc_eq};
use crate::isupport::Features;
use crate::message::Message;

/// Per-connection protocol state.
#[derive(Clone, Debug, Default)]
pub struct Directory {
    users: Vec<User>,
    /// Exact-nick index; channel names fold, nicks do not.
    by_nick: HashMap<String, UserId>,
    /// Sorted case-insensitively by name.
    channels: Vec<Channel>,
    /// Messages not attributable to a channel, including synthetic
    /// local diagnostics.
    pub server_log: Vec<Message>,
}

impl Directory {
    pub fn new() -> Directory {
        Directory::default()
    }

    pub fn user(&self, id: UserId) -> &User {
        &self.users[id.0]
    }

    pub fn user_mut(&mut self, id: UserId) -> &mut User {
        &mut self.users[id.0]
    }

    pub fn find_user(&self, nick: &str) -> Option<UserId> {
        self.by_nick.get(nick).copied()
    }

    /// Look up or lazily create a user; color is assigned on first
    /// sight and never changes within a run.
    pub fn get_or_create_user(&mut self, nick: &str) -> UserId {
        if let Some(id) = self.by_nick.get(nick) {
            return *id;
        }
        let id = UserId(self.users.len());
        self.users.push(User::new(nick));
        self.by_nick.insert(nick.to_string(), id);
        id
    }

    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    pub fn channel(&self, index: usize) -> &Channel {
        &self.channels[index]
    }

    pub fn channel_mut(&mut self, index: usize) -> &mut Channel {
        &mut self.channels[index]
    }

    pub fn find_channel(&self, name: &str) -> Option<usize> {
        self.channels
            .binary_search_by(|c| irc_cmp(&c.name, name))
            .ok()
    }

    /// Look up or create a channel, keeping the list sorted
    /// case-insensitively.
    pub fn get_or_create_channel(&mut self, name: &str) -> usize {
        match self.channels.binary_search_by(|c| irc_cmp(&c.name, name)) {
            Ok(index) => index,
            Err(index) => {
                self.channels.insert(index, Channel::new(name));
                index
            }
        }
    }

    /// Drop a channel (self-PART or bouncer teardown). Absence is fine.
    pub fn remove_channel(&mut self, name: &str) {
        if let Some(index) = self.find_channel(name) {
            self.channels.remove(index);
        }
    }

    /// Idempotent membership insert. An existing member gets its prefix
    /// updated when one is supplied; the member list is kept in
    /// (prefix priority desc, nick case-insensitive asc) order.
    pub fn add_member(
        &mut self,
        channel: usize,
        user: UserId,
        prefix: Option<char>,
        features: &Features,
    ) {
        {
            let chan = &mut self.channels[channel];
            match chan.member_mut(user) {
                Some(member) => {
                    if prefix.is_some() {
                        member.prefix = prefix;
                    }
                }
                None => chan.members.push(Member::new(user, prefix)),
            }
        }
        // Field-level split so the sort can read nicks from the arena.
        let users = &self.users;
        self.channels[channel].members.sort_by(|a, b| {
            let pa = a.prefix.map_or(usize::MAX, |c| features.prefix_priority(c));
            let pb = b.prefix.map_or(usize::MAX, |c| features.prefix_priority(c));
            pa.cmp(&pb)
                .then_with(|| irc_cmp(&users[a.user.0].nick, &users[b.user.0].nick))
        });
    }

    /// Remove a membership; already-removed is not an error.
    pub fn remove_member(&mut self, channel: usize, user: UserId) {
        self.channels[channel].members.retain(|m| m.user != user);
    }

    /// Apply a typing indicator. `active` renews the window, anything
    /// else clears it.
    pub fn set_typing(&mut self, channel: usize, user: UserId, active: bool, at: DateTime<Utc>) {
        if let Some(member) = self.channels[channel].member_mut(user) {
            member.set_typing(active.then_some(at));
        }
    }

    /// Nick lookup honoring RFC 1459 folding, for sources whose exact
    /// spelling differs from the tracked one.
    pub fn find_user_folded(&self, nick: &str) -> Option<UserId> {
        if let Some(id) = self.find_user(nick) {
            return Some(id);
        }
        self.users
            .iter()
            .position(|u| irc_eq(&u.nick, nick))
            .map(UserId)
    }
}
