//! The closed command table.
//!
//! Both named commands and three-digit numerics resolve through one lookup;
//! anything unmatched classifies as [`Command::Unknown`] but is still
//! transported for display.

use std::fmt;

macro_rules! commands {
    ( $( $variant:ident => $token:literal, )* ) => {
        /// Commands and numerics this engine recognizes.
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
        pub enum Command {
            $( $variant, )*
            /// Anything else. Retained, never dispatched.
            Unknown,
        }

        impl Command {
            /// Resolve a command token (word or 3-digit numeric),
            /// ignoring ASCII case.
            pub fn from_token(token: &str) -> Command {
                $( if token.eq_ignore_ascii_case($token) {
                    return Command::$variant;
                } )*
                Command::Unknown
            }

            /// The canonical token for this command.
            pub fn token(&self) -> &'static str {
                match self {
                    $( Command::$variant => $token, )*
                    Command::Unknown => "?",
                }
            }
        }

        impl fmt::Display for Command {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.token())
            }
        }
    }
}

commands! {
    Authenticate => "AUTHENTICATE",
    Away => "AWAY",
    Batch => "BATCH",
    Bouncer => "BOUNCER",
    Cap => "CAP",
    Chathistory => "CHATHISTORY",
    Join => "JOIN",
    Markread => "MARKREAD",
    Notice => "NOTICE",
    Part => "PART",
    Pong => "PONG",
    Privmsg => "PRIVMSG",
    Tagmsg => "TAGMSG",
    Welcome => "001",
    YourHost => "002",
    Created => "003",
    MyInfo => "004",
    Isupport => "005",
    TryAgain => "263",
    EndOfWho => "315",
    ListStart => "321",
    List => "322",
    ListEnd => "323",
    Topic => "332",
    WhoReply => "352",
    NamReply => "353",
    WhoSpcRpl => "354",
    EndOfNames => "366",
    LoggedIn => "900",
    SaslSuccess => "903",
}
