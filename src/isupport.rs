//! RPL_ISUPPORT (005) feature accumulation.
//!
//! Only the tokens this engine acts on are retained. Tokens arrive over
//! several 005 lines; `apply` folds each batch into the same
//! [`Features`] value.

use tracing::debug;

/// Server features derived from ISUPPORT tokens.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Features {
    /// `WHOX` advertised: `WHO <mask> %cnfr` is usable.
    pub whox: bool,
    /// Membership mode letters, highest priority first (`PREFIX` modes).
    pub prefix_modes: String,
    /// Prefix symbols matching `prefix_modes` position for position.
    pub prefix_symbols: String,
    /// `draft/chathistory` page limit (`CHATHISTORY=<n>` or the older
    /// `draft/CHATHISTORY=<n>`).
    pub chathistory_limit: Option<u16>,
    /// `CASEMAPPING` token, informational.
    pub casemapping: Option<String>,
}

impl Default for Features {
    fn default() -> Features {
        Features {
            whox: false,
            prefix_modes: "ov".to_string(),
            prefix_symbols: "@+".to_string(),
            chathistory_limit: None,
            casemapping: None,
        }
    }
}

impl Features {
    /// Fold one 005 line's tokens in. `params` is the full parameter
    /// list: the leading client nick and the trailing "are supported"
    /// text are skipped.
    pub fn apply<'a, I: IntoIterator<Item = &'a str>>(&mut self, params: I) {
        for token in params.into_iter().skip(1) {
            if token.contains(' ') {
                // Trailing "are supported by this server" text.
                break;
            }
            let (key, value) = match token.find('=') {
                Some(i) => (&token[..i], &token[i + 1..]),
                None => (token, ""),
            };
            match key {
                "WHOX" => self.whox = true,
                "PREFIX" => {
                    if let Some((modes, symbols)) = parse_prefix(value) {
                        self.prefix_modes = modes.to_string();
                        self.prefix_symbols = symbols.to_string();
                    } else {
                        debug!(token, "unparsable PREFIX token");
                    }
                }
                "CHATHISTORY" | "draft/CHATHISTORY" => {
                    self.chathistory_limit = value.parse().ok();
                }
                "CASEMAPPING" => self.casemapping = Some(value.to_string()),
                _ => {}
            }
        }
    }

    /// Position of a prefix symbol in the priority order; lower is
    /// higher priority. Unlisted symbols sort last.
    pub fn prefix_priority(&self, symbol: char) -> usize {
        self.prefix_symbols
            .chars()
            .position(|c| c == symbol)
            .unwrap_or(self.prefix_symbols.len())
    }

    /// Whether a char is a known membership prefix symbol.
    pub fn is_prefix_symbol(&self, symbol: char) -> bool {
        self.prefix_symbols.contains(symbol)
    }
}

/// `PREFIX=(ov)@+` → `("ov", "@+")`.
fn parse_prefix(value: &str) -> Option<(&str, &str)> {
    let inner = value.strip_prefix('(')?;
    let close = inner.find(')')?;
    let modes = &inner[..close];
    let symbols = &inner[close + 1..];
    if modes.len() != symbols.len() {
        return None;
    }
    Some((modes, symbols))
}
