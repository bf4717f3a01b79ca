//! Commands accepted by the gateway.
//!
//! The gateway accepts two families of commands:
//! - Unsigned local commands, recognized by the first word of the raw line
//! - Signed commands, recognized by the first word of the verified body

use std::fmt;

use crate::auth::CommandAuthenticator;
use crate::error::{ParseError, ParseResult};

/// Start the commissioner role (unsigned).
pub const VERB_COMMISSIONER_START: &str = "commissioner_start";
/// Stop the commissioner role (unsigned).
pub const VERB_COMMISSIONER_STOP: &str = "commissioner_stop";
/// Form a new network (unsigned).
pub const VERB_FORM_NET: &str = "FORM_NET";
/// Lowercase spelling of [`VERB_FORM_NET`], also accepted.
pub const VERB_FORM_NET_LOWER: &str = "form_net";
/// Register a joiner credential (signed).
pub const VERB_ADD: &str = "add";
/// Wipe persisted network configuration and restart (signed).
pub const VERB_FACTORY_RESET: &str = "factory_reset";

/// Identity token that admits any joiner.
pub const JOINER_WILDCARD: &str = "*";

/// Joining window used for `add` commands, in seconds.
pub const DEFAULT_JOINER_TIMEOUT_SECS: u32 = 120;

/// An 8-byte IEEE 802.15.4 extended address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExtAddress(pub [u8; 8]);

impl ExtAddress {
    /// Parse exactly 16 hex characters (either case).
    pub fn from_hex(s: &str) -> Option<ExtAddress> {
        if s.len() != 16 {
            return None;
        }
        let mut bytes = [0u8; 8];
        hex::decode_to_slice(s, &mut bytes).ok()?;
        Some(ExtAddress(bytes))
    }

    /// The raw address bytes.
    pub fn as_bytes(&self) -> &[u8; 8] {
        &self.0
    }
}

impl fmt::Display for ExtAddress {
    /// Renders as 16 uppercase hex characters.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode_upper(self.0))
    }
}

/// Which device(s) a joiner credential applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JoinerId {
    /// Any device presenting the credential.
    Any,
    /// Only the device with this extended address.
    Address(ExtAddress),
}

impl JoinerId {
    /// Parse a joiner identity token: `*` or 16 hex characters.
    pub fn parse(token: &str) -> ParseResult<JoinerId> {
        if token == JOINER_WILDCARD {
            return Ok(JoinerId::Any);
        }
        ExtAddress::from_hex(token)
            .map(JoinerId::Address)
            .ok_or_else(|| ParseError::InvalidIdentity(token.to_string()))
    }

    /// The address, or `None` for the wildcard.
    pub fn address(&self) -> Option<&ExtAddress> {
        match self {
            JoinerId::Any => None,
            JoinerId::Address(addr) => Some(addr),
        }
    }
}

impl fmt::Display for JoinerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JoinerId::Any => f.write_str(JOINER_WILDCARD),
            JoinerId::Address(addr) => addr.fmt(f),
        }
    }
}

/// Commands that can be sent to the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    // ========== Unsigned Commands ==========
    /// Start the commissioner role.
    CommissionerStart,

    /// Stop the commissioner role.
    CommissionerStop,

    /// Wipe the current dataset and form a fresh network.
    FormNetwork {
        /// Network name as received; truncated by the gateway if too long.
        name: String,
    },

    // ========== Signed Commands ==========
    /// Register a joiner credential with the commissioner.
    AddJoiner {
        /// Identity token as received (`*` or 16 hex characters).
        ///
        /// Kept unparsed so the admission step can reject it itself, and so
        /// the success response echoes exactly what the host sent.
        id: String,
        /// Joiner pre-shared credential (PSKd).
        credential: String,
    },

    /// Erase persisted network configuration and restart the device.
    FactoryReset,
}

/// Space-separated tokens, with runs of spaces collapsed.
fn tokens(line: &str) -> impl Iterator<Item = &str> {
    line.split(' ').filter(|t| !t.is_empty())
}

/// First space-separated token of a line.
pub fn first_token(line: &str) -> Option<&str> {
    tokens(line).next()
}

impl Command {
    /// Try to parse an unsigned command from a raw line.
    ///
    /// Returns `None` when the first word is not an unsigned verb, in which
    /// case the line must be authenticated before anything else happens.
    pub fn parse_unsigned(line: &str) -> Option<ParseResult<Command>> {
        let mut words = tokens(line);
        match words.next()? {
            VERB_COMMISSIONER_START => Some(Ok(Command::CommissionerStart)),
            VERB_COMMISSIONER_STOP => Some(Ok(Command::CommissionerStop)),
            VERB_FORM_NET | VERB_FORM_NET_LOWER => Some(
                words
                    .next()
                    .map(|name| Command::FormNetwork { name: name.to_string() })
                    .ok_or(ParseError::MissingArgument { verb: VERB_FORM_NET, argument: "name" }),
            ),
            _ => None,
        }
    }

    /// Parse a verified command body.
    ///
    /// Unknown verbs yield `Ok(None)` and are meant to be ignored.
    pub fn parse_signed(body: &str) -> ParseResult<Option<Command>> {
        let mut words = tokens(body);
        match words.next() {
            Some(VERB_ADD) => {
                let id = words
                    .next()
                    .ok_or(ParseError::MissingArgument { verb: VERB_ADD, argument: "id" })?;
                let credential = words
                    .next()
                    .ok_or(ParseError::MissingArgument { verb: VERB_ADD, argument: "credential" })?;
                Ok(Some(Command::AddJoiner {
                    id: id.to_string(),
                    credential: credential.to_string(),
                }))
            }
            Some(VERB_FACTORY_RESET) => Ok(Some(Command::FactoryReset)),
            _ => Ok(None),
        }
    }

    /// Whether the gateway requires this command to be signed.
    pub fn requires_signature(&self) -> bool {
        matches!(self, Command::AddJoiner { .. } | Command::FactoryReset)
    }

    /// Get the command text, without signature or terminator.
    pub fn to_command_string(&self) -> String {
        match self {
            Command::CommissionerStart => VERB_COMMISSIONER_START.to_string(),
            Command::CommissionerStop => VERB_COMMISSIONER_STOP.to_string(),
            Command::FormNetwork { name } => format!("{} {}", VERB_FORM_NET, name),
            Command::AddJoiner { id, credential } => format!("{} {} {}", VERB_ADD, id, credential),
            Command::FactoryReset => VERB_FACTORY_RESET.to_string(),
        }
    }

    /// Encode the command as a host would send it, signing when required.
    pub fn encode(&self, auth: &CommandAuthenticator) -> Vec<u8> {
        let text = self.to_command_string();
        let line = if self.requires_signature() { auth.sign_line(&text) } else { text };
        crate::codec::encode_line(&line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_joiner_id_wildcard_and_hex() {
        assert_eq!(JoinerId::parse("*"), Ok(JoinerId::Any));

        let id = JoinerId::parse("0011223344556677").unwrap();
        assert_eq!(
            id,
            JoinerId::Address(ExtAddress([0x00, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77]))
        );

        let mixed = JoinerId::parse("aAbBcCdDeEfF0011").unwrap();
        assert_eq!(mixed.to_string(), "AABBCCDDEEFF0011");
    }

    #[test]
    fn test_joiner_id_rejects_bad_lengths_and_digits() {
        for bad in ["001122334455667", "00112233445566778", "00112233445566zz", "", "**", "00112233 4556677"] {
            assert_eq!(
                JoinerId::parse(bad),
                Err(ParseError::InvalidIdentity(bad.to_string())),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_joiner_id_rejects_multibyte_text() {
        // 16 bytes long, but not 16 hex characters.
        assert_eq!("00112233445566é".len(), 16);
        assert!(JoinerId::parse("00112233445566é").is_err());
    }

    #[test]
    fn test_parse_unsigned() {
        assert_eq!(Command::parse_unsigned("commissioner_start"), Some(Ok(Command::CommissionerStart)));
        assert_eq!(Command::parse_unsigned("commissioner_stop extra"), Some(Ok(Command::CommissionerStop)));
        assert_eq!(
            Command::parse_unsigned("FORM_NET  home-net"),
            Some(Ok(Command::FormNetwork { name: "home-net".into() }))
        );
        assert_eq!(
            Command::parse_unsigned("form_net lab"),
            Some(Ok(Command::FormNetwork { name: "lab".into() }))
        );
        assert!(matches!(
            Command::parse_unsigned("FORM_NET"),
            Some(Err(ParseError::MissingArgument { .. }))
        ));
        assert_eq!(Command::parse_unsigned("add * J01NME|00"), None);
        assert_eq!(Command::parse_unsigned("commissioner_start|00"), None);
    }

    #[test]
    fn test_parse_signed() {
        assert_eq!(
            Command::parse_signed("add 0011223344556677 ABCD1234"),
            Ok(Some(Command::AddJoiner { id: "0011223344556677".into(), credential: "ABCD1234".into() }))
        );
        assert_eq!(Command::parse_signed("factory_reset"), Ok(Some(Command::FactoryReset)));
        assert_eq!(Command::parse_signed("reboot now"), Ok(None));
        assert_eq!(Command::parse_signed(""), Ok(None));
        assert_eq!(
            Command::parse_signed("add *"),
            Err(ParseError::MissingArgument { verb: "add", argument: "credential" })
        );
    }

    #[test]
    fn test_encode_signs_only_signed_commands() {
        let auth = CommandAuthenticator::new(b"k").unwrap();

        assert_eq!(Command::CommissionerStart.encode(&auth), b"commissioner_start\n");

        let encoded = Command::FactoryReset.encode(&auth);
        let line = std::str::from_utf8(&encoded).unwrap().trim_end();
        assert_eq!(auth.verify(line), Ok("factory_reset"));
    }
}
