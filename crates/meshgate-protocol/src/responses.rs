//! Response lines emitted by the gateway.
//!
//! Every response is a single line. Success markers are bare words
//! (`NETWORK_FORMED`); failures start with `ERROR ` followed by a reason and,
//! where the mesh stack reported one, its numeric error code.

use std::fmt;

/// A response line written to the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// The commissioner was started (or was already active).
    CommissionerStarted,

    /// The commissioner was stopped.
    CommissionerStopped,

    /// A fresh network dataset was installed and the interfaces enabled.
    NetworkFormed,

    /// A joiner credential was registered.
    JoinerAdded {
        /// Identity token exactly as the host sent it.
        id: String,
    },

    /// Registering a joiner failed with the given stack error code.
    AddFailed {
        /// Numeric mesh stack error code.
        code: u8,
    },

    /// Starting the commissioner failed with the given stack error code.
    StartFailed {
        /// Numeric mesh stack error code.
        code: u8,
    },

    /// Forming the network failed with the given stack error code.
    FormFailed {
        /// Numeric mesh stack error code.
        code: u8,
    },

    /// Signature missing or wrong.
    SignatureInvalid,
}

impl Response {
    /// Render the response line, without terminator.
    pub fn to_line(&self) -> String {
        self.to_string()
    }

    /// Parse a response line (the host side of the link).
    ///
    /// Returns `None` for lines that are not gateway responses, such as log
    /// output sharing the same serial port.
    pub fn parse(text: &str) -> Option<Response> {
        let text = text.trim();
        let mut words = text.split(' ').filter(|w| !w.is_empty());

        match words.next()? {
            "COMMISSIONER_STARTED" => Some(Response::CommissionerStarted),
            "COMMISSIONER_STOPPED" => Some(Response::CommissionerStopped),
            "NETWORK_FORMED" => Some(Response::NetworkFormed),
            "JOINER_ADDED" => words.next().map(|id| Response::JoinerAdded { id: id.to_string() }),
            "ERROR" => {
                let reason = words.next()?;
                let code = words.next().and_then(|c| c.parse::<u8>().ok());
                match (reason, code) {
                    ("SIG_INVALID", _) => Some(Response::SignatureInvalid),
                    ("ADD_FAILED", Some(code)) => Some(Response::AddFailed { code }),
                    ("START_FAILED", Some(code)) => Some(Response::StartFailed { code }),
                    ("FORM_FAILED", Some(code)) => Some(Response::FormFailed { code }),
                    _ => None,
                }
            }
            _ => None,
        }
    }

    /// Check if this is an error response.
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            Response::AddFailed { .. }
                | Response::StartFailed { .. }
                | Response::FormFailed { .. }
                | Response::SignatureInvalid
        )
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Response::CommissionerStarted => f.write_str("COMMISSIONER_STARTED"),
            Response::CommissionerStopped => f.write_str("COMMISSIONER_STOPPED"),
            Response::NetworkFormed => f.write_str("NETWORK_FORMED"),
            Response::JoinerAdded { id } => write!(f, "JOINER_ADDED {}", id),
            Response::AddFailed { code } => write!(f, "ERROR ADD_FAILED {}", code),
            Response::StartFailed { code } => write!(f, "ERROR START_FAILED {}", code),
            Response::FormFailed { code } => write!(f, "ERROR FORM_FAILED {}", code),
            Response::SignatureInvalid => f.write_str("ERROR SIG_INVALID"),
        }
    }
}
