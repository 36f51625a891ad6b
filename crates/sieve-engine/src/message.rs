//! Interfaces to the message being filtered and the delivery environment.
//!
//! The engine never touches mail storage or the network itself. Tests read
//! the message through [`MessageData`]; actions are committed through the
//! [`ScriptEnv`] sinks. Both may block; the interpreter calls them only at
//! opcode boundaries.
//!
//! [`RawMessage`] is a minimal RFC 5322 reader used by the CLI tools and
//! tests; real deliveries plug in their own implementations.

use crate::error::SieveError;
use thiserror::Error;

/// Envelope fields available to the `envelope` test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnvelopeField {
    From,
    To,
    OrigTo,
    Auth,
}

impl EnvelopeField {
    pub fn by_name(name: &str) -> Option<Self> {
        // Envelope part names are matched case-insensitively.
        match name.to_ascii_lowercase().as_str() {
            "from" => Some(EnvelopeField::From),
            "to" => Some(EnvelopeField::To),
            "orig_to" => Some(EnvelopeField::OrigTo),
            "auth" => Some(EnvelopeField::Auth),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            EnvelopeField::From => "from",
            EnvelopeField::To => "to",
            EnvelopeField::OrigTo => "orig_to",
            EnvelopeField::Auth => "auth",
        }
    }
}

/// Read access to the message under evaluation.
pub trait MessageData {
    /// Physical message size in bytes.
    fn physical_size(&self) -> u64;

    /// All values of the named header, in order of appearance. `decoded`
    /// requests MIME word decoding where the implementation supports it.
    fn header(&self, name: &str, decoded: bool) -> Vec<String>;

    /// SMTP envelope values for a field; empty when unavailable.
    fn envelope(&self, field: EnvelopeField) -> Vec<String>;
}

/// Failure of one action sink.
#[derive(Debug, Clone, Error)]
#[error("{kind}: {message}")]
pub struct ActionError {
    pub kind: SieveError,
    pub message: String,
}

impl ActionError {
    pub fn new(kind: SieveError, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn temporary(message: impl Into<String>) -> Self {
        Self::new(SieveError::TempFailure, message)
    }

    pub fn not_possible(message: impl Into<String>) -> Self {
        Self::new(SieveError::NotPossible, message)
    }
}

/// Delivery-side callbacks: identity plus the action sinks.
///
/// Sinks are invoked at commit time in the result set's deterministic
/// order, never during interpretation.
pub trait ScriptEnv {
    fn user(&self) -> &str;

    fn postmaster_address(&self) -> &str;

    /// Store the message in the given mailbox, or the inbox for `None`.
    fn keep(&mut self, mailbox: Option<&str>) -> Result<(), ActionError>;

    fn fileinto(&mut self, mailbox: &str) -> Result<(), ActionError>;

    fn redirect(&mut self, address: &str) -> Result<(), ActionError>;

    fn reject(&mut self, reason: &str) -> Result<(), ActionError>;

    /// Explicit discard; informational, the message is simply not stored.
    fn discard(&mut self) -> Result<(), ActionError> {
        Ok(())
    }

    /// Send a vacation response. Only reachable through a vacation-style
    /// extension; environments without one keep the default.
    fn vacation(&mut self, reason: &str) -> Result<(), ActionError> {
        let _ = reason;
        Err(ActionError::not_possible("vacation responses not supported"))
    }

    /// Duplicate-tracking check used by extensions; `true` when `id` was
    /// seen before.
    fn duplicate_check(&mut self, id: &str) -> bool {
        let _ = id;
        false
    }
}

/// An RFC 5322 message parsed just far enough for filtering: header fields
/// plus physical size. Continuation lines are unfolded; the body is not
/// interpreted.
#[derive(Debug, Clone, Default)]
pub struct RawMessage {
    headers: Vec<(String, String)>,
    size: u64,
    envelope_from: Vec<String>,
    envelope_to: Vec<String>,
    envelope_orig_to: Vec<String>,
    envelope_auth: Vec<String>,
}

impl RawMessage {
    /// Parse a full message text. Never panics on malformed input; header
    /// lines without a colon end the header section like a blank line does.
    pub fn parse(text: &str) -> Result<Self, SieveError> {
        let mut headers = Vec::new();
        let mut current: Option<(String, String)> = None;
        for line in text.lines() {
            let line = line.strip_suffix('\r').unwrap_or(line);
            if line.is_empty() {
                break;
            }
            if line.starts_with(' ') || line.starts_with('\t') {
                // Unfold a continuation line into the previous field.
                match current.as_mut() {
                    Some((_, value)) => {
                        value.push(' ');
                        value.push_str(line.trim_start());
                    }
                    None => return Err(SieveError::NotValid),
                }
                continue;
            }
            if let Some(field) = current.take() {
                headers.push(field);
            }
            match line.split_once(':') {
                Some((name, value)) => {
                    current = Some((name.trim().to_string(), value.trim().to_string()));
                }
                None => break,
            }
        }
        if let Some(field) = current.take() {
            headers.push(field);
        }
        Ok(Self {
            headers,
            size: text.len() as u64,
            ..Self::default()
        })
    }

    /// Override the physical size (e.g. when only the headers were read).
    pub fn set_size(&mut self, size: u64) {
        self.size = size;
    }

    pub fn set_envelope(&mut self, field: EnvelopeField, values: Vec<String>) {
        match field {
            EnvelopeField::From => self.envelope_from = values,
            EnvelopeField::To => self.envelope_to = values,
            EnvelopeField::OrigTo => self.envelope_orig_to = values,
            EnvelopeField::Auth => self.envelope_auth = values,
        }
    }
}

impl MessageData for RawMessage {
    fn physical_size(&self) -> u64 {
        self.size
    }

    fn header(&self, name: &str, _decoded: bool) -> Vec<String> {
        self.headers
            .iter()
            .filter(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.clone())
            .collect()
    }

    fn envelope(&self, field: EnvelopeField) -> Vec<String> {
        match field {
            EnvelopeField::From => self.envelope_from.clone(),
            EnvelopeField::To => self.envelope_to.clone(),
            EnvelopeField::OrigTo => self.envelope_orig_to.clone(),
            EnvelopeField::Auth => self.envelope_auth.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "From: sender@example.com\r\n\
        Subject: Weekend\r\n\
        \tSALE!!\r\n\
        To: a@example.org\r\n\
        \r\n\
        body text\r\n";

    #[test]
    fn parses_and_unfolds_headers() {
        let msg = RawMessage::parse(SAMPLE).unwrap();
        assert_eq!(msg.header("subject", true), vec!["Weekend SALE!!"]);
        assert_eq!(msg.header("From", true), vec!["sender@example.com"]);
        assert!(msg.header("X-Missing", true).is_empty());
    }

    #[test]
    fn size_is_full_text_length() {
        let msg = RawMessage::parse(SAMPLE).unwrap();
        assert_eq!(msg.physical_size(), SAMPLE.len() as u64);
    }

    #[test]
    fn leading_continuation_is_invalid() {
        assert_eq!(
            RawMessage::parse(" folded\r\n").unwrap_err(),
            SieveError::NotValid
        );
    }

    #[test]
    fn default_sinks() {
        struct MinimalEnv;
        impl ScriptEnv for MinimalEnv {
            fn user(&self) -> &str {
                "u"
            }
            fn postmaster_address(&self) -> &str {
                "postmaster@example.com"
            }
            fn keep(&mut self, _mailbox: Option<&str>) -> Result<(), ActionError> {
                Ok(())
            }
            fn fileinto(&mut self, _mailbox: &str) -> Result<(), ActionError> {
                Ok(())
            }
            fn redirect(&mut self, _address: &str) -> Result<(), ActionError> {
                Ok(())
            }
            fn reject(&mut self, _reason: &str) -> Result<(), ActionError> {
                Ok(())
            }
        }

        let mut env = MinimalEnv;
        assert!(env.discard().is_ok());
        // Vacation responses need an extension-provided sink.
        let err = env.vacation("on holiday").unwrap_err();
        assert_eq!(err.kind, SieveError::NotPossible);
        assert!(!env.duplicate_check("some-id"));
    }

    #[test]
    fn envelope_roundtrip() {
        let mut msg = RawMessage::default();
        msg.set_envelope(EnvelopeField::From, vec!["mailer@example.com".into()]);
        assert_eq!(msg.envelope(EnvelopeField::From), vec!["mailer@example.com"]);
        assert!(msg.envelope(EnvelopeField::To).is_empty());
        assert_eq!(EnvelopeField::by_name("FROM"), Some(EnvelopeField::From));
        assert_eq!(EnvelopeField::by_name("bcc"), None);
    }
}
