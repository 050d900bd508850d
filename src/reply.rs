use std::borrow::Cow;
use std::fmt;

/// A single-line SMTP reply.
///
/// Collaborators signal acceptance by returning [`ReplyLine::OK`]; the session
/// compares against it by value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyLine {
    pub code: u16,
    pub message: Cow<'static, str>,
}

impl ReplyLine {
    pub const OK: ReplyLine = ReplyLine::fixed(250, "OK");
    pub const BAD_SYNTAX: ReplyLine = ReplyLine::fixed(501, "syntax error");
    pub const BAD_SEQUENCE: ReplyLine = ReplyLine::fixed(503, "bad sequence of commands");
    pub const UNRECOGNIZED: ReplyLine = ReplyLine::fixed(500, "unrecognized command");
    pub const LINE_TOO_LONG: ReplyLine = ReplyLine::fixed(500, "line too long");
    pub const BAD_MAILBOX: ReplyLine = ReplyLine::fixed(550, "mailbox unavailable");
    pub const NOT_AUTHENTICATED: ReplyLine = ReplyLine::fixed(550, "not authenticated");
    pub const AUTH_OK: ReplyLine = ReplyLine::fixed(235, "auth success");
    pub const AUTH_FAILED: ReplyLine = ReplyLine::fixed(535, "invalid credentials");
    pub const AUTH_CANCELLED: ReplyLine = ReplyLine::fixed(501, "authentication cancelled");
    pub const ALREADY_AUTHENTICATED: ReplyLine = ReplyLine::fixed(503, "already authenticated");
    pub const UNKNOWN_MECHANISM: ReplyLine = ReplyLine::fixed(504, "unrecognized auth type");
    pub const TRANSACTION_FAILED: ReplyLine = ReplyLine::fixed(552, "transaction failed");
    pub const MESSAGE_TOO_LARGE: ReplyLine =
        ReplyLine::fixed(552, "message exceeds fixed maximum message size");
    pub const START_TLS: ReplyLine = ReplyLine::fixed(220, "initiate TLS connection");
    pub const START_MAIL_INPUT: ReplyLine =
        ReplyLine::fixed(354, "Start mail input; end with <CRLF>.<CRLF>");
    pub const GOODBYE: ReplyLine = ReplyLine::fixed(221, "Goodbye");
    pub const AUTH_CONTINUE: ReplyLine = ReplyLine::bare(334);

    pub const fn fixed(code: u16, message: &'static str) -> Self {
        Self {
            code,
            message: Cow::Borrowed(message),
        }
    }

    pub fn new(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            message: Cow::Owned(message.into()),
        }
    }

    /// A reply with only a code, written as e.g. `334 `.
    pub const fn bare(code: u16) -> Self {
        Self::fixed(code, "")
    }
}

impl fmt::Display for ReplyLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "{} ", self.code)
        } else {
            write!(f, "{} {}", self.code, self.message)
        }
    }
}
