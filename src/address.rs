use std::fmt;

use thiserror::Error;

use crate::reply::ReplyLine;

const LOCAL_PART_MAX_LENGTH: usize = 64;
const DOMAIN_MAX_LENGTH: usize = 255;

/// A mailbox address, stored lower-cased.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Address {
    pub local: String,
    pub domain: String,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum PathError {
    #[error("command prefix does not match")]
    WrongCommand,
    #[error("path is not terminated by '>'")]
    Unterminated,
    #[error("malformed address: {0}")]
    Malformed(&'static str),
}

impl From<PathError> for ReplyLine {
    fn from(err: PathError) -> Self {
        match err {
            PathError::WrongCommand => ReplyLine::UNRECOGNIZED,
            PathError::Unterminated | PathError::Malformed(_) => ReplyLine::BAD_SYNTAX,
        }
    }
}

impl Address {
    /// Parses a bare `local@domain` string.
    pub fn parse(addr: &str) -> Result<Self, PathError> {
        let (local, domain) = addr
            .rsplit_once('@')
            .ok_or(PathError::Malformed("missing '@'"))?;

        if local.is_empty() || domain.is_empty() {
            return Err(PathError::Malformed("empty local part or domain"));
        }
        if local.len() > LOCAL_PART_MAX_LENGTH {
            return Err(PathError::Malformed("local part too long"));
        }
        if domain.len() > DOMAIN_MAX_LENGTH {
            return Err(PathError::Malformed("domain too long"));
        }
        if !local.chars().all(is_local_char) || local.starts_with('.') || local.ends_with('.') {
            return Err(PathError::Malformed("invalid character in local part"));
        }
        if !is_domain(domain) {
            return Err(PathError::Malformed("invalid domain"));
        }

        Ok(Self {
            local: local.to_ascii_lowercase(),
            domain: domain.to_ascii_lowercase(),
        })
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.local, self.domain)
    }
}

fn is_local_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || "!#$%&'*+-/=?^_`{|}~.".contains(c)
}

fn is_domain(domain: &str) -> bool {
    if let Some(literal) = domain.strip_prefix('[') {
        return literal
            .strip_suffix(']')
            .is_some_and(|inner| !inner.is_empty() && !inner.contains(['[', ']', '\\']));
    }
    domain.split('.').all(|label| {
        !label.is_empty()
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
    })
}

/// Extracts the address from a `MAIL FROM:` or `RCPT TO:` line.
///
/// `command` is compared case-insensitively against the start of `line`.
/// Anything after the closing `>` is ignored, so ESMTP parameters such as
/// `SIZE=` pass through untouched.
pub fn parse_path(line: &str, command: &str) -> Result<Address, PathError> {
    let prefix = line
        .get(..command.len())
        .ok_or(PathError::Malformed("line too short"))?;
    if !prefix.eq_ignore_ascii_case(command) {
        return Err(PathError::WrongCommand);
    }

    let params = &line[command.len()..];
    let end = params.find('>').ok_or(PathError::Unterminated)?;
    let path = params[..end].trim_start();

    // A display name before the bracket is tolerated, as in "Name <a@b>".
    let start = path.rfind('<').ok_or(PathError::Malformed("missing '<'"))?;
    let inner = &path[start + 1..];
    if inner.is_empty() {
        return Err(PathError::Malformed("empty path"));
    }
    // Source routes (@a,@b:user@c) are obsolete; keep only the mailbox.
    let inner = inner.rsplit_once(':').map_or(inner, |(_, mailbox)| mailbox);

    Address::parse(inner)
}

/// The domain of an identity string such as an authenticated user name.
/// Returns `None` when there is no `@`.
pub fn domain_of(identity: &str) -> Option<String> {
    identity
        .rsplit_once('@')
        .map(|(_, domain)| domain.to_ascii_lowercase())
        .filter(|domain| !domain.is_empty())
}
