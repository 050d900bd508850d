//! Send-as: an authenticated user picks the local part of the outgoing
//! address with a `[sendas:name]` tag in the Subject. The domain always comes
//! from the authenticated identity.

use std::sync::OnceLock;

use regex::bytes::Regex;
use thiserror::Error;

use crate::address::{Address, PathError};

fn tag_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i-u)\[send-?as:\s*([a-z0-9._-]+)\]").expect("send-as pattern compiles")
    })
}

/// One header field. `value` is everything after the colon, including the
/// leading space and any folded continuation lines. Values stay raw bytes:
/// 8BITMIME clients may send unencoded non-UTF-8 text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub name: String,
    pub value: Vec<u8>,
}

impl Header {
    fn is(&self, name: &str) -> bool {
        self.name.trim().eq_ignore_ascii_case(name)
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SendAsError {
    #[error("could not find the end of the header block")]
    NoHeaderBoundary,
    #[error("malformed header block")]
    MalformedHeaders,
    #[error("could not find From header")]
    MissingFrom,
    #[error("could not find Subject header")]
    MissingSubject,
    #[error("send-as address is invalid: {0}")]
    InvalidAddress(#[from] PathError),
}

/// Splits an LF-normalised message into its header fields and the remainder,
/// which starts with the blank separator line.
pub fn split_headers(data: &[u8]) -> Result<(Vec<Header>, &[u8]), SendAsError> {
    let boundary = data
        .windows(2)
        .position(|w| w == b"\n\n")
        .ok_or(SendAsError::NoHeaderBoundary)?;
    let (block, rest) = data.split_at(boundary + 1);
    let block = block.strip_suffix(b"\n").unwrap_or(block);

    let mut headers: Vec<Header> = Vec::new();
    for line in block.split(|&b| b == b'\n') {
        if line.starts_with(b" ") || line.starts_with(b"\t") {
            let last = headers.last_mut().ok_or(SendAsError::MalformedHeaders)?;
            last.value.push(b'\n');
            last.value.extend_from_slice(line);
            continue;
        }
        let colon = line
            .iter()
            .position(|&b| b == b':')
            .ok_or(SendAsError::MalformedHeaders)?;
        // Field names are printable ASCII (RFC 5322 §2.2).
        let name = std::str::from_utf8(&line[..colon]).map_err(|_| SendAsError::MalformedHeaders)?;
        headers.push(Header {
            name: name.to_string(),
            value: line[colon + 1..].to_vec(),
        });
    }

    Ok((headers, rest))
}

pub fn join_headers(headers: &[Header], rest: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(rest.len() + headers.len() * 32);
    for header in headers {
        out.extend_from_slice(header.name.as_bytes());
        out.push(b':');
        out.extend_from_slice(&header.value);
        out.push(b'\n');
    }
    out.extend_from_slice(rest);
    out
}

/// Applies a send-as tag found in the first Subject header.
///
/// On a match the tag is removed from the Subject, the angle-bracketed
/// address in the first From header is replaced, and the new address is
/// returned. Without a tag the headers are left alone and `None` is returned.
pub fn rewrite(headers: &mut [Header], domain: &str) -> Result<Option<Address>, SendAsError> {
    let from = headers
        .iter()
        .position(|h| h.is("From"))
        .ok_or(SendAsError::MissingFrom)?;
    let subject = headers
        .iter()
        .position(|h| h.is("Subject"))
        .ok_or(SendAsError::MissingSubject)?;

    let Some(captures) = tag_pattern().captures(&headers[subject].value) else {
        return Ok(None);
    };
    let tag = captures.get(0).map_or(0..0, |m| m.range());
    let local = captures
        .get(1)
        .map(|m| String::from_utf8_lossy(m.as_bytes()).into_owned())
        .unwrap_or_default();
    let address = Address::parse(&format!("{local}@{domain}"))?;

    let value = &headers[subject].value;
    let mut stripped = [&value[..tag.start], &value[tag.end..]].concat();
    while stripped.last().map_or(false, u8::is_ascii_whitespace) {
        stripped.pop();
    }
    headers[subject].value = stripped;

    let value = &headers[from].value;
    headers[from].value = match value.iter().rposition(|&b| b == b'<') {
        Some(start) => [&value[..=start], format!("{address}>").as_bytes()].concat(),
        None => format!(" <{address}>").into_bytes(),
    };

    Ok(Some(address))
}

/// Parses `data`, rewrites it for send-as and serialises it again.
pub fn apply(data: &[u8], domain: &str) -> Result<Option<(Vec<u8>, Address)>, SendAsError> {
    let (mut headers, rest) = split_headers(data)?;
    match rewrite(&mut headers, domain)? {
        Some(address) => Ok(Some((join_headers(&headers, rest), address))),
        None => Ok(None),
    }
}
