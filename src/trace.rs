use chrono::{DateTime, TimeZone};

use crate::envelope::Envelope;
use crate::tls::TlsInfo;

const PRODUCT: &str = "mailhop";
const FOLD: &str = "\n        ";

/// `<prefix>.<unix seconds><nanoseconds>.<random>`; unique enough to name
/// files and correlate logs, not meant to be unguessable.
pub fn envelope_id<Tz: TimeZone>(prefix: &str, received: &DateTime<Tz>) -> String {
    format!(
        "{prefix}.{}{:09}.{:08x}",
        received.timestamp(),
        received.timestamp_subsec_nanos(),
        rand::random::<u32>()
    )
}

/// `SMTP`, `ESMTP` or `ESMTPS`, for the `with` clause.
pub fn protocol_token(esmtp: bool, tls: bool) -> &'static str {
    match (esmtp, tls) {
        (false, false) => "SMTP",
        (false, true) => "SMTPS",
        (true, false) => "ESMTP",
        (true, true) => "ESMTPS",
    }
}

pub fn transport_description(tls: Option<&TlsInfo>) -> String {
    match tls {
        Some(info) => info.to_string(),
        None => "PLAINTEXT".to_string(),
    }
}

/// Session facts that go into the trace header alongside the envelope.
#[derive(Debug, Clone, Copy)]
pub struct TraceContext<'a> {
    pub server_name: &'a str,
    /// Output of the reverse lookup, or the literal address.
    pub remote_host: &'a str,
    pub esmtp: bool,
    pub tls: Option<&'a TlsInfo>,
}

/// Builds the `Received:` header (RFC 5321 §4.4) for `envelope`, folded and
/// terminated with a newline.
pub fn received_header(ctx: &TraceContext<'_>, envelope: &Envelope) -> String {
    let mut header = format!(
        "Received: from {} ({}){FOLD}by {} ({PRODUCT}) with {} id {}{FOLD}",
        envelope.helo,
        ctx.remote_host,
        ctx.server_name,
        protocol_token(ctx.esmtp, ctx.tls.is_some()),
        envelope.id,
    );

    if let Some(first) = envelope.rcpt_to.first() {
        header.push_str(&format!("for <{first}>{FOLD}"));
    }

    // RFC 1123 with a numeric zone, as RFC 5322 §3.3 wants.
    let date = envelope.received.format("%a, %d %b %Y %H:%M:%S %z");
    header.push_str(&format!(
        "(using {});{FOLD}{date}\n",
        transport_description(ctx.tls)
    ));

    header
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::Address;
    use chrono::FixedOffset;

    fn envelope() -> Envelope {
        let received = FixedOffset::west_opt(5 * 3600)
            .unwrap()
            .with_ymd_and_hms(2020, 1, 2, 3, 4, 5)
            .unwrap();
        Envelope {
            remote_addr: "192.0.2.7:52100".parse().unwrap(),
            helo: "client.example".to_string(),
            mail_from: Address::parse("sender@elsewhere.org").unwrap(),
            rcpt_to: vec![
                Address::parse("a@b.com").unwrap(),
                Address::parse("c@b.com").unwrap(),
            ],
            received,
            id: "m.1577952245000000000.0000abcd".to_string(),
            data: b"Subject: hi\n\nbody\n".to_vec(),
        }
    }

    #[test]
    fn test_protocol_token() {
        assert_eq!(protocol_token(false, false), "SMTP");
        assert_eq!(protocol_token(true, false), "ESMTP");
        assert_eq!(protocol_token(true, true), "ESMTPS");
    }

    #[test]
    fn test_plaintext_header() {
        let ctx = TraceContext {
            server_name: "mx.b.com",
            remote_host: "192.0.2.7",
            esmtp: true,
            tls: None,
        };
        let header = received_header(&ctx, &envelope());

        assert!(header.starts_with("Received: from client.example (192.0.2.7)"));
        assert!(header.contains("by mx.b.com (mailhop) with ESMTP id m.1577952245000000000.0000abcd"));
        assert!(header.contains("for <a@b.com>"));
        assert!(!header.contains("c@b.com"));
        assert!(header.contains("(using PLAINTEXT);"));
        assert!(header.ends_with("Thu, 02 Jan 2020 03:04:05 -0500\n"));
    }

    #[test]
    fn test_helo_header_says_smtp() {
        let ctx = TraceContext {
            server_name: "mx.b.com",
            remote_host: "192.0.2.7",
            esmtp: false,
            tls: None,
        };
        assert!(received_header(&ctx, &envelope()).contains(" with SMTP id "));
    }

    #[test]
    fn test_tls_header() {
        let info = TlsInfo {
            version: 0x0303,
            cipher_suite: 0xc02f,
            server_name: Some("mx.b.com".to_string()),
        };
        let ctx = TraceContext {
            server_name: "mx.b.com",
            remote_host: "client.example [192.0.2.7]",
            esmtp: true,
            tls: Some(&info),
        };
        let header = received_header(&ctx, &envelope());
        assert!(header.contains(" with ESMTPS id "));
        assert!(header.contains(
            "(using TLSv1.2 cipher=TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256 name=mx.b.com);"
        ));
    }

    #[test]
    fn test_envelope_id() {
        let received = envelope().received;
        let first = envelope_id("m", &received);
        let second = envelope_id("m", &received);

        assert!(first.starts_with("m.1577952245000000000."));
        assert_eq!(first.len(), "m.1577952245000000000.".len() + 8);
        // Same instant, different random suffix (with overwhelming probability).
        assert_ne!(first, second);
    }
}
