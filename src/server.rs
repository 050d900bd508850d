use std::net::IpAddr;

use async_trait::async_trait;
use tokio_rustls::TlsAcceptor;

use crate::address::Address;
use crate::envelope::Envelope;
use crate::reply::ReplyLine;

/// Everything a session needs from the rest of the mail system.
///
/// One implementation is shared by every session, so all methods must be
/// safe to call concurrently.
#[async_trait]
pub trait Server: Send + Sync {
    /// Name advertised in the greeting and trace headers.
    fn name(&self) -> &str;

    /// TLS configuration for STARTTLS. `None` disables the extension.
    fn tls_acceptor(&self) -> Option<TlsAcceptor>;

    /// Returns [`ReplyLine::OK`] iff the address belongs to a locally served
    /// domain and the mailbox accepts mail, otherwise a rejection to send.
    async fn verify_address(&self, address: &Address) -> ReplyLine;

    async fn authenticate(&self, authorization: &str, authentication: &str, password: &str)
        -> bool;

    /// Delivers into local mailboxes. `Some(reply)` is a rejection that is
    /// forwarded to the client as is.
    async fn deliver_message(&self, envelope: Envelope) -> Option<ReplyLine>;

    /// Hands the message off for outbound transport.
    async fn relay_message(&self, envelope: Envelope);

    /// Best-effort PTR lookup for trace headers. Must not fail.
    async fn resolve_reverse_host(&self, addr: IpAddr) -> String {
        addr.to_string()
    }
}
