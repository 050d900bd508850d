//! The standalone server: listeners, local mailbox policy, and the on-disk
//! delivery and relay spools behind [`Server`].

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use hickory_resolver::TokioAsyncResolver;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::address::{domain_of, Address};
use crate::config::{Opt, SessionConfig};
use crate::envelope::Envelope;
use crate::ratelimiter::RateLimiter;
use crate::reply::ReplyLine;
use crate::server::Server;
use crate::session::Session;
use crate::tls;
use crate::transport::Transport;

pub struct Gateway {
    name: String,
    address: String,
    ports: Vec<u16>,
    domains: Vec<String>,
    mailboxes: Vec<Address>,
    users: HashMap<String, String>,
    data_dir: Option<PathBuf>,
    relay_spool: Option<PathBuf>,
    tls_acceptor: Option<TlsAcceptor>,
    resolver: Option<TokioAsyncResolver>,
    rate_limiter: Arc<Mutex<RateLimiter>>,
    max_connections_per_minute: usize,
    session_config: SessionConfig,
}

/// Parses `address:password` lines. Blank lines and `#` comments are skipped.
pub fn parse_users(contents: &str) -> Result<HashMap<String, String>> {
    let mut users = HashMap::new();
    for (n, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let (user, password) = line
            .split_once(':')
            .with_context(|| format!("users file line {}: expected address:password", n + 1))?;
        let user = user.trim().to_ascii_lowercase();
        if domain_of(&user).is_none() {
            anyhow::bail!("users file line {}: {:?} is not an address", n + 1, user);
        }
        users.insert(user, password.to_string());
    }
    Ok(users)
}

fn create_dir(dir: &Path, what: &str) -> Result<()> {
    if !dir.exists() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {} directory: {:?}", what, dir))?;
        info!(?dir, "{} directory created", what);
    }
    Ok(())
}

impl Gateway {
    pub async fn new(opt: Opt) -> Result<Self> {
        if let Some(data_dir) = &opt.data_dir {
            create_dir(data_dir, "data")?;
        }
        if let Some(spool) = &opt.relay_spool {
            create_dir(spool, "relay spool")?;
        }

        let tls_acceptor = match (&opt.tls_cert, &opt.tls_key) {
            (Some(cert_path), Some(key_path)) => {
                let acceptor = tls::load_acceptor(cert_path, key_path)?;
                info!(cert = ?cert_path, "TLS configured, STARTTLS enabled");
                Some(acceptor)
            }
            (None, None) => None,
            _ => anyhow::bail!("--tls-cert and --tls-key must be given together"),
        };

        let users = match &opt.users_file {
            Some(path) => {
                let contents = tokio::fs::read_to_string(path)
                    .await
                    .with_context(|| format!("Failed to read users file: {:?}", path))?;
                parse_users(&contents)?
            }
            None => HashMap::new(),
        };

        let mailboxes = opt
            .mailboxes
            .iter()
            .map(|mb| Address::parse(mb).with_context(|| format!("Invalid mailbox: {}", mb)))
            .collect::<Result<Vec<_>>>()?;

        let resolver = match TokioAsyncResolver::tokio_from_system_conf() {
            Ok(resolver) => Some(resolver),
            Err(e) => {
                warn!(error = %e, "no system resolver, trace headers will carry bare addresses");
                None
            }
        };

        Ok(Self::with_parts(&opt, mailboxes, users, tls_acceptor, resolver))
    }

    fn with_parts(
        opt: &Opt,
        mailboxes: Vec<Address>,
        users: HashMap<String, String>,
        tls_acceptor: Option<TlsAcceptor>,
        resolver: Option<TokioAsyncResolver>,
    ) -> Self {
        Self {
            name: opt.name.clone(),
            address: opt.address.clone(),
            ports: opt.ports.clone(),
            domains: opt.domains.iter().map(|d| d.to_ascii_lowercase()).collect(),
            mailboxes,
            users,
            data_dir: opt.data_dir.clone(),
            relay_spool: opt.relay_spool.clone(),
            tls_acceptor,
            resolver,
            rate_limiter: Arc::new(Mutex::new(RateLimiter::new(opt.max_connections_per_minute))),
            max_connections_per_minute: opt.max_connections_per_minute,
            session_config: SessionConfig::from(opt),
        }
    }

    async fn write_message(dir: &Path, envelope: &Envelope) -> std::io::Result<PathBuf> {
        let path = dir.join(format!("{}.eml", envelope.id));
        tokio::fs::write(&path, &envelope.data).await?;
        Ok(path)
    }

    async fn spool_for_relay(spool: &Path, envelope: &Envelope) -> std::io::Result<()> {
        let mut meta = format!("MAIL FROM:<{}>\n", envelope.mail_from);
        for rcpt in &envelope.rcpt_to {
            meta.push_str(&format!("RCPT TO:<{}>\n", rcpt));
        }
        // The envelope file is written last: its presence marks the message ready.
        Self::write_message(spool, envelope).await?;
        tokio::fs::write(spool.join(format!("{}.envelope", envelope.id)), meta).await
    }

    pub async fn handle_client(
        self: Arc<Self>,
        mut stream: TcpStream,
        client_addr: SocketAddr,
    ) -> Result<()> {
        {
            let mut limiter = self.rate_limiter.lock().await;
            if !limiter.check_and_add(client_addr.ip()) {
                warn!(
                    max = self.max_connections_per_minute,
                    "rate limit exceeded"
                );
                let _ = stream
                    .write_all(b"421 Too many connections from your IP\r\n")
                    .await;
                return Ok(());
            }
        }

        let local_addr = stream.local_addr()?;
        let transport = Transport::new(stream, self.session_config.timeout);
        let session = Session::new(self.clone(), self.session_config, client_addr, local_addr);
        // Errors are logged by the session itself.
        let _ = session.run(transport).await;
        Ok(())
    }

    async fn run_server(self: Arc<Self>, port: u16) -> Result<()> {
        let addr = format!("{}:{}", self.address, port);
        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("Failed to bind to {}", addr))?;

        info!(%addr, "listening");

        loop {
            match listener.accept().await {
                Ok((stream, client_addr)) => {
                    let this = self.clone();
                    let span = info_span!("session", client = %client_addr, port);
                    tokio::spawn(
                        async move {
                            if let Err(e) = this.handle_client(stream, client_addr).await {
                                error!(error = %e, "connection failed");
                            }
                        }
                        .instrument(span),
                    );
                }
                Err(e) => {
                    error!(port, error = %e, "accept error");
                }
            }
        }
    }

    pub async fn run(self: Arc<Self>) -> Result<()> {
        let limiter = self.rate_limiter.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(60));
            loop {
                interval.tick().await;
                limiter.lock().await.prune();
            }
        });

        let mut handles = vec![];
        for port in self.ports.clone() {
            let this = self.clone();
            handles.push(tokio::spawn(async move {
                if let Err(e) = this.run_server(port).await {
                    error!(port, error = %e, "server failed");
                }
            }));
        }

        for handle in handles {
            handle.await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Server for Gateway {
    fn name(&self) -> &str {
        &self.name
    }

    fn tls_acceptor(&self) -> Option<TlsAcceptor> {
        self.tls_acceptor.clone()
    }

    async fn verify_address(&self, address: &Address) -> ReplyLine {
        if !self.domains.iter().any(|d| *d == address.domain) {
            return ReplyLine::BAD_MAILBOX;
        }

        // A domain with no listed mailboxes takes every local part.
        let mut listed = self
            .mailboxes
            .iter()
            .filter(|mb| mb.domain == address.domain)
            .peekable();
        if listed.peek().is_none() || listed.any(|mb| mb == address) {
            ReplyLine::OK
        } else {
            ReplyLine::BAD_MAILBOX
        }
    }

    async fn authenticate(&self, authorization: &str, authentication: &str, password: &str) -> bool {
        let user = authentication.to_ascii_lowercase();
        if !authorization.is_empty() && !authorization.eq_ignore_ascii_case(&user) {
            return false;
        }
        self.users.get(&user).map_or(false, |p| p == password)
    }

    async fn deliver_message(&self, envelope: Envelope) -> Option<ReplyLine> {
        let Some(data_dir) = &self.data_dir else {
            info!(id = %envelope.id, bytes = envelope.data_size(), "no data directory, message discarded");
            return None;
        };

        match Self::write_message(data_dir, &envelope).await {
            Ok(path) => {
                info!(id = %envelope.id, ?path, rcpt = envelope.rcpt_to.len(), "message delivered");
                None
            }
            Err(e) => {
                error!(id = %envelope.id, error = %e, "failed to store message");
                Some(ReplyLine::fixed(451, "local error in processing"))
            }
        }
    }

    async fn relay_message(&self, envelope: Envelope) {
        let Some(spool) = &self.relay_spool else {
            warn!(id = %envelope.id, "no relay spool configured, message dropped");
            return;
        };

        match Self::spool_for_relay(spool, &envelope).await {
            Ok(()) => info!(id = %envelope.id, rcpt = envelope.rcpt_to.len(), "message spooled for relay"),
            Err(e) => error!(id = %envelope.id, error = %e, "failed to spool message for relay"),
        }
    }

    async fn resolve_reverse_host(&self, addr: IpAddr) -> String {
        let Some(resolver) = &self.resolver else {
            return addr.to_string();
        };

        match resolver.reverse_lookup(addr).await {
            Ok(lookup) => match lookup.iter().next() {
                Some(ptr) => format!("{} [{}]", ptr.to_string().trim_end_matches('.'), addr),
                None => addr.to_string(),
            },
            Err(e) => {
                debug!(%addr, error = %e, "reverse lookup failed");
                addr.to_string()
            }
        }
    }
}
