//! One SMTP conversation, from greeting to QUIT.

use std::net::SocketAddr;
use std::sync::Arc;

use chrono::{DateTime, FixedOffset, Local};
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info, warn};

use crate::address::{domain_of, parse_path, Address};
use crate::auth::decode_plain;
use crate::config::SessionConfig;
use crate::envelope::Envelope;
use crate::error::SessionError;
use crate::reply::ReplyLine;
use crate::sendas;
use crate::server::Server;
use crate::state::{Command, Delivery, State};
use crate::tls::TlsInfo;
use crate::trace::{envelope_id, received_header, TraceContext};
use crate::transport::{Body, Transport};
use crate::utils::{loggable_line, safe_log_string};

/// What the loop does after a command has been handled.
pub enum Flow {
    Continue,
    /// QUIT was answered; close the connection.
    Quit,
    /// The client went away in the middle of a command.
    Closed,
    /// `220` has been sent; run the handshake and swap the transport.
    StartTls(TlsAcceptor),
}

pub struct Session {
    server: Arc<dyn Server>,
    config: SessionConfig,
    remote_addr: SocketAddr,
    local_addr: SocketAddr,

    state: State,
    esmtp: bool,
    tls: Option<TlsInfo>,
    /// The authcid of a successful AUTH PLAIN. Only ever set over TLS.
    authenticated: Option<String>,
    helo: String,

    delivery: Delivery,
    mail_from: Option<Address>,
    rcpt_to: Vec<Address>,
}

impl Session {
    pub fn new(
        server: Arc<dyn Server>,
        config: SessionConfig,
        remote_addr: SocketAddr,
        local_addr: SocketAddr,
    ) -> Self {
        Self {
            server,
            config,
            remote_addr,
            local_addr,
            state: State::New,
            esmtp: false,
            tls: None,
            authenticated: None,
            helo: String::new(),
            delivery: Delivery::Unknown,
            mail_from: None,
            rcpt_to: Vec::new(),
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn is_esmtp(&self) -> bool {
        self.esmtp
    }

    pub fn tls(&self) -> Option<&TlsInfo> {
        self.tls.as_ref()
    }

    pub fn authenticated(&self) -> Option<&str> {
        self.authenticated.as_deref()
    }

    pub fn helo(&self) -> &str {
        &self.helo
    }

    pub fn delivery(&self) -> Delivery {
        self.delivery
    }

    pub fn mail_from(&self) -> Option<&Address> {
        self.mail_from.as_ref()
    }

    pub fn recipients(&self) -> &[Address] {
        &self.rcpt_to
    }

    /// Greets the client and serves commands until QUIT or disconnect.
    ///
    /// Fatal errors are logged here and returned.
    pub async fn run(mut self, transport: Transport) -> Result<(), SessionError> {
        info!("accepted connection");
        let result = self.serve(transport).await;
        if let Err(e) = &result {
            error!(error = %e, "session terminated");
        }
        result
    }

    async fn serve(&mut self, mut transport: Transport) -> Result<(), SessionError> {
        let greeting = ReplyLine::new(
            220,
            format!(
                "{} ESMTP [{}] (mailhop)",
                self.server.name(),
                self.local_addr
            ),
        );
        transport.write_reply(&greeting).await?;

        loop {
            let Some(line) = self.read_line(&mut transport).await? else {
                info!("client disconnected");
                return Ok(());
            };

            match self.handle_line(&line, &mut transport).await? {
                Flow::Continue => {}
                Flow::Quit => {
                    let _ = transport.shutdown().await;
                    return Ok(());
                }
                Flow::Closed => {
                    info!("client disconnected");
                    return Ok(());
                }
                Flow::StartTls(acceptor) => {
                    transport = self.start_tls(transport, &acceptor).await?;
                }
            }
        }
    }

    /// Handles one command line, writing its reply.
    pub async fn handle_line(
        &mut self,
        line: &str,
        transport: &mut Transport,
    ) -> Result<Flow, SessionError> {
        info!(line = %loggable_line(line), "read line");

        let Some(verb) = line.split_whitespace().next() else {
            return self.reply(transport, &ReplyLine::BAD_SYNTAX).await;
        };
        let Some(command) = Command::parse(verb) else {
            return self.reply(transport, &ReplyLine::UNRECOGNIZED).await;
        };
        if !command.permitted_in(self.state) {
            debug!(?command, state = ?self.state, "command out of sequence");
            return self.reply(transport, &ReplyLine::BAD_SEQUENCE).await;
        }

        match command {
            Command::Helo | Command::Ehlo => self.do_ehlo(command, line, transport).await,
            Command::StartTls => self.do_starttls(line, transport).await,
            Command::Auth => self.do_auth(line, transport).await,
            Command::Mail => self.do_mail(line, transport).await,
            Command::Rcpt => self.do_rcpt(line, transport).await,
            Command::Data => self.do_data(line, transport).await,
            Command::Rset => self.do_rset(transport).await,
            Command::Quit => {
                self.reply(transport, &ReplyLine::GOODBYE).await?;
                Ok(Flow::Quit)
            }
            Command::Vrfy => {
                self.reply(transport, &ReplyLine::fixed(252, "I'll do my best"))
                    .await
            }
            Command::Expn => {
                self.reply(transport, &ReplyLine::fixed(550, "access denied"))
                    .await
            }
            Command::Noop => self.reply(transport, &ReplyLine::OK).await,
            Command::Help => {
                self.reply(
                    transport,
                    &ReplyLine::fixed(250, "https://tools.ietf.org/html/rfc5321"),
                )
                .await
            }
        }
    }

    /// Reads one client line. An over-long line is answered before the
    /// error is returned, since it ends the session.
    async fn read_line(&self, transport: &mut Transport) -> Result<Option<String>, SessionError> {
        match transport.read_line(self.config.max_line_length).await {
            Err(SessionError::LineTooLong { max }) => {
                let _ = transport.write_reply(&ReplyLine::LINE_TOO_LONG).await;
                Err(SessionError::LineTooLong { max })
            }
            result => result,
        }
    }

    async fn reply(&self, transport: &mut Transport, reply: &ReplyLine) -> Result<Flow, SessionError> {
        debug!(code = reply.code, "write reply");
        transport.write_reply(reply).await?;
        Ok(Flow::Continue)
    }

    fn reset_transaction(&mut self) {
        self.delivery = Delivery::Unknown;
        self.mail_from = None;
        self.rcpt_to.clear();
    }

    async fn do_ehlo(
        &mut self,
        command: Command,
        line: &str,
        transport: &mut Transport,
    ) -> Result<Flow, SessionError> {
        let args: Vec<&str> = line.split_whitespace().collect();
        let [_, helo] = args.as_slice() else {
            return self.reply(transport, &ReplyLine::BAD_SYNTAX).await;
        };

        self.reset_transaction();
        self.helo = helo.to_string();
        self.esmtp = command == Command::Ehlo;
        self.state = State::Initial;
        info!(helo = %safe_log_string(&self.helo), esmtp = self.esmtp, "greeted");

        let greeting = format!("Hello {} [{}]", self.helo, self.remote_addr.ip());
        if !self.esmtp {
            return self.reply(transport, &ReplyLine::new(250, greeting)).await;
        }

        let mut lines = vec![greeting];
        if self.tls.is_none() && self.server.tls_acceptor().is_some() {
            lines.push("STARTTLS".to_string());
        }
        if self.tls.is_some() {
            lines.push("AUTH PLAIN".to_string());
        }
        lines.push("8BITMIME".to_string());
        lines.push(format!("SIZE {}", self.config.max_message_size));

        debug!(code = 250, lines = lines.len(), "write multiline reply");
        transport.write_multiline(250, &lines).await?;
        Ok(Flow::Continue)
    }

    async fn do_starttls(&mut self, line: &str, transport: &mut Transport) -> Result<Flow, SessionError> {
        let acceptor = match self.server.tls_acceptor() {
            Some(acceptor) if self.esmtp => acceptor,
            _ => return self.reply(transport, &ReplyLine::UNRECOGNIZED).await,
        };
        if self.tls.is_some() {
            return self.reply(transport, &ReplyLine::BAD_SEQUENCE).await;
        }
        if line.split_whitespace().count() != 1 {
            return self.reply(transport, &ReplyLine::BAD_SYNTAX).await;
        }

        info!("starting TLS handshake");
        self.reply(transport, &ReplyLine::START_TLS).await?;
        Ok(Flow::StartTls(acceptor))
    }

    /// Swaps `transport` for its TLS-wrapped form. The client has to greet
    /// again afterwards, since the capabilities have changed.
    pub async fn start_tls(
        &mut self,
        transport: Transport,
        acceptor: &TlsAcceptor,
    ) -> Result<Transport, SessionError> {
        let (transport, info) = transport.upgrade(acceptor).await?;
        info!(transport = %info, "TLS connection done");

        self.tls = Some(info);
        self.state = State::New;
        self.reset_transaction();
        Ok(transport)
    }

    async fn do_auth(&mut self, line: &str, transport: &mut Transport) -> Result<Flow, SessionError> {
        if self.tls.is_none() {
            return self.reply(transport, &ReplyLine::BAD_SEQUENCE).await;
        }
        if self.authenticated.is_some() {
            return self.reply(transport, &ReplyLine::ALREADY_AUTHENTICATED).await;
        }

        let mut args = line.split_whitespace().skip(1);
        let Some(mechanism) = args.next() else {
            return self.reply(transport, &ReplyLine::BAD_SYNTAX).await;
        };
        if !mechanism.eq_ignore_ascii_case("PLAIN") {
            return self.reply(transport, &ReplyLine::UNKNOWN_MECHANISM).await;
        }
        let initial = args.next().map(str::to_string);
        if args.next().is_some() {
            return self.reply(transport, &ReplyLine::BAD_SYNTAX).await;
        }

        let payload = match initial {
            // "=" is an explicitly empty initial response.
            Some(payload) if payload == "=" => String::new(),
            Some(payload) => payload,
            None => {
                self.reply(transport, &ReplyLine::AUTH_CONTINUE).await?;
                match self.read_line(transport).await? {
                    Some(payload) => payload,
                    None => return Ok(Flow::Closed),
                }
            }
        };
        if payload.trim() == "*" {
            return self.reply(transport, &ReplyLine::AUTH_CANCELLED).await;
        }

        let creds = match decode_plain(&payload) {
            Ok(creds) => creds,
            Err(e) => {
                warn!(error = %e, "bad AUTH PLAIN response");
                return self.reply(transport, &ReplyLine::BAD_SYNTAX).await;
            }
        };

        let accepted = self
            .server
            .authenticate(&creds.authorization, &creds.authentication, &creds.password)
            .await;
        if !accepted {
            warn!(authc = %creds.authentication, "failed to authenticate");
            return self.reply(transport, &ReplyLine::AUTH_FAILED).await;
        }

        info!(authz = %creds.authorization, authc = %creds.authentication, "authenticated");
        self.authenticated = Some(creds.authentication);
        self.reply(transport, &ReplyLine::AUTH_OK).await
    }

    async fn do_mail(&mut self, line: &str, transport: &mut Transport) -> Result<Flow, SessionError> {
        let from = match parse_path(line, "MAIL FROM:") {
            Ok(from) => from,
            Err(e) => {
                debug!(error = %e, "bad MAIL path");
                return self.reply(transport, &e.into()).await;
            }
        };

        // A sender in one of our domains must be the authenticated user's
        // domain; anything else is ordinary inbound mail.
        let delivery = if self.server.verify_address(&from).await == ReplyLine::OK {
            let auth_domain = self.authenticated.as_deref().and_then(domain_of);
            if auth_domain.as_deref() != Some(from.domain.as_str()) {
                warn!(address = %from, authc = ?self.authenticated, "relay attempt without matching authentication");
                return self.reply(transport, &ReplyLine::NOT_AUTHENTICATED).await;
            }
            Delivery::Outbound
        } else {
            Delivery::Inbound
        };

        info!(address = %from, %delivery, "mail from");
        self.mail_from = Some(from);
        self.delivery = delivery;
        self.state = State::Mail;
        self.reply(transport, &ReplyLine::OK).await
    }

    async fn do_rcpt(&mut self, line: &str, transport: &mut Transport) -> Result<Flow, SessionError> {
        let to = match parse_path(line, "RCPT TO:") {
            Ok(to) => to,
            Err(e) => {
                debug!(error = %e, "bad RCPT path");
                return self.reply(transport, &e.into()).await;
            }
        };

        if self.delivery == Delivery::Inbound {
            let reply = self.server.verify_address(&to).await;
            if reply != ReplyLine::OK {
                warn!(address = %to, %reply, "invalid address");
                return self.reply(transport, &reply).await;
            }
        }

        info!(address = %to, delivery = %self.delivery, "rcpt to");
        self.rcpt_to.push(to);
        self.state = State::Recipient;
        self.reply(transport, &ReplyLine::OK).await
    }

    async fn do_data(&mut self, line: &str, transport: &mut Transport) -> Result<Flow, SessionError> {
        if line.split_whitespace().count() != 1 {
            return self.reply(transport, &ReplyLine::BAD_SYNTAX).await;
        }
        let Some(mail_from) = self.mail_from.clone() else {
            return self.reply(transport, &ReplyLine::BAD_SEQUENCE).await;
        };

        self.reply(transport, &ReplyLine::START_MAIL_INPUT).await?;

        self.state = State::Data;
        let body = transport.read_body(self.config.max_message_size).await;
        self.state = State::Recipient;

        let data = match body {
            Ok(Body::Complete(data)) => data,
            Ok(Body::TooLarge) => {
                warn!(max = self.config.max_message_size, "message too large");
                return self.reply(transport, &ReplyLine::MESSAGE_TOO_LARGE).await;
            }
            Err(e) => {
                error!(error = %e, "failed to read message body");
                let _ = transport.write_reply(&ReplyLine::TRANSACTION_FAILED).await;
                return Err(e);
            }
        };

        let received: DateTime<FixedOffset> = Local::now().into();
        let mut envelope = Envelope {
            remote_addr: self.remote_addr,
            helo: self.helo.clone(),
            mail_from,
            rcpt_to: self.rcpt_to.clone(),
            received,
            id: envelope_id("m", &received),
            data,
        };

        if self.delivery == Delivery::Outbound {
            self.apply_send_as(&mut envelope);
        }

        info!(
            bytes = envelope.data_size(),
            id = %envelope.id,
            delivery = %self.delivery,
            "received message"
        );

        let remote_host = self
            .server
            .resolve_reverse_host(self.remote_addr.ip())
            .await;
        let trace = received_header(
            &TraceContext {
                server_name: self.server.name(),
                remote_host: &remote_host,
                esmtp: self.esmtp,
                tls: self.tls.as_ref(),
            },
            &envelope,
        );
        let mut data = trace.into_bytes();
        data.append(&mut envelope.data);
        envelope.data = data;

        let id = envelope.id.clone();
        match self.delivery {
            Delivery::Inbound => {
                if let Some(reply) = self.server.deliver_message(envelope).await {
                    // The transaction stays open; the client may retry DATA or RSET.
                    warn!(%id, %reply, "message was rejected");
                    return self.reply(transport, &reply).await;
                }
            }
            Delivery::Outbound => self.server.relay_message(envelope).await,
            Delivery::Unknown => {
                error!(%id, "no delivery decided for transaction");
                return self.reply(transport, &ReplyLine::TRANSACTION_FAILED).await;
            }
        }

        self.reset_transaction();
        self.state = State::Initial;
        self.reply(transport, &ReplyLine::OK).await
    }

    fn apply_send_as(&self, envelope: &mut Envelope) {
        let Some(domain) = self.authenticated.as_deref().and_then(domain_of) else {
            return;
        };

        match sendas::apply(&envelope.data, &domain) {
            Ok(Some((data, address))) => {
                info!(%address, "handling send-as");
                envelope.data = data;
                envelope.mail_from = address;
            }
            Ok(None) => {}
            Err(e) => error!(error = %e, "send-as: message left unmodified"),
        }
    }

    async fn do_rset(&mut self, transport: &mut Transport) -> Result<Flow, SessionError> {
        debug!("reset");
        self.reset_transaction();
        self.state = State::Initial;
        self.reply(transport, &ReplyLine::OK).await
    }
}
