use std::path::PathBuf;
use std::time::Duration;

use structopt::StructOpt;

/// Largest message accepted by DATA, advertised as `SIZE`.
pub const MAX_MESSAGE_SIZE: usize = 40_960_000;

/// Longest command line, excluding CRLF. Leaves room for AUTH PLAIN payloads.
pub const MAX_LINE_LENGTH: usize = 4096;

#[derive(Debug, StructOpt, Clone)]
#[structopt(
    name = "mailhop",
    about = "An SMTP server for personal domains: inbound delivery and authenticated relay",
    author = "2026, Philippe TEMESI <https://www.tems.be>",
    version = "0.1.0"
)]
pub struct Opt {
    /// Listening ports (can be specified multiple times, default: 25)
    #[structopt(short = "p", long = "port", default_value = "25", number_of_values = 1)]
    pub ports: Vec<u16>,

    /// Listening address (default: 0.0.0.0)
    #[structopt(short = "a", long = "address", default_value = "0.0.0.0")]
    pub address: String,

    /// Server name used in the greeting and in Received headers
    #[structopt(long = "name", default_value = "localhost")]
    pub name: String,

    /// Domain(s) served locally (can be specified multiple times, required)
    #[structopt(long = "domain", required = true, number_of_values = 1)]
    pub domains: Vec<String>,

    /// Mailbox(es) that exist (e.g., user@domain.com). A domain without any
    /// listed mailbox accepts every local part.
    #[structopt(long = "mailbox", number_of_values = 1)]
    pub mailboxes: Vec<String>,

    /// File of `address:password` lines for AUTH PLAIN
    #[structopt(long = "users", parse(from_os_str))]
    pub users_file: Option<PathBuf>,

    /// Directory where inbound messages are delivered
    #[structopt(long = "data", parse(from_os_str))]
    pub data_dir: Option<PathBuf>,

    /// Directory where relayed messages are spooled for the outbound transport
    #[structopt(long = "relay-spool", parse(from_os_str))]
    pub relay_spool: Option<PathBuf>,

    /// TLS certificate file (enables STARTTLS)
    #[structopt(long = "tls-cert", parse(from_os_str))]
    pub tls_cert: Option<PathBuf>,

    /// TLS private key file
    #[structopt(long = "tls-key", parse(from_os_str))]
    pub tls_key: Option<PathBuf>,

    /// Maximum connections per minute from same IP (default: 10)
    #[structopt(long = "max-connections", default_value = "10")]
    pub max_connections_per_minute: usize,

    /// Seconds to wait on any single read or write (default: 300)
    #[structopt(long = "timeout", default_value = "300")]
    pub timeout_secs: u64,

    /// Log file path
    #[structopt(long = "logs", parse(from_os_str))]
    pub log_file: Option<PathBuf>,

    /// Verbose mode - log every reply
    #[structopt(short = "v", long = "verbose")]
    pub verbose: bool,
}

/// Per-session limits.
#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    pub max_message_size: usize,
    pub max_line_length: usize,
    /// Deadline for each read and write on the connection.
    pub timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_message_size: MAX_MESSAGE_SIZE,
            max_line_length: MAX_LINE_LENGTH,
            timeout: Duration::from_secs(300),
        }
    }
}

impl From<&Opt> for SessionConfig {
    fn from(opt: &Opt) -> Self {
        Self {
            timeout: Duration::from_secs(opt.timeout_secs),
            ..Self::default()
        }
    }
}
