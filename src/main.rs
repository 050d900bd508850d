use std::sync::Arc;

use anyhow::{Context, Result};
use structopt::StructOpt;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use mailhop::{Gateway, Opt};

/// Logs to stderr, or to `--logs` when given. The guard must outlive the
/// server so buffered lines are flushed.
fn init_logging(opt: &Opt) -> Result<Option<WorkerGuard>> {
    let default = if opt.verbose { "mailhop=debug" } else { "mailhop=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let Some(log_path) = &opt.log_file else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
        return Ok(None);
    };

    let dir = match log_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => std::path::PathBuf::from("."),
    };
    if !dir.exists() {
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create log directory: {:?}", dir))?;
    }
    let file_name = log_path
        .file_name()
        .with_context(|| format!("Invalid log file path: {:?}", log_path))?;

    let appender = tracing_appender::rolling::never(&dir, file_name);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .with_writer(writer)
        .init();
    Ok(Some(guard))
}

#[tokio::main]
async fn main() -> Result<()> {
    let opt = Opt::from_args();
    let _guard = init_logging(&opt)?;

    println!("==========================================");
    println!("mailhop v{}", env!("CARGO_PKG_VERSION"));
    println!("==========================================");

    let gateway = match Gateway::new(opt.clone()).await {
        Ok(gateway) => Arc::new(gateway),
        Err(e) => {
            eprintln!("[ERROR] Failed to start: {:#}", e);
            std::process::exit(1);
        }
    };

    println!("[INFO] PID: {}", std::process::id());
    println!("[INFO] Name: {}", opt.name);
    println!("[INFO] Ports: {:?}", opt.ports);
    println!("[INFO] Domains: {:?}", opt.domains);
    if !opt.mailboxes.is_empty() {
        println!("[INFO] Mailboxes: {:?}", opt.mailboxes);
    }
    if opt.tls_cert.is_some() {
        println!("[INFO] STARTTLS enabled");
    }
    println!(
        "[INFO] Max connections per minute per IP: {}",
        opt.max_connections_per_minute
    );
    println!("[INFO] Waiting for connections...");

    gateway.run().await
}
