use crate::memory_store::MemoryStore;
use crate::smtp_server::SmtpListenerParams;
use crate::storage::LogNotifier;
use anyhow::Context;
use clap::Parser;
use std::sync::Arc;
use tracing_subscriber::filter::EnvFilter;

mod dispatch;
mod memory_store;
mod resolver;
mod smtp_server;
mod storage;

/// Mail receiving daemon for disposable mailboxes, backed by an
/// in-memory store seeded from the command line.
#[derive(Debug, Parser)]
#[command(about, version)]
struct Opt {
    /// Address and port for the SMTP listener
    #[arg(long, default_value = "127.0.0.1:2525")]
    listen: String,

    /// Hostname to announce in the SMTP banner. Defaults to the
    /// system hostname.
    #[arg(long)]
    hostname: Option<String>,

    /// Ceiling on concurrently-open connections
    #[arg(long, default_value_t = 512)]
    max_connections: usize,

    /// Newly accepted connections per second, which is also the
    /// burst capacity
    #[arg(long, default_value_t = 64)]
    max_connection_rate: u32,

    /// Managed domain to accept mail for. May be repeated.
    #[arg(long = "domain")]
    domains: Vec<String>,

    /// Mailbox address to provision, e.g. `user@example.com`.
    /// May be repeated.
    #[arg(long = "mailbox")]
    mailboxes: Vec<String>,

    /// Alias to provision, as `alias-address=target-address`.
    /// May be repeated.
    #[arg(long = "alias")]
    aliases: Vec<String>,
}

impl Opt {
    fn seed_store(&self) -> anyhow::Result<Arc<MemoryStore>> {
        let store = Arc::new(MemoryStore::default());
        for domain in &self.domains {
            store.add_system_domain(domain);
        }
        for mailbox in &self.mailboxes {
            store.add_mailbox(mailbox);
        }
        for alias in &self.aliases {
            let (address, target) = alias
                .split_once('=')
                .with_context(|| format!("invalid --alias {alias}: expected ALIAS=TARGET"))?;
            store.add_alias(address, target, true)?;
        }
        Ok(store)
    }
}

async fn run(opts: Opt) -> anyhow::Result<()> {
    let store = opts.seed_store()?;
    let params = SmtpListenerParams {
        listen: opts.listen,
        hostname: opts
            .hostname
            .unwrap_or_else(SmtpListenerParams::default_hostname),
        max_connections: opts.max_connections,
        max_connection_rate: opts.max_connection_rate,
    };
    params.run(store, Arc::new(LogNotifier)).await
}

fn main() -> anyhow::Result<()> {
    let opts = Opt::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("tempmaild=info,admission=info")),
        )
        .init();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(run(opts))
}
