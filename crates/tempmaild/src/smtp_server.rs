use crate::dispatch::Dispatcher;
use crate::resolver::RecipientResolver;
use crate::storage::{MailStore, Notifier, ResolvedRecipient};
use admission::ConnectionGate;
use anyhow::{anyhow, Context};
use serde::Deserialize;
use std::fmt::Debug;
use std::sync::Arc;
use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, BufWriter, ReadHalf,
    WriteHalf,
};
use tokio::net::TcpListener;
use tracing::{debug, error, info};

/// Hard ceiling on a DATA payload. Input beyond this is discarded and
/// the message is parsed only up to the ceiling; the transaction is
/// not rejected.
pub const MAX_DATA_SIZE: usize = 10 * 1024 * 1024;

#[derive(Deserialize, Clone, Debug)]
pub struct SmtpListenerParams {
    #[serde(default = "SmtpListenerParams::default_listen")]
    pub listen: String,

    #[serde(default = "SmtpListenerParams::default_hostname")]
    pub hostname: String,

    #[serde(default = "SmtpListenerParams::default_max_connections")]
    pub max_connections: usize,

    /// Accepted connections per second; also the burst capacity
    #[serde(default = "SmtpListenerParams::default_max_connection_rate")]
    pub max_connection_rate: u32,
}

impl SmtpListenerParams {
    fn default_listen() -> String {
        "127.0.0.1:2525".to_string()
    }

    pub fn default_hostname() -> String {
        gethostname::gethostname()
            .to_str()
            .unwrap_or("localhost")
            .to_string()
    }

    fn default_max_connections() -> usize {
        512
    }

    fn default_max_connection_rate() -> u32 {
        64
    }

    pub async fn run(
        self,
        store: Arc<dyn MailStore>,
        notifier: Arc<dyn Notifier>,
    ) -> anyhow::Result<()> {
        let gate = Arc::new(ConnectionGate::new(
            self.max_connections,
            self.max_connection_rate,
        ));
        let listener = TcpListener::bind(&self.listen)
            .await
            .with_context(|| format!("listen on {}", self.listen))?;
        info!("smtp listener on {}", self.listen);

        loop {
            // Transient accept failures (eg: EMFILE under load) must
            // not take the whole listener down
            let (socket, peer) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(err) => {
                    error!("accept failed: {err:#}");
                    continue;
                }
            };
            let Some(slot) = gate.acquire_slot() else {
                // Silent backpressure: refuse at the transport layer
                debug!("admission rejected connection from {peer:?}");
                drop(socket);
                continue;
            };
            debug!(
                "connection from {peer:?}, {} now in flight",
                gate.current()
            );

            let store = Arc::clone(&store);
            let notifier = Arc::clone(&notifier);
            let hostname = self.hostname.clone();
            tokio::spawn(async move {
                // The slot is returned when this task ends, even by panic
                let _slot = slot;
                if let Err(err) = SmtpServer::run(socket, hostname, store, notifier).await {
                    error!("error in SmtpServer for {peer:?}: {err:#}");
                }
            });
        }
    }
}

pub struct SmtpServer<T> {
    reader: BufReader<ReadHalf<T>>,
    writer: BufWriter<WriteHalf<T>>,
    state: Option<TransactionState>,
    said_hello: Option<String>,
    hostname: String,
    resolver: RecipientResolver,
    dispatcher: Dispatcher,
}

#[derive(Debug)]
struct TransactionState {
    sender: String,
    recipients: Vec<ResolvedRecipient>,
}

impl<T: AsyncRead + AsyncWrite + Debug + Send + 'static> SmtpServer<T> {
    /// Drive one connection to completion. The session owns all of its
    /// state; nothing here is shared with other connections.
    pub async fn run(
        socket: T,
        hostname: String,
        store: Arc<dyn MailStore>,
        notifier: Arc<dyn Notifier>,
    ) -> anyhow::Result<()> {
        let (reader, writer) = tokio::io::split(socket);
        let mut server = SmtpServer {
            reader: BufReader::new(reader),
            writer: BufWriter::new(writer),
            state: None,
            said_hello: None,
            hostname,
            resolver: RecipientResolver::new(Arc::clone(&store)),
            dispatcher: Dispatcher::new(store, notifier),
        };

        if let Err(err) = server.process().await {
            server
                .write_response(421, "technical difficulties")
                .await
                .ok();
            return Err(err);
        }
        Ok(())
    }

    async fn write_response<S: AsRef<str>>(
        &mut self,
        status: u16,
        message: S,
    ) -> anyhow::Result<()> {
        let mut lines = message.as_ref().lines().peekable();
        while let Some(line) = lines.next() {
            let is_last = lines.peek().is_none();
            let sep = if is_last { ' ' } else { '-' };
            let text = format!("{status}{sep}{line}\r\n");
            self.writer.write_all(text.as_bytes()).await?;
        }
        self.writer.flush().await?;
        Ok(())
    }

    /// Read one command line; None means the peer closed the connection.
    async fn read_line(&mut self) -> anyhow::Result<Option<String>> {
        let mut line = String::new();
        let n = self.reader.read_line(&mut line).await?;
        if n == 0 {
            return Ok(None);
        }
        Ok(Some(line))
    }

    /// Read the DATA payload up to the end-of-data marker, unstuffing
    /// leading dots. Accumulation stops at [`MAX_DATA_SIZE`] but the
    /// stream is still drained to the marker. The line buffer is also
    /// capped at what the data budget can still absorb, so a payload
    /// with no line breaks cannot grow memory without bound. None
    /// means the peer went away mid-body.
    async fn read_data(&mut self) -> anyhow::Result<Option<Vec<u8>>> {
        let mut data: Vec<u8> = vec![];
        let mut line: Vec<u8> = vec![];

        loop {
            let buf = self.reader.fill_buf().await?;
            if buf.is_empty() {
                return Ok(None);
            }

            let (chunk, complete_line) = match memchr::memchr(b'\n', buf) {
                Some(pos) => (&buf[..=pos], true),
                None => (buf, false),
            };

            // +3 covers a stuffed dot plus the trailing CRLF; bytes
            // past the cap are dropped while we keep scanning for the
            // newline
            let cap = MAX_DATA_SIZE.saturating_sub(data.len()) + 3;
            let room = cap.saturating_sub(line.len());
            line.extend_from_slice(&chunk[..chunk.len().min(room)]);

            let consumed = chunk.len();
            self.reader.consume(consumed);

            if !complete_line {
                continue;
            }

            if line == b".\r\n" || line == b".\n" {
                break;
            }

            let stripped = if line.starts_with(b".") {
                &line[1..]
            } else {
                &line[..]
            };
            let remaining = MAX_DATA_SIZE.saturating_sub(data.len());
            data.extend_from_slice(&stripped[..stripped.len().min(remaining)]);
            line.clear();
        }

        Ok(Some(data))
    }

    async fn process(&mut self) -> anyhow::Result<()> {
        self.write_response(220, format!("{} ESMTP service ready", self.hostname))
            .await?;
        loop {
            let Some(line) = self.read_line().await? else {
                return Ok(());
            };
            let line = line.trim_end();

            match Command::parse(line) {
                Command::Quit => {
                    self.write_response(221, format!("{} closing connection", self.hostname))
                        .await?;
                    return Ok(());
                }
                Command::Ehlo(domain) | Command::Helo(domain) => {
                    self.write_response(250, format!("{} Hello {domain}", self.hostname))
                        .await?;
                    self.said_hello.replace(domain);
                }
                Command::Auth(_mechanism) => {
                    // This server only ever receives; anonymous senders
                    // are accepted and AUTH is a no-op.
                    self.write_response(235, "2.7.0 authentication accepted")
                        .await?;
                }
                Command::Mail(address) => {
                    // A fresh MAIL FROM implicitly abandons any prior
                    // transaction. The sender is external and recorded
                    // verbatim, never checked against managed domains.
                    self.state.replace(TransactionState {
                        sender: address.clone(),
                        recipients: vec![],
                    });
                    self.write_response(250, format!("OK sender <{address}>"))
                        .await?;
                }
                Command::Rcpt(address) => {
                    if self.state.is_none() {
                        self.write_response(503, "MAIL FROM must be issued first")
                            .await?;
                        continue;
                    }
                    match self.resolver.resolve(&address).await? {
                        Ok(recipient) => {
                            self.write_response(250, format!("OK recipient <{}>", recipient.address))
                                .await?;
                            if let Some(state) = &mut self.state {
                                state.recipients.push(recipient);
                            }
                        }
                        Err(rejection) => {
                            self.write_response(rejection.code(), rejection.to_string())
                                .await?;
                        }
                    }
                }
                Command::Data => {
                    if self.state.is_none() {
                        self.write_response(503, "MAIL FROM must be issued first")
                            .await?;
                        continue;
                    }
                    self.write_response(354, "Send body; end with CRLF.CRLF")
                        .await?;

                    let Some(data) = self.read_data().await? else {
                        return Ok(());
                    };
                    let state = self
                        .state
                        .take()
                        .ok_or_else(|| anyhow!("transaction state is impossibly not set!?"))?;

                    let parsed = match mailextract::parse_email(&data) {
                        Ok(parsed) => parsed,
                        Err(err) => {
                            // The whole transaction fails; nothing is
                            // dispatched for any recipient.
                            debug!("unparsable DATA payload from {}: {err:#}", state.sender);
                            self.write_response(554, format!("5.6.0 message content rejected: {err}"))
                                .await?;
                            continue;
                        }
                    };

                    let raw = Arc::new(data.into_boxed_slice());
                    let outcome = self
                        .dispatcher
                        .dispatch(&state.sender, &state.recipients, &parsed, &raw)
                        .await;
                    info!(
                        "message from {} via {}: {} delivered, {} failed",
                        state.sender,
                        self.said_hello.as_deref().unwrap_or("(no helo)"),
                        outcome.delivered.len(),
                        outcome.failed
                    );

                    if outcome.failed > 0 {
                        self.write_response(
                            451,
                            "4.3.0 error storing message for one or more recipients",
                        )
                        .await?;
                    } else {
                        let ids: Vec<&str> =
                            outcome.delivered.iter().map(|m| m.id.as_str()).collect();
                        self.write_response(250, format!("OK ids={}", ids.join(" ")))
                            .await?;
                    }
                }
                Command::Rset => {
                    self.state.take();
                    self.write_response(250, "Reset state").await?;
                }
                Command::Noop => {
                    self.write_response(250, "OK").await?;
                }
                Command::Unknown(cmd) => {
                    self.write_response(502, format!("Command unrecognized/unimplemented: {cmd}"))
                        .await?;
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Command {
    Ehlo(String),
    Helo(String),
    Mail(String),
    Rcpt(String),
    Auth(String),
    Data,
    Rset,
    Noop,
    Quit,
    Unknown(String),
}

impl Command {
    /// Lenient parse: the address inside MAIL/RCPT envelopes is
    /// extracted as-is and validated by the resolver, so that a bad
    /// address yields the proper `501 5.1.3` rather than a generic
    /// syntax error.
    fn parse(line: &str) -> Self {
        fn prefix_match(line: &str, candidate: &str) -> bool {
            if line.len() < candidate.len() {
                false
            } else {
                line[..candidate.len()].eq_ignore_ascii_case(candidate)
            }
        }

        fn extract_envelope(line: &str) -> &str {
            let line = line.trim_start();
            if let Some(rest) = line.strip_prefix('<') {
                match rest.find('>') {
                    Some(pos) => &rest[..pos],
                    // Unbalanced bracket; let the resolver reject it
                    None => line,
                }
            } else {
                // Tolerate a missing bracket pair; parameters after the
                // address are ignored
                line.split_whitespace().next().unwrap_or("")
            }
        }

        if line.eq_ignore_ascii_case("QUIT") {
            Self::Quit
        } else if line.eq_ignore_ascii_case("DATA") {
            Self::Data
        } else if line.eq_ignore_ascii_case("RSET") {
            Self::Rset
        } else if line.eq_ignore_ascii_case("NOOP") {
            Self::Noop
        } else if prefix_match(line, "EHLO ") {
            Self::Ehlo(line[5..].trim().to_string())
        } else if prefix_match(line, "HELO ") {
            Self::Helo(line[5..].trim().to_string())
        } else if prefix_match(line, "AUTH ") {
            Self::Auth(line[5..].trim().to_string())
        } else if prefix_match(line, "MAIL FROM:") {
            Self::Mail(extract_envelope(&line[10..]).to_string())
        } else if prefix_match(line, "RCPT TO:") {
            Self::Rcpt(extract_envelope(&line[8..]).to_string())
        } else {
            Self::Unknown(line.to_string())
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::memory_store::MemoryStore;
    use crate::storage::{AliasEntry, MailboxId, NewMessage, StoredMessage};
    use async_trait::async_trait;
    use k9::assert_equal;
    use tokio::io::DuplexStream;

    #[test]
    fn command_parser() {
        assert_equal!(Command::parse("QUIT"), Command::Quit);
        assert_equal!(Command::parse("quit"), Command::Quit);
        assert_equal!(
            Command::parse("quite"),
            Command::Unknown("quite".to_string())
        );
        assert_equal!(
            Command::parse("MAIL From:<>"),
            Command::Mail("".to_string())
        );
        assert_equal!(
            Command::parse("MAIL FROM:<user@example.com>"),
            Command::Mail("user@example.com".to_string())
        );
        assert_equal!(
            Command::parse("rcpt TO:<User@Example.Com>"),
            Command::Rcpt("User@Example.Com".to_string())
        );
        assert_equal!(
            Command::parse("RCPT TO: bare@example.com"),
            Command::Rcpt("bare@example.com".to_string())
        );
        assert_equal!(
            Command::parse("AUTH PLAIN AGZvbwBiYXI="),
            Command::Auth("PLAIN AGZvbwBiYXI=".to_string())
        );
        assert_equal!(Command::parse("EHLO there"), Command::Ehlo("there".to_string()));
    }

    struct TestClient {
        io: BufReader<DuplexStream>,
    }

    impl TestClient {
        /// Start a session over an in-memory pipe and consume the
        /// greeting.
        async fn connect(store: Arc<dyn MailStore>, notifier: Arc<dyn Notifier>) -> Self {
            let (client, server) = tokio::io::duplex(256 * 1024);
            tokio::spawn(async move {
                SmtpServer::run(server, "mx.test.example".to_string(), store, notifier)
                    .await
                    .ok();
            });
            let mut client = Self {
                io: BufReader::new(client),
            };
            let greeting = client.read_reply().await;
            assert!(greeting.starts_with("220 "), "greeting was {greeting:?}");
            client
        }

        async fn read_reply(&mut self) -> String {
            let mut line = String::new();
            self.io.read_line(&mut line).await.unwrap();
            line.trim_end().to_string()
        }

        async fn send_line(&mut self, line: &str) {
            self.io
                .get_mut()
                .write_all(format!("{line}\r\n").as_bytes())
                .await
                .unwrap();
        }

        async fn send_raw(&mut self, bytes: &[u8]) {
            self.io.get_mut().write_all(bytes).await.unwrap();
        }

        async fn cmd(&mut self, line: &str) -> String {
            self.send_line(line).await;
            self.read_reply().await
        }
    }

    struct NullNotifier;

    #[async_trait]
    impl Notifier for NullNotifier {
        async fn notify_new_message(
            &self,
            _mailbox_id: &MailboxId,
            _message: &StoredMessage,
        ) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn notifier() -> Arc<dyn Notifier> {
        Arc::new(NullNotifier)
    }

    fn store_with_mailbox() -> (Arc<MemoryStore>, MailboxId) {
        let store = Arc::new(MemoryStore::default());
        store.add_system_domain("managed.example");
        let id = store.add_mailbox("user@managed.example");
        (store, id)
    }

    #[tokio::test]
    async fn rejections_use_distinct_codes() {
        let (store, _id) = store_with_mailbox();
        let mut client = TestClient::connect(store, notifier()).await;

        let reply = client.cmd("MAIL FROM:<someone@outside.example>").await;
        assert!(reply.starts_with("250 "), "{reply:?}");

        assert_equal!(
            client.cmd("RCPT TO:<user@unmanaged.example>").await,
            "550 5.7.1 relay access denied - domain not managed by this server"
        );
        assert_equal!(
            client.cmd("RCPT TO:<ghost@managed.example>").await,
            "550 5.1.1 recipient mailbox not found"
        );
        assert_equal!(
            client.cmd("RCPT TO:<not-an-address>").await,
            "501 5.1.3 invalid address syntax"
        );
        let reply = client.cmd("RCPT TO:<user@managed.example>").await;
        assert!(reply.starts_with("250 "), "{reply:?}");
    }

    #[tokio::test]
    async fn rcpt_requires_mail_from() {
        let (store, _id) = store_with_mailbox();
        let mut client = TestClient::connect(store, notifier()).await;

        let reply = client.cmd("RCPT TO:<user@managed.example>").await;
        assert!(reply.starts_with("503 "), "{reply:?}");
    }

    #[tokio::test]
    async fn full_transaction_delivers_and_parses() {
        let (store, id) = store_with_mailbox();
        let mut client = TestClient::connect(store.clone(), notifier()).await;

        assert!(client.cmd("EHLO client.example").await.starts_with("250 "));
        assert!(client.cmd("AUTH PLAIN AGZvbwBiYXI=").await.starts_with("235 "));
        assert!(client
            .cmd("MAIL FROM:<someone@outside.example>")
            .await
            .starts_with("250 "));
        assert!(client
            .cmd("RCPT TO:<user@managed.example>")
            .await
            .starts_with("250 "));

        let reply = client.cmd("DATA").await;
        assert!(reply.starts_with("354 "), "{reply:?}");

        client.send_line("Subject: =?UTF-8?Q?caf=C3=A9?=").await;
        client.send_line("From: someone@outside.example").await;
        client.send_line("").await;
        client.send_line("Hello mailbox!").await;
        client.send_line("..a dot-stuffed line").await;
        let reply = client.cmd(".").await;
        assert!(reply.starts_with("250 OK ids="), "{reply:?}");

        assert!(client.cmd("QUIT").await.starts_with("221 "));

        let records = store.messages();
        assert_equal!(records.len(), 1);
        let record = &records[0];
        assert_equal!(record.message.mailbox_id, id);
        assert_equal!(record.message.sender.as_str(), "someone@outside.example");
        assert_equal!(record.message.recipient.as_str(), "user@managed.example");
        assert_equal!(record.message.subject.as_str(), "café");
        assert!(record.message.unread);
        assert_equal!(
            record.text_body.as_str(),
            "Hello mailbox!\r\n.a dot-stuffed line\r\n"
        );
    }

    #[tokio::test]
    async fn alias_recipient_keeps_alias_envelope_address() {
        let (store, id) = store_with_mailbox();
        store
            .add_alias("extra@managed.example", "user@managed.example", true)
            .unwrap();
        let mut client = TestClient::connect(store.clone(), notifier()).await;

        client.cmd("MAIL FROM:<x@y.example>").await;
        assert!(client
            .cmd("RCPT TO:<extra@managed.example>")
            .await
            .starts_with("250 "));
        client.cmd("DATA").await;
        client.send_line("Subject: via alias").await;
        client.send_line("").await;
        client.send_line("body").await;
        client.cmd(".").await;

        let records = store.messages();
        assert_equal!(records[0].message.recipient.as_str(), "extra@managed.example");
        assert_equal!(records[0].message.mailbox_id, id);
    }

    #[tokio::test]
    async fn missing_boundary_fails_whole_transaction() {
        let (store, _id) = store_with_mailbox();
        let mut client = TestClient::connect(store.clone(), notifier()).await;

        client.cmd("MAIL FROM:<x@y.example>").await;
        client.cmd("RCPT TO:<user@managed.example>").await;
        client.cmd("DATA").await;
        client.send_line("Content-Type: multipart/mixed").await;
        client.send_line("").await;
        client.send_line("--nope").await;
        let reply = client.cmd(".").await;
        assert!(reply.starts_with("554 5.6.0"), "{reply:?}");

        assert!(store.messages().is_empty());
    }

    #[tokio::test]
    async fn partial_dispatch_failure_reports_error_but_keeps_successes() {
        struct FailSecond {
            inner: Arc<MemoryStore>,
        }

        #[async_trait]
        impl MailStore for FailSecond {
            async fn mailbox_by_address(
                &self,
                address: &str,
            ) -> anyhow::Result<Option<MailboxId>> {
                self.inner.mailbox_by_address(address).await
            }
            async fn alias_by_address(&self, address: &str) -> anyhow::Result<Option<AliasEntry>> {
                self.inner.alias_by_address(address).await
            }
            async fn system_domain_is_managed(&self, domain: &str) -> anyhow::Result<bool> {
                self.inner.system_domain_is_managed(domain).await
            }
            async fn user_domain_is_managed(&self, domain: &str) -> anyhow::Result<bool> {
                self.inner.user_domain_is_managed(domain).await
            }
            async fn create_message(&self, message: NewMessage) -> anyhow::Result<StoredMessage> {
                if message.recipient == "b@managed.example" {
                    anyhow::bail!("simulated outage");
                }
                self.inner.create_message(message).await
            }
        }

        let memory = Arc::new(MemoryStore::default());
        memory.add_system_domain("managed.example");
        for address in ["a@managed.example", "b@managed.example", "c@managed.example"] {
            memory.add_mailbox(address);
        }
        let store = Arc::new(FailSecond {
            inner: Arc::clone(&memory),
        });

        let mut client = TestClient::connect(store, notifier()).await;
        client.cmd("MAIL FROM:<x@y.example>").await;
        for address in ["a@managed.example", "b@managed.example", "c@managed.example"] {
            assert!(client
                .cmd(&format!("RCPT TO:<{address}>"))
                .await
                .starts_with("250 "));
        }
        client.cmd("DATA").await;
        client.send_line("Subject: fan out").await;
        client.send_line("").await;
        client.send_line("same for everyone").await;
        let reply = client.cmd(".").await;
        assert!(reply.starts_with("451 4.3.0"), "{reply:?}");

        let recipients: Vec<String> = memory
            .messages()
            .iter()
            .map(|record| record.message.recipient.clone())
            .collect();
        assert_equal!(
            recipients,
            vec!["a@managed.example".to_string(), "c@managed.example".to_string()]
        );
    }

    #[tokio::test]
    async fn rset_clears_the_transaction() {
        let (store, _id) = store_with_mailbox();
        let mut client = TestClient::connect(store.clone(), notifier()).await;

        client.cmd("MAIL FROM:<x@y.example>").await;
        client.cmd("RCPT TO:<user@managed.example>").await;
        assert!(client.cmd("RSET").await.starts_with("250 "));

        // Back to Idle: DATA now needs a fresh MAIL FROM
        let reply = client.cmd("DATA").await;
        assert!(reply.starts_with("503 "), "{reply:?}");
        assert!(store.messages().is_empty());
    }

    #[tokio::test]
    async fn fresh_mail_from_abandons_prior_recipients() {
        let (store, _id) = store_with_mailbox();
        let mut client = TestClient::connect(store.clone(), notifier()).await;

        client.cmd("MAIL FROM:<first@y.example>").await;
        client.cmd("RCPT TO:<user@managed.example>").await;
        client.cmd("MAIL FROM:<second@y.example>").await;

        client.cmd("DATA").await;
        client.send_line("Subject: nobody gets this").await;
        client.send_line("").await;
        client.send_line("body").await;
        let reply = client.cmd(".").await;
        // Zero recipients: the DATA phase is a no-op that still succeeds
        assert!(reply.starts_with("250 OK ids="), "{reply:?}");
        assert!(store.messages().is_empty());
    }

    #[tokio::test]
    async fn oversized_data_is_truncated_not_rejected() {
        let (store, _id) = store_with_mailbox();
        let mut client = TestClient::connect(store.clone(), notifier()).await;

        client.cmd("MAIL FROM:<x@y.example>").await;
        client.cmd("RCPT TO:<user@managed.example>").await;
        client.cmd("DATA").await;

        // Push ~11 MiB of body without a header block; everything past
        // the 10 MiB ceiling must be discarded.
        let chunk = "a".repeat(1022);
        for _ in 0..(11 * 1024) {
            client.send_line(&chunk).await;
        }
        let reply = client.cmd(".").await;
        assert!(reply.starts_with("250 OK ids="), "{reply:?}");

        let records = store.messages();
        assert_equal!(records[0].text_body.len(), MAX_DATA_SIZE);
    }

    #[tokio::test]
    async fn single_line_with_no_newline_is_still_capped() {
        let (store, _id) = store_with_mailbox();
        let mut client = TestClient::connect(store.clone(), notifier()).await;

        client.cmd("MAIL FROM:<x@y.example>").await;
        client.cmd("RCPT TO:<user@managed.example>").await;
        client.cmd("DATA").await;

        // 11 MiB of body with not a single line break; only the first
        // 10 MiB may be retained
        let chunk = vec![b'a'; 64 * 1024];
        for _ in 0..(11 * 16) {
            client.send_raw(&chunk).await;
        }
        client.send_raw(b"\r\n").await;
        let reply = client.cmd(".").await;
        assert!(reply.starts_with("250 OK ids="), "{reply:?}");

        let records = store.messages();
        assert_equal!(records[0].text_body.len(), MAX_DATA_SIZE);
    }

    #[tokio::test]
    async fn unknown_commands_and_noop() {
        let (store, _id) = store_with_mailbox();
        let mut client = TestClient::connect(store, notifier()).await;

        assert!(client.cmd("NOOP").await.starts_with("250 "));
        assert!(client.cmd("FLIBBLE").await.starts_with("502 "));
    }
}
