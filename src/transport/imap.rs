//! Minimal IMAP-over-TLS client: login, `SEARCH UNSEEN`, fetch, mark seen.
//!
//! Blocking; the mailbox transport runs it under `spawn_blocking`.

use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use mail_parser::MessageParser;
use secrecy::{ExposeSecret, SecretString};
use tracing::debug;

use super::{FetchedMessage, SNIPPET_LIMIT};
use crate::error::TransportError;
use crate::model::Account;

/// Connection settings for one mailbox.
#[derive(Debug, Clone)]
pub struct ImapSettings {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: SecretString,
    pub timeout: Duration,
}

impl ImapSettings {
    pub fn from_account(account: &Account, timeout: Duration) -> Self {
        Self {
            host: account.imap_host.clone(),
            port: account.imap_port,
            username: account.email.clone(),
            password: account.password.clone(),
            timeout,
        }
    }
}

/// One tagged command's response.
#[derive(Debug, Default)]
struct Response {
    lines: Vec<String>,
    literals: Vec<Vec<u8>>,
    ok: bool,
    status: String,
}

/// Line- and literal-aware IMAP client session over any byte stream.
struct Session<S> {
    stream: S,
    pending: Vec<u8>,
    next_tag: u32,
}

impl<S: Read + Write> Session<S> {
    fn new(stream: S) -> Self {
        Self {
            stream,
            pending: Vec::new(),
            next_tag: 1,
        }
    }

    fn fill(&mut self) -> Result<(), TransportError> {
        let mut chunk = [0u8; 4096];
        let n = self.stream.read(&mut chunk)?;
        if n == 0 {
            return Err(TransportError::Protocol("IMAP connection closed".into()));
        }
        self.pending.extend_from_slice(&chunk[..n]);
        Ok(())
    }

    /// Next line without its CRLF.
    fn read_line(&mut self) -> Result<String, TransportError> {
        loop {
            if let Some(pos) = self.pending.windows(2).position(|w| w == b"\r\n") {
                let line: Vec<u8> = self.pending.drain(..pos + 2).take(pos).collect();
                return Ok(String::from_utf8_lossy(&line).into_owned());
            }
            self.fill()?;
        }
    }

    fn read_bytes(&mut self, n: usize) -> Result<Vec<u8>, TransportError> {
        while self.pending.len() < n {
            self.fill()?;
        }
        Ok(self.pending.drain(..n).collect())
    }

    fn greeting(&mut self) -> Result<(), TransportError> {
        let line = self.read_line()?;
        if line.starts_with("* OK") || line.starts_with("* PREAUTH") {
            Ok(())
        } else {
            Err(TransportError::Protocol(format!("unexpected greeting: {line}")))
        }
    }

    fn command(&mut self, cmd: &str) -> Result<Response, TransportError> {
        let tag = format!("A{:03}", self.next_tag);
        self.next_tag += 1;
        self.stream.write_all(format!("{tag} {cmd}\r\n").as_bytes())?;
        self.stream.flush()?;

        let done_prefix = format!("{tag} ");
        let mut response = Response::default();
        loop {
            let line = self.read_line()?;
            if let Some(status) = line.strip_prefix(&done_prefix) {
                response.ok = status.starts_with("OK");
                response.status = status.to_string();
                return Ok(response);
            }
            if let Some(n) = literal_len(&line) {
                let bytes = self.read_bytes(n)?;
                response.literals.push(bytes);
            }
            response.lines.push(line);
        }
    }

    fn expect_ok(&mut self, cmd: &str, what: &str) -> Result<Response, TransportError> {
        let response = self.command(cmd)?;
        if !response.ok {
            return Err(TransportError::Protocol(format!(
                "{what} failed: {}",
                response.status
            )));
        }
        Ok(response)
    }
}

/// Length of a `{n}` literal announced at the end of `line`.
fn literal_len(line: &str) -> Option<usize> {
    let body = line.strip_suffix('}')?;
    let open = body.rfind('{')?;
    body[open + 1..].parse().ok()
}

/// Quote a string for an IMAP command.
fn quote(s: &str) -> String {
    let escaped = s.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{escaped}\"")
}

/// Sequence numbers from `* SEARCH` lines.
fn parse_search(lines: &[String]) -> Vec<u32> {
    lines
        .iter()
        .filter_map(|l| l.strip_prefix("* SEARCH"))
        .flat_map(|rest| rest.split_whitespace().filter_map(|n| n.parse().ok()))
        .collect()
}

/// Parse a raw RFC 822 message.
pub fn parse_message(raw: &[u8]) -> Option<FetchedMessage> {
    let parsed = MessageParser::default().parse(raw)?;

    let (from_address, from_name) = parsed
        .from()
        .and_then(|addr| addr.first())
        .map(|a| {
            (
                a.address().unwrap_or_default().to_lowercase(),
                a.name().unwrap_or_default().to_string(),
            )
        })
        .unwrap_or_default();

    let snippet: String = parsed
        .body_text(0)
        .map(|b| b.chars().take(SNIPPET_LIMIT).collect())
        .unwrap_or_default();

    let date = parsed
        .date()
        .and_then(|d| DateTime::<Utc>::from_timestamp(d.to_timestamp(), 0));

    Some(FetchedMessage {
        message_id: parsed
            .message_id()
            .map(|id| format!("<{id}>"))
            .unwrap_or_default(),
        subject: parsed.subject().unwrap_or_default().trim().to_string(),
        from_address,
        from_name,
        snippet,
        date,
    })
}

/// Log in, fetch every unseen INBOX message and flag each one seen.
fn fetch_session<S: Read + Write>(
    session: &mut Session<S>,
    username: &str,
    password: &str,
) -> Result<Vec<FetchedMessage>, TransportError> {
    session.greeting()?;
    session.expect_ok(
        &format!("LOGIN {} {}", quote(username), quote(password)),
        "LOGIN",
    )?;
    session.expect_ok("SELECT \"INBOX\"", "SELECT")?;
    let search = session.expect_ok("SEARCH UNSEEN", "SEARCH")?;

    let mut messages = Vec::new();
    for seq in parse_search(&search.lines) {
        let fetched = session.expect_ok(&format!("FETCH {seq} RFC822"), "FETCH")?;
        match fetched.literals.first().and_then(|raw| parse_message(raw)) {
            Some(msg) => messages.push(msg),
            None => debug!(seq, "Skipping unparseable message"),
        }
        // Mark seen explicitly; some servers leave RFC822 fetches unflagged.
        session.command(&format!("STORE {seq} +FLAGS (\\Seen)"))?;
    }

    let _ = session.command("LOGOUT");
    Ok(messages)
}

fn connect_tls(
    settings: &ImapSettings,
) -> Result<rustls::StreamOwned<rustls::ClientConnection, TcpStream>, TransportError> {
    let connect_err = |reason: String| TransportError::Connect {
        host: settings.host.clone(),
        port: settings.port,
        reason,
    };

    let addr = (settings.host.as_str(), settings.port)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| connect_err("no address resolved".into()))?;
    let tcp = TcpStream::connect_timeout(&addr, settings.timeout)
        .map_err(|e| connect_err(e.to_string()))?;
    tcp.set_read_timeout(Some(settings.timeout))?;
    tcp.set_write_timeout(Some(settings.timeout))?;

    let mut root_store = rustls::RootCertStore::empty();
    root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let tls_config = Arc::new(
        rustls::ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth(),
    );
    let server_name = rustls_pki_types::ServerName::try_from(settings.host.clone())
        .map_err(|e| connect_err(e.to_string()))?;
    let conn = rustls::ClientConnection::new(tls_config, server_name)
        .map_err(|e| connect_err(e.to_string()))?;
    Ok(rustls::StreamOwned::new(conn, tcp))
}

/// Fetch unseen messages for one mailbox.
pub fn fetch_unseen_blocking(settings: &ImapSettings) -> Result<Vec<FetchedMessage>, TransportError> {
    if settings.host.trim().is_empty() || settings.password.expose_secret().is_empty() {
        return Err(TransportError::MissingCredentials(settings.username.clone()));
    }
    let tls = connect_tls(settings)?;
    let mut session = Session::new(tls);
    fetch_session(
        &mut session,
        &settings.username,
        settings.password.expose_secret(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// Scripted server: reads come from `input`, writes are captured.
    struct Script {
        input: Cursor<Vec<u8>>,
        output: Vec<u8>,
    }

    impl Script {
        fn new(server: &str) -> Self {
            Self {
                input: Cursor::new(server.as_bytes().to_vec()),
                output: Vec::new(),
            }
        }
    }

    impl Read for Script {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            self.input.read(buf)
        }
    }

    impl Write for Script {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.output.extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    const RAW: &str = "From: Bob Smith <Bob@Example.org>\r\n\
        To: jane@example.com\r\n\
        Subject: Quick question\r\n\
        Message-ID: <m1@example.org>\r\n\
        Date: Tue, 1 Jul 2025 10:00:00 +0000\r\n\
        \r\n\
        Hi Jane,\r\nAre you free next week?\r\n";

    #[test]
    fn literal_length_detection() {
        assert_eq!(literal_len("* 1 FETCH (RFC822 {342}"), Some(342));
        assert_eq!(literal_len("* 1 FETCH (FLAGS (\\Seen))"), None);
    }

    #[test]
    fn quoting_escapes_specials() {
        assert_eq!(quote(r#"pa"ss\word"#), r#""pa\"ss\\word""#);
    }

    #[test]
    fn parses_sender_and_threading_fields() {
        let msg = parse_message(RAW.as_bytes()).unwrap();
        assert_eq!(msg.from_address, "bob@example.org");
        assert_eq!(msg.from_name, "Bob Smith");
        assert_eq!(msg.subject, "Quick question");
        assert_eq!(msg.message_id, "<m1@example.org>");
        assert!(msg.snippet.contains("free next week"));
        assert!(msg.date.is_some());
    }

    #[test]
    fn snippet_is_capped() {
        let long = format!(
            "From: a@x.com\r\nSubject: s\r\n\r\n{}\r\n",
            "x".repeat(SNIPPET_LIMIT + 500)
        );
        let msg = parse_message(long.as_bytes()).unwrap();
        assert_eq!(msg.snippet.chars().count(), SNIPPET_LIMIT);
    }

    #[test]
    fn session_fetches_literal_and_marks_seen() {
        let server = format!(
            "* OK IMAP ready\r\n\
             A001 OK LOGIN completed\r\n\
             * 1 EXISTS\r\n\
             A002 OK SELECT completed\r\n\
             * SEARCH 1\r\n\
             A003 OK SEARCH completed\r\n\
             * 1 FETCH (RFC822 {{{len}}}\r\n{RAW})\r\n\
             A004 OK FETCH completed\r\n\
             * 1 FETCH (FLAGS (\\Seen))\r\n\
             A005 OK STORE completed\r\n\
             * BYE\r\n\
             A006 OK LOGOUT completed\r\n",
            len = RAW.len()
        );
        let mut session = Session::new(Script::new(&server));
        let messages = fetch_session(&mut session, "jane@example.com", "pw").unwrap();

        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].message_id, "<m1@example.org>");

        let sent = String::from_utf8(session.stream.output.clone()).unwrap();
        assert!(sent.contains("A001 LOGIN \"jane@example.com\" \"pw\""));
        assert!(sent.contains("A004 FETCH 1 RFC822"));
        assert!(sent.contains("A005 STORE 1 +FLAGS (\\Seen)"));
    }

    #[test]
    fn rejected_login_is_an_error() {
        let server = "* OK ready\r\nA001 NO [AUTHENTICATIONFAILED] Invalid credentials\r\n";
        let mut session = Session::new(Script::new(server));
        let err = fetch_session(&mut session, "jane@example.com", "bad").unwrap_err();
        assert!(err.to_string().contains("LOGIN failed"));
    }

    #[test]
    fn missing_password_short_circuits() {
        let settings = ImapSettings {
            host: "imap.example.com".into(),
            port: 993,
            username: "jane@example.com".into(),
            password: SecretString::from(String::new()),
            timeout: Duration::from_secs(1),
        };
        assert!(matches!(
            fetch_unseen_blocking(&settings),
            Err(TransportError::MissingCredentials(_))
        ));
    }
}
