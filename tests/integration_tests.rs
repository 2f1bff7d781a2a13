//! Integration tests driving the server over real TCP connections

use letterbox::{
    Inbox, QueueFullPolicy, ServerConfig, ShutdownTrigger, SmtpError, SmtpLimits, SmtpServer,
    shutdown_channel,
};
use std::io::{BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpStream};
use std::thread::{self, JoinHandle};
use std::time::Duration;

const DOMAIN: &str = "test.local";

struct TestServer {
    addr: SocketAddr,
    inbox: Option<Inbox>,
    trigger: Option<ShutdownTrigger>,
    handle: Option<JoinHandle<Result<(), SmtpError>>>,
}

impl TestServer {
    fn start(config: ServerConfig) -> Self {
        let (server, inbox) = SmtpServer::new(config);
        let (trigger, shutdown) = shutdown_channel();

        let background = server.clone();
        let handle = thread::spawn(move || background.listen(&shutdown, "127.0.0.1:0"));
        let addr = server
            .ready()
            .wait_timeout(Duration::from_secs(5))
            .expect("server did not start");

        Self {
            addr,
            inbox: Some(inbox),
            trigger: Some(trigger),
            handle: Some(handle),
        }
    }

    fn inbox(&self) -> &Inbox {
        self.inbox.as_ref().unwrap()
    }

    fn shutdown(&mut self) {
        if let Some(trigger) = self.trigger.take() {
            trigger.trigger();
        }
        if let Some(handle) = self.handle.take() {
            handle.join().unwrap().unwrap();
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if !thread::panicking() {
            self.shutdown();
        }
    }
}

fn default_config() -> ServerConfig {
    ServerConfig::new(DOMAIN)
        .with_sender_blacklist(["spammer@bad.example"])
        .with_recipient_whitelist(["alice@x.com", "recipient@example.com"])
        .with_shutdown_grace(Duration::from_secs(2))
}

struct Client {
    stream: TcpStream,
    reader: BufReader<TcpStream>,
}

impl Client {
    fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(10)))
            .unwrap();
        let reader = BufReader::new(stream.try_clone().unwrap());
        let mut client = Self { stream, reader };

        let greeting = client.read_reply();
        assert_eq!(greeting, format!("220 {DOMAIN} ready\r\n"));
        client
    }

    /// Read one reply, following continuation lines
    fn read_reply(&mut self) -> String {
        let mut reply = String::new();
        loop {
            let mut line = String::new();
            if self.reader.read_line(&mut line).unwrap_or(0) == 0 {
                return reply;
            }
            reply.push_str(&line);
            if line.len() < 4 || line.as_bytes()[3] != b'-' {
                return reply;
            }
        }
    }

    fn send(&mut self, line: &str) -> String {
        self.write(line);
        self.read_reply()
    }

    fn write(&mut self, line: &str) {
        write!(self.stream, "{line}\r\n").unwrap();
        self.stream.flush().unwrap();
    }

    fn start_transaction(&mut self, from: &str, to: &str) {
        assert_eq!(self.send(&format!("MAIL FROM:<{from}>")), "250 OK\r\n");
        assert_eq!(self.send(&format!("RCPT TO:<{to}>")), "250 OK\r\n");
        assert!(self.send("DATA").starts_with("354"));
    }

    /// True once the server has closed its side
    fn is_closed(&mut self) -> bool {
        let mut rest = String::new();
        matches!(self.reader.read_line(&mut rest), Ok(0) | Err(_))
    }
}

#[test]
fn test_example_session() {
    let server = TestServer::start(default_config());
    let mut client = Client::connect(server.addr);

    assert_eq!(
        client.send("EHLO client.example"),
        "250-test.local greets client.example\r\n250-8BITMIME\r\n250 HELP\r\n"
    );
    assert_eq!(client.send("MAIL FROM:<bob@x.com>"), "250 OK\r\n");
    assert_eq!(client.send("RCPT TO:<alice@x.com>"), "250 OK\r\n");
    assert_eq!(
        client.send("DATA"),
        "354 Start mail input; end with <CRLF>.<CRLF>\r\n"
    );
    client.stream.write_all(b"Subject: hi\r\n\r\nhello\r\n.\r\n").unwrap();
    assert_eq!(client.read_reply(), "250 OK\r\n");
    assert_eq!(
        client.send("QUIT"),
        "221 test.local Service closing transmission channel\r\n"
    );
    assert!(client.is_closed());

    let message = server.inbox().recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(message.mail_from(), "bob@x.com");
    assert_eq!(message.rcpt_to(), Some("alice@x.com"));
    assert_eq!(message.greet_domain(), "client.example");
    assert_eq!(message.subject(), Some("hi"));
    assert_eq!(message.body(), b"hello\n");
    assert!(server.inbox().try_recv().is_err());
}

#[test]
fn test_addresses_are_lowercased() {
    let server = TestServer::start(default_config());
    let mut client = Client::connect(server.addr);

    client.send("HELO client.local");
    client.start_transaction("Bob@X.COM", "ALICE@x.com");
    client.write("Subject: case");
    client.write("");
    client.write("body");
    assert_eq!(client.send("."), "250 OK\r\n");

    let message = server.inbox().recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(message.mail_from(), "bob@x.com");
    assert_eq!(message.rcpt_to(), Some("alice@x.com"));
}

#[test]
fn test_blacklisted_sender_closes_connection() {
    let server = TestServer::start(default_config());
    let mut client = Client::connect(server.addr);

    client.send("HELO client.local");
    assert_eq!(
        client.send("MAIL FROM:<Spammer@Bad.Example>"),
        "221 test.local Service closing transmission channel\r\n"
    );
    assert!(client.is_closed());
    assert!(server.inbox().is_empty());
}

#[test]
fn test_recipient_not_whitelisted() {
    let server = TestServer::start(default_config());
    let mut client = Client::connect(server.addr);

    client.send("HELO client.local");
    assert_eq!(client.send("MAIL FROM:<bob@x.com>"), "250 OK\r\n");
    assert_eq!(
        client.send("RCPT TO:<mallory@x.com>"),
        "550 Requested action not taken: mailbox unavailable\r\n"
    );
    // No recipient was recorded
    assert_eq!(client.send("DATA"), "503 Bad sequence of commands\r\n");

    // The transaction is still open for a valid recipient
    assert_eq!(client.send("RCPT TO:<alice@x.com>"), "250 OK\r\n");
    assert!(client.send("DATA").starts_with("354"));
    client.write("Subject: second try");
    client.write("");
    assert_eq!(client.send("."), "250 OK\r\n");

    let message = server.inbox().recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(message.rcpt_to(), Some("alice@x.com"));
}

#[test]
fn test_out_of_sequence_commands() {
    let server = TestServer::start(default_config());
    let mut client = Client::connect(server.addr);

    assert_eq!(client.send("RCPT TO:<alice@x.com>"), "503 Bad sequence of commands\r\n");
    assert_eq!(client.send("DATA"), "503 Bad sequence of commands\r\n");
    assert_eq!(client.send("MAIL FROM:<bob@x.com>"), "250 OK\r\n");
    assert_eq!(client.send("DATA"), "503 Bad sequence of commands\r\n");
    assert_eq!(client.send("QUIT").get(..3), Some("221"));
}

#[test]
fn test_unrecognized_and_unimplemented_commands() {
    let server = TestServer::start(default_config());
    let mut client = Client::connect(server.addr);

    assert_eq!(client.send("INVALID"), "500 Syntax error, command unrecognized\r\n");
    assert_eq!(client.send(""), "500 Syntax error, command unrecognized\r\n");
    assert_eq!(client.send("RSET"), "502 Command not implemented\r\n");
    assert_eq!(client.send("VRFY alice"), "502 Command not implemented\r\n");
    assert_eq!(client.send("noop"), "250 OK\r\n");
    assert_eq!(
        client.send("MAIL bob@x.com"),
        "501 Syntax error in parameters or arguments\r\n"
    );
    assert_eq!(
        client.send("MAIL FROM:<bob@x.com"),
        "501 Syntax error in parameters or arguments\r\n"
    );
}

#[test]
fn test_command_line_length_limit() {
    let server = TestServer::start(default_config());
    let mut client = Client::connect(server.addr);

    let long_command = "HELO ".to_string() + &"a".repeat(SmtpLimits::COMMAND_LINE_MAX_LENGTH);
    assert!(client.send(&long_command).starts_with("500"));

    // Still usable afterwards
    assert!(client.send("HELO client.local").starts_with("250"));
}

#[test]
fn test_path_length_limit() {
    let server = TestServer::start(default_config());
    let mut client = Client::connect(server.addr);

    let long_path = "user@".to_string() + &"a".repeat(SmtpLimits::PATH_MAX_LENGTH);
    assert!(
        client
            .send(&format!("MAIL FROM:<{long_path}>"))
            .starts_with("501")
    );
}

#[test]
fn test_malformed_body() {
    let server = TestServer::start(default_config());
    let mut client = Client::connect(server.addr);

    client.send("HELO client.local");
    client.start_transaction("bob@x.com", "alice@x.com");
    client.write("hello world!");
    assert_eq!(
        client.send("."),
        "451 Requested action aborted: local error in processing\r\n"
    );
    assert!(server.inbox().is_empty());

    // The session goes on
    client.start_transaction("bob@x.com", "alice@x.com");
    client.write("Subject: fixed");
    client.write("");
    client.write("hello world!");
    assert_eq!(client.send("."), "250 OK\r\n");
    assert!(server.inbox().recv_timeout(Duration::from_secs(5)).is_ok());
}

#[test]
fn test_dot_stuffed_body() {
    let server = TestServer::start(default_config());
    let mut client = Client::connect(server.addr);

    client.start_transaction("bob@x.com", "alice@x.com");
    client.write("Subject: dots");
    client.write("");
    client.write("..starts with a dot");
    client.write("last line");
    assert_eq!(client.send("."), "250 OK\r\n");

    let message = server.inbox().recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(message.body(), b".starts with a dot\nlast line\n");
}

#[test]
fn test_data_size_limit() {
    let server = TestServer::start(default_config());
    let mut client = Client::connect(server.addr);

    client.start_transaction("bob@x.com", "alice@x.com");
    client.write("Subject: big");
    client.write("");
    let chunk = "a".repeat(1024 * 1024);
    for _ in 0..(SmtpLimits::MAX_DATA_SIZE / chunk.len() + 1) {
        client.write(&chunk);
    }
    assert_eq!(
        client.send("."),
        "552 Requested mail action aborted: exceeded storage allocation\r\n"
    );
    assert!(server.inbox().is_empty());
    assert_eq!(client.send("NOOP"), "250 OK\r\n");
}

#[test]
fn test_non_utf8_input_handling() {
    let server = TestServer::start(default_config());
    let mut client = Client::connect(server.addr);

    client.stream.write_all(&[0xFF, 0xFE, 0xFD]).unwrap();
    client.stream.write_all(b" HELO client.local\r\n").unwrap();
    assert!(client.read_reply().starts_with("500"));

    // Server should still be responsive to valid commands
    assert!(client.send("HELO client.local").starts_with("250"));
}

#[test]
fn test_eight_bit_body_is_kept_verbatim() {
    let server = TestServer::start(default_config());
    let mut client = Client::connect(server.addr);

    client.send("EHLO client.local");
    assert_eq!(
        client.send("MAIL FROM:<bob@x.com> BODY=8BITMIME"),
        "250 OK\r\n"
    );
    assert_eq!(client.send("RCPT TO:<alice@x.com>"), "250 OK\r\n");
    assert!(client.send("DATA").starts_with("354"));
    client
        .stream
        .write_all(b"Subject: hi\r\n\r\ncaf\xe9\r\n.\r\n")
        .unwrap();
    assert_eq!(client.read_reply(), "250 OK\r\n");

    let message = server.inbox().recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(message.body(), b"caf\xe9\n");
}

#[test]
fn test_unterminated_command_is_skipped() {
    let server = TestServer::start(default_config());
    let mut client = Client::connect(server.addr);

    let flood = vec![b'a'; 4 * 1024 * 1024];
    client.stream.write_all(&flood).unwrap();
    client.stream.write_all(b"\r\n").unwrap();
    assert_eq!(
        client.read_reply(),
        "500 Syntax error, command unrecognized\r\n"
    );

    assert_eq!(client.send("NOOP"), "250 OK\r\n");
}

#[test]
fn test_overlong_data_line() {
    let server = TestServer::start(default_config());
    let mut client = Client::connect(server.addr);

    client.start_transaction("bob@x.com", "alice@x.com");
    client.write("Subject: one huge line");
    client.write("");
    let flood = vec![b'a'; SmtpLimits::MAX_DATA_SIZE + 1024];
    client.stream.write_all(&flood).unwrap();
    client.stream.write_all(b"\r\n").unwrap();
    assert_eq!(
        client.send("."),
        "552 Requested mail action aborted: exceeded storage allocation\r\n"
    );
    assert!(server.inbox().is_empty());
    assert_eq!(client.send("NOOP"), "250 OK\r\n");
}

#[test]
fn test_long_ehlo_domain_keeps_capabilities() {
    let server = TestServer::start(default_config());
    let mut client = Client::connect(server.addr);

    let client_domain = "d".repeat(500);
    let reply = client.send(&format!("EHLO {client_domain}"));
    let lines: Vec<&str> = reply.split_inclusive("\r\n").collect();
    assert_eq!(lines.len(), 3);
    assert!(lines[0].starts_with("250-test.local greets ddd"));
    assert!(lines[0].len() <= SmtpLimits::REPLY_LINE_MAX_LENGTH);
    assert_eq!(lines[1], "250-8BITMIME\r\n");
    assert_eq!(lines[2], "250 HELP\r\n");
}

#[test]
fn test_lf_line_endings() {
    let server = TestServer::start(default_config());
    let mut client = Client::connect(server.addr);

    client
        .stream
        .write_all(b"HELO bare.lf\nMAIL FROM:<bob@x.com>\nRCPT TO:<alice@x.com>\nDATA\n")
        .unwrap();
    for _ in 0..4 {
        client.read_reply();
    }
    client.stream.write_all(b"Subject: lf\n\nbody\n.\n").unwrap();
    assert_eq!(client.read_reply(), "250 OK\r\n");

    let message = server.inbox().recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(message.body(), b"body\n");
}

#[test]
fn test_several_messages_in_one_session() {
    let server = TestServer::start(default_config());
    let mut client = Client::connect(server.addr);

    client.send("HELO client.local");
    for n in 0..5 {
        client.start_transaction(&format!("sender{n}@example.com"), "recipient@example.com");
        client.write(&format!("Subject: Test Email {n}"));
        client.write("");
        client.write(&format!("This is test email number {n}"));
        assert_eq!(client.send("."), "250 OK\r\n");
    }
    client.send("QUIT");

    let senders: Vec<String> = (0..5)
        .map(|_| {
            server
                .inbox()
                .recv_timeout(Duration::from_secs(5))
                .unwrap()
                .mail_from()
                .to_string()
        })
        .collect();
    let expected: Vec<String> = (0..5).map(|n| format!("sender{n}@example.com")).collect();
    assert_eq!(senders, expected);
}

#[test]
fn test_concurrent_sessions() {
    let server = TestServer::start(default_config());
    let addr = server.addr;

    let clients: Vec<_> = (0..8)
        .map(|n| {
            thread::spawn(move || {
                let mut client = Client::connect(addr);
                client.send(&format!("HELO client{n}.local"));
                client.start_transaction(&format!("sender{n}@example.com"), "alice@x.com");
                client.write(&format!("Subject: {n}"));
                client.write("");
                assert_eq!(client.send("."), "250 OK\r\n");
                client.send("QUIT");
            })
        })
        .collect();
    for client in clients {
        client.join().unwrap();
    }

    let mut senders: Vec<String> = (0..8)
        .map(|_| {
            server
                .inbox()
                .recv_timeout(Duration::from_secs(5))
                .unwrap()
                .mail_from()
                .to_string()
        })
        .collect();
    senders.sort();
    let mut expected: Vec<String> = (0..8).map(|n| format!("sender{n}@example.com")).collect();
    expected.sort();
    assert_eq!(senders, expected);
}

#[test]
fn test_reject_policy_when_inbox_full() {
    let server = TestServer::start(default_config().with_inbox(1, QueueFullPolicy::Reject));
    let mut client = Client::connect(server.addr);

    for expected in ["250 OK\r\n", "452 Requested action not taken: insufficient system storage\r\n"] {
        client.start_transaction("bob@x.com", "alice@x.com");
        client.write("Subject: queued");
        client.write("");
        assert_eq!(client.send("."), expected);
    }

    assert!(server.inbox().recv_timeout(Duration::from_secs(5)).is_ok());
    assert!(server.inbox().try_recv().is_err());
}

#[test]
fn test_inbox_dropped() {
    let mut server = TestServer::start(default_config());
    drop(server.inbox.take());
    let mut client = Client::connect(server.addr);

    client.start_transaction("bob@x.com", "alice@x.com");
    client.write("Subject: nobody listens");
    client.write("");
    assert_eq!(
        client.send("."),
        "451 Requested action aborted: local error in processing\r\n"
    );
}

#[test]
fn test_shutdown_cancels_blocked_handoff() {
    let mut server = TestServer::start(default_config().with_inbox(0, QueueFullPolicy::Block));
    let mut client = Client::connect(server.addr);

    client.start_transaction("bob@x.com", "alice@x.com");
    client.write("Subject: never received");
    client.write("");
    client.write(".");

    // Let the session block on the handoff
    thread::sleep(Duration::from_millis(100));
    server.shutdown();

    // Either the 421 made it out before the socket was shut down, or not.
    let reply = client.read_reply();
    assert!(
        reply.is_empty()
            || reply
                == "421 test.local Service not available, closing transmission channel\r\n"
    );
    assert!(client.is_closed());
    assert!(server.inbox().try_recv().is_err());
}

#[test]
fn test_idle_client_is_disconnected() {
    let server = TestServer::start(default_config().with_idle_timeout(Some(Duration::from_secs(1))));
    let mut client = Client::connect(server.addr);

    assert_eq!(client.send("HELO client.local").get(..3), Some("250"));
    assert_eq!(
        client.read_reply(),
        "421 test.local Service not available, closing transmission channel\r\n"
    );
    assert!(client.is_closed());
}
