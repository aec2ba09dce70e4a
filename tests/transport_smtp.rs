use std::path::PathBuf;
use std::time::Duration;

use async_native_tls::TlsAcceptor;
use sendmail_relay::{
    async_test, Account, ClientId, ClientSecurity, Credentials, Error, FixedAccounts, Mechanism,
    Message, MessageBuilder, Phase, Recipients, Rewriter, SmtpClient, Timeouts, TlsSettings,
};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

const DATE: &str = "Sat, 17 Oct 2026 10:00:00 +0000";

/// Self-signed identity for `localhost` and `127.0.0.1`
const MAILHUB_IDENTITY: &[u8] = include_bytes!("data/mailhub.p12");
const MAILHUB_PASSWORD: &str = "mailhub";

/// Marks the point in a transcript where the channel became encrypted
const TLS_STARTED: &str = "<tls>";

/// What the fake mailhub does after a line
enum Reply {
    Send(&'static str),
    Silent,
    /// Answers, then drops the connection
    Hangup(&'static str),
    /// Answers, then runs the server side of the TLS handshake
    StartTls(&'static str),
}

fn standard(line: &str) -> Reply {
    let verb = line.split(' ').next().unwrap_or("");
    Reply::Send(match verb {
        "" => "220 mailhub ESMTP ready\r\n",
        "HELO" => "250 mailhub\r\n",
        "EHLO" => "250-mailhub\r\n250-8BITMIME\r\n250 AUTH LOGIN CRAM-MD5\r\n",
        "MAIL" | "RCPT" => "250 2.1.0 Ok\r\n",
        "DATA" => "354 End data with <CR><LF>.<CR><LF>\r\n",
        "." => "250 2.0.0 Ok: queued as 4F2A\r\n",
        "QUIT" => "221 2.0.0 Bye\r\n",
        _ => "502 5.5.2 Command not recognized\r\n",
    })
}

/// `standard`, plus STARTTLS support
fn standard_tls(line: &str) -> Reply {
    match line {
        "STARTTLS" => Reply::StartTls("220 2.0.0 Ready to start TLS\r\n"),
        _ => standard(line),
    }
}

trait Connection: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Connection for T {}

async fn acceptor() -> TlsAcceptor {
    TlsAcceptor::new(MAILHUB_IDENTITY, MAILHUB_PASSWORD)
        .await
        .unwrap()
}

/// Accepts one connection and answers with `script`, returning every line
/// the client sent. The greeting is the reply to the empty line.
async fn mailhub<F>(script: F) -> (u16, JoinHandle<Vec<String>>)
where
    F: Fn(&str) -> Reply + Send + 'static,
{
    serve(script, false).await
}

/// Like `mailhub`, with TLS from the first byte when `implicit` is set
async fn serve<F>(script: F, implicit: bool) -> (u16, JoinHandle<Vec<String>>)
where
    F: Fn(&str) -> Reply + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let handle = tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        let mut transcript = Vec::new();
        let socket: Box<dyn Connection> = if implicit {
            transcript.push(TLS_STARTED.to_string());
            Box::new(acceptor().await.accept(socket).await.unwrap())
        } else {
            Box::new(socket)
        };
        let mut stream = BufReader::new(socket);
        let mut in_data = false;

        let mut reply = script("");
        loop {
            match reply {
                Reply::Send(text) => {
                    stream.get_mut().write_all(text.as_bytes()).await.unwrap();
                    if in_data && !text.starts_with("354") {
                        in_data = false;
                    }
                }
                Reply::Silent => {}
                Reply::Hangup(text) => {
                    stream.get_mut().write_all(text.as_bytes()).await.unwrap();
                    break;
                }
                Reply::StartTls(text) => {
                    stream.get_mut().write_all(text.as_bytes()).await.unwrap();
                    let plain = stream.into_inner();
                    let secure: Box<dyn Connection> =
                        Box::new(acceptor().await.accept(plain).await.unwrap());
                    transcript.push(TLS_STARTED.to_string());
                    stream = BufReader::new(secure);
                }
            }

            let mut line = String::new();
            if stream.read_line(&mut line).await.unwrap_or(0) == 0 {
                break;
            }
            let line = line.trim_end_matches(&['\r', '\n'][..]).to_string();
            transcript.push(line.clone());

            if in_data {
                reply = if line == "." {
                    script(".")
                } else {
                    Reply::Silent
                };
                continue;
            }
            reply = script(&line);
            if line == "DATA" {
                in_data = matches!(reply, Reply::Send(text) if text.starts_with("354"));
            }
            if line == "QUIT" {
                if let Reply::Send(text) = reply {
                    stream.get_mut().write_all(text.as_bytes()).await.unwrap();
                }
                break;
            }
        }
        transcript
    });

    (port, handle)
}

fn message(recipients: &[&str]) -> Message {
    let accounts = FixedAccounts::new(Account {
        name: "jane".to_string(),
        uid: 1000,
        home: PathBuf::from("/home/jane"),
        full_name: None,
    });
    MessageBuilder::new(Rewriter::new("box.example.com".to_string()), &accounts)
        .recipients(Recipients::Arguments(
            recipients.iter().map(|r| r.to_string()).collect(),
        ))
        .date(DATE.to_string())
        .build(b"Subject: hello\n\nfirst line\n.leading dot\n")
        .unwrap()
}

fn client(port: u16) -> SmtpClient {
    SmtpClient::new("127.0.0.1", port).hello_name(ClientId::new("box.example.com".to_string()))
}

async_test! { test_simple_relay, {
    let (port, server) = mailhub(standard).await;

    let response = client(port)
        .into_transport()
        .send(&message(&["alice@example.org"]))
        .await
        .unwrap();
    assert_eq!(response.code, 250);
    assert_eq!(response.to_string(), "250 2.0.0 Ok: queued as 4F2A");

    let transcript = server.await.unwrap();
    assert_eq!(
        transcript,
        vec![
            "HELO box.example.com".to_string(),
            "MAIL FROM:<jane@box.example.com>".to_string(),
            "RCPT TO:<alice@example.org>".to_string(),
            "DATA".to_string(),
            format!("Received: by box.example.com (sendmail-relay sendmail emulation); {}", DATE),
            "From: jane@box.example.com".to_string(),
            format!("Date: {}", DATE),
            "To: postmaster".to_string(),
            "Subject: hello".to_string(),
            "".to_string(),
            "first line".to_string(),
            "..leading dot".to_string(),
            ".".to_string(),
            "QUIT".to_string(),
        ]
    );
}}

async_test! { test_every_recipient, {
    let (port, server) = mailhub(standard).await;

    client(port)
        .into_transport()
        .send(&message(&["alice@example.org, bob@example.org", "carol"]))
        .await
        .unwrap();

    let transcript = server.await.unwrap();
    let rcpts: Vec<&String> = transcript.iter().filter(|l| l.starts_with("RCPT")).collect();
    assert_eq!(
        rcpts,
        vec![
            "RCPT TO:<alice@example.org>",
            "RCPT TO:<bob@example.org>",
            "RCPT TO:<carol@box.example.com>",
        ]
    );
}}

async_test! { test_read_timeout, {
    let (port, server) = mailhub(|line: &str| {
        if line.starts_with("MAIL") {
            Reply::Silent
        } else {
            standard(line)
        }
    })
    .await;
    let timeouts = Timeouts {
        read: Duration::from_millis(100),
        ..Timeouts::default()
    };

    let error = client(port)
        .timeouts(timeouts)
        .into_transport()
        .send(&message(&["alice@example.org"]))
        .await
        .unwrap_err();
    assert!(matches!(error, Error::Timeout(Phase::Read)), "{:?}", error);

    let transcript = server.await.unwrap();
    assert!(!transcript.iter().any(|l| l.starts_with("RCPT")));
    assert_eq!(transcript.last().map(String::as_str), Some("QUIT"));
}}

async_test! { test_greeting_rejected, {
    let (port, server) = mailhub(|line: &str| {
        if line.is_empty() {
            Reply::Send("554 5.3.2 No service\r\n")
        } else {
            standard(line)
        }
    })
    .await;

    let error = client(port)
        .into_transport()
        .send(&message(&["alice@example.org"]))
        .await
        .unwrap_err();
    match error {
        Error::Protocol(ref response) => assert_eq!(response.code, 554),
        ref other => panic!("unexpected {:?}", other),
    }
    assert_eq!(server.await.unwrap(), vec!["QUIT".to_string()]);
}}

async_test! { test_recipient_rejected, {
    let (port, server) = mailhub(|line: &str| {
        if line == "RCPT TO:<bob@example.org>" {
            Reply::Send("550 5.1.1 User unknown\r\n")
        } else {
            standard(line)
        }
    })
    .await;

    let error = client(port)
        .into_transport()
        .send(&message(&["alice@example.org", "bob@example.org", "carol@example.org"]))
        .await
        .unwrap_err();
    match error {
        Error::RecipientRejected {
            ref recipient,
            ref response,
        } => {
            assert_eq!(recipient, "bob@example.org");
            assert_eq!(response.code, 550);
        }
        ref other => panic!("unexpected {:?}", other),
    }

    let transcript = server.await.unwrap();
    assert!(!transcript.iter().any(|l| l.contains("carol") || l == "DATA"));
    assert_eq!(transcript.last().map(String::as_str), Some("QUIT"));
}}

async_test! { test_data_refused, {
    let (port, server) = mailhub(|line: &str| {
        if line == "DATA" {
            Reply::Send("554 5.5.1 No valid recipients\r\n")
        } else {
            standard(line)
        }
    })
    .await;

    let error = client(port)
        .into_transport()
        .send(&message(&["alice@example.org"]))
        .await
        .unwrap_err();
    assert!(matches!(error, Error::Protocol(ref r) if r.code == 554), "{:?}", error);

    let transcript = server.await.unwrap();
    assert_eq!(&transcript[transcript.len() - 2..], &["DATA", "QUIT"]);
}}

async_test! { test_message_rejected, {
    let (port, server) = mailhub(|line: &str| {
        if line == "." {
            Reply::Send("552 5.3.4 Message too big\r\n")
        } else {
            standard(line)
        }
    })
    .await;

    let error = client(port)
        .into_transport()
        .send(&message(&["alice@example.org"]))
        .await
        .unwrap_err();
    match error {
        Error::MessageRejected(ref response) => {
            assert_eq!(response.to_string(), "552 5.3.4 Message too big");
        }
        ref other => panic!("unexpected {:?}", other),
    }
    assert_eq!(
        server.await.unwrap().last().map(String::as_str),
        Some("QUIT")
    );
}}

async_test! { test_auth_login, {
    let (port, server) = mailhub(|line: &str| {
        if line.starts_with("AUTH LOGIN") {
            Reply::Send("334 UGFzc3dvcmQ6\r\n")
        } else if line == "c2VjcmV0" {
            Reply::Send("235 2.7.0 Authentication successful\r\n")
        } else {
            standard(line)
        }
    })
    .await;

    client(port)
        .credentials(Credentials::new("jane".to_string(), "secret".to_string()))
        .into_transport()
        .send(&message(&["alice@example.org"]))
        .await
        .unwrap();

    let transcript = server.await.unwrap();
    assert_eq!(
        &transcript[..4],
        &[
            "EHLO box.example.com",
            "AUTH LOGIN amFuZQ==",
            "c2VjcmV0",
            "MAIL FROM:<jane@box.example.com>",
        ]
    );
}}

async_test! { test_auth_cram_md5, {
    // challenge and answer from RFC 2195
    let (port, server) = mailhub(|line: &str| match line {
        "AUTH CRAM-MD5" => Reply::Send(
            "334 PDE4OTYuNjk3MTcwOTUyQHBvc3RvZmZpY2UucmVzdG9uLm1jaS5uZXQ+\r\n",
        ),
        "dGltIGI5MTNhNjAyYzdlZGE3YTQ5NWI0ZTZlNzMzNGQzODkw" => {
            Reply::Send("235 2.7.0 Authentication successful\r\n")
        }
        _ => standard(line),
    })
    .await;

    client(port)
        .credentials(Credentials::new("tim".to_string(), "tanstaaftanstaaf".to_string()))
        .authentication_mechanism(Mechanism::CramMd5)
        .into_transport()
        .send(&message(&["alice@example.org"]))
        .await
        .unwrap();

    let transcript = server.await.unwrap();
    assert_eq!(transcript[1], "AUTH CRAM-MD5");
}}

async_test! { test_auth_rejected, {
    let (port, server) = mailhub(|line: &str| {
        if line.starts_with("AUTH") {
            Reply::Send("535 5.7.8 Authentication credentials invalid\r\n")
        } else {
            standard(line)
        }
    })
    .await;

    let error = client(port)
        .credentials(Credentials::new("jane".to_string(), "wrong".to_string()))
        .into_transport()
        .send(&message(&["alice@example.org"]))
        .await
        .unwrap_err();
    assert!(matches!(error, Error::AuthRejected(ref r) if r.code == 535), "{:?}", error);

    let transcript = server.await.unwrap();
    assert!(!transcript.iter().any(|l| l.starts_with("MAIL")));
    assert_eq!(transcript.last().map(String::as_str), Some("QUIT"));
}}

async_test! { test_starttls_without_tls_server, {
    let (port, server) = mailhub(|line: &str| {
        if line == "STARTTLS" {
            Reply::Hangup("220 2.0.0 Ready to start TLS\r\n")
        } else {
            standard(line)
        }
    })
    .await;

    let error = client(port)
        .security(ClientSecurity::StartTls)
        .into_transport()
        .send(&message(&["alice@example.org"]))
        .await
        .unwrap_err();
    assert!(
        matches!(error, Error::Tls(_) | Error::Io(_)),
        "{:?}",
        error
    );

    let transcript = server.await.unwrap();
    assert_eq!(transcript, vec!["EHLO box.example.com", "STARTTLS"]);
}}

fn unverified() -> TlsSettings {
    TlsSettings {
        verify: false,
        client_certificate: None,
    }
}

async_test! { test_starttls, {
    let (port, server) = serve(standard_tls, false).await;

    let response = client(port)
        .security(ClientSecurity::StartTls)
        .tls_settings(unverified())
        .into_transport()
        .send(&message(&["alice@example.org"]))
        .await
        .unwrap();
    assert_eq!(response.code, 250);

    let transcript = server.await.unwrap();
    assert_eq!(
        &transcript[..7],
        &[
            "EHLO box.example.com",
            "STARTTLS",
            TLS_STARTED,
            "HELO box.example.com",
            "MAIL FROM:<jane@box.example.com>",
            "RCPT TO:<alice@example.org>",
            "DATA",
        ]
    );
    assert_eq!(&transcript[transcript.len() - 2..], &[".", "QUIT"]);
}}

async_test! { test_starttls_then_login, {
    let (port, server) = serve(
        |line: &str| match line {
            "AUTH LOGIN amFuZQ==" => Reply::Send("334 UGFzc3dvcmQ6\r\n"),
            "c2VjcmV0" => Reply::Send("235 2.7.0 Authentication successful\r\n"),
            _ => standard_tls(line),
        },
        false,
    )
    .await;

    client(port)
        .security(ClientSecurity::StartTls)
        .tls_settings(unverified())
        .credentials(Credentials::new("jane".to_string(), "secret".to_string()))
        .into_transport()
        .send(&message(&["alice@example.org"]))
        .await
        .unwrap();

    let transcript = server.await.unwrap();
    assert_eq!(
        &transcript[..6],
        &[
            "EHLO box.example.com",
            "STARTTLS",
            TLS_STARTED,
            "EHLO box.example.com",
            "AUTH LOGIN amFuZQ==",
            "c2VjcmV0",
        ]
    );
}}

async_test! { test_implicit_tls, {
    let (port, server) = serve(standard, true).await;

    let response = client(port)
        .security(ClientSecurity::Wrapper)
        .tls_settings(unverified())
        .into_transport()
        .send(&message(&["alice@example.org"]))
        .await
        .unwrap();
    assert_eq!(response.to_string(), "250 2.0.0 Ok: queued as 4F2A");

    let transcript = server.await.unwrap();
    assert_eq!(
        &transcript[..4],
        &[
            TLS_STARTED,
            "HELO box.example.com",
            "MAIL FROM:<jane@box.example.com>",
            "RCPT TO:<alice@example.org>",
        ]
    );
    assert!(transcript.contains(&"..leading dot".to_string()));
    assert_eq!(transcript.last().map(String::as_str), Some("QUIT"));
}}

async_test! { test_exchange_timeout, {
    let (port, server) = mailhub(|line: &str| {
        if line.starts_with("MAIL") {
            Reply::Silent
        } else {
            standard(line)
        }
    })
    .await;
    let timeouts = Timeouts {
        read: Duration::from_secs(5),
        exchange: Duration::from_millis(200),
        ..Timeouts::default()
    };

    let error = client(port)
        .timeouts(timeouts)
        .into_transport()
        .send(&message(&["alice@example.org"]))
        .await
        .unwrap_err();
    assert!(matches!(error, Error::Timeout(Phase::Exchange)), "{:?}", error);

    assert_eq!(
        server.await.unwrap(),
        vec![
            "HELO box.example.com",
            "MAIL FROM:<jane@box.example.com>",
            "QUIT",
        ]
    );
}}

async_test! { test_session_deadline, {
    let (port, server) = mailhub(|line: &str| {
        if line.starts_with("RCPT") {
            Reply::Silent
        } else {
            standard(line)
        }
    })
    .await;
    let timeouts = Timeouts {
        read: Duration::from_secs(5),
        exchange: Duration::from_secs(5),
        session: Duration::from_millis(300),
        ..Timeouts::default()
    };

    let error = client(port)
        .timeouts(timeouts)
        .into_transport()
        .send(&message(&["alice@example.org", "bob@example.org"]))
        .await
        .unwrap_err();
    assert!(matches!(error, Error::Timeout(Phase::Session)), "{:?}", error);

    let transcript = server.await.unwrap();
    assert!(!transcript.iter().any(|l| l.contains("bob") || l == "DATA"));
    assert_eq!(transcript.last().map(String::as_str), Some("QUIT"));
}}

async_test! { test_connection_refused, {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let error = client(port)
        .into_transport()
        .send(&message(&["alice@example.org"]))
        .await
        .unwrap_err();
    assert!(
        matches!(error, Error::ConnectRefused { port: p, .. } if p == port),
        "{:?}",
        error
    );
}}

async_test! { test_invalid_settings, {
    let error = SmtpClient::new("", 25)
        .into_transport()
        .send(&message(&["alice@example.org"]))
        .await
        .unwrap_err();
    assert!(matches!(error, Error::Config(_)));
}}
