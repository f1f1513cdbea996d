//! Session tests against a scripted IMAP server on a local socket.
//!
//! The server answers LOGIN, SELECT, UID SEARCH, FETCH and UID STORE, and pushes
//! one scripted untagged response per IDLE round. A `BYE` push closes the socket
//! without waiting for `DONE`.

use mail_ingest::{
    AttachmentStore, ConnectionManager, LifecycleEvent, MailboxWatcher, MessageFetcher,
    SearchQuery, SessionState, WatcherConfig,
};
use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;

// ─────────────────────────────────────────────────────────────────────────────
// Scripted Server
// ─────────────────────────────────────────────────────────────────────────────

const BYE: &str = "* BYE Server shutting down";

fn invoice() -> Vec<u8> {
    b"From: Billing <billing@example.com>\r\n\
Subject: Invoice #1\r\n\
Date: Tue, 02 Jan 2024 03:04:05 +0000\r\n\
MIME-Version: 1.0\r\n\
Content-Type: multipart/mixed; boundary=\"b1\"\r\n\
\r\n\
--b1\r\n\
Content-Type: text/plain\r\n\
\r\n\
See attached.\r\n\
--b1\r\n\
Content-Type: application/pdf; name=\"invoice.pdf\"\r\n\
Content-Disposition: attachment; filename=\"invoice.pdf\"\r\n\
Content-Transfer-Encoding: base64\r\n\
\r\n\
SGVsbG8sIFBERiE=\r\n\
--b1--\r\n"
        .to_vec()
}

/// Commands received by the server, without their tags.
type CommandLog = Arc<Mutex<Vec<String>>>;

/// Starts a server for one connection. Every IDLE round pushes the next entry of
/// `pushes`; the mailbox holds 5 messages and sequence number 5 has UID 12.
async fn start_server(pushes: &[&str]) -> (u16, CommandLog) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let log: CommandLog = Arc::default();
    let mut pushes: VecDeque<String> = pushes.iter().map(|p| (*p).to_string()).collect();

    let commands = Arc::clone(&log);
    tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        let (reader, mut writer) = socket.into_split();
        let mut lines = BufReader::new(reader).lines();

        writer.write_all(b"* OK IMAP4rev1 ready\r\n").await.unwrap();

        while let Ok(Some(line)) = lines.next_line().await {
            let (tag, command) = line.split_once(' ').unwrap_or((line.as_str(), ""));
            let tag = tag.to_string();
            commands.lock().unwrap().push(command.to_string());

            let upper = command.to_ascii_uppercase();
            let reply = if upper.starts_with("LOGIN") {
                format!("{tag} OK LOGIN completed\r\n")
            } else if upper.starts_with("SELECT") {
                format!("* 5 EXISTS\r\n* 0 RECENT\r\n{tag} OK [READ-WRITE] SELECT completed\r\n")
            } else if upper.starts_with("UID SEARCH") {
                format!("* SEARCH\r\n{tag} OK SEARCH completed\r\n")
            } else if upper.starts_with("FETCH 5 ") {
                let body = invoice();
                let mut reply =
                    format!("* 5 FETCH (UID 12 BODY[] {{{}}}\r\n", body.len()).into_bytes();
                reply.extend_from_slice(&body);
                reply.extend_from_slice(format!(")\r\n{tag} OK FETCH completed\r\n").as_bytes());
                writer.write_all(&reply).await.unwrap();
                continue;
            } else if upper.starts_with("UID STORE 12 ") {
                format!("* 5 FETCH (UID 12 FLAGS (\\Seen))\r\n{tag} OK STORE completed\r\n")
            } else if upper == "IDLE" {
                writer.write_all(b"+ idling\r\n").await.unwrap();
                let push = pushes.pop_front().unwrap_or_else(|| BYE.to_string());
                writer.write_all(format!("{push}\r\n").as_bytes()).await.unwrap();
                if push == BYE {
                    return;
                }
                match lines.next_line().await {
                    Ok(Some(done)) => commands.lock().unwrap().push(done),
                    _ => return,
                }
                format!("{tag} OK IDLE terminated\r\n")
            } else if upper == "LOGOUT" {
                let reply = format!("* BYE Logging out\r\n{tag} OK LOGOUT completed\r\n");
                writer.write_all(reply.as_bytes()).await.unwrap();
                return;
            } else {
                format!("{tag} BAD unexpected command\r\n")
            };

            writer.write_all(reply.as_bytes()).await.unwrap();
        }
    });

    (port, log)
}

fn config(port: u16) -> WatcherConfig {
    WatcherConfig::builder()
        .user("user")
        .password("secret")
        .host("127.0.0.1")
        .port(port)
        .tls(false)
        .build()
        .unwrap()
}

fn watcher(base: &Path) -> MailboxWatcher {
    MailboxWatcher::new(
        "INBOX",
        SearchQuery::Unseen,
        MessageFetcher::new(AttachmentStore::new(base)),
    )
}

/// Runs a session against the server and returns its events and final state.
async fn run_session(port: u16, base: &Path) -> (Vec<String>, SessionState) {
    let mut lifecycle = ConnectionManager::spawn(config(port), watcher(base));
    let mut events = Vec::new();

    loop {
        let event = tokio::time::timeout(Duration::from_secs(10), lifecycle.next_event())
            .await
            .expect("session made no progress");
        match event {
            Some(LifecycleEvent::Ready) => events.push("ready".to_string()),
            Some(LifecycleEvent::Mail { count }) => events.push(format!("mail:{count}")),
            Some(LifecycleEvent::Error(e)) => {
                events.push(format!("error:{e}"));
                break;
            }
            Some(LifecycleEvent::End) => {
                events.push("end".to_string());
                break;
            }
            None => break,
        }
    }

    (events, lifecycle.join().await)
}

// ─────────────────────────────────────────────────────────────────────────────
// IDLE Notifications
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_arrival_after_expunge_is_fetched() {
    let (port, log) = start_server(&["* 4 EXPUNGE", "* 5 EXISTS", BYE]).await;
    let dir = tempfile::tempdir().unwrap();

    let (events, state) = run_session(port, dir.path()).await;

    assert_eq!(events, ["ready", "mail:1", "end"]);
    assert_eq!(state, SessionState::Ended);

    let commands = log.lock().unwrap().clone();
    assert!(commands.iter().any(|c| c.starts_with("FETCH 5 ")), "{commands:?}");
    assert!(commands.iter().any(|c| c.starts_with("UID STORE 12 +FLAGS")), "{commands:?}");

    let stored = dir
        .path()
        .join("invoice_#1_20240102t030405000z")
        .join("invoice.pdf");
    assert_eq!(std::fs::read(stored).unwrap(), b"Hello, PDF!");
}

#[tokio::test]
async fn test_expunge_alone_is_not_mail() {
    let (port, log) = start_server(&["* 2 EXPUNGE", BYE]).await;
    let dir = tempfile::tempdir().unwrap();

    let (events, state) = run_session(port, dir.path()).await;

    assert_eq!(events, ["ready", "end"]);
    assert_eq!(state, SessionState::Ended);
    assert!(!log.lock().unwrap().iter().any(|c| c.starts_with("FETCH")));
}

// ─────────────────────────────────────────────────────────────────────────────
// Server Shutdown
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_bye_during_idle_ends_session() {
    let (port, log) = start_server(&[BYE]).await;
    let dir = tempfile::tempdir().unwrap();

    let (events, state) = run_session(port, dir.path()).await;

    assert_eq!(events, ["ready", "end"]);
    assert_eq!(state, SessionState::Ended);

    let commands = log.lock().unwrap().clone();
    assert_eq!(commands.last().map(String::as_str), Some("IDLE"));
}
