use std::net::SocketAddr;
use std::time::Duration;

use assert_matches::assert_matches;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::sleep;

use tokio_letterbox::types::{FetchFields, Payload, SearchCriteria, Select};
use tokio_letterbox::{Config, ConnectionState, Error, ErrorKind, ImapClient, TlsMode};

const GREETING: &[u8] = b"* OK IMAP4rev1 ready\r\n";

fn init_logging() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

async fn listen() -> (TcpListener, SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, addr)
}

fn client_for(addr: SocketAddr) -> ImapClient {
    ImapClient::new(
        Config::new("127.0.0.1")
            .port(addr.port())
            .tls(TlsMode::NoTls)
            .timeout_ms(5_000),
    )
}

// One command line, split into its tag and the rest.
async fn read_command(reader: &mut BufReader<TcpStream>) -> (String, String) {
    let mut line = String::new();
    reader.read_line(&mut line).await.unwrap();
    let line = line.trim_end().to_string();
    match line.split_once(' ') {
        Some((tag, rest)) => (tag.to_string(), rest.to_string()),
        None => (line, String::new()),
    }
}

#[tokio::test]
async fn connect_reads_greeting() {
    init_logging();
    let (listener, addr) = listen().await;
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        stream.write_all(GREETING).await.unwrap();
        // hold the socket open until the client is done
        sleep(Duration::from_secs(1)).await;
    });

    let client = client_for(addr);
    client.connect().await.unwrap();
    assert!(client.is_connected().await);
    assert_eq!(client.state().await, ConnectionState::Connected);
    assert_eq!(client.error().await, ErrorKind::NoErr);
}

#[tokio::test]
async fn preauth_greeting_authenticates() {
    let (listener, addr) = listen().await;
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        stream
            .write_all(b"* PREAUTH already trusted\r\n")
            .await
            .unwrap();
        sleep(Duration::from_secs(1)).await;
    });

    let client = client_for(addr);
    client.connect().await.unwrap();
    assert_eq!(client.state().await, ConnectionState::Authenticated);
}

#[tokio::test]
async fn duplicate_connect_is_rejected() {
    let (listener, addr) = listen().await;
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        stream.write_all(GREETING).await.unwrap();
        sleep(Duration::from_secs(1)).await;
    });

    let client = client_for(addr);
    client.connect().await.unwrap();
    assert_matches!(client.connect().await, Err(Error::Duplicate(_)));
    assert_eq!(client.error().await, ErrorKind::Duplicate);
    client.reset_error().await;
    assert_eq!(client.error().await, ErrorKind::NoErr);
}

#[tokio::test]
async fn bye_greeting_is_unexpected() {
    let (listener, addr) = listen().await;
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        stream.write_all(b"* BYE go away\r\n").await.unwrap();
    });

    let client = client_for(addr);
    assert_matches!(client.connect().await, Err(Error::Unexpected(_)));
    assert!(client.is_disconnected().await);
}

#[tokio::test]
async fn login_success_authenticates() {
    init_logging();
    let (listener, addr) = listen().await;
    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut reader = BufReader::new(stream);
        reader.get_mut().write_all(GREETING).await.unwrap();
        let (tag, rest) = read_command(&mut reader).await;
        assert_eq!(rest, "LOGIN u p");
        reader
            .get_mut()
            .write_all(format!("{tag} OK LOGIN completed\r\n").as_bytes())
            .await
            .unwrap();
        sleep(Duration::from_secs(1)).await;
    });

    let client = client_for(addr);
    client.connect().await.unwrap();
    let handle = client.login("u", "p").await.unwrap();
    assert_matches!(handle.wait().await, Ok(Payload::Login(_)));
    assert_eq!(client.state().await, ConnectionState::Authenticated);
    server.await.unwrap();
}

#[tokio::test]
async fn login_refused_is_login_error() {
    let (listener, addr) = listen().await;
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut reader = BufReader::new(stream);
        reader.get_mut().write_all(GREETING).await.unwrap();
        let (tag, _) = read_command(&mut reader).await;
        reader
            .get_mut()
            .write_all(format!("{tag} NO bad credentials\r\n").as_bytes())
            .await
            .unwrap();
        sleep(Duration::from_secs(1)).await;
    });

    let client = client_for(addr);
    client.connect().await.unwrap();
    let handle = client.login("u", "wrong").await.unwrap();
    assert_eq!(
        handle.wait().await,
        Err(Error::Login("bad credentials".to_string()))
    );
    assert_eq!(client.error().await, ErrorKind::Login);
    assert_eq!(client.error_string().await, "bad credentials");
    // the connection survives a refused login
    assert_eq!(client.state().await, ConnectionState::Connected);
}

#[tokio::test]
async fn noop_bad_is_bad_command() {
    let (listener, addr) = listen().await;
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut reader = BufReader::new(stream);
        reader.get_mut().write_all(GREETING).await.unwrap();
        let (tag, _) = read_command(&mut reader).await;
        reader
            .get_mut()
            .write_all(format!("{tag} BAD syntax\r\n").as_bytes())
            .await
            .unwrap();
        sleep(Duration::from_secs(1)).await;
    });

    let client = client_for(addr);
    client.connect().await.unwrap();
    let handle = client.noop().await.unwrap();
    assert_eq!(handle.wait().await, Err(Error::BadCommand("syntax".to_string())));
    assert_eq!(client.error().await, ErrorKind::BadCommand);
}

#[tokio::test]
async fn list_returns_mailboxes() {
    let (listener, addr) = listen().await;
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut reader = BufReader::new(stream);
        reader.get_mut().write_all(GREETING).await.unwrap();
        let (tag, rest) = read_command(&mut reader).await;
        assert_eq!(rest, "LIST \"\" *");
        reader
            .get_mut()
            .write_all(
                format!(
                    "* LIST (\\HasNoChildren) \"/\" \"INBOX\"\r\n\
                     * LIST (\\HasChildren) \"/\" \"Sent\"\r\n\
                     {tag} OK LIST completed\r\n"
                )
                .as_bytes(),
            )
            .await
            .unwrap();
        sleep(Duration::from_secs(1)).await;
    });

    let client = client_for(addr);
    client.connect().await.unwrap();
    let handle = client.list("\"\"", "*").await.unwrap();
    let Ok(Payload::List(items)) = handle.wait().await else {
        panic!("expected a list payload");
    };
    assert_eq!(items.len(), 2);
    assert_eq!(items[0].parent, "/");
    assert_eq!(items[0].name, "INBOX");
    assert_eq!(items[0].attrs, vec!["HasNoChildren".to_string()]);
    assert_eq!(items[1].name, "Sent");
}

#[tokio::test]
async fn select_returns_summary() {
    let (listener, addr) = listen().await;
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut reader = BufReader::new(stream);
        reader.get_mut().write_all(GREETING).await.unwrap();
        let (tag, rest) = read_command(&mut reader).await;
        assert_eq!(rest, "SELECT INBOX");
        reader
            .get_mut()
            .write_all(
                format!(
                    "* FLAGS (\\Answered \\Seen)\r\n\
                     * 12 EXISTS\r\n\
                     * 3 RECENT\r\n\
                     * OK [UNSEEN 5] first unseen\r\n\
                     * OK [UIDVALIDITY 1234] uid valid\r\n\
                     * OK [PERMANENTFLAGS (\\Seen)] perm\r\n\
                     {tag} OK [READ-WRITE] SELECT done\r\n"
                )
                .as_bytes(),
            )
            .await
            .unwrap();
        sleep(Duration::from_secs(1)).await;
    });

    let client = client_for(addr);
    client.connect().await.unwrap();
    let handle = client.select("INBOX").await.unwrap();
    let Ok(Payload::Select(summary)) = handle.wait().await else {
        panic!("expected a select payload");
    };
    assert_eq!(
        summary,
        Select {
            exists: 12,
            recent: 3,
            unseen: 5,
            uidvalidity: 1234,
            flags: vec!["Answered".to_string(), "Seen".to_string()],
            permanent_flags: vec!["Seen".to_string()],
            permission: "READ-WRITE".to_string(),
        }
    );
}

#[tokio::test]
async fn search_returns_ids() {
    let (listener, addr) = listen().await;
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut reader = BufReader::new(stream);
        reader.get_mut().write_all(GREETING).await.unwrap();
        let (tag, rest) = read_command(&mut reader).await;
        assert_eq!(rest, "SEARCH ALL");
        reader
            .get_mut()
            .write_all(format!("* SEARCH 1 3 5\r\n{tag} OK SEARCH done\r\n").as_bytes())
            .await
            .unwrap();
        sleep(Duration::from_secs(1)).await;
    });

    let client = client_for(addr);
    client.connect().await.unwrap();
    let handle = client.search(SearchCriteria::All).await.unwrap();
    assert_eq!(handle.wait().await, Ok(Payload::Search(vec![1, 3, 5])));
}

#[tokio::test]
async fn fetch_literal_split_across_packets() {
    init_logging();
    let (listener, addr) = listen().await;
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut reader = BufReader::new(stream);
        reader.get_mut().write_all(GREETING).await.unwrap();
        let (tag, rest) = read_command(&mut reader).await;
        assert_eq!(rest, "FETCH 1 (BODY[1] )");
        reader
            .get_mut()
            .write_all(b"* 1 FETCH (BODY[1] {11}\r\nHello ")
            .await
            .unwrap();
        reader.get_mut().flush().await.unwrap();
        sleep(Duration::from_millis(50)).await;
        reader
            .get_mut()
            .write_all(format!("World\r\n)\r\n{tag} OK FETCH done\r\n").as_bytes())
            .await
            .unwrap();
        sleep(Duration::from_secs(1)).await;
    });

    let client = client_for(addr);
    client.connect().await.unwrap();
    let handle = client.fetch(1, FetchFields::TEXT, 1).await.unwrap();
    let Ok(Payload::Fetch(messages)) = handle.wait().await else {
        panic!("expected a fetch payload");
    };
    assert_eq!(messages[&1]["BODY[1]"], b"Hello World".to_vec());
    assert_eq!(messages[&1]["BODY[1]"].len(), 11);
}

#[tokio::test]
async fn pipelined_commands_complete_in_submission_order() {
    let (listener, addr) = listen().await;
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut reader = BufReader::new(stream);
        reader.get_mut().write_all(GREETING).await.unwrap();
        // all three commands arrive before any response goes out
        let (tag1, _) = read_command(&mut reader).await;
        let (tag2, rest2) = read_command(&mut reader).await;
        let (tag3, _) = read_command(&mut reader).await;
        assert_eq!(rest2, "SEARCH UNSEEN");
        reader
            .get_mut()
            .write_all(
                format!(
                    "{tag1} OK NOOP done\r\n\
                     * SEARCH 2 4\r\n\
                     {tag2} OK SEARCH done\r\n\
                     {tag3} OK NOOP done\r\n"
                )
                .as_bytes(),
            )
            .await
            .unwrap();
        sleep(Duration::from_secs(1)).await;
    });

    let client = client_for(addr);
    client.connect().await.unwrap();
    let first = client.noop().await.unwrap();
    let second = client.search(SearchCriteria::Unseen).await.unwrap();
    let third = client.noop().await.unwrap();

    assert_matches!(first.wait().await, Ok(Payload::Noop(_)));
    assert_eq!(second.wait().await, Ok(Payload::Search(vec![2, 4])));
    assert_matches!(third.wait().await, Ok(Payload::Noop(_)));

    // the readable queue preserves the same order
    assert_matches!(client.read().await, Some(Payload::Noop(_)));
    assert_matches!(client.read().await, Some(Payload::Search(_)));
    assert_matches!(client.read().await, Some(Payload::Noop(_)));
    assert_eq!(client.read().await, None);
}

#[tokio::test]
async fn tags_increase_from_zero() {
    let (listener, addr) = listen().await;
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut reader = BufReader::new(stream);
        reader.get_mut().write_all(GREETING).await.unwrap();
        let (tag1, _) = read_command(&mut reader).await;
        let (tag2, _) = read_command(&mut reader).await;
        let letter = tag1.chars().next().unwrap();
        assert!(letter.is_ascii_uppercase());
        assert_eq!(&tag1[1..], "000");
        assert_eq!(tag2, format!("{letter}001"));
        reader
            .get_mut()
            .write_all(format!("{tag1} OK done\r\n{tag2} OK done\r\n").as_bytes())
            .await
            .unwrap();
        sleep(Duration::from_secs(1)).await;
    });

    let client = client_for(addr);
    client.connect().await.unwrap();
    let first = client.noop().await.unwrap();
    let second = client.noop().await.unwrap();
    first.wait().await.unwrap();
    second.wait().await.unwrap();
}

#[tokio::test]
async fn garbage_response_is_parse_error() {
    let (listener, addr) = listen().await;
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut reader = BufReader::new(stream);
        reader.get_mut().write_all(GREETING).await.unwrap();
        let _ = read_command(&mut reader).await;
        reader
            .get_mut()
            .write_all(b"!!! nonsense\r\n")
            .await
            .unwrap();
        sleep(Duration::from_secs(1)).await;
    });

    let client = client_for(addr);
    client.connect().await.unwrap();
    let handle = client.noop().await.unwrap();
    assert_matches!(handle.wait().await, Err(Error::Parse(_)));
    assert_eq!(client.error().await, ErrorKind::Parse);
}

#[tokio::test]
async fn command_while_disconnected_fails_without_writing() {
    init_logging();
    let client = ImapClient::new(Config::new("127.0.0.1").port(1).tls(TlsMode::NoTls));
    assert_matches!(
        client.list("\"\"", "*").await,
        Err(Error::NotConnected(_))
    );
    assert_eq!(client.error().await, ErrorKind::NotConnected);
}

#[tokio::test]
async fn disconnect_resets_state() {
    let (listener, addr) = listen().await;
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        stream.write_all(GREETING).await.unwrap();
        // wait for the client's FIN, then close our side
        let mut buf = [0u8; 64];
        loop {
            match stream.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            }
        }
    });

    let client = client_for(addr);
    client.connect().await.unwrap();
    client.disconnect().await.unwrap();
    assert!(client.wait_for_disconnected(5_000).await);
    assert!(client.is_disconnected().await);
    assert_matches!(client.disconnect().await, Err(Error::Duplicate(_)));
}

#[tokio::test]
async fn logout_completes_then_server_closes() {
    let (listener, addr) = listen().await;
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut reader = BufReader::new(stream);
        reader.get_mut().write_all(GREETING).await.unwrap();
        let (tag, rest) = read_command(&mut reader).await;
        assert_eq!(rest, "LOGOUT");
        reader
            .get_mut()
            .write_all(format!("* BYE logging out\r\n{tag} OK LOGOUT completed\r\n").as_bytes())
            .await
            .unwrap();
        // server closes the connection after LOGOUT
    });

    let client = client_for(addr);
    client.connect().await.unwrap();
    let handle = client.logout().await.unwrap();
    assert_matches!(handle.wait().await, Ok(Payload::Logout(_)));
    assert!(client.wait_for_disconnected(5_000).await);
}

#[tokio::test]
async fn transport_close_fails_pending_commands() {
    let (listener, addr) = listen().await;
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut reader = BufReader::new(stream);
        reader.get_mut().write_all(GREETING).await.unwrap();
        let _ = read_command(&mut reader).await;
        // drop without answering
    });

    let client = client_for(addr);
    client.connect().await.unwrap();
    let handle = client.noop().await.unwrap();
    assert_matches!(handle.wait().await, Err(Error::Internal(_)));
    assert!(client.is_disconnected().await);
}

#[tokio::test]
async fn wait_for_ready_read_sees_completion() {
    let (listener, addr) = listen().await;
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut reader = BufReader::new(stream);
        reader.get_mut().write_all(GREETING).await.unwrap();
        let (tag, _) = read_command(&mut reader).await;
        sleep(Duration::from_millis(20)).await;
        reader
            .get_mut()
            .write_all(format!("{tag} OK NOOP done\r\n").as_bytes())
            .await
            .unwrap();
        sleep(Duration::from_secs(1)).await;
    });

    let client = client_for(addr);
    client.connect().await.unwrap();
    let _handle = client.noop().await.unwrap();
    assert!(client.wait_for_ready_read(5_000).await);
    assert_matches!(client.read().await, Some(Payload::Noop(_)));
}
