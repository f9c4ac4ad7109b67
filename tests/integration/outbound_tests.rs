//! Integration tests for one-shot outbound sends and the message helpers.

use tokio::io::AsyncReadExt;
use tokio::net::TcpListener;

use companions_agent::config::Endpoint;
use companions_agent::connection::{send_once, Outbound};
use companions_agent::kqml::{parse_message, Performative, ResponseMode, Term, Value};
use companions_agent::AppError;

use super::test_helpers::{free_port, FakeFacilitator};

fn outbound(port: u16) -> Outbound {
    Outbound::new(
        Endpoint::new("127.0.0.1", port).expect("valid endpoint"),
        "Sender",
    )
}

// ── One message per connection ───────────────────────────────────────────────

/// Each send opens a connection, writes one line, and closes it; the peer
/// sees end-of-stream right after the newline.
#[tokio::test]
async fn send_once_writes_one_line_then_closes() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let port = listener.local_addr().expect("local addr").port();
    let endpoint = Endpoint::new("127.0.0.1", port).expect("valid endpoint");

    let server = tokio::spawn(async move {
        let mut received = Vec::new();
        for _ in 0..20 {
            let (mut stream, _) = listener.accept().await.expect("accept");
            let mut raw = String::new();
            stream
                .read_to_string(&mut raw)
                .await
                .expect("peer closes its side");
            received.push(raw);
        }
        received
    });

    for i in 0..20 {
        let msg = Performative::new("tell")
            .with("sender", Term::token("Sender"))
            .with("content", Term::token(format!("n{i}")));
        send_once(&endpoint, &msg).await.expect("send succeeds");
    }

    let received = server.await.expect("server task");
    assert_eq!(received.len(), 20);
    for (i, raw) in received.iter().enumerate() {
        assert_eq!(raw, &format!("(tell :sender Sender :content n{i})\n"));
    }
}

/// Open sockets whose remote end is `port`. A closed socket may linger in the
/// kernel table but is no longer tied to an inode.
#[cfg(target_os = "linux")]
fn held_sockets_to(port: u16) -> usize {
    let remote = format!(":{port:04X}");
    ["/proc/net/tcp", "/proc/net/tcp6"]
        .iter()
        .filter_map(|table| std::fs::read_to_string(table).ok())
        .map(|table| {
            table
                .lines()
                .skip(1)
                .filter(|row| {
                    let cols: Vec<&str> = row.split_whitespace().collect();
                    cols.get(2).is_some_and(|rem| rem.ends_with(&remote))
                        && cols.get(9).is_some_and(|inode| *inode != "0")
                })
                .count()
        })
        .sum()
}

/// A peer that resets mid-write fails the send, and the socket is still
/// released.
#[cfg(target_os = "linux")]
#[tokio::test]
async fn send_once_releases_socket_when_write_fails() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let port = listener.local_addr().expect("local addr").port();
    let endpoint = Endpoint::new("127.0.0.1", port).expect("valid endpoint");

    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.expect("accept");
        let mut head = [0_u8; 1024];
        stream.read_exact(&mut head).await.expect("first bytes arrive");
        // Dropping with unread data makes the kernel answer with a reset.
        drop(stream);
        listener
    });

    let huge = Performative::new("tell").with("content", Term::string("x".repeat(32 << 20)));
    let err = send_once(&endpoint, &huge)
        .await
        .expect_err("reset peer fails the write");
    assert!(matches!(err, AppError::Connection(_)), "got {err:?}");

    let _listener = server.await.expect("server task");
    assert_eq!(held_sockets_to(port), 0, "socket must be closed after a failed write");
}

/// The success path releases its socket too.
#[cfg(target_os = "linux")]
#[tokio::test]
async fn send_once_releases_socket_after_success() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let port = listener.local_addr().expect("local addr").port();
    let endpoint = Endpoint::new("127.0.0.1", port).expect("valid endpoint");

    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.expect("accept");
        let mut raw = String::new();
        stream.read_to_string(&mut raw).await.expect("read to end");
        (listener, stream)
    });

    send_once(&endpoint, &Performative::new("tell"))
        .await
        .expect("send succeeds");
    let _held = server.await.expect("server task");
    assert_eq!(held_sockets_to(port), 0);
}

#[tokio::test]
async fn send_to_closed_port_is_connection_error() {
    let endpoint = Endpoint::new("127.0.0.1", free_port()).expect("valid endpoint");
    let err = send_once(&endpoint, &Performative::new("tell"))
        .await
        .expect_err("nothing listening");
    assert!(matches!(err, AppError::Connection(_)), "got {err:?}");
}

// ── Helpers ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn error_reply_is_addressed_to_original_sender() {
    let mut facilitator = FakeFacilitator::start().await;
    let original =
        parse_message("(ask-if :sender bob :reply-with k2 :content (p))").expect("valid");

    outbound(facilitator.port)
        .error_reply(&original, "no idea")
        .await
        .expect("send succeeds");

    let error = facilitator.next_message().await;
    assert_eq!(
        error.to_string(),
        "(error :sender Sender :comment \"no idea\" :receiver bob :in-reply-to k2)"
    );
}

#[tokio::test]
async fn insert_data_marks_working_memory_only() {
    let mut facilitator = FakeFacilitator::start().await;
    let out = outbound(facilitator.port);
    let fact = Value::from(vec!["isa", "Fido", "Dog"]);

    out.insert_data("session-reasoner", &fact, true)
        .await
        .expect("send succeeds");
    out.insert_data("session-reasoner", &fact, false)
        .await
        .expect("send succeeds");

    assert_eq!(
        facilitator.next_message().await.to_string(),
        "(insert :sender Sender :receiver session-reasoner :wm-only? t :content (isa Fido Dog))"
    );
    assert_eq!(
        facilitator.next_message().await.to_string(),
        "(insert :sender Sender :receiver session-reasoner :content (isa Fido Dog))"
    );
}

#[tokio::test]
async fn insert_to_microtheory_wraps_in_ist_information() {
    let mut facilitator = FakeFacilitator::start().await;
    let out = outbound(facilitator.port);
    let facts = vec![
        Value::from(vec!["isa", "Fido", "Dog"]),
        Value::from(vec!["isa", "Tom", "Cat"]),
    ];

    out.insert_microtheory("session-reasoner", &facts, "PetsMt", false)
        .await
        .expect("send succeeds");

    for expected in ["(isa Fido Dog)", "(isa Tom Cat)"] {
        let msg = facilitator.next_message().await;
        assert!(msg.is("insert"));
        assert_eq!(
            msg.get("content").map(ToString::to_string),
            Some(format!("(ist-Information PetsMt {expected})"))
        );
    }
}

#[tokio::test]
async fn achieve_on_agent_sends_achieve() {
    let mut facilitator = FakeFacilitator::start().await;
    outbound(facilitator.port)
        .achieve_on_agent("interaction-manager", &Value::from("(speak hello)"))
        .await
        .expect("send succeeds");

    assert_eq!(
        facilitator.next_message().await.to_string(),
        "(achieve :sender Sender :receiver interaction-manager :content (speak hello))"
    );
}

/// Each advertisement gets the next `id` in sequence.
#[tokio::test]
async fn advertise_nests_ask_all_with_fresh_ids() {
    let mut facilitator = FakeFacilitator::start().await;
    let out = outbound(facilitator.port);
    let pattern = Term::parse("(weather ?city ?forecast)").expect("valid pattern");

    assert_eq!(out.advertise(&pattern).await.expect("send succeeds"), "id1");
    assert_eq!(out.clone().advertise(&pattern).await.expect("send succeeds"), "id2");

    assert_eq!(
        facilitator.next_message().await.to_string(),
        "(advertise :sender Sender :receiver facilitator :reply-with id1 \
         :content (ask-all :receiver Sender :in-reply-to id1 :content (weather ?city ?forecast)))"
    );
    assert_eq!(
        facilitator.next_message().await.get_atom("reply-with"),
        Some("id2")
    );
}

#[tokio::test]
async fn respond_to_query_sends_tell() {
    let mut facilitator = FakeFacilitator::start().await;
    let original = parse_message(
        "(ask-all :sender bob :reply-with w1 :response :bind :content (weather ?city))",
    )
    .expect("valid");
    let mode = ResponseMode::from_field(original.get("response"));

    outbound(facilitator.port)
        .respond_to_query(
            &original,
            original.get("content").expect("content"),
            &Value::from("Evanston"),
            mode,
        )
        .await
        .expect("send succeeds");

    assert_eq!(
        facilitator.next_message().await.to_string(),
        "(tell :sender Sender :content (weather (?city . Evanston)) :receiver bob :in-reply-to w1)"
    );
}
