use beach_replay::client::{handshake, read_json, write_json};
use beach_replay::error::{NegotiationError, ReplayError};
use beach_replay::metrics;
use beach_replay::negotiation::{
    CodecChoice, CodecPreferences, PROTOCOL_HISTORY, ProtocolHistory, VersionNegotiator,
};
use beach_replay::protocol::{CompressionType, DisplayDescription, EncodingType, ToServerHandshake};

const MAX_FRAME: usize = 64 * 1024;

fn json_only() -> CodecPreferences {
    CodecPreferences {
        compression: vec![CompressionType::None],
        encodings: vec![EncodingType::Json],
    }
}

/// Answers one hello with `host` and returns what the client advertised.
async fn serve_once(
    mut stream: tokio::io::DuplexStream,
    host: VersionNegotiator,
) -> ToServerHandshake {
    let hello: ToServerHandshake = read_json(&mut stream, MAX_FRAME).await.expect("hello");
    write_json(&mut stream, &host.reply(&hello), MAX_FRAME)
        .await
        .expect("reply");
    hello
}

#[test_timeout::tokio_timeout_test]
async fn older_client_negotiates_with_current_host() {
    let (mut client, host) = tokio::io::duplex(MAX_FRAME);
    let host_task = tokio::spawn(serve_once(host, VersionNegotiator::default()));

    let old = VersionNegotiator::new(ProtocolHistory::from_releases(&PROTOCOL_HISTORY[..1]))
        .with_preferences(json_only(), json_only());
    let display = DisplayDescription {
        x: 0,
        y: 0,
        width: 800,
        height: 600,
        scale_factor: 1.0,
    };
    let negotiated = handshake(&mut client, &old, vec![display], Some("t0k3n".into()), MAX_FRAME)
        .await
        .expect("negotiated");

    let hello = host_task.await.expect("host task");
    assert_eq!(hello.protocol_release, "0.1");
    assert_eq!(hello.token.as_deref(), Some("t0k3n"));
    assert_eq!(hello.displays, vec![display]);

    assert_eq!(negotiated.version.release, "0.1");
    let json = CodecChoice {
        compression: CompressionType::None,
        encoding: EncodingType::Json,
    };
    assert_eq!(negotiated.to_client, json);
    assert_eq!(negotiated.to_server, json);
}

#[test_timeout::tokio_timeout_test]
async fn current_client_follows_its_own_priority() {
    let (mut client, host) = tokio::io::duplex(MAX_FRAME);
    let host_task = tokio::spawn(serve_once(host, VersionNegotiator::default()));

    let client_side = VersionNegotiator::default().with_preferences(
        CodecPreferences {
            compression: vec![CompressionType::None, CompressionType::Gzip],
            encodings: vec![EncodingType::Json, EncodingType::Binary],
        },
        CodecPreferences::default(),
    );
    let negotiated = handshake(&mut client, &client_side, Vec::new(), None, MAX_FRAME)
        .await
        .expect("negotiated");
    host_task.await.expect("host task");

    assert_eq!(negotiated.version.release, "0.2");
    assert_eq!(negotiated.to_client.compression, CompressionType::None);
    assert_eq!(negotiated.to_client.encoding, EncodingType::Json);
    assert_eq!(negotiated.to_server.compression, CompressionType::Gzip);
    assert_eq!(negotiated.to_server.encoding, EncodingType::Binary);
}

#[test_timeout::tokio_timeout_test]
async fn host_rejection_is_fatal_and_counted() {
    let (mut client, host) = tokio::io::duplex(MAX_FRAME);
    let gzip_host = VersionNegotiator::default().with_preferences(
        CodecPreferences {
            compression: vec![CompressionType::Gzip],
            encodings: vec![EncodingType::Binary, EncodingType::Json],
        },
        CodecPreferences::default(),
    );
    let host_task = tokio::spawn(serve_once(host, gzip_host));

    let plain_client = VersionNegotiator::default().with_preferences(json_only(), json_only());
    let result = handshake(&mut client, &plain_client, Vec::new(), None, MAX_FRAME).await;
    host_task.await.expect("host task");

    match result {
        Err(ReplayError::Negotiation(NegotiationError::Rejected(reason))) => {
            assert!(reason.contains("compression"), "reason: {reason}");
        }
        other => panic!("expected a rejection, got {other:?}"),
    }
    let exposition = metrics::gather_text();
    assert!(exposition.contains("replay_negotiation_failures_total{reason=\"compression\"}"));
    assert!(exposition.contains("replay_negotiation_failures_total{reason=\"rejected\"}"));
}
