//! Connection-time protocol negotiation.
//!
//! A client advertises the fingerprint of its message schema together with
//! the compression and encoding kinds it can handle, most preferred first.
//! The host checks the fingerprint against the release history, picks the
//! first advertised kind it also supports for each direction, and answers
//! with its choice. Every failure here is fatal: the connection never opens.

use tracing::{debug, info, warn};

use crate::error::NegotiationError;
use crate::metrics;
use crate::protocol::schema::{Shape, fingerprint};
use crate::protocol::{
    CompressionType, DisplayDescription, EncodingType, HandshakeReply, ToClientHandshake,
    ToServerHandshake, schema_roots,
};

/// One entry of the append-only release history.
#[derive(Clone, Copy)]
pub struct Release {
    pub label: &'static str,
    roots: fn() -> Vec<Shape>,
}

impl Release {
    pub const fn new(label: &'static str, roots: fn() -> Vec<Shape>) -> Self {
        Self { label, roots }
    }
}

fn release_0_1_roots() -> Vec<Shape> {
    schema_roots()
        .iter()
        .map(|root| root.without_variant("ServerEvent", "set_transform"))
        .collect()
}

/// Oldest first. Only ever append.
pub const PROTOCOL_HISTORY: &[Release] = &[
    Release::new("0.1", release_0_1_roots),
    Release::new("0.2", schema_roots),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolVersion {
    pub id: u32,
    pub release: String,
    pub fingerprint: i32,
}

#[derive(Debug, Clone)]
pub struct ProtocolHistory {
    entries: Vec<ProtocolVersion>,
}

impl ProtocolHistory {
    pub fn builtin() -> Self {
        Self::from_releases(PROTOCOL_HISTORY)
    }

    pub fn from_releases(releases: &[Release]) -> Self {
        let entries = releases
            .iter()
            .enumerate()
            .map(|(id, release)| ProtocolVersion {
                id: id as u32,
                release: release.label.to_string(),
                fingerprint: fingerprint(&(release.roots)()),
            })
            .collect();
        Self { entries }
    }

    pub fn from_entries(entries: Vec<ProtocolVersion>) -> Self {
        Self { entries }
    }

    /// The release this build speaks.
    pub fn current(&self) -> Option<&ProtocolVersion> {
        self.entries.last()
    }

    pub fn find(&self, fingerprint: i32) -> Option<&ProtocolVersion> {
        self.entries
            .iter()
            .rev()
            .find(|entry| entry.fingerprint == fingerprint)
    }

    pub fn entries(&self) -> &[ProtocolVersion] {
        &self.entries
    }

    fn describe(&self) -> String {
        self.entries
            .iter()
            .map(|entry| format!("{}={}", entry.release, entry.fingerprint))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodecPreferences {
    pub compression: Vec<CompressionType>,
    pub encodings: Vec<EncodingType>,
}

impl Default for CodecPreferences {
    fn default() -> Self {
        Self {
            compression: vec![CompressionType::Gzip, CompressionType::None],
            encodings: vec![EncodingType::Binary, EncodingType::Json],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodecChoice {
    pub compression: CompressionType,
    pub encoding: EncodingType,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegotiatedProtocol {
    pub version: ProtocolVersion,
    pub to_client: CodecChoice,
    pub to_server: CodecChoice,
}

/// First entry of `advertised` that `supported` also contains.
pub fn select_first_mutual<T: Copy + PartialEq>(advertised: &[T], supported: &[T]) -> Option<T> {
    advertised
        .iter()
        .copied()
        .find(|candidate| supported.contains(candidate))
}

#[derive(Debug, Clone)]
pub struct VersionNegotiator {
    history: ProtocolHistory,
    to_client: CodecPreferences,
    to_server: CodecPreferences,
}

impl Default for VersionNegotiator {
    fn default() -> Self {
        Self::new(ProtocolHistory::builtin())
    }
}

impl VersionNegotiator {
    pub fn new(history: ProtocolHistory) -> Self {
        Self {
            history,
            to_client: CodecPreferences::default(),
            to_server: CodecPreferences::default(),
        }
    }

    pub fn with_preferences(
        mut self,
        to_client: CodecPreferences,
        to_server: CodecPreferences,
    ) -> Self {
        self.to_client = to_client;
        self.to_server = to_server;
        self
    }

    pub fn history(&self) -> &ProtocolHistory {
        &self.history
    }

    /// Builds the client's opening handshake.
    pub fn client_hello(
        &self,
        displays: Vec<DisplayDescription>,
        token: Option<String>,
    ) -> ToServerHandshake {
        let (fingerprint, id, release) = match self.history.current() {
            Some(current) => (current.fingerprint, current.id, current.release.clone()),
            None => (0, 0, String::new()),
        };
        ToServerHandshake {
            protocol_fingerprint: fingerprint,
            protocol_version_id: id,
            protocol_release: release,
            token,
            client_does_window_management: false,
            displays,
            supported_to_client_compression: self.to_client.compression.clone(),
            supported_to_client_encodings: self.to_client.encodings.clone(),
            supported_to_server_compression: self.to_server.compression.clone(),
            supported_to_server_encodings: self.to_server.encodings.clone(),
        }
    }

    /// Host side: validate a client hello and choose codecs for both
    /// directions in the client's priority order.
    pub fn answer(&self, hello: &ToServerHandshake) -> Result<ToClientHandshake, NegotiationError> {
        let result = self.answer_inner(hello);
        if let Err(err) = &result {
            record_failure(err);
        }
        result
    }

    fn answer_inner(&self, hello: &ToServerHandshake) -> Result<ToClientHandshake, NegotiationError> {
        let version = self.check_fingerprint(hello.protocol_fingerprint)?;
        let to_client = choose(
            &hello.supported_to_client_compression,
            &hello.supported_to_client_encodings,
            &self.to_client,
        )?;
        let to_server = choose(
            &hello.supported_to_server_compression,
            &hello.supported_to_server_encodings,
            &self.to_server,
        )?;
        info!(
            target = "replay::negotiation",
            release = %version.release,
            client_release = %hello.protocol_release,
            to_client = ?to_client,
            to_server = ?to_server,
            "accepted client handshake"
        );
        Ok(ToClientHandshake {
            protocol_fingerprint: version.fingerprint,
            protocol_version_id: version.id,
            protocol_release: version.release,
            to_client_compression: to_client.compression,
            to_client_encoding: to_client.encoding,
            to_server_compression: to_server.compression,
            to_server_encoding: to_server.encoding,
        })
    }

    /// Host side: like [`answer`](Self::answer) but folds failures into a
    /// rejection the client can display.
    pub fn reply(&self, hello: &ToServerHandshake) -> HandshakeReply {
        match self.answer(hello) {
            Ok(accepted) => HandshakeReply::Accepted(accepted),
            Err(err) => HandshakeReply::Rejected {
                reason: err.to_string(),
            },
        }
    }

    /// Client side: validate the host's reply against what was offered.
    pub fn accept(&self, reply: HandshakeReply) -> Result<NegotiatedProtocol, NegotiationError> {
        let result = self.accept_inner(reply);
        if let Err(err) = &result {
            record_failure(err);
        }
        result
    }

    fn accept_inner(&self, reply: HandshakeReply) -> Result<NegotiatedProtocol, NegotiationError> {
        let accepted = match reply {
            HandshakeReply::Accepted(accepted) => accepted,
            HandshakeReply::Rejected { reason } => return Err(NegotiationError::Rejected(reason)),
        };
        let version = self.check_fingerprint(accepted.protocol_fingerprint)?;
        let to_client = CodecChoice {
            compression: offered(accepted.to_client_compression, &self.to_client.compression)
                .ok_or(NegotiationError::UnofferedCompression(
                    accepted.to_client_compression,
                ))?,
            encoding: offered(accepted.to_client_encoding, &self.to_client.encodings)
                .ok_or(NegotiationError::UnofferedEncoding(accepted.to_client_encoding))?,
        };
        let to_server = CodecChoice {
            compression: offered(accepted.to_server_compression, &self.to_server.compression)
                .ok_or(NegotiationError::UnofferedCompression(
                    accepted.to_server_compression,
                ))?,
            encoding: offered(accepted.to_server_encoding, &self.to_server.encodings)
                .ok_or(NegotiationError::UnofferedEncoding(accepted.to_server_encoding))?,
        };
        if Some(&version) != self.history.current() {
            warn!(
                target = "replay::negotiation",
                release = %version.release,
                "host speaks an older protocol release"
            );
        }
        debug!(
            target = "replay::negotiation",
            release = %version.release,
            ?to_client,
            ?to_server,
            "negotiated codecs"
        );
        Ok(NegotiatedProtocol {
            version,
            to_client,
            to_server,
        })
    }

    fn check_fingerprint(&self, peer: i32) -> Result<ProtocolVersion, NegotiationError> {
        self.history
            .find(peer)
            .cloned()
            .ok_or_else(|| NegotiationError::UnknownFingerprint {
                peer,
                known: self.history.describe(),
            })
    }
}

fn choose(
    compression: &[CompressionType],
    encodings: &[EncodingType],
    local: &CodecPreferences,
) -> Result<CodecChoice, NegotiationError> {
    let compression = select_first_mutual(compression, &local.compression).ok_or_else(|| {
        NegotiationError::NoCommonCompression {
            advertised: compression.to_vec(),
        }
    })?;
    let encoding = select_first_mutual(encodings, &local.encodings).ok_or_else(|| {
        NegotiationError::NoCommonEncoding {
            advertised: encodings.to_vec(),
        }
    })?;
    Ok(CodecChoice {
        compression,
        encoding,
    })
}

fn offered<T: Copy + PartialEq>(selected: T, offers: &[T]) -> Option<T> {
    offers.contains(&selected).then_some(selected)
}

fn record_failure(err: &NegotiationError) {
    warn!(target = "replay::negotiation", error = %err, "negotiation failed");
    metrics::NEGOTIATION_FAILURES
        .with_label_values(&[err.reason_label()])
        .inc();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn display() -> DisplayDescription {
        DisplayDescription {
            x: 0,
            y: 0,
            width: 1920,
            height: 1080,
            scale_factor: 2.0,
        }
    }

    #[test_timeout::timeout]
    fn builtin_history_entries_are_distinct() {
        let history = ProtocolHistory::builtin();
        let entries = history.entries();
        assert_eq!(entries.len(), PROTOCOL_HISTORY.len());
        assert_ne!(entries[0].fingerprint, entries[1].fingerprint);
        assert_eq!(history.current().map(|v| v.release.as_str()), Some("0.2"));
    }

    #[test_timeout::timeout]
    fn current_release_matches_live_schema() {
        let history = ProtocolHistory::builtin();
        let current = history.current().expect("current release");
        assert_eq!(current.fingerprint, fingerprint(&schema_roots()));
    }

    #[test_timeout::timeout]
    fn selection_follows_advertiser_priority() {
        let advertised = [CompressionType::None, CompressionType::Gzip];
        let supported = [CompressionType::Gzip, CompressionType::None];
        assert_eq!(
            select_first_mutual(&advertised, &supported),
            Some(CompressionType::None)
        );
        assert_eq!(select_first_mutual::<CompressionType>(&[], &supported), None);
    }

    #[test_timeout::timeout]
    fn round_trip_between_client_and_host() {
        let client = VersionNegotiator::default();
        let host = VersionNegotiator::default();
        let hello = client.client_hello(vec![display()], Some("token".into()));
        let reply = host.reply(&hello);
        let negotiated = client.accept(reply).expect("negotiated");
        assert_eq!(negotiated.to_client.compression, CompressionType::Gzip);
        assert_eq!(negotiated.to_client.encoding, EncodingType::Binary);
        assert_eq!(negotiated.version.release, "0.2");
    }

    #[test_timeout::timeout]
    fn older_release_is_still_accepted() {
        let host = VersionNegotiator::default();
        let mut hello = VersionNegotiator::default().client_hello(vec![display()], None);
        let old = host.history().entries()[0].clone();
        hello.protocol_fingerprint = old.fingerprint;
        let answer = host.answer(&hello).expect("old release accepted");
        assert_eq!(answer.protocol_release, "0.1");
    }

    #[test_timeout::timeout]
    fn unknown_fingerprint_is_refused() {
        let host = VersionNegotiator::default();
        let mut hello = VersionNegotiator::default().client_hello(vec![display()], None);
        hello.protocol_fingerprint = hello.protocol_fingerprint.wrapping_add(1);
        let err = host.answer(&hello).expect_err("unknown fingerprint");
        assert!(matches!(err, NegotiationError::UnknownFingerprint { .. }));
        match host.reply(&hello) {
            HandshakeReply::Rejected { reason } => assert!(reason.contains("fingerprint")),
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[test_timeout::timeout]
    fn no_common_compression_is_refused() {
        let host = VersionNegotiator::default().with_preferences(
            CodecPreferences {
                compression: vec![CompressionType::None],
                encodings: vec![EncodingType::Json],
            },
            CodecPreferences::default(),
        );
        let client = VersionNegotiator::default().with_preferences(
            CodecPreferences {
                compression: vec![CompressionType::Gzip],
                encodings: vec![EncodingType::Json],
            },
            CodecPreferences::default(),
        );
        let hello = client.client_hello(vec![display()], None);
        let err = host.answer(&hello).expect_err("no mutual compression");
        assert_eq!(
            err,
            NegotiationError::NoCommonCompression {
                advertised: vec![CompressionType::Gzip]
            }
        );
    }

    #[test_timeout::timeout]
    fn no_common_encoding_is_refused() {
        let host = VersionNegotiator::default().with_preferences(
            CodecPreferences {
                compression: vec![CompressionType::None],
                encodings: vec![EncodingType::Binary],
            },
            CodecPreferences::default(),
        );
        let client = VersionNegotiator::default().with_preferences(
            CodecPreferences {
                compression: vec![CompressionType::None],
                encodings: vec![EncodingType::Json],
            },
            CodecPreferences::default(),
        );
        let hello = client.client_hello(vec![display()], None);
        assert!(matches!(
            host.answer(&hello),
            Err(NegotiationError::NoCommonEncoding { .. })
        ));
    }

    #[test_timeout::timeout]
    fn client_refuses_unoffered_selection() {
        let client = VersionNegotiator::default().with_preferences(
            CodecPreferences {
                compression: vec![CompressionType::None],
                encodings: vec![EncodingType::Json],
            },
            CodecPreferences::default(),
        );
        let current = client.history().current().expect("current").clone();
        let reply = HandshakeReply::Accepted(ToClientHandshake {
            protocol_fingerprint: current.fingerprint,
            protocol_version_id: current.id,
            protocol_release: current.release,
            to_client_compression: CompressionType::Gzip,
            to_client_encoding: EncodingType::Json,
            to_server_compression: CompressionType::None,
            to_server_encoding: EncodingType::Json,
        });
        assert_eq!(
            client.accept(reply),
            Err(NegotiationError::UnofferedCompression(CompressionType::Gzip))
        );
    }

    #[test_timeout::timeout]
    fn explicit_rejection_surfaces_reason() {
        let client = VersionNegotiator::default();
        let err = client
            .accept(HandshakeReply::Rejected {
                reason: "maintenance".into(),
            })
            .expect_err("rejected");
        assert_eq!(err, NegotiationError::Rejected("maintenance".into()));
    }
}
