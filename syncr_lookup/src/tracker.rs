//! The tracker backend (spec.md section 4.6 "Tracker backend"): a remote
//! server reached over the same half-close TCP framing the listener and
//! requester use, carrying a small typed request/response envelope.
//!
//! Grounded on `original_source`'s `send_request_to_tracker` (connect,
//! send, half-close the write side, read to EOF) and `TrackerKeyStore`/
//! `TrackerPeerStore` (`['GET'|'POST', id, data]` requests, `{result,
//! message, data}` responses, socket timeout folded into an ERROR
//! response so callers don't special-case it).

use std::collections::BTreeMap;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use syncr_core::codec::Value;
use syncr_core::crypto::{NodeId, PublicKey};
use syncr_core::error::{SyncrError, SyncrResult};

use crate::{PeerKeyStore, PeerRecord};

/// Tracker request type tags (spec.md section 6 "Peer store (tracker)
/// requests").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i64)]
enum RequestType {
    GetKey = 0,
    PostKey = 1,
    GetPeers = 2,
    PostPeer = 3,
}

const RESULT_OK: &[u8] = b"OK";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// A `PeerKeyStore` backed by a single remote tracker server.
pub struct TrackerClient {
    addr: SocketAddr,
    timeout: Duration,
}

impl TrackerClient {
    pub fn new(ip: IpAddr, port: u16) -> Self {
        TrackerClient {
            addr: SocketAddr::new(ip, port),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn send(&self, request_type: RequestType, id: &[u8], value: Value) -> SyncrResult<Value> {
        let mut req = BTreeMap::new();
        req.insert(b"type".to_vec(), Value::int(request_type as i64));
        req.insert(b"id".to_vec(), Value::bytes(id.to_vec()));
        req.insert(b"value".to_vec(), value);
        let request = Value::Dict(req).encode();

        let result = tokio::time::timeout(self.timeout, self.do_send(&request)).await;
        match result {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(SyncrError::peer_failure(format!(
                "tracker at {} timed out",
                self.addr
            ))),
        }
    }

    async fn do_send(&self, request: &[u8]) -> SyncrResult<Value> {
        let mut stream = TcpStream::connect(self.addr)
            .await
            .map_err(|e| SyncrError::peer_failure(format!("connect to tracker failed: {e}")))?;
        stream
            .write_all(request)
            .await
            .map_err(|e| SyncrError::peer_failure(format!("send to tracker failed: {e}")))?;
        stream
            .shutdown()
            .await
            .map_err(|e| SyncrError::peer_failure(format!("half-close to tracker failed: {e}")))?;

        let mut buf = Vec::new();
        stream
            .read_to_end(&mut buf)
            .await
            .map_err(|e| SyncrError::peer_failure(format!("read from tracker failed: {e}")))?;

        Value::decode(&buf).map_err(|e| SyncrError::peer_failure(format!("malformed tracker response: {e}")))
    }

    fn parse_envelope(response: Value) -> SyncrResult<Value> {
        let dict = response
            .as_dict()
            .ok_or_else(|| SyncrError::peer_failure("tracker response is not a dict"))?;
        let result = dict
            .get(b"result".as_slice())
            .and_then(Value::as_bytes)
            .ok_or_else(|| SyncrError::peer_failure("tracker response missing result"))?;
        if result != RESULT_OK {
            let message = dict
                .get(b"message".as_slice())
                .and_then(Value::as_bytes)
                .map(|b| String::from_utf8_lossy(b).into_owned())
                .unwrap_or_default();
            return Err(SyncrError::peer_failure(format!("tracker error: {message}")));
        }
        dict.get(b"data".as_slice())
            .cloned()
            .ok_or_else(|| SyncrError::peer_failure("tracker OK response missing data"))
    }
}

#[async_trait]
impl PeerKeyStore for TrackerClient {
    async fn set_key(&self, node_id: NodeId, public_key: &PublicKey) -> SyncrResult<()> {
        let der = public_key.to_spki_der()?;
        let response = self
            .send(RequestType::PostKey, &node_id, Value::bytes(der))
            .await?;
        Self::parse_envelope(response)?;
        Ok(())
    }

    async fn get_key(&self, node_id: NodeId) -> SyncrResult<Option<PublicKey>> {
        let response = self
            .send(RequestType::GetKey, &node_id, Value::List(vec![]))
            .await?;
        let data = match Self::parse_envelope(response) {
            Ok(data) => data,
            Err(SyncrError::PeerFailure(_)) => return Ok(None),
            Err(e) => return Err(e),
        };
        let der = data
            .as_bytes()
            .ok_or_else(|| SyncrError::peer_failure("tracker key data is not bytes"))?;
        Ok(Some(PublicKey::from_spki_der(der)?))
    }

    async fn announce(&self, drop_id: &[u8], peer: PeerRecord) -> SyncrResult<()> {
        let value = Value::List(vec![
            Value::bytes(peer.node_id.to_vec()),
            Value::bytes(peer.ip.to_string().into_bytes()),
            Value::int(peer.port as i64),
        ]);
        let response = self.send(RequestType::PostPeer, drop_id, value).await?;
        Self::parse_envelope(response)?;
        Ok(())
    }

    async fn lookup(&self, drop_id: &[u8]) -> SyncrResult<Vec<PeerRecord>> {
        let response = self
            .send(RequestType::GetPeers, drop_id, Value::List(vec![]))
            .await?;
        let data = Self::parse_envelope(response)?;
        let entries = data
            .as_list()
            .ok_or_else(|| SyncrError::peer_failure("tracker peers data is not a list"))?;
        entries.iter().map(peer_record_from_value).collect()
    }
}

fn peer_record_from_value(value: &Value) -> SyncrResult<PeerRecord> {
    let entry = value
        .as_list()
        .ok_or_else(|| SyncrError::peer_failure("peer entry is not a list"))?;
    let [node_id_v, ip_v, port_v] = entry else {
        return Err(SyncrError::peer_failure("peer entry does not have 3 fields"));
    };
    let node_id: NodeId = node_id_v
        .as_bytes()
        .ok_or_else(|| SyncrError::peer_failure("peer node_id is not bytes"))?
        .try_into()
        .map_err(|_| SyncrError::peer_failure("peer node_id is not 32 bytes"))?;
    let ip: IpAddr = ip_v
        .as_bytes()
        .and_then(|b| std::str::from_utf8(b).ok())
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| SyncrError::peer_failure("peer ip is not a valid address"))?;
    let port = port_v
        .as_int()
        .ok_or_else(|| SyncrError::peer_failure("peer port is not an int"))? as u16;
    Ok(PeerRecord { node_id, ip, port })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_record_roundtrips_through_value() {
        let record = PeerRecord {
            node_id: [9u8; 32],
            ip: "127.0.0.1".parse().unwrap(),
            port: 4000,
        };
        let value = Value::List(vec![
            Value::bytes(record.node_id.to_vec()),
            Value::bytes(record.ip.to_string().into_bytes()),
            Value::int(record.port as i64),
        ]);
        let parsed = peer_record_from_value(&value).unwrap();
        assert_eq!(parsed, record);
    }

    #[test]
    fn parse_envelope_rejects_error_result() {
        let mut d = BTreeMap::new();
        d.insert(b"result".to_vec(), Value::bytes(b"ERROR".to_vec()));
        d.insert(b"message".to_vec(), Value::bytes(b"no such drop".to_vec()));
        let err = TrackerClient::parse_envelope(Value::Dict(d)).unwrap_err();
        assert!(matches!(err, SyncrError::PeerFailure(_)));
    }

    #[tokio::test]
    async fn connect_failure_is_a_peer_failure() {
        // Port 0 never has a listener; connecting should fail fast.
        let client = TrackerClient::new("127.0.0.1".parse().unwrap(), 0)
            .with_timeout(Duration::from_millis(200));
        let err = client.get_key([1u8; 32]).await.unwrap_err();
        assert!(err.is_retryable_against_peers());
    }
}
