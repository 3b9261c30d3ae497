//! The canonical request/response envelope served on every connection
//! (spec.md section 4.7 "Listener", section 6 "Wire framing" and
//! "Request types").
//!
//! Every request carries `protocol_version`; unknown types or malformed
//! envelopes are answered with an `ERROR` response rather than a dropped
//! connection, so a requester always gets a framed reply to advance past.

use std::collections::BTreeMap;

use syncr_core::codec::Value;
use syncr_core::error::{SyncrError, SyncrResult};
use syncr_metadata::DropVersion;

/// Wire-level protocol version. Bumping this is a breaking wire change.
pub const PROTOCOL_VERSION: i64 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i64)]
enum RequestTag {
    DropMetadata = 1,
    FileMetadata = 2,
    ChunkList = 3,
    Chunk = 4,
    NewDropMetadata = 5,
}

/// A request as served by the listener and issued by the requester
/// (spec.md section 6 "Request types").
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// `version = None` asks for the peer's latest.
    DropMetadata {
        drop_id: Vec<u8>,
        version: Option<DropVersion>,
    },
    FileMetadata {
        drop_id: Vec<u8>,
        file_id: Vec<u8>,
    },
    ChunkList {
        drop_id: Vec<u8>,
        file_id: Vec<u8>,
    },
    Chunk {
        drop_id: Vec<u8>,
        file_id: Vec<u8>,
        index: u64,
    },
    /// Asks for a version strictly newer than `(latest_version,
    /// latest_nonce)`, or `Response::NotAvailable`.
    NewDropMetadata {
        drop_id: Vec<u8>,
        latest_version: u64,
        latest_nonce: u64,
    },
}

impl Request {
    pub fn encode(&self) -> bytes::Bytes {
        let mut d = BTreeMap::new();
        d.insert(b"protocol_version".to_vec(), Value::int(PROTOCOL_VERSION));
        match self {
            Request::DropMetadata { drop_id, version } => {
                d.insert(b"type".to_vec(), Value::int(RequestTag::DropMetadata as i64));
                d.insert(b"drop_id".to_vec(), Value::bytes(drop_id.clone()));
                if let Some(v) = version {
                    d.insert(b"version".to_vec(), Value::int(v.version as i64));
                    d.insert(b"nonce".to_vec(), Value::int(v.nonce as i64));
                }
            }
            Request::FileMetadata { drop_id, file_id } => {
                d.insert(b"type".to_vec(), Value::int(RequestTag::FileMetadata as i64));
                d.insert(b"drop_id".to_vec(), Value::bytes(drop_id.clone()));
                d.insert(b"file_id".to_vec(), Value::bytes(file_id.clone()));
            }
            Request::ChunkList { drop_id, file_id } => {
                d.insert(b"type".to_vec(), Value::int(RequestTag::ChunkList as i64));
                d.insert(b"drop_id".to_vec(), Value::bytes(drop_id.clone()));
                d.insert(b"file_id".to_vec(), Value::bytes(file_id.clone()));
            }
            Request::Chunk { drop_id, file_id, index } => {
                d.insert(b"type".to_vec(), Value::int(RequestTag::Chunk as i64));
                d.insert(b"drop_id".to_vec(), Value::bytes(drop_id.clone()));
                d.insert(b"file_id".to_vec(), Value::bytes(file_id.clone()));
                d.insert(b"index".to_vec(), Value::int(*index as i64));
            }
            Request::NewDropMetadata {
                drop_id,
                latest_version,
                latest_nonce,
            } => {
                d.insert(b"type".to_vec(), Value::int(RequestTag::NewDropMetadata as i64));
                d.insert(b"drop_id".to_vec(), Value::bytes(drop_id.clone()));
                d.insert(b"latest_version".to_vec(), Value::int(*latest_version as i64));
                d.insert(b"latest_nonce".to_vec(), Value::int(*latest_nonce as i64));
            }
        }
        Value::Dict(d).encode()
    }

    pub fn decode(bytes: &[u8]) -> SyncrResult<Self> {
        let value = Value::decode(bytes)
            .map_err(|e| SyncrError::peer_failure(format!("malformed request: {e}")))?;
        let d = value
            .as_dict()
            .ok_or_else(|| SyncrError::peer_failure("request is not a dict"))?;
        let tag = d
            .get(b"type".as_slice())
            .and_then(Value::as_int)
            .ok_or_else(|| SyncrError::peer_failure("request missing type"))?;
        let drop_id = bytes_field(d, b"drop_id")?;

        Ok(match tag {
            t if t == RequestTag::DropMetadata as i64 => {
                let version = match (
                    d.get(b"version".as_slice()).and_then(Value::as_int),
                    d.get(b"nonce".as_slice()).and_then(Value::as_int),
                ) {
                    (Some(v), Some(n)) => Some(DropVersion::new(v as u64, n as u64)),
                    _ => None,
                };
                Request::DropMetadata { drop_id, version }
            }
            t if t == RequestTag::FileMetadata as i64 => Request::FileMetadata {
                drop_id,
                file_id: bytes_field(d, b"file_id")?,
            },
            t if t == RequestTag::ChunkList as i64 => Request::ChunkList {
                drop_id,
                file_id: bytes_field(d, b"file_id")?,
            },
            t if t == RequestTag::Chunk as i64 => Request::Chunk {
                drop_id,
                file_id: bytes_field(d, b"file_id")?,
                index: int_field(d, b"index")? as u64,
            },
            t if t == RequestTag::NewDropMetadata as i64 => Request::NewDropMetadata {
                drop_id,
                latest_version: int_field(d, b"latest_version")? as u64,
                latest_nonce: int_field(d, b"latest_nonce")? as u64,
            },
            other => return Err(SyncrError::peer_failure(format!("unknown request type {other}"))),
        })
    }
}

/// A response to one [`Request`] (spec.md section 4.7).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// The signed drop metadata blob, as stored on disk.
    DropMetadata(Vec<u8>),
    /// The file metadata blob, as stored on disk.
    FileMetadata(Vec<u8>),
    /// Chunk indices verified present on disk.
    ChunkList(Vec<u64>),
    /// Raw chunk bytes.
    Chunk(Vec<u8>),
    /// The requester's version is already current (`NewDropMetadata`
    /// with nothing newer available).
    NotAvailable,
    /// An unknown request type, or a request the server cannot satisfy.
    Error(String),
}

impl Response {
    pub fn encode(&self) -> bytes::Bytes {
        let mut d = BTreeMap::new();
        match self {
            Response::DropMetadata(blob) | Response::FileMetadata(blob) => {
                d.insert(b"status".to_vec(), Value::bytes(b"OK".to_vec()));
                d.insert(b"data".to_vec(), Value::bytes(blob.clone()));
            }
            Response::ChunkList(indices) => {
                d.insert(b"status".to_vec(), Value::bytes(b"OK".to_vec()));
                d.insert(
                    b"data".to_vec(),
                    Value::List(indices.iter().map(|i| Value::int(*i as i64)).collect()),
                );
            }
            Response::Chunk(bytes) => {
                d.insert(b"status".to_vec(), Value::bytes(b"OK".to_vec()));
                d.insert(b"data".to_vec(), Value::bytes(bytes.clone()));
            }
            Response::NotAvailable => {
                d.insert(b"status".to_vec(), Value::bytes(b"NOT_AVAILABLE".to_vec()));
                d.insert(b"data".to_vec(), Value::bytes(Vec::new()));
            }
            Response::Error(message) => {
                d.insert(b"status".to_vec(), Value::bytes(b"ERROR".to_vec()));
                d.insert(b"data".to_vec(), Value::bytes(message.clone().into_bytes()));
            }
        }
        Value::Dict(d).encode()
    }

    /// Decodes a response wire blob. Since the envelope itself carries no
    /// type tag for an `OK` payload, `shape` tells the decoder how to
    /// interpret `data` — the caller always knows this from the
    /// `Request` it sent.
    pub fn decode(bytes: &[u8], shape: ResponseShape) -> SyncrResult<Self> {
        let value = Value::decode(bytes)
            .map_err(|e| SyncrError::peer_failure(format!("malformed response: {e}")))?;
        let d = value
            .as_dict()
            .ok_or_else(|| SyncrError::peer_failure("response is not a dict"))?;
        let status = d
            .get(b"status".as_slice())
            .and_then(Value::as_bytes)
            .ok_or_else(|| SyncrError::peer_failure("response missing status"))?;
        let data = d
            .get(b"data".as_slice())
            .ok_or_else(|| SyncrError::peer_failure("response missing data"))?;

        match status {
            b"NOT_AVAILABLE" => Ok(Response::NotAvailable),
            b"ERROR" => {
                let message = data
                    .as_bytes()
                    .map(|b| String::from_utf8_lossy(b).into_owned())
                    .unwrap_or_default();
                Ok(Response::Error(message))
            }
            b"OK" => Self::decode_ok_payload(data, shape),
            other => Err(SyncrError::peer_failure(format!(
                "unknown response status {:?}",
                String::from_utf8_lossy(other)
            ))),
        }
    }

    fn decode_ok_payload(data: &Value, shape: ResponseShape) -> SyncrResult<Response> {
        match shape {
            ResponseShape::DropMetadataBlob => Ok(Response::DropMetadata(
                data.as_bytes()
                    .ok_or_else(|| SyncrError::peer_failure("expected a drop metadata blob"))?
                    .to_vec(),
            )),
            ResponseShape::FileMetadataBlob => Ok(Response::FileMetadata(
                data.as_bytes()
                    .ok_or_else(|| SyncrError::peer_failure("expected a file metadata blob"))?
                    .to_vec(),
            )),
            ResponseShape::ChunkBytes => Ok(Response::Chunk(
                data.as_bytes()
                    .ok_or_else(|| SyncrError::peer_failure("expected chunk bytes"))?
                    .to_vec(),
            )),
            ResponseShape::ChunkIndexList => {
                let items = data
                    .as_list()
                    .ok_or_else(|| SyncrError::peer_failure("expected a chunk index list"))?;
                let mut indices = Vec::with_capacity(items.len());
                for item in items {
                    indices.push(
                        item.as_int()
                            .ok_or_else(|| SyncrError::peer_failure("chunk list entry is not an int"))?
                            as u64,
                    );
                }
                Ok(Response::ChunkList(indices))
            }
        }
    }
}

/// How to interpret an `OK` response's `data` field. Determined by which
/// [`Request`] variant the caller sent, not carried on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseShape {
    DropMetadataBlob,
    FileMetadataBlob,
    ChunkBytes,
    ChunkIndexList,
}

impl Request {
    /// The response shape a listener should answer this request with.
    pub fn response_shape(&self) -> ResponseShape {
        match self {
            Request::DropMetadata { .. } | Request::NewDropMetadata { .. } => {
                ResponseShape::DropMetadataBlob
            }
            Request::FileMetadata { .. } => ResponseShape::FileMetadataBlob,
            Request::ChunkList { .. } => ResponseShape::ChunkIndexList,
            Request::Chunk { .. } => ResponseShape::ChunkBytes,
        }
    }
}

fn bytes_field(d: &BTreeMap<Vec<u8>, Value>, key: &[u8]) -> SyncrResult<Vec<u8>> {
    d.get(key)
        .and_then(Value::as_bytes)
        .map(|b| b.to_vec())
        .ok_or_else(|| SyncrError::peer_failure(format!("missing field {:?}", String::from_utf8_lossy(key))))
}

fn int_field(d: &BTreeMap<Vec<u8>, Value>, key: &[u8]) -> SyncrResult<i64> {
    d.get(key)
        .and_then(Value::as_int)
        .ok_or_else(|| SyncrError::peer_failure(format!("missing field {:?}", String::from_utf8_lossy(key))))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drop_metadata_request_roundtrips() {
        let req = Request::DropMetadata {
            drop_id: vec![1, 2, 3],
            version: Some(DropVersion::new(4, 5)),
        };
        let decoded = Request::decode(&req.encode()).unwrap();
        assert_eq!(decoded, req);
    }

    #[test]
    fn chunk_request_roundtrips() {
        let req = Request::Chunk {
            drop_id: vec![1],
            file_id: vec![2],
            index: 7,
        };
        let decoded = Request::decode(&req.encode()).unwrap();
        assert_eq!(decoded, req);
    }

    #[test]
    fn unknown_type_is_rejected() {
        let mut d = BTreeMap::new();
        d.insert(b"type".to_vec(), Value::int(99));
        d.insert(b"drop_id".to_vec(), Value::bytes(vec![1]));
        let bytes = Value::Dict(d).encode();
        assert!(Request::decode(&bytes).is_err());
    }

    #[test]
    fn chunk_list_response_roundtrips() {
        let resp = Response::ChunkList(vec![0, 1, 2]);
        let decoded = Response::decode(&resp.encode(), ResponseShape::ChunkIndexList).unwrap();
        assert_eq!(decoded, resp);
    }

    #[test]
    fn not_available_response_roundtrips() {
        let resp = Response::NotAvailable;
        let decoded = Response::decode(&resp.encode(), ResponseShape::DropMetadataBlob).unwrap();
        assert_eq!(decoded, resp);
    }

    #[test]
    fn chunk_bytes_response_roundtrips() {
        let resp = Response::Chunk(b"chunk bytes".to_vec());
        let decoded = Response::decode(&resp.encode(), ResponseShape::ChunkBytes).unwrap();
        assert_eq!(decoded, resp);
    }
}
