//! The TCP listener (spec.md section 4.7): one request served per
//! connection, using the half-close framing described in section 6.
//!
//! Business logic is behind [`RequestHandler`] so the socket plumbing
//! here stays generic; `syncr_sync`'s engine supplies the handler that
//! actually reads local drop/file/chunk state.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use syncr_core::error::SyncrResult;
use syncr_metadata::DropVersion;

use crate::wire::{Request, Response};

/// Answers the business-logic side of each [`Request`] variant. `Ok(None)`
/// for a blob/chunk request means "don't have it" (answered with
/// `Response::Error`); `chunk_list` always returns a (possibly empty)
/// list rather than `None`.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    async fn drop_metadata(
        &self,
        drop_id: &[u8],
        version: Option<DropVersion>,
    ) -> SyncrResult<Option<Vec<u8>>>;

    async fn file_metadata(&self, drop_id: &[u8], file_id: &[u8]) -> SyncrResult<Option<Vec<u8>>>;

    async fn chunk_list(&self, drop_id: &[u8], file_id: &[u8]) -> SyncrResult<Vec<u64>>;

    async fn chunk(&self, drop_id: &[u8], file_id: &[u8], index: u64) -> SyncrResult<Option<Vec<u8>>>;

    /// `Ok(None)` means the requester's `(latest_version, latest_nonce)`
    /// is already current — answered with `Response::NotAvailable`.
    async fn new_drop_metadata(
        &self,
        drop_id: &[u8],
        latest_version: u64,
        latest_nonce: u64,
    ) -> SyncrResult<Option<Vec<u8>>>;
}

/// Serves [`RequestHandler`] over plain TCP until `shutdown` resolves
/// (spec.md section 5: "a separate worker may ... cooperate with the
/// loop via a simple shutdown flag").
pub struct Listener<H: RequestHandler> {
    handler: Arc<H>,
}

impl<H: RequestHandler + 'static> Listener<H> {
    pub fn new(handler: Arc<H>) -> Self {
        Listener { handler }
    }

    /// Binds `addr` and serves connections until `shutdown` resolves.
    pub async fn serve(
        &self,
        addr: SocketAddr,
        mut shutdown: tokio::sync::watch::Receiver<bool>,
    ) -> SyncrResult<()> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| syncr_core::error::SyncrError::io(std::path::Path::new("listener bind"), e))?;
        tracing::info!(%addr, "listener bound");

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(pair) => pair,
                        Err(e) => {
                            tracing::warn!(error = %e, "accept failed");
                            continue;
                        }
                    };
                    let handler = Arc::clone(&self.handler);
                    tokio::spawn(async move {
                        if let Err(e) = serve_one(stream, handler.as_ref()).await {
                            tracing::debug!(%peer, error = %e, "connection failed");
                        }
                    });
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        tracing::info!("listener shutting down");
                        return Ok(());
                    }
                }
            }
        }
    }
}

async fn serve_one<H: RequestHandler>(mut stream: TcpStream, handler: &H) -> SyncrResult<()> {
    let mut buf = Vec::new();
    stream
        .read_to_end(&mut buf)
        .await
        .map_err(|e| syncr_core::error::SyncrError::io(std::path::Path::new("listener read"), e))?;

    let response = match Request::decode(&buf) {
        Ok(request) => handle(handler, &request).await,
        Err(e) => Response::Error(format!("malformed request: {e}")),
    };

    stream
        .write_all(&response.encode())
        .await
        .map_err(|e| syncr_core::error::SyncrError::io(std::path::Path::new("listener write"), e))?;
    stream
        .shutdown()
        .await
        .map_err(|e| syncr_core::error::SyncrError::io(std::path::Path::new("listener shutdown"), e))
}

async fn handle<H: RequestHandler>(handler: &H, request: &Request) -> Response {
    match request {
        Request::DropMetadata { drop_id, version } => {
            match handler.drop_metadata(drop_id, *version).await {
                Ok(Some(blob)) => Response::DropMetadata(blob),
                Ok(None) => Response::Error("drop metadata not found".to_string()),
                Err(e) => Response::Error(e.to_string()),
            }
        }
        Request::FileMetadata { drop_id, file_id } => {
            match handler.file_metadata(drop_id, file_id).await {
                Ok(Some(blob)) => Response::FileMetadata(blob),
                Ok(None) => Response::Error("file metadata not found".to_string()),
                Err(e) => Response::Error(e.to_string()),
            }
        }
        Request::ChunkList { drop_id, file_id } => match handler.chunk_list(drop_id, file_id).await {
            Ok(indices) => Response::ChunkList(indices),
            Err(e) => Response::Error(e.to_string()),
        },
        Request::Chunk { drop_id, file_id, index } => {
            match handler.chunk(drop_id, file_id, *index).await {
                Ok(Some(bytes)) => Response::Chunk(bytes),
                Ok(None) => Response::Error("chunk not found".to_string()),
                Err(e) => Response::Error(e.to_string()),
            }
        }
        Request::NewDropMetadata {
            drop_id,
            latest_version,
            latest_nonce,
        } => match handler
            .new_drop_metadata(drop_id, *latest_version, *latest_nonce)
            .await
        {
            Ok(Some(blob)) => Response::DropMetadata(blob),
            Ok(None) => Response::NotAvailable,
            Err(e) => Response::Error(e.to_string()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::ResponseShape;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use tokio::net::TcpStream as ClientStream;

    struct FakeHandler {
        drops: Mutex<HashMap<Vec<u8>, Vec<u8>>>,
    }

    #[async_trait]
    impl RequestHandler for FakeHandler {
        async fn drop_metadata(
            &self,
            drop_id: &[u8],
            _version: Option<DropVersion>,
        ) -> SyncrResult<Option<Vec<u8>>> {
            Ok(self.drops.lock().unwrap().get(drop_id).cloned())
        }

        async fn file_metadata(&self, _drop_id: &[u8], _file_id: &[u8]) -> SyncrResult<Option<Vec<u8>>> {
            Ok(None)
        }

        async fn chunk_list(&self, _drop_id: &[u8], _file_id: &[u8]) -> SyncrResult<Vec<u64>> {
            Ok(vec![0, 1, 2])
        }

        async fn chunk(&self, _drop_id: &[u8], _file_id: &[u8], _index: u64) -> SyncrResult<Option<Vec<u8>>> {
            Ok(Some(b"chunk-bytes".to_vec()))
        }

        async fn new_drop_metadata(
            &self,
            _drop_id: &[u8],
            _latest_version: u64,
            _latest_nonce: u64,
        ) -> SyncrResult<Option<Vec<u8>>> {
            Ok(None)
        }
    }

    #[tokio::test]
    async fn serves_chunk_list_over_one_connection() {
        let mut drops = HashMap::new();
        drops.insert(vec![9u8; 64], b"signed-blob".to_vec());
        let handler = Arc::new(FakeHandler { drops: Mutex::new(drops) });
        let listener = Listener::new(handler);

        let tcp = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = tcp.local_addr().unwrap();
        drop(tcp); // free the port for the real bind below

        let (tx, rx) = tokio::sync::watch::channel(false);
        let serve_task = tokio::spawn(async move {
            listener.serve(addr, rx).await.unwrap();
        });
        // Give the listener a moment to bind.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let request = Request::ChunkList {
            drop_id: vec![9u8; 64],
            file_id: vec![1u8; 32],
        };
        let mut stream = ClientStream::connect(addr).await.unwrap();
        stream.write_all(&request.encode()).await.unwrap();
        stream.shutdown().await.unwrap();

        let mut response_bytes = Vec::new();
        stream.read_to_end(&mut response_bytes).await.unwrap();
        let response = Response::decode(&response_bytes, ResponseShape::ChunkIndexList).unwrap();
        assert_eq!(response, Response::ChunkList(vec![0, 1, 2]));

        tx.send(true).unwrap();
        serve_task.await.unwrap();
    }
}
