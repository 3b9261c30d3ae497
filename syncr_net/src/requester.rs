//! The requester (spec.md section 4.8): sends one request per connection
//! against an ordered candidate peer list, advancing to the next peer on
//! any failure.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use syncr_core::error::{SyncrError, SyncrResult};

use crate::wire::{Request, Response, ResponseShape};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

/// Sends requests against an ordered list of peer addresses, trying each
/// in turn on socket failure, decode failure, or a semantic `ERROR`
/// response (spec.md section 4.8).
pub struct Requester {
    timeout: Duration,
}

impl Requester {
    pub fn new() -> Self {
        Requester {
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sends `request` to each of `peers` in order, returning the first
    /// successful, non-error response. Fails if every peer is exhausted.
    pub async fn send(
        &self,
        peers: &[SocketAddr],
        request: &Request,
    ) -> SyncrResult<Response> {
        let shape = request.response_shape();
        let encoded = request.encode();

        let mut last_err = SyncrError::peer_failure("no peers supplied");
        for peer in peers {
            match self.try_one(*peer, &encoded, shape).await {
                Ok(response) => return Ok(response),
                Err(e) => {
                    tracing::debug!(%peer, error = %e, "peer failed, advancing");
                    last_err = e;
                }
            }
        }
        Err(last_err)
    }

    async fn try_one(
        &self,
        peer: SocketAddr,
        encoded_request: &[u8],
        shape: ResponseShape,
    ) -> SyncrResult<Response> {
        let attempt = tokio::time::timeout(self.timeout, async {
            let mut stream = TcpStream::connect(peer)
                .await
                .map_err(|e| SyncrError::peer_failure(format!("connect to {peer} failed: {e}")))?;
            stream
                .write_all(encoded_request)
                .await
                .map_err(|e| SyncrError::peer_failure(format!("send to {peer} failed: {e}")))?;
            stream
                .shutdown()
                .await
                .map_err(|e| SyncrError::peer_failure(format!("half-close to {peer} failed: {e}")))?;

            let mut buf = Vec::new();
            stream
                .read_to_end(&mut buf)
                .await
                .map_err(|e| SyncrError::peer_failure(format!("read from {peer} failed: {e}")))?;

            Response::decode(&buf, shape)
        })
        .await;

        let response = match attempt {
            Ok(result) => result?,
            Err(_) => return Err(SyncrError::peer_failure(format!("{peer} timed out"))),
        };

        match response {
            Response::Error(message) => Err(SyncrError::peer_failure(format!("{peer}: {message}"))),
            other => Ok(other),
        }
    }
}

impl Default for Requester {
    fn default() -> Self {
        Requester::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn exhausted_peer_list_fails() {
        let requester = Requester::new().with_timeout(Duration::from_millis(200));
        let request = Request::ChunkList {
            drop_id: vec![1],
            file_id: vec![2],
        };
        // Port 0 refuses connections immediately.
        let peers = vec!["127.0.0.1:0".parse().unwrap()];
        let err = requester.send(&peers, &request).await.unwrap_err();
        assert!(err.is_retryable_against_peers());
    }

    #[tokio::test]
    async fn advances_past_a_dead_peer_to_a_live_one() {
        let handler_addr = spawn_chunk_list_echo(vec![3, 4]).await;
        let requester = Requester::new().with_timeout(Duration::from_millis(500));
        let request = Request::ChunkList {
            drop_id: vec![1],
            file_id: vec![2],
        };
        let peers = vec!["127.0.0.1:1".parse().unwrap(), handler_addr];
        let response = requester.send(&peers, &request).await.unwrap();
        assert_eq!(response, Response::ChunkList(vec![3, 4]));
    }

    async fn spawn_chunk_list_echo(indices: Vec<u64>) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    return;
                };
                let indices = indices.clone();
                tokio::spawn(async move {
                    let mut buf = Vec::new();
                    let _ = stream.read_to_end(&mut buf).await;
                    let response = Response::ChunkList(indices);
                    let _ = stream.write_all(&response.encode()).await;
                    let _ = stream.shutdown().await;
                });
            }
        });
        addr
    }
}
