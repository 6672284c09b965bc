use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{AuthError, LoginRequest, LoginResponse, PolicyStore, Result};

/// Listens on `addr` and answers `Login` requests against a [`PolicyStore`].
pub struct AuthServer {
    policy: Arc<dyn PolicyStore>,
}

impl AuthServer {
    pub fn new(policy: Arc<dyn PolicyStore>) -> Self {
        Self { policy }
    }

    pub async fn bind(&self, addr: SocketAddr) -> Result<TcpListener> {
        Ok(TcpListener::bind(addr).await?)
    }

    /// Accept connections on `listener` until `cancel` fires.
    pub async fn run(&self, listener: TcpListener, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            let policy = self.policy.clone();
                            tokio::spawn(async move {
                                if let Err(err) = handle_connection(stream, policy).await {
                                    debug!(%peer, error = %err, "auth connection ended");
                                }
                            });
                        }
                        Err(err) => warn!(error = %err, "auth accept failed"),
                    }
                }
            }
        }
    }
}

async fn handle_connection(stream: TcpStream, policy: Arc<dyn PolicyStore>) -> Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut line = String::new();

    loop {
        line.clear();
        let bytes_read = reader.read_line(&mut line).await?;
        if bytes_read == 0 {
            return Ok(());
        }

        let response = match serde_json::from_str::<LoginRequest>(&line) {
            Ok(request) => {
                let (code, token) = policy.authenticate(&request.username, &request.password).await;
                LoginResponse::new(code, token)
            }
            Err(err) => {
                return Err(AuthError::Malformed(err));
            }
        };

        let mut payload = serde_json::to_string(&response)?;
        payload.push('\n');
        write_half.write_all(payload.as_bytes()).await?;
        write_half.flush().await?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::StaticPolicyStore;
    use tokio::io::{AsyncReadExt, AsyncWriteExt as _};

    fn test_store() -> Arc<dyn PolicyStore> {
        let mut creds = std::collections::HashMap::new();
        creds.insert("alice".to_string(), "hunter2".to_string());
        Arc::new(StaticPolicyStore::new(creds))
    }

    #[tokio::test]
    async fn serves_a_login_request_end_to_end() {
        let server = AuthServer::new(test_store());
        let listener = server.bind("127.0.0.1:0".parse().unwrap()).await.expect("bind");
        let addr = listener.local_addr().expect("local_addr");
        let cancel = CancellationToken::new();
        let run_cancel = cancel.clone();
        tokio::spawn(async move { server.run(listener, run_cancel).await });

        let mut stream = TcpStream::connect(addr).await.expect("connect");
        let mut request = serde_json::to_string(&LoginRequest {
            username: "alice".to_string(),
            password: "hunter2".to_string(),
        })
        .expect("serialize");
        request.push('\n');
        stream.write_all(request.as_bytes()).await.expect("write");

        let mut buf = vec![0u8; 256];
        let n = stream.read(&mut buf).await.expect("read");
        let response: LoginResponse = serde_json::from_slice(&buf[..n]).expect("deserialize");
        assert_eq!(response.code(), Some(crate::AuthCode::Ok));
        assert!(response.token.is_some());
        cancel.cancel();
    }
}
