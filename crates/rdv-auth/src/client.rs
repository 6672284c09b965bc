use std::net::SocketAddr;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use crate::{AuthError, LoginRequest, LoginResponse, Result};

/// A one-shot client for the `Login` RPC. Opens a fresh connection per call;
/// this component has no session affinity to preserve.
pub struct AuthClient {
    addr: SocketAddr,
}

impl AuthClient {
    pub fn new(addr: SocketAddr) -> Self {
        Self { addr }
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<LoginResponse> {
        let stream = TcpStream::connect(self.addr)
            .await
            .map_err(|e| AuthError::Unavailable(e.to_string()))?;
        let (read_half, mut write_half) = stream.into_split();

        let mut request = serde_json::to_string(&LoginRequest {
            username: username.to_string(),
            password: password.to_string(),
        })?;
        request.push('\n');
        write_half.write_all(request.as_bytes()).await?;
        write_half.flush().await?;

        let mut reader = BufReader::new(read_half);
        let mut line = String::new();
        let bytes_read = reader.read_line(&mut line).await?;
        if bytes_read == 0 {
            return Err(AuthError::ConnectionClosed);
        }
        Ok(serde_json::from_str(&line)?)
    }
}
