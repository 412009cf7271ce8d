//! Loopback connection helpers for forwarded device sockets

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};

use crate::error::{Error, Result};

/// Connect to `addr`, retrying with a doubling delay
///
/// `retryable` decides whether a failed attempt is worth another try; any
/// other error is returned immediately.
pub async fn connect_with_retry(
    addr: SocketAddr,
    attempts: u32,
    initial_delay: Duration,
    retryable: fn(&io::Error) -> bool,
) -> Result<TcpStream> {
    let attempts = attempts.max(1);
    let mut delay = initial_delay;

    for attempt in 1..=attempts {
        match TcpStream::connect(addr).await {
            Ok(stream) => {
                stream.set_nodelay(true)?;
                tracing::debug!(addr = %addr, attempt = attempt, "Connected");
                return Ok(stream);
            }
            Err(e) if retryable(&e) && attempt < attempts => {
                tracing::debug!(
                    addr = %addr,
                    attempt = attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Connect failed, retrying"
                );
                tokio::time::sleep(delay).await;
                delay = delay.saturating_mul(2);
            }
            Err(e) if retryable(&e) => break,
            Err(e) => return Err(e.into()),
        }
    }

    Err(Error::ConnectExhausted {
        addr: addr.to_string(),
        attempts,
    })
}

/// Any connection failure
pub fn any_error(_: &io::Error) -> bool {
    true
}

/// The socket exists but nothing listens on it yet
pub fn not_listening(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::ConnectionRefused
}

/// Pick a currently free loopback port
pub async fn reserve_local_port() -> Result<u16> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    Ok(listener.local_addr()?.port())
}

/// Loopback address for a forwarded port
pub fn loopback(port: u16) -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_first_attempt() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let stream = connect_with_retry(addr, 5, Duration::from_millis(10), any_error).await;
        assert!(stream.is_ok());
    }

    #[tokio::test]
    async fn test_connect_after_listener_appears() {
        let port = reserve_local_port().await.unwrap();
        let addr = loopback(port);

        let server = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(60)).await;
            let listener = TcpListener::bind(addr).await.unwrap();
            let _ = listener.accept().await;
        });

        let stream = connect_with_retry(addr, 6, Duration::from_millis(20), not_listening).await;
        assert!(stream.is_ok());
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_connect_exhausted() {
        let port = reserve_local_port().await.unwrap();
        let started = std::time::Instant::now();

        let result =
            connect_with_retry(loopback(port), 3, Duration::from_millis(10), not_listening).await;

        assert!(matches!(
            result,
            Err(Error::ConnectExhausted { attempts: 3, .. })
        ));
        // 10ms + 20ms of back-off between three attempts
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_retry_predicates() {
        let refused = io::Error::new(io::ErrorKind::ConnectionRefused, "refused");
        let reset = io::Error::new(io::ErrorKind::ConnectionReset, "reset");
        assert!(not_listening(&refused));
        assert!(!not_listening(&reset));
        assert!(any_error(&reset));
    }
}
