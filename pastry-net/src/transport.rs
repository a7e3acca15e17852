use crate::error::{NetError, NetResult};
use async_trait::async_trait;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};

/// A connected, bidirectional byte stream. Any `TcpStream` (or a test
/// double) satisfies this automatically.
pub trait Conn: AsyncRead + AsyncWrite + Send + Unpin {}
impl<T: AsyncRead + AsyncWrite + Send + Unpin> Conn for T {}

/// Yields inbound connections one at a time.
#[async_trait]
pub trait Listener: Send {
    async fn accept(&mut self) -> NetResult<(Box<dyn Conn>, SocketAddr)>;
    fn local_addr(&self) -> NetResult<SocketAddr>;
}

/// Listen/dial over a connection-oriented stream. `pastry-net` depends only
/// on this trait, never on `tokio::net` directly outside [`TcpTransport`],
/// so tests can swap in an in-memory double.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn listen(&self, bind_addr: SocketAddr) -> NetResult<Box<dyn Listener>>;

    /// A dial that exceeds `timeout` maps to [`NetError::DeadNode`], which
    /// is how the caller distinguishes "unreachable" from other I/O
    /// failures and triggers table removal.
    async fn dial(&self, addr: SocketAddr, timeout: Duration) -> NetResult<Box<dyn Conn>>;
}

/// Production transport: plain TCP.
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpTransport;

struct TcpListenerAdapter(TcpListener);

#[async_trait]
impl Listener for TcpListenerAdapter {
    async fn accept(&mut self) -> NetResult<(Box<dyn Conn>, SocketAddr)> {
        let (stream, addr) = self.0.accept().await?;
        Ok((Box::new(stream), addr))
    }

    fn local_addr(&self) -> NetResult<SocketAddr> {
        Ok(self.0.local_addr()?)
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn listen(&self, bind_addr: SocketAddr) -> NetResult<Box<dyn Listener>> {
        let listener = TcpListener::bind(bind_addr).await?;
        Ok(Box::new(TcpListenerAdapter(listener)))
    }

    async fn dial(&self, addr: SocketAddr, timeout: Duration) -> NetResult<Box<dyn Conn>> {
        match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => Ok(Box::new(stream)),
            Ok(Err(e)) => Err(NetError::DeadNode(format!("{addr}: {e}"))),
            Err(_) => Err(NetError::DeadNode(format!("{addr}: dial timed out"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn dial_to_closed_port_is_dead_node() {
        let transport = TcpTransport;
        // Port 0 bound-then-dropped listeners are unlikely to collide; use
        // an address nothing is listening on.
        let addr: SocketAddr = "127.0.0.1:1".parse().unwrap();
        let result = transport.dial(addr, Duration::from_millis(200)).await;
        assert!(matches!(result, Err(NetError::DeadNode(_))));
    }

    #[tokio::test]
    async fn listen_then_dial_connects() {
        let transport = TcpTransport;
        let mut listener = transport
            .listen("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        let addr = listener.local_addr().unwrap();

        let dial_task = tokio::spawn(async move {
            let t = TcpTransport;
            t.dial(addr, Duration::from_secs(1)).await
        });

        let (_, _peer_addr) = listener.accept().await.unwrap();
        let dialed = dial_task.await.unwrap();
        assert!(dialed.is_ok());
    }
}
