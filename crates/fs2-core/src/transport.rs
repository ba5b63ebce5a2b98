//! Pluggable datagram transport for the indexnode advert protocol.
//! Decoupling the advert sender/listener from `UdpSocket` directly lets
//! broadcast, multicast, or an explicit bootstrap list be selected
//! without touching the election logic, and lets tests run without real
//! sockets.

use std::net::SocketAddr;

use async_trait::async_trait;

/// Send and receive the raw advert datagrams. Implementations decide how
/// "broadcast" is realized for their network.
#[async_trait]
pub trait AdvertTransport: Send + Sync {
    async fn send(&self, payload: &[u8]) -> std::io::Result<()>;
    async fn recv(&self) -> std::io::Result<(Vec<u8>, SocketAddr)>;
}

/// Real UDP broadcast transport, bound to
/// [`crate::ADVERTISEMENT_DATAGRAM_PORT`].
pub struct UdpAdvertTransport {
    socket: tokio::net::UdpSocket,
    broadcast_addr: SocketAddr,
}

impl UdpAdvertTransport {
    pub async fn bind(broadcast_addr: SocketAddr) -> std::io::Result<Self> {
        let socket = tokio::net::UdpSocket::bind(("0.0.0.0", crate::ADVERTISEMENT_DATAGRAM_PORT)).await?;
        socket.set_broadcast(true)?;
        Ok(Self {
            socket,
            broadcast_addr,
        })
    }
}

#[async_trait]
impl AdvertTransport for UdpAdvertTransport {
    async fn send(&self, payload: &[u8]) -> std::io::Result<()> {
        self.socket.send_to(payload, self.broadcast_addr).await?;
        Ok(())
    }

    async fn recv(&self) -> std::io::Result<(Vec<u8>, SocketAddr)> {
        let mut buf = [0u8; 1024];
        let (len, addr) = self.socket.recv_from(&mut buf).await?;
        Ok((buf[..len].to_vec(), addr))
    }
}

/// In-memory transport for tests: every datagram sent on one handle is
/// delivered to every other handle sharing the same channel, simulating a
/// LAN broadcast domain without opening real sockets.
pub struct InMemoryAdvertTransport {
    tx: tokio::sync::broadcast::Sender<(Vec<u8>, SocketAddr)>,
    rx: tokio::sync::Mutex<tokio::sync::broadcast::Receiver<(Vec<u8>, SocketAddr)>>,
    self_addr: SocketAddr,
}

impl InMemoryAdvertTransport {
    /// Create a connected pair of endpoints sharing one broadcast domain.
    pub fn channel(capacity: usize) -> tokio::sync::broadcast::Sender<(Vec<u8>, SocketAddr)> {
        let (tx, _rx) = tokio::sync::broadcast::channel(capacity);
        tx
    }

    pub fn attach(
        tx: tokio::sync::broadcast::Sender<(Vec<u8>, SocketAddr)>,
        self_addr: SocketAddr,
    ) -> Self {
        let rx = tx.subscribe();
        Self {
            tx,
            rx: tokio::sync::Mutex::new(rx),
            self_addr,
        }
    }
}

#[async_trait]
impl AdvertTransport for InMemoryAdvertTransport {
    async fn send(&self, payload: &[u8]) -> std::io::Result<()> {
        let _ = self.tx.send((payload.to_vec(), self.self_addr));
        Ok(())
    }

    async fn recv(&self) -> std::io::Result<(Vec<u8>, SocketAddr)> {
        loop {
            let mut rx = self.rx.lock().await;
            match rx.recv().await {
                Ok((payload, from)) if from != self.self_addr => return Ok((payload, from)),
                Ok(_) => continue,
                Err(_) => {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::BrokenPipe,
                        "advert channel closed",
                    ))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    #[tokio::test]
    async fn in_memory_transport_delivers_to_peer_not_self() {
        let channel = InMemoryAdvertTransport::channel(16);
        let addr_a: SocketAddr = (IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 1).into();
        let addr_b: SocketAddr = (IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 2).into();

        let a = InMemoryAdvertTransport::attach(channel.clone(), addr_a);
        let b = InMemoryAdvertTransport::attach(channel, addr_b);

        a.send(b"hello").await.unwrap();
        let (payload, from) = b.recv().await.unwrap();
        assert_eq!(payload, b"hello");
        assert_eq!(from, addr_a);
    }
}
