//! SIP UDP Transport.

use std::borrow::Cow;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::SystemTime;

use bytes::Bytes;
use tokio::net::{ToSocketAddrs, UdpSocket};
use tokio::task::JoinHandle;

use super::{get_local_name, Packet, PacketHandler, Transport, TransportProtocol};
use crate::error::Result;

#[derive(Debug)]
struct Inner {
    sock: UdpSocket,
    addr: SocketAddr,
    local_name: String,
}

#[derive(Debug, Clone)]
/// UDP transport implementation.
pub struct UdpTransport(Arc<Inner>);

impl UdpTransport {
    /// Binds a UDP transport to the specified address.
    pub async fn bind<A: ToSocketAddrs>(addr: A) -> Result<Self> {
        let sock = UdpSocket::bind(addr).await?;
        let addr = sock.local_addr()?;
        let local_name = get_local_name(&addr);

        Ok(Self(Arc::new(Inner {
            sock,
            addr,
            local_name,
        })))
    }

    /// Starts the receive loop, handing every packet to `handler`.
    pub fn start(self, handler: Arc<dyn PacketHandler>) -> JoinHandle<Result<()>> {
        tokio::spawn(self.recv_loop(handler))
    }

    async fn recv_loop(self, handler: Arc<dyn PacketHandler>) -> Result<()> {
        let transport: Arc<dyn Transport> = Arc::new(self.clone());
        let mut buf = vec![0u8; 4000];

        loop {
            let (len, addr) = self.0.sock.recv_from(&mut buf).await?;
            let payload = Bytes::copy_from_slice(&buf[..len]);

            // Keep-Alive request packet.
            if payload.as_ref() == b"\r\n\r\n" {
                self.0.sock.send_to(b"\r\n", addr).await?;
                continue;
            }
            // Keep-Alive response packet.
            if payload.as_ref() == b"\r\n" {
                continue;
            }

            let packet = Packet {
                payload,
                addr,
                time: SystemTime::now(),
            };

            handler.handle_packet(transport.clone(), packet).await;
        }
    }
}

#[async_trait::async_trait]
impl Transport for UdpTransport {
    async fn send(&self, buf: &[u8], addr: &SocketAddr) -> Result<usize> {
        Ok(self.0.sock.send_to(buf, addr).await?)
    }

    fn protocol(&self) -> TransportProtocol {
        TransportProtocol::Udp
    }

    fn addr(&self) -> SocketAddr {
        self.0.addr
    }

    fn local_name(&self) -> Cow<'_, str> {
        Cow::Borrowed(&self.0.local_name)
    }

    fn reliable(&self) -> bool {
        false
    }

    fn secure(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Mutex;
    use std::time::Duration;

    use tokio::sync::Notify;
    use tokio::time::timeout;

    struct CollectingHandler {
        packets: Mutex<Vec<Packet>>,
        notify: Notify,
    }

    impl CollectingHandler {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                packets: Mutex::new(Vec::new()),
                notify: Notify::new(),
            })
        }
    }

    #[async_trait::async_trait]
    impl PacketHandler for CollectingHandler {
        async fn handle_packet(&self, _transport: Arc<dyn Transport>, packet: Packet) {
            self.packets.lock().unwrap().push(packet);
            self.notify.notify_one();
        }
    }

    #[tokio::test]
    async fn test_recv_msg() {
        let transport = UdpTransport::bind("127.0.0.1:0").await.unwrap();
        let addr = transport.addr();

        let handler = CollectingHandler::new();
        let _recv = transport.start(handler.clone());

        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let msg = b"OPTIONS sip:bob@127.0.0.1 SIP/2.0\r\n\r\n";
        sender.send_to(msg, addr).await.unwrap();

        timeout(Duration::from_secs(5), handler.notify.notified())
            .await
            .unwrap();

        let packets = handler.packets.lock().unwrap();
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].payload.as_ref(), msg);
        assert_eq!(packets[0].addr, sender.local_addr().unwrap());
    }

    #[tokio::test]
    async fn test_send_msg() {
        let transport = UdpTransport::bind("127.0.0.1:0").await.unwrap();
        let receiver = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let dest = receiver.local_addr().unwrap();

        let sent = transport.send(b"ping", &dest).await.unwrap();
        assert_eq!(sent, 4);

        let mut buf = [0u8; 64];
        let (len, from) = timeout(Duration::from_secs(5), receiver.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&buf[..len], b"ping");
        assert_eq!(from, transport.addr());
    }

    #[tokio::test]
    async fn test_keep_alive_round_trip() {
        let transport = UdpTransport::bind("127.0.0.1:0").await.unwrap();
        let addr = transport.addr();

        let handler = CollectingHandler::new();
        let _recv = transport.clone().start(handler.clone());

        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        // A keep-alive request draws the short reply and never reaches the
        // handler.
        peer.send_to(b"\r\n\r\n", addr).await.unwrap();
        let mut buf = [0u8; 8];
        let (len, from) = timeout(Duration::from_secs(5), peer.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&buf[..len], b"\r\n");
        assert_eq!(from, addr);

        // A keep-alive reply is swallowed silently.
        peer.send_to(b"\r\n", addr).await.unwrap();

        // The next real datagram is the first thing the handler sees.
        let msg = b"MESSAGE sip:bob@127.0.0.1 SIP/2.0\r\n\r\n";
        peer.send_to(msg, addr).await.unwrap();
        timeout(Duration::from_secs(5), handler.notify.notified())
            .await
            .unwrap();

        let packets = handler.packets.lock().unwrap();
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].payload.as_ref(), msg);
    }
}
