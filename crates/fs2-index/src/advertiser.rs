//! UDP advertiser: broadcasts this indexnode's protocol marker, port, and
//! identity at a fixed interval so clients can discover it without manual
//! configuration.

use std::sync::Arc;
use std::time::Duration;

use fs2_core::protocol::ActiveAdvert;
use fs2_core::transport::AdvertTransport;
use fs2_core::types::AdvertUid;
use fs2_core::{INDEXNODE_ADVERTISE_INTERVAL_MS, PROTOCOL_VERSION};

pub struct Advertiser {
    transport: Arc<dyn AdvertTransport>,
    port: u16,
    uid: AdvertUid,
}

impl Advertiser {
    pub fn new(transport: Arc<dyn AdvertTransport>, port: u16) -> Self {
        Self {
            transport,
            port,
            uid: AdvertUid::generate(),
        }
    }

    pub fn uid(&self) -> AdvertUid {
        self.uid
    }

    /// Runs until cancelled. Intended to be spawned as a background task;
    /// cancellation is cooperative via dropping the task.
    pub async fn run(&self) {
        let advert = ActiveAdvert {
            proto_version: PROTOCOL_VERSION.to_string(),
            port: self.port,
            uid: self.uid,
        };
        let payload = advert.encode();
        let mut ticker = tokio::time::interval(Duration::from_millis(INDEXNODE_ADVERTISE_INTERVAL_MS));
        loop {
            ticker.tick().await;
            if let Err(e) = self.transport.send(payload.as_bytes()).await {
                tracing::warn!(error = %e, "failed to send indexnode advert");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fs2_core::protocol::Advert;
    use fs2_core::transport::InMemoryAdvertTransport;
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};

    #[tokio::test]
    async fn advertiser_broadcasts_parseable_active_advert() {
        let channel = InMemoryAdvertTransport::channel(8);
        let addr_a: SocketAddr = (IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 1).into();
        let addr_b: SocketAddr = (IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 2).into();

        let sender = Arc::new(InMemoryAdvertTransport::attach(channel.clone(), addr_a));
        let listener = InMemoryAdvertTransport::attach(channel, addr_b);

        let advertiser = Advertiser::new(sender, 8080);
        let uid = advertiser.uid();
        tokio::spawn(async move {
            advertiser.run().await;
        });

        let (payload, _) = listener.recv().await.unwrap();
        let text = String::from_utf8(payload).unwrap();
        match Advert::parse(&text) {
            Some(Advert::Active(a)) => {
                assert_eq!(a.port, 8080);
                assert_eq!(a.uid, uid);
            }
            other => panic!("expected active advert, got {other:?}"),
        }
    }
}
