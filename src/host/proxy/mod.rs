//! Proxy for remote HMTL command servers.

use std::io;
use std::net::UdpSocket;

use log::{debug, info};

use super::{EffectHost, HostResult, Link};

/// The UDP proxy host passes frames to another machine that owns the bus.
pub struct UdpProxy {
    socket: UdpSocket,
    link: Link,
}

impl UdpProxy {
    pub fn new(addr: &str) -> io::Result<UdpProxy> {
        info!("[proxy] Relaying to {}", addr);
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        socket.connect(addr)?;
        Ok(UdpProxy {
            socket,
            link: Link::new(true),
        })
    }
}

impl EffectHost for UdpProxy {
    fn link(&self) -> Link {
        self.link.clone()
    }

    /// One datagram per frame. UDP gives no delivery confirmation.
    fn transmit(&self, frame: &[u8]) -> HostResult<()> {
        let sent = self.socket.send(frame)?;
        debug!("[proxy] sent {} B", sent);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::protocol;

    #[test]
    fn test_frames_arrive_as_datagrams() {
        let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
        let addr = receiver.local_addr().unwrap().to_string();
        let proxy = UdpProxy::new(&addr).unwrap();

        let frame = protocol::rgb_msg(25, 0, 1, 2, 3);
        proxy.transmit(&frame).unwrap();

        let mut buf = [0; 64];
        let len = receiver.recv(&mut buf).unwrap();
        assert_eq!(frame.as_slice(), &buf[..len]);
    }
}
