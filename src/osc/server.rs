use std::net::UdpSocket;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use log::{error, info};

use crate::error::{Error, Result};
use crate::osc::dispatcher::Dispatcher;

/// Largest datagram the control plane accepts.
const RECEIVE_BUFFER_SIZE: usize = 65536;

/// The UDP listen loop. All command handling happens on the single control
/// thread this spawns; responses go back to each datagram's source address
/// through the same socket.
pub struct OscServer {
    socket: Arc<UdpSocket>,
}

impl OscServer {
    pub fn bind(bind_address: &str, port: u16) -> Result<OscServer> {
        let socket = UdpSocket::bind((bind_address, port)).map_err(|err| {
            Error::Protocol(format!("binding udp {}:{}: {}", bind_address, port, err))
        })?;
        // Wake periodically so a locally-initiated quit is noticed without
        // needing one final datagram.
        socket
            .set_read_timeout(Some(Duration::from_millis(250)))
            .map_err(|err| Error::Protocol(format!("setting socket timeout: {}", err)))?;
        info!("listening for OSC on {}:{}", bind_address, port);
        Ok(OscServer {
            socket: Arc::new(socket),
        })
    }

    pub fn socket(&self) -> Arc<UdpSocket> {
        self.socket.clone()
    }

    /// Spawns the control thread; it exits when `quit` is raised.
    pub fn spawn(self, mut dispatcher: Dispatcher, quit: Arc<AtomicBool>) -> Result<JoinHandle<()>> {
        std::thread::Builder::new()
            .name("osc-control".to_string())
            .spawn(move || {
                let mut buffer = vec![0u8; RECEIVE_BUFFER_SIZE];
                while !quit.load(Ordering::Relaxed) {
                    match self.socket.recv_from(&mut buffer) {
                        Ok((length, sender)) => {
                            dispatcher.handle_datagram(&buffer[..length], sender);
                        }
                        Err(err)
                            if err.kind() == std::io::ErrorKind::WouldBlock
                                || err.kind() == std::io::ErrorKind::TimedOut => {}
                        Err(err) => {
                            error!("udp receive failed: {}", err);
                            break;
                        }
                    }
                }
                info!("control thread exiting");
            })
            .map_err(|err| Error::Protocol(format!("spawning control thread: {}", err)))
    }
}
