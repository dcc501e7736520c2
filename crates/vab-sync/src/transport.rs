use std::net::UdpSocket;
use std::sync::Mutex;

/// Fire-and-forget datagram sender bound to one fixed local destination.
///
/// The peer may not be listening at all; every error is swallowed. Delivery
/// is at-most-once, best-effort, with no acknowledgment or retry.
#[derive(Debug)]
pub struct UdpNotifier {
    host: String,
    port: u16,
    socket: Mutex<Option<UdpSocket>>,
}

impl UdpNotifier {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            socket: Mutex::new(None),
        }
    }

    /// Sends one line of text to the fixed destination. The local socket is
    /// bound lazily on first use and re-created after `close`.
    pub fn send(&self, text: &str) {
        let mut socket = self.socket.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if socket.is_none() {
            match UdpSocket::bind(("0.0.0.0", 0)) {
                Ok(bound) => *socket = Some(bound),
                Err(error) => {
                    tracing::debug!(%error, "could not bind notifier socket, dropping message");
                    return;
                }
            }
        }
        if let Some(bound) = socket.as_ref() {
            if let Err(error) = bound.send_to(text.as_bytes(), (self.host.as_str(), self.port)) {
                tracing::debug!(
                    host = %self.host,
                    port = self.port,
                    %error,
                    "datagram send failed, dropping message"
                );
            }
        }
    }

    /// Releases the socket. Safe to call repeatedly and before any send.
    pub fn close(&self) {
        let mut socket = self.socket.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *socket = None;
    }
}
