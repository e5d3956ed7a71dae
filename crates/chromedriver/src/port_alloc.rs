use std::net::{Ipv4Addr, TcpListener};

/// Hands out a currently-unbound local TCP port.
pub trait PortAllocator: Send + Sync {
    fn allocate(&self) -> std::io::Result<u16>;
}

/// Asks the OS for an ephemeral port on the loopback interface.
#[derive(Debug, Clone, Copy, Default)]
pub struct EphemeralPorts;

impl PortAllocator for EphemeralPorts {
    fn allocate(&self) -> std::io::Result<u16> {
        allocate_tcp_port()
    }
}

pub fn allocate_tcp_port() -> std::io::Result<u16> {
    // The listener is dropped on return; the port stays free until the child binds it.
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))?;
    let port = listener.local_addr()?.port();
    Ok(port)
}
