use std::{net::SocketAddr, time::Duration};

use tokio::net::TcpStream;

use crate::{
    error::{Error, Result},
    options::ServerAddress,
    runtime,
};

#[cfg(not(target_os = "wasi"))]
const KEEPALIVE_TIME: Duration = Duration::from_secs(120);

/// Opens a TCP connection to `address`, trying each resolved address in turn (IPv4 first).
///
/// A zero `connect_timeout` means no timeout.
pub(crate) async fn tcp_connect(
    address: &ServerAddress,
    connect_timeout: Duration,
) -> Result<TcpStream> {
    let mut resolved: Vec<SocketAddr> = runtime::resolve_address(address).await?.collect();
    if resolved.is_empty() {
        return Err(Error::reconnect(format!("No DNS results for {address}")));
    }
    resolved.sort_by_key(|addr| if addr.is_ipv4() { 0 } else { 1 });

    let mut connect_error = None;
    for socket_addr in &resolved {
        let attempt = if connect_timeout.is_zero() {
            tcp_try_connect(socket_addr).await
        } else {
            runtime::timeout(connect_timeout, tcp_try_connect(socket_addr))
                .await
                .and_then(|result| result)
        };
        match attempt {
            Ok(stream) => return Ok(stream),
            Err(error) => connect_error = Some(error),
        }
    }

    Err(connect_error.unwrap_or_else(|| Error::reconnect(format!("could not connect to {address}"))))
}

async fn tcp_try_connect(address: &SocketAddr) -> Result<TcpStream> {
    let stream = TcpStream::connect(address).await?;
    stream.set_nodelay(true)?;

    #[cfg(not(target_os = "wasi"))]
    {
        let sock_ref = socket2::SockRef::from(&stream);
        let conf = socket2::TcpKeepalive::new().with_time(KEEPALIVE_TIME);
        sock_ref.set_tcp_keepalive(&conf)?;
    }

    Ok(stream)
}
