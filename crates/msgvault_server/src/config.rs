use std::net::SocketAddr;

/// Everything [`crate::serve`] needs to bind and run. CLI parsing (clap,
/// env vars, `--port`/`--test-mode`/`--token`) lives in `msgvault_cli`; this
/// type is the plain data handed across that boundary.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
}

impl ServerConfig {
    pub fn new(bind_addr: SocketAddr) -> Self {
        ServerConfig { bind_addr }
    }
}
