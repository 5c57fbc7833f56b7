use std::net::{IpAddr, Ipv4Addr, SocketAddr};

const DEFAULT_PORT: u16 = 51243;

const DEFAULT_ADDR: Ipv4Addr = Ipv4Addr::new(0, 0, 0, 0);

pub fn get_default_port() -> u16 {
    DEFAULT_PORT
}

pub fn get_default_listen() -> SocketAddr {
    SocketAddr::new(IpAddr::V4(DEFAULT_ADDR), DEFAULT_PORT)
}

const HEARTWATCH_LISTEN: &str = "HEARTWATCH_LISTEN";

/// Listen address override; unparsable values are ignored
pub fn get_listen() -> Option<SocketAddr> {
    let listen_from_env = std::env::var(HEARTWATCH_LISTEN);
    listen_from_env.ok().and_then(|res| res.parse().ok())
}

const HEARTWATCH_KEY: &str = "HEARTWATCH_KEY";

pub fn get_key() -> Option<String> {
    let key_from_env = std::env::var(HEARTWATCH_KEY);
    key_from_env.ok().filter(|key| !key.trim().is_empty())
}

const HEARTWATCH_HUB: &str = "HEARTWATCH_HUB";

/// Hub address for the agent
pub fn get_hub() -> SocketAddr {
    let default = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), DEFAULT_PORT);
    let hub_from_env = std::env::var(HEARTWATCH_HUB);
    hub_from_env.map_or(default, |res| res.parse().unwrap_or(default))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_listen_binds_all_interfaces() {
        let listen = get_default_listen();
        assert!(listen.ip().is_unspecified());
        assert_eq!(listen.port(), get_default_port());
    }
}
