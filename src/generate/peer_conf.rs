use crate::model::{Peer, Server};

pub const PEER_MTU: u16 = 1420;

pub fn render_peer(server: &Server, peer: &Peer) -> String {
    let ipv4 = peer.ipv4.as_deref().unwrap_or_default();

    let mut text = String::new();
    text.push_str("[Interface]\n");
    text.push_str(&format!("PrivateKey = {}\n", peer.private_key.trim()));
    match peer.ipv6().filter(|_| server.enable_ipv6) {
        Some(v6) => text.push_str(&format!("Address = {ipv4}, {v6}\n")),
        None => text.push_str(&format!("Address = {ipv4}\n")),
    }
    text.push_str(&format!("MTU = {PEER_MTU}\n\n"));

    text.push_str("[Peer]\n");
    text.push_str(&format!("PublicKey = {}\n", server.public_key.trim()));
    text.push_str(&format!(
        "Endpoint = {}\n",
        endpoint(&server.public_address, server.port)
    ));
    // Only the tunnel subnets are routed; the server masquerades the rest.
    text.push_str(&format!("AllowedIPs = {}\n", server.subnet_v4));
    if server.advertises_ipv6() {
        text.push_str(&format!("AllowedIPs = {}\n", server.subnet_v6));
    }

    text
}

/// `host:port`, bracketing IPv6 literals.
pub fn endpoint(address: &str, port: u16) -> String {
    if address.contains(':') && !address.starts_with('[') {
        format!("[{address}]:{port}")
    } else {
        format!("{address}:{port}")
    }
}
