use crate::model::{Peer, Server};

/// wg-quick substitutes `%i` with the tunnel interface name.
const TUNNEL_IFACE: &str = "%i";

const FILTER_TOOLS: [&str; 2] = ["iptables", "ip6tables"];

pub fn render_server(server: &Server, peers: &[Peer], external_interface: Option<&str>) -> String {
    let mut text = String::new();
    text.push_str("[Interface]\n");
    text.push_str(&format!("Address = {}\n", server.subnet_v4));
    if server.enable_ipv6 {
        text.push_str(&format!("Address = {}\n", server.subnet_v6));
    }
    text.push_str(&format!("ListenPort = {}\n", server.port));
    text.push_str(&format!("PrivateKey = {}\n", server.private_key.trim()));

    if let Some(ext) = external_interface.filter(|name| !name.is_empty()) {
        for (key, flag) in [("PostUp", "-A"), ("PostDown", "-D")] {
            for line in nat_rules(flag, ext) {
                text.push_str(&format!("{key:<8} = {line}\n"));
            }
        }
    }
    text.push('\n');

    for peer in peers {
        text.push_str("[Peer]\n");
        text.push_str(&format!("PublicKey = {}\n", peer.public_key.trim()));
        text.push_str(&format!(
            "AllowedIPs = {}\n",
            peer.ipv4.as_deref().unwrap_or_default()
        ));
        if let Some(v6) = peer.ipv6() {
            text.push_str(&format!("AllowedIPs = {v6}\n"));
        }
        text.push('\n');
    }

    text
}

/// Forwarding in and out of the tunnel plus masquerade on the uplink, for
/// both address families. `flag` is `-A` on bring-up and `-D` on tear-down.
fn nat_rules(flag: &str, ext: &str) -> Vec<String> {
    let mut rules = Vec::with_capacity(6);
    for tool in FILTER_TOOLS {
        rules.push(format!("{tool} {flag} FORWARD -i {TUNNEL_IFACE} -j ACCEPT"));
        rules.push(format!("{tool} {flag} FORWARD -o {TUNNEL_IFACE} -j ACCEPT"));
        rules.push(format!("{tool} -t nat {flag} POSTROUTING -o {ext} -j MASQUERADE"));
    }
    rules
}
