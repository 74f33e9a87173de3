//! Rendering of server and peer configuration text.
//!
//! Both renderers are pure: the same rows and uplink always produce the
//! same bytes, and missing optional fields render as empty values.

mod keys;
mod peer_conf;
mod server_conf;

pub use keys::{KEY_LEN, KeyPair, KeyPairGenerator, looks_like_key};
pub use peer_conf::{PEER_MTU, endpoint, render_peer};
pub use server_conf::render_server;
