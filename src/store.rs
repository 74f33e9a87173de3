//! Persistence boundary.
//!
//! The orchestration layer only talks to [`Store`]. [`JsonStore`] keeps the
//! whole state in one JSON document and also plays the role of the address
//! allocator, handing each new peer the first free host of the server subnets.

use ipnet::{Ipv4Net, Ipv6Net};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::io::ErrorKind;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::generate::KeyPair;
use crate::model::{Peer, Server, ServerChanges};
use crate::writer::write_atomic;

pub trait Store: Send + Sync {
    fn server(&self) -> Result<Option<Server>>;
    fn create_server(&self, server: Server) -> Result<()>;
    fn update_server(&self, changes: &ServerChanges) -> Result<Server>;
    fn set_server_keys(&self, keys: &KeyPair) -> Result<()>;

    /// All peers in insertion order.
    fn peers(&self) -> Result<Vec<Peer>>;
    fn peer(&self, id: Uuid) -> Result<Option<Peer>>;
    /// Stores a new peer with addresses assigned by the store.
    fn insert_peer(&self, keys: KeyPair, name: Option<String>) -> Result<Peer>;
    fn rename_peer(&self, id: Uuid, name: String) -> Result<Peer>;
    /// Returns whether a row existed.
    fn delete_peer(&self, id: Uuid) -> Result<bool>;
    /// Returns the number of rows removed.
    fn delete_all_peers(&self) -> Result<usize>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Document {
    server: Option<Server>,
    #[serde(default)]
    peers: Vec<Peer>,
}

#[derive(Debug)]
pub struct JsonStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read<T>(&self, f: impl FnOnce(&Document) -> T) -> Result<T> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let doc = self.load()?;
        Ok(f(&doc))
    }

    fn modify<T>(&self, f: impl FnOnce(&mut Document) -> Result<T>) -> Result<T> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut doc = self.load()?;
        let value = f(&mut doc)?;
        self.save(&doc)?;
        Ok(value)
    }

    fn load(&self) -> Result<Document> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Document::default()),
            Err(source) => {
                return Err(Error::Io {
                    path: self.path.clone(),
                    source,
                });
            }
        };
        serde_json::from_str(&text)
            .map_err(|err| Error::Store(format!("parsing {}: {err}", self.path.display())))
    }

    fn save(&self, doc: &Document) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|err| Error::filesystem(parent, err))?;
        }
        let text = serde_json::to_string_pretty(doc)
            .map_err(|err| Error::Store(format!("serializing state: {err}")))?;
        write_atomic(&self.path, text.as_bytes())
    }
}

fn require_server(doc: &mut Document) -> Result<&mut Server> {
    doc.server
        .as_mut()
        .ok_or_else(|| Error::Store("server not initialized".to_string()))
}

impl Store for JsonStore {
    fn server(&self) -> Result<Option<Server>> {
        self.read(|doc| doc.server.clone())
    }

    fn create_server(&self, server: Server) -> Result<()> {
        self.modify(|doc| {
            if doc.server.is_some() {
                return Err(Error::Validation("server already initialized".to_string()));
            }
            doc.server = Some(server);
            Ok(())
        })
    }

    fn update_server(&self, changes: &ServerChanges) -> Result<Server> {
        self.modify(|doc| {
            let server = require_server(doc)?;
            changes.apply(server);
            Ok(server.clone())
        })
    }

    fn set_server_keys(&self, keys: &KeyPair) -> Result<()> {
        self.modify(|doc| {
            let server = require_server(doc)?;
            server.private_key = keys.private.clone();
            server.public_key = keys.public.clone();
            Ok(())
        })
    }

    fn peers(&self) -> Result<Vec<Peer>> {
        self.read(|doc| doc.peers.clone())
    }

    fn peer(&self, id: Uuid) -> Result<Option<Peer>> {
        self.read(|doc| doc.peers.iter().find(|p| p.id == id).cloned())
    }

    fn insert_peer(&self, keys: KeyPair, name: Option<String>) -> Result<Peer> {
        self.modify(|doc| {
            let server = doc
                .server
                .as_ref()
                .ok_or_else(|| Error::Store("server not initialized".to_string()))?;
            let (ipv4, ipv6) = allocate(server, &doc.peers)?;
            let peer = Peer {
                id: Uuid::new_v4(),
                ipv4: Some(ipv4),
                ipv6,
                private_key: keys.private,
                public_key: keys.public,
                name,
            };
            doc.peers.push(peer.clone());
            Ok(peer)
        })
    }

    fn rename_peer(&self, id: Uuid, name: String) -> Result<Peer> {
        self.modify(|doc| {
            let peer = doc
                .peers
                .iter_mut()
                .find(|p| p.id == id)
                .ok_or_else(|| Error::NotFound(format!("peer {id}")))?;
            peer.name = Some(name);
            Ok(peer.clone())
        })
    }

    fn delete_peer(&self, id: Uuid) -> Result<bool> {
        self.modify(|doc| {
            let before = doc.peers.len();
            doc.peers.retain(|p| p.id != id);
            Ok(doc.peers.len() != before)
        })
    }

    fn delete_all_peers(&self) -> Result<usize> {
        self.modify(|doc| Ok(std::mem::take(&mut doc.peers).len()))
    }
}

/// Picks the next free `/32` (and `/128` when the server runs IPv6).
fn allocate(server: &Server, peers: &[Peer]) -> Result<(String, Option<String>)> {
    let v4_net: Ipv4Net = server
        .subnet_v4
        .parse()
        .map_err(|err| Error::Validation(format!("subnet_v4 {:?}: {err}", server.subnet_v4)))?;
    let assigned_v4: HashSet<Ipv4Addr> = peers
        .iter()
        .filter_map(|p| host_part(p.ipv4.as_deref()?).parse().ok())
        .collect();
    let ipv4 = next_available_v4(&v4_net, &assigned_v4)?;

    let ipv6 = if server.advertises_ipv6() {
        let v6_net: Ipv6Net = server.subnet_v6.parse().map_err(|err| {
            Error::Validation(format!("subnet_v6 {:?}: {err}", server.subnet_v6))
        })?;
        let assigned_v6: HashSet<Ipv6Addr> = peers
            .iter()
            .filter_map(|p| host_part(p.ipv6()?).parse().ok())
            .collect();
        Some(format!("{}/128", next_available_v6(&v6_net, &assigned_v6)?))
    } else {
        None
    };

    Ok((format!("{ipv4}/32"), ipv6))
}

fn host_part(cidr: &str) -> &str {
    cidr.split('/').next().unwrap_or(cidr)
}

fn next_available_v4(net: &Ipv4Net, assigned: &HashSet<Ipv4Addr>) -> Result<Ipv4Addr> {
    net.hosts()
        .find(|addr| *addr != net.addr() && !assigned.contains(addr))
        .ok_or_else(|| Error::Store(format!("no available IPv4 addresses in {net}")))
}

fn next_available_v6(net: &Ipv6Net, assigned: &HashSet<Ipv6Addr>) -> Result<Ipv6Addr> {
    net.hosts()
        .find(|addr| *addr != net.network() && *addr != net.addr() && !assigned.contains(addr))
        .ok_or_else(|| Error::Store(format!("no available IPv6 addresses in {net}")))
}
