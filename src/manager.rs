//! Administrative actions.
//!
//! Every mutation runs as one critical section per tunnel interface:
//! change the store, then rewrite the server config, then the affected peer
//! configs. Concurrent requests against the same interface are serialized,
//! so a rewrite always sees the peer set its own mutation produced.

use ipnet::{Ipv4Net, Ipv6Net};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use uuid::Uuid;

use crate::config::Settings;
use crate::error::{Error, Result};
use crate::generate::{KeyPairGenerator, looks_like_key, render_peer, render_server};
use crate::model::{NewServer, Peer, Server, ServerChanges};
use crate::netutil::InterfaceDetector;
use crate::process::ProcessRunner;
use crate::store::Store;
use crate::writer::{ConfigWriter, SweepReport, digest, digest_file};

/// One async mutex per tunnel interface name.
#[derive(Debug, Default)]
pub struct InterfaceLocks {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl InterfaceLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock_for(&self, interface: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.entry(interface.to_string()).or_default().clone()
    }
}

#[derive(Debug, Clone)]
pub struct Regenerated {
    pub server_config: PathBuf,
    pub peer_configs: Vec<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ServerUpdate {
    pub server: Server,
    pub peers_cleared: usize,
    /// Present only when a subnet change swept the peer directory.
    pub sweep: Option<SweepReport>,
    pub configs: Regenerated,
}

#[derive(Debug, Clone)]
pub struct PeerConfig {
    pub peer: Peer,
    pub path: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerRemoval {
    pub row_deleted: bool,
    pub file_removed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriftState {
    InSync,
    /// On-disk bytes differ from a fresh render.
    Stale,
    /// Expected file is absent.
    Missing,
    /// File has no matching peer row.
    Orphaned,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriftEntry {
    pub path: PathBuf,
    pub state: DriftState,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DriftReport {
    pub entries: Vec<DriftEntry>,
}

impl DriftReport {
    pub fn is_clean(&self) -> bool {
        self.entries.iter().all(|e| e.state == DriftState::InSync)
    }
}

pub struct TunnelManager {
    settings: Settings,
    store: Arc<dyn Store>,
    keys: KeyPairGenerator,
    detector: InterfaceDetector,
    writer: ConfigWriter,
    lock: Arc<tokio::sync::Mutex<()>>,
}

impl TunnelManager {
    pub fn new(
        settings: Settings,
        store: Arc<dyn Store>,
        runner: Arc<dyn ProcessRunner>,
        locks: &InterfaceLocks,
    ) -> Self {
        Self {
            keys: KeyPairGenerator::new(runner.clone(), settings.mode.clone()),
            detector: InterfaceDetector::new(runner),
            writer: ConfigWriter::new(&settings),
            lock: locks.lock_for(&settings.interface),
            settings,
            store,
        }
    }

    pub fn with_detector(mut self, detector: InterfaceDetector) -> Self {
        self.detector = detector;
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn writer(&self) -> &ConfigWriter {
        &self.writer
    }

    pub fn server(&self) -> Result<Server> {
        self.store
            .server()?
            .ok_or_else(|| Error::Store("server not initialized".to_string()))
    }

    pub fn peers(&self) -> Result<Vec<Peer>> {
        self.store.peers()
    }

    /// Creates the singleton server row with fresh keys and writes its config.
    pub async fn provision_server(&self, new: NewServer) -> Result<Server> {
        let _guard = self.lock.lock().await;
        if self.store.server()?.is_some() {
            return Err(Error::Validation("server already initialized".to_string()));
        }
        let keys = self.keys.generate().await?;
        let server = Server {
            id: Uuid::new_v4(),
            public_address: new.public_address,
            port: new.port,
            enable_ipv6: new.enable_ipv6,
            subnet_v4: new.subnet_v4,
            subnet_v6: new.subnet_v6,
            private_key: keys.private,
            public_key: keys.public,
        };
        validate_server(&server)?;
        self.store.create_server(server.clone())?;
        tracing::info!(server = %server.id, interface = %self.settings.interface, "server provisioned");

        self.write_server(&server, &[]).await?;
        Ok(server)
    }

    /// Applies `changes`, rotates the server keys and rewrites every config.
    /// A subnet change first drops every peer row and peer file.
    pub async fn update_server(&self, changes: ServerChanges) -> Result<ServerUpdate> {
        if changes.is_empty() {
            return Err(Error::Validation("no fields to update".to_string()));
        }
        let _guard = self.lock.lock().await;
        let current = self.server()?;
        let mut candidate = current.clone();
        changes.apply(&mut candidate);
        validate_server(&candidate)?;

        // Nothing is mutated until the rotated keys exist.
        let keys = self.keys.generate().await?;
        let subnet_changed = changes.changes_subnet(&current);
        self.store.update_server(&changes)?;
        self.store.set_server_keys(&keys)?;

        let mut peers_cleared = 0;
        let mut sweep = None;
        if subnet_changed {
            peers_cleared = self.store.delete_all_peers()?;
            let report = self.writer.clear_peer_configs();
            if report.is_clean() {
                tracing::info!(peers_cleared, "subnet changed; peers cleared");
            } else {
                tracing::warn!(summary = %report.summary(), "subnet changed; some peer configs could not be removed");
            }
            sweep = Some(report);
        }

        let configs = self.regenerate_locked().await?;
        Ok(ServerUpdate {
            server: self.server()?,
            peers_cleared,
            sweep,
            configs,
        })
    }

    pub async fn create_peer(&self, name: Option<String>) -> Result<PeerConfig> {
        let name = normalize_name(name)?;
        let _guard = self.lock.lock().await;
        let server = self.server()?;
        if !looks_like_key(&server.private_key) || !looks_like_key(&server.public_key) {
            return Err(Error::Validation(
                "server has no valid key pair; re-provision the server".to_string(),
            ));
        }

        let keys = self.keys.generate().await?;
        let peer = self.store.insert_peer(keys, name)?;
        match self.write_new_peer(&server, &peer).await {
            Ok(path) => {
                tracing::info!(peer = %peer.id, path = %path.display(), "peer created");
                Ok(PeerConfig { peer, path })
            }
            Err(err) => {
                self.discard_peer(&server, peer.id).await;
                Err(err)
            }
        }
    }

    async fn write_new_peer(&self, server: &Server, peer: &Peer) -> Result<PathBuf> {
        let path = self
            .writer
            .write_peer_config(&peer.id, &render_peer(server, peer))?;
        let peers = self.store.peers()?;
        self.write_server(server, &peers).await?;
        Ok(path)
    }

    /// Drops a half-created peer so the store and files agree again.
    async fn discard_peer(&self, server: &Server, id: Uuid) {
        if let Err(err) = self.store.delete_peer(id) {
            tracing::error!(peer = %id, error = %err, "could not roll back peer row");
            return;
        }
        if let Err(err) = self.writer.remove_peer_config(&id) {
            tracing::warn!(peer = %id, error = %err, "could not remove partial peer config");
        }
        let restored = match self.store.peers() {
            Ok(peers) => self.write_server(server, &peers).await.map(|_| ()),
            Err(err) => Err(err),
        };
        if let Err(err) = restored {
            tracing::warn!(error = %err, "could not restore server config after failed peer creation");
        }
    }

    /// Only the display name is mutable; key material never changes.
    pub async fn rename_peer(&self, id: Uuid, name: String) -> Result<PeerConfig> {
        let name = normalize_name(Some(name))?
            .ok_or_else(|| Error::Validation("name must not be empty".to_string()))?;
        let _guard = self.lock.lock().await;
        let server = self.server()?;
        let peer = self.store.rename_peer(id, name)?;
        let path = self
            .writer
            .write_peer_config(&peer.id, &render_peer(&server, &peer))?;
        Ok(PeerConfig { peer, path })
    }

    /// Safe to repeat: a missing row or file is not an error.
    pub async fn delete_peer(&self, id: Uuid) -> Result<PeerRemoval> {
        let _guard = self.lock.lock().await;
        let row_deleted = self.store.delete_peer(id)?;
        let file_removed = match self.writer.remove_peer_config(&id) {
            Ok(removed) => removed,
            Err(err) => {
                tracing::warn!(peer = %id, error = %err, "could not remove peer config");
                false
            }
        };
        tracing::info!(peer = %id, row_deleted, file_removed, "peer deleted");

        let server = self.server()?;
        let peers = self.store.peers()?;
        self.write_server(&server, &peers).await?;
        Ok(PeerRemoval {
            row_deleted,
            file_removed,
        })
    }

    /// Renders and writes one peer config, returning its path and text.
    pub async fn peer_config(&self, id: Uuid) -> Result<(PathBuf, String)> {
        let _guard = self.lock.lock().await;
        let server = self.server()?;
        let peer = self
            .store
            .peer(id)?
            .ok_or_else(|| Error::NotFound(format!("peer {id}")))?;
        let text = render_peer(&server, &peer);
        let path = self.writer.write_peer_config(&peer.id, &text)?;
        Ok((path, text))
    }

    pub async fn regenerate(&self) -> Result<Regenerated> {
        let _guard = self.lock.lock().await;
        self.regenerate_locked().await
    }

    /// Compares on-disk configs with a fresh render without writing anything.
    pub async fn check_drift(&self) -> Result<DriftReport> {
        let _guard = self.lock.lock().await;
        let server = self.server()?;
        let peers = self.store.peers()?;
        let external = self.external_interface().await;

        let mut report = DriftReport::default();
        let server_text = render_server(&server, &peers, external.as_deref());
        report
            .entries
            .push(compare(self.writer.server_config_path(), &server_text)?);

        let mut expected = HashSet::new();
        for peer in &peers {
            let path = self.writer.peer_config_path(&peer.id);
            expected.insert(path.clone());
            report.entries.push(compare(path, &render_peer(&server, peer))?);
        }
        for path in self.writer.list_peer_configs()? {
            if !expected.contains(&path) {
                report.entries.push(DriftEntry {
                    path,
                    state: DriftState::Orphaned,
                });
            }
        }
        Ok(report)
    }

    async fn regenerate_locked(&self) -> Result<Regenerated> {
        let server = self.server()?;
        let peers = self.store.peers()?;
        let server_config = self.write_server(&server, &peers).await?;
        let mut peer_configs = Vec::with_capacity(peers.len());
        for peer in &peers {
            peer_configs.push(
                self.writer
                    .write_peer_config(&peer.id, &render_peer(&server, peer))?,
            );
        }
        Ok(Regenerated {
            server_config,
            peer_configs,
        })
    }

    async fn write_server(&self, server: &Server, peers: &[Peer]) -> Result<PathBuf> {
        let external = self.external_interface().await;
        let text = render_server(server, peers, external.as_deref());
        self.writer.write_server_config(&text)
    }

    /// Configured override, else detection. Failure only drops the NAT rules.
    async fn external_interface(&self) -> Option<String> {
        if let Some(name) = self.settings.external_interface_override() {
            return Some(name.to_string());
        }
        match self.detector.detect().await {
            Ok(name) => Some(name),
            Err(err) => {
                tracing::warn!(error = %err, "external interface detection failed; NAT rules omitted");
                None
            }
        }
    }
}

fn compare(path: PathBuf, rendered: &str) -> Result<DriftEntry> {
    let state = match digest_file(&path)? {
        None => DriftState::Missing,
        Some(on_disk) if on_disk == digest(rendered.as_bytes()) => DriftState::InSync,
        Some(_) => DriftState::Stale,
    };
    Ok(DriftEntry { path, state })
}

fn normalize_name(name: Option<String>) -> Result<Option<String>> {
    let Some(name) = name else {
        return Ok(None);
    };
    let name = name.trim();
    if name.chars().any(char::is_control) {
        return Err(Error::Validation(
            "name must not contain control characters".to_string(),
        ));
    }
    Ok(Some(name.to_string()).filter(|n| !n.is_empty()))
}

fn validate_server(server: &Server) -> Result<()> {
    let address = server.public_address.trim();
    if address.is_empty() || address.chars().any(char::is_whitespace) {
        return Err(Error::Validation(format!(
            "public address {:?} is not a host",
            server.public_address
        )));
    }
    if server.port == 0 {
        return Err(Error::Validation("port must be non-zero".to_string()));
    }
    server
        .subnet_v4
        .parse::<Ipv4Net>()
        .map_err(|err| Error::Validation(format!("subnet_v4 {:?}: {err}", server.subnet_v4)))?;
    if server.enable_ipv6 && server.subnet_v6.is_empty() {
        return Err(Error::Validation(
            "enable_ipv6 requires subnet_v6".to_string(),
        ));
    }
    if !server.subnet_v6.is_empty() {
        server
            .subnet_v6
            .parse::<Ipv6Net>()
            .map_err(|err| Error::Validation(format!("subnet_v6 {:?}: {err}", server.subnet_v6)))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::testing::FakeRunner;
    use crate::store::JsonStore;
    use std::fs;
    use tempfile::TempDir;

    struct Fixture {
        root: TempDir,
        runner: Arc<FakeRunner>,
        manager: TunnelManager,
    }

    fn fixture() -> Fixture {
        let root = TempDir::new().unwrap();
        let settings = Settings {
            conf_dir: root.path().join("conf"),
            clients_dir: root.path().join("conf/clients"),
            external_interface: "eth0".into(),
            interface: "wg0".into(),
            mode: "wg".into(),
            state_path: root.path().join("state.json"),
            command_timeout_secs: 5,
        };
        let runner = Arc::new(FakeRunner::with_key_tool("wg"));
        let store = Arc::new(JsonStore::new(&settings.state_path));
        let manager = TunnelManager::new(settings, store, runner.clone(), &InterfaceLocks::new());
        Fixture {
            root,
            runner,
            manager,
        }
    }

    fn new_server() -> NewServer {
        NewServer {
            public_address: "203.0.113.5".into(),
            port: 51820,
            enable_ipv6: true,
            subnet_v4: "10.8.0.1/24".into(),
            subnet_v6: "fd42::1/64".into(),
        }
    }

    #[tokio::test]
    async fn provisioning_writes_keys_and_config() {
        let fx = fixture();
        let server = fx.manager.provision_server(new_server()).await.unwrap();
        assert!(looks_like_key(&server.private_key));

        let text = fs::read_to_string(fx.root.path().join("conf/wg0.conf")).unwrap();
        assert!(text.contains(&format!("PrivateKey = {}\n", server.private_key)));
        assert!(text.contains("MASQUERADE"));
        assert!(!text.contains("[Peer]"));

        assert!(matches!(
            fx.manager.provision_server(new_server()).await,
            Err(Error::Validation(_))
        ));
    }

    #[tokio::test]
    async fn invalid_server_input_is_rejected_before_storing() {
        let fx = fixture();
        let mut bad = new_server();
        bad.subnet_v4 = "10.8.0.1".into();
        assert!(matches!(
            fx.manager.provision_server(bad).await,
            Err(Error::Validation(_))
        ));
        assert!(fx.manager.server().is_err());
    }

    #[tokio::test]
    async fn creating_a_peer_writes_both_configs() {
        let fx = fixture();
        let server = fx.manager.provision_server(new_server()).await.unwrap();
        let created = fx.manager.create_peer(Some(" laptop ".into())).await.unwrap();

        assert_eq!(created.peer.name.as_deref(), Some("laptop"));
        let peer_text = fs::read_to_string(&created.path).unwrap();
        assert!(peer_text.contains(&format!("PublicKey = {}\n", server.public_key)));
        assert!(peer_text.contains("Address = 10.8.0.2/32, fd42::2/128\n"));

        let server_text = fs::read_to_string(fx.root.path().join("conf/wg0.conf")).unwrap();
        assert!(server_text.contains(&format!("PublicKey = {}\n", created.peer.public_key)));
    }

    #[tokio::test]
    async fn peer_creation_requires_server_keys() {
        let fx = fixture();
        fx.manager.provision_server(new_server()).await.unwrap();
        fx.manager
            .store
            .set_server_keys(&crate::generate::KeyPair {
                private: "short".into(),
                public: "short".into(),
            })
            .unwrap();
        let calls_before = fx.runner.calls().len();

        assert!(matches!(
            fx.manager.create_peer(None).await,
            Err(Error::Validation(_))
        ));
        assert_eq!(fx.runner.calls().len(), calls_before);
        assert!(fx.manager.peers().unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_peer_write_rolls_back_the_row() {
        let fx = fixture();
        fx.manager.provision_server(new_server()).await.unwrap();
        let clients = fx.root.path().join("conf/clients");
        fs::remove_dir(&clients).unwrap();
        fs::write(&clients, "blocks the peer directory").unwrap();

        assert!(matches!(
            fx.manager.create_peer(Some("laptop".into())).await,
            Err(Error::Filesystem { .. })
        ));
        assert!(fx.manager.peers().unwrap().is_empty());
        let text = fs::read_to_string(fx.root.path().join("conf/wg0.conf")).unwrap();
        assert!(!text.contains("[Peer]"));
    }

    #[tokio::test]
    async fn rename_keeps_keys_and_rewrites_peer_config() {
        let fx = fixture();
        fx.manager.provision_server(new_server()).await.unwrap();
        let created = fx.manager.create_peer(None).await.unwrap();

        let renamed = fx
            .manager
            .rename_peer(created.peer.id, "phone".into())
            .await
            .unwrap();
        assert_eq!(renamed.peer.name.as_deref(), Some("phone"));
        assert_eq!(renamed.peer.private_key, created.peer.private_key);
        assert_eq!(renamed.path, created.path);

        assert!(matches!(
            fx.manager.rename_peer(created.peer.id, "  ".into()).await,
            Err(Error::Validation(_))
        ));
    }

    #[tokio::test]
    async fn missing_uplink_omits_nat_rules() {
        let fx = fixture();
        let mut settings = fx.manager.settings().clone();
        settings.external_interface.clear();
        let store = Arc::new(JsonStore::new(&settings.state_path));
        let detector = InterfaceDetector::new(fx.runner.clone())
            .with_route_table(fx.root.path().join("no-route-table"));
        let manager = TunnelManager::new(settings, store, fx.runner.clone(), &InterfaceLocks::new())
            .with_detector(detector);

        manager.provision_server(new_server()).await.unwrap();
        let text = fs::read_to_string(fx.root.path().join("conf/wg0.conf")).unwrap();
        assert!(!text.contains("PostUp"));
        assert!(text.contains("ListenPort = 51820\n"));
        assert!(
            fx.runner
                .command_lines()
                .contains(&"ip route show default".to_string())
        );
    }

    #[tokio::test]
    async fn drift_check_spots_stale_missing_and_orphaned_files() {
        let fx = fixture();
        fx.manager.provision_server(new_server()).await.unwrap();
        let a = fx.manager.create_peer(None).await.unwrap();
        let b = fx.manager.create_peer(None).await.unwrap();
        assert!(fx.manager.check_drift().await.unwrap().is_clean());

        fs::write(&a.path, "edited by hand").unwrap();
        fs::remove_file(&b.path).unwrap();
        let orphan = fx.root.path().join("conf/clients/ghost.conf");
        fs::write(&orphan, "").unwrap();

        let report = fx.manager.check_drift().await.unwrap();
        let state_of = |path: &PathBuf| {
            report
                .entries
                .iter()
                .find(|e| &e.path == path)
                .map(|e| e.state)
        };
        assert_eq!(state_of(&a.path), Some(DriftState::Stale));
        assert_eq!(state_of(&b.path), Some(DriftState::Missing));
        assert_eq!(state_of(&orphan), Some(DriftState::Orphaned));
        assert_eq!(
            state_of(&fx.manager.writer().server_config_path()),
            Some(DriftState::InSync)
        );

        fx.manager.regenerate().await.unwrap();
        let after = fx.manager.check_drift().await.unwrap();
        assert_eq!(
            after
                .entries
                .iter()
                .filter(|e| e.state != DriftState::InSync)
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn concurrent_peer_creation_leaves_a_consistent_server_config() {
        let fx = fixture();
        fx.manager.provision_server(new_server()).await.unwrap();
        let manager = Arc::new(fx.manager);

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let manager = manager.clone();
            tasks.push(tokio::spawn(async move { manager.create_peer(None).await }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let peers = manager.peers().unwrap();
        assert_eq!(peers.len(), 8);
        let text = fs::read_to_string(manager.writer().server_config_path()).unwrap();
        assert_eq!(text.matches("[Peer]").count(), 8);
        for peer in &peers {
            assert!(text.contains(&peer.public_key));
        }
    }

    #[test]
    fn locks_are_shared_per_interface() {
        let locks = InterfaceLocks::new();
        assert!(Arc::ptr_eq(&locks.lock_for("wg0"), &locks.lock_for("wg0")));
        assert!(!Arc::ptr_eq(&locks.lock_for("wg0"), &locks.lock_for("wg1")));
    }
}
