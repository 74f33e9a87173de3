use anyhow::{Context, Result, bail};
use std::sync::Arc;

use wg_admin::generate::KeyPairGenerator;
use wg_admin::manager::{DriftState, TunnelManager};
use wg_admin::model::{NewServer, Server, ServerChanges};
use wg_admin::netutil::InterfaceDetector;
use wg_admin::process::{ProcessRunner, TokioRunner};
use wg_admin::service::{CommandReport, ServiceController};
use wg_admin::store::JsonStore;
use wg_admin::{Error, InterfaceLocks, Settings};

use crate::cli::{Commands, PeerCommand, ServerCommand, ServiceCommand};

pub struct App {
    settings: Settings,
    runner: Arc<dyn ProcessRunner>,
    locks: InterfaceLocks,
}

impl App {
    pub fn new(settings: Settings) -> Self {
        let runner: Arc<dyn ProcessRunner> = Arc::new(TokioRunner::new(settings.command_timeout()));
        Self {
            settings,
            runner,
            locks: InterfaceLocks::new(),
        }
    }

    fn manager(&self) -> TunnelManager {
        let store = Arc::new(JsonStore::new(&self.settings.state_path));
        TunnelManager::new(
            self.settings.clone(),
            store,
            self.runner.clone(),
            &self.locks,
        )
    }

    fn service(&self) -> ServiceController {
        ServiceController::new(&self.settings, self.runner.clone())
    }
}

pub async fn dispatch(app: &App, command: Commands) -> Result<()> {
    match command {
        Commands::Server(cmd) => server(app, cmd).await,
        Commands::Peer(cmd) => peer(app, cmd).await,
        Commands::Regenerate => {
            let done = app.manager().regenerate().await?;
            println!("{}", done.server_config.display());
            for path in done.peer_configs {
                println!("{}", path.display());
            }
            Ok(())
        }
        Commands::Check => check(app).await,
        Commands::Service(cmd) => service(app, cmd).await,
        Commands::DetectInterface => {
            let name = InterfaceDetector::new(app.runner.clone())
                .detect()
                .await
                .context("detecting external interface")?;
            println!("{name}");
            Ok(())
        }
        Commands::Genkey => {
            let keys = KeyPairGenerator::new(app.runner.clone(), app.settings.mode.clone())
                .generate()
                .await?;
            println!("private_key = {}", keys.private);
            println!("public_key  = {}", keys.public);
            Ok(())
        }
    }
}

async fn server(app: &App, cmd: ServerCommand) -> Result<()> {
    let manager = app.manager();
    match cmd {
        ServerCommand::Init(args) => {
            let server = manager
                .provision_server(NewServer {
                    public_address: args.public_address,
                    port: args.port,
                    enable_ipv6: args.ipv6,
                    subnet_v4: args.subnet_v4,
                    subnet_v6: args.subnet_v6,
                })
                .await
                .context("provisioning server")?;
            print_server(&server);
        }
        ServerCommand::Update(args) => {
            let update = manager
                .update_server(ServerChanges {
                    public_address: args.public_address,
                    port: args.port,
                    enable_ipv6: args.ipv6,
                    subnet_v4: args.subnet_v4,
                    subnet_v6: args.subnet_v6,
                })
                .await
                .context("updating server")?;
            print_server(&update.server);
            if let Some(sweep) = update.sweep {
                println!("peers removed: {}", update.peers_cleared);
                println!("{}", sweep.summary());
            }
        }
        ServerCommand::Show => print_server(&manager.server()?),
    }
    Ok(())
}

async fn peer(app: &App, cmd: PeerCommand) -> Result<()> {
    let manager = app.manager();
    match cmd {
        PeerCommand::Add { name } => {
            let created = manager.create_peer(name).await.context("creating peer")?;
            println!("{}\t{}", created.peer.id, created.path.display());
        }
        PeerCommand::Rename { id, name } => {
            let renamed = manager.rename_peer(id, name).await?;
            println!("{}\t{}", renamed.peer.id, renamed.peer.name.unwrap_or_default());
        }
        PeerCommand::Remove { id } => {
            let removal = manager.delete_peer(id).await?;
            if !removal.row_deleted {
                tracing::warn!(peer = %id, "no such peer; server config rewritten anyway");
            }
        }
        PeerCommand::Config { id } => {
            let (path, text) = manager.peer_config(id).await?;
            tracing::info!(path = %path.display(), "peer config written");
            print!("{text}");
        }
        PeerCommand::List => {
            for peer in manager.peers()? {
                println!(
                    "{}\t{}\t{}\t{}",
                    peer.id,
                    peer.ipv4.as_deref().unwrap_or("-"),
                    peer.ipv6().unwrap_or("-"),
                    peer.name.as_deref().unwrap_or("")
                );
            }
        }
    }
    Ok(())
}

async fn check(app: &App) -> Result<()> {
    let report = app.manager().check_drift().await?;
    for entry in &report.entries {
        let label = match entry.state {
            DriftState::InSync => "ok",
            DriftState::Stale => "stale",
            DriftState::Missing => "missing",
            DriftState::Orphaned => "orphaned",
        };
        println!("{label:<9}{}", entry.path.display());
    }
    if !report.is_clean() {
        bail!("configuration drift detected; run `wg-admin regenerate`");
    }
    Ok(())
}

async fn service(app: &App, cmd: ServiceCommand) -> Result<()> {
    let svc = app.service();
    let result = match cmd {
        ServiceCommand::Start => svc.start().await,
        ServiceCommand::Stop => svc.stop().await,
        ServiceCommand::Restart => svc.restart().await,
        ServiceCommand::Status => svc.status().await,
        ServiceCommand::Show => svc.show().await,
    };
    match result {
        Ok(report) => {
            print_report(&report);
            Ok(())
        }
        Err(err) => {
            if let Some(output) = err.output() {
                print!("{output}");
            }
            if let Error::ConfigMissing { .. } = err {
                tracing::warn!("run `wg-admin server init` first");
            }
            Err(err.into())
        }
    }
}

fn print_report(report: &CommandReport) {
    println!("service: {}", report.service);
    println!("command: {}", report.command);
    if !report.success {
        println!("exit: {}", report.exit_code.map_or("signal".to_string(), |c| c.to_string()));
    }
    print!("{}", report.output);
}

fn print_server(server: &Server) {
    println!("id:             {}", server.id);
    println!("public_address: {}", server.public_address);
    println!("port:           {}", server.port);
    println!("enable_ipv6:    {}", server.enable_ipv6);
    println!("subnet_v4:      {}", server.subnet_v4);
    println!("subnet_v6:      {}", server.subnet_v6);
    println!("public_key:     {}", server.public_key);
}
