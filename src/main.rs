#![allow(clippy::new_without_default)]

#[macro_use] extern crate log;

use std::collections::BTreeMap;
use std::time::Duration;
use std::{env::var, sync::Arc};

use anyhow::Context;
use async_trait::async_trait;
use dotenv::dotenv;
use futures::stream::BoxStream;
use futures::StreamExt;
use itertools::Itertools;
use tokio::task::JoinHandle;
use whitelist_store::DataFiles;

use crate::config::{load_config_or_default, WhitelistConfig, WhitelistConfigYaml};
use crate::console::ConsoleHost;
use crate::host::{Event, Host, HostError, HostResult};
use crate::whitelist::WhitelistPlugin;

mod commands;
mod config;
mod console;
mod host;
mod logging;
mod whitelist;

// Instead of `cargo build`, set env vars:
//     RUSTFLAGS='--cfg take_git_version_from_env'
//     GIT_DESCRIBE='823we8fgse8f7gasef7238r27wef'
// And then `cargo build`.
#[cfg(not(take_git_version_from_env))]
const GIT_DESCRIBE : &str = git_version::git_version!(fallback = "unknown");
#[cfg(take_git_version_from_env)]
const GIT_DESCRIBE : &str = env!("GIT_DESCRIBE");

/// This is the trait you want to implement when you're creating a new plugin.
///
/// The simplest way to use this trait is to implement the `event` function.
/// The `run` function can be overridden, but it invokes the `event` function and does some common
/// error-handling. If you override `run`, then you lose that.
#[async_trait]
pub trait Plugin : Send + Sync + 'static {
    const NAME: &'static str;
    fn enabled(&self) -> bool { true }

    async fn start(self: &Arc<Self>, _host: &Arc<dyn Host>) { }

    /// You *can* implement this, but you may be more interested in `event`.
    ///
    /// Events are handled one after the other, in the order the host sent them.
    async fn run(self: Arc<Self>, host: Arc<dyn Host>, mut events: BoxStream<'static, Event>) -> HostResult<()> {
        info!("Plugin {} is {}.", Self::NAME, if self.enabled() { "enabled" } else { "disabled" });
        if self.enabled() {
            self.start(&host).await;

            while let Some(event) = events.next().await {
                match self.clone().event(host.clone(), event).await {
                    Ok(()) => (),
                    Err(HostError::Disconnected) => {
                        error!("[{}] lost the host, quitting.", Self::NAME);
                        return Err(HostError::Disconnected);
                    }
                    Err(err) => debug!("[{}] encountered {:?}, but continuing.", Self::NAME, err),
                }
            }
        }
        Ok(())
    }

    async fn event(self: Arc<Self>, _host: Arc<dyn Host>, _ev: Event) -> HostResult<()> {
        // do nothing unless overridden.
        Ok(())
    }

    /// Last chance to persist things before the process exits.
    async fn shutdown(&self) { }
}

/// Just a helper trait to avoid trait object and associated constants clashing.
#[async_trait]
trait Plugin2: Sync + Send {
    async fn run(self: Arc<Self>, host: Arc<dyn Host>, events: BoxStream<'static, Event>) -> HostResult<()>;
    async fn shutdown(&self);
    fn name(&self) -> &'static str;
}

#[async_trait]
impl<T: Plugin> Plugin2 for T {
    async fn run(self: Arc<Self>, host: Arc<dyn Host>, events: BoxStream<'static, Event>) -> HostResult<()> {
        Plugin::run(self, host, events).await
    }

    async fn shutdown(&self) {
        Plugin::shutdown(self).await
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }
}

pub struct App {
    plugins: BTreeMap<String, Arc<dyn Plugin2>>,
}

impl App {
    pub fn new() -> Self {
        Self {
            plugins: BTreeMap::new()
        }
    }

    fn has_plugin<P: Plugin>(&mut self, p: P) -> Arc<P> {
        let p = Arc::new(p);

        let exists = self.plugins.insert(P::NAME.to_string(), p.clone());
        if exists.is_some() {
            panic!("Double-loading of plugins is forbidden. Plugin: {}", P::NAME);
        }

        p
    }

    /// Subscribes every plugin to the host's events right away, then runs them.
    pub fn spawn(&self, host: &Arc<dyn Host>) -> Vec<(String, JoinHandle<HostResult<()>>)> {
        self.plugins.iter()
            .map(|(name, p)| {
                let events = host.event_stream();
                let host = host.clone();
                let p = p.clone();
                let jh = tokio::spawn(async move { p.run(host, events).await });
                (name.clone(), jh)
            })
            .collect_vec()
    }

    /// Waits for every plugin to finish.
    pub async fn join(jhs: Vec<(String, JoinHandle<HostResult<()>>)>) {
        for (name, jh) in jhs {
            match jh.await {
                Ok(Ok(())) => (),
                Ok(Err(err)) => error!("Plugin {} has quit with error: {:?}", name, err),
                Err(err) => error!("Plugin {} has panicked: {}", name, err),
            }
        }
    }

    pub async fn shutdown(&self) {
        for p in self.plugins.values() {
            debug!("Shutting down {}", p.name());
            p.shutdown().await;
        }
    }
}

async fn run() -> anyhow::Result<()> {
    let config_path = var("WLM_CONFIG").unwrap_or_else(|_| "configs/whitelist.yaml".into());
    let config: WhitelistConfigYaml = load_config_or_default(&config_path)
        .with_context(|| format!("Failed to load {}", config_path))?;
    let data_dir = var("WLM_DATA_DIR").unwrap_or_else(|_| "data".into());
    info!("Keeping whitelist data in {}", data_dir);
    let docs = Arc::new(DataFiles::new(data_dir));

    let mut app = App::new();
    let _whitelist = app.has_plugin(WhitelistPlugin::new(WhitelistConfig::from_yaml(config), docs));

    let console = ConsoleHost::new();
    let host: Arc<dyn Host> = console.clone();
    let jhs = app.spawn(&host);
    tokio::spawn(console.read_stdin());

    tokio::select! {
        _ = App::join(jhs) => info!("Console closed, shutting down."),
        res = tokio::signal::ctrl_c() => {
            res.context("Failed to listen for Ctrl-C")?;
            info!("Ctrl-C, shutting down.");
        }
    }
    app.shutdown().await;
    Ok(())
}

fn main() -> anyhow::Result<()> {
    dotenv().ok(); // load (additional) environment variables from `.env` file in working directory.
    let log_dir = var("WLM_LOG_DIR").unwrap_or_else(|_| "logs".into());
    logging::init_logging(&log_dir).context("Failed to start logging")?;
    info!("This is WhitelistManager {}", GIT_DESCRIBE);

    let rt = tokio::runtime::Runtime::new().context("Failed to start the tokio runtime")?;
    let result = rt.block_on(run());
    // the stdin reader may still be stuck in a read, don't wait for it forever.
    rt.shutdown_timeout(Duration::from_secs(1));
    result
}
