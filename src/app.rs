//! Application assembly and serving.

use crate::cli::Cli;
use relay_core::auth::AuthStore;
use relay_core::config::{Config, ConfigWatcher};
use relay_core::metrics::Metrics;
use relay_core::registry::{ModelDescriptor, ModelRegistry};
use relay_core::transport::TransportPool;
use relay_provider::routing::RoutingEngine;
use relay_provider::warmup::WarmupScheduler;
use arc_swap::ArcSwap;
use std::sync::{Arc, Mutex};

pub struct Application {
    config: Arc<ArcSwap<Config>>,
    app_router: axum::Router,
    config_path: String,
    store: Arc<AuthStore>,
    registry: Arc<ModelRegistry>,
    warmup: Arc<WarmupScheduler>,
}

/// Register each credential's declared models with the registry, replacing
/// earlier registrations for the same credential id.
fn register_models(registry: &ModelRegistry, config: &Config) {
    for entry in &config.credentials {
        let models = entry
            .models
            .iter()
            .map(|id| ModelDescriptor::new(id.as_str(), entry.provider.as_str()))
            .collect();
        registry.register_client(&entry.id, &entry.provider, models);
    }
}

impl Application {
    /// Build the application: load config, assemble the auth store, model
    /// registry, executors, routing engine, translators, and warmup
    /// scheduler, then wire the axum router.
    pub fn build(cli: &Cli) -> anyhow::Result<Self> {
        let mut config = Config::load(&cli.config).unwrap_or_else(|e| {
            tracing::warn!("failed to load config from '{}': {e}, using defaults", cli.config);
            Config::default()
        });

        if let Some(ref host) = cli.host {
            config.host = host.clone();
        }
        if let Some(port) = cli.port {
            config.port = port;
        }

        let store = Arc::new(AuthStore::new());
        store.replace_all(config.build_auths());

        let registry = Arc::new(ModelRegistry::new());
        register_models(&registry, &config);

        let pool = Arc::new(TransportPool::new());
        let executors = Arc::new(relay_provider::build_registry(
            pool,
            config.proxy_url.clone(),
        ));
        let engine = Arc::new(RoutingEngine::new(
            store.clone(),
            registry.clone(),
            executors.clone(),
        ));
        let translators = Arc::new(relay_translator::build_registry());
        let metrics = Arc::new(Metrics::new());
        let warmup = Arc::new(WarmupScheduler::new(
            executors.clone(),
            store.clone(),
            metrics.clone(),
        ));

        tracing::info!(
            "loaded {} credentials across {} providers",
            config.credentials.len(),
            store.providers().len(),
        );

        let config = Arc::new(ArcSwap::from_pointee(config));
        let state = relay_server::AppState {
            config: config.clone(),
            store: store.clone(),
            registry: registry.clone(),
            engine,
            executors,
            translators,
            metrics,
            config_path: Arc::new(Mutex::new(cli.config.clone())),
        };
        let app_router = relay_server::build_router(state);

        Ok(Self {
            config,
            app_router,
            config_path: cli.config.clone(),
            store,
            registry,
            warmup,
        })
    }

    /// Serve HTTP, watch the config file, run warmup, drain on shutdown.
    pub async fn serve(self) -> anyhow::Result<()> {
        let Self {
            config,
            app_router,
            config_path,
            store,
            registry,
            warmup,
        } = self;

        warmup.start(&config.load().warmup).await;

        // Config file changes refresh credentials, model registrations, and
        // the warmup schedule
        let watcher_store = store.clone();
        let watcher_registry = registry.clone();
        let watcher_warmup = warmup.clone();
        let _watcher = ConfigWatcher::start(config_path, config.clone(), move |new_cfg| {
            watcher_store.replace_all(new_cfg.build_auths());
            register_models(&watcher_registry, new_cfg);
            let warmup = watcher_warmup.clone();
            let warmup_cfg = new_cfg.warmup.clone();
            tokio::spawn(async move {
                warmup.update_config(&warmup_cfg).await;
            });
            tracing::info!("config reloaded: {} credentials", new_cfg.credentials.len());
        });

        let cfg = config.load();
        let addr = format!("{}:{}", cfg.host, cfg.port);
        tracing::info!("starting HTTP server on {addr}");
        let listener = tokio::net::TcpListener::bind(&addr).await?;

        axum::serve(listener, app_router)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        warmup.stop().await;
        tracing::info!("server shut down");
        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    tracing::info!("shutdown signal received");
}
