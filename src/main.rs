use anyhow::{Context, Result};
use axum::Router;
use direct_upload::{
    UploadService,
    config::AppConfig,
    routes,
    services::{
        multipart::MultipartManager,
        registry::{DEFAULT_STORAGE, FieldRegistry},
        signing::Signer,
        storage::Backend,
    },
};
use std::io::ErrorKind;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config ---
    let cfg = AppConfig::from_env_and_args()?;

    tracing::info!("Starting direct-upload with config: {:?}", cfg);

    // --- Storage backend ---
    let backend = Backend::from_config(&cfg.storage).context("configuring storage backend")?;
    let manager = MultipartManager::new(backend).with_part_size(cfg.part_size);

    // --- Field registry ---
    let mut registry = FieldRegistry::new().with_storage(DEFAULT_STORAGE, manager);
    for field in cfg.fields.iter().cloned() {
        registry.register(field)?;
    }
    if registry.fields().next().is_none() {
        tracing::warn!("No upload fields configured; every initialize request will be rejected");
    }

    let service = UploadService::new(registry, Signer::new(&cfg.signing_secret), &cfg.upload_prefix);

    // --- Storage self-test ---
    for check in service.check_storages().await {
        match check.result {
            Ok(()) => tracing::info!(storage = %check.storage, "Storage self-test passed"),
            Err(err) if cfg.skip_storage_check => {
                tracing::warn!(storage = %check.storage, "Storage self-test failed: {}", err)
            }
            Err(err) => {
                return Err(err).with_context(|| {
                    format!(
                        "storage `{}` is not usable for direct uploads (check credentials, endpoint and bucket, or pass --skip-storage-check)",
                        check.storage
                    )
                });
            }
        }
    }

    // --- Build router ---
    let app: Router = routes::routes::routes().with_state(service);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}
