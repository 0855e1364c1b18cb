use anyhow::{Context, Result};
use puresignd::api::{self, AppState};
use puresignd::records::{RecordStore, SqliteRecordStore, SupabaseRecords};
use puresignd::shutdown;
use puresignd::storage::{LocalObjectStore, ObjectStore, SupabaseStorage};
use puresignd::supabase::SupabaseClient;
use puresignd::{spawn_engine, Backend, Config, InferencePipeline, Models};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("puresignd starting");

    let config = Config::from_env()?;

    let models = Models::load(
        config.detector_model.as_deref(),
        config.cleaner_model.as_deref(),
        config.verifier_model.as_deref(),
    )?;
    let engine = spawn_engine(models, config.engine_queue)?;

    let (store, records): (Arc<dyn ObjectStore>, Arc<dyn RecordStore>) = match &config.backend {
        Backend::Supabase(supabase) => {
            tracing::info!(url = %supabase.url, bucket = %supabase.bucket, "using supabase backend");
            let client = SupabaseClient::new(supabase.clone());
            (
                Arc::new(SupabaseStorage::new(client.clone())),
                Arc::new(SupabaseRecords::new(client)),
            )
        }
        Backend::Local {
            data_dir,
            public_base_url,
        } => {
            tracing::info!(dir = %data_dir.display(), "using local backend");
            std::fs::create_dir_all(data_dir)
                .with_context(|| format!("creating data dir {}", data_dir.display()))?;
            let records = SqliteRecordStore::open(data_dir.join("puresign.db")).await?;
            (
                Arc::new(LocalObjectStore::new(data_dir.join("objects"), public_base_url.clone())),
                Arc::new(records),
            )
        }
    };

    let state = AppState {
        records,
        store: store.clone(),
        pipeline: InferencePipeline::new(engine, store),
        max_upload: config.max_upload,
    };

    let app = api::router(state)
        .layer(api::cors_layer(&config.cors_origins)?)
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(&config.bind)
        .await
        .with_context(|| format!("binding {}", config.bind))?;
    tracing::info!(addr = %config.bind, "puresignd ready");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown::wait_for(tokio::signal::ctrl_c()))
        .await?;

    tracing::info!("puresignd shutting down");
    Ok(())
}
