use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;

use folio::{
    application::error::AppError,
    application::scaffold::{NewPost, scaffold_post},
    application::sync::{SyncPaths, SyncReport, SyncService},
    config::{self, CacheCommand, Settings},
    infra::{
        admin_client::AdminClient,
        error::InfraError,
        http::{self, ApiState},
        notion::{NotionClient, NotionClientConfig},
        telemetry,
    },
};
use folio_api_types::{RefreshResponse, SyncFailureView};
use serde::Serialize;
use time::OffsetDateTime;
use tokio::sync::Notify;
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

const DEFAULT_AUTHOR: &str = "Folio";

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(error) => {
            report_application_error(&error);
            ExitCode::FAILURE
        }
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<ExitCode, AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await.map(|()| ExitCode::SUCCESS),
        config::Command::Sync(args) => run_sync(&settings, args.json).await,
        config::Command::Cache(args) => run_cache(&settings, args.command).await,
        config::Command::VerifyEnv => Ok(run_verify_env(&settings)),
        config::Command::NewPost(args) => {
            let request = NewPost {
                title: args.title,
                tags: args.tags,
                draft: args.draft,
                author: args.author.unwrap_or_else(|| DEFAULT_AUTHOR.to_string()),
            };
            let path = scaffold_post(&settings.content.posts_dir, &request, OffsetDateTime::now_utc())?;
            println!("{}", path.display());
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn run_serve(settings: Settings) -> Result<(), AppError> {
    let state = ApiState::from_settings(&settings)?;
    let posts = state.reload_content().await?;
    info!(
        target = "folio::bootstrap",
        posts,
        posts_dir = %settings.content.posts_dir.display(),
        "content loaded"
    );

    let warmer = Arc::clone(&state.warmer);
    tokio::spawn(async move { warmer.warm_initial().await });

    let router = http::build_router(state);
    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;
    info!(target = "folio::bootstrap", addr = %settings.server.addr, "listening");

    let stopping = Arc::new(Notify::new());
    let signal = {
        let stopping = Arc::clone(&stopping);
        async move {
            shutdown_signal().await;
            stopping.notify_waiters();
        }
    };
    let server = axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(signal);

    let grace = settings.server.graceful_shutdown;
    let deadline = async {
        stopping.notified().await;
        tokio::time::sleep(grace).await;
    };

    tokio::select! {
        result = server => {
            result.map_err(|err| AppError::unexpected(format!("server error: {err}")))?;
        }
        () = deadline => {
            warn!(
                target = "folio::bootstrap",
                grace_secs = grace.as_secs(),
                "graceful shutdown timed out; dropping open connections"
            );
        }
    }
    info!(target = "folio::bootstrap", "server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(target = "folio::bootstrap", error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                warn!(target = "folio::bootstrap", error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
    info!(target = "folio::bootstrap", "shutdown signal received");
}

async fn run_sync(settings: &Settings, json: bool) -> Result<ExitCode, AppError> {
    let Some(config) = NotionClientConfig::from_settings(&settings.notion) else {
        let missing = settings.missing_required().join(", ");
        return Err(AppError::validation(format!("sync requires {missing}")));
    };
    let client = NotionClient::new(config).map_err(|err| AppError::unexpected(err.to_string()))?;
    let service = SyncService::new(
        Arc::new(client),
        SyncPaths {
            posts_dir: settings.content.posts_dir.clone(),
            images_dir: settings.content.images_dir.clone(),
            image_url_prefix: settings.content.image_url_prefix.clone(),
        },
    );

    let report = service
        .run()
        .await
        .map_err(|err| AppError::unexpected(format!("sync failed: {err}")))?;

    if json {
        print_json(&report_view(&report))?;
    } else {
        print_report(&report);
    }
    Ok(ExitCode::SUCCESS)
}

fn report_view(report: &SyncReport) -> RefreshResponse {
    RefreshResponse {
        pages_seen: report.pages_seen,
        written: report.written,
        unchanged: report.unchanged,
        removed: report.removed,
        skipped: report.skipped,
        images_downloaded: report.images_downloaded,
        images_reused: report.images_reused,
        failures: report
            .failures
            .iter()
            .map(|failure| SyncFailureView {
                page_id: failure.page_id.clone(),
                title: failure.title.clone(),
                error: failure.error.clone(),
            })
            .collect(),
        posts: report.posts.len(),
    }
}

fn print_report(report: &SyncReport) {
    println!("pages seen:        {}", report.pages_seen);
    println!("posts published:   {}", report.posts.len());
    println!("files written:     {}", report.written);
    println!("files unchanged:   {}", report.unchanged);
    println!("files removed:     {}", report.removed);
    println!("pages skipped:     {}", report.skipped);
    println!("images downloaded: {}", report.images_downloaded);
    println!("images reused:     {}", report.images_reused);
    if !report.failures.is_empty() {
        println!("failures:");
        for failure in &report.failures {
            let title = failure.title.as_deref().unwrap_or("untitled");
            println!("  {} ({title}): {}", failure.page_id, failure.error);
        }
    }
}

async fn run_cache(settings: &Settings, command: CacheCommand) -> Result<ExitCode, AppError> {
    let client = AdminClient::new(&settings.client, settings.auth.admin_token.clone())
        .map_err(|err| AppError::from(InfraError::from(err)))?;
    let map_err = |err: folio::infra::admin_client::AdminClientError| {
        AppError::unexpected(err.to_string())
    };

    match command {
        CacheCommand::Stats => print_json(&client.stats().await.map_err(map_err)?)?,
        CacheCommand::Clear => print_json(&client.clear().await.map_err(map_err)?)?,
        CacheCommand::Warm => print_json(&client.warm().await.map_err(map_err)?)?,
        CacheCommand::Health => print_json(&client.health().await.map_err(map_err)?)?,
    }
    Ok(ExitCode::SUCCESS)
}

fn run_verify_env(settings: &Settings) -> ExitCode {
    for (key, state) in settings.environment_report() {
        println!("{key:<20} {state}");
    }
    let missing = settings.missing_required();
    if missing.is_empty() {
        println!("all required settings are present");
        ExitCode::SUCCESS
    } else {
        println!("missing required settings: {}", missing.join(", "));
        ExitCode::FAILURE
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<(), AppError> {
    let out = serde_json::to_string_pretty(value)
        .map_err(|err| AppError::unexpected(format!("failed to render output: {err}")))?;
    println!("{out}");
    Ok(())
}
