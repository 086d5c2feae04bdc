use std::{fs::OpenOptions, path::PathBuf, sync::Mutex};

use actix_web::{middleware::Logger, web, App, HttpServer};
use clap::Parser;
use color_eyre::eyre::{self, WrapErr as _};
use tokio::sync::mpsc;
use tracing_subscriber::{fmt, layer::SubscriberExt as _, EnvFilter};

use branch_deployer::{
    config,
    dispatcher::{DispatchOptions, Dispatcher},
    git::RepoSync,
    hooks,
    http::WebhookConfig,
};

/// Listens for GitHub webhooks and deploys pushed branches.
#[derive(Debug, Parser)]
#[command(version)]
struct Opts {
    /// The path to the config file.
    #[arg(short, long, default_value = "/etc/branch-deployer/config.yaml")]
    config: PathBuf,
    /// Directory to additionally write the service log to.
    #[arg(short, long)]
    logs: Option<PathBuf>,
    /// Print debug messages.
    #[arg(short, long)]
    debug: bool,
}

fn init_tracing(opts: &Opts) -> eyre::Result<()> {
    tracing_log::LogTracer::init()?;

    let filter = if opts.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let file_layer = match &opts.logs {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .wrap_err_with(|| format!("Failed to create log directory {:?}", dir))?;
            let path = dir.join("branch-deployer.log");
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .wrap_err_with(|| format!("Failed to open log file {:?}", path))?;
            Some(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
        }
        None => None,
    };

    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(file_layer);
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

#[actix_web::main]
async fn main() -> eyre::Result<()> {
    dotenv::dotenv().ok();
    color_eyre::install()?;
    let opts = Opts::parse();
    init_tracing(&opts)?;

    let config = config::Config::load(&opts.config)
        .wrap_err_with(|| format!("Failed to load config from {:?}", opts.config))?;
    if config.secret.is_none() {
        tracing::warn!("No webhook secret configured, accepting unsigned deliveries");
    }

    let (tx, rx) = mpsc::channel(hooks::EVENT_QUEUE_CAPACITY);
    let dispatcher = Dispatcher::new(
        RepoSync::new(config.pull_directory.clone(), config.remote_base.clone()),
        DispatchOptions {
            deploy_on_create: config.deploy_on_create,
        },
    );
    actix_web::rt::spawn(dispatcher.run(rx));

    let tx = web::Data::new(tx);
    let webhook_config = WebhookConfig::new(config.secret.clone());
    let routes = hooks::Routes {
        webhook: config.path.clone(),
        ping: config.ping_path.clone(),
    };
    let max_payload = config.max_payload;

    tracing::info!(
        "Listening on {}:{} (webhook {}, ping {})",
        config.host,
        config.port,
        routes.webhook,
        routes.ping
    );
    HttpServer::new(move || {
        App::new()
            .app_data(tx.clone())
            .app_data(webhook_config.clone())
            .app_data(web::PayloadConfig::new(max_payload))
            .wrap(Logger::default())
            .configure(|cfg| hooks::configure(cfg, &routes))
            .default_service(web::to(hooks::not_found))
    })
    .bind((config.host.as_str(), config.port))?
    .run()
    .await
    .map_err(Into::into)
}
