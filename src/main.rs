use actix_web::{middleware, web, App, HttpServer};
use anyhow::{Context, Result};
use facegate::capture::FfmpegCapture;
use facegate::config::RUST_LOG;
use facegate::detector::RustfaceDetector;
use facegate::gateway::{Gateway, Tuning};
use facegate::server::{self, Limits};
use facegate::settings::Settings;
use facegate::sink::DiskSink;
use std::sync::Arc;
use std::{env, process};
use tracing::info;
use tracing_subscriber::EnvFilter;

const USAGE: &str = "usage: ./facegate [config file]";

fn get_args() -> Option<String> {
    let args: Vec<String> = env::args().collect();
    match args.len() {
        1 => None,
        2 if args[1] != "-h" && args[1] != "--help" => Some(args[1].clone()),
        _ => {
            println!("{USAGE}");
            process::exit(1);
        }
    }
}

#[actix_web::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(RUST_LOG));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config_file = get_args();
    let settings = Settings::load(config_file.as_deref())?;

    let detector = RustfaceDetector::from_file(&settings.detector.model_path)?;
    let sink = DiskSink::new(&settings.storage.result_dir, &settings.storage.public_prefix)?;
    let capture = Arc::new(FfmpegCapture::new(&settings.capture));

    let gateway = web::Data::new(
        Gateway::new(Arc::new(detector), Arc::new(sink), capture.clone(), capture)
            .with_tuning(Tuning::from(&settings.detector))
            .with_unique_names(settings.storage.unique_names),
    );
    let limits = Limits {
        max_upload_bytes: settings.server.max_upload_bytes,
        public_prefix: settings.storage.public_prefix.clone(),
    };

    let (host, port) = (settings.server.host.clone(), settings.server.port);
    info!(
        "serving results from {} on {host}:{port}",
        settings.storage.result_dir.display()
    );

    // Start the HTTP server
    let mut server = HttpServer::new(move || {
        App::new()
            .wrap(middleware::Logger::default())
            .configure(server::configure(gateway.clone(), limits.clone()))
    });
    if let Some(workers) = settings.server.workers {
        server = server.workers(workers);
    }

    server
        .bind((host.as_str(), port))
        .with_context(|| format!("failed to bind {host}:{port}"))?
        .run()
        .await?;
    Ok(())
}
