use std::fmt::Display;
use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use petsort::actuator;
use petsort::artifacts::ArtifactStore;
use petsort::classifier;
use petsort::config::AppConfig;
use petsort::pipeline::Pipeline;
use petsort::resolver::LabelSets;
use petsort::routes::{configure_routes, UploadLimits};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let config = AppConfig::load().map_err(|e| startup_error("Configuration", e))?;

    let classifier = classifier::from_config(&config.classifier)
        .map_err(|e| startup_error("Model loading", e))?;
    let labels =
        LabelSets::from_config(&config.labels).map_err(|e| startup_error("Label sets", e))?;
    log::info!(
        "Label matching: {:?}, top-{} predictions",
        labels.matching(),
        config.classifier.top_k
    );

    let artifacts = ArtifactStore::new(&config.artifacts.dir)
        .map_err(|e| startup_error("Artifact directory", e))?;
    if config.artifacts.sweep_on_startup {
        let removed = artifacts.sweep_orphans();
        if removed > 0 {
            log::info!(
                "Removed {} orphaned artifacts from {}",
                removed,
                artifacts.dir().display()
            );
        }
    }

    let actuator = actuator::from_config(&config.actuator);

    let pipeline = web::Data::new(Pipeline::new(
        Arc::new(artifacts),
        classifier,
        Arc::new(labels),
        actuator.clone(),
        config.classifier.top_k,
    ));
    let limits = web::Data::new(UploadLimits {
        max_bytes: config.server.max_upload_bytes,
    });

    let bind_address = config.bind_address();
    log::info!("Starting server on {}", bind_address);

    HttpServer::new(move || {
        App::new()
            .wrap(
                Cors::default()
                    .allow_any_origin()
                    .allowed_methods(vec!["GET", "POST", "OPTIONS"])
                    .allow_any_header()
                    .max_age(3600),
            )
            .app_data(pipeline.clone())
            .app_data(limits.clone())
            .configure(configure_routes)
    })
    .bind(&bind_address)?
    .run()
    .await?;

    log::info!("Server stopped");
    actuator.close();
    Ok(())
}

fn startup_error(stage: &str, err: impl Display) -> std::io::Error {
    log::error!("{} failed: {}", stage, err);
    std::io::Error::other(format!("{} failed: {}", stage, err))
}
