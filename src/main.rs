use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use color_eyre::eyre::{Result, eyre};
use image::ImageFormat;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use pixcache::domain::LoadedImage;
use pixcache::infrastructure::{
    AppConfig, BundledResources, CacheManager, CliArgs, Command, StorageManager,
};

fn init_logging(config: &AppConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.to_string()));

    if let Some(log_path) = &config.log_path {
        if let Some(parent) = log_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path)?;

        let file_layer = fmt::layer()
            .with_writer(file)
            .with_ansi(false)
            .with_target(true)
            .with_thread_ids(false);

        tracing_subscriber::registry()
            .with(filter)
            .with(file_layer)
            .init();

        info!(path = %log_path.display(), "Logging initialized");
    } else {
        let stderr_layer = fmt::layer().with_writer(std::io::stderr).with_target(false);

        tracing_subscriber::registry()
            .with(filter)
            .with(stderr_layer)
            .init();
    }

    Ok(())
}

fn load_config(args: &CliArgs) -> Result<AppConfig> {
    let storage = StorageManager::new()?;
    let mut config = storage.load_config(args.config.as_deref())?;
    config.merge_with_args(args);
    Ok(config)
}

async fn create_manager(config: &AppConfig) -> Result<CacheManager> {
    let resources = match &config.resources_dir {
        Some(dir) => BundledResources::from_dir(dir).await?,
        None => BundledResources::new(),
    };

    Ok(CacheManager::from_config(&config.cache, Arc::new(resources)).await?)
}

fn report(loaded: &LoadedImage, output: Option<&Path>) -> Result<()> {
    println!(
        "{} {}x{} ({})",
        loaded.key,
        loaded.width(),
        loaded.height(),
        loaded.source
    );

    if let Some(path) = output {
        loaded.image.save_with_format(path, ImageFormat::Png)?;
        info!(path = %path.display(), "Saved decoded image");
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = CliArgs::parse();
    let config = load_config(&args)?;

    init_logging(&config)?;

    info!(version = pixcache::VERSION, "Starting {}", pixcache::NAME);

    let manager = create_manager(&config).await?;

    let result = match &args.command {
        Command::Remote { url, output } => match manager.try_load_remote(url).await {
            Ok(loaded) => report(&loaded, output.as_deref()),
            Err(e) => Err(eyre!("failed to load {url}: {e}")),
        },
        Command::Drawable { id, output } => match manager.try_load_drawable(*id).await {
            Ok(loaded) => report(&loaded, output.as_deref()),
            Err(e) => Err(eyre!("failed to load drawable {id}: {e}")),
        },
        Command::Clear => {
            manager.clear_all().await?;
            println!("Cleared {}", manager.disk().dir().display());
            Ok(())
        }
    };

    manager.close();

    result
}
