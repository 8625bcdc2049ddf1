use std::{fs, io::Write};

use anyhow::{ensure, Context, Result};
use clap::Parser;
use rayon::ThreadPoolBuilder;
use tracing::info;
use tracing_subscriber::EnvFilter;

use order_prep_rs::{
    load_processor, Config, DirectoryProcessor, OrderImageProcessor, ProcessorConfig,
};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let config = Config::parse();

    ensure!(
        config.input_dir.exists(),
        "Input directory does not exist: {}",
        config.input_dir.display()
    );
    ensure!(
        config.boxes.exists(),
        "Box manifest does not exist: {}",
        config.boxes.display()
    );
    ensure!(config.batch_size > 0, "Batch size must be positive");

    if let Some(num_threads) = config.num_threads {
        ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .build_global()?;
    }

    let settings = config.settings();
    let processor = match &config.checkpoint {
        Some(checkpoint) => load_processor(checkpoint, &settings)
            .with_context(|| format!("Failed to load checkpoint: {}", checkpoint.display()))?,
        None => {
            info!("no checkpoint given, using built-in image settings");
            OrderImageProcessor::new(ProcessorConfig::from_base(&Default::default(), &settings))?
        }
    };

    let manifest = DirectoryProcessor::load_manifest(&config.boxes)
        .with_context(|| format!("Failed to read box manifest: {}", config.boxes.display()))?;

    let include_pixels = config.format == "json";
    let output = config.output.clone();
    let records =
        DirectoryProcessor::new(processor, config).process_directory(&manifest, include_pixels)?;

    let json = serde_json::to_string_pretty(&records)?;
    match output {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)?;
            }
            fs::write(&path, json)
                .with_context(|| format!("Failed to write output: {}", path.display()))?;
            info!(path = %path.display(), pages = records.len(), "output written");
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(json.as_bytes())?;
            stdout.write_all(b"\n")?;
        }
    }

    Ok(())
}
