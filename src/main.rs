use std::{fs, path::Path};

use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use tracing_subscriber::EnvFilter;

use medical_image_seg::{
    config::{Command, Config},
    server, AnalysisPipeline, AnalysisRequest,
};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::new();
    config.validate()?;
    init_tracing(&config.log_level);

    let pipeline = AnalysisPipeline::from_config(&config)?;

    match &config.command {
        None | Some(Command::Serve) => server::serve(&config, pipeline).await,
        Some(Command::Analyze { input, mask_out }) => {
            analyze_file(&pipeline, &config, input, mask_out.as_deref()).await
        }
    }
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn analyze_file(
    pipeline: &AnalysisPipeline,
    config: &Config,
    input: &Path,
    mask_out: Option<&Path>,
) -> Result<()> {
    let bytes =
        fs::read(input).with_context(|| format!("Failed to read image: {}", input.display()))?;

    let result = pipeline
        .run(AnalysisRequest::from_bytes(bytes).with_labels(config.labels.clone()))
        .await
        .with_context(|| format!("Failed to analyze image: {}", input.display()))?;

    if let Some(path) = mask_out {
        let png = STANDARD.decode(&result.segmentation_mask_b64)?;
        fs::write(path, png)
            .with_context(|| format!("Failed to save mask: {}", path.display()))?;
    }

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}
