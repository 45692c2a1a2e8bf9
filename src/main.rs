use anyhow::{Context, Result};
use ringfold::pipeline;
use ringfold::settings;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let settings = settings::load_config()?;
    tracing::debug!("{}", settings);

    pipeline::run(&settings).with_context(|| match &settings.input {
        Some(input) => format!("processing {}", input.display()),
        None => "processing input".to_string(),
    })
}
