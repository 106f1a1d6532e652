//! Flow anonymizer CLI
//!
//! Run with:
//! ```bash
//! FLOWANON_SECRET=... cargo run -p flowanon-pipeline --bin flowanon -- --config flowanon.json
//! ```

use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Parser;
use flowanon_pipeline::{
    read_batches, AnonymizerConfig, BatchWriter, ElasticClient, FlowPipeline, PipelineContext,
};
use tracing_subscriber::EnvFilter;

const SECRET_ENV: &str = "FLOWANON_SECRET";

#[derive(Parser, Debug)]
#[command(name = "flowanon")]
#[command(about = "Enrich and anonymize netflow records from Elasticsearch")]
struct Args {
    /// JSON config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Base directory for databases (db/) and output (out/) when no config is given
    #[arg(long, default_value = ".")]
    base_dir: PathBuf,

    /// Elasticsearch URL
    #[arg(long)]
    es_url: Option<String>,

    /// Elasticsearch index pattern
    #[arg(long)]
    index: Option<String>,

    /// Records per scroll page
    #[arg(long)]
    page_size: Option<usize>,

    /// Output directory for the artifact
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// External address of this deployment (skips check-IP discovery)
    #[arg(long)]
    self_address: Option<Ipv4Addr>,

    /// Keep broader prefixes reachable when a more specific one splits them
    #[arg(long)]
    preserve_broader: bool,

    /// Permutation secret (prefer --secret-file or FLOWANON_SECRET)
    #[arg(long)]
    secret: Option<String>,

    /// File holding the permutation secret
    #[arg(long)]
    secret_file: Option<PathBuf>,

    /// Hide progress bars
    #[arg(long)]
    quiet: bool,

    /// Write the effective config to this path and exit
    #[arg(long)]
    write_config: Option<PathBuf>,

    /// Summarize an existing artifact and exit
    #[arg(long)]
    inspect: Option<PathBuf>,
}

impl Args {
    fn config(&self) -> anyhow::Result<AnonymizerConfig> {
        let mut config = match &self.config {
            Some(path) => AnonymizerConfig::load(path)?,
            None => AnonymizerConfig::from_base_dir(&self.base_dir),
        };
        if let Some(url) = &self.es_url {
            config.source.url = url.clone();
        }
        if let Some(index) = &self.index {
            config.source.index = index.clone();
        }
        if let Some(page_size) = self.page_size {
            config.source.page_size = page_size;
        }
        if let Some(dir) = &self.output_dir {
            config.output_dir = dir.clone();
        }
        if self.self_address.is_some() {
            config.self_address = self.self_address;
        }
        if self.preserve_broader {
            config.split_policy = flowanon_core::SplitPolicy::PreserveBroader;
        }
        Ok(config)
    }

    fn secret(&self) -> anyhow::Result<Vec<u8>> {
        let secret = if let Some(secret) = &self.secret {
            secret.as_bytes().to_vec()
        } else if let Some(path) = &self.secret_file {
            let raw = std::fs::read(path)
                .with_context(|| format!("reading secret file {}", path.display()))?;
            raw.trim_ascii_end().to_vec()
        } else if let Ok(secret) = std::env::var(SECRET_ENV) {
            secret.into_bytes()
        } else {
            anyhow::bail!("no secret given: use --secret, --secret-file or {}", SECRET_ENV);
        };

        if secret.is_empty() {
            anyhow::bail!("permutation secret is empty");
        }
        Ok(secret)
    }
}

fn inspect(path: &Path) -> anyhow::Result<()> {
    let batches = read_batches(path)?;
    let records: usize = batches.iter().map(Vec::len).sum();
    println!("[OK] {}: {} batches, {} records", path.display(), batches.len(), records);

    for flow in batches.iter().flatten().take(5) {
        println!(
            "  {}:{} ({}/{} vlan {} {}) -> {}:{} ({}/{} vlan {} {}) {} bytes",
            flow.src_addr,
            flow.src_port,
            flow.src_network,
            flow.src_prefix_len,
            flow.src_vlan,
            flow.src_country_code,
            flow.dst_addr,
            flow.dst_port,
            flow.dst_network,
            flow.dst_prefix_len,
            flow.dst_vlan,
            flow.dst_country_code,
            flow.bytes,
        );
    }
    if records > 5 {
        println!("  ... and {} more", records - 5);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("flowanon=info".parse()?))
        .init();

    let args = Args::parse();

    if let Some(path) = &args.inspect {
        return inspect(path);
    }

    let config = args.config()?;

    if let Some(path) = &args.write_config {
        config.save(path)?;
        println!("[OK] Wrote config to {}", path.display());
        return Ok(());
    }

    let secret = args.secret()?;
    let context = PipelineContext::initialize(&config, &secret, args.quiet).await?;

    let source = ElasticClient::new(config.source.clone())?;
    let sink = BatchWriter::create_in(&config.output_dir)?;
    let artifact = sink.path().to_path_buf();

    let mut pipeline = FlowPipeline::new(&context, source, sink).quiet(args.quiet);
    let stats = pipeline.run().await?;

    tracing::info!(
        artifact = %artifact.display(),
        pages = stats.pages,
        records = stats.records,
        geo_misses = stats.geo_misses,
        "Anonymization complete"
    );
    Ok(())
}
