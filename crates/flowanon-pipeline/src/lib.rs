//! Flow anonymization pipeline
//!
//! This crate wires the core engine to its collaborators:
//! 1. Builds the private and public tries (public trie cached on disk)
//! 2. Opens the MaxMind databases and resolves the deployment's own location
//! 3. Scrolls flow records out of Elasticsearch page by page
//! 4. Enriches and anonymizes every record
//! 5. Appends each page as a compressed batch to the run's artifact
//!
//! ## Usage
//!
//! ```no_run
//! use flowanon_pipeline::{
//!     AnonymizerConfig, BatchWriter, ElasticClient, FlowPipeline, PipelineContext,
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = AnonymizerConfig::default();
//!     let context = PipelineContext::initialize(&config, b"secret", false).await?;
//!     let source = ElasticClient::new(config.source.clone())?;
//!     let sink = BatchWriter::create_in(&config.output_dir)?;
//!     FlowPipeline::new(&context, source, sink).run().await?;
//!     Ok(())
//! }
//! ```

mod config;
mod elastic;
mod geo;
mod progress;
mod service;
mod sink;
mod source;
mod topology;

pub use config::{AnonymizerConfig, DatabasePaths, SourceConfig, TimeRange, DEFAULT_CHECKIP_URL};
pub use elastic::{build_query, ElasticClient, ScrollError, FLOW_FIELDS};
pub use geo::{discover_external_ip, find_ipv4, resolve_self_location, MaxMindGeoResolver};
pub use service::{FlowPipeline, PipelineContext, PipelineState, PipelineStats};
pub use sink::{artifact_name, read_batches, BatchSink, BatchWriter, ARTIFACT_SUFFIX};
pub use source::{FlowPage, FlowSource, VecSource};
pub use topology::{Topology, TopologySetup};
