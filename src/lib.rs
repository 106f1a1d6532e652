//! flowanon: topology enrichment and anonymization of netflow records
//!
//! - [`flowanon_core`]: prefix tries, the octet substitution cipher, flow types
//! - [`flowanon_pipeline`]: Elasticsearch source, MaxMind adapter, batch artifact

pub use flowanon_core;
pub use flowanon_pipeline;
