use std::fmt;

use flowanon_core::{
    AnonymizedFlow, EnrichedFlow, GeoResolver, Locality, PermutationTables, TopologyResolver,
};
use indicatif::ProgressBar;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::AnonymizerConfig;
use crate::geo::{resolve_self_location, MaxMindGeoResolver};
use crate::progress;
use crate::sink::BatchSink;
use crate::source::{FlowPage, FlowSource};
use crate::topology::TopologySetup;

/// Everything built once before the first fetch and read-only afterwards
#[derive(Debug)]
pub struct PipelineContext<G> {
    pub tables: PermutationTables,
    pub resolver: TopologyResolver<G>,
}

impl<G: GeoResolver> PipelineContext<G> {
    pub fn new(tables: PermutationTables, resolver: TopologyResolver<G>) -> Self {
        Self { tables, resolver }
    }
}

impl PipelineContext<MaxMindGeoResolver> {
    /// Open the databases, build both tries, resolve the self-location and
    /// derive the substitution tables. Any failure aborts the run.
    pub async fn initialize(
        config: &AnonymizerConfig,
        secret: &[u8],
        quiet: bool,
    ) -> anyhow::Result<Self> {
        let tables = PermutationTables::derive(secret)?;

        let geo = MaxMindGeoResolver::open(&config.databases)?;
        let topology = TopologySetup::new(&config.databases, config.split_policy)
            .quiet(quiet)
            .build()?;
        let self_location =
            resolve_self_location(&geo, config.self_address, &config.checkip_url).await?;

        let resolver = TopologyResolver::new(topology.private, topology.public, geo, self_location);
        Ok(Self::new(tables, resolver))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineState {
    Idle,
    Fetching,
    Enriching,
    Anonymizing,
    Emitting,
    Done,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Fetching => "fetching",
            Self::Enriching => "enriching",
            Self::Anonymizing => "anonymizing",
            Self::Emitting => "emitting",
            Self::Done => "done",
        };
        f.write_str(name)
    }
}

/// Counters for one run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PipelineStats {
    pub pages: u64,
    pub records: u64,
    /// Public endpoints the geo databases could not resolve
    pub geo_misses: u64,
}

/// Pulls pages from a source, enriches and anonymizes every record, and
/// emits each page as one batch
pub struct FlowPipeline<'a, S, K, G> {
    context: &'a PipelineContext<G>,
    source: S,
    sink: K,
    state: PipelineState,
    stats: PipelineStats,
    quiet: bool,
}

impl<'a, S, K, G> FlowPipeline<'a, S, K, G>
where
    S: FlowSource,
    K: BatchSink,
    G: GeoResolver,
{
    pub fn new(context: &'a PipelineContext<G>, source: S, sink: K) -> Self {
        Self {
            context,
            source,
            sink,
            state: PipelineState::Idle,
            stats: PipelineStats::default(),
            quiet: false,
        }
    }

    pub fn quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats
    }

    pub fn into_sink(self) -> K {
        self.sink
    }

    fn transition(&mut self, next: PipelineState) {
        debug!(from = %self.state, to = %next, "Pipeline state");
        self.state = next;
    }

    /// Run until the source returns an empty page.
    ///
    /// The source cursor is released whether or not the run succeeds.
    pub async fn run(&mut self) -> anyhow::Result<PipelineStats> {
        if self.state == PipelineState::Done {
            return Ok(self.stats);
        }

        let drained = self.drain().await;
        if let Err(e) = self.source.finish().await {
            warn!(error = %e, "Failed to release source cursor");
        }
        drained?;
        self.transition(PipelineState::Done);

        info!(
            pages = self.stats.pages,
            records = self.stats.records,
            geo_misses = self.stats.geo_misses,
            "Pipeline finished"
        );
        Ok(self.stats)
    }

    async fn drain(&mut self) -> anyhow::Result<()> {
        self.transition(PipelineState::Fetching);
        let mut page = self.source.first_page().await?;
        let pb = self.progress_for(&page)?;

        while !page.is_empty() {
            self.stats.pages += 1;
            let records = page.records.len();
            let batch = self.process(std::mem::take(&mut page.records));

            self.transition(PipelineState::Emitting);
            self.sink.write_batch(&batch)?;
            pb.inc(records as u64);

            info!(
                page = self.stats.pages,
                records,
                total_records = self.stats.records,
                "Emitted batch"
            );

            self.transition(PipelineState::Fetching);
            page = match page.cursor.as_deref() {
                Some(cursor) => self.source.next_page(cursor).await?,
                None => FlowPage::end(),
            };
        }

        pb.finish_and_clear();
        Ok(())
    }

    /// Enrich then anonymize one page, preserving record order
    fn process(&mut self, records: Vec<flowanon_core::FlowRecord>) -> Vec<AnonymizedFlow> {
        self.transition(PipelineState::Enriching);
        let resolver = &self.context.resolver;
        let mut enriched: Vec<EnrichedFlow> =
            records.into_iter().map(|r| resolver.enrich(r)).collect();

        let misses = enriched.iter().map(geo_misses).sum::<u64>();
        if misses > 0 {
            warn!(page = self.stats.pages, misses, "Unresolved public endpoints in batch");
        }
        self.stats.geo_misses += misses;
        self.stats.records += enriched.len() as u64;

        self.transition(PipelineState::Anonymizing);
        for flow in &mut enriched {
            flow.anonymize(&self.context.tables);
        }
        enriched.into_iter().map(AnonymizedFlow::from).collect()
    }

    fn progress_for(&self, page: &FlowPage) -> anyhow::Result<ProgressBar> {
        match page.total {
            Some(total) => progress::bar(total, "records", self.quiet),
            None => Ok(ProgressBar::hidden()),
        }
    }
}

fn geo_misses(flow: &EnrichedFlow) -> u64 {
    [
        (flow.flow.src_locality, &flow.src),
        (flow.flow.dst_locality, &flow.dst),
    ]
    .iter()
    .filter(|(locality, e)| *locality == Locality::Public && !e.geo.resolved)
    .count() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::VecSource;
    use flowanon_core::{FlowRecord, GeoInfo, Ipv4Prefix, PrefixTrie, SplitPolicy};
    use std::net::Ipv4Addr;

    struct FixedGeo;

    impl GeoResolver for FixedGeo {
        fn lookup(&self, addr: Ipv4Addr) -> GeoInfo {
            if addr.octets()[0] == 8 {
                GeoInfo {
                    country_code: Some("US".into()),
                    longitude: Some(-97.82),
                    latitude: Some(37.75),
                    asn: Some(15169),
                    resolved: true,
                }
            } else {
                GeoInfo::unresolved()
            }
        }
    }

    fn context() -> PipelineContext<FixedGeo> {
        let private = PrefixTrie::build(
            [("10.1.0.0/16".parse::<Ipv4Prefix>().unwrap(), 5)],
            SplitPolicy::Overwrite,
        );
        let public = PrefixTrie::build(
            [("8.8.8.0/24".parse::<Ipv4Prefix>().unwrap(), 0)],
            SplitPolicy::Overwrite,
        );
        let home = GeoInfo {
            country_code: Some("AT".into()),
            resolved: true,
            ..Default::default()
        };
        PipelineContext::new(
            PermutationTables::derive(b"foobar").unwrap(),
            TopologyResolver::new(private, public, FixedGeo, home),
        )
    }

    fn flow(seq: u64, src: [u8; 4], dst: [u8; 4], locality: Locality) -> FlowRecord {
        FlowRecord {
            first_switched: None,
            last_switched: None,
            bytes: 64,
            protocol: 6,
            src_addr: Ipv4Addr::from(src),
            src_port: 1024,
            dst_addr: Ipv4Addr::from(dst),
            dst_port: 443,
            src_locality: locality,
            dst_locality: locality,
            tcp_flags: None,
            flow_seq_num: Some(seq),
            host: None,
        }
    }

    #[tokio::test]
    async fn test_empty_source_goes_straight_to_done() {
        let ctx = context();
        let mut sink: Vec<Vec<AnonymizedFlow>> = Vec::new();
        let mut pipeline = FlowPipeline::new(&ctx, VecSource::default(), &mut sink).quiet(true);
        assert_eq!(pipeline.state(), PipelineState::Idle);

        let stats = pipeline.run().await.unwrap();
        assert_eq!(pipeline.state(), PipelineState::Done);
        assert_eq!(stats, PipelineStats::default());
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn test_batches_follow_fetch_order() {
        let ctx = context();
        let pages = vec![
            vec![
                flow(1, [10, 1, 10, 1], [10, 1, 2, 3], Locality::Private),
                flow(2, [8, 8, 8, 8], [1, 1, 1, 1], Locality::Public),
            ],
            vec![flow(3, [10, 1, 0, 9], [10, 1, 0, 10], Locality::Private)],
        ];
        let mut pipeline = FlowPipeline::new(&ctx, VecSource::new(pages), Vec::new()).quiet(true);

        let stats = pipeline.run().await.unwrap();
        assert_eq!(stats.pages, 2);
        assert_eq!(stats.records, 3);
        // 1.1.1.1 is public and unknown to the geo resolver
        assert_eq!(stats.geo_misses, 1);

        let batches = pipeline.into_sink();
        let seqs: Vec<Vec<u64>> = batches
            .iter()
            .map(|b| b.iter().filter_map(|f| f.flow_seq_num).collect())
            .collect();
        assert_eq!(seqs, vec![vec![1, 2], vec![3]]);

        let first = &batches[0][0];
        assert_eq!(first.src_addr, Ipv4Addr::new(169, 149, 65, 128));
        assert_eq!(first.src_network, Ipv4Addr::new(169, 149, 13, 68));
        assert_eq!(first.src_vlan, 5);
        assert_eq!(first.src_country_code, "AT");

        let second = &batches[0][1];
        assert_eq!(second.src_addr, Ipv4Addr::new(240, 39, 126, 115));
        assert_eq!(second.src_network, Ipv4Addr::new(240, 39, 126, 68));
        assert_eq!(second.src_asn, 15169);
        assert_eq!(second.dst_country_code, "unknown");
        assert_eq!(second.dst_prefix_len, 0);
    }

    #[tokio::test]
    async fn test_run_after_done_is_noop() {
        let ctx = context();
        let pages = vec![vec![flow(1, [10, 1, 1, 1], [10, 1, 1, 2], Locality::Private)]];
        let mut pipeline = FlowPipeline::new(&ctx, VecSource::new(pages), Vec::new()).quiet(true);

        pipeline.run().await.unwrap();
        let again = pipeline.run().await.unwrap();
        assert_eq!(again.pages, 1);
        assert_eq!(pipeline.into_sink().len(), 1);
    }

    #[derive(Default)]
    struct FailingSource {
        finished: bool,
    }

    impl FlowSource for FailingSource {
        async fn first_page(&mut self) -> anyhow::Result<FlowPage> {
            Ok(FlowPage {
                cursor: Some("scroll-1".into()),
                total: Some(2),
                records: vec![flow(1, [10, 1, 1, 1], [10, 1, 1, 2], Locality::Private)],
            })
        }

        async fn next_page(&mut self, _cursor: &str) -> anyhow::Result<FlowPage> {
            Err(crate::elastic::ScrollError::ContextExpired.into())
        }

        async fn finish(&mut self) -> anyhow::Result<()> {
            self.finished = true;
            Ok(())
        }
    }

    struct RejectingSink;

    impl BatchSink for RejectingSink {
        fn write_batch(&mut self, _batch: &[AnonymizedFlow]) -> anyhow::Result<()> {
            anyhow::bail!("disk full")
        }
    }

    #[tokio::test]
    async fn test_expired_cursor_aborts_run() {
        let ctx = context();
        let mut source = FailingSource::default();
        let mut pipeline = FlowPipeline::new(&ctx, &mut source, Vec::new()).quiet(true);

        let err = pipeline.run().await.unwrap_err();
        assert!(err.downcast_ref::<crate::elastic::ScrollError>().is_some());
        assert_eq!(pipeline.state(), PipelineState::Fetching);
        // the batch fetched before the failure was already emitted
        assert_eq!(pipeline.into_sink().len(), 1);
        assert!(source.finished);
    }

    #[tokio::test]
    async fn test_sink_failure_releases_cursor() {
        let ctx = context();
        let mut source = FailingSource::default();
        let mut pipeline = FlowPipeline::new(&ctx, &mut source, RejectingSink).quiet(true);

        let err = pipeline.run().await.unwrap_err();
        assert_eq!(err.to_string(), "disk full");
        assert_eq!(pipeline.state(), PipelineState::Emitting);
        drop(pipeline);
        assert!(source.finished);
    }
}
