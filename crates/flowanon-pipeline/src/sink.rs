//! Append-only output artifact
//!
//! Every batch is written as an independent zstd frame holding one
//! bincode-encoded `Vec<AnonymizedFlow>`. Concatenated frames decode as a
//! single stream, so the artifact is read back by decompressing the whole
//! file and decoding vectors until the data runs out.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Cursor, Write};
use std::path::{Path, PathBuf};

use anyhow::Context;
use flowanon_core::AnonymizedFlow;

/// File name suffix of the output artifact
pub const ARTIFACT_SUFFIX: &str = "_flows.bin.zst";

const ZSTD_LEVEL: i32 = 3;

/// Receives anonymized batches in emission order
pub trait BatchSink {
    fn write_batch(&mut self, batch: &[AnonymizedFlow]) -> anyhow::Result<()>;
}

impl<S: BatchSink + ?Sized> BatchSink for &mut S {
    fn write_batch(&mut self, batch: &[AnonymizedFlow]) -> anyhow::Result<()> {
        (**self).write_batch(batch)
    }
}

/// Keeps batches in memory
impl BatchSink for Vec<Vec<AnonymizedFlow>> {
    fn write_batch(&mut self, batch: &[AnonymizedFlow]) -> anyhow::Result<()> {
        self.push(batch.to_vec());
        Ok(())
    }
}

/// `<YYYY-mm-dd_HH-MM-SS>_flows.bin.zst` for the current local time
pub fn artifact_name() -> String {
    format!("{}{}", chrono::Local::now().format("%Y-%m-%d_%H-%M-%S"), ARTIFACT_SUFFIX)
}

/// Appends batches to one artifact file
pub struct BatchWriter {
    path: PathBuf,
    writer: BufWriter<File>,
    batches: usize,
    records: usize,
}

impl BatchWriter {
    /// Create a new timestamped artifact in `output_dir`
    pub fn create_in(output_dir: impl AsRef<Path>) -> anyhow::Result<Self> {
        let output_dir = output_dir.as_ref();
        std::fs::create_dir_all(output_dir)
            .with_context(|| format!("creating output directory {}", output_dir.display()))?;
        Self::open(output_dir.join(artifact_name()))
    }

    /// Open `path` for appending, creating it if needed
    pub fn open(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("opening artifact {}", path.display()))?;
        Ok(Self {
            path,
            writer: BufWriter::new(file),
            batches: 0,
            records: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn batches(&self) -> usize {
        self.batches
    }

    pub fn records(&self) -> usize {
        self.records
    }
}

impl BatchSink for BatchWriter {
    fn write_batch(&mut self, batch: &[AnonymizedFlow]) -> anyhow::Result<()> {
        let encoded = bincode::serialize(batch)?;
        let frame = zstd::encode_all(encoded.as_slice(), ZSTD_LEVEL)?;
        self.writer.write_all(&frame)?;
        self.writer.flush()?;

        self.batches += 1;
        self.records += batch.len();
        tracing::debug!(
            path = %self.path.display(),
            batch = self.batches,
            records = batch.len(),
            compressed = frame.len(),
            "Appended batch"
        );
        Ok(())
    }
}

/// Decode every batch of an artifact in write order
pub fn read_batches(path: impl AsRef<Path>) -> anyhow::Result<Vec<Vec<AnonymizedFlow>>> {
    let path = path.as_ref();
    let file = File::open(path).with_context(|| format!("opening artifact {}", path.display()))?;
    if file.metadata()?.len() == 0 {
        return Ok(Vec::new());
    }
    let data = zstd::decode_all(file).with_context(|| format!("decompressing {}", path.display()))?;

    let mut cursor = Cursor::new(data.as_slice());
    let mut batches = Vec::new();
    while (cursor.position() as usize) < data.len() {
        let batch: Vec<AnonymizedFlow> = bincode::deserialize_from(&mut cursor)
            .with_context(|| {
                format!("decoding batch {} of {}", batches.len() + 1, path.display())
            })?;
        batches.push(batch);
    }
    Ok(batches)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowanon_core::Locality;
    use std::net::Ipv4Addr;

    fn record(seq: u64) -> AnonymizedFlow {
        AnonymizedFlow {
            first_switched: None,
            last_switched: None,
            bytes: seq * 100,
            protocol: 17,
            src_addr: Ipv4Addr::new(1, 2, 3, 4),
            src_port: 53,
            dst_addr: Ipv4Addr::new(5, 6, 7, 8),
            dst_port: 40000,
            src_locality: Locality::Public,
            dst_locality: Locality::Private,
            tcp_flags: None,
            flow_seq_num: Some(seq),
            host: None,
            src_network: Ipv4Addr::new(1, 2, 3, 0),
            src_prefix_len: 24,
            src_vlan: 0,
            src_country_code: "unknown".into(),
            src_longitude: 0.0,
            src_latitude: 0.0,
            src_asn: 0,
            dst_network: Ipv4Addr::new(5, 6, 0, 0),
            dst_prefix_len: 16,
            dst_vlan: 12,
            dst_country_code: "AT".into(),
            dst_longitude: 16.37,
            dst_latitude: 48.21,
            dst_asn: 1853,
        }
    }

    #[test]
    fn test_artifact_name_format() {
        let name = artifact_name();
        assert!(name.ends_with(ARTIFACT_SUFFIX));
        // 2019-01-31_10-01-00
        let stamp = name.trim_end_matches(ARTIFACT_SUFFIX);
        assert_eq!(stamp.len(), 19);
        assert_eq!(&stamp[10..11], "_");
    }

    #[test]
    fn test_batches_read_back_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = BatchWriter::create_in(dir.path().join("out")).unwrap();

        writer.write_batch(&[record(1), record(2)]).unwrap();
        writer.write_batch(&[record(3)]).unwrap();
        writer.write_batch(&[]).unwrap();
        assert_eq!(writer.batches(), 3);
        assert_eq!(writer.records(), 3);

        let batches = read_batches(writer.path()).unwrap();
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0], vec![record(1), record(2)]);
        assert_eq!(batches[1], vec![record(3)]);
        assert!(batches[2].is_empty());
    }

    #[test]
    fn test_reopen_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run_flows.bin.zst");

        BatchWriter::open(&path).unwrap().write_batch(&[record(1)]).unwrap();
        BatchWriter::open(&path).unwrap().write_batch(&[record(2)]).unwrap();

        let batches = read_batches(&path).unwrap();
        assert_eq!(batches, vec![vec![record(1)], vec![record(2)]]);
    }

    #[test]
    fn test_empty_artifact_has_no_batches() {
        let dir = tempfile::tempdir().unwrap();
        let writer = BatchWriter::create_in(dir.path()).unwrap();
        assert!(read_batches(writer.path()).unwrap().is_empty());
    }
}
