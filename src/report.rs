//! Run reports and batch statistics

use crate::error::Result;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::time::Duration;
use tracing::info;
use walkdir::WalkDir;

/// Outcome of encoding one file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EncodeReport {
    /// Source file name
    pub file: String,
    /// Segments in the file
    pub total_segments: u64,
    /// Segments that matched an existing index entry
    pub repeated_segments: u64,
    /// Bytes read from the source
    pub bytes_read: u64,
    /// Containers sealed by this run
    pub containers_sealed: usize,
    pub elapsed: Duration,
}

impl EncodeReport {
    /// How much the index grew
    pub fn new_segments(&self) -> u64 {
        self.total_segments - self.repeated_segments
    }

    pub fn log(&self) {
        info!("Compressed file          : {}", self.file);
        info!("Total number of segments : {}", self.total_segments);
        info!("Hash table increased by  : {}", self.new_segments());
        info!("Repeated segments        : {}", self.repeated_segments);
        info!("Process time (sec)       : {:.6}", self.elapsed.as_secs_f64());
    }
}

/// Outcome of decoding one file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodeReport {
    /// Reconstructed file name
    pub file: String,
    pub segments: u64,
    pub bytes_written: u64,
    pub elapsed: Duration,
}

impl DecodeReport {
    pub fn log(&self) {
        info!("Decompress file    : {}", self.file);
        info!("Process time (sec) : {:.6}", self.elapsed.as_secs_f64());
    }
}

/// Aggregate statistics over a batch of files
#[derive(Debug, Clone, Default)]
pub struct BatchSummary {
    pub files: usize,
    pub total_segments: u64,
    pub repeated_segments: u64,
    pub encode_time: Duration,
    pub decode_time: Duration,
    /// Mismatched bytes between originals and reconstructions
    pub byte_errors: u64,
    pub original_bytes: u64,
    pub stored_bytes: u64,
}

impl BatchSummary {
    pub fn add_encode(&mut self, report: &EncodeReport) {
        self.files += 1;
        self.total_segments += report.total_segments;
        self.repeated_segments += report.repeated_segments;
        self.original_bytes += report.bytes_read;
        self.encode_time += report.elapsed;
    }

    pub fn add_decode(&mut self, report: &DecodeReport) {
        self.decode_time += report.elapsed;
    }

    /// Share of segments that were deduplicated, in percent
    pub fn reuse_percent(&self) -> f64 {
        if self.total_segments == 0 {
            0.0
        } else {
            self.repeated_segments as f64 / self.total_segments as f64 * 100.0
        }
    }

    pub fn compression_ratio(&self) -> f64 {
        compression_ratio(self.original_bytes, self.stored_bytes)
    }

    pub fn log(&self) {
        info!("Files                    : {}", self.files);
        info!("Total number of segments : {}", self.total_segments);
        info!("Segment reuse (%)        : {:.2}", self.reuse_percent());
        info!("Compression ratio        : {:.4}", self.compression_ratio());
        info!("Encode time (sec)        : {:.6}", self.encode_time.as_secs_f64());
        info!("Decode time (sec)        : {:.6}", self.decode_time.as_secs_f64());
        info!("Byte errors              : {}", self.byte_errors);
    }
}

/// Means over repeated runs of the same batch
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrialMeans {
    pub runs: usize,
    pub encode_secs: f64,
    pub reuse_percent: f64,
    pub compression_ratio: f64,
    pub decode_secs: f64,
    pub byte_errors: f64,
}

impl TrialMeans {
    pub fn from_runs(runs: &[BatchSummary]) -> Self {
        if runs.is_empty() {
            return TrialMeans::default();
        }
        fn mean(runs: &[BatchSummary], f: impl Fn(&BatchSummary) -> f64) -> f64 {
            runs.iter().map(f).sum::<f64>() / runs.len() as f64
        }

        TrialMeans {
            runs: runs.len(),
            encode_secs: mean(runs, |r| r.encode_time.as_secs_f64()),
            reuse_percent: mean(runs, |r| r.reuse_percent()),
            compression_ratio: mean(runs, |r| r.compression_ratio()),
            decode_secs: mean(runs, |r| r.decode_time.as_secs_f64()),
            byte_errors: mean(runs, |r| r.byte_errors as f64),
        }
    }

    pub fn log(&self, label: &str) {
        info!("Trial                    : {} ({} run(s))", label, self.runs);
        info!("Mean encode time (sec)   : {:.6}", self.encode_secs);
        info!("Mean segment reuse (%)   : {:.2}", self.reuse_percent);
        info!("Mean compression ratio   : {:.4}", self.compression_ratio);
        info!("Mean decode time (sec)   : {:.6}", self.decode_secs);
        info!("Mean byte errors         : {}", self.byte_errors);
    }

    /// Append `<label> <value>` to one file per metric under `dir`
    pub fn append_to(&self, dir: &Path, label: &str) -> Result<()> {
        fs::create_dir_all(dir)?;
        let metrics = [
            ("dedup_avg_time.txt", self.encode_secs),
            ("segs_reuse_perc.txt", self.reuse_percent),
            ("compression_ratio.txt", self.compression_ratio),
            ("dup_all_avg_time.txt", self.decode_secs),
            ("errors_count.txt", self.byte_errors),
        ];
        for (name, value) in metrics {
            let mut file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(dir.join(name))?;
            writeln!(file, "{} {}", label, value)?;
        }
        Ok(())
    }
}

/// Differing bytes over the common prefix, plus the length difference
pub fn byte_errors(original: &[u8], restored: &[u8]) -> u64 {
    let mismatched = original
        .iter()
        .zip(restored)
        .filter(|(a, b)| a != b)
        .count() as u64;
    mismatched + original.len().abs_diff(restored.len()) as u64
}

/// Compare two files byte by byte
pub fn file_byte_errors(original: &Path, restored: &Path) -> Result<u64> {
    let original = fs::read(original)?;
    let restored = fs::read(restored)?;
    Ok(byte_errors(&original, &restored))
}

/// Total size of every file below `path`; 0 if it does not exist
pub fn dir_size(path: &Path) -> Result<u64> {
    let total = WalkDir::new(path)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.metadata().map(|m| m.len()).map_err(io::Error::from))
        .sum::<io::Result<u64>>()?;
    Ok(total)
}

/// `original / stored`; 0 when nothing is stored
pub fn compression_ratio(original_bytes: u64, stored_bytes: u64) -> f64 {
    if stored_bytes == 0 {
        0.0
    } else {
        original_bytes as f64 / stored_bytes as f64
    }
}
