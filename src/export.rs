//! Writing capture windows to `.dsl` containers
//!
//! The container is a ZIP archive holding an INI-style `header` entry and
//! one entry per channel and block:
//!
//! - logic: `L-<probe>/<block>`, one bit per sample, LSB first
//! - analog: `A-<probe>/<block>`, one byte per sample
//! - oscilloscope: `O-<probe>/0`, the whole channel in a single entry
//!
//! A file holds exactly one data type. Probes are the enabled channels,
//! renumbered from 0 in channel order.

use crate::capture::CaptureWindow;
use crate::source::{Channel, ChannelKind, DeviceMode, format_sample_rate};
use std::fmt::Write as _;
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Samples per logic block: 2 MiB of packed bits per channel
pub const DEFAULT_BLOCK_SAMPLES: u64 = 2 * 1024 * 1024 * 8;

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("Multi-type export not supported: enabled channels mix {first:?} and {second:?} data")]
    MultiTypeUnsupported { first: ChannelKind, second: ChannelKind },

    #[error("No enabled channels to export")]
    NoChannels,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),
}

/// What was written
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportSummary {
    pub mode: DeviceMode,
    pub probes: usize,
    pub samples: u64,
    pub blocks: u64,
}

/// `.dsl` writer settings
#[derive(Debug, Clone)]
pub struct DslExporter {
    block_samples: u64,
    compression: CompressionMethod,
}

impl Default for DslExporter {
    fn default() -> Self {
        Self {
            block_samples: DEFAULT_BLOCK_SAMPLES,
            compression: CompressionMethod::Deflated,
        }
    }
}

/// Export `window` with default settings
pub fn export_dsl<P: AsRef<Path>>(path: P, window: &CaptureWindow) -> Result<ExportSummary, ExportError> {
    DslExporter::new().write(path, window)
}

impl DslExporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Samples per logic or analog block, rounded up to whole bytes of bits
    pub fn with_block_samples(mut self, samples: u64) -> Self {
        self.block_samples = samples.max(8).div_ceil(8) * 8;
        self
    }

    /// Store entries without compression
    pub fn stored(mut self) -> Self {
        self.compression = CompressionMethod::Stored;
        self
    }

    /// Write the window. Nothing is created when the window cannot be
    /// exported, and a partially written file is removed on failure.
    pub fn write<P: AsRef<Path>>(&self, path: P, window: &CaptureWindow) -> Result<ExportSummary, ExportError> {
        let path = path.as_ref();
        let probes: Vec<&Channel> = window.channels().iter().filter(|c| c.enabled).collect();
        let kind = single_kind(&probes)?;
        let mode = match (kind, window.mode()) {
            (ChannelKind::Digital, _) => DeviceMode::Logic,
            (ChannelKind::Analog, DeviceMode::Dso) => DeviceMode::Dso,
            (ChannelKind::Analog, _) => DeviceMode::Analog,
        };

        let file = File::create(path)?;
        match self.write_archive(file, window, &probes, mode) {
            Ok(summary) => {
                info!(
                    "[export] Wrote {}: {} probes, {} samples in {} blocks",
                    path.display(),
                    summary.probes,
                    summary.samples,
                    summary.blocks
                );
                Ok(summary)
            }
            Err(e) => {
                if let Err(remove) = fs::remove_file(path) {
                    warn!("[export] Could not remove partial file {}: {}", path.display(), remove);
                }
                Err(e)
            }
        }
    }

    fn write_archive(
        &self,
        file: File,
        window: &CaptureWindow,
        probes: &[&Channel],
        mode: DeviceMode,
    ) -> Result<ExportSummary, ExportError> {
        let samples = window.num_samples();
        let block_samples = match mode {
            DeviceMode::Dso => samples.max(1),
            _ => self.block_samples,
        };
        let blocks = samples.div_ceil(block_samples);

        let options = SimpleFileOptions::default().compression_method(self.compression);
        let mut zip = ZipWriter::new(file);

        zip.start_file("header", options)?;
        zip.write_all(header(window, probes, mode, blocks).as_bytes())?;

        for (probe, channel) in probes.iter().enumerate() {
            for block in 0..blocks {
                let start = block * block_samples;
                let end = (start + block_samples).min(samples);
                let (name, data) = match mode {
                    DeviceMode::Logic => (format!("L-{}/{}", probe, block), pack_bits(window, channel.id, start, end)),
                    DeviceMode::Analog => (format!("A-{}/{}", probe, block), analog_bytes(window, channel.id, start, end)),
                    DeviceMode::Dso => (format!("O-{}/{}", probe, block), analog_bytes(window, channel.id, start, end)),
                };
                debug!("[export] {} ({} bytes)", name, data.len());
                zip.start_file(name, options)?;
                zip.write_all(&data)?;
            }
        }
        zip.finish()?;

        Ok(ExportSummary {
            mode,
            probes: probes.len(),
            samples,
            blocks,
        })
    }
}

fn single_kind(probes: &[&Channel]) -> Result<ChannelKind, ExportError> {
    let first = probes.first().ok_or(ExportError::NoChannels)?.kind;
    match probes.iter().find(|c| c.kind != first) {
        Some(other) => Err(ExportError::MultiTypeUnsupported {
            first,
            second: other.kind,
        }),
        None => Ok(first),
    }
}

fn header(window: &CaptureWindow, probes: &[&Channel], mode: DeviceMode, blocks: u64) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "[version]");
    let _ = writeln!(out, "version = 2");
    let _ = writeln!(out, "[header]");
    let _ = writeln!(out, "driver = dslcap");
    let _ = writeln!(out, "device mode = {}", mode.code());
    let _ = writeln!(out, "capturefile = data");
    let _ = writeln!(out, "total samples = {}", window.num_samples());
    let _ = writeln!(out, "total probes = {}", probes.len());
    let _ = writeln!(out, "total blocks = {}", blocks);
    let _ = writeln!(out, "samplerate = {}", format_sample_rate(window.samplerate_hz()));
    let _ = writeln!(out, "trigger pos = {}", window.trigger_index());
    for (probe, channel) in probes.iter().enumerate() {
        let _ = writeln!(out, "probe{} = {}", probe, channel.name);
        if let Some(cal) = channel.calibration {
            let _ = writeln!(out, "gain{} = {}", probe, cal.gain);
            let _ = writeln!(out, "offset{} = {}", probe, cal.offset);
        }
    }
    out
}

fn pack_bits(window: &CaptureWindow, channel: usize, start: u64, end: u64) -> Vec<u8> {
    let mut packed = vec![0u8; (end - start).div_ceil(8) as usize];
    for index in start..end {
        if window.bit(index, channel).unwrap_or(false) {
            let bit = (index - start) as usize;
            packed[bit / 8] |= 1 << (bit % 8);
        }
    }
    packed
}

fn analog_bytes(window: &CaptureWindow, channel: usize, start: u64, end: u64) -> Vec<u8> {
    (start..end).map(|index| window.analog(index, channel).unwrap_or(0)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{Calibration, DeviceInfo, DslFileSource, SampleSource, SourceConfig};
    use std::io::Read;
    use zip::ZipArchive;

    fn temp_path(tag: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("dslcap_export_{}_{}.dsl", tag, std::process::id()))
    }

    fn logic_window(channels: Vec<Channel>, values: &[u64], trigger: u64) -> CaptureWindow {
        let info = DeviceInfo {
            mode: DeviceMode::Logic,
            samplerate_hz: 2_000_000,
            channels,
        };
        let unit = info.unit_size();
        let bytes = values.iter().flat_map(|v| v.to_le_bytes()[..unit].to_vec()).collect();
        CaptureWindow::from_raw(info, bytes, trigger)
    }

    #[test]
    fn test_logic_export_reads_back() {
        let path = temp_path("logic");
        let values: Vec<u64> = (0..40u64).map(|i| (i % 2) | (u64::from(i >= 25) << 2)).collect();
        let window = logic_window(
            vec![
                Channel::digital(0).with_name("CLK"),
                Channel::digital(1).disabled(),
                Channel::digital(2).with_name("CS"),
            ],
            &values,
            7,
        );

        let summary = DslExporter::new().with_block_samples(16).write(&path, &window).unwrap();
        assert_eq!(
            summary,
            ExportSummary {
                mode: DeviceMode::Logic,
                probes: 2,
                samples: 40,
                blocks: 3
            }
        );

        let mut source = DslFileSource::new(&path).unwrap();
        let header = source.header().clone();
        assert_eq!(header.total_probes, 2);
        assert_eq!(header.samples_per_block, 16);
        assert_eq!(header.samplerate_hz, 2_000_000);
        assert_eq!(header.trigger_pos, Some(7));
        assert_eq!(header.probe_names, vec!["CLK".to_string(), "CS".to_string()]);

        source.open(&SourceConfig { chunk_samples: 64, limit_samples: None }).unwrap();
        let chunk = source.read_chunk().unwrap();
        assert_eq!(chunk.num_samples, 40);
        for i in 0..40 {
            let expected = (values[i] & 1) | ((values[i] >> 2) & 1) << 1;
            assert_eq!(chunk.value(i), expected, "sample {i}");
        }
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_mixed_types_create_no_file() {
        let path = temp_path("mixed");
        let info = DeviceInfo {
            mode: DeviceMode::Logic,
            samplerate_hz: 1_000,
            channels: vec![
                Channel::digital(0),
                Channel::analog(1, Calibration { gain: 1.0, offset: 0.0 }),
            ],
        };
        let window = CaptureWindow::from_raw(info, vec![0; 4], 0);
        let err = export_dsl(&path, &window).unwrap_err();
        assert!(matches!(
            err,
            ExportError::MultiTypeUnsupported {
                first: ChannelKind::Digital,
                second: ChannelKind::Analog
            }
        ));
        assert!(!path.exists());
    }

    #[test]
    fn test_no_enabled_channels() {
        let path = temp_path("none");
        let window = logic_window(vec![Channel::digital(0).disabled()], &[0, 1], 0);
        assert!(matches!(export_dsl(&path, &window), Err(ExportError::NoChannels)));
        assert!(!path.exists());
    }

    #[test]
    fn test_analog_export_entries() {
        let path = temp_path("analog");
        let info = DeviceInfo {
            mode: DeviceMode::Analog,
            samplerate_hz: 1_000,
            channels: vec![
                Channel::analog(0, Calibration { gain: 0.5, offset: 0.0 }),
                Channel::analog(1, Calibration { gain: 1.0, offset: -1.0 }),
            ],
        };
        let window = CaptureWindow::from_raw(info, vec![1, 10, 2, 20, 3, 30], 0);
        let summary = export_dsl(&path, &window).unwrap();
        assert_eq!(summary.mode, DeviceMode::Analog);
        assert_eq!(summary.blocks, 1);

        let mut archive = ZipArchive::new(File::open(&path).unwrap()).unwrap();
        let mut data = Vec::new();
        archive.by_name("A-1/0").unwrap().read_to_end(&mut data).unwrap();
        assert_eq!(data, vec![10, 20, 30]);

        let mut header = String::new();
        archive.by_name("header").unwrap().read_to_string(&mut header).unwrap();
        assert!(header.contains("device mode = 2"));
        assert!(header.contains("gain0 = 0.5"));
        fs::remove_file(&path).unwrap();
    }
}
