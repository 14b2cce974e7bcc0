//! DSL file source
//!
//! Provides `DslFileSource` - a sample source that replays DSLogic .dsl capture
//! files. The container is a ZIP archive with an INI-style `header` entry and
//! one entry per probe and block. Logic captures store packed bits
//! (`L-<probe>/<block>`, LSB-first); analog captures store one byte per
//! sample (`A-<probe>/<block>`) and DSO captures a single block per probe
//! (`O-<probe>/0`). Blocks are loaded on demand and cached, then interleaved
//! into sample-major chunks.

use super::{Calibration, Capabilities, Channel, DeviceInfo, DeviceMode, SampleSource, SourceConfig, SourceError};
use crate::runtime::{SampleChunk, logic_unit_size};
use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};
use zip::ZipArchive;

type Result<T> = std::result::Result<T, SourceError>;

/// Header information from a DSL file
#[derive(Debug, Clone)]
pub struct DslHeader {
    /// Container format version
    pub version: u32,
    pub mode: DeviceMode,
    /// Total number of probes/channels
    pub total_probes: usize,
    /// Sample rate as written (e.g., "50 MHz")
    pub samplerate: String,
    /// Sample rate in Hz
    pub samplerate_hz: u64,
    /// Total number of samples captured
    pub total_samples: u64,
    /// Total number of data blocks
    pub total_blocks: u64,
    /// Samples per block (from the first block's size)
    pub samples_per_block: u64,
    /// Trigger position in samples, if recorded
    pub trigger_pos: Option<u64>,
    /// Probe names indexed by probe number (0-based)
    pub probe_names: Vec<String>,
    /// `gainN`/`offsetN` pairs indexed by probe number
    pub calibrations: Vec<Option<Calibration>>,
}

/// Entry name prefix for a capture mode's data blocks
fn block_prefix(mode: DeviceMode) -> char {
    match mode {
        DeviceMode::Logic => 'L',
        DeviceMode::Analog => 'A',
        DeviceMode::Dso => 'O',
    }
}

/// Source that replays a DSLogic .dsl capture file
///
/// Reports random-access capability: the whole capture is on disk, so any
/// trigger mode can be evaluated against it.
///
/// # Example
/// ```ignore
/// let mut source = DslFileSource::new("capture.dsl")?;
/// source.open(&SourceConfig::default())?;
/// let chunk = source.read_chunk()?;
/// ```
pub struct DslFileSource {
    name: String,
    archive: ZipArchive<File>,
    header: DslHeader,
    blocks: HashMap<(usize, u64), Arc<[u8]>>,
    chunk_samples: usize,
    limit: u64,
    position: u64,
    sequence: u64,
    opened: bool,
}

impl DslFileSource {
    /// Open a DSL file and parse its header
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        let mut archive = ZipArchive::new(file)?;
        let header = Self::parse_header(&mut archive)?;

        info!(
            "Opened DSL file: {:?} mode, {} probes, {} samples at {} ({} blocks)",
            header.mode, header.total_probes, header.total_samples, header.samplerate, header.total_blocks
        );

        Ok(Self {
            name: "dsl_file_source".to_string(),
            archive,
            limit: header.total_samples,
            header,
            blocks: HashMap::new(),
            chunk_samples: 4096,
            position: 0,
            sequence: 0,
            opened: false,
        })
    }

    fn parse_header(archive: &mut ZipArchive<File>) -> Result<DslHeader> {
        let mut header_file = archive
            .by_name("header")
            .map_err(|e| SourceError::ParseHeader(format!("Cannot find header file: {}", e)))?;

        let mut header_content = String::new();
        header_file.read_to_string(&mut header_content)?;
        drop(header_file);

        let mut version: u32 = 1;
        let mut mode = DeviceMode::Logic;
        let mut total_probes: Option<usize> = None;
        let mut samplerate: Option<String> = None;
        let mut total_samples: Option<u64> = None;
        let mut total_blocks: Option<u64> = None;
        let mut trigger_pos: Option<u64> = None;
        let mut probe_names_map: HashMap<usize, String> = HashMap::new();
        let mut gains: HashMap<usize, f64> = HashMap::new();
        let mut offsets: HashMap<usize, f64> = HashMap::new();

        for line in header_content.lines() {
            let line = line.trim();
            let Some((key, value)) = line.split_once(" = ") else {
                continue;
            };

            match key {
                "version" => version = value.parse().unwrap_or(1),
                "device mode" => {
                    mode = value
                        .parse::<u8>()
                        .ok()
                        .and_then(DeviceMode::from_code)
                        .ok_or_else(|| SourceError::ParseHeader(format!("Invalid device mode: {}", value)))?
                }
                "total probes" => total_probes = value.parse().ok(),
                "samplerate" => samplerate = Some(value.to_string()),
                "total samples" => total_samples = value.parse().ok(),
                "total blocks" => total_blocks = value.parse().ok(),
                "trigger pos" => trigger_pos = value.parse().ok(),
                _ => {
                    let indexed = |prefix: &str| key.strip_prefix(prefix).and_then(|n| n.parse::<usize>().ok());
                    if let Some(probe) = indexed("probe") {
                        probe_names_map.insert(probe, value.to_string());
                    } else if let Some(probe) = indexed("gain")
                        && let Ok(gain) = value.parse()
                    {
                        gains.insert(probe, gain);
                    } else if let Some(probe) = indexed("offset")
                        && let Ok(offset) = value.parse()
                    {
                        offsets.insert(probe, offset);
                    }
                }
            }
        }

        let total_probes =
            total_probes.ok_or_else(|| SourceError::MissingField("total probes".to_string()))?;
        let samplerate =
            samplerate.ok_or_else(|| SourceError::MissingField("samplerate".to_string()))?;
        let total_samples =
            total_samples.ok_or_else(|| SourceError::MissingField("total samples".to_string()))?;
        let total_blocks =
            total_blocks.ok_or_else(|| SourceError::MissingField("total blocks".to_string()))?;

        let samplerate_hz = parse_sample_rate(&samplerate)
            .ok_or_else(|| SourceError::ParseHeader(format!("Invalid sample rate: {}", samplerate)))?;

        if total_samples > 0 && total_blocks == 0 {
            return Err(SourceError::ParseHeader(format!(
                "{} samples recorded but no data blocks",
                total_samples
            )));
        }

        // Blocks are fixed-size except the last one
        let samples_per_block = if total_blocks == 0 {
            0
        } else {
            let first = format!("{}-0/0", block_prefix(mode));
            let mut file = archive
                .by_name(&first)
                .map_err(|_| SourceError::ParseHeader(format!("Could not read first block {}", first)))?;
            let mut buf = Vec::new();
            file.read_to_end(&mut buf)?;
            match mode {
                DeviceMode::Logic => (buf.len() * 8) as u64,
                DeviceMode::Analog | DeviceMode::Dso => buf.len() as u64,
            }
        };
        if total_blocks > 0 && samples_per_block == 0 {
            return Err(SourceError::ParseHeader("first data block is empty".to_string()));
        }

        debug!(
            "File has {} samples across {} blocks ({} samples/block)",
            total_samples, total_blocks, samples_per_block
        );

        let probe_names = (0..total_probes)
            .map(|i| {
                probe_names_map
                    .get(&i)
                    .cloned()
                    .unwrap_or_else(|| format!("Probe{}", i))
            })
            .collect();
        let calibrations = (0..total_probes)
            .map(|i| match (gains.get(&i), offsets.get(&i)) {
                (None, None) => None,
                (gain, offset) => Some(Calibration {
                    gain: gain.copied().unwrap_or(1.0),
                    offset: offset.copied().unwrap_or(0.0),
                }),
            })
            .collect();

        Ok(DslHeader {
            version,
            mode,
            total_probes,
            samplerate,
            samplerate_hz,
            total_samples,
            total_blocks,
            samples_per_block,
            trigger_pos,
            probe_names,
            calibrations,
        })
    }

    pub fn header(&self) -> &DslHeader {
        &self.header
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Block number and offset inside it, after bounds checks
    fn locate(&self, channel: usize, position: u64) -> Result<(u64, usize)> {
        if channel >= self.header.total_probes {
            return Err(SourceError::InvalidProbe(channel));
        }
        if position >= self.header.total_samples || self.header.samples_per_block == 0 {
            return Err(SourceError::OutOfBounds(position));
        }
        let block_num = position / self.header.samples_per_block;
        if block_num >= self.header.total_blocks {
            return Err(SourceError::OutOfBounds(position));
        }
        Ok((block_num, (position % self.header.samples_per_block) as usize))
    }

    fn expect_mode(&self, logic: bool) -> Result<()> {
        if (self.header.mode == DeviceMode::Logic) == logic {
            return Ok(());
        }
        Err(SourceError::WrongMode {
            expected: if logic { DeviceMode::Logic } else { DeviceMode::Analog },
            found: self.header.mode,
        })
    }

    /// Read a single bit from a specific channel at a specific position
    pub fn read_bit(&mut self, channel: usize, position: u64) -> Result<bool> {
        self.expect_mode(true)?;
        let (block_num, offset) = self.locate(channel, position)?;
        let data = self.block(channel, block_num)?;
        Ok(get_bit(&data, offset))
    }

    /// Raw reading of an analog or DSO probe at a specific position
    pub fn read_analog(&mut self, channel: usize, position: u64) -> Result<u8> {
        self.expect_mode(false)?;
        let (block_num, offset) = self.locate(channel, position)?;
        let data = self.block(channel, block_num)?;
        data.get(offset).copied().ok_or(SourceError::InvalidBlock(block_num))
    }

    /// Load a block from the cache or the archive
    fn block(&mut self, channel: usize, block_num: u64) -> Result<Arc<[u8]>> {
        let key = (channel, block_num);
        if let Some(data) = self.blocks.get(&key) {
            return Ok(Arc::clone(data));
        }

        let block_name = format!("{}-{}/{}", block_prefix(self.header.mode), channel, block_num);
        let mut file = self
            .archive
            .by_name(&block_name)
            .map_err(|_| SourceError::InvalidBlock(block_num))?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf)?;
        drop(file);

        let data = Arc::<[u8]>::from(buf);
        self.blocks.insert(key, Arc::clone(&data));
        Ok(data)
    }

    /// Interleave packed logic bits into `data`, one bit per probe
    fn fill_logic(&mut self, data: &mut [u8], start: u64, end: u64, unit_size: usize) -> Result<()> {
        let spb = self.header.samples_per_block.max(1);
        for channel in 0..self.header.total_probes {
            let mut block_num = start / spb;
            let mut block = self.block(channel, block_num)?;
            for position in start..end {
                if position / spb != block_num {
                    block_num = position / spb;
                    block = self.block(channel, block_num)?;
                }
                if get_bit(&block, (position % spb) as usize) {
                    let index = (position - start) as usize * unit_size + channel / 8;
                    data[index] |= 1 << (channel % 8);
                }
            }
        }
        Ok(())
    }

    /// Interleave analog bytes into `data`, one byte per probe
    fn fill_analog(&mut self, data: &mut [u8], start: u64, end: u64, unit_size: usize) -> Result<()> {
        let spb = self.header.samples_per_block.max(1);
        for channel in 0..self.header.total_probes {
            let mut block_num = start / spb;
            let mut block = self.block(channel, block_num)?;
            for position in start..end {
                if position / spb != block_num {
                    block_num = position / spb;
                    block = self.block(channel, block_num)?;
                }
                let raw = block
                    .get((position % spb) as usize)
                    .copied()
                    .ok_or(SourceError::InvalidBlock(block_num))?;
                data[(position - start) as usize * unit_size + channel] = raw;
            }
        }
        Ok(())
    }
}

impl SampleSource for DslFileSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn open(&mut self, config: &SourceConfig) -> Result<()> {
        self.chunk_samples = config.chunk_samples.max(1);
        self.limit = config
            .limit_samples
            .unwrap_or(self.header.total_samples)
            .min(self.header.total_samples);
        self.position = 0;
        self.sequence = 0;
        self.blocks.clear();
        self.opened = true;
        Ok(())
    }

    fn read_chunk(&mut self) -> Result<SampleChunk> {
        if !self.opened {
            return Err(SourceError::NotOpen);
        }
        if self.position >= self.limit {
            return Err(SourceError::EndOfStream);
        }

        let start = self.position;
        let end = (start + self.chunk_samples as u64).min(self.limit);
        let unit_size = match self.header.mode {
            DeviceMode::Logic => logic_unit_size(self.header.total_probes),
            DeviceMode::Analog | DeviceMode::Dso => self.header.total_probes.max(1),
        };
        let mut data = vec![0u8; (end - start) as usize * unit_size];
        match self.header.mode {
            DeviceMode::Logic => self.fill_logic(&mut data, start, end, unit_size)?,
            DeviceMode::Analog | DeviceMode::Dso => self.fill_analog(&mut data, start, end, unit_size)?,
        }

        // Blocks behind the read position are never needed again
        let current_block = end.saturating_sub(1) / self.header.samples_per_block.max(1);
        self.blocks.retain(|(_, block), _| *block >= current_block);

        let chunk = SampleChunk::new(self.sequence, start, unit_size, Arc::from(data));
        self.position = end;
        self.sequence += 1;

        if self.sequence % 256 == 0 {
            debug!(
                "[{}] Progress: {:.1}% ({} samples)",
                self.name,
                end as f64 / self.limit as f64 * 100.0,
                end
            );
        }
        Ok(chunk)
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            supports_random_access: true,
            max_sample_depth: self.header.total_samples,
            channel_count: self.header.total_probes,
        }
    }

    fn device_info(&self) -> DeviceInfo {
        let analog = self.header.mode != DeviceMode::Logic;
        DeviceInfo {
            mode: self.header.mode,
            samplerate_hz: self.header.samplerate_hz,
            channels: self
                .header
                .probe_names
                .iter()
                .zip(&self.header.calibrations)
                .enumerate()
                .map(|(i, (name, calibration))| {
                    let channel = if analog {
                        let mut channel = Channel::analog(i, Calibration { gain: 1.0, offset: 0.0 });
                        channel.calibration = *calibration;
                        channel
                    } else {
                        Channel::digital(i)
                    };
                    channel.with_name(name.clone())
                })
                .collect(),
        }
    }

    fn close(&mut self) {
        self.opened = false;
        self.blocks.clear();
    }
}

/// Extract a single bit from a byte array at the given bit index
#[inline]
pub(crate) fn get_bit(data: &[u8], bit_index: usize) -> bool {
    let byte_index = bit_index / 8;
    let bit_offset = bit_index % 8;

    if byte_index < data.len() {
        (data[byte_index] >> bit_offset) & 1 == 1
    } else {
        false
    }
}

/// Parse a sample rate string (e.g., "50 MHz") into Hz
pub(crate) fn parse_sample_rate(samplerate: &str) -> Option<u64> {
    let parts: Vec<&str> = samplerate.split_whitespace().collect();
    if parts.len() >= 2
        && let Ok(value) = parts[0].parse::<f64>()
    {
        let multiplier = match parts[1] {
            "GHz" => 1_000_000_000.0,
            "MHz" => 1_000_000.0,
            "KHz" | "kHz" => 1_000.0,
            "Hz" => 1.0,
            _ => return None,
        };
        return Some((value * multiplier).round() as u64);
    }
    None
}

/// Format a sample rate the way .dsl headers write it
pub(crate) fn format_sample_rate(hz: u64) -> String {
    if hz >= 1_000_000_000 && hz % 1_000_000_000 == 0 {
        format!("{} GHz", hz / 1_000_000_000)
    } else if hz >= 1_000_000 && hz % 1_000_000 == 0 {
        format!("{} MHz", hz / 1_000_000)
    } else if hz >= 1_000 && hz % 1_000 == 0 {
        format!("{} KHz", hz / 1_000)
    } else {
        format!("{} Hz", hz)
    }
}
