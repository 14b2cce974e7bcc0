//! Example: capture a window from a DSL file and decode it
//!
//! Replays a .dsl capture through a session: the trigger picks the window,
//! the decoder stack annotates it, and the window can be written back out.
//!
//! Usage:
//!   cargo run --release --example capture_decode -- \
//!       --file scan.dsl \
//!       --trigger "X X X F" --pre 1000 --post 200000 \
//!       --decoder uart:rxtx=0,baudrate=115200,format=ascii \
//!       --decoder text
//!
//! From a session file, exporting the captured window:
//!   cargo run --release --example capture_decode -- \
//!       --file scan.dsl --config session.json --export window.dsl
//!
//! List the built-in decoders:
//!   cargo run --example capture_decode -- --file scan.dsl --list-decoders

use clap::Parser;
use dslcap::decode::DecoderDefinition;
use dslcap::{
    DecoderInstance, DslFileSource, OptionValue, Session, SessionConfig, TriggerConfig, WindowSpec, decoder_definition,
    decoder_ids,
};
use std::time::Instant;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to DSL file
    #[arg(short, long)]
    file: String,

    /// JSON session config; command line options override it
    #[arg(short, long)]
    config: Option<String>,

    /// Simple trigger pattern, leftmost term = highest channel (e.g. "X X R")
    #[arg(short, long)]
    trigger: Option<String>,

    /// Samples kept before the trigger
    #[arg(long)]
    pre: Option<u64>,

    /// Samples captured from the trigger on
    #[arg(long)]
    post: Option<u64>,

    /// Run-length encode the captured window
    #[arg(long)]
    rle: bool,

    /// Decoder to stack, as id[:key=value,...]; keys naming a channel role bind a channel
    #[arg(short, long)]
    decoder: Vec<String>,

    /// Write the captured window to this .dsl file
    #[arg(long)]
    export: Option<String>,

    /// Number of annotations to print (0 = all)
    #[arg(short, long, default_value = "50")]
    n: usize,

    /// Print the built-in decoders and exit
    #[arg(long)]
    list_decoders: bool,
}

fn parse_value(value: &str) -> OptionValue {
    if let Ok(int) = value.parse::<i64>() {
        OptionValue::Int(int)
    } else if let Ok(float) = value.parse::<f64>() {
        OptionValue::Float(float)
    } else {
        OptionValue::Str(value.to_string())
    }
}

fn parse_decoder(spec: &str) -> Result<DecoderInstance, String> {
    let (id, settings) = spec.split_once(':').unwrap_or((spec, ""));
    let definition = decoder_definition(id).ok_or_else(|| format!("unknown decoder '{}'", id))?;
    let mut instance = DecoderInstance::new(id);

    for setting in settings.split(',').filter(|s| !s.is_empty()) {
        let (key, value) = setting
            .split_once('=')
            .ok_or_else(|| format!("expected key=value, got '{}'", setting))?;
        if definition.channel_role(key).is_some() {
            let channel = value
                .parse()
                .map_err(|_| format!("channel for '{}' must be a number, got '{}'", key, value))?;
            instance = instance.with_channel(key, channel);
        } else {
            instance = instance.with_option(key, parse_value(value));
        }
    }
    Ok(instance)
}

fn describe(definition: &DecoderDefinition) {
    println!("{:<10} {} - {}", definition.id, definition.longname, definition.desc);
    for channel in definition.channels {
        println!("    channel  {:<10} {}", channel.id, channel.desc);
    }
    for channel in definition.optional_channels {
        println!("    optional {:<10} {}", channel.id, channel.desc);
    }
    for option in definition.options {
        println!("    option   {:<14} {} (default {:?})", option.id, option.desc, option.default);
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    if args.list_decoders {
        for id in decoder_ids() {
            if let Some(definition) = decoder_definition(id) {
                describe(definition);
            }
        }
        return Ok(());
    }

    info!("=== Capture & Decode Example ===");
    info!("File: {}", args.file);

    let mut config = match &args.config {
        Some(path) => SessionConfig::from_json_file(path)?,
        None => SessionConfig::new(),
    };
    if let Some(pattern) = &args.trigger {
        config.trigger = TriggerConfig::simple(pattern.parse()?);
    }
    if args.pre.is_some() || args.post.is_some() {
        let (pre, post) = config.window.split();
        config.window = WindowSpec::split_at(args.pre.unwrap_or(pre), args.post.unwrap_or(post));
    }
    config.rle |= args.rle;
    for spec in &args.decoder {
        config.decoders.push(parse_decoder(spec)?);
    }

    let source = DslFileSource::new(&args.file)?;
    let header = source.header();
    info!(
        "{} probes, {} samples at {}",
        header.total_probes, header.total_samples, header.samplerate
    );
    // Capture no deeper than the file
    let total = header.total_samples;
    let (pre, post) = config.window.split();
    if pre.saturating_add(post) > total {
        let post = total.saturating_sub(pre).max(1);
        let pre = pre.min(total.saturating_sub(post));
        warn!("Window shrunk to {} + {} samples to fit the file", pre, post);
        config.window = WindowSpec::split_at(pre, post);
    }

    let mut session = Session::new(Box::new(source), config)?;
    let start = Instant::now();
    let report = session.run()?;

    let shown = if args.n == 0 { report.annotations.len() } else { args.n };
    for annotation in report.annotations.iter().take(shown) {
        println!("{}", annotation);
    }
    if report.annotations.len() > shown {
        println!("... {} more", report.annotations.len() - shown);
    }
    for failure in &report.failures {
        warn!("{}", failure);
    }
    info!(
        "Decoded {} annotations in {:.2?}",
        report.annotations.len(),
        start.elapsed()
    );

    if let Some(window) = session.window() {
        info!(
            "Window: {} samples, trigger at sample {}{}",
            window.num_samples(),
            window.trigger_position,
            if window.overflow { " (overflow)" } else { "" }
        );
    }

    if let Some(path) = &args.export {
        let summary = session.export(path)?;
        info!("Exported {} probes, {} samples to {}", summary.probes, summary.samples, path);
    }

    Ok(())
}
