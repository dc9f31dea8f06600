//! MasterAudio CLI - plays test tones through the stream manager and reports
//! what format negotiation would do for a given input.

use std::f32::consts::PI;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use masteraudio_core::{
    AudioManager, AudioSettings, DumpingRendererFactory, HardwareMixer, ManagerConfig,
    NullRendererFactory, PlaceholderAc3Factory, RendererFactory, SampleType, StreamDescriptor,
    StreamFactory,
};
use masteraudio_dsp::{Ac3CodecFactory, ChainOptions};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

const FEED_BLOCK_MS: usize = 20;
const TONE_HZ: f32 = 440.0;
const TONE_AMPLITUDE: f32 = 0.3;

/// MasterAudio - multi-stream audio pipeline
#[derive(Parser)]
#[command(name = "masteraudio")]
#[command(about = "Drive the MasterAudio stream manager from the command line")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Play a sine tone through a stream and report delay and stats
    Tone(ToneArgs),
    /// Show the output format and chain chosen for an input format
    Negotiate(NegotiateArgs),
    /// Show or save the persisted output policy
    Settings(SettingsArgs),
}

/// Output policy overrides
#[derive(Args, Clone, Default)]
struct PolicyArgs {
    /// Encode multichannel PCM to AC3 in IEC61937 bursts
    #[arg(long)]
    ac3: bool,

    /// Force this output sample rate
    #[arg(long, value_name = "RATE")]
    resample: Option<u32>,

    /// Fold multichannel input down to stereo
    #[arg(long)]
    downmix: bool,

    /// Spread narrow input to 5.1
    #[arg(long)]
    upmix: bool,

    /// Start from the saved settings instead of defaults
    #[arg(long)]
    saved: bool,
}

impl PolicyArgs {
    fn settings(&self) -> AudioSettings {
        let mut settings = if self.saved {
            AudioSettings::load()
        } else {
            AudioSettings::default()
        };
        settings.ac3_encode |= self.ac3;
        settings.downmix |= self.downmix;
        settings.upmix |= self.upmix;
        if self.resample.is_some() {
            settings.resample_rate = self.resample;
        }
        settings
    }

    /// Only the built-in placeholder codec ships with the CLI
    fn codecs(settings: &AudioSettings) -> Option<Arc<dyn Ac3CodecFactory>> {
        if !settings.ac3_encode {
            return None;
        }
        warn!(
            codec = PlaceholderAc3Factory.name(),
            "AC3 output uses the placeholder codec: bursts carry headers but no audio"
        );
        Some(Arc::new(PlaceholderAc3Factory))
    }
}

#[derive(Args)]
struct FormatArgs {
    #[arg(long, default_value_t = 2)]
    channels: u32,

    #[arg(long, default_value_t = 44100)]
    rate: u32,
}

impl FormatArgs {
    fn descriptor(&self) -> anyhow::Result<StreamDescriptor> {
        if self.channels == 0 || self.channels > 8 {
            bail!("channel count must be 1 to 8, got {}", self.channels);
        }
        let desc = StreamDescriptor::lpcm(self.channels, self.rate, SampleType::Int16);
        desc.validate()
            .with_context(|| format!("invalid input format {}", desc.summary()))?;
        Ok(desc)
    }
}

#[derive(Args)]
struct ToneArgs {
    #[command(flatten)]
    format: FormatArgs,

    #[arg(long, default_value_t = 2.0)]
    seconds: f32,

    /// Also write each 16-bit PCM output to a WAV file in DIR
    #[arg(long, value_name = "DIR")]
    dump: Option<PathBuf>,

    /// Use the low-latency manager preset
    #[arg(long)]
    low_latency: bool,

    #[command(flatten)]
    policy: PolicyArgs,
}

#[derive(Args)]
struct NegotiateArgs {
    #[command(flatten)]
    format: FormatArgs,

    #[command(flatten)]
    policy: PolicyArgs,
}

#[derive(Args)]
struct SettingsArgs {
    /// Persist the given policy flags
    #[arg(long)]
    save: bool,

    #[command(flatten)]
    policy: PolicyArgs,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("masteraudio=info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Tone(args) => tone(args),
        Commands::Negotiate(args) => negotiate(args),
        Commands::Settings(args) => settings(args),
    }
}

fn tone(args: ToneArgs) -> anyhow::Result<()> {
    let input = args.format.descriptor()?;
    let settings = args.policy.settings();

    let dump_dir = args
        .dump
        .clone()
        .or_else(|| settings.dump_wav.then(|| PathBuf::from(".")));
    let renderers: Arc<dyn RendererFactory> = match dump_dir {
        Some(dir) => {
            info!(dir = %dir.display(), "Dumping output to WAV");
            Arc::new(DumpingRendererFactory::new(Arc::new(NullRendererFactory), dir))
        }
        None => Arc::new(NullRendererFactory),
    };

    let config = if args.low_latency {
        ManagerConfig::low_latency()
    } else {
        ManagerConfig::default()
    };
    let codecs = PolicyArgs::codecs(&settings);
    let mut builder = AudioManager::builder()
        .config(config)
        .renderers(renderers)
        .policy(Arc::new(settings));
    if let Some(codecs) = codecs {
        builder = builder.ac3_codecs(codecs);
    }
    let manager = builder.build().context("failed to start the audio manager")?;

    let id = manager
        .open_stream(&input)
        .with_context(|| format!("no stream could be opened for {}", input.summary()))?;
    info!(%id, input = %input, "Playing tone");

    let started = Instant::now();
    let pcm = sine(&args.format, args.seconds);
    let block = args.format.rate as usize * FEED_BLOCK_MS / 1000 * args.format.channels as usize * 2;
    for chunk in pcm.chunks(block.max(2)) {
        while manager.add_data_to_stream(id, chunk) == 0 {
            thread::sleep(Duration::from_millis(FEED_BLOCK_MS as u64 / 2));
        }
    }

    let delay = manager.get_stream_delay(id);
    info!(delay_ms = delay * 1000.0, "All audio queued");

    let drained = manager.drain_stream(id, Duration::from_secs_f64(delay + 1.0));
    if !drained {
        warn!("Drain did not finish before its deadline");
    }

    if let Some(stats) = manager.stream_stats(id) {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    }
    debug!(elapsed = ?started.elapsed(), "Tone finished");

    manager.close_stream(id);
    manager.shutdown();
    Ok(())
}

fn negotiate(args: NegotiateArgs) -> anyhow::Result<()> {
    let input = args.format.descriptor()?;
    let settings = args.policy.settings();
    let options = ChainOptions {
        ac3_codecs: PolicyArgs::codecs(&settings),
        ..ChainOptions::default()
    };
    let factory = StreamFactory::new(
        HardwareMixer::new(Arc::new(NullRendererFactory), 1),
        Arc::new(settings),
        options,
    );

    let (output, kinds) = factory
        .plan(&input)
        .with_context(|| format!("no conversion exists for {}", input.summary()))?;
    println!("input:  {}", input.summary());
    println!("output: {}", output.summary());
    if kinds.is_empty() {
        println!("chain:  pass-through");
    } else {
        let stages: Vec<String> = kinds.iter().map(|k| format!("{k:?}")).collect();
        println!("chain:  {}", stages.join(" -> "));
    }
    Ok(())
}

fn settings(args: SettingsArgs) -> anyhow::Result<()> {
    let mut settings = args.policy.settings();
    if args.save {
        settings.save().context("failed to save settings")?;
    }
    if let Some(path) = AudioSettings::config_path() {
        println!("# {}", path.display());
    }
    println!("{}", serde_json::to_string_pretty(&settings)?);
    Ok(())
}

/// Interleaved 16-bit sine, the same tone on every channel
fn sine(format: &FormatArgs, seconds: f32) -> Vec<u8> {
    let frames = (format.rate as f32 * seconds.max(0.0)) as usize;
    let channels = format.channels as usize;
    let mut bytes = Vec::with_capacity(frames * channels * 2);
    for n in 0..frames {
        let phase = 2.0 * PI * TONE_HZ * n as f32 / format.rate as f32;
        let sample = (phase.sin() * TONE_AMPLITUDE * i16::MAX as f32) as i16;
        for _ in 0..channels {
            bytes.extend_from_slice(&sample.to_le_bytes());
        }
    }
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codecs_follow_policy() {
        let mut settings = AudioSettings::default();
        assert!(PolicyArgs::codecs(&settings).is_none());
        settings.ac3_encode = true;
        assert!(PolicyArgs::codecs(&settings).is_some());
    }

    #[test]
    fn test_policy_flags_override_defaults() {
        let cli = Cli::parse_from([
            "masteraudio",
            "negotiate",
            "--channels",
            "6",
            "--ac3",
            "--resample",
            "44100",
        ]);
        let Commands::Negotiate(args) = cli.command else {
            panic!("expected negotiate");
        };
        let settings = args.policy.settings();
        assert!(settings.ac3_encode);
        assert_eq!(settings.resample_rate, Some(44100));
        assert_eq!(args.format.descriptor().unwrap().channel_count().unwrap(), 6);
    }
}
