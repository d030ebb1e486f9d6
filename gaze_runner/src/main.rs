// THEORY:
// `gaze_runner` is the command-line front end of the gaze engine. It reads the
// configuration, calibrates from five still images, then runs every frame of a
// video file or live stream through a `GazePipeline` and publishes the results
// as OSC telemetry.
//
// Frame capture and processing stay on the main thread and block; the only
// asynchronous part is the telemetry sink, which runs on a tokio runtime owned
// by `main` so UDP sends never hold up the next frame.

mod config;
mod osc;
mod sink;
mod source;

use anyhow::Context;
use clap::Parser;
use config::{LoggingConfig, RunnerConfig};
use gaze_vision::{calibrate, CalibrationFrames, CalibrationTarget, GazePipeline, Telemetry};
use sink::TelemetrySink;
use source::{FrameRead, FrameSource, VideoSource};
use std::fs::File;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing_subscriber::EnvFilter;

/// Consecutive failed reads tolerated before the source is considered dead.
const MAX_CONSECUTIVE_READ_ERRORS: u32 = 30;

#[derive(Parser)]
#[command(name = "gaze_runner")]
#[command(about = "Track pupil gaze and blinks in an eye camera feed and send them over OSC")]
#[command(version)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "gaze.toml")]
    config: PathBuf,

    /// Read frames from this video file instead of the configured source.
    #[arg(long, conflicts_with = "stream")]
    video: Option<PathBuf>,

    /// Read frames from this stream URL instead of the configured source.
    #[arg(long)]
    stream: Option<String>,

    /// Log filter directive, overriding the configured level.
    #[arg(long)]
    log_level: Option<String>,

    /// Stop after this many frames.
    #[arg(long)]
    max_frames: Option<u64>,
}

fn main() -> anyhow::Result<()> {
    // --- 1. Argument Parsing & Setup ---
    let cli = Cli::parse();
    let config_found = cli.config.exists();
    let mut config = if config_found {
        RunnerConfig::load(&cli.config)?
    } else {
        RunnerConfig::default()
    };
    if let Some(path) = cli.video {
        config.source.video_file = Some(path);
        config.source.stream_url = None;
    }
    if let Some(url) = cli.stream {
        config.source.stream_url = Some(url);
        config.source.video_file = None;
    }
    init_logging(&config.logging, cli.log_level.as_deref())?;
    if !config_found {
        tracing::info!(path = %cli.config.display(), "no config file, using defaults");
    }

    // --- 2. Calibration ---
    let frames = load_calibration_frames(&config)?;
    let calibration = calibrate(&config.pipeline, &frames).context("calibration failed")?;
    let mut pipeline = GazePipeline::new(config.pipeline.clone(), calibration)?;

    // --- 3. Frame Source & Telemetry Initialization ---
    let location = config.source.location()?;
    let mut source = VideoSource::open(&location)?;

    let runtime = tokio::runtime::Runtime::new().context("failed to start the async runtime")?;
    let sink = runtime.block_on(TelemetrySink::connect(config.telemetry.clone()))?;
    sink.publish(&startup_telemetry());

    // --- 4. Main Processing Loop ---
    let result = run(&mut pipeline, &mut source, &sink, cli.max_frames);

    runtime.block_on(sink.shutdown());
    let processed = result?;
    tracing::info!(frames = processed, "processing complete");
    Ok(())
}

/// Receivers start from a centered gaze and an open eye.
fn startup_telemetry() -> [Telemetry; 3] {
    [Telemetry::GazeX(0.0), Telemetry::GazeY(0.0), Telemetry::Blink(false)]
}

/// Time step handed to the pipeline for each frame: the source's nominal
/// interval when it has one, otherwise wall-clock time since the previous frame.
struct FrameClock {
    nominal: Option<Duration>,
    last: Option<Instant>,
}

impl FrameClock {
    fn new(nominal: Option<Duration>) -> Self {
        Self { nominal, last: None }
    }

    fn tick(&mut self, now: Instant) -> Duration {
        let dt = match (self.nominal, self.last) {
            (Some(interval), _) => interval,
            (None, Some(previous)) => now.saturating_duration_since(previous),
            (None, None) => Duration::ZERO,
        };
        self.last = Some(now);
        dt
    }
}

fn run(
    pipeline: &mut GazePipeline,
    source: &mut impl FrameSource,
    sink: &TelemetrySink,
    max_frames: Option<u64>,
) -> anyhow::Result<u64> {
    let mut clock = FrameClock::new(source.nominal_interval());
    let mut read_errors = 0;

    while max_frames.is_none_or(|max| pipeline.frames_processed() < max) {
        let frame = match source.next_frame() {
            Ok(FrameRead::Frame(frame)) => {
                read_errors = 0;
                frame
            }
            Ok(FrameRead::EndOfStream) => {
                tracing::info!("Cannot receive frame (stream end?). Exiting ...");
                break;
            }
            Err(err) => {
                read_errors += 1;
                tracing::warn!(error = %err, attempt = read_errors, "failed to read frame");
                if read_errors >= MAX_CONSECUTIVE_READ_ERRORS {
                    return Err(err.context("frame source kept failing"));
                }
                continue;
            }
        };

        // --- 5. Frame Timing ---
        let now = Instant::now();
        let dt = clock.tick(now);

        // --- 6. Pipeline Processing & Telemetry ---
        let report = pipeline
            .process_frame(&frame, dt)
            .with_context(|| format!("frame {} could not be processed", pipeline.frames_processed()))?;
        sink.publish(&report.telemetry());

        tracing::debug!(
            frame = report.frame_index,
            candidates = report.candidate_count,
            elapsed_us = now.elapsed().as_micros() as u64,
            "processed frame"
        );
    }

    Ok(pipeline.frames_processed())
}

fn load_calibration_frames(config: &RunnerConfig) -> anyhow::Result<CalibrationFrames> {
    CalibrationTarget::ALL
        .iter()
        .map(|&target| {
            let path = config.calibration.image_path(target);
            let image = image::open(&path)
                .with_context(|| format!("failed to load {target} calibration image {}", path.display()))?;
            tracing::debug!(%target, path = %path.display(), "loaded calibration image");
            Ok::<_, anyhow::Error>((target, image))
        })
        .collect()
}

/// Filter precedence: `--log-level`, then `RUST_LOG`, then the config file.
fn init_logging(config: &LoggingConfig, cli_level: Option<&str>) -> anyhow::Result<()> {
    let filter = match cli_level {
        Some(level) => EnvFilter::try_new(level),
        None => EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&config.level)),
    }
    .with_context(|| format!("invalid log level {:?}", cli_level.unwrap_or(&config.level)))?;

    match &config.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create log directory {}", dir.display()))?;
            let stamp = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs();
            let path = dir.join(format!("gaze-{stamp}.log"));
            let file = File::create(&path)
                .with_context(|| format!("failed to create log file {}", path.display()))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TelemetryConfig;
    use crate::osc::{encode_message, OscArg};
    use gaze_vision::{Calibration, CalibrationSet, PipelineConfig, RegionOfInterest};
    use image::{DynamicImage, GrayImage, Luma};
    use std::collections::VecDeque;
    use std::net::UdpSocket;

    enum Step {
        Frame,
        Fail,
        End,
    }

    struct ScriptedSource {
        steps: VecDeque<Step>,
        interval: Option<Duration>,
    }

    impl ScriptedSource {
        fn new(steps: impl IntoIterator<Item = Step>) -> Self {
            Self { steps: steps.into_iter().collect(), interval: Some(Duration::from_millis(20)) }
        }
    }

    impl FrameSource for ScriptedSource {
        fn next_frame(&mut self) -> anyhow::Result<FrameRead> {
            match self.steps.pop_front() {
                Some(Step::Frame) => Ok(FrameRead::Frame(DynamicImage::ImageLuma8(GrayImage::from_pixel(
                    40,
                    30,
                    Luma([230]),
                )))),
                Some(Step::Fail) => Err(anyhow::anyhow!("device busy")),
                Some(Step::End) | None => Ok(FrameRead::EndOfStream),
            }
        }

        fn nominal_interval(&self) -> Option<Duration> {
            self.interval
        }
    }

    fn pipeline() -> GazePipeline {
        let roi = RegionOfInterest::full(40, 30);
        let set = CalibrationSet::from_observations([
            (CalibrationTarget::Center, [20.0, 15.0]),
            (CalibrationTarget::Up, [20.0, 5.0]),
            (CalibrationTarget::Down, [20.0, 25.0]),
            (CalibrationTarget::Left, [10.0, 15.0]),
            (CalibrationTarget::Right, [30.0, 15.0]),
        ])
        .unwrap();
        let calibration = Calibration::from_set(set, &roi).unwrap();
        GazePipeline::new(PipelineConfig { roi, ..PipelineConfig::default() }, calibration).unwrap()
    }

    /// Runs `source` through a fresh pipeline with gaze-only telemetry aimed at a
    /// local socket, and returns the run result with every packet received.
    fn drive(source: &mut ScriptedSource, max_frames: Option<u64>) -> (anyhow::Result<u64>, Vec<Vec<u8>>) {
        let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
        receiver.set_read_timeout(Some(Duration::from_millis(200))).unwrap();
        let config = TelemetryConfig {
            port: receiver.local_addr().unwrap().port(),
            blink_output: false,
            ..TelemetryConfig::default()
        };

        let runtime = tokio::runtime::Runtime::new().unwrap();
        let sink = runtime.block_on(TelemetrySink::connect(config)).unwrap();
        let result = run(&mut pipeline(), source, &sink, max_frames);
        runtime.block_on(sink.shutdown());

        let mut packets = Vec::new();
        let mut buf = [0u8; 64];
        while let Ok(len) = receiver.recv(&mut buf) {
            packets.push(buf[..len].to_vec());
        }
        (result, packets)
    }

    #[test]
    fn end_of_stream_ends_the_run_cleanly() {
        let mut source = ScriptedSource::new([Step::Frame, Step::Frame, Step::End, Step::Frame]);
        let (result, packets) = drive(&mut source, None);

        assert_eq!(result.unwrap(), 2);
        assert_eq!(source.steps.len(), 1);
        // Gaze x and y for each frame; no pupil, so both hold at zero.
        assert_eq!(packets.len(), 4);
        let gaze_x = encode_message("/avatar/parameters/EyeX", &[OscArg::Float(0.0)]);
        assert_eq!(packets[0], gaze_x.to_vec());
    }

    #[test]
    fn repeated_read_failures_abort_the_run() {
        let steps = (0..MAX_CONSECUTIVE_READ_ERRORS).map(|_| Step::Fail).chain([Step::Frame]);
        let mut source = ScriptedSource::new(steps);
        let (result, packets) = drive(&mut source, None);

        let err = result.unwrap_err();
        assert!(err.to_string().contains("kept failing"), "{err:#}");
        assert_eq!(source.steps.len(), 1);
        assert!(packets.is_empty());
    }

    #[test]
    fn a_good_read_resets_the_failure_count() {
        let almost = || (1..MAX_CONSECUTIVE_READ_ERRORS).map(|_| Step::Fail);
        let steps = almost().chain([Step::Frame]).chain(almost()).chain([Step::Frame, Step::End]);
        let mut source = ScriptedSource::new(steps);
        let (result, packets) = drive(&mut source, None);

        assert_eq!(result.unwrap(), 2);
        assert_eq!(packets.len(), 4);
    }

    #[test]
    fn max_frames_stops_early() {
        let mut source = ScriptedSource::new((0..10).map(|_| Step::Frame));
        let (result, _) = drive(&mut source, Some(3));

        assert_eq!(result.unwrap(), 3);
        assert_eq!(source.steps.len(), 7);
    }

    #[test]
    fn nominal_interval_wins_over_the_wall_clock() {
        let interval = Duration::from_millis(40);
        let mut clock = FrameClock::new(Some(interval));
        let start = Instant::now();
        assert_eq!(clock.tick(start), interval);
        assert_eq!(clock.tick(start + Duration::from_millis(5)), interval);
    }

    #[test]
    fn live_sources_are_timed_by_the_wall_clock() {
        let mut clock = FrameClock::new(None);
        let start = Instant::now();
        assert_eq!(clock.tick(start), Duration::ZERO);
        assert_eq!(clock.tick(start + Duration::from_millis(33)), Duration::from_millis(33));
        assert_eq!(clock.tick(start + Duration::from_millis(50)), Duration::from_millis(17));
    }

    #[test]
    fn startup_sends_centered_gaze_and_open_eye() {
        let packets = sink::encode_telemetry(&TelemetryConfig::default(), &startup_telemetry());
        assert_eq!(
            packets,
            vec![
                encode_message("/avatar/parameters/EyeX", &[OscArg::Float(0.0)]),
                encode_message("/avatar/parameters/EyeY", &[OscArg::Float(0.0)]),
                encode_message("/avatar/parameters/EyesClosed", &[OscArg::Bool(false)]),
            ]
        );

        let no_gaze = TelemetryConfig { gaze_output: false, ..TelemetryConfig::default() };
        assert_eq!(sink::encode_telemetry(&no_gaze, &startup_telemetry()).len(), 1);
    }
}
