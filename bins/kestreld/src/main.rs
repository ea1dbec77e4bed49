//! kestreld: obstacle-avoidance companion daemon.
//!
//! Reads `config.yaml`, builds the selected pipeline topology (simple
//! proximity or VFH), and runs until SIGINT. Exit code 0 on clean
//! shutdown, -1 on a configuration error.

use anyhow::{bail, Context, Result};
use clap::Parser;
use decision::DecisionConfig;
use flight::ModeProjection;
use pipeline::{Queue, WorkerController};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use types::{
    AvoidanceCommand, DetectionsAndOdometry, LidarDetection, LidarOscillation,
    OdometryAndWaypoint, PolarObstacleDensity,
};
use vfh::{HistogramConfig, SteeringConfig};

#[derive(Parser)]
#[command(name = "kestreld", about = "Obstacle-avoidance companion daemon")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,
}

/// Selected decision topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum AvoidanceMode {
    /// Latched STOP/RESUME proximity engine.
    Simple,
    /// VFH valley steering.
    Normal,
}

/// Configuration file structure (config.yaml).
#[derive(Debug, Deserialize)]
struct FileConfig {
    queue_max_size: usize,
    obstacle_avoidance_mode: AvoidanceMode,
    flight_interface: FlightInterfaceSection,
    detection: DetectionSection,
    #[serde(default)]
    data_merge: Option<MergeSection>,
    #[serde(default)]
    decision: Option<DecisionSection>,
    #[serde(flatten)]
    vfh: VfhSection,
}

#[derive(Debug, Deserialize)]
struct FlightInterfaceSection {
    address: String,
    timeout: f64,
    worker_period: f64,
    first_waypoint_distance_tolerance: f64,
}

#[derive(Debug, Deserialize)]
struct DetectionSection {
    serial_port_name: String,
    serial_port_baudrate: u32,
    port_timeout: f64,
    update_rate: u8,
    low_angle: f32,
    high_angle: f32,
    rotate_speed: u16,
    #[serde(default)]
    use_last_return: bool,
}

#[derive(Debug, Deserialize)]
struct MergeSection {
    delay: f64,
}

#[derive(Debug, Deserialize)]
struct DecisionSection {
    object_proximity_limit: f64,
    max_history: usize,
    command_timeout: f64,
}

/// VFH keys live at the top level of the file. The histogram parameters
/// have documented defaults; the decision parameters are required when the
/// VFH topology is selected.
#[derive(Debug, Deserialize)]
struct VfhSection {
    #[serde(default = "defaults::sector_width")]
    sector_width: f64,
    #[serde(default = "defaults::start_angle")]
    start_angle: f64,
    #[serde(default = "defaults::end_angle")]
    end_angle: f64,
    #[serde(default = "defaults::max_vector_magnitude")]
    max_vector_magnitude: f64,
    #[serde(default = "defaults::linear_decay_rate")]
    linear_decay_rate: f64,
    #[serde(default = "defaults::confidence_value")]
    confidence_value: f64,
    #[serde(default)]
    density_threshold: Option<f64>,
    #[serde(default)]
    min_consec_sectors: Option<usize>,
    #[serde(default)]
    wide_valley_threshold: Option<f64>,
}

mod defaults {
    pub fn sector_width() -> f64 {
        2.0
    }
    pub fn start_angle() -> f64 {
        -90.0
    }
    pub fn end_angle() -> f64 {
        90.0
    }
    pub fn max_vector_magnitude() -> f64 {
        1.0
    }
    pub fn linear_decay_rate() -> f64 {
        0.1
    }
    pub fn confidence_value() -> f64 {
        0.9
    }
}

impl FileConfig {
    fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read config file {}", path.display()))?;
        let config: FileConfig =
            serde_yaml::from_str(&content).context("cannot parse config file")?;
        Ok(config)
    }
}

/// Running pipeline: stage threads plus the teardown actions that unblock
/// them.
struct Pipeline {
    threads: Vec<std::thread::JoinHandle<()>>,
    drains: Vec<Box<dyn Fn() + Send>>,
}

impl Pipeline {
    fn shutdown(self, controller: &WorkerController) {
        controller.request_exit();
        for drain in &self.drains {
            drain();
        }
        for handle in self.threads {
            if let Err(e) = handle.join() {
                warn!(?e, "stage thread panicked");
            }
        }
    }
}

fn spawn_stage<F>(name: &str, f: F) -> Result<std::thread::JoinHandle<()>>
where
    F: FnOnce() + Send + 'static,
{
    std::thread::Builder::new()
        .name(name.to_string())
        .spawn(f)
        .with_context(|| format!("failed to spawn {name} stage"))
}

fn drain_of<T: Send + 'static>(queue: &Queue<T>) -> Box<dyn Fn() + Send> {
    let queue = queue.clone();
    Box::new(move || queue.fill_and_drain())
}

fn lidar_config(section: &DetectionSection) -> lidar::Config {
    lidar::Config {
        port_name: section.serial_port_name.clone(),
        baudrate: section.serial_port_baudrate,
        port_timeout: Duration::from_secs_f64(section.port_timeout),
        update_rate: section.update_rate,
        low_angle: section.low_angle,
        high_angle: section.high_angle,
        rotate_speed: section.rotate_speed,
        use_last_return: section.use_last_return,
    }
}

fn flight_config(section: &FlightInterfaceSection) -> flight::Config {
    flight::Config {
        address: section.address.clone(),
        timeout: Duration::from_secs_f64(section.timeout),
        worker_period: Duration::from_secs_f64(section.worker_period),
        first_waypoint_distance_tolerance: section.first_waypoint_distance_tolerance,
    }
}

fn spawn_flight_stage(
    config: flight::Config,
    projection: ModeProjection,
    commands: &Queue<AvoidanceCommand>,
    odometry: &Queue<OdometryAndWaypoint>,
    controller: &WorkerController,
) -> Result<std::thread::JoinHandle<()>> {
    let commands = commands.clone();
    let odometry = odometry.clone();
    let controller = controller.clone();
    spawn_stage("flight-interface", move || {
        // The link is brought up inside the stage so that a dead autopilot
        // leaves the rest of the pipeline running command-less rather than
        // failing startup.
        let link = match autopilot::MavlinkLink::connect(&config.address) {
            Ok(link) => Box::new(link),
            Err(e) => {
                error!(error = %e, "autopilot connection failed");
                return;
            }
        };
        flight::worker::run(link, &config, &commands, &odometry, &controller, projection);
    })
}

/// Build and start the simple proximity topology.
fn build_simple(config: &FileConfig, controller: &WorkerController) -> Result<Pipeline> {
    let Some(merge_section) = &config.data_merge else {
        bail!("config key data_merge missing (required for simple mode)");
    };
    let Some(decision_section) = &config.decision else {
        bail!("config key decision missing (required for simple mode)");
    };

    let detections: Queue<LidarDetection> = Queue::bounded(config.queue_max_size);
    let odometry: Queue<OdometryAndWaypoint> = Queue::bounded(config.queue_max_size);
    let merged: Queue<DetectionsAndOdometry> = Queue::bounded(config.queue_max_size);
    let commands: Queue<AvoidanceCommand> = Queue::bounded(config.queue_max_size);

    let mut threads = Vec::new();

    let lidar_cfg = lidar_config(&config.detection);
    let stage_detections = detections.clone();
    let stage_controller = controller.clone();
    threads.push(spawn_stage("detection", move || {
        if let Err(e) = lidar::worker::run(&lidar_cfg, &stage_detections, &stage_controller) {
            error!(error = %e, "detection stage failed");
        }
    })?);

    let delay = Duration::from_secs_f64(merge_section.delay);
    let stage_detections = detections.clone();
    let stage_odometry = odometry.clone();
    let stage_merged = merged.clone();
    let stage_controller = controller.clone();
    threads.push(spawn_stage("data-merge", move || {
        merge::run(
            delay,
            &stage_detections,
            &stage_odometry,
            &stage_merged,
            &stage_controller,
        );
    })?);

    let decision_cfg = DecisionConfig {
        proximity_limit: decision_section.object_proximity_limit,
        max_history: decision_section.max_history,
        command_timeout: Duration::from_secs_f64(decision_section.command_timeout),
    };
    let stage_merged = merged.clone();
    let stage_commands = commands.clone();
    let stage_controller = controller.clone();
    threads.push(spawn_stage("decision", move || {
        decision::run(decision_cfg, &stage_merged, &stage_commands, &stage_controller);
    })?);

    threads.push(spawn_flight_stage(
        flight_config(&config.flight_interface),
        ModeProjection::Simple,
        &commands,
        &odometry,
        controller,
    )?);

    Ok(Pipeline {
        threads,
        drains: vec![
            drain_of(&detections),
            drain_of(&odometry),
            drain_of(&merged),
            drain_of(&commands),
        ],
    })
}

/// Build and start the VFH topology.
fn build_vfh(config: &FileConfig, controller: &WorkerController) -> Result<Pipeline> {
    let (Some(density_threshold), Some(min_consec_sectors), Some(wide_valley_threshold)) = (
        config.vfh.density_threshold,
        config.vfh.min_consec_sectors,
        config.vfh.wide_valley_threshold,
    ) else {
        bail!(
            "config keys density_threshold, min_consec_sectors, wide_valley_threshold \
             missing (required for normal mode)"
        );
    };

    let detections: Queue<LidarDetection> = Queue::bounded(config.queue_max_size);
    let oscillations: Queue<LidarOscillation> = Queue::bounded(config.queue_max_size);
    let densities: Queue<PolarObstacleDensity> = Queue::bounded(config.queue_max_size);
    let odometry: Queue<OdometryAndWaypoint> = Queue::bounded(config.queue_max_size);
    let commands: Queue<AvoidanceCommand> = Queue::bounded(config.queue_max_size);

    let mut threads = Vec::new();

    let lidar_cfg = lidar_config(&config.detection);
    let stage_detections = detections.clone();
    let stage_controller = controller.clone();
    threads.push(spawn_stage("detection", move || {
        if let Err(e) = lidar::worker::run(&lidar_cfg, &stage_detections, &stage_controller) {
            error!(error = %e, "detection stage failed");
        }
    })?);

    let stage_detections = detections.clone();
    let stage_oscillations = oscillations.clone();
    let stage_controller = controller.clone();
    threads.push(spawn_stage("segmenter", move || {
        scan::run(&stage_detections, &stage_oscillations, &stage_controller);
    })?);

    let histogram_cfg = HistogramConfig {
        sector_width: config.vfh.sector_width,
        start_angle: config.vfh.start_angle,
        end_angle: config.vfh.end_angle,
        max_vector_magnitude: config.vfh.max_vector_magnitude,
        linear_decay_rate: config.vfh.linear_decay_rate,
        confidence_value: config.vfh.confidence_value,
    };
    let stage_oscillations = oscillations.clone();
    let stage_densities = densities.clone();
    let stage_controller = controller.clone();
    threads.push(spawn_stage("histogram", move || {
        vfh::worker::run_histogram(
            histogram_cfg,
            &stage_oscillations,
            &stage_densities,
            &stage_controller,
        );
    })?);

    let steering_cfg = SteeringConfig {
        density_threshold,
        min_consec_sectors,
        wide_valley_threshold,
    };
    let stage_densities = densities.clone();
    let stage_odometry = odometry.clone();
    let stage_commands = commands.clone();
    let stage_controller = controller.clone();
    threads.push(spawn_stage("steering", move || {
        vfh::worker::run_steering(
            steering_cfg,
            &stage_densities,
            &stage_odometry,
            &stage_commands,
            &stage_controller,
        );
    })?);

    threads.push(spawn_flight_stage(
        flight_config(&config.flight_interface),
        ModeProjection::Vfh,
        &commands,
        &odometry,
        controller,
    )?);

    Ok(Pipeline {
        threads,
        drains: vec![
            drain_of(&detections),
            drain_of(&oscillations),
            drain_of(&densities),
            drain_of(&odometry),
            drain_of(&commands),
        ],
    })
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    let _log_guard = init_logging();

    match run(&args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "startup failed");
            eprintln!("Error: {e:#}");
            // -1 wraps to 255 on Unix.
            ExitCode::from(255)
        }
    }
}

async fn run(args: &Args) -> Result<()> {
    let config = FileConfig::load(&args.config)?;
    info!(path = %args.config.display(), mode = ?config.obstacle_avoidance_mode, "loaded config");

    if config.queue_max_size == 0 {
        bail!("queue_max_size must be at least 1");
    }

    let controller = WorkerController::new();
    let pipeline = match config.obstacle_avoidance_mode {
        AvoidanceMode::Simple => build_simple(&config, &controller)?,
        AvoidanceMode::Normal => build_vfh(&config, &controller)?,
    };

    info!("pipeline running, press Ctrl-C to stop");
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;

    info!("shutdown requested");
    tokio::task::block_in_place(|| pipeline.shutdown(&controller));
    info!("all stages stopped");
    Ok(())
}

/// Stdout plus rolling daily file logging. Returns the appender guard that
/// must live for the lifetime of the process; logging degrades to stdout
/// only if the log directory cannot be created.
fn init_logging() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let stdout_layer = tracing_subscriber::fmt::layer().with_target(true);

    let log_dir = Path::new("logs");
    match std::fs::create_dir_all(log_dir) {
        Ok(()) => {
            let file_appender = RollingFileAppender::new(Rotation::DAILY, log_dir, "kestreld.log");
            let (non_blocking_file, guard) = tracing_appender::non_blocking(file_appender);
            let file_layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking_file)
                .with_ansi(false)
                .with_target(true);

            tracing_subscriber::registry()
                .with(filter)
                .with(stdout_layer)
                .with(file_layer)
                .init();
            Some(guard)
        }
        Err(e) => {
            eprintln!("warning: cannot create log directory: {e}; logging to stdout only");
            tracing_subscriber::registry()
                .with(filter)
                .with(stdout_layer)
                .init();
            None
        }
    }
}
