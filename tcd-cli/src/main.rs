mod config_loader;
mod logging;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use color_eyre::eyre::{Result, WrapErr};

use tcd_core::ambe::{AmbeDevice, LoopbackTransport, SoftwareAmbeCodec, SoftwareAmbeWorker};
use tcd_core::codec2::Codec2Vocoder;
use tcd_core::config::{DeviceClass, TcdConfig};
use tcd_core::frame::{CodecKind, DStarPayload, DmrPayload};
use tcd_core::imbe::ImbeVocoder;
use tcd_core::router::Router;
use tcd_core::socket::ReflectorSocket;

use logging::{DeviceInitEvent, LogBridge, LogEvent, LogFormat, LogTarget, StructuredLogger};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Real-time multi-codec voice transcoder for digital-voice reflector networks",
    long_about = None
)]
struct Cli {
    /// Path to the transcoder's INI configuration file.
    config: String,

    /// Structured log output format.
    #[arg(long, value_enum, default_value = "pretty")]
    log_format: CliLogFormat,

    /// Where structured logs are written: "stdout", "stderr", or a file path.
    #[arg(long, default_value = "stderr")]
    log_target: String,
}

#[derive(clap::ValueEnum, Clone, Debug)]
enum CliLogFormat {
    Json,
    Logfmt,
    Pretty,
}

impl From<CliLogFormat> for LogFormat {
    fn from(f: CliLogFormat) -> Self {
        match f {
            CliLogFormat::Json => LogFormat::Json,
            CliLogFormat::Logfmt => LogFormat::Logfmt,
            CliLogFormat::Pretty => LogFormat::Pretty,
        }
    }
}

fn parse_log_target(raw: &str) -> LogTarget {
    match raw {
        "stdout" => LogTarget::Stdout,
        "stderr" => LogTarget::Stderr,
        path => LogTarget::File(path.to_string()),
    }
}

/// Stand-in for the real third-party Codec2/M17 vocoder: produces silence
/// rather than linking a concrete codec library, so the workspace builds and
/// runs end-to-end without vendoring one.
struct PassthroughCodec2;

impl Codec2Vocoder for PassthroughCodec2 {
    fn decode_3200(&self, _half: &[u8; 8]) -> [i16; 160] {
        [0; 160]
    }
    fn encode_3200(&self, _pcm: &[i16; 160]) -> [u8; 8] {
        [0; 8]
    }
    fn decode_1600(&self, _bytes: &[u8; 8]) -> [i16; 320] {
        [0; 320]
    }
}

/// Stand-in for the real third-party IMBE/P25 vocoder.
struct PassthroughImbe;

impl ImbeVocoder for PassthroughImbe {
    fn decode(&self, _data: &[u8; 11]) -> [i16; 160] {
        [0; 160]
    }
    fn encode(&self, _pcm: &[i16; 160]) -> [u8; 11] {
        [0; 11]
    }
}

/// Stand-in for the software AMBE fallback vocoder, used when fewer than two
/// DVSI devices are attached (or the `hardware` feature isn't compiled in at
/// all).
struct PassthroughAmbe;

impl SoftwareAmbeCodec for PassthroughAmbe {
    fn encode_dstar(&self, _pcm: &[i16; 160]) -> DStarPayload {
        [0; 9]
    }
    fn decode_dstar(&self, _data: &DStarPayload) -> [i16; 160] {
        [0; 160]
    }
    fn encode_dmr(&self, _pcm: &[i16; 160]) -> DmrPayload {
        [0; 9]
    }
    fn decode_dmr(&self, _data: &DmrPayload) -> [i16; 160] {
        [0; 160]
    }
}

fn log_device_init(logger: &StructuredLogger, description: &str, codec: &str, channels: usize) {
    log::info!("{description}: {codec} engine ready ({channels} channel(s))");
    let _ = logger.log(LogEvent::DeviceInit(DeviceInitEvent {
        timestamp: chrono::Utc::now(),
        description: description.to_string(),
        codec: codec.to_string(),
        channels,
    }));
}

fn log_clamp_notices(logger: &StructuredLogger, notices: &[config_loader::ClampNotice]) {
    for notice in notices {
        let _ = logger.log(LogEvent::GainClamped(logging::GainClampedEvent {
            timestamp: chrono::Utc::now(),
            parameter: notice.parameter.to_string(),
            requested_db: notice.requested_db,
            clamped_db: notice.clamped_db,
        }));
    }
}

/// Blocks until Ctrl-C, then tears down the router and the ingress socket.
/// AMBE devices are stopped by their own owner beforehand.
fn run_until_interrupted(mut router: Router, ingress: Arc<ReflectorSocket>, stop_devices: impl FnOnce()) -> Result<()> {
    log::info!("tcd running, press Ctrl-C to stop");
    let running = Arc::new(AtomicBool::new(true));
    {
        let running = Arc::clone(&running);
        ctrlc::set_handler(move || running.store(false, Ordering::Release)).wrap_err("failed to install Ctrl-C handler")?;
    }
    while running.load(Ordering::Acquire) {
        std::thread::sleep(Duration::from_millis(200));
    }

    log::info!("shutting down");
    stop_devices();
    router.stop();
    ingress.close();
    Ok(())
}

#[cfg(not(feature = "hardware"))]
fn run(config: Arc<TcdConfig>, ingress: Arc<ReflectorSocket>, logger: &StructuredLogger) -> Result<()> {
    log::warn!("built without the 'hardware' feature; running both AMBE engines against the in-process loopback device");
    config
        .check_module_capacity(DeviceClass::Dv3003)
        .wrap_err("configured module set exceeds the loopback device's channel capacity")?;

    let dstar_device = AmbeDevice::new(
        LoopbackTransport::new(),
        CodecKind::DStar,
        DeviceClass::Dv3003,
        "loopback D-Star".to_string(),
        config.modules.clone(),
        config.gains.dstar_in as i8,
        config.gains.dstar_out as i8,
    );
    let dmr_device = AmbeDevice::new(
        LoopbackTransport::new(),
        CodecKind::Dmr,
        DeviceClass::Dv3003,
        "loopback DMR/YSF".to_string(),
        config.modules.clone(),
        config.gains.dmr_in as i8,
        config.gains.dmr_out as i8,
    );

    dstar_device.init().wrap_err("loopback D-Star device init failed")?;
    dmr_device.init().wrap_err("loopback DMR/YSF device init failed")?;

    let mut router = Router::new(Arc::clone(&ingress), dstar_device.clone(), dmr_device.clone());
    let dispatcher = router.dispatcher();
    dstar_device.bind_dispatcher(Arc::clone(&dispatcher));
    dmr_device.bind_dispatcher(Arc::clone(&dispatcher));

    log_device_init(logger, dstar_device.description(), "D-Star", config.modules.len());
    log_device_init(logger, dmr_device.description(), "DMR/YSF", config.modules.len());
    dstar_device.start();
    dmr_device.start();

    router.start(Arc::clone(&config), Arc::new(PassthroughCodec2), Arc::new(PassthroughImbe));

    run_until_interrupted(router, ingress, move || {
        dstar_device.stop();
        dmr_device.stop();
    })
}

#[cfg(feature = "hardware")]
fn run(config: Arc<TcdConfig>, ingress: Arc<ReflectorSocket>, logger: &StructuredLogger) -> Result<()> {
    use tcd_core::ambe::{ftdi, Ft2xxTransport};

    let devices = ftdi::discover().wrap_err("FTDI device discovery failed")?;
    for d in &devices {
        log::info!("found FTDI device: {} (serial {})", d.description, d.serial_number);
    }
    if devices.is_empty() {
        return Err(tcd_core::DeviceError::NoDevicesFound.into());
    }
    if devices.len() > 2 {
        return Err(tcd_core::DeviceError::WrongDeviceCount { found: devices.len() }.into());
    }

    let dstar_info = &devices[0];
    let dstar_class = DeviceClass::from_description(&dstar_info.description);
    config
        .check_module_capacity(dstar_class)
        .wrap_err("configured module set exceeds the attached device's channel capacity")?;
    let dstar_transport = Ft2xxTransport::open(&dstar_info.serial_number, &dstar_info.description, dstar_class.baud_rate())
        .wrap_err("failed to open the D-Star DVSI device")?;
    let dstar_device = AmbeDevice::new(
        dstar_transport,
        CodecKind::DStar,
        dstar_class,
        dstar_info.description.clone(),
        config.modules.clone(),
        config.gains.dstar_in as i8,
        config.gains.dstar_out as i8,
    );
    dstar_device.init().wrap_err("D-Star DVSI device init failed")?;

    if devices.len() < 2 {
        log::warn!("only one DVSI device attached; using the software AMBE codec for the DMR/YSF engine");
        let dmr_worker = SoftwareAmbeWorker::new(CodecKind::Dmr, Arc::new(PassthroughAmbe));

        let mut router = Router::new(Arc::clone(&ingress), dstar_device.clone(), dmr_worker.clone());
        let dispatcher = router.dispatcher();
        dstar_device.bind_dispatcher(Arc::clone(&dispatcher));
        dmr_worker.bind_dispatcher(Arc::clone(&dispatcher));

        log_device_init(logger, dstar_device.description(), "D-Star", config.modules.len());
        log::info!("software AMBE: DMR/YSF engine ready ({} channel(s))", config.modules.len());
        dstar_device.start();
        dmr_worker.start();

        router.start(Arc::clone(&config), Arc::new(PassthroughCodec2), Arc::new(PassthroughImbe));

        run_until_interrupted(router, ingress, move || {
            dstar_device.stop();
            dmr_worker.stop();
        })
    } else {
        let dmr_info = &devices[1];
        let dmr_class = DeviceClass::from_description(&dmr_info.description);
        let dmr_transport = Ft2xxTransport::open(&dmr_info.serial_number, &dmr_info.description, dmr_class.baud_rate())
            .wrap_err("failed to open the DMR/YSF DVSI device")?;
        let dmr_device = AmbeDevice::new(
            dmr_transport,
            CodecKind::Dmr,
            dmr_class,
            dmr_info.description.clone(),
            config.modules.clone(),
            config.gains.dmr_in as i8,
            config.gains.dmr_out as i8,
        );
        dmr_device.init().wrap_err("DMR/YSF DVSI device init failed")?;

        let mut router = Router::new(Arc::clone(&ingress), dstar_device.clone(), dmr_device.clone());
        let dispatcher = router.dispatcher();
        dstar_device.bind_dispatcher(Arc::clone(&dispatcher));
        dmr_device.bind_dispatcher(Arc::clone(&dispatcher));

        log_device_init(logger, dstar_device.description(), "D-Star", config.modules.len());
        log_device_init(logger, dmr_device.description(), "DMR/YSF", config.modules.len());
        dstar_device.start();
        dmr_device.start();

        router.start(Arc::clone(&config), Arc::new(PassthroughCodec2), Arc::new(PassthroughImbe));

        run_until_interrupted(router, ingress, move || {
            dstar_device.stop();
            dmr_device.stop();
        })
    }
}

/// The device class used only to clamp configured gains before the real
/// hardware (or its absence) is known; re-derived precisely once a device
/// class is discovered.
#[cfg(feature = "hardware")]
fn provisional_device_class() -> DeviceClass {
    DeviceClass::Dv3000
}

#[cfg(not(feature = "hardware"))]
fn provisional_device_class() -> DeviceClass {
    DeviceClass::Dv3003
}

fn main() -> Result<()> {
    color_eyre::install()?;
    let args = Cli::parse();

    let format: LogFormat = args.log_format.clone().into();
    let target = parse_log_target(&args.log_target);
    let logger = Arc::new(StructuredLogger::new(format, target).wrap_err("failed to initialize structured logger")?);
    LogBridge::install(Arc::clone(&logger)).wrap_err("failed to install log bridge")?;

    let (config, clamp_notices) = config_loader::load(&args.config, provisional_device_class())
        .wrap_err_with(|| format!("failed to load configuration from '{}'", args.config))?;
    let config = Arc::new(config);
    log_clamp_notices(&logger, &clamp_notices);

    log::info!(
        "loaded configuration: modules={:?} server={}:{} socket_dir={}",
        config.modules,
        config.server_address,
        config.port,
        config.socket_dir
    );

    let ingress = Arc::new(
        ReflectorSocket::bind(&config.socket_dir)
            .wrap_err_with(|| format!("failed to bind reflector ingress socket under '{}'", config.socket_dir))?,
    );

    run(config, ingress, &logger)
}
