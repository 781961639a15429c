//! detect_frame - run one raw YUV frame through the tf_object_detector channel

use anyhow::{anyhow, Context, Result};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tf_object_detector::{
    ui_context, BinaryMessenger, DetectorPlugin, EngineBinding, MethodCall, Plugin, PluginConfig,
    Reply, ReplySlot, UiLoop, Value, YuvFrame,
};

const REPLY_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Clone, Copy, Debug, ValueEnum)]
enum InputFormat {
    /// Y plane, then U, then V.
    I420,
    /// Y plane, then interleaved V/U.
    Nv21,
}

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Model file passed to setup.
    #[arg(long)]
    model: PathBuf,
    /// Raw YUV 4:2:0 frame.
    #[arg(long)]
    frame: PathBuf,
    #[arg(long)]
    width: u32,
    #[arg(long)]
    height: u32,
    #[arg(long, value_enum, default_value_t = InputFormat::I420)]
    format: InputFormat,
    /// Rotation in degrees applied before inference.
    #[arg(long)]
    rotation: Option<i64>,
    #[arg(long)]
    threshold: Option<f64>,
    #[arg(long)]
    max_results: Option<i64>,
    /// Delegate index: 0 = CPU, 1 = GPU, 2 = NNAPI.
    #[arg(long, default_value_t = 0)]
    delegate: i64,
    /// Config file (JSON or TOML); overrides TF_DETECTOR_CONFIG.
    #[arg(long, env = "TF_DETECTOR_CONFIG")]
    config: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = PluginConfig::load_from(args.config.as_deref())?;
    let channel = config.channel.clone();

    let raw = std::fs::read(&args.frame)
        .with_context(|| format!("failed to read frame {}", args.frame.display()))?;
    let frame = match args.format {
        InputFormat::I420 => YuvFrame::from_i420(&raw, args.width, args.height)?,
        InputFormat::Nv21 => YuvFrame::from_nv21(&raw, args.width, args.height)?,
    };
    let planes = Value::List(vec![
        Value::from(frame.y_plane().to_vec()),
        Value::from(frame.u_plane().to_vec()),
        Value::from(frame.v_plane().to_vec()),
    ]);

    let messenger = Arc::new(BinaryMessenger::new());
    let (ui, ui_loop) = ui_context();
    let binding = EngineBinding::new(messenger.clone(), ui);
    let mut plugin = DetectorPlugin::new(config);
    plugin.on_attached_to_engine(&binding)?;

    let outcome = run(&messenger, &ui_loop, &channel, &args, planes);
    plugin.on_detached_from_engine(&binding);
    let detections = outcome?;

    println!("{}", serde_json::to_string_pretty(&detections)?);
    Ok(())
}

fn run(
    messenger: &BinaryMessenger,
    ui_loop: &UiLoop,
    channel: &str,
    args: &Args,
    planes: Value,
) -> Result<Value> {
    call(messenger, ui_loop, channel, MethodCall::new("init", Value::Null))?;

    let mut setup = vec![
        ("model", Value::from(args.model.display().to_string())),
        ("delegate", Value::from(args.delegate)),
    ];
    if let Some(threshold) = args.threshold {
        setup.push(("threshold", Value::from(threshold)));
    }
    if let Some(max_results) = args.max_results {
        setup.push(("maxResults", Value::from(max_results)));
    }
    call(
        messenger,
        ui_loop,
        channel,
        MethodCall::new("setup", Value::map(setup)),
    )?;

    let mut detect = vec![
        ("bytesList", planes),
        ("imageHeight", Value::from(args.height)),
        ("imageWidth", Value::from(args.width)),
    ];
    if let Some(rotation) = args.rotation {
        detect.push(("imageRotation", Value::from(rotation)));
    }
    let detections = call(
        messenger,
        ui_loop,
        channel,
        MethodCall::new("detect", Value::map(detect)),
    )?;

    call(messenger, ui_loop, channel, MethodCall::new("close", Value::Null))?;
    Ok(detections)
}

/// Send one call and drain the UI loop until its reply arrives.
fn call(
    messenger: &BinaryMessenger,
    ui_loop: &UiLoop,
    channel: &str,
    call: MethodCall,
) -> Result<Value> {
    let method = call.method.clone();
    let slot = ReplySlot::new();
    messenger.send(channel, call, slot.result());
    ui_loop.run_until(REPLY_TIMEOUT, || slot.is_filled())?;
    match slot.take() {
        Some(Reply::Success(value)) => Ok(value),
        Some(Reply::Error { code, message, .. }) => Err(anyhow!(
            "{} failed: {}: {}",
            method,
            code,
            message.unwrap_or_default()
        )),
        Some(Reply::NotImplemented) => Err(anyhow!("{} is not implemented", method)),
        None => Err(anyhow!("{} produced no reply", method)),
    }
}
