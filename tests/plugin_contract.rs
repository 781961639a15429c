use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use tempfile::NamedTempFile;

use tf_object_detector::detect::StubProbe;
use tf_object_detector::{
    ui_context, BinaryMessenger, BoundingBox, Category, DetectorPlugin, EngineBinding,
    MethodCall, Plugin, PluginConfig, RawDetection, Reply, ReplySlot, StubPlatform, UiLoop, Value,
    CHANNEL_NAME, DETECT_ERROR, INIT_ERROR, SETUP_ERROR,
};

const WAIT: Duration = Duration::from_secs(10);

struct Host {
    messenger: Arc<BinaryMessenger>,
    ui_loop: UiLoop,
    binding: EngineBinding,
    plugin: DetectorPlugin,
    probe: Arc<StubProbe>,
}

impl Host {
    fn attach(stub: StubPlatform) -> Self {
        let probe = stub.probe();
        let messenger = Arc::new(BinaryMessenger::new());
        let (ui, ui_loop) = ui_context();
        let binding = EngineBinding::new(messenger.clone(), ui);
        let mut plugin = DetectorPlugin::with_platform(PluginConfig::default(), Arc::new(stub));
        plugin.on_attached_to_engine(&binding).expect("attach");
        Self {
            messenger,
            ui_loop,
            binding,
            plugin,
            probe,
        }
    }

    fn call(&self, method: &str, arguments: Value) -> Reply {
        let slot = ReplySlot::new();
        self.messenger
            .send(CHANNEL_NAME, MethodCall::new(method, arguments), slot.result());
        self.ui_loop
            .run_until(WAIT, || slot.is_filled())
            .expect("reply delivered");
        slot.take().expect("reply present")
    }
}

fn model_file() -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("temp model");
    file.write_all(b"ssd-mobilenet-v1").expect("write model");
    file.flush().expect("flush model");
    file
}

fn setup_args(model: &NamedTempFile) -> Value {
    Value::map([("model", Value::from(model.path().display().to_string()))])
}

fn grey_frame_args(width: i64, height: i64) -> Value {
    let luma = (width * height) as usize;
    let chroma = (((width + 1) / 2) * ((height + 1) / 2)) as usize;
    Value::map([
        (
            "bytesList",
            Value::List(vec![
                Value::from(vec![128u8; luma]),
                Value::from(vec![128u8; chroma]),
                Value::from(vec![128u8; chroma]),
            ]),
        ),
        ("imageHeight", Value::from(height)),
        ("imageWidth", Value::from(width)),
    ])
}

fn assert_error(reply: Reply, expected_code: &str, fragment: &str) {
    match reply {
        Reply::Error {
            code,
            message,
            details,
        } => {
            assert_eq!(code, expected_code);
            let message = message.unwrap_or_default();
            assert!(
                message.contains(fragment),
                "message {:?} lacks {:?}",
                message,
                fragment
            );
            assert_eq!(details, Value::Null);
        }
        other => panic!("expected error {}, got {:?}", expected_code, other),
    }
}

#[test]
fn full_lifecycle_returns_remapped_detections() {
    let stub = StubPlatform::new().with_script(vec![RawDetection::new(
        BoundingBox::new(64.0, 96.0, 128.0, 48.0),
        vec![Category::new("person", 0.82, 0)],
    )]);
    let host = Host::attach(stub);
    let model = model_file();

    assert_eq!(host.call("init", Value::Null), Reply::Success(Value::Bool(true)));
    assert_eq!(
        host.call("setup", setup_args(&model)),
        Reply::Success(Value::Bool(true))
    );

    let Reply::Success(Value::List(detections)) = host.call("detect", grey_frame_args(1280, 960))
    else {
        panic!("detect did not return a list");
    };
    assert_eq!(detections.len(), 1);
    let detection = &detections[0];
    assert_eq!(detection.get("label").and_then(Value::as_str), Some("person"));
    let rect = detection.get("rect").expect("rect");
    let edge = |name: &str| rect.get(name).and_then(Value::as_f64).expect(name);
    assert!((edge("top") - 96.0).abs() < 1e-3);
    assert!((edge("right") - 256.0).abs() < 1e-3);
    assert!((edge("bottom") - 192.0).abs() < 1e-3);
    assert!((edge("left") - 128.0).abs() < 1e-3);
    assert_eq!(host.probe.last_input_dims(), Some((480, 640)));

    assert_eq!(host.call("close", Value::Null), Reply::Success(Value::Bool(true)));
    assert_eq!(host.call("close", Value::Null), Reply::Success(Value::Bool(true)));
    assert_eq!(host.probe.detectors_closed(), 1);
}

#[test]
fn replies_wait_for_the_ui_context() {
    let host = Host::attach(StubPlatform::new());
    let slot = ReplySlot::new();
    host.messenger
        .send(CHANNEL_NAME, MethodCall::new("init", Value::Null), slot.result());
    assert!(!slot.is_filled());
    host.ui_loop
        .run_until(WAIT, || slot.is_filled())
        .expect("reply delivered");
    assert_eq!(slot.take(), Some(Reply::Success(Value::Bool(true))));
}

#[test]
fn setup_before_init_fails() {
    let host = Host::attach(StubPlatform::new());
    let model = model_file();
    assert_error(
        host.call("setup", setup_args(&model)),
        SETUP_ERROR,
        "not initialized",
    );
    assert_eq!(host.probe.detectors_created(), 0);
}

#[test]
fn init_failure_is_reported_once() {
    let host = Host::attach(StubPlatform::new().with_init_failure("runtime unavailable"));
    assert_error(host.call("init", Value::Null), INIT_ERROR, "runtime unavailable");
    assert_eq!(host.ui_loop.run_pending(), 0);
}

#[test]
fn gpu_delegate_rejected_when_probe_says_unavailable() {
    let host = Host::attach(StubPlatform::new().with_gpu(false));
    let model = model_file();
    host.call("init", Value::Null);

    let args = Value::map([
        ("model", Value::from(model.path().display().to_string())),
        ("delegate", Value::from(1i64)),
    ]);
    assert_error(host.call("setup", args), SETUP_ERROR, "Gpu delegate");
    assert_eq!(host.probe.detectors_created(), 0);
}

#[test]
fn unknown_delegate_index_fails_setup() {
    let host = Host::attach(StubPlatform::new());
    let model = model_file();
    host.call("init", Value::Null);

    let args = Value::map([
        ("model", Value::from(model.path().display().to_string())),
        ("delegate", Value::from(5i64)),
    ]);
    assert_error(host.call("setup", args), SETUP_ERROR, "unknown delegate index 5");
}

#[test]
fn missing_model_keeps_working_detector() {
    let host = Host::attach(StubPlatform::new());
    let model = model_file();
    host.call("init", Value::Null);
    host.call("setup", setup_args(&model));

    let missing = Value::map([("model", Value::from("/nonexistent/detector.onnx"))]);
    assert_error(
        host.call("setup", missing),
        SETUP_ERROR,
        "/nonexistent/detector.onnx",
    );

    assert!(matches!(
        host.call("detect", grey_frame_args(64, 48)),
        Reply::Success(Value::List(_))
    ));
    assert_eq!(host.probe.detectors_closed(), 0);
}

#[test]
fn reconfiguration_releases_previous_detector() {
    let host = Host::attach(StubPlatform::new());
    let model = model_file();
    host.call("init", Value::Null);
    host.call("setup", setup_args(&model));
    host.call("setup", setup_args(&model));
    assert_eq!(host.probe.detectors_created(), 2);
    assert_eq!(host.probe.detectors_closed(), 1);
}

#[test]
fn detect_before_init_runs_no_inference() {
    let host = Host::attach(StubPlatform::new());
    assert_error(
        host.call("detect", grey_frame_args(64, 48)),
        DETECT_ERROR,
        "not initialized",
    );
    assert_eq!(host.probe.frames_seen(), 0);
}

#[test]
fn detect_rejects_malformed_frames() {
    let host = Host::attach(StubPlatform::new());
    let model = model_file();
    host.call("init", Value::Null);
    host.call("setup", setup_args(&model));

    let two_planes = Value::map([
        (
            "bytesList",
            Value::List(vec![Value::from(vec![0u8; 16]), Value::from(vec![0u8; 4])]),
        ),
        ("imageHeight", Value::from(4i64)),
        ("imageWidth", Value::from(4i64)),
    ]);
    assert_error(host.call("detect", two_planes), DETECT_ERROR, "expected 3 planes");

    let missing_width = Value::map([
        ("bytesList", Value::List(vec![])),
        ("imageHeight", Value::from(4i64)),
    ]);
    assert_error(host.call("detect", missing_width), DETECT_ERROR, "missing argument");
    assert_eq!(host.probe.frames_seen(), 0);
}

#[test]
fn close_without_detector_succeeds() {
    let host = Host::attach(StubPlatform::new());
    assert_eq!(host.call("close", Value::Null), Reply::Success(Value::Bool(true)));
}

#[test]
fn unknown_method_is_not_implemented() {
    let host = Host::attach(StubPlatform::new());
    let slot = ReplySlot::new();
    host.messenger
        .send(CHANNEL_NAME, MethodCall::new("getLabels", Value::Null), slot.result());
    assert_eq!(slot.take(), Some(Reply::NotImplemented));
}

#[test]
fn detach_closes_detector_and_unregisters() {
    let mut host = Host::attach(StubPlatform::new());
    let model = model_file();
    host.call("init", Value::Null);
    host.call("setup", setup_args(&model));

    host.plugin.on_detached_from_engine(&host.binding);
    assert_eq!(host.probe.detectors_closed(), 1);

    let slot = ReplySlot::new();
    host.messenger
        .send(CHANNEL_NAME, MethodCall::new("init", Value::Null), slot.result());
    assert_eq!(slot.take(), Some(Reply::NotImplemented));
}
