//! Detector session: runtime, active detector and frame pipeline.
//!
//! A session is owned by exactly one thread (see [`crate::worker`]). All four
//! channel operations map onto `&mut self` methods here.

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};

use crate::convert::{prepare_input, rotate, yuv_to_rgba};
use crate::detect::{Delegate, Detection, DetectorOptions, InferencePlatform, ObjectDetector};
use crate::error::DetectorFault;
use crate::frame::{ChromaLayout, Rotation, YuvFrame};
use crate::geometry::InferenceGeometry;
use crate::model::ModelBuffer;
use crate::runtime::VisionRuntime;

/// Frame pipeline settings fixed for the lifetime of a session.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PipelineSettings {
    pub geometry: InferenceGeometry,
    pub chroma_layout: ChromaLayout,
    /// Rotation applied to the converted frame before resizing. Boxes are
    /// reported in the coordinates of the rotated bitmap.
    pub pre_rotation: Rotation,
}

/// One frame to run through the detector.
#[derive(Debug)]
pub struct DetectRequest {
    pub frame: YuvFrame,
    /// Clockwise rotation applied after resizing, before inference.
    pub rotation: Rotation,
}

struct ActiveDetector {
    detector: Box<dyn ObjectDetector>,
    options: DetectorOptions,
}

pub struct DetectorSession {
    runtime: VisionRuntime,
    settings: PipelineSettings,
    active: Option<ActiveDetector>,
}

impl DetectorSession {
    pub fn new(platform: Arc<dyn InferencePlatform>, settings: PipelineSettings) -> Self {
        Self {
            runtime: VisionRuntime::new(platform),
            settings,
            active: None,
        }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    pub fn runtime(&self) -> &VisionRuntime {
        &self.runtime
    }

    pub fn is_configured(&self) -> bool {
        self.active.is_some()
    }

    /// Options of the installed detector.
    pub fn options(&self) -> Option<&DetectorOptions> {
        self.active.as_ref().map(|active| &active.options)
    }

    /// Initialize the inference runtime. Returns whether GPU is available.
    pub fn init(&mut self) -> Result<bool> {
        self.runtime.initialize()
    }

    /// Build a detector and install it.
    ///
    /// The previous detector is closed only after the new one was built; on
    /// any failure it stays installed unchanged.
    pub fn setup(&mut self, options: DetectorOptions) -> Result<()> {
        options.validate()?;
        self.runtime.ensure_initialized()?;
        if options.delegate == Delegate::Gpu && !self.runtime.gpu_supported() {
            return Err(DetectorFault::UnsupportedDelegate(Delegate::Gpu).into());
        }

        let model_path = options.model_path.clone();
        let model = ModelBuffer::map(&model_path)
            .context(DetectorFault::ModelLoad(model_path.clone()))?;
        let fingerprint = log::log_enabled!(log::Level::Info).then(|| model.fingerprint_hex());
        let detector = self
            .runtime
            .platform()
            .create_detector(model, &options)
            .context(DetectorFault::ModelLoad(model_path.clone()))?;

        if let Some(mut previous) = self.active.take() {
            log::debug!(
                "closing previous detector for {}",
                previous.options.model_path.display()
            );
            previous.detector.close();
        }
        log::info!(
            "detector ready: model={} sha256={} delegate={:?} threshold={} threads={} max_results={}",
            model_path.display(),
            fingerprint.as_deref().unwrap_or("-"),
            options.delegate,
            options.threshold,
            options.num_threads,
            options.max_results
        );
        self.active = Some(ActiveDetector { detector, options });
        Ok(())
    }

    /// Convert, infer and remap one frame.
    pub fn detect(&mut self, request: DetectRequest) -> Result<Vec<Detection>> {
        self.runtime.ensure_initialized()?;
        let settings = self.settings;
        let active = self
            .active
            .as_mut()
            .ok_or(DetectorFault::DetectorNotConfigured)?;

        let started = Instant::now();
        let DetectRequest { frame, rotation } = request;
        let rgba = yuv_to_rgba(&frame, settings.chroma_layout)?;
        let rgba = rotate(rgba, settings.pre_rotation);
        let (source_width, source_height) = rgba.dimensions();
        let input = prepare_input(&rgba, settings.geometry, rotation);
        drop(rgba);

        let raw = active
            .detector
            .detect(&input)
            .context("inference failed")?;

        let mut detections = Vec::with_capacity(raw.len());
        for item in raw {
            let Some(top) = item.top_category() else {
                log::debug!("skipping detection without categories");
                continue;
            };
            detections.push(Detection {
                rect: settings.geometry.remap(
                    item.bounding_box,
                    rotation,
                    source_width,
                    source_height,
                ),
                label: top.label.clone(),
                score: top.score,
            });
        }
        log::debug!(
            "{} detections on {}x{} frame in {:?}",
            detections.len(),
            frame.width,
            frame.height,
            started.elapsed()
        );
        Ok(detections)
    }

    /// Release the detector. Safe to call repeatedly.
    pub fn close(&mut self) -> Result<()> {
        if let Some(mut active) = self.active.take() {
            active.detector.close();
            log::info!(
                "detector closed: model={}",
                active.options.model_path.display()
            );
        }
        Ok(())
    }
}

impl Drop for DetectorSession {
    fn drop(&mut self) {
        if let Some(mut active) = self.active.take() {
            active.detector.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{Category, RawDetection, StubPlatform, StubProbe};
    use crate::error::fault_of;
    use crate::geometry::BoundingBox;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn model_file() -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"ssd-mobilenet").unwrap();
        file.flush().unwrap();
        file
    }

    fn session_with(stub: StubPlatform) -> (DetectorSession, Arc<StubProbe>) {
        let probe = stub.probe();
        (
            DetectorSession::new(Arc::new(stub), PipelineSettings::default()),
            probe,
        )
    }

    fn grey_frame(width: u32, height: u32) -> YuvFrame {
        let luma = (width * height) as usize;
        let chroma = (width.div_ceil(2) * height.div_ceil(2)) as usize;
        YuvFrame::new(
            vec![128; luma],
            vec![128; chroma],
            vec![128; chroma],
            width,
            height,
        )
        .unwrap()
    }

    fn quarter_turn() -> Rotation {
        Rotation::from_degrees(90).unwrap()
    }

    #[test]
    fn setup_before_init_is_rejected() {
        let (mut session, probe) = session_with(StubPlatform::new());
        let model = model_file();
        let err = session
            .setup(DetectorOptions::new(model.path()))
            .unwrap_err();
        assert_eq!(fault_of(&err), Some(&DetectorFault::RuntimeNotInitialized));
        assert!(!session.is_configured());
        assert_eq!(probe.detectors_created(), 0);
    }

    #[test]
    fn gpu_delegate_requires_probe_support() -> Result<()> {
        let (mut session, _) = session_with(StubPlatform::new().with_gpu(false));
        session.init()?;
        let model = model_file();
        let err = session
            .setup(DetectorOptions::new(model.path()).with_delegate(Delegate::Gpu))
            .unwrap_err();
        assert_eq!(
            fault_of(&err),
            Some(&DetectorFault::UnsupportedDelegate(Delegate::Gpu))
        );
        assert!(!session.is_configured());

        // NNAPI is accepted without a probe.
        session.setup(DetectorOptions::new(model.path()).with_delegate(Delegate::Nnapi))?;
        assert!(session.is_configured());
        Ok(())
    }

    #[test]
    fn gpu_delegate_accepted_when_available() -> Result<()> {
        let (mut session, _) = session_with(StubPlatform::new().with_gpu(true));
        assert!(session.init()?);
        let model = model_file();
        session.setup(DetectorOptions::new(model.path()).with_delegate(Delegate::Gpu))?;
        assert_eq!(session.options().map(|o| o.delegate), Some(Delegate::Gpu));
        Ok(())
    }

    #[test]
    fn missing_model_keeps_previous_detector() -> Result<()> {
        let (mut session, probe) = session_with(StubPlatform::new());
        session.init()?;
        let model = model_file();
        session.setup(DetectorOptions::new(model.path()))?;

        let err = session
            .setup(DetectorOptions::new("/nonexistent/ssd.onnx"))
            .unwrap_err();
        assert_eq!(
            fault_of(&err),
            Some(&DetectorFault::ModelLoad("/nonexistent/ssd.onnx".into()))
        );
        assert!(format!("{:#}", err).contains("failed to open model file"));
        assert_eq!(
            session.options().map(|o| o.model_path.clone()),
            Some(model.path().to_path_buf())
        );
        assert_eq!(probe.detectors_closed(), 0);
        Ok(())
    }

    #[test]
    fn reconfiguration_closes_previous_detector() -> Result<()> {
        let (mut session, probe) = session_with(StubPlatform::new());
        session.init()?;
        let model = model_file();
        session.setup(DetectorOptions::new(model.path()))?;
        session.setup(DetectorOptions::new(model.path()).with_threshold(0.7))?;
        assert_eq!(probe.detectors_created(), 2);
        assert_eq!(probe.detectors_closed(), 1);
        assert_eq!(session.options().map(|o| o.threshold), Some(0.7));
        Ok(())
    }

    #[test]
    fn detect_before_init_runs_no_inference() {
        let (mut session, probe) = session_with(StubPlatform::new());
        let err = session
            .detect(DetectRequest {
                frame: grey_frame(4, 4),
                rotation: quarter_turn(),
            })
            .unwrap_err();
        assert_eq!(fault_of(&err), Some(&DetectorFault::RuntimeNotInitialized));
        assert_eq!(probe.frames_seen(), 0);
    }

    #[test]
    fn detect_without_detector_is_rejected() -> Result<()> {
        let (mut session, probe) = session_with(StubPlatform::new());
        session.init()?;
        let err = session
            .detect(DetectRequest {
                frame: grey_frame(4, 4),
                rotation: quarter_turn(),
            })
            .unwrap_err();
        assert_eq!(fault_of(&err), Some(&DetectorFault::DetectorNotConfigured));
        assert_eq!(probe.frames_seen(), 0);
        Ok(())
    }

    #[test]
    fn detect_remaps_boxes_to_source_frame() -> Result<()> {
        let script = vec![
            RawDetection::new(
                BoundingBox::new(64.0, 96.0, 128.0, 48.0),
                vec![
                    Category::new("cat", 0.2, 16),
                    Category::new("person", 0.9, 0),
                ],
            ),
            RawDetection::new(BoundingBox::new(0.0, 1.0, 1.0, 0.0), vec![]),
        ];
        let (mut session, probe) = session_with(StubPlatform::new().with_script(script));
        session.init()?;
        let model = model_file();
        session.setup(DetectorOptions::new(model.path()))?;

        let detections = session.detect(DetectRequest {
            frame: grey_frame(1280, 960),
            rotation: quarter_turn(),
        })?;
        assert_eq!(probe.last_input_dims(), Some((480, 640)));
        assert_eq!(detections.len(), 1);

        let detection = &detections[0];
        assert_eq!(detection.label, "person");
        assert!((detection.score - 0.9).abs() < 1e-6);
        assert!((detection.rect.top - 96.0).abs() < 1e-3);
        assert!((detection.rect.right - 256.0).abs() < 1e-3);
        assert!((detection.rect.bottom - 192.0).abs() < 1e-3);
        assert!((detection.rect.left - 128.0).abs() < 1e-3);
        Ok(())
    }

    #[test]
    fn pre_rotated_frames_remap_to_rotated_bitmap() -> Result<()> {
        let script = vec![RawDetection::new(
            BoundingBox::new(120.0, 640.0, 480.0, 160.0),
            vec![Category::new("person", 0.7, 0)],
        )];
        let stub = StubPlatform::new().with_script(script);
        let counters = stub.probe();
        let settings = PipelineSettings {
            pre_rotation: quarter_turn(),
            ..PipelineSettings::default()
        };
        let mut session = DetectorSession::new(Arc::new(stub), settings);
        session.init()?;
        let model = model_file();
        session.setup(DetectorOptions::new(model.path()))?;

        // 1280x960 turns into a 960x1280 bitmap before the 640x480 resize.
        let detections = session.detect(DetectRequest {
            frame: grey_frame(1280, 960),
            rotation: Rotation::NONE,
        })?;
        assert_eq!(counters.last_input_dims(), Some((640, 480)));
        assert_eq!(detections.len(), 1);

        let rect = detections[0].rect;
        assert!((rect.top - 320.0).abs() < 1e-3);
        assert!((rect.right - 960.0).abs() < 1e-3);
        assert!((rect.bottom - 1280.0).abs() < 1e-3);
        assert!((rect.left - 240.0).abs() < 1e-3);
        Ok(())
    }

    #[test]
    fn invalid_frame_is_reported() -> Result<()> {
        let (mut session, probe) = session_with(StubPlatform::new());
        session.init()?;
        let model = model_file();
        session.setup(DetectorOptions::new(model.path()))?;

        let frame = YuvFrame::new(vec![0; 16], vec![0; 1], vec![0; 4], 4, 4)?;
        let err = session
            .detect(DetectRequest {
                frame,
                rotation: Rotation::NONE,
            })
            .unwrap_err();
        assert!(matches!(fault_of(&err), Some(DetectorFault::InvalidFrame(_))));
        assert_eq!(probe.frames_seen(), 0);
        Ok(())
    }

    #[test]
    fn close_is_idempotent() -> Result<()> {
        let (mut session, probe) = session_with(StubPlatform::new());
        session.close()?;
        session.init()?;
        let model = model_file();
        session.setup(DetectorOptions::new(model.path()))?;
        session.close()?;
        session.close()?;
        assert!(!session.is_configured());
        assert_eq!(probe.detectors_closed(), 1);
        Ok(())
    }
}
