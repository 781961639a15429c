#![cfg(feature = "backend-tract")]

use std::ffi::OsString;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use image::RgbaImage;
use tract_onnx::prelude::*;

use crate::detect::backend::{InferencePlatform, ObjectDetector, RuntimeOptions};
use crate::detect::options::{Delegate, DetectorOptions};
use crate::detect::result::{Category, RawDetection};
use crate::geometry::BoundingBox;
use crate::model::ModelBuffer;

/// Tract-based platform for ONNX SSD-style detectors.
///
/// Runs on the CPU only. Models are parsed from the memory-mapped buffer and
/// compiled for the input size of the first frame they see.
#[derive(Default)]
pub struct TractPlatform;

impl TractPlatform {
    pub fn new() -> Self {
        Self
    }
}

impl InferencePlatform for TractPlatform {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn gpu_delegate_available(&self) -> Result<bool> {
        Ok(false)
    }

    fn initialize(&self, options: RuntimeOptions) -> Result<()> {
        log::info!(
            "tract runtime ready (gpu delegate support: {})",
            options.gpu_delegate_support
        );
        Ok(())
    }

    fn create_detector(
        &self,
        model: ModelBuffer,
        options: &DetectorOptions,
    ) -> Result<Box<dyn ObjectDetector>> {
        match options.delegate {
            Delegate::Cpu => {}
            Delegate::Nnapi => {
                log::warn!("NNAPI delegate is not available in tract; running on CPU")
            }
            Delegate::Gpu => return Err(anyhow!("tract has no GPU delegate")),
        }
        if options.num_threads > 1 {
            log::debug!(
                "tract runs single-threaded; ignoring numThreads={}",
                options.num_threads
            );
        }

        let inference_model = tract_onnx::onnx()
            .model_for_read(&mut Cursor::new(model.as_bytes()))
            .with_context(|| format!("failed to parse ONNX model {}", model.path().display()))?;
        let labels = load_labels(model.path())?;
        if log::log_enabled!(log::Level::Info) {
            log::info!(
                "loaded ONNX detector {} (sha256 {}, {} labels)",
                model.path().display(),
                model.fingerprint_hex(),
                labels.len()
            );
        }

        Ok(Box::new(TractDetector {
            model: inference_model,
            plan: None,
            labels,
            threshold: options.threshold,
            max_results: options.max_results,
        }))
    }
}

struct TractDetector {
    model: InferenceModel,
    plan: Option<((u32, u32), TypedRunnableModel<TypedModel>)>,
    labels: Vec<String>,
    threshold: f32,
    max_results: usize,
}

impl TractDetector {
    fn plan_for(&mut self, width: u32, height: u32) -> Result<&TypedRunnableModel<TypedModel>> {
        let stale = !matches!(&self.plan, Some((dims, _)) if *dims == (width, height));
        if stale {
            let plan = self
                .model
                .clone()
                .with_input_fact(
                    0,
                    InferenceFact::dt_shape(
                        f32::datum_type(),
                        tvec!(1, 3, height as usize, width as usize),
                    ),
                )
                .context("failed to set input fact")?
                .into_optimized()
                .context("failed to optimize ONNX model")?
                .into_runnable()
                .context("failed to build runnable ONNX model")?;
            self.plan = Some(((width, height), plan));
        }
        self.plan
            .as_ref()
            .map(|(_, plan)| plan)
            .ok_or_else(|| anyhow!("ONNX plan missing"))
    }
}

impl ObjectDetector for TractDetector {
    fn detect(&mut self, image: &RgbaImage) -> Result<Vec<RawDetection>> {
        let (width, height) = image.dimensions();
        let input = build_input(image);
        let outputs = self
            .plan_for(width, height)?
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;

        let boxes = output_f32(&outputs, 0, "boxes")?;
        let classes = output_f32(&outputs, 1, "classes")?;
        let scores = output_f32(&outputs, 2, "scores")?;
        let count = match outputs.get(3) {
            Some(_) => output_f32(&outputs, 3, "count")?.first().map(|c| *c as usize),
            None => None,
        };

        Ok(decode_ssd(
            &SsdOutputs {
                boxes: &boxes,
                classes: &classes,
                scores: &scores,
                count,
            },
            (width, height),
            &self.labels,
            self.threshold,
            self.max_results,
        ))
    }

    fn close(&mut self) {
        self.plan = None;
    }
}

fn build_input(image: &RgbaImage) -> Tensor {
    let (width, height) = image.dimensions();
    let pixels = image.as_raw();
    let width = width as usize;
    tract_ndarray::Array4::from_shape_fn(
        (1, 3, height as usize, width),
        |(_, channel, y, x)| pixels[(y * width + x) * 4 + channel] as f32 / 255.0,
    )
    .into_tensor()
}

fn output_f32(outputs: &TVec<TValue>, index: usize, name: &str) -> Result<Vec<f32>> {
    let output = outputs
        .get(index)
        .ok_or_else(|| anyhow!("model produced no {} output", name))?;
    let view = output
        .to_array_view::<f32>()
        .with_context(|| format!("{} output tensor was not f32", name))?;
    Ok(view.iter().copied().collect())
}

struct SsdOutputs<'a> {
    /// `[N, 4]` as ymin, xmin, ymax, xmax, normalized.
    boxes: &'a [f32],
    classes: &'a [f32],
    scores: &'a [f32],
    count: Option<usize>,
}

fn decode_ssd(
    outputs: &SsdOutputs<'_>,
    (width, height): (u32, u32),
    labels: &[String],
    threshold: f32,
    max_results: usize,
) -> Vec<RawDetection> {
    let mut n = (outputs.boxes.len() / 4)
        .min(outputs.classes.len())
        .min(outputs.scores.len());
    if let Some(count) = outputs.count {
        n = n.min(count);
    }
    let (w, h) = (width as f32, height as f32);

    let mut detections: Vec<RawDetection> = (0..n)
        .filter(|&i| outputs.scores[i] >= threshold)
        .map(|i| {
            let b = &outputs.boxes[i * 4..i * 4 + 4];
            let class = outputs.classes[i].round() as i32;
            let label = usize::try_from(class)
                .ok()
                .and_then(|c| labels.get(c))
                .cloned()
                .unwrap_or_else(|| format!("class_{}", class));
            RawDetection::new(
                BoundingBox::new(b[0] * h, b[3] * w, b[2] * h, b[1] * w),
                vec![Category::new(label, outputs.scores[i], class)],
            )
        })
        .collect();
    detections.sort_by(|a, b| b.categories[0].score.total_cmp(&a.categories[0].score));
    detections.truncate(max_results);
    detections
}

fn labels_path(model_path: &Path) -> PathBuf {
    let mut name: OsString = model_path.as_os_str().to_owned();
    name.push(".labels");
    PathBuf::from(name)
}

/// One label per line from `<model>.labels`, or none when the file is absent.
fn load_labels(model_path: &Path) -> Result<Vec<String>> {
    let path = labels_path(model_path);
    if !path.exists() {
        return Ok(Vec::new());
    }
    let contents = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read labels {}", path.display()))?;
    Ok(contents.lines().map(|line| line.trim().to_string()).collect())
}
