#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::imageops::{self, FilterType};
use tract_onnx::prelude::tract_ndarray::{ArrayView3, Ix3};
use tract_onnx::prelude::*;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::{
    non_max_suppression, BoundingBox, Detection, DetectionResult, DEFAULT_IOU_THRESHOLD,
    DEFAULT_SCORE_FLOOR,
};
use crate::frame::Frame;

/// Number of box coordinates preceding the class scores in a YOLOv8 output row.
const BOX_FIELDS: usize = 4;

/// Tract-based backend for YOLOv8 ONNX models.
///
/// Loads a local model file and runs it on RGB frames resized to the model input. The raw
/// head is decoded by `decode_head`; presence thresholds are applied later by the evaluator.
pub struct TractBackend {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>>,
    params: HeadDecode,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, input_width: u32, input_height: u32) -> Result<Self> {
        let model_path = model_path.as_ref();
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    f32::datum_type(),
                    tvec!(1, 3, input_height as usize, input_width as usize),
                ),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            params: HeadDecode {
                input_width,
                input_height,
                score_floor: DEFAULT_SCORE_FLOOR,
                iou_threshold: DEFAULT_IOU_THRESHOLD,
            },
        })
    }

    /// Override the minimum class score kept from the raw model head.
    pub fn with_score_floor(mut self, score_floor: f32) -> Self {
        self.params.score_floor = score_floor;
        self
    }

    /// Override the overlap above which same-class anchors are merged.
    pub fn with_iou_threshold(mut self, iou_threshold: f32) -> Self {
        self.params.iou_threshold = iou_threshold;
        self
    }

    fn build_input(&self, frame: &Frame) -> Result<Tensor> {
        let image = frame.to_rgb_image()?;
        let (width, height) = (self.params.input_width, self.params.input_height);
        let resized = if image.dimensions() == (width, height) {
            image
        } else {
            imageops::resize(&image, width, height, FilterType::Triangle)
        };

        let input = tract_ndarray::Array4::from_shape_fn(
            (1, 3, height as usize, width as usize),
            |(_, channel, y, x)| resized.get_pixel(x as u32, y as u32)[channel] as f32 / 255.0,
        );

        Ok(input.into_tensor())
    }

    fn decode(&self, outputs: TVec<TValue>) -> Result<Vec<Detection>> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let head = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?
            .into_dimensionality::<Ix3>()
            .context("unexpected YOLO output rank")?;
        decode_head(head, &self.params)
    }
}

/// Parameters for turning a raw YOLOv8 head into detections.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct HeadDecode {
    /// Model input width in pixels; box coordinates are relative to it.
    pub input_width: u32,
    pub input_height: u32,
    pub score_floor: f32,
    pub iou_threshold: f32,
}

/// Decode a `[1, 4 + classes, anchors]` (or `[1, anchors, 4 + classes]`) head.
///
/// Each anchor keeps its best class when that score reaches `score_floor`; overlapping
/// anchors of the same class are then merged by non-maximum suppression, leaving one
/// detection per object, highest confidence first.
pub fn decode_head(head: ArrayView3<'_, f32>, params: &HeadDecode) -> Result<Vec<Detection>> {
    let shape = head.shape();
    if shape[0] != 1 {
        return Err(anyhow!("unexpected YOLO output shape {:?}", shape));
    }

    // Exports disagree on whether anchors or fields come last.
    let anchors_last = shape[1] < shape[2];
    let (fields, anchors) = if anchors_last {
        (shape[1], shape[2])
    } else {
        (shape[2], shape[1])
    };
    if fields <= BOX_FIELDS {
        return Err(anyhow!("YOLO output has no class scores ({} fields)", fields));
    }
    let at = |field: usize, anchor: usize| {
        if anchors_last {
            head[[0, field, anchor]]
        } else {
            head[[0, anchor, field]]
        }
    };

    let width = params.input_width as f32;
    let height = params.input_height as f32;
    let mut detections = Vec::new();
    for anchor in 0..anchors {
        let (class_id, score) = (BOX_FIELDS..fields)
            .map(|field| (field - BOX_FIELDS, at(field, anchor)))
            .fold((0, f32::NEG_INFINITY), |best, candidate| {
                if candidate.1 > best.1 {
                    candidate
                } else {
                    best
                }
            });
        if !score.is_finite() || score < params.score_floor {
            continue;
        }

        let (cx, cy, w, h) = (
            at(0, anchor),
            at(1, anchor),
            at(2, anchor),
            at(3, anchor),
        );
        detections.push(Detection::new(
            class_id as u32,
            score.clamp(0.0, 1.0),
            BoundingBox {
                x: ((cx - w / 2.0) / width).clamp(0.0, 1.0),
                y: ((cy - h / 2.0) / height).clamp(0.0, 1.0),
                w: (w / width).clamp(0.0, 1.0),
                h: (h / height).clamp(0.0, 1.0),
            },
        ));
    }

    non_max_suppression(&mut detections, params.iou_threshold);
    Ok(detections)
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn detect(&mut self, frame: &Frame) -> Result<DetectionResult> {
        let input = self.build_input(frame)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        Ok(DetectionResult::new(self.decode(outputs)?))
    }
}
