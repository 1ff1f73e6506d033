//! YuNet detector post-processing.
//!
//! YuNet is an anchor-free face detector predicting directly from grid
//! locations. For each stride (8, 16, 32) it outputs classification,
//! objectness and bbox-delta tensors; boxes decode as
//! `cx = (grid_x + dx) * stride`, `w = dw * stride`, normalized by the
//! input size. Landmark outputs are emitted by the model but not consumed
//! here.

use ndarray::Array2;

use crate::error::VisionError;

const STRIDES: [usize; 3] = [8, 16, 32];

/// A decoded box in coordinates normalized to [0, 1] of the detector input.
#[derive(Debug, Clone)]
pub struct RawDetection {
    pub bbox: [f32; 4], // x, y, w, h
    pub score: f32,
}

/// Scores (cls * obj, pre-sigmoid) and bbox deltas per stride.
pub struct GridOutputs {
    pub scores: Vec<Array2<f32>>,
    pub bboxes: Vec<Array2<f32>>,
}

/// Parse the raw output tensors into per-stride grids.
///
/// Output order is cls_8, cls_16, cls_32, obj_8, obj_16, obj_32,
/// bbox_8, bbox_16, bbox_32, followed by landmark tensors that are ignored.
pub fn parse_outputs(
    outputs: &[(&[i64], &[f32])],
    input_size: usize,
) -> Result<GridOutputs, VisionError> {
    let expected_counts: Vec<usize> = STRIDES
        .iter()
        .map(|s| (input_size / s) * (input_size / s))
        .collect();

    let grid = |base: usize, width: usize| -> Result<Vec<Array2<f32>>, VisionError> {
        let mut grids = Vec::with_capacity(STRIDES.len());
        for (idx, &count) in expected_counts.iter().enumerate() {
            let (shape, data) = outputs.get(base + idx).ok_or_else(|| {
                VisionError::BadOutput(format!("missing detector output at index {}", base + idx))
            })?;
            if shape.len() != 3 || shape[0] != 1 || shape[2] != width as i64 {
                return Err(VisionError::BadOutput(format!(
                    "output {} has shape {:?}, expected [1, {}, {}]",
                    base + idx,
                    shape,
                    count,
                    width
                )));
            }
            if shape[1] as usize != count {
                return Err(VisionError::BadOutput(format!(
                    "output {} has {} locations, expected {}",
                    base + idx,
                    shape[1],
                    count
                )));
            }
            grids.push(Array2::from_shape_vec((count, width), data.to_vec())?);
        }
        Ok(grids)
    };

    let cls = grid(0, 1)?;
    let obj = grid(3, 1)?;
    let bboxes = grid(6, 4)?;

    let scores = cls
        .iter()
        .zip(obj.iter())
        .map(|(c, o)| c * o)
        .collect();

    Ok(GridOutputs { scores, bboxes })
}

/// Decode grid outputs into boxes above `score_threshold`.
pub fn decode_detections(
    grids: &GridOutputs,
    score_threshold: f32,
    input_size: usize,
) -> Vec<RawDetection> {
    let mut detections = Vec::new();

    for (scale_idx, &stride) in STRIDES.iter().enumerate() {
        let scores = &grids.scores[scale_idx];
        let bboxes = &grids.bboxes[scale_idx];
        let feature_size = input_size / stride;

        for i in 0..feature_size {
            for j in 0..feature_size {
                let idx = i * feature_size + j;
                let score = scores[[idx, 0]];
                if score < score_threshold {
                    continue;
                }

                let dx = bboxes[[idx, 0]];
                let dy = bboxes[[idx, 1]];
                let dw = bboxes[[idx, 2]];
                let dh = bboxes[[idx, 3]];

                // Anchor-free: map grid cell plus deltas to image coordinates.
                let cx = (j as f32 + dx) * stride as f32 / input_size as f32;
                let cy = (i as f32 + dy) * stride as f32 / input_size as f32;
                let w = dw * stride as f32 / input_size as f32;
                let h = dh * stride as f32 / input_size as f32;

                detections.push(RawDetection {
                    bbox: [cx - w / 2.0, cy - h / 2.0, w, h],
                    score,
                });
            }
        }
    }

    detections
}

pub fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Apply sigmoid to every score grid in place.
pub fn apply_sigmoid(grids: &mut GridOutputs) {
    for score_map in &mut grids.scores {
        score_map.mapv_inplace(sigmoid);
    }
}
