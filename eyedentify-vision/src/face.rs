use image::{imageops::FilterType, DynamicImage, GenericImageView, RgbImage};
use ndarray::{Array1, Array4, ArrayView2};
use ort::{session::Session, value::Value};

use crate::error::VisionError;
use crate::yunet;

/// Components of the encoder output vector.
pub const EMBED_DIM: usize = 512;

/// Detector input side length.
const DETECT_SIZE: u32 = 640;

/// Detection result mapped back to source image coordinates.
#[derive(Debug, Clone)]
pub struct Detection {
    pub bbox: [f32; 4], // x, y, w, h
    pub score: f32,
}

/// A unit-normalized face embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
    pub vector: Array1<f32>,
}

impl Embedding {
    pub fn from_vec(components: Vec<f32>) -> Self {
        Self {
            vector: Array1::from_vec(components),
        }
    }

    pub fn dim(&self) -> usize {
        self.vector.len()
    }
}

/// Detect faces using the YuNet detector.
///
/// The image is letterboxed onto a 640x640 canvas, run through the model,
/// and decoded boxes are mapped back to the input image's coordinates.
pub fn detect_faces(
    session: &mut Session,
    img: &DynamicImage,
    score_threshold: f32,
    nms_threshold: f32,
) -> Result<Vec<Detection>, VisionError> {
    let (orig_width, orig_height) = img.dimensions();

    // Letterbox: resize preserving aspect ratio, center on a square canvas.
    let max_dim = orig_width.max(orig_height);
    let scale = DETECT_SIZE as f32 / max_dim as f32;
    let new_width = (orig_width as f32 * scale) as u32;
    let new_height = (orig_height as f32 * scale) as u32;

    let resized = img.resize_exact(new_width, new_height, FilterType::Triangle);
    let mut canvas = DynamicImage::new_rgb8(DETECT_SIZE, DETECT_SIZE);
    let offset_x = (DETECT_SIZE - new_width) / 2;
    let offset_y = (DETECT_SIZE - new_height) / 2;
    image::imageops::overlay(&mut canvas, &resized, offset_x as i64, offset_y as i64);

    // YuNet expects [1, 3, H, W] in BGR, values in [0, 255].
    let input_array = bgr_tensor(&canvas.to_rgb8())?;
    let input_tensor = Value::from_array(input_array)?;

    let outputs = session.run(ort::inputs![input_tensor])?;

    let mut output_data: Vec<(Vec<i64>, Vec<f32>)> = Vec::new();
    for (_name, output) in outputs.iter() {
        let (shape, data) = output.try_extract_tensor::<f32>()?;
        output_data.push((shape.iter().copied().collect(), data.to_vec()));
    }
    let output_refs: Vec<(&[i64], &[f32])> = output_data
        .iter()
        .map(|(s, d)| (s.as_slice(), d.as_slice()))
        .collect();

    let mut grids = yunet::parse_outputs(&output_refs, DETECT_SIZE as usize)?;
    yunet::apply_sigmoid(&mut grids);
    let raw_detections = yunet::decode_detections(&grids, score_threshold, DETECT_SIZE as usize);

    // Undo the letterbox: canvas-normalized coordinates back to source pixels.
    let mut detections: Vec<Detection> = raw_detections
        .into_iter()
        .map(|d| {
            let x = (d.bbox[0] * DETECT_SIZE as f32 - offset_x as f32) / scale;
            let y = (d.bbox[1] * DETECT_SIZE as f32 - offset_y as f32) / scale;
            let w = d.bbox[2] * DETECT_SIZE as f32 / scale;
            let h = d.bbox[3] * DETECT_SIZE as f32 / scale;
            Detection {
                bbox: [x, y, w, h],
                score: d.score,
            }
        })
        .collect();

    if nms_threshold < 1.0 {
        detections = nms(&detections, nms_threshold);
    }

    Ok(detections)
}

/// Apply non-maximum suppression to remove overlapping detections.
pub fn nms(detections: &[Detection], iou_threshold: f32) -> Vec<Detection> {
    if detections.is_empty() {
        return vec![];
    }

    let mut sorted = detections.to_vec();
    sorted.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut keep = Vec::new();
    let mut suppressed = vec![false; sorted.len()];

    for i in 0..sorted.len() {
        if suppressed[i] {
            continue;
        }
        keep.push(sorted[i].clone());

        for j in (i + 1)..sorted.len() {
            if suppressed[j] {
                continue;
            }
            if compute_iou(&sorted[i].bbox, &sorted[j].bbox) > iou_threshold {
                suppressed[j] = true;
            }
        }
    }

    keep
}

fn compute_iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let x1 = a[0].max(b[0]);
    let y1 = a[1].max(b[1]);
    let x2 = (a[0] + a[2]).min(b[0] + b[2]);
    let y2 = (a[1] + a[3]).min(b[1] + b[3]);

    if x2 <= x1 || y2 <= y1 {
        return 0.0;
    }

    let inter = (x2 - x1) * (y2 - y1);
    let area_a = a[2] * a[3];
    let area_b = b[2] * b[3];
    inter / (area_a + area_b - inter)
}

/// Crop the detected box (no margin, clamped to image bounds) and resize to
/// `size` x `size` for the encoder.
pub fn crop_face(img: &DynamicImage, detection: &Detection, size: u32) -> DynamicImage {
    let (img_w, img_h) = img.dimensions();

    let x = detection.bbox[0].max(0.0) as u32;
    let y = detection.bbox[1].max(0.0) as u32;
    let x = x.min(img_w.saturating_sub(1));
    let y = y.min(img_h.saturating_sub(1));
    let w = (detection.bbox[2].max(1.0) as u32).min(img_w - x);
    let h = (detection.bbox[3].max(1.0) as u32).min(img_h - y);

    img.crop_imm(x, y, w.max(1), h.max(1))
        .resize_exact(size, size, FilterType::Triangle)
}

/// Encode a face crop to a unit-normalized embedding.
///
/// The encoder expects [1, 3, S, S] RGB with pixels standardized as
/// `(p/255 - 0.5) / 0.5` and returns a `[1, EMBED_DIM]` vector.
pub fn encode_face(session: &mut Session, face: &RgbImage) -> Result<Embedding, VisionError> {
    let input_array = standardized_rgb_tensor(face)?;
    let input_tensor = Value::from_array(input_array)?;

    let outputs = session.run(ort::inputs![input_tensor])?;
    let (shape, data) = outputs[0].try_extract_tensor::<f32>()?;

    let embedding_size = if shape.len() == 2 {
        shape[1] as usize
    } else {
        data.len()
    };
    if embedding_size != EMBED_DIM || data.len() < embedding_size {
        return Err(VisionError::BadOutput(format!(
            "encoder returned {} components, expected {}",
            embedding_size, EMBED_DIM
        )));
    }

    let normalized = l2_normalize(data[..embedding_size].to_vec());
    Ok(Embedding::from_vec(normalized))
}

/// Divide by the L2 norm plus a small epsilon, so a degenerate all-zero
/// vector stays finite instead of dividing by zero.
pub fn l2_normalize(mut components: Vec<f32>) -> Vec<f32> {
    let norm: f32 = components.iter().map(|x| x * x).sum::<f32>().sqrt();
    let denom = norm + 1e-10;
    for x in &mut components {
        *x /= denom;
    }
    components
}

/// Cosine similarity of two embeddings.
///
/// Both sides are unit-normalized at creation, so the dot product is the
/// cosine; the result is clamped to [-1, 1] against rounding drift.
pub fn similarity(a: &Embedding, b: &Embedding) -> f32 {
    let dot: f32 = a
        .vector
        .iter()
        .zip(b.vector.iter())
        .map(|(x, y)| x * y)
        .sum();
    dot.clamp(-1.0, 1.0)
}

/// Score one query against a row-per-candidate matrix in a single
/// matrix-vector product. Equivalent to calling [`similarity`] per row.
pub fn similarity_batch(query: &Embedding, candidates: &ArrayView2<f32>) -> Array1<f32> {
    debug_assert_eq!(candidates.ncols(), query.dim());
    let mut scores = candidates.dot(&query.vector);
    scores.mapv_inplace(|s| s.clamp(-1.0, 1.0));
    scores
}

/// CHW tensor in BGR channel order, values in [0, 255] (detector input).
fn bgr_tensor(img: &RgbImage) -> Result<Array4<f32>, VisionError> {
    let (w, h) = img.dimensions();
    let pixel_count = (w * h) as usize;
    let mut data = vec![0f32; 3 * pixel_count];
    let (b_channel, rest) = data.split_at_mut(pixel_count);
    let (g_channel, r_channel) = rest.split_at_mut(pixel_count);

    for (i, px) in img.pixels().enumerate() {
        r_channel[i] = px[0] as f32;
        g_channel[i] = px[1] as f32;
        b_channel[i] = px[2] as f32;
    }

    Ok(Array4::from_shape_vec(
        (1, 3, h as usize, w as usize),
        data,
    )?)
}

/// CHW tensor in RGB channel order, standardized to [-1, 1] (encoder input).
pub(crate) fn standardized_rgb_tensor(img: &RgbImage) -> Result<Array4<f32>, VisionError> {
    let (w, h) = img.dimensions();
    let pixel_count = (w * h) as usize;
    let mut data = vec![0f32; 3 * pixel_count];
    let (r_channel, rest) = data.split_at_mut(pixel_count);
    let (g_channel, b_channel) = rest.split_at_mut(pixel_count);

    for (i, px) in img.pixels().enumerate() {
        r_channel[i] = standardize(px[0]);
        g_channel[i] = standardize(px[1]);
        b_channel[i] = standardize(px[2]);
    }

    Ok(Array4::from_shape_vec(
        (1, 3, h as usize, w as usize),
        data,
    )?)
}

fn standardize(p: u8) -> f32 {
    (p as f32 / 255.0 - 0.5) / 0.5
}
