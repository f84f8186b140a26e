//! Face embedding, with an ArcFace backend via ONNX Runtime.
//!
//! Extracts 512-dimensional embeddings from aligned 112×112 RGB face crops,
//! using the w600k_r50 ArcFace model.

use crate::alignment::{self, ALIGNED_SIZE};
use crate::error::VerifyError;
use crate::types::{Embedding, FaceRegion};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use std::sync::Mutex;
use thiserror::Error;

const ARCFACE_MEAN: f32 = 127.5;
const ARCFACE_STD: f32 = 127.5; // ArcFace normalization is symmetric, unlike SCRFD
const ARCFACE_EMBEDDING_DIM: usize = 512;
const ARCFACE_MODEL_VERSION: &str = "w600k_r50";

/// Converts one located face into a fixed-length embedding.
///
/// Must be deterministic for a fixed image, region and model.
pub trait FaceEncoder: Send + Sync {
    fn encode(&self, image: &RgbImage, region: &FaceRegion) -> Result<Embedding, VerifyError>;

    /// Identifier of the model configuration; embeddings are only comparable
    /// within one version.
    fn model_version(&self) -> &str;
}

#[derive(Error, Debug)]
pub enum RecognizerError {
    #[error("model file not found: {0}; download it from insightface and place it in the model directory")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("face region has no area inside the image")]
    EmptyRegion,
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// ArcFace-based face encoder.
pub struct ArcFaceRecognizer {
    session: Mutex<Session>,
}

impl ArcFaceRecognizer {
    /// Load the ArcFace ONNX model from the given path.
    pub fn load(model_path: &str, intra_threads: usize) -> Result<Self, RecognizerError> {
        if !Path::new(model_path).exists() {
            return Err(RecognizerError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(intra_threads)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = model_path,
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded ArcFace model"
        );

        Ok(Self { session: Mutex::new(session) })
    }

    /// Align the face, run ArcFace, and L2-normalize the result.
    fn extract(&self, image: &RgbImage, face: &FaceRegion) -> Result<Embedding, RecognizerError> {
        let aligned = alignment::align_face(image, face).ok_or(RecognizerError::EmptyRegion)?;
        let input = preprocess(&aligned);

        let raw: Vec<f32> = {
            let mut session = self.session.lock().map_err(|_| {
                RecognizerError::InferenceFailed("recognizer session lock poisoned".into())
            })?;
            let outputs = session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
            let (_, raw_data) = outputs[0]
                .try_extract_tensor::<f32>()
                .map_err(|e| RecognizerError::InferenceFailed(format!("embedding extraction: {e}")))?;
            raw_data.to_vec()
        };

        Ok(Embedding {
            values: embedding_from_output(raw)?,
            model_version: Some(ARCFACE_MODEL_VERSION.to_string()),
        })
    }
}

impl FaceEncoder for ArcFaceRecognizer {
    fn encode(&self, image: &RgbImage, region: &FaceRegion) -> Result<Embedding, VerifyError> {
        Ok(self.extract(image, region)?)
    }

    fn model_version(&self) -> &str {
        ARCFACE_MODEL_VERSION
    }
}

/// Validate raw model output and L2-normalize it.
fn embedding_from_output(raw: Vec<f32>) -> Result<Vec<f32>, RecognizerError> {
    if raw.len() != ARCFACE_EMBEDDING_DIM {
        return Err(RecognizerError::InferenceFailed(format!(
            "expected {ARCFACE_EMBEDDING_DIM}-dim embedding, got {}",
            raw.len()
        )));
    }
    if raw.iter().any(|v| !v.is_finite()) {
        return Err(RecognizerError::InferenceFailed(
            "embedding contains NaN or infinite values".into(),
        ));
    }
    Ok(l2_normalize(raw))
}

fn l2_normalize(raw: Vec<f32>) -> Vec<f32> {
    let norm: f32 = raw.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        raw.iter().map(|x| x / norm).collect()
    } else {
        raw
    }
}

/// Convert a 112×112 RGB aligned face crop into a NCHW float tensor.
fn preprocess(aligned_face: &RgbImage) -> Array4<f32> {
    let mut tensor = Array4::<f32>::zeros((1, 3, ALIGNED_SIZE, ALIGNED_SIZE));

    for (x, y, px) in aligned_face.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        if x >= ALIGNED_SIZE || y >= ALIGNED_SIZE {
            continue;
        }
        for c in 0..3 {
            tensor[[0, c, y, x]] = (px.0[c] as f32 - ARCFACE_MEAN) / ARCFACE_STD;
        }
    }

    tensor
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_preprocess_output_shape() {
        let aligned = RgbImage::from_pixel(112, 112, Rgb([128, 128, 128]));
        let tensor = preprocess(&aligned);
        assert_eq!(tensor.shape(), &[1, 3, ALIGNED_SIZE, ALIGNED_SIZE]);
    }

    #[test]
    fn test_preprocess_normalization() {
        let aligned = RgbImage::from_pixel(112, 112, Rgb([128, 0, 255]));
        let tensor = preprocess(&aligned);
        let expected = |v: f32| (v - ARCFACE_MEAN) / ARCFACE_STD;
        assert!((tensor[[0, 0, 5, 5]] - expected(128.0)).abs() < 1e-6);
        assert!((tensor[[0, 1, 5, 5]] + 1.0).abs() < 1e-6);
        assert!((tensor[[0, 2, 5, 5]] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_preprocess_is_deterministic() {
        let aligned = RgbImage::from_fn(112, 112, |x, y| Rgb([(x * 2) as u8, (y * 2) as u8, 7]));
        assert_eq!(preprocess(&aligned), preprocess(&aligned));
    }

    #[test]
    fn test_l2_normalize() {
        let v = l2_normalize(vec![3.0, 4.0]);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
        assert_eq!(l2_normalize(vec![0.0, 0.0]), vec![0.0, 0.0]);
    }

    #[test]
    fn test_embedding_from_output_normalizes() {
        let mut raw = vec![0.0f32; ARCFACE_EMBEDDING_DIM];
        raw[0] = 3.0;
        raw[1] = 4.0;
        let values = embedding_from_output(raw).unwrap();
        assert!((values[0] - 0.6).abs() < 1e-6);
        assert!((values[1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_embedding_from_output_rejects_non_finite() {
        let mut raw = vec![0.1f32; ARCFACE_EMBEDDING_DIM];
        raw[7] = f32::NAN;
        let err = embedding_from_output(raw).unwrap_err();
        assert!(matches!(err, RecognizerError::InferenceFailed(_)));

        let mut raw = vec![0.1f32; ARCFACE_EMBEDDING_DIM];
        raw[0] = f32::INFINITY;
        assert!(embedding_from_output(raw).is_err());
    }

    #[test]
    fn test_embedding_from_output_rejects_wrong_dim() {
        assert!(embedding_from_output(vec![1.0; 128]).is_err());
    }

    #[test]
    fn test_load_missing_model() {
        let err = ArcFaceRecognizer::load("/nonexistent/w600k_r50.onnx", 1).err();
        assert!(matches!(err, Some(RecognizerError::ModelNotFound(_))));
    }
}
