//! Verification pipeline: load → locate → encode → compare → outcome.

use crate::detector::FaceLocator;
use crate::error::VerifyError;
use crate::image_loader::{self, ImageSource};
use crate::matcher::{self, Matcher};
use crate::recognizer::FaceEncoder;
use crate::types::{BatchEntry, Decision, Embedding, FaceRegion, VerificationOutcome};
use image::RgbImage;

/// Which image of a verification pair a step is working on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Reference,
    Probe,
}

impl Side {
    fn label(self) -> &'static str {
        match self {
            Side::Reference => "reference image",
            Side::Probe => "probe image",
        }
    }

    fn no_face(self) -> Decision {
        match self {
            Side::Reference => Decision::NoFaceReference,
            Side::Probe => Decision::NoFaceProbe,
        }
    }
}

/// A decoded image with the face selected for encoding.
struct SelectedFace {
    image: RgbImage,
    region: FaceRegion,
    /// Set when the locator reported more than one face.
    ambiguity: Option<String>,
}

/// Early exit from the pipeline, carrying the outcome to report.
type Stage<T> = Result<T, VerificationOutcome>;

/// Face verification pipeline.
///
/// Owns the locator, encoder and matcher, which are created once at startup
/// and only read afterwards. Share it behind an `Arc`.
pub struct Verifier {
    locator: Box<dyn FaceLocator>,
    encoder: Box<dyn FaceEncoder>,
    matcher: Box<dyn Matcher>,
}

impl Verifier {
    pub fn new(
        locator: Box<dyn FaceLocator>,
        encoder: Box<dyn FaceEncoder>,
        matcher: Box<dyn Matcher>,
    ) -> Self {
        Self { locator, encoder, matcher }
    }

    pub fn model_version(&self) -> &str {
        self.encoder.model_version()
    }

    /// Compare a probe image against a reference image.
    ///
    /// Only an invalid threshold is returned as an error; every other
    /// condition, including faults, becomes an outcome.
    pub fn verify_one(
        &self,
        reference: &ImageSource,
        probe: &ImageSource,
        threshold: f32,
    ) -> Result<VerificationOutcome, VerifyError> {
        matcher::validate_threshold(threshold)?;

        let outcome = match self.run_pair(reference, probe, threshold) {
            Ok(outcome) | Err(outcome) => outcome,
        };

        tracing::info!(
            decision = %outcome.decision,
            confidence = ?outcome.confidence,
            diagnostic = %outcome.diagnostic,
            "verification finished"
        );
        Ok(outcome)
    }

    fn run_pair(
        &self,
        reference: &ImageSource,
        probe: &ImageSource,
        threshold: f32,
    ) -> Stage<VerificationOutcome> {
        let reference_image = load_side(reference, Side::Reference)?;
        let probe_image = load_side(probe, Side::Probe)?;

        // Reference is checked first: a pair with no face on either side
        // reports no_face_reference.
        let reference_face = self.select_face(reference_image, Side::Reference)?;
        let probe_face = self.select_face(probe_image, Side::Probe)?;

        let known = self.encode_side(&reference_face, Side::Reference)?;
        let unknown = self.encode_side(&probe_face, Side::Probe)?;

        let result = self
            .matcher
            .compare(&known, &unknown, threshold)
            .map_err(|e| VerificationOutcome::processing_error(format!("comparison failed: {e}")))?;

        let diagnostic = [reference_face.ambiguity, probe_face.ambiguity]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join("; ");

        Ok(if result.is_match {
            VerificationOutcome::matched(result.confidence, diagnostic)
        } else {
            VerificationOutcome::not_matched(result.confidence, diagnostic)
        })
    }

    /// Compare one probe image against many known embeddings.
    ///
    /// Output has one entry per input, in input order. If the probe yields no
    /// usable face every entry is rejected without comparing; a failed
    /// comparison rejects only its own entry.
    pub fn verify_many<Id: Clone>(
        &self,
        probe: &ImageSource,
        known: &[(Id, Embedding)],
        threshold: f32,
    ) -> Result<Vec<BatchEntry<Id>>, VerifyError> {
        matcher::validate_threshold(threshold)?;

        let unknown = match self.probe_embedding(probe) {
            Ok(embedding) => embedding,
            Err(outcome) => {
                tracing::warn!(
                    decision = %outcome.decision,
                    diagnostic = %outcome.diagnostic,
                    candidates = known.len(),
                    "batch probe unusable; rejecting all candidates"
                );
                return Ok(reject_all(known));
            }
        };

        let entries = known
            .iter()
            .map(|(id, embedding)| match self.matcher.compare(embedding, &unknown, threshold) {
                Ok(result) => BatchEntry {
                    id: id.clone(),
                    is_match: result.is_match,
                    confidence: result.confidence,
                },
                Err(err) => {
                    tracing::error!(error = %err, "batch comparison failed; rejecting candidate");
                    BatchEntry::rejected(id.clone())
                }
            })
            .collect::<Vec<_>>();

        tracing::info!(
            candidates = entries.len(),
            matches = entries.iter().filter(|e| e.is_match).count(),
            "batch verification finished"
        );
        Ok(entries)
    }

    fn probe_embedding(&self, probe: &ImageSource) -> Stage<Embedding> {
        let image = load_side(probe, Side::Probe)?;
        let face = self.select_face(image, Side::Probe)?;
        self.encode_side(&face, Side::Probe)
    }

    /// All face regions in an image, in detector order.
    pub fn locate_faces(&self, source: &ImageSource) -> Result<Vec<FaceRegion>, VerifyError> {
        let image = image_loader::load(source)?;
        self.locator.locate(&image)
    }

    /// Embedding of the first face in an image, or `None` when there is no face.
    pub fn embed(&self, source: &ImageSource) -> Result<Option<Embedding>, VerifyError> {
        let image = image_loader::load(source)?;
        let regions = self.locator.locate(&image)?;
        if regions.len() > 1 {
            tracing::warn!(faces = regions.len(), source = %source.describe(), "multiple faces detected, using the first one");
        }
        match regions.first() {
            Some(region) => self.encoder.encode(&image, region).map(Some),
            None => Ok(None),
        }
    }

    fn select_face(&self, image: RgbImage, side: Side) -> Stage<SelectedFace> {
        let regions = self.locator.locate(&image).map_err(|e| {
            tracing::error!(side = side.label(), error = %e, "face location failed");
            VerificationOutcome::processing_error(format!("{}: {e}", side.label()))
        })?;

        let count = regions.len();
        let Some(region) = regions.into_iter().next() else {
            tracing::info!(side = side.label(), "no face detected");
            return Err(VerificationOutcome::no_face(
                side.no_face(),
                format!("{}: no face detected", side.label()),
            ));
        };

        let ambiguity = (count > 1).then(|| {
            tracing::warn!(side = side.label(), faces = count, "multiple faces detected, using the first one");
            format!("{}: {count} faces detected, using the first", side.label())
        });

        Ok(SelectedFace { image, region, ambiguity })
    }

    fn encode_side(&self, face: &SelectedFace, side: Side) -> Stage<Embedding> {
        self.encoder.encode(&face.image, &face.region).map_err(|e| {
            tracing::error!(side = side.label(), error = %e, "face encoding failed");
            VerificationOutcome::processing_error(format!("{}: {e}", side.label()))
        })
    }
}

fn load_side(source: &ImageSource, side: Side) -> Stage<RgbImage> {
    image_loader::load(source).map_err(|e| {
        tracing::warn!(side = side.label(), source = %source.describe(), error = %e, "image load failed");
        VerificationOutcome::processing_error(format!("{}: {e}", side.label()))
    })
}

/// Every candidate rejected with zero confidence, preserving order.
fn reject_all<Id: Clone>(known: &[(Id, Embedding)]) -> Vec<BatchEntry<Id>> {
    known.iter().map(|(id, _)| BatchEntry::rejected(id.clone())).collect()
}
