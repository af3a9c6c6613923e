use serde::{Deserialize, Serialize};

/// Bounding box for a detected face, with optional facial landmarks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

impl BoundingBox {
    /// Map a box found on a downsampled image back to full-resolution coordinates.
    pub fn scaled(&self, factor: f32) -> BoundingBox {
        BoundingBox {
            x: self.x * factor,
            y: self.y * factor,
            width: self.width * factor,
            height: self.height * factor,
            confidence: self.confidence,
            landmarks: self
                .landmarks
                .map(|lms| lms.map(|(x, y)| (x * factor, y * factor))),
        }
    }
}

/// Fixed-length face encoding (512-dimensional for ArcFace).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Euclidean distance between two embeddings.
    ///
    /// Embeddings of different lengths are never close: the result is infinite.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        if self.values.len() != other.values.len() {
            return f32::INFINITY;
        }
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }

    /// Elementwise arithmetic mean of a set of equal-length embeddings.
    ///
    /// Returns `None` for an empty set or when the lengths disagree.
    pub fn mean(samples: &[Embedding]) -> Option<Embedding> {
        let first = samples.first()?;
        let dim = first.values.len();
        if samples.iter().any(|s| s.values.len() != dim) {
            return None;
        }

        // Accumulate in f64 so long sample runs do not drift.
        let mut sums = vec![0.0f64; dim];
        for sample in samples {
            for (acc, v) in sums.iter_mut().zip(sample.values.iter()) {
                *acc += f64::from(*v);
            }
        }
        let n = samples.len() as f64;
        Some(Embedding {
            values: sums.into_iter().map(|s| (s / n) as f32).collect(),
        })
    }

    /// Serialize as little-endian `f32` bytes (the persisted encoding format).
    pub fn to_le_bytes(&self) -> Vec<u8> {
        self.values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    /// Parse little-endian `f32` bytes. Returns `None` if the length is not a multiple of 4.
    pub fn from_le_bytes(bytes: &[u8]) -> Option<Embedding> {
        if bytes.len() % 4 != 0 {
            return None;
        }
        let values = bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        Some(Embedding { values })
    }
}

/// A persisted, enrolled person.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub name: String,
    pub encoding: Embedding,
    /// Encoded image bytes of the sample chosen as profile picture.
    #[serde(skip)]
    pub profile_image: Vec<u8>,
    pub enrolled_at: String,
    pub last_seen: String,
    /// Owned by the downstream record keeper; the pipeline only reads it.
    pub total_spent: f64,
}
