use super::common::{lenient_string, ImageSize, ModelTier};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Generation request exactly as a client posted it.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawGenerationRequest {
    pub model: String,
    pub prompt: String,
    #[serde(default)]
    pub image_size: Option<ImageSize>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub num_inference_steps: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub image_count: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub guidance_scale: Option<String>,
    #[serde(default)]
    pub safety_tolerance: Option<Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawImageToImageRequest {
    pub prompt: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub strength: Option<String>,
    #[serde(default)]
    pub image_size: Option<ImageSize>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub num_inference_steps: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub guidance_scale: Option<String>,
}

/// Extra backend fields, one shape per model tier.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelVariant {
    Fast,
    Dev {
        guidance_scale: f64,
    },
    Pro {
        guidance_scale: f64,
        safety_tolerance: Option<Value>,
    },
}

impl ModelVariant {
    pub fn tier(&self) -> ModelTier {
        match self {
            ModelVariant::Fast => ModelTier::Fast,
            ModelVariant::Dev { .. } => ModelTier::Dev,
            ModelVariant::Pro { .. } => ModelTier::Pro,
        }
    }

    pub fn guidance_scale(&self) -> Option<f64> {
        match self {
            ModelVariant::Fast => None,
            ModelVariant::Dev { guidance_scale } | ModelVariant::Pro { guidance_scale, .. } => {
                Some(*guidance_scale)
            }
        }
    }

    pub fn safety_tolerance(&self) -> Option<&Value> {
        match self {
            ModelVariant::Pro {
                safety_tolerance, ..
            } => safety_tolerance.as_ref(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub model: String,
    pub prompt: String,
    pub image_size: Option<ImageSize>,
    pub num_inference_steps: u32,
    pub num_images: u32,
    pub variant: ModelVariant,
}

impl GenerationRequest {
    pub fn tier(&self) -> ModelTier {
        self.variant.tier()
    }

    /// Backend input payload for this request.
    pub fn to_input(&self) -> Map<String, Value> {
        let mut input = Map::new();
        input.insert("prompt".to_string(), Value::String(self.prompt.clone()));
        if let Some(size) = &self.image_size {
            input.insert("image_size".to_string(), json!(size));
        }
        input.insert(
            "num_inference_steps".to_string(),
            json!(self.num_inference_steps),
        );
        input.insert("num_images".to_string(), json!(self.num_images));

        match &self.variant {
            ModelVariant::Fast => {
                input.insert("enable_safety_checker".to_string(), Value::Bool(false));
            }
            ModelVariant::Dev { guidance_scale } => {
                input.insert("guidance_scale".to_string(), json!(guidance_scale));
                input.insert("enable_safety_checker".to_string(), Value::Bool(false));
            }
            ModelVariant::Pro {
                guidance_scale,
                safety_tolerance,
            } => {
                input.insert("guidance_scale".to_string(), json!(guidance_scale));
                if let Some(tolerance) = safety_tolerance {
                    input.insert("safety_tolerance".to_string(), tolerance.clone());
                }
            }
        }
        input
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImageToImageRequest {
    pub generation: GenerationRequest,
    pub strength: f64,
}

impl ImageToImageRequest {
    pub fn to_input(&self, image_url: &str) -> Map<String, Value> {
        let mut input = self.generation.to_input();
        input.insert("image_url".to_string(), Value::String(image_url.to_string()));
        input.insert("strength".to_string(), json!(self.strength));
        input
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageDescriptor {
    pub url: String,
    pub seed: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationOutput {
    pub images: Vec<ImageDescriptor>,
    pub seed: u64,
}

/// Caller-facing handle to a stored image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageReference {
    pub filename: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GalleryEntry {
    pub filename: String,
    pub url: String,
    pub created_at: DateTime<Utc>,
}

// fal queue wire types

#[derive(Debug, Clone, Deserialize)]
pub struct QueueSubmitResponse {
    pub request_id: String,
    #[serde(default)]
    pub status_url: Option<String>,
    #[serde(default)]
    pub response_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueueLogEntry {
    pub message: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueueStatusResponse {
    pub status: String,
    #[serde(default)]
    pub queue_position: Option<u64>,
    #[serde(default)]
    pub logs: Option<Vec<QueueLogEntry>>,
    #[serde(default)]
    pub error: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FalImage {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FalResultResponse {
    pub images: Vec<FalImage>,
    pub seed: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UploadInitiateResponse {
    pub upload_url: String,
    pub file_url: String,
}
