use super::common::{lenient_f64, lenient_u32, lenient_u64, present_value, ImageSize};
use super::image::{GenerationRequest, ImageToImageRequest};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const PROVENANCE_SCHEMA_VERSION: u32 = 1;

fn default_schema_version() -> u32 {
    PROVENANCE_SCHEMA_VERSION
}

/// Generation parameters embedded in every stored image.
///
/// Records written before `schema_version` existed carry no version and
/// may encode numbers as strings; both are accepted on read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvenanceMetadata {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_size: Option<ImageSize>,
    #[serde(deserialize_with = "lenient_u32")]
    pub num_inference_steps: u32,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient_f64"
    )]
    pub guidance_scale: Option<f64>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "present_value"
    )]
    pub safety_tolerance: Option<Value>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient_f64"
    )]
    pub strength: Option<f64>,
    #[serde(deserialize_with = "lenient_u64")]
    pub seed: u64,
    pub timestamp: DateTime<Utc>,
}

impl ProvenanceMetadata {
    pub fn from_request(request: &GenerationRequest, seed: u64, timestamp: DateTime<Utc>) -> Self {
        Self {
            schema_version: PROVENANCE_SCHEMA_VERSION,
            model: Some(request.model.clone()),
            prompt: request.prompt.clone(),
            image_size: request.image_size.clone(),
            num_inference_steps: request.num_inference_steps,
            guidance_scale: request.variant.guidance_scale(),
            safety_tolerance: request.variant.safety_tolerance().cloned(),
            strength: None,
            seed,
            timestamp,
        }
    }

    pub fn from_image_to_image(
        request: &ImageToImageRequest,
        seed: u64,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            strength: Some(request.strength),
            ..Self::from_request(&request.generation, seed, timestamp)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::image::ModelVariant;
    use serde_json::json;

    fn pro_request() -> GenerationRequest {
        GenerationRequest {
            model: "fal-ai/flux-pro".into(),
            prompt: "a lighthouse at dusk".into(),
            image_size: Some(ImageSize::Preset("landscape_4_3".into())),
            num_inference_steps: 40,
            num_images: 2,
            variant: ModelVariant::Pro {
                guidance_scale: 3.5,
                safety_tolerance: Some(json!("2")),
            },
        }
    }

    #[test]
    fn test_from_request_copies_variant_fields() {
        let provenance = ProvenanceMetadata::from_request(&pro_request(), 42, Utc::now());
        assert_eq!(provenance.model.as_deref(), Some("fal-ai/flux-pro"));
        assert_eq!(provenance.num_inference_steps, 40);
        assert_eq!(provenance.guidance_scale, Some(3.5));
        assert_eq!(provenance.safety_tolerance, Some(json!("2")));
        assert_eq!(provenance.strength, None);
        assert_eq!(provenance.seed, 42);
    }

    #[test]
    fn test_fast_request_omits_optional_fields() {
        let mut request = pro_request();
        request.variant = ModelVariant::Fast;
        let provenance = ProvenanceMetadata::from_request(&request, 1, Utc::now());
        let value = serde_json::to_value(&provenance).unwrap();
        assert!(value.get("guidance_scale").is_none());
        assert!(value.get("safety_tolerance").is_none());
        assert!(value.get("strength").is_none());
    }

    #[test]
    fn test_reads_unversioned_record_with_string_numbers() {
        let raw = json!({
            "prompt": "old record",
            "strength": "0.85",
            "image_size": "square_hd",
            "num_inference_steps": "28",
            "guidance_scale": "3.5",
            "seed": 1234,
            "timestamp": "2024-08-20T10:00:00.000Z"
        });
        let provenance: ProvenanceMetadata = serde_json::from_value(raw).unwrap();
        assert_eq!(provenance.schema_version, PROVENANCE_SCHEMA_VERSION);
        assert_eq!(provenance.model, None);
        assert_eq!(provenance.num_inference_steps, 28);
        assert_eq!(provenance.guidance_scale, Some(3.5));
        assert_eq!(provenance.strength, Some(0.85));
    }
}
