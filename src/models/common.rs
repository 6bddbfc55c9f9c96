use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Model tiers known to the request shaper. Each tier has its own step
/// ceiling and its own set of extra backend fields.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ModelTier {
    Fast,
    Dev,
    Pro,
}

pub const FAST_TIER_MODELS: &[&str] = &["fal-ai/flux/schnell"];
pub const DEV_TIER_MODELS: &[&str] = &["fal-ai/flux/dev", IMAGE_TO_IMAGE_MODEL];
pub const PRO_TIER_MODELS: &[&str] = &[
    "fal-ai/flux-pro",
    "fal-ai/flux-pro/new",
    "fal-ai/flux-pro/v1.1",
];

pub const IMAGE_TO_IMAGE_MODEL: &str = "fal-ai/flux/dev/image-to-image";

impl ModelTier {
    pub fn from_model(model_id: &str) -> Option<Self> {
        let model_id = model_id.trim();
        if FAST_TIER_MODELS.contains(&model_id) {
            Some(ModelTier::Fast)
        } else if DEV_TIER_MODELS.contains(&model_id) {
            Some(ModelTier::Dev)
        } else if PRO_TIER_MODELS.contains(&model_id) {
            Some(ModelTier::Pro)
        } else {
            None
        }
    }

    pub fn max_inference_steps(&self) -> u32 {
        match self {
            ModelTier::Fast => 12,
            ModelTier::Dev | ModelTier::Pro => 50,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelTier::Fast => "fast",
            ModelTier::Dev => "dev",
            ModelTier::Pro => "pro",
        }
    }
}

/// Image size descriptor: either a backend preset such as `landscape_4_3`
/// or explicit dimensions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum ImageSize {
    Preset(String),
    Custom { width: u32, height: u32 },
}

/// Accepts a JSON string, number or bool and keeps it as text. Form posts
/// deliver every field as a string while JSON clients send numbers.
pub fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(Value::Null) => None,
        Some(Value::String(text)) => Some(text),
        Some(other) => Some(other.to_string()),
    })
}

/// Keeps an explicit JSON `null` as `Some(Value::Null)`; only a missing
/// field becomes `None`.
pub fn present_value<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

pub fn lenient_u32<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    let value = lenient_u64(deserializer)?;
    u32::try_from(value).map_err(serde::de::Error::custom)
}

pub fn lenient_u64<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Number(number) => number
            .as_u64()
            .ok_or_else(|| serde::de::Error::custom(format!("expected unsigned integer, got {number}"))),
        Value::String(text) => text
            .trim()
            .parse()
            .map_err(|_| serde::de::Error::custom(format!("expected unsigned integer, got {text:?}"))),
        other => Err(serde::de::Error::custom(format!(
            "expected unsigned integer, got {other}"
        ))),
    }
}

pub fn lenient_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(number)) => Ok(number.as_f64()),
        Some(Value::String(text)) => text
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| serde::de::Error::custom(format!("expected number, got {text:?}"))),
        Some(other) => Err(serde::de::Error::custom(format!("expected number, got {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tier_lookup() {
        assert_eq!(ModelTier::from_model("fal-ai/flux/schnell"), Some(ModelTier::Fast));
        assert_eq!(ModelTier::from_model("fal-ai/flux/dev"), Some(ModelTier::Dev));
        assert_eq!(ModelTier::from_model(IMAGE_TO_IMAGE_MODEL), Some(ModelTier::Dev));
        assert_eq!(ModelTier::from_model("fal-ai/flux-pro"), Some(ModelTier::Pro));
        assert_eq!(ModelTier::from_model("fal-ai/stable-diffusion"), None);
    }

    #[test]
    fn test_image_size_untagged() {
        let preset: ImageSize = serde_json::from_value(json!("square_hd")).unwrap();
        assert_eq!(preset, ImageSize::Preset("square_hd".into()));

        let custom: ImageSize = serde_json::from_value(json!({"width": 512, "height": 768})).unwrap();
        assert_eq!(
            custom,
            ImageSize::Custom {
                width: 512,
                height: 768
            }
        );
    }
}
