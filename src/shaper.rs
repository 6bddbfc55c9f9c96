use crate::{
    error::{FluxError, Result},
    models::{
        GenerationRequest, ImageToImageRequest, ModelTier, ModelVariant, RawGenerationRequest,
        RawImageToImageRequest, IMAGE_TO_IMAGE_MODEL,
    },
};

/// Validates a client request and attaches the extra fields its model tier
/// requires.
pub fn shape(raw: RawGenerationRequest) -> Result<GenerationRequest> {
    let model = raw.model.trim().to_string();
    let tier = ModelTier::from_model(&model)
        .ok_or_else(|| FluxError::ValidationError(format!("Unsupported model: {}", model)))?;

    let prompt = require_prompt(&raw.prompt)?;
    let requested_steps = parse_steps(raw.num_inference_steps.as_deref())?;
    let num_inference_steps = requested_steps.min(tier.max_inference_steps());
    log::debug!(
        "Steps for {} ({} tier): requested {}, validated {}",
        model,
        tier.as_str(),
        requested_steps,
        num_inference_steps
    );

    let variant = match tier {
        ModelTier::Fast => ModelVariant::Fast,
        ModelTier::Dev => ModelVariant::Dev {
            guidance_scale: parse_required_float("guidance_scale", raw.guidance_scale.as_deref())?,
        },
        ModelTier::Pro => ModelVariant::Pro {
            guidance_scale: parse_required_float("guidance_scale", raw.guidance_scale.as_deref())?,
            safety_tolerance: raw.safety_tolerance.filter(|value| !value.is_null()),
        },
    };

    Ok(GenerationRequest {
        model,
        prompt,
        image_size: raw.image_size,
        num_inference_steps,
        num_images: parse_image_count(raw.image_count.as_deref()),
        variant,
    })
}

/// Image-to-image always runs on the dev-tier image-to-image model and
/// produces a single image.
pub fn shape_image_to_image(raw: RawImageToImageRequest) -> Result<ImageToImageRequest> {
    let strength = parse_required_float("strength", raw.strength.as_deref())?;
    if !(0.0..=1.0).contains(&strength) {
        return Err(FluxError::ValidationError(format!(
            "strength must be between 0 and 1, got {}",
            strength
        )));
    }

    let generation = shape(RawGenerationRequest {
        model: IMAGE_TO_IMAGE_MODEL.to_string(),
        prompt: raw.prompt,
        image_size: raw.image_size,
        num_inference_steps: raw.num_inference_steps,
        image_count: None,
        guidance_scale: raw.guidance_scale,
        safety_tolerance: None,
    })?;

    Ok(ImageToImageRequest {
        generation,
        strength,
    })
}

fn require_prompt(prompt: &str) -> Result<String> {
    if prompt.trim().is_empty() {
        return Err(FluxError::ValidationError("prompt is required".into()));
    }
    Ok(prompt.to_string())
}

/// Integer parse that also accepts a decimal string and truncates it.
fn parse_integer(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    raw.parse::<i64>().ok().or_else(|| {
        raw.parse::<f64>()
            .ok()
            .filter(|value| value.is_finite())
            .map(|value| value.trunc() as i64)
    })
}

fn parse_steps(raw: Option<&str>) -> Result<u32> {
    let raw = raw.ok_or_else(|| {
        FluxError::ValidationError("num_inference_steps is required".into())
    })?;
    let steps = parse_integer(raw).ok_or_else(|| {
        FluxError::ValidationError(format!("num_inference_steps is not a number: {:?}", raw))
    })?;
    if steps < 1 {
        return Err(FluxError::ValidationError(format!(
            "num_inference_steps must be at least 1, got {}",
            steps
        )));
    }
    Ok(u32::try_from(steps).unwrap_or(u32::MAX))
}

fn parse_image_count(raw: Option<&str>) -> u32 {
    raw.and_then(parse_integer)
        .filter(|count| *count >= 1)
        .map(|count| u32::try_from(count).unwrap_or(u32::MAX))
        .unwrap_or(1)
}

fn parse_required_float(field: &str, raw: Option<&str>) -> Result<f64> {
    let raw = raw.ok_or_else(|| FluxError::ValidationError(format!("{} is required", field)))?;
    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|value| value.is_finite())
        .ok_or_else(|| FluxError::ValidationError(format!("{} is not a number: {:?}", field, raw)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ImageSize;
    use serde_json::json;

    const FAST: &str = "fal-ai/flux/schnell";
    const DEV: &str = "fal-ai/flux/dev";
    const PRO: &str = "fal-ai/flux-pro";

    fn raw(model: &str, steps: &str) -> RawGenerationRequest {
        RawGenerationRequest {
            model: model.to_string(),
            prompt: "a red fox in the snow".to_string(),
            image_size: Some(ImageSize::Preset("square_hd".into())),
            num_inference_steps: Some(steps.to_string()),
            image_count: None,
            guidance_scale: Some("3.5".to_string()),
            safety_tolerance: Some(json!("2")),
        }
    }

    #[test]
    fn test_step_clamping_by_tier() {
        assert_eq!(shape(raw(FAST, "999")).unwrap().num_inference_steps, 12);
        assert_eq!(shape(raw(DEV, "999")).unwrap().num_inference_steps, 50);
        assert_eq!(shape(raw(PRO, "999")).unwrap().num_inference_steps, 50);
        assert_eq!(shape(raw(FAST, "1")).unwrap().num_inference_steps, 1);
        assert_eq!(shape(raw(PRO, "1")).unwrap().num_inference_steps, 1);
        assert_eq!(shape(raw(PRO, "28")).unwrap().num_inference_steps, 28);
    }

    #[test]
    fn test_steps_below_one_rejected() {
        for steps in ["0", "-4"] {
            let err = shape(raw(DEV, steps)).unwrap_err();
            assert!(matches!(err, FluxError::ValidationError(_)), "{steps}");
        }
    }

    #[test]
    fn test_unparsable_or_missing_steps_rejected() {
        assert!(matches!(
            shape(raw(DEV, "many")).unwrap_err(),
            FluxError::ValidationError(_)
        ));

        let mut request = raw(DEV, "10");
        request.num_inference_steps = None;
        assert!(matches!(shape(request).unwrap_err(), FluxError::ValidationError(_)));
    }

    #[test]
    fn test_decimal_steps_truncate() {
        assert_eq!(shape(raw(DEV, "12.7")).unwrap().num_inference_steps, 12);
    }

    #[test]
    fn test_image_count_defaults_to_one() {
        let mut request = raw(DEV, "20");
        assert_eq!(shape(request.clone()).unwrap().num_images, 1);

        request.image_count = Some("lots".into());
        assert_eq!(shape(request.clone()).unwrap().num_images, 1);

        request.image_count = Some("0".into());
        assert_eq!(shape(request.clone()).unwrap().num_images, 1);

        request.image_count = Some("3".into());
        assert_eq!(shape(request).unwrap().num_images, 3);
    }

    #[test]
    fn test_variant_selection() {
        let dev = shape(raw(DEV, "20")).unwrap();
        assert_eq!(dev.variant, ModelVariant::Dev { guidance_scale: 3.5 });
        let input = dev.to_input();
        assert_eq!(input["guidance_scale"], json!(3.5));
        assert_eq!(input["enable_safety_checker"], json!(false));
        assert!(!input.contains_key("safety_tolerance"));

        let fast = shape(raw(FAST, "4")).unwrap();
        assert_eq!(fast.variant, ModelVariant::Fast);
        let input = fast.to_input();
        assert_eq!(input["enable_safety_checker"], json!(false));
        assert!(!input.contains_key("guidance_scale"));
        assert!(!input.contains_key("safety_tolerance"));

        let pro = shape(raw(PRO, "20")).unwrap();
        let input = pro.to_input();
        assert_eq!(input["guidance_scale"], json!(3.5));
        assert_eq!(input["safety_tolerance"], json!("2"));
        assert!(!input.contains_key("enable_safety_checker"));
    }

    #[test]
    fn test_unknown_model_rejected() {
        let err = shape(raw("fal-ai/unknown", "20")).unwrap_err();
        assert!(err.to_string().contains("Unsupported model"));
    }

    #[test]
    fn test_guidance_required_for_dev_and_pro() {
        for model in [DEV, PRO] {
            let mut request = raw(model, "20");
            request.guidance_scale = None;
            assert!(matches!(shape(request).unwrap_err(), FluxError::ValidationError(_)));

            let mut request = raw(model, "20");
            request.guidance_scale = Some("strong".into());
            assert!(matches!(shape(request).unwrap_err(), FluxError::ValidationError(_)));
        }

        let mut request = raw(FAST, "4");
        request.guidance_scale = None;
        assert!(shape(request).is_ok());
    }

    #[test]
    fn test_blank_prompt_rejected() {
        let mut request = raw(FAST, "4");
        request.prompt = "   ".into();
        assert!(matches!(shape(request).unwrap_err(), FluxError::ValidationError(_)));
    }

    #[test]
    fn test_raw_request_accepts_numbers_and_strings() {
        let request: RawGenerationRequest = serde_json::from_value(json!({
            "model": PRO,
            "prompt": "city at night",
            "image_size": "landscape_16_9",
            "num_inference_steps": 40,
            "image_count": "2",
            "guidance_scale": 3.5,
            "safety_tolerance": "5"
        }))
        .unwrap();
        let shaped = shape(request).unwrap();
        assert_eq!(shaped.num_inference_steps, 40);
        assert_eq!(shaped.num_images, 2);
        assert_eq!(shaped.variant.guidance_scale(), Some(3.5));
    }

    #[test]
    fn test_image_to_image_shaping() {
        let shaped = shape_image_to_image(RawImageToImageRequest {
            prompt: "watercolor version".into(),
            strength: Some("0.85".into()),
            image_size: None,
            num_inference_steps: Some("80".into()),
            guidance_scale: Some("3.5".into()),
        })
        .unwrap();
        assert_eq!(shaped.generation.model, IMAGE_TO_IMAGE_MODEL);
        assert_eq!(shaped.generation.num_inference_steps, 50);
        assert_eq!(shaped.generation.num_images, 1);

        let input = shaped.to_input("https://cdn.example/source.png");
        assert_eq!(input["image_url"], json!("https://cdn.example/source.png"));
        assert_eq!(input["strength"], json!(0.85));
        assert_eq!(input["enable_safety_checker"], json!(false));
    }

    #[test]
    fn test_image_to_image_strength_validated() {
        let base = RawImageToImageRequest {
            prompt: "sketch".into(),
            strength: Some("1.5".into()),
            image_size: None,
            num_inference_steps: Some("20".into()),
            guidance_scale: Some("3.5".into()),
        };
        assert!(matches!(
            shape_image_to_image(base.clone()).unwrap_err(),
            FluxError::ValidationError(_)
        ));

        let missing = RawImageToImageRequest {
            strength: None,
            ..base
        };
        assert!(matches!(
            shape_image_to_image(missing).unwrap_err(),
            FluxError::ValidationError(_)
        ));
    }
}
