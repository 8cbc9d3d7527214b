//! Strict parsing of vision-model analysis payloads
//!
//! Chat-completion providers return the analysis as JSON text nested inside
//! the response envelope (`choices[0].message.content`). That text is parsed
//! into typed structs and range-checked here; anything malformed or out of
//! range is rejected as [`DrapeError::InvalidResponse`] so partial data never
//! reaches the canonical model.

use drape_core::{BodyMeasurements, ClothingCategory, DrapeError, Material, ProviderKind, Result};
use serde::Deserialize;
use serde_json::Value;
use std::ops::RangeInclusive;

const HEIGHT_CM: RangeInclusive<f32> = 50.0..=250.0;
const GIRTH_CM: RangeInclusive<f32> = 30.0..=250.0;
const SHOULDER_CM: RangeInclusive<f32> = 20.0..=80.0;
const GARMENT_CM: RangeInclusive<f32> = 1.0..=300.0;

/// Instruction sent with body photos
pub const BODY_PROMPT: &str = "Analyze the person in these photos. Respond with a JSON object only: \
{\"measurements\": {\"height\": cm, \"chest\": cm, \"waist\": cm, \"hips\": cm, \"shoulder_width\": cm}, \
\"keypoints\": [{\"name\": string, \"x\": number, \"y\": number, \"z\": number}]}. \
Keypoint coordinates are normalized to [0, 1] with y pointing down the image.";

/// Instruction sent with a garment photo
pub const CLOTHING_PROMPT: &str = "Analyze the garment in this photo. Respond with a JSON object only: \
{\"category\": one of top|bottom|dress|outerwear|shoes|accessory, \
\"dimensions\": {\"width\": cm, \"length\": cm}, \
\"materials\": [{\"name\": string, \"roughness\": 0-1, \"metallic\": 0-1, \"color\": [r, g, b] in 0-1]}]}.";

/// A named landmark in normalized image space
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Keypoint {
    pub name: String,
    pub x: f32,
    pub y: f32,
    #[serde(default)]
    pub z: f32,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BodyAnalysis {
    pub measurements: BodyMeasurements,
    #[serde(default)]
    pub keypoints: Vec<Keypoint>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct GarmentDimensions {
    pub width: f32,
    pub length: f32,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MaterialAnalysis {
    pub name: String,
    pub roughness: f32,
    pub metallic: f32,
    #[serde(default)]
    pub color: Option<[f32; 3]>,
}

impl MaterialAnalysis {
    pub fn to_material(&self) -> Material {
        let mut material = Material::new(self.name.clone(), self.roughness, self.metallic);
        if let Some([r, g, b]) = self.color {
            material.base_color = [r, g, b, 1.0];
        }
        material
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ClothingAnalysis {
    #[serde(default)]
    pub category: Option<ClothingCategory>,
    pub dimensions: GarmentDimensions,
    #[serde(default)]
    pub materials: Vec<MaterialAnalysis>,
}

/// Pull the generated text out of a chat-completion response
pub fn completion_content(provider: ProviderKind, response: &Value) -> Result<&str> {
    response
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(Value::as_str)
        .ok_or_else(|| {
            DrapeError::invalid_response(provider.as_str(), "missing choices[0].message.content")
        })
}

impl BodyAnalysis {
    pub fn parse(provider: ProviderKind, content: &str) -> Result<Self> {
        let analysis: BodyAnalysis = parse_json(provider, content)?;
        let m = &analysis.measurements;
        check_range(provider, "height", m.height, &HEIGHT_CM)?;
        check_range(provider, "chest", m.chest, &GIRTH_CM)?;
        check_range(provider, "waist", m.waist, &GIRTH_CM)?;
        check_range(provider, "hips", m.hips, &GIRTH_CM)?;
        check_range(provider, "shoulder_width", m.shoulder_width, &SHOULDER_CM)?;
        for kp in &analysis.keypoints {
            if kp.name.trim().is_empty() {
                return Err(DrapeError::invalid_response(
                    provider.as_str(),
                    "keypoint without a name",
                ));
            }
            for (axis, v) in [("x", kp.x), ("y", kp.y), ("z", kp.z)] {
                if !v.is_finite() {
                    return Err(DrapeError::invalid_response(
                        provider.as_str(),
                        format!("keypoint '{}' has non-finite {}", kp.name, axis),
                    ));
                }
            }
        }
        Ok(analysis)
    }
}

impl ClothingAnalysis {
    pub fn parse(provider: ProviderKind, content: &str) -> Result<Self> {
        let analysis: ClothingAnalysis = parse_json(provider, content)?;
        check_range(provider, "dimensions.width", analysis.dimensions.width, &GARMENT_CM)?;
        check_range(provider, "dimensions.length", analysis.dimensions.length, &GARMENT_CM)?;
        for material in &analysis.materials {
            if material.name.trim().is_empty() {
                return Err(DrapeError::invalid_response(
                    provider.as_str(),
                    "material without a name",
                ));
            }
            check_range(provider, "roughness", material.roughness, &(0.0..=1.0))?;
            check_range(provider, "metallic", material.metallic, &(0.0..=1.0))?;
            if let Some(color) = material.color {
                for c in color {
                    check_range(provider, "color", c, &(0.0..=1.0))?;
                }
            }
        }
        Ok(analysis)
    }
}

fn parse_json<T: for<'de> Deserialize<'de>>(provider: ProviderKind, content: &str) -> Result<T> {
    serde_json::from_str(content).map_err(|e| {
        DrapeError::invalid_response(
            provider.as_str(),
            format!("analysis is not valid JSON of the expected shape: {}", e),
        )
    })
}

fn check_range(
    provider: ProviderKind,
    field: &str,
    value: f32,
    range: &RangeInclusive<f32>,
) -> Result<()> {
    if value.is_finite() && range.contains(&value) {
        Ok(())
    } else {
        Err(DrapeError::invalid_response(
            provider.as_str(),
            format!(
                "{} = {} outside {}..={}",
                field,
                value,
                range.start(),
                range.end()
            ),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const P: ProviderKind = ProviderKind::OpenAi;

    #[test]
    fn test_completion_content() {
        let response = json!({"choices": [{"message": {"role": "assistant", "content": "{}"}}]});
        assert_eq!(completion_content(P, &response).unwrap(), "{}");

        let empty = json!({"choices": []});
        assert!(matches!(
            completion_content(P, &empty),
            Err(DrapeError::InvalidResponse { .. })
        ));
    }

    #[test]
    fn test_parse_body() {
        let content = r#"{
            "measurements": {"height": 175, "chest": 96, "waist": 82, "hips": 98, "shoulder_width": 45},
            "keypoints": [{"name": "neck", "x": 0.5, "y": 0.18}]
        }"#;
        let analysis = BodyAnalysis::parse(P, content).unwrap();
        assert_eq!(analysis.measurements.height, 175.0);
        assert_eq!(analysis.keypoints[0].z, 0.0);
    }

    #[test]
    fn test_body_missing_field_fails_closed() {
        let content = r#"{"measurements": {"height": 175, "chest": 96, "waist": 82, "hips": 98}}"#;
        assert!(matches!(
            BodyAnalysis::parse(P, content),
            Err(DrapeError::InvalidResponse { .. })
        ));
    }

    #[test]
    fn test_body_out_of_range_fails_closed() {
        let content = r#"{"measurements": {"height": 1750, "chest": 96, "waist": 82,
            "hips": 98, "shoulder_width": 45}}"#;
        let err = BodyAnalysis::parse(P, content).unwrap_err();
        assert!(err.to_string().contains("height"));
    }

    #[test]
    fn test_not_json_fails_closed() {
        assert!(BodyAnalysis::parse(P, "The person is about 175cm tall.").is_err());
        assert!(ClothingAnalysis::parse(P, "```json\n{}\n```").is_err());
    }

    #[test]
    fn test_parse_clothing() {
        let content = r#"{
            "category": "outerwear",
            "dimensions": {"width": 55, "length": 70},
            "materials": [{"name": "wool", "roughness": 0.9, "metallic": 0.0, "color": [0.2, 0.2, 0.3]}]
        }"#;
        let analysis = ClothingAnalysis::parse(P, content).unwrap();
        assert_eq!(analysis.category, Some(ClothingCategory::Outerwear));
        let material = analysis.materials[0].to_material();
        assert_eq!(material.base_color, [0.2, 0.2, 0.3, 1.0]);
    }

    #[test]
    fn test_clothing_bad_material_fails_closed() {
        let content = r#"{
            "dimensions": {"width": 55, "length": 70},
            "materials": [{"name": "chrome", "roughness": 0.1, "metallic": 4.0}]
        }"#;
        assert!(ClothingAnalysis::parse(P, content).is_err());
    }
}
