//! Conversion of provider output into canonical models
//!
//! Every client funnels its result through one of the builders here, which
//! fill in the derived fields (measurements, physics, materials) the request
//! options ask for and validate the mesh invariants before the model is
//! returned.

use crate::analysis::{BodyAnalysis, ClothingAnalysis};
use crate::request::{BodyOptions, ClothingOptions};
use crate::synth;
use drape_core::{
    BodyMeasurements, BodyModel, ClothingModel, DrapeError, GeometrySource,
    Mesh, Model3D, ModelBase, PhysicsProperties, ProviderKind, Result,
};
use drape_import::{import_glb, import_ply, ImportResult, ModelFormat};
use std::f32::consts::PI;
use tracing::debug;

/// Half-height of the horizontal slab sampled for a girth, as a fraction of height
const BAND_HALF_WIDTH: f32 = 0.02;
const CHEST_LEVEL: f32 = 0.72;
const WAIST_LEVEL: f32 = 0.6;
const HIPS_LEVEL: f32 = 0.5;
const SHOULDER_LEVEL: f32 = 0.82;

/// Decode a downloaded model binary, sniffing GLB vs PLY from its header
pub fn decode(provider: ProviderKind, bytes: &[u8]) -> Result<ImportResult> {
    match ModelFormat::detect(bytes) {
        Some(ModelFormat::Glb) => import_glb(bytes),
        Some(ModelFormat::Ply) => import_ply(bytes),
        None => Err(DrapeError::invalid_response(
            provider.as_str(),
            format!("unrecognized model payload ({} bytes)", bytes.len()),
        )),
    }
}

fn base_from_import(
    provider: ProviderKind,
    import: &ImportResult,
    geometry: GeometrySource,
    source_url: Option<&str>,
) -> ModelBase {
    let mut base = ModelBase::new(provider, import.mesh.clone(), geometry);
    base.source_url = source_url.map(str::to_string);
    base.content_hash = Some(import.content_hash.to_prefixed_hex());
    base
}

/// Body model from decoded provider geometry
pub fn body_from_import(
    provider: ProviderKind,
    import: ImportResult,
    geometry: GeometrySource,
    source_url: Option<&str>,
    options: &BodyOptions,
) -> Result<Model3D> {
    let base = base_from_import(provider, &import, geometry, source_url);
    let measurements = if options.generate_measurements {
        let estimated = estimate_measurements(&base.mesh);
        if estimated.is_none() {
            debug!(%provider, "mesh too sparse to estimate measurements");
        }
        estimated
    } else {
        None
    };
    finish(Model3D::Body(BodyModel {
        base,
        measurements,
        skeleton: import.skeleton,
    }))
}

/// Clothing model from decoded provider geometry
pub fn clothing_from_import(
    provider: ProviderKind,
    import: ImportResult,
    geometry: GeometrySource,
    source_url: Option<&str>,
    options: &ClothingOptions,
) -> Result<Model3D> {
    let base = base_from_import(provider, &import, geometry, source_url);
    finish(Model3D::Clothing(ClothingModel {
        base,
        category: options.category,
        materials: if options.extract_material {
            import.materials
        } else {
            Vec::new()
        },
        physics_properties: physics_for(options),
    }))
}

/// Body model with placeholder geometry built from a vision analysis
pub fn synthesized_body(
    provider: ProviderKind,
    analysis: &BodyAnalysis,
    options: &BodyOptions,
) -> Result<Model3D> {
    let m = analysis.measurements;
    let mesh = synth::body_mesh(&m);
    let skeleton = synth::skeleton_from_keypoints(&analysis.keypoints, m.height / 100.0);
    finish(Model3D::Body(BodyModel {
        base: ModelBase::new(provider, mesh, GeometrySource::Synthesized),
        measurements: options.generate_measurements.then_some(m),
        skeleton,
    }))
}

/// Clothing model with placeholder geometry built from a vision analysis.
/// The requested category wins over the one the model guessed.
pub fn synthesized_clothing(
    provider: ProviderKind,
    analysis: &ClothingAnalysis,
    options: &ClothingOptions,
) -> Result<Model3D> {
    if let Some(guess) = analysis.category {
        if guess != options.category {
            debug!(%provider, requested = %options.category, analyzed = %guess, "category mismatch");
        }
    }
    let mesh = synth::clothing_mesh(options.category, &analysis.dimensions);
    finish(Model3D::Clothing(ClothingModel {
        base: ModelBase::new(provider, mesh, GeometrySource::Synthesized),
        category: options.category,
        materials: if options.extract_material {
            analysis.materials.iter().map(|m| m.to_material()).collect()
        } else {
            Vec::new()
        },
        physics_properties: physics_for(options),
    }))
}

fn physics_for(options: &ClothingOptions) -> Option<PhysicsProperties> {
    options
        .generate_physics
        .then(|| PhysicsProperties::for_category(options.category))
}

/// Validate before the model leaves a client
pub fn finish(model: Model3D) -> Result<Model3D> {
    model.validate()?;
    if model.mesh().is_empty() {
        return Err(DrapeError::InvalidModel("model has no vertices".to_string()));
    }
    Ok(model)
}

/// Estimate body measurements from a Y-up mesh in metres.
///
/// Height is the vertical extent. Girths are ellipse perimeters of horizontal
/// slabs at fixed fractions of the height; shoulder width is the lateral
/// extent of the shoulder slab. Returns `None` if any slab has no vertices.
pub fn estimate_measurements(mesh: &Mesh) -> Option<BodyMeasurements> {
    let bounds = mesh.bounds()?;
    let height = bounds.max[1] - bounds.min[1];
    if height <= 0.0 {
        return None;
    }

    let band = |level: f32| -> Option<(f32, f32)> {
        let center = bounds.min[1] + level * height;
        let half = BAND_HALF_WIDTH * height;
        let mut x = (f32::INFINITY, f32::NEG_INFINITY);
        let mut z = (f32::INFINITY, f32::NEG_INFINITY);
        let mut any = false;
        for [px, py, pz] in mesh.positions() {
            if (py - center).abs() <= half {
                any = true;
                x = (x.0.min(px), x.1.max(px));
                z = (z.0.min(pz), z.1.max(pz));
            }
        }
        any.then(|| ((x.1 - x.0) / 2.0, (z.1 - z.0) / 2.0))
    };

    let (chest_a, chest_b) = band(CHEST_LEVEL)?;
    let (waist_a, waist_b) = band(WAIST_LEVEL)?;
    let (hips_a, hips_b) = band(HIPS_LEVEL)?;
    let (shoulder_a, _) = band(SHOULDER_LEVEL)?;

    let cm = |m: f32| m * 100.0;
    Some(BodyMeasurements {
        height: cm(height),
        chest: cm(ellipse_perimeter(chest_a, chest_b)),
        waist: cm(ellipse_perimeter(waist_a, waist_b)),
        hips: cm(ellipse_perimeter(hips_a, hips_b)),
        shoulder_width: cm(shoulder_a * 2.0),
    })
}

/// Ramanujan's first approximation
fn ellipse_perimeter(a: f32, b: f32) -> f32 {
    PI * (3.0 * (a + b) - ((3.0 * a + b) * (a + 3.0 * b)).sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{GarmentDimensions, Keypoint, MaterialAnalysis};
    use drape_core::ClothingCategory;
    use drape_import::export_glb;

    fn measurements() -> BodyMeasurements {
        BodyMeasurements {
            height: 170.0,
            chest: 92.0,
            waist: 78.0,
            hips: 100.0,
            shoulder_width: 42.0,
        }
    }

    #[test]
    fn test_decode_rejects_unknown_payload() {
        let err = decode(ProviderKind::Replicate, b"{\"detail\":\"not found\"}").unwrap_err();
        assert!(matches!(err, DrapeError::InvalidResponse { .. }));
    }

    #[test]
    fn test_body_from_glb_estimates_measurements() {
        let mesh = synth::body_mesh(&measurements());
        let glb = export_glb(&mesh).unwrap();
        let import = decode(ProviderKind::Replicate, &glb).unwrap();

        let model = body_from_import(
            ProviderKind::Replicate,
            import,
            GeometrySource::Reconstructed,
            Some("https://replicate.delivery/out.glb"),
            &BodyOptions::default(),
        )
        .unwrap();

        let Model3D::Body(body) = model else {
            panic!("expected body model");
        };
        assert_eq!(body.base.source_url.as_deref(), Some("https://replicate.delivery/out.glb"));
        assert!(body.base.content_hash.unwrap().starts_with("sha256:"));
        let m = body.measurements.unwrap();
        assert!((m.height - 170.0).abs() < 0.5);
        // the lathe rings sit exactly on the sampled levels
        assert!((m.chest - 92.0).abs() < 1.0, "chest {}", m.chest);
        assert!((m.hips - 100.0).abs() < 1.0, "hips {}", m.hips);
        assert!((m.shoulder_width - 42.0).abs() < 1.0);
    }

    #[test]
    fn test_measurements_skipped_when_not_requested() {
        let glb = export_glb(&synth::body_mesh(&measurements())).unwrap();
        let options = BodyOptions {
            generate_measurements: false,
            ..BodyOptions::default()
        };
        let model = body_from_import(
            ProviderKind::Stability,
            decode(ProviderKind::Stability, &glb).unwrap(),
            GeometrySource::Reconstructed,
            None,
            &options,
        )
        .unwrap();
        assert!(matches!(model, Model3D::Body(BodyModel { measurements: None, .. })));
    }

    #[test]
    fn test_clothing_options_control_physics_and_materials() {
        let glb = export_glb(&synth::clothing_mesh(
            ClothingCategory::Dress,
            &synth::default_dimensions(ClothingCategory::Dress),
        ))
        .unwrap();

        let mut options = ClothingOptions::new(ClothingCategory::Dress);
        options.generate_physics = true;
        let model = clothing_from_import(
            ProviderKind::Stability,
            decode(ProviderKind::Stability, &glb).unwrap(),
            GeometrySource::Reconstructed,
            None,
            &options,
        )
        .unwrap();
        let Model3D::Clothing(clothing) = model else {
            panic!("expected clothing model");
        };
        assert_eq!(clothing.category, ClothingCategory::Dress);
        assert_eq!(
            clothing.physics_properties,
            Some(PhysicsProperties::for_category(ClothingCategory::Dress))
        );
    }

    #[test]
    fn test_synthesized_body_is_flagged() {
        let analysis = BodyAnalysis {
            measurements: measurements(),
            keypoints: vec![
                Keypoint { name: "pelvis".into(), x: 0.5, y: 0.5, z: 0.0 },
                Keypoint { name: "neck".into(), x: 0.5, y: 0.2, z: 0.0 },
            ],
        };
        let model =
            synthesized_body(ProviderKind::OpenAi, &analysis, &BodyOptions::default()).unwrap();
        assert_eq!(model.base().geometry, GeometrySource::Synthesized);
        let Model3D::Body(body) = model else {
            panic!("expected body model");
        };
        assert_eq!(body.measurements, Some(measurements()));
        assert_eq!(body.skeleton.unwrap().bones.len(), 1);
    }

    #[test]
    fn test_synthesized_clothing_uses_requested_category() {
        let analysis = ClothingAnalysis {
            category: Some(ClothingCategory::Top),
            dimensions: GarmentDimensions { width: 50.0, length: 70.0 },
            materials: vec![MaterialAnalysis {
                name: "cotton".into(),
                roughness: 0.8,
                metallic: 0.0,
                color: None,
            }],
        };
        let options = ClothingOptions::new(ClothingCategory::Outerwear);
        let model = synthesized_clothing(ProviderKind::OpenAi, &analysis, &options).unwrap();
        let Model3D::Clothing(clothing) = model else {
            panic!("expected clothing model");
        };
        assert_eq!(clothing.category, ClothingCategory::Outerwear);
        assert_eq!(clothing.materials[0].name, "cotton");
        assert!(clothing.physics_properties.is_none());
    }

    #[test]
    fn test_finish_rejects_broken_mesh() {
        let base = ModelBase::new(
            ProviderKind::Luma,
            Mesh {
                vertices: vec![0.0; 9],
                faces: vec![0, 1, 7],
                ..Mesh::default()
            },
            GeometrySource::Reconstructed,
        );
        let model = Model3D::Clothing(ClothingModel {
            base,
            category: ClothingCategory::Top,
            materials: Vec::new(),
            physics_properties: None,
        });
        assert!(matches!(finish(model), Err(DrapeError::InvalidModel(_))));
    }

    #[test]
    fn test_sparse_mesh_has_no_measurements() {
        let mesh = Mesh {
            vertices: vec![0.0, 0.0, 0.0, 0.0, 1.0, 0.0],
            ..Mesh::default()
        };
        assert!(estimate_measurements(&mesh).is_none());
    }
}
