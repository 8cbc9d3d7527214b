//! glTF/GLB decoding and encoding

use crate::types::{ImportResult, ModelFormat};
use drape_core::{Bone, ContentHash, DrapeError, Joint, Material, Mesh, Result, Skeleton};
use std::collections::HashMap;

const GLB_MAGIC: &[u8; 4] = b"glTF";
const CHUNK_JSON: u32 = 0x4E4F_534A;
const CHUNK_BIN: u32 = 0x004E_4942;

/// Decode a GLB (or self-contained glTF) payload into canonical geometry
pub fn import_glb(bytes: &[u8]) -> Result<ImportResult> {
    let (document, buffers, _images) = gltf::import_slice(bytes)
        .map_err(|e| DrapeError::Import(format!("Failed to import glTF: {}", e)))?;

    let mut mesh = Mesh::default();
    let mut primitive_count = 0usize;

    for gltf_mesh in document.meshes() {
        for primitive in gltf_mesh.primitives() {
            let reader = primitive.reader(|buffer| Some(&buffers[buffer.index()]));

            let positions: Vec<[f32; 3]> = reader
                .read_positions()
                .map(|iter| iter.collect())
                .unwrap_or_default();
            if positions.is_empty() {
                continue;
            }

            let normals: Vec<[f32; 3]> = reader
                .read_normals()
                .map(|iter| iter.collect())
                .unwrap_or_default();

            let uvs: Vec<[f32; 2]> = reader
                .read_tex_coords(0)
                .map(|iter| iter.into_f32().collect())
                .unwrap_or_default();

            let indices: Vec<u32> = match reader.read_indices() {
                Some(iter) => iter.into_u32().collect(),
                None if primitive.mode() == gltf::mesh::Mode::Triangles => {
                    (0..positions.len() as u32).collect()
                }
                None => Vec::new(),
            };

            let part = Mesh {
                vertices: positions.iter().flatten().copied().collect(),
                faces: triangle_indices(primitive.mode(), &indices),
                normals: if normals.len() == positions.len() {
                    normals.iter().flatten().copied().collect()
                } else {
                    Vec::new()
                },
                uv_coordinates: if uvs.len() == positions.len() {
                    uvs.iter().flatten().copied().collect()
                } else {
                    Vec::new()
                },
            };
            mesh.append(&part);
            primitive_count += 1;
        }
    }

    mesh.validate()?;

    let materials = document
        .materials()
        .map(|material| {
            let pbr = material.pbr_metallic_roughness();
            let name = material
                .name()
                .map(String::from)
                .unwrap_or_else(|| format!("material_{}", material.index().unwrap_or(0)));
            let diffuse_map = pbr.base_color_texture().map(|info| texture_name(&info.texture()));
            let normal_map = material.normal_texture().map(|info| texture_name(&info.texture()));

            Material {
                name,
                diffuse_map,
                normal_map,
                roughness: pbr.roughness_factor(),
                metallic: pbr.metallic_factor(),
                base_color: pbr.base_color_factor(),
            }
        })
        .collect();

    let skeleton = document.skins().next().map(|skin| skeleton_from_skin(&document, &skin));

    Ok(ImportResult {
        format: ModelFormat::Glb,
        mesh,
        materials,
        skeleton,
        primitive_count,
        content_hash: ContentHash::from_bytes(bytes),
    })
}

fn texture_name(texture: &gltf::Texture<'_>) -> String {
    texture
        .name()
        .map(String::from)
        .unwrap_or_else(|| format!("texture_{}", texture.index()))
}

/// Convert primitive indices into a flat triangle list
fn triangle_indices(mode: gltf::mesh::Mode, indices: &[u32]) -> Vec<u32> {
    use gltf::mesh::Mode;
    match mode {
        Mode::Triangles => {
            let whole = indices.len() - indices.len() % 3;
            indices[..whole].to_vec()
        }
        Mode::TriangleStrip => indices
            .windows(3)
            .enumerate()
            .flat_map(|(i, w)| {
                if i % 2 == 0 {
                    [w[0], w[1], w[2]]
                } else {
                    [w[1], w[0], w[2]]
                }
            })
            .collect(),
        Mode::TriangleFan => match indices.split_first() {
            Some((&hub, rest)) => rest.windows(2).flat_map(|w| [hub, w[0], w[1]]).collect(),
            None => Vec::new(),
        },
        // points and lines carry no surface
        _ => Vec::new(),
    }
}

/// Build a bone hierarchy from a glTF skin.
///
/// Joint positions accumulate parent translations only; rotations and scales
/// in the node chain are ignored.
fn skeleton_from_skin(document: &gltf::Document, skin: &gltf::Skin<'_>) -> Skeleton {
    let mut parent_of: HashMap<usize, usize> = HashMap::new();
    for node in document.nodes() {
        for child in node.children() {
            parent_of.insert(child.index(), node.index());
        }
    }
    let translations: HashMap<usize, [f32; 3]> = document
        .nodes()
        .map(|n| (n.index(), n.transform().decomposed().0))
        .collect();

    let skin_joints: Vec<gltf::Node<'_>> = skin.joints().collect();
    let joint_slot: HashMap<usize, usize> = skin_joints
        .iter()
        .enumerate()
        .map(|(slot, node)| (node.index(), slot))
        .collect();

    let world_position = |node: usize| {
        let mut pos = [0.0f32; 3];
        for n in std::iter::once(node).chain(ancestors(&parent_of, node)) {
            let t = translations.get(&n).copied().unwrap_or([0.0; 3]);
            for i in 0..3 {
                pos[i] += t[i];
            }
        }
        pos
    };

    let joints: Vec<Joint> = skin_joints
        .iter()
        .map(|node| Joint {
            name: node
                .name()
                .map(String::from)
                .unwrap_or_else(|| format!("joint_{}", node.index())),
            position: world_position(node.index()),
        })
        .collect();

    // Parent joint within the skin, by slot
    let joint_parent: Vec<Option<usize>> = skin_joints
        .iter()
        .map(|node| {
            ancestors(&parent_of, node.index()).find_map(|n| joint_slot.get(&n).copied())
        })
        .collect();

    let depth = |mut slot: usize| {
        let mut d = 0usize;
        while let Some(p) = joint_parent[slot] {
            d += 1;
            slot = p;
            if d > joint_parent.len() {
                break;
            }
        }
        d
    };
    let mut order: Vec<usize> = (0..skin_joints.len()).collect();
    order.sort_by_key(|&slot| depth(slot));

    // One bone per parent->child joint pair, parents emitted first
    let mut bones: Vec<Bone> = Vec::new();
    let mut bone_ending_at: HashMap<usize, usize> = HashMap::new();
    for slot in order {
        if let Some(parent_slot) = joint_parent[slot] {
            let parent_bone = bone_ending_at.get(&parent_slot).copied();
            bone_ending_at.insert(slot, bones.len());
            bones.push(Bone {
                name: joints[slot].name.clone(),
                parent: parent_bone,
                head: parent_slot,
                tail: slot,
            });
        }
    }

    Skeleton { bones, joints }
}

/// Walk up the node hierarchy. Stops after as many steps as there are
/// parent links, so a cyclic graph cannot loop forever.
fn ancestors(parent_of: &HashMap<usize, usize>, node: usize) -> impl Iterator<Item = usize> + '_ {
    std::iter::successors(parent_of.get(&node).copied(), |n| parent_of.get(n).copied())
        .take(parent_of.len())
}

/// Encode a canonical mesh as a GLB binary.
///
/// Meshes without faces are written as a point primitive.
pub fn export_glb(mesh: &Mesh) -> Result<Vec<u8>> {
    mesh.validate()?;
    let bounds = mesh
        .bounds()
        .ok_or_else(|| DrapeError::InvalidModel("cannot export an empty mesh".to_string()))?;
    let count = mesh.vertex_count();

    let mut bin: Vec<u8> = Vec::new();
    let mut views: Vec<serde_json::Value> = Vec::new();
    let mut accessors: Vec<serde_json::Value> = Vec::new();
    let mut attributes = serde_json::Map::new();

    let mut push_view = |bin: &mut Vec<u8>, data: Vec<u8>, target: u32| {
        let offset = bin.len();
        let len = data.len();
        bin.extend_from_slice(&data);
        views.push(serde_json::json!({
            "buffer": 0, "byteOffset": offset, "byteLength": len, "target": target
        }));
        views.len() - 1
    };

    let view = push_view(&mut bin, f32_bytes(&mesh.vertices), 34962);
    attributes.insert("POSITION".to_string(), serde_json::json!(accessors.len()));
    accessors.push(serde_json::json!({
        "bufferView": view, "componentType": 5126, "count": count, "type": "VEC3",
        "min": bounds.min, "max": bounds.max
    }));

    if !mesh.normals.is_empty() {
        let view = push_view(&mut bin, f32_bytes(&mesh.normals), 34962);
        attributes.insert("NORMAL".to_string(), serde_json::json!(accessors.len()));
        accessors.push(serde_json::json!({
            "bufferView": view, "componentType": 5126, "count": count, "type": "VEC3"
        }));
    }

    if !mesh.uv_coordinates.is_empty() {
        let view = push_view(&mut bin, f32_bytes(&mesh.uv_coordinates), 34962);
        attributes.insert("TEXCOORD_0".to_string(), serde_json::json!(accessors.len()));
        accessors.push(serde_json::json!({
            "bufferView": view, "componentType": 5126, "count": count, "type": "VEC2"
        }));
    }

    let mut primitive = serde_json::json!({ "attributes": attributes, "mode": 0 });
    if !mesh.faces.is_empty() {
        let bytes: Vec<u8> = mesh.faces.iter().flat_map(|i| i.to_le_bytes()).collect();
        let view = push_view(&mut bin, bytes, 34963);
        primitive["indices"] = serde_json::json!(accessors.len());
        primitive["mode"] = serde_json::json!(4);
        accessors.push(serde_json::json!({
            "bufferView": view, "componentType": 5125, "count": mesh.faces.len(), "type": "SCALAR"
        }));
    }

    let json = serde_json::json!({
        "asset": { "version": "2.0", "generator": "drape" },
        "scene": 0,
        "scenes": [{ "nodes": [0] }],
        "nodes": [{ "mesh": 0 }],
        "meshes": [{ "primitives": [primitive] }],
        "accessors": accessors,
        "bufferViews": views,
        "buffers": [{ "byteLength": bin.len() }]
    });

    let mut json_bytes = serde_json::to_vec(&json)
        .map_err(|e| DrapeError::Import(format!("Failed to serialize GLB JSON: {}", e)))?;
    // Chunks are 4-byte aligned: JSON pads with spaces, BIN with zeros
    json_bytes.resize((json_bytes.len() + 3) & !3, b' ');
    bin.resize((bin.len() + 3) & !3, 0);

    let total_len = 12 + 8 + json_bytes.len() + 8 + bin.len();
    let mut out = Vec::with_capacity(total_len);
    out.extend_from_slice(GLB_MAGIC);
    out.extend_from_slice(&2u32.to_le_bytes());
    out.extend_from_slice(&(total_len as u32).to_le_bytes());
    out.extend_from_slice(&(json_bytes.len() as u32).to_le_bytes());
    out.extend_from_slice(&CHUNK_JSON.to_le_bytes());
    out.extend_from_slice(&json_bytes);
    out.extend_from_slice(&(bin.len() as u32).to_le_bytes());
    out.extend_from_slice(&CHUNK_BIN.to_le_bytes());
    out.extend_from_slice(&bin);
    Ok(out)
}

fn f32_bytes(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}
