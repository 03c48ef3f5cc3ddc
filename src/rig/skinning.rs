//! CPU skinning: forward kinematics, morph targets and linear blend skinning.

use glam::{Mat4, Quat, Vec3, Vec4};
use std::collections::HashMap;

use super::vrm::VrmModel;

/// Per-mesh, per-primitive vertex positions.
pub type MeshPositions = Vec<Vec<Vec3>>;

/// World transforms for every node (model space, root transform excluded).
///
/// `local_rotations` overrides the rest-pose rotation of selected nodes.
pub fn compute_world_transforms(
    model: &VrmModel,
    local_rotations: &HashMap<usize, Quat>,
) -> Vec<Mat4> {
    let mut world = vec![Mat4::IDENTITY; model.node_count];
    // Parents may be listed after their children, so walk top-down.
    for node in model.traverse() {
        let rotation = local_rotations
            .get(&node)
            .copied()
            .unwrap_or(model.rest_rotations[node]);
        let local = Mat4::from_scale_rotation_translation(
            model.rest_scales[node],
            rotation,
            model.rest_translations[node],
        );
        world[node] = match model.parents[node] {
            Some(parent) => world[parent] * local,
            None => local,
        };
    }
    world
}

/// Base positions of `mesh_idx` with weighted morph targets added.
///
/// `weights[t]` scales morph target `t`; missing entries count as zero.
pub fn apply_morph_targets(model: &VrmModel, mesh_idx: usize, weights: &[f32]) -> MeshPositions {
    model.meshes[mesh_idx]
        .primitives
        .iter()
        .map(|prim| {
            let mut morphed = prim.positions.clone();
            for (deltas, &weight) in prim.morph_deltas.iter().zip(weights) {
                if weight.abs() < 1e-3 || deltas.len() != morphed.len() {
                    continue;
                }
                for (v, d) in morphed.iter_mut().zip(deltas) {
                    *v += *d * weight;
                }
            }
            morphed
        })
        .collect()
}

/// Unmorphed, unskinned positions of a mesh.
pub fn base_positions(model: &VrmModel, mesh_idx: usize) -> MeshPositions {
    model.meshes[mesh_idx]
        .primitives
        .iter()
        .map(|p| p.positions.clone())
        .collect()
}

/// Linear blend skinning of `vertices` (one entry per primitive).
///
/// Meshes without a skin are placed by the world transform of the node that
/// instantiates them.
pub fn skin_vertices(
    model: &VrmModel,
    mesh_idx: usize,
    vertices: &[Vec<Vec3>],
    world: &[Mat4],
) -> MeshPositions {
    let Some(skin) = model.mesh_skin.get(&mesh_idx).map(|&s| &model.skins[s]) else {
        let node_world = model
            .mesh_node
            .get(&mesh_idx)
            .map_or(Mat4::IDENTITY, |&n| world[n]);
        return vertices
            .iter()
            .map(|prim| prim.iter().map(|&p| node_world.transform_point3(p)).collect())
            .collect();
    };

    let joint_matrices: Vec<Mat4> = skin
        .joints
        .iter()
        .zip(&skin.inverse_bind_matrices)
        .map(|(&node, ibm)| world[node] * *ibm)
        .collect();

    model.meshes[mesh_idx]
        .primitives
        .iter()
        .zip(vertices)
        .map(|(prim, base)| {
            base.iter()
                .enumerate()
                .map(|(v, pos)| {
                    let (j, w) = match (prim.joints.get(v), prim.weights.get(v)) {
                        (Some(j), Some(w)) => (j, w),
                        _ => return *pos,
                    };
                    let p = pos.extend(1.0);
                    let mut acc = Vec4::ZERO;
                    for k in 0..4 {
                        if w[k] < 1e-4 {
                            continue;
                        }
                        if let Some(m) = joint_matrices.get(j[k] as usize) {
                            acc += w[k] * (*m * p);
                        }
                    }
                    acc.truncate()
                })
                .collect()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rig::prune::tests::sample_model;

    #[test]
    fn test_world_transforms_chain() {
        let model = sample_model();
        let world = compute_world_transforms(&model, &HashMap::new());
        assert_eq!(world.len(), model.node_count);
        let hair = world[2].col(3).truncate();
        assert!((hair - Vec3::new(0.0, 1.5, 0.0)).length() < 1e-6);
    }

    #[test]
    fn test_rotation_override_propagates_to_children() {
        let model = sample_model();
        let mut rot = HashMap::new();
        rot.insert(1, Quat::from_rotation_z(std::f32::consts::FRAC_PI_2));
        let world = compute_world_transforms(&model, &rot);
        let hair = world[2].col(3).truncate();
        // head at y=1, hair offset 0.5 rotated 90 degrees about Z -> -X
        assert!((hair - Vec3::new(-0.5, 1.0, 0.0)).length() < 1e-5);
    }

    #[test]
    fn test_rest_pose_skinning_is_identity() {
        let model = sample_model();
        let world = compute_world_transforms(&model, &HashMap::new());
        let base = base_positions(&model, 0);
        let skinned = skin_vertices(&model, 0, &base, &world);
        // identity inverse binds bake the hips transform (identity) into the mesh
        for (a, b) in skinned[0].iter().zip(&base[0]) {
            assert!((*a - *b).length() < 1e-6);
        }
    }

    #[test]
    fn test_morph_targets_zero_weights() {
        let model = sample_model();
        let morphed = apply_morph_targets(&model, 0, &[0.0]);
        assert_eq!(morphed, base_positions(&model, 0));
    }

    #[test]
    fn test_morph_targets_full_weight() {
        let model = sample_model();
        let morphed = apply_morph_targets(&model, 0, &[1.0]);
        let base = &model.meshes[0].primitives[0].positions;
        for (m, b) in morphed[0].iter().zip(base) {
            assert!((*m - (*b + Vec3::Y)).length() < 1e-6);
        }
    }
}
