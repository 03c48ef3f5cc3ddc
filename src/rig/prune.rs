//! Mesh/skeleton pruning applied after decode.
//!
//! Drops skin joints that no vertex is weighted to and vertices that no
//! triangle references. Neither pass changes what is drawn; both reduce the
//! per-frame skinning and upload work.

use std::collections::HashMap;

use super::vrm::{PrimitiveData, VrmModel};

/// Weights at or below this are treated as "no influence".
const MIN_WEIGHT: f32 = 0.0;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PruneStats {
    pub joints_removed: usize,
    pub vertices_removed: usize,
}

/// Run both pruning passes.
pub fn prune(model: &mut VrmModel) -> PruneStats {
    // Vertices first so dropped vertices don't keep joints alive.
    let vertices_removed = remove_unused_vertices(model);
    let joints_removed = remove_unused_joints(model);
    PruneStats {
        joints_removed,
        vertices_removed,
    }
}

/// Compact every skin to the joints that carry weight on some vertex.
pub fn remove_unused_joints(model: &mut VrmModel) -> usize {
    let mut removed = 0;

    for skin_idx in 0..model.skins.len() {
        let meshes: Vec<usize> = model
            .mesh_skin
            .iter()
            .filter(|(_, &s)| s == skin_idx)
            .map(|(&m, _)| m)
            .collect();
        if meshes.is_empty() {
            continue;
        }

        let joint_len = model.skins[skin_idx].joints.len();
        let mut used = vec![false; joint_len];
        for &mesh_idx in &meshes {
            for prim in &model.meshes[mesh_idx].primitives {
                for (j, w) in prim.joints.iter().zip(&prim.weights) {
                    for k in 0..4 {
                        let slot = j[k] as usize;
                        if w[k] > MIN_WEIGHT && slot < joint_len {
                            used[slot] = true;
                        }
                    }
                }
            }
        }

        if used.iter().all(|&u| u) {
            continue;
        }

        // old joint slot -> new joint slot
        let mut remap = vec![None; joint_len];
        let skin = &mut model.skins[skin_idx];
        let mut joints = Vec::new();
        let mut ibms = Vec::new();
        for (old, &keep) in used.iter().enumerate() {
            if !keep {
                continue;
            }
            remap[old] = Some(joints.len() as u16);
            joints.push(skin.joints[old]);
            ibms.push(
                skin.inverse_bind_matrices
                    .get(old)
                    .copied()
                    .unwrap_or(glam::Mat4::IDENTITY),
            );
        }
        removed += joint_len - joints.len();
        skin.joints = joints;
        skin.inverse_bind_matrices = ibms;

        for &mesh_idx in &meshes {
            for prim in &mut model.meshes[mesh_idx].primitives {
                for (j, w) in prim.joints.iter_mut().zip(&prim.weights) {
                    for k in 0..4 {
                        j[k] = if w[k] > MIN_WEIGHT {
                            remap
                                .get(j[k] as usize)
                                .copied()
                                .flatten()
                                .unwrap_or(0)
                        } else {
                            0
                        };
                    }
                }
            }
        }
    }

    removed
}

/// Drop vertices that no index references, in every primitive.
pub fn remove_unused_vertices(model: &mut VrmModel) -> usize {
    model
        .meshes
        .iter_mut()
        .flat_map(|m| m.primitives.iter_mut())
        .map(compact_primitive)
        .sum()
}

fn compact_primitive(prim: &mut PrimitiveData) -> usize {
    let count = prim.positions.len();
    let mut remap: HashMap<u32, u32> = HashMap::with_capacity(count);
    let mut order = Vec::with_capacity(count);

    for &i in &prim.indices {
        if (i as usize) < count && !remap.contains_key(&i) {
            remap.insert(i, order.len() as u32);
            order.push(i as usize);
        }
    }
    if order.len() == count {
        return 0;
    }
    // Preserve the original vertex order.
    order.sort_unstable();
    for (new, &old) in order.iter().enumerate() {
        remap.insert(old as u32, new as u32);
    }

    fn pick<T: Copy>(data: &[T], order: &[usize]) -> Vec<T> {
        if data.is_empty() {
            return Vec::new();
        }
        order.iter().filter_map(|&i| data.get(i).copied()).collect()
    }

    prim.positions = pick(&prim.positions, &order);
    prim.normals = pick(&prim.normals, &order);
    prim.joints = pick(&prim.joints, &order);
    prim.weights = pick(&prim.weights, &order);
    for deltas in &mut prim.morph_deltas {
        *deltas = pick(deltas, &order);
    }
    prim.indices.retain(|i| (*i as usize) < count);
    for i in &mut prim.indices {
        *i = remap[&*i];
    }

    count - order.len()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::rig::vrm::{LookAtConfig, MeshData, SkinData, VrmVersion};
    use glam::{Mat4, Quat, Vec3};
    use std::collections::HashSet;

    /// Two-joint skeleton with one skinned quad plus an orphan vertex.
    pub(crate) fn sample_model() -> VrmModel {
        let positions = vec![
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(1.0, 0.0, 0.0),
            Vec3::new(1.0, 1.0, 0.0),
            Vec3::new(0.0, 1.0, 0.0),
            Vec3::new(9.0, 9.0, 9.0),
        ];
        let prim = PrimitiveData {
            normals: vec![Vec3::Z; positions.len()],
            indices: vec![0, 1, 2, 0, 2, 3],
            // joint slot 1 unused; slot 2 only on the orphan vertex
            joints: vec![[0, 1, 0, 0], [0, 0, 0, 0], [0, 0, 0, 0], [0, 0, 0, 0], [2, 0, 0, 0]],
            weights: vec![
                [1.0, 0.0, 0.0, 0.0],
                [1.0, 0.0, 0.0, 0.0],
                [1.0, 0.0, 0.0, 0.0],
                [1.0, 0.0, 0.0, 0.0],
                [1.0, 0.0, 0.0, 0.0],
            ],
            base_color: [1.0; 4],
            morph_deltas: vec![vec![Vec3::Y; 5]],
            positions,
        };

        VrmModel {
            version: VrmVersion::V0,
            meshes: vec![MeshData {
                name: "Body".into(),
                primitives: vec![prim],
            }],
            rest_translations: vec![Vec3::ZERO, Vec3::new(0.0, 1.0, 0.0), Vec3::new(0.0, 0.5, 0.0)],
            rest_rotations: vec![Quat::IDENTITY; 3],
            rest_scales: vec![Vec3::ONE; 3],
            parents: vec![None, Some(0), Some(1)],
            children: vec![vec![1], vec![2], Vec::new()],
            node_names: vec!["hips".into(), "head".into(), "hair".into()],
            node_count: 3,
            skins: vec![SkinData {
                joints: vec![0, 1, 2],
                inverse_bind_matrices: vec![Mat4::IDENTITY; 3],
            }],
            mesh_skin: HashMap::from([(0, 0)]),
            mesh_node: HashMap::from([(0, 0)]),
            bone_to_node: HashMap::from([("hips".into(), 0), ("head".into(), 1)]),
            expression_binds: HashMap::new(),
            binary_expressions: HashSet::new(),
            look_at: LookAtConfig::default(),
            spring_chains: Vec::new(),
            spring_colliders: Vec::new(),
            collider_groups: Vec::new(),
        }
    }

    #[test]
    fn test_orphan_vertex_removed() {
        let mut model = sample_model();
        let removed = remove_unused_vertices(&mut model);
        let prim = &model.meshes[0].primitives[0];
        assert_eq!(removed, 1);
        assert_eq!(prim.positions.len(), 4);
        assert_eq!(prim.morph_deltas[0].len(), 4);
        assert_eq!(prim.indices, vec![0, 1, 2, 0, 2, 3]);
    }

    #[test]
    fn test_unused_joints_removed_after_vertices() {
        let mut model = sample_model();
        let stats = prune(&mut model);
        assert_eq!(stats.vertices_removed, 1);
        // slot 1 had zero weight, slot 2 only fed the orphan
        assert_eq!(stats.joints_removed, 2);
        assert_eq!(model.skins[0].joints, vec![0]);
        assert_eq!(model.skins[0].inverse_bind_matrices.len(), 1);
        for j in &model.meshes[0].primitives[0].joints {
            assert_eq!(*j, [0, 0, 0, 0]);
        }
    }

    #[test]
    fn test_prune_preserves_triangles() {
        let before = sample_model();
        let mut after = sample_model();
        prune(&mut after);

        let tri = |m: &VrmModel| -> Vec<Vec3> {
            let p = &m.meshes[0].primitives[0];
            p.indices.iter().map(|&i| p.positions[i as usize]).collect()
        };
        assert_eq!(tri(&before), tri(&after));
    }

    #[test]
    fn test_prune_is_idempotent() {
        let mut model = sample_model();
        prune(&mut model);
        assert_eq!(prune(&mut model), PruneStats::default());
    }

    #[test]
    fn test_remap_non_sequential_order() {
        let mut prim = PrimitiveData {
            positions: vec![Vec3::X, Vec3::Y, Vec3::Z, Vec3::ONE],
            indices: vec![3, 1, 3],
            ..Default::default()
        };
        assert_eq!(compact_primitive(&mut prim), 2);
        assert_eq!(prim.positions, vec![Vec3::Y, Vec3::ONE]);
        assert_eq!(prim.indices, vec![1, 0, 1]);
    }
}
