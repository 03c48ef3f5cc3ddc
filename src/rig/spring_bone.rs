//! Verlet spring bones for secondary motion (hair, skirts, accessories).
//!
//! Tails are integrated in model space with inertia, stiffness, gravity and
//! drag, held at their rest length and pushed out of sphere/capsule colliders.

use glam::{Mat3, Mat4, Quat, Vec3};
use std::collections::HashMap;

use super::skinning;
use super::vrm::{ColliderShape, VrmModel};

/// Largest step integrated at once; longer frames are clamped.
const MAX_STEP: f32 = 0.05;
/// Tail length synthesized for chain ends without a child node.
const END_TAIL_LENGTH: f32 = 0.07;
const COLLISION_PASSES: usize = 3;

struct Tail {
    node: usize,
    prev: Vec3,
    current: Vec3,
    length: f32,
    /// Unit direction to the tail in the joint's local frame
    axis: Vec3,
    stiffness: f32,
    gravity: Vec3,
    drag: f32,
    hit_radius: f32,
}

struct Chain {
    tails: Vec<Tail>,
    colliders: Vec<usize>,
}

enum Resolved {
    Sphere { center: Vec3, radius: f32 },
    Capsule { start: Vec3, end: Vec3, radius: f32 },
}

/// Spring bone state for one rig.
pub struct SpringBoneSimulator {
    chains: Vec<Chain>,
    colliders: Vec<(usize, ColliderShape)>,
}

impl SpringBoneSimulator {
    /// Returns `None` when the model defines no usable spring chain.
    pub fn new(model: &VrmModel) -> Option<Self> {
        if model.spring_chains.is_empty() {
            return None;
        }
        let rest = skinning::compute_world_transforms(model, &HashMap::new());

        let chains: Vec<Chain> = model
            .spring_chains
            .iter()
            .filter_map(|chain| {
                let tails: Vec<Tail> = chain
                    .joints
                    .iter()
                    .enumerate()
                    .filter_map(|(i, joint)| {
                        let next = chain.joints.get(i + 1).map(|j| j.node);
                        let (length, axis) = tail_axis(model, &rest, joint.node, next)?;
                        let tip = tail_position(&rest[joint.node], axis, length);
                        Some(Tail {
                            node: joint.node,
                            prev: tip,
                            current: tip,
                            length,
                            axis,
                            stiffness: joint.stiffness,
                            gravity: joint.gravity_dir * joint.gravity_power,
                            drag: joint.drag_force.clamp(0.0, 1.0),
                            hit_radius: joint.hit_radius,
                        })
                    })
                    .collect();
                if tails.is_empty() {
                    return None;
                }
                let colliders = chain
                    .collider_group_indices
                    .iter()
                    .filter_map(|&g| model.collider_groups.get(g))
                    .flat_map(|g| g.collider_indices.iter().copied())
                    .filter(|&c| c < model.spring_colliders.len())
                    .collect();
                Some(Chain { tails, colliders })
            })
            .collect();

        if chains.is_empty() {
            return None;
        }
        tracing::debug!(
            chains = chains.len(),
            colliders = model.spring_colliders.len(),
            "Spring bones ready"
        );

        Some(Self {
            chains,
            colliders: model
                .spring_colliders
                .iter()
                .map(|c| (c.node, c.shape))
                .collect(),
        })
    }

    pub fn chain_count(&self) -> usize {
        self.chains.len()
    }

    /// Advance by `dt` seconds against the current pose.
    ///
    /// `world` must come from [`skinning::compute_world_transforms`] with
    /// `pose` applied. Returns local rotations for every simulated joint.
    pub fn step(
        &mut self,
        model: &VrmModel,
        world: &[Mat4],
        pose: &HashMap<usize, Quat>,
        dt: f32,
    ) -> HashMap<usize, Quat> {
        let dt = dt.min(MAX_STEP);
        let mut out = HashMap::new();
        if dt <= f32::EPSILON {
            return out;
        }

        let resolved: Vec<Resolved> = self
            .colliders
            .iter()
            .map(|(node, shape)| resolve(&world[*node], shape))
            .collect();
        let mut world = world.to_vec();

        for chain in &mut self.chains {
            for tail in &mut chain.tails {
                let local_rot = pose
                    .get(&tail.node)
                    .copied()
                    .unwrap_or(model.rest_rotations[tail.node]);
                let parent_world = model.parents[tail.node].map_or(Mat4::IDENTITY, |p| world[p]);
                let parent_rot = rotation_of(&parent_world);
                // Earlier joints of the chain may have moved this one.
                let head = parent_world
                    .transform_point3(model.rest_translations[tail.node]);

                let rest_dir = (parent_rot * local_rot * tail.axis).normalize_or_zero();
                let inertia = (tail.current - tail.prev) * (1.0 - tail.drag);
                let mut next = tail.current
                    + inertia
                    + rest_dir * tail.stiffness * dt
                    + tail.gravity * dt;
                next = constrain(next, head, tail.length, rest_dir);

                for _ in 0..COLLISION_PASSES {
                    let before = next;
                    for shape in chain.colliders.iter().filter_map(|&c| resolved.get(c)) {
                        next = collide(next, tail.hit_radius, shape, head, tail.length);
                    }
                    if next == before {
                        break;
                    }
                }

                tail.prev = tail.current;
                tail.current = next;

                let dir = (next - head).normalize_or_zero();
                let rot = if dir.length_squared() > 0.5 && rest_dir.length_squared() > 0.5 {
                    parent_rot.inverse() * Quat::from_rotation_arc(rest_dir, dir) * parent_rot * local_rot
                } else {
                    local_rot
                };
                out.insert(tail.node, rot);
                world[tail.node] = parent_world
                    * Mat4::from_scale_rotation_translation(
                        model.rest_scales[tail.node],
                        rot,
                        model.rest_translations[tail.node],
                    );
            }
        }

        out
    }

    /// Snap every tail back to the rest pose.
    pub fn reset(&mut self, model: &VrmModel) {
        let rest = skinning::compute_world_transforms(model, &HashMap::new());
        for tail in self.chains.iter_mut().flat_map(|c| c.tails.iter_mut()) {
            let tip = tail_position(&rest[tail.node], tail.axis, tail.length);
            tail.prev = tip;
            tail.current = tip;
        }
    }
}

fn rotation_of(m: &Mat4) -> Quat {
    Quat::from_mat3(&Mat3::from_mat4(*m)).normalize()
}

fn tail_position(joint_world: &Mat4, axis: Vec3, length: f32) -> Vec3 {
    joint_world.col(3).truncate() + rotation_of(joint_world) * axis * length
}

/// Rest length and local direction from `node` to its tail.
///
/// Uses the next chain joint, then the first skeleton child, then a short
/// extension of the parent-to-node direction.
fn tail_axis(
    model: &VrmModel,
    rest: &[Mat4],
    node: usize,
    next: Option<usize>,
) -> Option<(f32, Vec3)> {
    let origin = rest[node].col(3).truncate();
    let inv = rotation_of(&rest[node]).inverse();

    let toward = |child: usize| {
        let d = rest[child].col(3).truncate() - origin;
        let len = d.length();
        (len > 1e-6).then(|| (len, inv * (d / len)))
    };

    if let Some(next) = next {
        return toward(next);
    }
    if let Some(found) = model.children(node).into_iter().find_map(toward) {
        return Some(found);
    }
    let parent = model.parents[node]?;
    let dir = (origin - rest[parent].col(3).truncate()).normalize_or_zero();
    (dir.length_squared() > 0.5).then(|| (END_TAIL_LENGTH, inv * dir))
}

fn resolve(world: &Mat4, shape: &ColliderShape) -> Resolved {
    match *shape {
        ColliderShape::Sphere { offset, radius } => Resolved::Sphere {
            center: world.transform_point3(offset),
            radius,
        },
        ColliderShape::Capsule {
            offset,
            tail,
            radius,
        } => Resolved::Capsule {
            start: world.transform_point3(offset),
            end: world.transform_point3(tail),
            radius,
        },
    }
}

fn constrain(tail: Vec3, head: Vec3, length: f32, fallback: Vec3) -> Vec3 {
    let d = tail - head;
    let dist = d.length();
    if dist > 1e-6 {
        head + d / dist * length
    } else {
        head + fallback * length
    }
}

/// Push `tail` out of `shape`, keeping it at `length` from `head`.
fn collide(tail: Vec3, hit_radius: f32, shape: &Resolved, head: Vec3, length: f32) -> Vec3 {
    let (closest, radius) = match *shape {
        Resolved::Sphere { center, radius } => (center, radius),
        Resolved::Capsule { start, end, radius } => {
            let seg = end - start;
            let len_sq = seg.length_squared();
            let t = if len_sq < 1e-10 {
                0.0
            } else {
                ((tail - start).dot(seg) / len_sq).clamp(0.0, 1.0)
            };
            (start + seg * t, radius)
        }
    };
    let d = tail - closest;
    let dist = d.length();
    let min = radius + hit_radius;
    if dist >= min || dist <= 1e-6 {
        return tail;
    }
    let pushed = closest + d / dist * min;
    let to = pushed - head;
    let reach = to.length();
    if reach > 1e-6 {
        head + to / reach * length
    } else {
        tail
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rig::prune::tests::sample_model;
    use crate::rig::vrm::{ColliderGroup, SpringChain, SpringCollider, SpringJoint};

    fn hair_model(gravity: f32) -> VrmModel {
        let mut model = sample_model();
        model.spring_chains.push(SpringChain {
            name: "hair".into(),
            joints: vec![SpringJoint {
                node: 2,
                hit_radius: 0.01,
                stiffness: 0.0,
                gravity_power: gravity,
                gravity_dir: Vec3::new(1.0, 0.0, 0.0),
                drag_force: 0.4,
            }],
            collider_group_indices: vec![],
        });
        model
    }

    fn run(model: &VrmModel, sim: &mut SpringBoneSimulator, frames: usize) -> HashMap<usize, Quat> {
        let pose = HashMap::new();
        let world = skinning::compute_world_transforms(model, &pose);
        let mut out = HashMap::new();
        for _ in 0..frames {
            out = sim.step(model, &world, &pose, 1.0 / 60.0);
        }
        out
    }

    #[test]
    fn test_no_chains_no_simulator() {
        assert!(SpringBoneSimulator::new(&sample_model()).is_none());
    }

    #[test]
    fn test_end_joint_gets_synthesized_tail() {
        let model = hair_model(1.0);
        let sim = SpringBoneSimulator::new(&model).expect("simulator");
        assert_eq!(sim.chain_count(), 1);
        let tail = &sim.chains[0].tails[0];
        assert!((tail.length - END_TAIL_LENGTH).abs() < 1e-6);
        assert!((tail.axis - Vec3::Y).length() < 1e-5);
    }

    #[test]
    fn test_gravity_bends_the_tail() {
        let model = hair_model(2.0);
        let mut sim = SpringBoneSimulator::new(&model).expect("simulator");
        let rotations = run(&model, &mut sim, 30);
        let rot = rotations[&2];
        let bent = rot * Vec3::Y;
        // pulled toward +X
        assert!(bent.x > 0.1, "tail direction {bent:?}");
    }

    #[test]
    fn test_zero_dt_is_noop() {
        let model = hair_model(1.0);
        let mut sim = SpringBoneSimulator::new(&model).expect("simulator");
        let world = skinning::compute_world_transforms(&model, &HashMap::new());
        assert!(sim.step(&model, &world, &HashMap::new(), 0.0).is_empty());
    }

    #[test]
    fn test_reset_restores_rest_tail() {
        let model = hair_model(2.0);
        let mut sim = SpringBoneSimulator::new(&model).expect("simulator");
        run(&model, &mut sim, 10);
        sim.reset(&model);
        let tail = &sim.chains[0].tails[0];
        assert!((tail.current - Vec3::new(0.0, 1.5 + END_TAIL_LENGTH, 0.0)).length() < 1e-5);
        assert_eq!(tail.current, tail.prev);
    }

    #[test]
    fn test_chain_collects_group_colliders() {
        let mut model = hair_model(1.0);
        model.spring_colliders.push(SpringCollider {
            node: 1,
            shape: ColliderShape::Sphere {
                offset: Vec3::ZERO,
                radius: 0.1,
            },
        });
        model.collider_groups.push(ColliderGroup {
            name: "head".into(),
            // index 3 doesn't exist and is dropped
            collider_indices: vec![0, 3],
        });
        model.spring_chains[0].collider_group_indices = vec![0, 7];

        let sim = SpringBoneSimulator::new(&model).expect("simulator");
        assert_eq!(sim.chains[0].colliders, vec![0]);
    }

    #[test]
    fn test_every_joint_of_a_long_chain_is_simulated() {
        // hair (2) -> 3 -> 4
        let mut model = sample_model();
        for (name, parent) in [("hair_mid", 2), ("hair_tip", 3)] {
            model.rest_translations.push(Vec3::new(0.0, 0.2, 0.0));
            model.rest_rotations.push(Quat::IDENTITY);
            model.rest_scales.push(Vec3::ONE);
            model.parents.push(Some(parent));
            model.children.push(Vec::new());
            model.children[parent].push(model.node_count);
            model.node_names.push(name.into());
            model.node_count += 1;
        }
        let joint = |node| SpringJoint {
            node,
            hit_radius: 0.0,
            stiffness: 0.5,
            gravity_power: 1.0,
            gravity_dir: Vec3::X,
            drag_force: 0.4,
        };
        model.spring_chains.push(SpringChain {
            name: "hair".into(),
            joints: vec![joint(2), joint(3), joint(4)],
            collider_group_indices: vec![],
        });
        assert!(model.validate().is_ok());

        let mut sim = SpringBoneSimulator::new(&model).expect("simulator");
        assert_eq!(sim.chains[0].tails.len(), 3);
        // inner joints aim at the next joint, the tip gets a synthesized tail
        assert!((sim.chains[0].tails[0].length - 0.2).abs() < 1e-6);
        assert!((sim.chains[0].tails[2].length - END_TAIL_LENGTH).abs() < 1e-6);

        let rotations = run(&model, &mut sim, 5);
        let mut simulated: Vec<usize> = rotations.keys().copied().collect();
        simulated.sort_unstable();
        assert_eq!(simulated, vec![2, 3, 4]);
    }

    #[test]
    fn test_sphere_pushes_tail_out() {
        let shape = Resolved::Sphere {
            center: Vec3::ZERO,
            radius: 0.1,
        };
        let tail = Vec3::new(0.05, 0.0, 0.0);
        let out = collide(tail, 0.01, &shape, Vec3::new(0.0, -0.3, 0.0), 0.35);
        assert!(out.length() > tail.length());
    }

    #[test]
    fn test_capsule_pushes_out_radially() {
        let shape = Resolved::Capsule {
            start: Vec3::new(0.0, -0.5, 0.0),
            end: Vec3::new(0.0, 0.5, 0.0),
            radius: 0.1,
        };
        let tail = Vec3::new(0.05, 0.0, 0.0);
        let out = collide(tail, 0.01, &shape, Vec3::new(0.0, -0.3, 0.0), 0.35);
        assert!(out.x > tail.x);
    }
}
