//! GLB/VRM decoding using the `gltf` crate.
//!
//! Extracts meshes, morph target deltas, skeleton hierarchy, inverse bind
//! matrices, per-vertex joint weights and the VRM extension data (humanoid
//! bones, expressions, spring bones, look-at) from a glTF binary. Both VRM 1.0
//! (`VRMC_*`) and VRM 0.x (`VRM`) extensions are understood.

use glam::{Mat4, Quat, Vec3};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::path::Path;

/// Which VRM revision the file was authored against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VrmVersion {
    /// `VRM` extension; models face -Z.
    V0,
    /// `VRMC_vrm` extension; models face +Z.
    V1,
    /// Plain glTF without VRM metadata.
    Unknown,
}

/// Maps an expression preset to one morph target of one mesh.
#[derive(Clone, Debug, PartialEq)]
pub struct ExpressionBind {
    pub mesh: usize,
    pub morph_index: usize,
    /// Weight at full expression (0..1)
    pub weight: f32,
}

/// How gaze is applied to the rig.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LookAtKind {
    /// Rotate the eye bones.
    Bone,
    /// Drive the lookUp/lookDown/lookLeft/lookRight expressions.
    Expression,
}

/// Maps an input angle (degrees) to an output value.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RangeMap {
    pub input_max: f32,
    pub output_scale: f32,
}

impl RangeMap {
    pub fn map(&self, degrees: f32) -> f32 {
        if self.input_max <= f32::EPSILON {
            return 0.0;
        }
        (degrees.abs().min(self.input_max) / self.input_max) * self.output_scale
    }
}

/// Look-at settings from `VRMC_vrm.lookAt` or `VRM.firstPerson`.
#[derive(Clone, Debug, PartialEq)]
pub struct LookAtConfig {
    pub kind: LookAtKind,
    /// Eye position relative to the head bone, in head space
    pub offset_from_head: Vec3,
    pub horizontal_inner: RangeMap,
    pub horizontal_outer: RangeMap,
    pub vertical_down: RangeMap,
    pub vertical_up: RangeMap,
}

impl Default for LookAtConfig {
    fn default() -> Self {
        let range = RangeMap {
            input_max: 90.0,
            output_scale: 10.0,
        };
        Self {
            kind: LookAtKind::Bone,
            offset_from_head: Vec3::new(0.0, 0.06, 0.0),
            horizontal_inner: range,
            horizontal_outer: range,
            vertical_down: range,
            vertical_up: range,
        }
    }
}

/// A decoded VRM model ready for CPU skinning and GPU upload.
pub struct VrmModel {
    pub version: VrmVersion,
    pub meshes: Vec<MeshData>,
    /// Skeleton: node index -> rest-pose local transform
    pub rest_translations: Vec<Vec3>,
    pub rest_rotations: Vec<Quat>,
    pub rest_scales: Vec<Vec3>,
    /// child node -> parent node
    pub parents: Vec<Option<usize>>,
    /// parent node -> child nodes, in index order
    pub children: Vec<Vec<usize>>,
    pub node_names: Vec<String>,
    pub node_count: usize,
    pub skins: Vec<SkinData>,
    /// mesh index -> skin index
    pub mesh_skin: HashMap<usize, usize>,
    /// mesh index -> node that instantiates it
    pub mesh_node: HashMap<usize, usize>,
    /// VRM humanoid bone name -> node index
    pub bone_to_node: HashMap<String, usize>,
    /// Expression preset name -> morph target binds
    pub expression_binds: HashMap<String, Vec<ExpressionBind>>,
    /// Expressions whose value snaps to 0 or 1
    pub binary_expressions: HashSet<String>,
    pub look_at: LookAtConfig,
    pub spring_chains: Vec<SpringChain>,
    pub spring_colliders: Vec<SpringCollider>,
    pub collider_groups: Vec<ColliderGroup>,
}

pub struct SkinData {
    pub joints: Vec<usize>,
    pub inverse_bind_matrices: Vec<Mat4>,
}

/// A spring bone chain (hair, cloth, ...).
pub struct SpringChain {
    pub name: String,
    pub joints: Vec<SpringJoint>,
    pub collider_group_indices: Vec<usize>,
}

pub struct SpringJoint {
    pub node: usize,
    pub hit_radius: f32,
    pub stiffness: f32,
    pub gravity_power: f32,
    pub gravity_dir: Vec3,
    pub drag_force: f32,
}

pub struct SpringCollider {
    pub node: usize,
    pub shape: ColliderShape,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ColliderShape {
    Sphere { offset: Vec3, radius: f32 },
    Capsule { offset: Vec3, tail: Vec3, radius: f32 },
}

pub struct ColliderGroup {
    pub name: String,
    pub collider_indices: Vec<usize>,
}

/// All primitives of one glTF mesh.
pub struct MeshData {
    pub name: String,
    pub primitives: Vec<PrimitiveData>,
}

/// Geometry for a single primitive.
#[derive(Clone, Debug, Default)]
pub struct PrimitiveData {
    pub positions: Vec<Vec3>,
    pub normals: Vec<Vec3>,
    pub indices: Vec<u32>,
    /// Four joint indices per vertex (into the mesh's skin joint list)
    pub joints: Vec<[u16; 4]>,
    pub weights: Vec<[f32; 4]>,
    /// Material base colour factor (RGBA)
    pub base_color: [f32; 4],
    /// morph_deltas[target][vertex] position delta
    pub morph_deltas: Vec<Vec<Vec3>>,
}

impl PrimitiveData {
    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }
}

impl VrmModel {
    /// Read and decode a VRM/GLB file from disk.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, String> {
        let path = path.as_ref();
        let bytes =
            std::fs::read(path).map_err(|e| format!("{}: {}", path.display(), e))?;
        Self::from_slice(&bytes, path.parent())
    }

    /// Decode a VRM/GLB (or `.gltf` JSON) from memory.
    ///
    /// `base` resolves relative buffer URIs of non-binary files.
    pub fn from_slice(bytes: &[u8], base: Option<&Path>) -> Result<Self, String> {
        let gltf::Gltf { document, blob } =
            gltf::Gltf::from_slice(bytes).map_err(|e| format!("invalid glTF: {}", e))?;
        let buffers = gltf::import_buffers(&document, base, blob)
            .map_err(|e| format!("failed to resolve buffers: {}", e))?;
        let root = extension_json(bytes)?;
        let extensions = root.get("extensions");

        let version = if extensions.and_then(|e| e.get("VRMC_vrm")).is_some() {
            VrmVersion::V1
        } else if extensions.and_then(|e| e.get("VRM")).is_some() {
            VrmVersion::V0
        } else {
            VrmVersion::Unknown
        };

        let node_count = document.nodes().count();
        let mut parents = vec![None; node_count];
        let mut node_names = Vec::with_capacity(node_count);
        let mut rest_translations = Vec::with_capacity(node_count);
        let mut rest_rotations = Vec::with_capacity(node_count);
        let mut rest_scales = Vec::with_capacity(node_count);
        let mut mesh_skin = HashMap::new();
        let mut mesh_node = HashMap::new();

        for node in document.nodes() {
            for child in node.children() {
                parents[child.index()] = Some(node.index());
            }
            let (t, r, s) = node.transform().decomposed();
            rest_translations.push(Vec3::from(t));
            rest_rotations.push(Quat::from_array(r));
            rest_scales.push(Vec3::from(s));
            node_names.push(node.name().unwrap_or_default().to_string());

            if let Some(mesh) = node.mesh() {
                mesh_node.entry(mesh.index()).or_insert(node.index());
                if let Some(skin) = node.skin() {
                    mesh_skin.insert(mesh.index(), skin.index());
                }
            }
        }

        let skins = document
            .skins()
            .map(|skin| {
                let joints: Vec<usize> = skin.joints().map(|j| j.index()).collect();
                let reader = skin.reader(|b| Some(&buffers[b.index()]));
                let inverse_bind_matrices = reader
                    .read_inverse_bind_matrices()
                    .map(|iter| iter.map(|m| Mat4::from_cols_array_2d(&m)).collect())
                    .unwrap_or_else(|| vec![Mat4::IDENTITY; joints.len()]);
                SkinData {
                    joints,
                    inverse_bind_matrices,
                }
            })
            .collect();

        let meshes = document
            .meshes()
            .map(|mesh| read_mesh(&mesh, &buffers))
            .collect();
        let children = child_lists(&parents);

        let (expression_binds, binary_expressions) = match version {
            VrmVersion::V1 => expressions_v1(&root, &mesh_node_lookup(&document)),
            VrmVersion::V0 => expressions_v0(&root),
            VrmVersion::Unknown => (HashMap::new(), HashSet::new()),
        };

        let (spring_chains, spring_colliders, collider_groups) = match version {
            VrmVersion::V1 => extensions
                .and_then(|e| e.get("VRMC_springBone"))
                .map(springs_v1)
                .unwrap_or_default(),
            VrmVersion::V0 => extensions
                .and_then(|e| e.get("VRM"))
                .and_then(|v| v.get("secondaryAnimation"))
                .map(|secondary| springs_v0(secondary, &children))
                .unwrap_or_default(),
            VrmVersion::Unknown => Default::default(),
        };

        let model = Self {
            version,
            meshes,
            rest_translations,
            rest_rotations,
            rest_scales,
            parents,
            children,
            node_names,
            node_count,
            skins,
            mesh_skin,
            mesh_node,
            bone_to_node: humanoid_bones(&root),
            expression_binds,
            binary_expressions,
            look_at: look_at_config(&root),
            spring_chains,
            spring_colliders,
            collider_groups,
        };
        model.validate()?;
        Ok(model)
    }

    /// Check every cross reference against the arrays it indexes.
    ///
    /// `gltf` validates the core document only; node and mesh indices read
    /// from the VRM extensions are checked here.
    pub fn validate(&self) -> Result<(), String> {
        let nodes = self.node_count;
        if self.parents.len() != nodes
            || self.children.len() != nodes
            || self.rest_translations.len() != nodes
            || self.rest_rotations.len() != nodes
            || self.rest_scales.len() != nodes
        {
            return Err(format!("skeleton arrays do not match {} nodes", nodes));
        }
        for (node, parent) in self.parents.iter().enumerate() {
            if let Some(parent) = *parent {
                in_range(parent, nodes, || format!("parent of node {}", node))?;
            }
        }
        for (node, kids) in self.children.iter().enumerate() {
            for &child in kids {
                in_range(child, nodes, || format!("child of node {}", node))?;
            }
        }

        for (i, skin) in self.skins.iter().enumerate() {
            for &joint in &skin.joints {
                in_range(joint, nodes, || format!("skin {} joint", i))?;
            }
        }
        for (&mesh, &skin) in &self.mesh_skin {
            in_range(mesh, self.meshes.len(), || "skinned mesh".to_string())?;
            in_range(skin, self.skins.len(), || format!("skin of mesh {}", mesh))?;
        }
        for (&mesh, &node) in &self.mesh_node {
            in_range(mesh, self.meshes.len(), || "instanced mesh".to_string())?;
            in_range(node, nodes, || format!("node of mesh {}", mesh))?;
        }
        for (m, mesh) in self.meshes.iter().enumerate() {
            for (p, prim) in mesh.primitives.iter().enumerate() {
                if let Some(&index) = prim.indices.iter().max() {
                    in_range(index as usize, prim.positions.len(), || {
                        format!("mesh {} primitive {} index", m, p)
                    })?;
                }
            }
        }

        for (bone, &node) in &self.bone_to_node {
            in_range(node, nodes, || format!("humanoid bone '{}'", bone))?;
        }
        for (name, binds) in &self.expression_binds {
            for bind in binds {
                in_range(bind.mesh, self.meshes.len(), || {
                    format!("expression '{}' mesh", name)
                })?;
            }
        }

        for chain in &self.spring_chains {
            for joint in &chain.joints {
                in_range(joint.node, nodes, || {
                    format!("spring chain '{}' joint", chain.name)
                })?;
            }
            for &group in &chain.collider_group_indices {
                in_range(group, self.collider_groups.len(), || {
                    format!("spring chain '{}' collider group", chain.name)
                })?;
            }
        }
        for (i, collider) in self.spring_colliders.iter().enumerate() {
            in_range(collider.node, nodes, || format!("spring collider {}", i))?;
        }
        for group in &self.collider_groups {
            for &c in &group.collider_indices {
                in_range(c, self.spring_colliders.len(), || {
                    format!("collider group '{}'", group.name)
                })?;
            }
        }
        Ok(())
    }

    /// Total vertex count over all primitives.
    pub fn vertex_count(&self) -> usize {
        self.meshes
            .iter()
            .flat_map(|m| m.primitives.iter())
            .map(PrimitiveData::vertex_count)
            .sum()
    }

    /// Children of `node` in the skeleton.
    pub fn children(&self, node: usize) -> impl DoubleEndedIterator<Item = usize> + '_ {
        self.children.get(node).into_iter().flatten().copied()
    }

    /// Depth-first walk of the node tree starting at every root.
    pub fn traverse(&self) -> Vec<usize> {
        let mut order = Vec::with_capacity(self.node_count);
        let mut stack: Vec<usize> = (0..self.node_count)
            .rev()
            .filter(|&i| self.parents[i].is_none())
            .collect();
        while let Some(node) = stack.pop() {
            order.push(node);
            stack.extend(self.children(node).rev());
        }
        order
    }
}

/// Inverts the parent links into per-node child lists.
pub(crate) fn child_lists(parents: &[Option<usize>]) -> Vec<Vec<usize>> {
    let mut children = vec![Vec::new(); parents.len()];
    for (node, parent) in parents.iter().enumerate() {
        if let Some(kids) = parent.and_then(|p| children.get_mut(p)) {
            kids.push(node);
        }
    }
    children
}

fn in_range(index: usize, len: usize, what: impl FnOnce() -> String) -> Result<(), String> {
    if index < len {
        Ok(())
    } else {
        Err(format!("{} references index {} (only {})", what(), index, len))
    }
}

fn read_mesh(mesh: &gltf::Mesh<'_>, buffers: &[gltf::buffer::Data]) -> MeshData {
    let primitives = mesh
        .primitives()
        .map(|prim| {
            let reader = prim.reader(|b| Some(&buffers[b.index()]));
            let positions: Vec<Vec3> = reader
                .read_positions()
                .map(|iter| iter.map(Vec3::from).collect())
                .unwrap_or_default();
            let n = positions.len();
            let normals = reader
                .read_normals()
                .map(|iter| iter.map(Vec3::from).collect())
                .unwrap_or_else(|| vec![Vec3::Y; n]);
            let indices = reader
                .read_indices()
                .map(|iter| iter.into_u32().collect())
                .unwrap_or_else(|| (0..n as u32).collect());
            let joints = reader
                .read_joints(0)
                .map(|iter| iter.into_u16().collect())
                .unwrap_or_else(|| vec![[0; 4]; n]);
            let weights = reader
                .read_weights(0)
                .map(|iter| iter.into_f32().collect())
                .unwrap_or_else(|| vec![[1.0, 0.0, 0.0, 0.0]; n]);
            let morph_deltas = reader
                .read_morph_targets()
                .map(|(positions, _, _)| {
                    positions
                        .map(|iter| iter.map(Vec3::from).collect())
                        .unwrap_or_else(|| vec![Vec3::ZERO; n])
                })
                .collect();

            PrimitiveData {
                positions,
                normals,
                indices,
                joints,
                weights,
                base_color: prim.material().pbr_metallic_roughness().base_color_factor(),
                morph_deltas,
            }
        })
        .collect();

    MeshData {
        name: mesh.name().unwrap_or_default().to_string(),
        primitives,
    }
}

/// Raw JSON document of a GLB or `.gltf` file, for the VRM extensions.
fn extension_json(bytes: &[u8]) -> Result<Value, String> {
    if bytes.starts_with(b"glTF") {
        let glb = gltf::Glb::from_slice(bytes).map_err(|e| format!("invalid GLB: {}", e))?;
        serde_json::from_slice(&glb.json).map_err(|e| format!("JSON parse error: {}", e))
    } else {
        serde_json::from_slice(bytes).map_err(|e| format!("JSON parse error: {}", e))
    }
}

/// VRM 1.0 binds reference nodes; VRM 0.x binds reference meshes.
fn mesh_node_lookup(document: &gltf::Document) -> HashMap<usize, usize> {
    document
        .nodes()
        .filter_map(|n| n.mesh().map(|m| (n.index(), m.index())))
        .collect()
}

/// Small accessors over `serde_json::Value` with VRM defaults.
trait JsonExt {
    fn f32_or(&self, key: &str, default: f32) -> f32;
    fn usize_at(&self, key: &str) -> Option<usize>;
    fn indices(&self, key: &str) -> Vec<usize>;
    fn list(&self, key: &str) -> &[Value];
}

impl JsonExt for Value {
    fn f32_or(&self, key: &str, default: f32) -> f32 {
        self.get(key)
            .and_then(Value::as_f64)
            .map_or(default, |v| v as f32)
    }

    fn usize_at(&self, key: &str) -> Option<usize> {
        self.get(key).and_then(Value::as_u64).map(|v| v as usize)
    }

    fn indices(&self, key: &str) -> Vec<usize> {
        self.list(key)
            .iter()
            .filter_map(|v| v.as_u64().map(|n| n as usize))
            .collect()
    }

    fn list(&self, key: &str) -> &[Value] {
        self.get(key)
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

/// Accepts both `[x, y, z]` (VRM 1.0) and `{"x":..,"y":..,"z":..}` (VRM 0.x).
fn vec3(value: Option<&Value>) -> Option<Vec3> {
    let value = value?;
    if let Some(arr) = value.as_array() {
        let c = |i: usize| arr.get(i).and_then(Value::as_f64).unwrap_or(0.0) as f32;
        return Some(Vec3::new(c(0), c(1), c(2)));
    }
    if value.is_object() {
        return Some(Vec3::new(
            value.f32_or("x", 0.0),
            value.f32_or("y", 0.0),
            value.f32_or("z", 0.0),
        ));
    }
    None
}

fn humanoid_bones(root: &Value) -> HashMap<String, usize> {
    let extensions = root.get("extensions");

    if let Some(bones) = extensions
        .and_then(|e| e.pointer("/VRMC_vrm/humanoid/humanBones"))
        .and_then(Value::as_object)
    {
        return bones
            .iter()
            .filter_map(|(name, bone)| bone.usize_at("node").map(|n| (name.clone(), n)))
            .collect();
    }

    extensions
        .and_then(|e| e.pointer("/VRM/humanoid/humanBones"))
        .and_then(Value::as_array)
        .map(|bones| {
            bones
                .iter()
                .filter_map(|bone| {
                    let name = bone.get("bone")?.as_str()?;
                    Some((lower_first(name), bone.usize_at("node")?))
                })
                .collect()
        })
        .unwrap_or_default()
}

/// VRM 0.x bone names are PascalCase in some exporters.
fn lower_first(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}

type Expressions = (HashMap<String, Vec<ExpressionBind>>, HashSet<String>);

fn expressions_v1(root: &Value, node_mesh: &HashMap<usize, usize>) -> Expressions {
    let mut binds = HashMap::new();
    let mut binary = HashSet::new();

    let groups = ["preset", "custom"]
        .into_iter()
        .filter_map(|g| {
            root.pointer(&format!("/extensions/VRMC_vrm/expressions/{g}"))
                .and_then(Value::as_object)
        })
        .flat_map(|m| m.iter());

    for (name, expr) in groups {
        if expr.get("isBinary").and_then(Value::as_bool).unwrap_or(false) {
            binary.insert(name.clone());
        }
        let list: Vec<ExpressionBind> = expr
            .list("morphTargetBinds")
            .iter()
            .filter_map(|b| {
                Some(ExpressionBind {
                    mesh: *node_mesh.get(&b.usize_at("node")?)?,
                    morph_index: b.usize_at("index")?,
                    weight: b.f32_or("weight", 1.0),
                })
            })
            .collect();
        if !list.is_empty() {
            binds.insert(name.clone(), list);
        }
    }

    (binds, binary)
}

/// Maps VRM 0.x `presetName` values onto VRM 1.0 preset names.
fn v0_preset_name(preset: &str) -> String {
    match preset {
        "a" => "aa",
        "i" => "ih",
        "u" => "ou",
        "e" => "ee",
        "o" => "oh",
        "blink_l" => "blinkLeft",
        "blink_r" => "blinkRight",
        "joy" => "happy",
        "sorrow" => "sad",
        "fun" => "relaxed",
        "lookup" => "lookUp",
        "lookdown" => "lookDown",
        "lookleft" => "lookLeft",
        "lookright" => "lookRight",
        other => other,
    }
    .to_string()
}

fn expressions_v0(root: &Value) -> Expressions {
    let mut binds = HashMap::new();
    let mut binary = HashSet::new();

    let groups = root
        .pointer("/extensions/VRM/blendShapeMaster/blendShapeGroups")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[]);

    for group in groups {
        let preset = group
            .get("presetName")
            .and_then(Value::as_str)
            .filter(|p| !p.is_empty() && *p != "unknown")
            .or_else(|| group.get("name").and_then(Value::as_str));
        let Some(preset) = preset else { continue };
        let name = v0_preset_name(&preset.to_lowercase());

        if group.get("isBinary").and_then(Value::as_bool).unwrap_or(false) {
            binary.insert(name.clone());
        }
        // VRM 0.x weights are on a 0-100 scale
        let list: Vec<ExpressionBind> = group
            .list("binds")
            .iter()
            .filter_map(|b| {
                Some(ExpressionBind {
                    mesh: b.usize_at("mesh")?,
                    morph_index: b.usize_at("index")?,
                    weight: b.f32_or("weight", 100.0) / 100.0,
                })
            })
            .collect();
        if !list.is_empty() {
            binds.insert(name, list);
        }
    }

    (binds, binary)
}

fn range_v1(value: Option<&Value>, default_output: f32) -> RangeMap {
    RangeMap {
        input_max: value.map_or(90.0, |v| v.f32_or("inputMaxValue", 90.0)),
        output_scale: value.map_or(default_output, |v| v.f32_or("outputScale", default_output)),
    }
}

fn range_v0(value: Option<&Value>, default_output: f32) -> RangeMap {
    RangeMap {
        input_max: value.map_or(90.0, |v| v.f32_or("xRange", 90.0)),
        output_scale: value.map_or(default_output, |v| v.f32_or("yRange", default_output)),
    }
}

fn look_at_config(root: &Value) -> LookAtConfig {
    if let Some(look) = root.pointer("/extensions/VRMC_vrm/lookAt") {
        let kind = match look.get("type").and_then(Value::as_str) {
            Some("expression") => LookAtKind::Expression,
            _ => LookAtKind::Bone,
        };
        let out = if kind == LookAtKind::Bone { 10.0 } else { 1.0 };
        return LookAtConfig {
            kind,
            offset_from_head: vec3(look.get("offsetFromHeadBone"))
                .unwrap_or(Vec3::new(0.0, 0.06, 0.0)),
            horizontal_inner: range_v1(look.get("rangeMapHorizontalInner"), out),
            horizontal_outer: range_v1(look.get("rangeMapHorizontalOuter"), out),
            vertical_down: range_v1(look.get("rangeMapVerticalDown"), out),
            vertical_up: range_v1(look.get("rangeMapVerticalUp"), out),
        };
    }

    if let Some(fp) = root.pointer("/extensions/VRM/firstPerson") {
        let kind = match fp.get("lookAtTypeName").and_then(Value::as_str) {
            Some("BlendShape") => LookAtKind::Expression,
            _ => LookAtKind::Bone,
        };
        let out = if kind == LookAtKind::Bone { 10.0 } else { 1.0 };
        return LookAtConfig {
            kind,
            offset_from_head: vec3(fp.get("firstPersonBoneOffset"))
                .unwrap_or(Vec3::new(0.0, 0.06, 0.0)),
            horizontal_inner: range_v0(fp.get("lookAtHorizontalInner"), out),
            horizontal_outer: range_v0(fp.get("lookAtHorizontalOuter"), out),
            vertical_down: range_v0(fp.get("lookAtVerticalDown"), out),
            vertical_up: range_v0(fp.get("lookAtVerticalUp"), out),
        };
    }

    LookAtConfig::default()
}

type Springs = (Vec<SpringChain>, Vec<SpringCollider>, Vec<ColliderGroup>);

fn collider_shape_v1(shape: Option<&Value>) -> ColliderShape {
    if let Some(sphere) = shape.and_then(|s| s.get("sphere")) {
        return ColliderShape::Sphere {
            offset: vec3(sphere.get("offset")).unwrap_or(Vec3::ZERO),
            radius: sphere.f32_or("radius", 0.0),
        };
    }
    if let Some(capsule) = shape.and_then(|s| s.get("capsule")) {
        return ColliderShape::Capsule {
            offset: vec3(capsule.get("offset")).unwrap_or(Vec3::ZERO),
            tail: vec3(capsule.get("tail")).unwrap_or(Vec3::ZERO),
            radius: capsule.f32_or("radius", 0.0),
        };
    }
    ColliderShape::Sphere {
        offset: Vec3::ZERO,
        radius: 0.0,
    }
}

fn springs_v1(ext: &Value) -> Springs {
    let colliders = ext
        .list("colliders")
        .iter()
        .map(|c| SpringCollider {
            node: c.usize_at("node").unwrap_or(0),
            shape: collider_shape_v1(c.get("shape")),
        })
        .collect();

    let groups = ext
        .list("colliderGroups")
        .iter()
        .map(|g| ColliderGroup {
            name: g.get("name").and_then(Value::as_str).unwrap_or_default().to_string(),
            collider_indices: g.indices("colliders"),
        })
        .collect();

    let chains = ext
        .list("springs")
        .iter()
        .map(|s| SpringChain {
            name: s.get("name").and_then(Value::as_str).unwrap_or_default().to_string(),
            joints: s
                .list("joints")
                .iter()
                .filter_map(|j| {
                    Some(SpringJoint {
                        node: j.usize_at("node")?,
                        hit_radius: j.f32_or("hitRadius", 0.0),
                        stiffness: j.f32_or("stiffness", 1.0),
                        gravity_power: j.f32_or("gravityPower", 0.0),
                        gravity_dir: vec3(j.get("gravityDir")).unwrap_or(Vec3::NEG_Y),
                        drag_force: j.f32_or("dragForce", 0.5),
                    })
                })
                .collect(),
            collider_group_indices: s.indices("colliderGroups"),
        })
        .filter(|c: &SpringChain| !c.joints.is_empty())
        .collect();

    (chains, colliders, groups)
}

/// VRM 0.x keeps one node per collider group and shares physics
/// parameters across each bone group. The stiffness key is misspelled
/// `stiffiness` in the 0.x schema.
///
/// `bones` lists chain roots: every descendant of a root is simulated, one
/// chain per branch.
fn springs_v0(secondary: &Value, children: &[Vec<usize>]) -> Springs {
    let mut colliders = Vec::new();
    let mut groups = Vec::new();

    for (gi, group) in secondary.list("colliderGroups").iter().enumerate() {
        let node = group.usize_at("node").unwrap_or(0);
        let mut collider_indices = Vec::new();
        for c in group.list("colliders") {
            collider_indices.push(colliders.len());
            colliders.push(SpringCollider {
                node,
                shape: ColliderShape::Sphere {
                    offset: vec3(c.get("offset")).unwrap_or(Vec3::ZERO),
                    radius: c.f32_or("radius", 0.0),
                },
            });
        }
        groups.push(ColliderGroup {
            name: format!("colliderGroup_{gi}"),
            collider_indices,
        });
    }

    let mut chains = Vec::new();
    for group in secondary.list("boneGroups") {
        let stiffness = group
            .get("stiffiness")
            .or_else(|| group.get("stiffness"))
            .and_then(Value::as_f64)
            .unwrap_or(1.0) as f32;
        let gravity_power = group.f32_or("gravityPower", 0.0);
        let gravity_dir = vec3(group.get("gravityDir")).unwrap_or(Vec3::NEG_Y);
        let drag_force = group.f32_or("dragForce", 0.5);
        let hit_radius = group.f32_or("hitRadius", 0.0);
        let name = group
            .get("comment")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let collider_group_indices = group.indices("colliderGroups");

        for root in group.indices("bones") {
            for branch in descendant_branches(root, children) {
                chains.push(SpringChain {
                    name: name.to_string(),
                    joints: branch
                        .into_iter()
                        .map(|node| SpringJoint {
                            node,
                            hit_radius,
                            stiffness,
                            gravity_power,
                            gravity_dir,
                            drag_force,
                        })
                        .collect(),
                    collider_group_indices: collider_group_indices.clone(),
                });
            }
        }
    }

    (chains, colliders, groups)
}

/// Splits the subtree under `root` into linear branches.
///
/// The first branch follows first children from `root` to a leaf; every
/// other child starts a branch of its own. A branch is emitted after the
/// branch holding its parent. Out-of-range roots are kept as single joints
/// so validation can reject them.
fn descendant_branches(root: usize, children: &[Vec<usize>]) -> Vec<Vec<usize>> {
    let mut branches = Vec::new();
    let mut seen = HashSet::new();
    let mut starts = vec![root];
    while let Some(start) = starts.pop() {
        if !seen.insert(start) {
            continue;
        }
        let mut branch = vec![start];
        let mut node = start;
        while let Some((&first, rest)) = children.get(node).and_then(|c| c.split_first()) {
            if !seen.insert(first) {
                break;
            }
            starts.extend(rest.iter().rev());
            branch.push(first);
            node = first;
        }
        branches.push(branch);
    }
    branches
}
