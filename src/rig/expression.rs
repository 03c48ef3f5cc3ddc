//! Expression (blend shape) state and the time-driven blink signal.

use std::collections::HashMap;

use super::vrm::VrmModel;

/// Angular frequency of the blink sinusoid (rad/s).
const BLINK_RATE: f32 = 2.7;
/// Normalized sinusoid level above which the eyes are closed.
const BLINK_THRESHOLD: f32 = 0.98;

/// Blink weight at `t` seconds: 1.0 (closed) near the sinusoid's peak,
/// 0.0 (open) otherwise.
pub fn blink(t: f32) -> f32 {
    let level = ((BLINK_RATE * t).sin() + 1.0) / 2.0;
    if level > BLINK_THRESHOLD {
        1.0
    } else {
        0.0
    }
}

/// Current expression values, resolved to morph target weights on demand.
#[derive(Debug, Default, Clone)]
pub struct ExpressionController {
    values: HashMap<String, f32>,
}

impl ExpressionController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `name` to `value` (clamped to 0..1). Binary expressions snap.
    pub fn set(&mut self, model: &VrmModel, name: &str, value: f32) {
        let mut value = value.clamp(0.0, 1.0);
        if model.binary_expressions.contains(name) {
            value = if value > 0.5 { 1.0 } else { 0.0 };
        }
        self.values.insert(name.to_string(), value);
    }

    pub fn get(&self, name: &str) -> f32 {
        self.values.get(name).copied().unwrap_or(0.0)
    }

    pub fn reset(&mut self) {
        self.values.clear();
    }

    /// Morph weights per mesh, sized to each mesh's morph target count.
    ///
    /// Meshes no active expression touches are omitted.
    pub fn morph_weights(&self, model: &VrmModel) -> HashMap<usize, Vec<f32>> {
        let mut out: HashMap<usize, Vec<f32>> = HashMap::new();
        for (name, &value) in &self.values {
            if value <= 0.0 {
                continue;
            }
            let Some(binds) = model.expression_binds.get(name) else {
                continue;
            };
            for bind in binds {
                let Some(mesh) = model.meshes.get(bind.mesh) else {
                    continue;
                };
                let targets = mesh
                    .primitives
                    .iter()
                    .map(|p| p.morph_deltas.len())
                    .max()
                    .unwrap_or(0);
                if bind.morph_index >= targets {
                    continue;
                }
                let weights = out.entry(bind.mesh).or_insert_with(|| vec![0.0; targets]);
                let w = &mut weights[bind.morph_index];
                *w = (*w + bind.weight * value).min(1.0);
            }
        }
        out
    }
}
