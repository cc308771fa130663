//! WGSL interface reflection.
//!
//! Parses and validates both shader modules with naga and records, by name,
//! every parameter an entry point actually consumes:
//! - resource globals (`var<uniform>`, textures) statically used by the entry
//!   point; declared-but-unused globals are left out, the same way a GL driver
//!   optimizes away unused uniforms
//! - vertex inputs with `@location`
//! - fragment outputs with `@location`

use std::collections::BTreeMap;

use naga::valid::{Capabilities, ValidationFlags, Validator};

use super::ParamLocation;
use crate::error::BackendError;

/// Parameters and outputs consumed by a compiled program.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgramInterface {
    params: BTreeMap<String, ParamLocation>,
    outputs: Vec<u32>,
}

impl ProgramInterface {
    /// Reflects a vertex + fragment pair. `label` is used in error messages.
    pub fn from_wgsl(label: &str, vertex: &str, fragment: &str) -> Result<Self, BackendError> {
        let mut interface = Self::default();
        interface.absorb(label, vertex, naga::ShaderStage::Vertex)?;
        interface.absorb(label, fragment, naga::ShaderStage::Fragment)?;
        interface.outputs.sort_unstable();
        interface.outputs.dedup();
        Ok(interface)
    }

    /// Location of `name`, or `None` if the program does not consume it.
    pub fn location(&self, name: &str) -> Option<ParamLocation> {
        self.params.get(name).copied()
    }

    /// Reverse lookup used by the software backend.
    pub fn name_of(&self, location: ParamLocation) -> Option<&str> {
        self.params
            .iter()
            .find(|(_, l)| **l == location)
            .map(|(n, _)| n.as_str())
    }

    /// All consumed parameters in name order.
    pub fn params(&self) -> impl Iterator<Item = (&str, ParamLocation)> {
        self.params.iter().map(|(n, l)| (n.as_str(), *l))
    }

    /// Resource bindings (textures and uniforms), sorted by binding index.
    pub fn resource_bindings(&self) -> Vec<ParamLocation> {
        let mut out: Vec<ParamLocation> = self
            .params
            .values()
            .copied()
            .filter(|l| !matches!(l, ParamLocation::Attribute { .. }))
            .collect();
        out.sort_by_key(|l| match *l {
            ParamLocation::Texture { group, binding }
            | ParamLocation::Uniform { group, binding, .. } => (group, binding),
            ParamLocation::Attribute { location } => (u32::MAX, location),
        });
        out
    }

    /// Fragment output locations, ascending.
    pub fn outputs(&self) -> &[u32] {
        &self.outputs
    }

    fn absorb(
        &mut self,
        label: &str,
        source: &str,
        stage: naga::ShaderStage,
    ) -> Result<(), BackendError> {
        let module = naga::front::wgsl::parse_str(source).map_err(|e| BackendError::Shader {
            label: label.to_string(),
            message: e.emit_to_string(source),
        })?;

        let info = Validator::new(ValidationFlags::all(), Capabilities::all())
            .validate(&module)
            .map_err(|e| BackendError::Shader {
                label: label.to_string(),
                message: e.emit_to_string(source),
            })?;

        let Some((index, entry)) = module
            .entry_points
            .iter()
            .enumerate()
            .find(|(_, ep)| ep.stage == stage)
        else {
            return Err(BackendError::Shader {
                label: label.to_string(),
                message: format!("no {stage:?} entry point"),
            });
        };

        let usage = info.get_entry_point(index);
        for (handle, global) in module.global_variables.iter() {
            if usage[handle].is_empty() {
                continue;
            }
            let (Some(name), Some(binding)) = (&global.name, &global.binding) else {
                continue;
            };
            let location = match global.space {
                naga::AddressSpace::Uniform => ParamLocation::Uniform {
                    group: binding.group,
                    binding: binding.binding,
                    size: uniform_size(&module.types[global.ty].inner),
                },
                naga::AddressSpace::Handle => ParamLocation::Texture {
                    group: binding.group,
                    binding: binding.binding,
                },
                _ => continue,
            };
            self.params.insert(name.clone(), location);
        }

        match stage {
            naga::ShaderStage::Vertex => {
                for arg in &entry.function.arguments {
                    collect_locations(&module, arg.name.as_deref(), arg.ty, arg.binding.as_ref())
                        .into_iter()
                        .for_each(|(name, location)| {
                            self.params
                                .insert(name, ParamLocation::Attribute { location });
                        });
                }
            }
            _ => {
                if let Some(result) = &entry.function.result {
                    self.outputs.extend(
                        collect_locations(&module, Some(""), result.ty, result.binding.as_ref())
                            .into_iter()
                            .map(|(_, location)| location),
                    );
                }
            }
        }

        Ok(())
    }
}

/// `(name, location)` for a binding that is either a direct `@location` or a
/// struct whose members carry locations. Builtins are skipped.
fn collect_locations(
    module: &naga::Module,
    name: Option<&str>,
    ty: naga::Handle<naga::Type>,
    binding: Option<&naga::Binding>,
) -> Vec<(String, u32)> {
    match binding {
        Some(naga::Binding::Location { location, .. }) => name
            .map(|n| vec![(n.to_string(), *location)])
            .unwrap_or_default(),
        Some(_) => Vec::new(),
        None => match &module.types[ty].inner {
            naga::TypeInner::Struct { members, .. } => members
                .iter()
                .filter_map(|m| match (&m.name, &m.binding) {
                    (Some(n), Some(naga::Binding::Location { location, .. })) => {
                        Some((n.clone(), *location))
                    }
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        },
    }
}

/// Byte size of a uniform value, padded to 16 like a std140 slot.
fn uniform_size(inner: &naga::TypeInner) -> u32 {
    let raw = match inner {
        naga::TypeInner::Scalar(scalar) => u32::from(scalar.width),
        naga::TypeInner::Vector { size, scalar } => *size as u32 * u32::from(scalar.width),
        naga::TypeInner::Matrix {
            columns, scalar, ..
        } => *columns as u32 * 4 * u32::from(scalar.width),
        _ => 16,
    };
    raw.div_ceil(16) * 16
}

#[cfg(test)]
mod tests {
    use super::*;

    const VS: &str = r#"
@vertex
fn vs_main(@location(0) position: vec2<f32>) -> @builtin(position) vec4<f32> {
    return vec4<f32>(position, 0.0, 1.0);
}
"#;

    const FS: &str = r#"
@group(0) @binding(0) var posTex: texture_2d<f32>;
@group(0) @binding(1) var<uniform> dt: f32;
@group(0) @binding(2) var<uniform> unused: f32;

struct Out {
    @location(0) a: vec4<f32>,
    @location(2) b: vec4<f32>,
}

@fragment
fn fs_main(@builtin(position) coord: vec4<f32>) -> Out {
    let v = textureLoad(posTex, vec2<i32>(coord.xy), 0);
    var out: Out;
    out.a = v * dt;
    out.b = v;
    return out;
}
"#;

    #[test]
    fn resolves_used_globals_and_attributes() {
        let iface = ProgramInterface::from_wgsl("test", VS, FS).unwrap();
        assert_eq!(
            iface.location("posTex"),
            Some(ParamLocation::Texture { group: 0, binding: 0 })
        );
        assert_eq!(
            iface.location("dt"),
            Some(ParamLocation::Uniform { group: 0, binding: 1, size: 16 })
        );
        assert_eq!(
            iface.location("position"),
            Some(ParamLocation::Attribute { location: 0 })
        );
    }

    #[test]
    fn unused_global_is_not_resolved() {
        let iface = ProgramInterface::from_wgsl("test", VS, FS).unwrap();
        assert_eq!(iface.location("unused"), None);
        assert_eq!(iface.location("neverDeclared"), None);
    }

    #[test]
    fn fragment_outputs_from_struct_members() {
        let iface = ProgramInterface::from_wgsl("test", VS, FS).unwrap();
        assert_eq!(iface.outputs(), &[0, 2]);
    }

    #[test]
    fn reverse_lookup() {
        let iface = ProgramInterface::from_wgsl("test", VS, FS).unwrap();
        assert_eq!(
            iface.name_of(ParamLocation::Texture { group: 0, binding: 0 }),
            Some("posTex")
        );
    }

    #[test]
    fn parse_error_is_reported() {
        let err = ProgramInterface::from_wgsl("broken", "fn (", FS).unwrap_err();
        assert!(matches!(err, BackendError::Shader { .. }));
    }
}
