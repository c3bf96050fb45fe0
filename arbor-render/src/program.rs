//! Shader programs: compile, validate, link and reflect WGSL stages.
//!
//! Each stage is parsed and validated with `naga` before it reaches the
//! driver, so failures carry readable diagnostics.  Linking checks that
//! every varying the fragment stage reads is written by the vertex stage
//! with the same type.  Attribute locations and resource bindings are
//! reflected once and cached; pipelines look them up by name.

use std::fmt;

use naga::front::wgsl;
use naga::valid::{Capabilities, ValidationFlags, Validator};
use naga::{Binding, Module, ShaderStage, TypeInner};
use rustc_hash::FxHashMap;
use thiserror::Error;
use wgpu::{Device, ShaderModule, ShaderModuleDescriptor, ShaderSource};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    Vertex,
    Fragment,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Vertex => f.write_str("vertex"),
            Stage::Fragment => f.write_str("fragment"),
        }
    }
}

#[derive(Error, Debug)]
pub enum ProgramError {
    #[error("{label}: {stage} shader failed to compile:\n{message}")]
    Compile {
        label: String,
        stage: Stage,
        message: String,
    },
    #[error("{label}: {stage} shader failed validation:\n{message}")]
    Validate {
        label: String,
        stage: Stage,
        message: String,
    },
    #[error("{label}: no {stage} entry point")]
    MissingEntryPoint { label: String, stage: Stage },
    #[error("{label}: link failed: {message}")]
    Link { label: String, message: String },
    #[error("{label}: no vertex attribute named '{name}'")]
    MissingAttribute { label: String, name: String },
    #[error("{label}: no resource named '{name}'")]
    MissingResource { label: String, name: String },
}

/// Reflected `(group, binding)` of a global resource.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResourceSlot {
    pub group: u32,
    pub binding: u32,
}

/// One validated stage.
#[derive(Debug)]
struct StageModule {
    source: String,
    module: Module,
    entry_point: String,
}

/// A validated, linked pair of WGSL stages with cached locations.
#[derive(Debug)]
pub struct ShaderProgram {
    label: String,
    vertex: StageModule,
    fragment: StageModule,
    attributes: FxHashMap<String, u32>,
    resources: FxHashMap<String, ResourceSlot>,
}

impl ShaderProgram {
    /// Compile and link.  Any failure is fatal; recompiling the same
    /// source would fail the same way.
    pub fn compile(
        label: &str,
        vertex_source: &str,
        fragment_source: &str,
    ) -> Result<Self, ProgramError> {
        let vertex = compile_stage(label, Stage::Vertex, vertex_source)?;
        let fragment = compile_stage(label, Stage::Fragment, fragment_source)?;

        link(label, &vertex, &fragment)?;

        let attributes = entry_inputs(&vertex)
            .into_iter()
            .map(|(name, location, _)| (name, location))
            .collect();

        let mut resources = FxHashMap::default();
        for stage in [&vertex, &fragment] {
            for (_, var) in stage.module.global_variables.iter() {
                if let (Some(name), Some(binding)) = (&var.name, &var.binding) {
                    resources.insert(
                        name.clone(),
                        ResourceSlot {
                            group: binding.group,
                            binding: binding.binding,
                        },
                    );
                }
            }
        }

        log::debug!(
            "program '{label}' linked: {} attribute(s), {} resource(s)",
            entry_inputs(&vertex).len(),
            resources.len()
        );

        Ok(Self {
            label: label.to_string(),
            vertex,
            fragment,
            attributes,
            resources,
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Shader location of a vertex attribute.
    pub fn attribute(&self, name: &str) -> Result<u32, ProgramError> {
        self.attributes
            .get(name)
            .copied()
            .ok_or_else(|| ProgramError::MissingAttribute {
                label: self.label.clone(),
                name: name.to_string(),
            })
    }

    /// Bind group slot of a uniform, texture or sampler.
    pub fn resource(&self, name: &str) -> Result<ResourceSlot, ProgramError> {
        self.resources
            .get(name)
            .copied()
            .ok_or_else(|| ProgramError::MissingResource {
                label: self.label.clone(),
                name: name.to_string(),
            })
    }

    pub fn attribute_count(&self) -> usize {
        self.attributes.len()
    }

    pub fn vertex_entry_point(&self) -> &str {
        &self.vertex.entry_point
    }

    pub fn fragment_entry_point(&self) -> &str {
        &self.fragment.entry_point
    }

    /// Hand both stages to the driver.
    pub fn create_modules(&self, device: &Device) -> (ShaderModule, ShaderModule) {
        let create = |stage: &StageModule, suffix: &str| {
            let label = format!("{}_{suffix}", self.label);
            device.create_shader_module(ShaderModuleDescriptor {
                label: Some(&label),
                source: ShaderSource::Wgsl(stage.source.clone().into()),
            })
        };
        (create(&self.vertex, "vs"), create(&self.fragment, "fs"))
    }
}

fn compile_stage(label: &str, stage: Stage, source: &str) -> Result<StageModule, ProgramError> {
    let module = wgsl::parse_str(source).map_err(|e| ProgramError::Compile {
        label: label.to_string(),
        stage,
        message: e.emit_to_string(source),
    })?;

    Validator::new(ValidationFlags::all(), Capabilities::all())
        .validate(&module)
        .map_err(|e| ProgramError::Validate {
            label: label.to_string(),
            stage,
            message: e.emit_to_string(source),
        })?;

    let naga_stage = match stage {
        Stage::Vertex => ShaderStage::Vertex,
        Stage::Fragment => ShaderStage::Fragment,
    };
    let entry_point = module
        .entry_points
        .iter()
        .find(|ep| ep.stage == naga_stage)
        .map(|ep| ep.name.clone())
        .ok_or_else(|| ProgramError::MissingEntryPoint {
            label: label.to_string(),
            stage,
        })?;

    Ok(StageModule {
        source: source.to_string(),
        module,
        entry_point,
    })
}

/// `(name, location, type)` of every located input of the stage's entry point.
fn entry_inputs(stage: &StageModule) -> Vec<(String, u32, TypeInner)> {
    let module = &stage.module;
    let Some(ep) = module.entry_points.iter().find(|ep| ep.name == stage.entry_point) else {
        return Vec::new();
    };

    let mut out = Vec::new();
    for arg in &ep.function.arguments {
        let name = arg.name.clone().unwrap_or_default();
        collect_located(module, arg.ty, arg.binding.as_ref(), name, &mut out);
    }
    out
}

/// `(name, location, type)` of every located output of the stage's entry point.
fn entry_outputs(stage: &StageModule) -> Vec<(String, u32, TypeInner)> {
    let module = &stage.module;
    let mut out = Vec::new();
    let result = module
        .entry_points
        .iter()
        .find(|ep| ep.name == stage.entry_point)
        .and_then(|ep| ep.function.result.as_ref());
    if let Some(result) = result {
        collect_located(module, result.ty, result.binding.as_ref(), String::new(), &mut out);
    }
    out
}

fn collect_located(
    module: &Module,
    ty: naga::Handle<naga::Type>,
    binding: Option<&Binding>,
    name: String,
    out: &mut Vec<(String, u32, TypeInner)>,
) {
    match (binding, &module.types[ty].inner) {
        (Some(Binding::Location { location, .. }), inner) => {
            out.push((name, *location, inner.clone()));
        }
        (None, TypeInner::Struct { members, .. }) => {
            for member in members {
                collect_located(
                    module,
                    member.ty,
                    member.binding.as_ref(),
                    member.name.clone().unwrap_or_default(),
                    out,
                );
            }
        }
        _ => {}
    }
}

fn link(label: &str, vertex: &StageModule, fragment: &StageModule) -> Result<(), ProgramError> {
    let outputs = entry_outputs(vertex);

    for (name, location, inner) in entry_inputs(fragment) {
        match outputs.iter().find(|(_, l, _)| *l == location) {
            None => {
                return Err(ProgramError::Link {
                    label: label.to_string(),
                    message: format!(
                        "fragment input '{name}' at location {location} is not written by the vertex stage"
                    ),
                });
            }
            Some((out_name, _, out_inner)) if *out_inner != inner => {
                return Err(ProgramError::Link {
                    label: label.to_string(),
                    message: format!(
                        "location {location}: vertex output '{out_name}' and fragment input '{name}' differ in type"
                    ),
                });
            }
            Some(_) => {}
        }
    }
    Ok(())
}
