//! Constant-buffer layout description of a shader.
//!
//! A [`ShaderReflection`] lists every uniform buffer a shader declares with the byte layout
//! of its members. It is read either from a JSON side-car written next to the compiled
//! shader or derived from a `naga` module.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::ShaderError;

/// Declared type of a shader variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShaderVariableType {
    Float,
    Int,
    Float4,
    Float4x4,
    Struct,
}

impl ShaderVariableType {
    /// Size in bytes of a single element; 0 for structs
    pub fn size(&self) -> u32 {
        match self {
            ShaderVariableType::Float | ShaderVariableType::Int => 4,
            ShaderVariableType::Float4 => 16,
            ShaderVariableType::Float4x4 => 64,
            ShaderVariableType::Struct => 0,
        }
    }
}

/// One member of a constant buffer or struct.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShaderVariable {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: ShaderVariableType,
    /// Byte offset relative to the enclosing buffer or struct
    pub offset: u32,
    /// Element count; 0 when the variable is not an array
    #[serde(default)]
    pub array_elements: u32,
    #[serde(default)]
    pub array_stride: u32,
    /// Layout of a `struct` member, looked up in [`ShaderReflection::structs`]
    #[serde(rename = "struct", default, skip_serializing_if = "Option::is_none")]
    pub struct_name: Option<String>,
}

impl ShaderVariable {
    pub fn is_array(&self) -> bool {
        self.array_elements > 0
    }
}

/// Byte layout of a constant buffer or of a struct referenced by one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShaderTypeInfo {
    pub name: String,
    #[serde(default)]
    pub binding: u32,
    pub size: u32,
    pub members: Vec<ShaderVariable>,
}

impl ShaderTypeInfo {
    pub fn member(&self, name: &str) -> Option<&ShaderVariable> {
        self.members.iter().find(|member| member.name == name)
    }
}

/// Every constant buffer declared by one shader.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShaderReflection {
    pub buffers: Vec<ShaderTypeInfo>,
    #[serde(default)]
    pub structs: Vec<ShaderTypeInfo>,
}

impl ShaderReflection {
    /// Parse and validate a JSON side-car
    pub fn from_json(text: &str) -> Result<Self, ShaderError> {
        let reflection: ShaderReflection =
            serde_json::from_str(text).map_err(|e| ShaderError::Parse(e.to_string()))?;
        reflection.validate()?;
        Ok(reflection)
    }

    pub fn to_json(&self) -> Result<String, ShaderError> {
        serde_json::to_string_pretty(self).map_err(|e| ShaderError::Parse(e.to_string()))
    }

    /// Layout of the constant buffer at `binding`
    pub fn buffer(&self, binding: u32) -> Option<&ShaderTypeInfo> {
        self.buffers.iter().find(|buffer| buffer.binding == binding)
    }

    pub fn find_struct(&self, name: &str) -> Option<&ShaderTypeInfo> {
        self.structs.iter().find(|info| info.name == name)
    }

    /// Check that every struct reference resolves and every member fits its container.
    pub fn validate(&self) -> Result<(), ShaderError> {
        for info in self.buffers.iter().chain(self.structs.iter()) {
            for member in &info.members {
                let element_size = match member.ty {
                    ShaderVariableType::Struct => {
                        let name = member
                            .struct_name
                            .as_deref()
                            .ok_or_else(|| ShaderError::UnknownStruct(member.name.clone()))?;
                        self.find_struct(name)
                            .ok_or_else(|| ShaderError::UnknownStruct(name.to_string()))?
                            .size
                    }
                    ty => ty.size(),
                };
                let extent = if member.is_array() {
                    member.array_stride as u64 * (member.array_elements as u64 - 1)
                        + element_size as u64
                } else {
                    element_size as u64
                };
                if member.offset as u64 + extent > info.size as u64 {
                    return Err(ShaderError::Parse(format!(
                        "member {}.{} exceeds {} bytes",
                        info.name, member.name, info.size
                    )));
                }
            }
        }
        Ok(())
    }

    /// Derive the layout of every uniform buffer declared in a `naga` module.
    pub fn from_naga(module: &naga::Module) -> Result<Self, ShaderError> {
        let mut builder = NagaReflector {
            module,
            structs: HashMap::new(),
            order: Vec::new(),
        };
        let mut buffers = Vec::new();
        for (_, variable) in module.global_variables.iter() {
            if variable.space != naga::AddressSpace::Uniform {
                continue;
            }
            let Some(binding) = &variable.binding else {
                continue;
            };
            let ty = &module.types[variable.ty];
            let naga::TypeInner::Struct { members, span } = &ty.inner else {
                return Err(ShaderError::UnsupportedType(format!(
                    "uniform {:?} is not a struct",
                    variable.name
                )));
            };
            let name = variable
                .name
                .clone()
                .or_else(|| ty.name.clone())
                .unwrap_or_else(|| format!("buffer{}", binding.binding));
            buffers.push(ShaderTypeInfo {
                name,
                binding: binding.binding,
                size: *span,
                members: builder.members(members)?,
            });
        }
        buffers.sort_by_key(|buffer| buffer.binding);

        let mut structs = builder.structs;
        let structs = builder
            .order
            .iter()
            .filter_map(|name| structs.remove(name))
            .collect();
        let reflection = Self { buffers, structs };
        reflection.validate()?;
        Ok(reflection)
    }
}

struct NagaReflector<'a> {
    module: &'a naga::Module,
    structs: HashMap<String, ShaderTypeInfo>,
    order: Vec<String>,
}

impl NagaReflector<'_> {
    fn members(
        &mut self,
        members: &[naga::StructMember],
    ) -> Result<Vec<ShaderVariable>, ShaderError> {
        members
            .iter()
            .map(|member| {
                let name = member.name.clone().unwrap_or_default();
                let mut variable = self.variable(member.ty, &name)?;
                variable.name = name;
                variable.offset = member.offset;
                Ok(variable)
            })
            .collect()
    }

    fn variable(
        &mut self,
        handle: naga::Handle<naga::Type>,
        member_name: &str,
    ) -> Result<ShaderVariable, ShaderError> {
        use naga::{ScalarKind, TypeInner, VectorSize};

        let module = self.module;
        let ty = &module.types[handle];
        let scalar = |ty: ShaderVariableType| ShaderVariable {
            name: String::new(),
            ty,
            offset: 0,
            array_elements: 0,
            array_stride: 0,
            struct_name: None,
        };
        match &ty.inner {
            TypeInner::Scalar(s) if s.width == 4 => match s.kind {
                ScalarKind::Float => Ok(scalar(ShaderVariableType::Float)),
                ScalarKind::Sint | ScalarKind::Uint => Ok(scalar(ShaderVariableType::Int)),
                _ => Err(ShaderError::UnsupportedType(member_name.to_string())),
            },
            TypeInner::Vector {
                size: VectorSize::Quad,
                scalar: s,
            } if s.kind == ScalarKind::Float && s.width == 4 => {
                Ok(scalar(ShaderVariableType::Float4))
            }
            TypeInner::Matrix {
                columns: VectorSize::Quad,
                rows: VectorSize::Quad,
                scalar: s,
            } if s.width == 4 => Ok(scalar(ShaderVariableType::Float4x4)),
            TypeInner::Struct { members, span } => {
                let name = ty
                    .name
                    .clone()
                    .unwrap_or_else(|| format!("{}_t", member_name));
                if !self.structs.contains_key(&name) {
                    let info = ShaderTypeInfo {
                        name: name.clone(),
                        binding: 0,
                        size: *span,
                        members: self.members(members)?,
                    };
                    self.structs.insert(name.clone(), info);
                    self.order.push(name.clone());
                }
                let mut variable = scalar(ShaderVariableType::Struct);
                variable.struct_name = Some(name);
                Ok(variable)
            }
            TypeInner::Array {
                base,
                size: naga::ArraySize::Constant(count),
                stride,
            } => {
                let mut variable = self.variable(*base, member_name)?;
                if variable.is_array() {
                    return Err(ShaderError::UnsupportedType(format!(
                        "nested array {}",
                        member_name
                    )));
                }
                variable.array_elements = count.get();
                variable.array_stride = *stride;
                Ok(variable)
            }
            _ => Err(ShaderError::UnsupportedType(member_name.to_string())),
        }
    }
}
