//! Typed writes into constant-buffer memory addressed by variable name.
//!
//! ```ignore
//! let mut mapped = writer.begin(memory)?;
//! mapped.value("ModelMatrix")?.set(world)?;
//! mapped.value("pointLight")?.at(2)?.get("lightColor")?.set(color)?;
//! ```

use std::sync::Arc;

use glam::{Mat4, Vec4};
use serde::{Deserialize, Serialize};

use super::reflection::{ShaderReflection, ShaderTypeInfo, ShaderVariable, ShaderVariableType};
use super::ShaderError;

/// A value that can be stored in a shader variable of one declared type.
pub trait ShaderValue: Sized {
    const TYPE: ShaderVariableType;

    fn write_to(&self, out: &mut [u8]);

    fn read_from(bytes: &[u8]) -> Self;
}

impl ShaderValue for f32 {
    const TYPE: ShaderVariableType = ShaderVariableType::Float;

    fn write_to(&self, out: &mut [u8]) {
        out.copy_from_slice(bytemuck::bytes_of(self));
    }

    fn read_from(bytes: &[u8]) -> Self {
        bytemuck::pod_read_unaligned(bytes)
    }
}

impl ShaderValue for i32 {
    const TYPE: ShaderVariableType = ShaderVariableType::Int;

    fn write_to(&self, out: &mut [u8]) {
        out.copy_from_slice(bytemuck::bytes_of(self));
    }

    fn read_from(bytes: &[u8]) -> Self {
        bytemuck::pod_read_unaligned(bytes)
    }
}

impl ShaderValue for [f32; 4] {
    const TYPE: ShaderVariableType = ShaderVariableType::Float4;

    fn write_to(&self, out: &mut [u8]) {
        out.copy_from_slice(bytemuck::bytes_of(self));
    }

    fn read_from(bytes: &[u8]) -> Self {
        bytemuck::pod_read_unaligned(bytes)
    }
}

impl ShaderValue for Vec4 {
    const TYPE: ShaderVariableType = ShaderVariableType::Float4;

    fn write_to(&self, out: &mut [u8]) {
        self.to_array().write_to(out);
    }

    fn read_from(bytes: &[u8]) -> Self {
        Vec4::from_array(<[f32; 4]>::read_from(bytes))
    }
}

impl ShaderValue for Mat4 {
    const TYPE: ShaderVariableType = ShaderVariableType::Float4x4;

    /// Column-major, matching WGSL and SPIR-V default matrix layout
    fn write_to(&self, out: &mut [u8]) {
        out.copy_from_slice(bytemuck::bytes_of(&self.to_cols_array()));
    }

    fn read_from(bytes: &[u8]) -> Self {
        Mat4::from_cols_array(&bytemuck::pod_read_unaligned::<[f32; 16]>(bytes))
    }
}

/// A dynamically typed shader value, as stored in custom material parameter maps.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterValue {
    Float(f32),
    Int(i32),
    Float4([f32; 4]),
    Float4x4([f32; 16]),
}

impl ParameterValue {
    pub fn variable_type(&self) -> ShaderVariableType {
        match self {
            ParameterValue::Float(_) => ShaderVariableType::Float,
            ParameterValue::Int(_) => ShaderVariableType::Int,
            ParameterValue::Float4(_) => ShaderVariableType::Float4,
            ParameterValue::Float4x4(_) => ShaderVariableType::Float4x4,
        }
    }
}

impl From<f32> for ParameterValue {
    fn from(value: f32) -> Self {
        ParameterValue::Float(value)
    }
}

impl From<i32> for ParameterValue {
    fn from(value: i32) -> Self {
        ParameterValue::Int(value)
    }
}

impl From<Vec4> for ParameterValue {
    fn from(value: Vec4) -> Self {
        ParameterValue::Float4(value.to_array())
    }
}

impl From<Mat4> for ParameterValue {
    fn from(value: Mat4) -> Self {
        ParameterValue::Float4x4(value.to_cols_array())
    }
}

/// Writes one constant buffer of a shader.
///
/// The writer is created once per buffer layout and reused every frame; only the memory
/// handed to [`begin`](Self::begin) changes.
#[derive(Debug, Clone)]
pub struct ShaderBufferWriter {
    reflection: Arc<ShaderReflection>,
    binding: u32,
}

impl ShaderBufferWriter {
    pub fn new(reflection: Arc<ShaderReflection>, binding: u32) -> Result<Self, ShaderError> {
        if reflection.buffer(binding).is_none() {
            return Err(ShaderError::UnknownBuffer(binding));
        }
        Ok(Self {
            reflection,
            binding,
        })
    }

    pub fn binding(&self) -> u32 {
        self.binding
    }

    pub fn layout(&self) -> &ShaderTypeInfo {
        // Checked in `new`.
        &self.reflection.buffers[self.buffer_index()]
    }

    fn buffer_index(&self) -> usize {
        self.reflection
            .buffers
            .iter()
            .position(|buffer| buffer.binding == self.binding)
            .unwrap_or_default()
    }

    /// Byte size of the buffer
    pub fn size(&self) -> u32 {
        self.layout().size
    }

    /// Start writing into `memory`, which must cover the whole buffer.
    pub fn begin<'a>(&'a self, memory: &'a mut [u8]) -> Result<MappedBuffer<'a>, ShaderError> {
        let layout = self.layout();
        if memory.len() < layout.size as usize {
            return Err(ShaderError::OutOfBounds {
                offset: 0,
                size: layout.size as usize,
                len: memory.len(),
            });
        }
        Ok(MappedBuffer {
            reflection: &self.reflection,
            layout,
            memory,
        })
    }
}

/// Constant-buffer memory open for writing.
pub struct MappedBuffer<'a> {
    reflection: &'a ShaderReflection,
    layout: &'a ShaderTypeInfo,
    memory: &'a mut [u8],
}

impl<'a> MappedBuffer<'a> {
    /// Proxy for a top-level variable
    pub fn value(&mut self, name: &str) -> Result<ValueProxy<'_>, ShaderError> {
        let variable = self
            .layout
            .member(name)
            .ok_or_else(|| ShaderError::UnknownVariable(name.to_string()))?;
        Ok(ValueProxy {
            reflection: self.reflection,
            variable,
            element: None,
            base: 0,
            memory: &mut *self.memory,
        })
    }

    /// Shorthand for `value(name)?.set(value)`
    pub fn set<T: ShaderValue>(&mut self, name: &str, value: T) -> Result<(), ShaderError> {
        self.value(name)?.set(value)
    }

    pub fn read<T: ShaderValue>(&mut self, name: &str) -> Result<T, ShaderError> {
        self.value(name)?.read()
    }

    /// Write a dynamically typed value if the buffer declares `name`; returns whether it did.
    pub fn set_parameter(&mut self, name: &str, value: &ParameterValue) -> Result<bool, ShaderError> {
        if self.layout.member(name).is_none() {
            return Ok(false);
        }
        let proxy = self.value(name)?;
        match *value {
            ParameterValue::Float(v) => proxy.set(v)?,
            ParameterValue::Int(v) => proxy.set(v)?,
            ParameterValue::Float4(v) => proxy.set(v)?,
            ParameterValue::Float4x4(v) => proxy.set(Mat4::from_cols_array(&v))?,
        }
        Ok(true)
    }

    /// Zero the whole buffer
    pub fn clear(&mut self) {
        let size = self.layout.size as usize;
        self.memory[..size].fill(0);
    }
}

/// Name- and index-addressable view of one variable inside a mapped buffer.
pub struct ValueProxy<'b> {
    reflection: &'b ShaderReflection,
    variable: &'b ShaderVariable,
    element: Option<u32>,
    /// Offset of the enclosing buffer or struct element
    base: usize,
    memory: &'b mut [u8],
}

impl<'b> ValueProxy<'b> {
    pub fn variable(&self) -> &ShaderVariable {
        self.variable
    }

    /// Select array element `index`
    pub fn at(mut self, index: u32) -> Result<Self, ShaderError> {
        if !self.variable.is_array() {
            return Err(ShaderError::NotAnArray(self.variable.name.clone()));
        }
        if index >= self.variable.array_elements {
            return Err(ShaderError::IndexOutOfRange {
                name: self.variable.name.clone(),
                index,
                count: self.variable.array_elements,
            });
        }
        self.element = Some(index);
        Ok(self)
    }

    /// Select a member of a struct variable; arrays of structs default to element 0.
    pub fn get(self, name: &str) -> Result<Self, ShaderError> {
        if self.variable.ty != ShaderVariableType::Struct {
            return Err(ShaderError::NotAStruct(self.variable.name.clone()));
        }
        let struct_name = self
            .variable
            .struct_name
            .as_deref()
            .ok_or_else(|| ShaderError::UnknownStruct(self.variable.name.clone()))?;
        let layout = self
            .reflection
            .find_struct(struct_name)
            .ok_or_else(|| ShaderError::UnknownStruct(struct_name.to_string()))?;
        let member = layout
            .member(name)
            .ok_or_else(|| ShaderError::UnknownVariable(format!("{}.{}", struct_name, name)))?;
        Ok(Self {
            base: self.offset(),
            reflection: self.reflection,
            variable: member,
            element: None,
            memory: self.memory,
        })
    }

    /// Absolute byte offset of the selected element
    pub fn offset(&self) -> usize {
        let element = self.element.unwrap_or(0) as usize;
        self.base + self.variable.offset as usize + element * self.variable.array_stride as usize
    }

    fn range<T: ShaderValue>(&self) -> Result<std::ops::Range<usize>, ShaderError> {
        if self.variable.ty != T::TYPE {
            return Err(ShaderError::TypeMismatch {
                name: self.variable.name.clone(),
                expected: self.variable.ty,
                found: T::TYPE,
            });
        }
        let start = self.offset();
        let size = T::TYPE.size() as usize;
        if start + size > self.memory.len() {
            return Err(ShaderError::OutOfBounds {
                offset: start,
                size,
                len: self.memory.len(),
            });
        }
        Ok(start..start + size)
    }

    /// Store `value`; a type that differs from the declared one is rejected untouched.
    pub fn set<T: ShaderValue>(self, value: T) -> Result<(), ShaderError> {
        let range = self.range::<T>()?;
        value.write_to(&mut self.memory[range]);
        Ok(())
    }

    pub fn read<T: ShaderValue>(self) -> Result<T, ShaderError> {
        let range = self.range::<T>()?;
        Ok(T::read_from(&self.memory[range]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lights_reflection() -> Arc<ShaderReflection> {
        let text = r#"{
            "buffers": [
                { "name": "transform", "binding": 0, "size": 80, "members": [
                    { "name": "ModelMatrix", "type": "float4x4", "offset": 0 },
                    { "name": "CameraPosition", "type": "float4", "offset": 64 }
                ] },
                { "name": "lights", "binding": 2, "size": 112, "members": [
                    { "name": "count", "type": "int", "offset": 0 },
                    { "name": "pointLight", "type": "struct", "offset": 16,
                      "arrayElements": 2, "arrayStride": 48, "struct": "PointLight" }
                ] }
            ],
            "structs": [
                { "name": "PointLight", "size": 48, "members": [
                    { "name": "lightPosition", "type": "float4", "offset": 0 },
                    { "name": "lightColor", "type": "float4", "offset": 16 },
                    { "name": "linearAttenuation", "type": "float", "offset": 36 }
                ] }
            ]
        }"#;
        Arc::new(ShaderReflection::from_json(text).unwrap())
    }

    #[test]
    fn writes_array_struct_member_at_computed_offset() {
        let writer = ShaderBufferWriter::new(lights_reflection(), 2).unwrap();
        let mut memory = vec![0u8; 112];
        let mut mapped = writer.begin(&mut memory).unwrap();
        mapped
            .value("pointLight")
            .unwrap()
            .at(1)
            .unwrap()
            .get("linearAttenuation")
            .unwrap()
            .set(0.25f32)
            .unwrap();
        mapped.set("count", 2i32).unwrap();
        // 16 (array) + 48 (element 1) + 36 (member)
        assert_eq!(&memory[100..104], &0.25f32.to_le_bytes());
        assert_eq!(&memory[0..4], &2i32.to_le_bytes());
    }

    #[test]
    fn matrix_round_trips_bit_identical() {
        let writer = ShaderBufferWriter::new(lights_reflection(), 0).unwrap();
        let matrix = Mat4::from_cols_array(&[
            1.5, -2.0, 3.25, 0.0, 4.0, 5.5, -6.0, 0.0, 7.0, 8.0, 9.125, 0.0, 0.1, 0.2, 0.3, 1.0,
        ]);
        let mut memory = vec![0u8; 80];
        let mut mapped = writer.begin(&mut memory).unwrap();
        mapped.set("ModelMatrix", matrix).unwrap();
        let read: Mat4 = mapped.read("ModelMatrix").unwrap();
        assert_eq!(read.to_cols_array(), matrix.to_cols_array());
    }

    #[test]
    fn type_mismatch_leaves_buffer_unchanged() {
        let writer = ShaderBufferWriter::new(lights_reflection(), 0).unwrap();
        let mut memory = vec![7u8; 80];
        let mut mapped = writer.begin(&mut memory).unwrap();
        let result = mapped.set("CameraPosition", 1.0f32);
        assert!(matches!(result, Err(ShaderError::TypeMismatch { .. })));
        assert!(memory.iter().all(|&b| b == 7));
    }

    #[test]
    fn addressing_errors() {
        let writer = ShaderBufferWriter::new(lights_reflection(), 2).unwrap();
        let mut memory = vec![0u8; 112];
        let mut mapped = writer.begin(&mut memory).unwrap();
        assert!(matches!(
            mapped.value("pointLight").unwrap().at(2),
            Err(ShaderError::IndexOutOfRange { .. })
        ));
        assert!(matches!(
            mapped.value("count").unwrap().at(0),
            Err(ShaderError::NotAnArray(_))
        ));
        assert!(matches!(
            mapped.value("missing"),
            Err(ShaderError::UnknownVariable(_))
        ));
        assert!(ShaderBufferWriter::new(lights_reflection(), 1).is_err());
        let mut short = vec![0u8; 16];
        assert!(writer.begin(&mut short).is_err());
    }

    #[test]
    fn parameters_skip_undeclared_names() {
        let writer = ShaderBufferWriter::new(lights_reflection(), 0).unwrap();
        let mut memory = vec![0u8; 80];
        let mut mapped = writer.begin(&mut memory).unwrap();
        let color = ParameterValue::from(Vec4::new(1.0, 2.0, 3.0, 4.0));
        assert!(mapped.set_parameter("CameraPosition", &color).unwrap());
        assert!(!mapped.set_parameter("glow", &color).unwrap());
        assert_eq!(
            mapped.read::<Vec4>("CameraPosition").unwrap(),
            Vec4::new(1.0, 2.0, 3.0, 4.0)
        );
    }
}
