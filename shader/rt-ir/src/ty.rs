use crate::*;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ValueType {
  Unit,
  Bool,
  U32,
  U64,
  F32,
  Vec3,
  UVec3,
}

impl ValueType {
  /// memory footprint when stored to scratch, shared or global memory. bool is stored as u32.
  pub fn byte_size(self) -> u32 {
    match self {
      ValueType::Unit => 0,
      ValueType::Bool | ValueType::U32 | ValueType::F32 => 4,
      ValueType::U64 => 8,
      ValueType::Vec3 | ValueType::UVec3 => 12,
    }
  }

  pub fn zeroed(self) -> Value {
    match self {
      ValueType::Unit => Value::Unit,
      ValueType::Bool => Value::Bool(false),
      ValueType::U32 => Value::U32(0),
      ValueType::U64 => Value::U64(0),
      ValueType::F32 => Value::F32(0.),
      ValueType::Vec3 => Value::Vec3([0.; 3]),
      ValueType::UVec3 => Value::UVec3([0; 3]),
    }
  }

  pub fn component_type(self) -> Option<ValueType> {
    match self {
      ValueType::Vec3 => Some(ValueType::F32),
      ValueType::UVec3 => Some(ValueType::U32),
      _ => None,
    }
  }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Value {
  Unit,
  Bool(bool),
  U32(u32),
  U64(u64),
  F32(f32),
  Vec3([f32; 3]),
  UVec3([u32; 3]),
}

impl Value {
  pub fn ty(&self) -> ValueType {
    match self {
      Value::Unit => ValueType::Unit,
      Value::Bool(_) => ValueType::Bool,
      Value::U32(_) => ValueType::U32,
      Value::U64(_) => ValueType::U64,
      Value::F32(_) => ValueType::F32,
      Value::Vec3(_) => ValueType::Vec3,
      Value::UVec3(_) => ValueType::UVec3,
    }
  }

  pub fn as_bool(&self) -> Option<bool> {
    match *self {
      Value::Bool(v) => Some(v),
      _ => None,
    }
  }

  pub fn as_u32(&self) -> Option<u32> {
    match *self {
      Value::U32(v) => Some(v),
      _ => None,
    }
  }

  pub fn as_u64(&self) -> Option<u64> {
    match *self {
      Value::U64(v) => Some(v),
      _ => None,
    }
  }

  pub fn as_f32(&self) -> Option<f32> {
    match *self {
      Value::F32(v) => Some(v),
      _ => None,
    }
  }

  pub fn as_vec3(&self) -> Option<[f32; 3]> {
    match *self {
      Value::Vec3(v) => Some(v),
      _ => None,
    }
  }

  /// `out` must be exactly `self.ty().byte_size()` long
  pub fn write_bytes(&self, out: &mut [u8]) {
    match self {
      Value::Unit => {}
      Value::Bool(v) => out.copy_from_slice(bytes_of(&(*v as u32))),
      Value::U32(v) => out.copy_from_slice(bytes_of(v)),
      Value::U64(v) => out.copy_from_slice(bytes_of(v)),
      Value::F32(v) => out.copy_from_slice(bytes_of(v)),
      Value::Vec3(v) => out.copy_from_slice(cast_slice(v)),
      Value::UVec3(v) => out.copy_from_slice(cast_slice(v)),
    }
  }

  /// `bytes` must be exactly `ty.byte_size()` long
  pub fn read_bytes(ty: ValueType, bytes: &[u8]) -> Value {
    match ty {
      ValueType::Unit => Value::Unit,
      ValueType::Bool => Value::Bool(pod_read_unaligned::<u32>(bytes) != 0),
      ValueType::U32 => Value::U32(pod_read_unaligned(bytes)),
      ValueType::U64 => Value::U64(pod_read_unaligned(bytes)),
      ValueType::F32 => Value::F32(pod_read_unaligned(bytes)),
      ValueType::Vec3 => Value::Vec3(pod_read_unaligned(bytes)),
      ValueType::UVec3 => Value::UVec3(pod_read_unaligned(bytes)),
    }
  }
}

impl From<bool> for Value {
  fn from(v: bool) -> Self {
    Value::Bool(v)
  }
}
impl From<u32> for Value {
  fn from(v: u32) -> Self {
    Value::U32(v)
  }
}
impl From<u64> for Value {
  fn from(v: u64) -> Self {
    Value::U64(v)
  }
}
impl From<f32> for Value {
  fn from(v: f32) -> Self {
    Value::F32(v)
  }
}
impl From<[f32; 3]> for Value {
  fn from(v: [f32; 3]) -> Self {
    Value::Vec3(v)
  }
}
impl From<[u32; 3]> for Value {
  fn from(v: [u32; 3]) -> Self {
    Value::UVec3(v)
  }
}
