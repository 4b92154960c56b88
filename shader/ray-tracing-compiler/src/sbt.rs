use crate::*;

/// Byte size of a shader group handle inside a shader binding table record, the shader
/// record data follows it.
pub const SHADER_GROUP_HANDLE_SIZE: u32 = 32;

/// The descriptor table passed to every stage kernel through [`RtArg::SbtDescriptors`].
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct TraceRaysCommand {
  pub raygen_address: u64,
  /// also used as the raygen stride
  pub raygen_size: u64,
  pub miss_address: u64,
  pub miss_size: u64,
  pub miss_stride: u64,
  pub hit_address: u64,
  pub hit_size: u64,
  pub hit_stride: u64,
  pub callable_address: u64,
  pub callable_size: u64,
  pub callable_stride: u64,
  pub width: u32,
  pub height: u32,
  pub depth: u32,
  pub padding: u32,
}

/// The handle part of a shader binding table record.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct ShaderGroupHandleRecord {
  pub recursive_shader_ptr: u64,
  pub general_or_closest_hit_index: u32,
  pub any_hit_index: u32,
  pub intersection_index: u32,
  pub reserved: [u32; 3],
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SbtKind {
  RayGen,
  Miss,
  Hit,
  Callable,
}

impl SbtKind {
  /// offset of the table address in [`TraceRaysCommand`]
  pub fn binding_offset(self) -> u64 {
    match self {
      SbtKind::RayGen => 0,
      SbtKind::Miss => 16,
      SbtKind::Hit => 40,
      SbtKind::Callable => 64,
    }
  }

  /// offset of the stride relative to the table address
  pub fn stride_offset(self) -> u64 {
    match self {
      SbtKind::RayGen => 8,
      _ => 16,
    }
  }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SbtEntryField {
  RecursivePtr,
  GeneralIdx,
  ClosestHitIdx,
  AnyHitIdx,
  IntersectionIdx,
}

impl SbtEntryField {
  pub fn offset(self) -> u32 {
    match self {
      SbtEntryField::RecursivePtr => 0,
      SbtEntryField::GeneralIdx | SbtEntryField::ClosestHitIdx => 8,
      SbtEntryField::AnyHitIdx => 12,
      SbtEntryField::IntersectionIdx => 16,
    }
  }
}

/// `table + index * stride + field_offset` for the record `index` of the `kind` table
pub fn sbt_entry_address(
  b: &mut FunctionBuilder,
  kind: SbtKind,
  index: NodeHandle,
  field: SbtEntryField,
) -> NodeHandle {
  let descriptors = b.load_arg(RtArg::SbtDescriptors.slot(), ValueType::U64);
  let table = b.load_global_at(descriptors, kind.binding_offset(), ValueType::U64);
  let stride = b.load_global_at(
    descriptors,
    kind.binding_offset() + kind.stride_offset(),
    ValueType::U32,
  );

  let offset = b.mul(index, stride);
  let offset = b.add_imm(offset, field.offset() as u64);
  let offset = b.u2u64(offset);
  b.add(table, offset)
}

/// Load one field of a binding table record. The recursive pointer lands in `shader_addr`,
/// index fields land in `idx`. Either way the shader record pointer is updated.
pub fn load_sbt_entry(
  b: &mut FunctionBuilder,
  vars: &RayStateVars,
  index: NodeHandle,
  kind: SbtKind,
  field: SbtEntryField,
) {
  let address = sbt_entry_address(b, kind, index, field);

  if field == SbtEntryField::RecursivePtr {
    let shader_addr = b.load_global(address, ValueType::U64);
    b.store(vars.shader_addr, shader_addr);
  } else {
    let idx = b.load_global(address, ValueType::U32);
    b.store(vars.idx, idx);
  }

  let record = b.add_imm(address, (SHADER_GROUP_HANDLE_SIZE - field.offset()) as u64);
  b.store(vars.shader_record_ptr, record);
}
