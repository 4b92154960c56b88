use crate::*;

/// The variables that carry ray tracing state through a stage kernel.
///
/// Every inlined shader gets its own instance which is then mapped field by field onto the
/// instance of the function it is inlined into.
#[derive(Clone, Debug)]
pub struct RayStateVars {
  /// selector of the shader to run next, for dispatching among inlined shaders
  pub idx: VarHandle,
  pub shader_addr: VarHandle,
  pub traversal_addr: VarHandle,
  /// scratch offset of the payload, relative to the callee frame
  pub arg: VarHandle,
  pub stack_ptr: VarHandle,

  pub launch_sizes: [VarHandle; 3],
  pub launch_ids: [VarHandle; 3],

  pub shader_record_ptr: VarHandle,

  pub accel_struct: VarHandle,
  pub cull_mask_and_flags: VarHandle,
  pub sbt_offset: VarHandle,
  pub sbt_stride: VarHandle,
  pub miss_index: VarHandle,
  pub origin: VarHandle,
  pub tmin: VarHandle,
  pub direction: VarHandle,
  pub tmax: VarHandle,

  pub primitive_addr: VarHandle,
  pub primitive_id: VarHandle,
  pub geometry_id_and_flags: VarHandle,
  pub instance_addr: VarHandle,
  pub hit_kind: VarHandle,
  pub opaque: VarHandle,

  pub ahit_accept: VarHandle,
  pub ahit_terminate: VarHandle,
  pub terminated: VarHandle,

  /// any hit invocations in the low 16 bits, intersection invocations in the high 16 bits,
  /// only tracked when ray history is recorded
  pub ahit_isec_count: Option<VarHandle>,

  /// largest call frame pushed by the lowered code
  pub stack_size: u32,
  pub flags: PipelineCreateFlags,
  pub monolithic: bool,
}

impl RayStateVars {
  pub fn new(b: &mut FunctionBuilder, flags: PipelineCreateFlags, monolithic: bool) -> Self {
    use ValueType::*;
    let mut var = |name, ty| b.make_local_var(name, ty);
    Self {
      idx: var("idx", U32),
      shader_addr: var("shader_addr", U64),
      traversal_addr: var("traversal_addr", U64),
      arg: var("arg", U32),
      stack_ptr: var("stack_ptr", U32),
      launch_sizes: [
        var("launch_size_x", U32),
        var("launch_size_y", U32),
        var("launch_size_z", U32),
      ],
      launch_ids: [
        var("launch_id_x", U32),
        var("launch_id_y", U32),
        var("launch_id_z", U32),
      ],
      shader_record_ptr: var("shader_record_ptr", U64),
      accel_struct: var("accel_struct", U64),
      cull_mask_and_flags: var("cull_mask_and_flags", U32),
      sbt_offset: var("sbt_offset", U32),
      sbt_stride: var("sbt_stride", U32),
      miss_index: var("miss_index", U32),
      origin: var("ray_origin", Vec3),
      tmin: var("ray_tmin", F32),
      direction: var("ray_direction", Vec3),
      tmax: var("ray_tmax", F32),
      primitive_addr: var("primitive_addr", U64),
      primitive_id: var("primitive_id", U32),
      geometry_id_and_flags: var("geometry_id_and_flags", U32),
      instance_addr: var("instance_addr", U64),
      hit_kind: var("hit_kind", U32),
      opaque: var("opaque", Bool),
      ahit_accept: var("ahit_accept", Bool),
      ahit_terminate: var("ahit_terminate", Bool),
      terminated: var("intersection_terminated", Bool),
      ahit_isec_count: None,
      stack_size: 0,
      flags,
      monolithic,
    }
  }

  pub fn track_history(&mut self, b: &mut FunctionBuilder) {
    if self.ahit_isec_count.is_none() {
      self.ahit_isec_count = Some(b.make_local_var("ahit_isec_count", ValueType::U32));
    }
  }

  /// A copy that owns fresh vars for the candidate hit, every other field is shared.
  ///
  /// Candidate shaders write the inner hit, the traversal commits it to the outer one once
  /// the candidate is accepted.
  pub fn create_inner(&self, b: &mut FunctionBuilder) -> Self {
    use ValueType::*;
    let mut inner = self.clone();
    inner.idx = b.make_local_var("inner_idx", U32);
    inner.shader_record_ptr = b.make_local_var("inner_shader_record_ptr", U64);
    inner.primitive_addr = b.make_local_var("inner_primitive_addr", U64);
    inner.primitive_id = b.make_local_var("inner_primitive_id", U32);
    inner.geometry_id_and_flags = b.make_local_var("inner_geometry_id_and_flags", U32);
    inner.tmax = b.make_local_var("inner_ray_tmax", F32);
    inner.instance_addr = b.make_local_var("inner_instance_addr", U64);
    inner.hit_kind = b.make_local_var("inner_hit_kind", U32);
    inner
  }

  /// record `self.field -> other.field` for every field
  pub fn map_onto(&self, other: &Self, remap: &mut VarRemap) {
    remap.insert(self.idx, other.idx);
    remap.insert(self.shader_addr, other.shader_addr);
    remap.insert(self.traversal_addr, other.traversal_addr);
    remap.insert(self.arg, other.arg);
    remap.insert(self.stack_ptr, other.stack_ptr);
    for i in 0..3 {
      remap.insert(self.launch_sizes[i], other.launch_sizes[i]);
      remap.insert(self.launch_ids[i], other.launch_ids[i]);
    }
    remap.insert(self.shader_record_ptr, other.shader_record_ptr);
    remap.insert(self.accel_struct, other.accel_struct);
    remap.insert(self.cull_mask_and_flags, other.cull_mask_and_flags);
    remap.insert(self.sbt_offset, other.sbt_offset);
    remap.insert(self.sbt_stride, other.sbt_stride);
    remap.insert(self.miss_index, other.miss_index);
    remap.insert(self.origin, other.origin);
    remap.insert(self.tmin, other.tmin);
    remap.insert(self.direction, other.direction);
    remap.insert(self.tmax, other.tmax);
    remap.insert(self.primitive_addr, other.primitive_addr);
    remap.insert(self.primitive_id, other.primitive_id);
    remap.insert(self.geometry_id_and_flags, other.geometry_id_and_flags);
    remap.insert(self.instance_addr, other.instance_addr);
    remap.insert(self.hit_kind, other.hit_kind);
    remap.insert(self.opaque, other.opaque);
    remap.insert(self.ahit_accept, other.ahit_accept);
    remap.insert(self.ahit_terminate, other.ahit_terminate);
    remap.insert(self.terminated, other.terminated);
    if let (Some(from), Some(to)) = (self.ahit_isec_count, other.ahit_isec_count) {
      remap.insert(from, to);
    }
  }
}
