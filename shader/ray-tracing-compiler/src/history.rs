//! Ray history capture: every sampled trace appends a token describing the ray and its
//! outcome to a device buffer a capture tool reads back.

use crate::*;

/// The start of the history buffer. Tokens are appended after it.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct RayHistoryHeader {
  /// byte offset of the next token, bumped atomically by every writer
  pub offset: u32,
  pub dispatch_index: u32,
  pub submit_base_index: u32,
  pub reserved: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum RayHistoryTokenType {
  EndTrace = 0,
}

pub const TOKEN_HIT_BIT: u32 = 1 << 29;
pub const TOKEN_TYPE_SHIFT: u32 = 30;

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct EndTraceToken {
  /// launch index, hit bit and token type
  pub header: u32,
  pub accel_struct: [u32; 2],
  /// incoming ray flags in the low 16 bits, dispatch index above
  pub dispatch_and_flags: u32,
  /// sbt offset, sbt stride << 4, miss index << 8 and cull mask << 24
  pub packed_args: u32,
  pub origin: [f32; 3],
  pub tmin: f32,
  pub direction: [f32; 3],
  pub tmax: f32,
  pub iteration_instance_count: u32,
  /// any hit invocations in the low 16 bits, intersection invocations in the high 16
  pub ahit_isec_count: u32,
  pub primitive_id: u32,
  pub geometry_id: u32,
  pub instance_id_and_hit_kind: u32,
  pub hit_tmax: f32,
}

pub const END_TRACE_TOKEN_SIZE: u32 = std::mem::size_of::<EndTraceToken>() as u32;
/// a miss token ends before the hit fields
pub const END_TRACE_MISS_TOKEN_SIZE: u32 = 60;

/// Reserve space for a token of `token_size` bytes and write its header. The body is built by
/// `body` from the address right after the header, only for invocations whose token fits.
fn build_token(
  b: &mut FunctionBuilder,
  config: &RayHistoryConfig,
  hit: NodeHandle,
  token_type: RayHistoryTokenType,
  token_size: NodeHandle,
  max_token_size: u32,
  body: impl FnOnce(&mut FunctionBuilder, NodeHandle),
) {
  let scale = config.resolution_scale.max(1);
  let buffer = b.imm_u64(config.buffer_address);

  let launch_id = b.intrinsic(RtIntrinsic::LaunchId, &[]);
  let mut sampled = b.imm_bool(true);
  for i in 0..3 {
    let id = b.extract(launch_id, i);
    let scale = b.imm_u32(scale);
    let remainder = b.rem(id, scale);
    let on_grid = b.equals_imm(remainder, 0);
    sampled = b.and(sampled, on_grid);
  }

  b.if_by(sampled, |b| {
    let base = b.atomic_add_global(buffer, token_size);

    // an odd offset marks a buffer that overflowed before
    let odd = b.test_mask(base, 1);
    let valid = b.not(odd);
    let limit = b.imm_u32(config.buffer_size.saturating_sub(max_token_size));
    let below_end = b.less_equal_than(base, limit);
    let header_size = b.imm_u32(std::mem::size_of::<RayHistoryHeader>() as u32);
    let after_header = b.greater_equal_than(base, header_size);
    let in_bounds = b.and(below_end, after_header);
    let write = b.and(valid, in_bounds);

    b.if_by(write, |b| {
      let base64 = b.u2u64(base);
      let dst = b.add(buffer, base64);

      let launch_size = b.intrinsic(RtIntrinsic::LaunchSize, &[]);
      let mut ids = [launch_id; 3];
      let mut sizes = [launch_size; 3];
      let scale = b.imm_u32(scale);
      for i in 0..3 {
        let id = b.extract(launch_id, i as u32);
        ids[i] = b.div(id, scale);
        let size = b.extract(launch_size, i as u32);
        sizes[i] = b.div(size, scale);
      }
      let row = b.mul(ids[1], sizes[0]);
      let plane = b.mul(sizes[0], sizes[1]);
      let layer = b.mul(ids[2], plane);
      let global_index = b.add(row, layer);
      let global_index = b.add(ids[0], global_index);

      let with_hit = b.or_imm(global_index, TOKEN_HIT_BIT as u64);
      let index_and_hit = b.select(hit, with_hit, global_index);
      let header = b.or_imm(index_and_hit, ((token_type as u32) << TOKEN_TYPE_SHIFT) as u64);
      b.store_global(dst, header);

      let body_addr = b.add_imm(dst, 4);
      body(b, body_addr);
    });
  });
}

/// Append the token describing a finished traversal.
///
/// `original_tmax` is the tmax the ray was traced with, the hit fields are only written for
/// rays that hit something.
pub fn build_end_trace_token(
  b: &mut FunctionBuilder,
  vars: &RayStateVars,
  trav: &TraversalVars,
  config: &RayHistoryConfig,
  original_tmax: NodeHandle,
) {
  let hit = b.load(trav.hit);
  let hit_size = b.imm_u32(END_TRACE_TOKEN_SIZE);
  let miss_size = b.imm_u32(END_TRACE_MISS_TOKEN_SIZE);
  let token_size = b.select(hit, hit_size, miss_size);
  let iteration_instance_count = b.load(trav.iteration_instance_count);

  build_token(
    b,
    config,
    hit,
    RayHistoryTokenType::EndTrace,
    token_size,
    END_TRACE_TOKEN_SIZE,
    |b, dst| {
      let store_at = |b: &mut FunctionBuilder, offset: u64, value: NodeHandle| {
        // offsets are relative to the token start, dst points past the header
        let address = b.add_imm(dst, offset - 4);
        b.store_global(address, value);
      };

      let accel_struct = b.load(vars.accel_struct);
      store_at(b, 4, accel_struct);

      let header_addr = b.imm_u64(config.buffer_address);
      let dispatch_index = b.load_global_at(header_addr, 4, ValueType::U32);
      let submit_base_index = b.load_global_at(header_addr, 8, ValueType::U32);
      let dispatch_index = b.add(dispatch_index, submit_base_index);
      let dispatch_index = b.shl_imm(dispatch_index, 16);
      let cull_mask_and_flags = b.load(vars.cull_mask_and_flags);
      let flags = b.and_imm(cull_mask_and_flags, 0xFFFF);
      let dispatch_and_flags = b.or(flags, dispatch_index);
      store_at(b, 12, dispatch_and_flags);

      let shifted_cull_mask = b.and_imm(cull_mask_and_flags, 0xFF00_0000);
      let sbt_offset = b.load(vars.sbt_offset);
      let sbt_stride = b.load(vars.sbt_stride);
      let sbt_stride = b.shl_imm(sbt_stride, 4);
      let miss_index = b.load(vars.miss_index);
      let miss_index = b.shl_imm(miss_index, 8);
      let packed_args = b.or(sbt_offset, sbt_stride);
      let packed_args = b.or(packed_args, miss_index);
      let packed_args = b.or(packed_args, shifted_cull_mask);
      store_at(b, 16, packed_args);

      let origin = b.load(vars.origin);
      store_at(b, 20, origin);
      let tmin = b.load(vars.tmin);
      store_at(b, 32, tmin);
      let direction = b.load(vars.direction);
      store_at(b, 36, direction);
      store_at(b, 48, original_tmax);
      store_at(b, 52, iteration_instance_count);
      let ahit_isec_count = match vars.ahit_isec_count {
        Some(count) => b.load(count),
        None => b.imm_u32(0),
      };
      store_at(b, 56, ahit_isec_count);

      b.if_by(hit, |b| {
        let primitive_id = b.load(vars.primitive_id);
        store_at(b, 60, primitive_id);
        let geometry_id = b.load(vars.geometry_id_and_flags);
        let geometry_id = b.and_imm(geometry_id, GEOMETRY_ID_MASK as u64);
        store_at(b, 64, geometry_id);

        let zero = b.imm_u32(0);
        let instance_id = b.make_local_var_init("history_instance_id", zero);
        let instance_addr = b.load(vars.instance_addr);
        let in_instance = b.not_equals_imm(instance_addr, 0);
        b.if_by(in_instance, |b| {
          let id = b.load_global_at(instance_addr, INSTANCE_NODE_ID_OFFSET, ValueType::U32);
          b.store(instance_id, id);
        });
        let instance_id = b.load(instance_id);
        let hit_kind = b.load(vars.hit_kind);
        let hit_kind = b.shl_imm(hit_kind, 24);
        let instance_id_and_hit_kind = b.or(instance_id, hit_kind);
        store_at(b, 68, instance_id_and_hit_kind);

        let tmax = b.load(vars.tmax);
        store_at(b, 72, tmax);
      });
    },
  );
}
