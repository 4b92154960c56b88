use std::ops::BitXor;

use crate::*;

bitflags::bitflags! {
  /// ray flags as passed to trace ray, the low 24 bits of cull_mask_and_flags
  #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
  pub struct RayFlags: u32 {
    const OPAQUE = 0x01;
    const NO_OPAQUE = 0x02;
    const TERMINATE_ON_FIRST_HIT = 0x04;
    const SKIP_CLOSEST_HIT_SHADER = 0x08;
    const CULL_BACK_FACING_TRIANGLES = 0x10;
    const CULL_FRONT_FACING_TRIANGLES = 0x20;
    const CULL_OPAQUE = 0x40;
    const CULL_NO_OPAQUE = 0x80;
    const SKIP_TRIANGLES = 0x100;
    const SKIP_AABBS = 0x200;
  }
}

bitflags::bitflags! {
  /// per instance flags, stored in the top 8 bits of the instance sbt_offset_and_flags
  #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
  pub struct InstanceFlags: u32 {
    const TRIANGLE_FACING_CULL_DISABLE = 0x01;
    const TRIANGLE_FLIP_FACING = 0x02;
    const FORCE_OPAQUE = 0x04;
    const FORCE_NO_OPAQUE = 0x08;
  }
}

bitflags::bitflags! {
  #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
  pub struct PipelineCreateFlags: u32 {
    const NO_NULL_ANY_HIT_SHADERS = 0x01;
    const NO_NULL_CLOSEST_HIT_SHADERS = 0x02;
    const NO_NULL_MISS_SHADERS = 0x04;
    const NO_NULL_INTERSECTION_SHADERS = 0x08;
    const SKIP_TRIANGLES = 0x10;
    const SKIP_AABBS = 0x20;
  }
}

pub const INSTANCE_FLAGS_SHIFT: u32 = 24;

/// returns Opaque(true)/Non-opaque(false)
///
/// the geometry flag is overridden by the instance force flags, which are overridden by the
/// ray flags
pub fn geometry_opaque_cpu(ray: RayFlags, instance: InstanceFlags, geometry_id_and_flags: u32) -> bool {
  let mut opaque = geometry_id_and_flags & GEOMETRY_OPAQUE != 0;
  if instance.contains(InstanceFlags::FORCE_OPAQUE) {
    opaque = true;
  }
  if instance.contains(InstanceFlags::FORCE_NO_OPAQUE) {
    opaque = false;
  }
  if ray.contains(RayFlags::OPAQUE) {
    opaque = true;
  }
  if ray.contains(RayFlags::NO_OPAQUE) {
    opaque = false;
  }
  opaque
}

/// returns Culled(true)/Pass(false)
pub fn cull_opacity_cpu(ray: RayFlags, opaque: bool) -> bool {
  (opaque && ray.contains(RayFlags::CULL_OPAQUE))
    || (!opaque && ray.contains(RayFlags::CULL_NO_OPAQUE))
}

/// returns Front(true)/Back(false), a triangle is front facing when its vertices appear
/// clockwise from the ray origin
pub fn triangle_front_face_cpu(instance: InstanceFlags, clockwise: bool) -> bool {
  clockwise.bitxor(instance.contains(InstanceFlags::TRIANGLE_FLIP_FACING))
}

/// returns Culled(true)/Pass(false)
pub fn cull_facing_cpu(ray: RayFlags, instance: InstanceFlags, front: bool) -> bool {
  if instance.contains(InstanceFlags::TRIANGLE_FACING_CULL_DISABLE) {
    return false;
  }
  (front && ray.contains(RayFlags::CULL_FRONT_FACING_TRIANGLES))
    || (!front && ray.contains(RayFlags::CULL_BACK_FACING_TRIANGLES))
}

pub fn geometry_opaque_gpu(
  b: &mut FunctionBuilder,
  ray_flags: NodeHandle,
  instance_flags: NodeHandle,
  geometry_id_and_flags: NodeHandle,
) -> NodeHandle {
  fn if_bit(b: &mut FunctionBuilder, source: NodeHandle, bit: u32, opaque: VarHandle, value: bool) {
    let set = b.test_mask(source, bit as u64);
    b.if_by(set, |b| {
      let value = b.imm_bool(value);
      b.store(opaque, value);
    });
  }

  let geometry_opaque = b.test_mask(geometry_id_and_flags, GEOMETRY_OPAQUE as u64);
  let opaque = b.make_local_var_init("opaque", geometry_opaque);

  if_bit(b, instance_flags, InstanceFlags::FORCE_OPAQUE.bits(), opaque, true);
  if_bit(b, instance_flags, InstanceFlags::FORCE_NO_OPAQUE.bits(), opaque, false);
  if_bit(b, ray_flags, RayFlags::OPAQUE.bits(), opaque, true);
  if_bit(b, ray_flags, RayFlags::NO_OPAQUE.bits(), opaque, false);

  b.load(opaque)
}

pub fn cull_opacity_gpu(b: &mut FunctionBuilder, ray_flags: NodeHandle, opaque: NodeHandle) -> NodeHandle {
  let cull_opaque = b.test_mask(ray_flags, RayFlags::CULL_OPAQUE.bits() as u64);
  let cull_no_opaque = b.test_mask(ray_flags, RayFlags::CULL_NO_OPAQUE.bits() as u64);
  let non_opaque = b.not(opaque);
  let a = b.and(opaque, cull_opaque);
  let c = b.and(non_opaque, cull_no_opaque);
  b.or(a, c)
}

pub fn triangle_front_face_gpu(
  b: &mut FunctionBuilder,
  instance_flags: NodeHandle,
  clockwise: NodeHandle,
) -> NodeHandle {
  let flip = b.test_mask(instance_flags, InstanceFlags::TRIANGLE_FLIP_FACING.bits() as u64);
  b.xor(clockwise, flip)
}

pub fn cull_facing_gpu(
  b: &mut FunctionBuilder,
  ray_flags: NodeHandle,
  instance_flags: NodeHandle,
  front: NodeHandle,
) -> NodeHandle {
  let cull_front = b.test_mask(ray_flags, RayFlags::CULL_FRONT_FACING_TRIANGLES.bits() as u64);
  let cull_back = b.test_mask(ray_flags, RayFlags::CULL_BACK_FACING_TRIANGLES.bits() as u64);
  let disable = b.test_mask(
    instance_flags,
    InstanceFlags::TRIANGLE_FACING_CULL_DISABLE.bits() as u64,
  );
  let back = b.not(front);
  let a = b.and(front, cull_front);
  let c = b.and(back, cull_back);
  let culled = b.or(a, c);
  let enabled = b.not(disable);
  b.and(culled, enabled)
}
