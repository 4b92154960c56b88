//! Device memory layout of acceleration structures as the traversal kernel reads them.
//!
//! The node array is a list of 64 byte slots. A node is referenced by an id packing the slot
//! index and the node type: `slot << 3 | type`. Instance nodes span two slots.

use crate::*;

pub const BVH_NODE_TRIANGLE: u32 = 0;
pub const BVH_NODE_BOX: u32 = 1;
pub const BVH_NODE_AABB: u32 = 2;
pub const BVH_NODE_INSTANCE: u32 = 3;

/// the box node in slot 0
pub const BVH_ROOT_NODE: u32 = BVH_NODE_BOX;
pub const BVH_INVALID_NODE: u32 = 0xFFFF_FFFF;

pub const BVH_NODE_SLOT_SIZE: u64 = 64;
pub const BVH_NODE_TYPE_BITS: u32 = 3;

/// geometry flag bit of geometry_id_and_flags
pub const GEOMETRY_OPAQUE: u32 = 1 << 28;
pub const GEOMETRY_ID_MASK: u32 = 0x0FFF_FFFF;

pub const fn bvh_node_id(slot: u32, ty: u32) -> u32 {
  (slot << BVH_NODE_TYPE_BITS) | ty
}

pub const fn bvh_node_type(id: u32) -> u32 {
  id & ((1 << BVH_NODE_TYPE_BITS) - 1)
}

pub const fn bvh_node_slot(id: u32) -> u32 {
  id >> BVH_NODE_TYPE_BITS
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct AccelStructHeader {
  /// byte offset of the node array from the header
  pub bvh_offset: u32,
  pub reserved: [u32; 3],
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct BvhBoxNode {
  pub parent: u32,
  /// may be [`BVH_INVALID_NODE`]
  pub children: [u32; 2],
  pub padding: u32,
  /// min and max of child 0, then of child 1
  pub bounds: [[f32; 3]; 4],
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct BvhTriangleNode {
  pub parent: u32,
  pub primitive_id: u32,
  pub geometry_id_and_flags: u32,
  pub padding: u32,
  pub vertices: [[f32; 3]; 3],
  pub padding2: [u32; 3],
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct BvhAabbNode {
  pub parent: u32,
  pub primitive_id: u32,
  pub geometry_id_and_flags: u32,
  pub padding: u32,
  pub min: [f32; 3],
  pub max: [f32; 3],
  pub padding2: [u32; 6],
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct BvhInstanceNode {
  pub parent: u32,
  pub instance_id: u32,
  /// custom index in the low 24 bits, visibility mask in the top 8
  pub custom_index_and_mask: u32,
  /// sbt offset in the low 24 bits, [`InstanceFlags`] in the top 8
  pub sbt_offset_and_flags: u32,
  /// address of the bottom level node array
  pub bottom_bvh_base: u64,
  /// 3x4 row major
  pub world_to_object: [[f32; 4]; 3],
  pub object_to_world: [[f32; 4]; 3],
  pub padding: [u32; 2],
}

pub const BOX_NODE_CHILDREN_OFFSET: u64 = 4;
pub const BOX_NODE_BOUNDS_OFFSET: u64 = 16;
pub const LEAF_NODE_PRIMITIVE_ID_OFFSET: u64 = 4;
pub const LEAF_NODE_GEOMETRY_OFFSET: u64 = 8;
pub const TRIANGLE_NODE_VERTEX_OFFSET: u64 = 16;
pub const AABB_NODE_BOUNDS_OFFSET: u64 = 16;
pub const INSTANCE_NODE_ID_OFFSET: u64 = 4;
pub const INSTANCE_NODE_CUSTOM_INDEX_OFFSET: u64 = 8;
pub const INSTANCE_NODE_SBT_OFFSET: u64 = 12;
pub const INSTANCE_NODE_BOTTOM_BVH_OFFSET: u64 = 16;
pub const INSTANCE_NODE_WORLD_TO_OBJECT_OFFSET: u64 = 24;
pub const INSTANCE_NODE_OBJECT_TO_WORLD_OFFSET: u64 = 72;

/// byte address of the node `id` in the node array at `bvh_base`
pub fn bvh_node_address(b: &mut FunctionBuilder, bvh_base: NodeHandle, id: NodeHandle) -> NodeHandle {
  let slot = b.shr_imm(id, BVH_NODE_TYPE_BITS);
  let slot = b.u2u64(slot);
  let offset = b.mul_imm(slot, BVH_NODE_SLOT_SIZE);
  b.add(bvh_base, offset)
}

/// row `row` of a 3x4 matrix as (xyz, w)
pub fn load_matrix_row(
  b: &mut FunctionBuilder,
  matrix_address: NodeHandle,
  row: u32,
) -> (NodeHandle, NodeHandle) {
  let row_address = b.add_imm(matrix_address, row as u64 * 16);
  let xyz = b.load_global(row_address, ValueType::Vec3);
  let w = b.load_global_at(row_address, 12, ValueType::F32);
  (xyz, w)
}

/// `m * (v, w)` for a 3x4 row major matrix, `with_translation` selects w = 1 or w = 0
pub fn transform_by_matrix(
  b: &mut FunctionBuilder,
  matrix_address: NodeHandle,
  v: NodeHandle,
  with_translation: bool,
) -> NodeHandle {
  let mut out = [v; 3];
  for (row, out) in out.iter_mut().enumerate() {
    let (xyz, w) = load_matrix_row(b, matrix_address, row as u32);
    let d = b.dot(xyz, v);
    *out = if with_translation { b.add(d, w) } else { d };
  }
  b.compose(out[0], out[1], out[2])
}

/// column `column` of a 3x4 row major matrix
pub fn load_matrix_column(b: &mut FunctionBuilder, matrix_address: NodeHandle, column: u32) -> NodeHandle {
  let mut out = [matrix_address; 3];
  for (row, out) in out.iter_mut().enumerate() {
    *out = b.load_global_at(matrix_address, row as u64 * 16 + column as u64 * 4, ValueType::F32);
  }
  b.compose(out[0], out[1], out[2])
}
