use crate::*;

/// Marks `top_stack` outside of any instance.
pub const TOP_STACK_NONE: u32 = 0xFFFF_FFFF;

/// The walk state. It describes where the traversal currently is, not the closest hit found
/// so far, which lives in [`RayStateVars`].
pub struct TraversalVars {
  /// the ray in the space of the bvh being walked
  pub origin: VarHandle,
  pub dir: VarHandle,
  pub inv_dir: VarHandle,
  /// of the instance being walked, zero at the top level
  pub sbt_offset_and_flags: VarHandle,
  pub instance_addr: VarHandle,
  pub hit: VarHandle,
  pub bvh_base: VarHandle,
  /// pushes so far, entries below the watermark were overwritten
  pub stack: VarHandle,
  pub stack_low_watermark: VarHandle,
  pub current_node: VarHandle,
  pub previous_node: VarHandle,
  pub instance_top_node: VarHandle,
  /// stack height when the current instance was entered
  pub top_stack: VarHandle,
  pub iteration_instance_count: VarHandle,
}

impl TraversalVars {
  pub fn new(b: &mut FunctionBuilder) -> Self {
    use ValueType::*;
    Self {
      origin: b.make_local_var("traversal_origin", Vec3),
      dir: b.make_local_var("traversal_dir", Vec3),
      inv_dir: b.make_local_var("traversal_inv_dir", Vec3),
      sbt_offset_and_flags: b.make_local_var("traversal_sbt_offset_and_flags", U32),
      instance_addr: b.make_local_var("traversal_instance_addr", U64),
      hit: b.make_local_var("traversal_hit", Bool),
      bvh_base: b.make_local_var("traversal_bvh_base", U64),
      stack: b.make_local_var("traversal_stack", U32),
      stack_low_watermark: b.make_local_var("traversal_stack_low_watermark", U32),
      current_node: b.make_local_var("traversal_current_node", U32),
      previous_node: b.make_local_var("traversal_previous_node", U32),
      instance_top_node: b.make_local_var("traversal_instance_top_node", U32),
      top_stack: b.make_local_var("traversal_top_stack", U32),
      iteration_instance_count: b.make_local_var("traversal_iteration_instance_count", U32),
    }
  }
}

/// A leaf the ray reached, before any shader had a say.
pub struct LeafIntersection {
  pub node_addr: NodeHandle,
  pub primitive_id: NodeHandle,
  pub geometry_id_and_flags: NodeHandle,
  pub opaque: NodeHandle,
}

pub struct TriangleCandidate {
  pub leaf: LeafIntersection,
  pub t: NodeHandle,
  pub frontface: NodeHandle,
  pub barycentrics: [NodeHandle; 2],
}

pub type TriangleCallback<'a> =
  dyn FnMut(&mut FunctionBuilder, &TriangleCandidate) -> Result<(), RtCompileError> + 'a;
pub type AabbCallback<'a> = dyn FnMut(&mut FunctionBuilder, &LeafIntersection) -> Result<(), RtCompileError> + 'a;

pub struct TraversalArgs<'a> {
  /// node array of the top level
  pub root_bvh_base: NodeHandle,
  /// the world space ray
  pub origin: VarHandle,
  pub direction: VarHandle,
  pub tmin: VarHandle,
  pub tmax: VarHandle,
  pub cull_mask_and_flags: NodeHandle,
  pub stack_entries: u32,
  pub wave_size: u32,
  pub ignore_cull_mask: bool,
  pub count_iterations: bool,
  /// `None` leaves triangles out of the kernel entirely
  pub triangle: Option<&'a mut TriangleCallback<'a>>,
  pub aabb: Option<&'a mut AabbCallback<'a>>,
}

/// Emit the bvh walk. Candidate callbacks may `break` to end the walk early.
pub fn build_ray_traversal(
  b: &mut FunctionBuilder,
  vars: &TraversalVars,
  args: TraversalArgs,
) -> Result<(), RtCompileError> {
  let mut walker = Walker {
    vars,
    args,
    error: None,
  };
  b.loop_by(|b| walker.iteration(b));
  match walker.error {
    Some(error) => Err(error),
    None => Ok(()),
  }
}

struct Walker<'w, 'a> {
  vars: &'w TraversalVars,
  args: TraversalArgs<'a>,
  error: Option<RtCompileError>,
}

impl<'w, 'a> Walker<'w, 'a> {
  fn record(&mut self, result: Result<(), RtCompileError>) {
    if let (Err(error), None) = (result, &self.error) {
      self.error = Some(error);
    }
  }

  fn set_u32(&self, b: &mut FunctionBuilder, var: VarHandle, value: u32) {
    let value = b.imm_u32(value);
    b.store(var, value);
  }

  fn iteration(&mut self, b: &mut FunctionBuilder) {
    let t = self.vars;
    if self.args.count_iterations {
      let count = b.load(t.iteration_instance_count);
      let count = b.add_imm(count, 1);
      b.store(t.iteration_instance_count, count);
    }

    let current = b.load(t.current_node);
    let invalid = b.equals_imm(current, BVH_INVALID_NODE as u64);
    b.if_by(invalid, |b| self.fetch_next(b))
      .else_by(|b| self.set_u32(b, t.previous_node, BVH_INVALID_NODE));

    let node = b.load(t.current_node);
    let previous = b.load(t.previous_node);
    b.store(t.previous_node, node);
    self.set_u32(b, t.current_node, BVH_INVALID_NODE);

    let ty = b.and_imm(node, ((1 << BVH_NODE_TYPE_BITS) - 1) as u64);
    let is_box = b.equals_imm(ty, BVH_NODE_BOX as u64);
    b.if_by(is_box, |b| self.visit_box(b, node, previous))
      .else_by(|b| {
        let is_instance = b.equals_imm(ty, BVH_NODE_INSTANCE as u64);
        b.if_by(is_instance, |b| self.visit_instance(b, node))
          .else_by(|b| {
            let is_triangle = b.equals_imm(ty, BVH_NODE_TRIANGLE as u64);
            b.if_by(is_triangle, |b| self.visit_triangle(b, node))
              .else_by(|b| self.visit_aabb(b, node));
          });
      });
  }

  fn stack_entry_offset(&self, b: &mut FunctionBuilder, index: NodeHandle) -> NodeHandle {
    let entries = b.imm_u32(self.args.stack_entries);
    let slot = b.rem(index, entries);
    let row = b.mul_imm(slot, (self.args.wave_size * 4) as u64);
    let lane = b.local_invocation_index();
    let lane = b.mul_imm(lane, 4);
    b.add(row, lane)
  }

  /// a full ring drops its oldest entry, the climb recovers it later
  fn push(&self, b: &mut FunctionBuilder, value: NodeHandle) {
    let t = self.vars;
    let stack = b.load(t.stack);
    let watermark = b.load(t.stack_low_watermark);
    let depth = b.sub(stack, watermark);
    let entries = b.imm_u32(self.args.stack_entries);
    let full = b.greater_equal_than(depth, entries);
    b.if_by(full, |b| {
      let watermark = b.add_imm(watermark, 1);
      b.store(t.stack_low_watermark, watermark);
    });

    let offset = self.stack_entry_offset(b, stack);
    b.store_shared(offset, value);
    let stack = b.add_imm(stack, 1);
    b.store(t.stack, stack);
  }

  fn exit_instance(&self, b: &mut FunctionBuilder) {
    let t = self.vars;
    self.set_u32(b, t.top_stack, TOP_STACK_NONE);
    b.store(t.bvh_base, self.args.root_bvh_base);

    let origin = b.load(self.args.origin);
    b.store(t.origin, origin);
    let dir = b.load(self.args.direction);
    b.store(t.dir, dir);
    let inv_dir = reciprocal(b, dir);
    b.store(t.inv_dir, inv_dir);

    let zero = b.imm_u64(0);
    b.store(t.instance_addr, zero);
    self.set_u32(b, t.sbt_offset_and_flags, 0);

    let instance = b.load(t.instance_top_node);
    b.store(t.previous_node, instance);
  }

  /// pick the next node once the current branch is exhausted
  fn fetch_next(&mut self, b: &mut FunctionBuilder) {
    let t = self.vars;

    let top_stack = b.load(t.top_stack);
    let stack = b.load(t.stack);
    let in_instance = b.not_equals_imm(top_stack, TOP_STACK_NONE as u64);
    let drained = b.less_equal_than(stack, top_stack);
    let leave_instance = b.and(in_instance, drained);
    b.if_by(leave_instance, |b| self.exit_instance(b));

    let stack = b.load(t.stack);
    let watermark = b.load(t.stack_low_watermark);
    let resident = b.greater_than(stack, watermark);
    b.if_by(resident, |b| {
      let stack = b.sub_imm(stack, 1);
      b.store(t.stack, stack);
      let offset = self.stack_entry_offset(b, stack);
      let node = b.load_shared(offset, ValueType::U32);
      b.store(t.current_node, node);
      self.set_u32(b, t.previous_node, BVH_INVALID_NODE);
    })
    .else_by(|b| {
      let nothing_lost = b.equals_imm(watermark, 0);
      b.break_if(nothing_lost);

      // climb from the last visited node to recover overwritten entries
      let previous = b.load(t.previous_node);
      let bvh_base = b.load(t.bvh_base);
      let previous_addr = bvh_node_address(b, bvh_base, previous);
      let parent = b.load_global(previous_addr, ValueType::U32);
      let at_root = b.equals_imm(parent, BVH_INVALID_NODE as u64);
      b.if_by(at_root, |b| {
        let top_stack = b.load(t.top_stack);
        let in_instance = b.not_equals_imm(top_stack, TOP_STACK_NONE as u64);
        b.if_by(in_instance, |b| {
          self.exit_instance(b);
          b.do_continue();
        })
        .else_by(|b| b.do_break());
      });
      b.store(t.current_node, parent);
    });
  }

  fn child_hit(&self, b: &mut FunctionBuilder, node_addr: NodeHandle, child: NodeHandle, index: u64) -> NodeHandle {
    let t = self.vars;
    let bounds = BOX_NODE_BOUNDS_OFFSET + index * 24;
    let min = b.load_global_at(node_addr, bounds, ValueType::Vec3);
    let max = b.load_global_at(node_addr, bounds + 12, ValueType::Vec3);
    let origin = b.load(t.origin);
    let inv_dir = b.load(t.inv_dir);
    let tmin = b.load(self.args.tmin);
    let tmax = b.load(self.args.tmax);
    let hit = ray_aabb_intersect(b, min, max, origin, inv_dir, tmin, tmax);
    let valid = b.not_equals_imm(child, BVH_INVALID_NODE as u64);
    b.and(valid, hit)
  }

  fn visit_box(&mut self, b: &mut FunctionBuilder, node: NodeHandle, previous: NodeHandle) {
    let t = self.vars;
    let bvh_base = b.load(t.bvh_base);
    let node_addr = bvh_node_address(b, bvh_base, node);
    let child0 = b.load_global_at(node_addr, BOX_NODE_CHILDREN_OFFSET, ValueType::U32);
    let child1 = b.load_global_at(node_addr, BOX_NODE_CHILDREN_OFFSET + 4, ValueType::U32);

    let descending = b.equals_imm(previous, BVH_INVALID_NODE as u64);
    b.if_by(descending, |b| {
      let hit0 = self.child_hit(b, node_addr, child0, 0);
      let hit1 = self.child_hit(b, node_addr, child1, 1);
      let both = b.and(hit0, hit1);
      b.if_by(both, |b| {
        self.push(b, child1);
        b.store(t.current_node, child0);
      })
      .else_by(|b| {
        b.if_by(hit0, |b| b.store(t.current_node, child0));
        b.if_by(hit1, |b| b.store(t.current_node, child1));
      });
    })
    .else_by(|b| {
      // climbing: the second child is pending when we come back from the first
      let from_first = b.equals(previous, child0);
      b.if_by(from_first, |b| {
        let hit1 = self.child_hit(b, node_addr, child1, 1);
        b.if_by(hit1, |b| b.store(t.current_node, child1));
      });
    });
  }

  fn visit_instance(&mut self, b: &mut FunctionBuilder, node: NodeHandle) {
    let t = self.vars;
    let bvh_base = b.load(t.bvh_base);
    let node_addr = bvh_node_address(b, bvh_base, node);

    if self.args.ignore_cull_mask {
      self.enter_instance(b, node, node_addr);
    } else {
      let custom_index_and_mask = b.load_global_at(node_addr, INSTANCE_NODE_CUSTOM_INDEX_OFFSET, ValueType::U32);
      let mask = b.shr_imm(custom_index_and_mask, 24);
      let cull_mask = b.shr_imm(self.args.cull_mask_and_flags, 24);
      let visible = b.and(mask, cull_mask);
      let visible = b.not_equals_imm(visible, 0);
      b.if_by(visible, |b| self.enter_instance(b, node, node_addr));
    }
  }

  fn enter_instance(&self, b: &mut FunctionBuilder, node: NodeHandle, node_addr: NodeHandle) {
    let t = self.vars;
    let stack = b.load(t.stack);
    b.store(t.top_stack, stack);
    b.store(t.instance_top_node, node);
    b.store(t.instance_addr, node_addr);

    let sbt_offset_and_flags = b.load_global_at(node_addr, INSTANCE_NODE_SBT_OFFSET, ValueType::U32);
    b.store(t.sbt_offset_and_flags, sbt_offset_and_flags);
    let bottom = b.load_global_at(node_addr, INSTANCE_NODE_BOTTOM_BVH_OFFSET, ValueType::U64);
    b.store(t.bvh_base, bottom);

    let world_to_object = b.add_imm(node_addr, INSTANCE_NODE_WORLD_TO_OBJECT_OFFSET);
    let origin = b.load(self.args.origin);
    let origin = transform_by_matrix(b, world_to_object, origin, true);
    b.store(t.origin, origin);
    let dir = b.load(self.args.direction);
    let dir = transform_by_matrix(b, world_to_object, dir, false);
    b.store(t.dir, dir);
    let inv_dir = reciprocal(b, dir);
    b.store(t.inv_dir, inv_dir);

    self.set_u32(b, t.current_node, BVH_ROOT_NODE);
  }

  fn ray_flags(&self, b: &mut FunctionBuilder) -> NodeHandle {
    b.and_imm(self.args.cull_mask_and_flags, 0xFF_FFFF)
  }

  fn leaf(&self, b: &mut FunctionBuilder, node_addr: NodeHandle, ray_flags: NodeHandle) -> (LeafIntersection, NodeHandle) {
    let t = self.vars;
    let primitive_id = b.load_global_at(node_addr, LEAF_NODE_PRIMITIVE_ID_OFFSET, ValueType::U32);
    let geometry_id_and_flags = b.load_global_at(node_addr, LEAF_NODE_GEOMETRY_OFFSET, ValueType::U32);
    let sbt_offset_and_flags = b.load(t.sbt_offset_and_flags);
    let instance_flags = b.shr_imm(sbt_offset_and_flags, INSTANCE_FLAGS_SHIFT);
    let opaque = geometry_opaque_gpu(b, ray_flags, instance_flags, geometry_id_and_flags);
    (
      LeafIntersection {
        node_addr,
        primitive_id,
        geometry_id_and_flags,
        opaque,
      },
      instance_flags,
    )
  }

  fn visit_triangle(&mut self, b: &mut FunctionBuilder, node: NodeHandle) {
    if self.args.triangle.is_none() {
      return;
    }
    let t = self.vars;
    let ray_flags = self.ray_flags(b);
    let skip = b.test_mask(ray_flags, RayFlags::SKIP_TRIANGLES.bits() as u64);
    let enabled = b.not(skip);
    b.if_by(enabled, |b| {
      let bvh_base = b.load(t.bvh_base);
      let node_addr = bvh_node_address(b, bvh_base, node);
      let mut vertices = [node_addr; 3];
      for (i, vertex) in vertices.iter_mut().enumerate() {
        *vertex = b.load_global_at(
          node_addr,
          TRIANGLE_NODE_VERTEX_OFFSET + i as u64 * 12,
          ValueType::Vec3,
        );
      }
      let origin = b.load(t.origin);
      let dir = b.load(t.dir);
      let tmin = b.load(self.args.tmin);
      let tmax = b.load(self.args.tmax);
      let hit = ray_triangle_intersect(b, vertices, origin, dir, tmin, tmax);

      b.if_by(hit.hit, |b| {
        let (leaf, instance_flags) = self.leaf(b, node_addr, ray_flags);
        let culled = cull_opacity_gpu(b, ray_flags, leaf.opaque);
        let frontface = triangle_front_face_gpu(b, instance_flags, hit.clockwise);
        let facing_culled = cull_facing_gpu(b, ray_flags, instance_flags, frontface);
        let culled = b.or(culled, facing_culled);
        let pass = b.not(culled);

        let candidate = TriangleCandidate {
          leaf,
          t: hit.t,
          frontface,
          barycentrics: [hit.u, hit.v],
        };
        let mut result = Ok(());
        b.if_by(pass, |b| {
          if let Some(callback) = self.args.triangle.as_mut() {
            result = callback(b, &candidate);
          }
        });
        self.record(result);
      });
    });
  }

  fn visit_aabb(&mut self, b: &mut FunctionBuilder, node: NodeHandle) {
    if self.args.aabb.is_none() {
      return;
    }
    let t = self.vars;
    let ray_flags = self.ray_flags(b);
    let skip = b.test_mask(ray_flags, RayFlags::SKIP_AABBS.bits() as u64);
    let enabled = b.not(skip);
    b.if_by(enabled, |b| {
      let bvh_base = b.load(t.bvh_base);
      let node_addr = bvh_node_address(b, bvh_base, node);
      let min = b.load_global_at(node_addr, AABB_NODE_BOUNDS_OFFSET, ValueType::Vec3);
      let max = b.load_global_at(node_addr, AABB_NODE_BOUNDS_OFFSET + 12, ValueType::Vec3);
      let origin = b.load(t.origin);
      let inv_dir = b.load(t.inv_dir);
      let tmin = b.load(self.args.tmin);
      let tmax = b.load(self.args.tmax);
      let hit = ray_aabb_intersect(b, min, max, origin, inv_dir, tmin, tmax);

      b.if_by(hit, |b| {
        let (leaf, _) = self.leaf(b, node_addr, ray_flags);
        let culled = cull_opacity_gpu(b, ray_flags, leaf.opaque);
        let pass = b.not(culled);
        let mut result = Ok(());
        b.if_by(pass, |b| {
          if let Some(callback) = self.args.aabb.as_mut() {
            result = callback(b, &leaf);
          }
        });
        self.record(result);
      });
    });
  }
}

/// componentwise `1 / v`
pub fn reciprocal(b: &mut FunctionBuilder, v: NodeHandle) -> NodeHandle {
  let one = b.imm_f32(1.);
  let ones = b.compose(one, one, one);
  b.div(ones, v)
}
