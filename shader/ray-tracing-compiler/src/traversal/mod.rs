//! The bvh walk and the shader glue around it.
//!
//! The walk itself only knows about nodes. What happens with a leaf the ray reaches is up to
//! the candidate callbacks, which run the any hit and intersection shaders of the pipeline
//! inline and commit accepted candidates to the ray state.

use std::cell::Cell;

use crate::*;

mod intersect;
mod walk;

pub use intersect::*;
pub use walk::*;

pub const MAX_STACK_ENTRY_COUNT: u32 = 16;

/// the binding table index of the hit group for a leaf of the current instance
fn hit_group_index(
  b: &mut FunctionBuilder,
  vars: &RayStateVars,
  trav: &TraversalVars,
  geometry_id_and_flags: NodeHandle,
) -> NodeHandle {
  let geometry_id = b.and_imm(geometry_id_and_flags, GEOMETRY_ID_MASK as u64);
  let sbt_offset = b.load(vars.sbt_offset);
  let instance_sbt = b.load(trav.sbt_offset_and_flags);
  let instance_sbt = b.and_imm(instance_sbt, 0xFF_FFFF);
  let sbt_stride = b.load(vars.sbt_stride);
  let geometry_offset = b.mul(sbt_stride, geometry_id);
  let index = b.add(sbt_offset, instance_sbt);
  b.add(index, geometry_offset)
}

fn bump_history_count(b: &mut FunctionBuilder, vars: &RayStateVars, amount: u64) {
  if let Some(count) = vars.ahit_isec_count {
    let value = b.load(count);
    let value = b.add_imm(value, amount);
    b.store(count, value);
  }
}

struct CandidateCtx<'a, 'c> {
  ctx: &'a RtCompileCtx<'c>,
  vars: &'a RayStateVars,
  trav: &'a TraversalVars,
  hit_attribs: &'a [VarHandle],
  case_scratch: &'a Cell<u32>,
}

impl<'a, 'c> CandidateCtx<'a, 'c> {
  fn dispatch(
    &self,
    b: &mut FunctionBuilder,
    vars: &RayStateVars,
    selector: NodeHandle,
    can_have_null: bool,
    cases: &[InlinedShaderCase],
  ) -> Result<(), RtCompileError> {
    let ctx = self.ctx;
    let hit_attribs = self.hit_attribs;
    let case_scratch = self.case_scratch;
    visit_inlined_shaders(
      b,
      selector,
      can_have_null,
      cases,
      ctx.options,
      &mut |b: &mut FunctionBuilder, case: &InlinedShaderCase| {
        let function = case.function(ctx.pipeline)?;
        let scratch = insert_rt_case(b, ctx, vars, &function, Some(hit_attribs))?;
        case_scratch.set(case_scratch.get().max(scratch));
        Ok(())
      },
    )
  }

  fn commit(
    &self,
    b: &mut FunctionBuilder,
    leaf: &LeafIntersection,
    tmax: NodeHandle,
    sbt_index: NodeHandle,
  ) {
    let (vars, trav) = (self.vars, self.trav);
    b.store(vars.primitive_addr, leaf.node_addr);
    b.store(vars.primitive_id, leaf.primitive_id);
    b.store(vars.geometry_id_and_flags, leaf.geometry_id_and_flags);
    b.store(vars.tmax, tmax);
    let instance_addr = b.load(trav.instance_addr);
    b.store(vars.instance_addr, instance_addr);
    b.store(vars.idx, sbt_index);
    let yes = b.imm_bool(true);
    b.store(trav.hit, yes);
  }

  fn handle_candidate_triangle(
    &self,
    b: &mut FunctionBuilder,
    candidate: &TriangleCandidate,
    any_hit_cases: &[InlinedShaderCase],
  ) -> Result<(), RtCompileError> {
    let vars = self.vars;
    let leaf = &candidate.leaf;
    let sbt_index = hit_group_index(b, vars, self.trav, leaf.geometry_id_and_flags);

    let front_kind = b.imm_u32(0xFE);
    let back_kind = b.imm_u32(0xFF);
    let hit_kind = b.select(candidate.frontface, front_kind, back_kind);

    // barycentrics live in the first two hit attribute slots
    let previous_u = b.load(self.hit_attribs[0]);
    let previous_v = b.load(self.hit_attribs[1]);
    let u = b.bitcast_u32(candidate.barycentrics[0]);
    let v = b.bitcast_u32(candidate.barycentrics[1]);
    b.store(self.hit_attribs[0], u);
    b.store(self.hit_attribs[1], v);

    let yes = b.imm_bool(true);
    b.store(vars.ahit_accept, yes);
    let no = b.imm_bool(false);
    b.store(vars.ahit_terminate, no);

    let mut result = Ok(());
    if !any_hit_cases.is_empty() {
      let non_opaque = b.not(leaf.opaque);
      b.if_by(non_opaque, |b| {
        let inner = vars.create_inner(b);
        b.store(inner.primitive_addr, leaf.node_addr);
        b.store(inner.primitive_id, leaf.primitive_id);
        b.store(inner.geometry_id_and_flags, leaf.geometry_id_and_flags);
        b.store(inner.tmax, candidate.t);
        let instance_addr = b.load(self.trav.instance_addr);
        b.store(inner.instance_addr, instance_addr);
        b.store(inner.hit_kind, hit_kind);
        b.store(inner.opaque, leaf.opaque);

        load_sbt_entry(b, &inner, sbt_index, SbtKind::Hit, SbtEntryField::AnyHitIdx);
        bump_history_count(b, vars, 1);

        let selector = b.load(inner.idx);
        let can_have_null = !vars
          .flags
          .contains(PipelineCreateFlags::NO_NULL_ANY_HIT_SHADERS);
        result = self.dispatch(b, &inner, selector, can_have_null, any_hit_cases);

        let accepted = b.load(vars.ahit_accept);
        let rejected = b.not(accepted);
        b.if_by(rejected, |b| {
          b.store(self.hit_attribs[0], previous_u);
          b.store(self.hit_attribs[1], previous_v);
        });
      });
    }
    result?;

    let accepted = b.load(vars.ahit_accept);
    b.if_by(accepted, |b| {
      self.commit(b, leaf, candidate.t, sbt_index);
      b.store(vars.hit_kind, hit_kind);

      let cull_mask_and_flags = b.load(vars.cull_mask_and_flags);
      let first_hit = b.test_mask(
        cull_mask_and_flags,
        RayFlags::TERMINATE_ON_FIRST_HIT.bits() as u64,
      );
      let terminate = b.load(vars.ahit_terminate);
      let terminate = b.or(first_hit, terminate);
      b.break_if(terminate);
    });
    Ok(())
  }

  fn handle_candidate_aabb(
    &self,
    b: &mut FunctionBuilder,
    leaf: &LeafIntersection,
    intersection_cases: &[InlinedShaderCase],
  ) -> Result<(), RtCompileError> {
    let vars = self.vars;
    let sbt_index = hit_group_index(b, vars, self.trav, leaf.geometry_id_and_flags);

    // the intersection shader writes the hit kind only when it reports the closest candidate
    let mut inner = vars.create_inner(b);
    inner.hit_kind = vars.hit_kind;

    b.store(inner.primitive_addr, leaf.node_addr);
    b.store(inner.primitive_id, leaf.primitive_id);
    b.store(inner.geometry_id_and_flags, leaf.geometry_id_and_flags);
    let tmax = b.load(vars.tmax);
    b.store(inner.tmax, tmax);
    let instance_addr = b.load(self.trav.instance_addr);
    b.store(inner.instance_addr, instance_addr);
    b.store(inner.opaque, leaf.opaque);

    load_sbt_entry(b, &inner, sbt_index, SbtKind::Hit, SbtEntryField::IntersectionIdx);

    let no = b.imm_bool(false);
    b.store(vars.ahit_accept, no);
    b.store(vars.ahit_terminate, no);
    b.store(vars.terminated, no);
    bump_history_count(b, vars, 1 << 16);

    let selector = b.load(inner.idx);
    let can_have_null = !vars
      .flags
      .contains(PipelineCreateFlags::NO_NULL_INTERSECTION_SHADERS);
    self.dispatch(b, &inner, selector, can_have_null, intersection_cases)?;

    let accepted = b.load(vars.ahit_accept);
    b.if_by(accepted, |b| {
      let tmax = b.load(inner.tmax);
      self.commit(b, leaf, tmax, sbt_index);
      let terminated = b.load(vars.terminated);
      b.break_if(terminated);
    });
    Ok(())
  }
}

/// Emit the traversal of the ray in `vars` followed by the code that hands the result on.
///
/// In a monolithic kernel the closest hit or miss shader is inlined right after the walk.
/// Otherwise the walk ends with a call of the closest hit or miss stage kernel. Returns the
/// frame scratch the inlined shaders need.
pub fn build_traversal(
  b: &mut FunctionBuilder,
  ctx: &RtCompileCtx,
  vars: &mut RayStateVars,
  monolithic: bool,
  ignore_cull_mask: bool,
) -> Result<u32, RtCompileError> {
  let options = ctx.options;
  let flags = ctx.pipeline.flags;
  log::debug!(
    "build {} traversal in {}",
    if monolithic { "monolithic" } else { "separate" },
    b.function().name
  );

  if options.ray_history.is_some() {
    vars.track_history(b);
  }
  let vars = &*vars;
  if let Some(count) = vars.ahit_isec_count {
    let zero = b.imm_u32(0);
    b.store(count, zero);
  }

  let hit_attribs: Vec<_> = (0..MAX_HIT_ATTRIB_DWORDS)
    .map(|_| b.make_local_var("hit_attrib", ValueType::U32))
    .collect();
  let trav = TraversalVars::new(b);

  let cull_mask_and_flags = b.load(vars.cull_mask_and_flags);
  let no = b.imm_bool(false);
  b.store(trav.hit, no);

  let accel_struct = b.load(vars.accel_struct);
  let zero = b.imm_u32(0);
  let bvh_offset = b.make_local_var_init("bvh_offset", zero);
  let has_accel = b.not_equals_imm(accel_struct, 0);
  b.if_by(has_accel, |b| {
    let offset = b.load_global(accel_struct, ValueType::U32);
    b.store(bvh_offset, offset);
  });
  let root = b.imm_u32(BVH_ROOT_NODE);
  let invalid = b.imm_u32(BVH_INVALID_NODE);
  let start = b.select(has_accel, root, invalid);
  let bvh_offset = b.load(bvh_offset);
  let bvh_offset = b.u2u64(bvh_offset);
  let root_bvh_base = b.add(accel_struct, bvh_offset);

  b.store(trav.current_node, start);
  b.store(trav.previous_node, invalid);
  b.store(trav.instance_top_node, invalid);
  let top_stack_none = b.imm_u32(TOP_STACK_NONE);
  b.store(trav.top_stack, top_stack_none);
  b.store(trav.stack, zero);
  b.store(trav.stack_low_watermark, zero);
  b.store(trav.iteration_instance_count, zero);
  b.store(trav.bvh_base, root_bvh_base);
  let origin = b.load(vars.origin);
  b.store(trav.origin, origin);
  let dir = b.load(vars.direction);
  b.store(trav.dir, dir);
  let inv_dir = reciprocal(b, dir);
  b.store(trav.inv_dir, inv_dir);
  let zero64 = b.imm_u64(0);
  b.store(trav.instance_addr, zero64);
  b.store(trav.sbt_offset_and_flags, zero);

  let original_tmax = b.load(vars.tmax);

  let any_hit_cases = collect_inlined_cases(ctx.pipeline, CasePurpose::AnyHit);
  let intersection_cases = collect_inlined_cases(ctx.pipeline, CasePurpose::Intersection);
  log::debug!(
    "{} any hit cases, {} intersection cases",
    any_hit_cases.len(),
    intersection_cases.len()
  );

  let case_scratch = Cell::new(0);
  let candidates = CandidateCtx {
    ctx,
    vars,
    trav: &trav,
    hit_attribs: &hit_attribs,
    case_scratch: &case_scratch,
  };

  let mut triangle = |b: &mut FunctionBuilder, candidate: &TriangleCandidate| {
    candidates.handle_candidate_triangle(b, candidate, &any_hit_cases)
  };
  let mut aabb = |b: &mut FunctionBuilder, leaf: &LeafIntersection| {
    candidates.handle_candidate_aabb(b, leaf, &intersection_cases)
  };

  build_ray_traversal(
    b,
    &trav,
    TraversalArgs {
      root_bvh_base,
      origin: vars.origin,
      direction: vars.direction,
      tmin: vars.tmin,
      tmax: vars.tmax,
      cull_mask_and_flags,
      stack_entries: options.traversal_stack_entries,
      wave_size: options.wave_size,
      ignore_cull_mask,
      count_iterations: options.ray_history.is_some(),
      triangle: (!flags.contains(PipelineCreateFlags::SKIP_TRIANGLES))
        .then_some(&mut triangle as &mut TriangleCallback),
      aabb: (!flags.contains(PipelineCreateFlags::SKIP_AABBS)).then_some(&mut aabb as &mut AabbCallback),
    },
  )?;

  if let Some(history) = &options.ray_history {
    build_end_trace_token(b, vars, &trav, history, original_tmax);
  }

  let hit = b.load(trav.hit);
  if monolithic {
    let closest_hit_cases = collect_inlined_cases(ctx.pipeline, CasePurpose::ClosestHit);
    let miss_cases = collect_inlined_cases(ctx.pipeline, CasePurpose::Miss);

    let mut result = Ok(());
    let mut miss_result = Ok(());
    b.if_by(hit, |b| {
      let sbt_index = b.load(vars.idx);
      load_sbt_entry(b, vars, sbt_index, SbtKind::Hit, SbtEntryField::ClosestHitIdx);

      let skip = b.test_mask(
        cull_mask_and_flags,
        RayFlags::SKIP_CLOSEST_HIT_SHADER.bits() as u64,
      );
      let run = b.not(skip);
      b.if_by(run, |b| {
        let selector = b.load(vars.idx);
        let can_have_null = !flags.contains(PipelineCreateFlags::NO_NULL_CLOSEST_HIT_SHADERS);
        result = candidates.dispatch(b, vars, selector, can_have_null, &closest_hit_cases);
      });
    })
    .else_by(|b| {
      let miss_index = b.load(vars.miss_index);
      load_sbt_entry(b, vars, miss_index, SbtKind::Miss, SbtEntryField::GeneralIdx);
      let selector = b.load(vars.idx);
      let can_have_null = !flags.contains(PipelineCreateFlags::NO_NULL_MISS_SHADERS);
      miss_result = candidates.dispatch(b, vars, selector, can_have_null, &miss_cases);
    });
    result?;
    miss_result?;
  } else {
    b.if_by(hit, |b| {
      for (slot, register) in hit_attribs.iter().enumerate() {
        let value = b.load(*register);
        b.intrinsic(RtIntrinsic::StoreHitAttrib { slot: slot as u32 }, &[value]);
      }
      let args = [
        vars.idx,
        vars.tmax,
        vars.primitive_addr,
        vars.primitive_id,
        vars.instance_addr,
        vars.geometry_id_and_flags,
        vars.hit_kind,
      ]
      .map(|var| b.load(var));
      b.intrinsic(RtIntrinsic::ExecuteClosestHit, &args);
    })
    .else_by(|b| {
      let tmax = b.load(vars.tmax);
      b.intrinsic(RtIntrinsic::ExecuteMiss, &[tmax]);
    });
  }

  Ok(case_scratch.get())
}

/// The body of the standalone traversal stage kernel.
///
/// The ray comes in through the ray intrinsics, which the stage abi lowering binds to the
/// argument registers.
pub fn build_traversal_function(ctx: &RtCompileCtx) -> Result<ShaderFunction, RtCompileError> {
  let mut function = ShaderFunction::new("traversal", RtStage::Traversal);
  let case_scratch = {
    let mut b = function.builder();
    let mut vars = RayStateVars::new(&mut b, ctx.pipeline.flags, false);

    for (intrinsic, var) in [
      (RtIntrinsic::RayTMin, vars.tmin),
      (RtIntrinsic::RayTMax, vars.tmax),
      (RtIntrinsic::SbtOffset, vars.sbt_offset),
      (RtIntrinsic::SbtStride, vars.sbt_stride),
      (RtIntrinsic::AccelStruct, vars.accel_struct),
      (RtIntrinsic::CullMaskAndFlags, vars.cull_mask_and_flags),
      (RtIntrinsic::WorldOrigin, vars.origin),
      (RtIntrinsic::WorldDirection, vars.direction),
      (RtIntrinsic::RtArgScratchOffset, vars.arg),
    ] {
      let value = b.intrinsic(intrinsic, &[]);
      b.store(var, value);
    }
    let miss_index = b.load_arg(RtArg::MissIndex.slot(), ValueType::U32);
    b.store(vars.miss_index, miss_index);
    let zero = b.imm_u32(0);
    b.store(vars.stack_ptr, zero);

    build_traversal(&mut b, ctx, &mut vars, false, false)?
  };
  function.scratch_size = case_scratch;
  Ok(function)
}
