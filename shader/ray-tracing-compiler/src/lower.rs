use crate::*;

/// Hit attribute storage per invocation, in dwords.
pub const MAX_HIT_ATTRIB_DWORDS: u32 = 8;

/// Which launch builtins a lowered stage reads.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RtShaderInfo {
  pub uses_launch_id: bool,
  pub uses_launch_size: bool,
}

pub fn align16(v: u32) -> u32 {
  (v + 15) & !15
}

/// Rewrite the ray tracing intrinsics of `function` into plain operations on `vars`.
///
/// The early pass (`late_lowering == false`) runs on shaders that are about to be inlined and
/// leaves launch builtins and frame relative scratch untouched. The late pass runs on whole
/// stage kernels, it additionally resolves launch builtins and folds the stack pointer into
/// every frame relative scratch access.
pub fn lower_rt_instructions(
  function: &mut ShaderFunction,
  vars: &mut RayStateVars,
  late_lowering: bool,
  info: &mut RtShaderInfo,
) -> Result<(), RtCompileError> {
  log::trace!(
    "lower rt instructions of {} (late: {})",
    function.name,
    late_lowering
  );
  let mut pass = LowerRtInstructions {
    vars,
    late_lowering,
    info,
    stage: function.stage,
    frame_size: function.scratch_size,
  };
  run_instruction_pass(function, &mut pass)
}

struct LowerRtInstructions<'a> {
  vars: &'a mut RayStateVars,
  late_lowering: bool,
  info: &'a mut RtShaderInfo,
  stage: RtStage,
  frame_size: u32,
}

fn intrinsic_of(b: &FunctionBuilder, node: NodeHandle) -> Option<(RtIntrinsic, SmallVec<[NodeHandle; 4]>)> {
  match b.node_expr(node) {
    NodeExpr::Intrinsic { intrinsic, args } => Some((*intrinsic, args.clone())),
    _ => None,
  }
}

/// the caller side of a call: push the return address above the caller frame and hand the
/// payload over relative to the callee frame
fn push_call_frame(
  b: &mut FunctionBuilder,
  vars: &mut RayStateVars,
  stage: RtStage,
  call_idx: u32,
  stack_size: u32,
  payload: NodeHandle,
) {
  let size = align16(stack_size);

  let ret = b.resume_shader_address(call_idx);
  let ret = b.or_imm(ret, priority(stage));

  let stack_ptr = b.load(vars.stack_ptr);
  let stack_ptr = b.add_imm(stack_ptr, size as u64);
  b.store(vars.stack_ptr, stack_ptr);
  b.store_scratch(ScratchBase::Absolute, stack_ptr, ret);
  let stack_ptr = b.add_imm(stack_ptr, 16);
  b.store(vars.stack_ptr, stack_ptr);

  let arg = b.sub_imm(payload, (size + 16) as u64);
  b.store(vars.arg, arg);

  vars.stack_size = vars.stack_size.max(size + 16);
}

/// pop the return frame and continue at the caller's resume address
pub fn insert_rt_return(b: &mut FunctionBuilder, vars: &RayStateVars) {
  let stack_ptr = b.load(vars.stack_ptr);
  let stack_ptr = b.sub_imm(stack_ptr, 16);
  b.store(vars.stack_ptr, stack_ptr);
  let ret = b.load_scratch(ScratchBase::Absolute, stack_ptr, ValueType::U64);
  b.store(vars.shader_addr, ret);
}

/// store the trace ray operands into the ray state, masking the bits the api ignores
pub(crate) fn store_trace_ray_args(b: &mut FunctionBuilder, vars: &RayStateVars, args: &[NodeHandle]) {
  b.store(vars.accel_struct, args[0]);

  let cull_mask = b.shl_imm(args[2], 24);
  let cull_mask_and_flags = b.or(cull_mask, args[1]);
  b.store(vars.cull_mask_and_flags, cull_mask_and_flags);

  let sbt_offset = b.and_imm(args[3], 0xf);
  b.store(vars.sbt_offset, sbt_offset);
  let sbt_stride = b.and_imm(args[4], 0xf);
  b.store(vars.sbt_stride, sbt_stride);
  let miss_index = b.and_imm(args[5], 0xffff);
  b.store(vars.miss_index, miss_index);

  b.store(vars.origin, args[6]);
  b.store(vars.tmin, args[7]);
  b.store(vars.direction, args[8]);
  b.store(vars.tmax, args[9]);
}

fn warn_on_out_of_frame_payload(b: &FunctionBuilder, payload: NodeHandle, frame_size: u32) {
  if let NodeExpr::Const(Value::U32(offset)) = b.node_expr(payload) {
    if *offset >= frame_size {
      log::warn!(
        "{}: payload at scratch offset {} lies outside the {} byte frame",
        b.function().name,
        offset,
        frame_size
      );
    }
  }
}

impl<'a> LowerRtInstructions<'a> {
  fn read_var(&self, b: &mut FunctionBuilder, node: NodeHandle, var: VarHandle) {
    let value = b.load(var);
    b.rebind(node, value);
  }

  fn lower_intrinsic(
    &mut self,
    b: &mut FunctionBuilder,
    node: NodeHandle,
    intrinsic: RtIntrinsic,
    args: &[NodeHandle],
  ) -> NodeAction {
    let vars = &mut *self.vars;
    match intrinsic {
      RtIntrinsic::TraceRay {
        call_idx,
        stack_size,
      } => {
        warn_on_out_of_frame_payload(b, args[10], self.frame_size);
        push_call_frame(b, vars, self.stage, call_idx, stack_size, args[10]);
        let traversal_addr = b.load(vars.traversal_addr);
        b.store(vars.shader_addr, traversal_addr);
        store_trace_ray_args(b, vars, args);
        NodeAction::Remove
      }
      RtIntrinsic::ExecuteCallable {
        call_idx,
        stack_size,
      } => {
        push_call_frame(b, vars, self.stage, call_idx, stack_size, args[1]);
        load_sbt_entry(b, vars, args[0], SbtKind::Callable, SbtEntryField::RecursivePtr);
        NodeAction::Remove
      }
      RtIntrinsic::Resume { stack_size } => {
        let stack_ptr = b.load(vars.stack_ptr);
        let stack_ptr = b.sub_imm(stack_ptr, align16(stack_size) as u64);
        b.store(vars.stack_ptr, stack_ptr);
        NodeAction::Remove
      }
      RtIntrinsic::Return => {
        if self.stage == RtStage::RayGen {
          b.terminate();
        } else {
          insert_rt_return(b, vars);
        }
        NodeAction::Remove
      }
      RtIntrinsic::ExecuteClosestHit => {
        b.store(vars.tmax, args[1]);
        b.store(vars.primitive_addr, args[2]);
        b.store(vars.primitive_id, args[3]);
        b.store(vars.instance_addr, args[4]);
        b.store(vars.geometry_id_and_flags, args[5]);
        b.store(vars.hit_kind, args[6]);
        load_sbt_entry(b, vars, args[0], SbtKind::Hit, SbtEntryField::RecursivePtr);

        let cull_mask_and_flags = b.load(vars.cull_mask_and_flags);
        let mut should_return = b.test_mask(
          cull_mask_and_flags,
          RayFlags::SKIP_CLOSEST_HIT_SHADER.bits() as u64,
        );
        if !vars
          .flags
          .contains(PipelineCreateFlags::NO_NULL_CLOSEST_HIT_SHADERS)
        {
          let shader_addr = b.load(vars.shader_addr);
          let null = b.equals_imm(shader_addr, 0);
          should_return = b.or(should_return, null);
        }
        // the closest hit is skipped, hand control back to the caller right away
        let vars = &*vars;
        b.if_by(should_return, |b| insert_rt_return(b, vars));
        NodeAction::Remove
      }
      RtIntrinsic::ExecuteMiss => {
        b.store(vars.tmax, args[0]);
        for (var, ty) in [
          (vars.primitive_addr, ValueType::U64),
          (vars.primitive_id, ValueType::U32),
          (vars.instance_addr, ValueType::U64),
          (vars.geometry_id_and_flags, ValueType::U32),
          (vars.hit_kind, ValueType::U32),
        ] {
          let undef = b.undef(ty);
          b.store(var, undef);
        }
        let miss_index = b.load(vars.miss_index);
        load_sbt_entry(b, vars, miss_index, SbtKind::Miss, SbtEntryField::RecursivePtr);

        if !vars.flags.contains(PipelineCreateFlags::NO_NULL_MISS_SHADERS) {
          let shader_addr = b.load(vars.shader_addr);
          let null = b.equals_imm(shader_addr, 0);
          let vars = &*vars;
          b.if_by(null, |b| insert_rt_return(b, vars));
        }
        NodeAction::Remove
      }
      RtIntrinsic::IgnoreIntersection => {
        let no = b.imm_bool(false);
        b.store(vars.ahit_accept, no);
        b.do_return();
        NodeAction::Remove
      }
      RtIntrinsic::TerminateRay => {
        let yes = b.imm_bool(true);
        b.store(vars.ahit_accept, yes);
        b.store(vars.ahit_terminate, yes);
        b.do_return();
        NodeAction::Remove
      }
      RtIntrinsic::ReportIntersection => {
        let (t, kind) = (args[0], args[1]);
        let tmax = b.load(vars.tmax);
        let tmin = b.load(vars.tmin);
        let terminated = b.load(vars.terminated);
        let below_max = b.greater_equal_than(tmax, t);
        let above_min = b.greater_equal_than(t, tmin);
        let live = b.not(terminated);
        let in_range = b.and(below_max, above_min);
        let accept = b.and(in_range, live);

        let vars = &*vars;
        b.if_by(accept, |b| {
          let yes = b.imm_bool(true);
          b.store(vars.ahit_accept, yes);
          b.store(vars.tmax, t);
          b.store(vars.hit_kind, kind);

          let cull_mask_and_flags = b.load(vars.cull_mask_and_flags);
          let first_hit = b.test_mask(
            cull_mask_and_flags,
            RayFlags::TERMINATE_ON_FIRST_HIT.bits() as u64,
          );
          let ahit_terminate = b.load(vars.ahit_terminate);
          let terminated = b.or(first_hit, ahit_terminate);
          b.store(vars.terminated, terminated);
        });
        b.rebind(node, accept);
        NodeAction::Keep
      }
      RtIntrinsic::LaunchId => {
        self.info.uses_launch_id = true;
        if self.late_lowering {
          let ids = vars.launch_ids.map(|v| b.load(v));
          let value = b.compose(ids[0], ids[1], ids[2]);
          b.rebind(node, value);
        }
        NodeAction::Keep
      }
      RtIntrinsic::LaunchSize => {
        self.info.uses_launch_size = true;
        if self.late_lowering {
          let sizes = vars.launch_sizes.map(|v| b.load(v));
          let value = b.compose(sizes[0], sizes[1], sizes[2]);
          b.rebind(node, value);
        }
        NodeAction::Keep
      }
      RtIntrinsic::ShaderRecordPtr => self.keep_var(b, node, self.vars.shader_record_ptr),
      RtIntrinsic::RtArgScratchOffset => self.keep_var(b, node, self.vars.arg),
      RtIntrinsic::RayTMin => self.keep_var(b, node, self.vars.tmin),
      RtIntrinsic::RayTMax => self.keep_var(b, node, self.vars.tmax),
      RtIntrinsic::WorldOrigin => self.keep_var(b, node, self.vars.origin),
      RtIntrinsic::WorldDirection => self.keep_var(b, node, self.vars.direction),
      RtIntrinsic::HitKind => self.keep_var(b, node, self.vars.hit_kind),
      RtIntrinsic::PrimitiveId => self.keep_var(b, node, self.vars.primitive_id),
      RtIntrinsic::AccelStruct => self.keep_var(b, node, self.vars.accel_struct),
      RtIntrinsic::SbtOffset => self.keep_var(b, node, self.vars.sbt_offset),
      RtIntrinsic::SbtStride => self.keep_var(b, node, self.vars.sbt_stride),
      RtIntrinsic::CullMaskAndFlags => self.keep_var(b, node, self.vars.cull_mask_and_flags),
      RtIntrinsic::IntersectionOpaque => self.keep_var(b, node, self.vars.opaque),
      RtIntrinsic::GeometryIndex => {
        let gid = b.load(vars.geometry_id_and_flags);
        let value = b.and_imm(gid, GEOMETRY_ID_MASK as u64);
        b.rebind(node, value);
        NodeAction::Keep
      }
      RtIntrinsic::IncomingRayFlags => {
        let flags = b.load(vars.cull_mask_and_flags);
        let value = b.and_imm(flags, 0xFF_FFFF);
        b.rebind(node, value);
        NodeAction::Keep
      }
      RtIntrinsic::CullMask => {
        let flags = b.load(vars.cull_mask_and_flags);
        let value = b.shr_imm(flags, 24);
        b.rebind(node, value);
        NodeAction::Keep
      }
      RtIntrinsic::InstanceCustomIndex => {
        let instance = b.load(vars.instance_addr);
        let packed = b.load_global_at(instance, INSTANCE_NODE_CUSTOM_INDEX_OFFSET, ValueType::U32);
        let value = b.and_imm(packed, 0xFF_FFFF);
        b.rebind(node, value);
        NodeAction::Keep
      }
      RtIntrinsic::InstanceId => {
        let instance = b.load(vars.instance_addr);
        let value = b.load_global_at(instance, INSTANCE_NODE_ID_OFFSET, ValueType::U32);
        b.rebind(node, value);
        NodeAction::Keep
      }
      RtIntrinsic::WorldToObject { column } => {
        let instance = b.load(vars.instance_addr);
        let matrix = b.add_imm(instance, INSTANCE_NODE_WORLD_TO_OBJECT_OFFSET);
        let value = load_matrix_column(b, matrix, column);
        b.rebind(node, value);
        NodeAction::Keep
      }
      RtIntrinsic::ObjectToWorld { column } => {
        let instance = b.load(vars.instance_addr);
        let matrix = b.add_imm(instance, INSTANCE_NODE_OBJECT_TO_WORLD_OFFSET);
        let value = load_matrix_column(b, matrix, column);
        b.rebind(node, value);
        NodeAction::Keep
      }
      RtIntrinsic::ObjectOrigin | RtIntrinsic::ObjectDirection => {
        let is_origin = intrinsic == RtIntrinsic::ObjectOrigin;
        let instance = b.load(vars.instance_addr);
        let matrix = b.add_imm(instance, INSTANCE_NODE_WORLD_TO_OBJECT_OFFSET);
        let world = b.load(if is_origin { vars.origin } else { vars.direction });
        let value = transform_by_matrix(b, matrix, world, is_origin);
        b.rebind(node, value);
        NodeAction::Keep
      }
      RtIntrinsic::TriangleVertexPosition { vertex } => {
        let primitive = b.load(vars.primitive_addr);
        let value = b.load_global_at(
          primitive,
          TRIANGLE_NODE_VERTEX_OFFSET + vertex.min(2) as u64 * 12,
          ValueType::Vec3,
        );
        b.rebind(node, value);
        NodeAction::Keep
      }
      // resolved by lower_hit_attribs
      RtIntrinsic::LoadHitAttrib { .. } | RtIntrinsic::StoreHitAttrib { .. } => NodeAction::Keep,
    }
  }

  fn keep_var(&self, b: &mut FunctionBuilder, node: NodeHandle, var: VarHandle) -> NodeAction {
    self.read_var(b, node, var);
    NodeAction::Keep
  }

  fn rebase(&self, b: &mut FunctionBuilder, offset: NodeHandle) -> NodeHandle {
    let stack_ptr = b.load(self.vars.stack_ptr);
    b.add(stack_ptr, offset)
  }
}

impl<'a> InstructionPass for LowerRtInstructions<'a> {
  type Error = RtCompileError;

  fn visit_node(&mut self, b: &mut FunctionBuilder, node: NodeHandle) -> Result<NodeAction, Self::Error> {
    if let Some((intrinsic, args)) = intrinsic_of(b, node) {
      return Ok(self.lower_intrinsic(b, node, intrinsic, &args));
    }

    if self.late_lowering {
      if let NodeExpr::LoadScratch {
        base: ScratchBase::Frame,
        offset,
        ty,
      } = *b.node_expr(node)
      {
        let offset = self.rebase(b, offset);
        b.replace_node(
          node,
          NodeExpr::LoadScratch {
            base: ScratchBase::Absolute,
            offset,
            ty,
          },
        );
      }
    }
    Ok(NodeAction::Keep)
  }

  fn visit_stmt(&mut self, b: &mut FunctionBuilder, stmt: Stmt) -> Result<Option<Stmt>, Self::Error> {
    Ok(Some(match stmt {
      // the end of an invocation is a return to the kernel epilogue
      Stmt::Terminate => Stmt::Return,
      Stmt::StoreScratch {
        base: ScratchBase::Frame,
        offset,
        value,
      } if self.late_lowering => Stmt::StoreScratch {
        base: ScratchBase::Absolute,
        offset: self.rebase(b, offset),
        value,
      },
      stmt => stmt,
    }))
  }
}

/// Rewrite the calls of a raygen shader in a pipeline compiled as one kernel: trace ray builds
/// the whole traversal with closest hit and miss shaders inlined in place.
pub fn lower_rt_instructions_monolithic(
  function: &mut ShaderFunction,
  vars: &mut RayStateVars,
  ctx: &RtCompileCtx,
) -> Result<(), RtCompileError> {
  log::debug!("lower {} as a monolithic pipeline", function.name);
  let mut pass = LowerMonolithic {
    vars,
    ctx,
    stage: function.stage,
    frame_size: function.scratch_size,
  };
  run_instruction_pass(function, &mut pass)?;
  function.shared_size = function.shared_size.max(ctx.options.traversal_stack_bytes());
  Ok(())
}

struct LowerMonolithic<'a, 'c> {
  vars: &'a mut RayStateVars,
  ctx: &'a RtCompileCtx<'c>,
  stage: RtStage,
  frame_size: u32,
}

impl<'a, 'c> InstructionPass for LowerMonolithic<'a, 'c> {
  type Error = RtCompileError;

  fn visit_node(&mut self, b: &mut FunctionBuilder, node: NodeHandle) -> Result<NodeAction, Self::Error> {
    let Some((intrinsic, args)) = intrinsic_of(b, node) else {
      return Ok(NodeAction::Keep);
    };

    match intrinsic {
      // there are no callable shaders to run in a single kernel
      RtIntrinsic::ExecuteCallable { .. } => Ok(NodeAction::Remove),
      RtIntrinsic::TraceRay { .. } => {
        let vars = &mut *self.vars;
        let ignore_cull_mask =
          matches!(b.node_expr(args[2]), NodeExpr::Const(Value::U32(mask)) if mask & 0xFF == 0xFF);

        warn_on_out_of_frame_payload(b, args[10], self.frame_size);
        store_trace_ray_args(b, vars, &args);
        let arg = b.sub_imm(args[10], self.frame_size as u64);
        b.store(vars.arg, arg);

        let saved_stack_ptr = b.load(vars.stack_ptr);
        let callee_stack_ptr = b.add_imm(saved_stack_ptr, self.frame_size as u64);
        b.store(vars.stack_ptr, callee_stack_ptr);

        let case_scratch = build_traversal(b, self.ctx, vars, true, ignore_cull_mask)?;
        vars.stack_size = vars.stack_size.max(self.frame_size + case_scratch);

        b.store(vars.stack_ptr, saved_stack_ptr);
        Ok(NodeAction::Remove)
      }
      RtIntrinsic::Resume { .. }
      | RtIntrinsic::Return
      | RtIntrinsic::ExecuteClosestHit
      | RtIntrinsic::ExecuteMiss => Err(RtCompileError::UnexpectedIntrinsic {
        intrinsic,
        stage: self.stage,
      }),
      _ => Ok(NodeAction::Keep),
    }
  }
}

/// Resolve hit attribute accesses, either into `registers` or, without registers, into shared
/// memory laid out slot major so consecutive lanes access consecutive dwords.
pub fn lower_hit_attribs(
  function: &mut ShaderFunction,
  registers: Option<&[VarHandle]>,
  wave_size: u32,
) -> Result<(), RtCompileError> {
  let stage = function.stage;
  run_instruction_pass(
    function,
    &mut LowerHitAttribs {
      registers,
      wave_size,
      stage,
    },
  )?;
  if registers.is_none() {
    function.shared_size = function
      .shared_size
      .max(wave_size * MAX_HIT_ATTRIB_DWORDS * 4);
  }
  Ok(())
}

struct LowerHitAttribs<'a> {
  registers: Option<&'a [VarHandle]>,
  wave_size: u32,
  stage: RtStage,
}

impl<'a> LowerHitAttribs<'a> {
  fn shared_offset(&self, b: &mut FunctionBuilder, slot: u32) -> NodeHandle {
    let lane = b.local_invocation_index();
    let index = b.add_imm(lane, (slot * self.wave_size) as u64);
    b.mul_imm(index, 4)
  }
}

impl<'a> InstructionPass for LowerHitAttribs<'a> {
  type Error = RtCompileError;

  fn visit_node(&mut self, b: &mut FunctionBuilder, node: NodeHandle) -> Result<NodeAction, Self::Error> {
    let Some((intrinsic, args)) = intrinsic_of(b, node) else {
      return Ok(NodeAction::Keep);
    };
    let slot = match intrinsic {
      RtIntrinsic::LoadHitAttrib { slot } | RtIntrinsic::StoreHitAttrib { slot } => slot,
      _ => return Ok(NodeAction::Keep),
    };
    if slot >= MAX_HIT_ATTRIB_DWORDS {
      return Err(RtCompileError::UnexpectedIntrinsic {
        intrinsic,
        stage: self.stage,
      });
    }

    let register = match self.registers {
      Some(registers) => Some(*registers.get(slot as usize).ok_or(
        RtCompileError::UnexpectedIntrinsic {
          intrinsic,
          stage: self.stage,
        },
      )?),
      None => None,
    };

    if let RtIntrinsic::LoadHitAttrib { .. } = intrinsic {
      let value = match register {
        Some(register) => b.load(register),
        None => {
          let offset = self.shared_offset(b, slot);
          b.load_shared(offset, ValueType::U32)
        }
      };
      b.rebind(node, value);
      Ok(NodeAction::Keep)
    } else {
      match register {
        Some(register) => b.store(register, args[0]),
        None => {
          let offset = self.shared_offset(b, slot);
          b.store_shared(offset, args[0]);
        }
      }
      Ok(NodeAction::Remove)
    }
  }
}
