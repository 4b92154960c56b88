use crate::*;

/// The argument registers shared by every stage kernel of a pipeline.
///
/// A stage reads its state from these in the prologue and writes the state of the next
/// shader back in the epilogue.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RtArg {
  LaunchSize(u32),
  LaunchId(u32),
  SbtDescriptors,
  TraversalShaderAddr,
  ShaderAddr,
  UniformShaderAddr,
  DynamicCallableStackBase,
  ShaderRecord,
  PayloadOffset,
  AccelStruct,
  CullMaskAndFlags,
  SbtOffset,
  SbtStride,
  MissIndex,
  RayOrigin,
  RayTMin,
  RayDirection,
  RayTMax,
  PrimitiveAddr,
  PrimitiveId,
  InstanceAddr,
  GeometryIdAndFlags,
  HitKind,
}

impl RtArg {
  pub fn slot(self) -> u32 {
    match self {
      RtArg::LaunchSize(i) => i.min(2),
      RtArg::LaunchId(i) => 3 + i.min(2),
      RtArg::SbtDescriptors => 6,
      RtArg::TraversalShaderAddr => 7,
      RtArg::ShaderAddr => 8,
      RtArg::UniformShaderAddr => 9,
      RtArg::DynamicCallableStackBase => 10,
      RtArg::ShaderRecord => 11,
      RtArg::PayloadOffset => 12,
      RtArg::AccelStruct => 13,
      RtArg::CullMaskAndFlags => 14,
      RtArg::SbtOffset => 15,
      RtArg::SbtStride => 16,
      RtArg::MissIndex => 17,
      RtArg::RayOrigin => 18,
      RtArg::RayTMin => 19,
      RtArg::RayDirection => 20,
      RtArg::RayTMax => 21,
      RtArg::PrimitiveAddr => 22,
      RtArg::PrimitiveId => 23,
      RtArg::InstanceAddr => 24,
      RtArg::GeometryIdAndFlags => 25,
      RtArg::HitKind => 26,
    }
  }

  pub fn ty(self) -> ValueType {
    use ValueType::*;
    match self {
      RtArg::SbtDescriptors
      | RtArg::TraversalShaderAddr
      | RtArg::ShaderAddr
      | RtArg::UniformShaderAddr
      | RtArg::ShaderRecord
      | RtArg::AccelStruct
      | RtArg::PrimitiveAddr
      | RtArg::InstanceAddr => U64,
      RtArg::RayOrigin | RtArg::RayDirection => Vec3,
      RtArg::RayTMin | RtArg::RayTMax => F32,
      _ => U32,
    }
  }
}

pub const RT_ARG_COUNT: u32 = 27;

/// every argument backed by a ray state var, in prologue order
fn arg_bindings(vars: &RayStateVars) -> Vec<(RtArg, VarHandle)> {
  let mut bindings = Vec::with_capacity(RT_ARG_COUNT as usize);
  for i in 0..3 {
    bindings.push((RtArg::LaunchSize(i), vars.launch_sizes[i as usize]));
  }
  for i in 0..3 {
    bindings.push((RtArg::LaunchId(i), vars.launch_ids[i as usize]));
  }
  bindings.extend([
    (RtArg::TraversalShaderAddr, vars.traversal_addr),
    (RtArg::ShaderAddr, vars.shader_addr),
    (RtArg::DynamicCallableStackBase, vars.stack_ptr),
    (RtArg::ShaderRecord, vars.shader_record_ptr),
    (RtArg::PayloadOffset, vars.arg),
    (RtArg::AccelStruct, vars.accel_struct),
    (RtArg::CullMaskAndFlags, vars.cull_mask_and_flags),
    (RtArg::SbtOffset, vars.sbt_offset),
    (RtArg::SbtStride, vars.sbt_stride),
    (RtArg::MissIndex, vars.miss_index),
    (RtArg::RayOrigin, vars.origin),
    (RtArg::RayTMin, vars.tmin),
    (RtArg::RayDirection, vars.direction),
    (RtArg::RayTMax, vars.tmax),
    (RtArg::PrimitiveAddr, vars.primitive_addr),
    (RtArg::PrimitiveId, vars.primitive_id),
    (RtArg::InstanceAddr, vars.instance_addr),
    (RtArg::GeometryIdAndFlags, vars.geometry_id_and_flags),
    (RtArg::HitKind, vars.hit_kind),
  ]);
  bindings
}

/// Turn `shader` into a self contained stage kernel and return the scratch it needs per
/// invocation.
///
/// The kernel body only runs for invocations whose `shader_addr` matches the uniformly selected
/// shader, other invocations pass their state through untouched. Raygen shaders are entered by
/// every invocation and skip that guard unless they are a resume shader.
pub fn lower_rt_abi(
  shader: &mut ShaderFunction,
  ctx: &RtCompileCtx,
  resume_shader: bool,
  monolithic: bool,
) -> Result<u32, RtCompileError> {
  let stage = shader.stage;
  log::debug!(
    "lower {} ({:?}) to the stage abi, resume: {}, monolithic: {}",
    shader.name,
    stage,
    resume_shader,
    monolithic
  );

  let mut vars = RayStateVars::new(&mut shader.builder(), ctx.pipeline.flags, monolithic);

  if monolithic {
    lower_rt_instructions_monolithic(shader, &mut vars, ctx)?;
  }

  let mut info = RtShaderInfo::default();
  lower_rt_instructions(shader, &mut vars, true, &mut info)?;

  let stack_size = vars.stack_size.max(shader.scratch_size);
  shader.scratch_size = 0;

  lower_returns_to_scope(shader);

  let body = std::mem::take(&mut shader.body);
  {
    let mut b = shader.builder();
    let bindings = arg_bindings(&vars);

    for (arg, var) in &bindings {
      let value = b.load_arg(arg.slot(), arg.ty());
      b.store(*var, value);
    }

    if stage != RtStage::RayGen || resume_shader {
      let uniform_shader_addr = b.load_arg(RtArg::UniformShaderAddr.slot(), ValueType::U64);
      let uniform_shader_addr = b.or_imm(uniform_shader_addr, priority(stage));
      let shader_addr = b.load(vars.shader_addr);
      let selected = b.equals(uniform_shader_addr, shader_addr);
      b.if_by(selected, |b| {
        for stmt in body {
          b.emit(stmt);
        }
      });
    } else {
      for stmt in body {
        b.emit(stmt);
      }
    }

    if monolithic {
      b.terminate();
    } else {
      let shader_addr = b.load(vars.shader_addr);
      let next = select_next_shader(&mut b, shader_addr, stage, ctx.options.wave_size);
      b.store_arg(RtArg::UniformShaderAddr.slot(), next);

      for (arg, var) in &bindings {
        let value = b.load(*var);
        b.store_arg(arg.slot(), value);
      }
    }
  }

  if matches!(stage, RtStage::ClosestHit | RtStage::Traversal) {
    lower_hit_attribs(shader, None, ctx.options.wave_size)?;
  }

  Ok(stack_size)
}
