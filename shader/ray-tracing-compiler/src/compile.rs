use crate::*;

/// What every lowering step of one pipeline compile reads.
#[derive(Clone, Copy)]
pub struct RtCompileCtx<'a> {
  pub pipeline: &'a RayTracingPipeline,
  pub options: &'a CompileOptions,
}

/// A stage kernel ready to hand to the backend.
#[derive(Debug)]
pub struct CompiledKernel {
  pub function: ShaderFunction,
  pub stage: RtStage,
  /// scratch bytes per invocation, including the call frames the kernel pushes
  pub stack_size: u32,
  /// shared memory bytes per wave
  pub shared_size: u32,
}

fn finish(
  mut function: ShaderFunction,
  ctx: &RtCompileCtx,
  resume_shader: bool,
  monolithic: bool,
) -> Result<CompiledKernel, RtCompileError> {
  let stack_size = lower_rt_abi(&mut function, ctx, resume_shader, monolithic)?;
  log::debug!(
    "compiled {} ({:?}): stack {} bytes, shared {} bytes",
    function.name,
    function.stage,
    stack_size,
    function.shared_size
  );
  Ok(CompiledKernel {
    stage: function.stage,
    shared_size: function.shared_size,
    stack_size,
    function,
  })
}

/// Compile stage `stage_index` of `pipeline` into a kernel running under the scheduler.
///
/// Any hit and intersection stages only run inlined into the traversal kernel.
pub fn compile_stage(
  pipeline: &RayTracingPipeline,
  stage_index: u32,
  options: &CompileOptions,
) -> Result<CompiledKernel, RtCompileError> {
  pipeline.validate()?;
  let stage = pipeline.stage(stage_index)?;
  if matches!(stage.stage, RtStage::AnyHit | RtStage::Intersection) {
    return Err(RtCompileError::NotStandalone(stage.stage));
  }
  let ctx = RtCompileCtx { pipeline, options };
  finish(stage.function.clone(), &ctx, false, false)
}

/// Compile the continuation of a shader after one of its calls returns. Unlike the entry
/// kernel of a raygen shader the continuation only runs for the invocations selected by the
/// scheduler.
pub fn compile_resume_shader(
  pipeline: &RayTracingPipeline,
  function: ShaderFunction,
  options: &CompileOptions,
) -> Result<CompiledKernel, RtCompileError> {
  if matches!(function.stage, RtStage::AnyHit | RtStage::Intersection) {
    return Err(RtCompileError::NotStandalone(function.stage));
  }
  let ctx = RtCompileCtx { pipeline, options };
  finish(function, &ctx, true, false)
}

/// Compile the whole pipeline into the single kernel of raygen stage `raygen_index`: every
/// trace ray runs the traversal in place with closest hit and miss shaders inlined.
pub fn compile_monolithic(
  pipeline: &RayTracingPipeline,
  raygen_index: u32,
  options: &CompileOptions,
) -> Result<CompiledKernel, RtCompileError> {
  pipeline.validate()?;
  let stage = pipeline.stage(raygen_index)?;
  if stage.stage != RtStage::RayGen {
    return Err(RtCompileError::NotStandalone(stage.stage));
  }
  let ctx = RtCompileCtx { pipeline, options };
  finish(stage.function.clone(), &ctx, false, true)
}

/// Build the traversal kernel of `pipeline`, with all of its any hit and intersection shaders
/// inlined.
pub fn build_traversal_shader(
  pipeline: &RayTracingPipeline,
  options: &CompileOptions,
) -> Result<CompiledKernel, RtCompileError> {
  pipeline.validate()?;
  let ctx = RtCompileCtx { pipeline, options };
  let function = build_traversal_function(&ctx)?;
  finish(function, &ctx, false, false)
}
