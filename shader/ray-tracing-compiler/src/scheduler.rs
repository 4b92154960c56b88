use crate::*;

/// Shader addresses are at least 4 byte aligned, the low two bits carry the priority of the
/// stage an address resumes.
pub const RT_PRIORITY_MASK: u64 = 0x3;

pub const RT_PRIORITY_RAYGEN: u64 = 0;
pub const RT_PRIORITY_TRAVERSAL: u64 = 1;
pub const RT_PRIORITY_HIT_MISS: u64 = 2;
pub const RT_PRIORITY_CALLABLE: u64 = 3;

pub fn priority(stage: RtStage) -> u64 {
  match stage {
    RtStage::RayGen => RT_PRIORITY_RAYGEN,
    RtStage::Traversal => RT_PRIORITY_TRAVERSAL,
    RtStage::AnyHit | RtStage::ClosestHit | RtStage::Miss | RtStage::Intersection => RT_PRIORITY_HIT_MISS,
    RtStage::Callable => RT_PRIORITY_CALLABLE,
  }
}

/// Pick the shader the whole wave runs next.
///
/// Each invocation wants to continue at its own `shader_addr`. Work that drains the stack
/// wins: callables over hit and miss shaders over traversal over raygen, and the stage that
/// just ran never yields to a stage it can not have produced work for. Among the winning
/// priority the lowest invocation decides.
pub fn select_next_shader(
  b: &mut FunctionBuilder,
  shader_addr: NodeHandle,
  stage: RtStage,
  wave_size: u32,
) -> NodeHandle {
  let lane_mask = if wave_size >= 64 {
    u64::MAX
  } else {
    (1u64 << wave_size) - 1
  };

  let prio = b.and_imm(shader_addr, RT_PRIORITY_MASK);
  let all = b.imm_bool(true);
  let ballot = b.ballot(all);
  let mut ballot = b.and_imm(ballot, lane_mask);

  let ballot_of = |b: &mut FunctionBuilder, priority: u64| {
    let is = b.equals_imm(prio, priority);
    let ballot = b.ballot(is);
    b.and_imm(ballot, lane_mask)
  };
  let ballot_traversal = ballot_of(b, RT_PRIORITY_TRAVERSAL);
  let ballot_hit_miss = ballot_of(b, RT_PRIORITY_HIT_MISS);
  let ballot_callable = ballot_of(b, RT_PRIORITY_CALLABLE);

  let prefer = |b: &mut FunctionBuilder, ballot: &mut NodeHandle, candidate: NodeHandle| {
    let any = b.not_equals_imm(candidate, 0);
    *ballot = b.select(any, candidate, *ballot);
  };

  if stage != RtStage::Callable && stage != RtStage::Traversal {
    prefer(b, &mut ballot, ballot_traversal);
  }
  if stage != RtStage::RayGen {
    prefer(b, &mut ballot, ballot_hit_miss);
  }
  if stage != RtStage::Traversal {
    prefer(b, &mut ballot, ballot_callable);
  }

  let lsb = b.find_lsb(ballot);
  let next = b.read_invocation(shader_addr, lsb);
  b.and_imm(next, !RT_PRIORITY_MASK)
}
