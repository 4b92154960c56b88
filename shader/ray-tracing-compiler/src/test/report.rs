use super::*;
use crate::*;

const REPORT_TMAX_SLOT: u32 = 8;
const REPORT_KIND_SLOT: u32 = 9;
const REPORT_TERMINATED_SLOT: u32 = 10;

/// An intersection kernel starting from tmin 0 and tmax 10 that issues `reports` in order.
/// Arg `i` holds whether report `i` was accepted, the final state follows after the reports.
fn report_kernel(ray_flags: RayFlags, reports: &[(f32, u32)]) -> ShaderFunction {
  let mut function = ShaderFunction::new("reports", RtStage::Intersection);
  let mut vars = {
    let mut b = function.builder();
    let vars = RayStateVars::new(&mut b, PipelineCreateFlags::empty(), false);

    let tmin = b.imm_f32(0.);
    b.store(vars.tmin, tmin);
    let tmax = b.imm_f32(10.);
    b.store(vars.tmax, tmax);
    let no = b.imm_bool(false);
    b.store(vars.terminated, no);
    b.store(vars.ahit_accept, no);
    b.store(vars.ahit_terminate, no);
    let kind = b.imm_u32(0);
    b.store(vars.hit_kind, kind);
    let flags = b.imm_u32(0xFF << 24 | ray_flags.bits());
    b.store(vars.cull_mask_and_flags, flags);

    let one = b.imm_u32(1);
    let zero = b.imm_u32(0);
    for (i, (t, kind)) in reports.iter().enumerate() {
      let t = b.imm_f32(*t);
      let kind = b.imm_u32(*kind);
      let accepted = b.intrinsic(RtIntrinsic::ReportIntersection, &[t, kind]);
      let accepted = b.select(accepted, one, zero);
      b.store_arg(i as u32, accepted);
    }
    vars
  };

  lower_rt_instructions(&mut function, &mut vars, false, &mut RtShaderInfo::default()).unwrap();
  assert!(!function.uses_intrinsic(|i| i == RtIntrinsic::ReportIntersection));

  {
    let mut b = function.builder();
    let tmax = b.load(vars.tmax);
    b.store_arg(REPORT_TMAX_SLOT, tmax);
    let kind = b.load(vars.hit_kind);
    b.store_arg(REPORT_KIND_SLOT, kind);
    let terminated = b.load(vars.terminated);
    let one = b.imm_u32(1);
    let zero = b.imm_u32(0);
    let terminated = b.select(terminated, one, zero);
    b.store_arg(REPORT_TERMINATED_SLOT, terminated);
  }
  function
}

fn run_reports(ray_flags: RayFlags, reports: &[(f32, u32)]) -> WaveState {
  let function = report_kernel(ray_flags, reports);
  let mut wave = WaveState::new(1);
  let mut memory = GlobalMemory::new();
  execute(&function, &mut wave, &mut memory, &ExecEnv::default()).unwrap();
  wave
}

fn accepted(wave: &WaveState, report: u32) -> bool {
  wave.arg(0, report).as_u32() == Some(1)
}

#[test]
fn repeated_report_at_the_same_distance_is_accepted() {
  let wave = run_reports(RayFlags::empty(), &[(4., 7), (4., 7)]);
  assert!(accepted(&wave, 0));
  assert!(accepted(&wave, 1));
  assert_eq!(wave.arg(0, REPORT_TMAX_SLOT).as_f32(), Some(4.));
  assert_eq!(wave.arg(0, REPORT_KIND_SLOT).as_u32(), Some(7));
  assert_eq!(wave.arg(0, REPORT_TERMINATED_SLOT).as_u32(), Some(0));
}

#[test]
fn farther_report_leaves_the_hit_alone() {
  let wave = run_reports(RayFlags::empty(), &[(4., 7), (5., 9)]);
  assert!(accepted(&wave, 0));
  assert!(!accepted(&wave, 1));
  assert_eq!(wave.arg(0, REPORT_TMAX_SLOT).as_f32(), Some(4.));
  assert_eq!(wave.arg(0, REPORT_KIND_SLOT).as_u32(), Some(7));
}

#[test]
fn reports_outside_the_ray_interval_are_rejected() {
  let wave = run_reports(RayFlags::empty(), &[(-1., 1), (11., 2), (3., 3)]);
  assert!(!accepted(&wave, 0));
  assert!(!accepted(&wave, 1));
  assert!(accepted(&wave, 2));
  assert_eq!(wave.arg(0, REPORT_TMAX_SLOT).as_f32(), Some(3.));
  assert_eq!(wave.arg(0, REPORT_KIND_SLOT).as_u32(), Some(3));
}

#[test]
fn terminate_on_first_hit_closes_the_ray() {
  let wave = run_reports(RayFlags::TERMINATE_ON_FIRST_HIT, &[(6., 1), (2., 2)]);
  assert!(accepted(&wave, 0));
  assert!(!accepted(&wave, 1));
  assert_eq!(wave.arg(0, REPORT_TMAX_SLOT).as_f32(), Some(6.));
  assert_eq!(wave.arg(0, REPORT_KIND_SLOT).as_u32(), Some(1));
  assert_eq!(wave.arg(0, REPORT_TERMINATED_SLOT).as_u32(), Some(1));
}

#[test]
fn early_lowering_leaves_launch_builtins_in_place() {
  let mut function = ShaderFunction::new("launch", RtStage::ClosestHit);
  let mut vars = {
    let mut b = function.builder();
    let vars = RayStateVars::new(&mut b, PipelineCreateFlags::empty(), false);
    let id = b.intrinsic(RtIntrinsic::LaunchId, &[]);
    let x = b.extract(id, 0);
    b.store_arg(0, x);
    vars
  };
  let mut info = RtShaderInfo::default();
  lower_rt_instructions(&mut function, &mut vars, false, &mut info).unwrap();
  assert!(info.uses_launch_id);
  assert!(!info.uses_launch_size);
  assert!(function.uses_intrinsic(|i| i == RtIntrinsic::LaunchId));

  lower_rt_instructions(&mut function, &mut vars, true, &mut info).unwrap();
  assert!(!function.uses_intrinsic(|i| i == RtIntrinsic::LaunchId));
}
