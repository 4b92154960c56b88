use super::*;
use crate::*;

const HISTORY_BUFFER: u64 = 0x80_0000;
const HEADER_SIZE: u32 = std::mem::size_of::<RayHistoryHeader>() as u32;

/// Four invocations one unit apart along x, only the first one hits. With a resolution scale
/// of 2 invocations 0 and 2 are recorded.
fn run_recorded(header_offset: u32, buffer_size: u32) -> (GlobalMemory, TestRay) {
  let ray = TestRay::down_from([0.2, 0.2, 10.]);
  let mut pipeline = RayTracingPipeline::new(PipelineCreateFlags::empty());
  let raygen = pipeline.add_stage(raygen_shader(ray, 16, 1., true));
  let miss = pipeline.add_stage(miss_shader(false));
  let closest_hit = pipeline.add_stage(closest_hit_shader(false));
  let any_hit = pipeline.add_stage(any_hit_shader(AnyHitBehavior::Accept));
  pipeline.add_group(ShaderGroupKind::General {
    general: Some(raygen),
  });
  let miss_group = pipeline.add_group(ShaderGroupKind::General { general: Some(miss) });
  let hit_group = pipeline.add_group(ShaderGroupKind::TrianglesHit {
    closest_hit: Some(closest_hit),
    any_hit: Some(any_hit),
  });

  let mut memory = GlobalMemory::new();
  write_accel_struct(&mut memory, &Bvh::Node(vec![Bvh::triangle_at(1., 5, 0)]));
  write_sbt(
    &mut memory,
    &pipeline,
    &SbtSetup {
      miss: vec![Some(miss_group)],
      hit: vec![Some(hit_group)],
      ..Default::default()
    },
  );
  memory.write(
    HISTORY_BUFFER,
    &RayHistoryHeader {
      offset: header_offset,
      dispatch_index: 3,
      submit_base_index: 1,
      reserved: 0,
    },
  );

  let options = options_for(64).with_ray_history(RayHistoryConfig {
    buffer_address: HISTORY_BUFFER,
    buffer_size,
    resolution_scale: 2,
  });
  let kernel = compile_monolithic(&pipeline, raygen, &options).unwrap();
  let mut wave = new_wave(64, 4);
  run_monolithic(&kernel, &mut wave, &mut memory);
  (memory, ray)
}

fn header(memory: &GlobalMemory) -> RayHistoryHeader {
  memory.read(HISTORY_BUFFER)
}

fn token_at(memory: &GlobalMemory, offset: u32) -> EndTraceToken {
  memory.read(HISTORY_BUFFER + offset as u64)
}

#[test]
fn sampled_invocations_append_end_trace_tokens() {
  let (memory, ray) = run_recorded(HEADER_SIZE, 4096);
  assert_eq!(
    header(&memory).offset,
    HEADER_SIZE + END_TRACE_TOKEN_SIZE + END_TRACE_MISS_TOKEN_SIZE
  );

  let hit = token_at(&memory, HEADER_SIZE);
  assert_eq!(hit.header, TOKEN_HIT_BIT);
  let accel = ACCEL_STRUCT.to_le_bytes();
  assert_eq!(
    hit.accel_struct,
    [
      u32::from_le_bytes([accel[0], accel[1], accel[2], accel[3]]),
      u32::from_le_bytes([accel[4], accel[5], accel[6], accel[7]]),
    ]
  );
  assert_eq!(hit.dispatch_and_flags, (3 + 1) << 16);
  assert_eq!(hit.packed_args, 0xFF << 24 | 1 << 4);
  assert_eq!(hit.origin, [0.2, 0.2, 10.]);
  assert_eq!(hit.tmin, 0.);
  assert_eq!(hit.direction, ray.direction);
  assert_eq!(hit.tmax, 1000.);
  assert!(hit.iteration_instance_count > 0);
  assert_eq!(hit.ahit_isec_count, 1);
  assert_eq!(hit.primitive_id, 5);
  assert_eq!(hit.geometry_id, 0);

  let vertices = [[0., 0., 1.], [1., 0., 1.], [0., 1., 1.]];
  let (t, _, _, clockwise) = ray_triangle_intersect_cpu(vertices, ray.origin, ray.direction, 0., 1000.).unwrap();
  let hit_kind: u32 = if triangle_front_face_cpu(InstanceFlags::empty(), clockwise) {
    0xFE
  } else {
    0xFF
  };
  assert_eq!(hit.instance_id_and_hit_kind, hit_kind << 24);
  assert_eq!(hit.hit_tmax, t);

  // invocation 2 lands on index 1 of the downscaled grid
  let miss = token_at(&memory, HEADER_SIZE + END_TRACE_TOKEN_SIZE);
  assert_eq!(miss.header, 1);
  assert_eq!(miss.origin, [0.2 + 2., 0.2, 10.]);
  assert_eq!(miss.ahit_isec_count, 0);
  assert_eq!(miss.tmax, 1000.);
  // the hit fields are left out of miss tokens
  assert_eq!(miss.primitive_id, 0);
  assert_eq!(miss.hit_tmax, 0.);
}

#[test]
fn tokens_past_the_end_of_the_buffer_are_dropped() {
  let buffer_size = HEADER_SIZE + END_TRACE_TOKEN_SIZE + END_TRACE_MISS_TOKEN_SIZE - 1;
  let (memory, _) = run_recorded(HEADER_SIZE, buffer_size);

  // the offset keeps counting so the reader can tell how much was lost
  assert_eq!(
    header(&memory).offset,
    HEADER_SIZE + END_TRACE_TOKEN_SIZE + END_TRACE_MISS_TOKEN_SIZE
  );
  assert_eq!(token_at(&memory, HEADER_SIZE).header, TOKEN_HIT_BIT);
  assert_eq!(token_at(&memory, HEADER_SIZE + END_TRACE_TOKEN_SIZE), EndTraceToken::default());
}

#[test]
fn odd_offset_disables_recording() {
  let (memory, _) = run_recorded(HEADER_SIZE + 1, 4096);
  assert_eq!(
    header(&memory).offset,
    HEADER_SIZE + 1 + END_TRACE_TOKEN_SIZE + END_TRACE_MISS_TOKEN_SIZE
  );

  let mut written = vec![0u8; 512];
  memory.read_bytes(HISTORY_BUFFER + HEADER_SIZE as u64, &mut written);
  assert!(written.iter().all(|byte| *byte == 0));
}

#[test]
fn recording_is_off_by_default() {
  let options = CompileOptions::default();
  assert!(options.ray_history.is_none());
  assert_eq!(RayHistoryConfig::default().resolution_scale, 1);

  let ray = TestRay::down_from([0.2, 0.2, 10.]);
  let mut pipeline = RayTracingPipeline::new(PipelineCreateFlags::empty());
  let raygen = pipeline.add_stage(raygen_shader(ray, 16, 0., true));
  let kernel = compile_monolithic(&pipeline, raygen, &options).unwrap();
  let mut memory = GlobalMemory::new();
  let mut wave = new_wave(64, 2);
  run_monolithic(&kernel, &mut wave, &mut memory);
  assert_eq!(header(&memory), RayHistoryHeader::default());
}
