use crate::*;

/// The fixed ray tracing intrinsic contract shader stages are authored against.
///
/// Operand order for the variants taking operands:
/// - `TraceRay`: accel_struct(u64), ray_flags, cull_mask, sbt_offset, sbt_stride, miss_index,
///   origin(vec3), tmin(f32), direction(vec3), tmax(f32), payload scratch offset
/// - `ExecuteCallable`: sbt index, payload scratch offset
/// - `ExecuteClosestHit`: sbt index, tmax, primitive_addr(u64), primitive_id, instance_addr(u64),
///   geometry_id_and_flags, hit_kind
/// - `ExecuteMiss`: tmax
/// - `ReportIntersection`: hit t, hit kind
/// - `StoreHitAttrib`: value(u32)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RtIntrinsic {
  TraceRay { call_idx: u32, stack_size: u32 },
  ExecuteCallable { call_idx: u32, stack_size: u32 },
  Resume { stack_size: u32 },
  Return,
  ExecuteClosestHit,
  ExecuteMiss,
  IgnoreIntersection,
  TerminateRay,
  ReportIntersection,
  LaunchId,
  LaunchSize,
  ShaderRecordPtr,
  RtArgScratchOffset,
  RayTMin,
  RayTMax,
  WorldOrigin,
  WorldDirection,
  ObjectOrigin,
  ObjectDirection,
  HitKind,
  PrimitiveId,
  GeometryIndex,
  InstanceCustomIndex,
  InstanceId,
  IncomingRayFlags,
  CullMask,
  AccelStruct,
  SbtOffset,
  SbtStride,
  CullMaskAndFlags,
  IntersectionOpaque,
  WorldToObject { column: u32 },
  ObjectToWorld { column: u32 },
  TriangleVertexPosition { vertex: u32 },
  LoadHitAttrib { slot: u32 },
  StoreHitAttrib { slot: u32 },
}

impl RtIntrinsic {
  pub fn result_type(self) -> ValueType {
    use RtIntrinsic::*;
    match self {
      TraceRay { .. }
      | ExecuteCallable { .. }
      | Resume { .. }
      | Return
      | ExecuteClosestHit
      | ExecuteMiss
      | IgnoreIntersection
      | TerminateRay
      | StoreHitAttrib { .. } => ValueType::Unit,
      ReportIntersection | IntersectionOpaque => ValueType::Bool,
      LaunchId | LaunchSize => ValueType::UVec3,
      ShaderRecordPtr | AccelStruct => ValueType::U64,
      RayTMin | RayTMax => ValueType::F32,
      WorldOrigin
      | WorldDirection
      | ObjectOrigin
      | ObjectDirection
      | WorldToObject { .. }
      | ObjectToWorld { .. }
      | TriangleVertexPosition { .. } => ValueType::Vec3,
      RtArgScratchOffset | HitKind | PrimitiveId | GeometryIndex | InstanceCustomIndex
      | InstanceId | IncomingRayFlags | CullMask | SbtOffset | SbtStride | CullMaskAndFlags
      | LoadHitAttrib { .. } => ValueType::U32,
    }
  }

  pub fn operand_count(self) -> usize {
    match self {
      RtIntrinsic::TraceRay { .. } => 11,
      RtIntrinsic::ExecuteCallable { .. } => 2,
      RtIntrinsic::ExecuteClosestHit => 7,
      RtIntrinsic::ReportIntersection => 2,
      RtIntrinsic::ExecuteMiss | RtIntrinsic::StoreHitAttrib { .. } => 1,
      _ => 0,
    }
  }
}
