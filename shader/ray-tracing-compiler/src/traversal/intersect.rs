use crate::*;

fn component(b: &mut FunctionBuilder, v: NodeHandle, op: BinaryOperator) -> NodeHandle {
  let x = b.extract(v, 0);
  let y = b.extract(v, 1);
  let z = b.extract(v, 2);
  let xy = b.binary(op, x, y);
  b.binary(op, xy, z)
}

/// Slab test of the ray against `[min, max]`, clipped to the open ray interval.
///
/// `inv_dir` may hold infinities for axis aligned rays.
pub fn ray_aabb_intersect(
  b: &mut FunctionBuilder,
  min: NodeHandle,
  max: NodeHandle,
  origin: NodeHandle,
  inv_dir: NodeHandle,
  tmin: NodeHandle,
  tmax: NodeHandle,
) -> NodeHandle {
  let to_min = b.sub(min, origin);
  let t0 = b.mul(to_min, inv_dir);
  let to_max = b.sub(max, origin);
  let t1 = b.mul(to_max, inv_dir);

  let near = b.min(t0, t1);
  let far = b.max(t0, t1);
  let t_near_max = component(b, near, BinaryOperator::Max);
  let t_far_min = component(b, far, BinaryOperator::Min);

  let overlap = b.less_equal_than(t_near_max, t_far_min);
  let after_min = b.less_than(tmin, t_far_min);
  let before_max = b.less_than(t_near_max, tmax);
  let hit = b.and(overlap, after_min);
  b.and(hit, before_max)
}

pub struct TriangleHit {
  pub hit: NodeHandle,
  pub t: NodeHandle,
  pub u: NodeHandle,
  pub v: NodeHandle,
  /// vertices appear clockwise from the ray origin
  pub clockwise: NodeHandle,
}

/// Möller-Trumbore against the triangle `v0 v1 v2`, accepting `tmin <= t < tmax`.
pub fn ray_triangle_intersect(
  b: &mut FunctionBuilder,
  vertices: [NodeHandle; 3],
  origin: NodeHandle,
  dir: NodeHandle,
  tmin: NodeHandle,
  tmax: NodeHandle,
) -> TriangleHit {
  let [v0, v1, v2] = vertices;
  let e1 = b.sub(v1, v0);
  let e2 = b.sub(v2, v0);
  let p = b.cross(dir, e2);
  let det = b.dot(e1, p);

  let s = b.sub(origin, v0);
  let q = b.cross(s, e1);
  let u = b.dot(s, p);
  let u = b.div(u, det);
  let v = b.dot(dir, q);
  let v = b.div(v, det);
  let t = b.dot(e2, q);
  let t = b.div(t, det);

  let zero = b.imm_f32(0.);
  let one = b.imm_f32(1.);
  let uv = b.add(u, v);

  let non_degenerate = b.not_equals(det, zero);
  let u_in = b.greater_equal_than(u, zero);
  let v_in = b.greater_equal_than(v, zero);
  let uv_in = b.less_equal_than(uv, one);
  let after_min = b.greater_equal_than(t, tmin);
  let before_max = b.less_than(t, tmax);

  let mut hit = non_degenerate;
  for condition in [u_in, v_in, uv_in, after_min, before_max] {
    hit = b.and(hit, condition);
  }

  let clockwise = b.less_than(det, zero);
  TriangleHit {
    hit,
    t,
    u,
    v,
    clockwise,
  }
}

/// the same test on the cpu, `(t, u, v, clockwise)` on hit
pub fn ray_triangle_intersect_cpu(
  vertices: [[f32; 3]; 3],
  origin: [f32; 3],
  dir: [f32; 3],
  tmin: f32,
  tmax: f32,
) -> Option<(f32, f32, f32, bool)> {
  let sub = |a: [f32; 3], b: [f32; 3]| [a[0] - b[0], a[1] - b[1], a[2] - b[2]];
  let dot = |a: [f32; 3], b: [f32; 3]| a[0] * b[0] + a[1] * b[1] + a[2] * b[2];
  let cross = |a: [f32; 3], b: [f32; 3]| {
    [
      a[1] * b[2] - a[2] * b[1],
      a[2] * b[0] - a[0] * b[2],
      a[0] * b[1] - a[1] * b[0],
    ]
  };

  let [v0, v1, v2] = vertices;
  let e1 = sub(v1, v0);
  let e2 = sub(v2, v0);
  let p = cross(dir, e2);
  let det = dot(e1, p);
  if det == 0. {
    return None;
  }
  let s = sub(origin, v0);
  let q = cross(s, e1);
  let u = dot(s, p) / det;
  let v = dot(dir, q) / det;
  let t = dot(e2, q) / det;

  (u >= 0. && v >= 0. && u + v <= 1. && t >= tmin && t < tmax).then_some((t, u, v, det < 0.))
}
