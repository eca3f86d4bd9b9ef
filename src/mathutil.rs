// src/mathutil.rs
// Small planar linear algebra for the bed skew correction.

pub type Vector2f = [f32; 2];
pub type Matrix2x2f = [[f32; 2]; 2];

pub const IDENTITY: Matrix2x2f = [[1.0, 0.0], [0.0, 1.0]];

pub fn vector_add(v1: Vector2f, v2: Vector2f) -> Vector2f {
    [v1[0] + v2[0], v1[1] + v2[1]]
}

pub fn vector_sub(v1: Vector2f, v2: Vector2f) -> Vector2f {
    [v1[0] - v2[0], v1[1] - v2[1]]
}

pub fn matrix_apply(m: &Matrix2x2f, v: Vector2f) -> Vector2f {
    [m[0][0] * v[0] + m[0][1] * v[1], m[1][0] * v[0] + m[1][1] * v[1]]
}

pub fn matrix_determinant(m: &Matrix2x2f) -> f32 {
    m[0][0] * m[1][1] - m[0][1] * m[1][0]
}

/// None when the matrix is (numerically) singular.
pub fn matrix_inverse(m: &Matrix2x2f) -> Option<Matrix2x2f> {
    let det = matrix_determinant(m);
    if det.abs() < 1e-6 {
        return None;
    }
    let inv_det = 1.0 / det;
    Some([
        [m[1][1] * inv_det, -m[0][1] * inv_det],
        [-m[1][0] * inv_det, m[0][0] * inv_det],
    ])
}

/// Quadratic Lagrange interpolation through (x0,z0), (x1,z1), (x2,z2).
pub fn lagrange3(x: f32, xs: [f32; 3], zs: [f32; 3]) -> f32 {
    let [x0, x1, x2] = xs;
    zs[0] * (x - x1) * (x - x2) / ((x0 - x1) * (x0 - x2))
        + zs[1] * (x - x0) * (x - x2) / ((x1 - x0) * (x1 - x2))
        + zs[2] * (x - x0) * (x - x1) / ((x2 - x0) * (x2 - x1))
}
