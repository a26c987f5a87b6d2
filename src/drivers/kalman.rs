#[allow(unused_imports)]
use micromath::F32Ext;

use crate::config::FilterConfig;
use crate::drivers::filter::{bound_variance, PoseFilter};
use crate::state::FilteredPose;

// ── Constants ────────────────────────────────────────────────────────────────

/// Default process noise per state.
pub const DEFAULT_PROCESS_NOISE: f32 = 0.1;
/// Default measurement noise per axis.
pub const DEFAULT_MEASUREMENT_NOISE: f32 = 0.5;
/// Step used when the caller gives no usable time delta (s).
pub const DEFAULT_DT: f32 = 0.05;

// ── Helper matrix functions (6×6 flat arrays) ────────────────────────────────

const N: usize = 6;
type Mat = [f32; N * N];

#[inline]
fn mat_zero() -> Mat {
    [0.0f32; N * N]
}

#[inline]
fn mat_identity() -> Mat {
    let mut m = mat_zero();
    for i in 0..N {
        m[i * N + i] = 1.0;
    }
    m
}

/// m[r][c]
#[inline]
fn m(mat: &Mat, r: usize, c: usize) -> f32 {
    mat[r * N + c]
}

#[inline]
fn mset(mat: &mut Mat, r: usize, c: usize, v: f32) {
    mat[r * N + c] = v;
}

fn mat_mul(a: &Mat, b: &Mat) -> Mat {
    let mut c = mat_zero();
    for i in 0..N {
        for j in 0..N {
            let mut s = 0.0f32;
            for k in 0..N {
                s += m(a, i, k) * m(b, k, j);
            }
            mset(&mut c, i, j, s);
        }
    }
    c
}

/// C = A * B^T
fn mat_mul_t(a: &Mat, b: &Mat) -> Mat {
    let mut c = mat_zero();
    for i in 0..N {
        for j in 0..N {
            let mut s = 0.0f32;
            for k in 0..N {
                s += m(a, i, k) * m(b, j, k);
            }
            mset(&mut c, i, j, s);
        }
    }
    c
}

/// Constant-velocity transition for a step of `dt`.
fn transition(dt: f32) -> Mat {
    let mut f = mat_identity();
    for i in 0..3 {
        mset(&mut f, i, i + 3, dt);
    }
    f
}

// ── Filter ───────────────────────────────────────────────────────────────────

/// Six-state constant-velocity Kalman filter over `[x, y, z, vx, vy, vz]`
/// with position-only measurements.
pub struct KalmanFilter3D {
    x: [f32; N],
    p: Mat,
    process_noise: f32,
    measurement_noise: f32,
    nominal_dt: f32,
    last_timestamp: f32,
    initialized: bool,
}

impl Default for KalmanFilter3D {
    fn default() -> Self {
        Self::new(DEFAULT_PROCESS_NOISE, DEFAULT_MEASUREMENT_NOISE, DEFAULT_DT)
    }
}

impl KalmanFilter3D {
    pub fn new(process_noise: f32, measurement_noise: f32, nominal_dt: f32) -> Self {
        Self {
            x: [0.0; N],
            p: mat_identity(),
            process_noise,
            measurement_noise,
            nominal_dt,
            last_timestamp: 0.0,
            initialized: false,
        }
    }

    pub fn from_config(config: &FilterConfig) -> Self {
        Self::new(config.process_noise, config.measurement_noise, config.nominal_dt)
    }

    /// Runs one cycle with an explicit step. `dt` applies to this call only;
    /// `None` (or a non-positive, non-finite value) uses the nominal step.
    pub fn update_with_dt(
        &mut self,
        measurement: [f32; 3],
        dt: Option<f32>,
        timestamp: f32,
    ) -> FilteredPose {
        if !measurement.iter().all(|v| v.is_finite()) {
            // Skip the whole cycle; prediction without a sample would still
            // move the estimate.
            return self.output(timestamp);
        }

        if !self.initialized {
            self.x = [measurement[0], measurement[1], measurement[2], 0.0, 0.0, 0.0];
            self.p = mat_identity();
            self.last_timestamp = timestamp;
            self.initialized = true;
            return self.output(timestamp);
        }

        let dt = match dt {
            Some(dt) if dt > 0.0 && dt.is_finite() => dt,
            _ => self.nominal_dt,
        };
        self.predict(dt);
        self.correct(&measurement);
        self.last_timestamp = timestamp;
        self.output(timestamp)
    }

    // ── Predict step ─────────────────────────────────────────────────────────

    fn predict(&mut self, dt: f32) {
        let f = transition(dt);
        let mut x = [0.0f32; N];
        for (i, xi) in x.iter_mut().enumerate() {
            for j in 0..N {
                *xi += m(&f, i, j) * self.x[j];
            }
        }
        self.x = x;

        // P = F P F^T + Q
        let mut p = mat_mul_t(&mat_mul(&f, &self.p), &f);
        for i in 0..N {
            p[i * N + i] += self.process_noise;
        }
        self.p = p;
    }

    // ── Update step (position) ───────────────────────────────────────────────

    fn correct(&mut self, z: &[f32; 3]) {
        // S = H P H^T + R, which is the upper-left 3×3 block of P plus R.
        let mut s = [0.0f32; 9];
        for r in 0..3 {
            for c in 0..3 {
                s[r * 3 + c] = m(&self.p, r, c);
            }
            s[r * 3 + r] += self.measurement_noise;
        }
        let s_inv = match mat3_invert(&s) {
            Some(inv) => inv,
            None => return,
        };

        // K = P H^T S^-1 (6×3)
        let mut k = [[0.0f32; 3]; N];
        for (i, row) in k.iter_mut().enumerate() {
            for c in 0..3 {
                let mut acc = 0.0f32;
                for j in 0..3 {
                    acc += m(&self.p, i, j) * s_inv[j * 3 + c];
                }
                row[c] = acc;
            }
        }

        let y = [z[0] - self.x[0], z[1] - self.x[1], z[2] - self.x[2]];
        for (i, row) in k.iter().enumerate() {
            self.x[i] += row[0] * y[0] + row[1] * y[1] + row[2] * y[2];
        }

        // P = (I - K H) P = P - K * P[0..3, :]
        let mut p = self.p;
        for (i, row) in k.iter().enumerate() {
            for c in 0..N {
                let mut acc = 0.0f32;
                for j in 0..3 {
                    acc += row[j] * m(&self.p, j, c);
                }
                p[i * N + c] -= acc;
            }
        }
        self.p = p;
    }

    pub fn position(&self) -> [f32; 3] {
        [self.x[0], self.x[1], self.x[2]]
    }

    pub fn velocity(&self) -> [f32; 3] {
        [self.x[3], self.x[4], self.x[5]]
    }

    fn output(&self, timestamp: f32) -> FilteredPose {
        FilteredPose {
            position: self.position(),
            variance: [
                bound_variance(m(&self.p, 0, 0)),
                bound_variance(m(&self.p, 1, 1)),
                bound_variance(m(&self.p, 2, 2)),
            ],
            velocity: self.velocity(),
            is_valid: self.initialized,
            timestamp,
        }
    }
}

impl PoseFilter for KalmanFilter3D {
    /// Measurement noise comes from the filter configuration; the per-sample
    /// variance is not used. The step is the timestamp delta when positive.
    fn update(
        &mut self,
        measurement: [f32; 3],
        _measurement_variance: [f32; 3],
        timestamp: f32,
    ) -> FilteredPose {
        let dt = timestamp - self.last_timestamp;
        self.update_with_dt(measurement, Some(dt), timestamp)
    }

    fn reset(&mut self) {
        self.x = [0.0; N];
        self.p = mat_identity();
        self.last_timestamp = 0.0;
        self.initialized = false;
    }

    fn is_initialized(&self) -> bool {
        self.initialized
    }
}

// ── 3×3 matrix inversion ─────────────────────────────────────────────────────

fn mat3_invert(m: &[f32; 9]) -> Option<[f32; 9]> {
    let det = m[0]*(m[4]*m[8]-m[5]*m[7])
             -m[1]*(m[3]*m[8]-m[5]*m[6])
             +m[2]*(m[3]*m[7]-m[4]*m[6]);
    if det.abs() < 1e-10 || !det.is_finite() {
        return None;
    }
    let inv_det = 1.0 / det;
    Some([
         (m[4]*m[8]-m[5]*m[7])*inv_det, -(m[1]*m[8]-m[2]*m[7])*inv_det,  (m[1]*m[5]-m[2]*m[4])*inv_det,
        -(m[3]*m[8]-m[5]*m[6])*inv_det,  (m[0]*m[8]-m[2]*m[6])*inv_det, -(m[0]*m[5]-m[2]*m[3])*inv_det,
         (m[3]*m[7]-m[4]*m[6])*inv_det, -(m[0]*m[7]-m[1]*m[6])*inv_det,  (m[0]*m[4]-m[1]*m[3])*inv_det,
    ])
}
