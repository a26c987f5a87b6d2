//! Frame conventions and conversions.
//!
//! Body frame is NED-aligned to the airframe: x forward, y right, z down.
//! Camera measurements arrive in the camera optical frame and are moved into
//! the body frame with the mounting extrinsics before anything else sees
//! them.

#[allow(unused_imports)]
use micromath::F32Ext;

use crate::state::LandingTargetFields;

/// Planar distance below which a LANDING_TARGET angle is reported as zero.
const MIN_ANGLE_DISTANCE: f32 = 1e-6;

type Mat3 = [[f32; 3]; 3];

const IDENTITY: Mat3 = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];

#[inline]
fn mat3_vec(r: &Mat3, v: &[f32; 3]) -> [f32; 3] {
    [
        r[0][0] * v[0] + r[0][1] * v[1] + r[0][2] * v[2],
        r[1][0] * v[0] + r[1][1] * v[1] + r[1][2] * v[2],
        r[2][0] * v[0] + r[2][1] * v[1] + r[2][2] * v[2],
    ]
}

fn mat3_mul(a: &Mat3, b: &Mat3) -> Mat3 {
    let mut c = [[0.0f32; 3]; 3];
    for i in 0..3 {
        for j in 0..3 {
            c[i][j] = a[i][0] * b[0][j] + a[i][1] * b[1][j] + a[i][2] * b[2][j];
        }
    }
    c
}

fn mat3_transpose(a: &Mat3) -> Mat3 {
    let mut t = [[0.0f32; 3]; 3];
    for i in 0..3 {
        for j in 0..3 {
            t[j][i] = a[i][j];
        }
    }
    t
}

// ── Extrinsics ───────────────────────────────────────────────────────────────

/// Rigid transform from the camera frame into the body frame:
/// `p_body = r * p_cam + t`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CameraExtrinsics {
    pub r: Mat3,
    /// Camera position in the body frame (m).
    pub t: [f32; 3],
}

impl Default for CameraExtrinsics {
    fn default() -> Self {
        Self::identity()
    }
}

impl CameraExtrinsics {
    pub const fn identity() -> Self {
        Self { r: IDENTITY, t: [0.0; 3] }
    }

    /// Nadir camera at the body origin.
    pub const fn downward_facing() -> Self {
        Self {
            r: [[0.0, 1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, -1.0]],
            t: [0.0; 3],
        }
    }

    pub fn transform_point(&self, p: [f32; 3]) -> [f32; 3] {
        let rp = mat3_vec(&self.r, &p);
        [rp[0] + self.t[0], rp[1] + self.t[1], rp[2] + self.t[2]]
    }

    /// Body-to-camera transform. `r` must be a rotation.
    pub fn inverse(&self) -> Self {
        let r = mat3_transpose(&self.r);
        let t = mat3_vec(&r, &self.t);
        Self { r, t: [-t[0], -t[1], -t[2]] }
    }

    /// `self ∘ other`: applies `other` first.
    pub fn compose(&self, other: &Self) -> Self {
        Self {
            r: mat3_mul(&self.r, &other.r),
            t: self.transform_point(other.t),
        }
    }
}

// ── Conversions ──────────────────────────────────────────────────────────────

pub fn cam_to_body(p_cam: [f32; 3], extrinsics: &CameraExtrinsics) -> [f32; 3] {
    extrinsics.transform_point(p_cam)
}

/// LANDING_TARGET fields for a body-frame (BODY_NED) target position.
pub fn body_to_mavlink_fields(p_body: [f32; 3]) -> LandingTargetFields {
    let [x, y, z] = p_body;

    let angle_x = if x.hypot(z) > MIN_ANGLE_DISTANCE { x.atan2(z) } else { 0.0 };
    let angle_y = if y.hypot(z) > MIN_ANGLE_DISTANCE { y.atan2(z) } else { 0.0 };

    LandingTargetFields {
        x,
        y,
        z,
        angle_x,
        angle_y,
        position_valid: true,
    }
}

/// Angular offsets straight from a camera-frame translation, for setups
/// that forward angles without a body-frame position.
pub fn camera_angles(tvec: [f32; 3]) -> (f32, f32) {
    (tvec[0].atan2(tvec[2]), tvec[1].atan2(tvec[2]))
}

/// Rotates a local-NED vector into the heading-aligned body frame.
pub fn ned_to_body_ned(p_ned: [f32; 3], yaw_rad: f32) -> [f32; 3] {
    let (s, c) = (yaw_rad.sin(), yaw_rad.cos());
    [
        c * p_ned[0] + s * p_ned[1],
        -s * p_ned[0] + c * p_ned[1],
        p_ned[2],
    ]
}
