//! Show-space geometry: placements, beam directions, and pan/tilt calibration.
//!
//! Show space is right-handed with `y` up. A head's beam with zero pan and
//! zero tilt points along local `+z`; pan rotates about local `y`, tilt about
//! local `x`.
use std::f64::consts::PI;

use anyhow::{Result, ensure};
use glam::{DMat3, DVec3};
use serde::{Deserialize, Serialize};

/// Beam axis of a head at zero pan and tilt, in head-local space.
pub const FORWARD: DVec3 = DVec3::Z;

/// Straight down in show space; the neutral direction fades swing toward.
pub const DOWN: DVec3 = DVec3::NEG_Y;

/// Position and orientation of a fixture or head in show space.
#[derive(Clone, Copy, Debug)]
pub struct Placement {
    pub position: DVec3,
    pub rotation: DMat3,
}

impl Default for Placement {
    fn default() -> Self {
        Self {
            position: DVec3::ZERO,
            rotation: DMat3::IDENTITY,
        }
    }
}

impl Placement {
    pub fn new(position: DVec3, rotation: DMat3) -> Self {
        Self { position, rotation }
    }

    /// Compose a child placement expressed relative to this one.
    pub fn child(&self, local: &Placement) -> Placement {
        Placement {
            position: self.position + self.rotation * local.position,
            rotation: self.rotation * local.rotation,
        }
    }
}

/// Mapping between pan/tilt angles and DMX channel values for one head.
///
/// `pan_center`/`tilt_center` are the DMX values at which the head faces its
/// zero orientation; the half-circle factors are DMX counts per half turn and
/// may be negative for mechanically reversed axes.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PanTiltCalibration {
    pub pan_center: f64,
    pub pan_half_circle: f64,
    pub tilt_center: f64,
    pub tilt_half_circle: f64,
}

impl PanTiltCalibration {
    /// Convert pan/tilt angles (radians) to DMX channel values.
    ///
    /// Angles beyond the head's physical range clamp to the nearest reachable
    /// position; the boolean reports whether any clamping occurred.
    pub fn angles_to_dmx(&self, pan: f64, tilt: f64) -> ((f64, f64), bool) {
        let pan_raw = self.pan_center + pan * self.pan_half_circle / PI;
        let tilt_raw = self.tilt_center + tilt * self.tilt_half_circle / PI;
        let pan_dmx = pan_raw.clamp(0.0, 255.0);
        let tilt_dmx = tilt_raw.clamp(0.0, 255.0);
        ((pan_dmx, tilt_dmx), pan_dmx != pan_raw || tilt_dmx != tilt_raw)
    }

    /// Convert DMX channel values back to pan/tilt angles (radians).
    pub fn dmx_to_angles(&self, pan: f64, tilt: f64) -> (f64, f64) {
        (
            PI * (pan - self.pan_center) / self.pan_half_circle,
            PI * (tilt - self.tilt_center) / self.tilt_half_circle,
        )
    }
}

/// Beam direction in head-local space for the given pan/tilt angles.
pub fn pan_tilt_to_local(pan: f64, tilt: f64) -> DVec3 {
    DMat3::from_rotation_y(pan) * DMat3::from_rotation_x(tilt) * FORWARD
}

/// Wrap an angle into (-π, π].
fn wrap_angle(a: f64) -> f64 {
    let mut a = (a + PI).rem_euclid(2.0 * PI) - PI;
    if a == -PI {
        a = PI;
    }
    a
}

/// The two pan/tilt angle families whose beam lies along `local`.
///
/// `local` must be non-zero; it is normalized internally.
pub fn local_to_pan_tilt(local: DVec3) -> [(f64, f64); 2] {
    let v = local.normalize();
    let tilt = (-v.y).asin();
    let pan = if v.x == 0.0 && v.z == 0.0 {
        0.0
    } else {
        v.x.atan2(v.z)
    };
    [(pan, tilt), (wrap_angle(pan + PI), PI - tilt)]
}

/// Find the DMX pan/tilt values that bring the head's beam closest to a
/// world-space direction.
///
/// Both solution families are tried; whichever lands nearest in angular
/// distance after calibration clamping wins, so unreachable orientations
/// degrade to the closest reachable one.
pub fn direction_to_pan_tilt(
    cal: &PanTiltCalibration,
    rotation: &DMat3,
    dir: DVec3,
) -> Result<((f64, f64), bool)> {
    ensure!(
        dir.length_squared() > 1e-12,
        "cannot aim a head along a zero-length direction"
    );
    let local = rotation.transpose() * dir.normalize();

    let mut best: Option<((f64, f64), bool, f64)> = None;
    for (pan, tilt) in local_to_pan_tilt(local) {
        let (dmx, clamped) = cal.angles_to_dmx(pan, tilt);
        let (apan, atilt) = cal.dmx_to_angles(dmx.0, dmx.1);
        let achieved = pan_tilt_to_local(apan, atilt);
        let err = achieved.angle_between(local);
        if best.is_none_or(|(_, _, e)| err < e) {
            best = Some((dmx, clamped, err));
        }
    }
    let (dmx, clamped, _) = best.unwrap();
    Ok((dmx, clamped))
}

/// Spherical linear interpolation between unit vectors.
///
/// `f` outside [0, 1] is clamped. Antiparallel endpoints rotate through an
/// arbitrary perpendicular axis.
pub fn slerp(a: DVec3, b: DVec3, f: f64) -> DVec3 {
    let f = f.clamp(0.0, 1.0);
    let a = a.normalize();
    let b = b.normalize();
    let dot = a.dot(b).clamp(-1.0, 1.0);
    if dot > 1.0 - 1e-9 {
        return a.lerp(b, f).normalize();
    }
    if dot < -1.0 + 1e-9 {
        let axis = a.any_orthonormal_vector();
        return DMat3::from_axis_angle(axis, PI * f) * a;
    }
    let theta = dot.acos();
    let sin_theta = theta.sin();
    (a * ((1.0 - f) * theta).sin() + b * (f * theta).sin()) / sin_theta
}

#[cfg(test)]
mod test {
    use super::*;

    const CAL: PanTiltCalibration = PanTiltCalibration {
        pan_center: 84.0,
        pan_half_circle: 84.0,
        tilt_center: 8.0,
        tilt_half_circle: -214.0,
    };

    #[test]
    fn test_zero_angles_map_to_centers() {
        let ((pan, tilt), clamped) = CAL.angles_to_dmx(0.0, 0.0);
        assert_eq!(84.0, pan);
        assert_eq!(8.0, tilt);
        assert!(!clamped);
    }

    #[test]
    fn test_calibration_round_trip() {
        let ((pan, tilt), clamped) = CAL.angles_to_dmx(PI / 2.0, -0.2);
        assert!(!clamped);
        let (p, t) = CAL.dmx_to_angles(pan, tilt);
        assert!((p - PI / 2.0).abs() < 1e-9);
        assert!((t + 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_out_of_range_clamps() {
        // Pan of 3π wants DMX 84 + 3*84 = 336, beyond the byte range.
        let ((pan, _), clamped) = CAL.angles_to_dmx(3.0 * PI, 0.0);
        assert_eq!(255.0, pan);
        assert!(clamped);
    }

    #[test]
    fn test_local_direction_round_trip() {
        for (pan, tilt) in [(0.0, 0.0), (1.0, 0.5), (-2.0, 1.2), (0.3, -0.9)] {
            let dir = pan_tilt_to_local(pan, tilt);
            let solutions = local_to_pan_tilt(dir);
            let hit = solutions.iter().any(|&(p, t)| {
                pan_tilt_to_local(p, t).angle_between(dir) < 1e-9
            });
            assert!(hit, "no solution recovers ({pan}, {tilt})");
        }
    }

    #[test]
    fn test_direction_to_pan_tilt_prefers_reachable() {
        // With an identity head rotation, the forward axis should come out
        // at the calibration centers.
        let ((pan, tilt), clamped) =
            direction_to_pan_tilt(&CAL, &DMat3::IDENTITY, FORWARD).unwrap();
        assert!((pan - 84.0).abs() < 1e-6);
        assert!((tilt - 8.0).abs() < 1e-6);
        assert!(!clamped);
    }

    #[test]
    fn test_zero_direction_rejected() {
        assert!(direction_to_pan_tilt(&CAL, &DMat3::IDENTITY, DVec3::ZERO).is_err());
    }

    #[test]
    fn test_slerp_endpoints_and_midpoint() {
        let a = DVec3::X;
        let b = DVec3::Y;
        assert!((slerp(a, b, 0.0) - a).length() < 1e-9);
        assert!((slerp(a, b, 1.0) - b).length() < 1e-9);
        let mid = slerp(a, b, 0.5);
        assert!((mid.length() - 1.0).abs() < 1e-9);
        // Midpoint lies on the great circle, equidistant from both ends.
        assert!((mid.angle_between(a) - PI / 4.0).abs() < 1e-9);
        assert!((mid.angle_between(b) - PI / 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_slerp_antiparallel() {
        let a = DVec3::X;
        let mid = slerp(a, -a, 0.5);
        assert!((mid.length() - 1.0).abs() < 1e-9);
        assert!(mid.dot(a).abs() < 1e-9);
    }
}
