use crate::astro_math::Radians;
use crate::config::MountConfig;
use crate::util::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

/// Fixed-size 3x3 rotation, the product of the two-star calibration.
#[derive(Debug, PartialEq, Copy, Clone, Serialize, Deserialize)]
pub struct Mat3(pub [[f64; 3]; 3]);

impl Mat3 {
    pub const IDENTITY: Mat3 = Mat3([[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]]);

    pub fn mul_vec(&self, v: [f64; 3]) -> [f64; 3] {
        let m = &self.0;
        [
            m[0][0] * v[0] + m[0][1] * v[1] + m[0][2] * v[2],
            m[1][0] * v[0] + m[1][1] * v[1] + m[1][2] * v[2],
            m[2][0] * v[0] + m[2][1] * v[1] + m[2][2] * v[2],
        ]
    }

    pub fn transpose(&self) -> Mat3 {
        let m = &self.0;
        let mut t = [[0.0; 3]; 3];
        for (i, row) in m.iter().enumerate() {
            for (j, val) in row.iter().enumerate() {
                t[j][i] = *val;
            }
        }
        Mat3(t)
    }
}

impl Default for Mat3 {
    fn default() -> Self {
        Mat3::IDENTITY
    }
}

/// Map an hour angle / declination pair onto encoder targets through the
/// rotation model.
pub fn apply_matrix(ha: Radians, dec: Radians, cfg: &MountConfig) -> [i64; 2] {
    let cosb = dec.cos();
    let v = [ha.cos() * cosb, ha.sin() * cosb, dec.sin()];
    let nv = cfg.coomat.mul_vec(v);

    let (x, y, z) = (nv[0], nv[1], nv[2]);
    let r = x.hypot(y);

    let mut dcmd = z.asin().to_degrees();
    let mut ramd = (x / r).acos().to_degrees();
    if y < 0.0 {
        ramd = 360.0 - ramd;
    }

    // Meridian flip into the legal range; at most two attempts.
    if ramd > cfg.rarange[1] {
        ramd -= 180.0;
        dcmd = 180.0 - dcmd;
    }
    if ramd > cfg.rarange[1] {
        info!("the dec axis is flipped");
        ramd -= 180.0;
        dcmd = 180.0 - dcmd;
    }

    dcmd -= cfg.poleoff;
    if cfg.latitude < 0.0 {
        // Model was built from inverted values south of the equator.
        if dcmd > 0.0 {
            dcmd -= 360.0;
        }
        ramd = -ramd;
        dcmd = -dcmd;
    }

    let zeropt = cfg.zeropt_or_zero();
    [
        (ramd * cfg.deg2enc[0]).round() as i64 + zeropt[0] + cfg.ptg_offset[0],
        (dcmd * cfg.deg2enc[1]).round() as i64 + zeropt[1] + cfg.ptg_offset[1],
    ]
}

/// Read a matrix file: the pole offset followed by the nine rotation
/// elements, whitespace separated, column major.
pub fn load_matrix_file(path: &Path) -> Result<(f64, Mat3), ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
        path: path.display().to_string(),
        error: e,
    })?;
    let mut values = Vec::with_capacity(10);
    for tok in text.split_whitespace() {
        let v: f64 = tok.parse().map_err(|_| ConfigError::Parse {
            path: path.display().to_string(),
            line: 0,
            message: format!("bad float {:?} in matrix file", tok),
        })?;
        values.push(v);
    }
    if values.len() != 10 {
        return Err(ConfigError::Parse {
            path: path.display().to_string(),
            line: 0,
            message: format!("expected 10 values in matrix file, found {}", values.len()),
        });
    }
    let poleoff = values[0];
    let mut m = [[0.0; 3]; 3];
    for col in 0..3 {
        for row in 0..3 {
            m[row][col] = values[1 + col * 3 + row];
        }
    }
    Ok((poleoff, Mat3(m)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::astro_math::deg_to_rad;
    use assert_float_eq::*;

    #[test]
    fn identity_round_trip() {
        let m = Mat3::IDENTITY;
        let v = [0.3, -0.4, 0.866];
        assert_eq!(m.mul_vec(v), v);
    }

    #[test]
    fn transpose_inverts_rotation() {
        // Rotation by 30 degrees about z.
        let c = deg_to_rad(30.0).cos();
        let s = deg_to_rad(30.0).sin();
        let m = Mat3([[c, -s, 0.0], [s, c, 0.0], [0.0, 0.0, 1.0]]);
        let v = [0.6, 0.0, 0.8];
        let back = m.transpose().mul_vec(m.mul_vec(v));
        for i in 0..3 {
            assert_float_absolute_eq!(back[i], v[i], 1E-12);
        }
    }

    #[test]
    fn identity_model_reproduces_hour_angle() {
        let cfg = MountConfig::default();
        let enc = apply_matrix(deg_to_rad(12.0), deg_to_rad(30.0), &cfg);
        assert_eq!(enc[0], (12.0 * cfg.deg2enc[0]).round() as i64);
        assert_eq!(enc[1], (30.0 * cfg.deg2enc[1]).round() as i64);
    }

    #[test]
    fn pole_offset_is_subtracted() {
        let mut cfg = MountConfig::default();
        cfg.poleoff = 0.5;
        let enc = apply_matrix(deg_to_rad(0.0), deg_to_rad(30.0), &cfg);
        assert_eq!(enc[1], (29.5 * cfg.deg2enc[1]).round() as i64);
    }

    #[test]
    fn flip_resolves_out_of_range_hour_angle() {
        let cfg = MountConfig::default();
        // 120 deg is beyond the +45 deg limit; one flip lands at -60.
        let enc = apply_matrix(deg_to_rad(120.0), deg_to_rad(30.0), &cfg);
        assert_eq!(enc[0], (-60.0 * cfg.deg2enc[0]).round() as i64);
        assert_eq!(enc[1], (150.0 * cfg.deg2enc[1]).round() as i64);
    }

    #[test]
    fn southern_site_inverts_both_axes() {
        let mut north = MountConfig::default();
        north.latitude = 33.0;
        let mut south = MountConfig::default();
        south.latitude = -33.0;
        // Negative dec stays negative through the shuffle, both axes
        // inverted relative to the northern solution.
        let n = apply_matrix(deg_to_rad(10.0), deg_to_rad(-20.0), &north);
        let s = apply_matrix(deg_to_rad(10.0), deg_to_rad(-20.0), &south);
        assert_eq!(s[0], -n[0]);
        assert_eq!(s[1], -n[1]);
    }

    #[test]
    fn offsets_are_added_to_encoder_targets() {
        let mut cfg = MountConfig::default();
        cfg.zeropt = Some([100, -50]);
        cfg.ptg_offset = [7, -3];
        let base = apply_matrix(deg_to_rad(5.0), deg_to_rad(5.0), &MountConfig::default());
        let enc = apply_matrix(deg_to_rad(5.0), deg_to_rad(5.0), &cfg);
        assert_eq!(enc[0], base[0] + 107);
        assert_eq!(enc[1], base[1] - 53);
    }
}
