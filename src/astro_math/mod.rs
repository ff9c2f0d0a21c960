use chrono::{DateTime, Datelike, Timelike, Utc};
use polynomials::poly;
use std::f64::consts::{PI, TAU};

pub type Degrees = f64;
pub type Radians = f64;

/// Seconds of time to radians.
const DS2R: f64 = 7.272_205_216_643_04e-5;
/// Arcseconds to radians.
const AS2R: f64 = 4.848_136_811_095_36e-6;

pub fn deg_to_rad(degrees: Degrees) -> Radians {
    PI * degrees / 180.
}

pub fn rad_to_deg(rad: Radians) -> Degrees {
    180. * rad / PI
}

/// MJD of 0h on the given Gregorian calendar date.
fn mjd_from_civil(year: i32, month: u32, day: u32) -> f64 {
    let y = i64::from(year);
    let m = i64::from(month);
    let d = i64::from(day);
    let jdn = (1461 * (y + 4800 + (m - 14) / 12)) / 4 + (367 * (m - 2 - 12 * ((m - 14) / 12))) / 12
        - (3 * ((y + 4900 + (m - 14) / 12) / 100)) / 4
        + d
        - 32075;
    // jdn is the Julian day number at noon; MJD = JD - 2400000.5
    (jdn - 2400001) as f64
}

/// Modified Julian Date, civil date plus fractional day.
pub fn mjd_from_datetime(t: DateTime<Utc>) -> f64 {
    let day = mjd_from_civil(t.year(), t.month(), t.day());
    let frac = (f64::from(t.hour())
        + (f64::from(t.minute())
            + (f64::from(t.second()) + f64::from(t.nanosecond()) / 1e9) / 60.)
            / 60.)
        / 24.;
    day + frac
}

/// Fractional-year epoch of a civil instant, used as the precession target.
pub fn epoch_from_datetime(t: DateTime<Utc>) -> f64 {
    let day_frac = (f64::from(t.hour())
        + (f64::from(t.minute()) + f64::from(t.second()) / 60.) / 60.)
        / 24.;
    f64::from(t.year()) + (f64::from(t.ordinal0()) + day_frac) / 365.
}

/// Greenwich mean sidereal time (IAU 1982) for a UT MJD, radians in [0, 2π).
pub fn gmst(mjd: f64) -> Radians {
    let tu = (mjd - 51544.5) / 36525.0;
    let p = poly![24110.54841, 8640184.812866, 0.093104, -6.2e-6];
    range_two_pi(mjd.fract() * TAU + p.eval(tu).unwrap() * DS2R)
}

/// Equation of the equinoxes from the short nutation series, radians.
pub fn eqeqx(mjd: f64) -> Radians {
    let d = mjd - 51544.5;
    let omega = deg_to_rad(125.04 - 0.052954 * d);
    let sun = deg_to_rad(280.47 + 0.98565 * d);
    let eps = deg_to_rad(23.4393 - 0.000_000_4 * d);
    let dpsi_hours = -0.000319 * omega.sin() - 0.000024 * (2.0 * sun).sin();
    dpsi_hours * eps.cos() * PI / 12.0
}

/// Local mean sidereal time, radians.
pub fn lmst(mjd: f64, longitude: Radians) -> Radians {
    gmst(mjd) + eqeqx(mjd) + longitude
}

/// Normalize an angle into (-π, π].
pub fn range_pi(angle: Radians) -> Radians {
    let w = angle % TAU;
    if w.abs() >= PI {
        w - TAU.copysign(angle)
    } else {
        w
    }
}

/// Normalize an angle into [0, 2π).
pub fn range_two_pi(angle: Radians) -> Radians {
    let w = angle % TAU;
    if w < 0.0 {
        w + TAU
    } else {
        w
    }
}

/// IAU 1976 precession angles between two Julian epochs, radians.
fn precession_angles(ep0: f64, ep1: f64) -> (f64, f64, f64) {
    let t0 = (ep0 - 2000.0) / 100.0;
    let t = (ep1 - ep0) / 100.0;
    let tas2r = t * AS2R;
    let w = 2306.2181 + (1.39656 - 0.000139 * t0) * t0;
    let zeta = (w + ((0.30188 - 0.000344 * t0) + 0.017998 * t) * t) * tas2r;
    let z = (w + ((1.09468 + 0.000066 * t0) + 0.018203 * t) * t) * tas2r;
    let theta = ((2004.3109 + (-0.85330 - 0.000217 * t0) * t0)
        + ((-0.42665 - 0.000217 * t0) - 0.041833 * t) * t)
        * tas2r;
    (zeta, z, theta)
}

/// Precess FK5 mean coordinates from epoch `ep0` to `ep1` (Julian years).
pub fn precess_fk5(ep0: f64, ep1: f64, ra: &mut Radians, dec: &mut Radians) {
    let (zeta, z, theta) = precession_angles(ep0, ep1);
    let a = *ra + zeta;
    let (sa, ca) = a.sin_cos();
    let (sd, cd) = dec.sin_cos();
    let (st, ct) = theta.sin_cos();
    let x = ct * cd * ca - st * sd;
    let y = cd * sa;
    let zc = st * cd * ca + ct * sd;
    *ra = range_two_pi(y.atan2(x) + z);
    *dec = zc.asin();
}

/// Hour angle and declination to azimuth (N through E) and elevation.
pub fn ha_dec_to_az_el(ha: Radians, dec: Radians, lat: Radians) -> (Radians, Radians) {
    let (sh, ch) = ha.sin_cos();
    let (sd, cd) = dec.sin_cos();
    let (sp, cp) = lat.sin_cos();
    let x = -ch * cd * sp + sd * cp;
    let y = -sh * cd;
    let z = ch * cd * cp + sd * sp;
    let r = x.hypot(y);
    let a = if r == 0.0 { 0.0 } else { y.atan2(x) };
    let az = if a < 0.0 { a + TAU } else { a };
    (az, z.atan2(r))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_float_eq::*;
    use chrono::TimeZone;

    fn rad_to_hours(rad: Radians) -> f64 {
        12. * rad / PI
    }

    #[test]
    fn test_mjd_from_civil_epoch() {
        // The MJD epoch itself.
        assert_eq!(mjd_from_civil(1858, 11, 17), 0.0);
        assert_eq!(mjd_from_civil(2000, 1, 1), 51544.0);
    }

    #[test]
    fn test_mjd_from_datetime() {
        let t = Utc.ymd(2024, 1, 1).and_hms(0, 0, 0);
        assert_eq!(mjd_from_datetime(t), 60310.0);
        let t = Utc.ymd(2024, 1, 1).and_hms(6, 0, 0);
        assert_float_absolute_eq!(mjd_from_datetime(t), 60310.25, 1E-9);
    }

    #[test]
    fn test_gmst() {
        let t = Utc.ymd(1969, 1, 6).and_hms(1, 5, 0);
        assert_float_relative_eq!(
            rad_to_hours(gmst(mjd_from_datetime(t))),
            8.1127421203,
            1E-4
        );
        let t = Utc.ymd(2021, 1, 30).and_hms(21, 20, 0);
        assert_float_relative_eq!(
            rad_to_hours(gmst(mjd_from_datetime(t))),
            6.0219108930,
            1E-4
        );
    }

    #[test]
    fn test_eqeqx_is_small() {
        // The equation of the equinoxes never exceeds ~1.2 seconds of time.
        let bound = 1.3 * DS2R;
        for mjd in [50000.0, 55000.0, 60000.0] {
            assert!(eqeqx(mjd).abs() < bound);
        }
    }

    #[test]
    fn test_range_pi() {
        assert_float_absolute_eq!(range_pi(3.0 * PI), PI, 1E-12);
        assert_float_absolute_eq!(range_pi(-3.0 * PI / 2.0), PI / 2.0, 1E-12);
        assert_eq!(range_pi(0.5), 0.5);
        assert_eq!(range_pi(-0.5), -0.5);
    }

    #[test]
    fn test_precess_identity() {
        let mut ra = deg_to_rad(123.4);
        let mut dec = deg_to_rad(-56.7);
        precess_fk5(2000.0, 2000.0, &mut ra, &mut dec);
        assert_float_absolute_eq!(rad_to_deg(ra), 123.4, 1E-10);
        assert_float_absolute_eq!(rad_to_deg(dec), -56.7, 1E-10);
    }

    #[test]
    fn test_precess_theta_persei() {
        // Meeus, "Astronomical Algorithms", example 21.b (proper motion
        // already applied).
        let mut ra = deg_to_rad(41.054063);
        let mut dec = deg_to_rad(49.227750);
        precess_fk5(2000.0, 2028.86705, &mut ra, &mut dec);
        assert_float_absolute_eq!(rad_to_deg(ra), 41.547214, 1E-4);
        assert_float_absolute_eq!(rad_to_deg(dec), 49.348483, 1E-4);
    }

    #[test]
    fn test_ha_dec_to_az_el() {
        // An object at dec = lat culminates at the zenith.
        let lat = deg_to_rad(33.0);
        let (_, el) = ha_dec_to_az_el(0.0, deg_to_rad(33.0), lat);
        assert_float_absolute_eq!(rad_to_deg(el), 90.0, 1E-9);

        let (az, el) = ha_dec_to_az_el(0.0, deg_to_rad(0.0), lat);
        assert_float_absolute_eq!(rad_to_deg(el), 57.0, 1E-9);
        assert_float_absolute_eq!(rad_to_deg(az), 180.0, 1E-9);

        // Setting in the west.
        let (az, _) = ha_dec_to_az_el(deg_to_rad(60.0), deg_to_rad(0.0), lat);
        assert!(rad_to_deg(az) > 180.0);
    }
}
