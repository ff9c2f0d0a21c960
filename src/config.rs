use crate::astro_math::Degrees;
use crate::pointing::{load_matrix_file, tpoint, FocusModel, Mat3, PointingMethod, TpointModel};
use crate::util::{ConfigError, TestMode};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/* Site and hardware configuration */

/// Everything the engine needs to drive one site's mount.
///
/// Immutable after load except for the fields established at run time: the
/// encoder zero points (set by a completed zeros command), the pointing
/// offsets (refined by the calibration loop), and the focus model constant
/// (refined by the focus update loop).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MountConfig {
    pub latitude: Degrees,
    pub longitude: Degrees,
    pub altitude: f64,

    /// Axis travel in degrees, `[min, max]`.
    pub rarange: [f64; 2],
    pub decrange: [f64; 2],
    /// Focus stage travel.
    pub focrange: [f64; 2],

    /// Encoder counts per degree.
    pub deg2enc: [f64; 2],
    /// Degrees per second.
    pub max_vel: [f64; 2],
    /// Degrees per second squared.
    pub slw_acc: [f64; 2],
    pub home_vel: [f64; 2],
    /// Headroom multiplier on the commanded max velocity, >= 1.
    pub overspeed: f64,

    /// Degrees.
    pub stowpos: [f64; 2],
    pub standbypos: [f64; 2],

    /// Encoder counts within which an axis counts as on-target.
    pub enctol: i64,
    pub foctol: f64,

    /// Seconds per engine tick.
    pub poll_time: f64,
    /// Seconds between unforced status publications.
    pub sample_time: f64,
    pub err_tout: f64,

    pub method: PointingMethod,
    /// Degrees, subtracted from the matrix-model declination.
    pub poleoff: f64,
    pub coomat: Mat3,
    pub model: TpointModel,
    pub focmod: FocusModel,

    pub testmode: TestMode,
    /// Whether the servo firmware supports the run command.
    pub mount_run: bool,

    pub mntman: String,
    pub mntmodel: String,
    pub mntsn: u32,
    pub errormail: String,

    pub mount_dev: String,
    pub focus_dev: String,
    pub mount_baud: u32,
    pub focus_baud: u32,

    /// Shared-storage locations handed to the calibration feeds.
    pub statdir: String,
    pub statroot: String,
    pub focus_update: String,
    pub obsfile: String,

    /// Encoder reading at the home position; unset until a zeros command
    /// completes.
    pub zeropt: Option<[i64; 2]>,
    /// Additive per-axis correction to the zero point, encoder counts.
    pub ptg_offset: [i64; 2],
    /// When the zero point was last established or refined.
    pub zero_mjd: Option<f64>,
}

impl Default for MountConfig {
    fn default() -> Self {
        MountConfig {
            latitude: 33.0,
            longitude: -110.0,
            altitude: 1500.0,
            rarange: [-45.0, 45.0],
            decrange: [-30.0, 60.0],
            focrange: [0.0, 60.0],
            deg2enc: [1000.0, 1000.0],
            max_vel: [20.0, 20.0],
            slw_acc: [10.0, 10.0],
            home_vel: [5.0, 5.0],
            overspeed: 1.2,
            stowpos: [0.0, 0.0],
            standbypos: [0.0, 30.0],
            enctol: 10,
            foctol: 0.05,
            poll_time: 0.5,
            sample_time: 5.0,
            err_tout: 30.0,
            method: PointingMethod::None,
            poleoff: 0.0,
            coomat: Mat3::IDENTITY,
            model: TpointModel::default(),
            focmod: FocusModel::default(),
            testmode: TestMode::default(),
            mount_run: false,
            mntman: String::new(),
            mntmodel: String::new(),
            mntsn: 0,
            errormail: String::new(),
            mount_dev: "/dev/ttyS0".into(),
            focus_dev: "/dev/ttyS1".into(),
            mount_baud: 38_400,
            focus_baud: 19_200,
            statdir: String::new(),
            statroot: String::new(),
            focus_update: String::new(),
            obsfile: String::new(),
            zeropt: None,
            ptg_offset: [0, 0],
            zero_mjd: None,
        }
    }
}

impl MountConfig {
    /// Zero points, or zero before the first sync (callers that may run
    /// before establishment: status conversion, range checks).
    pub fn zeropt_or_zero(&self) -> [i64; 2] {
        self.zeropt.unwrap_or([0, 0])
    }

    /// Legal encoder window for an axis, offsets included.
    pub fn enc_limits(&self, axis: usize) -> (i64, i64) {
        let range = if axis == 0 { self.rarange } else { self.decrange };
        let zeropt = self.zeropt_or_zero();
        (
            (range[0] * self.deg2enc[axis]).round() as i64 + zeropt[axis] + self.ptg_offset[axis],
            (range[1] * self.deg2enc[axis]).round() as i64 + zeropt[axis] + self.ptg_offset[axis],
        )
    }

    /// Read a keyword-driven config file: one record per line, `#` comments,
    /// whitespace-separated fields. Model files named in the config are
    /// loaded as part of the same pass.
    pub fn load(path: impl AsRef<Path>) -> Result<MountConfig, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            error: e,
        })?;

        let mut cfg = MountConfig::default();
        let mut matfile: Option<PathBuf> = None;
        let mut modfile: Option<PathBuf> = None;
        let mut focusmodfile: Option<PathBuf> = None;

        let parse_err = |line: usize, message: String| ConfigError::Parse {
            path: path.display().to_string(),
            line,
            message,
        };

        for (n, raw) in text.lines().enumerate() {
            let line = raw.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }
            let tokens: Vec<&str> = line.split_whitespace().collect();
            let keyword = tokens[0];
            let args = &tokens[1..];

            fn one<T: std::str::FromStr>(args: &[&str]) -> Option<T> {
                if args.len() != 1 {
                    return None;
                }
                args[0].parse().ok()
            }
            fn pair(args: &[&str]) -> Option<[f64; 2]> {
                if args.len() != 2 {
                    return None;
                }
                Some([args[0].parse().ok()?, args[1].parse().ok()?])
            }
            let bad = |n: usize, kw: &str| parse_err(n + 1, format!("{} entry format error", kw));

            match keyword {
                "latitude" => cfg.latitude = one(args).ok_or_else(|| bad(n, keyword))?,
                "longitude" => cfg.longitude = one(args).ok_or_else(|| bad(n, keyword))?,
                "altitude" => cfg.altitude = one(args).ok_or_else(|| bad(n, keyword))?,
                "rarange" => cfg.rarange = pair(args).ok_or_else(|| bad(n, keyword))?,
                "decrange" => cfg.decrange = pair(args).ok_or_else(|| bad(n, keyword))?,
                "focrange" => cfg.focrange = pair(args).ok_or_else(|| bad(n, keyword))?,
                "deg2enc" => cfg.deg2enc = pair(args).ok_or_else(|| bad(n, keyword))?,
                "maxvel" => cfg.max_vel = pair(args).ok_or_else(|| bad(n, keyword))?,
                "slewacc" => cfg.slw_acc = pair(args).ok_or_else(|| bad(n, keyword))?,
                "homevel" => cfg.home_vel = pair(args).ok_or_else(|| bad(n, keyword))?,
                "overspeed" => cfg.overspeed = one(args).ok_or_else(|| bad(n, keyword))?,
                "stowpos" => cfg.stowpos = pair(args).ok_or_else(|| bad(n, keyword))?,
                "standbypos" => cfg.standbypos = pair(args).ok_or_else(|| bad(n, keyword))?,
                "enctol" => cfg.enctol = one(args).ok_or_else(|| bad(n, keyword))?,
                "foctol" => cfg.foctol = one(args).ok_or_else(|| bad(n, keyword))?,
                "poll_time" => cfg.poll_time = one(args).ok_or_else(|| bad(n, keyword))?,
                "sample_time" => cfg.sample_time = one(args).ok_or_else(|| bad(n, keyword))?,
                "err_tout" => cfg.err_tout = one(args).ok_or_else(|| bad(n, keyword))?,
                "mntman" => cfg.mntman = args.join(" "),
                "mntmodel" => cfg.mntmodel = args.join(" "),
                "mntsn" => cfg.mntsn = one(args).ok_or_else(|| bad(n, keyword))?,
                "errormail" => cfg.errormail = args.join(" "),
                "mountdev" => cfg.mount_dev = one(args).ok_or_else(|| bad(n, keyword))?,
                "focusdev" => cfg.focus_dev = one(args).ok_or_else(|| bad(n, keyword))?,
                "mountbaud" => cfg.mount_baud = one(args).ok_or_else(|| bad(n, keyword))?,
                "focusbaud" => cfg.focus_baud = one(args).ok_or_else(|| bad(n, keyword))?,
                "statdir" => cfg.statdir = args.join(" "),
                "statroot" => cfg.statroot = args.join(" "),
                "focus_update" => cfg.focus_update = args.join(" "),
                "obsfile" => cfg.obsfile = args.join(" "),
                "matfile" => {
                    matfile = Some(one::<String>(args).ok_or_else(|| bad(n, keyword))?.into())
                }
                "modfile" => {
                    modfile = Some(one::<String>(args).ok_or_else(|| bad(n, keyword))?.into())
                }
                "focusmodfile" => {
                    focusmodfile = Some(one::<String>(args).ok_or_else(|| bad(n, keyword))?.into())
                }
                "testmode" => {
                    let bits: u8 = one(args).ok_or_else(|| bad(n, keyword))?;
                    cfg.testmode = TestMode::from_bits(bits);
                }
                "mount_run" => {
                    let v: u8 = one(args).ok_or_else(|| bad(n, keyword))?;
                    cfg.mount_run = v != 0;
                }
                // Log routing is handled by the tracing subscriber now.
                "loglevel" | "logfile" => {}
                _ => warn!("unrecognized config keyword {:?}", keyword),
            }
        }

        // The model file on hand decides the pointing method.
        if let Some(mf) = &modfile {
            cfg.model = tpoint::load_model_file(mf)?;
            cfg.method = PointingMethod::TPoint;
            info!("using pointing model file {}", mf.display());
        } else if let Some(mf) = &matfile {
            let (poleoff, mat) = load_matrix_file(mf)?;
            cfg.poleoff = poleoff;
            cfg.coomat = mat;
            cfg.method = PointingMethod::Matrix;
            info!("using pointing matrix file {}", mf.display());
        }
        if let Some(ff) = &focusmodfile {
            cfg.focmod = FocusModel::load(ff)?;
            info!("using focus model file {}", ff.display());
        }

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let check = |ok: bool, msg: &str| {
            if ok {
                Ok(())
            } else {
                Err(ConfigError::Invalid(msg.to_string()))
            }
        };
        check(
            (-90.0..=90.0).contains(&self.latitude),
            "latitude outside [-90, 90]",
        )?;
        check(
            (-360.0..=360.0).contains(&self.longitude),
            "longitude outside [-360, 360]",
        )?;
        check(self.rarange[0] < self.rarange[1], "rarange min >= max")?;
        check(self.decrange[0] < self.decrange[1], "decrange min >= max")?;
        check(self.focrange[0] < self.focrange[1], "focrange min >= max")?;
        check(
            self.deg2enc[0] != 0.0 && self.deg2enc[1] != 0.0,
            "deg2enc must be nonzero",
        )?;
        check(
            self.max_vel[0] > 0.0 && self.max_vel[1] > 0.0,
            "maxvel must be positive",
        )?;
        check(
            self.slw_acc[0] > 0.0 && self.slw_acc[1] > 0.0,
            "slewacc must be positive",
        )?;
        check(
            self.home_vel[0] > 0.0 && self.home_vel[1] > 0.0,
            "homevel must be positive",
        )?;
        check(self.overspeed >= 1.0, "overspeed below 1")?;
        check(self.enctol > 0, "enctol must be positive")?;
        check(self.foctol > 0.0, "foctol must be positive")?;
        check(self.poll_time > 0.0, "poll_time must be positive")?;
        check(self.sample_time > 0.0, "sample_time must be positive")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config_is_valid() {
        MountConfig::default().validate().unwrap();
    }

    #[test]
    fn enc_limits_include_offsets() {
        let mut cfg = MountConfig::default();
        cfg.zeropt = Some([100, 200]);
        cfg.ptg_offset = [10, -20];
        let (lo, hi) = cfg.enc_limits(0);
        assert_eq!(lo, -45_000 + 110);
        assert_eq!(hi, 45_000 + 110);
        let (lo, hi) = cfg.enc_limits(1);
        assert_eq!(lo, -30_000 + 180);
        assert_eq!(hi, 60_000 + 180);
    }

    #[test]
    fn load_keyword_file() {
        let dir = std::env::temp_dir().join("mountd-conf-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("mountd.conf");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "# test site").unwrap();
        writeln!(f, "latitude 31.9533").unwrap();
        writeln!(f, "longitude -115.0").unwrap();
        writeln!(f, "altitude 2790").unwrap();
        writeln!(f, "rarange -47.5 47.5").unwrap();
        writeln!(f, "decrange -35.0 55.0").unwrap();
        writeln!(f, "focrange 5.0 45.0").unwrap();
        writeln!(f, "deg2enc 44000 44000").unwrap();
        writeln!(f, "maxvel 25.0 25.0").unwrap();
        writeln!(f, "slewacc 12.0 12.0").unwrap();
        writeln!(f, "homevel 4.0 4.0").unwrap();
        writeln!(f, "overspeed 1.5").unwrap();
        writeln!(f, "stowpos 0.0 -35.0").unwrap();
        writeln!(f, "standbypos 0.0 30.0").unwrap();
        writeln!(f, "enctol 30").unwrap();
        writeln!(f, "foctol 0.02").unwrap();
        writeln!(f, "poll_time 0.5").unwrap();
        writeln!(f, "sample_time 10").unwrap();
        writeln!(f, "err_tout 60").unwrap();
        writeln!(f, "testmode 3").unwrap();
        writeln!(f, "mount_run 1").unwrap();
        writeln!(f, "errormail ops@example.org").unwrap();
        drop(f);

        let cfg = MountConfig::load(&path).unwrap();
        assert_eq!(cfg.latitude, 31.9533);
        assert_eq!(cfg.deg2enc, [44000.0, 44000.0]);
        assert_eq!(cfg.enctol, 30);
        assert!(cfg.testmode.no_mount());
        assert!(cfg.testmode.no_focus());
        assert!(cfg.mount_run);
        assert_eq!(cfg.method, PointingMethod::None);
        assert_eq!(cfg.errormail, "ops@example.org");
        assert!(cfg.zeropt.is_none());

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn load_rejects_bad_ranges() {
        let dir = std::env::temp_dir().join("mountd-conf-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("bad.conf");
        std::fs::write(&path, "rarange 45.0 -45.0\n").unwrap();
        assert!(MountConfig::load(&path).is_err());
        std::fs::remove_file(&path).unwrap();
    }
}
