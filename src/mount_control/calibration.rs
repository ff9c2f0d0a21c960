use crate::coords;
use crate::mount_control::MountEngine;
use crate::util::consts::MAX_OFFSET_DEG;
use crate::util::{Axis, FeedError};
use tracing::{debug, info, warn};

/// Latest astrometric calibration of an exposure: where the scheduler
/// asked to point (`pra`/`pdec`), where the astrometry says the telescope
/// actually pointed (`rra`/`rdec`), the encoder-derived coordinates
/// recorded at exposure time, and the limiting magnitude of the fit
/// (negative when the image failed to calibrate).
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct CalRecord {
    pub mjd: f64,
    pub pra: f64,
    pub pdec: f64,
    pub rra: f64,
    pub rdec: f64,
    pub encra: f64,
    pub encdec: f64,
    pub mlim: f64,
}

/// Latest on-sky focus measurement.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct FocusSample {
    pub mjd: f64,
    pub focus: f64,
    pub az: f64,
    pub el: f64,
    pub temp: f64,
}

/// On-sky pointing calibration results, read back from shared storage.
/// Implementations own the file format and locking; a cycle that cannot
/// get the data simply returns `Err` and is retried later.
pub trait CalibrationFeed: Send {
    fn latest(&mut self) -> Result<Option<CalRecord>, FeedError>;

    /// Append a pointing-update row to the run record.
    fn record_pointing_update(
        &mut self,
        pra: f64,
        rra: f64,
        pdec: f64,
        rdec: f64,
    ) -> Result<(), FeedError>;
}

/// On-sky focus measurements, read back from shared storage.
pub trait FocusFeed: Send {
    fn latest(&mut self) -> Result<Option<FocusSample>, FeedError>;

    /// Append a focus-update row to the run record.
    fn record_focus_update(&mut self, old_focus: f64, new_focus: f64) -> Result<(), FeedError>;
}

impl MountEngine {
    /// Fold the newest calibration into the pointing offsets: reconstruct
    /// the encoder position the exposure was taken at, recompute where the
    /// current model would have pointed, and absorb the difference. Each
    /// component of the update is clipped to zero if implausibly large.
    pub(crate) fn update_offsets(&mut self) -> Result<(), FeedError> {
        let Some(zero_mjd) = self.cfg.zero_mjd else {
            debug!("mount has not been synced yet");
            return Ok(());
        };
        let row = match self.cal_feed.as_mut() {
            Some(feed) => match feed.latest()? {
                Some(row) => row,
                None => return Ok(()),
            },
            None => return Ok(()),
        };

        if row.mjd <= zero_mjd || row.mlim < 0.0 {
            debug!(
                "no new entries ({:.6} <= {:.6}), or uncalibrated image ({:.2})",
                row.mjd, zero_mjd, row.mlim
            );
            return Ok(());
        }
        debug!(
            "using: {:.6}, {:.4},{:.4} -> {:.4},{:.4}",
            row.mjd, row.pra, row.pdec, row.rra, row.rdec
        );

        if let Some(feed) = self.cal_feed.as_mut() {
            if let Err(e) = feed.record_pointing_update(row.pra, row.rra, row.pdec, row.rdec) {
                warn!("could not record pointing update: {}", e);
            }
        }

        let nmjd = self.clock.now_mjd();
        let orig = coords::radec_to_enc_raw(row.encra, row.encdec, row.mjd, &self.cfg);
        let new = coords::coord_to_enc(
            row.rra,
            row.rdec,
            &self.cfg,
            self.clock.now(),
            row.mjd - nmjd,
        );

        let mut off = [orig[0] - new[0], orig[1] - new[1]];
        for (i, axis) in Axis::BOTH.into_iter().enumerate() {
            if off[i].abs() as f64 > MAX_OFFSET_DEG * self.cfg.deg2enc[i] {
                info!(
                    "{} offset too large ({:.3}); cancelling",
                    axis.name(),
                    off[i] as f64 / self.cfg.deg2enc[i]
                );
                off[i] = 0;
            }
        }

        info!("adding {}, {} to pointing offset", off[0], off[1]);
        self.cfg.ptg_offset[0] += off[0];
        self.cfg.ptg_offset[1] += off[1];
        self.cfg.zero_mjd = Some(nmjd);
        Ok(())
    }

    /// Fold the newest on-sky focus measurement into the focus model by
    /// shifting its constant term.
    pub(crate) fn update_focus(&mut self) -> Result<(), FeedError> {
        let sample = match self.focus_feed.as_mut() {
            Some(feed) => match feed.latest()? {
                Some(s) => s,
                None => return Ok(()),
            },
            None => return Ok(()),
        };

        if sample.mjd <= self.focus_last_mjd || sample.focus <= 0.0 {
            return Ok(());
        }
        self.focus_last_mjd = sample.mjd;

        let old_focus = self.cfg.focmod.apply(sample.az, sample.el, sample.temp);
        let delta = sample.focus - old_focus;
        if let Some((_, new_coef)) = self.cfg.focmod.bump_constant(delta) {
            if let Some(feed) = self.focus_feed.as_mut() {
                if let Err(e) = feed.record_focus_update(new_coef - delta, new_coef) {
                    warn!("could not record focus update: {}", e);
                }
            }
        }
        Ok(())
    }
}
