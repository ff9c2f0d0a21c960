use crate::astro_math::{deg_to_rad, Radians};
use crate::config::MountConfig;
use crate::util::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{error, warn};

/// Most terms a model file may carry.
pub const MAX_TERMS: usize = 20;

#[derive(Debug, Eq, PartialEq, Copy, Clone, Serialize, Deserialize)]
pub enum TermKind {
    /// Index error in hour angle.
    IH,
    /// Index error in declination.
    ID,
    /// Axis non-perpendicularity.
    NP,
    /// Collimation error.
    CH,
    /// Polar axis elevation error.
    ME,
    /// Polar axis azimuth error.
    MA,
    /// Fork flexure.
    FO,
    /// Tube flexure.
    TF,
    /// Extended tube flexure.
    TX,
}

impl TermKind {
    pub fn from_name(name: &str) -> Option<TermKind> {
        Some(match name {
            "IH" => TermKind::IH,
            "ID" => TermKind::ID,
            "NP" => TermKind::NP,
            "CH" => TermKind::CH,
            "ME" => TermKind::ME,
            "MA" => TermKind::MA,
            "FO" => TermKind::FO,
            "TF" => TermKind::TF,
            "TX" => TermKind::TX,
            _ => None?,
        })
    }
}

#[derive(Debug, PartialEq, Copy, Clone, Serialize, Deserialize)]
pub struct TpointTerm {
    pub kind: TermKind,
    /// Coefficient in arcseconds.
    pub value: f64,
    pub sigma: f64,
    pub parallel: bool,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct TpointModel {
    pub caption: String,
    /// `'T'` scans terms forward, `'S'` reversed with inverted sign.
    pub method: char,
    pub observations: u32,
    pub sky_rms: f64,
    pub refr_a: f64,
    pub refr_b: f64,
    pub terms: Vec<TpointTerm>,
}

impl Default for TpointModel {
    fn default() -> Self {
        TpointModel {
            caption: String::new(),
            method: 'T',
            observations: 0,
            sky_rms: 0.0,
            refr_a: 0.0,
            refr_b: 0.0,
            terms: Vec::new(),
        }
    }
}

/// Map hour angle / declination onto encoder targets through the term model.
///
/// Iterates with a meridian-flip retry: the first attempt works on the
/// flipped position, and if the resulting hour angle is not acceptable the
/// second attempt runs unflipped. Two failures fall back to the standby
/// position.
pub fn apply_model(ha: Radians, dec: Radians, cfg: &MountConfig) -> [i64; 2] {
    let lat = deg_to_rad(cfg.latitude);
    let (ramin, ramax) = if lat < 0.0 {
        (-cfg.rarange[1], -cfg.rarange[0])
    } else {
        (cfg.rarange[0], cfg.rarange[1])
    };

    let model = &cfg.model;
    let (reverse, sign) = if model.method == 'S' {
        (true, -1.0)
    } else {
        (false, 1.0)
    };

    let mut dha = 0.0;
    let mut ddec = 0.0;
    let mut good = false;
    let mut flip = true;
    let mut ntry = 0;

    while !good && ntry < 2 {
        ntry += 1;
        dha = ha.to_degrees();
        ddec = dec.to_degrees();
        if flip {
            dha += 180.0;
            ddec = 180.0 - ddec;
        }

        let order: Vec<&TpointTerm> = if reverse {
            model.terms.iter().rev().collect()
        } else {
            model.terms.iter().collect()
        };
        for term in order {
            let v = term.value / 3600.0;
            let (delta_ha, delta_dec) = match term.kind {
                TermKind::IH => (v + cfg.ptg_offset[0] as f64 / cfg.deg2enc[0], 0.0),
                TermKind::ID => (0.0, v + cfg.ptg_offset[1] as f64 / cfg.deg2enc[1]),
                TermKind::NP => (v * deg_to_rad(ddec).tan(), 0.0),
                TermKind::CH => (v / deg_to_rad(ddec).cos(), 0.0),
                TermKind::ME => (
                    v * deg_to_rad(dha).sin() * deg_to_rad(ddec).tan(),
                    v * deg_to_rad(dha).cos(),
                ),
                TermKind::MA => (
                    -v * deg_to_rad(dha).cos() * deg_to_rad(ddec).tan(),
                    v * deg_to_rad(dha).sin(),
                ),
                TermKind::FO => (0.0, v * deg_to_rad(dha).cos()),
                TermKind::TF => (
                    v * lat.cos() * deg_to_rad(dha).sin() / deg_to_rad(ddec).cos(),
                    v * (lat.cos() * deg_to_rad(dha).cos() * deg_to_rad(ddec).sin()
                        - lat.sin() * deg_to_rad(ddec).cos()),
                ),
                TermKind::TX => {
                    let denom = deg_to_rad(ddec).sin() * lat.sin()
                        + deg_to_rad(ddec).cos() * deg_to_rad(dha).cos() * lat.cos();
                    (
                        v * lat.cos() * deg_to_rad(dha).sin() / deg_to_rad(ddec).cos() / denom,
                        v * (lat.cos() * deg_to_rad(dha).cos() * deg_to_rad(ddec).sin()
                            - lat.sin() * deg_to_rad(ddec).cos())
                            / denom,
                    )
                }
            };
            dha += sign * delta_ha;
            ddec += sign * delta_dec;
        }

        if model.method == 'S' {
            if lat > 0.0 {
                if dha < ramax {
                    good = true;
                } else if ((dha - 360.0) > ramax) || ((dha - 180.0) < ramax) {
                    // NOTE: preserved from the calibrated controller verbatim;
                    // the second clause holds for any dha below ramax + 180.
                    flip = false;
                } else {
                    good = true;
                    dha -= 360.0;
                }
            } else if (dha > ramin) && (dha < ramax) {
                good = true;
            } else if (dha + 360.0) > ramax {
                flip = false;
            } else {
                good = true;
                dha += 360.0;
            }
        } else {
            good = true;
        }
    }

    let mut fell_back = false;
    if ntry == 2 && !good {
        error!("no acceptable pointing solution, sending to standby");
        dha = cfg.standbypos[0];
        ddec = cfg.standbypos[1];
        fell_back = true;
    }

    if lat < 0.0 && !fell_back {
        // Model was built from inverted values south of the equator.
        if ddec > 0.0 {
            ddec -= 360.0;
        }
        dha = -dha;
        ddec = -ddec;
    }

    // The pointing offset rides on the IH/ID terms, not the conversion.
    let zeropt = cfg.zeropt_or_zero();
    [
        (dha * cfg.deg2enc[0]).round() as i64 + zeropt[0],
        (ddec * cfg.deg2enc[1]).round() as i64 + zeropt[1],
    ]
}

/// Read a TPOINT model file: caption, header record, fixed-format term
/// records, `END` terminator.
pub fn load_model_file(path: &Path) -> Result<TpointModel, ConfigError> {
    let parse_err = |line: usize, message: String| ConfigError::Parse {
        path: path.display().to_string(),
        line,
        message,
    };
    let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
        path: path.display().to_string(),
        error: e,
    })?;
    let mut lines = text.lines().enumerate();

    let caption = lines
        .next()
        .ok_or_else(|| parse_err(1, "empty model file".into()))?
        .1
        .trim_end()
        .to_string();

    let (_, header) = lines
        .next()
        .ok_or_else(|| parse_err(2, "missing model header".into()))?;
    let method = header
        .chars()
        .next()
        .ok_or_else(|| parse_err(2, "empty model header".into()))?;
    let fields: Vec<&str> = header[1..].split_whitespace().collect();
    if fields.len() < 4 {
        return Err(parse_err(2, format!("short model header {:?}", header)));
    }
    let observations = fields[0]
        .parse()
        .map_err(|_| parse_err(2, format!("bad observation count {:?}", fields[0])))?;
    let numbers: Vec<f64> = fields[1..4]
        .iter()
        .map(|t| t.parse())
        .collect::<Result<_, _>>()
        .map_err(|_| parse_err(2, format!("bad model header {:?}", header)))?;

    let mut terms = Vec::new();
    for (n, line) in lines {
        if line.starts_with("END") {
            break;
        }
        if terms.len() == MAX_TERMS {
            return Err(parse_err(n + 1, "too many model terms".into()));
        }
        let mut chars = line.chars();
        let parallel = chars.next() == Some('&');
        let _sign = chars.next();
        let rest: Vec<&str> = chars.as_str().split_whitespace().collect();
        if rest.len() < 3 {
            return Err(parse_err(n + 1, format!("short term record {:?}", line)));
        }
        let kind = TermKind::from_name(rest[0])
            .ok_or_else(|| parse_err(n + 1, format!("unrecognized term type {:?}", rest[0])))?;
        let value = rest[1]
            .parse()
            .map_err(|_| parse_err(n + 1, format!("bad term value {:?}", rest[1])))?;
        let sigma = rest[2]
            .parse()
            .map_err(|_| parse_err(n + 1, format!("bad term sigma {:?}", rest[2])))?;
        terms.push(TpointTerm {
            kind,
            value,
            sigma,
            parallel,
        });
    }

    if terms.is_empty() {
        warn!("model file {} carries no terms", path.display());
    }

    Ok(TpointModel {
        caption,
        method,
        observations,
        sky_rms: numbers[0],
        refr_a: numbers[1],
        refr_b: numbers[2],
        terms,
    })
}
