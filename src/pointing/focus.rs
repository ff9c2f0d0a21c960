use crate::util::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

/// Alphabet of focus term factors.
const FOCUS_FACTORS: &str = "1tea";
/// Longest factor pattern.
const MAX_FOCUS_CHARS: usize = 4;

/// One product term of the focus model: `value * prod(factor of char)`,
/// where `'1'` is unity, `'t'` temperature, `'e'` elevation, `'a'` azimuth.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct FocusTerm {
    pub pattern: String,
    pub value: f64,
}

#[derive(Debug, Default, PartialEq, Clone, Serialize, Deserialize)]
pub struct FocusModel {
    pub terms: Vec<FocusTerm>,
}

impl FocusModel {
    /// Evaluate the model. Azimuth and elevation in degrees.
    pub fn apply(&self, az: f64, el: f64, temp: f64) -> f64 {
        let mut focus = 0.0;
        for t in &self.terms {
            let mut term = t.value;
            for c in t.pattern.chars() {
                match c {
                    '1' => {}
                    't' => term *= temp,
                    'e' => term *= el,
                    'a' => term *= az,
                    _ => {}
                }
            }
            focus += term;
        }
        focus
    }

    /// Shift the constant (`'1'`-leading) term by `delta`, returning the old
    /// and new coefficients. Used by the online focus update.
    pub fn bump_constant(&mut self, delta: f64) -> Option<(f64, f64)> {
        let term = self.terms.iter_mut().find(|t| t.pattern.starts_with('1'))?;
        let old = term.value;
        term.value += delta;
        info!(
            "focus updated: {:.3} + {:.3} = {:.3}",
            old, delta, term.value
        );
        Some((old, term.value))
    }

    /// Read a focus model file of `term <pattern> <coefficient>` lines.
    pub fn load(path: &Path) -> Result<FocusModel, ConfigError> {
        let parse_err = |line: usize, message: String| ConfigError::Parse {
            path: path.display().to_string(),
            line,
            message,
        };
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            error: e,
        })?;

        let mut terms = Vec::new();
        for (n, raw) in text.lines().enumerate() {
            let line = raw.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }
            let tokens: Vec<&str> = line.split_whitespace().collect();
            if tokens[0] != "term" {
                return Err(parse_err(n + 1, format!("unrecognized keyword {:?}", tokens[0])));
            }
            if tokens.len() != 3 {
                return Err(parse_err(n + 1, "term entry format error".into()));
            }
            let pattern = tokens[1];
            if pattern.is_empty()
                || pattern.len() > MAX_FOCUS_CHARS
                || !pattern.chars().all(|c| FOCUS_FACTORS.contains(c))
            {
                return Err(parse_err(n + 1, format!("invalid focus term {:?}", pattern)));
            }
            let value: f64 = tokens[2]
                .parse()
                .map_err(|_| parse_err(n + 1, format!("term value {:?} not valid", tokens[2])))?;
            if value.is_nan() {
                return Err(parse_err(n + 1, format!("term {:?} value not valid", pattern)));
            }
            terms.push(FocusTerm {
                pattern: pattern.to_string(),
                value,
            });
        }

        Ok(FocusModel { terms })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_float_eq::*;
    use std::io::Write;

    fn model() -> FocusModel {
        FocusModel {
            terms: vec![
                FocusTerm {
                    pattern: "1".into(),
                    value: 10.0,
                },
                FocusTerm {
                    pattern: "t".into(),
                    value: 0.5,
                },
                FocusTerm {
                    pattern: "te".into(),
                    value: 0.01,
                },
            ],
        }
    }

    #[test]
    fn apply_multiplies_pattern_factors() {
        let m = model();
        // 10 + 0.5*20 + 0.01*20*45
        assert_float_absolute_eq!(m.apply(120.0, 45.0, 20.0), 29.0, 1E-12);
        assert_float_absolute_eq!(m.apply(0.0, 0.0, 0.0), 10.0, 1E-12);
    }

    #[test]
    fn bump_constant_moves_only_the_constant_term() {
        let mut m = model();
        let (old, new) = m.bump_constant(-2.5).unwrap();
        assert_float_absolute_eq!(old, 10.0, 1E-12);
        assert_float_absolute_eq!(new, 7.5, 1E-12);
        assert_float_absolute_eq!(m.apply(0.0, 0.0, 0.0), 7.5, 1E-12);
        assert_float_absolute_eq!(m.terms[1].value, 0.5, 1E-12);
    }

    #[test]
    fn bump_constant_without_constant_term() {
        let mut m = FocusModel {
            terms: vec![FocusTerm {
                pattern: "t".into(),
                value: 1.0,
            }],
        };
        assert!(m.bump_constant(1.0).is_none());
    }

    #[test]
    fn load_rejects_bad_patterns() {
        let dir = std::env::temp_dir().join("mountd-focus-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("bad.focmod");
        std::fs::write(&path, "term xq 1.0\n").unwrap();
        assert!(FocusModel::load(&path).is_err());
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn load_reads_terms() {
        let dir = std::env::temp_dir().join("mountd-focus-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("good.focmod");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "# site focus model").unwrap();
        writeln!(f, "term 1 -27.3").unwrap();
        writeln!(f, "term t 0.082").unwrap();
        writeln!(f, "term ea 0.0001").unwrap();
        drop(f);

        let m = FocusModel::load(&path).unwrap();
        assert_eq!(m.terms.len(), 3);
        assert_eq!(m.terms[2].pattern, "ea");
        assert_float_absolute_eq!(m.terms[0].value, -27.3, 1E-12);

        std::fs::remove_file(&path).unwrap();
    }
}
