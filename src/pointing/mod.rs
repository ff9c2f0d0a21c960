pub mod focus;
pub mod matrix;
pub mod tpoint;

pub use focus::{FocusModel, FocusTerm};
pub use matrix::{apply_matrix, load_matrix_file, Mat3};
pub use tpoint::{apply_model, TermKind, TpointModel, TpointTerm};

use serde::{Deserialize, Serialize};

/// Which pointing model maps hour angle and declination onto the encoders.
#[derive(Debug, Default, Eq, PartialEq, Copy, Clone, Serialize, Deserialize)]
pub enum PointingMethod {
    /// Raw hour-angle conversion, no model terms.
    #[default]
    None,
    /// Two-star 3x3 rotation model.
    Matrix,
    /// TPOINT analytic term model.
    TPoint,
}
