//! Display color-processing register blocks.
//!
//! The registers themselves live behind the display pipeline; this crate only
//! reads and writes them as whole blocks through [`DisplayColor`].

use serde::{Deserialize, Serialize};

use crate::traits::Result;

/// Fancy color curvature block: hue window and gains per color range.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FccParams {
    /// Lower edge of the red hue window.
    pub red_hue_low: i32,
    /// Upper edge of the red hue window.
    pub red_hue_high: i32,
    /// Hue gain inside the red window.
    pub red_hue_gain: i32,
    /// Saturation gain inside the red window.
    pub red_sat_gain: i32,
    /// Lower edge of the green hue window.
    pub green_hue_low: i32,
    /// Upper edge of the green hue window.
    pub green_hue_high: i32,
    /// Hue gain inside the green window.
    pub green_hue_gain: i32,
    /// Saturation gain inside the green window.
    pub green_sat_gain: i32,
    /// Lower edge of the blue hue window.
    pub blue_hue_low: i32,
    /// Upper edge of the blue hue window.
    pub blue_hue_high: i32,
    /// Hue gain inside the blue window.
    pub blue_hue_gain: i32,
    /// Saturation gain inside the blue window.
    pub blue_sat_gain: i32,
    /// Lower edge of the cyan hue window.
    pub cyan_hue_low: i32,
    /// Upper edge of the cyan hue window.
    pub cyan_hue_high: i32,
    /// Hue gain inside the cyan window.
    pub cyan_hue_gain: i32,
    /// Saturation gain inside the cyan window.
    pub cyan_sat_gain: i32,
    /// Lower edge of the magenta hue window.
    pub magenta_hue_low: i32,
    /// Upper edge of the magenta hue window.
    pub magenta_hue_high: i32,
    /// Hue gain inside the magenta window.
    pub magenta_hue_gain: i32,
    /// Saturation gain inside the magenta window.
    pub magenta_sat_gain: i32,
    /// Lower edge of the yellow hue window.
    pub yellow_hue_low: i32,
    /// Upper edge of the yellow hue window.
    pub yellow_hue_high: i32,
    /// Hue gain inside the yellow window.
    pub yellow_hue_gain: i32,
    /// Saturation gain inside the yellow window.
    pub yellow_sat_gain: i32,
}

/// Black/white stretch block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BwsParams {
    /// Non-zero to enable the stretch.
    pub enable: i32,
    /// Lowest input level passed through.
    pub min: i32,
    /// Input level mapped to black.
    pub black: i32,
    /// Input level mapped to white.
    pub white: i32,
    /// Highest input level passed through.
    pub max: i32,
    /// Slope of the first stretch segment.
    pub slope0: i32,
    /// Slope of the second stretch segment.
    pub slope1: i32,
    /// Slope of the third stretch segment.
    pub slope2: i32,
    /// Slope of the fourth stretch segment.
    pub slope3: i32,
}

/// Whole-block access to the display color registers.
pub trait DisplayColor: Send {
    /// Read the fancy color curvature block.
    fn fcc(&self) -> Result<FccParams>;

    /// Overwrite the fancy color curvature block. Returns whether any
    /// register changed.
    fn set_fcc(&mut self, params: &FccParams) -> Result<bool>;

    /// Read the black/white stretch block.
    fn bws(&self) -> Result<BwsParams>;

    /// Overwrite the black/white stretch block. Returns whether any register
    /// changed.
    fn set_bws(&mut self, params: &BwsParams) -> Result<bool>;
}
