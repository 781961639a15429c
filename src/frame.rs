//! Camera frames as they arrive from the host.
//!
//! A frame is three YUV 4:2:0 planes plus the declared dimensions. Frames are
//! converted once per detect call and dropped afterwards.

use std::fmt;
use std::str::FromStr;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use crate::error::DetectorFault;

/// How chroma samples are laid out inside the U and V planes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChromaLayout {
    /// Pick from the plane sizes.
    #[default]
    Auto,
    /// Pixel stride 1: each chroma plane holds `ceil(w/2) * ceil(h/2)` samples.
    Planar,
    /// Pixel stride 2: chroma planes are views into one interleaved V/U buffer,
    /// so `Y ‖ V ‖ U` forms an NV21 image.
    Interleaved,
}

impl FromStr for ChromaLayout {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(ChromaLayout::Auto),
            "planar" | "i420" => Ok(ChromaLayout::Planar),
            "interleaved" | "nv21" => Ok(ChromaLayout::Interleaved),
            other => Err(anyhow!(
                "unknown chroma layout '{}' (expected auto, planar or interleaved)",
                other
            )),
        }
    }
}

/// Clockwise rotation in quarter turns.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Rotation(u8);

impl Rotation {
    pub const NONE: Rotation = Rotation(0);

    /// Accepts any multiple of 90 degrees, including negative values.
    pub fn from_degrees(degrees: i64) -> Result<Self> {
        if degrees % 90 != 0 {
            return Err(anyhow!(
                "rotation must be a multiple of 90 degrees, got {}",
                degrees
            ));
        }
        Ok(Self((degrees / 90).rem_euclid(4) as u8))
    }

    pub fn quarter_turns(self) -> u8 {
        self.0
    }

    pub fn degrees(self) -> u32 {
        u32::from(self.0) * 90
    }

    /// True when width and height swap.
    pub fn is_transposing(self) -> bool {
        self.0 % 2 == 1
    }
}

impl fmt::Display for Rotation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}°", self.degrees())
    }
}

/// A YUV 4:2:0 frame in three planes. Row stride is assumed equal to width.
pub struct YuvFrame {
    y: Vec<u8>,
    u: Vec<u8>,
    v: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl YuvFrame {
    pub fn new(y: Vec<u8>, u: Vec<u8>, v: Vec<u8>, width: u32, height: u32) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(invalid(format!(
                "frame dimensions must be non-zero, got {}x{}",
                width, height
            )));
        }
        let luma = luma_len(width, height)?;
        if y.len() < luma {
            return Err(invalid(format!(
                "Y plane holds {} bytes, {}x{} needs {}",
                y.len(),
                width,
                height,
                luma
            )));
        }
        Ok(Self {
            y,
            u,
            v,
            width,
            height,
        })
    }

    /// Build from a `[Y, U, V]` plane list as sent over the channel.
    pub fn from_planes(planes: Vec<Vec<u8>>, width: u32, height: u32) -> Result<Self> {
        let count = planes.len();
        let [y, u, v]: [Vec<u8>; 3] = planes
            .try_into()
            .map_err(|_| invalid(format!("expected 3 planes (Y, U, V), got {}", count)))?;
        Self::new(y, u, v, width, height)
    }

    /// Split a contiguous I420 buffer (Y, then U, then V).
    pub fn from_i420(data: &[u8], width: u32, height: u32) -> Result<Self> {
        let luma = luma_len(width, height)?;
        let chroma = chroma_len(width, height)?;
        let expected = luma + 2 * chroma;
        if data.len() != expected {
            return Err(invalid(format!(
                "I420 buffer holds {} bytes, {}x{} needs {}",
                data.len(),
                width,
                height,
                expected
            )));
        }
        let (y, rest) = data.split_at(luma);
        let (u, v) = rest.split_at(chroma);
        Self::new(y.to_vec(), u.to_vec(), v.to_vec(), width, height)
    }

    /// Split a contiguous NV21 buffer (Y, then interleaved V/U) into the
    /// pixel-stride-2 plane views a camera would hand out.
    pub fn from_nv21(data: &[u8], width: u32, height: u32) -> Result<Self> {
        let luma = luma_len(width, height)?;
        let chroma = chroma_len(width, height)?;
        let expected = luma + 2 * chroma;
        if data.len() != expected {
            return Err(invalid(format!(
                "NV21 buffer holds {} bytes, {}x{} needs {}",
                data.len(),
                width,
                height,
                expected
            )));
        }
        let vu = &data[luma..];
        let v = vu[..vu.len() - 1].to_vec();
        let u = vu[1..].to_vec();
        Self::new(data[..luma].to_vec(), u, v, width, height)
    }

    pub fn y_plane(&self) -> &[u8] {
        &self.y
    }

    pub fn u_plane(&self) -> &[u8] {
        &self.u
    }

    pub fn v_plane(&self) -> &[u8] {
        &self.v
    }

    /// Number of chroma samples per plane: `ceil(w/2) * ceil(h/2)`.
    pub fn chroma_samples(&self) -> usize {
        let (cw, ch) = chroma_dims(self.width, self.height);
        cw * ch
    }

    /// Resolve `Auto` and check the planes are large enough for the layout.
    pub fn resolve_layout(&self, requested: ChromaLayout) -> Result<ChromaLayout> {
        let samples = self.chroma_samples();
        let interleaved_len = 2 * samples - 1;
        let fits_planar = self.u.len() >= samples && self.v.len() >= samples;
        let fits_interleaved = self.u.len() >= interleaved_len && self.v.len() >= interleaved_len;

        let layout = match requested {
            ChromaLayout::Auto if samples > 1 && fits_interleaved => ChromaLayout::Interleaved,
            ChromaLayout::Auto => ChromaLayout::Planar,
            explicit => explicit,
        };
        let fits = match layout {
            ChromaLayout::Interleaved => fits_interleaved,
            _ => fits_planar,
        };
        if !fits {
            return Err(invalid(format!(
                "chroma planes hold {}/{} bytes, too short for {:?} {}x{}",
                self.u.len(),
                self.v.len(),
                layout,
                self.width,
                self.height
            )));
        }
        Ok(layout)
    }

    /// U and V sample for chroma index `k` under a resolved layout.
    pub(crate) fn chroma_at(&self, layout: ChromaLayout, k: usize) -> (u8, u8) {
        match layout {
            ChromaLayout::Interleaved => (self.u[2 * k], self.v[2 * k]),
            _ => (self.u[k], self.v[k]),
        }
    }
}

impl fmt::Debug for YuvFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Pixel content is never printed.
        f.debug_struct("YuvFrame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("y_len", &self.y.len())
            .field("u_len", &self.u.len())
            .field("v_len", &self.v.len())
            .finish()
    }
}

pub(crate) fn chroma_dims(width: u32, height: u32) -> (usize, usize) {
    (width.div_ceil(2) as usize, height.div_ceil(2) as usize)
}

fn luma_len(width: u32, height: u32) -> Result<usize> {
    (width as usize)
        .checked_mul(height as usize)
        .ok_or_else(|| invalid("frame dimensions overflow".to_string()))
}

fn chroma_len(width: u32, height: u32) -> Result<usize> {
    let (cw, ch) = chroma_dims(width, height);
    cw.checked_mul(ch)
        .ok_or_else(|| invalid("frame dimensions overflow".to_string()))
}

fn invalid(reason: String) -> anyhow::Error {
    DetectorFault::InvalidFrame(reason).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::fault_of;

    #[test]
    fn rotation_normalizes_degrees() {
        assert_eq!(Rotation::from_degrees(90).unwrap().quarter_turns(), 1);
        assert_eq!(Rotation::from_degrees(-90).unwrap().quarter_turns(), 3);
        assert_eq!(Rotation::from_degrees(450).unwrap().quarter_turns(), 1);
        assert_eq!(Rotation::from_degrees(0).unwrap(), Rotation::NONE);
        assert!(Rotation::from_degrees(45).is_err());
        assert!(Rotation::from_degrees(270).unwrap().is_transposing());
        assert!(!Rotation::from_degrees(180).unwrap().is_transposing());
    }

    #[test]
    fn plane_list_must_hold_three_planes() {
        let err = YuvFrame::from_planes(vec![vec![0; 4], vec![0; 1]], 2, 2).unwrap_err();
        assert!(matches!(fault_of(&err), Some(DetectorFault::InvalidFrame(_))));
        assert!(err.to_string().contains("expected 3 planes"));
    }

    #[test]
    fn rejects_zero_dimensions_and_short_luma() {
        assert!(YuvFrame::new(vec![], vec![], vec![], 0, 4).is_err());
        let err = YuvFrame::new(vec![0; 3], vec![0; 1], vec![0; 1], 2, 2).unwrap_err();
        assert!(err.to_string().contains("Y plane holds 3 bytes"));
    }

    #[test]
    fn auto_layout_follows_plane_sizes() {
        let planar = YuvFrame::new(vec![0; 16], vec![0; 4], vec![0; 4], 4, 4).unwrap();
        assert_eq!(
            planar.resolve_layout(ChromaLayout::Auto).unwrap(),
            ChromaLayout::Planar
        );

        let strided = YuvFrame::new(vec![0; 16], vec![0; 7], vec![0; 7], 4, 4).unwrap();
        assert_eq!(
            strided.resolve_layout(ChromaLayout::Auto).unwrap(),
            ChromaLayout::Interleaved
        );

        let short = YuvFrame::new(vec![0; 16], vec![0; 2], vec![0; 4], 4, 4).unwrap();
        assert!(short.resolve_layout(ChromaLayout::Auto).is_err());
        assert!(planar.resolve_layout(ChromaLayout::Interleaved).is_err());
    }

    #[test]
    fn nv21_split_yields_strided_views() {
        // 2x2 image: one chroma sample, V=10 then U=20.
        let frame = YuvFrame::from_nv21(&[1, 2, 3, 4, 10, 20], 2, 2).unwrap();
        assert_eq!(frame.v_plane(), &[10]);
        assert_eq!(frame.u_plane(), &[20]);

        // 4x2 image: two chroma samples interleaved as V0 U0 V1 U1.
        let frame =
            YuvFrame::from_nv21(&[0, 0, 0, 0, 0, 0, 0, 0, 10, 20, 11, 21], 4, 2).unwrap();
        assert_eq!(
            frame.resolve_layout(ChromaLayout::Auto).unwrap(),
            ChromaLayout::Interleaved
        );
        assert_eq!(frame.chroma_at(ChromaLayout::Interleaved, 0), (20, 10));
        assert_eq!(frame.chroma_at(ChromaLayout::Interleaved, 1), (21, 11));
    }

    #[test]
    fn i420_split_checks_length() {
        let frame = YuvFrame::from_i420(&[0, 0, 0, 0, 5, 6], 2, 2).unwrap();
        assert_eq!(frame.chroma_at(ChromaLayout::Planar, 0), (5, 6));
        assert!(YuvFrame::from_i420(&[0; 5], 2, 2).is_err());
    }

    #[test]
    fn layout_parses_aliases() {
        assert_eq!("NV21".parse::<ChromaLayout>().unwrap(), ChromaLayout::Interleaved);
        assert_eq!("i420".parse::<ChromaLayout>().unwrap(), ChromaLayout::Planar);
        assert!("yuyv".parse::<ChromaLayout>().is_err());
    }
}
