//! Format normalizer: decoder pictures in, consumer frames out.
//!
//! The target format is picked from the first video frame and kept for the
//! session. A converter only exists when the decoder's native format is not
//! one the consumer accepts.

use tracing::{debug, warn};

use crate::error::Result;
use crate::frame::{RawPicture, VideoFrame};
use crate::pixel_convert::{
    restore_top_down, ColorParams, ColorRange, ColorSpace, PixelConverter, PixelFormat,
};

pub struct FormatNormalizer {
    force_range: ColorRange,
    linear_alpha: bool,
    source: Option<PixelFormat>,
    target: Option<PixelFormat>,
    converter: Option<PixelConverter>,
    cur_space: Option<ColorSpace>,
    cur_range: Option<ColorRange>,
    params: ColorParams,
}

impl FormatNormalizer {
    pub fn new(force_range: ColorRange) -> Self {
        Self {
            force_range,
            linear_alpha: false,
            source: None,
            target: None,
            converter: None,
            cur_space: None,
            cur_range: None,
            params: ColorParams::derive(ColorSpace::BT601, ColorRange::Partial),
        }
    }

    /// Mark every delivered frame as carrying linear alpha.
    pub fn with_linear_alpha(mut self, linear_alpha: bool) -> Self {
        self.linear_alpha = linear_alpha;
        self
    }

    /// Consumer format chosen for this session, once the first frame was seen.
    pub fn target(&self) -> Option<PixelFormat> {
        self.target
    }

    pub fn has_converter(&self) -> bool {
        self.converter.is_some()
    }

    /// Choose the target format for the stream. A converter that cannot be
    /// built here means no video can ever be delivered.
    pub fn prepare(&mut self, picture: &RawPicture) -> Result<()> {
        if self.target.is_some() {
            return Ok(());
        }

        let target = picture.format.closest_format();
        if target != picture.format {
            let converter = match PixelConverter::new(
                picture.format,
                target,
                picture.width as usize,
                picture.height as usize,
                picture.color_space,
                self.effective_range(picture),
            ) {
                Ok(converter) => converter,
                Err(e) => {
                    warn!("Failed to initialize scaler: {}", e);
                    return Err(e);
                }
            };
            debug!(
                "Converting {:?} -> {:?} at {}x{}",
                picture.format, target, picture.width, picture.height
            );
            self.converter = Some(converter);
        }

        self.source = Some(picture.format);
        self.target = Some(target);
        Ok(())
    }

    /// Normalize one picture. `Ok(None)` means this frame is dropped.
    pub fn normalize(&mut self, picture: &RawPicture, dec_pts: i64) -> Result<Option<VideoFrame>> {
        self.prepare(picture)?;
        let target = match self.target {
            Some(target) => target,
            None => return Ok(None),
        };

        let (planes, linesize, flip) = if self.converter.is_some() {
            if !self.fit_converter(picture) {
                return Ok(None);
            }
            let converter = match self.converter.as_ref() {
                Some(converter) => converter,
                None => return Ok(None),
            };
            match converter.convert(picture) {
                Ok(out) => (out.planes, out.linesize, false),
                Err(e) => {
                    debug!("Dropping video frame: {}", e);
                    return Ok(None);
                }
            }
        } else {
            if picture.format != target {
                debug!(
                    "Dropping video frame: format changed {:?} -> {:?}",
                    target, picture.format
                );
                return Ok(None);
            }
            match picture.planes.as_slice() {
                // Packed bottom-up: hand out the same buffer, flagged
                [plane] if plane.stride < 0 => (
                    vec![plane.data.clone()],
                    vec![plane.stride.unsigned_abs()],
                    true,
                ),
                planes if planes.iter().any(|p| p.stride < 0) => {
                    let out = restore_top_down(picture);
                    (out.planes, out.linesize, false)
                }
                planes => (
                    planes.iter().map(|p| p.data.clone()).collect(),
                    planes.iter().map(|p| p.stride.unsigned_abs()).collect(),
                    false,
                ),
            }
        };

        self.update_color(picture);

        Ok(Some(VideoFrame {
            planes,
            linesize,
            width: picture.width,
            height: picture.height,
            format: target,
            color_matrix: self.params.matrix,
            color_range_min: self.params.range_min,
            color_range_max: self.params.range_max,
            full_range: self.params.full_range,
            timestamp: 0,
            flip,
            linear_alpha: self.linear_alpha,
            dec_pts,
        }))
    }

    fn effective_range(&self, picture: &RawPicture) -> ColorRange {
        let range = match self.force_range {
            ColorRange::Default => picture.color_range,
            forced => forced,
        };
        match range {
            ColorRange::Default => ColorRange::Partial,
            other => other,
        }
    }

    /// Rebuild the converter when the stream changes size mid-playback.
    fn fit_converter(&mut self, picture: &RawPicture) -> bool {
        let (width, height) = (picture.width as usize, picture.height as usize);
        let current = match self.converter.as_ref() {
            Some(converter) => converter.dimensions(),
            None => return false,
        };
        if current == (width, height) {
            return true;
        }

        let (source, target) = match (self.source, self.target) {
            (Some(source), Some(target)) => (source, target),
            _ => return false,
        };
        match PixelConverter::new(
            source,
            target,
            width,
            height,
            picture.color_space,
            self.effective_range(picture),
        ) {
            Ok(converter) => {
                debug!("Scaler resized to {}x{}", width, height);
                self.converter = Some(converter);
                true
            }
            Err(e) => {
                debug!("Dropping video frame: {}", e);
                false
            }
        }
    }

    fn update_color(&mut self, picture: &RawPicture) {
        let space = picture.color_space.output_space();
        let range = self.effective_range(picture);
        if self.cur_space == Some(space) && self.cur_range == Some(range) {
            return;
        }
        self.params = ColorParams::derive(space, range);
        self.cur_space = Some(space);
        self.cur_range = Some(range);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::PicturePlane;
    use bytes::Bytes;

    fn packed(format: PixelFormat, width: u32, height: u32, stride: isize) -> RawPicture {
        let pitch = stride.unsigned_abs();
        RawPicture {
            planes: vec![PicturePlane {
                data: Bytes::from(vec![9u8; pitch * height as usize]),
                stride,
            }],
            width,
            height,
            format,
            color_space: ColorSpace::BT709,
            color_range: ColorRange::Default,
            keyframe: true,
        }
    }

    #[test]
    fn test_linear_alpha_flag_carried() {
        let picture = packed(PixelFormat::BGRA32, 4, 2, 16);
        let mut plain = FormatNormalizer::new(ColorRange::Default);
        assert!(!plain.normalize(&picture, 0).unwrap().unwrap().linear_alpha);

        let mut linear = FormatNormalizer::new(ColorRange::Default).with_linear_alpha(true);
        assert!(linear.normalize(&picture, 0).unwrap().unwrap().linear_alpha);
    }

    #[test]
    fn test_identity_has_no_converter() {
        let mut normalizer = FormatNormalizer::new(ColorRange::Default);
        let picture = packed(PixelFormat::BGRA32, 4, 2, 16);
        let frame = normalizer.normalize(&picture, 0).unwrap().unwrap();
        assert!(!normalizer.has_converter());
        assert_eq!(frame.format, PixelFormat::BGRA32);
        assert_eq!(frame.linesize, vec![16]);
        assert!(!frame.flip);
        // Same allocation, no copy
        assert_eq!(frame.planes[0].as_ptr(), picture.planes[0].data.as_ptr());
    }

    #[test]
    fn test_negative_stride_flips_without_copy() {
        let mut normalizer = FormatNormalizer::new(ColorRange::Default);
        let picture = packed(PixelFormat::BGRX32, 4, 3, -16);
        let frame = normalizer.normalize(&picture, 0).unwrap().unwrap();
        assert!(frame.flip);
        assert_eq!(frame.linesize, vec![16]);
        assert_eq!(frame.planes[0].as_ptr(), picture.planes[0].data.as_ptr());
    }

    #[test]
    fn test_converted_frames_are_not_flipped() {
        let mut normalizer = FormatNormalizer::new(ColorRange::Default);
        let picture = packed(PixelFormat::RGB24, 4, 3, -12);
        let frame = normalizer.normalize(&picture, 5).unwrap().unwrap();
        assert!(normalizer.has_converter());
        assert_eq!(frame.format, PixelFormat::RGBA32);
        assert!(!frame.flip);
        assert_eq!(frame.linesize, vec![16]);
        assert_eq!(frame.dec_pts, 5);
    }

    #[test]
    fn test_force_range_wins() {
        let mut normalizer = FormatNormalizer::new(ColorRange::Full);
        let frame = normalizer
            .normalize(&packed(PixelFormat::BGRA32, 2, 2, 8), 0)
            .unwrap()
            .unwrap();
        assert!(frame.full_range);

        let mut normalizer = FormatNormalizer::new(ColorRange::Default);
        let mut picture = packed(PixelFormat::BGRA32, 2, 2, 8);
        picture.color_range = ColorRange::Full;
        assert!(normalizer.normalize(&picture, 0).unwrap().unwrap().full_range);
        picture.color_range = ColorRange::Default;
        assert!(!normalizer.normalize(&picture, 0).unwrap().unwrap().full_range);
    }

    #[test]
    fn test_resize_rebuilds_converter() {
        let mut normalizer = FormatNormalizer::new(ColorRange::Default);
        normalizer
            .normalize(&packed(PixelFormat::RGB24, 4, 2, 12), 0)
            .unwrap()
            .unwrap();
        let frame = normalizer
            .normalize(&packed(PixelFormat::RGB24, 8, 2, 24), 1)
            .unwrap()
            .unwrap();
        assert_eq!(frame.width, 8);
        assert_eq!(frame.linesize, vec![32]);
    }

    #[test]
    fn test_format_switch_drops_frame() {
        let mut normalizer = FormatNormalizer::new(ColorRange::Default);
        normalizer
            .normalize(&packed(PixelFormat::BGRA32, 2, 2, 8), 0)
            .unwrap()
            .unwrap();
        let dropped = normalizer
            .normalize(&packed(PixelFormat::RGBA32, 2, 2, 8), 1)
            .unwrap();
        assert!(dropped.is_none());
    }
}
