// PIXEL CONVERT - Decoder output to consumer formats
//
// Decoders hand us whatever their native layout is. The consumer accepts a
// small fixed set of formats; everything else gets converted into the
// nearest one of those. Conversions are CPU-side and allocation-per-frame,
// with pre-computed lookup tables for the YUV to RGB case.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{MediaError, Result};
use crate::frame::{PicturePlane, RawPicture};

// ============================================================================
// Pixel Formats
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelFormat {
    // YUV planar
    YUV420P,      // Y plane, U plane (quarter size), V plane (quarter size)
    YUV420P10LE,  // 10-bit per component, 2 bytes per sample
    YUV422P,      // Y plane, U plane (half width), V plane (half width)
    YUV444P,      // Y plane, U plane (full size), V plane (full size)
    YUVA420P,     // YUV420P plus full size alpha plane

    // YUV semi-planar
    NV12,         // Y plane, interleaved UV plane
    P010,         // 10-bit NV12, samples in the high bits

    // YUV packed
    YUY2,         // Y0 U Y1 V
    UYVY,         // U Y0 V Y1

    // RGB
    RGB24,
    BGR24,
    RGBA32,
    BGRA32,
    BGRX32,       // BGRA with the alpha byte ignored
}

impl PixelFormat {
    /// Formats the consumer takes without conversion.
    pub fn is_consumer_format(&self) -> bool {
        matches!(
            self,
            Self::YUV420P
                | Self::YUV444P
                | Self::NV12
                | Self::YUY2
                | Self::UYVY
                | Self::RGBA32
                | Self::BGRA32
                | Self::BGRX32
        )
    }

    /// Nearest consumer format. Identity when already accepted.
    pub fn closest_format(&self) -> PixelFormat {
        match self {
            Self::YUV420P10LE => Self::YUV420P,
            Self::P010 => Self::NV12,
            Self::YUV422P => Self::YUY2,
            Self::RGB24 => Self::RGBA32,
            Self::BGR24 => Self::BGRX32,
            Self::YUVA420P => Self::BGRA32,
            other => *other,
        }
    }

    pub fn plane_count(&self) -> usize {
        match self {
            Self::YUV420P | Self::YUV420P10LE | Self::YUV422P | Self::YUV444P => 3,
            Self::YUVA420P => 4,
            Self::NV12 | Self::P010 => 2,
            _ => 1,
        }
    }

    /// Bytes per pixel for packed formats, 0 for planar
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            Self::RGB24 | Self::BGR24 => 3,
            Self::RGBA32 | Self::BGRA32 | Self::BGRX32 => 4,
            Self::YUY2 | Self::UYVY => 2,
            _ => 0,
        }
    }

    pub fn is_yuv(&self) -> bool {
        !matches!(
            self,
            Self::RGB24 | Self::BGR24 | Self::RGBA32 | Self::BGRA32 | Self::BGRX32
        )
    }

    /// Rows stored in `plane` for a picture of `height` rows.
    pub fn plane_rows(&self, height: usize, plane: usize) -> usize {
        match (self, plane) {
            (Self::YUV420P | Self::YUV420P10LE | Self::YUVA420P, 1 | 2) => (height + 1) / 2,
            (Self::NV12 | Self::P010, 1) => (height + 1) / 2,
            _ => height,
        }
    }

    /// Minimum bytes one row of `plane` needs for a picture `width` wide.
    pub fn row_bytes(&self, width: usize, plane: usize) -> usize {
        let half = (width + 1) / 2;
        match (self, plane) {
            (Self::YUV420P | Self::YUV422P | Self::YUVA420P, 1 | 2) => half,
            (Self::YUV420P10LE, 0) => width * 2,
            (Self::YUV420P10LE, _) => half * 2,
            (Self::NV12, 1) => half * 2,
            (Self::P010, 0) => width * 2,
            (Self::P010, _) => half * 4,
            (Self::YUY2 | Self::UYVY, _) => half * 4,
            _ if self.bytes_per_pixel() > 0 => width * self.bytes_per_pixel(),
            _ => width,
        }
    }

    /// Calculate buffer size needed for a tightly packed picture
    pub fn buffer_size(&self, width: usize, height: usize) -> usize {
        (0..self.plane_count())
            .map(|p| self.row_bytes(width, p) * self.plane_rows(height, p))
            .sum()
    }
}

// ============================================================================
// Color Spaces / Ranges
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColorSpace {
    BT601,
    BT709,
    FCC,
    SMPTE170M,
    SMPTE240M,
    BT2020,
}

impl ColorSpace {
    /// (Kr, Kb) luma weights, Kg = 1 - Kr - Kb
    pub fn coefficients(&self) -> (f32, f32) {
        match self {
            Self::BT601 | Self::SMPTE170M => (0.299, 0.114),
            Self::BT709 => (0.2126, 0.0722),
            Self::FCC => (0.30, 0.11),
            Self::SMPTE240M => (0.212, 0.087),
            Self::BT2020 => (0.2627, 0.0593),
        }
    }

    /// Space advertised on delivered frames. Only BT.709 is carried through,
    /// everything else is presented as BT.601.
    pub fn output_space(&self) -> ColorSpace {
        match self {
            Self::BT709 => Self::BT709,
            _ => Self::BT601,
        }
    }

    /// YUV to RGB matrix on centred chroma
    pub fn yuv_to_rgb_matrix(&self) -> [[f32; 3]; 3] {
        let (wr, wb) = self.coefficients();
        let wg = 1.0 - wr - wb;

        let cr_r = 2.0 * (1.0 - wr);
        let cb_g = -2.0 * wb * (1.0 - wb) / wg;
        let cr_g = -2.0 * wr * (1.0 - wr) / wg;
        let cb_b = 2.0 * (1.0 - wb);

        [
            [1.0, 0.0, cr_r],
            [1.0, cb_g, cr_g],
            [1.0, cb_b, 0.0],
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ColorRange {
    /// Whatever the decoder reports; treated as partial when it reports nothing
    #[default]
    Default,
    Partial,
    Full,
}

impl ColorRange {
    pub fn is_full(&self) -> bool {
        matches!(self, Self::Full)
    }
}

/// Colour metadata attached to every delivered frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColorParams {
    /// Row-major 4x4, rows R G B A, columns Y Cb Cr 1
    pub matrix: [f32; 16],
    pub range_min: [f32; 3],
    pub range_max: [f32; 3],
    pub full_range: bool,
}

impl ColorParams {
    pub fn derive(space: ColorSpace, range: ColorRange) -> Self {
        let full = range.is_full();
        let m = space.yuv_to_rgb_matrix();

        let (ys, cs, y_off) = if full {
            (1.0f32, 1.0f32, 0.0f32)
        } else {
            (255.0 / 219.0, 255.0 / 224.0, 16.0 / 255.0)
        };
        let c_off = 128.0f32 / 255.0;

        let mut matrix = [0.0f32; 16];
        for row in 0..3 {
            let cb = m[row][1] * cs;
            let cr = m[row][2] * cs;
            matrix[row * 4] = ys;
            matrix[row * 4 + 1] = cb;
            matrix[row * 4 + 2] = cr;
            matrix[row * 4 + 3] = -ys * y_off - (cb + cr) * c_off;
        }
        matrix[15] = 1.0;

        let (range_min, range_max) = if full {
            ([0.0; 3], [1.0; 3])
        } else {
            (
                [16.0 / 255.0; 3],
                [235.0 / 255.0, 240.0 / 255.0, 240.0 / 255.0],
            )
        };

        Self {
            matrix,
            range_min,
            range_max,
            full_range: full,
        }
    }
}

// ============================================================================
// Converter
// ============================================================================

/// Tightly packed output of one conversion.
#[derive(Debug, Clone)]
pub struct ConvertedPicture {
    pub planes: Vec<Bytes>,
    pub linesize: Vec<usize>,
}

pub struct PixelConverter {
    src_format: PixelFormat,
    dst_format: PixelFormat,
    width: usize,
    height: usize,
    // Pre-computed lookup tables, 8.8 fixed point
    y_table: [i32; 256],
    u_table_g: [i32; 256],
    u_table_b: [i32; 256],
    v_table_r: [i32; 256],
    v_table_g: [i32; 256],
}

impl PixelConverter {
    pub fn new(
        src_format: PixelFormat,
        dst_format: PixelFormat,
        width: usize,
        height: usize,
        color_space: ColorSpace,
        range: ColorRange,
    ) -> Result<Self> {
        let scaler_error = |reason: &str| MediaError::Scaler {
            src: format!("{:?}", src_format),
            dst: format!("{:?}", dst_format),
            reason: reason.to_string(),
        };

        if width == 0 || height == 0 {
            return Err(scaler_error("zero sized picture"));
        }
        if !Self::supports(src_format, dst_format) {
            return Err(scaler_error("no conversion path"));
        }

        let mut converter = Self {
            src_format,
            dst_format,
            width,
            height,
            y_table: [0; 256],
            u_table_g: [0; 256],
            u_table_b: [0; 256],
            v_table_r: [0; 256],
            v_table_g: [0; 256],
        };
        converter.build_tables(color_space, range);
        Ok(converter)
    }

    pub fn supports(src: PixelFormat, dst: PixelFormat) -> bool {
        matches!(
            (src, dst),
            (PixelFormat::YUV420P10LE, PixelFormat::YUV420P)
                | (PixelFormat::P010, PixelFormat::NV12)
                | (PixelFormat::YUV422P, PixelFormat::YUY2)
                | (PixelFormat::RGB24, PixelFormat::RGBA32)
                | (PixelFormat::BGR24, PixelFormat::BGRX32)
                | (PixelFormat::YUVA420P, PixelFormat::BGRA32)
        )
    }

    pub fn dimensions(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    pub fn dst_format(&self) -> PixelFormat {
        self.dst_format
    }

    fn build_tables(&mut self, color_space: ColorSpace, range: ColorRange) {
        let matrix = color_space.yuv_to_rgb_matrix();
        let (ys, cs, y_off) = if range.is_full() {
            (1.0f32, 1.0f32, 0)
        } else {
            (255.0 / 219.0, 255.0 / 224.0, 16)
        };

        for i in 0..256 {
            let y = (i as i32) - y_off;
            let uv = (i as f32) - 128.0;

            self.y_table[i] = (y as f32 * ys * 256.0) as i32;
            self.u_table_g[i] = (uv * cs * matrix[1][1] * 256.0) as i32;
            self.u_table_b[i] = (uv * cs * matrix[2][1] * 256.0) as i32;
            self.v_table_r[i] = (uv * cs * matrix[0][2] * 256.0) as i32;
            self.v_table_g[i] = (uv * cs * matrix[1][2] * 256.0) as i32;
        }
    }

    /// Convert one decoded picture. Source rows are read through their
    /// stride sign, so the output is always stored top-down.
    pub fn convert(&self, src: &RawPicture) -> Result<ConvertedPicture> {
        if src.format != self.src_format {
            return Err(MediaError::UnsupportedFormat(format!(
                "converter built for {:?}, got {:?}",
                self.src_format, src.format
            )));
        }
        if src.width as usize != self.width || src.height as usize != self.height {
            return Err(MediaError::UnsupportedFormat(format!(
                "converter built for {}x{}, got {}x{}",
                self.width, self.height, src.width, src.height
            )));
        }
        if src.planes.len() < self.src_format.plane_count() {
            return Err(MediaError::UnsupportedFormat(format!(
                "{:?} needs {} planes, got {}",
                self.src_format,
                self.src_format.plane_count(),
                src.planes.len()
            )));
        }

        let mut out: Vec<Vec<u8>> = (0..self.dst_format.plane_count())
            .map(|p| {
                vec![0u8; self.dst_format.row_bytes(self.width, p) * self.dst_format.plane_rows(self.height, p)]
            })
            .collect();

        match (self.src_format, self.dst_format) {
            (PixelFormat::YUV420P10LE, PixelFormat::YUV420P) => self.narrow_planar(src, &mut out),
            (PixelFormat::P010, PixelFormat::NV12) => self.p010_to_nv12(src, &mut out),
            (PixelFormat::YUV422P, PixelFormat::YUY2) => self.yuv422p_to_yuy2(src, &mut out),
            (PixelFormat::RGB24, PixelFormat::RGBA32) | (PixelFormat::BGR24, PixelFormat::BGRX32) => {
                self.expand_24_to_32(src, &mut out)
            }
            (PixelFormat::YUVA420P, PixelFormat::BGRA32) => self.yuva420p_to_bgra(src, &mut out),
            _ => {
                return Err(MediaError::UnsupportedFormat(format!(
                    "Unsupported conversion: {:?} -> {:?}",
                    self.src_format, self.dst_format
                )))
            }
        }

        let linesize = (0..self.dst_format.plane_count())
            .map(|p| self.dst_format.row_bytes(self.width, p))
            .collect();

        Ok(ConvertedPicture {
            planes: out.into_iter().map(Bytes::from).collect(),
            linesize,
        })
    }

    fn src_row<'a>(&self, src: &'a RawPicture, plane: usize, row: usize) -> &'a [u8] {
        let rows = self.src_format.plane_rows(self.height, plane);
        src.planes[plane].row(row, rows)
    }

    fn narrow_planar(&self, src: &RawPicture, out: &mut [Vec<u8>]) {
        for (plane, dst) in out.iter_mut().enumerate().take(3) {
            let pitch = self.dst_format.row_bytes(self.width, plane);
            for row in 0..self.dst_format.plane_rows(self.height, plane) {
                let line = self.src_row(src, plane, row);
                let dst_row = &mut dst[row * pitch..(row + 1) * pitch];
                for (x, sample) in line.chunks_exact(2).take(pitch).enumerate() {
                    let value = u16::from_le_bytes([sample[0], sample[1]]);
                    dst_row[x] = (value >> 2).min(255) as u8;
                }
            }
        }
    }

    fn p010_to_nv12(&self, src: &RawPicture, out: &mut [Vec<u8>]) {
        for (plane, dst) in out.iter_mut().enumerate().take(2) {
            let pitch = self.dst_format.row_bytes(self.width, plane);
            for row in 0..self.dst_format.plane_rows(self.height, plane) {
                let line = self.src_row(src, plane, row);
                let dst_row = &mut dst[row * pitch..(row + 1) * pitch];
                for (x, sample) in line.chunks_exact(2).take(pitch).enumerate() {
                    // Little endian, ten significant bits at the top
                    dst_row[x] = sample[1];
                }
            }
        }
    }

    fn yuv422p_to_yuy2(&self, src: &RawPicture, out: &mut [Vec<u8>]) {
        let pitch = self.dst_format.row_bytes(self.width, 0);
        let dst = &mut out[0];
        for row in 0..self.height {
            let y_line = self.src_row(src, 0, row);
            let u_line = self.src_row(src, 1, row);
            let v_line = self.src_row(src, 2, row);
            let dst_row = &mut dst[row * pitch..(row + 1) * pitch];

            for pair in 0..(self.width + 1) / 2 {
                let y0 = y_line.get(pair * 2).copied().unwrap_or(16);
                let y1 = y_line.get(pair * 2 + 1).copied().unwrap_or(y0);
                let idx = pair * 4;
                dst_row[idx] = y0;
                dst_row[idx + 1] = u_line.get(pair).copied().unwrap_or(128);
                dst_row[idx + 2] = y1;
                dst_row[idx + 3] = v_line.get(pair).copied().unwrap_or(128);
            }
        }
    }

    fn expand_24_to_32(&self, src: &RawPicture, out: &mut [Vec<u8>]) {
        let pitch = self.width * 4;
        let dst = &mut out[0];
        for row in 0..self.height {
            let line = self.src_row(src, 0, row);
            let dst_row = &mut dst[row * pitch..(row + 1) * pitch];
            for (px, rgb) in line.chunks_exact(3).take(self.width).enumerate() {
                let idx = px * 4;
                dst_row[idx..idx + 3].copy_from_slice(rgb);
                dst_row[idx + 3] = 255;
            }
        }
    }

    fn yuva420p_to_bgra(&self, src: &RawPicture, out: &mut [Vec<u8>]) {
        let pitch = self.width * 4;
        let bgra = &mut out[0];

        for y in 0..self.height {
            let y_line = self.src_row(src, 0, y);
            let u_line = self.src_row(src, 1, y / 2);
            let v_line = self.src_row(src, 2, y / 2);
            let a_line = self.src_row(src, 3, y);
            let dst_row = &mut bgra[y * pitch..(y + 1) * pitch];

            for x in 0..self.width {
                let y_val = y_line.get(x).copied().unwrap_or(16) as usize;
                let u_val = u_line.get(x / 2).copied().unwrap_or(128) as usize;
                let v_val = v_line.get(x / 2).copied().unwrap_or(128) as usize;

                let y_contrib = self.y_table[y_val];
                let r = ((y_contrib + self.v_table_r[v_val]) >> 8).clamp(0, 255) as u8;
                let g = ((y_contrib + self.u_table_g[u_val] + self.v_table_g[v_val]) >> 8)
                    .clamp(0, 255) as u8;
                let b = ((y_contrib + self.u_table_b[u_val]) >> 8).clamp(0, 255) as u8;

                let idx = x * 4;
                dst_row[idx] = b;
                dst_row[idx + 1] = g;
                dst_row[idx + 2] = r;
                dst_row[idx + 3] = a_line.get(x).copied().unwrap_or(255);
            }
        }
    }
}

/// Re-store planes with negative strides top-down. Used when no conversion
/// runs but the layout cannot be expressed with a flip flag.
pub fn restore_top_down(picture: &RawPicture) -> ConvertedPicture {
    let width = picture.width as usize;
    let height = picture.height as usize;
    let mut planes = Vec::with_capacity(picture.planes.len());
    let mut linesize = Vec::with_capacity(picture.planes.len());

    for (index, plane) in picture.planes.iter().enumerate() {
        let pitch = plane.stride.unsigned_abs();
        if plane.stride >= 0 {
            planes.push(plane.data.clone());
            linesize.push(pitch);
            continue;
        }
        let rows = picture.format.plane_rows(height, index);
        let mut data = Vec::with_capacity(pitch * rows);
        for row in 0..rows {
            let line = plane.row(row, rows);
            data.extend_from_slice(line);
            data.resize((row + 1) * pitch, 0);
        }
        planes.push(Bytes::from(data));
        linesize.push(pitch.max(picture.format.row_bytes(width, index)));
    }

    ConvertedPicture { planes, linesize }
}

/// Whether `plane` is stored bottom-up.
pub fn is_bottom_up(plane: &PicturePlane) -> bool {
    plane.stride < 0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn picture(format: PixelFormat, width: u32, height: u32, planes: Vec<PicturePlane>) -> RawPicture {
        RawPicture {
            planes,
            width,
            height,
            format,
            color_space: ColorSpace::BT601,
            color_range: ColorRange::Default,
            keyframe: true,
        }
    }

    #[test]
    fn test_closest_format_table() {
        assert_eq!(PixelFormat::YUV420P.closest_format(), PixelFormat::YUV420P);
        assert_eq!(PixelFormat::NV12.closest_format(), PixelFormat::NV12);
        assert_eq!(PixelFormat::YUV420P10LE.closest_format(), PixelFormat::YUV420P);
        assert_eq!(PixelFormat::P010.closest_format(), PixelFormat::NV12);
        assert_eq!(PixelFormat::YUV422P.closest_format(), PixelFormat::YUY2);
        assert_eq!(PixelFormat::RGB24.closest_format(), PixelFormat::RGBA32);
        assert_eq!(PixelFormat::BGR24.closest_format(), PixelFormat::BGRX32);
        assert_eq!(PixelFormat::YUVA420P.closest_format(), PixelFormat::BGRA32);

        for format in [
            PixelFormat::YUV420P10LE,
            PixelFormat::P010,
            PixelFormat::YUV422P,
            PixelFormat::RGB24,
            PixelFormat::BGR24,
            PixelFormat::YUVA420P,
        ] {
            assert!(format.closest_format().is_consumer_format());
            assert!(PixelConverter::supports(format, format.closest_format()));
        }
    }

    #[test]
    fn test_buffer_size() {
        assert_eq!(PixelFormat::YUV420P.buffer_size(4, 4), 16 + 4 + 4);
        assert_eq!(PixelFormat::NV12.buffer_size(4, 4), 16 + 8);
        assert_eq!(PixelFormat::YUY2.buffer_size(4, 2), 16);
        assert_eq!(PixelFormat::BGRA32.buffer_size(3, 3), 36);
    }

    #[test]
    fn test_bt601_partial_matrix() {
        let params = ColorParams::derive(ColorSpace::BT601, ColorRange::Partial);
        let expected = [1.164384, 0.0, 1.596027, -0.874202];
        for (got, want) in params.matrix[0..4].iter().zip(expected) {
            assert!((got - want).abs() < 1e-3, "{} vs {}", got, want);
        }
        assert!(!params.full_range);
        assert!((params.range_min[0] - 16.0 / 255.0).abs() < 1e-6);
        assert!((params.range_max[1] - 240.0 / 255.0).abs() < 1e-6);
        assert_eq!(params.matrix[15], 1.0);
    }

    #[test]
    fn test_full_range_params() {
        let params = ColorParams::derive(ColorSpace::BT709, ColorRange::Full);
        assert!(params.full_range);
        assert_eq!(params.range_min, [0.0; 3]);
        assert_eq!(params.range_max, [1.0; 3]);
        assert_eq!(params.matrix[0], 1.0);
    }

    #[test]
    fn test_converter_rejects_unknown_path() {
        let err = PixelConverter::new(
            PixelFormat::NV12,
            PixelFormat::RGBA32,
            16,
            16,
            ColorSpace::BT709,
            ColorRange::Partial,
        );
        assert!(matches!(err, Err(MediaError::Scaler { .. })));

        let err = PixelConverter::new(
            PixelFormat::RGB24,
            PixelFormat::RGBA32,
            0,
            16,
            ColorSpace::BT709,
            ColorRange::Partial,
        );
        assert!(matches!(err, Err(MediaError::Scaler { .. })));
    }

    #[test]
    fn test_rgb24_to_rgba_bottom_up() {
        // Two rows stored bottom-up: the last row in memory is the top row
        let data = Bytes::from(vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12]);
        let src = picture(
            PixelFormat::RGB24,
            2,
            2,
            vec![PicturePlane { data, stride: -6 }],
        );
        let converter = PixelConverter::new(
            PixelFormat::RGB24,
            PixelFormat::RGBA32,
            2,
            2,
            ColorSpace::BT601,
            ColorRange::Partial,
        )
        .unwrap();
        let out = converter.convert(&src).unwrap();
        assert_eq!(out.linesize, vec![8]);
        assert_eq!(
            &out.planes[0][..],
            &[7, 8, 9, 255, 10, 11, 12, 255, 1, 2, 3, 255, 4, 5, 6, 255]
        );
    }

    #[test]
    fn test_p010_takes_high_byte() {
        let y = Bytes::from(vec![0x00, 0x40, 0xC0, 0xEB]);
        let uv = Bytes::from(vec![0x00, 0x80, 0x00, 0x81]);
        let src = picture(
            PixelFormat::P010,
            2,
            1,
            vec![
                PicturePlane { data: y, stride: 4 },
                PicturePlane { data: uv, stride: 4 },
            ],
        );
        let converter = PixelConverter::new(
            PixelFormat::P010,
            PixelFormat::NV12,
            2,
            1,
            ColorSpace::BT709,
            ColorRange::Partial,
        )
        .unwrap();
        let out = converter.convert(&src).unwrap();
        assert_eq!(&out.planes[0][..], &[0x40, 0xEB]);
        assert_eq!(&out.planes[1][..], &[0x80, 0x81]);
    }

    #[test]
    fn test_ten_bit_narrowing() {
        let y = Bytes::from(vec![0xFF, 0x03, 0x40, 0x00]);
        let chroma = Bytes::from(vec![0x00, 0x02]);
        let src = picture(
            PixelFormat::YUV420P10LE,
            2,
            1,
            vec![
                PicturePlane { data: y, stride: 4 },
                PicturePlane { data: chroma.clone(), stride: 2 },
                PicturePlane { data: chroma, stride: 2 },
            ],
        );
        let converter = PixelConverter::new(
            PixelFormat::YUV420P10LE,
            PixelFormat::YUV420P,
            2,
            1,
            ColorSpace::BT601,
            ColorRange::Partial,
        )
        .unwrap();
        let out = converter.convert(&src).unwrap();
        assert_eq!(&out.planes[0][..], &[255, 16]);
        assert_eq!(&out.planes[1][..], &[128]);
    }

    #[test]
    fn test_yuv422p_packs_yuy2() {
        let src = picture(
            PixelFormat::YUV422P,
            2,
            1,
            vec![
                PicturePlane { data: Bytes::from(vec![10, 20]), stride: 2 },
                PicturePlane { data: Bytes::from(vec![30]), stride: 1 },
                PicturePlane { data: Bytes::from(vec![40]), stride: 1 },
            ],
        );
        let converter = PixelConverter::new(
            PixelFormat::YUV422P,
            PixelFormat::YUY2,
            2,
            1,
            ColorSpace::BT601,
            ColorRange::Partial,
        )
        .unwrap();
        let out = converter.convert(&src).unwrap();
        assert_eq!(&out.planes[0][..], &[10, 30, 20, 40]);
    }

    #[test]
    fn test_yuva_white_and_black() {
        let y = Bytes::from(vec![235, 16]);
        let chroma = Bytes::from(vec![128]);
        let alpha = Bytes::from(vec![255, 7]);
        let src = picture(
            PixelFormat::YUVA420P,
            2,
            1,
            vec![
                PicturePlane { data: y, stride: 2 },
                PicturePlane { data: chroma.clone(), stride: 1 },
                PicturePlane { data: chroma, stride: 1 },
                PicturePlane { data: alpha, stride: 2 },
            ],
        );
        let converter = PixelConverter::new(
            PixelFormat::YUVA420P,
            PixelFormat::BGRA32,
            2,
            1,
            ColorSpace::BT601,
            ColorRange::Partial,
        )
        .unwrap();
        let out = converter.convert(&src).unwrap();
        let px = &out.planes[0];
        assert!(px[0] >= 253 && px[1] >= 253 && px[2] >= 253);
        assert_eq!(px[3], 255);
        assert!(px[4] <= 2 && px[5] <= 2 && px[6] <= 2);
        assert_eq!(px[7], 7);
    }

    #[test]
    fn test_restore_top_down_planar() {
        let y = Bytes::from(vec![1, 1, 2, 2]);
        let src = picture(
            PixelFormat::YUV444P,
            2,
            2,
            vec![
                PicturePlane { data: y, stride: -2 },
                PicturePlane { data: Bytes::from(vec![5, 5, 5, 5]), stride: 2 },
                PicturePlane { data: Bytes::from(vec![6, 6, 6, 6]), stride: 2 },
            ],
        );
        assert!(is_bottom_up(&src.planes[0]));
        let out = restore_top_down(&src);
        assert_eq!(&out.planes[0][..], &[2, 2, 1, 1]);
        assert_eq!(out.linesize, vec![2, 2, 2]);
    }
}
