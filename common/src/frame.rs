/// Sensor resolution in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub rows: usize,
    pub cols: usize,
}

impl Resolution {
    /// FLIR Lepton 3 resolution.
    pub const LEPTON3: Resolution = Resolution {
        rows: 120,
        cols: 160,
    };

    pub fn new(rows: usize, cols: usize) -> Self {
        Self { rows, cols }
    }

    pub fn pixel_count(&self) -> usize {
        self.rows * self.cols
    }
}

impl Default for Resolution {
    fn default() -> Self {
        Self::LEPTON3
    }
}

/// One raw thermal frame: `rows * cols` 16-bit samples, row-major.
///
/// Sample values are proportional to the temperature reported by the sensor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    resolution: Resolution,
    pixels: Vec<u16>,
}

impl Frame {
    /// A frame with every sample set to zero.
    pub fn zeroed(resolution: Resolution) -> Self {
        Self::filled(resolution, 0)
    }

    /// A frame with every sample set to `value`.
    pub fn filled(resolution: Resolution, value: u16) -> Self {
        Self {
            resolution,
            pixels: vec![value; resolution.pixel_count()],
        }
    }

    /// Wrap an existing row-major sample buffer.
    pub fn from_pixels(resolution: Resolution, pixels: Vec<u16>) -> Result<Self, FrameError> {
        if pixels.len() != resolution.pixel_count() {
            return Err(FrameError::PixelCount {
                got: pixels.len(),
                expected: resolution.pixel_count(),
            });
        }
        Ok(Self { resolution, pixels })
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    pub fn rows(&self) -> usize {
        self.resolution.rows
    }

    pub fn cols(&self) -> usize {
        self.resolution.cols
    }

    /// Sample at row `y`, column `x`. Panics when out of bounds.
    #[inline]
    pub fn get(&self, y: usize, x: usize) -> u16 {
        self.pixels[y * self.resolution.cols + x]
    }

    #[inline]
    pub fn set(&mut self, y: usize, x: usize, value: u16) {
        self.pixels[y * self.resolution.cols + x] = value;
    }

    pub fn pixels(&self) -> &[u16] {
        &self.pixels
    }

    pub fn pixels_mut(&mut self) -> &mut [u16] {
        &mut self.pixels
    }

    /// Overwrite this frame's samples with `other`'s without reallocating.
    pub fn copy_from(&mut self, other: &Frame) {
        debug_assert_eq!(self.resolution, other.resolution);
        self.pixels.copy_from_slice(&other.pixels);
    }

    /// Smallest and largest sample in the frame.
    pub fn min_max(&self) -> (u16, u16) {
        self.pixels
            .iter()
            .fold((u16::MAX, u16::MIN), |(lo, hi), &v| (lo.min(v), hi.max(v)))
    }

    /// Sum of every sample. Cheap content fingerprint used to skip duplicate work.
    pub fn checksum(&self) -> u64 {
        self.pixels.iter().map(|&v| v as u64).sum()
    }
}

/// A frame as delivered by the sensor daemon, with capture metadata.
///
/// Binary format (socket stream and recording files):
///   [0..8]   captured_at_ms  (i64 big-endian, Unix millis)
///   [8..16]  seq             (u64 big-endian, sequence number)
///   [16..18] rows            (u16 big-endian)
///   [18..20] cols            (u16 big-endian)
///   [20..]   samples         (rows * cols u16 big-endian, row-major)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimestampedFrame {
    pub frame: Frame,
    pub captured_at_ms: i64,
    pub seq: u64,
}

pub const HEADER_SIZE: usize = 20;

impl TimestampedFrame {
    pub fn new(frame: Frame, captured_at_ms: i64, seq: u64) -> Self {
        Self {
            frame,
            captured_at_ms,
            seq,
        }
    }

    /// Size in bytes of one encoded record at the given resolution.
    pub fn encoded_len(resolution: Resolution) -> usize {
        HEADER_SIZE + resolution.pixel_count() * 2
    }

    pub fn serialize(&self) -> Vec<u8> {
        let resolution = self.frame.resolution();
        let mut buf = Vec::with_capacity(Self::encoded_len(resolution));
        self.serialize_into(&mut buf);
        buf
    }

    /// Append the encoded record to `buf`.
    pub fn serialize_into(&self, buf: &mut Vec<u8>) {
        let resolution = self.frame.resolution();
        buf.extend_from_slice(&self.captured_at_ms.to_be_bytes());
        buf.extend_from_slice(&self.seq.to_be_bytes());
        buf.extend_from_slice(&(resolution.rows as u16).to_be_bytes());
        buf.extend_from_slice(&(resolution.cols as u16).to_be_bytes());
        for v in self.frame.pixels() {
            buf.extend_from_slice(&v.to_be_bytes());
        }
    }

    /// Decode one record, rejecting frames that do not match `expected`.
    pub fn deserialize(data: &[u8], expected: Resolution) -> Result<Self, FrameError> {
        if data.len() < HEADER_SIZE {
            return Err(FrameError::TooShort {
                got: data.len(),
                expected: HEADER_SIZE,
            });
        }

        let captured_at_ms = i64::from_be_bytes(read_array(&data[0..8]));
        let seq = u64::from_be_bytes(read_array(&data[8..16]));
        let rows = u16::from_be_bytes(read_array(&data[16..18])) as usize;
        let cols = u16::from_be_bytes(read_array(&data[18..20])) as usize;
        let resolution = Resolution::new(rows, cols);
        if resolution != expected {
            return Err(FrameError::ResolutionMismatch {
                rows,
                cols,
                expected_rows: expected.rows,
                expected_cols: expected.cols,
            });
        }

        let total = Self::encoded_len(resolution);
        if data.len() < total {
            return Err(FrameError::TooShort {
                got: data.len(),
                expected: total,
            });
        }

        let pixels = data[HEADER_SIZE..total]
            .chunks_exact(2)
            .map(|b| u16::from_be_bytes([b[0], b[1]]))
            .collect();

        Ok(Self {
            frame: Frame::from_pixels(resolution, pixels)?,
            captured_at_ms,
            seq,
        })
    }
}

fn read_array<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(bytes);
    out
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("frame payload too short: got {got} bytes, expected at least {expected}")]
    TooShort { got: usize, expected: usize },
    #[error("frame is {rows}x{cols}, expected {expected_rows}x{expected_cols}")]
    ResolutionMismatch {
        rows: usize,
        cols: usize,
        expected_rows: usize,
        expected_cols: usize,
    },
    #[error("frame has {got} samples, expected {expected}")]
    PixelCount { got: usize, expected: usize },
}
