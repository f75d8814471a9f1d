use ndarray::ArrayView3;

/// Pixels as read from a video source: contiguous bytes in row-major order.
///
/// Sources may hand out gray, RGB or RGBA data; the sampler normalizes to
/// RGB when it draws onto its surface.
#[derive(Clone, Debug)]
pub struct RawImage {
    data: Vec<u8>,
    width: u32,
    height: u32,
    channels: u8,
}

impl RawImage {
    pub fn new(data: Vec<u8>, width: u32, height: u32, channels: u8) -> Self {
        debug_assert_eq!(
            data.len(),
            (width as usize) * (height as usize) * (channels as usize),
            "data length must equal width * height * channels"
        );
        Self {
            data,
            width,
            height,
            channels,
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn channels(&self) -> u8 {
        self.channels
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0 || self.data.is_empty()
    }

    /// `(height, width, channels)` view, or `None` if the buffer does not
    /// match the declared dimensions.
    pub fn as_ndarray(&self) -> Option<ArrayView3<'_, u8>> {
        ArrayView3::from_shape(
            (
                self.height as usize,
                self.width as usize,
                self.channels as usize,
            ),
            &self.data,
        )
        .ok()
    }
}

/// One sampled, downsampled RGB frame tagged with its sampling identity.
///
/// `frame_id` increases monotonically per sampler; `capture_ts` is the wall
/// clock (ms since the Unix epoch) at which the pixels were read.
#[derive(Clone, Debug)]
pub struct Frame {
    data: Vec<u8>,
    width: u32,
    height: u32,
    frame_id: u64,
    capture_ts: f64,
}

impl Frame {
    pub const CHANNELS: u8 = 3;

    pub fn new(data: Vec<u8>, width: u32, height: u32, frame_id: u64, capture_ts: f64) -> Self {
        debug_assert_eq!(
            data.len(),
            (width as usize) * (height as usize) * (Self::CHANNELS as usize),
            "data length must equal width * height * 3"
        );
        Self {
            data,
            width,
            height,
            frame_id,
            capture_ts,
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn frame_id(&self) -> u64 {
        self.frame_id
    }

    pub fn capture_ts(&self) -> f64 {
        self.capture_ts
    }
}
