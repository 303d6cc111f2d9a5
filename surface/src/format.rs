//! Pixel buffer layouts and format negotiation.

use std::fmt;

/// Upper bound on planes per frame buffer; covers every planar layout the
/// negotiator will accept.
pub const MAX_PLANES: usize = 8;

/// A four-character pixel format code, e.g. `RV32` or `I420`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FourCc([u8; 4]);

impl FourCc {
    /// Packed 32-bit RGBA, the fallback chroma.
    pub const RV32: Self = Self(*b"RV32");
    /// Planar YUV 4:2:0.
    pub const I420: Self = Self(*b"I420");

    /// Wrap a literal four-byte code.
    #[must_use]
    pub const fn new(code: [u8; 4]) -> Self {
        Self(code)
    }

    /// Parse a code from text, requiring exactly four printable ASCII bytes.
    ///
    /// # Errors
    /// Returns [`FormatError::BadFourCc`] otherwise.
    pub fn parse(text: &str) -> Result<Self, FormatError> {
        let bytes = text.as_bytes();
        if bytes.len() != 4 || !bytes.iter().all(|b| (0x20..0x7f).contains(b)) {
            return Err(FormatError::BadFourCc(text.into()));
        }
        Ok(Self([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// The raw four bytes, in memory order.
    #[must_use]
    pub const fn bytes(&self) -> [u8; 4] {
        self.0
    }
}

impl fmt::Display for FourCc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in self.0 {
            write!(f, "{}", b as char)?;
        }
        Ok(())
    }
}

/// Why a buffer format failed validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FormatError {
    /// A format code that is not four printable ASCII characters.
    #[error("malformed four-character code {0:?}")]
    BadFourCc(String),
    /// Width or height of zero.
    #[error("zero video dimension: {width}x{height}")]
    ZeroDimension {
        /// Requested width.
        width: u32,
        /// Requested height.
        height: u32,
    },
    /// `pitches` and `lines` lengths disagree.
    #[error("plane table mismatch: {pitches} pitches vs {lines} lines")]
    PlaneMismatch {
        /// Number of pitch entries.
        pitches: usize,
        /// Number of line entries.
        lines: usize,
    },
    /// No planes, or more than [`MAX_PLANES`].
    #[error("unsupported plane count {0}")]
    PlaneCount(usize),
    /// A pitch or line count of zero.
    #[error("zero pitch or line count in plane {0}")]
    ZeroPlane(usize),
}

/// An immutable, validated pixel buffer layout.
///
/// Invariant: `pitches.len() == lines.len() == plane_count()`, all dimensions
/// and per-plane values are non-zero. Construct through [`BufferFormat::new`]
/// or [`BufferFormat::packed`]; there is no way to mutate one afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferFormat {
    chroma: FourCc,
    width: u32,
    height: u32,
    pitches: Vec<u32>,
    lines: Vec<u32>,
}

impl BufferFormat {
    /// Validate and construct a multi-plane layout.
    ///
    /// # Errors
    /// Returns a [`FormatError`] for zero dimensions, mismatched or empty
    /// plane tables, or zero pitch/line entries.
    pub fn new(
        chroma: FourCc,
        width: u32,
        height: u32,
        pitches: Vec<u32>,
        lines: Vec<u32>,
    ) -> Result<Self, FormatError> {
        if width == 0 || height == 0 {
            return Err(FormatError::ZeroDimension { width, height });
        }
        if pitches.len() != lines.len() {
            return Err(FormatError::PlaneMismatch {
                pitches: pitches.len(),
                lines: lines.len(),
            });
        }
        if pitches.is_empty() || pitches.len() > MAX_PLANES {
            return Err(FormatError::PlaneCount(pitches.len()));
        }
        for (i, (&p, &l)) in pitches.iter().zip(&lines).enumerate() {
            if p == 0 || l == 0 {
                return Err(FormatError::ZeroPlane(i));
            }
        }
        Ok(Self {
            chroma,
            width,
            height,
            pitches,
            lines,
        })
    }

    /// A single-plane packed layout with `bytes_per_pixel` bytes per sample.
    ///
    /// # Errors
    /// Returns [`FormatError::ZeroDimension`] for a zero width, height or
    /// pixel size.
    pub fn packed(
        chroma: FourCc,
        width: u32,
        height: u32,
        bytes_per_pixel: u32,
    ) -> Result<Self, FormatError> {
        let pitch = width
            .checked_mul(bytes_per_pixel)
            .filter(|&p| p != 0)
            .ok_or(FormatError::ZeroDimension { width, height })?;
        Self::new(chroma, width, height, vec![pitch], vec![height])
    }

    /// The four-character pixel format code.
    #[must_use]
    pub const fn chroma(&self) -> FourCc {
        self.chroma
    }

    /// Buffer width in pixels.
    #[must_use]
    pub const fn width(&self) -> u32 {
        self.width
    }

    /// Buffer height in pixels.
    #[must_use]
    pub const fn height(&self) -> u32 {
        self.height
    }

    /// Number of planes.
    #[must_use]
    pub fn plane_count(&self) -> usize {
        self.pitches.len()
    }

    /// Per-plane row pitches in bytes.
    #[must_use]
    pub fn pitches(&self) -> &[u32] {
        &self.pitches
    }

    /// Per-plane row counts.
    #[must_use]
    pub fn lines(&self) -> &[u32] {
        &self.lines
    }

    /// Byte size of plane `i` (`pitch × lines`), if it fits in `usize`.
    #[must_use]
    pub fn plane_size(&self, i: usize) -> Option<usize> {
        let pitch = *self.pitches.get(i)? as usize;
        let lines = *self.lines.get(i)? as usize;
        pitch.checked_mul(lines)
    }

    /// Write this layout into engine-owned output parameters.
    ///
    /// `pitches` and `lines` must each have room for [`plane_count`] entries;
    /// this is the foreign-function boundary of format negotiation, and the
    /// destination memory is native scratch space owned by the engine.
    ///
    /// [`plane_count`]: Self::plane_count
    ///
    /// # Safety
    /// All pointers must be valid for writes of the stated sizes for the
    /// duration of the call.
    pub unsafe fn write_to_native(
        &self,
        chroma: *mut [u8; 4],
        width: *mut u32,
        height: *mut u32,
        pitches: *mut u32,
        lines: *mut u32,
    ) {
        unsafe {
            *chroma = self.chroma.bytes();
            *width = self.width;
            *height = self.height;
            for (i, (&p, &l)) in self.pitches.iter().zip(&self.lines).enumerate() {
                *pitches.add(i) = p;
                *lines.add(i) = l;
            }
        }
    }
}

/// Application-supplied policy choosing a buffer layout for a video source.
///
/// Invoked by the negotiator whenever the engine reports new source
/// dimensions. Implementations are external collaborators; the negotiator
/// validates nothing beyond what [`BufferFormat`] construction enforces and
/// falls back to a packed default if the policy fails.
pub trait SizingPolicy: Send + Sync {
    /// Choose the buffer layout for a source of the given size in pixels.
    ///
    /// # Errors
    /// Returning a [`FormatError`] makes the negotiator fall back to the
    /// default packed format sized to the source.
    fn choose_format(&self, source_width: u32, source_height: u32)
    -> Result<BufferFormat, FormatError>;
}

/// A policy that mirrors the source dimensions into a packed RV32 layout.
#[derive(Debug, Clone, Copy, Default)]
pub struct SourceSizePolicy;

impl SizingPolicy for SourceSizePolicy {
    fn choose_format(
        &self,
        source_width: u32,
        source_height: u32,
    ) -> Result<BufferFormat, FormatError> {
        BufferFormat::packed(FourCc::RV32, source_width, source_height, 4)
    }
}

/// Negotiates concrete buffer layouts with the native engine.
///
/// Invoked once per format change (initial setup or mid-stream resolution
/// change). Always produces a valid, non-zero-area layout: zero source
/// dimensions are clamped to 1 before the policy runs, and a failing policy
/// is replaced by the packed RV32 fallback.
pub struct FormatNegotiator {
    policy: Box<dyn SizingPolicy>,
}

impl FormatNegotiator {
    /// Build a negotiator around an application sizing policy.
    #[must_use]
    pub fn new(policy: Box<dyn SizingPolicy>) -> Self {
        Self { policy }
    }

    /// Negotiate the layout for the reported source dimensions.
    #[must_use]
    pub fn negotiate(&self, source_width: u32, source_height: u32) -> BufferFormat {
        // Zero dimensions occur before the first real frame.
        let width = source_width.max(1);
        let height = source_height.max(1);
        match self.policy.choose_format(width, height) {
            Ok(format) => format,
            Err(err) => {
                log::warn!("sizing policy rejected {width}x{height} ({err}); using packed fallback");
                Self::fallback(width, height)
            }
        }
    }

    /// The packed RV32 fallback layout for a (non-zero) source size.
    fn fallback(width: u32, height: u32) -> BufferFormat {
        // Infallible: both dimensions are non-zero and the pitch fits.
        BufferFormat::packed(FourCc::RV32, width, height, 4).unwrap_or_else(|_| BufferFormat {
            chroma: FourCc::RV32,
            width: 1,
            height: 1,
            pitches: vec![4],
            lines: vec![1],
        })
    }
}

impl Default for FormatNegotiator {
    fn default() -> Self {
        Self::new(Box::new(SourceSizePolicy))
    }
}

impl fmt::Debug for FormatNegotiator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FormatNegotiator").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mismatched_plane_tables_fail_validation() {
        let err = BufferFormat::new(FourCc::I420, 640, 480, vec![640, 320], vec![480])
            .unwrap_err();
        assert_eq!(
            err,
            FormatError::PlaneMismatch {
                pitches: 2,
                lines: 1
            }
        );
    }

    #[test]
    fn valid_single_plane_format_round_trips() {
        let format =
            BufferFormat::new(FourCc::RV32, 640, 480, vec![2560], vec![480]).unwrap();
        assert_eq!(format.plane_count(), 1);
        assert_eq!(format.width(), 640);
        assert_eq!(format.height(), 480);
        assert_eq!(format.plane_size(0), Some(2560 * 480));
    }

    #[test]
    fn zero_dimensions_fail_validation() {
        assert!(matches!(
            BufferFormat::packed(FourCc::RV32, 0, 480, 4),
            Err(FormatError::ZeroDimension { .. })
        ));
    }

    #[test]
    fn zero_pitch_fails_validation() {
        assert_eq!(
            BufferFormat::new(FourCc::I420, 2, 2, vec![2, 0], vec![2, 1]).unwrap_err(),
            FormatError::ZeroPlane(1)
        );
    }

    #[test]
    fn fourcc_parsing_rejects_bad_codes() {
        assert!(FourCc::parse("RV32").is_ok());
        assert!(FourCc::parse("RV3").is_err());
        assert!(FourCc::parse("RV320").is_err());
        assert!(FourCc::parse("RV\u{7f}2").is_err());
        assert_eq!(FourCc::parse("I420").unwrap().to_string(), "I420");
    }

    #[test]
    fn zero_source_negotiates_nonzero_fallback() {
        let negotiator = FormatNegotiator::default();
        let format = negotiator.negotiate(0, 0);
        assert!(format.width() >= 1 && format.height() >= 1);
        assert!(format.plane_size(0).unwrap() > 0);
    }

    struct BrokenPolicy;

    impl SizingPolicy for BrokenPolicy {
        fn choose_format(&self, w: u32, h: u32) -> Result<BufferFormat, FormatError> {
            Err(FormatError::ZeroDimension {
                width: w,
                height: h,
            })
        }
    }

    #[test]
    fn failing_policy_falls_back_to_packed_source_size() {
        let negotiator = FormatNegotiator::new(Box::new(BrokenPolicy));
        let format = negotiator.negotiate(320, 240);
        assert_eq!(format.chroma(), FourCc::RV32);
        assert_eq!(format.width(), 320);
        assert_eq!(format.height(), 240);
        assert_eq!(format.pitches(), &[320 * 4]);
        assert_eq!(format.lines(), &[240]);
    }

    #[test]
    fn writes_layout_into_out_parameters() {
        let format = BufferFormat::new(
            FourCc::I420,
            640,
            480,
            vec![640, 320, 320],
            vec![480, 240, 240],
        )
        .unwrap();

        let mut chroma = [0u8; 4];
        let mut width = 0u32;
        let mut height = 0u32;
        let mut pitches = [0u32; MAX_PLANES];
        let mut lines = [0u32; MAX_PLANES];
        unsafe {
            format.write_to_native(
                &raw mut chroma,
                &raw mut width,
                &raw mut height,
                pitches.as_mut_ptr(),
                lines.as_mut_ptr(),
            );
        }
        assert_eq!(&chroma, b"I420");
        assert_eq!((width, height), (640, 480));
        assert_eq!(&pitches[..3], &[640, 320, 320]);
        assert_eq!(&lines[..3], &[480, 240, 240]);
    }
}
