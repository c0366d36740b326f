use serde::{Deserialize, Serialize};

/// Canonical capture size of a slide bitmap.
pub const CANONICAL_WIDTH: u32 = 900;
pub const CANONICAL_HEIGHT: u32 = 500;

/// One chunk of source text destined to become one slide.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlideContentUnit {
    pub index: usize,
    pub text: String,
}

impl SlideContentUnit {
    pub fn new(index: usize, text: impl Into<String>) -> Self {
        Self {
            index,
            text: text.into(),
        }
    }
}

/// PNG-encoded capture of a rendered slide.
#[derive(Clone, PartialEq, Eq)]
pub struct Bitmap {
    pub width: u32,
    pub height: u32,
    pub png: Vec<u8>,
}

impl std::fmt::Debug for Bitmap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bitmap")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("png_bytes", &self.png.len())
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedSlide {
    pub html: String,
    pub bitmap: Bitmap,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlideOutcome {
    Pending,
    Accepted,
    ExhaustedFallback,
}

impl SlideOutcome {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SlideOutcome::Pending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SlideOutcome::Pending => "pending",
            SlideOutcome::Accepted => "accepted",
            SlideOutcome::ExhaustedFallback => "exhausted_fallback",
        }
    }
}

/// File stem used for slide `index` (zero-based) in every output directory.
pub fn slide_file_stem(index: usize) -> String {
    format!("slide_{:03}", index + 1)
}

#[cfg(test)]
mod tests {
    use super::{slide_file_stem, Bitmap, SlideOutcome};

    #[test]
    fn file_stems_sort_in_slide_order() {
        let mut stems: Vec<String> = [10, 1, 0, 99].iter().map(|index| slide_file_stem(*index)).collect();
        stems.sort();
        assert_eq!(stems, vec!["slide_001", "slide_002", "slide_011", "slide_100"]);
    }

    #[test]
    fn outcome_serializes_snake_case() -> anyhow::Result<()> {
        assert_eq!(
            serde_json::to_string(&SlideOutcome::ExhaustedFallback)?,
            "\"exhausted_fallback\""
        );
        assert!(!SlideOutcome::Pending.is_terminal());
        assert!(SlideOutcome::Accepted.is_terminal());
        Ok(())
    }

    #[test]
    fn bitmap_debug_omits_bytes() {
        let bitmap = Bitmap {
            width: 900,
            height: 500,
            png: vec![0; 4096],
        };
        assert_eq!(
            format!("{bitmap:?}"),
            "Bitmap { width: 900, height: 500, png_bytes: 4096 }"
        );
    }
}
