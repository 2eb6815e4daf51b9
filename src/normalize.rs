//! Parameter normalization.
//!
//! The three protocols describe image size differently: OpenAI and Anthropic
//! callers send a single free-form `size` token, Google callers send separate
//! `aspectRatio` / `imageSize` fields. Everything funnels through here into a
//! [`CanonicalImageRequest`]. Token parsing is total: anything unrecognized
//! becomes `None` ("unspecified") and the dispatcher fills in a default later.
//! The only hard failure is a missing prompt.

use crate::error::{GatewayError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Aspect ratios the backend model can render.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AspectRatio {
    #[default]
    #[serde(rename = "1:1")]
    Square,
    #[serde(rename = "2:3")]
    Portrait2x3,
    #[serde(rename = "3:2")]
    Landscape3x2,
    #[serde(rename = "3:4")]
    Portrait3x4,
    #[serde(rename = "4:3")]
    Landscape4x3,
    #[serde(rename = "4:5")]
    Portrait4x5,
    #[serde(rename = "5:4")]
    Landscape5x4,
    #[serde(rename = "9:16")]
    Tall9x16,
    #[serde(rename = "16:9")]
    Wide16x9,
    #[serde(rename = "21:9")]
    Ultrawide21x9,
}

const ASPECT_RATIOS: &[(AspectRatio, u32, u32)] = &[
    (AspectRatio::Square, 1, 1),
    (AspectRatio::Portrait2x3, 2, 3),
    (AspectRatio::Landscape3x2, 3, 2),
    (AspectRatio::Portrait3x4, 3, 4),
    (AspectRatio::Landscape4x3, 4, 3),
    (AspectRatio::Portrait4x5, 4, 5),
    (AspectRatio::Landscape5x4, 5, 4),
    (AspectRatio::Tall9x16, 9, 16),
    (AspectRatio::Wide16x9, 16, 9),
    (AspectRatio::Ultrawide21x9, 21, 9),
];

/// OpenAI-style pixel sizes whose ratio does not reduce to a supported one.
const PIXEL_SIZES: &[(&str, AspectRatio)] = &[
    ("1792x1024", AspectRatio::Wide16x9),
    ("1024x1792", AspectRatio::Tall9x16),
];

impl AspectRatio {
    /// Width and height terms of the ratio.
    #[must_use]
    pub fn terms(self) -> (u32, u32) {
        ASPECT_RATIOS
            .iter()
            .find(|(ratio, _, _)| *ratio == self)
            .map_or((1, 1), |&(_, w, h)| (w, h))
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Square => "1:1",
            Self::Portrait2x3 => "2:3",
            Self::Landscape3x2 => "3:2",
            Self::Portrait3x4 => "3:4",
            Self::Landscape4x3 => "4:3",
            Self::Portrait4x5 => "4:5",
            Self::Landscape5x4 => "5:4",
            Self::Tall9x16 => "9:16",
            Self::Wide16x9 => "16:9",
            Self::Ultrawide21x9 => "21:9",
        }
    }

    fn from_terms(w: u32, h: u32) -> Option<Self> {
        if w == 0 || h == 0 {
            return None;
        }
        let d = gcd(w, h);
        let (w, h) = (w / d, h / d);
        ASPECT_RATIOS
            .iter()
            .find(|&&(_, rw, rh)| rw == w && rh == h)
            .map(|&(ratio, _, _)| ratio)
    }

    /// Parse `W:H`. Ratios are reduced first, so `32:18` is `16:9`.
    #[must_use]
    pub fn parse(token: &str) -> Option<Self> {
        let (w, h) = token.trim().split_once(':')?;
        Self::from_terms(parse_term(w)?, parse_term(h)?)
    }

    /// Parse a `WxH` pixel size into the ratio it frames.
    #[must_use]
    pub fn parse_pixels(token: &str) -> Option<Self> {
        let token = token.trim().to_ascii_lowercase();
        if let Some(&(_, ratio)) = PIXEL_SIZES.iter().find(|(size, _)| *size == token) {
            return Some(ratio);
        }
        let (w, h) = token.split_once('x')?;
        Self::from_terms(parse_term(w)?, parse_term(h)?)
    }

    /// Pixel dimensions for this ratio at the given tier. The long edge is the
    /// tier's size; the short edge is rounded to a multiple of 8.
    #[must_use]
    pub fn dimensions(self, tier: ResolutionTier) -> (u32, u32) {
        let long = tier.long_edge();
        let (w, h) = self.terms();
        let scale = |num: u32, den: u32| -> u32 {
            let exact = f64::from(long) * f64::from(num) / f64::from(den);
            ((exact / 8.0).round() as u32) * 8
        };
        if w >= h {
            (long, scale(h, w))
        } else {
            (scale(w, h), long)
        }
    }
}

impl fmt::Display for AspectRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse output size bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ResolutionTier {
    #[default]
    #[serde(rename = "1K")]
    OneK,
    #[serde(rename = "2K")]
    TwoK,
    #[serde(rename = "4K")]
    FourK,
}

impl ResolutionTier {
    /// Case-insensitive `1k` / `2K` / `4k`.
    #[must_use]
    pub fn parse(token: &str) -> Option<Self> {
        match token.trim().to_ascii_uppercase().as_str() {
            "1K" => Some(Self::OneK),
            "2K" => Some(Self::TwoK),
            "4K" => Some(Self::FourK),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OneK => "1K",
            Self::TwoK => "2K",
            Self::FourK => "4K",
        }
    }

    /// Long edge in pixels.
    #[must_use]
    pub fn long_edge(self) -> u32 {
        match self {
            Self::OneK => 1024,
            Self::TwoK => 2048,
            Self::FourK => 4096,
        }
    }
}

impl fmt::Display for ResolutionTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    #[default]
    Standard,
    Hd,
}

impl Quality {
    /// Unknown or absent values are `Standard`.
    #[must_use]
    pub fn from_token(token: Option<&str>) -> Self {
        match token.map(|t| t.trim().to_ascii_lowercase()) {
            Some(t) if t == "hd" => Self::Hd,
            _ => Self::Standard,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::Hd => "hd",
        }
    }
}

/// How a caller expressed the desired size.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum SizeHint {
    #[default]
    Absent,
    /// One free-form token: `16:9`, `1k`, `1792x1024`, ...
    Token(String),
    /// Separate fields, Google style.
    Structured {
        aspect_ratio: Option<String>,
        image_size: Option<String>,
    },
}

impl SizeHint {
    fn resolve(&self) -> (Option<AspectRatio>, Option<ResolutionTier>) {
        match self {
            Self::Absent => (None, None),
            Self::Token(token) => classify_size_token(token),
            Self::Structured {
                aspect_ratio,
                image_size,
            } => {
                let aspect = aspect_ratio.as_deref().and_then(AspectRatio::parse);
                let tier = image_size.as_deref().and_then(ResolutionTier::parse);
                (aspect, tier)
            }
        }
    }
}

/// Fields an adapter pulled out of its wire format, before interpretation.
#[derive(Debug, Clone, Default)]
pub struct RawImageParams {
    pub model: String,
    pub prompt: Option<String>,
    pub size: SizeHint,
    pub quality: Option<String>,
    pub count: Option<u32>,
}

/// Protocol-agnostic image request. `None` on `aspect_ratio` / `resolution`
/// means unspecified; the dispatcher applies backend defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalImageRequest {
    pub model: String,
    pub prompt: String,
    pub aspect_ratio: Option<AspectRatio>,
    pub resolution: Option<ResolutionTier>,
    pub quality: Quality,
    pub count: u32,
}

/// Classify a single size token. Never fails.
#[must_use]
pub fn classify_size_token(token: &str) -> (Option<AspectRatio>, Option<ResolutionTier>) {
    let token = token.trim();
    if token.contains(':') {
        return (AspectRatio::parse(token), None);
    }
    if let Some(tier) = ResolutionTier::parse(token) {
        return (None, Some(tier));
    }
    (AspectRatio::parse_pixels(token), None)
}

/// Hints carried by a model-name suffix such as `-16x9-4k` or `-hd`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModelHints {
    pub base: String,
    pub aspect_ratio: Option<AspectRatio>,
    pub resolution: Option<ResolutionTier>,
    pub quality: Option<Quality>,
}

/// Strip `-16x9` / `-4k` / `-hd` style suffixes off a model name and return
/// the hints they carried.
#[must_use]
pub fn split_model_hints(model: &str) -> ModelHints {
    let mut base = model.trim();
    let mut hints = ModelHints::default();

    while let Some((head, tail)) = base.rsplit_once('-') {
        let tail = tail.to_ascii_lowercase();
        if hints.quality.is_none() && tail == "hd" {
            hints.quality = Some(Quality::Hd);
            base = head;
            continue;
        }
        if hints.resolution.is_none() {
            if let Some(tier) = ResolutionTier::parse(&tail) {
                hints.resolution = Some(tier);
                base = head;
                continue;
            }
        }
        if hints.aspect_ratio.is_none() {
            if let Some(ratio) = tail
                .split_once('x')
                .and_then(|(w, h)| AspectRatio::from_terms(parse_term(w)?, parse_term(h)?))
            {
                hints.aspect_ratio = Some(ratio);
                base = head;
                continue;
            }
        }
        break;
    }

    hints.base = base.to_string();
    hints
}

/// Turn raw adapter fields into a canonical request. Explicit fields win
/// over model-suffix hints.
pub fn normalize(raw: RawImageParams) -> Result<CanonicalImageRequest> {
    let prompt = raw
        .prompt
        .as_deref()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .ok_or(GatewayError::MissingPrompt)?
        .to_string();

    let count = match raw.count {
        None => 1,
        Some(0) => return Err(GatewayError::invalid_request("n must be at least 1")),
        Some(n) => n,
    };

    let hints = split_model_hints(&raw.model);
    let (aspect, tier) = raw.size.resolve();
    let quality = match raw.quality.as_deref() {
        Some(token) => Quality::from_token(Some(token)),
        None => hints.quality.unwrap_or_default(),
    };

    Ok(CanonicalImageRequest {
        model: hints.base,
        prompt,
        aspect_ratio: aspect.or(hints.aspect_ratio),
        resolution: tier.or(hints.resolution),
        quality,
        count,
    })
}

fn parse_term(s: &str) -> Option<u32> {
    s.trim().parse::<u32>().ok().filter(|n| *n > 0)
}

fn gcd(a: u32, b: u32) -> u32 {
    if b == 0 {
        a
    } else {
        gcd(b, a % b)
    }
}
