use serde::{Deserialize, Serialize};

/// Pixel bounds accepted for `w` / `h` directives.
pub const MIN_DIMENSION: u32 = 1;
pub const MAX_DIMENSION: u32 = 10_000;

/// Output formats the optimizer can target.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Webp,
    Avif,
    Png,
    Jpeg,
    /// Keep whatever format the upstream bytes decode as.
    Original,
}

impl ImageFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageFormat::Webp => "webp",
            ImageFormat::Avif => "avif",
            ImageFormat::Png => "png",
            ImageFormat::Jpeg => "jpeg",
            ImageFormat::Original => "original",
        }
    }

    pub fn mime(&self) -> &'static str {
        match self {
            ImageFormat::Webp => "image/webp",
            ImageFormat::Avif => "image/avif",
            ImageFormat::Png => "image/png",
            ImageFormat::Jpeg => "image/jpeg",
            ImageFormat::Original => "application/octet-stream",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "webp" => Some(ImageFormat::Webp),
            "avif" => Some(ImageFormat::Avif),
            "png" => Some(ImageFormat::Png),
            "jpeg" | "jpg" => Some(ImageFormat::Jpeg),
            "original" => Some(ImageFormat::Original),
            _ => None,
        }
    }
}

/// Resize fit modes, matching the common CSS object-fit vocabulary.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum FitMode {
    Cover,
    Contain,
    Fill,
    Inside,
    Outside,
}

impl FitMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FitMode::Cover => "cover",
            FitMode::Contain => "contain",
            FitMode::Fill => "fill",
            FitMode::Inside => "inside",
            FitMode::Outside => "outside",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "cover" => Some(FitMode::Cover),
            "contain" => Some(FitMode::Contain),
            "fill" => Some(FitMode::Fill),
            "inside" => Some(FitMode::Inside),
            "outside" => Some(FitMode::Outside),
            _ => None,
        }
    }
}

/// Transform directives for one request. Every field is optional; an absent
/// field means "no directive". Two option sets are equivalent iff they are
/// equal after [`TransformOptions::normalized`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransformOptions {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub format: Option<ImageFormat>,
    pub quality: Option<u8>,
    pub fit: Option<FitMode>,
}

impl TransformOptions {
    /// Build options from raw query parameters.
    ///
    /// Out-of-range, non-numeric and unknown enum values are silently
    /// dropped — the request proceeds as if the parameter were absent.
    pub fn from_query(
        w: Option<&str>,
        h: Option<&str>,
        fmt: Option<&str>,
        q: Option<&str>,
        fit: Option<&str>,
    ) -> Self {
        Self {
            width: w.and_then(parse_dimension),
            height: h.and_then(parse_dimension),
            format: fmt.and_then(ImageFormat::parse),
            quality: q.and_then(parse_quality),
            fit: fit.and_then(FitMode::parse),
        }
    }

    /// Canonical form: `format = original` means no directive.
    pub fn normalized(&self) -> Self {
        let mut out = self.clone();
        if out.format == Some(ImageFormat::Original) {
            out.format = None;
        }
        out
    }

    /// True when, after normalization, no directive is set at all.
    pub fn is_noop(&self) -> bool {
        let n = self.normalized();
        n.width.is_none()
            && n.height.is_none()
            && n.format.is_none()
            && n.quality.is_none()
            && n.fit.is_none()
    }

    /// Content negotiation: when no explicit format directive is present,
    /// pick AVIF or WebP if the client advertises support for them.
    pub fn negotiated(&self, accept: Option<&str>) -> Self {
        let mut out = self.normalized();
        if out.format.is_none() {
            if let Some(accept) = accept {
                if accept.contains("image/avif") {
                    out.format = Some(ImageFormat::Avif);
                } else if accept.contains("image/webp") {
                    out.format = Some(ImageFormat::Webp);
                }
            }
        }
        out
    }
}

fn parse_dimension(raw: &str) -> Option<u32> {
    raw.parse::<u32>()
        .ok()
        .filter(|v| (MIN_DIMENSION..=MAX_DIMENSION).contains(v))
}

fn parse_quality(raw: &str) -> Option<u8> {
    raw.parse::<u8>().ok().filter(|v| (1..=100).contains(v))
}
