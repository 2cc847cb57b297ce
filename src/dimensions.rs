//! Target canvas sizes for ID photos.
//!
//! Sizes come from a country table, a named template table, or explicit custom
//! dimensions, in that order of precedence.

use crate::error::{PhotoError, Result};
use crate::types::Size;
use anyhow::Context;
use serde::Deserialize;
use std::{collections::HashMap, fs, path::Path};

/// Fallback for unknown country codes and template labels (35x45 mm at 300 dpi).
pub const DEFAULT_SIZE: Size = Size::new_unchecked(413, 531);

/// A named canvas size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DimensionPreset {
    pub name: &'static str,
    pub width: u32,
    pub height: u32,
    pub description: &'static str,
}

impl DimensionPreset {
    pub const fn new(
        name: &'static str,
        width: u32,
        height: u32,
        description: &'static str,
    ) -> Self {
        Self {
            name,
            width,
            height,
            description,
        }
    }

    pub fn size(&self) -> Size {
        Size::new_unchecked(self.width, self.height)
    }
}

// ISO 3166 alpha-2 codes, pixel sizes at 300 dpi.
static COUNTRIES: [DimensionPreset; 14] = [
    DimensionPreset::new("au", 413, 531, "Australia, 35x45 mm"),
    DimensionPreset::new("ca", 591, 827, "Canada, 50x70 mm"),
    DimensionPreset::new("cn", 390, 567, "China, 33x48 mm"),
    DimensionPreset::new("de", 413, 531, "Germany, 35x45 mm"),
    DimensionPreset::new("fr", 413, 531, "France, 35x45 mm"),
    DimensionPreset::new("gb", 413, 531, "United Kingdom, 35x45 mm"),
    DimensionPreset::new("in", 600, 600, "India, 2x2 in"),
    DimensionPreset::new("jp", 413, 531, "Japan, 35x45 mm"),
    DimensionPreset::new("kr", 413, 531, "South Korea, 35x45 mm"),
    DimensionPreset::new("my", 413, 590, "Malaysia, 35x50 mm"),
    DimensionPreset::new("nz", 413, 531, "New Zealand, 35x45 mm"),
    DimensionPreset::new("ph", 413, 531, "Philippines, 35x45 mm"),
    DimensionPreset::new("sg", 400, 514, "Singapore, 400x514 px"),
    DimensionPreset::new("us", 600, 600, "United States, 2x2 in"),
];

static TEMPLATES: [DimensionPreset; 7] = [
    DimensionPreset::new("Passport", 413, 531, "Generic passport photo (413x531)"),
    DimensionPreset::new("Singapore", 400, 514, "Singapore ICA photo (400x514)"),
    DimensionPreset::new("US Visa", 600, 600, "US visa / passport square (600x600)"),
    DimensionPreset::new("Schengen Visa", 413, 531, "Schengen visa photo (413x531)"),
    DimensionPreset::new("ID Card", 332, 498, "ID card photo size (332x498)"),
    DimensionPreset::new("Driving Licence", 413, 531, "Driving licence photo (413x531)"),
    DimensionPreset::new("LinkedIn", 400, 400, "Square profile photo (400x400)"),
];

pub fn builtin_countries() -> &'static [DimensionPreset] {
    &COUNTRIES
}

pub fn builtin_templates() -> &'static [DimensionPreset] {
    &TEMPLATES
}

/// Where a caller wants the canvas size to come from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SizeRequest {
    pub country: Option<String>,
    pub template: Option<String>,
    pub width: Option<i64>,
    pub height: Option<i64>,
}

impl SizeRequest {
    pub fn country(code: impl Into<String>) -> Self {
        Self {
            country: Some(code.into()),
            ..Self::default()
        }
    }

    pub fn template(label: impl Into<String>) -> Self {
        Self {
            template: Some(label.into()),
            ..Self::default()
        }
    }

    pub fn custom(width: i64, height: i64) -> Self {
        Self {
            width: Some(width),
            height: Some(height),
            ..Self::default()
        }
    }
}

#[derive(Debug, Deserialize)]
struct TableFile {
    #[serde(default)]
    countries: HashMap<String, [u32; 2]>,
    #[serde(default)]
    templates: HashMap<String, [u32; 2]>,
}

/// Maps a country code, template label, or custom dimensions to a canvas size.
#[derive(Debug, Clone)]
pub struct DimensionResolver {
    countries: HashMap<String, Size>,
    templates: HashMap<String, Size>,
    default_size: Size,
}

impl Default for DimensionResolver {
    fn default() -> Self {
        Self {
            countries: COUNTRIES
                .iter()
                .map(|p| (p.name.to_ascii_lowercase(), p.size()))
                .collect(),
            templates: TEMPLATES
                .iter()
                .map(|p| (normalize_label(p.name), p.size()))
                .collect(),
            default_size: DEFAULT_SIZE,
        }
    }
}

impl DimensionResolver {
    /// Build tables from JSON of the form `{"countries": {"sg": [400, 514]}, "templates": {...}}`.
    pub fn from_json_str(json: &str) -> anyhow::Result<Self> {
        let file: TableFile =
            serde_json::from_str(json).context("failed to parse dimension tables")?;

        let to_size = |key: &str, [w, h]: [u32; 2]| {
            Size::new(w, h).with_context(|| format!("invalid size for '{key}'"))
        };

        let mut countries = HashMap::with_capacity(file.countries.len());
        for (code, dims) in file.countries {
            let size = to_size(&code, dims)?;
            countries.insert(code.trim().to_ascii_lowercase(), size);
        }
        let mut templates = HashMap::with_capacity(file.templates.len());
        for (label, dims) in file.templates {
            let size = to_size(&label, dims)?;
            templates.insert(normalize_label(&label), size);
        }

        tracing::debug!(
            "Loaded {} country and {} template sizes",
            countries.len(),
            templates.len()
        );

        Ok(Self {
            countries,
            templates,
            default_size: DEFAULT_SIZE,
        })
    }

    pub fn from_json_path<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let json = fs::read_to_string(path)
            .with_context(|| format!("failed to read dimension tables {}", path.display()))?;
        Self::from_json_str(&json)
            .with_context(|| format!("invalid dimension tables in {}", path.display()))
    }

    pub fn default_size(&self) -> Size {
        self.default_size
    }

    /// Resolve a canvas size.
    ///
    /// Country wins over template, template over custom dimensions. Unknown
    /// countries and templates fall back to [`DEFAULT_SIZE`]; a request with no
    /// usable source fails with [`PhotoError::InvalidParameters`].
    pub fn resolve(
        &self,
        country: Option<&str>,
        template: Option<&str>,
        custom_width: Option<i64>,
        custom_height: Option<i64>,
    ) -> Result<Size> {
        if let Some(code) = non_blank(country) {
            let size = self.countries.get(&code.to_ascii_lowercase()).copied();
            if size.is_none() {
                tracing::debug!("Unknown country '{}', using default size", code);
            }
            return Ok(size.unwrap_or(self.default_size));
        }

        if let Some(label) = non_blank(template) {
            let size = self.templates.get(&normalize_label(label)).copied();
            if size.is_none() {
                tracing::debug!("Unknown template '{}', using default size", label);
            }
            return Ok(size.unwrap_or(self.default_size));
        }

        match (custom_width, custom_height) {
            (Some(w), Some(h)) if w > 0 && h > 0 => {
                let w = u32::try_from(w).map_err(|_| too_large(w))?;
                let h = u32::try_from(h).map_err(|_| too_large(h))?;
                Size::new(w, h)
            }
            (Some(w), Some(h)) => Err(PhotoError::InvalidParameters(format!(
                "custom dimensions must be positive, got {w}x{h}"
            ))),
            _ => Err(PhotoError::InvalidParameters(
                "must specify country, template, or custom dimensions".into(),
            )),
        }
    }

    pub fn resolve_request(&self, request: &SizeRequest) -> Result<Size> {
        self.resolve(
            request.country.as_deref(),
            request.template.as_deref(),
            request.width,
            request.height,
        )
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn too_large(value: i64) -> PhotoError {
    PhotoError::InvalidParameters(format!("custom dimension {value} is too large"))
}

fn normalize_label(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .flat_map(|c| c.to_lowercase())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn country_lookup_is_case_insensitive() {
        let resolver = DimensionResolver::default();
        let size = resolver.resolve(Some("SG"), None, None, None).unwrap();
        assert_eq!(size, Size::new(400, 514).unwrap());
    }

    #[test]
    fn unknown_country_and_template_fall_back_to_default() {
        let resolver = DimensionResolver::default();
        assert_eq!(
            resolver.resolve(Some("zz"), None, None, None).unwrap(),
            DEFAULT_SIZE
        );
        assert_eq!(
            resolver.resolve(None, Some("Nope"), None, None).unwrap(),
            DEFAULT_SIZE
        );
    }

    #[test]
    fn country_takes_precedence_over_template_and_custom() {
        let resolver = DimensionResolver::default();
        let size = resolver
            .resolve(Some("us"), Some("ID Card"), Some(10), Some(10))
            .unwrap();
        assert_eq!(size, Size::new(600, 600).unwrap());
    }

    #[test]
    fn template_lookup_ignores_spacing_and_case() {
        let resolver = DimensionResolver::default();
        let size = resolver.resolve(None, Some("idcard"), None, None).unwrap();
        assert_eq!(size, Size::new(332, 498).unwrap());
        let size = resolver.resolve(None, Some("us visa"), None, None).unwrap();
        assert_eq!(size, Size::new(600, 600).unwrap());
    }

    #[test]
    fn blank_country_falls_through_to_custom() {
        let resolver = DimensionResolver::default();
        let size = resolver.resolve(Some("  "), None, Some(300), Some(400)).unwrap();
        assert_eq!(size, Size::new(300, 400).unwrap());
    }

    #[test]
    fn missing_or_non_positive_custom_dimensions_fail() {
        let resolver = DimensionResolver::default();
        for (w, h) in [(None, None), (Some(300), None), (Some(0), Some(10)), (Some(10), Some(-5))] {
            let err = resolver.resolve(None, None, w, h).unwrap_err();
            assert!(matches!(err, PhotoError::InvalidParameters(_)), "{w:?} {h:?}");
        }
    }

    #[test]
    fn json_tables_replace_builtins() {
        let resolver = DimensionResolver::from_json_str(
            r#"{"countries": {"XX": [100, 200]}, "templates": {"Tiny Card": [50, 60]}}"#,
        )
        .unwrap();
        assert_eq!(
            resolver.resolve(Some("xx"), None, None, None).unwrap(),
            Size::new(100, 200).unwrap()
        );
        assert_eq!(
            resolver.resolve(None, Some("tinycard"), None, None).unwrap(),
            Size::new(50, 60).unwrap()
        );
        assert_eq!(
            resolver.resolve(Some("sg"), None, None, None).unwrap(),
            DEFAULT_SIZE
        );
    }

    #[test]
    fn json_tables_reject_zero_sizes() {
        assert!(DimensionResolver::from_json_str(r#"{"countries": {"xx": [0, 10]}}"#).is_err());
    }

    #[test]
    fn builtin_presets_are_positive() {
        for preset in builtin_countries().iter().chain(builtin_templates()) {
            assert!(preset.width > 0 && preset.height > 0, "{}", preset.name);
        }
    }
}
