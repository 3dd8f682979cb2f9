//! Post-processing effects applied to downloaded avatars
//!
//! Effects form a closed set: each variant has a stable numeric code that is
//! part of the cache file name, so adding a variant must never renumber the
//! existing ones.

use crate::error::{Error, Result};
use image::DynamicImage;
use serde::{Deserialize, Serialize};

/// A named visual transform applied to an avatar after download.
///
/// The numeric code doubles as the cache-path prefix: `{code}_{id}.png`.
/// A different effect therefore produces a different file, never an
/// overwrite of an existing one.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Effect {
    /// No transform (code 0)
    #[default]
    Original,
    /// Desaturate to grayscale (code 1)
    Grayscale,
}

impl Effect {
    /// All known effects, in code order
    pub fn all() -> &'static [Effect] {
        &[Effect::Original, Effect::Grayscale]
    }

    /// The stable numeric code used in cache file names
    pub fn code(self) -> u8 {
        match self {
            Effect::Original => 0,
            Effect::Grayscale => 1,
        }
    }

    /// Look up an effect by its numeric code
    ///
    /// Unknown codes are a configuration error, not a panic.
    pub fn from_code(code: u8) -> Result<Self> {
        match code {
            0 => Ok(Effect::Original),
            1 => Ok(Effect::Grayscale),
            other => Err(Error::Config {
                message: format!("unknown effect code {other}"),
                key: Some("effect".to_string()),
            }),
        }
    }

    /// Apply the transform to a decoded image
    pub fn apply(self, img: DynamicImage) -> DynamicImage {
        match self {
            Effect::Original => img,
            Effect::Grayscale => img.grayscale(),
        }
    }
}

impl std::fmt::Display for Effect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Effect::Original => write!(f, "original"),
            Effect::Grayscale => write!(f, "grayscale"),
        }
    }
}
