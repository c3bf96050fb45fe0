//! Renderer configuration.

use serde::{Deserialize, Serialize};

use crate::render_type::DEFAULT_TEXTURE_SIZE;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    /// RGBA clear colour, each channel in `0..=1`.
    pub clear_color: [f64; 4],
    /// Maximum cached node textures.  `None` never evicts.
    pub texture_cache_capacity: Option<usize>,
    /// Texture resolution for render types that do not pick their own.
    pub default_texture_size: u32,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            clear_color: [0.0, 0.0, 0.0, 0.0],
            texture_cache_capacity: None,
            default_texture_size: DEFAULT_TEXTURE_SIZE,
        }
    }
}

impl RendererConfig {
    pub fn from_json(source: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(source)
    }

    pub fn clear_color(&self) -> wgpu::Color {
        let [r, g, b, a] = self.clear_color;
        wgpu::Color { r, g, b, a }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RendererConfig::default();
        assert_eq!(config.clear_color, [0.0; 4]);
        assert_eq!(config.texture_cache_capacity, None);
        assert_eq!(config.default_texture_size, 1024);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = RendererConfig::from_json(r#"{ "texture_cache_capacity": 256 }"#).unwrap();
        assert_eq!(config.texture_cache_capacity, Some(256));
        assert_eq!(config.default_texture_size, 1024);
        assert_eq!(config.clear_color(), wgpu::Color::TRANSPARENT);
    }

    #[test]
    fn test_full_json() {
        let config = RendererConfig::from_json(
            r#"{ "clear_color": [1.0, 1.0, 1.0, 1.0], "texture_cache_capacity": null, "default_texture_size": 256 }"#,
        )
        .unwrap();
        assert_eq!(config.clear_color(), wgpu::Color::WHITE);
        assert_eq!(config.default_texture_size, 256);
    }

    #[test]
    fn test_malformed_json_is_an_error() {
        assert!(RendererConfig::from_json("{ clear_color: ").is_err());
    }
}
