// SPDX-FileCopyrightText: 2026 Tether Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! QR payload rendering.

use qrcode::render::svg;
use qrcode::QrCode;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use tether_core::TetherError;

/// Output format of `get_qr`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum QrFormat {
    /// The payload string exactly as the network produced it.
    #[default]
    Raw,
    Svg,
    /// Block characters for printing in a terminal.
    Terminal,
}

pub fn render(payload: &str, format: QrFormat) -> Result<String, TetherError> {
    let encode = || {
        QrCode::new(payload.as_bytes())
            .map_err(|e| TetherError::Internal(format!("QR payload cannot be encoded: {e}")))
    };
    let rendered = match format {
        QrFormat::Raw => payload.to_string(),
        QrFormat::Svg => encode()?
            .render::<svg::Color<'_>>()
            .min_dimensions(256, 256)
            .dark_color(svg::Color("#000000"))
            .light_color(svg::Color("#ffffff"))
            .build(),
        QrFormat::Terminal => encode()?
            .render::<char>()
            .module_dimensions(2, 1)
            .dark_color('█')
            .light_color(' ')
            .build(),
    };
    Ok(rendered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    const PAYLOAD: &str = "2@Zr8mBqH1,Kp0vYx9T,Qm3nA2==";

    #[test]
    fn raw_is_passthrough() {
        assert_eq!(render(PAYLOAD, QrFormat::Raw).unwrap(), PAYLOAD);
    }

    #[test]
    fn svg_and_terminal_render() {
        let svg = render(PAYLOAD, QrFormat::Svg).unwrap();
        assert!(svg.contains("<svg"));
        let term = render(PAYLOAD, QrFormat::Terminal).unwrap();
        assert!(term.contains('█'));
        assert!(term.lines().count() > 20);
    }

    #[test]
    fn format_names() {
        assert_eq!(QrFormat::from_str("svg").unwrap(), QrFormat::Svg);
        assert!(QrFormat::from_str("png").is_err());
    }
}
