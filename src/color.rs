use image::Rgb;
use palette::{Hsl, IntoColor, LinSrgb, Mix, Srgb};

// ---------------------------------------------------------------------------
// Color palette generator
// ---------------------------------------------------------------------------

/// Generates `n` visually distinct colours using evenly spaced hues.
pub fn generate_palette(n: usize) -> Vec<Rgb<u8>> {
    if n == 0 {
        return Vec::new();
    }
    (0..n)
        .map(|i| {
            let hue = (i as f32 / n as f32) * 360.0;
            let hsl = Hsl::new(hue, 0.75, 0.55);
            let rgb: Srgb = hsl.into_color();
            Rgb([
                (rgb.red * 255.0) as u8,
                (rgb.green * 255.0) as u8,
                (rgb.blue * 255.0) as u8,
            ])
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Sequential colour map: value → Rgb
// ---------------------------------------------------------------------------

/// Anchor colours of the viridis map, dark to bright.
const VIRIDIS: [(u8, u8, u8); 5] = [
    (68, 1, 84),
    (59, 82, 139),
    (33, 145, 140),
    (94, 201, 98),
    (253, 231, 37),
];

/// Maps values in `[vmin, vmax]` onto the viridis gradient; values outside
/// are clamped, NaN gets `missing`.
#[derive(Debug, Clone)]
pub struct ColorScale {
    vmin: f64,
    vmax: f64,
    anchors: Vec<LinSrgb>,
    missing: Rgb<u8>,
}

impl ColorScale {
    pub fn viridis(vmin: f64, vmax: f64) -> Self {
        let anchors = VIRIDIS
            .iter()
            .map(|&(r, g, b)| Srgb::new(r, g, b).into_format::<f32>().into_linear())
            .collect();
        ColorScale {
            vmin,
            vmax,
            anchors,
            missing: Rgb([255, 255, 255]),
        }
    }

    /// Look up the colour for a value.
    pub fn color_for(&self, value: f64) -> Rgb<u8> {
        if value.is_nan() {
            return self.missing;
        }
        let t = ((value - self.vmin) / (self.vmax - self.vmin)).clamp(0.0, 1.0) as f32;
        let segments = (self.anchors.len() - 1) as f32;
        let pos = t * segments;
        let idx = (pos.floor() as usize).min(self.anchors.len() - 2);
        let mixed = self.anchors[idx].mix(self.anchors[idx + 1], pos - idx as f32);
        let srgb = Srgb::<f32>::from_linear(mixed).into_format::<u8>();
        Rgb([srgb.red, srgb.green, srgb.blue])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scale_hits_end_points_and_clamps() {
        let scale = ColorScale::viridis(0.2, 2.6);
        assert_eq!(scale.color_for(0.2), Rgb([68, 1, 84]));
        assert_eq!(scale.color_for(-5.0), Rgb([68, 1, 84]));
        assert_eq!(scale.color_for(2.6), Rgb([253, 231, 37]));
        assert_eq!(scale.color_for(f64::NAN), Rgb([255, 255, 255]));
    }

    #[test]
    fn palette_has_requested_size() {
        assert!(generate_palette(0).is_empty());
        assert_eq!(generate_palette(3).len(), 3);
    }
}
