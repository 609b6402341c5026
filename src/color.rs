/*!
 # Color space conversion

 The strips only understand 8-bit RGB, while hosts describe color as hue and
 saturation. This module bridges the two.
*/

/// Converts HSL components to an 8-bit RGB triple
///
/// # Arguments
///
/// * `h` - Hue as a fraction of a full turn (0.0-1.0)
/// * `s` - Saturation (0.0-1.0)
/// * `l` - Lightness (0.0-1.0)
pub fn hsl_to_rgb(h: f64, s: f64, l: f64) -> (u8, u8, u8) {
    let (r, g, b) = if s == 0.0 {
        // achromatic
        (l, l, l)
    } else {
        let q = if l < 0.5 { l * (1.0 + s) } else { l + s - l * s };
        let p = 2.0 * l - q;
        (
            hue_to_channel(p, q, h + 1.0 / 3.0),
            hue_to_channel(p, q, h),
            hue_to_channel(p, q, h - 1.0 / 3.0),
        )
    };

    (to_byte(r), to_byte(g), to_byte(b))
}

fn hue_to_channel(p: f64, q: f64, mut t: f64) -> f64 {
    if t < 0.0 {
        t += 1.0;
    }
    if t > 1.0 {
        t -= 1.0;
    }

    if t < 1.0 / 6.0 {
        p + (q - p) * 6.0 * t
    } else if t < 1.0 / 2.0 {
        q
    } else if t < 2.0 / 3.0 {
        p + (q - p) * (2.0 / 3.0 - t) * 6.0
    } else {
        p
    }
}

fn to_byte(channel: f64) -> u8 {
    (channel * 255.0).round().clamp(0.0, 255.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_saturation_is_gray_for_any_hue() {
        for h in [0.0, 0.1, 0.5, 0.99] {
            for l in [0.0, 0.25, 0.5, 1.0] {
                let v = (l * 255.0_f64).round() as u8;
                assert_eq!(hsl_to_rgb(h, 0.0, l), (v, v, v), "h={h} l={l}");
            }
        }
    }

    #[test]
    fn primaries() {
        assert_eq!(hsl_to_rgb(0.0, 1.0, 0.5), (255, 0, 0));
        assert_eq!(hsl_to_rgb(1.0 / 3.0, 1.0, 0.5), (0, 255, 0));
        assert_eq!(hsl_to_rgb(2.0 / 3.0, 1.0, 0.5), (0, 0, 255));
    }

    #[test]
    fn secondaries() {
        assert_eq!(hsl_to_rgb(1.0 / 6.0, 1.0, 0.5), (255, 255, 0));
        assert_eq!(hsl_to_rgb(0.5, 1.0, 0.5), (0, 255, 255));
        assert_eq!(hsl_to_rgb(5.0 / 6.0, 1.0, 0.5), (255, 0, 255));
    }

    #[test]
    fn half_saturation() {
        // q = 0.75, p = 0.25
        assert_eq!(hsl_to_rgb(0.0, 0.5, 0.5), (191, 64, 64));
    }

    #[test]
    fn lightness_extremes() {
        assert_eq!(hsl_to_rgb(0.3, 1.0, 0.0), (0, 0, 0));
        assert_eq!(hsl_to_rgb(0.3, 1.0, 1.0), (255, 255, 255));
    }
}
