use std::f32::consts::TAU;
use std::ops::RangeInclusive;

use nalgebra::{Vector2, Vector3};
use rand::Rng;

/// Uniformly distributed point inside the unit disk.
pub fn random_in_unit_disk<G: Rng + ?Sized>(rng: &mut G) -> Vector2<f32> {
    // sqrt keeps the area density uniform
    let distance = rng.gen::<f32>().sqrt();
    let angle = rng.gen::<f32>() * TAU;
    Vector2::new(angle.cos(), angle.sin()) * distance
}

/// Random color drawn uniformly in HSV space. `value` may exceed 1 for HDR colors.
pub fn random_hsv<G: Rng + ?Sized>(
    rng: &mut G,
    hue: RangeInclusive<f32>,
    saturation: RangeInclusive<f32>,
    value: RangeInclusive<f32>,
) -> Vector3<f32> {
    let lerp = |range: &RangeInclusive<f32>, t: f32| range.start() + (range.end() - range.start()) * t;

    let h = lerp(&hue, rng.gen());
    let s = lerp(&saturation, rng.gen());
    let v = lerp(&value, rng.gen());
    hsv_to_rgb(h, s, v)
}

pub fn hsv_to_rgb(hue: f32, saturation: f32, value: f32) -> Vector3<f32> {
    let sector = (hue.rem_euclid(1.0)) * 6.0;
    let chroma = value * saturation;
    let x = chroma * (1.0 - ((sector % 2.0) - 1.0).abs());
    let (r, g, b) = match sector as u32 {
        0 => (chroma, x, 0.0),
        1 => (x, chroma, 0.0),
        2 => (0.0, chroma, x),
        3 => (0.0, x, chroma),
        4 => (x, 0.0, chroma),
        _ => (chroma, 0.0, x),
    };
    let m = value - chroma;
    Vector3::new(r + m, g + m, b + m)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn unit_disk_samples_stay_inside() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..1000 {
            assert!(random_in_unit_disk(&mut rng).norm() <= 1.0 + 1e-6);
        }
    }

    #[test]
    fn hsv_primaries() {
        assert_eq!(hsv_to_rgb(0.0, 1.0, 1.0), Vector3::new(1.0, 0.0, 0.0));
        assert_eq!(hsv_to_rgb(0.0, 0.0, 0.5), Vector3::new(0.5, 0.5, 0.5));
        let blue = hsv_to_rgb(2.0 / 3.0, 1.0, 1.0);
        assert!((blue - Vector3::new(0.0, 0.0, 1.0)).norm() < 1e-5);
    }

    #[test]
    fn hdr_value_scales_color() {
        let mut rng = StdRng::seed_from_u64(3);
        let color = random_hsv(&mut rng, 0.0..=1.0, 0.0..=1.0, 3.0..=8.0);
        assert!(color.max() >= 3.0 - 1e-4 && color.max() <= 8.0 + 1e-4);
    }
}
