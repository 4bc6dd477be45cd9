use log::info;
use nalgebra::Vector3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::beacon::scene::Sphere;
use crate::config::SceneConfig;
use crate::error::ConfigError;
use crate::util::{random_hsv, random_in_unit_disk};

const REFLECTIVE_CHANCE: f32 = 0.8;
const METAL_CHANCE: f32 = 0.4;
const DIELECTRIC_SPECULAR: f32 = 0.04;

/// Scatters non-overlapping spheres on the ground disk.
///
/// Exactly `max_spheres` placements are attempted. A candidate touching an accepted sphere is
/// dropped without retrying, so the result may hold fewer spheres.
pub fn generate(config: &SceneConfig) -> Result<Vec<Sphere>, ConfigError> {
    config.validate()?;

    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut spheres: Vec<Sphere> = Vec::new();

    for _ in 0..config.max_spheres {
        let radius = config.radius_min + rng.gen::<f32>() * (config.radius_max - config.radius_min);
        let planar = random_in_unit_disk(&mut rng) * config.placement_radius;

        let mut candidate = Sphere {
            position: [planar.x, radius, planar.y],
            radius,
            albedo: [0.0; 3],
            specular: [0.0; 3],
            smoothness: 0.0,
            emission: [0.0; 3],
        };

        if spheres.iter().any(|other| candidate.overlaps(other)) {
            continue;
        }

        assign_material(&mut rng, &mut candidate);
        spheres.push(candidate);
    }

    info!(
        "placed {} of {} spheres (seed {})",
        spheres.len(),
        config.max_spheres,
        config.seed
    );
    Ok(spheres)
}

fn assign_material(rng: &mut StdRng, sphere: &mut Sphere) {
    let color: [f32; 3] = random_hsv(rng, 0.0..=1.0, 0.0..=1.0, 0.0..=1.0).into();
    let chance = rng.gen::<f32>();

    if chance < REFLECTIVE_CHANCE {
        if chance < METAL_CHANCE {
            sphere.specular = color;
        } else {
            sphere.albedo = color;
            sphere.specular = Vector3::repeat(DIELECTRIC_SPECULAR).into();
        }
        sphere.smoothness = rng.gen();
    } else {
        sphere.emission = random_hsv(rng, 0.0..=1.0, 0.0..=1.0, 3.0..=8.0).into();
    }
}
