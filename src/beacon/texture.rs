use std::ffi::OsStr;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use image::ImageFormat;
use log::{info, warn};
use wgpu::{
    AddressMode, Device, Extent3d, FilterMode, ImageCopyTexture, ImageDataLayout, Origin3d, Queue,
    Sampler, SamplerDescriptor, Texture, TextureAspect, TextureDescriptor, TextureDimension,
    TextureFormat, TextureUsages, TextureView, TextureViewDescriptor,
};

use crate::error::{Error, Result};

/// Sampled RGBA texture, used as the kernel's environment map.
pub struct Image {
    pub gpu_texture: Texture,
    pub view: TextureView,
    pub sampler: Sampler,
    pub name: String,
}

impl Image {
    pub fn new(device: &Device, width: u32, height: u32, label: &str) -> Image {
        let gpu_texture = device.create_texture(&TextureDescriptor {
            label: Some(label),
            size: Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: TextureDimension::D2,
            format: TextureFormat::Rgba8UnormSrgb,
            usage: TextureUsages::TEXTURE_BINDING | TextureUsages::COPY_DST,
            view_formats: &[],
        });

        let view = gpu_texture.create_view(&TextureViewDescriptor {
            label: Some(&format!("{} view", label)),
            ..Default::default()
        });

        // Longitude wraps around, latitude clamps at the poles
        let sampler = device.create_sampler(&SamplerDescriptor {
            label: Some(&format!("{} sampler", label)),
            address_mode_u: AddressMode::Repeat,
            address_mode_v: AddressMode::ClampToEdge,
            mag_filter: FilterMode::Linear,
            min_filter: FilterMode::Linear,
            ..Default::default()
        });

        Self {
            gpu_texture,
            view,
            sampler,
            name: label.to_string(),
        }
    }

    /// Single texel environment, used when no map is supplied.
    pub fn solid(device: &Device, queue: &Queue, rgba: [u8; 4], label: &str) -> Image {
        let mut image = Self::new(device, 1, 1, label);
        image.load_image(queue, &rgba);
        image
    }

    pub fn load_image(&mut self, queue: &Queue, rgba: &[u8]) {
        let pixel_count = {
            let size = self.gpu_texture.size();
            size.width * size.height
        } as usize;
        assert_eq!(pixel_count, rgba.len() / 4, "texel data does not match `{}`", self.name);

        queue.write_texture(
            ImageCopyTexture {
                texture: &self.gpu_texture,
                mip_level: 0,
                origin: Origin3d::ZERO,
                aspect: TextureAspect::All,
            },
            rgba,
            ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(4 * self.gpu_texture.width()),
                rows_per_image: Some(self.gpu_texture.height()),
            },
            self.gpu_texture.size(),
        )
    }

    pub fn from_path<P: AsRef<Path>>(
        path: P,
        device: &Device,
        queue: &Queue,
        label: Option<&str>,
    ) -> Result<Self> {
        let path = path.as_ref();
        let format = match path.extension().and_then(OsStr::to_str) {
            Some("jpg") | Some("jpeg") => ImageFormat::Jpeg,
            Some("png") => ImageFormat::Png,
            _ => ImageFormat::from_path(path)?,
        };

        let label = label
            .map(str::to_owned)
            .or_else(|| path.file_name().and_then(OsStr::to_str).map(str::to_owned))
            .unwrap_or_else(|| "environment".to_owned());
        let reader = BufReader::new(File::open(path)?);
        let loaded = image::load(reader, format)?;

        check_dimensions(
            &label,
            loaded.width(),
            loaded.height(),
            device.limits().max_texture_dimension_2d,
        )?;
        info!("loaded `{}` ({}x{})", label, loaded.width(), loaded.height());
        let mut to_return = Self::new(device, loaded.width(), loaded.height(), &label);
        to_return.load_image(queue, &loaded.into_rgba8());
        Ok(to_return)
    }
}

/// Rejects images the device cannot hold in a single 2D texture.
fn check_dimensions(label: &str, width: u32, height: u32, max: u32) -> Result<()> {
    if width > max || height > max {
        return Err(Error::Allocation {
            label: label.to_owned(),
            size: width as u64 * height as u64 * 4,
            reason: format!("{}x{} exceeds the {} texel limit", width, height, max),
        });
    }
    Ok(())
}

/// Loads `path` or falls back to a flat sky tone.
pub fn load_environment(path: Option<&Path>, device: &Device, queue: &Queue) -> Image {
    const SKY: [u8; 4] = [153, 178, 230, 255];

    match path.map(|path| Image::from_path(path, device, queue, Some("environment"))) {
        Some(Ok(image)) => image,
        Some(Err(error)) => {
            warn!("falling back to flat sky: {}", error);
            Image::solid(device, queue, SKY, "environment")
        }
        None => Image::solid(device, queue, SKY, "environment"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oversized_maps_are_rejected() {
        assert!(check_dimensions("environment", 8192, 4096, 8192).is_ok());
        assert!(check_dimensions("environment", 8193, 4096, 8192).is_err());

        let error = check_dimensions("environment", 4096, 16384, 8192).unwrap_err();
        match error {
            Error::Allocation { label, size, .. } => {
                assert_eq!(label, "environment");
                assert_eq!(size, 4096 * 16384 * 4);
            }
            other => panic!("unexpected error: {}", other),
        }
    }
}
