//! C9: combines the gradient base color, hillshade and cast-shadow
//! layers into a final RGBA image. Grounded on `geoc/src/generate.rs`'s
//! layer-blend loop (row-parallel, one pass per layer); the Hard Light
//! and shadow-darkening formulas are spec.md §4.9's, which match
//! TopoToImage's published blend math rather than the teacher's simple
//! multiply.

use crate::gradient::Color;
use crate::hillshade::HillshadeGrid;
use crate::shadow::ShadowGrid;
use dem_core::error::Error;
use rayon::prelude::*;

pub struct CompositeImage {
	height: usize,
	width: usize,
	data: Vec<Color>,
}

impl CompositeImage {
	pub fn shape(&self) -> (usize, usize) { (self.height, self.width) }

	pub fn get(&self, row: usize, col: usize) -> Color { self.data[row * self.width + col] }

	pub fn data(&self) -> &[Color] { &self.data }

	/// Flattens into interleaved RGBA bytes, row-major.
	pub fn to_rgba_bytes(&self) -> Vec<u8> {
		let mut out = Vec::with_capacity(self.data.len() * 4);
		for c in &self.data {
			out.push(c.r);
			out.push(c.g);
			out.push(c.b);
			out.push(c.a);
		}
		out
	}
}

fn hard_light(base: f64, overlay: f64) -> f64 {
	if overlay < 0.5 {
		2.0 * base * overlay
	} else {
		1.0 - 2.0 * (1.0 - base) * (1.0 - overlay)
	}
}

#[derive(Debug, Clone, Copy)]
pub struct CompositeSettings {
	pub blending_strength: f64,
	pub shadow_color: Color,
	/// RGB protected from hillshade blending when the gradient is
	/// posterized with an above-range color (spec.md §4.9 step 2).
	pub preserve_above_color: Option<(u8, u8, u8)>,
}

impl Default for CompositeSettings {
	fn default() -> Self {
		CompositeSettings {
			blending_strength: 100.0,
			shadow_color: Color::rgba(0, 0, 0, 255),
			preserve_above_color: None,
		}
	}
}

/// Composites the base color grid with optional hillshade and shadow
/// layers per spec.md §4.9. Each active layer is applied in bands of
/// roughly `height / 10` rows so `progress` can be polled at least every
/// tenth of the grid per layer (spec.md §5's cancellation contract);
/// returning `Err` from `progress` aborts the composite early.
pub fn composite(
	base: &[Color],
	height: usize,
	width: usize,
	hillshade: Option<&HillshadeGrid>,
	shadow: Option<&ShadowGrid>,
	settings: &CompositeSettings,
	mut progress: impl FnMut(u32, u32) -> Result<(), Error>,
) -> Result<CompositeImage, Error> {
	assert_eq!(base.len(), height * width);

	let mut out: Vec<Color> = base.to_vec();
	let band_rows = (height / 10).max(1);
	let bands_per_pass = ((height as u32) + band_rows as u32 - 1) / band_rows as u32;
	let passes = hillshade.is_some() as u32 + shadow.is_some() as u32;
	let total_units = (bands_per_pass * passes).max(1);
	let mut done_units = 0u32;

	if let Some(hillshade) = hillshade {
		let k = settings.blending_strength / 100.0;
		let mut row0 = 0;
		while row0 < height {
			let row1 = (row0 + band_rows).min(height);
			out[row0 * width..row1 * width].par_chunks_mut(width).enumerate().for_each(|(i, row)| {
				let y = row0 + i;
				for x in 0..width {
					let b = row[x];
					let preserved = settings
						.preserve_above_color
						.map(|(r, g, bl)| b.r == r && b.g == g && b.b == bl)
						.unwrap_or(false);
					if preserved {
						continue;
					}
					let overlay = hillshade.get(y, x) as f64;
					let br = b.r as f64 / 255.0;
					let bg = b.g as f64 / 255.0;
					let bb = b.b as f64 / 255.0;

					let blended_r = hard_light(br, overlay);
					let blended_g = hard_light(bg, overlay);
					let blended_b = hard_light(bb, overlay);

					let out_r = (br + k * (blended_r - br)).clamp(0.0, 1.0);
					let out_g = (bg + k * (blended_g - bg)).clamp(0.0, 1.0);
					let out_b = (bb + k * (blended_b - bb)).clamp(0.0, 1.0);

					row[x] = Color::rgba((out_r * 255.0).round() as u8, (out_g * 255.0).round() as u8, (out_b * 255.0).round() as u8, b.a);
				}
			});
			done_units += 1;
			progress(done_units, total_units)?;
			row0 = row1;
		}
	}

	if let Some(shadow) = shadow {
		let sr = settings.shadow_color.r as f64;
		let sg = settings.shadow_color.g as f64;
		let sb = settings.shadow_color.b as f64;
		let mut row0 = 0;
		while row0 < height {
			let row1 = (row0 + band_rows).min(height);
			out[row0 * width..row1 * width].par_chunks_mut(width).enumerate().for_each(|(i, row)| {
				let y = row0 + i;
				for x in 0..width {
					let s = shadow.get(y, x) as f64;
					if s <= 0.0 {
						continue;
					}
					let b = row[x];
					let scale_r = (1.0 - s) * (1.0 - sr / 255.0) + sr / 255.0;
					let scale_g = (1.0 - s) * (1.0 - sg / 255.0) + sg / 255.0;
					let scale_b = (1.0 - s) * (1.0 - sb / 255.0) + sb / 255.0;
					row[x] = Color::rgba(
						(b.r as f64 * scale_r).round() as u8,
						(b.g as f64 * scale_g).round() as u8,
						(b.b as f64 * scale_b).round() as u8,
						b.a,
					);
				}
			});
			done_units += 1;
			progress(done_units, total_units)?;
			row0 = row1;
		}
	}

	Ok(CompositeImage { height, width, data: out })
}

#[cfg(test)]
mod tests {
	use super::*;
	use dem_core::grid::ElevationGrid;

	#[test]
	fn zero_strength_leaves_base_color_unchanged() {
		let base = vec![Color::rgba(100, 150, 200, 255); 4];
		let hillshade = crate::hillshade::compute(&ElevationGrid::new(2, 2, (0.0, 2.0, 2.0, 0.0)), 0.0, 0.0, 200.0, |_, _| Ok(())).unwrap();
		let settings = CompositeSettings {
			blending_strength: 0.0,
			..Default::default()
		};
		let out = composite(&base, 2, 2, Some(&hillshade), None, &settings, |_, _| Ok(())).unwrap();
		assert_eq!(out.data(), base.as_slice());
	}

	#[test]
	fn full_shadow_moves_color_toward_shadow_color() {
		let base = vec![Color::rgba(200, 200, 200, 255); 1];
		let mut shadow_grid = ElevationGrid::new(1, 1, (0.0, 1.0, 1.0, 0.0));
		shadow_grid.set(0, 0, 0.0);
		let shadow = crate::shadow::compute(&shadow_grid, 0.0, 5.0, 0, |_, _| Ok(())).unwrap();
		// With a single pixel there is no propagation; force a full-shadow
		// mask directly to test the blend math in isolation.
		let mut forced = shadow;
		forced.data_mut()[0] = 1.0;
		let settings = CompositeSettings {
			shadow_color: Color::rgba(0, 0, 0, 255),
			..Default::default()
		};
		let out = composite(&base, 1, 1, None, Some(&forced), &settings, |_, _| Ok(())).unwrap();
		assert_eq!(out.get(0, 0), Color::rgba(0, 0, 0, 255));
	}

	#[test]
	fn preserved_above_color_pixels_skip_hillshade_blend() {
		let white = Color::rgba(255, 255, 255, 255);
		let base = vec![white; 1];
		let hillshade = crate::hillshade::compute(&ElevationGrid::new(1, 1, (0.0, 1.0, 1.0, 0.0)), 0.0, 0.0, 200.0, |_, _| Ok(())).unwrap();
		let settings = CompositeSettings {
			blending_strength: 100.0,
			preserve_above_color: Some((255, 255, 255)),
			..Default::default()
		};
		let out = composite(&base, 1, 1, Some(&hillshade), None, &settings, |_, _| Ok(())).unwrap();
		assert_eq!(out.get(0, 0), white);
	}
}
