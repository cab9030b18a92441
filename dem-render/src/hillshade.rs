//! C7: 360° light direction → per-pixel relative brightness from
//! elevation differences, with bilinear neighbor sampling. The teacher's
//! own hillshade (`geoc/src/generate.rs`) is a Lambertian
//! surface-normal formulation; spec.md §4.7 instead specifies a simpler
//! elevation-difference formula "for legacy-look compatibility", so this
//! is grounded on `examples/original_source/src/terrain_renderer.py`
//! instead, not on the teacher's own (incompatible) shading code.

use dem_core::{error::Error, grid::ElevationGrid};
use rayon::prelude::*;

/// Grid of brightness in `[0, 1]`, 0.5 = neutral/flat.
pub struct HillshadeGrid {
	height: usize,
	width: usize,
	data: Vec<f32>,
}

impl HillshadeGrid {
	pub fn shape(&self) -> (usize, usize) { (self.height, self.width) }

	pub fn get(&self, row: usize, col: usize) -> f32 { self.data[row * self.width + col] }

	pub fn data(&self) -> &[f32] { &self.data }
}

fn bilinear_sample(grid: &ElevationGrid, y: f64, x: f64) -> Option<f32> {
	let (h, w) = grid.shape();
	if y < 0.0 || x < 0.0 || y > (h - 1) as f64 || x > (w - 1) as f64 {
		return None;
	}
	let y0 = y.floor() as usize;
	let x0 = x.floor() as usize;
	let y1 = (y0 + 1).min(h - 1);
	let x1 = (x0 + 1).min(w - 1);
	let dy = y - y0 as f64;
	let dx = x - x0 as f64;

	let v00 = grid.get(y0, x0);
	let v10 = grid.get(y0, x1);
	let v01 = grid.get(y1, x0);
	let v11 = grid.get(y1, x1);
	if v00.is_nan() || v10.is_nan() || v01.is_nan() || v11.is_nan() {
		return None;
	}

	let top = v00 as f64 * (1.0 - dx) + v10 as f64 * dx;
	let bottom = v01 as f64 * (1.0 - dx) + v11 as f64 * dx;
	Some((top * (1.0 - dy) + bottom * dy) as f32)
}

/// `R = max(max_elev - min_elev, 50)` (spec.md §4.7).
pub fn terrain_relief(min_elev: f32, max_elev: f32) -> f32 { (max_elev - min_elev).max(50.0) }

/// Computes the hillshade grid for `grid` lit from `light_dir_deg`
/// (0° = north, 90° = east) with the given intensity (percent, signed)
/// and relief reference `relief`. Rows are painted in bands of roughly
/// `height / 10` so `progress` can be polled at least every tenth of the
/// grid (spec.md §5's cancellation contract); returning `Err` from
/// `progress` aborts the computation early.
pub fn compute(
	grid: &ElevationGrid,
	light_dir_deg: f64,
	shading_intensity: f64,
	relief: f32,
	mut progress: impl FnMut(u32, u32) -> Result<(), Error>,
) -> Result<HillshadeGrid, Error> {
	let (h, w) = grid.shape();
	let theta = light_dir_deg.to_radians();
	let dx = -theta.sin();
	let dy = theta.cos();

	let mut data = vec![0.5f32; h * w];
	let band_rows = (h / 10).max(1);
	let total_rows = h.max(1) as u32;
	let mut row0 = 0;
	while row0 < h {
		let row1 = (row0 + band_rows).min(h);
		data[row0 * w..row1 * w].par_chunks_mut(w).enumerate().for_each(|(i, row)| {
			let y = row0 + i;
			for x in 0..w {
				let current = grid.get(y, x);
				if current.is_nan() {
					row[x] = 0.5;
					continue;
				}
				let neighbor = bilinear_sample(grid, y as f64 + dy, x as f64 + dx);
				row[x] = match neighbor {
					Some(neighbor) => {
						let diff = current - neighbor;
						let shade = 0.5 + (diff as f64 / relief as f64) * (shading_intensity / 100.0) * 1.2;
						shade.clamp(0.0, 1.0) as f32
					},
					None => 0.5,
				};
			}
		});
		progress(row1 as u32, total_rows)?;
		row0 = row1;
	}

	Ok(HillshadeGrid { height: h, width: w, data })
}
