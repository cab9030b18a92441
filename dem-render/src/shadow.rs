//! C8: directional height-propagation cast shadows. Grounded on the same
//! `terrain_renderer.py` neighbor-propagation loop `hillshade.rs` draws on,
//! here extended across the full grid rather than a single neighbor hop
//! (spec.md §4.8's "propagated height" scan).

use dem_core::{error::Error, grid::ElevationGrid};

/// Grid of shadow intensity in `[0, 1]`, 0 = fully lit.
pub struct ShadowGrid {
	height: usize,
	width: usize,
	data: Vec<f32>,
}

impl ShadowGrid {
	pub fn shape(&self) -> (usize, usize) { (self.height, self.width) }

	pub fn get(&self, row: usize, col: usize) -> f32 { self.data[row * self.width + col] }

	pub fn data(&self) -> &[f32] { &self.data }

	pub fn data_mut(&mut self) -> &mut [f32] { &mut self.data }
}

/// Rounds a light bearing (degrees, 0 = north, 90 = east) to the nearest
/// of the 8 compass step vectors `(dy, dx)`, walking *away* from the
/// light source.
fn compass_step(light_dir_deg: f64) -> (isize, isize) {
	// The direction the light travels, i.e. the shadow-casting direction.
	let theta = light_dir_deg.to_radians();
	let dx = theta.sin();
	let dy = -theta.cos();
	let step = |v: f64| -> isize {
		if v > 0.35 {
			1
		} else if v < -0.35 {
			-1
		} else {
			0
		}
	};
	(step(dy), step(dx))
}

/// A scan order is the sequence of grid coordinates visited so that every
/// pixel's `(y - dy, x - dx)` predecessor is visited before it, for a
/// given propagation step `(dy, dx)`.
fn scan_order(height: usize, width: usize, dy: isize, dx: isize) -> Vec<(usize, usize)> {
	let mut order = Vec::with_capacity(height * width);
	let ys: Box<dyn Iterator<Item = usize>> = if dy >= 0 {
		Box::new(0..height)
	} else {
		Box::new((0..height).rev())
	};
	for y in ys {
		let xs: Box<dyn Iterator<Item = usize>> = if dx >= 0 {
			Box::new(0..width)
		} else {
			Box::new((0..width).rev())
		};
		for x in xs {
			order.push((y, x));
		}
	}
	order
}

fn propagate(grid: &ElevationGrid, dy: isize, dx: isize, shadow_drop: f32, on_row: &mut dyn FnMut() -> Result<(), Error>) -> Result<Vec<f32>, Error> {
	let (h, w) = grid.shape();
	let mut propagated = vec![f32::NEG_INFINITY; h * w];
	let ys: Box<dyn Iterator<Item = usize>> = if dy >= 0 { Box::new(0..h) } else { Box::new((0..h).rev()) };
	for y in ys {
		let xs: Box<dyn Iterator<Item = usize>> = if dx >= 0 { Box::new(0..w) } else { Box::new((0..w).rev()) };
		for x in xs {
			let elevation = grid.get(y, x);
			let origin_height = if elevation.is_nan() { f32::NEG_INFINITY } else { elevation };

			let py = y as isize - dy;
			let px = x as isize - dx;
			let predecessor = if py >= 0 && py < h as isize && px >= 0 && px < w as isize {
				propagated[py as usize * w + px as usize] - shadow_drop
			} else {
				f32::NEG_INFINITY
			};

			propagated[y * w + x] = origin_height.max(predecessor);
		}
		on_row()?;
	}
	Ok(propagated)
}

/// Tracks progress across `propagate`'s row-sequential scan (and, for
/// diagonal light directions, its two orthogonal passes), throttling calls
/// into the caller's `progress` to roughly every tenth of the total rows
/// scanned (spec.md §5's cancellation contract).
struct Ticker {
	done: u32,
	band: u32,
	total: u32,
}

impl Ticker {
	fn tick(&mut self, progress: &mut dyn FnMut(u32, u32) -> Result<(), Error>) -> Result<(), Error> {
		self.done += 1;
		if self.done % self.band == 0 || self.done == self.total {
			progress(self.done, self.total)?;
		}
		Ok(())
	}
}

/// Computes the cast-shadow mask for `grid` lit from `light_dir_deg`, with
/// the given per-pixel height-loss rate and optional soft-edge blur
/// radius (0 disables the blur). Returning `Err` from `progress` aborts
/// the computation early.
pub fn compute(
	grid: &ElevationGrid,
	light_dir_deg: f64,
	shadow_drop: f32,
	soft_edge: usize,
	mut progress: impl FnMut(u32, u32) -> Result<(), Error>,
) -> Result<ShadowGrid, Error> {
	let (h, w) = grid.shape();
	let (dy, dx) = compass_step(light_dir_deg);
	let diagonal = dy != 0 && dx != 0;
	let num_passes: u32 = if diagonal { 3 } else { 1 };
	let total_rows = (h as u32).max(1) * num_passes;
	let mut ticker = Ticker { done: 0, band: (total_rows / 10).max(1), total: total_rows };

	let primary = propagate(grid, dy, dx, shadow_drop, &mut || ticker.tick(&mut progress))?;
	// Orthogonal pass for directions not aligned to a compass axis
	// (spec.md §4.8 #5): combine by max propagated height.
	let combined = if diagonal {
		let ortho_a = propagate(grid, dy, 0, shadow_drop, &mut || ticker.tick(&mut progress))?;
		let ortho_b = propagate(grid, 0, dx, shadow_drop, &mut || ticker.tick(&mut progress))?;
		primary
			.iter()
			.zip(ortho_a.iter())
			.zip(ortho_b.iter())
			.map(|((a, b), c)| a.max(*b).max(*c))
			.collect::<Vec<_>>()
	} else {
		primary
	};

	let mut data = vec![0.0f32; h * w];
	for y in 0..h {
		for x in 0..w {
			let elevation = grid.get(y, x);
			if elevation.is_nan() {
				// NaN cells can still receive a shadow from neighbors.
				let p = combined[y * w + x];
				data[y * w + x] = if p.is_finite() { 1.0 } else { 0.0 };
				continue;
			}
			let p = combined[y * w + x];
			data[y * w + x] = if p > elevation {
				((p - elevation) / shadow_drop).min(1.0)
			} else {
				0.0
			};
		}
	}

	let mut mask = ShadowGrid { height: h, width: w, data };
	if soft_edge > 0 {
		box_blur(&mut mask, soft_edge);
	}
	Ok(mask)
}

/// Separable box blur, horizontal pass then vertical, each of radius
/// `radius`. Keeps values in `[0, 1]` by construction (averaging inputs
/// already in that range).
fn box_blur(mask: &mut ShadowGrid, radius: usize) {
	let (h, w) = mask.shape();
	let horizontal = blur_1d(&mask.data, h, w, radius, true);
	let vertical = blur_1d(&horizontal, h, w, radius, false);
	mask.data_mut().copy_from_slice(&vertical);
}

fn blur_1d(data: &[f32], h: usize, w: usize, radius: usize, along_rows: bool) -> Vec<f32> {
	let mut out = vec![0.0f32; h * w];
	if along_rows {
		for y in 0..h {
			for x in 0..w {
				let lo = x.saturating_sub(radius);
				let hi = (x + radius).min(w - 1);
				let mut sum = 0.0;
				for i in lo..=hi {
					sum += data[y * w + i];
				}
				out[y * w + x] = sum / (hi - lo + 1) as f32;
			}
		}
	} else {
		for y in 0..h {
			let lo = y.saturating_sub(radius);
			let hi = (y + radius).min(h - 1);
			for x in 0..w {
				let mut sum = 0.0;
				for i in lo..=hi {
					sum += data[i * w + x];
				}
				out[y * w + x] = sum / (hi - lo + 1) as f32;
			}
		}
	}
	out
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn flat_grid_casts_no_shadow() {
		let mut grid = ElevationGrid::new(6, 6, (0.0, 6.0, 6.0, 0.0));
		for v in grid.data_mut() {
			*v = 10.0;
		}
		let shadow = compute(&grid, 315.0, 2.0, 0, |_, _| Ok(())).unwrap();
		assert!(shadow.data().iter().all(|&v| v == 0.0));
	}

	#[test]
	fn a_tall_peak_casts_shadow_downhill_from_the_light() {
		// A single spike in an otherwise flat plain, light from due north
		// (sun travels south, shadow falls to the south of the peak).
		let mut grid = ElevationGrid::new(5, 5, (0.0, 5.0, 5.0, 0.0));
		for v in grid.data_mut() {
			*v = 0.0;
		}
		grid.set(1, 2, 100.0);
		let shadow = compute(&grid, 0.0, 5.0, 0, |_, _| Ok(())).unwrap();
		assert!(shadow.get(2, 2) > 0.0, "pixel south of the peak should be shadowed");
		assert_eq!(shadow.get(0, 2), 0.0, "pixel north of the peak (toward the light) stays lit");
	}

	#[test]
	fn nan_cells_do_not_originate_shadow_but_can_receive_it() {
		let mut grid = ElevationGrid::new(4, 4, (0.0, 4.0, 4.0, 0.0));
		for v in grid.data_mut() {
			*v = 0.0;
		}
		grid.set(1, 1, f32::NAN);
		let shadow = compute(&grid, 0.0, 5.0, 0, |_, _| Ok(())).unwrap();
		// An isolated NaN surrounded by flat land of equal height casts
		// nothing onto its lit neighbors.
		assert_eq!(shadow.get(2, 1), 0.0);
	}

	#[test]
	fn soft_edge_blur_keeps_values_in_unit_range() {
		let mut grid = ElevationGrid::new(8, 8, (0.0, 8.0, 8.0, 0.0));
		for v in grid.data_mut() {
			*v = 0.0;
		}
		grid.set(2, 4, 200.0);
		let shadow = compute(&grid, 0.0, 5.0, 2, |_, _| Ok(())).unwrap();
		assert!(shadow.data().iter().all(|&v| (0.0..=1.0).contains(&v)));
	}
}
