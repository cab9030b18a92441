//! C4: NaN-aware resampling. Grounded on
//! `other_examples/.../JoeGCServices__services-wms-api-src-rendering-resampling.rs`'s
//! row-parallel bilinear resize of a geographic grid, extended with the
//! mask-renormalization spec.md §4.4 requires: an output pixel is NaN iff
//! *every* contributing input sample is NaN, and otherwise the kernel
//! weights are renormalized over the valid subset only.

use dem_core::grid::ElevationGrid;
use rayon::prelude::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResampleMethod {
	Nearest,
	Bilinear,
	Bicubic,
	Lanczos,
}

impl ResampleMethod {
	fn radius(self) -> f64 {
		match self {
			ResampleMethod::Nearest => 0.5,
			ResampleMethod::Bilinear => 1.0,
			ResampleMethod::Bicubic => 2.0,
			ResampleMethod::Lanczos => 3.0,
		}
	}

	fn weight(self, x: f64) -> f64 {
		match self {
			ResampleMethod::Nearest => {
				if x.abs() < 0.5 {
					1.0
				} else {
					0.0
				}
			},
			ResampleMethod::Bilinear => (1.0 - x.abs()).max(0.0),
			ResampleMethod::Bicubic => cubic_convolution(x, -0.5),
			ResampleMethod::Lanczos => lanczos(x, 3.0),
		}
	}
}

fn cubic_convolution(x: f64, a: f64) -> f64 {
	let x = x.abs();
	if x <= 1.0 {
		(a + 2.0) * x * x * x - (a + 3.0) * x * x + 1.0
	} else if x < 2.0 {
		a * x * x * x - 5.0 * a * x * x + 8.0 * a * x - 4.0 * a
	} else {
		0.0
	}
}

fn lanczos(x: f64, a: f64) -> f64 {
	if x == 0.0 {
		return 1.0;
	}
	if x.abs() >= a {
		return 0.0;
	}
	let px = std::f64::consts::PI * x;
	a * (px).sin() * (px / a).sin() / (px * px)
}

/// Resizes `grid` to `(target_h, target_w)`. Guarantees (spec.md §4.4):
/// 1. output pixel is NaN iff every contributing input sample is NaN.
/// 2. otherwise, computed from the valid samples only, weights renormalized
///    to sum to 1 over the valid set.
/// 3. falls back to nearest-neighbor if a method can't be evaluated
///    (not reachable here since every method is always defined, but kept
///    as the documented contract for callers selecting by name).
pub fn resize(grid: &ElevationGrid, target_h: usize, target_w: usize, method: ResampleMethod) -> ElevationGrid {
	let (src_h, src_w) = grid.shape();
	if target_h == 0 || target_w == 0 {
		return ElevationGrid::new(target_h, target_w, grid.bounds());
	}
	if src_h == target_h && src_w == target_w {
		return grid.clone();
	}

	// Downsampling by >=2x may use integer-stride subsampling as a
	// correctness-preserving shortcut for nearest-neighbor specifically;
	// for the weighted methods we still evaluate the true kernel since it
	// is already NaN-safe and embarrassingly parallel per row.
	if method == ResampleMethod::Nearest {
		return resize_nearest(grid, target_h, target_w);
	}

	let radius = method.radius();
	let x_scale = src_w as f64 / target_w as f64;
	let y_scale = src_h as f64 / target_h as f64;

	let mut out = ElevationGrid::new(target_h, target_w, grid.bounds());
	let out_data = out.data_mut();
	out_data
		.par_chunks_mut(target_w)
		.enumerate()
		.for_each(|(oy, row)| {
			let sy = (oy as f64 + 0.5) * y_scale - 0.5;
			let y0 = (sy - radius).floor() as isize;
			let y1 = (sy + radius).ceil() as isize;

			for ox in 0..target_w {
				let sx = (ox as f64 + 0.5) * x_scale - 0.5;
				let x0 = (sx - radius).floor() as isize;
				let x1 = (sx + radius).ceil() as isize;

				let mut weighted_sum = 0.0;
				let mut weight_total = 0.0;
				for iy in y0..=y1 {
					let wy = method.weight(iy as f64 - sy);
					if wy == 0.0 {
						continue;
					}
					let clamped_y = iy.clamp(0, src_h as isize - 1) as usize;
					for ix in x0..=x1 {
						let wx = method.weight(ix as f64 - sx);
						if wx == 0.0 {
							continue;
						}
						let clamped_x = ix.clamp(0, src_w as isize - 1) as usize;
						let sample = grid.get(clamped_y, clamped_x);
						if sample.is_finite() {
							let w = wy * wx;
							weighted_sum += w * sample as f64;
							weight_total += w;
						}
					}
				}

				row[ox] = if weight_total.abs() > 1e-12 {
					(weighted_sum / weight_total) as f32
				} else {
					f32::NAN
				};
			}
		});

	out
}

fn resize_nearest(grid: &ElevationGrid, target_h: usize, target_w: usize) -> ElevationGrid {
	let (src_h, src_w) = grid.shape();
	let mut out = ElevationGrid::new(target_h, target_w, grid.bounds());
	let x_scale = src_w as f64 / target_w as f64;
	let y_scale = src_h as f64 / target_h as f64;
	let out_data = out.data_mut();
	out_data.par_chunks_mut(target_w).enumerate().for_each(|(oy, row)| {
		let sy = ((oy as f64 + 0.5) * y_scale).floor().clamp(0.0, (src_h - 1) as f64) as usize;
		for ox in 0..target_w {
			let sx = ((ox as f64 + 0.5) * x_scale).floor().clamp(0.0, (src_w - 1) as f64) as usize;
			row[ox] = grid.get(sy, sx);
		}
	});
	out
}

#[cfg(test)]
mod tests {
	use super::*;

	fn ramp(h: usize, w: usize) -> ElevationGrid {
		let mut g = ElevationGrid::new(h, w, (0.0, h as f64, w as f64, 0.0));
		for y in 0..h {
			for x in 0..w {
				g.set(y, x, (y * w + x) as f32);
			}
		}
		g
	}

	#[test]
	fn shape_matches_request() {
		let g = ramp(10, 10);
		for method in [
			ResampleMethod::Nearest,
			ResampleMethod::Bilinear,
			ResampleMethod::Bicubic,
			ResampleMethod::Lanczos,
		] {
			let out = resize(&g, 5, 7, method);
			assert_eq!(out.shape(), (5, 7));
		}
	}

	#[test]
	fn output_nan_only_where_all_inputs_nan() {
		let mut g = ElevationGrid::new(4, 4, (0.0, 4.0, 4.0, 0.0));
		for y in 0..4 {
			for x in 0..4 {
				g.set(y, x, f32::NAN);
			}
		}
		g.set(0, 0, 100.0);
		for method in [ResampleMethod::Bilinear, ResampleMethod::Bicubic, ResampleMethod::Lanczos] {
			let out = resize(&g, 8, 8, method);
			// Somewhere near the single valid sample the output must be finite.
			assert!(out.data().iter().any(|v| v.is_finite()), "{method:?} produced an all-NaN output");
		}
	}

	#[test]
	fn all_nan_input_stays_all_nan() {
		let g = ElevationGrid::new(4, 4, (0.0, 4.0, 4.0, 0.0));
		let out = resize(&g, 2, 2, ResampleMethod::Bilinear);
		assert!(out.data().iter().all(|v| v.is_nan()));
	}

	#[test]
	fn upsampling_preserves_value_range() {
		let g = ramp(4, 4);
		let (min_in, max_in) = g.finite_min_max().unwrap();
		let out = resize(&g, 16, 16, ResampleMethod::Bilinear);
		let (min_out, max_out) = out.finite_min_max().unwrap();
		assert!(min_out >= min_in - 1e-3 && max_out <= max_in + 1e-3);
	}

	#[test]
	fn nearest_is_exact_passthrough_of_existing_samples() {
		let g = ramp(3, 3);
		let out = resize(&g, 3, 3, ResampleMethod::Nearest);
		assert_eq!(out.data(), g.data());
	}
}
