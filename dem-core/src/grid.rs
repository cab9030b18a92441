//! The elevation grid: a 2D array of `f32`s with IEEE-754 NaN standing in
//! for "no data" (spec.md §3). Row 0 is the northern edge, column 0 the
//! western edge of `bounds`.

/// `(west, north, east, south)` in decimal degrees. `north > south`
/// always; `east > west` unless the window crosses the antimeridian, in
/// which case `east` may be `west + k*360` (spec.md §3).
pub type Window = (f64, f64, f64, f64);

#[derive(Clone, Debug)]
pub struct ElevationGrid {
	height: usize,
	width: usize,
	data: Vec<f32>,
	bounds: Window,
}

impl ElevationGrid {
	pub fn new(height: usize, width: usize, bounds: Window) -> Self {
		Self {
			height,
			width,
			data: vec![f32::NAN; height * width],
			bounds,
		}
	}

	pub fn from_data(height: usize, width: usize, bounds: Window, data: Vec<f32>) -> Self {
		assert_eq!(data.len(), height * width, "grid data length must match shape");
		Self {
			height,
			width,
			data,
			bounds,
		}
	}

	pub fn height(&self) -> usize { self.height }

	pub fn width(&self) -> usize { self.width }

	pub fn shape(&self) -> (usize, usize) { (self.height, self.width) }

	pub fn bounds(&self) -> Window { self.bounds }

	pub fn set_bounds(&mut self, bounds: Window) { self.bounds = bounds; }

	pub fn data(&self) -> &[f32] { &self.data }

	pub fn data_mut(&mut self) -> &mut [f32] { &mut self.data }

	pub fn into_data(self) -> Vec<f32> { self.data }

	#[inline]
	pub fn get(&self, row: usize, col: usize) -> f32 { self.data[row * self.width + col] }

	#[inline]
	pub fn set(&mut self, row: usize, col: usize, value: f32) { self.data[row * self.width + col] = value; }

	pub fn row(&self, row: usize) -> &[f32] { &self.data[row * self.width..(row + 1) * self.width] }

	pub fn row_mut(&mut self, row: usize) -> &mut [f32] { &mut self.data[row * self.width..(row + 1) * self.width] }

	/// Degrees-per-pixel along (lat, lon).
	pub fn pixel_size_degrees(&self) -> (f64, f64) {
		let (w, n, e, s) = self.bounds;
		((n - s) / self.height as f64, (e - w) / self.width as f64)
	}

	/// Finite-valued min/max over the grid; `None` if every sample is NaN.
	pub fn finite_min_max(&self) -> Option<(f32, f32)> {
		let mut min = f32::INFINITY;
		let mut max = f32::NEG_INFINITY;
		let mut any = false;
		for &v in &self.data {
			if v.is_finite() {
				any = true;
				if v < min {
					min = v;
				}
				if v > max {
					max = v;
				}
			}
		}
		any.then_some((min, max))
	}

	/// Horizontally concatenates `self` (west strip) and `other` (east
	/// strip); both must have the same height. Used to stitch
	/// antimeridian-split assemblies back together (spec.md §4.5).
	pub fn hconcat(&self, other: &ElevationGrid) -> ElevationGrid {
		assert_eq!(self.height, other.height, "hconcat requires matching heights");
		let width = self.width + other.width;
		let mut data = Vec::with_capacity(width * self.height);
		for row in 0..self.height {
			data.extend_from_slice(self.row(row));
			data.extend_from_slice(other.row(row));
		}
		let (w, n, _, s) = self.bounds;
		let (_, _, e_other, _) = other.bounds;
		ElevationGrid::from_data(self.height, width, (w, n, e_other, s), data)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn shape_matches_bounds_contract() {
		let grid = ElevationGrid::new(10, 20, (0.0, 10.0, 20.0, 0.0));
		assert_eq!(grid.shape(), (10, 20));
		let (dlat, dlon) = grid.pixel_size_degrees();
		assert!((dlat - 1.0).abs() < 1e-9);
		assert!((dlon - 1.0).abs() < 1e-9);
	}

	#[test]
	fn finite_min_max_ignores_nan() {
		let mut grid = ElevationGrid::new(2, 2, (0.0, 1.0, 1.0, 0.0));
		grid.set(0, 0, 1.0);
		grid.set(0, 1, f32::NAN);
		grid.set(1, 0, 5.0);
        grid.set(1, 1, f32::NAN);
		assert_eq!(grid.finite_min_max(), Some((1.0, 5.0)));
	}

	#[test]
	fn finite_min_max_all_nan_is_none() {
		let grid = ElevationGrid::new(2, 2, (0.0, 1.0, 1.0, 0.0));
		assert_eq!(grid.finite_min_max(), None);
	}

	#[test]
	fn hconcat_widths_add() {
		let a = ElevationGrid::new(3, 4, (170.0, 10.0, 180.0, 0.0));
		let b = ElevationGrid::new(3, 5, (-180.0, 10.0, -175.0, 0.0));
		let c = a.hconcat(&b);
		assert_eq!(c.shape(), (3, 9));
	}
}
