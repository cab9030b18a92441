//! C2: decode a single elevation raster to a 2D float grid plus geographic
//! metadata. Polymorphic over two container variants (spec.md §4.2):
//! band-interleaved integer rasters (`.bil` + `.hdr`) and tagged-image
//! rasters (GeoTIFF).

mod band_interleaved;
mod tagged_image;

use std::path::Path;

pub use band_interleaved::BandInterleavedReader;
pub use tagged_image::TaggedImageReader;

use crate::{error::ReaderError, grid::ElevationGrid, grid::Window};

/// Common interface every container format exposes (spec.md §4.2).
pub trait DemReader {
	fn bounds(&self) -> Window;

	fn width_px(&self) -> u32;

	fn height_px(&self) -> u32;

	fn pixels_per_degree(&self) -> f64;

	/// The no-data sentinel in the source's native encoding (before
	/// conversion to NaN).
	fn no_data_sentinel(&self) -> f64;

	/// Eager full read; substitutes NaN for the sentinel.
	fn load(&self) -> Result<ElevationGrid, ReaderError>;

	/// Crops to `window` after loading. Implementations may override this
	/// with a true random-access fast path; the default is correct but
	/// reads the whole file.
	fn load_subset(&self, window: Window) -> Result<ElevationGrid, ReaderError> {
		let full = self.load()?;
		Ok(crop_to_window(&full, self.bounds(), window))
	}
}

/// Crops `grid` (covering `grid_bounds`) to the intersection with `window`,
/// snapping to the nearest pixel edges. Shared by every reader's default
/// `load_subset` and by C5 assembly's per-tile overlap step.
pub fn crop_to_window(grid: &ElevationGrid, grid_bounds: Window, window: Window) -> ElevationGrid {
	let (gw, gn, ge, gs) = grid_bounds;
	let (ww, wn, we, ws) = window;
	let (h, w) = grid.shape();
	let (dlat, dlon) = ((gn - gs) / h as f64, (ge - gw) / w as f64);

	let clamp_col = |lon: f64| -> usize { (((lon - gw) / dlon).round().clamp(0.0, w as f64) as usize).min(w) };
	let clamp_row = |lat: f64| -> usize { (((gn - lat) / dlat).round().clamp(0.0, h as f64) as usize).min(h) };

	let col0 = clamp_col(ww.max(gw));
	let col1 = clamp_col(we.min(ge)).max(col0);
	let row0 = clamp_row(wn.min(gn));
	let row1 = clamp_row(ws.max(gs)).max(row0);

	let out_h = row1 - row0;
	let out_w = col1 - col0;
	let mut out = ElevationGrid::new(out_h.max(1), out_w.max(1), window);
	for r in 0..out_h {
		for c in 0..out_w {
			out.set(r, c, grid.get(row0 + r, col0 + c));
		}
	}
	out
}

/// Opens `path`, sniffing the container format by extension. `.bil`/`.hdr`
/// pairs go through [`BandInterleavedReader`]; anything else is attempted
/// as a tagged image.
pub fn open(path: &Path) -> Result<Box<dyn DemReader>, ReaderError> {
	if !path.exists() {
		return Err(ReaderError::FileNotFound);
	}

	let ext = path
		.extension()
		.and_then(|e| e.to_str())
		.map(|s| s.to_ascii_lowercase())
		.unwrap_or_default();

	match ext.as_str() {
		"bil" | "hdr" => Ok(Box::new(BandInterleavedReader::open(path)?)),
		_ => Ok(Box::new(TaggedImageReader::open(path)?)),
	}
}
