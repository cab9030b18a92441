//! The tagged-image raster variant (spec.md §4.2 #2): a GeoTIFF carrying
//! an embedded affine transform. Grounded on
//! `justmytwospence-firsttracks/pathfinder/src/raster.rs`'s use of
//! `georaster::geotiff::GeoTiffReader` and `RasterValue`.

use std::{fs::File, path::Path};

use georaster::geotiff::{GeoTiffReader, RasterValue};

use super::DemReader;
use crate::{error::ReaderError, grid::ElevationGrid, grid::Window};

pub struct TaggedImageReader {
	path: std::path::PathBuf,
	bounds: Window,
	width_px: u32,
	height_px: u32,
	pixels_per_degree: f64,
}

impl TaggedImageReader {
	pub fn open(path: &Path) -> Result<Self, ReaderError> {
		let file = File::open(path)?;
		let mut geotiff = GeoTiffReader::open(file)
			.map_err(|e| ReaderError::UnreadableHeader(format!("{e}")))?;

		let (width_px, height_px) = geotiff
			.image_info()
			.dimensions
			.ok_or_else(|| ReaderError::NotElevationData("missing image dimensions".into()))?;

		let origin = geotiff
			.origin()
			.ok_or_else(|| ReaderError::NotElevationData("no georeferencing (missing tie points)".into()))?;
		let pixel_size = geotiff
			.pixel_size()
			.ok_or_else(|| ReaderError::NotElevationData("no georeferencing (missing pixel scale)".into()))?;

		// `origin` is the geographic coordinate of the upper-left pixel's
		// outer corner; `pixel_size` is (x, y) with y conventionally
		// negative (north-up).
		let west = origin[0];
		let north = origin[1];
		let east = west + width_px as f64 * pixel_size[0];
		let south = north - height_px as f64 * pixel_size[1].abs();

		// Reject ordinary pictures: probe a single pixel and make sure it
		// decodes to a numeric elevation sample rather than e.g. an RGB
		// triplet.
		let mut probe = geotiff.pixels(0, 0, 1, 1);
		match probe.next() {
			Some((_, _, RasterValue::F32(_)))
			| Some((_, _, RasterValue::F64(_)))
			| Some((_, _, RasterValue::I16(_)))
			| Some((_, _, RasterValue::U16(_)))
			| Some((_, _, RasterValue::I32(_))) => {},
			Some((_, _, other)) => {
				return Err(ReaderError::NotElevationData(format!(
					"expected a single numeric elevation band, found {other:?}"
				)));
			},
			None => return Err(ReaderError::NotElevationData("empty raster".into())),
		}
		drop(probe);

		Ok(Self {
			path: path.to_path_buf(),
			bounds: (west, north, east, south),
			width_px,
			height_px,
			pixels_per_degree: 1.0 / pixel_size[0].abs(),
		})
	}
}

impl DemReader for TaggedImageReader {
	fn bounds(&self) -> Window { self.bounds }

	fn width_px(&self) -> u32 { self.width_px }

	fn height_px(&self) -> u32 { self.height_px }

	fn pixels_per_degree(&self) -> f64 { self.pixels_per_degree }

	fn no_data_sentinel(&self) -> f64 { f64::NAN }

	fn load(&self) -> Result<ElevationGrid, ReaderError> {
		let file = File::open(&self.path)?;
		let mut geotiff = GeoTiffReader::open(file).map_err(|e| ReaderError::UnreadableHeader(format!("{e}")))?;

		let (w, h) = (self.width_px as usize, self.height_px as usize);
		let mut data = vec![f32::NAN; w * h];
		for (x, y, value) in geotiff.pixels(0, 0, self.width_px, self.height_px) {
			let v = match value {
				RasterValue::F32(v) => v,
				RasterValue::F64(v) => v as f32,
				RasterValue::I16(v) => v as f32,
				RasterValue::U16(v) => v as f32,
				RasterValue::I32(v) => v as f32,
				RasterValue::NoData => f32::NAN,
				_ => f32::NAN,
			};
			data[y as usize * w + x as usize] = v;
		}

		Ok(ElevationGrid::from_data(h, w, self.bounds, data))
	}
}
