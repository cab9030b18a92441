//! C5: assembles a requested geographic window from however many
//! catalog tiles intersect it. Grounded on `geo/src/dataset.rs`'s
//! mmap-backed on-disk store for the chunked-to-disk scratch raster, and
//! on the tie-break this crate's catalog (C3) defers: "larger
//! `pixels_per_degree` wins, ties by lexicographic path" is applied here
//! as the paint order, since only the assembler actually overlays tiles.

use std::{
	io::{Seek, SeekFrom, Write},
	path::{Path, PathBuf},
};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use dem_core::{
	catalog::{Catalog, TileRecord},
	error::Error,
	grid::{ElevationGrid, Window},
	reader::{self, crop_to_window},
};
use sysinfo::System;

use crate::{
	config::RunConfig,
	resample::{self, ResampleMethod},
};

const NODATA_SENTINEL_I16: i16 = -9999;

pub enum ProgressEvent {
	ChunkAssembled { rows_done: u32, total_rows: u32 },
	TileSkipped { path: PathBuf, reason: String },
}

/// Either a fully in-memory grid or a pointer to a big-endian int16
/// scratch raster plus its companion text header (spec.md §4.5 #5),
/// with a uniform row-read interface over both.
#[derive(Debug)]
pub enum Assembly {
	InMemory(ElevationGrid),
	OnDisk {
		raw_path: PathBuf,
		header_path: PathBuf,
		bounds: Window,
		height: usize,
		width: usize,
		pixels_per_degree: f64,
	},
}

impl Assembly {
	pub fn shape(&self) -> (usize, usize) {
		match self {
			Assembly::InMemory(grid) => grid.shape(),
			Assembly::OnDisk { height, width, .. } => (*height, *width),
		}
	}

	pub fn bounds(&self) -> Window {
		match self {
			Assembly::InMemory(grid) => grid.bounds(),
			Assembly::OnDisk { bounds, .. } => *bounds,
		}
	}

	pub fn read_row(&self, row: usize) -> Result<Vec<f32>, Error> {
		match self {
			Assembly::InMemory(grid) => Ok(grid.row(row).to_vec()),
			Assembly::OnDisk { raw_path, width, .. } => {
				let mut file = std::fs::File::open(raw_path).map_err(|e| Error::WriteError(e.to_string()))?;
				file.seek(SeekFrom::Start((row * width * 2) as u64))
					.map_err(|e| Error::WriteError(e.to_string()))?;
				let mut out = Vec::with_capacity(*width);
				for _ in 0..*width {
					let v = file.read_i16::<BigEndian>().map_err(|e| Error::WriteError(e.to_string()))?;
					out.push(if v == NODATA_SENTINEL_I16 { f32::NAN } else { v as f32 });
				}
				Ok(out)
			},
		}
	}
}

#[derive(Debug, Clone, Copy)]
pub struct AssembleOptions {
	pub target_pixels_per_degree: f64,
	pub resample_method: ResampleMethod,
	pub chunk_size_mb: u64,
	pub max_memory_percent: f64,
	pub max_output_pixels: u64,
}

impl AssembleOptions {
	pub fn from_run_config(cfg: &RunConfig, target_pixels_per_degree: f64, resample_method: ResampleMethod) -> Self {
		AssembleOptions {
			target_pixels_per_degree,
			resample_method,
			chunk_size_mb: cfg.chunk_size_mb,
			max_memory_percent: cfg.max_memory_percent,
			max_output_pixels: cfg.max_output_pixels,
		}
	}
}

fn windows_intersect(a: Window, b: Window) -> bool { !(a.2 <= b.0 || a.0 >= b.2 || a.1 <= b.3 || a.3 >= b.1) }

fn intersect_windows(a: Window, b: Window) -> Window { (a.0.max(b.0), a.1.min(b.1), a.2.min(b.2), a.3.max(b.3)) }

fn window_intersects_coverage(coverage: Window, window: Window) -> bool {
	dem_core::meridian::split_meridian_crossing(window.0, window.1, window.2, window.3)
		.into_iter()
		.any(|w| windows_intersect(coverage, w))
}

fn lat_to_row(window: Window, height: usize, lat: f64) -> usize {
	let (_, n, _, s) = window;
	let dlat = (n - s) / height as f64;
	(((n - lat) / dlat).round() as isize).clamp(0, height as isize) as usize
}

fn window_for_rows(window: Window, height: usize, row0: usize, row1: usize) -> Window {
	let (w, n, e, s) = window;
	let dlat = (n - s) / height as f64;
	(w, n - row0 as f64 * dlat, e, n - row1 as f64 * dlat)
}

/// Paint order for same-pass overlaps (spec.md §4.3/§4.5): the tile with
/// the greatest `pixels_per_degree` paints last, winning the overlap;
/// ties are broken by path so the order is deterministic.
fn order_for_paint(mut tiles: Vec<TileRecord>) -> Vec<TileRecord> {
	tiles.sort_by(|a, b| a.pixels_per_degree.partial_cmp(&b.pixels_per_degree).unwrap().then(a.path.cmp(&b.path)));
	tiles
}

fn row_band_height(width: usize, chunk_size_mb: u64) -> usize {
	let bytes_per_row = (width.max(1) * 4) as u64;
	let budget = chunk_size_mb * 1024 * 1024;
	(budget / bytes_per_row.max(1)).max(1) as usize
}

/// Paints tiles overlapping rows `row0..row1` of `window` into `grid`.
/// `full_height` is the row count of the *strip* (used for the geographic
/// row<->latitude mapping), which may differ from `grid.height()` when
/// `grid` holds only this one band (`out_row_offset` then gives the row
/// in `grid` that corresponds to global row `row0`).
fn paint_band(
	grid: &mut ElevationGrid,
	tiles: &[TileRecord],
	window: Window,
	full_height: usize,
	row0: usize,
	row1: usize,
	out_row_offset: usize,
	method: ResampleMethod,
	progress: &mut dyn FnMut(ProgressEvent),
) {
	let (ww, _, we, _) = window;
	let width = grid.width();
	let dlon = (we - ww) / width as f64;
	let band_window = window_for_rows(window, full_height, row0, row1);

	for tile in tiles {
		let tb = tile.bounds();
		if !windows_intersect(tb, band_window) {
			continue;
		}
		let overlap = intersect_windows(tb, band_window);

		let reader = match reader::open(&tile.path) {
			Ok(r) => r,
			Err(e) => {
				log::warn!("skipping unreadable tile {}: {e}", tile.path.display());
				progress(ProgressEvent::TileSkipped { path: tile.path.clone(), reason: e.to_string() });
				continue;
			},
		};
		let tile_grid = match reader.load() {
			Ok(g) => g,
			Err(e) => {
				log::warn!("skipping unloadable tile {}: {e}", tile.path.display());
				progress(ProgressEvent::TileSkipped { path: tile.path.clone(), reason: e.to_string() });
				continue;
			},
		};
		let cropped = crop_to_window(&tile_grid, tb, overlap);

		let out_col0 = (((overlap.0 - ww) / dlon).round().clamp(0.0, width as f64)) as usize;
		let out_col1 = (((overlap.2 - ww) / dlon).round().clamp(0.0, width as f64)) as usize;
		let out_row0 = lat_to_row(window, full_height, overlap.1).max(row0);
		let out_row1 = lat_to_row(window, full_height, overlap.3).min(row1);

		if out_col1 <= out_col0 || out_row1 <= out_row0 {
			continue;
		}
		let out_w = out_col1 - out_col0;
		let band_row0 = lat_to_row(window, full_height, overlap.1);
		let out_h_full = lat_to_row(window, full_height, overlap.3).saturating_sub(band_row0).max(1);

		let resampled = resample::resize(&cropped, out_h_full, out_w, method);
		for global_row in out_row0..out_row1 {
			let r = global_row - band_row0;
			if r >= out_h_full {
				continue;
			}
			for c in 0..out_w {
				let sample = resampled.get(r, c);
				if sample.is_finite() {
					grid.set(global_row - out_row_offset, out_col0 + c, sample);
				}
			}
		}
	}
}

fn assemble_strip(
	catalog: &Catalog,
	window: Window,
	height: usize,
	width: usize,
	options: &AssembleOptions,
	progress: &mut dyn FnMut(ProgressEvent),
) -> ElevationGrid {
	let tiles = order_for_paint(catalog.tiles_for_window(window));
	let mut grid = ElevationGrid::new(height, width, window);

	let row_band = row_band_height(width, options.chunk_size_mb);
	let mut row0 = 0;
	while row0 < height {
		let row1 = (row0 + row_band).min(height);
		paint_band(&mut grid, &tiles, window, height, row0, row1, 0, options.resample_method, progress);
		progress(ProgressEvent::ChunkAssembled {
			rows_done: row1 as u32,
			total_rows: height as u32,
		});
		row0 = row1;
	}
	grid
}

/// Largest tile (in pixels) intersecting any of `sub_windows`, the
/// per-tile working buffer `resample::resize` allocates while painting a
/// band (spec.md §4.5 step 2's memory pre-flight).
fn largest_intersecting_tile_pixels(catalog: &Catalog, sub_windows: &[Window]) -> u64 {
	let mut largest = 0u64;
	for w in sub_windows {
		for tile in catalog.tiles_for_window(*w) {
			largest = largest.max(tile.width_px as u64 * tile.height_px as u64);
		}
	}
	largest
}

pub(crate) fn write_header(path: &Path, h: usize, w: usize, bounds: Window) -> Result<(), Error> {
	let (west, north, east, south) = bounds;
	let xdim = (east - west) / w as f64;
	let ydim = (north - south) / h as f64;
	let text = format!(
		"BYTEORDER M\nLAYOUT BIL\nNROWS {h}\nNCOLS {w}\nNBANDS 1\nNBITS 16\nNODATA -9999\nULXMAP {:.10}\nULYMAP {:.10}\nXDIM {:.10}\nYDIM {:.10}\n",
		west + xdim / 2.0,
		north - ydim / 2.0,
		xdim,
		ydim
	);
	std::fs::write(path, text).map_err(|e| Error::WriteError(e.to_string()))
}

/// Assembles straight to a big-endian int16 scratch file, one row band at
/// a time, so the full grid is never resident in memory (spec.md §4.5 #5
/// "on-disk" path). Each band is painted per strip at band height, then
/// the strips' bands are concatenated west-to-east before being written,
/// mirroring the in-memory path's `hconcat` without materializing it.
fn stream_to_disk(
	catalog: &Catalog,
	sub_windows: &[Window],
	strip_dims: &[(usize, usize)],
	total_h: usize,
	total_w: usize,
	full_bounds: Window,
	options: &AssembleOptions,
	progress: &mut dyn FnMut(ProgressEvent),
) -> Result<Assembly, Error> {
	let tiles_per_strip: Vec<Vec<TileRecord>> =
		sub_windows.iter().map(|w| order_for_paint(catalog.tiles_for_window(*w))).collect();

	let tmp = tempfile::Builder::new()
		.prefix("dem-assembly-")
		.suffix(".raw")
		.tempfile()
		.map_err(|e| Error::WriteError(e.to_string()))?;
	let raw_path = tmp.into_temp_path().keep().map_err(|e| Error::WriteError(e.to_string()))?;

	{
		let mut file = std::fs::File::create(&raw_path).map_err(|e| Error::WriteError(e.to_string()))?;
		let row_band = row_band_height(total_w, options.chunk_size_mb);
		let mut row0 = 0;
		while row0 < total_h {
			let row1 = (row0 + row_band).min(total_h);

			let mut bands: Vec<ElevationGrid> = Vec::with_capacity(sub_windows.len());
			for ((window, (_, width)), tiles) in sub_windows.iter().zip(strip_dims.iter()).zip(tiles_per_strip.iter()) {
				let band_window = window_for_rows(*window, total_h, row0, row1);
				let mut band_grid = ElevationGrid::new(row1 - row0, *width, band_window);
				paint_band(&mut band_grid, tiles, *window, total_h, row0, row1, row0, options.resample_method, progress);
				bands.push(band_grid);
			}

			let mut buf = Vec::with_capacity((row1 - row0) * total_w * 2);
			for r in 0..(row1 - row0) {
				for band in &bands {
					for c in 0..band.width() {
						let v = band.get(r, c);
						let sentinel = if v.is_nan() { NODATA_SENTINEL_I16 } else { v.round() as i16 };
						buf.write_i16::<BigEndian>(sentinel).map_err(|e| Error::WriteError(e.to_string()))?;
					}
				}
			}
			file.write_all(&buf).map_err(|e| Error::WriteError(e.to_string()))?;
			progress(ProgressEvent::ChunkAssembled { rows_done: row1 as u32, total_rows: total_h as u32 });
			row0 = row1;
		}
	}

	let header_path = raw_path.with_extension("hdr");
	write_header(&header_path, total_h, total_w, full_bounds)?;

	log::debug!("assembly spilled to disk: {total_h}x{total_w} px at {}", raw_path.display());

	Ok(Assembly::OnDisk {
		raw_path,
		header_path,
		bounds: full_bounds,
		height: total_h,
		width: total_w,
		pixels_per_degree: options.target_pixels_per_degree,
	})
}

/// Assembles `window` from `catalog` at `options.target_pixels_per_degree`
/// (spec.md §4.5). Splits antimeridian-crossing windows via C1, assembles
/// each resulting strip independently, then concatenates west-to-east.
pub fn assemble(
	catalog: &Catalog,
	window: Window,
	options: &AssembleOptions,
	mut progress: impl FnMut(ProgressEvent),
) -> Result<Assembly, Error> {
	if catalog.is_empty() {
		return Err(Error::EmptyCatalog);
	}
	if !window_intersects_coverage(catalog.coverage_window(), window) {
		return Err(Error::WindowOutsideCoverage);
	}

	log::debug!("assemble: window={window:?} target_ppd={}", options.target_pixels_per_degree);

	let sub_windows = dem_core::meridian::split_meridian_crossing(window.0, window.1, window.2, window.3);
	let mut strip_dims = Vec::with_capacity(sub_windows.len());
	let mut total_w = 0usize;
	let mut total_h = 0usize;
	for w in &sub_windows {
		let (sw, sn, se, ss) = *w;
		let h = ((sn - ss) * options.target_pixels_per_degree).round().max(1.0) as usize;
		let width = ((se - sw) * options.target_pixels_per_degree).round().max(1.0) as usize;
		total_h = h;
		total_w += width;
		strip_dims.push((h, width));
	}

	let total_pixels = total_h as u64 * total_w as u64;
	if total_pixels > options.max_output_pixels {
		let recommended_scale = (options.max_output_pixels as f64 / total_pixels as f64).sqrt();
		return Err(Error::OutputTooLarge { recommended_scale });
	}

	// Pre-flight estimate: the output grid itself, plus the single largest
	// per-tile resample working buffer `paint_band` holds resident while
	// painting a band (spec.md §4.5 step 2).
	let working_buffer_pixels = largest_intersecting_tile_pixels(catalog, &sub_windows);
	let estimated_bytes = (total_pixels + working_buffer_pixels) * 4;
	let mut sys = System::new();
	sys.refresh_memory();
	let total_memory = sys.total_memory().max(1);
	let available_memory = sys.available_memory();

	if estimated_bytes as f64 > options.max_memory_percent * total_memory as f64 {
		let limit = options.max_memory_percent * total_memory as f64;
		let recommended_scale = (limit / estimated_bytes as f64).sqrt();
		return Err(Error::OutputTooLarge { recommended_scale });
	}
	let use_in_memory = estimated_bytes as f64 <= 0.5 * available_memory as f64;
	log::debug!(
		"assemble: {total_h}x{total_w} px, estimated {estimated_bytes} bytes, strategy={}",
		if use_in_memory { "in-memory" } else { "on-disk" }
	);

	if use_in_memory {
		let mut strips: Vec<ElevationGrid> = Vec::with_capacity(sub_windows.len());
		for (w, (h, width)) in sub_windows.iter().zip(strip_dims.iter()) {
			strips.push(assemble_strip(catalog, *w, *h, *width, options, &mut progress));
		}

		let mut combined = strips.remove(0);
		for strip in strips {
			combined = combined.hconcat(&strip);
		}
		combined.set_bounds(window);

		Ok(Assembly::InMemory(combined))
	} else {
		stream_to_disk(catalog, &sub_windows, &strip_dims, total_h, total_w, window, options, &mut progress)
	}
}
