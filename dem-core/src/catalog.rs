//! C3: discover tiles in a folder, persist/load a catalog, and answer
//! "which tiles cover window W?". Grounded on `render/src/lib.rs`'s
//! `Renderer::new`, which reads a `_meta` manifest listing per-tile
//! files relative to a data folder; generalized into a scanned and
//! JSON-persisted catalog with real geographic bounds per tile.

use std::{
	fs,
	path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
	error::CatalogError,
	grid::Window,
	meridian::split_meridian_crossing,
	reader,
};

const CATALOG_FILE_NAME: &str = "catalog.json";
const CATALOG_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TileRecord {
	pub path: PathBuf,
	pub west: f64,
	pub north: f64,
	pub east: f64,
	pub south: f64,
	pub width_px: u32,
	pub height_px: u32,
	pub pixels_per_degree: f64,
}

impl TileRecord {
	pub fn bounds(&self) -> Window { (self.west, self.north, self.east, self.south) }

	fn intersects(&self, window: Window) -> bool {
		let (ww, wn, we, ws) = window;
		!(we <= self.west || ww >= self.east || wn <= self.south || ws >= self.north)
	}
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Coverage {
	pub west: f64,
	pub north: f64,
	pub east: f64,
	pub south: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Catalog {
	pub version: u32,
	pub created_by: String,
	pub created_at: DateTime<Utc>,
	pub tiles: Vec<TileRecord>,
	pub coverage: Coverage,
}

impl Catalog {
	fn from_tiles(tiles: Vec<TileRecord>) -> Self {
		let coverage = Self::compute_coverage(&tiles);
		Catalog {
			version: CATALOG_VERSION,
			created_by: "dem-core".to_string(),
			created_at: Utc::now(),
			tiles,
			coverage,
		}
	}

	fn compute_coverage(tiles: &[TileRecord]) -> Coverage {
		if tiles.is_empty() {
			return Coverage {
				west: 0.0,
				north: 0.0,
				east: 0.0,
				south: 0.0,
			};
		}
		let mut west = f64::INFINITY;
		let mut east = f64::NEG_INFINITY;
		let mut north = f64::NEG_INFINITY;
		let mut south = f64::INFINITY;
		for t in tiles {
			west = west.min(t.west);
			east = east.max(t.east);
			north = north.max(t.north);
			south = south.min(t.south);
		}
		Coverage { west, north, east, south }
	}

	/// Walks `folder`, probing each candidate file's cheap metadata with
	/// [`reader::open`]. Unreadable files are skipped; if every probe
	/// fails the catalog is empty (not an error — spec.md §4.3).
	pub fn scan(folder: &Path) -> Result<Catalog, CatalogError> {
		log::debug!("scanning {} for tiles", folder.display());
		let mut tiles = Vec::new();
		for entry in fs::read_dir(folder)? {
			let entry = entry?;
			let path = entry.path();
			if !path.is_file() {
				continue;
			}
			// The `.hdr` half of a band-interleaved pair and the catalog's
			// own persisted file are not independent tiles.
			if path.file_name().and_then(|n| n.to_str()) == Some(CATALOG_FILE_NAME) {
				continue;
			}
			if path.extension().and_then(|e| e.to_str()).map(|e| e.eq_ignore_ascii_case("bil")) == Some(true) {
				continue;
			}

			match reader::open(&path) {
				Ok(r) => {
					let (w, n, e, s) = r.bounds();
					tiles.push(TileRecord {
						path: path.clone(),
						west: w,
						north: n,
						east: e,
						south: s,
						width_px: r.width_px(),
						height_px: r.height_px(),
						pixels_per_degree: r.pixels_per_degree(),
					});
				},
				Err(e) => {
					log::warn!("skipping unreadable candidate {}: {e}", path.display());
					continue;
				},
			}
		}

		// Deterministic ascending order: north->south, then west->east
		// (spec.md §4.3).
		tiles.sort_by(|a, b| {
			b.north
				.partial_cmp(&a.north)
				.unwrap()
				.then(a.west.partial_cmp(&b.west).unwrap())
				.then(a.path.cmp(&b.path))
		});

		let catalog = Catalog::from_tiles(tiles);
		log::info!("scanned {} tile(s) under {}", catalog.tiles.len(), folder.display());
		Ok(catalog)
	}

	/// Loads a previously persisted catalog file from `folder`, if
	/// present.
	pub fn load(folder: &Path) -> Result<Option<Catalog>, CatalogError> {
		let path = folder.join(CATALOG_FILE_NAME);
		if !path.exists() {
			return Ok(None);
		}
		let text = fs::read_to_string(path)?;
		Ok(Some(serde_json::from_str(&text)?))
	}

	pub fn save(&self, folder: &Path) -> Result<(), CatalogError> {
		let path = folder.join(CATALOG_FILE_NAME);
		let text = serde_json::to_string_pretty(self)?;
		fs::write(path, text)?;
		Ok(())
	}

	pub fn is_empty(&self) -> bool { self.tiles.is_empty() }

	pub fn coverage_window(&self) -> Window {
		(self.coverage.west, self.coverage.north, self.coverage.east, self.coverage.south)
	}

	/// Tiles intersecting `window`, split across the antimeridian first if
	/// needed (spec.md §4.3), deduplicated and kept in catalog order.
	pub fn tiles_for_window(&self, window: Window) -> Vec<TileRecord> {
		let sub_windows = split_meridian_crossing(window.0, window.1, window.2, window.3);
		let mut seen = std::collections::HashSet::new();
		let mut out = Vec::new();
		for w in sub_windows {
			for t in &self.tiles {
				if t.intersects(w) && seen.insert(t.path.clone()) {
					out.push(t.clone());
				}
			}
		}
		out
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn tile(path: &str, w: f64, n: f64, e: f64, s: f64) -> TileRecord {
		TileRecord {
			path: PathBuf::from(path),
			west: w,
			north: n,
			east: e,
			south: s,
			width_px: 100,
			height_px: 100,
			pixels_per_degree: 10.0,
		}
	}

	#[test]
	fn empty_scan_folder_yields_empty_catalog() {
		let dir = tempfile::tempdir().unwrap();
		let catalog = Catalog::scan(dir.path()).unwrap();
		assert!(catalog.is_empty());
	}

	#[test]
	fn coverage_is_union_of_tile_bounds() {
		let catalog = Catalog::from_tiles(vec![tile("a", -10.0, 10.0, 0.0, 0.0), tile("b", 0.0, 5.0, 10.0, -5.0)]);
		assert_eq!(catalog.coverage, Coverage { west: -10.0, north: 10.0, east: 10.0, south: -5.0 });
	}

	#[test]
	fn tiles_for_window_filters_by_intersection() {
		let catalog = Catalog::from_tiles(vec![tile("a", -10.0, 10.0, 0.0, 0.0), tile("b", 100.0, 10.0, 110.0, 0.0)]);
		let hits = catalog.tiles_for_window((-5.0, 5.0, 5.0, -5.0));
		assert_eq!(hits.len(), 1);
		assert_eq!(hits[0].path, PathBuf::from("a"));
	}

	#[test]
	fn tiles_for_window_splits_antimeridian_query() {
		let catalog = Catalog::from_tiles(vec![
			tile("east", 170.0, 10.0, 180.0, 0.0),
			tile("west", -180.0, 10.0, -170.0, 0.0),
		]);
		let hits = catalog.tiles_for_window((175.0, 10.0, -175.0, 0.0));
		assert_eq!(hits.len(), 2);
	}

	#[test]
	fn roundtrips_through_json() {
		let dir = tempfile::tempdir().unwrap();
		let catalog = Catalog::from_tiles(vec![tile("a", -10.0, 10.0, 0.0, 0.0)]);
		catalog.save(dir.path()).unwrap();
		let loaded = Catalog::load(dir.path()).unwrap().unwrap();
		assert_eq!(loaded.tiles, catalog.tiles);
	}
}
