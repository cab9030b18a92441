//! An HTTP front end serving rendered PNGs for a fixed tile catalog and
//! a folder of gradients, grounded on `map-server/src/main.rs`'s
//! `rouille::start_server_with_pool` loop and `DashMap` session cache,
//! generalized from GPU terrain-radar frames to this crate's CPU
//! assemble/color/hillshade/shadow/composite pipeline (C1-C9), with the
//! teacher's own `png` crate doing the final encode instead of `wgpu`
//! readback.

use std::{collections::HashMap, num::NonZeroUsize, path::Path, path::PathBuf, sync::Arc};

use dem_core::{catalog::Catalog, error::Error, grid::ElevationGrid};
use dem_render::{
	assemble::{self, AssembleOptions, Assembly},
	compositor::{self, CompositeImage, CompositeSettings},
	config::RunConfig,
	gradient::{Color, Gradient, PersistedGradient, Units},
	hillshade,
	resample::ResampleMethod,
	shadow,
};
use png::{BitDepth, ColorType, Encoder};
use rouille::{Request, Response};
use url::Url;

mod cache;
mod query;

use cache::RenderCache;
use query::RenderQuery;

fn load_gradients(folder: &Path) -> HashMap<String, Gradient> {
	let mut out = HashMap::new();
	let entries = match std::fs::read_dir(folder) {
		Ok(e) => e,
		Err(e) => {
			log::warn!("could not read gradients folder {}: {e}", folder.display());
			return out;
		},
	};

	for entry in entries.flatten() {
		let path = entry.path();
		if path.extension().and_then(|e| e.to_str()) != Some("json") {
			continue;
		}
		let name = path.file_stem().and_then(|s| s.to_str()).unwrap_or("").to_string();
		let parsed = std::fs::read_to_string(&path)
			.ok()
			.and_then(|s| serde_json::from_str::<PersistedGradient>(&s).ok());
		match parsed {
			Some(persisted) => {
				out.insert(name, Gradient::from_persisted(persisted));
			},
			None => log::warn!("could not parse gradient {}", path.display()),
		}
	}
	out
}

fn load_assembly_grid(assembly: &Assembly) -> Result<ElevationGrid, Error> {
	match assembly {
		Assembly::InMemory(grid) => Ok(grid.clone()),
		Assembly::OnDisk { height, width, bounds, .. } => {
			let mut data = Vec::with_capacity(height * width);
			for row in 0..*height {
				data.extend(assembly.read_row(row)?);
			}
			Ok(ElevationGrid::from_data(*height, *width, *bounds, data))
		},
	}
}

fn encode_png(image: &CompositeImage) -> Result<Vec<u8>, Error> {
	let (h, w) = image.shape();
	let mut out = Vec::new();
	{
		let mut encoder = Encoder::new(&mut out, w as u32, h as u32);
		encoder.set_color(ColorType::Rgba);
		encoder.set_depth(BitDepth::Eight);
		let mut writer = encoder.write_header().map_err(|e| Error::WriteError(e.to_string()))?;
		writer
			.write_image_data(&image.to_rgba_bytes())
			.map_err(|e| Error::WriteError(e.to_string()))?;
	}
	Ok(out)
}

fn render_png(catalog: &Catalog, gradient: &Gradient, run_config: &RunConfig, query: &RenderQuery) -> Result<Vec<u8>, Error> {
	let target_ppd = catalog
		.tiles_for_window(query.window)
		.iter()
		.map(|t| t.pixels_per_degree)
		.fold(0.0_f64, f64::max)
		.max(1.0)
		* query.scale;

	let options = AssembleOptions::from_run_config(run_config, target_ppd, ResampleMethod::Bilinear);
	let assembly = assemble::assemble(catalog, query.window, &options, |_| {})?;
	let grid = load_assembly_grid(&assembly)?;
	if let Assembly::OnDisk { raw_path, header_path, .. } = &assembly {
		let _ = std::fs::remove_file(raw_path);
		let _ = std::fs::remove_file(header_path);
	}

	let mut gradient = gradient.clone();
	if gradient.units == Units::Percent {
		if let Some((min, max)) = grid.finite_min_max() {
			gradient.min_elev = min as f64;
			gradient.max_elev = max as f64;
		}
	}

	let (h, w) = grid.shape();
	let neutral = Color::rgba(128, 128, 128, 255);
	let base_color: Vec<Color> = if gradient.kind.has_color() {
		grid.data().iter().map(|&e| gradient.sample(e).unwrap_or(neutral)).collect()
	} else {
		vec![neutral; h * w]
	};

	let hillshade_grid = if gradient.kind.wants_hillshade() {
		let (min_elev, max_elev) = grid.finite_min_max().unwrap_or((0.0, 0.0));
		let relief = hillshade::terrain_relief(min_elev, max_elev);
		Some(hillshade::compute(&grid, gradient.light_dir_deg, gradient.shading_intensity, relief, |_, _| Ok(()))?)
	} else {
		None
	};

	let shadow_grid = if gradient.cast_shadows {
		Some(shadow::compute(&grid, gradient.light_dir_deg, gradient.shadow_drop as f32, gradient.shadow_soft_edge as usize, |_, _| Ok(()))?)
	} else {
		None
	};

	let settings = CompositeSettings {
		blending_strength: gradient.blending_strength,
		shadow_color: gradient.shadow_color,
		preserve_above_color: if gradient.kind.is_posterized() {
			gradient.above_gradient_color.map(|c| (c.r, c.g, c.b))
		} else {
			None
		},
	};
	let image = compositor::composite(&base_color, h, w, hillshade_grid.as_ref(), shadow_grid.as_ref(), &settings, |_, _| Ok(()))?;

	encode_png(&image)
}

fn handle(req: &Request, catalog: &Catalog, gradients: &HashMap<String, Gradient>, run_config: &RunConfig, cache: &RenderCache) -> Response {
	match (|| -> Result<Response, String> {
		let url = Url::parse(&format!("http://localhost{}", req.raw_url())).map_err(|e| e.to_string())?;
		if url.path() != "/map.png" {
			return Ok(Response::empty_404());
		}

		let query = RenderQuery::from_url(&url)?;
		let gradient = gradients
			.get(&query.gradient_name)
			.ok_or_else(|| format!("unknown gradient: {}", query.gradient_name))?;

		let key = query.cache_key();
		if let Some(cached) = cache.get(&key) {
			return Ok(Response::from_data("image/png", cached.as_slice().to_vec()));
		}

		let bytes = render_png(catalog, gradient, run_config, &query).map_err(|e| e.to_string())?;
		cache.insert(key, Arc::new(bytes.clone()));
		Ok(Response::from_data("image/png", bytes))
	})() {
		Ok(response) => response,
		Err(message) => Response::text(message).with_status_code(400),
	}
}

fn main() {
	env_logger::init();

	let mut args = std::env::args().skip(1);
	let usage = || {
		eprintln!("usage: dem-server <tiles-folder> <gradients-folder>");
		std::process::exit(1);
	};
	let tiles_path = PathBuf::from(args.next().unwrap_or_else(|| usage()));
	let gradients_path = PathBuf::from(args.next().unwrap_or_else(|| usage()));

	let catalog = match Catalog::load(&tiles_path) {
		Ok(Some(c)) => c,
		Ok(None) => Catalog::scan(&tiles_path).unwrap_or_else(|e| {
			eprintln!("could not scan {}: {e}", tiles_path.display());
			std::process::exit(1);
		}),
		Err(e) => {
			eprintln!("could not load catalog: {e}");
			std::process::exit(1);
		},
	};
	if catalog.is_empty() {
		eprintln!("no tiles found in {}", tiles_path.display());
		std::process::exit(1);
	}

	let gradients = load_gradients(&gradients_path);
	let run_config = RunConfig::from_env();
	let cache: RenderCache = RenderCache::new();

	log::info!("serving {} tile(s), {} gradient(s)", catalog.tiles.len(), gradients.len());

	rouille::start_server_with_pool("0.0.0.0:42070", std::thread::available_parallelism().ok().map(NonZeroUsize::get), move |req| {
		handle(req, &catalog, &gradients, &run_config, &cache)
	});
}

#[cfg(test)]
mod tests {
	use super::*;
	use dem_core::catalog::TileRecord;
	use dem_render::gradient::{ColorStop, GradientKind};
	use std::io::Write as _;

	fn write_tile(dir: &Path, name: &str, samples: &[i16], width: usize, height: usize, west: f64, north: f64, ppd: f64) -> TileRecord {
		let hdr_path = dir.join(format!("{name}.hdr"));
		let bil_path = dir.join(format!("{name}.bil"));
		let mut hdr = std::fs::File::create(&hdr_path).unwrap();
		writeln!(hdr, "BYTEORDER M").unwrap();
		writeln!(hdr, "NROWS {height}").unwrap();
		writeln!(hdr, "NCOLS {width}").unwrap();
		writeln!(hdr, "NBITS 16").unwrap();
		writeln!(hdr, "ULXMAP {}", west + 0.5 / ppd).unwrap();
		writeln!(hdr, "ULYMAP {}", north - 0.5 / ppd).unwrap();
		writeln!(hdr, "XDIM {}", 1.0 / ppd).unwrap();
		writeln!(hdr, "YDIM {}", 1.0 / ppd).unwrap();
		writeln!(hdr, "NODATA -9999").unwrap();
		let mut bil = std::fs::File::create(&bil_path).unwrap();
		for &s in samples {
			bil.write_all(&s.to_be_bytes()).unwrap();
		}
		TileRecord {
			path: bil_path,
			west,
			north,
			east: west + width as f64 / ppd,
			south: north - height as f64 / ppd,
			width_px: width as u32,
			height_px: height as u32,
			pixels_per_degree: ppd,
		}
	}

	fn flat_gradient() -> Gradient {
		Gradient::from_persisted(PersistedGradient {
			name: "Test".into(),
			units: "meters".into(),
			kind: GradientKind::Continuous,
			min_elev: 0.0,
			max_elev: 100.0,
			stops: vec![
				ColorStop { position: 0.0, color: Color::rgba(255, 255, 255, 255) },
				ColorStop { position: 1.0, color: Color::rgba(0, 0, 0, 255) },
			],
			no_data_color: Color::rgba(0, 0, 0, 0),
			shadow_color: Color::rgba(0, 0, 0, 255),
			below_gradient_color: None,
			above_gradient_color: None,
			light_dir_deg: 315.0,
			shading_intensity: 50.0,
			cast_shadows: false,
			shadow_drop: 2.0,
			shadow_soft_edge: 0,
			blending_strength: 100.0,
		})
	}

	#[test]
	fn render_png_produces_a_valid_png_signature() {
		let dir = tempfile::tempdir().unwrap();
		let tile = write_tile(dir.path(), "tile", &[0, 10, 20, 30], 2, 2, 0.0, 2.0, 1.0);
		let catalog = Catalog {
			version: 1,
			created_by: "test".into(),
			created_at: chrono::Utc::now(),
			coverage: dem_core::catalog::Coverage {
				west: tile.west,
				north: tile.north,
				east: tile.east,
				south: tile.south,
			},
			tiles: vec![tile],
		};

		let query = RenderQuery {
			window: (0.0, 2.0, 2.0, 0.0),
			gradient_name: "test".into(),
			scale: 1.0,
		};

		let bytes = render_png(&catalog, &flat_gradient(), &RunConfig::default(), &query).unwrap();
		assert_eq!(&bytes[0..8], &[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A]);
	}

	#[test]
	fn unknown_gradient_is_rejected_before_rendering() {
		let gradients: HashMap<String, Gradient> = HashMap::new();
		assert!(!gradients.contains_key("missing"));
	}
}
