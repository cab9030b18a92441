//! C11: the per-run controller. Grounded on `geoc/src/common.rs`'s
//! `for_tile_in_output` progress-and-cancellation shape, generalized from
//! "iterate output tiles" to "run the fixed assemble → color → hillshade
//! → shadow → composite → export pipeline once per invocation"
//! (spec.md §4.11).

use std::{
	path::{Path, PathBuf},
	sync::atomic::{AtomicBool, Ordering},
	time::Instant,
};

use dem_core::{
	catalog::Catalog,
	error::{CatalogError, Error},
	grid::{ElevationGrid, Window},
	reader::{self, DemReader},
};
use dem_render::{
	assemble::{self, AssembleOptions, Assembly, ProgressEvent},
	compositor::{self, CompositeSettings},
	config::RunConfig,
	export::{self, ImageFormat},
	gradient::{Color, Gradient, Units},
	hillshade,
	resample::{self, ResampleMethod},
	shadow,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressPhase {
	Assembly,
	BaseColor,
	Hillshade,
	Shadow,
	Compositing,
	Write,
}

#[derive(Debug, Clone, Copy)]
pub struct ProgressMessage {
	pub phase: ProgressPhase,
	pub percent: u8,
}

#[derive(Debug, Clone, Copy)]
pub enum OutputKind {
	ImageUntagged(ImageFormat),
	ImageGeoreferenced,
	ImageFlatFile,
	ElevationRaw,
	ElevationGeoreferenced,
	LayeredSidecar,
}

/// One render invocation's full set of inputs (spec.md §4.11 step 1-2).
pub struct RenderRequest {
	pub source: PathBuf,
	pub window: Window,
	pub gradient: Gradient,
	pub output_path: PathBuf,
	pub output_kind: OutputKind,
	/// Overrides the gradient's stored min/max elevation outright.
	pub elevation_range_override: Option<(f64, f64)>,
	/// Re-scans the cropped grid's own finite elevation range and uses it
	/// as the gradient's min/max, the same auto-range behavior
	/// `Units::Percent` gets, independent of the gradient's stored units
	/// (spec.md §4.11 step 7 "scale to crop area").
	pub scale_to_crop_area: bool,
	/// Rescales the assembled/cropped grid by this factor before coloring
	/// (C4's "export scaling").
	pub scale: f64,
}

fn catalog_err(e: CatalogError, path: &Path) -> Error {
	Error::UnreadableSource {
		path: path.to_path_buf(),
		source: Box::new(e),
	}
}

fn windows_intersect(a: Window, b: Window) -> bool {
	let (aw, an, ae, as_) = a;
	let (bw, bn, be, bs) = b;
	!(ae <= bw || aw >= be || an <= bs || as_ >= bn)
}

fn representative_ppd(catalog: &Catalog, window: Window) -> f64 {
	catalog
		.tiles_for_window(window)
		.iter()
		.map(|t| t.pixels_per_degree)
		.fold(0.0_f64, f64::max)
		.max(1.0)
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

/// Runs the full pipeline for one request, reporting phase progress via
/// `on_progress` and honoring `cancel` between phases (spec.md §4.11,
/// §5's cancellation contract). Temp files created by a disk-spilled
/// assembly are always removed before returning, success or failure.
pub fn run(
	request: &RenderRequest,
	run_config: &RunConfig,
	cancel: &AtomicBool,
	mut on_progress: impl FnMut(ProgressMessage),
) -> Result<(), Error> {
	let mut temp_paths: Vec<PathBuf> = Vec::new();
	let started = Instant::now();
	let outcome = run_pipeline(request, run_config, cancel, started, &mut on_progress, &mut temp_paths);
	for path in &temp_paths {
		let _ = std::fs::remove_file(path);
	}
	outcome
}

fn check_cancelled(cancel: &AtomicBool) -> Result<(), Error> {
	if cancel.load(Ordering::Acquire) {
		Err(Error::Cancelled)
	} else {
		Ok(())
	}
}

fn check_timeout(started: Instant, run_config: &RunConfig) -> Result<(), Error> {
	if started.elapsed() > run_config.timeout {
		Err(Error::TimedOut)
	} else {
		Ok(())
	}
}

fn run_pipeline(
	request: &RenderRequest,
	run_config: &RunConfig,
	cancel: &AtomicBool,
	started: Instant,
	on_progress: &mut dyn FnMut(ProgressMessage),
	temp_paths: &mut Vec<PathBuf>,
) -> Result<(), Error> {
	let (ww, wn, we, ws) = request.window;
	if !ww.is_finite() || !wn.is_finite() || !we.is_finite() || !ws.is_finite() || wn <= ws {
		return Err(Error::InvalidCoordinates("north must be greater than south".into()));
	}

	log::info!("render: window={:?} output={}", request.window, request.output_path.display());
	check_cancelled(cancel)?;
	on_progress(ProgressMessage { phase: ProgressPhase::Assembly, percent: 0 });

	let (grid, source_bounds) = if request.source.is_dir() {
		let catalog = match Catalog::load(&request.source).map_err(|e| catalog_err(e, &request.source))? {
			Some(c) => c,
			None => Catalog::scan(&request.source).map_err(|e| catalog_err(e, &request.source))?,
		};
		if catalog.is_empty() {
			return Err(Error::EmptyCatalog);
		}

		let target_ppd = representative_ppd(&catalog, request.window) * request.scale;
		let options = AssembleOptions::from_run_config(run_config, target_ppd, ResampleMethod::Bilinear);
		let assembly = assemble::assemble(&catalog, request.window, &options, |event| match event {
			ProgressEvent::ChunkAssembled { rows_done, total_rows } => {
				let percent = ((rows_done as u64 * 100) / (total_rows as u64).max(1)) as u8;
				on_progress(ProgressMessage { phase: ProgressPhase::Assembly, percent });
			},
			ProgressEvent::TileSkipped { path, reason } => {
				log::warn!("assembly skipped tile {}: {reason}", path.display());
			},
		})?;

		if let Assembly::OnDisk { raw_path, header_path, .. } = &assembly {
			temp_paths.push(raw_path.clone());
			temp_paths.push(header_path.clone());
		}

		let bounds = assembly.bounds();
		let grid = load_assembly_grid(&assembly)?;
		(grid, bounds)
	} else {
		let dem_reader = reader::open(&request.source).map_err(|e| e.into_error(request.source.clone()))?;
		if !windows_intersect(dem_reader.bounds(), request.window) {
			return Err(Error::WindowOutsideCoverage);
		}
		let cropped = dem_reader
			.load_subset(request.window)
			.map_err(|e| e.into_error(request.source.clone()))?;
		let bounds = cropped.bounds();
		let grid = if (request.scale - 1.0).abs() > 1e-9 {
			let (h, w) = cropped.shape();
			let new_h = ((h as f64) * request.scale).round().max(1.0) as usize;
			let new_w = ((w as f64) * request.scale).round().max(1.0) as usize;
			resample::resize(&cropped, new_h, new_w, ResampleMethod::Bilinear)
		} else {
			cropped
		};
		(grid, bounds)
	};

	on_progress(ProgressMessage { phase: ProgressPhase::Assembly, percent: 100 });
	check_cancelled(cancel)?;
	check_timeout(started, run_config)?;

	let mut gradient = request.gradient.clone();
	if let Some((min, max)) = request.elevation_range_override {
		gradient.min_elev = min;
		gradient.max_elev = max;
	} else if gradient.units == Units::Percent || request.scale_to_crop_area {
		if let Some((min, max)) = grid.finite_min_max() {
			gradient.min_elev = min as f64;
			gradient.max_elev = max as f64;
		}
	}

	let (h, w) = grid.shape();

	log::debug!("base color: start");
	on_progress(ProgressMessage { phase: ProgressPhase::BaseColor, percent: 0 });
	let neutral_gray = Color::rgba(128, 128, 128, 255);
	let base_color: Vec<Color> = if gradient.kind.has_color() {
		grid.data().iter().map(|&e| gradient.sample(e).unwrap_or(neutral_gray)).collect()
	} else {
		vec![neutral_gray; h * w]
	};
	on_progress(ProgressMessage { phase: ProgressPhase::BaseColor, percent: 100 });
	log::debug!("base color: done");
	check_cancelled(cancel)?;
	check_timeout(started, run_config)?;

	let hillshade_grid = if gradient.kind.wants_hillshade() {
		log::debug!("hillshade: start");
		on_progress(ProgressMessage { phase: ProgressPhase::Hillshade, percent: 0 });
		let (min_elev, max_elev) = grid.finite_min_max().unwrap_or((0.0, 0.0));
		let relief = hillshade::terrain_relief(min_elev, max_elev);
		let computed = hillshade::compute(&grid, gradient.light_dir_deg, gradient.shading_intensity, relief, |done, total| {
			let percent = ((done as u64 * 100) / (total as u64).max(1)) as u8;
			on_progress(ProgressMessage { phase: ProgressPhase::Hillshade, percent });
			check_cancelled(cancel)?;
			check_timeout(started, run_config)
		})?;
		on_progress(ProgressMessage { phase: ProgressPhase::Hillshade, percent: 100 });
		log::debug!("hillshade: done");
		Some(computed)
	} else {
		None
	};
	check_cancelled(cancel)?;
	check_timeout(started, run_config)?;

	let shadow_grid = if gradient.cast_shadows {
		log::debug!("shadow: start");
		on_progress(ProgressMessage { phase: ProgressPhase::Shadow, percent: 0 });
		let computed = shadow::compute(
			&grid,
			gradient.light_dir_deg,
			gradient.shadow_drop as f32,
			gradient.shadow_soft_edge as usize,
			|done, total| {
				let percent = ((done as u64 * 100) / (total as u64).max(1)) as u8;
				on_progress(ProgressMessage { phase: ProgressPhase::Shadow, percent });
				check_cancelled(cancel)?;
				check_timeout(started, run_config)
			},
		)?;
		on_progress(ProgressMessage { phase: ProgressPhase::Shadow, percent: 100 });
		log::debug!("shadow: done");
		Some(computed)
	} else {
		None
	};
	check_cancelled(cancel)?;
	check_timeout(started, run_config)?;

	log::debug!("compositing: start");
	on_progress(ProgressMessage { phase: ProgressPhase::Compositing, percent: 0 });
	let settings = CompositeSettings {
		blending_strength: gradient.blending_strength,
		shadow_color: gradient.shadow_color,
		preserve_above_color: if gradient.kind.is_posterized() {
			gradient.above_gradient_color.map(|c| (c.r, c.g, c.b))
		} else {
			None
		},
	};
	let composite_image = compositor::composite(
		&base_color,
		h,
		w,
		hillshade_grid.as_ref(),
		shadow_grid.as_ref(),
		&settings,
		|done, total| {
			let percent = ((done as u64 * 100) / (total as u64).max(1)) as u8;
			on_progress(ProgressMessage { phase: ProgressPhase::Compositing, percent });
			check_cancelled(cancel)?;
			check_timeout(started, run_config)
		},
	)?;
	on_progress(ProgressMessage { phase: ProgressPhase::Compositing, percent: 100 });
	log::debug!("compositing: done");
	check_cancelled(cancel)?;
	check_timeout(started, run_config)?;

	log::debug!("write: start");
	on_progress(ProgressMessage { phase: ProgressPhase::Write, percent: 0 });
	match request.output_kind {
		OutputKind::ImageUntagged(format) => export::write_image_untagged(&composite_image, &request.output_path, format)?,
		OutputKind::ImageGeoreferenced => export::write_image_georeferenced(&composite_image, source_bounds, &request.output_path)?,
		OutputKind::ImageFlatFile => export::write_image_flat_file(&composite_image, source_bounds, &request.output_path)?,
		OutputKind::ElevationRaw => export::write_elevation_raw(&grid, &request.output_path)?,
		OutputKind::ElevationGeoreferenced => export::write_elevation_georeferenced(&grid, &request.output_path)?,
		OutputKind::LayeredSidecar => export::write_layered_sidecar(
			&request.output_path,
			&grid,
			&base_color,
			hillshade_grid.as_ref(),
			shadow_grid.as_ref(),
			gradient.shadow_color,
			&composite_image,
		)?,
	}
	on_progress(ProgressMessage { phase: ProgressPhase::Write, percent: 100 });
	log::debug!("write: done");
	log::info!("render complete: {}", request.output_path.display());

	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use dem_render::gradient::{ColorStop, GradientKind, PersistedGradient};
	use std::io::Write as _;

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

	fn write_tile(dir: &Path, name: &str, samples: &[i16], width: usize, height: usize, west: f64, north: f64, ppd: f64) {
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
	}

	#[test]
	fn single_file_render_produces_a_png() {
		let dir = tempfile::tempdir().unwrap();
		write_tile(dir.path(), "tile", &[0, 10, 20, 30], 2, 2, 0.0, 2.0, 1.0);

		let request = RenderRequest {
			source: dir.path().join("tile.bil"),
			window: (0.0, 2.0, 2.0, 0.0),
			gradient: flat_gradient(),
			output_path: dir.path().join("out.png"),
			output_kind: OutputKind::ImageUntagged(ImageFormat::Png),
			elevation_range_override: None,
			scale_to_crop_area: false,
			scale: 1.0,
		};

		let cancel = AtomicBool::new(false);
		let mut phases = Vec::new();
		run(&request, &RunConfig::default(), &cancel, |m| phases.push(m.phase)).unwrap();
		assert!(dir.path().join("out.png").exists());
		assert!(phases.contains(&ProgressPhase::Write));
	}

	#[test]
	fn cancelled_before_start_returns_cancelled_error() {
		let dir = tempfile::tempdir().unwrap();
		write_tile(dir.path(), "tile", &[0, 10, 20, 30], 2, 2, 0.0, 2.0, 1.0);

		let request = RenderRequest {
			source: dir.path().join("tile.bil"),
			window: (0.0, 2.0, 2.0, 0.0),
			gradient: flat_gradient(),
			output_path: dir.path().join("out.png"),
			output_kind: OutputKind::ImageUntagged(ImageFormat::Png),
			elevation_range_override: None,
			scale_to_crop_area: false,
			scale: 1.0,
		};

		let cancel = AtomicBool::new(true);
		let result = run(&request, &RunConfig::default(), &cancel, |_| {});
		assert!(matches!(result, Err(Error::Cancelled)));
	}

	#[test]
	fn scale_to_crop_area_rescans_elevation_range_even_for_meter_units() {
		let dir = tempfile::tempdir().unwrap();
		write_tile(dir.path(), "tile", &[0, 10, 20, 30], 2, 2, 0.0, 2.0, 1.0);

		let mut gradient = flat_gradient();
		gradient.min_elev = -1000.0;
		gradient.max_elev = 1000.0;
		let request = RenderRequest {
			source: dir.path().join("tile.bil"),
			window: (0.0, 2.0, 2.0, 0.0),
			gradient,
			output_path: dir.path().join("out.png"),
			output_kind: OutputKind::ImageUntagged(ImageFormat::Png),
			elevation_range_override: None,
			scale_to_crop_area: true,
			scale: 1.0,
		};

		let cancel = AtomicBool::new(false);
		run(&request, &RunConfig::default(), &cancel, |_| {}).unwrap();
		assert!(dir.path().join("out.png").exists());
	}

	#[test]
	fn window_outside_single_file_coverage_is_rejected() {
		let dir = tempfile::tempdir().unwrap();
		write_tile(dir.path(), "tile", &[0, 10, 20, 30], 2, 2, 0.0, 2.0, 1.0);

		let request = RenderRequest {
			source: dir.path().join("tile.bil"),
			window: (50.0, 52.0, 52.0, 50.0),
			gradient: flat_gradient(),
			output_path: dir.path().join("out.png"),
			output_kind: OutputKind::ImageUntagged(ImageFormat::Png),
			elevation_range_override: None,
			scale_to_crop_area: false,
			scale: 1.0,
		};

		let cancel = AtomicBool::new(false);
		let result = run(&request, &RunConfig::default(), &cancel, |_| {});
		assert!(matches!(result, Err(Error::WindowOutsideCoverage)));
	}
}
