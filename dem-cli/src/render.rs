//! The `render` subcommand: the one entry point that drives the full
//! assemble → color → hillshade → shadow → composite → export pipeline
//! (C11) for a single window.

use std::{
	io::Write as _,
	sync::{
		atomic::{AtomicBool, Ordering},
		Arc,
	},
};

use clap::Args;
use dem_render::{
	config::RunConfig,
	export::ImageFormat,
	gradient::{Gradient, PersistedGradient},
};

use crate::{
	controller::{self, OutputKind, ProgressPhase, RenderRequest},
	coords,
};

#[derive(Args)]
/// Render a window of elevation data to an image or elevation file.
pub struct Render {
	/// A single DEM file, or a folder holding a tile catalog.
	source: std::path::PathBuf,
	/// Selection window as `west,north,east,south` (decimal degrees or DMS).
	#[clap(long)]
	window: String,
	/// Path to a JSON gradient definition.
	#[clap(long)]
	gradient: std::path::PathBuf,
	/// Output file path.
	#[clap(long)]
	output: std::path::PathBuf,
	/// One of png, jpeg, geotiff, geocart, raw, elevation-tiff, layered.
	#[clap(long, default_value = "png")]
	format: String,
	#[clap(long, default_value_t = 1.0)]
	scale: f64,
	#[clap(long)]
	min_elev: Option<f64>,
	#[clap(long)]
	max_elev: Option<f64>,
	/// Auto-scale the gradient's elevation range to the cropped window's
	/// own min/max instead of the gradient's stored range.
	#[clap(long)]
	scale_to_crop_area: bool,
}

fn output_kind_for(format: &str) -> Result<OutputKind, String> {
	match format {
		"png" => Ok(OutputKind::ImageUntagged(ImageFormat::Png)),
		"jpeg" | "jpg" => Ok(OutputKind::ImageUntagged(ImageFormat::Jpeg)),
		"geotiff" | "tiff" => Ok(OutputKind::ImageGeoreferenced),
		"geocart" | "flat" => Ok(OutputKind::ImageFlatFile),
		"raw" | "elevation-raw" => Ok(OutputKind::ElevationRaw),
		"elevation-tiff" => Ok(OutputKind::ElevationGeoreferenced),
		"layered" => Ok(OutputKind::LayeredSidecar),
		other => Err(format!("unrecognized output format: {other}")),
	}
}

pub fn run(args: Render) -> i32 {
	let window = match coords::parse_window(&args.window) {
		Ok(w) => w,
		Err(e) => {
			eprintln!("{e}");
			return 2;
		},
	};

	let output_kind = match output_kind_for(&args.format) {
		Ok(k) => k,
		Err(e) => {
			eprintln!("{e}");
			return 2;
		},
	};

	let gradient_json = match std::fs::read_to_string(&args.gradient) {
		Ok(s) => s,
		Err(e) => {
			eprintln!("could not read gradient file: {e}");
			return 3;
		},
	};
	let persisted: PersistedGradient = match serde_json::from_str(&gradient_json) {
		Ok(p) => p,
		Err(e) => {
			eprintln!("could not parse gradient file: {e}");
			return 3;
		},
	};
	let gradient = Gradient::from_persisted(persisted);

	let elevation_range_override = match (args.min_elev, args.max_elev) {
		(Some(min), Some(max)) => Some((min, max)),
		(None, None) => None,
		_ => {
			eprintln!("--min-elev and --max-elev must be given together");
			return 2;
		},
	};

	if args.scale_to_crop_area && elevation_range_override.is_some() {
		eprintln!("--scale-to-crop-area and --min-elev/--max-elev are mutually exclusive");
		return 2;
	}

	let request = RenderRequest {
		source: args.source,
		window,
		gradient,
		output_path: args.output,
		output_kind,
		elevation_range_override,
		scale_to_crop_area: args.scale_to_crop_area,
		scale: args.scale,
	};

	let run_config = RunConfig::from_env();
	let cancel = Arc::new(AtomicBool::new(false));
	let handler_flag = cancel.clone();
	let _ = ctrlc::set_handler(move || {
		if handler_flag.load(Ordering::Acquire) {
			std::process::exit(1);
		}
		eprintln!("\nfinishing up, press Ctrl + C again to cancel immediately");
		handler_flag.store(true, Ordering::Release);
	});

	let mut last_phase: Option<ProgressPhase> = None;
	let result = controller::run(&request, &run_config, &cancel, |msg| {
		if last_phase != Some(msg.phase) {
			println!();
			last_phase = Some(msg.phase);
		}
		print!("\r{:?}: {}%", msg.phase, msg.percent);
		let _ = std::io::stdout().flush();
	});
	println!();

	match result {
		Ok(()) => 0,
		Err(e) => {
			eprintln!("{e}");
			e.exit_code()
		},
	}
}
