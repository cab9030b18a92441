//! The `info` subcommand: print a single DEM file's geographic and
//! raster metadata, mirroring the shape of the teacher's own `info.rs`.

use std::path::PathBuf;

use clap::Args;
use dem_core::reader::{self, DemReader};

use crate::coords::format_coordinate;

#[derive(Args)]
/// Give information about a single DEM file.
pub struct Info {
	input: PathBuf,
}

pub fn run(info: Info) -> i32 {
	let dem_reader = match reader::open(&info.input) {
		Ok(r) => r,
		Err(e) => {
			eprintln!("could not open {}: {e}", info.input.display());
			return 3;
		},
	};

	let (west, north, east, south) = dem_reader.bounds();

	println!("Bounds");
	println!("  West: {}", format_coordinate(west, 6));
	println!("  North: {}", format_coordinate(north, 6));
	println!("  East: {}", format_coordinate(east, 6));
	println!("  South: {}", format_coordinate(south, 6));

	println!();
	println!("Raster");
	println!("  Width: {} px", dem_reader.width_px());
	println!("  Height: {} px", dem_reader.height_px());
	println!("  Pixels per degree: {}", dem_reader.pixels_per_degree());
	println!("  No-data sentinel: {}", dem_reader.no_data_sentinel());

	0
}
