//! The `catalog` subcommand: scan a tile folder into `catalog.json`, or
//! print a summary of one already on disk (C3).

use std::path::{Path, PathBuf};

use clap::{Args, Subcommand};
use dem_core::catalog::Catalog;

#[derive(Args)]
pub struct CatalogCmd {
	#[clap(subcommand)]
	command: CatalogAction,
}

#[derive(Subcommand)]
enum CatalogAction {
	/// Scan a folder for tiles and write its catalog.json.
	Scan { folder: PathBuf },
	/// Print the coverage and tile count of a folder's catalog.json.
	Show { folder: PathBuf },
}

pub fn run(args: CatalogCmd) -> i32 {
	match args.command {
		CatalogAction::Scan { folder } => scan(&folder),
		CatalogAction::Show { folder } => show(&folder),
	}
}

fn scan(folder: &Path) -> i32 {
	let catalog = match Catalog::scan(folder) {
		Ok(c) => c,
		Err(e) => {
			eprintln!("could not scan {}: {e}", folder.display());
			return 3;
		},
	};
	if let Err(e) = catalog.save(folder) {
		eprintln!("could not write catalog.json: {e}");
		return 7;
	}
	println!("scanned {} tile(s)", catalog.tiles.len());
	0
}

fn show(folder: &Path) -> i32 {
	let catalog = match Catalog::load(folder) {
		Ok(Some(c)) => c,
		Ok(None) => {
			eprintln!("no catalog.json in {}; run `catalog scan` first", folder.display());
			return 3;
		},
		Err(e) => {
			eprintln!("could not read catalog.json: {e}");
			return 3;
		},
	};

	let (west, north, east, south) = catalog.coverage_window();
	println!("Tiles: {}", catalog.tiles.len());
	println!("Coverage: west={west} north={north} east={east} south={south}");
	println!("Created by: {}", catalog.created_by);
	println!("Created at: {}", catalog.created_at);
	0
}
