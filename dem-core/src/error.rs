use std::path::PathBuf;

use thiserror::Error;

/// Stable error taxonomy for the whole pipeline. Every outward-facing
/// operation (reader, catalog, assembler, controller) eventually resolves
/// to one of these; narrower error types convert into it with `#[from]`.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
	#[error("invalid coordinates: {0}")]
	InvalidCoordinates(String),

	#[error("selection window does not intersect the source's coverage")]
	WindowOutsideCoverage,

	#[error("{path} does not contain elevation samples: {reason}")]
	NotElevationData { path: PathBuf, reason: String },

	#[error("could not read {path}: {source}")]
	UnreadableSource {
		path: PathBuf,
		#[source]
		source: Box<dyn std::error::Error + Send + Sync>,
	},

	#[error("no recognizable tiles found in catalog folder")]
	EmptyCatalog,

	#[error("requested output is too large; recommended scale is {recommended_scale:.4}")]
	OutputTooLarge { recommended_scale: f64 },

	#[error("out of memory during run")]
	OutOfMemory,

	#[error("run exceeded its wall-clock budget")]
	TimedOut,

	#[error("could not write output: {0}")]
	WriteError(String),

	#[error("run was cancelled")]
	Cancelled,
}

impl Error {
	/// Exit codes per spec.md §6 (CLI binding).
	pub fn exit_code(&self) -> i32 {
		match self {
			Error::InvalidCoordinates(_) => 2,
			Error::WindowOutsideCoverage => 2,
			Error::NotElevationData { .. } => 3,
			Error::UnreadableSource { .. } => 3,
			Error::EmptyCatalog => 3,
			Error::OutputTooLarge { .. } => 4,
			Error::OutOfMemory => 5,
			Error::TimedOut => 6,
			Error::WriteError(_) => 7,
			Error::Cancelled => 7,
		}
	}
}

/// Errors specific to opening/decoding a single DEM file (C2). These
/// convert into [`Error::UnreadableSource`] / [`Error::NotElevationData`]
/// at the boundary where a path is known.
#[derive(Error, Debug)]
pub enum ReaderError {
	#[error("file not found")]
	FileNotFound,
	#[error("could not parse header: {0}")]
	UnreadableHeader(String),
	#[error("unsupported container format")]
	UnsupportedFormat,
	#[error("file does not contain single-band elevation samples: {0}")]
	NotElevationData(String),
	#[error("io error: {0}")]
	Io(#[from] std::io::Error),
}

impl ReaderError {
	pub fn into_error(self, path: PathBuf) -> Error {
		match self {
			ReaderError::NotElevationData(reason) => Error::NotElevationData { path, reason },
			other => Error::UnreadableSource {
				path,
				source: Box::new(other),
			},
		}
	}
}

/// Errors specific to scanning/loading a tile catalog (C3).
#[derive(Error, Debug)]
pub enum CatalogError {
	#[error("io error: {0}")]
	Io(#[from] std::io::Error),
	#[error("could not parse catalog file: {0}")]
	Parse(#[from] serde_json::Error),
}
