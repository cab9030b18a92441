//! The band-interleaved integer raster variant (spec.md §4.2 #1, §6): a
//! plain-text `.hdr` key-value header plus a raw `.bil` sample file.
//! Mirrors `geo/src/dataset.rs`'s header-then-mmap shape, generalized from
//! the teacher's fixed 32-byte binary header to the ESRI-style text header
//! spec.md §6 calls for.

use std::{
	collections::HashMap,
	fs,
	path::{Path, PathBuf},
};

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use memmap2::Mmap;
use nom::{
	bytes::complete::{is_not, take_while1},
	character::complete::{space1, char as nom_char},
	combinator::opt,
	sequence::tuple,
	IResult,
};

use super::DemReader;
use crate::{error::ReaderError, grid::ElevationGrid, grid::Window};

#[derive(Debug, Clone, PartialEq)]
enum ByteOrderKind {
	Big,
	Little,
}

#[derive(Debug, Clone)]
struct Header {
	byte_order: ByteOrderKind,
	nrows: u32,
	ncols: u32,
	nbands: u32,
	nbits: u32,
	nodata: f64,
	ulx_center: f64,
	uly_center: f64,
	xdim: f64,
	ydim: f64,
}

fn parse_key(input: &str) -> IResult<&str, &str> { take_while1(|c: char| !c.is_whitespace())(input) }

fn parse_kv_line(line: &str) -> Option<(String, String)> {
	let line = line.trim();
	if line.is_empty() || line.starts_with('#') {
		return None;
	}
	let mut parse = tuple((parse_key, opt(nom_char('=')), space1::<&str, nom::error::Error<&str>>, is_not("")));
	if let Ok((_, (key, _, _, value))) = parse(line) {
		return Some((key.to_ascii_uppercase(), value.trim().to_string()));
	}
	// Fall back to splitting on the first run of whitespace, which also
	// covers "KEY=VALUE" with no surrounding spaces.
	let (key, value) = line.split_once(char::is_whitespace).or_else(|| line.split_once('='))?;
	Some((key.trim().to_ascii_uppercase(), value.trim().to_string()))
}

fn parse_header(text: &str) -> Result<Header, ReaderError> {
	let mut fields: HashMap<String, String> = HashMap::new();
	for line in text.lines() {
		if let Some((k, v)) = parse_kv_line(line) {
			fields.insert(k.replace('=', "").trim().to_string(), v.to_string());
		}
	}

	let get = |key: &str| -> Result<&str, ReaderError> {
		fields
			.get(key)
			.map(|s| s.as_str())
			.ok_or_else(|| ReaderError::UnreadableHeader(format!("missing {key}")))
	};
	let get_f64 = |key: &str| -> Result<f64, ReaderError> {
		get(key)?
			.parse()
			.map_err(|_| ReaderError::UnreadableHeader(format!("{key} is not numeric")))
	};
	let get_u32 = |key: &str| -> Result<u32, ReaderError> {
		get(key)?
			.parse()
			.map_err(|_| ReaderError::UnreadableHeader(format!("{key} is not an integer")))
	};

	let byte_order = match get("BYTEORDER").unwrap_or("I").trim().to_ascii_uppercase().as_str() {
		"M" | "MSB" | "MOTOROLA" => ByteOrderKind::Big,
		_ => ByteOrderKind::Little,
	};

	let nbands = fields
		.get("NBANDS")
		.and_then(|s| s.parse().ok())
		.unwrap_or(1u32);
	if nbands != 1 {
		return Err(ReaderError::NotElevationData(format!(
			"expected a single band, found NBANDS={nbands}"
		)));
	}
	let nbits = fields.get("NBITS").and_then(|s| s.parse().ok()).unwrap_or(16u32);
	if nbits != 16 {
		return Err(ReaderError::NotElevationData(format!(
			"expected 16-bit samples, found NBITS={nbits}"
		)));
	}

	Ok(Header {
		byte_order,
		nrows: get_u32("NROWS")?,
		ncols: get_u32("NCOLS")?,
		nbands,
		nbits,
		nodata: get_f64("NODATA").unwrap_or(-9999.0),
		ulx_center: get_f64("ULXMAP")?,
		uly_center: get_f64("ULYMAP")?,
		xdim: get_f64("XDIM")?,
		ydim: get_f64("YDIM")?,
	})
}

#[derive(Debug)]
pub struct BandInterleavedReader {
	data_path: PathBuf,
	header: Header,
	bounds: Window,
}

impl BandInterleavedReader {
	pub fn open(path: &Path) -> Result<Self, ReaderError> {
		let (hdr_path, data_path) = Self::sibling_paths(path);
		let text = fs::read_to_string(&hdr_path).map_err(ReaderError::Io)?;
		let header = parse_header(&text)?;

		let west = header.ulx_center - header.xdim / 2.0;
		let north = header.uly_center + header.ydim / 2.0;
		let east = west + header.ncols as f64 * header.xdim;
		let south = north - header.nrows as f64 * header.ydim;

		Ok(Self {
			data_path,
			header,
			bounds: (west, north, east, south),
		})
	}

	fn sibling_paths(path: &Path) -> (PathBuf, PathBuf) {
		let hdr = path.with_extension("hdr");
		let bil = path.with_extension("bil");
		(hdr, bil)
	}
}

impl DemReader for BandInterleavedReader {
	fn bounds(&self) -> Window { self.bounds }

	fn width_px(&self) -> u32 { self.header.ncols }

	fn height_px(&self) -> u32 { self.header.nrows }

	fn pixels_per_degree(&self) -> f64 { 1.0 / self.header.xdim }

	fn no_data_sentinel(&self) -> f64 { self.header.nodata }

	fn load(&self) -> Result<ElevationGrid, ReaderError> {
		let file = fs::File::open(&self.data_path)?;
		let mmap = unsafe { Mmap::map(&file)? };

		let (h, w) = (self.header.nrows as usize, self.header.ncols as usize);
		let expected_bytes = h * w * 2;
		if mmap.len() < expected_bytes {
			return Err(ReaderError::UnreadableHeader(format!(
				"data file is {} bytes, expected at least {expected_bytes}",
				mmap.len()
			)));
		}

		let sentinel = self.header.nodata.round() as i32;
		let mut data = vec![0f32; h * w];
		for (i, chunk) in mmap[..expected_bytes].chunks_exact(2).enumerate() {
			let raw = match self.header.byte_order {
				ByteOrderKind::Big => BigEndian::read_i16(chunk),
				ByteOrderKind::Little => LittleEndian::read_i16(chunk),
			};
			data[i] = if raw as i32 == sentinel { f32::NAN } else { raw as f32 };
		}

		Ok(ElevationGrid::from_data(h, w, self.bounds, data))
	}
}

#[cfg(test)]
mod tests {
	use std::io::Write;

	use byteorder::WriteBytesExt;

	use super::*;

	fn write_fixture(dir: &Path, byte_order: &str, nodata: i16, samples: &[i16]) -> PathBuf {
		let hdr_path = dir.join("tile.hdr");
		let bil_path = dir.join("tile.bil");
		let mut hdr = fs::File::create(&hdr_path).unwrap();
		writeln!(hdr, "BYTEORDER {byte_order}").unwrap();
		writeln!(hdr, "LAYOUT BIL").unwrap();
		writeln!(hdr, "NROWS 2").unwrap();
		writeln!(hdr, "NCOLS 2").unwrap();
		writeln!(hdr, "NBANDS 1").unwrap();
		writeln!(hdr, "NBITS 16").unwrap();
		writeln!(hdr, "BANDROWBYTES 4").unwrap();
		writeln!(hdr, "TOTALROWBYTES 4").unwrap();
		writeln!(hdr, "BANDGAPBYTES 0").unwrap();
		writeln!(hdr, "NODATA {nodata}").unwrap();
		writeln!(hdr, "ULXMAP 0.5").unwrap();
		writeln!(hdr, "ULYMAP 1.5").unwrap();
		writeln!(hdr, "XDIM 1.0").unwrap();
		writeln!(hdr, "YDIM 1.0").unwrap();

		let mut bil = fs::File::create(&bil_path).unwrap();
		for &s in samples {
			if byte_order.starts_with('M') {
				bil.write_i16::<BigEndian>(s).unwrap();
			} else {
				bil.write_i16::<LittleEndian>(s).unwrap();
			}
		}
		hdr_path
	}

	#[test]
	fn reads_little_endian_with_nodata_as_nan() {
		let dir = tempfile::tempdir().unwrap();
		let path = write_fixture(dir.path(), "I", -9999, &[10, -9999, 30, 40]);
		let reader = BandInterleavedReader::open(&path).unwrap();
		assert_eq!(reader.bounds(), (0.0, 2.0, 2.0, 0.0));
		let grid = reader.load().unwrap();
		assert_eq!(grid.get(0, 0), 10.0);
		assert!(grid.get(0, 1).is_nan());
		assert_eq!(grid.get(1, 0), 30.0);
		assert_eq!(grid.get(1, 1), 40.0);
	}

	#[test]
	fn reads_big_endian() {
		let dir = tempfile::tempdir().unwrap();
		let path = write_fixture(dir.path(), "M", -9999, &[1, 2, 3, 4]);
		let reader = BandInterleavedReader::open(&path).unwrap();
		let grid = reader.load().unwrap();
		assert_eq!(grid.get(0, 0), 1.0);
		assert_eq!(grid.get(1, 1), 4.0);
	}

	#[test]
	fn rejects_multi_band() {
		let dir = tempfile::tempdir().unwrap();
		let hdr_path = dir.path().join("tile.hdr");
		fs::write(
			&hdr_path,
			"BYTEORDER I\nNROWS 1\nNCOLS 1\nNBANDS 3\nNBITS 16\nNODATA -9999\nULXMAP 0\nULYMAP 0\nXDIM 1\nYDIM 1\n",
		)
		.unwrap();
		let err = BandInterleavedReader::open(&hdr_path).unwrap_err();
		assert!(matches!(err, ReaderError::NotElevationData(_)));
	}
}
