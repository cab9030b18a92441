//! DMS/decimal coordinate parsing (spec.md §6), grounded on the original
//! Python implementation's lenient coordinate-entry parser
//! (`preview_window.py`, `gradient_editor_window.py`), reimplemented
//! with `nom` the way `dem-core`'s `.hdr` parser uses it.

use nom::{
	character::complete::{char, one_of},
	combinator::opt,
	number::complete::double,
	IResult,
};

fn degrees_component(input: &str) -> IResult<&str, f64> {
	let (input, value) = double(input)?;
	let (input, _) = char('°')(input)?;
	Ok((input, value))
}

fn minutes_component(input: &str) -> IResult<&str, f64> {
	let (input, value) = double(input)?;
	let (input, _) = char('\'')(input)?;
	Ok((input, value))
}

fn seconds_component(input: &str) -> IResult<&str, f64> {
	let (input, value) = double(input)?;
	let (input, _) = char('"')(input)?;
	Ok((input, value))
}

fn hemisphere(input: &str) -> IResult<&str, char> { one_of("NSEWnsew")(input) }

fn dms(input: &str) -> IResult<&str, f64> {
	let (input, deg) = degrees_component(input)?;
	let (input, min) = opt(minutes_component)(input)?;
	let (input, sec) = opt(seconds_component)(input)?;
	let (input, hemi) = opt(hemisphere)(input)?;
	let magnitude = deg + min.unwrap_or(0.0) / 60.0 + sec.unwrap_or(0.0) / 3600.0;
	let signed = match hemi {
		Some('S') | Some('s') | Some('W') | Some('w') => -magnitude,
		_ => magnitude,
	};
	Ok((input, signed))
}

/// Parses a single coordinate, accepting decimal (`-122.45`) and DMS
/// (`122°27'00"W`) forms. Omitted minutes/seconds default to 0; the
/// hemisphere letter sets the sign.
pub fn parse_coordinate(input: &str) -> Result<f64, String> {
	let trimmed = input.trim();
	if let Ok((rest, value)) = dms(trimmed) {
		if rest.trim().is_empty() {
			return Ok(value);
		}
	}
	trimmed.parse::<f64>().map_err(|_| format!("not a valid coordinate: {input}"))
}

/// Parses a `west,north,east,south` selection string into a window.
pub fn parse_window(input: &str) -> Result<(f64, f64, f64, f64), String> {
	let parts: Vec<&str> = input.split(',').collect();
	if parts.len() != 4 {
		return Err(format!("expected west,north,east,south, got: {input}"));
	}
	let west = parse_coordinate(parts[0])?;
	let north = parse_coordinate(parts[1])?;
	let east = parse_coordinate(parts[2])?;
	let south = parse_coordinate(parts[3])?;
	Ok((west, north, east, south))
}

/// Formats a coordinate back to a decimal string trimmed to `decimals`
/// places with no trailing zeros (spec.md §6).
pub fn format_coordinate(value: f64, decimals: usize) -> String {
	let formatted = format!("{value:.decimals$}");
	let trimmed = formatted.trim_end_matches('0').trim_end_matches('.');
	if trimmed.is_empty() || trimmed == "-" {
		"0".to_string()
	} else {
		trimmed.to_string()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_plain_decimal() { assert!((parse_coordinate("-122.45").unwrap() - (-122.45)).abs() < 1e-9); }

	#[test]
	fn parses_dms_with_hemisphere() {
		let v = parse_coordinate("122°27'00\"W").unwrap();
		assert!((v - (-122.45)).abs() < 1e-6);
	}

	#[test]
	fn dms_omitting_minutes_and_seconds_defaults_to_zero() {
		let v = parse_coordinate("45°N").unwrap();
		assert!((v - 45.0).abs() < 1e-9);
	}

	#[test]
	fn parses_window_csv() {
		let w = parse_window("-10,5,10,-5").unwrap();
		assert_eq!(w, (-10.0, 5.0, 10.0, -5.0));
	}

	#[test]
	fn format_coordinate_trims_trailing_zeros() {
		assert_eq!(format_coordinate(-122.450000, 6), "-122.45");
		assert_eq!(format_coordinate(0.0, 4), "0");
	}
}
