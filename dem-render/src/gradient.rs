//! C6: the color gradient model. Grounded on
//! `examples/original_source/src/gradient_system.py`'s `Gradient`/
//! `ColorStop` dataclasses and `get_color_at_elevation`, including the two
//! migrations spec.md §9 calls out: `below_gradient_color` →
//! `above_gradient_color` and `units: "feet"` → meters.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Color {
	pub r: u8,
	pub g: u8,
	pub b: u8,
	pub a: u8,
}

impl Color {
	pub const fn rgba(r: u8, g: u8, b: u8, a: u8) -> Self { Color { r, g, b, a } }

	fn lerp(self, other: Color, t: f64) -> Color {
		let lerp_u8 = |a: u8, b: u8| -> u8 { (a as f64 + t * (b as f64 - a as f64)).round() as u8 };
		Color {
			r: lerp_u8(self.r, other.r),
			g: lerp_u8(self.g, other.g),
			b: lerp_u8(self.b, other.b),
			a: lerp_u8(self.a, other.a),
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ColorStop {
	pub position: f64,
	pub color: Color,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Units {
	Meters,
	Percent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GradientKind {
	Continuous,
	Posterized,
	ShadedRelief,
	ShadingAndContinuous,
	ShadingAndPosterized,
}

impl GradientKind {
	pub fn wants_hillshade(self) -> bool {
		!matches!(self, GradientKind::Continuous | GradientKind::Posterized)
	}

	pub fn has_color(self) -> bool { !matches!(self, GradientKind::ShadedRelief) }

	pub fn is_posterized(self) -> bool {
		matches!(self, GradientKind::Posterized | GradientKind::ShadingAndPosterized)
	}
}

/// On-disk representation, kept separate from [`Gradient`] so that
/// [`Gradient::from_persisted`] can apply the feet→meters and
/// below/above-color migrations exactly once, at load time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedGradient {
	pub name: String,
	pub units: String,
	#[serde(rename = "type")]
	pub kind: GradientKind,
	pub min_elev: f64,
	pub max_elev: f64,
	pub stops: Vec<ColorStop>,
	pub no_data_color: Color,
	pub shadow_color: Color,
	/// Historical field name for the semantic "above-range" color; see
	/// spec.md §9.
	#[serde(default)]
	pub below_gradient_color: Option<Color>,
	#[serde(default)]
	pub above_gradient_color: Option<Color>,
	pub light_dir_deg: f64,
	pub shading_intensity: f64,
	pub cast_shadows: bool,
	pub shadow_drop: f64,
	pub shadow_soft_edge: u32,
	pub blending_strength: f64,
}

#[derive(Debug, Clone)]
pub struct Gradient {
	pub name: String,
	pub units: Units,
	pub kind: GradientKind,
	pub min_elev: f64,
	pub max_elev: f64,
	pub stops: Vec<ColorStop>,
	pub no_data_color: Color,
	pub shadow_color: Color,
	pub above_gradient_color: Option<Color>,
	pub light_dir_deg: f64,
	pub shading_intensity: f64,
	pub cast_shadows: bool,
	pub shadow_drop: f64,
	pub shadow_soft_edge: u32,
	pub blending_strength: f64,
}

const METERS_PER_FOOT: f64 = 0.3048;

impl Gradient {
	/// Applies the legacy-field migrations before constructing a usable
	/// gradient (spec.md §9 Open Questions).
	pub fn from_persisted(mut p: PersistedGradient) -> Self {
		p.stops.sort_by(|a, b| a.position.partial_cmp(&b.position).unwrap());

		let units = match p.units.as_str() {
			"feet" => {
				log::warn!("gradient '{}' uses legacy feet units; converting to meters", p.name);
				p.min_elev *= METERS_PER_FOOT;
				p.max_elev *= METERS_PER_FOOT;
				Units::Meters
			},
			"percent" => Units::Percent,
			_ => Units::Meters,
		};

		let above_gradient_color = p.above_gradient_color.or(p.below_gradient_color);

		Gradient {
			name: p.name,
			units,
			kind: p.kind,
			min_elev: p.min_elev,
			max_elev: p.max_elev,
			stops: p.stops,
			no_data_color: p.no_data_color,
			shadow_color: p.shadow_color,
			above_gradient_color,
			light_dir_deg: p.light_dir_deg,
			shading_intensity: p.shading_intensity,
			cast_shadows: p.cast_shadows,
			shadow_drop: p.shadow_drop,
			shadow_soft_edge: p.shadow_soft_edge,
			blending_strength: p.blending_strength,
		}
	}

	/// Position 0 = `max_elev` (top of gradient), 1 = `min_elev` (bottom).
	fn position_for(&self, elevation: f64) -> f64 {
		let span = self.max_elev - self.min_elev;
		let raw = if span.abs() < 1e-12 {
			0.0
		} else {
			1.0 - (elevation - self.min_elev) / span
		};
		raw.clamp(0.0, 1.0)
	}

	/// Samples a color for `elevation` per spec.md §4.6. Returns `None`
	/// for [`GradientKind::ShadedRelief`], which supplies no color of its
	/// own — the compositor falls back to a tinted hillshade grayscale.
	pub fn sample(&self, elevation: f32) -> Option<Color> {
		if elevation.is_nan() {
			return Some(self.no_data_color);
		}
		if !self.kind.has_color() {
			return None;
		}
		if self.stops.is_empty() {
			return Some(Color::rgba(128, 128, 128, 255));
		}

		let elevation = elevation as f64;
		if self.kind.is_posterized() {
			return Some(self.sample_posterized(elevation));
		}
		Some(self.sample_continuous(elevation))
	}

	fn sample_continuous(&self, elevation: f64) -> Color {
		let position = self.position_for(elevation);
		if position <= self.stops[0].position {
			return self.stops[0].color;
		}
		if position >= self.stops[self.stops.len() - 1].position {
			return self.stops[self.stops.len() - 1].color;
		}
		for w in self.stops.windows(2) {
			let (a, b) = (w[0], w[1]);
			if position >= a.position && position <= b.position {
				let span = b.position - a.position;
				let t = if span.abs() < 1e-12 { 0.0 } else { (position - a.position) / span };
				return a.color.lerp(b.color, t);
			}
		}
		self.stops[self.stops.len() - 1].color
	}

	/// Posterized sampling, including the above/below-range special cases
	/// (spec.md §4.6 #3): elevations above `max_elev` get
	/// `above_gradient_color` if set; elevations below `min_elev` extend
	/// the lowest-position stop's band downward. The last stop (by
	/// position) is a delimiter only and never produces a visible band of
	/// its own.
	fn sample_posterized(&self, elevation: f64) -> Color {
		if elevation > self.max_elev {
			if let Some(c) = self.above_gradient_color {
				return c;
			}
		}
		if elevation < self.min_elev {
			return self.stops[self.stops.len() - 1].color;
		}

		// The last stop is a delimiter only (spec.md §4.6 #3): it marks
		// where the bottommost band ends but never supplies a band color
		// of its own within [min_elev, max_elev].
		let banding_stops = &self.stops[..self.stops.len() - 1];
		if banding_stops.is_empty() {
			return self.stops[0].color;
		}

		let position = self.position_for(elevation);
		let mut band = banding_stops[0];
		for stop in banding_stops {
			if stop.position <= position {
				band = *stop;
			} else {
				break;
			}
		}
		band.color
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn classic_elevation() -> Gradient {
		Gradient::from_persisted(PersistedGradient {
			name: "Classic Elevation".into(),
			units: "meters".into(),
			kind: GradientKind::Continuous,
			min_elev: 0.0,
			max_elev: 3000.0,
			stops: vec![
				ColorStop { position: 0.0, color: Color::rgba(255, 255, 255, 255) },
				ColorStop { position: 1.0, color: Color::rgba(0, 128, 0, 255) },
			],
			no_data_color: Color::rgba(0, 0, 0, 0),
			shadow_color: Color::rgba(0, 0, 0, 255),
			below_gradient_color: None,
			above_gradient_color: None,
			light_dir_deg: 315.0,
			shading_intensity: 50.0,
			cast_shadows: false,
			shadow_drop: 1.0,
			shadow_soft_edge: 3,
			blending_strength: 100.0,
		})
	}

	#[test]
	fn flat_ocean_samples_min_elev_color() {
		let gradient = classic_elevation();
		let color = gradient.sample(-1.0).unwrap();
		assert_eq!(color, Color::rgba(0, 128, 0, 255));
	}

	#[test]
	fn continuous_interpolates_on_the_line_between_stops() {
		let gradient = classic_elevation();
		let mid = gradient.sample(1500.0).unwrap();
		assert_eq!(mid, Color::rgba(128, 192, 128, 255));
	}

	#[test]
	fn posterized_above_and_below_range() {
		let red = Color::rgba(255, 0, 0, 255);
		let yellow = Color::rgba(255, 255, 0, 255);
		let blue = Color::rgba(0, 0, 255, 255);
		let white = Color::rgba(255, 255, 255, 255);
		let gradient = Gradient::from_persisted(PersistedGradient {
			name: "Posterized".into(),
			units: "meters".into(),
			kind: GradientKind::Posterized,
			min_elev: 0.0,
			max_elev: 100.0,
			stops: vec![
				ColorStop { position: 0.0, color: red },
				ColorStop { position: 0.5, color: yellow },
				ColorStop { position: 1.0, color: blue },
			],
			no_data_color: Color::rgba(0, 0, 0, 0),
			shadow_color: Color::rgba(0, 0, 0, 255),
			below_gradient_color: None,
			above_gradient_color: Some(white),
			light_dir_deg: 0.0,
			shading_intensity: 0.0,
			cast_shadows: false,
			shadow_drop: 1.0,
			shadow_soft_edge: 0,
			blending_strength: 0.0,
		});

		assert_eq!(gradient.sample(-10.0).unwrap(), blue);
		assert_eq!(gradient.sample(0.0).unwrap(), yellow);
		assert_eq!(gradient.sample(25.0).unwrap(), yellow);
		assert_eq!(gradient.sample(60.0).unwrap(), red);
		assert_eq!(gradient.sample(110.0).unwrap(), white);
	}

	#[test]
	fn legacy_feet_units_convert_to_meters() {
		let gradient = Gradient::from_persisted(PersistedGradient {
			name: "Feet".into(),
			units: "feet".into(),
			kind: GradientKind::Continuous,
			min_elev: 0.0,
			max_elev: 1000.0,
			stops: vec![
				ColorStop { position: 0.0, color: Color::rgba(255, 255, 255, 255) },
				ColorStop { position: 1.0, color: Color::rgba(0, 0, 0, 255) },
			],
			no_data_color: Color::rgba(0, 0, 0, 0),
			shadow_color: Color::rgba(0, 0, 0, 255),
			below_gradient_color: None,
			above_gradient_color: None,
			light_dir_deg: 0.0,
			shading_intensity: 0.0,
			cast_shadows: false,
			shadow_drop: 1.0,
			shadow_soft_edge: 0,
			blending_strength: 0.0,
		});
		assert!((gradient.max_elev - 304.8).abs() < 1e-6);
		assert_eq!(gradient.units, Units::Meters);
	}

	#[test]
	fn historical_below_gradient_color_key_migrates() {
		let white = Color::rgba(255, 255, 255, 255);
		let gradient = Gradient::from_persisted(PersistedGradient {
			name: "Legacy".into(),
			units: "meters".into(),
			kind: GradientKind::Posterized,
			min_elev: 0.0,
			max_elev: 10.0,
			stops: vec![ColorStop { position: 0.0, color: Color::rgba(0, 0, 0, 255) }],
			no_data_color: Color::rgba(0, 0, 0, 0),
			shadow_color: Color::rgba(0, 0, 0, 255),
			below_gradient_color: Some(white),
			above_gradient_color: None,
			light_dir_deg: 0.0,
			shading_intensity: 0.0,
			cast_shadows: false,
			shadow_drop: 1.0,
			shadow_soft_edge: 0,
			blending_strength: 0.0,
		});
		assert_eq!(gradient.above_gradient_color, Some(white));
	}
}
