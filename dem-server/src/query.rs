//! Query-string parsing for `/map.png`, mirroring the flat `key=value`
//! loop the teacher's `map-server/src/main.rs` runs over `url::Url`'s
//! query pairs.

use dem_core::grid::Window;
use url::Url;

pub struct RenderQuery {
	pub window: Window,
	pub gradient_name: String,
	pub scale: f64,
}

impl RenderQuery {
	pub fn from_url(url: &Url) -> Result<Self, String> {
		let mut window_str = None;
		let mut gradient_name = None;
		let mut scale = 1.0;

		for (key, value) in url.query_pairs() {
			match key.as_ref() {
				"window" => window_str = Some(value.into_owned()),
				"gradient" => gradient_name = Some(value.into_owned()),
				"scale" => scale = value.parse::<f64>().map_err(|_| format!("not a number: {value}"))?,
				other => return Err(format!("unknown query parameter: {other}")),
			}
		}

		let window_str = window_str.ok_or("missing window parameter")?;
		let parts: Vec<&str> = window_str.split(',').collect();
		if parts.len() != 4 {
			return Err("window must be west,north,east,south".to_string());
		}
		let parse = |s: &str| s.parse::<f64>().map_err(|_| format!("not a number: {s}"));
		let window = (parse(parts[0])?, parse(parts[1])?, parse(parts[2])?, parse(parts[3])?);

		Ok(RenderQuery {
			window,
			gradient_name: gradient_name.ok_or("missing gradient parameter")?,
			scale,
		})
	}

	/// A cache key stable across requests asking for the same render.
	pub fn cache_key(&self) -> String {
		let (w, n, e, s) = self.window;
		format!("{w:.6},{n:.6},{e:.6},{s:.6}|{}|{:.4}", self.gradient_name, self.scale)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_window_gradient_and_scale() {
		let url = Url::parse("http://localhost/map.png?window=-10,5,10,-5&gradient=classic&scale=2.0").unwrap();
		let query = RenderQuery::from_url(&url).unwrap();
		assert_eq!(query.window, (-10.0, 5.0, 10.0, -5.0));
		assert_eq!(query.gradient_name, "classic");
		assert_eq!(query.scale, 2.0);
	}

	#[test]
	fn defaults_scale_to_one() {
		let url = Url::parse("http://localhost/map.png?window=-10,5,10,-5&gradient=classic").unwrap();
		let query = RenderQuery::from_url(&url).unwrap();
		assert_eq!(query.scale, 1.0);
	}

	#[test]
	fn missing_window_is_an_error() {
		let url = Url::parse("http://localhost/map.png?gradient=classic").unwrap();
		assert!(RenderQuery::from_url(&url).is_err());
	}

	#[test]
	fn cache_key_differs_by_scale() {
		let a = Url::parse("http://localhost/map.png?window=-10,5,10,-5&gradient=classic&scale=1.0").unwrap();
		let b = Url::parse("http://localhost/map.png?window=-10,5,10,-5&gradient=classic&scale=2.0").unwrap();
		let qa = RenderQuery::from_url(&a).unwrap();
		let qb = RenderQuery::from_url(&b).unwrap();
		assert_ne!(qa.cache_key(), qb.cache_key());
	}
}
