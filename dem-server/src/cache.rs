//! Concurrent render cache, grounded on the teacher's
//! `id_to_renderer: DashMap<u32, RenderData>` session cache — same idea,
//! keyed by the rendered window/gradient/scale instead of a client id.

use dashmap::DashMap;

pub type RenderCache = DashMap<String, std::sync::Arc<Vec<u8>>>;
