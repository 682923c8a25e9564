//! Region (AOI) geometry and per-region dwell statistics.

use serde::{Deserialize, Serialize};

/// A point in page coordinates.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl BoundingBox {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Inclusive on all four edges.
    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.x && x <= self.x + self.width && y >= self.y && y <= self.y + self.height
    }

    pub fn translated(&self, dx: f64, dy: f64) -> Self {
        Self {
            x: self.x + dx,
            y: self.y + dy,
            ..*self
        }
    }
}

/// How a named region is located by the [`RegionSource`](crate::aoi::RegionSource).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum RegionTarget {
    Element(String),
    Selector(String),
}

/// Registration request for one named region. An element id wins over a
/// selector when both are given and the element resolves.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RegionConfig {
    pub name: String,
    pub label: Option<String>,
    pub element: Option<String>,
    pub selector: Option<String>,
}

impl RegionConfig {
    pub fn element(name: impl Into<String>, element_id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            element: Some(element_id.into()),
            ..Self::default()
        }
    }

    pub fn selector(name: impl Into<String>, selector: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            selector: Some(selector.into()),
            ..Self::default()
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Region {
    pub id: String,
    pub label: String,
    pub bounding_box: BoundingBox,
    pub cumulative_dwell_ms: u64,
    pub visit_count: u32,
    /// Where the box came from, kept so overlays can re-measure it.
    pub target: RegionTarget,
    /// Position in the selector's match list, `None` for element targets.
    pub match_index: Option<usize>,
}

impl Region {
    pub fn contains(&self, position: Position) -> bool {
        self.bounding_box.contains(position.x, position.y)
    }

    pub fn record_visit(&mut self, duration_ms: u64) {
        self.visit_count = self.visit_count.saturating_add(1);
        self.cumulative_dwell_ms = self.cumulative_dwell_ms.saturating_add(duration_ms);
    }

    pub fn average_dwell_ms(&self) -> f64 {
        if self.visit_count == 0 {
            0.0
        } else {
            self.cumulative_dwell_ms as f64 / self.visit_count as f64
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RegionStats {
    pub label: String,
    pub visits: u32,
    pub total_time_ms: u64,
    pub average_time_ms: f64,
    pub currently_active: bool,
}
