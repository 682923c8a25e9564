use std::collections::HashMap;

use crate::models::{BoundingBox, Position, RegionTarget};

/// Resolves region targets to layout rectangles.
///
/// Rectangles are viewport-relative; the manager adds [`scroll_offset`]
/// to place them in page coordinates. A target that cannot be resolved
/// yields an empty list.
///
/// [`scroll_offset`]: RegionSource::scroll_offset
pub trait RegionSource: Send + Sync {
    fn resolve(&self, target: &RegionTarget) -> Vec<BoundingBox>;

    fn scroll_offset(&self) -> Position {
        Position::default()
    }
}

/// Region source backed by fixed rectangles.
#[derive(Debug, Clone, Default)]
pub struct FixedRegionSource {
    elements: HashMap<String, BoundingBox>,
    selectors: HashMap<String, Vec<BoundingBox>>,
    scroll: Position,
}

impl FixedRegionSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_element(mut self, element_id: impl Into<String>, rect: BoundingBox) -> Self {
        self.elements.insert(element_id.into(), rect);
        self
    }

    pub fn with_selector(mut self, selector: impl Into<String>, rects: Vec<BoundingBox>) -> Self {
        self.selectors.insert(selector.into(), rects);
        self
    }

    pub fn with_scroll(mut self, scroll: Position) -> Self {
        self.scroll = scroll;
        self
    }
}

impl RegionSource for FixedRegionSource {
    fn resolve(&self, target: &RegionTarget) -> Vec<BoundingBox> {
        match target {
            RegionTarget::Element(id) => self.elements.get(id).copied().into_iter().collect(),
            RegionTarget::Selector(selector) => {
                self.selectors.get(selector).cloned().unwrap_or_default()
            }
        }
    }

    fn scroll_offset(&self) -> Position {
        self.scroll
    }
}
