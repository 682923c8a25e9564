//! Region registry and the enter/exit/click state machine.
//!
//! Pure state: every operation takes the current time explicitly and returns
//! the transitions it produced, so the caller decides where they go.

use std::collections::{BTreeMap, HashMap};

use crate::models::{
    Position, Region, RegionConfig, RegionStats, RegionTarget, Transition, TransitionEvent,
};

use super::source::RegionSource;

#[derive(Debug)]
pub struct RegionTracker {
    regions: Vec<Region>,
    /// Active set: region id to the timestamp of its open enter.
    active: HashMap<String, i64>,
    enabled: bool,
}

impl Default for RegionTracker {
    fn default() -> Self {
        Self {
            regions: Vec::new(),
            active: HashMap::new(),
            enabled: true,
        }
    }
}

impl RegionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the regions described by `config`, measured once now.
    ///
    /// An element target registers one region named `config.name`; a selector
    /// registers one region per match named `{name}_{index}`. Returns the ids
    /// registered, empty when nothing resolved. Re-registering an id replaces
    /// its geometry and keeps its statistics.
    pub fn register(&mut self, config: &RegionConfig, source: &dyn RegionSource) -> Vec<String> {
        let scroll = source.scroll_offset();
        let label = config.label.clone().unwrap_or_else(|| config.name.clone());

        if let Some(element_id) = &config.element {
            let target = RegionTarget::Element(element_id.clone());
            if let Some(rect) = source.resolve(&target).first() {
                self.upsert(
                    config.name.clone(),
                    label,
                    rect.translated(scroll.x, scroll.y),
                    target,
                    None,
                );
                return vec![config.name.clone()];
            }
        }

        let Some(selector) = &config.selector else {
            return Vec::new();
        };

        let target = RegionTarget::Selector(selector.clone());
        source
            .resolve(&target)
            .iter()
            .enumerate()
            .map(|(index, rect)| {
                let id = format!("{}_{index}", config.name);
                let label = match &config.label {
                    Some(label) => format!("{label}_{index}"),
                    None => id.clone(),
                };
                self.upsert(
                    id.clone(),
                    label,
                    rect.translated(scroll.x, scroll.y),
                    target.clone(),
                    Some(index),
                );
                id
            })
            .collect()
    }

    fn upsert(
        &mut self,
        id: String,
        label: String,
        bounding_box: crate::models::BoundingBox,
        target: RegionTarget,
        match_index: Option<usize>,
    ) {
        if let Some(existing) = self.regions.iter_mut().find(|region| region.id == id) {
            existing.label = label;
            existing.bounding_box = bounding_box;
            existing.target = target;
            existing.match_index = match_index;
            return;
        }

        self.regions.push(Region {
            id,
            label,
            bounding_box,
            cumulative_dwell_ms: 0,
            visit_count: 0,
            target,
            match_index,
        });
    }

    /// Hit-tests one sample against every region independently.
    pub fn check_point(&mut self, position: Position, now_ms: i64) -> Vec<TransitionEvent> {
        if !self.enabled {
            return Vec::new();
        }

        let mut transitions = Vec::new();
        for index in 0..self.regions.len() {
            let inside = self.regions[index].contains(position);
            let was_inside = self.active.contains_key(&self.regions[index].id);

            let transition = if inside && !was_inside {
                self.enter_at(index, position, now_ms)
            } else if !inside && was_inside {
                self.exit_at(index, position, now_ms)
            } else {
                None
            };
            transitions.extend(transition);
        }
        transitions
    }

    /// Pointer-enter from the region's own element. No-op when disabled,
    /// unknown, or already active.
    pub fn enter(&mut self, region_id: &str, position: Position, now_ms: i64) -> Option<TransitionEvent> {
        let index = self.index_of(region_id)?;
        self.enter_at(index, position, now_ms)
    }

    /// Pointer-leave from the region's own element. No-op when disabled or
    /// not active.
    pub fn exit(&mut self, region_id: &str, position: Position, now_ms: i64) -> Option<TransitionEvent> {
        let index = self.index_of(region_id)?;
        self.exit_at(index, position, now_ms)
    }

    /// Clicks are reported whether or not the region is active.
    pub fn click(
        &mut self,
        region_id: &str,
        position: Position,
        target: &str,
        target_id: &str,
        now_ms: i64,
    ) -> Option<TransitionEvent> {
        if !self.enabled {
            return None;
        }
        let region = self.regions.iter().find(|region| region.id == region_id)?;

        Some(TransitionEvent {
            region_id: region.id.clone(),
            region_label: region.label.clone(),
            timestamp_ms: now_ms,
            position,
            kind: Transition::Click {
                target: target.to_string(),
                target_id: target_id.to_string(),
            },
        })
    }

    fn enter_at(&mut self, index: usize, position: Position, now_ms: i64) -> Option<TransitionEvent> {
        let region = &self.regions[index];
        if !self.enabled || self.active.contains_key(&region.id) {
            return None;
        }

        self.active.insert(region.id.clone(), now_ms);
        Some(TransitionEvent {
            region_id: region.id.clone(),
            region_label: region.label.clone(),
            timestamp_ms: now_ms,
            position,
            kind: Transition::Enter,
        })
    }

    fn exit_at(&mut self, index: usize, position: Position, now_ms: i64) -> Option<TransitionEvent> {
        if !self.enabled {
            return None;
        }
        let region = &mut self.regions[index];
        let entered_at = self.active.remove(&region.id)?;

        let duration_ms = now_ms.saturating_sub(entered_at).max(0) as u64;
        region.record_visit(duration_ms);

        Some(TransitionEvent {
            region_id: region.id.clone(),
            region_label: region.label.clone(),
            timestamp_ms: now_ms,
            position,
            kind: Transition::Exit {
                duration_ms,
                total_visits: region.visit_count,
                total_time_ms: region.cumulative_dwell_ms,
            },
        })
    }

    fn index_of(&self, region_id: &str) -> Option<usize> {
        self.regions.iter().position(|region| region.id == region_id)
    }

    /// Suspends transitions. The active set and statistics are left as they
    /// are, so a dwell open at this point stays open.
    pub fn disable(&mut self) {
        self.enabled = false;
    }

    pub fn enable(&mut self) {
        self.enabled = true;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn is_active(&self, region_id: &str) -> bool {
        self.active.contains_key(region_id)
    }

    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    pub fn region(&self, region_id: &str) -> Option<&Region> {
        self.regions.iter().find(|region| region.id == region_id)
    }

    /// Forgets open dwells without emitting exits. Statistics survive.
    pub fn clear_active(&mut self) {
        self.active.clear();
    }

    /// Drops every region and its statistics.
    pub fn reset(&mut self) {
        self.regions.clear();
        self.active.clear();
    }

    pub fn statistics(&self) -> BTreeMap<String, RegionStats> {
        self.regions
            .iter()
            .map(|region| {
                (
                    region.id.clone(),
                    RegionStats {
                        label: region.label.clone(),
                        visits: region.visit_count,
                        total_time_ms: region.cumulative_dwell_ms,
                        average_time_ms: region.average_dwell_ms(),
                        currently_active: self.active.contains_key(&region.id),
                    },
                )
            })
            .collect()
    }
}
