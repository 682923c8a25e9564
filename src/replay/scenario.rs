//! Scenario files for the replay driver.
//!
//! A scenario fixes the page layout (element and selector rectangles), the
//! regions to track, and a timeline of pointer and page actions in
//! milliseconds from the start of the run.

use std::{collections::HashMap, path::Path};

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value;

use crate::{
    aoi::FixedRegionSource,
    models::{BoundingBox, Position, RegionConfig},
    recorder::IdentitySources,
};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scenario {
    pub task_id: String,
    #[serde(default)]
    pub participant_id: Option<String>,
    /// Page query string, e.g. `participantId=P1&lang=en`.
    #[serde(default)]
    pub query: Option<String>,
    /// Epoch milliseconds at which the virtual clock starts. Defaults to now.
    #[serde(default)]
    pub start_ms: Option<i64>,
    #[serde(default)]
    pub duration_ms: Option<i64>,
    #[serde(default)]
    pub scroll: Position,
    pub regions: Vec<RegionConfig>,
    #[serde(default)]
    pub elements: HashMap<String, BoundingBox>,
    #[serde(default)]
    pub selectors: HashMap<String, Vec<BoundingBox>>,
    #[serde(default)]
    pub steps: Vec<ScenarioStep>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScenarioStep {
    pub at: i64,
    #[serde(flatten)]
    pub action: StepAction,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum StepAction {
    Move {
        x: f64,
        y: f64,
    },
    #[serde(rename_all = "camelCase")]
    Click {
        region: String,
        x: f64,
        y: f64,
        #[serde(default)]
        target: String,
        #[serde(default)]
        target_id: String,
    },
    Answer {
        question: String,
        value: Value,
    },
    Event {
        #[serde(rename = "type")]
        event_type: String,
        #[serde(default)]
        data: Value,
    },
    Enable,
    Disable,
    Visibility {
        hidden: bool,
    },
}

impl Scenario {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read scenario {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("invalid scenario {}", path.display()))
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let mut scenario: Scenario =
            serde_json::from_str(raw).context("failed to parse scenario JSON")?;
        // Steps at the same instant keep their file order.
        scenario.steps.sort_by_key(|step| step.at);
        Ok(scenario)
    }

    pub fn identity(&self) -> IdentitySources {
        IdentitySources {
            query: self.query.clone(),
            ambient: self.participant_id.clone(),
        }
    }

    pub fn source(&self) -> FixedRegionSource {
        let source = self
            .elements
            .iter()
            .fold(FixedRegionSource::new(), |source, (id, rect)| {
                source.with_element(id.clone(), *rect)
            });
        self.selectors
            .iter()
            .fold(source, |source, (selector, rects)| {
                source.with_selector(selector.clone(), rects.clone())
            })
            .with_scroll(self.scroll)
    }

    /// Explicit duration, or just past the last step.
    pub fn effective_duration_ms(&self, poll_interval_ms: i64) -> i64 {
        self.duration_ms.unwrap_or_else(|| {
            self.steps.last().map(|step| step.at).unwrap_or(0) + poll_interval_ms
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{aoi::RegionSource, models::RegionTarget};
    use serde_json::json;

    const SCENARIO: &str = r#"{
        "taskId": "task1",
        "participantId": "P7",
        "scroll": { "x": 0, "y": 10 },
        "regions": [
            { "name": "title", "label": "Title", "element": "title-el" },
            { "name": "option", "selector": ".option" }
        ],
        "elements": { "title-el": { "x": 0, "y": 0, "width": 100, "height": 50 } },
        "selectors": { ".option": [ { "x": 0, "y": 60, "width": 80, "height": 20 } ] },
        "steps": [
            { "at": 300, "action": "answer", "question": "q1", "value": "b" },
            { "at": 0, "action": "move", "x": 50, "y": 25 },
            { "at": 120, "action": "click", "region": "title", "x": 5, "y": 5, "target": "H1", "targetId": "title-el" },
            { "at": 200, "action": "event", "type": "article_selected", "data": { "articleId": "a1" } },
            { "at": 250, "action": "disable" },
            { "at": 260, "action": "visibility", "hidden": true }
        ]
    }"#;

    #[test]
    fn parses_and_orders_steps() {
        let scenario = Scenario::parse(SCENARIO).unwrap();
        let times: Vec<i64> = scenario.steps.iter().map(|step| step.at).collect();
        assert_eq!(times, vec![0, 120, 200, 250, 260, 300]);

        assert_eq!(scenario.steps[0].action, StepAction::Move { x: 50.0, y: 25.0 });
        assert_eq!(
            scenario.steps[1].action,
            StepAction::Click {
                region: "title".into(),
                x: 5.0,
                y: 5.0,
                target: "H1".into(),
                target_id: "title-el".into(),
            }
        );
        assert_eq!(
            scenario.steps[2].action,
            StepAction::Event {
                event_type: "article_selected".into(),
                data: json!({ "articleId": "a1" }),
            }
        );
        assert_eq!(scenario.steps[3].action, StepAction::Disable);
        assert_eq!(scenario.effective_duration_ms(100), 400);
    }

    #[test]
    fn builds_source_and_identity() {
        let scenario = Scenario::parse(SCENARIO).unwrap();
        let source = scenario.source();

        assert_eq!(source.scroll_offset(), Position::new(0.0, 10.0));
        assert_eq!(
            source.resolve(&RegionTarget::Selector(".option".into())).len(),
            1
        );
        let identity = scenario.identity();
        assert_eq!(identity.ambient.as_deref(), Some("P7"));
        assert!(identity.query.is_none());
    }

    #[test]
    fn rejects_unknown_actions() {
        let raw = r#"{ "taskId": "t", "regions": [], "steps": [ { "at": 0, "action": "teleport" } ] }"#;
        assert!(Scenario::parse(raw).is_err());
    }
}
