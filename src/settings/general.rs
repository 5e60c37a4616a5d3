use super::{Correction, Schema};
use crate::ledger::Record;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;

pub const MAX_STEPS_RANGE: RangeInclusive<u32> = 1..=50;
pub const MAX_ACTIONS_PER_STEP_RANGE: RangeInclusive<u32> = 1..=50;
pub const MAX_FAILURES_RANGE: RangeInclusive<u32> = 1..=10;
pub const PLANNING_INTERVAL_RANGE: RangeInclusive<u32> = 1..=20;
pub const MIN_WAIT_PAGE_LOAD_MS_RANGE: RangeInclusive<u32> = 250..=5000;
pub const MIN_WAIT_PAGE_LOAD_STEP_MS: u32 = 50;

/// Agent behaviour knobs shown on the general settings page.
#[allow(clippy::struct_excessive_bools)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct GeneralSettings {
    /// Maximum steps per task
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,
    /// Maximum actions the agent may issue in one step
    #[serde(default = "default_max_actions_per_step")]
    pub max_actions_per_step: u32,
    /// Consecutive failures tolerated before a task aborts
    #[serde(default = "default_max_failures")]
    pub max_failures: u32,
    /// Send page screenshots to the model
    #[serde(default = "default_true")]
    pub use_vision: bool,
    /// Overlay element highlights on the page (requires vision)
    #[serde(default = "default_true")]
    pub display_highlights: bool,
    /// Re-plan every N steps
    #[serde(default = "default_planning_interval")]
    pub planning_interval: u32,
    /// Minimum wait after a page load, in milliseconds (multiple of 50)
    #[serde(default = "default_min_wait_page_load_ms")]
    pub min_wait_page_load_ms: u32,
    /// Offer to replay previously recorded tasks
    #[serde(default)]
    pub replay_historical_tasks: bool,
}

fn default_max_steps() -> u32 {
    50
}

fn default_max_actions_per_step() -> u32 {
    5
}

fn default_max_failures() -> u32 {
    3
}

fn default_true() -> bool {
    true
}

fn default_planning_interval() -> u32 {
    3
}

fn default_min_wait_page_load_ms() -> u32 {
    250
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            max_actions_per_step: default_max_actions_per_step(),
            max_failures: default_max_failures(),
            use_vision: true,
            display_highlights: true,
            planning_interval: default_planning_interval(),
            min_wait_page_load_ms: default_min_wait_page_load_ms(),
            replay_historical_tasks: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneralSettingsPatch {
    #[serde(default)]
    pub max_steps: Option<u32>,
    #[serde(default)]
    pub max_actions_per_step: Option<u32>,
    #[serde(default)]
    pub max_failures: Option<u32>,
    #[serde(default)]
    pub use_vision: Option<bool>,
    #[serde(default)]
    pub display_highlights: Option<bool>,
    #[serde(default)]
    pub planning_interval: Option<u32>,
    #[serde(default)]
    pub min_wait_page_load_ms: Option<u32>,
    #[serde(default)]
    pub replay_historical_tasks: Option<bool>,
}

impl Record for GeneralSettings {
    const KEY: &'static str = "general";
}

impl Schema for GeneralSettings {
    type Patch = GeneralSettingsPatch;

    fn apply(&mut self, patch: &GeneralSettingsPatch) {
        if let Some(v) = patch.max_steps {
            self.max_steps = v;
        }
        if let Some(v) = patch.max_actions_per_step {
            self.max_actions_per_step = v;
        }
        if let Some(v) = patch.max_failures {
            self.max_failures = v;
        }
        if let Some(v) = patch.use_vision {
            self.use_vision = v;
        }
        if let Some(v) = patch.display_highlights {
            self.display_highlights = v;
        }
        if let Some(v) = patch.planning_interval {
            self.planning_interval = v;
        }
        if let Some(v) = patch.min_wait_page_load_ms {
            self.min_wait_page_load_ms = v;
        }
        if let Some(v) = patch.replay_historical_tasks {
            self.replay_historical_tasks = v;
        }
    }

    fn normalize(&mut self) -> Vec<Correction> {
        let mut corrections = Vec::new();
        clamp_field(&mut self.max_steps, &MAX_STEPS_RANGE, "max_steps", &mut corrections);
        clamp_field(
            &mut self.max_actions_per_step,
            &MAX_ACTIONS_PER_STEP_RANGE,
            "max_actions_per_step",
            &mut corrections,
        );
        clamp_field(
            &mut self.max_failures,
            &MAX_FAILURES_RANGE,
            "max_failures",
            &mut corrections,
        );
        clamp_field(
            &mut self.planning_interval,
            &PLANNING_INTERVAL_RANGE,
            "planning_interval",
            &mut corrections,
        );

        let wait = snap_to_step(
            self.min_wait_page_load_ms,
            &MIN_WAIT_PAGE_LOAD_MS_RANGE,
            MIN_WAIT_PAGE_LOAD_STEP_MS,
        );
        if wait != self.min_wait_page_load_ms {
            self.min_wait_page_load_ms = wait;
            corrections.push(Correction::new(
                "min_wait_page_load_ms",
                wait,
                "snapped to a 50 ms step within 250..=5000",
            ));
        }

        if self.display_highlights && !self.use_vision {
            self.display_highlights = false;
            corrections.push(Correction::new(
                "display_highlights",
                false,
                "highlights require use_vision",
            ));
        }

        corrections
    }
}

fn clamp_field(
    value: &mut u32,
    range: &RangeInclusive<u32>,
    field: &'static str,
    corrections: &mut Vec<Correction>,
) {
    let clamped = (*value).clamp(*range.start(), *range.end());
    if clamped != *value {
        *value = clamped;
        corrections.push(Correction::new(field, clamped, "clamped into allowed range"));
    }
}

fn snap_to_step(value: u32, range: &RangeInclusive<u32>, step: u32) -> u32 {
    let clamped = value.clamp(*range.start(), *range.end());
    let offset = clamped - range.start();
    let snapped = range.start() + (offset + step / 2) / step * step;
    snapped.min(*range.end())
}
