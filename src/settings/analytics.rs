use super::{Correction, Schema};
use crate::ledger::Record;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Anonymous usage reporting. Off until the user opts in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct AnalyticsSettings {
    #[serde(default)]
    pub enabled: bool,
    /// Random identifier attached to reports while enabled. Cleared on opt-out.
    #[serde(default)]
    pub anonymous_user_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalyticsSettingsPatch {
    #[serde(default)]
    pub enabled: Option<bool>,
}

impl Record for AnalyticsSettings {
    const KEY: &'static str = "analytics";
}

impl Schema for AnalyticsSettings {
    type Patch = AnalyticsSettingsPatch;

    fn apply(&mut self, patch: &AnalyticsSettingsPatch) {
        if let Some(enabled) = patch.enabled {
            self.enabled = enabled;
        }
    }

    fn normalize(&mut self) -> Vec<Correction> {
        match (self.enabled, self.anonymous_user_id.as_deref()) {
            (true, None | Some("")) => {
                let id = Uuid::new_v4().to_string();
                self.anonymous_user_id = Some(id.clone());
                vec![Correction::new(
                    "anonymous_user_id",
                    id,
                    "generated on opt-in",
                )]
            }
            (false, Some(_)) => {
                self.anonymous_user_id = None;
                vec![Correction::new(
                    "anonymous_user_id",
                    "null",
                    "cleared on opt-out",
                )]
            }
            _ => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_opted_out_without_id() {
        let mut settings = AnalyticsSettings::default();
        assert!(!settings.enabled);
        assert!(settings.normalize().is_empty());
        assert!(settings.anonymous_user_id.is_none());
    }

    #[test]
    fn opting_in_generates_a_v4_id() {
        let mut settings = AnalyticsSettings::default();
        settings.apply(&AnalyticsSettingsPatch {
            enabled: Some(true),
        });
        let corrections = settings.normalize();
        assert_eq!(corrections.len(), 1);

        let id = settings.anonymous_user_id.as_deref().unwrap();
        let parsed = Uuid::parse_str(id).unwrap();
        assert_eq!(parsed.get_version_num(), 4);
    }

    #[test]
    fn existing_id_survives_a_repeat_opt_in() {
        let mut settings = AnalyticsSettings {
            enabled: true,
            anonymous_user_id: Some("kept".into()),
        };
        settings.apply(&AnalyticsSettingsPatch {
            enabled: Some(true),
        });
        assert!(settings.normalize().is_empty());
        assert_eq!(settings.anonymous_user_id.as_deref(), Some("kept"));
    }

    #[test]
    fn opting_out_clears_the_id() {
        let mut settings = AnalyticsSettings {
            enabled: true,
            anonymous_user_id: Some("abc".into()),
        };
        settings.apply(&AnalyticsSettingsPatch {
            enabled: Some(false),
        });
        settings.normalize();
        assert_eq!(settings, AnalyticsSettings::default());
    }
}
