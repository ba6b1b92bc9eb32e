use std::{collections::BTreeSet, fmt, fs, path::Path};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Highest relationship level a companion can reach.
pub const MAX_RELATIONSHIP_LEVEL: u8 = 100;

const MILESTONES: [(u8, &str); 4] = [
    (25, "Became friends"),
    (50, "Grew close"),
    (75, "Trusted confidant"),
    (100, "Inseparable"),
];

/// Persona configuration and relationship metadata for one companion.
///
/// Persisted as a camelCase JSON blob so the web front-end can read it as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CharacterProfile {
    pub id: String,
    pub name: String,
    pub age_bracket: AgeBracket,
    pub gender: Gender,
    #[serde(default)]
    pub personality: Personality,
    #[serde(default)]
    pub voice: VoiceParams,
    #[serde(default)]
    pub relationship: Relationship,
    #[serde(default)]
    pub preferences: Preferences,
}

impl CharacterProfile {
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read character card {:?}", path))?;
        let mut profile: Self = if path
            .extension()
            .map(|ext| ext == "json")
            .unwrap_or(false)
        {
            serde_json::from_str(&raw)?
        } else {
            toml::from_str(&raw)?
        };
        profile.normalize();
        Ok(profile)
    }

    /// Clamp every bounded field back into range.
    pub fn normalize(&mut self) {
        self.personality.clamp_dials();
        self.relationship.level = self.relationship.level.min(MAX_RELATIONSHIP_LEVEL);
    }

    /// Count one completed exchange. Returns the milestone reached, if any.
    pub fn record_interaction(&mut self, now: DateTime<Utc>) -> Option<String> {
        let before = self.relationship.level;
        let after = before.saturating_add(1).min(MAX_RELATIONSHIP_LEVEL);
        self.relationship.level = after;
        self.relationship.last_interaction_timestamp = Some(now);

        let reached = MILESTONES
            .iter()
            .find(|(threshold, _)| before < *threshold && after >= *threshold)
            .map(|(_, label)| label.to_string())?;
        self.relationship.milestones.push(reached.clone());
        Some(reached)
    }

    /// One-paragraph persona description fed to the generation service.
    pub fn persona_summary(&self) -> String {
        let traits = if self.personality.traits.is_empty() {
            "easygoing".to_string()
        } else {
            self.personality
                .traits
                .iter()
                .cloned()
                .collect::<Vec<_>>()
                .join(", ")
        };
        format!(
            "{name} is a {age} {gender} companion. Traits: {traits}. \
            Energy {energy}/100, empathy {empathy}/100, humor {humor}/100, wisdom {wisdom}/100. \
            Speaks in a {tone} tone with a {style} communication style.",
            name = self.name,
            age = self.age_bracket,
            gender = self.gender,
            energy = self.personality.energy,
            empathy = self.personality.empathy,
            humor = self.personality.humor,
            wisdom = self.personality.wisdom,
            tone = self.voice.tone,
            style = self.preferences.communication_style,
        )
    }

    pub fn demo() -> Self {
        Self {
            id: "mira".into(),
            name: "Mira".into(),
            age_bracket: AgeBracket::YoungAdult,
            gender: Gender::Female,
            personality: Personality {
                traits: BTreeSet::from(["curious".to_string(), "warm".to_string()]),
                energy: 65,
                empathy: 85,
                humor: 55,
                wisdom: 60,
            },
            voice: VoiceParams {
                tone: "warm".into(),
                pitch: 1.0,
                speed: 1.0,
                voice_id: None,
            },
            relationship: Relationship::default(),
            preferences: Preferences::default(),
        }
    }
}

/// Age range of the persona; anything unrecognised is kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum AgeBracket {
    Teen,
    YoungAdult,
    Adult,
    Elder,
    Other(String),
}

impl AgeBracket {
    pub fn as_str(&self) -> &str {
        match self {
            AgeBracket::Teen => "teen",
            AgeBracket::YoungAdult => "young-adult",
            AgeBracket::Adult => "adult",
            AgeBracket::Elder => "elder",
            AgeBracket::Other(raw) => raw,
        }
    }
}

impl From<String> for AgeBracket {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "teen" => AgeBracket::Teen,
            "young-adult" => AgeBracket::YoungAdult,
            "adult" => AgeBracket::Adult,
            "elder" => AgeBracket::Elder,
            _ => AgeBracket::Other(raw),
        }
    }
}

impl From<AgeBracket> for String {
    fn from(bracket: AgeBracket) -> Self {
        bracket.as_str().to_string()
    }
}

impl fmt::Display for AgeBracket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Gender {
    Female,
    Male,
    NonBinary,
}

impl fmt::Display for Gender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Gender::Female => "female",
            Gender::Male => "male",
            Gender::NonBinary => "non-binary",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Personality {
    #[serde(default)]
    pub traits: BTreeSet<String>,
    #[serde(default = "Personality::default_dial")]
    pub energy: u8,
    #[serde(default = "Personality::default_dial")]
    pub empathy: u8,
    #[serde(default = "Personality::default_dial")]
    pub humor: u8,
    #[serde(default = "Personality::default_dial")]
    pub wisdom: u8,
}

impl Personality {
    fn default_dial() -> u8 {
        50
    }

    fn clamp_dials(&mut self) {
        for dial in [
            &mut self.energy,
            &mut self.empathy,
            &mut self.humor,
            &mut self.wisdom,
        ] {
            *dial = (*dial).min(100);
        }
    }
}

impl Default for Personality {
    fn default() -> Self {
        Self {
            traits: BTreeSet::new(),
            energy: Self::default_dial(),
            empathy: Self::default_dial(),
            humor: Self::default_dial(),
            wisdom: Self::default_dial(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceParams {
    #[serde(default = "VoiceParams::default_tone")]
    pub tone: String,
    #[serde(default = "VoiceParams::default_scalar")]
    pub pitch: f32,
    #[serde(default = "VoiceParams::default_scalar")]
    pub speed: f32,
    /// Provider-specific voice identifier, when the user picked one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice_id: Option<String>,
}

impl VoiceParams {
    fn default_tone() -> String {
        "friendly".into()
    }
    fn default_scalar() -> f32 {
        1.0
    }
}

impl Default for VoiceParams {
    fn default() -> Self {
        Self {
            tone: Self::default_tone(),
            pitch: Self::default_scalar(),
            speed: Self::default_scalar(),
            voice_id: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Relationship {
    #[serde(default)]
    pub level: u8,
    #[serde(default)]
    pub memories: Vec<String>,
    #[serde(default)]
    pub milestones: Vec<String>,
    #[serde(default)]
    pub last_interaction_timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub check_in_frequency: CheckInFrequency,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CheckInFrequency {
    Daily,
    #[default]
    Weekly,
    Occasionally,
    Never,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Preferences {
    #[serde(default = "Preferences::default_true")]
    pub mood_sync: bool,
    #[serde(default)]
    pub proactive_check_in: bool,
    #[serde(default)]
    pub communication_style: CommunicationStyle,
}

impl Preferences {
    fn default_true() -> bool {
        true
    }
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            mood_sync: true,
            proactive_check_in: false,
            communication_style: CommunicationStyle::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CommunicationStyle {
    #[default]
    Casual,
    Supportive,
    Playful,
    Thoughtful,
}

impl fmt::Display for CommunicationStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CommunicationStyle::Casual => "casual",
            CommunicationStyle::Supportive => "supportive",
            CommunicationStyle::Playful => "playful",
            CommunicationStyle::Thoughtful => "thoughtful",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_age_bracket_round_trips_verbatim() {
        let json = r#"{"id":"x","name":"X","ageBracket":"ancient","gender":"non-binary"}"#;
        let profile: CharacterProfile = serde_json::from_str(json).unwrap();
        assert_eq!(profile.age_bracket, AgeBracket::Other("ancient".into()));
        assert_eq!(profile.gender, Gender::NonBinary);

        let back = serde_json::to_value(&profile).unwrap();
        assert_eq!(back["ageBracket"], "ancient");
        assert_eq!(back["relationship"]["level"], 0);
    }

    #[test]
    fn relationship_level_caps_at_max() {
        let mut profile = CharacterProfile::demo();
        profile.relationship.level = 99;
        let now = Utc::now();

        profile.record_interaction(now);
        profile.record_interaction(now);
        profile.record_interaction(now);

        assert_eq!(profile.relationship.level, MAX_RELATIONSHIP_LEVEL);
        assert_eq!(profile.relationship.last_interaction_timestamp, Some(now));
    }

    #[test]
    fn milestone_recorded_once_when_crossing_threshold() {
        let mut profile = CharacterProfile::demo();
        profile.relationship.level = 23;

        assert_eq!(profile.record_interaction(Utc::now()), None);
        assert_eq!(
            profile.record_interaction(Utc::now()).as_deref(),
            Some("Became friends")
        );
        assert_eq!(profile.record_interaction(Utc::now()), None);
        assert_eq!(profile.relationship.milestones, vec!["Became friends"]);
    }

    #[test]
    fn bundled_card_loads() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../characters/mira.toml");
        let profile = CharacterProfile::from_file(&path).unwrap();
        assert_eq!(profile.id, "mira");
        assert_eq!(profile.age_bracket, AgeBracket::YoungAdult);
        assert!(profile.personality.traits.contains("playful"));
        assert_eq!(profile.relationship.check_in_frequency, CheckInFrequency::Weekly);
    }

    #[test]
    fn normalize_clamps_out_of_range_dials() {
        let mut profile = CharacterProfile::demo();
        profile.personality.humor = 250;
        profile.relationship.level = 180;
        profile.normalize();
        assert_eq!(profile.personality.humor, 100);
        assert_eq!(profile.relationship.level, 100);
    }
}
