pub mod greeting;
pub mod profile;

pub use greeting::greeting_for;
pub use profile::{
    AgeBracket, CharacterProfile, CheckInFrequency, CommunicationStyle, Gender, Personality,
    Preferences, Relationship, VoiceParams,
};
