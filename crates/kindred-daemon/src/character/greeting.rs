use super::profile::{AgeBracket, CharacterProfile};

/// Opening line for a companion with no history, chosen by age bracket.
///
/// Unrecognised brackets fall back to the young-adult line.
pub fn greeting_for(profile: &CharacterProfile) -> String {
    let name = &profile.name;
    match profile.age_bracket {
        AgeBracket::Teen => format!(
            "Hey! I'm {name}! Super excited to finally meet you. What's been going on with you lately?"
        ),
        AgeBracket::Adult => format!(
            "Hello, I'm {name}. It's really good to meet you. How has your day been so far?"
        ),
        AgeBracket::Elder => format!(
            "Well hello there, dear. I'm {name}. Come, sit a while and tell me what's on your mind."
        ),
        AgeBracket::YoungAdult | AgeBracket::Other(_) => format!(
            "Hi there! I'm {name}. I'm so happy we get to talk. What would you like to chat about?"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::character::Gender;

    fn profile(bracket: AgeBracket) -> CharacterProfile {
        CharacterProfile {
            name: "Kai".into(),
            gender: Gender::Male,
            age_bracket: bracket,
            ..CharacterProfile::demo()
        }
    }

    #[test]
    fn teen_greeting_uses_teen_line() {
        let text = greeting_for(&profile(AgeBracket::Teen));
        assert!(text.starts_with("Hey! I'm Kai!"));
    }

    #[test]
    fn each_bracket_has_its_own_line() {
        let lines = [
            greeting_for(&profile(AgeBracket::Teen)),
            greeting_for(&profile(AgeBracket::YoungAdult)),
            greeting_for(&profile(AgeBracket::Adult)),
            greeting_for(&profile(AgeBracket::Elder)),
        ];
        for (i, a) in lines.iter().enumerate() {
            assert!(a.contains("Kai"));
            for b in &lines[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn unknown_bracket_falls_back_to_young_adult() {
        assert_eq!(
            greeting_for(&profile(AgeBracket::Other("toddler".into()))),
            greeting_for(&profile(AgeBracket::YoungAdult))
        );
    }
}
