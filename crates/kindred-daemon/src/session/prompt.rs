use crate::{
    character::CharacterProfile,
    chat::{ChatMessage, Role},
    llm::PromptMessage,
};

use super::SessionState;

/// System turn describing who the companion is and where the relationship stands.
pub fn persona_instruction(profile: &CharacterProfile, state: &SessionState) -> String {
    let memories = if profile.relationship.memories.is_empty() {
        "(none yet)".to_string()
    } else {
        profile.relationship.memories.join("; ")
    };
    let topics = if state.conversation_context.is_empty() {
        "(nothing yet)".to_string()
    } else {
        state
            .conversation_context
            .iter()
            .cloned()
            .collect::<Vec<_>>()
            .join(" | ")
    };
    let mood_line = if profile.preferences.mood_sync {
        format!(
            "The user is feeling {mood}; match your energy to it.",
            mood = state.current_mood
        )
    } else {
        format!("The user is feeling {mood}.", mood = state.current_mood)
    };

    format!(
        "You are {name}, a companion talking with the user. {persona}\n\n\
        Relationship level: {level}/100.\n\
        Shared memories: {memories}\n\
        Recent topics the user brought up: {topics}\n\
        {mood_line}\n\n\
        Stay in character and reply conversationally in one to three sentences.",
        name = profile.name,
        persona = profile.persona_summary(),
        level = state.relationship_level,
    )
}

/// Persona turn, the last `window` prior messages, then the new user text.
pub fn build_messages(
    profile: &CharacterProfile,
    state: &SessionState,
    history: &[ChatMessage],
    user_text: &str,
    window: usize,
) -> Vec<PromptMessage> {
    let start = history.len().saturating_sub(window);
    let mut messages = Vec::with_capacity(window + 2);
    messages.push(PromptMessage::system(persona_instruction(profile, state)));
    messages.extend(history[start..].iter().map(|msg| match msg.role {
        Role::User => PromptMessage::user(msg.content.clone()),
        Role::Assistant => PromptMessage::assistant(msg.content.clone()),
    }));
    messages.push(PromptMessage::user(user_text));
    messages
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{chat::Mood, llm::PromptRole};

    #[test]
    fn history_is_capped_to_window() {
        let profile = CharacterProfile::demo();
        let state = SessionState::new(3);
        let history: Vec<ChatMessage> = (1..=9)
            .map(|i| ChatMessage::user(i, format!("turn {i}")))
            .collect();

        let messages = build_messages(&profile, &state, &history, "latest", 6);

        assert_eq!(messages.len(), 8);
        assert_eq!(messages[0].role, PromptRole::System);
        assert_eq!(messages[1].content, "turn 4");
        assert_eq!(messages[6].content, "turn 9");
        assert_eq!(messages[7], PromptMessage::user("latest"));
    }

    #[test]
    fn instruction_mentions_mood_level_and_topics() {
        let profile = CharacterProfile::demo();
        let mut state = SessionState::new(42);
        state.current_mood = Mood::Sad;
        state.conversation_context.push_back("my cat is sick".into());

        let text = persona_instruction(&profile, &state);
        assert!(text.contains("You are Mira"));
        assert!(text.contains("42/100"));
        assert!(text.contains("feeling sad"));
        assert!(text.contains("my cat is sick"));
    }
}
