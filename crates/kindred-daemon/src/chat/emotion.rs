use super::message::Emotion;

/// Checked top to bottom; the first row with a matching keyword wins.
const EMOTION_KEYWORDS: &[(Emotion, &[&str])] = &[
    (
        Emotion::Happy,
        &["happy", "glad", "joy", "wonderful", "delighted", "smile", "great"],
    ),
    (
        Emotion::Sad,
        &["sad", "sorry", "unfortunately", "miss you", "lonely", "tough time"],
    ),
    (
        Emotion::Excited,
        &["excited", "amazing", "awesome", "wow", "can't wait", "incredible"],
    ),
    (
        Emotion::Calm,
        &["calm", "peaceful", "relax", "breathe", "gentle", "take it slow"],
    ),
    (
        Emotion::Empathetic,
        &["understand", "here for you", "that sounds", "i hear you", "support"],
    ),
];

/// Tag a reply with the first emotion whose keywords appear in it.
pub fn classify_emotion(text: &str) -> Emotion {
    let lowered = text.to_lowercase();
    EMOTION_KEYWORDS
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|kw| lowered.contains(kw)))
        .map(|(emotion, _)| *emotion)
        .unwrap_or(Emotion::Neutral)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_wins_over_excited() {
        assert_eq!(
            classify_emotion("I'm so HAPPY and excited for you!"),
            Emotion::Happy
        );
    }

    #[test]
    fn sad_wins_over_empathetic() {
        assert_eq!(
            classify_emotion("I understand, and I'm sorry that happened."),
            Emotion::Sad
        );
    }

    #[test]
    fn single_category_matches() {
        assert_eq!(classify_emotion("Wow, that is awesome"), Emotion::Excited);
        assert_eq!(classify_emotion("Let's breathe for a moment."), Emotion::Calm);
        assert_eq!(classify_emotion("I hear you."), Emotion::Empathetic);
    }

    #[test]
    fn no_keywords_is_neutral() {
        assert_eq!(classify_emotion("The forecast says rain on Tuesday."), Emotion::Neutral);
        assert_eq!(classify_emotion(""), Emotion::Neutral);
    }
}
