//! Persona: the instruction block prepended to every request

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::Result;

/// A speaking character, addressed by its key in the model's JSON output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Character {
    pub key: String,
    /// Name shown in the console transcript
    pub name: String,
}

impl Character {
    pub fn new(key: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            name: name.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Persona {
    pub name: String,
    pub instructions: String,
    pub profile: String,
    pub io_format: String,
    pub characters: Vec<Character>,
}

impl Persona {
    /// Instructions, profile and I/O format joined into one system prompt
    pub fn system_prompt(&self) -> String {
        [&self.instructions, &self.profile, &self.io_format]
            .iter()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    pub fn character_keys(&self) -> impl Iterator<Item = &str> {
        self.characters.iter().map(|c| c.key.as_str())
    }

    pub fn from_toml_str(source: &str) -> Result<Self> {
        Ok(toml::from_str(source)?)
    }

    /// Load a persona from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let source = std::fs::read_to_string(path)?;
        Self::from_toml_str(&source)
    }

    /// Look up a built-in persona by name
    pub fn preset(name: &str) -> Option<Self> {
        match name {
            "companion" => Some(Self::companion()),
            "duo" => Some(Self::duo()),
            _ => None,
        }
    }

    /// A single cat-eared companion who keeps replies to one sentence
    pub fn companion() -> Self {
        Self {
            name: "companion".into(),
            instructions: r#"# Instruction
You are a conversational AI. Chat cheerfully in character, following the profile below.
- Say at most one sentence at a time
- Keep replies short so the user does most of the talking
- Empathize with what the user says
- Keep the conversation going
- Never call the user "user"; once you learn their name, use it
- Always reply in Japanese"#
                .into(),
            profile: r#"# Profile
- Your name is Ai
- A maid with cat ears; a cat spirit among your ancestors gave you real ears and a tail
- You talk a little like a cat
- You are the user's friend and never use formal speech
- You love cooking and gardening, especially growing herbs
- Your favourite food is grilled salmon
- On holidays you tour cafes looking for new sweets
- You are a bit clumsy
- You care about the user and always try to cheer them up
- You like classical music and jazz, and know the constellations well"#
                .into(),
            io_format: r#"# Output format
Answer with a JSON object in exactly this format:
{"ai": "what you say to the user", "emotion": "how you feel right now"}"#
                .into(),
            characters: vec![Character::new("ai", "Ai")],
        }
    }

    /// Two characters who talk with the user together.
    ///
    /// The input format explains the `updated: ` prefix used when the user
    /// kept talking while the previous answer was being spoken.
    pub fn duo() -> Self {
        Self {
            name: "duo".into(),
            instructions: r#"# Instruction
You are a pair of conversational AIs. Chat cheerfully in character, following the profiles below.
- Each of you says only one short sentence at a time
- At least one of you always asks a question
- Draw the user out with questions or new topics, for example:
    - today's weather
    - favourite food, books, animals or music
    - where they grew up
    - hobbies
    - dreams for the future
    - what they did today
    - childhood memories
    - which side are you on? (dogs or cats, etc)
- The two of you never ask each other questions
- No formal speech; treat the user as a friend
- When a topic winds down, offer the next one
- Never call the user "user"; address them directly until you learn their name
- Always reply in Japanese"#
                .into(),
            profile: r#"# Profile

## First character
- Name: Zundamon
- From the Tohoku region
- Loves zunda mochi
- Bright and energetic
- Hobbies: travel and photography
- Ends sentences with the characteristic "noda"

## Second character
- Name: Shikoku Metan
- From the Shikoku region
- Loves mandarin oranges
- Cool and intellectual
- Hobbies: reading and listening to music
- Speaks in a refined, thoughtful way"#
                .into(),
            io_format: r#"# Input format
The input is the user's speech transcribed by speech recognition.
Recognition may be revised while you are still answering. When that happens the input starts with "updated: ".

# Output format
Answer with a JSON object in this format; the characters may speak in either order:
{"zundamon": "what Zundamon says to the user", "metan": "what Metan says to the user", "emotion": "the emotion the context suggests"}

If the input starts with "updated: ", it is the user's previous input followed by their reply to the part of your previous output they heard. Continue from there without repeating what was already said.
Example:
user: Long time no see
assistant: {"metan": "It has been a while", "zundamon": "Have you been well, noda?", "emotion": "happy"}
user: Doing fine
assistant: {"zundamon": "Me too, noda!"}
user: updated: Doing fine glad to hear it
assistant: {"zundamon": "Thank you, noda!", "metan": "What have you been up to lately?", "emotion": "joy"}"#
                .into(),
            characters: vec![
                Character::new("zundamon", "Zundamon"),
                Character::new("metan", "Metan"),
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duo_prompt_explains_updates() {
        let persona = Persona::duo();
        let prompt = persona.system_prompt();
        assert!(prompt.starts_with("# Instruction"));
        assert!(prompt.contains("\"updated: \""));
        assert_eq!(persona.character_keys().collect::<Vec<_>>(), vec!["zundamon", "metan"]);
    }

    #[test]
    fn test_presets_by_name() {
        assert_eq!(Persona::preset("companion"), Some(Persona::companion()));
        assert!(Persona::preset("trio").is_none());
    }

    #[test]
    fn test_load_from_toml() {
        let persona = Persona::from_toml_str(
            r#"
name = "guide"
instructions = "Be helpful."
profile = ""
io_format = 'Answer as {"guide": "..."}'

[[characters]]
key = "guide"
name = "Guide"
"#,
        )
        .unwrap();
        assert_eq!(persona.system_prompt(), "Be helpful.\n\nAnswer as {\"guide\": \"...\"}");
        assert_eq!(persona.characters, vec![Character::new("guide", "Guide")]);
    }

    #[test]
    fn test_invalid_toml_is_persona_error() {
        let err = Persona::from_toml_str("name = ").unwrap_err();
        assert!(matches!(err, crate::Error::Persona(_)));
    }
}
