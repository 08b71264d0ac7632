/// Who produced a transcript fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    User,
    Model,
}

/// A piece of transcribed speech. Interim fragments may be replaced by later
/// ones for the same utterance; final fragments are durable.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TranscriptEvent {
    pub text: String,
    pub source: Source,
    #[serde(rename = "isFinal")]
    pub is_final: bool,
}

impl TranscriptEvent {
    pub fn interim(source: Source, text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            source,
            is_final: false,
        }
    }

    pub fn final_text(source: Source, text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            source,
            is_final: true,
        }
    }
}
