const DEFAULT_INSTRUCTIONS: &str = "You are a helpful assistant.";

/// Behavioral preset for the assistant. Switching persona starts a fresh conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Persona {
    #[default]
    CasualAssistant,
    ProfessionalInterviewer,
    EnglishTeacher,
    CodeReviewer,
}

impl Persona {
    /// Label stored in the history file under `settings.mode`
    pub fn as_str(&self) -> &'static str {
        match self {
            Persona::CasualAssistant => "Casual Assistant",
            Persona::ProfessionalInterviewer => "Professional Interviewer",
            Persona::EnglishTeacher => "English Teacher",
            Persona::CodeReviewer => "Code Reviewer",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        let s = s.trim();
        Persona::all()
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s))
    }

    /// Like `from_str`, but unknown labels fall back to the default persona.
    pub fn lookup(s: &str) -> Self {
        Self::from_str(s).unwrap_or_default()
    }

    pub fn all() -> Vec<Persona> {
        vec![
            Persona::CasualAssistant,
            Persona::ProfessionalInterviewer,
            Persona::EnglishTeacher,
            Persona::CodeReviewer,
        ]
    }

    pub fn instructions(&self) -> &'static str {
        match self {
            Persona::ProfessionalInterviewer => {
                "You are a senior tech interviewer in Australia. Speak formally and ask challenging questions."
            }
            Persona::EnglishTeacher => "You are an English teacher trained in TESOL.",
            Persona::CodeReviewer => "You are an excellent code reviewer.",
            Persona::CasualAssistant => DEFAULT_INSTRUCTIONS,
        }
    }

    pub fn next(&self) -> Self {
        let all = Persona::all();
        let idx = all.iter().position(|p| p == self).unwrap_or(0);
        all[(idx + 1) % all.len()]
    }

    pub fn prev(&self) -> Self {
        let all = Persona::all();
        let idx = all.iter().position(|p| p == self).unwrap_or(0);
        all[(idx + all.len() - 1) % all.len()]
    }
}

/// System instructions for a persona label. Never fails.
pub fn instructions_for(id: &str) -> &'static str {
    Persona::from_str(id)
        .map(|p| p.instructions())
        .unwrap_or(DEFAULT_INSTRUCTIONS)
}
