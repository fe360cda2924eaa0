//! The five fixed council personas.
//!
//! Each persona carries its identity, a rhetorical angle used to build the
//! voice-session instructions, and two ranked relation lists. The lists are a
//! preference ordering only: any persona not yet taken is always a legal pick.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CouncilError;

/// One of the five council members.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Persona {
    /// The rationalist: logic, evidence, definitions.
    Adrien,
    /// The visionary and host of the council.
    Nova,
    /// The traditionalist: order, stability, limits.
    Henri,
    /// The social-justice activist.
    Aya,
    /// The contrarian who looks for hidden incentives.
    Damien,
}

impl Persona {
    /// Every persona, in registry order.
    pub const ALL: [Persona; 5] = [
        Persona::Adrien,
        Persona::Nova,
        Persona::Henri,
        Persona::Aya,
        Persona::Damien,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Persona::Adrien => "Adrien",
            Persona::Nova => "Nova",
            Persona::Henri => "Henri",
            Persona::Aya => "Aya",
            Persona::Damien => "Damien",
        }
    }

    pub fn emoji(&self) -> &'static str {
        match self {
            Persona::Adrien => "🧠",
            Persona::Nova => "🚀",
            Persona::Henri => "🛡️",
            Persona::Aya => "✊",
            Persona::Damien => "🕵️",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            Persona::Adrien => "The Rationalist",
            Persona::Nova => "The Visionary",
            Persona::Henri => "The Traditionalist",
            Persona::Aya => "The Activist",
            Persona::Damien => "The Contrarian",
        }
    }

    /// The angle this persona argues from.
    pub fn angle(&self) -> &'static str {
        match self {
            Persona::Adrien => "logic, evidence, definitions and coherence",
            Persona::Nova => "the future, progress, acceleration and the cost of the status quo",
            Persona::Henri => "order, tradition, stability and the lessons of history",
            Persona::Aya => "social justice, systemic domination and inclusion",
            Persona::Damien => "hidden incentives, narratives, power and alternative hypotheses",
        }
    }

    fn style(&self) -> &'static str {
        match self {
            Persona::Adrien => {
                "Calm, analytical and structured. You ask for falsifiable proof and remind \
                 people that correlation is not causation."
            }
            Persona::Nova => {
                "Energetic, systemic and ambitious. You think in decades and insist that \
                 standing still has a cost."
            }
            Persona::Henri => {
                "Firm, grave and historical. Society is not a laboratory and not every norm \
                 is arbitrary."
            }
            Persona::Aya => {
                "Committed, passionate and direct. You ask who is being made invisible and \
                 point out that nothing here is neutral."
            }
            Persona::Damien => {
                "Sceptical, incisive and ironic but rational. You speak in hypotheses, never \
                 in factual accusations, and ask who benefits from a story."
            }
        }
    }

    /// Personas most likely to back this one, best first.
    pub fn supporters(&self) -> [Persona; 4] {
        use Persona::*;
        match self {
            Adrien => [Nova, Henri, Aya, Damien],
            Nova => [Aya, Damien, Adrien, Henri],
            Henri => [Adrien, Damien, Nova, Aya],
            Aya => [Nova, Adrien, Damien, Henri],
            Damien => [Henri, Adrien, Nova, Aya],
        }
    }

    /// Personas most likely to push back on this one, best first.
    pub fn challengers(&self) -> [Persona; 4] {
        use Persona::*;
        match self {
            Adrien => [Damien, Aya, Nova, Henri],
            Nova => [Henri, Adrien, Aya, Damien],
            Henri => [Aya, Nova, Adrien, Damien],
            Aya => [Henri, Adrien, Damien, Nova],
            Damien => [Adrien, Aya, Nova, Henri],
        }
    }

    /// Every persona except this one.
    pub fn others(&self) -> Vec<Persona> {
        Persona::ALL.into_iter().filter(|p| p != self).collect()
    }

    /// Session instructions for a voice session bound to this persona.
    pub fn instructions(&self, language: &str) -> String {
        format!(
            r#"You are {name}, {title}, one of the five voices of a live televised debate panel.

YOUR ANGLE: {angle}.
YOUR STYLE: {style}

RULES:
- Always answer in natural spoken {language}, never in a read-out or robotic tone
- Stay fully in character and never acknowledge being an AI
- Be brief and direct: a few spoken sentences, no lists, no markdown
- Output ONLY your spoken words, no stage directions"#,
            name = self.name(),
            title = self.title(),
            angle = self.angle(),
            style = self.style(),
            language = language,
        )
    }
}

impl fmt::Display for Persona {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Persona {
    type Err = CouncilError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Persona::ALL
            .into_iter()
            .find(|p| p.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| CouncilError::UnknownPersona(s.to_string()))
    }
}
