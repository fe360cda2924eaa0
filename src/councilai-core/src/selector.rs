//! Main-speaker selection from the participant's question.
//!
//! Each persona owns one topical keyword family. The question is lowercased
//! and scanned against all five families; the matches drive a weighted,
//! randomized pick that avoids handing two debates in a row to the same voice.

use regex::RegexSet;

use crate::config::SelectionConfig;
use crate::error::CouncilError;
use crate::persona::Persona;
use crate::random::{RandomSource, pick};

/// Keyword family per persona, in `Persona::ALL` order. Stems cover both
/// French and English phrasing.
const KEYWORD_FAMILIES: [(Persona, &str); 5] = [
    (
        Persona::Adrien,
        r"logi[cq]|preuve|proof|evidence|d[ée]fini|falsifi|corr[ée]l|causal|hypoth[eè]s|sophism|fallac|coh[ée]ren|raison|reason|m[ée]canism|mechanis|statist|donn[ée]es|\bdata\b",
    ),
    (
        Persona::Nova,
        r"futur|innovation|acc[ée]l|progr[eè]s|d[ée]cenn|decade|statu quo|status quo|r[ée]seau|network|scal|comp[ée]titi|technolog|\bia\b|\bai\b",
    ),
    (
        Persona::Henri,
        r"\bordre\b|\border\b|tradition|stabilit|institution|coh[ée]sion|\bnormes?\b|\bnorms?\b|autorit|authorit|devoir|\bdut(?:y|ies)\b|responsabilit|responsib|patrimoine|heritage|identit|s[ée]curit",
    ),
    (
        Persona::Aya,
        r"justice sociale|social justice|inclusi|domination|syst[ée]mi|marginali[sz]|biais|\bbias|racis|sexis|\btrans\b|lgbt|oppress|privil[eè]g|invisibili[sz]",
    ),
    (
        Persona::Damien,
        r"incitation|incentive|int[ée]r[eê]t|interest|narrati|storytell|manipul|propagand|complot|conspi|lobby|pouvoir|\bpower|agenda|censur|censor|m[ée]dias?\b",
    ),
];

/// Picks the main speaker and the persona they call out.
#[derive(Debug, Clone)]
pub struct PersonaSelector {
    families: RegexSet,
    config: SelectionConfig,
}

impl PersonaSelector {
    pub fn new(config: SelectionConfig) -> Result<Self, CouncilError> {
        let families = RegexSet::new(KEYWORD_FAMILIES.iter().map(|(_, pattern)| *pattern))
            .map_err(|e| CouncilError::ConfigError(format!("Invalid keyword family: {}", e)))?;
        Ok(Self { families, config })
    }

    /// Personas whose keyword family appears in the question.
    pub fn matches(&self, question: &str) -> Vec<Persona> {
        let lowered = question.to_lowercase();
        self.families
            .matches(&lowered)
            .into_iter()
            .map(|idx| KEYWORD_FAMILIES[idx].0)
            .collect()
    }

    /// Choose who answers the question first.
    pub fn select_main(
        &self,
        question: &str,
        last: Option<Persona>,
        rng: &mut dyn RandomSource,
    ) -> Persona {
        let candidates = self.matches(question);

        if let [primary] = candidates[..] {
            if !rng.chance(self.config.diversify) {
                if last == Some(primary) && rng.chance(self.config.single_repeat_avoid) {
                    return pick(rng, &primary.others()).unwrap_or(primary);
                }
                return primary;
            }

            let mut alternatives = primary.others();
            avoid_repeat(&mut alternatives, last, self.config.diversify_repeat_avoid, rng);
            return pick(rng, &alternatives).unwrap_or(primary);
        }

        let mut pool = if candidates.is_empty() {
            Persona::ALL.to_vec()
        } else {
            candidates
        };
        avoid_repeat(&mut pool, last, self.config.pool_repeat_avoid, rng);
        pick(rng, &pool).unwrap_or(Persona::ALL[0])
    }

    /// Choose the persona the main speaker addresses at the end of their turn.
    /// Never returns `main`.
    pub fn pick_callout(&self, main: Persona, rng: &mut dyn RandomSource) -> Persona {
        let others = main.others();
        let leading = &main.challengers()[..3];
        let chosen = if rng.chance(self.config.callout_challenger) {
            pick(rng, leading)
        } else {
            pick(rng, &others)
        };
        chosen.unwrap_or(others[0])
    }
}

/// With the given probability, drop `last` from a pool that has room to spare.
fn avoid_repeat(
    pool: &mut Vec<Persona>,
    last: Option<Persona>,
    probability: f64,
    rng: &mut dyn RandomSource,
) {
    let Some(last) = last else { return };
    if pool.len() > 1 && pool.contains(&last) && rng.chance(probability) {
        pool.retain(|p| *p != last);
    }
}
