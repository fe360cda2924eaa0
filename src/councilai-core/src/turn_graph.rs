//! Turn graph construction.
//!
//! A debate on one question is an ordered, append-only list of turns:
//! main answer, callout rebuttal, planned interventions, closing synthesis.
//! Every turn's directed text is fully resolved when the turn is queued and
//! never regenerated afterwards.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{BudgetConfig, DebateSettings};
use crate::persona::Persona;
use crate::planner::{InterventionPlanItem, Stance};
use crate::random::{RandomSource, pick};

/// Marker appended to a quote cut at its character budget.
pub const ELLIPSIS: char = '…';

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnKind {
    Main,
    Intervention,
    Closing,
}

impl TurnKind {
    pub fn label(&self) -> &'static str {
        match self {
            TurnKind::Main => "Main answer",
            TurnKind::Intervention => "Intervention",
            TurnKind::Closing => "Conclusion",
        }
    }
}

/// A queued turn with its resolved directed text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingTurn {
    pub persona: Persona,
    pub kind: TurnKind,
    pub message: String,
    /// Persona the main speaker must address. Only set on the main turn.
    pub callout_target: Option<Persona>,
    /// Posture of a planned intervention.
    pub stance: Option<Stance>,
    /// Already-spoken persona named in the directed text.
    pub tease_target: Option<Persona>,
}

/// What a turn actually produced once its voice session finished speaking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnRecord {
    pub persona: Persona,
    pub kind: TurnKind,
    pub text: String,
}

/// The closing answer of the previous debate, quoted as context in the next.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LastExchange {
    pub question: String,
    pub persona: Persona,
    pub answer: String,
}

/// A debate cycle whose closing turn has resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletedDebate {
    pub question: String,
    pub records: Vec<TurnRecord>,
    pub timestamp: DateTime<Utc>,
}

/// Collapse whitespace and hard-truncate to `max` characters, appending
/// [`ELLIPSIS`] when anything was cut.
pub fn truncate_for_prompt(text: &str, max: usize) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= max {
        return collapsed;
    }
    let mut truncated: String = collapsed.chars().take(max).collect();
    truncated.push(ELLIPSIS);
    truncated
}

/// Resolves directed texts for every kind of turn.
#[derive(Debug, Clone)]
pub struct TurnGraphBuilder {
    language: String,
    host: Persona,
    budgets: BudgetConfig,
}

impl TurnGraphBuilder {
    pub fn new(settings: &DebateSettings, budgets: BudgetConfig) -> Self {
        Self {
            language: settings.language.clone(),
            host: settings.host,
            budgets,
        }
    }

    /// The persona that opens the evening and closes every debate.
    pub fn host(&self) -> Persona {
        self.host
    }

    fn spoken_language(&self) -> String {
        format!("Speak natural spoken {}.", self.language)
    }

    pub fn intro_message(&self) -> String {
        format!(
            "You are {host}, welcoming the audience. Simply say: Welcome to the Council of Five! \
             I'm {host}. Tonight there is no waffle: we interrupt each other and we take sides. \
             What's your name? Be brief and warm, two sentences at most. {lang}",
            host = self.host,
            lang = self.spoken_language(),
        )
    }

    pub fn greeting_message(&self, user_name: &str) -> String {
        format!(
            "You are {host}. Simply say: {name}, welcome! So, what topic brings you here tonight? \
             Here we debate bluntly, we interrupt and we decide, on ideas only. \
             Be brief, two sentences at most. {lang}",
            host = self.host,
            name = user_name,
            lang = self.spoken_language(),
        )
    }

    /// The first turn of a debate. `callout` is the persona the main speaker
    /// must address; it is replaced if it equals `main`.
    pub fn main_turn(
        &self,
        question: &str,
        user_name: &str,
        main: Persona,
        callout: Persona,
        last: Option<&LastExchange>,
    ) -> PendingTurn {
        let callout = if callout == main { main.others()[0] } else { callout };
        let context = last
            .map(|l| {
                format!(
                    "For context, just before this, {} said: \"{}\". ",
                    l.persona,
                    truncate_for_prompt(&l.answer, self.budgets.context)
                )
            })
            .unwrap_or_default();

        PendingTurn {
            persona: main,
            kind: TurnKind::Main,
            message: format!(
                "{context}{user} asks you: \"{question}\". Answer like in a real live TV debate: \
                 blunt, lively, natural. Give your position in four to six sentences at most. \
                 At the end, turn to {callout} directly: ask a question that puts them on the \
                 spot or provoke them about their ideas. {lang}",
                context = context,
                user = user_name,
                question = question,
                callout = callout,
                lang = self.spoken_language(),
            ),
            callout_target: Some(callout),
            stance: None,
            tease_target: None,
        }
    }

    /// The rebuttal by the persona the main speaker called out.
    pub fn callout_turn(
        &self,
        question: &str,
        main_record: &TurnRecord,
        callout: Persona,
    ) -> PendingTurn {
        let main = main_record.persona;
        PendingTurn {
            persona: callout,
            kind: TurnKind::Intervention,
            message: format!(
                "{main} just took you to task on the question: \"{question}\". {main} said: \
                 \"{quote}\". Answer {main} directly and address them by name. Say clearly \
                 whether you agree or not, then bounce off that argument with your own. Be \
                 natural, like in a real debate. Three to five sentences at most. {lang}",
                main = main,
                question = question,
                quote = truncate_for_prompt(&main_record.text, self.budgets.callout_quote),
                lang = self.spoken_language(),
            ),
            callout_target: None,
            stance: None,
            tease_target: None,
        }
    }

    /// One turn per plan item, in plan order. Each tease target is drawn from
    /// the personas that will already have spoken when the turn runs.
    pub fn intervention_turns(
        &self,
        question: &str,
        main_record: &TurnRecord,
        callout: Persona,
        plan: &[InterventionPlanItem],
        rng: &mut dyn RandomSource,
    ) -> Vec<PendingTurn> {
        let main = main_record.persona;
        let quote = truncate_for_prompt(&main_record.text, self.budgets.intervention_quote);
        let mut spoken = vec![main, callout];
        let mut turns = Vec::with_capacity(plan.len());

        for item in plan {
            let citable: Vec<Persona> = spoken
                .iter()
                .copied()
                .filter(|p| *p != item.persona)
                .collect();
            let tease = pick(rng, &citable).unwrap_or(main);
            spoken.push(item.persona);

            let instruction = match item.stance {
                Stance::Support => format!(
                    "You mostly agree with {main} on this one. Say so clearly, then reinforce \
                     the argument from your own angle. You can still take a jab at {tease} in \
                     passing."
                ),
                Stance::Challenge => format!(
                    "You disagree with {main}. Say it frankly, point out what is wrong in the \
                     reasoning and offer an alternative. You can call out {tease} too."
                ),
                Stance::Wildcard => format!(
                    "You bring a completely different angle that nobody has seen. Surprise \
                     everyone with a twist, a hypothesis or an unexpected fact. Call out {tease} \
                     along the way."
                ),
            };

            turns.push(PendingTurn {
                persona: item.persona,
                kind: TurnKind::Intervention,
                message: format!(
                    "We are debating: \"{question}\". {main} just said: \"{quote}\". \
                     {instruction} Three to five sentences at most. {lang}",
                    lang = self.spoken_language(),
                ),
                callout_target: None,
                stance: Some(item.stance),
                tease_target: Some(tease),
            });
        }

        turns
    }

    /// The host's recap and verdict over every record so far.
    pub fn closing_turn(
        &self,
        question: &str,
        records: &[TurnRecord],
        rng: &mut dyn RandomSource,
    ) -> PendingTurn {
        let mut targets: Vec<Persona> = Vec::new();
        for record in records {
            if record.persona != self.host && !targets.contains(&record.persona) {
                targets.push(record.persona);
            }
        }
        let fallback = records.first().map(|r| r.persona).unwrap_or(self.host);
        let tease = pick(rng, &targets).unwrap_or(fallback);

        let recap = records
            .iter()
            .map(|r| {
                format!(
                    "{}: \"{}\"",
                    r.persona,
                    truncate_for_prompt(&r.text, self.budgets.closing_quote)
                )
            })
            .collect::<Vec<_>>()
            .join(" | ");

        PendingTurn {
            persona: self.host,
            kind: TurnKind::Closing,
            message: format!(
                "You are {host}, the host of the Council of Five. The question was: \
                 \"{question}\". Here is what everyone said: {recap}. Now close the debate like \
                 a real TV host: (1) briefly restate each speaker's position, citing them by \
                 name; (2) give your verdict on who had the best argument and why; (3) finish \
                 with a closing punchline and one last friendly jab at {tease}. Six to eight \
                 sentences. {lang}",
                host = self.host,
                lang = self.spoken_language(),
            ),
            callout_target: None,
            stance: None,
            tease_target: Some(tease),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::random::{FixedRandom, SeededRandom};

    fn builder() -> TurnGraphBuilder {
        TurnGraphBuilder::new(&DebateSettings::default(), BudgetConfig::default())
    }

    fn record(persona: Persona, kind: TurnKind, text: &str) -> TurnRecord {
        TurnRecord {
            persona,
            kind,
            text: text.to_string(),
        }
    }

    #[test]
    fn test_truncate_exact_budget_plus_ellipsis() {
        let text = "x".repeat(400);
        let out = truncate_for_prompt(&text, 250);
        assert_eq!(out.chars().count(), 251);
        assert!(out.ends_with(ELLIPSIS));
        assert_eq!(out.trim_end_matches(ELLIPSIS), "x".repeat(250));
    }

    #[test]
    fn test_truncate_collapses_whitespace() {
        assert_eq!(truncate_for_prompt("  a\n\n b \t c ", 50), "a b c");
        assert_eq!(truncate_for_prompt("short", 5), "short");
    }

    #[test]
    fn test_truncate_counts_characters_not_bytes() {
        let out = truncate_for_prompt("éééééé", 3);
        assert_eq!(out, "ééé…");
    }

    #[test]
    fn test_main_turn_embeds_previous_closing() {
        let b = builder();
        let last = LastExchange {
            question: "Earlier".to_string(),
            persona: Persona::Nova,
            answer: "y".repeat(500),
        };
        let turn = b.main_turn("Why?", "Sam", Persona::Henri, Persona::Aya, Some(&last));
        assert_eq!(turn.kind, TurnKind::Main);
        assert_eq!(turn.callout_target, Some(Persona::Aya));
        assert!(turn.message.starts_with("For context, just before this, Nova said"));
        assert!(turn.message.contains(&format!("{}{}", "y".repeat(200), ELLIPSIS)));
        assert!(turn.message.contains("Sam asks you: \"Why?\""));
        assert!(turn.message.ends_with("Speak natural spoken French."));
    }

    #[test]
    fn test_main_turn_never_calls_out_itself() {
        let turn = builder().main_turn("Why?", "Sam", Persona::Aya, Persona::Aya, None);
        assert_ne!(turn.callout_target, Some(Persona::Aya));
        assert!(!turn.message.contains("For context"));
    }

    #[test]
    fn test_callout_turn_quotes_main_transcript() {
        let b = builder();
        let main = record(Persona::Adrien, TurnKind::Main, &"word ".repeat(100));
        let turn = b.callout_turn("Why?", &main, Persona::Damien);
        assert_eq!(turn.persona, Persona::Damien);
        assert_eq!(turn.kind, TurnKind::Intervention);
        assert!(turn.message.starts_with("Adrien just took you to task"));
        assert!(turn.message.contains(ELLIPSIS));
    }

    #[test]
    fn test_intervention_teases_only_spoken_personas() {
        let b = builder();
        let main = record(Persona::Adrien, TurnKind::Main, "Definitions first.");
        let plan = [
            InterventionPlanItem { persona: Persona::Nova, stance: Stance::Support },
            InterventionPlanItem { persona: Persona::Aya, stance: Stance::Challenge },
            InterventionPlanItem { persona: Persona::Henri, stance: Stance::Wildcard },
        ];
        let mut rng = SeededRandom::from_seed(9);
        for _ in 0..20 {
            let turns = b.intervention_turns("Why?", &main, Persona::Damien, &plan, &mut rng);
            assert_eq!(turns.len(), 3);
            let mut spoken = vec![Persona::Adrien, Persona::Damien];
            for (turn, item) in turns.iter().zip(plan.iter()) {
                let tease = turn.tease_target.unwrap();
                assert!(spoken.contains(&tease));
                assert_ne!(tease, turn.persona);
                assert_eq!(turn.stance, Some(item.stance));
                spoken.push(turn.persona);
            }
        }
    }

    #[test]
    fn test_stance_wording() {
        let b = builder();
        let main = record(Persona::Henri, TurnKind::Main, "Order matters.");
        let plan = [
            InterventionPlanItem { persona: Persona::Adrien, stance: Stance::Support },
            InterventionPlanItem { persona: Persona::Aya, stance: Stance::Challenge },
            InterventionPlanItem { persona: Persona::Damien, stance: Stance::Wildcard },
        ];
        let mut rng = FixedRandom::never();
        let turns = b.intervention_turns("Why?", &main, Persona::Nova, &plan, &mut rng);
        assert!(turns[0].message.contains("You mostly agree with Henri"));
        assert!(turns[1].message.contains("You disagree with Henri"));
        assert!(turns[2].message.contains("completely different angle"));
    }

    #[test]
    fn test_closing_recaps_every_record() {
        let b = builder();
        let records = vec![
            record(Persona::Henri, TurnKind::Main, "Order first."),
            record(Persona::Aya, TurnKind::Intervention, "Justice first."),
            record(Persona::Adrien, TurnKind::Intervention, ""),
        ];
        let mut rng = FixedRandom::never();
        let turn = b.closing_turn("Why?", &records, &mut rng);
        assert_eq!(turn.persona, Persona::Nova);
        assert_eq!(turn.kind, TurnKind::Closing);
        assert!(turn.message.contains(
            "Henri: \"Order first.\" | Aya: \"Justice first.\" | Adrien: \"\""
        ));
        assert_eq!(turn.tease_target, Some(Persona::Henri));
    }

    #[test]
    fn test_closing_tease_skips_host() {
        let b = builder();
        let records = vec![
            record(Persona::Nova, TurnKind::Main, "Faster."),
            record(Persona::Henri, TurnKind::Intervention, "Slower."),
        ];
        let mut rng = FixedRandom::never();
        let turn = b.closing_turn("Why?", &records, &mut rng);
        assert_eq!(turn.tease_target, Some(Persona::Henri));
    }

    #[test]
    fn test_no_forward_references_in_built_sequence() {
        let b = builder();
        let mut rng = SeededRandom::from_seed(21);
        for main in Persona::ALL {
            for callout in main.others() {
                let main_turn = b.main_turn("Should we?", "Sam", main, callout, None);
                let main_record = record(main, TurnKind::Main, "I think so.");
                let plan = crate::planner::InterventionPlanner::default()
                    .plan(main, &[callout], &mut rng);
                let mut sequence = vec![main_turn];
                sequence.push(b.callout_turn("Should we?", &main_record, callout));
                sequence.extend(b.intervention_turns(
                    "Should we?",
                    &main_record,
                    callout,
                    &plan,
                    &mut rng,
                ));
                let records: Vec<TurnRecord> = sequence
                    .iter()
                    .map(|t| record(t.persona, t.kind, "Fine."))
                    .collect();
                sequence.push(b.closing_turn("Should we?", &records, &mut rng));

                for (i, turn) in sequence.iter().enumerate().skip(1) {
                    let earlier: Vec<Persona> =
                        sequence[..i].iter().map(|t| t.persona).collect();
                    for persona in Persona::ALL {
                        if persona == turn.persona || earlier.contains(&persona) {
                            continue;
                        }
                        assert!(
                            !turn.message.contains(persona.name()),
                            "turn {} by {} names {} before they spoke",
                            i,
                            turn.persona,
                            persona
                        );
                    }
                }
            }
        }
    }
}
