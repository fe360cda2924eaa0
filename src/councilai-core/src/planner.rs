//! Intervention planning: which peers react after the main exchange, and how.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::config::PlannerConfig;
use crate::persona::Persona;
use crate::random::{RandomSource, pick};

/// Rhetorical posture assigned to an intervention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stance {
    /// Agree with the main speaker and extend the argument.
    Support,
    /// Disagree with the main speaker and rebut.
    Challenge,
    /// Bring an orthogonal, surprising angle.
    Wildcard,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterventionPlanItem {
    pub persona: Persona,
    pub stance: Stance,
}

/// Builds the ordered list of peer interventions for one debate.
#[derive(Debug, Clone, Default)]
pub struct InterventionPlanner {
    config: PlannerConfig,
}

impl InterventionPlanner {
    pub fn new(config: PlannerConfig) -> Self {
        Self { config }
    }

    /// Plan up to four interventions. The result never contains `main`, any
    /// persona in `excluded`, or the same persona twice.
    pub fn plan(
        &self,
        main: Persona,
        excluded: &[Persona],
        rng: &mut dyn RandomSource,
    ) -> Vec<InterventionPlanItem> {
        let mut taken: BTreeSet<Persona> = excluded.iter().copied().collect();
        taken.insert(main);
        let mut plan = Vec::with_capacity(4);

        if let Some(supporter) = first_untaken(&main.supporters(), &taken) {
            taken.insert(supporter);
            plan.push(InterventionPlanItem {
                persona: supporter,
                stance: Stance::Support,
            });
        }

        if let Some(challenger) = first_untaken(&main.challengers(), &taken) {
            taken.insert(challenger);
            plan.push(InterventionPlanItem {
                persona: challenger,
                stance: Stance::Challenge,
            });
        }

        if plan.len() >= 2 && rng.chance(self.config.swap) {
            plan.swap(0, 1);
        }

        for probability in [self.config.wildcard, self.config.second_wildcard] {
            let remaining = untaken(&taken);
            if remaining.is_empty() || !rng.chance(probability) {
                continue;
            }
            if let Some(wildcard) = pick(rng, &remaining) {
                taken.insert(wildcard);
                plan.push(InterventionPlanItem {
                    persona: wildcard,
                    stance: Stance::Wildcard,
                });
            }
        }

        plan
    }
}

/// First persona of a ranked list not yet taken, falling back to any untaken
/// persona at all.
fn first_untaken(ranked: &[Persona], taken: &BTreeSet<Persona>) -> Option<Persona> {
    ranked
        .iter()
        .chain(Persona::ALL.iter())
        .copied()
        .find(|p| !taken.contains(p))
}

fn untaken(taken: &BTreeSet<Persona>) -> Vec<Persona> {
    Persona::ALL
        .into_iter()
        .filter(|p| !taken.contains(p))
        .collect()
}
