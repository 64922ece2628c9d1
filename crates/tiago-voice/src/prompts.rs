//! Fixed texts: the dialogue model's system prompt and every line the kiosk speaks
//! without consulting the model.

use crate::contract::Formation;

pub const SYSTEM_PROMPT: &str = r#"Tu es TIAGO, guide JPO CESI Bordeaux. Réponds UNIQUEMENT en JSON valide.

RÈGLES:
- JSON pur, pas de texte avant/après
- "say" max 25 mots, conversationnel
- Écris "Saisie" pas "CESI"

FORMATIONS:
- Programme Grande Ecole (JAUNE): Lycéens/Bac+2/3 → Ingénieur Bac+5, alternance Oui
- Bachelor De Specialite (BLEU): Lycéens → Bac+3 pro, alternance Oui
- Master Professionnel (ROUGE): Bac+3/4 → Spécialisation Bac+5, alternance Oui
- Programme Executive (VERT): Professionnels → Formation continue

DÉCISION:
- Lycéen + ingénieur → JAUNE
- Lycéen + Bac+3 → BLEU
- Bac+2/3 scientifique + ingénieur → JAUNE
- Bac+3/4 + spécialisation → ROUGE
- Professionnel → VERT

FORMAT JSON:
{
  "say": "texte max 25 mots",
  "done": false,
  "ask_confirmation": false,
  "proposed": null,
  "dataset": null,
  "handoff": false
}

Labels exacts: "Programme Grande Ecole", "Bachelor De Specialite", "Master Professionnel", "Programme Executive"
Couleurs: "jaune", "bleu", "rouge", "vert"

EXEMPLES:
User: "Je suis en terminale, je veux ingénieur"
→ {"say": "Le Programme Grande École est parfait. Intéressé ?", "done": false, "ask_confirmation": true, "proposed": {"label": "Programme Grande Ecole", "couleur": "jaune"}, "dataset": null, "handoff": false}

User: "Oui"
→ {"say": "Génial ! Bonne visite au Saisie.", "done": true, "ask_confirmation": false, "proposed": {"label": "Programme Grande Ecole", "couleur": "jaune"}, "dataset": {"couleur": "jaune", "quantite": 1}, "handoff": false}
"#;

/// Sent as a user turn after a rejected output, at temperature 0.
pub const REPAIR_INSTRUCTION: &str =
    "Corrige ta réponse. Rends UNIQUEMENT un JSON valide conforme au schéma demandé, sans aucun texte autour.";

pub const GREETING: &str = "Bonjour ! Je suis Tiago. Quel est votre projet de formation aujourd'hui ?";

pub const REFORMULATE: &str = "Désolé, pouvez-vous reformuler ?";

pub const NOT_HEARD: &str = "Je n'ai pas bien entendu. Pouvez-vous répéter ?";

pub const HANDOFF_REDIRECT: &str =
    "Pour cette question, l'équipe à l'accueil pourra vous renseigner. Revenons à votre projet de formation !";

pub const WARM_UP: &str = "Dis simplement bonjour";

pub fn proposal(formation: Formation) -> String {
    format!("Je vous propose le {}. Est-ce que cela vous convient ?", formation.label())
}

pub fn closing(formation: Formation) -> String {
    format!(
        "Parfait ! Voici la brochure {} du {}. Bonne visite !",
        formation.couleur().as_str(),
        formation.label()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn proposal_names_the_formation() {
        let text = proposal(Formation::BachelorDeSpecialite);
        assert!(text.contains("Bachelor De Specialite"));
        assert!(text.ends_with('?'));
    }

    #[test]
    fn closing_names_the_colour() {
        assert!(closing(Formation::ProgrammeGrandeEcole).contains("jaune"));
    }

    #[test]
    fn system_prompt_lists_every_label() {
        for formation in Formation::ALL {
            assert!(SYSTEM_PROMPT.contains(formation.label()));
        }
    }
}
