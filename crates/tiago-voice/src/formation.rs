//! Keyword classifier mapping a conversation to a formation.
//!
//! The visitor's current level and their objective are spotted with small lexicons,
//! then a priority table picks the formation. Earlier rules win.

use crate::contract::Formation;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Level {
    Lycee,
    Bac23,
    Bac34,
    Pro,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Objective {
    Ingenieur,
    Bac3,
    Master,
    Executive,
}

const LEVEL_LEXICON: &[(Level, &[&str])] = &[
    (
        Level::Lycee,
        &[
            "lycee", "lyceen", "lyceenne", "terminale", "en seconde", "classe de seconde", "bachelier",
            "bacheliere", "bac general", "bac techno", "passer le bac", "passe le bac",
        ],
    ),
    (
        Level::Bac23,
        &[
            "bac 2", "bac plus 2", "bac plus deux", "bts", "dut", "deug", "prepa",
            "classe preparatoire", "licence 2", "l2",
        ],
    ),
    (
        Level::Bac34,
        &[
            "bac 3", "bac plus 3", "bac plus trois", "bac 4", "bac plus 4", "bac plus quatre",
            "licence", "l3", "master 1", "m1",
        ],
    ),
    (
        Level::Pro,
        &[
            "je travaille", "salarie", "salariee", "en poste", "vie active", "demandeur d emploi",
            "experience professionnelle", "ans d experience", "professionnel en activite",
        ],
    ),
];

const OBJECTIVE_LEXICON: &[(Objective, &[&str])] = &[
    (
        Objective::Ingenieur,
        &["ingenieur", "ingenieure", "ingenieurs", "cycle ingenieur"],
    ),
    (
        Objective::Bac3,
        &[
            "bac 3", "bac plus 3", "bac plus trois", "bachelor", "licence pro",
            "licence professionnelle", "en trois ans", "en 3 ans",
        ],
    ),
    (
        Objective::Master,
        &[
            "master", "mastere", "specialisation", "specialiser", "bac 5", "bac plus 5",
            "bac plus cinq",
        ],
    ),
    (
        Objective::Executive,
        &[
            "executive", "formation continue", "reconversion", "vae", "je suis cadre", "poste de cadre",
            "evoluer dans mon entreprise",
        ],
    ),
];

/// Lowercase, strip accents, turn punctuation into spaces and pad with spaces so
/// lexicon entries only match on word boundaries.
pub(crate) fn normalize(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push(' ');
    let mut last_space = true;
    for ch in text.chars().flat_map(char::to_lowercase) {
        let folded = match ch {
            'à' | 'â' | 'ä' => 'a',
            'é' | 'è' | 'ê' | 'ë' => 'e',
            'î' | 'ï' => 'i',
            'ô' | 'ö' => 'o',
            'ù' | 'û' | 'ü' => 'u',
            'ç' => 'c',
            'œ' => {
                out.push_str("oe");
                last_space = false;
                continue;
            }
            c if c.is_alphanumeric() => c,
            _ => ' ',
        };
        if folded == ' ' {
            if !last_space {
                out.push(' ');
                last_space = true;
            }
        } else {
            out.push(folded);
            last_space = false;
        }
    }
    if !last_space {
        out.push(' ');
    }
    out
}

/// Whole-word containment of an already normalized phrase.
pub(crate) fn contains_phrase(normalized: &str, phrase: &str) -> bool {
    let needle = normalize(phrase);
    !needle.trim().is_empty() && normalized.contains(&needle)
}

fn has<T: Copy + PartialEq>(lexicon: &[(T, &[&str])], normalized: &str, wanted: T) -> bool {
    lexicon
        .iter()
        .filter(|(tag, _)| *tag == wanted)
        .flat_map(|(_, phrases)| phrases.iter())
        .any(|p| contains_phrase(normalized, p))
}

/// Classify the text of a whole conversation. Pure and deterministic.
pub fn detect_formation(text: &str) -> Option<Formation> {
    let t = normalize(text);
    let level = |l| has(LEVEL_LEXICON, &t, l);
    let objective = |o| has(OBJECTIVE_LEXICON, &t, o);

    if level(Level::Lycee) && objective(Objective::Ingenieur) {
        return Some(Formation::ProgrammeGrandeEcole);
    }
    if level(Level::Lycee) && objective(Objective::Bac3) {
        return Some(Formation::BachelorDeSpecialite);
    }
    let higher_ed = level(Level::Bac23) || level(Level::Bac34);
    if higher_ed && objective(Objective::Ingenieur) {
        return Some(Formation::ProgrammeGrandeEcole);
    }
    if higher_ed && objective(Objective::Master) {
        return Some(Formation::MasterProfessionnel);
    }
    if level(Level::Pro) || objective(Objective::Executive) {
        return Some(Formation::ProgrammeExecutive);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_folds_accents_and_punctuation() {
        assert_eq!(normalize("Je suis LYCÉEN, bac+2 !"), " je suis lyceen bac 2 ");
        assert_eq!(normalize(""), " ");
    }

    #[test]
    fn phrases_match_whole_words_only() {
        let t = normalize("je suis en terminale");
        assert!(contains_phrase(&t, "terminale"));
        assert!(!contains_phrase(&t, "termin"));
        assert!(!contains_phrase(&t, "  "));
    }

    #[test]
    fn lycee_and_engineer_is_grande_ecole() {
        assert_eq!(
            detect_formation("Je suis en terminale, je veux devenir ingénieur"),
            Some(Formation::ProgrammeGrandeEcole)
        );
    }

    #[test]
    fn lycee_and_bac3_is_bachelor() {
        assert_eq!(
            detect_formation("Je suis lycéenne et je vise un bac+3"),
            Some(Formation::BachelorDeSpecialite)
        );
    }

    #[test]
    fn earlier_rule_wins_when_both_lycee_rules_match() {
        assert_eq!(
            detect_formation("lycéen, ingénieur ou un bachelor en trois ans ?"),
            Some(Formation::ProgrammeGrandeEcole)
        );
    }

    #[test]
    fn higher_education_rules() {
        assert_eq!(
            detect_formation("J'ai un BTS et je veux être ingénieur"),
            Some(Formation::ProgrammeGrandeEcole)
        );
        assert_eq!(
            detect_formation("Je suis en licence, je cherche un master"),
            Some(Formation::MasterProfessionnel)
        );
    }

    #[test]
    fn professionals_get_executive() {
        assert_eq!(
            detect_formation("Je travaille depuis dix ans et je pense à une reconversion"),
            Some(Formation::ProgrammeExecutive)
        );
        assert_eq!(detect_formation("le programme executive"), Some(Formation::ProgrammeExecutive));
    }

    #[test]
    fn unknown_profile_resolves_nothing() {
        assert_eq!(detect_formation("Bonjour, je visite juste"), None);
        assert_eq!(detect_formation("je suis en terminale"), None);
        assert_eq!(detect_formation(""), None);
    }

    #[test]
    fn everyday_expressions_are_not_levels_or_objectives() {
        assert_eq!(detect_formation("je cherche une formation dans le cadre de mon projet"), None);
        assert_eq!(detect_formation("attendez une seconde, j'ai un BTS et je veux un bachelor"), None);
    }

    #[test]
    fn specific_phrases_still_match() {
        assert_eq!(
            detect_formation("je suis en seconde et je veux être ingénieur"),
            Some(Formation::ProgrammeGrandeEcole)
        );
        assert_eq!(
            detect_formation("je suis cadre et je veux évoluer"),
            Some(Formation::ProgrammeExecutive)
        );
    }
}
