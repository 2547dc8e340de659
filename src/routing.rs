//! Keyword lexicon — picks the public destination topic for approved reports.

/// Destination category chosen at publish time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutingKey {
    Accidents,
    Radars,
    General,
}

/// Ordered keyword sets with first-match-wins semantics.
///
/// Matching is lowercase substring matching; accident keywords are checked
/// before radar keywords, so "accident près du radar" routes to accidents.
#[derive(Debug, Clone)]
pub struct Lexicon {
    sets: Vec<(RoutingKey, Vec<String>)>,
}

impl Default for Lexicon {
    fn default() -> Self {
        Self {
            sets: vec![
                (
                    RoutingKey::Accidents,
                    [
                        "accident",
                        "collision",
                        "carambolage",
                        "crash",
                        "dashcam",
                        "accroch",
                        "choc",
                        "sortie de route",
                    ]
                    .map(String::from)
                    .to_vec(),
                ),
                (
                    RoutingKey::Radars,
                    [
                        "radar",
                        "contrôle",
                        "controle",
                        "jumelles",
                        "laser",
                        "gendarme",
                        "police",
                    ]
                    .map(String::from)
                    .to_vec(),
                ),
            ],
        }
    }
}

impl Lexicon {
    /// Build a lexicon from explicit keyword sets (highest priority first).
    pub fn new(sets: Vec<(RoutingKey, Vec<String>)>) -> Self {
        Self { sets }
    }

    /// Classify a report text. Unmatched text falls through to `General`.
    pub fn classify(&self, text: &str) -> RoutingKey {
        let haystack = text.to_lowercase();
        for (key, keywords) in &self.sets {
            if keywords.iter().any(|kw| haystack.contains(kw.as_str())) {
                return *key;
            }
        }
        RoutingKey::General
    }
}
