use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Ecosystem {
    Apple,
    Samsung,
    Google,
    Microsoft,
    Lenovo,
    Dell,
}

/// Brand buckets keyed by lowercase marker tokens, plus the rival pairs that
/// receive a penalty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EcosystemTable {
    pub buckets: Vec<(Ecosystem, Vec<String>)>,
    /// `(dominant, candidate)` pairs penalized when they meet.
    pub rivals: Vec<(Ecosystem, Ecosystem)>,
    pub affinity_bonus: f32,
    pub rival_penalty: f32,
}

impl Default for EcosystemTable {
    fn default() -> Self {
        let bucket = |eco: Ecosystem, markers: &[&str]| {
            (eco, markers.iter().map(|m| m.to_string()).collect::<Vec<_>>())
        };
        Self {
            buckets: vec![
                bucket(
                    Ecosystem::Apple,
                    &["apple", "iphone", "ipad", "macbook", "imac", "airpods", "airtag"],
                ),
                bucket(Ecosystem::Samsung, &["samsung", "galaxy"]),
                bucket(Ecosystem::Google, &["google", "pixel", "chromecast"]),
                bucket(Ecosystem::Microsoft, &["microsoft", "surface", "xbox"]),
                bucket(Ecosystem::Lenovo, &["lenovo", "thinkpad", "ideapad", "yoga"]),
                bucket(Ecosystem::Dell, &["dell", "alienware", "inspiron", "xps"]),
            ],
            rivals: vec![
                (Ecosystem::Apple, Ecosystem::Samsung),
                (Ecosystem::Samsung, Ecosystem::Apple),
            ],
            affinity_bonus: 1.3,
            rival_penalty: 0.7,
        }
    }
}

impl EcosystemTable {
    /// First bucket (in table order) with a marker contained in `name`.
    pub fn classify(&self, name: &str) -> Option<Ecosystem> {
        let name = name.to_lowercase();
        self.buckets
            .iter()
            .find(|(_, markers)| markers.iter().any(|m| name.contains(m.as_str())))
            .map(|(eco, _)| *eco)
    }

    fn is_rival(&self, dominant: Ecosystem, candidate: Ecosystem) -> bool {
        self.rivals.contains(&(dominant, candidate))
    }
}

#[derive(Debug, Clone, Default)]
pub struct EcosystemReranker {
    table: EcosystemTable,
}

impl EcosystemReranker {
    pub fn new(table: EcosystemTable) -> Self {
        Self { table }
    }

    /// Most frequent bucket across the purchase history; ties go to the
    /// bucket listed first in the table.
    pub fn dominant<'a, I>(&self, history: I) -> Option<Ecosystem>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut counts = vec![0usize; self.table.buckets.len()];
        for name in history {
            if let Some(eco) = self.table.classify(name) {
                if let Some(slot) = self.table.buckets.iter().position(|(e, _)| *e == eco) {
                    counts[slot] += 1;
                }
            }
        }

        let mut best: Option<(usize, usize)> = None;
        for (slot, &count) in counts.iter().enumerate() {
            if count > 0 && best.map_or(true, |(_, c)| count > c) {
                best = Some((slot, count));
            }
        }
        best.map(|(slot, _)| self.table.buckets[slot].0)
    }

    pub fn multiplier(&self, dominant: Option<Ecosystem>, candidate_name: &str) -> f32 {
        let (Some(dominant), Some(candidate)) = (dominant, self.table.classify(candidate_name)) else {
            return 1.0;
        };
        if candidate == dominant {
            self.table.affinity_bonus
        } else if self.table.is_rival(dominant, candidate) {
            self.table.rival_penalty
        } else {
            1.0
        }
    }

    /// Adjusted score, clamped to `[0, 1]`.
    pub fn adjust(&self, dominant: Option<Ecosystem>, candidate_name: &str, score: f32) -> f32 {
        (score * self.multiplier(dominant, candidate_name)).clamp(0.0, 1.0)
    }
}
