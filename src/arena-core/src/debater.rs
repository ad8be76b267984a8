//! Debater identities.
//!
//! Three fixed personas take part in every debate, always speaking in the
//! same round-robin order.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One of the three AI debaters.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Debater {
    /// The optimist.
    Tom,
    /// The skeptic.
    Mark,
    /// The pragmatist.
    Sam,
}

impl Debater {
    /// Round-robin speaking order.
    pub const ALL: [Debater; 3] = [Debater::Tom, Debater::Mark, Debater::Sam];

    pub const COUNT: usize = Self::ALL.len();

    /// Debater whose turn it is at the given zero-based turn number.
    pub fn for_turn(turn_number: usize) -> Self {
        Self::ALL[turn_number % Self::COUNT]
    }

    pub fn name(&self) -> &'static str {
        match self {
            Debater::Tom => "Tom",
            Debater::Mark => "Mark",
            Debater::Sam => "Sam",
        }
    }

    pub fn persona(&self) -> &'static str {
        match self {
            Debater::Tom => "The Optimist",
            Debater::Mark => "The Skeptic",
            Debater::Sam => "The Pragmatist",
        }
    }

    /// Get the full display name with persona.
    pub fn display_name(&self) -> String {
        format!("{} ({})", self.name(), self.persona())
    }
}

impl fmt::Display for Debater {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_for_turn_wraps_round_robin() {
        let order: Vec<Debater> = (0..7).map(Debater::for_turn).collect();
        assert_eq!(
            order,
            vec![
                Debater::Tom,
                Debater::Mark,
                Debater::Sam,
                Debater::Tom,
                Debater::Mark,
                Debater::Sam,
                Debater::Tom,
            ]
        );
    }

    #[test]
    fn test_display_name() {
        assert_eq!(Debater::Mark.display_name(), "Mark (The Skeptic)");
        assert_eq!(Debater::Sam.to_string(), "Sam");
    }
}
