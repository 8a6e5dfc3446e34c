//! Sample identifiers
//!
//! A sample id is the composite string `{input_id}_{number_of_turns}_{trajectory_id}`.
//! The id travels unchanged from one agent stage to the next, so stages can
//! join their rows on it.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

const SEPARATOR: char = '_';

/// Parsed composite sample identifier
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SampleId {
    input_id: String,
    number_of_turns: u32,
    trajectory_id: u32,
}

impl SampleId {
    /// Build an id from its components.
    ///
    /// `input_id` may itself contain underscores; only the two trailing
    /// numeric components are positional.
    pub fn new(input_id: impl Into<String>, number_of_turns: u32, trajectory_id: u32) -> Result<Self> {
        let input_id = input_id.into();
        if input_id.is_empty() {
            return Err(Error::InvalidSampleId("input id cannot be empty".to_string()));
        }
        Ok(Self {
            input_id,
            number_of_turns,
            trajectory_id,
        })
    }

    /// Parse `{input_id}_{number_of_turns}_{trajectory_id}`
    pub fn parse(raw: &str) -> Result<Self> {
        let invalid = || Error::InvalidSampleId(raw.to_string());
        let mut parts = raw.rsplitn(3, SEPARATOR);
        let trajectory = parts.next().ok_or_else(invalid)?;
        let turns = parts.next().ok_or_else(invalid)?;
        let input = parts.next().ok_or_else(invalid)?;
        if input.is_empty() {
            return Err(invalid());
        }
        let number_of_turns = turns.parse().map_err(|_| invalid())?;
        let trajectory_id = trajectory.parse().map_err(|_| invalid())?;
        Ok(Self {
            input_id: input.to_string(),
            number_of_turns,
            trajectory_id,
        })
    }

    #[must_use]
    pub fn input_id(&self) -> &str {
        &self.input_id
    }

    #[must_use]
    pub const fn number_of_turns(&self) -> u32 {
        self.number_of_turns
    }

    #[must_use]
    pub const fn trajectory_id(&self) -> u32 {
        self.trajectory_id
    }

    /// Same input and trajectory, one interaction turn deeper
    pub fn next_turn(&self) -> Result<Self> {
        let number_of_turns = self.number_of_turns.checked_add(1).ok_or_else(|| {
            Error::InvalidSampleId(format!("{self}: turn counter is at its maximum"))
        })?;
        Ok(Self {
            input_id: self.input_id.clone(),
            number_of_turns,
            trajectory_id: self.trajectory_id,
        })
    }

    /// Same input and turn, different trajectory
    #[must_use]
    pub fn with_trajectory(&self, trajectory_id: u32) -> Self {
        Self {
            input_id: self.input_id.clone(),
            number_of_turns: self.number_of_turns,
            trajectory_id,
        }
    }

    /// Whether two ids belong to the same input at the same turn
    #[must_use]
    pub fn same_group(&self, other: &Self) -> bool {
        self.input_id == other.input_id && self.number_of_turns == other.number_of_turns
    }
}

impl fmt::Display for SampleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{SEPARATOR}{}{SEPARATOR}{}",
            self.input_id, self.number_of_turns, self.trajectory_id
        )
    }
}

impl FromStr for SampleId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Mints fresh sample ids.
///
/// Input ids are random UUIDs (hex, no separators) so ids minted by
/// different tables or processes never collide.
#[derive(Debug, Default, Clone, Copy)]
pub struct SampleIdGenerator {
    initial_turn: u32,
}

impl SampleIdGenerator {
    #[must_use]
    pub const fn new() -> Self {
        Self { initial_turn: 0 }
    }

    /// Generator whose ids start at the given turn
    #[must_use]
    pub const fn starting_at_turn(initial_turn: u32) -> Self {
        Self { initial_turn }
    }

    /// Mint one logical sample expanded into `rollout_n` trajectories.
    ///
    /// All returned ids share `input_id` and turn; trajectory ids are `0..rollout_n`.
    #[must_use]
    pub fn mint(&self, rollout_n: u32) -> Vec<SampleId> {
        let input_id = Uuid::new_v4().simple().to_string();
        (0..rollout_n.max(1))
            .map(|trajectory_id| SampleId {
                input_id: input_id.clone(),
                number_of_turns: self.initial_turn,
                trajectory_id,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_display_and_parse() {
        let id = SampleId::new("abc", 2, 5).unwrap();
        assert_eq!(id.to_string(), "abc_2_5");
        assert_eq!(SampleId::parse("abc_2_5").unwrap(), id);
    }

    #[test]
    fn test_parse_input_with_underscores() {
        let id = SampleId::parse("gsm8k_train_17_3_1").unwrap();
        assert_eq!(id.input_id(), "gsm8k_train_17");
        assert_eq!(id.number_of_turns(), 3);
        assert_eq!(id.trajectory_id(), 1);
        assert_eq!(id.to_string(), "gsm8k_train_17_3_1");
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for raw in ["", "abc", "abc_1", "_1_2", "abc_x_1", "abc_1_-1"] {
            assert!(
                matches!(SampleId::parse(raw), Err(Error::InvalidSampleId(_))),
                "{raw} should be rejected"
            );
        }
    }

    #[test]
    fn test_next_turn_keeps_lineage() {
        let id = SampleId::parse("p9_0_4").unwrap();
        let next = id.next_turn().unwrap();
        assert_eq!(next.to_string(), "p9_1_4");
        assert_eq!(next.input_id(), id.input_id());
        assert!(!next.same_group(&id));
        assert!(id.with_trajectory(7).same_group(&id));

        let last = SampleId::parse(&format!("p9_{}_0", u32::MAX)).unwrap();
        assert!(matches!(last.next_turn(), Err(Error::InvalidSampleId(_))));
    }

    #[test]
    fn test_mint_rollout_shares_group() {
        let ids = SampleIdGenerator::new().mint(4);
        assert_eq!(ids.len(), 4);
        assert!(ids.iter().all(|id| id.same_group(&ids[0])));
        let trajectories: HashSet<u32> = ids.iter().map(SampleId::trajectory_id).collect();
        assert_eq!(trajectories.len(), 4);
        for id in &ids {
            assert_eq!(SampleId::parse(&id.to_string()).unwrap(), *id);
        }
    }

    #[test]
    fn test_mint_distinct_inputs() {
        let generator = SampleIdGenerator::starting_at_turn(1);
        let a = generator.mint(1);
        let b = generator.mint(1);
        assert_ne!(a[0].input_id(), b[0].input_id());
        assert_eq!(a[0].number_of_turns(), 1);
    }
}
