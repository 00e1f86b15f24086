use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Where an owned output is in its life.
///
/// The string form is the stable encoding used on disk and towards callers; see
/// [`UtxoState::as_str`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum UtxoState {
    /// the owning transaction has not been mined yet.
    Unconfirmed,
    /// confirmed and free to spend.
    Unspent,
    /// a spend of this output is sitting in the mempool.
    UnconfirmedSpent,
    /// spent on chain. Terminal.
    Spent,
}

/// A string that does not name any [`UtxoState`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown utxo state \"{0}\"")]
pub struct UnknownState(pub String);

impl UtxoState {
    /// All states, in enumeration order.
    pub const ALL: [UtxoState; 4] = [
        UtxoState::Unconfirmed,
        UtxoState::Unspent,
        UtxoState::UnconfirmedSpent,
        UtxoState::Spent,
    ];

    /// Stable string encoding.
    ///
    /// ```
    /// use sp_status::UtxoState;
    /// assert_eq!(UtxoState::UnconfirmedSpent.as_str(), "unconfirmed_spent");
    /// ```
    pub fn as_str(&self) -> &'static str {
        match self {
            UtxoState::Unconfirmed => "unconfirmed",
            UtxoState::Unspent => "unspent",
            UtxoState::UnconfirmedSpent => "unconfirmed_spent",
            UtxoState::Spent => "spent",
        }
    }

    pub fn is_spent(&self) -> bool {
        matches!(self, Self::Spent)
    }

    /// Only [`UtxoState::Unspent`] outputs count towards the free balance.
    pub fn is_free(&self) -> bool {
        matches!(self, Self::Unspent)
    }

    /// Whether the output still needs watching for a spend, either by block scanning or
    /// by a balance oracle.
    pub fn is_watched(&self) -> bool {
        matches!(self, Self::Unspent | Self::UnconfirmedSpent)
    }

    /// `Spent` never moves. Every other transition is accepted, including the
    /// idempotent self-transition.
    ///
    /// ```
    /// use sp_status::UtxoState;
    /// assert!(UtxoState::Unspent.can_transition_to(UtxoState::Spent));
    /// assert!(!UtxoState::Spent.can_transition_to(UtxoState::Unspent));
    /// ```
    pub fn can_transition_to(&self, next: UtxoState) -> bool {
        !self.is_spent() || next.is_spent()
    }
}

impl std::fmt::Display for UtxoState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<UtxoState> for String {
    fn from(value: UtxoState) -> Self {
        value.as_str().to_string()
    }
}

impl FromStr for UtxoState {
    type Err = UnknownState;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        use UtxoState::*;
        match s {
            "unconfirmed" => Ok(Unconfirmed),
            "unspent" => Ok(Unspent),
            "unconfirmed_spent" => Ok(UnconfirmedSpent),
            "spent" => Ok(Spent),
            other => Err(UnknownState(other.to_string())),
        }
    }
}

impl Serialize for UtxoState {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for UtxoState {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use test_case::test_case;

    #[test_case(UtxoState::Unconfirmed, "\"unconfirmed\"")]
    #[test_case(UtxoState::Unspent, "\"unspent\"")]
    #[test_case(UtxoState::UnconfirmedSpent, "\"unconfirmed_spent\"")]
    #[test_case(UtxoState::Spent, "\"spent\"")]
    fn json_encoding(state: UtxoState, json: &str) {
        assert_eq!(serde_json::to_string(&state).unwrap(), json);
        assert_eq!(serde_json::from_str::<UtxoState>(json).unwrap(), state);
    }

    #[test]
    fn rejects_ordinals_and_unknown_names() {
        assert!(serde_json::from_str::<UtxoState>("1").is_err());
        assert!(serde_json::from_str::<UtxoState>("\"confirmed\"").is_err());
        assert_eq!(
            "Spent".parse::<UtxoState>(),
            Err(UnknownState("Spent".to_string()))
        );
    }

    #[test]
    fn only_unspent_is_free() {
        let free: Vec<_> = UtxoState::ALL.iter().filter(|s| s.is_free()).collect();
        assert_eq!(free, vec![&UtxoState::Unspent]);
    }

    proptest! {
        #[test]
        fn spent_is_terminal(next in 0usize..4) {
            let next = UtxoState::ALL[next];
            prop_assert_eq!(UtxoState::Spent.can_transition_to(next), next == UtxoState::Spent);
        }

        #[test]
        fn display_parses_back(state in 0usize..4) {
            let state = UtxoState::ALL[state];
            prop_assert_eq!(state.to_string().parse::<UtxoState>(), Ok(state));
        }
    }
}
