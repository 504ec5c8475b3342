//! Combinable operation outcome.
//!
//! Write and delete paths can touch several nodes at once. Each node reports a
//! [`State`]; the balancer folds them together so the caller sees one success
//! flag and every diagnostic message produced along the way.

use crate::error::StoreError;
use serde::{Deserialize, Serialize};
use std::ops::{Add, AddAssign};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct State {
    is_success: bool,
    messages: Vec<String>,
}

impl State {
    pub fn success() -> Self {
        Self::default()
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            is_success: false,
            messages: vec![message.into()],
        }
    }

    pub fn from_error(error: &StoreError) -> Self {
        Self::failure(error.to_string())
    }

    pub fn is_success(&self) -> bool {
        self.is_success
    }

    pub fn messages(&self) -> &[String] {
        &self.messages
    }

    /// Appends a message without touching the success flag.
    pub fn push_message(&mut self, message: impl Into<String>) {
        self.messages.push(message.into());
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.push_message(message);
        self
    }

    /// Success is the logical AND of both sides; messages keep their order.
    pub fn merge(mut self, other: State) -> State {
        self.is_success &= other.is_success;
        self.messages.extend(other.messages);
        self
    }
}

impl Default for State {
    fn default() -> Self {
        Self {
            is_success: true,
            messages: Vec::new(),
        }
    }
}

impl Add for State {
    type Output = State;

    fn add(self, rhs: State) -> State {
        self.merge(rhs)
    }
}

impl AddAssign for State {
    fn add_assign(&mut self, rhs: State) {
        self.is_success &= rhs.is_success;
        self.messages.extend(rhs.messages);
    }
}

impl FromIterator<State> for State {
    fn from_iter<I: IntoIterator<Item = State>>(iter: I) -> Self {
        iter.into_iter().fold(State::success(), State::merge)
    }
}

impl From<StoreError> for State {
    fn from(error: StoreError) -> Self {
        State::from_error(&error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_success_without_messages() {
        let state = State::default();
        assert!(state.is_success());
        assert!(state.messages().is_empty());
    }

    #[test]
    fn test_merge_ands_success_and_concatenates_messages() {
        let left = State::success().with_message("block 0 overwritten");
        let right = State::failure("disk full");

        let merged = left + right;

        assert!(!merged.is_success());
        assert_eq!(merged.messages(), ["block 0 overwritten", "disk full"]);
    }

    #[test]
    fn test_merge_is_associative() {
        let a = State::success().with_message("a");
        let b = State::failure("b");
        let c = State::success().with_message("c");

        let left = (a.clone() + b.clone()) + c.clone();
        let right = a + (b + c);

        assert_eq!(left, right);
    }

    #[test]
    fn test_fold_over_states() {
        let states = vec![
            State::success(),
            State::failure("node-2 unreachable"),
            State::success().with_message("ok"),
        ];

        let combined: State = states.into_iter().collect();

        assert!(!combined.is_success());
        assert_eq!(combined.messages().len(), 2);
    }

    #[test]
    fn test_empty_fold_is_success() {
        let combined: State = Vec::<State>::new().into_iter().collect();
        assert!(combined.is_success());
    }

    #[test]
    fn test_add_assign_keeps_failure() {
        let mut state = State::failure("first");
        state += State::success().with_message("second");
        assert!(!state.is_success());
        assert_eq!(state.messages(), ["first", "second"]);
    }

    #[test]
    fn test_from_error_carries_message() {
        let state: State = StoreError::NotFound("report.pdf".to_string()).into();
        assert!(!state.is_success());
        assert!(state.messages()[0].contains("report.pdf"));
    }

    #[test]
    fn test_serialization_roundtrip_field_names() {
        let state = State::failure("conflict");
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["is_success"], false);
        assert_eq!(json["messages"][0], "conflict");
    }
}
