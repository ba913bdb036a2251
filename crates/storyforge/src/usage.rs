//! Usage counters accumulated per project.

use std::ops::{Add, AddAssign};

use serde::{Deserialize, Serialize};

/// Additive usage counters reported by generation calls.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Usage {
    pub api_calls: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub images: u64,
    pub videos: u64,
    pub video_seconds: u64,
}

impl Usage {
    /// One external call with no other counters.
    pub fn call() -> Self {
        Self {
            api_calls: 1,
            ..Self::default()
        }
    }

    pub fn tokens(prompt: u64, completion: u64) -> Self {
        Self {
            api_calls: 1,
            prompt_tokens: prompt,
            completion_tokens: completion,
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

impl AddAssign for Usage {
    fn add_assign(&mut self, rhs: Self) {
        self.api_calls += rhs.api_calls;
        self.prompt_tokens += rhs.prompt_tokens;
        self.completion_tokens += rhs.completion_tokens;
        self.images += rhs.images;
        self.videos += rhs.videos;
        self.video_seconds += rhs.video_seconds;
    }
}

impl Add for Usage {
    type Output = Usage;

    fn add(mut self, rhs: Self) -> Self::Output {
        self += rhs;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_is_fieldwise() {
        let a = Usage::tokens(10, 5);
        let b = Usage {
            images: 2,
            ..Usage::call()
        };
        let sum = a + b;
        assert_eq!(sum.api_calls, 2);
        assert_eq!(sum.prompt_tokens, 10);
        assert_eq!(sum.completion_tokens, 5);
        assert_eq!(sum.images, 2);
    }

    #[test]
    fn test_deserialize_partial_json() {
        let usage: Usage = serde_json::from_str(r#"{"videos": 3}"#).unwrap();
        assert_eq!(usage.videos, 3);
        assert_eq!(usage.api_calls, 0);
        assert!(Usage::default().is_empty());
        assert!(!usage.is_empty());
    }
}
