//! Type-safe cache key builders

use std::fmt;

pub const VERSION: &str = "v1";

pub mod rate_limit {
    use super::*;

    pub const NAMESPACE: &str = "ratelimit";

    /// Counter for one `{scope}:{action}` pair.
    #[derive(Debug, Clone)]
    pub struct CounterKey {
        pub counter: String,
    }

    impl CounterKey {
        pub fn new(counter: impl Into<String>) -> Self {
            Self {
                counter: counter.into(),
            }
        }
    }

    impl fmt::Display for CounterKey {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{}:{}:{}", VERSION, NAMESPACE, self.counter)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_keys_are_versioned() {
        let key = rate_limit::CounterKey::new("user-1:payment_intent");
        assert_eq!(key.to_string(), "v1:ratelimit:user-1:payment_intent");
    }
}
