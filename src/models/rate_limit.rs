use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Counter for one (scope, action) pair.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitRecord {
    pub count: u32,
    pub window_start: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl RateLimitRecord {
    pub fn fresh(now: DateTime<Utc>, window: chrono::Duration) -> Self {
        Self {
            count: 0,
            window_start: now,
            expires_at: now + window,
        }
    }

    /// Advances the counter by one, restarting the window when it elapsed.
    pub fn advance(&mut self, now: DateTime<Utc>, window: chrono::Duration) {
        if self.expires_at <= now {
            *self = Self::fresh(now, window);
        }
        self.count += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_resets_after_window() {
        let start = Utc::now();
        let window = chrono::Duration::seconds(60);
        let mut record = RateLimitRecord::fresh(start, window);
        record.advance(start, window);
        record.advance(start + chrono::Duration::seconds(30), window);
        assert_eq!(record.count, 2);

        let later = start + chrono::Duration::seconds(61);
        record.advance(later, window);
        assert_eq!(record.count, 1);
        assert_eq!(record.window_start, later);
    }
}
