use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;

use crate::messaging::ActivityKind;

pub const MAX_ENTRIES: usize = 5;

#[derive(Debug, Clone, PartialEq)]
pub struct ActivityEntry {
    pub text: String,
    pub kind: ActivityKind,
    pub at: DateTime<Utc>,
}

impl ActivityEntry {
    pub fn render(&self, now: DateTime<Utc>, tz: Tz) -> String {
        format!(
            "{} {} · {}",
            self.kind.icon(),
            self.text,
            relative_time(self.at, now, tz)
        )
    }
}

pub fn relative_time(at: DateTime<Utc>, now: DateTime<Utc>, tz: Tz) -> String {
    let elapsed = now.signed_duration_since(at);
    if elapsed.num_seconds() < 60 {
        "Just now".to_string()
    } else if elapsed.num_minutes() < 60 {
        format!("{} min ago", elapsed.num_minutes())
    } else {
        at.with_timezone(&tz).format("%H:%M").to_string()
    }
}

#[derive(Debug, Default, Clone)]
pub struct ActivityLog {
    entries: VecDeque<ActivityEntry>,
}

impl ActivityLog {
    pub fn push(&mut self, text: impl Into<String>, kind: ActivityKind, at: DateTime<Utc>) {
        self.entries.push_front(ActivityEntry {
            text: text.into(),
            kind,
            at,
        });
        self.entries.truncate(MAX_ENTRIES);
    }

    pub fn entries(&self) -> impl Iterator<Item = &ActivityEntry> {
        self.entries.iter()
    }
}
