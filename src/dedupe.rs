use std::collections::HashSet;

use crate::domain::PublishDate;

#[derive(Debug, Default)]
pub struct DedupeTracker {
    floor: Option<PublishDate>,
    seen: HashSet<PublishDate>,
}

impl DedupeTracker {
    pub fn new(floor: Option<PublishDate>) -> Self {
        Self {
            floor,
            seen: HashSet::new(),
        }
    }

    pub fn should_skip(&mut self, date: PublishDate) -> bool {
        if self.floor.is_some_and(|floor| date <= floor) {
            return true;
        }
        !self.seen.insert(date)
    }
}
