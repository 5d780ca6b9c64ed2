//! Candidate ranking
//!
//! A ranking is an ordered list of tie-break functions applied until one of
//! them orders the pair. The last one is always roster order, so the ranking
//! is a strict total order and elections are deterministic.

use std::cmp::Ordering;

use super::candidate::CandidateRecord;

/// One tie-break rule. `Less` means `a` ranks before `b`.
pub type TieBreak = fn(&CandidateRecord, &CandidateRecord) -> Ordering;

pub fn by_sequence(a: &CandidateRecord, b: &CandidateRecord) -> Ordering {
    b.seq.cmp(&a.seq)
}

pub fn by_position(a: &CandidateRecord, b: &CandidateRecord) -> Ordering {
    b.pos.cmp(&a.pos)
}

pub fn preferred_first(a: &CandidateRecord, b: &CandidateRecord) -> Ordering {
    b.preferred.cmp(&a.preferred)
}

pub fn fewer_replication_errors(a: &CandidateRecord, b: &CandidateRecord) -> Ordering {
    a.stats.replication_errors.cmp(&b.stats.replication_errors)
}

pub fn fewer_delay_events(a: &CandidateRecord, b: &CandidateRecord) -> Ordering {
    a.stats.delay_events.cmp(&b.stats.delay_events)
}

pub fn lower_average_delay(a: &CandidateRecord, b: &CandidateRecord) -> Ordering {
    a.stats.avg_delay_ms.cmp(&b.stats.avg_delay_ms)
}

pub fn more_samples(a: &CandidateRecord, b: &CandidateRecord) -> Ordering {
    b.stats.samples.cmp(&a.stats.samples)
}

pub fn roster_order(a: &CandidateRecord, b: &CandidateRecord) -> Ordering {
    a.index.cmp(&b.index)
}

/// Which score leads the ranking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Score {
    Sequence,
    Position,
}

/// Comparator composed of tie-break rules.
#[derive(Debug, Clone)]
pub struct Ranking {
    rules: Vec<TieBreak>,
}

impl Ranking {
    /// Score descending, preferred first, optional replication statistics, roster order.
    pub fn new(score: Score, use_stats: bool) -> Self {
        let mut rules: Vec<TieBreak> = vec![
            match score {
                Score::Sequence => by_sequence,
                Score::Position => by_position,
            },
            preferred_first,
        ];
        if use_stats {
            rules.extend_from_slice(&[
                fewer_replication_errors,
                fewer_delay_events,
                lower_average_delay,
                more_samples,
            ]);
        }
        rules.push(roster_order);
        Self { rules }
    }

    pub fn compare(&self, a: &CandidateRecord, b: &CandidateRecord) -> Ordering {
        self.rules
            .iter()
            .map(|rule| rule(a, b))
            .find(|o| *o != Ordering::Equal)
            .unwrap_or(Ordering::Equal)
    }

    pub fn sort(&self, records: &mut [CandidateRecord]) {
        records.sort_by(|a, b| self.compare(a, b));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(index: usize, seq: u64) -> CandidateRecord {
        let mut r = CandidateRecord::new(index, format!("db{}:3306", index));
        r.seq = seq;
        r.scored = true;
        r
    }

    #[test]
    fn test_sequence_descending() {
        let ranking = Ranking::new(Score::Sequence, false);
        let mut records = vec![record(0, 80), record(1, 100), record(2, 90)];
        ranking.sort(&mut records);
        let order: Vec<usize> = records.iter().map(|r| r.index).collect();
        assert_eq!(order, vec![1, 2, 0]);
    }

    #[test]
    fn test_preferred_breaks_ties() {
        let ranking = Ranking::new(Score::Sequence, false);
        let a = record(0, 100);
        let mut b = record(1, 100);
        b.preferred = true;
        assert_eq!(ranking.compare(&b, &a), Ordering::Less);
    }

    #[test]
    fn test_stats_only_when_enabled() {
        let mut a = record(0, 100);
        a.stats.replication_errors = 3;
        let b = record(1, 100);

        assert_eq!(Ranking::new(Score::Sequence, false).compare(&a, &b), Ordering::Less);
        assert_eq!(Ranking::new(Score::Sequence, true).compare(&a, &b), Ordering::Greater);
    }

    #[test]
    fn test_stats_cascade_order() {
        let ranking = Ranking::new(Score::Sequence, true);
        let mut a = record(0, 100);
        let mut b = record(1, 100);
        a.stats.delay_events = 1;
        b.stats.avg_delay_ms = 5000;
        // fewer delay events outranks lower average delay
        assert_eq!(ranking.compare(&b, &a), Ordering::Less);

        a.stats.delay_events = 0;
        a.stats.avg_delay_ms = 5000;
        a.stats.samples = 10;
        b.stats.samples = 20;
        assert_eq!(ranking.compare(&b, &a), Ordering::Less);
    }

    #[test]
    fn test_position_ranking() {
        let ranking = Ranking::new(Score::Position, false);
        let mut a = record(0, 0);
        let mut b = record(1, 0);
        a.pos = 10_000_000_100;
        b.pos = 20_000_000_004;
        assert_eq!(ranking.compare(&b, &a), Ordering::Less);
    }

    #[test]
    fn test_total_order_falls_back_to_roster() {
        let ranking = Ranking::new(Score::Sequence, true);
        assert_eq!(ranking.compare(&record(2, 5), &record(3, 5)), Ordering::Less);
        assert_eq!(ranking.compare(&record(3, 5), &record(3, 5)), Ordering::Equal);
    }
}
