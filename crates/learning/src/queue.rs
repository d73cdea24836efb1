//! Review queue and study ordering.

use crate::sm2::QuestionPerformance;
use std::time::Duration;

const DAY: Duration = Duration::from_secs(24 * 3600);

/// Tracked questions partitioned by due time.
///
/// Each bucket holds question ids sorted by due time, earliest (most
/// overdue) first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReviewQueue {
    /// Due more than a day ago.
    pub overdue: Vec<String>,
    /// Due now, at most a day late.
    pub due_now: Vec<String>,
    /// Due within the next day.
    pub due_today: Vec<String>,
    /// Due later.
    pub upcoming: Vec<String>,
}

impl ReviewQueue {
    /// Partition `records` relative to `now`.
    pub fn build<'a>(records: impl IntoIterator<Item = &'a QuestionPerformance>, now: Duration) -> Self {
        let mut sorted: Vec<&QuestionPerformance> = records.into_iter().collect();
        sorted.sort_by(|a, b| {
            a.next_review
                .cmp(&b.next_review)
                .then_with(|| a.question_id.cmp(&b.question_id))
        });

        let mut queue = Self::default();
        for q in sorted {
            let id = q.question_id.clone();
            if q.next_review.saturating_add(DAY) < now {
                queue.overdue.push(id);
            } else if q.next_review <= now {
                queue.due_now.push(id);
            } else if q.next_review <= now.saturating_add(DAY) {
                queue.due_today.push(id);
            } else {
                queue.upcoming.push(id);
            }
        }
        queue
    }

    /// Overdue then due-now questions.
    pub fn due(&self) -> impl Iterator<Item = &String> + '_ {
        self.overdue.iter().chain(&self.due_now)
    }

    pub fn due_count(&self) -> usize {
        self.overdue.len() + self.due_now.len()
    }
}

/// Knobs for [`study_order`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StudyPlan {
    /// Sessions shorter than this are topped up.
    pub min_session: usize,
    /// Accuracy below which a question counts as weak.
    pub weak_accuracy: f64,
    /// Attempts needed before accuracy is trusted.
    pub weak_min_attempts: u32,
}

impl Default for StudyPlan {
    fn default() -> Self {
        Self {
            min_session: 10,
            weak_accuracy: 0.6,
            weak_min_attempts: 3,
        }
    }
}

/// Questions to study now, in order.
///
/// Due questions come first, most overdue first. When fewer than
/// `plan.min_session` are due, weak questions (lowest accuracy first) and
/// then questions due later today fill the gap.
pub fn study_order(records: &[&QuestionPerformance], now: Duration, plan: StudyPlan) -> Vec<String> {
    let queue = ReviewQueue::build(records.iter().copied(), now);
    let mut order: Vec<String> = queue.due().cloned().collect();

    if order.len() < plan.min_session {
        let mut weak: Vec<&QuestionPerformance> = records
            .iter()
            .copied()
            .filter(|q| q.times_answered >= plan.weak_min_attempts && q.accuracy() < plan.weak_accuracy)
            .filter(|q| !order.contains(&q.question_id))
            .collect();
        weak.sort_by(|a, b| {
            a.accuracy()
                .total_cmp(&b.accuracy())
                .then_with(|| a.question_id.cmp(&b.question_id))
        });
        for q in weak {
            if order.len() >= plan.min_session {
                break;
            }
            order.push(q.question_id.clone());
        }
    }

    for id in &queue.due_today {
        if order.len() >= plan.min_session {
            break;
        }
        if !order.contains(id) {
            order.push(id.clone());
        }
    }
    order
}
