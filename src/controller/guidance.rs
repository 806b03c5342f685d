//! Self-avoidance hints derived from the current cycle's action history.
//!
//! Hints are advisory text for the decision provider. Nothing here blocks an
//! action.

use std::collections::BTreeMap;

use crate::types::ActionRecord;

/// Hints for the next payload, given this cycle's history so far.
///
/// `threshold` is the number of repeats that triggers a hint; values below 2
/// are treated as 2.
pub fn self_avoidance_hints(history: &[ActionRecord], threshold: usize) -> Vec<String> {
    let threshold = threshold.max(2);
    let mut hints = Vec::new();

    if let Some(last) = history.last() {
        let streak = history
            .iter()
            .rev()
            .take_while(|r| r.action_type == last.action_type)
            .count();
        if streak >= threshold {
            hints.push(format!(
                "You have run '{}' {streak} times in a row this cycle. Check whether another one is needed.",
                last.action_type
            ));
        }
        if !last.success {
            hints.push(format!(
                "The last action '{}' failed: {}",
                last.action_type, last.message
            ));
        }
    }

    let mut per_target: BTreeMap<&str, usize> = BTreeMap::new();
    for record in history {
        if let Some(target) = record.target.as_deref() {
            *per_target.entry(target).or_default() += 1;
        }
    }
    for (target, count) in per_target {
        if count >= threshold {
            hints.push(format!(
                "'{target}' has already been targeted {count} times this cycle."
            ));
        }
    }

    hints
}
